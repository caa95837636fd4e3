//! Stemdeck Player - console stems player
//!
//! This is the main entry point. It:
//! 1. Loads the player config and the song manifest
//! 2. Opens the audio output (or carries on without one)
//! 3. Starts the session ticker and a status printer thread
//! 4. Reads commands from stdin until `quit` or end of input
//!
//! ## Usage
//!
//! ```text
//! stemdeck-player [--config <path>] <song.yaml>
//! stemdeck-player --list-devices
//! ```

mod config;
mod console;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use crossbeam::channel::bounded;

use stemdeck_core::audio::{get_output_devices, start_audio_system};
use stemdeck_core::loader::SchemeSource;
use stemdeck_core::session::{PlaybackStatus, Session, Ticker};
use stemdeck_core::song::Song;

use config::PlayerConfig;
use console::{execute, parse_command, render_tracks, status_change, Reply};

struct Args {
    config_path: PathBuf,
    song_path: Option<PathBuf>,
    list_devices: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config_path: config::default_config_path(),
        song_path: None,
        list_devices: false,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--list-devices" => args.list_devices = true,
            "--config" => {
                let path = iter.next().ok_or_else(|| anyhow!("--config needs a path"))?;
                args.config_path = PathBuf::from(path);
            }
            flag if flag.starts_with("--") => bail!("unknown flag {}", flag),
            path => {
                if args.song_path.is_some() {
                    bail!("only one song manifest can be given");
                }
                args.song_path = Some(PathBuf::from(path));
            }
        }
    }
    Ok(args)
}

fn list_devices() -> Result<()> {
    let devices = get_output_devices().context("Failed to enumerate output devices")?;
    if devices.is_empty() {
        println!("No output devices found");
    }
    for device in devices {
        println!("{}  rates: {:?}  channels: {}", device, device.sample_rates, device.max_channels);
    }
    Ok(())
}

fn main() -> Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    if args.list_devices {
        return list_devices();
    }
    let song_path = args
        .song_path
        .ok_or_else(|| anyhow!("usage: stemdeck-player [--config <path>] <song.yaml>"))?;

    log::info!("stemdeck-player starting up");
    let config: PlayerConfig = config::load_config(&args.config_path);
    let song = Song::load_manifest(&song_path)?;

    let source = Arc::new(SchemeSource::with_http(Duration::from_secs(
        config.session.loader.http_timeout_secs,
    )));

    // The stream stops when the handle drops, so it lives until main returns
    let (mut session, _audio_handle) = match start_audio_system(&config.audio) {
        Ok(audio) => {
            println!(
                "Audio output: {} ({} Hz, {} frames, {:.1} ms)",
                audio.handle.device_name(),
                audio.sample_rate,
                audio.buffer_size,
                audio.latency_ms
            );
            let session = Session::new(
                config.session.clone(),
                source,
                audio.clock,
                Box::new(audio.command_sender),
            );
            (session, Some(audio.handle))
        }
        Err(e) => {
            eprintln!("Warning: Could not open audio output: {}", e);
            eprintln!("Running without audio (mixer only)");
            (Session::without_audio(config.session.clone(), source, e.to_string()), None)
        }
    };

    if config.pad_enabled() {
        if let Err(e) = session.enable_pad(config.pad.clone()) {
            log::warn!("Ambient pad disabled: {}", e);
        }
    }

    println!("{} - {} ({} tracks)", song.artist, song.title, song.tracks.len());
    session.load_song(&song)?;
    println!("{}", render_tracks(&session));
    println!("Type 'help' for commands");

    let session = Arc::new(Mutex::new(session));
    let (status_tx, status_rx) = bounded::<PlaybackStatus>(4);
    let mut ticker = Ticker::spawn(Arc::clone(&session), config.session.tick_interval(), status_tx)
        .context("Failed to start transport ticker")?;

    let follow = config.follow;
    let printer = thread::Builder::new()
        .name("status-printer".to_string())
        .spawn(move || {
            let mut last: Option<PlaybackStatus> = None;
            for status in status_rx.iter() {
                if let Some(line) = status_change(last.as_ref(), &status, follow) {
                    println!("{}", line);
                }
                last = Some(status);
            }
        })
        .context("Failed to start status printer")?;

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{:#}", e);
                continue;
            }
        };

        let reply = {
            let mut session = session.lock().map_err(|_| anyhow!("session lock poisoned"))?;
            execute(&mut session, command)
        };
        match reply {
            Reply::Print(text) => println!("{}", text),
            Reply::Quit => break,
        }
    }

    // Stopping the ticker drops its sender, which ends the printer
    ticker.stop();
    if printer.join().is_err() {
        log::error!("Status printer panicked");
    }
    if let Ok(mut session) = session.lock() {
        session.stop();
    }
    log::info!("stemdeck-player stopped");
    Ok(())
}
