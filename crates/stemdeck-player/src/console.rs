//! Line-oriented console commands
//!
//! Each stdin line parses into a [`Command`], which [`execute`] applies to
//! the locked [`Session`] and answers with a line of text.

use anyhow::{anyhow, bail, Context, Result};

use stemdeck_core::engine::{LoopUpdate, TransportState};
use stemdeck_core::session::{format_time, PlaybackStatus, Session};
use stemdeck_core::song::{Song, TrackId, TrackUpdate};

pub const HELP: &str = "\
commands:
  play | pause | toggle | stop     transport
  seek <sec>                       jump to a position
  loop <start> <end>               set the loop region (seconds)
  loop on|off                      enable or disable looping
  vol <track> <0-1>                fader
  gain <track> <0-1>               trim
  mute <track> | solo <track>      toggle mute or solo
  undo | redo                      mixer history
  tracks | status                  show the mixer or the transport
  pad on|off                       ambient pad power
  pad key <K>                      pad key (C, F#, Bb, ...)
  pad vol <0-1>                    pad level
  help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Pause,
    Toggle,
    Stop,
    Seek(f64),
    LoopRange { start: f64, end: f64 },
    LoopEnabled(bool),
    Volume { track: TrackId, value: f32 },
    Gain { track: TrackId, value: f32 },
    Mute(TrackId),
    Solo(TrackId),
    Undo,
    Redo,
    Tracks,
    Status,
    PadPower(bool),
    PadKey(String),
    PadVolume(f32),
    Help,
    Quit,
}

/// What the read loop should do after a command
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Print(String),
    Quit,
}

/// Parse one input line; blank lines yield `None`
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&verb, args)) = words.split_first() else {
        return Ok(None);
    };

    let command = match (verb.to_ascii_lowercase().as_str(), args) {
        ("play", []) => Command::Play,
        ("pause", []) => Command::Pause,
        ("toggle", []) | ("space", []) => Command::Toggle,
        ("stop", []) => Command::Stop,
        ("seek", [time]) => Command::Seek(number(time)?),
        ("loop", [flag]) => Command::LoopEnabled(on_off(flag)?),
        ("loop", [start, end]) => Command::LoopRange {
            start: number(start)?,
            end: number(end)?,
        },
        ("vol", [track, value]) => Command::Volume {
            track: TrackId::new(*track),
            value: level(value)?,
        },
        ("gain", [track, value]) => Command::Gain {
            track: TrackId::new(*track),
            value: level(value)?,
        },
        ("mute", [track]) => Command::Mute(TrackId::new(*track)),
        ("solo", [track]) => Command::Solo(TrackId::new(*track)),
        ("undo", []) => Command::Undo,
        ("redo", []) => Command::Redo,
        ("tracks", []) => Command::Tracks,
        ("status", []) => Command::Status,
        ("pad", [flag]) => Command::PadPower(on_off(flag)?),
        ("pad", ["key", key]) => Command::PadKey(key.to_string()),
        ("pad", ["vol", value]) => Command::PadVolume(level(value)?),
        ("help", []) | ("?", []) => Command::Help,
        ("quit", []) | ("exit", []) | ("q", []) => Command::Quit,
        _ => bail!("unrecognised command '{}' (try 'help')", line.trim()),
    };
    Ok(Some(command))
}

fn number(word: &str) -> Result<f64> {
    let value: f64 = word.parse().with_context(|| format!("'{}' is not a number", word))?;
    if !value.is_finite() {
        bail!("'{}' is not a finite number", word);
    }
    Ok(value)
}

fn level(word: &str) -> Result<f32> {
    let value = number(word)?;
    if !(0.0..=1.0).contains(&value) {
        bail!("level {} is outside 0-1", value);
    }
    Ok(value as f32)
}

fn on_off(word: &str) -> Result<bool> {
    match word.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => Err(anyhow!("expected on or off, got '{}'", other)),
    }
}

/// Apply a command to the session
pub fn execute(session: &mut Session, command: Command) -> Reply {
    let text = match command {
        Command::Play => {
            let changed = session.play();
            transport_reply(session, changed, "playing")
        }
        Command::Pause => {
            let changed = session.pause();
            transport_reply(session, changed, "paused")
        }
        Command::Toggle => {
            let changed = session.toggle_play();
            let label = if session.status().is_playing { "playing" } else { "paused" };
            transport_reply(session, changed, label)
        }
        Command::Stop => {
            session.stop();
            format!("stopped at {}", format_time(session.current_time()))
        }
        Command::Seek(time) => {
            session.seek(time);
            format!("at {}", format_time(session.current_time()))
        }
        Command::LoopRange { start, end } => {
            session.update_loop(LoopUpdate::range(start, end));
            loop_label(session)
        }
        Command::LoopEnabled(enabled) => {
            session.update_loop(LoopUpdate::enabled(enabled));
            loop_label(session)
        }
        Command::Volume { track, value } => {
            mixer_reply(session, &track, |s, id| s.handle_track_update(id, &TrackUpdate::volume(value)))
        }
        Command::Gain { track, value } => {
            mixer_reply(session, &track, |s, id| s.handle_track_update(id, &TrackUpdate::gain(value)))
        }
        Command::Mute(track) => mixer_reply(session, &track, |s, id| s.toggle_mute(id)),
        Command::Solo(track) => mixer_reply(session, &track, |s, id| s.toggle_solo(id)),
        Command::Undo => {
            if session.undo() {
                render_tracks(session)
            } else {
                "nothing to undo".to_string()
            }
        }
        Command::Redo => {
            if session.redo() {
                render_tracks(session)
            } else {
                "nothing to redo".to_string()
            }
        }
        Command::Tracks => render_tracks(session),
        Command::Status => render_status(&session.status(), session.song()),
        Command::PadPower(on) => match session.pad_power(on) {
            Ok(()) if on => "pad on".to_string(),
            Ok(()) => "pad off".to_string(),
            Err(e) => format!("pad: {}", e),
        },
        Command::PadKey(key) => match session.pad_key(&key) {
            Ok(true) => match session.pad().and_then(|p| p.active_key()) {
                Some(active) => format!("pad key {}", active),
                None => "pad released".to_string(),
            },
            Ok(false) => "pad is off".to_string(),
            Err(e) => format!("pad: {}", e),
        },
        Command::PadVolume(value) => {
            session.pad_volume(value);
            format!("pad volume {:.2}", value)
        }
        Command::Help => HELP.to_string(),
        Command::Quit => return Reply::Quit,
    };
    Reply::Print(text)
}

fn transport_reply(session: &Session, changed: bool, label: &str) -> String {
    if changed {
        return format!("{} at {}", label, format_time(session.current_time()));
    }
    match session.status().error {
        Some(e) => format!("unavailable: {}", e),
        None => format!("not possible while {}", session.state().as_str()),
    }
}

fn mixer_reply(
    session: &mut Session,
    track: &TrackId,
    edit: impl FnOnce(&mut Session, &TrackId) -> bool,
) -> String {
    if !session.current_tracks().iter().any(|t| &t.id == track) {
        return format!("no track '{}'", track);
    }
    if edit(session, track) {
        render_tracks(session)
    } else {
        "unchanged".to_string()
    }
}

fn loop_label(session: &Session) -> String {
    let region = session.loop_region();
    format!(
        "loop {} - {} ({})",
        format_time(region.start),
        format_time(region.end),
        if region.enabled { "on" } else { "off" }
    )
}

/// One line per track: id, fader, trim and flags
pub fn render_tracks(session: &Session) -> String {
    let tracks = session.current_tracks();
    if tracks.is_empty() {
        return "no tracks".to_string();
    }
    let errors = session.status().track_load_errors;
    tracks
        .iter()
        .map(|t| {
            let mut line = format!("{:<12} vol {:.2}  gain {:.2}", t.id.as_str(), t.volume, t.gain);
            if t.is_muted {
                line.push_str("  [M]");
            }
            if t.is_soloed {
                line.push_str("  [S]");
            }
            if let Some(err) = errors.get(&t.id) {
                line.push_str(&format!("  (failed: {})", err));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Transport summary: state, clock, loop, section and load progress
pub fn render_status(status: &PlaybackStatus, song: Option<&Song>) -> String {
    let mut line = format!("[{}] {}", status.state.as_str(), status.clock_label());

    if status.loop_region.enabled {
        line.push_str(&format!(
            "  loop {}-{}",
            format_time(status.loop_region.start),
            format_time(status.loop_region.end)
        ));
    }

    if let Some(song) = song {
        let fraction = if status.duration > 0.0 { status.current_time / status.duration } else { 0.0 };
        if let Some((_, section)) = song.section_at(fraction) {
            line.push_str(&format!("  {}", section.label));
        }
    }

    let progress = status.loading_progress.overall();
    if progress < 100.0 && status.state == TransportState::Loading {
        line.push_str(&format!("  loading {:.0}%", progress));
    }

    if let Some(error) = &status.error {
        line.push_str(&format!("  error: {}", error));
    }
    line
}

/// Line to print when a published status differs from the previous one
///
/// State changes, new errors and load settling always print. With `follow`
/// set, every change of the displayed clock prints too.
pub fn status_change(prev: Option<&PlaybackStatus>, next: &PlaybackStatus, follow: bool) -> Option<String> {
    let Some(prev) = prev else {
        return Some(render_status(next, None));
    };

    if prev.state != next.state || prev.error != next.error {
        let mut line = render_status(next, None);
        for (id, err) in &next.track_load_errors {
            if !prev.track_load_errors.contains_key(id) {
                line.push_str(&format!("\n  track '{}' skipped: {}", id, err));
            }
        }
        return Some(line);
    }

    if follow && next.is_playing && format_time(prev.current_time) != format_time(next.current_time) {
        return Some(render_status(next, None));
    }
    None
}
