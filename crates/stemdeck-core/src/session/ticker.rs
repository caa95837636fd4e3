//! Periodic position publisher
//!
//! The ticker only recomputes and publishes; it never owns the position.
//! Stopping it (or dropping it) ends the thread before the next tick.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, RecvTimeoutError, Sender, TrySendError};

use super::status::PlaybackStatus;
use super::Session;

pub struct Ticker {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Tick `session` every `interval`, publishing each status on `status_tx`
    ///
    /// A full status channel skips that tick's status; a disconnected one
    /// ends the ticker.
    pub fn spawn(
        session: Arc<Mutex<Session>>,
        interval: Duration,
        status_tx: Sender<PlaybackStatus>,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("transport-ticker".to_string())
            .spawn(move || {
                log::debug!("Ticker started ({:?})", interval);
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    let status = match session.lock() {
                        Ok(mut session) => session.tick(),
                        Err(_) => {
                            log::error!("Session lock poisoned, ticker stopping");
                            break;
                        }
                    };

                    match status_tx.try_send(status) {
                        Ok(()) | Err(TrySendError::Full(_)) => {}
                        Err(TrySendError::Disconnected(_)) => break,
                    }
                }
                log::debug!("Ticker stopped");
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Cancel the ticker and wait for its thread
    pub fn stop(&mut self) {
        // Dropping the sender wakes the thread immediately
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Ticker thread panicked");
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}
