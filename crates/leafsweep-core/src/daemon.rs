//! Compressor daemon: background thread that runs passes
//!
//! The daemon sleeps for the configured interval, or until somebody wakes
//! it, then runs one pass. It stops when asked, when the environment is
//! closed, or after a pass fails with an error nobody else can handle.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::compressor::Compressor;
use crate::config::Config;
use crate::error::{SweepError, SweepResult};
use crate::tree::Environment;

/// Messages understood by the daemon thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonMessage {
    /// Run a pass now instead of waiting for the timer
    Wakeup,
    /// Finish the current pass, if any, and exit
    Shutdown,
}

/// Handle to a running compressor daemon.
/// Dropping this handle stops the thread and waits for it.
pub struct DaemonHandle {
    sender: Sender<DaemonMessage>,
    thread: Option<thread::JoinHandle<()>>,
}

impl DaemonHandle {
    /// Ask for a pass as soon as the current one, if any, is done.
    /// Returns false if the daemon has already exited.
    pub fn wakeup(&self) -> bool {
        self.sender.send(DaemonMessage::Wakeup).is_ok()
    }

    /// Request shutdown and wait for the thread to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    /// Check if the daemon thread is still running.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn stop(&mut self) {
        let _ = self.sender.send(DaemonMessage::Shutdown);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("compressor daemon panicked");
            }
        }
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start the compressor daemon for `compressor`.
///
/// Runs a pass every `config.wakeup_interval`, or earlier on
/// `DaemonHandle::wakeup`. A fatal error marks the environment invalid
/// through `Environment::invalidate` and stops the daemon.
pub fn start_daemon<E>(compressor: Arc<Compressor<E>>, config: &Config) -> SweepResult<DaemonHandle>
where
    E: Environment + 'static,
{
    config.validate()?;
    let interval = config.wakeup_interval;
    let (sender, receiver) = mpsc::channel();

    let thread = thread::Builder::new()
        .name("leafsweep-compressor".to_string())
        .spawn(move || {
            daemon_loop(compressor, receiver, interval);
        })
        .map_err(|e| SweepError::Io {
            kind: e.kind(),
            message: format!("Failed to spawn compressor thread: {}", e),
        })?;

    info!(interval_ms = interval.as_millis() as u64, "compressor daemon started");
    Ok(DaemonHandle {
        sender,
        thread: Some(thread),
    })
}

fn daemon_loop<E: Environment>(
    compressor: Arc<Compressor<E>>,
    receiver: Receiver<DaemonMessage>,
    interval: Duration,
) {
    loop {
        match receiver.recv_timeout(interval) {
            Ok(DaemonMessage::Wakeup) | Err(RecvTimeoutError::Timeout) => {}
            Ok(DaemonMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
        }

        compressor.note_wakeup();
        if compressor.env().is_closed() {
            debug!("environment closed, compressor daemon exiting");
            break;
        }

        match compressor.run_pass() {
            Ok(_) => {}
            Err(err) if err.is_fatal() => {
                error!(error = %err, "compressor pass failed, invalidating environment");
                compressor.env().invalidate(&err);
                break;
            }
            Err(err) if err.is_caller_bug() => {
                error!(error = %err, "latch misuse during compressor pass");
                break;
            }
            Err(err) => {
                warn!(error = %err, "compressor pass failed, will retry");
            }
        }
    }
    info!("compressor daemon stopped");
}
