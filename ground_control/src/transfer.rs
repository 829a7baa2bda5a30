//! Per-transfer completion tracking and staging files.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::link::{TransferHandle, TransferListener, TransferStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferState {
    Pending,
    InProgress,
    Completed,
    Aborted,
    Failed,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Aborted | TransferState::Failed
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferState::Pending => "pending",
            TransferState::InProgress => "in progress",
            TransferState::Completed => "completed",
            TransferState::Aborted => "aborted",
            TransferState::Failed => "failed",
        };
        f.write_str(s)
    }
}

pub type StateCallback = Box<dyn Fn(&str) + Send + Sync>;
pub type ProgressCallback = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Caller-side settings for an uplink or downlink. Unset fields fall back
/// to the session configuration.
#[derive(Default)]
pub struct TransferOptions {
    pub first_row: u32,
    /// Downlink only. Omitted means up to `max_rows - 1` with resize.
    pub last_row: Option<u32>,
    pub resize: bool,
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
    pub on_state_change: Option<StateCallback>,
    pub on_progress: Option<ProgressCallback>,
}

impl TransferOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn first_row(mut self, row: u32) -> Self {
        self.first_row = row;
        self
    }

    pub fn last_row(mut self, row: u32) -> Self {
        self.last_row = Some(row);
        self
    }

    pub fn resize(mut self, resize: bool) -> Self {
        self.resize = resize;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn on_state_change(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_state_change = Some(Box::new(f));
        self
    }

    pub fn on_progress(mut self, f: impl Fn(u64, u64) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for TransferOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferOptions")
            .field("first_row", &self.first_row)
            .field("last_row", &self.last_row)
            .field("resize", &self.resize)
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

// ============================ Completion =====================================

/// Listener handed to the engine. The first terminal notification fills the
/// single-slot channel; later ones find it full and are ignored.
struct CompletionListener {
    id: u32,
    done: Sender<Option<u32>>,
    state: Mutex<TransferState>,
    on_state_change: Option<StateCallback>,
    on_progress: Option<ProgressCallback>,
}

impl TransferListener for CompletionListener {
    fn on_state_changed(&self, status: TransferStatus, description: &str) {
        debug!(param_id = self.id, ?status, description, "transfer state changed");
        if let Some(f) = &self.on_state_change {
            f(description);
        }

        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return;
            }
            *state = match (status.is_terminal(), status.exception) {
                (false, _) => TransferState::InProgress,
                (true, None) => TransferState::Completed,
                (true, Some(_)) => TransferState::Failed,
            };
        }

        if status.is_terminal() {
            match self.done.try_send(status.exception) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(param_id = self.id, "duplicate transfer completion ignored");
                }
            }
        }
    }

    fn on_progress(&self, count: u64, total: u64) {
        if let Some(f) = &self.on_progress {
            f(count, total);
        }
    }
}

/// How a wait for the terminal notification ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed(u32),
    TimedOut,
}

/// One uplink or downlink, used once.
pub struct Transfer {
    listener: Arc<CompletionListener>,
    done: Receiver<Option<u32>>,
}

impl Transfer {
    pub fn new(
        param_id: u32,
        on_state_change: Option<StateCallback>,
        on_progress: Option<ProgressCallback>,
    ) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(1);
        Self {
            listener: Arc::new(CompletionListener {
                id: param_id,
                done: tx,
                state: Mutex::new(TransferState::Pending),
                on_state_change,
                on_progress,
            }),
            done: rx,
        }
    }

    pub fn listener(&self) -> Arc<dyn TransferListener> {
        self.listener.clone()
    }

    pub fn state(&self) -> TransferState {
        *self.listener.state.lock()
    }

    /// Block until the transfer ends or `timeout` passes. On timeout the
    /// engine is told to abort before this returns.
    pub fn wait(self, handle: &dyn TransferHandle, timeout: Duration) -> Outcome {
        match self.done.recv_timeout(timeout) {
            Ok(None) => Outcome::Completed,
            Ok(Some(exception)) => Outcome::Failed(exception),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                {
                    let mut state = self.listener.state.lock();
                    if !state.is_terminal() {
                        *state = TransferState::Aborted;
                    }
                }
                warn!(param_id = self.listener.id, ?timeout, "transfer timed out, aborting");
                handle.abort();
                Outcome::TimedOut
            }
        }
    }
}

// ============================ Staging ========================================

/// A staging file path that is removed when dropped, whether or not the
/// engine ever created it.
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
}

impl StagingFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.path)
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "staging file removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(?e, path = %self.path.display(), "failed to remove staging file"),
        }
    }
}
