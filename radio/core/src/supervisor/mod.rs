//! Playback Supervisor
//!
//! Owns the single playback slot and the external player process that
//! occupies it.
//!
//! # Generations
//!
//! Every successful `play` stamps the slot with a new generation. The watcher
//! task spawned for that process remembers its generation and, when the
//! process exits, clears the slot only if the slot still carries that same
//! generation:
//!
//! ```text
//! play(A)  ──► slot{gen=1, A}      watcher(gen=1) waits on A
//! play(B)  ──► kill A, slot{gen=2, B}  watcher(gen=2) waits on B
//! A exits  ──► watcher(gen=1): slot.gen == 2, leave B alone
//! ```
//!
//! All slot access goes through one `parking_lot::Mutex` that is never held
//! across an `.await`.

mod backend;

pub use backend::{bootstrap_dir, Backend, BackendKind, BackendLocator};

use std::process::ExitStatus;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::process::Child;
use tokio::sync::oneshot;

/// Errors raised by the playback supervisor
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Neither mpv nor ffplay was found on the search path or in any search
    /// directory
    #[error("mpv or ffplay not found")]
    BackendUnavailable,

    /// `play` was called without a URL
    #[error("stream url is required")]
    EmptyUrl,

    /// The backend process could not be started
    #[error("failed to start {backend}: {source}")]
    Spawn {
        /// Backend that failed to start
        backend: BackendKind,
        /// Underlying spawn error
        source: std::io::Error,
    },
}

/// Handle to the process currently occupying the slot
///
/// The process is signalled directly when the slot is stopped; sending on
/// (or dropping) the kill sender then tells the watcher to reap the child.
struct ProcessHandle {
    pid: Option<u32>,
    kill_tx: oneshot::Sender<()>,
}

/// The single mutable playback resource
#[derive(Default)]
struct PlaybackSlot {
    process: Option<ProcessHandle>,
    last_url: Option<String>,
    generation: u64,
}

impl PlaybackSlot {
    /// Kill and forget the current process, if any
    ///
    /// The kill signal is sent before this returns, so a following spawn
    /// never overlaps the old player.
    fn stop(&mut self) -> bool {
        match self.process.take() {
            Some(handle) => {
                tracing::info!(pid = ?handle.pid, generation = self.generation, "Stopping playback");
                if let Some(pid) = handle.pid {
                    force_kill(pid);
                }
                // The watcher may already be gone if the process just exited
                let _ = handle.kill_tx.send(());
                true
            }
            None => false,
        }
    }

    /// Clear the slot on behalf of the watcher for `generation`
    ///
    /// Returns `false` when a later `play` has already replaced the process.
    fn clear_if_current(&mut self, generation: u64) -> bool {
        if self.generation == generation && self.process.is_some() {
            self.process = None;
            true
        } else {
            false
        }
    }
}

/// Point-in-time view of the playback slot
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaybackStatus {
    /// Whether a process currently occupies the slot
    pub playing: bool,
    /// URL passed to the most recent `play`
    pub last_url: Option<String>,
    /// Generation of the most recent successful `play`
    pub generation: u64,
    /// Backend in use
    pub backend: BackendKind,
    /// OS process id of the current player
    pub pid: Option<u32>,
}

/// Owns at most one live external playback process
///
/// Share one instance behind an `Arc` between the control dispatcher and any
/// in-process caller. `play` and `stop` must be called from within a tokio
/// runtime.
pub struct PlaybackSupervisor {
    backend: Backend,
    slot: Arc<Mutex<PlaybackSlot>>,
}

impl PlaybackSupervisor {
    /// Probe for a backend and build a supervisor around it
    pub fn new(locator: &BackendLocator) -> Result<Self, SupervisorError> {
        let backend = locator.locate()?;
        Ok(Self::with_backend(backend))
    }

    /// Build a supervisor around an already-located backend
    pub fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            slot: Arc::new(Mutex::new(PlaybackSlot::default())),
        }
    }

    /// The backend this supervisor spawns
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Start playing `url`, replacing whatever is playing
    ///
    /// Returns the generation assigned to the new process. On spawn failure
    /// the slot is left empty.
    pub fn play(&self, url: &str) -> Result<u64, SupervisorError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SupervisorError::EmptyUrl);
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| SupervisorError::Spawn {
            backend: self.backend.kind(),
            source: std::io::Error::other(e),
        })?;

        let mut slot = self.slot.lock();
        slot.stop();
        slot.last_url = Some(url.to_string());

        let child = self
            .backend
            .command(url)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                backend: self.backend.kind(),
                source,
            })?;

        slot.generation += 1;
        let generation = slot.generation;
        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel();
        slot.process = Some(ProcessHandle { pid, kill_tx });

        tracing::info!(
            backend = %self.backend.kind(),
            pid = ?pid,
            generation,
            url,
            "Playback started"
        );

        runtime.spawn(watch_process(
            child,
            generation,
            kill_rx,
            Arc::clone(&self.slot),
        ));

        Ok(generation)
    }

    /// Stop playback
    ///
    /// Idempotent; returns whether a process was stopped.
    pub fn stop(&self) -> bool {
        self.slot.lock().stop()
    }

    /// Whether a process currently occupies the slot
    pub fn is_playing(&self) -> bool {
        self.slot.lock().process.is_some()
    }

    /// URL passed to the most recent `play`
    pub fn last_url(&self) -> Option<String> {
        self.slot.lock().last_url.clone()
    }

    /// Process id of the current player, if any
    pub fn current_pid(&self) -> Option<u32> {
        self.slot.lock().process.as_ref().and_then(|p| p.pid)
    }

    /// Snapshot of the slot
    pub fn status(&self) -> PlaybackStatus {
        let slot = self.slot.lock();
        PlaybackStatus {
            playing: slot.process.is_some(),
            last_url: slot.last_url.clone(),
            generation: slot.generation,
            backend: self.backend.kind(),
            pid: slot.process.as_ref().and_then(|p| p.pid),
        }
    }
}

impl Drop for PlaybackSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Send SIGKILL to `pid`
///
/// Only called for a pid still held by the slot. Its watcher clears the slot
/// right after reaping, so the pid has not been recycled yet.
#[cfg(unix)]
fn force_kill(pid: u32) {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill has no memory-safety preconditions
    if unsafe { libc::kill(raw, libc::SIGKILL) } != 0 {
        let err = std::io::Error::last_os_error();
        // ESRCH: the process already exited and awaits reaping
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::warn!(pid, error = %err, "Failed to signal playback process");
        }
    }
}

/// Without signals the watcher performs the kill
#[cfg(not(unix))]
fn force_kill(_pid: u32) {}

enum WatchOutcome {
    Exited(std::io::Result<ExitStatus>),
    KillRequested,
}

/// Wait for the child to exit (or be stopped), then clear the slot if this
/// watcher's generation is still current
async fn watch_process(
    mut child: Child,
    generation: u64,
    kill_rx: oneshot::Receiver<()>,
    slot: Arc<Mutex<PlaybackSlot>>,
) {
    let outcome = tokio::select! {
        status = child.wait() => WatchOutcome::Exited(status),
        _ = kill_rx => WatchOutcome::KillRequested,
    };

    match outcome {
        WatchOutcome::Exited(Ok(status)) => {
            tracing::info!(generation, %status, "Playback process exited");
        }
        WatchOutcome::Exited(Err(e)) => {
            tracing::warn!(generation, error = %e, "Failed waiting on playback process");
        }
        WatchOutcome::KillRequested => {
            if let Err(e) = child.kill().await {
                tracing::warn!(generation, error = %e, "Failed to kill playback process");
            } else {
                tracing::debug!(generation, "Playback process killed");
            }
        }
    }

    let cleared = slot.lock().clear_if_current(generation);
    if cleared {
        tracing::info!(generation, "Playback slot cleared");
    } else {
        tracing::debug!(generation, "Stale exit ignored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ProcessHandle, oneshot::Receiver<()>) {
        let (kill_tx, kill_rx) = oneshot::channel();
        (
            ProcessHandle {
                pid: None,
                kill_tx,
            },
            kill_rx,
        )
    }

    #[test]
    fn test_stale_watcher_does_not_clear() {
        let (h, _rx) = handle();
        let mut slot = PlaybackSlot {
            process: Some(h),
            last_url: Some("http://b".to_string()),
            generation: 2,
        };

        assert!(!slot.clear_if_current(1));
        assert!(slot.process.is_some());

        assert!(slot.clear_if_current(2));
        assert!(slot.process.is_none());
        // Nothing left to clear
        assert!(!slot.clear_if_current(2));
    }

    #[test]
    fn test_slot_stop_signals_watcher() {
        let (h, mut rx) = handle();
        let mut slot = PlaybackSlot {
            process: Some(h),
            last_url: None,
            generation: 1,
        };

        assert!(slot.stop());
        assert!(rx.try_recv().is_ok());
        assert!(!slot.stop());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            SupervisorError::BackendUnavailable.to_string(),
            "mpv or ffplay not found"
        );
        assert_eq!(SupervisorError::EmptyUrl.to_string(), "stream url is required");
    }

    #[test]
    fn test_empty_url_rejected() {
        let supervisor =
            PlaybackSupervisor::with_backend(Backend::new(BackendKind::Mpv, "/nonexistent/mpv"));
        assert!(matches!(
            supervisor.play("   "),
            Err(SupervisorError::EmptyUrl)
        ));
        assert!(supervisor.last_url().is_none());
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_slot_empty() {
        let supervisor =
            PlaybackSupervisor::with_backend(Backend::new(BackendKind::Mpv, "/nonexistent/mpv"));

        let result = supervisor.play("http://radio/stream");
        assert!(matches!(result, Err(SupervisorError::Spawn { .. })));
        assert!(!supervisor.is_playing());
        assert_eq!(supervisor.status().generation, 0);

        // Still usable afterwards
        assert!(!supervisor.stop());
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let supervisor =
            PlaybackSupervisor::with_backend(Backend::new(BackendKind::Ffplay, "/nonexistent"));
        assert!(!supervisor.stop());
        assert!(!supervisor.stop());
        assert!(!supervisor.is_playing());
    }

    #[test]
    fn test_play_outside_runtime_is_an_error() {
        let supervisor =
            PlaybackSupervisor::with_backend(Backend::new(BackendKind::Mpv, "/nonexistent/mpv"));
        assert!(matches!(
            supervisor.play("http://radio/stream"),
            Err(SupervisorError::Spawn { .. })
        ));
    }
}
