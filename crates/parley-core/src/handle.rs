//! Cloneable control handle for a running conversation
//!
//! Lets external code stop a turn or wait for the coordinator to go
//! idle without holding the coordinator itself. The stop intent is
//! latched: a stop requested while a run is still starting takes
//! effect the moment the run id is known.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct CoreHandle {
    cancel: Arc<Mutex<CancellationToken>>,
    stop_requested: Arc<AtomicBool>,
    idle_notify: Arc<tokio::sync::Notify>,
    is_running: Arc<AtomicBool>,
}

impl Default for CoreHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreHandle {
    pub fn new() -> Self {
        Self {
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            stop_requested: Arc::new(AtomicBool::new(false)),
            idle_notify: Arc::new(tokio::sync::Notify::new()),
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request a stop. Safe to call at any point in a turn, including
    /// before the run id is known.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.cancel.lock().cancel();
    }

    /// Whether a stop has been requested and not yet consumed
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Consume the latched stop intent
    pub fn take_stop_request(&self) -> bool {
        self.stop_requested.swap(false, Ordering::AcqRel)
    }

    /// The cancellation token for the current turn
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    /// Arm a fresh token for a new turn, clearing any stale stop
    pub fn reset_for_turn(&self) -> CancellationToken {
        self.stop_requested.store(false, Ordering::Release);
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        token
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.is_running.store(running, Ordering::Release);
        if !running {
            self.idle_notify.notify_waiters();
        }
    }

    /// Wait until the conversation goes idle
    pub async fn wait_for_idle(&self) {
        let notified = self.idle_notify.notified();
        if !self.is_running.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }

    /// Wait for idle with a deadline
    pub async fn wait_for_idle_timeout(&self, timeout: std::time::Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_for_idle())
            .await
            .is_ok()
    }
}
