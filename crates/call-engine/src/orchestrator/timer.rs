//! Ring timer
//!
//! One cancellable scheduled task per session. Cancellation must be
//! idempotent: aborting a finished or already-aborted task is a no-op, so
//! a timer that lost the race to an accept can never fire against
//! torn-down state — the fire path re-checks session status under the
//! session lock anyway.

use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::orchestrator::CallOrchestrator;
use crate::types::SessionId;

/// Handle to the pending ring deadline of one session
pub struct RingTimer {
    handle: JoinHandle<()>,
}

impl RingTimer {
    /// Schedule the ring deadline for a session
    pub fn start(orchestrator: Weak<CallOrchestrator>, session_id: SessionId, after: Duration) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            trace!(session = %session_id, "ring timer fired");
            if let Some(orchestrator) = orchestrator.upgrade() {
                orchestrator.on_ring_timeout(&session_id).await;
            }
        });
        Self { handle }
    }

    /// Cancel the pending deadline; safe to call any number of times
    ///
    /// Dropping the timer without cancelling only detaches the task. The
    /// fire path relies on that: it takes the timer out of the session
    /// while running inside the timer's own task, and aborting itself
    /// there would cut the timeout handling short.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}
