//! Engine-managed executors
//!
//! An engine executor leaves the ready queue for the external hold list the
//! first time it is scheduled and stays there until its call settles. The
//! result is stored on the executor, and a waiting parent gets it, before
//! the executor is retired.

use super::{ExitReason, Scheduler, ScriptExit};
use crate::bridge::BridgeOutcome;
use crate::types::Pid;
use crate::values::Val;
use tracing::debug;

impl Scheduler {
    /// Hand an executor to the bridge and invoke its engine function
    pub(super) fn run_external(&mut self, pid: Pid) -> Option<ScriptExit> {
        self.park_external(pid);
        let request_id = self.next_request_id();
        let ex = self.executors.get_mut(&pid)?;

        match self.bridge.invoke(ex, request_id) {
            BridgeOutcome::Completed(value) | BridgeOutcome::Failed(value) => {
                self.complete_external(pid, value)
            }
            BridgeOutcome::Pending(_) => None,
        }
    }

    /// Apply every settled deferred call. Returns how many completed.
    pub fn pump_external(&mut self) -> usize {
        let settled = self.bridge.drain_settled();
        let count = settled.len();
        for completion in settled {
            debug!(
                pid = %completion.pid,
                request_id = %completion.request_id,
                "engine call settled"
            );
            self.complete_external(completion.pid, completion.value);
        }
        count
    }

    fn complete_external(&mut self, pid: Pid, value: Val) -> Option<ScriptExit> {
        let ex = self.executors.get_mut(&pid)?;
        let reason = if value.is_error() {
            ExitReason::Faulted
        } else {
            ExitReason::Finished
        };
        ex.finish_engine(value);
        self.free_external(pid, reason)
    }

    /// Release an executor from the external hold list and retire it
    fn free_external(&mut self, pid: Pid, reason: ExitReason) -> Option<ScriptExit> {
        self.external.remove(&pid);
        self.retire(pid, reason)
    }
}
