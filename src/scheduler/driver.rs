//! Driver entry points called by the outer server loop:
//! [`run_ready`](Scheduler::run_ready), [`check_blocked`](Scheduler::check_blocked),
//! [`calc_script_clocksleft`](Scheduler::calc_script_clocksleft) and
//! [`deschedule_executor`](Scheduler::deschedule_executor).

use super::{slice_for, Scheduler};
use crate::errors::Result;
use crate::executor::{Executor, ExecutorOptions, SliceOutcome};
use crate::program::Program;
use crate::thread::ThreadInterface;
use crate::types::{Clock, HoldListType, Pid};
use crate::values::{Val, RUNAWAY, SCRIPT_FAULT};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Finished,
    Faulted,
    Runaway,
    Killed,
    Shutdown,
}

/// Record of a retired script
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptExit {
    pub pid: Pid,
    pub scriptname: String,
    pub reason: ExitReason,
    pub result: Val,
    pub instr_cycles: u64,
    pub sleep_cycles: u64,
}

impl Scheduler {
    /// One scheduling pass. Settled bridge calls are applied first, then each
    /// executor that was ready at the start of the pass runs one slice.
    /// Executors made ready during the pass run on the next one.
    pub fn run_ready(&mut self, now: Clock) {
        self.pump_external();

        let batch: Vec<Pid> = self.ready.drain(..).collect();
        for pid in batch {
            let Some(ex) = self.executors.get_mut(&pid) else {
                continue;
            };
            if ex.thread().in_hold_list() != HoldListType::None {
                continue;
            }
            let slice = slice_for(&self.config, ex.priority());
            let outcome = ex.run_slice(now, slice, self.config.max_runaway_cycles);
            self.settle(pid, outcome);
        }
    }

    /// Wake every executor whose clock has come due, then lower `clocksleft`
    /// to the time until the next wake if that is sooner. A script waiting
    /// on requests when its clock fires has those requests aborted.
    pub fn check_blocked(&mut self, now: Clock, clocksleft: &mut Clock) {
        while let Some((&handle, &pid)) = self.timeouts.first_key_value() {
            if handle.wake > now {
                *clocksleft = (*clocksleft).min(handle.wake - now);
                break;
            }
            self.timeouts.remove(&handle);
            self.wake(pid);
        }
    }

    /// Time until the scheduler next has work: `Some(0)` when something is
    /// ready, the distance to the earliest wake clock otherwise, `None` when
    /// nothing will wake without outside input
    pub fn calc_script_clocksleft(&self, now: Clock) -> Option<Clock> {
        if !self.ready.is_empty() {
            return Some(0);
        }
        self.timeouts
            .keys()
            .next()
            .map(|handle| handle.wake.saturating_sub(now))
    }

    /// Remove an executor from all scheduler tracking and hand it back.
    ///
    /// Its requests are aborted, queued events discarded, pending bridge
    /// calls forgotten and parent/child links cleared. A parent waiting on it
    /// receives its result (the sentinel if it never produced one) and is
    /// made ready.
    pub fn deschedule_executor(&mut self, pid: Pid) -> Option<Executor> {
        if !self.executors.contains_key(&pid) {
            return None;
        }
        self.detach(pid);
        let mut ex = self.executors.remove(&pid)?;

        for request_id in ex.requests_mut().drain() {
            if let Some(mut request) = self.requests.take(request_id) {
                request.mark_handled();
                ex.handle_request(request_id, None, self.bridge.engine());
            }
        }

        let dropped = ex.clear_event_queue();
        if dropped > 0 {
            debug!(%pid, dropped, "discarded undelivered events");
        }
        let forgotten = self.bridge.forget(pid);
        if forgotten > 0 {
            debug!(%pid, forgotten, "dropped pending engine calls");
        }

        if let Some(child) = ex.child() {
            if let Some(child_ex) = self.executors.get_mut(&child) {
                child_ex.set_parent(None);
            }
        }
        if let Some(parent) = ex.parent() {
            if let Some(parent_ex) = self.executors.get_mut(&parent) {
                if parent_ex.child() == Some(pid) {
                    parent_ex.set_child(None);
                    parent_ex.set_result_slot(ex.result().cloned().unwrap_or_else(Val::sentinel));
                    parent_ex.revive();
                    self.schedule(parent);
                }
            }
        }
        ex.set_parent(None);
        ex.set_child(None);

        debug_assert!(!self.requests.references(pid));
        Some(ex)
    }

    /// Run a non-suspendable script until it exits and return its result.
    ///
    /// Sleeps, waits and breakpoints inside the script return immediately and
    /// request creation is refused. An engine program whose call is deferred yields
    /// `Val::Uninit` and stays externally managed until it settles.
    pub fn run_to_completion(&mut self, now: Clock, program: Arc<Program>) -> Result<Val> {
        let mut options = ExecutorOptions::from_config(&self.config);
        options.run_to_completion = true;
        let pid = self.spawn(program, options)?;
        let max_runaway = self.config.max_runaway_cycles;

        loop {
            let ex = self.executor_mut(pid)?;
            let outcome = ex.run_slice(now, u32::MAX, max_runaway);
            if outcome == SliceOutcome::Preempted {
                continue;
            }
            let exit = self.settle(pid, outcome);
            return Ok(exit.map_or(Val::Uninit, |exit| exit.result));
        }
    }

    /// Apply the outcome of a slice
    pub(super) fn settle(&mut self, pid: Pid, outcome: SliceOutcome) -> Option<ScriptExit> {
        match outcome {
            SliceOutcome::Preempted => {
                self.ready.push_back(pid);
                None
            }
            SliceOutcome::Blocked => {
                self.hold(pid);
                None
            }
            SliceOutcome::Halted => {
                self.park_debugger(pid);
                None
            }
            SliceOutcome::Finished => self.retire(pid, ExitReason::Finished),
            SliceOutcome::Faulted(message) => {
                let ex = self.executors.get_mut(&pid)?;
                error!(
                    %pid,
                    script = %ex.scriptname(),
                    instr_cycles = ex.instr_cycles(),
                    "script faulted: {}",
                    message
                );
                ex.set_result(Val::error(SCRIPT_FAULT, message));
                self.retire(pid, ExitReason::Faulted)
            }
            SliceOutcome::Runaway => {
                let ex = self.executors.get_mut(&pid)?;
                error!(
                    %pid,
                    script = %ex.scriptname(),
                    instr_cycles = ex.instr_cycles(),
                    "terminating runaway script after {} cycles",
                    ex.runaway_cycles()
                );
                let message = format!("exceeded {} runaway cycles", ex.runaway_cycles());
                ex.set_result(Val::error(RUNAWAY, message));
                self.retire(pid, ExitReason::Runaway)
            }
            SliceOutcome::External => self.run_external(pid),
        }
    }

    /// A wake clock fired
    fn wake(&mut self, pid: Pid) {
        let Some(ex) = self.executors.get_mut(&pid) else {
            return;
        };
        let thread = ex.thread_mut();
        thread.set_hold_itr(None);
        thread.set_in_hold_list(HoldListType::None);
        ex.count_sleep_cycle();

        let pending = ex.requests().ids();
        if pending.is_empty() {
            ex.revive();
            self.schedule(pid);
        } else {
            debug!(%pid, count = pending.len(), "request timed out");
            for request_id in pending {
                self.abort_request(request_id);
            }
            self.schedule(pid);
        }
    }

    /// Deschedule a finished executor and record its exit
    pub(super) fn retire(&mut self, pid: Pid, reason: ExitReason) -> Option<ScriptExit> {
        let ex = self.deschedule_executor(pid)?;

        if self.config.profile_scripts && ex.instr_cycles() >= self.config.profile_min_cycles {
            info!(
                "Script {}: {} instr cycles, {} sleep cycles, {} seconds",
                ex.scriptname(),
                ex.instr_cycles(),
                ex.sleep_cycles(),
                ex.elapsed_secs()
            );
        }

        let exit = ScriptExit {
            pid,
            scriptname: ex.scriptname().to_string(),
            reason,
            result: ex.result().cloned().unwrap_or(Val::Uninit),
            instr_cycles: ex.instr_cycles(),
            sleep_cycles: ex.sleep_cycles(),
        };
        debug!(%pid, script = %exit.scriptname, ?reason, "script exited");
        self.exits.push(exit.clone());
        Some(exit)
    }
}
