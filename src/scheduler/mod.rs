//! # Scheduler
//!
//! Owns every executor and the structures that partition them:
//!
//! - the ready queue, in FIFO order
//! - the timeout hold list, keyed by wake clock then insertion order
//! - the no-timeout hold list (blocked until revived)
//! - the debugger hold list
//! - the external hold list (lifecycle owned by the bridge)
//!
//! Executors refer to each other by [`Pid`] only. The scheduler is the single
//! owner of executors and of async requests, and every mutation happens on
//! the thread that calls the driver functions.

mod driver;
mod external;
mod requests;

#[cfg(test)]
mod tests;

pub use driver::{ExitReason, ScriptExit};

use crate::bridge::{Bridge, Engine};
use crate::config::SchedulerConfig;
use crate::errors::{Result, SchedulerError, SignalError};
use crate::executor::{EventDelivery, Executor, ExecutorOptions};
use crate::program::Program;
use crate::requests::RequestTable;
use crate::thread::ThreadInterface;
use crate::types::{
    Clock, ExecutorState, HoldListType, Pid, ProgramType, RequestId, TimeoutHandle, WAIT_FOREVER,
};
use crate::values::{Val, ABORTED};
use crate::vm::{step_vm_factory, VmFactory};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/* ===================== Builder ===================== */

pub struct SchedulerBuilder {
    config: SchedulerConfig,
    vm_factory: Option<VmFactory>,
    engine: Option<Arc<dyn Engine>>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
            vm_factory: None,
            engine: None,
        }
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// VM used for bytecode programs. Defaults to [`StepVm`](crate::vm::StepVm).
    pub fn vm_factory(mut self, factory: VmFactory) -> Self {
        self.vm_factory = Some(factory);
        self
    }

    /// Engine for engine-tagged programs. Without one those programs are refused.
    pub fn engine(mut self, engine: Arc<dyn Engine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn build(self) -> Scheduler {
        Scheduler {
            config: self.config,
            vm_factory: self.vm_factory.unwrap_or_else(step_vm_factory),
            bridge: Bridge::new(self.engine),
            executors: BTreeMap::new(),
            ready: VecDeque::new(),
            timeouts: BTreeMap::new(),
            notimeout: BTreeSet::new(),
            debugger: BTreeSet::new(),
            external: BTreeSet::new(),
            requests: RequestTable::new(),
            exits: Vec::new(),
            next_pid: 1,
            next_request_id: 1,
            next_timeout_seq: 0,
        }
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/* ===================== Inspection ===================== */

/// Snapshot of one executor, for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutorInfo {
    pub pid: Pid,
    pub scriptname: String,
    pub program_type: Option<ProgramType>,
    pub state: ExecutorState,
    pub hold_list: HoldListType,
    pub sleep_until_clock: Clock,
    pub priority: u8,
    pub critical: bool,
    pub instr_cycles: u64,
    pub sleep_cycles: u64,
    pub events_waiting: usize,
    pub pending_requests: usize,
    pub parent: Option<Pid>,
    pub child: Option<Pid>,
}

impl ExecutorInfo {
    fn of(ex: &Executor) -> Self {
        let thread = ex.thread();
        Self {
            pid: ex.pid(),
            scriptname: ex.scriptname().to_string(),
            program_type: ex.program_type(),
            state: ex.state(),
            hold_list: thread.in_hold_list(),
            sleep_until_clock: thread.sleep_until_clock(),
            priority: thread.priority(),
            critical: thread.critical(),
            instr_cycles: ex.instr_cycles(),
            sleep_cycles: ex.sleep_cycles(),
            events_waiting: thread.events_waiting(),
            pending_requests: ex.requests().len(),
            parent: ex.parent(),
            child: ex.child(),
        }
    }
}

/* ===================== Scheduler ===================== */

pub struct Scheduler {
    config: SchedulerConfig,
    vm_factory: VmFactory,
    bridge: Bridge,

    executors: BTreeMap<Pid, Executor>,
    ready: VecDeque<Pid>,
    timeouts: BTreeMap<TimeoutHandle, Pid>,
    notimeout: BTreeSet<Pid>,
    debugger: BTreeSet<Pid>,
    external: BTreeSet<Pid>,

    requests: RequestTable,
    exits: Vec<ScriptExit>,

    next_pid: u32,
    next_request_id: u32,
    next_timeout_seq: u64,
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    pub fn new(config: SchedulerConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /* ===================== Launching ===================== */

    /// Launch an independent script at the back of the ready queue
    pub fn start_script(&mut self, program: Arc<Program>) -> Result<Pid> {
        let options = ExecutorOptions::from_config(&self.config);
        self.start_script_with(program, options)
    }

    pub fn start_script_with(
        &mut self,
        program: Arc<Program>,
        options: ExecutorOptions,
    ) -> Result<Pid> {
        let pid = self.spawn(program, options)?;
        self.ready.push_back(pid);
        Ok(pid)
    }

    /// Launch `program` as a child of `parent`. The parent blocks until the
    /// child finishes and then observes its return value.
    pub fn run_script(&mut self, parent: Pid, program: Arc<Program>) -> Result<Pid> {
        {
            let ex = self.executor(parent)?;
            if ex.program_type() == Some(ProgramType::Engine) {
                return Err(SchedulerError::NotRunnable {
                    pid: parent,
                    reason: "engine scripts cannot wait on a child script".to_string(),
                });
            }
            if let Some(child) = ex.child() {
                return Err(SchedulerError::Invariant {
                    pid: parent,
                    message: format!("already waiting on child {}", child),
                });
            }
            if ex.running_to_completion() {
                return Err(SchedulerError::NotRunnable {
                    pid: parent,
                    reason: "run-to-completion scripts cannot wait on a child script".to_string(),
                });
            }
        }

        let options = ExecutorOptions::from_config(&self.config);
        let child = self.spawn(program, options)?;

        if let Some(ex) = self.executors.get_mut(&child) {
            ex.set_parent(Some(parent));
        }
        if let Some(ex) = self.executors.get_mut(&parent) {
            ex.set_child(Some(child));
            // Slot for the child's return value
            ex.push(Val::sentinel());
            ex.suspend(WAIT_FOREVER);
        }
        self.hold(parent);
        self.ready.push_back(child);

        info!(%parent, %child, "started child script");
        Ok(child)
    }

    fn spawn(&mut self, program: Arc<Program>, options: ExecutorOptions) -> Result<Pid> {
        if !program.has_program() {
            return Err(SchedulerError::EmptyProgram(program.scriptname().to_string()));
        }
        if program.program_type() == ProgramType::Engine && !self.bridge.has_engine() {
            return Err(SchedulerError::EngineUnavailable(
                program.scriptname().to_string(),
            ));
        }

        let pid = Pid(self.next_pid);
        let mut ex = Executor::new(pid, options);
        ex.set_program(program, &self.vm_factory)?;
        self.next_pid += 1;

        info!(%pid, script = %ex.scriptname(), "script started");
        self.executors.insert(pid, ex);
        Ok(pid)
    }

    pub(crate) fn next_request_id(&mut self) -> RequestId {
        let id = RequestId(self.next_request_id);
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        id
    }

    /* ===================== Events and control ===================== */

    /// Deliver an event to a script. On rejection the event comes back in
    /// the error so the caller can drop or retry it.
    pub fn signal_event(
        &mut self,
        pid: Pid,
        event: Val,
    ) -> std::result::Result<EventDelivery, SignalError> {
        let Some(ex) = self.executors.get_mut(&pid) else {
            return Err(SignalError::UnknownPid { pid, event });
        };
        match ex.signal_event(event) {
            Ok(EventDelivery::Woke) => {
                self.schedule(pid);
                Ok(EventDelivery::Woke)
            }
            Ok(delivery) => Ok(delivery),
            Err(e) => {
                warn!(%pid, script = %ex.scriptname(), "event rejected: {}", e);
                Err(e)
            }
        }
    }

    /// Park a script on the debugger hold list. Refused while the engine
    /// manages the script.
    pub fn halt(&mut self, pid: Pid) -> Result<()> {
        if self.executor(pid)?.thread().in_hold_list() == HoldListType::External {
            return Err(SchedulerError::NotRunnable {
                pid,
                reason: "managed by the engine".to_string(),
            });
        }
        self.detach(pid);
        if let Some(ex) = self.executors.get_mut(&pid) {
            ex.set_halted(true);
        }
        self.park_debugger(pid);
        Ok(())
    }

    /// Release a script from the debugger hold list
    pub fn revive_debugged(&mut self, pid: Pid) -> Result<()> {
        if !self.debugger.contains(&pid) {
            return Err(SchedulerError::NotRunnable {
                pid,
                reason: "not halted".to_string(),
            });
        }
        self.detach(pid);
        let blocked = match self.executors.get_mut(&pid) {
            Some(ex) => {
                ex.set_halted(false);
                ex.blocked()
            }
            None => return Err(SchedulerError::UnknownPid(pid)),
        };
        if blocked {
            self.hold(pid);
        } else {
            self.schedule(pid);
        }
        debug!(%pid, "released from debugger");
        Ok(())
    }

    /// Terminate a script. Pending requests are aborted and a waiting parent
    /// observes an error value.
    pub fn kill(&mut self, pid: Pid) -> Result<ScriptExit> {
        let ex = self
            .executors
            .get_mut(&pid)
            .ok_or(SchedulerError::UnknownPid(pid))?;
        ex.set_result(Val::error(ABORTED, "script killed"));
        self.retire(pid, ExitReason::Killed)
            .ok_or(SchedulerError::UnknownPid(pid))
    }

    /// Tear down every executor. Engine-managed executors are reported to the
    /// engine first.
    pub fn shutdown(&mut self) {
        if self.executors.is_empty() {
            return;
        }
        if let Some(engine) = self.bridge.engine() {
            for pid in &self.external {
                if let Some(ex) = self.executors.get(pid) {
                    engine.shutdown(*pid, ex.scriptname());
                }
            }
        }

        let pids: Vec<Pid> = self.executors.keys().copied().collect();
        info!(count = pids.len(), "shutting down scheduler");
        for pid in pids {
            if let Some(ex) = self.executors.get_mut(&pid) {
                ex.set_result(Val::error(ABORTED, "scheduler shut down"));
            }
            self.retire(pid, ExitReason::Shutdown);
        }
    }

    /* ===================== Inspection ===================== */

    pub fn executor(&self, pid: Pid) -> Result<&Executor> {
        self.executors.get(&pid).ok_or(SchedulerError::UnknownPid(pid))
    }

    pub fn executor_mut(&mut self, pid: Pid) -> Result<&mut Executor> {
        self.executors
            .get_mut(&pid)
            .ok_or(SchedulerError::UnknownPid(pid))
    }

    pub fn executor_info(&self, pid: Pid) -> Option<ExecutorInfo> {
        self.executors.get(&pid).map(ExecutorInfo::of)
    }

    pub fn list_executors(&self) -> Vec<ExecutorInfo> {
        self.executors.values().map(ExecutorInfo::of).collect()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.executors.contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn is_ready(&self, pid: Pid) -> bool {
        self.ready.contains(&pid)
    }

    pub fn blocked_count(&self) -> usize {
        self.timeouts.len() + self.notimeout.len()
    }

    pub fn external_count(&self) -> usize {
        self.external.len()
    }

    pub fn requests(&self) -> &RequestTable {
        &self.requests
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Exit records of retired scripts, oldest first
    pub fn exits(&self) -> &[ScriptExit] {
        &self.exits
    }

    pub fn take_exits(&mut self) -> Vec<ScriptExit> {
        std::mem::take(&mut self.exits)
    }

    /* ===================== Placement ===================== */

    /// Remove `pid` from whatever structure tracks it
    fn detach(&mut self, pid: Pid) {
        let Some(ex) = self.executors.get_mut(&pid) else {
            return;
        };
        let thread = ex.thread_mut();
        match thread.in_hold_list() {
            HoldListType::Timeout => {
                if let Some(handle) = thread.hold_itr() {
                    self.timeouts.remove(&handle);
                }
            }
            HoldListType::NoTimeout => {
                self.notimeout.remove(&pid);
            }
            HoldListType::Debugger => {
                self.debugger.remove(&pid);
            }
            HoldListType::External => {
                self.external.remove(&pid);
            }
            HoldListType::None => {}
        }
        thread.set_hold_itr(None);
        thread.set_in_hold_list(HoldListType::None);
        self.ready.retain(|p| *p != pid);
    }

    /// Place a revived script on the ready queue. Engine-managed and halted
    /// scripts stay where they are.
    fn schedule(&mut self, pid: Pid) {
        let Some(ex) = self.executors.get(&pid) else {
            return;
        };
        match ex.thread().in_hold_list() {
            HoldListType::External | HoldListType::Debugger => return,
            _ => {}
        }
        self.detach(pid);
        self.ready.push_back(pid);
    }

    /// Place a suspended script on the hold list matching its wake clock
    fn hold(&mut self, pid: Pid) {
        let Some(ex) = self.executors.get(&pid) else {
            return;
        };
        match ex.thread().in_hold_list() {
            HoldListType::External | HoldListType::Debugger => return,
            _ => {}
        }
        let wake = ex.thread().sleep_until_clock();
        self.detach(pid);

        let seq = self.next_timeout_seq;
        let Some(ex) = self.executors.get_mut(&pid) else {
            return;
        };
        let thread = ex.thread_mut();
        if wake == WAIT_FOREVER {
            thread.set_in_hold_list(HoldListType::NoTimeout);
            self.notimeout.insert(pid);
        } else {
            let handle = TimeoutHandle { wake, seq };
            thread.set_hold_itr(Some(handle));
            thread.set_in_hold_list(HoldListType::Timeout);
            self.timeouts.insert(handle, pid);
            self.next_timeout_seq += 1;
        }
    }

    fn park_debugger(&mut self, pid: Pid) {
        if let Some(ex) = self.executors.get_mut(&pid) {
            ex.thread_mut().set_in_hold_list(HoldListType::Debugger);
            self.debugger.insert(pid);
            debug!(%pid, "halted for debugger");
        }
    }

    fn park_external(&mut self, pid: Pid) {
        self.detach(pid);
        if let Some(ex) = self.executors.get_mut(&pid) {
            ex.thread_mut().set_in_hold_list(HoldListType::External);
            self.external.insert(pid);
        }
    }
}

/// Instructions per slice for a given priority
fn slice_for(config: &SchedulerConfig, priority: u8) -> u32 {
    (u32::from(priority) / config.priority_divide.max(1)).max(1)
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
