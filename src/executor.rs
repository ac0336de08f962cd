//! # Executor
//!
//! A single script instance: the bound program, its value stack, cycle
//! accounting, relations to a parent or child script, and the holder of its
//! outstanding async requests.
//!
//! Scheduling primitives go through the executor's [`ThreadInterface`],
//! chosen from the program's runtime tag when the program is bound. An
//! executor never touches scheduler structures itself; every state change
//! that moves it between the ready queue and a hold list goes through the
//! [`Scheduler`](crate::scheduler::Scheduler).

use crate::bridge::{val_to_json, Engine};
use crate::config::SchedulerConfig;
use crate::errors::{Result, SchedulerError, SignalError};
use crate::program::{FunctionRef, Program};
use crate::requests::AsyncRequestHolder;
use crate::thread::{BridgeThread, ThreadInterface, VmThread};
use crate::types::{Clock, ExecutorState, Pid, ProgramType, RequestId, WaitType, WAIT_FOREVER};
use crate::values::Val;
use crate::vm::{Step, Vm, VmFactory};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, warn};

/* ===================== Options ===================== */

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub priority: u8,
    pub event_queue_size: usize,
    pub runaway_threshold: u64,
    pub run_to_completion: bool,
    pub critical: bool,
}

impl ExecutorOptions {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            priority: config.default_priority,
            event_queue_size: config.default_event_queue_size,
            runaway_threshold: config.runaway_script_threshold,
            run_to_completion: false,
            critical: false,
        }
    }
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

/* ===================== Runtime binding ===================== */

enum Runtime {
    Unbound,
    Bytecode(Box<dyn Vm>),
    Engine { function: FunctionRef, finished: bool },
}

/// Outcome of running one scheduling slice
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SliceOutcome {
    /// Slice used up, still ready
    Preempted,
    Blocked,
    Halted,
    Finished,
    Faulted(String),
    Runaway,
    /// Engine program; the bridge takes over
    External,
}

/// What happened to a signalled event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDelivery {
    /// Queued for a later `wait_for_event`
    Queued,
    /// Handed straight to a waiting script, which is now revived
    Woke,
}

/* ===================== Executor ===================== */

pub struct Executor {
    pid: Pid,
    program: Option<Arc<Program>>,
    runtime: Runtime,
    thread: Box<dyn ThreadInterface>,
    value_stack: Vec<Val>,

    instr_cycles: u64,
    sleep_cycles: u64,
    start_time: DateTime<Utc>,
    warn_runaway_on_cycle: u64,
    runaway_cycles: u64,

    options: ExecutorOptions,
    halted: bool,
    result: Option<Val>,

    parent: Option<Pid>,
    child: Option<Pid>,
    requests: AsyncRequestHolder,
}

impl Executor {
    /// Create an executor with no program bound. Until a program is bound
    /// the thread interface is a plain VM thread.
    pub fn new(pid: Pid, options: ExecutorOptions) -> Self {
        let mut thread = VmThread::new(options.priority, options.event_queue_size);
        thread.set_critical(options.critical);
        Self {
            pid,
            program: None,
            runtime: Runtime::Unbound,
            thread: Box::new(thread),
            value_stack: Vec::new(),
            instr_cycles: 0,
            sleep_cycles: 0,
            start_time: Utc::now(),
            warn_runaway_on_cycle: options.runaway_threshold,
            runaway_cycles: 0,
            options,
            halted: false,
            result: None,
            parent: None,
            child: None,
            requests: AsyncRequestHolder::new(),
        }
    }

    /// Bind a program and select the thread interface for its runtime
    pub fn set_program(&mut self, program: Arc<Program>, vm_factory: &VmFactory) -> Result<()> {
        if self.program.is_some() {
            return Err(SchedulerError::AlreadyBound(self.pid));
        }

        let unsupported = || SchedulerError::UnsupportedProgram {
            scriptname: program.scriptname().to_string(),
            program_type: program.program_type(),
        };

        let (runtime, mut thread): (Runtime, Box<dyn ThreadInterface>) =
            match program.program_type() {
                ProgramType::Bytecode => {
                    let mut vm = vm_factory();
                    vm.load(&program).map_err(|message| SchedulerError::VmLoad {
                        scriptname: program.scriptname().to_string(),
                        message,
                    })?;
                    let thread =
                        VmThread::new(self.options.priority, self.options.event_queue_size);
                    (Runtime::Bytecode(vm), Box::new(thread))
                }
                ProgramType::Engine => {
                    // The bridge drives everything later
                    let function = program.function().cloned().ok_or_else(unsupported)?;
                    (
                        Runtime::Engine {
                            function,
                            finished: false,
                        },
                        Box::new(BridgeThread::new(self.options.priority)),
                    )
                }
                ProgramType::Unknown => return Err(unsupported()),
            };

        thread.set_critical(self.options.critical);
        self.runtime = runtime;
        self.thread = thread;
        self.program = Some(program);
        Ok(())
    }

    pub fn runnable(&self) -> bool {
        match &self.runtime {
            Runtime::Unbound => false,
            Runtime::Bytecode(vm) => vm.runnable(),
            Runtime::Engine { finished, .. } => !finished,
        }
    }

    /// Block the script. Refused for run-to-completion scripts.
    pub fn suspend(&mut self, sleep_until: Clock) -> bool {
        if self.options.run_to_completion {
            return false;
        }
        self.thread.suspend(sleep_until);
        true
    }

    pub fn revive(&mut self) -> bool {
        self.thread.revive();
        true
    }

    /// Deliver an event: straight onto the stack if the script is blocked in
    /// `wait_for_event`, otherwise into the bounded queue
    pub fn signal_event(&mut self, event: Val) -> std::result::Result<EventDelivery, SignalError> {
        if self.thread.blocked() && self.thread.wait_type() == WaitType::Event {
            self.set_result_slot(event);
            self.revive();
            return Ok(EventDelivery::Woke);
        }
        self.thread.signal_event(event)?;
        Ok(EventDelivery::Queued)
    }

    /// Completion entry point for async requests. `None` means the request
    /// was aborted; the script then observes the sentinel value.
    pub fn handle_request(
        &mut self,
        request_id: RequestId,
        response: Option<Val>,
        engine: Option<&dyn Engine>,
    ) {
        let response = response.unwrap_or_else(Val::sentinel);
        match &self.runtime {
            Runtime::Engine { .. } => match engine {
                Some(engine) => {
                    let json = val_to_json(&response, request_id);
                    if !engine.resolve_delayed_object(request_id, json) {
                        warn!(pid = %self.pid, %request_id, "engine had no delayed object for request");
                    }
                }
                None => error!(pid = %self.pid, %request_id, "engine script answered without an engine"),
            },
            _ => self.set_result_slot(response),
        }
        self.revive();
    }

    /// Replace the pending module-function result on top of the stack
    pub fn set_result_slot(&mut self, value: Val) {
        set_slot(&mut self.value_stack, value);
    }

    /// Push the slot a request's answer lands in. Engine scripts get their
    /// answers through the engine and have no slot.
    pub(crate) fn open_result_slot(&mut self) {
        if !self.is_engine() {
            self.value_stack.push(Val::sentinel());
        }
    }

    /// Undo [`open_result_slot`](Self::open_result_slot)
    pub(crate) fn close_result_slot(&mut self) {
        if !self.is_engine() {
            self.value_stack.pop();
        }
    }

    pub fn state(&self) -> ExecutorState {
        if self.halted {
            ExecutorState::Debugging
        } else if self.thread.blocked() {
            ExecutorState::Sleeping
        } else {
            ExecutorState::Running
        }
    }

    /// Run up to `slice` instructions
    pub(crate) fn run_slice(
        &mut self,
        now: Clock,
        slice: u32,
        max_runaway_cycles: Option<u64>,
    ) -> SliceOutcome {
        let vm = match &mut self.runtime {
            Runtime::Bytecode(vm) => vm,
            Runtime::Engine { .. } => return SliceOutcome::External,
            Runtime::Unbound => return SliceOutcome::Finished,
        };
        let threshold = self.options.runaway_threshold.max(1);
        let mut inscount: u32 = 0;

        while vm.runnable() {
            self.instr_cycles += 1;
            inscount += 1;

            match vm.exec_instr(&mut self.value_stack) {
                Step::Continue => {}
                Step::Sleep(ms) => {
                    if !self.options.run_to_completion {
                        self.thread.suspend(wake_clock(now, ms));
                    }
                }
                Step::WaitForEvent(timeout) => {
                    if let Some(event) = self.thread.next_event() {
                        set_slot(&mut self.value_stack, event);
                    } else if timeout != Some(0) && !self.options.run_to_completion {
                        let until = timeout.map_or(WAIT_FOREVER, |t| wake_clock(now, t));
                        self.thread.suspend(until);
                        self.thread.set_wait_type(WaitType::Event);
                    }
                }
                // Nothing can revive a run-to-completion script
                Step::Halt if self.options.run_to_completion => {}
                Step::Halt => {
                    self.halted = true;
                    return SliceOutcome::Halted;
                }
                Step::Exit(value) => {
                    self.result = Some(value);
                    return SliceOutcome::Finished;
                }
                Step::Fault(message) => return SliceOutcome::Faulted(message),
            }

            if self.thread.blocked() {
                self.warn_runaway_on_cycle = self.instr_cycles + threshold;
                self.runaway_cycles = 0;
                return SliceOutcome::Blocked;
            }

            if self.instr_cycles >= self.warn_runaway_on_cycle {
                self.runaway_cycles += threshold;
                self.warn_runaway_on_cycle += threshold;
                if self.thread.warn_on_runaway() {
                    warn!(
                        pid = %self.pid,
                        script = %script_name(&self.program),
                        "Runaway script: {} cycles",
                        self.runaway_cycles
                    );
                }
                if let Some(max) = max_runaway_cycles {
                    if !self.thread.critical() && self.runaway_cycles >= max {
                        return SliceOutcome::Runaway;
                    }
                }
            }

            // Critical scripts keep the scheduler until they block or finish
            if !self.thread.critical() && inscount >= slice {
                break;
            }
        }

        if vm.runnable() {
            SliceOutcome::Preempted
        } else {
            SliceOutcome::Finished
        }
    }

    /// Record the engine's final result and end the outstanding call
    pub(crate) fn finish_engine(&mut self, value: Val) {
        if let Runtime::Engine { finished, .. } = &mut self.runtime {
            *finished = true;
        }
        self.thread.set_outstanding_call(None);
        self.result = Some(value);
    }

    pub(crate) fn set_result(&mut self, value: Val) {
        self.result = Some(value);
    }

    /* ===================== Accessors ===================== */

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn scriptname(&self) -> &str {
        script_name(&self.program)
    }

    pub fn program(&self) -> Option<&Arc<Program>> {
        self.program.as_ref()
    }

    pub fn program_type(&self) -> Option<ProgramType> {
        self.program.as_ref().map(|p| p.program_type())
    }

    pub fn is_engine(&self) -> bool {
        matches!(self.runtime, Runtime::Engine { .. })
    }

    pub fn function(&self) -> Option<&FunctionRef> {
        match &self.runtime {
            Runtime::Engine { function, .. } => Some(function),
            _ => None,
        }
    }

    pub fn thread(&self) -> &dyn ThreadInterface {
        self.thread.as_ref()
    }

    pub fn thread_mut(&mut self) -> &mut dyn ThreadInterface {
        self.thread.as_mut()
    }

    pub fn value_stack(&self) -> &[Val] {
        &self.value_stack
    }

    pub fn value_stack_mut(&mut self) -> &mut Vec<Val> {
        &mut self.value_stack
    }

    pub fn push(&mut self, value: Val) {
        self.value_stack.push(value);
    }

    pub fn result(&self) -> Option<&Val> {
        self.result.as_ref()
    }

    pub fn instr_cycles(&self) -> u64 {
        self.instr_cycles
    }

    pub fn sleep_cycles(&self) -> u64 {
        self.sleep_cycles
    }

    pub(crate) fn count_sleep_cycle(&mut self) {
        self.sleep_cycles += 1;
    }

    pub fn runaway_cycles(&self) -> u64 {
        self.runaway_cycles
    }

    pub fn elapsed_secs(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds()
    }

    pub fn running_to_completion(&self) -> bool {
        self.options.run_to_completion
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    pub(crate) fn set_halted(&mut self, halted: bool) {
        self.halted = halted;
    }

    pub fn blocked(&self) -> bool {
        self.thread.blocked()
    }

    pub fn critical(&self) -> bool {
        self.thread.critical()
    }

    pub fn set_critical(&mut self, critical: bool) {
        self.options.critical = critical;
        self.thread.set_critical(critical);
    }

    pub fn priority(&self) -> u8 {
        self.thread.priority()
    }

    pub fn set_priority(&mut self, priority: u8) {
        self.thread.set_priority(priority);
    }

    pub fn set_warn_on_runaway(&mut self, warn: bool) {
        self.thread.set_warn_on_runaway(warn);
    }

    pub fn set_event_queue_size(&mut self, size: usize) -> usize {
        self.options.event_queue_size = size;
        self.thread.set_event_queue_size(size)
    }

    pub fn events_waiting(&self) -> usize {
        self.thread.events_waiting()
    }

    pub fn clear_event_queue(&mut self) -> usize {
        self.thread.clear_event_queue()
    }

    pub fn parent(&self) -> Option<Pid> {
        self.parent
    }

    pub fn child(&self) -> Option<Pid> {
        self.child
    }

    pub(crate) fn set_parent(&mut self, parent: Option<Pid>) {
        self.parent = parent;
    }

    pub(crate) fn set_child(&mut self, child: Option<Pid>) {
        self.child = child;
    }

    pub fn requests(&self) -> &AsyncRequestHolder {
        &self.requests
    }

    pub(crate) fn requests_mut(&mut self) -> &mut AsyncRequestHolder {
        &mut self.requests
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        if !self.requests.is_empty() {
            error!(
                pid = %self.pid,
                script = %self.scriptname(),
                outstanding = self.requests.len(),
                "executor dropped with outstanding requests"
            );
        }
    }
}

fn set_slot(stack: &mut Vec<Val>, value: Val) {
    match stack.last_mut() {
        Some(top) => *top = value,
        None => stack.push(value),
    }
}

fn script_name(program: &Option<Arc<Program>>) -> &str {
    program.as_deref().map_or("<unbound>", |p| p.scriptname())
}

/// Absolute wake clock for a sleep of `ms`. Never `WAIT_FOREVER`.
fn wake_clock(now: Clock, ms: Clock) -> Clock {
    now.saturating_add(ms).max(1)
}
