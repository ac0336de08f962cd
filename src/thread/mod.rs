//! # Thread interface
//!
//! The scheduling contract every script runtime implements: suspend, revive,
//! event delivery, priority, critical flag, sleep clock and the hold-list
//! handles the scheduler keeps on each executor.
//!
//! Two implementations exist, chosen when a program is bound and fixed for
//! the executor's lifetime:
//! - [`VmThread`] for the bytecode VM, with a bounded FIFO event queue
//! - [`BridgeThread`] for the alternate engine, where blocking is the
//!   lifetime of an outstanding bridge call and there is no event queue

pub mod bridge_thread;
pub mod vm_thread;

pub use bridge_thread::BridgeThread;
pub use vm_thread::VmThread;

use crate::errors::SignalError;
use crate::types::{Clock, HoldListType, RequestId, TimeoutHandle, WaitType, WAIT_FOREVER};
use crate::values::Val;

pub const DEFAULT_PRIORITY: u8 = 1;

/// Scheduling flags common to both implementations
#[derive(Debug, Clone)]
pub struct ThreadState {
    pub blocked: bool,
    pub critical: bool,
    pub warn_on_runaway: bool,
    pub priority: u8,
    /// `WAIT_FOREVER` when blocked without a timer
    pub sleep_until_clock: Clock,
    pub wait_type: WaitType,
    pub hold_itr: Option<TimeoutHandle>,
    pub in_hold_list: HoldListType,
}

impl ThreadState {
    pub fn new(priority: u8) -> Self {
        Self {
            blocked: false,
            critical: false,
            warn_on_runaway: true,
            priority,
            sleep_until_clock: WAIT_FOREVER,
            wait_type: WaitType::Wait,
            hold_itr: None,
            in_hold_list: HoldListType::None,
        }
    }
}

impl Default for ThreadState {
    fn default() -> Self {
        Self::new(DEFAULT_PRIORITY)
    }
}

pub trait ThreadInterface: Send {
    fn state(&self) -> &ThreadState;
    fn state_mut(&mut self) -> &mut ThreadState;

    /// Queue an event for the script
    fn signal_event(&mut self, event: Val) -> Result<(), SignalError>;
    /// Pop the oldest queued event
    fn next_event(&mut self) -> Option<Val>;
    fn events_waiting(&self) -> usize;
    /// Discard queued events, returning how many were dropped
    fn clear_event_queue(&mut self) -> usize;
    /// Change the queue bound, returning the previous bound
    fn set_event_queue_size(&mut self, size: usize) -> usize;

    /// Block until `sleep_until`, or until revived when it is `WAIT_FOREVER`
    fn suspend(&mut self, sleep_until: Clock) {
        let state = self.state_mut();
        state.blocked = true;
        state.sleep_until_clock = sleep_until;
    }

    fn revive(&mut self) {
        let state = self.state_mut();
        state.blocked = false;
        state.sleep_until_clock = WAIT_FOREVER;
        state.wait_type = WaitType::Wait;
    }

    fn blocked(&self) -> bool {
        self.state().blocked
    }

    fn critical(&self) -> bool {
        self.state().critical
    }

    fn set_critical(&mut self, critical: bool) {
        self.state_mut().critical = critical;
    }

    fn warn_on_runaway(&self) -> bool {
        self.state().warn_on_runaway
    }

    fn set_warn_on_runaway(&mut self, warn: bool) {
        self.state_mut().warn_on_runaway = warn;
    }

    fn priority(&self) -> u8 {
        self.state().priority
    }

    fn set_priority(&mut self, priority: u8) {
        self.state_mut().priority = priority;
    }

    fn sleep_until_clock(&self) -> Clock {
        self.state().sleep_until_clock
    }

    fn set_sleep_until_clock(&mut self, clock: Clock) {
        self.state_mut().sleep_until_clock = clock;
    }

    fn wait_type(&self) -> WaitType {
        self.state().wait_type
    }

    fn set_wait_type(&mut self, wait_type: WaitType) {
        self.state_mut().wait_type = wait_type;
    }

    fn hold_itr(&self) -> Option<TimeoutHandle> {
        self.state().hold_itr
    }

    fn set_hold_itr(&mut self, handle: Option<TimeoutHandle>) {
        self.state_mut().hold_itr = handle;
    }

    fn in_hold_list(&self) -> HoldListType {
        self.state().in_hold_list
    }

    fn set_in_hold_list(&mut self, list: HoldListType) {
        self.state_mut().in_hold_list = list;
    }

    /// Bridge call currently in flight, if this runtime has one
    fn outstanding_call(&self) -> Option<RequestId> {
        None
    }

    fn set_outstanding_call(&mut self, _call: Option<RequestId>) {}
}
