//! # Bytecode VM seam
//!
//! The scheduler only needs "run one cycle of program P" and "does P have
//! anything left to run" from the synchronous runtime. `Vm` is that seam.
//!
//! `StepVm` is a small instruction-list implementation used by the CLI and
//! the tests. Module functions that can block (sleep, wait_for_event) push a
//! result slot onto the value stack before yielding, so whatever eventually
//! wakes the script replaces that slot with the observed value.

pub mod step_vm;


use crate::program::Program;
use crate::types::Clock;
use crate::values::Val;

pub use step_vm::{Instr, StepVm};

/// Result of executing one instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Continue to next instruction
    Continue,
    /// Block for this many clocks
    Sleep(Clock),
    /// Take the next queued event; block up to the timeout when none is queued.
    /// `None` waits forever, `Some(0)` never blocks.
    WaitForEvent(Option<Clock>),
    /// Stop at a breakpoint and park for the debugger
    Halt,
    /// Program finished with a return value
    Exit(Val),
    /// Program failed
    Fault(String),
}

pub trait Vm: Send {
    /// Validate and bind a program
    fn load(&mut self, program: &Program) -> Result<(), String>;

    /// Whether any instructions remain
    fn runnable(&self) -> bool;

    /// Execute one instruction against the executor's value stack
    fn exec_instr(&mut self, stack: &mut Vec<Val>) -> Step;
}

/// Creates a fresh VM per launched bytecode executor
pub type VmFactory = Box<dyn Fn() -> Box<dyn Vm> + Send + Sync>;

pub fn step_vm_factory() -> VmFactory {
    Box::new(|| Box::new(StepVm::default()))
}
