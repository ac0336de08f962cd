//! Instruction-list VM
//!
//! Executes a flat list of serde-tagged instructions, one per `exec_instr`
//! call. All state is in the struct so a parked VM can be serialized.

use super::{Step, Vm};
use crate::program::{Code, Program};
use crate::types::Clock;
use crate::values::Val;
use serde::{Deserialize, Serialize};
use tracing::info;

/* ===================== Instructions ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Instr {
    Push { value: Val },
    Pop,
    Dup,
    /// Add an integer to the Long on top of the stack
    Incr { by: i64 },
    Jump { target: usize },
    /// Pop the top value and jump when it is falsy
    JumpIfFalse { target: usize },
    /// Push a result slot and block for `ms` clocks
    Sleep { ms: Clock },
    /// Push a result slot and wait for an event
    WaitForEvent {
        #[serde(default)]
        timeout: Option<Clock>,
    },
    /// Log the top of the stack
    Print,
    Breakpoint,
    Fail { message: String },
    /// Pop the top value (or uninit) and exit
    Return,
}

/* ===================== VM ===================== */

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepVm {
    instrs: Vec<Instr>,
    pc: usize,
    done: bool,
}

impl StepVm {
    pub fn pc(&self) -> usize {
        self.pc
    }

    fn jump(&mut self, target: usize) -> Step {
        if target > self.instrs.len() {
            self.done = true;
            return Step::Fault(format!("jump target {} out of range", target));
        }
        self.pc = target;
        Step::Continue
    }
}

impl Vm for StepVm {
    fn load(&mut self, program: &Program) -> Result<(), String> {
        let Code::Instructions { instrs } = program.code() else {
            return Err("program has no instruction listing".to_string());
        };
        for (idx, instr) in instrs.iter().enumerate() {
            if let Instr::Jump { target } | Instr::JumpIfFalse { target } = instr {
                if *target > instrs.len() {
                    return Err(format!("instruction {} jumps to {}", idx, target));
                }
            }
        }
        self.instrs = instrs.clone();
        self.pc = 0;
        self.done = false;
        Ok(())
    }

    fn runnable(&self) -> bool {
        !self.done && self.pc < self.instrs.len()
    }

    fn exec_instr(&mut self, stack: &mut Vec<Val>) -> Step {
        let Some(instr) = self.instrs.get(self.pc).cloned() else {
            self.done = true;
            return Step::Exit(stack.pop().unwrap_or(Val::Uninit));
        };
        self.pc += 1;

        match instr {
            Instr::Push { value } => {
                stack.push(value);
                Step::Continue
            }
            Instr::Pop => {
                stack.pop();
                Step::Continue
            }
            Instr::Dup => {
                let top = stack.last().cloned().unwrap_or(Val::Uninit);
                stack.push(top);
                Step::Continue
            }
            Instr::Incr { by } => match stack.last_mut() {
                Some(Val::Long(n)) => match n.checked_add(by) {
                    Some(sum) => {
                        *n = sum;
                        Step::Continue
                    }
                    None => {
                        self.done = true;
                        Step::Fault(format!("integer overflow incrementing {} by {}", n, by))
                    }
                },
                other => {
                    self.done = true;
                    Step::Fault(format!("cannot increment {:?}", other))
                }
            },
            Instr::Jump { target } => self.jump(target),
            Instr::JumpIfFalse { target } => {
                let cond = stack.pop().unwrap_or(Val::Uninit);
                if cond.is_truthy() {
                    Step::Continue
                } else {
                    self.jump(target)
                }
            }
            Instr::Sleep { ms } => {
                stack.push(Val::sentinel());
                Step::Sleep(ms)
            }
            Instr::WaitForEvent { timeout } => {
                stack.push(Val::sentinel());
                Step::WaitForEvent(timeout)
            }
            Instr::Print => {
                let top = stack.last().cloned().unwrap_or(Val::Uninit);
                info!(value = %top, "print");
                Step::Continue
            }
            Instr::Breakpoint => Step::Halt,
            Instr::Fail { message } => {
                self.done = true;
                Step::Fault(message)
            }
            Instr::Return => {
                self.done = true;
                Step::Exit(stack.pop().unwrap_or(Val::Uninit))
            }
        }
    }
}
