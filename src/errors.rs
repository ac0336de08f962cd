//! Error types for the scheduler core

use crate::types::{Pid, ProgramType};
use crate::values::Val;
use thiserror::Error;

pub type Result<T, E = SchedulerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no executor with pid {0}")]
    UnknownPid(Pid),

    #[error("program {scriptname} has unsupported runtime {program_type:?}")]
    UnsupportedProgram {
        scriptname: String,
        program_type: ProgramType,
    },

    #[error("program {0} has no code to run")]
    EmptyProgram(String),

    #[error("executor {0} already has a program bound")]
    AlreadyBound(Pid),

    #[error("no alternate engine registered for {0}")]
    EngineUnavailable(String),

    #[error("vm rejected program {scriptname}: {message}")]
    VmLoad { scriptname: String, message: String },

    #[error("executor {pid} cannot run to completion: {reason}")]
    NotRunnable { pid: Pid, reason: String },

    #[error("invariant violated for executor {pid}: {message}")]
    Invariant { pid: Pid, message: String },
}

/// Rejected event delivery. The event is handed back so the caller can drop
/// it or retry later.
#[derive(Debug, Error, PartialEq)]
pub enum SignalError {
    #[error("event queue full ({capacity} events)")]
    QueueFull { event: Val, capacity: usize },

    #[error("executor has no event queue")]
    NoEventQueue { event: Val },

    #[error("no executor with pid {pid}")]
    UnknownPid { pid: Pid, event: Val },
}

impl SignalError {
    pub fn into_event(self) -> Val {
        match self {
            SignalError::QueueFull { event, .. }
            | SignalError::NoEventQueue { event }
            | SignalError::UnknownPid { event, .. } => event,
        }
    }
}
