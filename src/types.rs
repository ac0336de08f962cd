use serde::{Deserialize, Serialize};
use std::fmt;

/// Server clock in milliseconds. Supplied by the caller of every driver entry point.
pub type Clock = u64;

/// Sleep-until value meaning "no timer, wait until explicitly revived".
pub const WAIT_FOREVER: Clock = 0;

/// Process id of an executor, assigned monotonically by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Correlation id shared by async requests and bridge calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u32);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

/// Serial of a game entity (typically a client-controlled character).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Which runtime executes a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgramType {
    /// Synchronous bytecode virtual machine
    Bytecode,
    /// Alternate promise-capable engine driven through the bridge
    Engine,
    #[serde(other)]
    Unknown,
}

/// Externally visible scheduling state of an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorState {
    Running,
    Sleeping,
    Debugging,
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutorState::Running => "Running",
            ExecutorState::Sleeping => "Sleeping",
            ExecutorState::Debugging => "Debugging",
        };
        f.write_str(s)
    }
}

/// Which scheduler structure currently tracks an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HoldListType {
    /// Not held: in the ready queue or currently running
    #[default]
    None,
    /// Blocked with a wake clock
    Timeout,
    /// Blocked until explicitly revived
    NoTimeout,
    /// Halted for the debugger
    Debugger,
    /// Lifecycle owned by the bridge
    External,
}

/// Key of an entry in the timeout hold list.
///
/// Ordered by wake clock first, then by insertion sequence, so executors that
/// wake on the same clock are revived in the order they went to sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeoutHandle {
    pub wake: Clock,
    pub seq: u64,
}

/// What a blocked executor is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitType {
    /// Sleep, request or child script
    #[default]
    Wait,
    /// `wait_for_event`: a signalled event is delivered straight onto the stack
    Event,
}

/// Kind of an outstanding async request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    TargetObject,
    TargetCursor,
    TextEntry,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestKind::TargetObject => "target_object",
            RequestKind::TargetCursor => "target_cursor",
            RequestKind::TextEntry => "text_entry",
        };
        f.write_str(s)
    }
}
