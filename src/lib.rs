//! Script-execution core for a multi-user game shard.
//!
//! A cooperative, single-threaded scheduler running many suspendable script
//! executors. Bytecode programs run on a [`vm::Vm`]; programs for the
//! alternate promise-capable engine run through the [`bridge`]. Scripts block
//! on timers, events, child scripts and async requests answered by game
//! entities, and are revived exactly once when those resolve.

pub mod bridge;
pub mod cli;
pub mod config;
pub mod errors;
pub mod executor;
pub mod init;
pub mod program;
pub mod requests;
pub mod scheduler;
pub mod thread;
pub mod types;
pub mod values;
pub mod vm;

// Re-export main types
pub use types::*;

pub use bridge::{CallReturn, Deferred, Engine, EngineCall, EngineError, Settler};
pub use config::{Config, SchedulerConfig};
pub use errors::{SchedulerError, SignalError};
pub use executor::{EventDelivery, Executor, ExecutorOptions};
pub use program::{FunctionRef, Program};
pub use scheduler::{ExitReason, Scheduler, ScriptExit};
pub use values::Val;

// Re-export init API for convenience
pub use init::{initialize, InitBuilder, InitOptions};
