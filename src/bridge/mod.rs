//! # Cross-runtime call bridge
//!
//! Runs scripts that belong to the alternate, promise-capable engine and
//! reports their completion back into the scheduler exactly once.
//!
//! ## Protocol
//!
//! 1. The scheduler moves the executor to the external hold list; from then
//!    on the bridge owns its lifecycle.
//! 2. The value stack is drained into the argument list (bottom of the stack
//!    first, so call-site order is kept) and each value is converted, tagged
//!    with the call's request id.
//! 3. The engine call either returns a plain value (immediate completion) or
//!    a [`Deferred`]. A deferred call stays pending until its [`Settler`]
//!    resolves or rejects it, from any thread. Settlements are drained on the
//!    scheduler thread at the start of each tick.
//! 4. An engine error becomes the failure path; it never crosses the bridge.
//!
//! The scheduler converts the result before freeing the executor, so a
//! finished script always has its converted result.

pub mod convert;


pub use convert::{json_to_val, val_to_json};

use crate::executor::Executor;
use crate::program::FunctionRef;
use crate::thread::ThreadInterface;
use crate::types::{Pid, RequestId};
use crate::values::{Val, ENGINE_ERROR};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, error};

/* ===================== Engine contract ===================== */

#[derive(Debug, Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One invocation handed to the engine
#[derive(Debug)]
pub struct EngineCall<'a> {
    pub request_id: RequestId,
    pub pid: Pid,
    pub scriptname: &'a str,
    pub function: &'a FunctionRef,
    pub args: Vec<JsonValue>,
}

pub enum CallReturn {
    Value(JsonValue),
    Deferred(Deferred),
}

pub trait Engine: Send + Sync {
    fn call(&self, call: EngineCall<'_>) -> Result<CallReturn, EngineError>;

    /// Deliver a value the engine is waiting on outside a call return, such as
    /// the answer to an async request made by an engine script
    fn resolve_delayed_object(&self, request_id: RequestId, value: JsonValue) -> bool;

    /// A still-managed executor is being torn down with the scheduler
    fn shutdown(&self, _pid: Pid, _scriptname: &str) {}
}

/* ===================== Deferred ===================== */

pub type Settlement = Result<JsonValue, String>;

/// Pending result of an engine call
#[derive(Debug)]
pub struct Deferred {
    rx: oneshot::Receiver<Settlement>,
}

/// Settles a [`Deferred`]. Consumed on use; dropping it unsettled counts as
/// a failure.
#[derive(Debug)]
pub struct Settler {
    tx: oneshot::Sender<Settlement>,
}

impl Deferred {
    pub fn channel() -> (Deferred, Settler) {
        let (tx, rx) = oneshot::channel();
        (Deferred { rx }, Settler { tx })
    }

    fn try_settle(&mut self) -> Option<Settlement> {
        match self.rx.try_recv() {
            Ok(settlement) => Some(settlement),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err("deferred dropped without settling".to_string())),
        }
    }
}

impl Settler {
    pub fn resolve(self, value: JsonValue) {
        let _ = self.tx.send(Ok(value));
    }

    pub fn reject(self, message: impl Into<String>) {
        let _ = self.tx.send(Err(message.into()));
    }
}

/* ===================== Bridge ===================== */

/// How a bridge invocation ended
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeOutcome {
    Completed(Val),
    Pending(RequestId),
    Failed(Val),
}

/// A settled deferred call, converted and ready to resolve its executor
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub pid: Pid,
    pub request_id: RequestId,
    pub value: Val,
}

struct PendingCall {
    pid: Pid,
    scriptname: String,
    deferred: Deferred,
}

pub struct Bridge {
    engine: Option<Arc<dyn Engine>>,
    pending: BTreeMap<RequestId, PendingCall>,
}

impl Bridge {
    pub fn new(engine: Option<Arc<dyn Engine>>) -> Self {
        Self {
            engine,
            pending: BTreeMap::new(),
        }
    }

    pub fn engine(&self) -> Option<&dyn Engine> {
        self.engine.as_deref()
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Drain the executor's arguments and invoke its engine function
    pub(crate) fn invoke(&mut self, ex: &mut Executor, request_id: RequestId) -> BridgeOutcome {
        let pid = ex.pid();
        let scriptname = ex.scriptname().to_string();

        let Some(engine) = self.engine.clone() else {
            error!(%pid, script = %scriptname, "no engine registered for engine script");
            return BridgeOutcome::Failed(Val::error(ENGINE_ERROR, "no engine registered"));
        };
        let Some(function) = ex.function().cloned() else {
            error!(%pid, script = %scriptname, "engine script has no function");
            return BridgeOutcome::Failed(Val::error(ENGINE_ERROR, "no function to call"));
        };

        let args: Vec<JsonValue> = ex
            .value_stack_mut()
            .drain(..)
            .map(|v| val_to_json(&v, request_id))
            .collect();
        for (i, arg) in args.iter().enumerate() {
            debug!(%request_id, "argv[{}] = {}", i, arg);
        }
        debug!(
            %request_id,
            %pid,
            script = %scriptname,
            module = %function.module,
            argc = args.len(),
            "calling engine"
        );

        let call = EngineCall {
            request_id,
            pid,
            scriptname: &scriptname,
            function: &function,
            args,
        };

        match engine.call(call) {
            Ok(CallReturn::Value(json)) => {
                debug!(%request_id, %pid, "returned value {}", json);
                BridgeOutcome::Completed(json_to_val(&json))
            }
            Ok(CallReturn::Deferred(deferred)) => {
                debug!(%request_id, %pid, "returned deferred");
                ex.thread_mut().set_outstanding_call(Some(request_id));
                self.pending.insert(
                    request_id,
                    PendingCall {
                        pid,
                        scriptname,
                        deferred,
                    },
                );
                BridgeOutcome::Pending(request_id)
            }
            Err(e) => {
                error!(%request_id, %pid, "Error running engine script {}: {}", scriptname, e);
                BridgeOutcome::Failed(Val::error(ENGINE_ERROR, e.message))
            }
        }
    }

    /// Collect every deferred call that has settled since the last drain
    pub(crate) fn drain_settled(&mut self) -> Vec<Completion> {
        let mut settled = Vec::new();
        for (request_id, call) in self.pending.iter_mut() {
            if let Some(settlement) = call.deferred.try_settle() {
                settled.push((*request_id, call.pid, settlement));
            }
        }

        settled
            .into_iter()
            .filter_map(|(request_id, pid, settlement)| {
                let call = self.pending.remove(&request_id)?;
                let value = match settlement {
                    Ok(json) => {
                        debug!(%request_id, %pid, script = %call.scriptname, "script returned: {}", json);
                        json_to_val(&json)
                    }
                    Err(message) => {
                        error!(%request_id, %pid, script = %call.scriptname, "script errored: {}", message);
                        Val::error(ENGINE_ERROR, message)
                    }
                };
                Some(Completion {
                    pid,
                    request_id,
                    value,
                })
            })
            .collect()
    }

    /// Drop pending calls for an executor that is going away
    pub(crate) fn forget(&mut self, pid: Pid) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, call| call.pid != pid);
        before - self.pending.len()
    }
}
