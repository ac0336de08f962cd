use crate::bridge::{CallReturn, Deferred, Engine, EngineCall, EngineError, Settler};
use crate::config::SchedulerConfig;
use crate::program::Program;
use crate::requests::ResponseCallback;
use crate::scheduler::Scheduler;
use crate::types::{Clock, Pid, RequestId};
use crate::values::Val;
use crate::vm::Instr;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub fn bytecode(name: &str, instrs: Vec<Instr>) -> Arc<Program> {
    Arc::new(Program::bytecode(name, instrs))
}

pub fn engine_program(name: &str, module: &str) -> Arc<Program> {
    Arc::new(Program::engine(name, module))
}

pub fn push(value: impl Into<Val>) -> Instr {
    Instr::Push {
        value: value.into(),
    }
}

/// A script that sits in the ready queue and returns whatever its result
/// slot holds
pub fn waiter() -> Vec<Instr> {
    vec![Instr::Return]
}

pub fn scheduler() -> Scheduler {
    Scheduler::builder().build()
}

pub fn scheduler_with(config: SchedulerConfig) -> Scheduler {
    Scheduler::builder().config(config).build()
}

pub fn scheduler_with_engine(engine: Arc<ScriptedEngine>) -> Scheduler {
    Scheduler::builder().engine(engine).build()
}

/// Callback that passes the response through
pub fn passthrough() -> ResponseCallback {
    Box::new(|_, response| Some(response))
}

/// Drive passes until nothing is ready or `max_passes` is reached
pub fn run_passes(scheduler: &mut Scheduler, now: Clock, max_passes: usize) {
    for _ in 0..max_passes {
        if scheduler.ready_count() == 0 {
            break;
        }
        scheduler.run_ready(now);
    }
}

/* ===================== Scripted engine ===================== */

#[derive(Debug, Clone)]
pub enum Behavior {
    Value(JsonValue),
    Defer,
    Fail(String),
}

/// Engine whose functions answer from a per-module script
#[derive(Default)]
pub struct ScriptedEngine {
    behaviors: Mutex<HashMap<String, Behavior>>,
    settlers: Mutex<HashMap<RequestId, Settler>>,
    pub calls: Mutex<Vec<(RequestId, Pid, Vec<JsonValue>)>>,
    pub delayed: Mutex<Vec<(RequestId, JsonValue)>>,
    pub shutdowns: Mutex<Vec<Pid>>,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, module: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(module.to_string(), behavior);
    }

    /// Settler of a deferred call, by the call's request id
    pub fn settler(&self, request_id: RequestId) -> Settler {
        self.settlers
            .lock()
            .unwrap()
            .remove(&request_id)
            .expect("no deferred call with that id")
    }

    pub fn last_call(&self) -> (RequestId, Pid, Vec<JsonValue>) {
        self.calls.lock().unwrap().last().cloned().expect("no calls")
    }
}

impl Engine for ScriptedEngine {
    fn call(&self, call: EngineCall<'_>) -> Result<CallReturn, EngineError> {
        self.calls
            .lock()
            .unwrap()
            .push((call.request_id, call.pid, call.args.clone()));

        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&call.function.module)
            .cloned()
            .unwrap_or(Behavior::Value(JsonValue::Null));

        match behavior {
            Behavior::Value(value) => Ok(CallReturn::Value(value)),
            Behavior::Defer => {
                let (deferred, settler) = Deferred::channel();
                self.settlers
                    .lock()
                    .unwrap()
                    .insert(call.request_id, settler);
                Ok(CallReturn::Deferred(deferred))
            }
            Behavior::Fail(message) => Err(EngineError::new(message)),
        }
    }

    fn resolve_delayed_object(&self, request_id: RequestId, value: JsonValue) -> bool {
        self.delayed.lock().unwrap().push((request_id, value));
        true
    }

    fn shutdown(&self, pid: Pid, _scriptname: &str) {
        self.shutdowns.lock().unwrap().push(pid);
    }
}
