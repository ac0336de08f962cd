//! Script values
//!
//! `Val` is the boxed value moved across an executor's value stack: call
//! arguments, module function results, delivered events and script return
//! values. Values are serializable so a scheduled executor's stack can be
//! persisted or inspected.

use crate::types::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/* ===================== Error payload ===================== */

pub const ABORTED: &str = "Aborted";
pub const ENGINE_ERROR: &str = "EngineError";
pub const RUNAWAY: &str = "RunawayScript";
pub const SCRIPT_FAULT: &str = "ScriptFault";

/// Error value observable by scripts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/* ===================== Val ===================== */

/// Runtime value type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Val {
    Uninit,
    Long(i64),
    Double(f64),
    Bool(bool),
    Str(String),
    Array(Vec<Val>),
    Struct(BTreeMap<String, Val>),
    /// Reference to a game entity
    Entity(EntityId),
    Error(ErrorInfo),
}

impl Val {
    /// The value every aborted request resolves with
    pub fn sentinel() -> Self {
        Val::Long(0)
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Val::Error(ErrorInfo::new(code, message))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Val::Error(_))
    }

    /// Check if value is truthy (for conditionals)
    pub fn is_truthy(&self) -> bool {
        match self {
            Val::Uninit => false,
            Val::Long(n) => *n != 0,
            Val::Double(n) => *n != 0.0,
            Val::Bool(b) => *b,
            Val::Str(s) => !s.is_empty(),
            Val::Error(_) => false,
            _ => true,
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Uninit => f.write_str("<uninitialized object>"),
            Val::Long(n) => write!(f, "{}", n),
            Val::Double(n) => write!(f, "{}", n),
            Val::Bool(b) => write!(f, "{}", b),
            Val::Str(s) => write!(f, "{}", s),
            Val::Array(items) => {
                f.write_str("{ ")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(" }")
            }
            Val::Struct(members) => {
                f.write_str("struct{ ")?;
                for (i, (k, v)) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} = {}", k, v)?;
                }
                f.write_str(" }")
            }
            Val::Entity(id) => write!(f, "<entity {}>", id),
            Val::Error(info) => write!(f, "error{{ {} }}", info),
        }
    }
}

impl From<i64> for Val {
    fn from(n: i64) -> Self {
        Val::Long(n)
    }
}

impl From<&str> for Val {
    fn from(s: &str) -> Self {
        Val::Str(s.to_string())
    }
}

impl From<String> for Val {
    fn from(s: String) -> Self {
        Val::Str(s)
    }
}

impl From<bool> for Val {
    fn from(b: bool) -> Self {
        Val::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn test_val_serialization_is_tagged() {
        let v = Val::Struct(btreemap! {
            "hp".to_string() => Val::Long(40),
            "who".to_string() => Val::Entity(EntityId(0x1234)),
        });
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["t"], "Struct");
        assert_eq!(json["v"]["hp"]["t"], "Long");
        assert_eq!(json["v"]["hp"]["v"], 40);

        let back: Val = serde_json::from_value(json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_sentinel_is_long_zero() {
        assert_eq!(Val::sentinel(), Val::Long(0));
        assert!(!Val::sentinel().is_truthy());
    }

    #[test]
    fn test_display() {
        assert_eq!(Val::Array(vec![1.into(), "a".into()]).to_string(), "{ 1, a }");
        assert_eq!(
            Val::error(ABORTED, "gone").to_string(),
            "error{ Aborted: gone }"
        );
    }
}
