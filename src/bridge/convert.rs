//! Value conversion between script values and the engine's JSON representation

use crate::types::{EntityId, RequestId};
use crate::values::{ErrorInfo, Val};
use serde_json::{json, Map, Value as JsonValue};

const ENTITY_KEY: &str = "$entity";
const REQUEST_KEY: &str = "$request";
const ERROR_KEY: &str = "$error";

/// Convert a script value for the engine.
///
/// Entity references carry the id of the call that produced them, so the
/// engine can route values it creates later back through
/// `resolve_delayed_object`.
pub fn val_to_json(val: &Val, request_id: RequestId) -> JsonValue {
    match val {
        Val::Uninit => JsonValue::Null,
        Val::Long(n) => json!(n),
        Val::Double(n) => serde_json::Number::from_f64(*n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Val::Bool(b) => JsonValue::Bool(*b),
        Val::Str(s) => JsonValue::String(s.clone()),
        Val::Array(items) => JsonValue::Array(
            items
                .iter()
                .map(|item| val_to_json(item, request_id))
                .collect(),
        ),
        Val::Struct(members) => {
            let mut obj = Map::new();
            for (key, member) in members {
                obj.insert(key.clone(), val_to_json(member, request_id));
            }
            JsonValue::Object(obj)
        }
        Val::Entity(id) => json!({ ENTITY_KEY: id.0, REQUEST_KEY: request_id.0 }),
        Val::Error(info) => json!({
            ERROR_KEY: { "code": info.code, "message": info.message }
        }),
    }
}

/// Convert an engine value back into a script value
pub fn json_to_val(json: &JsonValue) -> Val {
    match json {
        JsonValue::Null => Val::Uninit,
        JsonValue::Bool(b) => Val::Bool(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Val::Long(i),
            None => Val::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(s) => Val::Str(s.clone()),
        JsonValue::Array(items) => Val::Array(items.iter().map(json_to_val).collect()),
        JsonValue::Object(obj) => {
            if let Some(id) = obj.get(ENTITY_KEY).and_then(JsonValue::as_u64) {
                if let Ok(id) = u32::try_from(id) {
                    return Val::Entity(EntityId(id));
                }
            }
            if let Some(err) = obj.get(ERROR_KEY) {
                let field = |name: &str| {
                    err.get(name)
                        .and_then(JsonValue::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                return Val::Error(ErrorInfo::new(field("code"), field("message")));
            }
            Val::Struct(
                obj.iter()
                    .map(|(key, member)| (key.clone(), json_to_val(member)))
                    .collect(),
            )
        }
    }
}
