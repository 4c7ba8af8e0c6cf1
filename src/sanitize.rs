//! Value bridge: turn host values into plain data that can cross into a realm.
//!
//! Dates become ISO-8601 strings and functions become `{"ref": "<id>"}`
//! markers pointing into a call-scoped [`CallbackRegistry`]. The output never
//! contains a live function or date, so it is safe to serialize and hand to
//! code that has no access to host closures.

use crate::error::SandboxError;
use crate::value::{HostFn, HostValue};
use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Maximum recursion depth for nested objects/arrays
const MAX_DEPTH: usize = 128;

/// Key of a function marker object.
pub const REF_KEY: &str = "ref";

/// Call-scoped mapping from opaque id to host function.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    entries: HashMap<String, HostFn>,
    next_id: u64,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&HostFn> {
        self.entries.get(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Register a function and return its fresh id.
    pub fn register(&mut self, f: HostFn) -> String {
        let id = format!("cb:{}", self.next_id);
        self.next_id += 1;
        self.entries.insert(id.clone(), f);
        id
    }

    /// Sanitize `value`, registering any functions it contains in this registry.
    pub fn sanitize_into(&mut self, value: &HostValue) -> Result<Value, SandboxError> {
        self.sanitize_recursive(value, 0)
    }

    fn sanitize_recursive(&mut self, value: &HostValue, depth: usize) -> Result<Value, SandboxError> {
        if depth > MAX_DEPTH {
            return Err(SandboxError::InvalidValue {
                reason: format!("nesting too deep (max {} levels)", MAX_DEPTH),
            });
        }

        match value {
            HostValue::Null => Ok(Value::Null),
            HostValue::Bool(b) => Ok(Value::Bool(*b)),
            HostValue::Number(n) => Ok(Value::Number(n.clone())),
            HostValue::String(s) => Ok(Value::String(s.clone())),
            HostValue::Date(d) => Ok(Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true))),
            HostValue::Function(f) => {
                let id = self.register(f.clone());
                let mut marker = Map::new();
                marker.insert(REF_KEY.to_string(), Value::String(id));
                Ok(Value::Object(marker))
            }
            HostValue::Array(items) => {
                let sanitized: Result<Vec<Value>, SandboxError> = items
                    .iter()
                    .map(|v| self.sanitize_recursive(v, depth + 1))
                    .collect();
                Ok(Value::Array(sanitized?))
            }
            HostValue::Object(map) => {
                let mut sanitized = Map::new();
                for (key, val) in map {
                    sanitized.insert(key.clone(), self.sanitize_recursive(val, depth + 1)?);
                }
                Ok(Value::Object(sanitized))
            }
        }
    }

    /// Decode data coming out of a realm, turning markers for functions in
    /// this registry back into the original host functions.
    pub fn revive(&self, value: Value) -> HostValue {
        match value {
            Value::Object(map) => {
                if let Some(f) = self.marker_target(&map) {
                    return HostValue::Function(f.clone());
                }
                HostValue::Object(map.into_iter().map(|(k, v)| (k, self.revive(v))).collect())
            }
            Value::Array(items) => {
                HostValue::Array(items.into_iter().map(|v| self.revive(v)).collect())
            }
            other => other.into(),
        }
    }

    fn marker_target(&self, map: &Map<String, Value>) -> Option<&HostFn> {
        if map.len() != 1 {
            return None;
        }
        map.get(REF_KEY)
            .and_then(Value::as_str)
            .and_then(|id| self.entries.get(id))
    }

    /// Sanitize `value` and package it with the ids a realm may revive.
    pub fn envelope(&mut self, value: &HostValue) -> Result<BridgeEnvelope, SandboxError> {
        let value = self.sanitize_into(value)?;
        Ok(BridgeEnvelope {
            value,
            refs: self.ids(),
        })
    }
}

/// Sanitized data in the shape the realm bootstrap expects.
#[derive(Debug, Serialize)]
pub struct BridgeEnvelope {
    pub value: Value,
    pub refs: Vec<String>,
}

/// Output of [`sanitize`].
#[derive(Debug)]
pub struct Sanitized {
    pub sanitized: Value,
    pub registry: CallbackRegistry,
}

/// Recursively sanitize a host value into plain data and a fresh registry.
///
/// # Errors
/// Returns [`SandboxError::InvalidValue`] if nesting depth exceeds 128 levels.
pub fn sanitize(value: &HostValue) -> Result<Sanitized, SandboxError> {
    let mut registry = CallbackRegistry::new();
    let sanitized = registry.sanitize_into(value)?;
    Ok(Sanitized { sanitized, registry })
}
