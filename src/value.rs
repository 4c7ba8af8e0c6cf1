//! Host-side values that can be handed to sandboxed code.
//!
//! A [`HostValue`] is plain data plus two things JSON cannot express: dates
//! and live host functions. Both are rewritten by [`crate::sanitize`] before
//! anything reaches a realm.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Number, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// An async host capability callable from sandboxed code.
///
/// Implemented for any `Fn(Vec<HostValue>) -> impl Future<Output = anyhow::Result<HostValue>>`.
#[async_trait]
pub trait HostFunction: Send + Sync {
    /// Invoke the function with arguments decoded from the realm.
    async fn call(&self, args: Vec<HostValue>) -> anyhow::Result<HostValue>;
}

#[async_trait]
impl<F, Fut> HostFunction for F
where
    F: Fn(Vec<HostValue>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<HostValue>> + Send,
{
    async fn call(&self, args: Vec<HostValue>) -> anyhow::Result<HostValue> {
        (self)(args).await
    }
}

/// Shared handle to a [`HostFunction`].
#[derive(Clone)]
pub struct HostFn(Arc<dyn HostFunction>);

impl HostFn {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<HostValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<HostValue>> + Send,
    {
        Self(Arc::new(f))
    }

    /// Wrap an existing trait object, e.g. a struct implementing [`HostFunction`].
    pub fn from_arc(f: Arc<dyn HostFunction>) -> Self {
        Self(f)
    }

    pub async fn call(&self, args: Vec<HostValue>) -> anyhow::Result<HostValue> {
        self.0.call(args).await
    }

    /// Whether two handles point at the same function.
    pub fn same_as(&self, other: &HostFn) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for HostFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostFn(..)")
    }
}

/// A value on the host side of the boundary.
#[derive(Debug, Clone)]
pub enum HostValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<HostValue>),
    Object(BTreeMap<String, HostValue>),
    Date(DateTime<Utc>),
    Function(HostFn),
}

impl HostValue {
    /// Wrap an async closure as a function value.
    pub fn function<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<HostValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<HostValue>> + Send,
    {
        HostValue::Function(HostFn::new(f))
    }

    /// Build an object from key/value pairs.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, HostValue)>,
    {
        HostValue::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&HostFn> {
        match self {
            HostValue::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Look up a key on an object value.
    pub fn get(&self, key: &str) -> Option<&HostValue> {
        match self {
            HostValue::Object(map) => map.get(key),
            _ => None,
        }
    }
}

impl From<Value> for HostValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => HostValue::Null,
            Value::Bool(b) => HostValue::Bool(b),
            Value::Number(n) => HostValue::Number(n),
            Value::String(s) => HostValue::String(s),
            Value::Array(items) => HostValue::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                HostValue::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::String(s)
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<i64> for HostValue {
    fn from(n: i64) -> Self {
        HostValue::Number(n.into())
    }
}

/// Non-finite floats have no JSON form and become `null`.
impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(HostValue::Null, HostValue::Number)
    }
}

impl From<DateTime<Utc>> for HostValue {
    fn from(d: DateTime<Utc>) -> Self {
        HostValue::Date(d)
    }
}

impl<T: Into<HostValue>> From<Vec<T>> for HostValue {
    fn from(items: Vec<T>) -> Self {
        HostValue::Array(items.into_iter().map(Into::into).collect())
    }
}
