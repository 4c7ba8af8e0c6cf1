//! deno_core ops installed into every realm.
//!
//! These are the only host entry points a realm has. The bootstrap script
//! captures them in a closure and removes `Deno` before document code runs.

use crate::sanitize::CallbackRegistry;
use crate::value::{HostFn, HostValue};
use anyhow::anyhow;
use deno_core::error::AnyError;
use deno_core::{op2, OpState};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;

// ============================================================================
// Console Output Capture
// ============================================================================

/// Marker appended once console capture hits its byte limit.
pub const CONSOLE_TRUNCATED: &str = "[console output truncated]";

/// Longest message text forwarded to host logs.
const MAX_LOG_LINE: usize = 4096;

/// Captured console output from the sandboxed realm
#[derive(Debug, Default, Clone, Serialize)]
pub struct ConsoleOutput {
    pub logs: Vec<String>,
    pub warns: Vec<String>,
    pub errors: Vec<String>,
    /// Set once messages were dropped for exceeding the capture limit.
    pub truncated: bool,
    #[serde(skip)]
    captured_bytes: usize,
}

/// What happened to one console message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Capture {
    Kept,
    /// This message crossed the limit; the truncation marker took its place.
    Truncated,
    Dropped,
}

impl ConsoleOutput {
    /// Total bytes of captured message text.
    pub fn captured_bytes(&self) -> usize {
        self.captured_bytes
    }

    /// Capture `msg` unless doing so would exceed `limit` bytes in total.
    pub(crate) fn record(&mut self, level: &str, msg: &str, limit: usize) -> Capture {
        if self.truncated {
            return Capture::Dropped;
        }

        let target = match level {
            "error" => &mut self.errors,
            "warn" => &mut self.warns,
            _ => &mut self.logs,
        };

        if self.captured_bytes.saturating_add(msg.len()) > limit {
            target.push(CONSOLE_TRUNCATED.to_string());
            self.truncated = true;
            return Capture::Truncated;
        }

        target.push(msg.to_string());
        self.captured_bytes += msg.len();
        Capture::Kept
    }
}

/// Byte budget for captured console output in one realm.
pub struct ConsoleLimit(pub usize);

/// Synthetic filename of the realm, attached to console log events.
pub struct ScriptIdentity(pub String);

fn log_excerpt(msg: &str) -> &str {
    if msg.len() <= MAX_LOG_LINE {
        return msg;
    }
    let mut end = MAX_LOG_LINE;
    while !msg.is_char_boundary(end) {
        end -= 1;
    }
    &msg[..end]
}

/// Record one console message. Returns false once the realm should stop
/// sending console output.
#[op2(fast)]
pub fn op_sandbox_console(state: &mut OpState, #[string] level: &str, #[string] msg: &str) -> bool {
    let script = state
        .try_borrow::<ScriptIdentity>()
        .map(|s| s.0.clone())
        .unwrap_or_default();
    let limit = state.try_borrow::<ConsoleLimit>().map_or(usize::MAX, |l| l.0);

    let capture = match state.try_borrow_mut::<ConsoleOutput>() {
        Some(output) => output.record(level, msg, limit),
        None => Capture::Kept,
    };

    match capture {
        Capture::Kept => {
            let text = log_excerpt(msg);
            let msg_len = msg.len();
            match level {
                "error" => tracing::error!(target: "doc_sandbox::console", script = %script, msg_len, "{}", text),
                "warn" => tracing::warn!(target: "doc_sandbox::console", script = %script, msg_len, "{}", text),
                "debug" => tracing::debug!(target: "doc_sandbox::console", script = %script, msg_len, "{}", text),
                _ => tracing::info!(target: "doc_sandbox::console", script = %script, msg_len, "{}", text),
            }
            true
        }
        Capture::Truncated => {
            tracing::warn!(script = %script, limit, "console output limit reached, dropping further messages");
            false
        }
        Capture::Dropped => false,
    }
}

// ============================================================================
// Evaluation Input / Output
// ============================================================================

/// Serialized bridge envelope holding the evaluation input.
pub struct Payload(pub String);

/// Serialized outcome reported by the bootstrap driver.
pub struct ExecutionResult(pub String);

const EMPTY_PAYLOAD: &str = r#"{"value":null,"refs":[]}"#;

/// Hand the evaluation input to the driver. Can only be taken once.
#[op2]
#[string]
pub fn op_sandbox_payload(state: &mut OpState) -> String {
    state
        .try_take::<Payload>()
        .map(|p| p.0)
        .unwrap_or_else(|| EMPTY_PAYLOAD.to_string())
}

#[op2(fast)]
pub fn op_sandbox_set_result(state: &mut OpState, #[string] json: &str) {
    state.put(ExecutionResult(json.to_string()));
}

// ============================================================================
// Function Call Bridge
// ============================================================================

fn unavailable(id: &str) -> AnyError {
    anyhow!("host callback '{}' is no longer available", id)
}

/// Find the callback for `id` and decode its arguments.
///
/// `registry` is `None` once the evaluation that owned it has finished.
fn resolve_call(
    registry: Option<&CallbackRegistry>,
    id: &str,
    args_json: &str,
) -> Result<(HostFn, Vec<HostValue>), AnyError> {
    let registry = registry.ok_or_else(|| unavailable(id))?;
    let callback = registry.get(id).cloned().ok_or_else(|| unavailable(id))?;
    let args: serde_json::Value = serde_json::from_str(args_json)
        .map_err(|e| anyhow!("invalid bridge arguments: {}", e))?;
    let args = match registry.revive(args) {
        HostValue::Array(items) => items,
        other => vec![other],
    };
    Ok((callback, args))
}

/// Invoke the host function registered under `id`.
///
/// Arguments arrive as JSON and are decoded against the call's registry, so
/// stubs handed back by the realm become the original host functions. The
/// result is sanitized into the same registry before it crosses back.
#[op2(async)]
#[string]
pub async fn op_sandbox_bridge_call(
    state: Rc<RefCell<OpState>>,
    #[string] id: String,
    #[string] args_json: String,
) -> Result<String, AnyError> {
    let (callback, args) = {
        let st = state.borrow();
        resolve_call(st.try_borrow::<CallbackRegistry>(), &id, &args_json)?
    };

    tracing::debug!(callback = %id, args_len = args_json.len(), "bridge call dispatched");

    let result = callback.call(args).await.map_err(|e| {
        tracing::debug!(callback = %id, error = %e, "bridge call failed");
        anyhow!("{:#}", e)
    })?;

    let envelope = {
        let mut st = state.borrow_mut();
        let registry = st
            .try_borrow_mut::<CallbackRegistry>()
            .ok_or_else(|| unavailable(&id))?;
        registry.envelope(&result)?
    };

    Ok(serde_json::to_string(&envelope)?)
}

// ============================================================================
// Extension Definition
// ============================================================================

deno_core::extension!(
    doc_sandbox_ext,
    ops = [
        op_sandbox_console,
        op_sandbox_payload,
        op_sandbox_set_result,
        op_sandbox_bridge_call,
    ],
);
