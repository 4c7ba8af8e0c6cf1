//! Realm factory - one fresh V8 isolate per evaluation.
//!
//! A realm has its own intrinsics (`Object`, `Function`, prototypes), so a
//! prototype-chain walk from any value only ever reaches the realm's own
//! `Function`, whose global scope holds nothing but:
//! - the language built-ins
//! - `console` (forwarded to host logs, captured per call)
//! - the one-shot evaluation driver, removed before document code runs
//!
//! No fs, net, env, module loading, or engine internals (`Deno`) are reachable.

use crate::deadline::{Deadline, DeadlineGuard};
use crate::error::SandboxError;
use crate::loader::DenyAllLoader;
use crate::ops::{
    doc_sandbox_ext, ConsoleLimit, ConsoleOutput, ExecutionResult, Payload, ScriptIdentity,
};
use crate::sanitize::CallbackRegistry;
use anyhow::anyhow;
use deno_core::error::JsError;
use deno_core::{v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use serde::Deserialize;
use serde_json::Value;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const BOOTSTRAP: &str = include_str!("bootstrap.js");

/// Configuration for the sandbox
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Default wall-clock budget for one evaluation (default: 5s)
    pub timeout: Duration,
    /// Maximum heap size in bytes (default: 64MB, None = unlimited)
    pub max_heap_size: Option<usize>,
    /// Maximum size of module/template source in bytes (default: 1MB)
    pub max_code_size: usize,
    /// Maximum size of the serialized result, and separately of captured
    /// console text, in bytes (default: 8MB)
    pub max_output_size: usize,
    /// Maximum number of realms alive at once (default: 16)
    pub max_concurrent: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_heap_size: Some(64 * 1024 * 1024), // 64MB default
            max_code_size: 1024 * 1024,
            max_output_size: 8 * 1024 * 1024,
            max_concurrent: 16,
        }
    }
}

impl SandboxConfig {
    pub(crate) fn check_code_size(&self, source: &str) -> Result<(), SandboxError> {
        if source.len() > self.max_code_size {
            return Err(SandboxError::CodeTooLarge {
                max: self.max_code_size,
                actual: source.len(),
            });
        }
        Ok(())
    }
}

/// Per-call inputs installed into a new realm.
pub struct RealmSetup {
    /// Synthetic script name used for stack traces.
    pub filename: String,
    /// Serialized [`crate::sanitize::BridgeEnvelope`] handed to the driver.
    pub payload: String,
    /// Host functions reachable from the payload's markers.
    pub registry: CallbackRegistry,
}

/// An isolated execution environment, exclusively owned by one evaluation.
pub struct Realm {
    runtime: JsRuntime,
    filename: String,
    max_output_size: usize,
    heap_exceeded: Arc<AtomicBool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum Envelope {
    Ok(Value),
    Error(ScriptFailure),
}

#[derive(Deserialize)]
struct ScriptFailure {
    name: String,
    message: String,
    stack: Option<String>,
}

/// Create a fresh realm with the allow-listed bindings installed.
pub fn create_realm(config: &SandboxConfig, setup: RealmSetup) -> Result<Realm, SandboxError> {
    // Configure V8 heap limits if specified
    let create_params = config
        .max_heap_size
        .map(|max_bytes| v8::Isolate::create_params().heap_limits(0, max_bytes));

    let mut runtime = JsRuntime::new(RuntimeOptions {
        module_loader: Some(Rc::new(DenyAllLoader)),
        extensions: vec![doc_sandbox_ext::init_ops()],
        create_params,
        ..Default::default()
    });

    let heap_exceeded = Arc::new(AtomicBool::new(false));
    if config.max_heap_size.is_some() {
        let handle = runtime.v8_isolate().thread_safe_handle();
        let triggered = heap_exceeded.clone();
        runtime.add_near_heap_limit_callback(move |current, initial| {
            if !triggered.swap(true, Ordering::SeqCst) {
                tracing::warn!(
                    current_mb = current / (1024 * 1024),
                    initial_mb = initial / (1024 * 1024),
                    "near heap limit, terminating realm"
                );
                handle.terminate_execution();
            }
            // Grant 1MB grace so the termination can propagate
            current + 1024 * 1024
        });
    }

    {
        let state = runtime.op_state();
        let mut state = state.borrow_mut();
        state.put(ConsoleOutput::default());
        state.put(ConsoleLimit(config.max_output_size));
        state.put(ScriptIdentity(setup.filename.clone()));
        state.put(Payload(setup.payload));
        state.put(setup.registry);
    }

    runtime
        .execute_script("<doc-sandbox:bootstrap>", BOOTSTRAP)
        .map_err(|e| SandboxError::Execution(e.context("realm bootstrap failed")))?;

    Ok(Realm {
        runtime,
        filename: setup.filename,
        max_output_size: config.max_output_size,
        heap_exceeded,
    })
}

impl Realm {
    /// Console output captured so far.
    pub fn console(&mut self) -> ConsoleOutput {
        let state = self.runtime.op_state();
        let output = state
            .borrow()
            .try_borrow::<ConsoleOutput>()
            .cloned()
            .unwrap_or_default();
        output
    }

    /// Run `source` and drive the event loop until the driver reports back,
    /// enforcing `deadline` throughout.
    ///
    /// `source` must call `__sandbox_run` exactly once; the value it reports
    /// under `ok` is returned.
    pub async fn run_with_deadline(
        &mut self,
        source: String,
        deadline: Deadline,
    ) -> Result<Value, SandboxError> {
        let guard = DeadlineGuard::arm(self.runtime.v8_isolate().thread_safe_handle(), deadline);

        let mut loop_timed_out = false;
        let exec_error = match self.runtime.execute_script("<doc-sandbox:eval>", source) {
            Ok(_) => {
                match tokio::time::timeout_at(
                    tokio::time::Instant::from_std(deadline.expires_at()),
                    self.runtime.run_event_loop(PollEventLoopOptions::default()),
                )
                .await
                {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e),
                    Err(_) => {
                        loop_timed_out = true;
                        None
                    }
                }
            }
            Err(e) => Some(e),
        };

        let terminated = guard.disarm();
        self.close_bridge();

        // --- Check error causes in priority order ---
        if self.heap_exceeded.load(Ordering::SeqCst) {
            return Err(SandboxError::HeapLimitExceeded);
        }

        if terminated || loop_timed_out {
            tracing::warn!(
                script = %self.filename,
                timeout_ms = deadline.budget_ms(),
                "deadline exceeded, realm aborted"
            );
            return Err(SandboxError::Timeout {
                timeout_ms: deadline.budget_ms(),
            });
        }

        if let Some(err) = exec_error {
            return Err(self.script_error(err));
        }

        let state = self.runtime.op_state();
        let reported = state.borrow_mut().try_take::<ExecutionResult>();
        let raw = reported
            .map(|r| r.0)
            .ok_or_else(|| SandboxError::Script {
                name: "Error".into(),
                message: "evaluation did not settle: a promise was never resolved".into(),
                stack: None,
            })?;

        if raw.len() > self.max_output_size {
            return Err(SandboxError::OutputTooLarge {
                max: self.max_output_size,
            });
        }

        match serde_json::from_str::<Envelope>(&raw)? {
            Envelope::Ok(value) => Ok(value),
            Envelope::Error(failure) => Err(SandboxError::Script {
                name: failure.name,
                message: failure.message,
                stack: failure
                    .stack
                    .map(|stack| filter_stack(&stack, &self.filename)),
            }),
        }
    }

    /// Drop the call's registry; stubs invoked from now on fail cleanly.
    fn close_bridge(&mut self) {
        let state = self.runtime.op_state();
        let _registry = state.borrow_mut().try_take::<CallbackRegistry>();
    }

    fn script_error(&self, err: anyhow::Error) -> SandboxError {
        match err.downcast_ref::<JsError>() {
            Some(js) => SandboxError::Script {
                name: js.name.clone().unwrap_or_else(|| "Error".into()),
                message: js
                    .message
                    .clone()
                    .unwrap_or_else(|| js.exception_message.clone()),
                stack: js
                    .stack
                    .as_deref()
                    .map(|stack| filter_stack(stack, &self.filename)),
            },
            None => SandboxError::Execution(anyhow!("{}", err)),
        }
    }
}

/// Keep the header of a V8 stack trace and only the frames in `filename`.
pub fn filter_stack(stack: &str, filename: &str) -> String {
    stack
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !trimmed.starts_with("at ") || trimmed.contains(filename)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_keeps_only_synthetic_frames() {
        let stack = "ReferenceError: process is not defined\n    \
            at default (doc-module-1234.js:1:40)\n    \
            at run (<doc-sandbox:bootstrap>:170:40)\n    \
            at /home/app/server/render.js:10:5\n    \
            at doc-module-1234.js:3:1";

        let filtered = filter_stack(stack, "doc-module-1234.js");
        assert_eq!(
            filtered,
            "ReferenceError: process is not defined\n    \
            at default (doc-module-1234.js:1:40)\n    \
            at doc-module-1234.js:3:1"
        );
        assert!(!filtered.contains("/home/"));
    }

    #[test]
    fn multiline_messages_survive() {
        let stack = "Error: first\nsecond line\n    at x (node:internal:1:1)";
        assert_eq!(filter_stack(stack, "doc-template-1.js"), "Error: first\nsecond line");
    }

    #[test]
    fn code_size_is_checked() {
        let config = SandboxConfig {
            max_code_size: 4,
            ..Default::default()
        };
        assert!(config.check_code_size("1234").is_ok());
        let err = config.check_code_size("12345").unwrap_err();
        assert!(matches!(err, SandboxError::CodeTooLarge { max: 4, actual: 5 }));
    }
}
