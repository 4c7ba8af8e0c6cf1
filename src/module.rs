//! Module evaluator.

use crate::deadline::Deadline;
use crate::error::SandboxError;
use crate::ops::ConsoleOutput;
use crate::runtime::{create_realm, RealmSetup, SandboxConfig};
use crate::sanitize::CallbackRegistry;
use crate::transform::{transform_module, EXPORTS_BINDING};
use crate::value::HostValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Result of evaluating a document module.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    /// Export surface after top-level execution. Functions appear as
    /// `"[Function: name]"`.
    pub exports: Value,
    /// Return value of the default export, when it was called.
    pub call_result: Option<Value>,
    /// Whether the default export was a function and call arguments were given.
    pub called: bool,
    /// Console output produced during the evaluation.
    pub console: ConsoleOutput,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModuleOutcome {
    exports: Value,
    called: bool,
    #[serde(default)]
    call_result: Value,
}

/// Evaluate `code` in a fresh realm and, if `call_args` is given and the
/// default export is callable, await its result.
///
/// Must run on a thread that can own a V8 isolate (see [`crate::Sandbox`]).
pub async fn evaluate_module(
    config: &SandboxConfig,
    code: &str,
    call_args: Option<Vec<HostValue>>,
    budget: Duration,
) -> Result<EvaluationResult, SandboxError> {
    config.check_code_size(code)?;

    let transformed = transform_module(code);

    let mut registry = CallbackRegistry::new();
    let input = call_args.map_or(HostValue::Null, HostValue::Array);
    let payload = serde_json::to_string(&registry.envelope(&input)?)?;

    let filename = format!("doc-module-{}.js", uuid::Uuid::new_v4());
    tracing::debug!(script = %filename, callbacks = registry.len(), "creating module realm");

    let mut realm = create_realm(
        config,
        RealmSetup {
            filename: filename.clone(),
            payload,
            registry,
        },
    )?;

    // The module body starts on line 1 so author line numbers are kept.
    let source = format!(
        "__sandbox_run(\"module\", function ({EXPORTS_BINDING}) {{{transformed}\n}});\n//# sourceURL={filename}\n"
    );

    let value = realm
        .run_with_deadline(source, Deadline::after(budget))
        .await?;
    let outcome: ModuleOutcome = serde_json::from_value(value)?;

    Ok(EvaluationResult {
        exports: outcome.exports,
        call_result: outcome.called.then_some(outcome.call_result),
        called: outcome.called,
        console: realm.console(),
    })
}
