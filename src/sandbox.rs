//! Public entry point: runs each evaluation in its own realm on its own thread.
//!
//! V8 isolates are `!Send`, so every realm lives on a dedicated thread with a
//! single-threaded tokio runtime. The `Sandbox` API itself is `Send + Sync`
//! and fully async.

use crate::error::SandboxError;
use crate::module::{evaluate_module, EvaluationResult};
use crate::runtime::SandboxConfig;
use crate::template::render_template;
use crate::value::HostValue;
use anyhow::anyhow;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Evaluates document modules and templates in isolated realms.
///
/// Every call gets a brand new realm, callback registry, and deadline. A
/// semaphore bounds how many realms exist at once; callers beyond the limit
/// wait for a slot.
#[derive(Clone)]
pub struct Sandbox {
    config: SandboxConfig,
    semaphore: Arc<Semaphore>,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self { config, semaphore }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Evaluate a module with the configured default budget.
    pub async fn evaluate_module(
        &self,
        code: &str,
        call_args: Option<Vec<HostValue>>,
    ) -> Result<EvaluationResult, SandboxError> {
        self.evaluate_module_within(code, call_args, self.config.timeout)
            .await
    }

    /// Evaluate a module with an explicit wall-clock budget.
    pub async fn evaluate_module_within(
        &self,
        code: &str,
        call_args: Option<Vec<HostValue>>,
        budget: Duration,
    ) -> Result<EvaluationResult, SandboxError> {
        tracing::info!(
            code_len = code.len(),
            with_args = call_args.is_some(),
            budget_ms = budget.as_millis() as u64,
            "evaluate_module: starting"
        );

        let code = code.to_string();
        let result = self
            .run_isolated(move |config| async move {
                evaluate_module(&config, &code, call_args, budget).await
            })
            .await;

        match &result {
            Ok(r) => tracing::info!(called = r.called, "evaluate_module: complete"),
            Err(e) => tracing::warn!(error = %e, "evaluate_module: failed"),
        }
        result
    }

    /// Render a template with the configured default budget.
    pub async fn render_template(
        &self,
        source: &str,
        data: HostValue,
    ) -> Result<String, SandboxError> {
        self.render_template_within(source, data, self.config.timeout)
            .await
    }

    /// Render a template with an explicit wall-clock budget.
    pub async fn render_template_within(
        &self,
        source: &str,
        data: HostValue,
        budget: Duration,
    ) -> Result<String, SandboxError> {
        tracing::info!(
            source_len = source.len(),
            budget_ms = budget.as_millis() as u64,
            "render_template: starting"
        );

        let source = source.to_string();
        let result = self
            .run_isolated(move |config| async move {
                render_template(&config, &source, data, budget).await
            })
            .await;

        match &result {
            Ok(text) => tracing::info!(output_len = text.len(), "render_template: complete"),
            Err(e) => tracing::warn!(error = %e, "render_template: failed"),
        }
        result
    }

    /// Run `job` on a dedicated thread that may own a V8 isolate.
    async fn run_isolated<T, F, Fut>(&self, job: F) -> Result<T, SandboxError>
    where
        T: Send + 'static,
        F: FnOnce(SandboxConfig) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, SandboxError>> + 'static,
    {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SandboxError::Execution(anyhow!("sandbox semaphore closed")))?;

        let config = self.config.clone();
        let (tx, rx) = tokio::sync::oneshot::channel();

        std::thread::Builder::new()
            .name("doc-sandbox-realm".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        if tx.send(Err(SandboxError::Execution(e.into()))).is_err() {
                            tracing::warn!("sandbox result receiver dropped");
                        }
                        return;
                    }
                };
                let result = rt.block_on(job(config));
                if tx.send(result).is_err() {
                    tracing::warn!("sandbox result receiver dropped before result was sent");
                }
            })
            .map_err(|e| SandboxError::Execution(anyhow!("failed to spawn realm thread: {}", e)))?;

        rx.await
            .map_err(|_| SandboxError::Execution(anyhow!("realm thread panicked")))?
    }
}
