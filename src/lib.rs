//! # Doc Sandbox
//!
//! Sandboxed evaluation of author-supplied document code using deno_core:
//! server-side modules (`export default function (ctx) {...}`) and embedded
//! templates (`<%= title %>`).
//!
//! ## Security Guarantees
//!
//! - **Fresh realm per call**: every evaluation gets its own V8 isolate, so
//!   prototype-chain pivots (`x.constructor.constructor("return process")()`)
//!   only reach the realm's own `Function`
//! - **No ambient capabilities**: `process`, `require`, `Deno`, fs, net and
//!   module loading don't exist; using them is an ordinary `ReferenceError`
//! - **Opaque host callbacks**: host functions cross as `{ref: id}` markers
//!   resolved through a per-call registry, never as live closures
//! - **Deadline**: a watchdog terminates the isolate, even mid-loop
//! - **Clean stacks**: traces only name the synthetic script, never host paths
//!
//! ## Usage
//!
//! ```rust,ignore
//! use doc_sandbox::{HostValue, Sandbox, SandboxConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let sandbox = Sandbox::new(SandboxConfig::default());
//!
//!     let ctx = HostValue::object([(
//!         "getPage",
//!         HostValue::function(|args| async move {
//!             Ok(HostValue::object([("title", HostValue::from("Home"))]))
//!         }),
//!     )]);
//!
//!     let result = sandbox
//!         .evaluate_module(
//!             "export default async ({ getPage }) => (await getPage('/')).title",
//!             Some(vec![ctx]),
//!         )
//!         .await
//!         .unwrap();
//!     assert_eq!(result.call_result, Some("Home".into()));
//!
//!     let html = sandbox
//!         .render_template("<h1><%- title %></h1>", serde_json::json!({"title": "Hi"}).into())
//!         .await
//!         .unwrap();
//!     println!("{}", html);
//! }
//! ```

mod deadline;
mod detect;
mod error;
mod loader;
mod module;
mod ops;
mod runtime;
mod sandbox;
mod sanitize;
mod template;
mod transform;
mod value;

pub use deadline::Deadline;
pub use detect::has_embedded_code;
pub use error::{SandboxError, TIMEOUT_MESSAGE};
pub use module::EvaluationResult;
pub use ops::{ConsoleOutput, CONSOLE_TRUNCATED};
pub use runtime::{filter_stack, SandboxConfig};
pub use sandbox::Sandbox;
pub use sanitize::{sanitize, BridgeEnvelope, CallbackRegistry, Sanitized};
pub use template::compile_template;
pub use transform::transform_module;
pub use value::{HostFn, HostFunction, HostValue};
