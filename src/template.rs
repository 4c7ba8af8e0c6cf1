//! Template compiler and evaluator.
//!
//! Tags:
//! - `<% code %>` runs statements, emits nothing
//! - `<%= expr %>` emits the string form of `expr` (`null`/`undefined` emit nothing)
//! - `<%- expr %>` emits `expr` HTML-escaped
//! - `<%# text %>` is a comment
//! - `<%raw%> ... <%endraw%>` emits its interior verbatim
//!
//! Expressions run inside an async function, so `await` works in any tag.

use crate::deadline::Deadline;
use crate::detect::{split_raw_blocks, Chunk, CLOSE_TAG, OPEN_TAG};
use crate::error::SandboxError;
use crate::runtime::{create_realm, RealmSetup, SandboxConfig};
use crate::sanitize::CallbackRegistry;
use crate::value::HostValue;
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
struct TemplateOutcome {
    text: String,
}

/// Emits compiled statements while keeping template line numbers.
///
/// Control tags need a trailing newline to terminate their statement; that
/// newline is owed back by the next run of literal text.
struct Compiler<'a> {
    source: &'a str,
    body: String,
    owed_newlines: usize,
}

impl<'a> Compiler<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            body: String::new(),
            owed_newlines: 0,
        }
    }

    fn line_at(&self, offset: usize) -> usize {
        self.source[..offset].matches('\n').count() + 1
    }

    fn newlines(&mut self, count: usize) {
        let repaid = count.min(self.owed_newlines);
        self.owed_newlines -= repaid;
        for _ in repaid..count {
            self.body.push('\n');
        }
    }

    fn text(&mut self, text: &str) -> Result<(), SandboxError> {
        if !text.is_empty() {
            self.body.push_str("__out += ");
            self.body.push_str(&serde_json::to_string(text)?);
            self.body.push(';');
        }
        self.newlines(text.matches('\n').count());
        Ok(())
    }

    fn code(&mut self, text: &str, offset: usize) -> Result<(), SandboxError> {
        let mut rest = text;
        let mut pos = offset;

        while let Some(start) = rest.find(OPEN_TAG) {
            self.text(&rest[..start])?;

            let tag_offset = pos + start;
            let after = &rest[start + OPEN_TAG.len()..];
            let end = after.find(CLOSE_TAG).ok_or_else(|| SandboxError::TemplateSyntax {
                line: self.line_at(tag_offset),
                reason: format!("unclosed tag, expected `{}`", CLOSE_TAG),
            })?;
            self.tag(&after[..end], tag_offset)?;

            let consumed = start + OPEN_TAG.len() + end + CLOSE_TAG.len();
            rest = &rest[consumed..];
            pos += consumed;
        }

        self.text(rest)
    }

    fn tag(&mut self, inner: &str, offset: usize) -> Result<(), SandboxError> {
        match inner.chars().next() {
            Some('=') => self.output(&inner[1..], "str", offset),
            Some('-') => self.output(&inner[1..], "escape", offset),
            Some('#') => {
                self.newlines(inner.matches('\n').count());
                Ok(())
            }
            _ => {
                self.body.push_str(inner);
                self.body.push('\n');
                self.owed_newlines += 1;
                Ok(())
            }
        }
    }

    fn output(&mut self, expr: &str, helper: &str, offset: usize) -> Result<(), SandboxError> {
        if expr.trim().is_empty() {
            return Err(SandboxError::TemplateSyntax {
                line: self.line_at(offset),
                reason: "empty output tag".into(),
            });
        }
        self.body
            .push_str(&format!("__out += __tpl.{helper}(({expr}));"));
        Ok(())
    }
}

/// Compile a template into an async function expression taking the
/// `{data, str, escape}` helper object and resolving to the rendered text.
pub fn compile_template(source: &str) -> Result<String, SandboxError> {
    let mut compiler = Compiler::new(source);

    for chunk in split_raw_blocks(source) {
        match chunk {
            Chunk::Raw { text, .. } => compiler.text(text)?,
            Chunk::Code { text, offset } => compiler.code(text, offset)?,
        }
    }

    Ok(format!(
        "async function (__tpl) {{ let __out = \"\"; with (__tpl.data) {{ {}\n}} return __out; }}",
        compiler.body
    ))
}

/// Render `source` against `data` in a fresh realm.
///
/// `data` must be an object (or null for none). Its keys are in scope as
/// plain names inside tags; functions in it become awaitable bridge stubs.
/// Keys named after the compiled function's own locals (`__out`, `__tpl`)
/// are not visible as names.
pub async fn render_template(
    config: &SandboxConfig,
    source: &str,
    data: HostValue,
    budget: Duration,
) -> Result<String, SandboxError> {
    config.check_code_size(source)?;

    let data = match data {
        HostValue::Null => HostValue::Object(Default::default()),
        object @ HostValue::Object(_) => object,
        _ => {
            return Err(SandboxError::InvalidValue {
                reason: "template data must be an object".into(),
            })
        }
    };

    let compiled = compile_template(source)?;

    let mut registry = CallbackRegistry::new();
    let payload = serde_json::to_string(&registry.envelope(&data)?)?;

    let filename = format!("doc-template-{}.js", uuid::Uuid::new_v4());
    tracing::debug!(script = %filename, callbacks = registry.len(), "creating template realm");

    let mut realm = create_realm(
        config,
        RealmSetup {
            filename: filename.clone(),
            payload,
            registry,
        },
    )?;

    let script = format!("__sandbox_run(\"template\", {compiled});\n//# sourceURL={filename}\n");

    let value = realm
        .run_with_deadline(script, Deadline::after(budget))
        .await?;
    let outcome: TemplateOutcome = serde_json::from_value(value)?;
    Ok(outcome.text)
}
