use doc_sandbox::{HostValue, Sandbox, SandboxConfig, SandboxError, CONSOLE_TRUNCATED};
use serde_json::json;

fn sandbox() -> Sandbox {
    Sandbox::new(SandboxConfig::default())
}

#[tokio::test]
async fn test_default_function_is_called_with_args() {
    let result = sandbox()
        .evaluate_module(
            "export default function () { return 42; }",
            Some(vec![HostValue::object::<&str, _>([])]),
        )
        .await
        .unwrap();

    assert!(result.called);
    assert_eq!(result.call_result, Some(json!(42)));
}

#[tokio::test]
async fn test_default_object_is_returned_as_export() {
    let result = sandbox()
        .evaluate_module("export default { status: 'ok' };", None)
        .await
        .unwrap();

    assert!(!result.called);
    assert_eq!(result.call_result, None);
    assert_eq!(result.exports["default"], json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_default_function_without_args_is_not_called() {
    let result = sandbox()
        .evaluate_module("export default function render() { throw new Error('no'); }", None)
        .await
        .unwrap();

    assert!(!result.called);
    assert_eq!(result.exports["default"], json!("[Function: render]"));
}

#[tokio::test]
async fn test_named_const_exports() {
    let code = "export const title = 'Home';\nexport const helper = () => 1;\nexport default {};";
    let result = sandbox().evaluate_module(code, None).await.unwrap();

    assert_eq!(result.exports["title"], json!("Home"));
    assert_eq!(result.exports["helper"], json!("[Function: helper]"));
    assert_eq!(result.exports["default"], json!({}));
}

#[tokio::test]
async fn test_args_reach_default_export() {
    let code = "export default (ctx, extra) => ctx.page.title + ':' + extra;";
    let ctx: HostValue = json!({ "page": { "title": "About" } }).into();
    let result = sandbox()
        .evaluate_module(code, Some(vec![ctx, HostValue::from(7_i64)]))
        .await
        .unwrap();

    assert_eq!(result.call_result, Some(json!("About:7")));
}

#[tokio::test]
async fn test_undefined_return_is_null() {
    let result = sandbox()
        .evaluate_module("export default () => {};", Some(vec![]))
        .await
        .unwrap();

    assert!(result.called);
    assert_eq!(result.call_result, Some(json!(null)));
}

#[tokio::test]
async fn test_async_default_export_is_awaited() {
    let code = "export default async () => { await null; return [1, 2, 3]; };";
    let result = sandbox().evaluate_module(code, Some(vec![])).await.unwrap();
    assert_eq!(result.call_result, Some(json!([1, 2, 3])));
}

#[tokio::test]
async fn test_returned_date_is_iso_string() {
    let result = sandbox()
        .evaluate_module("export default () => new Date(0);", Some(vec![]))
        .await
        .unwrap();
    assert_eq!(result.call_result, Some(json!("1970-01-01T00:00:00.000Z")));
}

#[tokio::test]
async fn test_console_is_captured() {
    let code = "console.log('hi', { a: 1 });\nconsole.warn('careful');\nconsole.error('bad');\nexport default {};";
    let result = sandbox().evaluate_module(code, None).await.unwrap();

    assert_eq!(result.console.logs, vec![r#"hi {"a":1}"#.to_string()]);
    assert_eq!(result.console.warns, vec!["careful".to_string()]);
    assert_eq!(result.console.errors, vec!["bad".to_string()]);
}

#[tokio::test]
async fn test_console_capture_is_bounded() {
    let sandbox = Sandbox::new(SandboxConfig {
        max_heap_size: Some(16 * 1024 * 1024),
        max_output_size: 1024,
        ..Default::default()
    });
    let code = "for (let i = 0; i < 400; i++) console.log('x'.repeat(1e5));\nexport default {};";
    let result = sandbox.evaluate_module(code, None).await.unwrap();

    assert!(result.console.truncated);
    assert!(result.console.captured_bytes() <= 1024);
    assert_eq!(result.console.logs, vec![CONSOLE_TRUNCATED.to_string()]);
}

#[tokio::test]
async fn test_console_keeps_messages_until_the_limit() {
    let sandbox = Sandbox::new(SandboxConfig {
        max_output_size: 1024,
        ..Default::default()
    });
    let code = "for (let i = 0; i < 100; i++) console.log('y'.repeat(100));\nconsole.error('late');\nexport default {};";
    let result = sandbox.evaluate_module(code, None).await.unwrap();

    assert_eq!(result.console.logs.len(), 11);
    assert_eq!(result.console.logs.last().map(String::as_str), Some(CONSOLE_TRUNCATED));
    assert!(result.console.errors.is_empty());
    assert_eq!(result.console.captured_bytes(), 1000);
}

#[tokio::test]
async fn test_thrown_error_keeps_name_and_message() {
    let err = sandbox()
        .evaluate_module(
            "export default () => { throw new TypeError('bad input'); };",
            Some(vec![]),
        )
        .await
        .unwrap_err();

    match &err {
        SandboxError::Script { name, message, .. } => {
            assert_eq!(name, "TypeError");
            assert_eq!(message, "bad input");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.to_string(), "bad input");
}

#[tokio::test]
async fn test_stack_names_only_the_synthetic_script() {
    let code = "export default function () {\n  throw new Error('boom');\n}";
    let err = sandbox()
        .evaluate_module(code, Some(vec![]))
        .await
        .unwrap_err();

    let stack = err.stack().expect("script errors carry a stack");
    assert!(stack.starts_with("Error: boom"), "stack: {stack}");
    assert!(stack.contains("doc-module-"), "stack: {stack}");
    assert!(!stack.contains("/root/"), "stack: {stack}");
    assert!(!stack.contains("/home/"), "stack: {stack}");
    assert!(!stack.contains("doc-sandbox:bootstrap"), "stack: {stack}");
}

#[tokio::test]
async fn test_top_level_error_is_reported() {
    let err = sandbox()
        .evaluate_module("const x = null;\nx.y;\nexport default {};", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::Script { ref name, .. } if name == "TypeError"));
}

#[tokio::test]
async fn test_syntax_error_is_script_error() {
    let err = sandbox()
        .evaluate_module("export default function ( {", None)
        .await
        .unwrap_err();
    assert!(
        matches!(err, SandboxError::Script { ref name, .. } if name == "SyntaxError"),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn test_static_imports_are_rejected() {
    let err = sandbox()
        .evaluate_module("import fs from 'fs';\nexport default {};", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::Script { .. }));
}

#[tokio::test]
async fn test_unsettled_promise_is_an_error() {
    let err = sandbox()
        .evaluate_module("export default () => new Promise(() => {});", Some(vec![]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("did not settle"), "got: {err}");
}

#[tokio::test]
async fn test_evaluations_do_not_share_globals() {
    let sandbox = sandbox();
    sandbox
        .evaluate_module("globalThis.leak = 'secret';\nexport default {};", None)
        .await
        .unwrap();

    let result = sandbox
        .evaluate_module("export default () => typeof leak;", Some(vec![]))
        .await
        .unwrap();
    assert_eq!(result.call_result, Some(json!("undefined")));
}

#[tokio::test]
async fn test_builtin_prototypes_do_not_leak_between_calls() {
    let sandbox = sandbox();
    sandbox
        .evaluate_module("Array.prototype.evil = 1;\nexport default {};", None)
        .await
        .unwrap();

    let result = sandbox
        .evaluate_module("export default () => [].evil === undefined;", Some(vec![]))
        .await
        .unwrap();
    assert_eq!(result.call_result, Some(json!(true)));
}

#[tokio::test]
async fn test_concurrent_evaluations_are_bounded_but_complete() {
    let sandbox = Sandbox::new(SandboxConfig {
        max_concurrent: 2,
        ..Default::default()
    });

    let mut handles = Vec::new();
    for i in 0..6_i64 {
        let sandbox = sandbox.clone();
        handles.push(tokio::spawn(async move {
            sandbox
                .evaluate_module("export default (n) => n * 2;", Some(vec![HostValue::from(i)]))
                .await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.call_result, Some(json!(i as i64 * 2)));
    }
}
