use doc_sandbox::{HostValue, Sandbox, SandboxError};
use serde_json::json;

async fn render(source: &str, data: serde_json::Value) -> Result<String, SandboxError> {
    Sandbox::default().render_template(source, data.into()).await
}

#[tokio::test]
async fn test_output_tag() {
    let html = render("<h1><%= title %></h1>", json!({ "title": "Hello" }))
        .await
        .unwrap();
    assert_eq!(html, "<h1>Hello</h1>");
}

#[tokio::test]
async fn test_plain_text_passes_through() {
    let html = Sandbox::default()
        .render_template("just text\nwith `ticks` and ${braces}", HostValue::Null)
        .await
        .unwrap();
    assert_eq!(html, "just text\nwith `ticks` and ${braces}");
}

#[tokio::test]
async fn test_loops_and_escaping() {
    let source = "<ul><% for (const p of pages) { %><li><%- p %></li><% } %></ul>";
    let html = render(source, json!({ "pages": ["a", "<b>&\"'"] }))
        .await
        .unwrap();
    assert_eq!(html, "<ul><li>a</li><li>&lt;b&gt;&amp;&quot;&#39;</li></ul>");
}

#[tokio::test]
async fn test_null_and_undefined_output_nothing() {
    let html = render("[<%= nothing %>][<%= undefined %>]", json!({ "nothing": null }))
        .await
        .unwrap();
    assert_eq!(html, "[][]");
}

#[tokio::test]
async fn test_comments_emit_nothing() {
    let html = render("a<%# hidden %>b", json!({})).await.unwrap();
    assert_eq!(html, "ab");
}

#[tokio::test]
async fn test_raw_blocks_are_verbatim() {
    let html = render("<% const x = 1; %><%raw%><%= x %><%endraw%>", json!({}))
        .await
        .unwrap();
    assert_eq!(html, "<%= x %>");
}

#[tokio::test]
async fn test_await_host_function() {
    let data = HostValue::object([(
        "greet",
        HostValue::function(|args: Vec<HostValue>| async move {
            let name = args.first().and_then(HostValue::as_str).unwrap_or("?").to_string();
            Ok(HostValue::from(format!("Hi {}", name)))
        }),
    )]);

    let html = Sandbox::default()
        .render_template("<p><%= await greet('Ann') %></p>", data)
        .await
        .unwrap();
    assert_eq!(html, "<p>Hi Ann</p>");
}

#[tokio::test]
async fn test_data_keys_cannot_shadow_template_internals() {
    let html = render(
        "<%= a %>|<%- b %>",
        json!({ "a": "x", "b": "<y>", "__out": "", "__tpl": { "str": 1 } }),
    )
    .await
    .unwrap();
    assert_eq!(html, "x|&lt;y&gt;");
}

#[tokio::test]
async fn test_missing_variable_is_reference_error() {
    let err = render("<%= missing %>", json!({})).await.unwrap_err();
    match err {
        SandboxError::Script { name, message, stack } => {
            assert_eq!(name, "ReferenceError");
            assert_eq!(message, "missing is not defined");
            let stack = stack.unwrap_or_default();
            assert!(stack.contains("doc-template-"), "stack: {stack}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_template_cannot_reach_process() {
    let err = render("<%= this.constructor.constructor('return process')() %>", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "process is not defined");
}

#[tokio::test]
async fn test_non_object_data_is_rejected() {
    let err = Sandbox::default()
        .render_template("<%= 1 %>", HostValue::from("text"))
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::InvalidValue { .. }));
}

#[tokio::test]
async fn test_unclosed_tag_is_syntax_error() {
    let err = render("line one\n<%= title", json!({ "title": "x" }))
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::TemplateSyntax { line: 2, .. }));
}
