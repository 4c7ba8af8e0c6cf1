//! Doc Sandbox CLI
//!
//! Single-shot mode:
//!   doc-sandbox [options] module <file> [call-args-json]
//!   doc-sandbox [options] template <file> [data-json]
//!   doc-sandbox detect <file>
//!
//! Server mode (persistent process, reads from stdin):
//!   doc-sandbox [options] --server
//!
//! Options:
//!   --timeout-ms <n>    wall-clock budget per evaluation (default 5000)
//!   --max-heap-mb <n>   heap limit per realm (default 64)
//!
//! Protocol (server mode):
//!   Request (stdin):
//!     template
//!     {"source":"<h1><%- title %></h1>","input":{"title":"Hi"}}
//!
//!   Response (stdout):
//!     Status:Ok
//!     Length:13
//!
//!     <h1>Hi</h1>
//!
//!   Error response:
//!     Status:Error
//!     Length:26
//!
//!     Script execution timed out

use anyhow::{anyhow, bail, Result};
use doc_sandbox::{has_embedded_code, HostValue, Sandbox, SandboxConfig};
use serde::Deserialize;
use serde_json::Value;
use std::io::{BufRead, Write};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn print_usage() {
    eprintln!("Doc Sandbox - isolated evaluation of document modules and templates");
    eprintln!();
    eprintln!("Single-shot mode:");
    eprintln!("  doc-sandbox [options] module <file> [call-args-json]");
    eprintln!("  doc-sandbox [options] template <file> [data-json]");
    eprintln!("  doc-sandbox detect <file>");
    eprintln!();
    eprintln!("Server mode (persistent process):");
    eprintln!("  doc-sandbox [options] --server");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --timeout-ms <n>    per-evaluation budget in milliseconds (default 5000)");
    eprintln!("  --max-heap-mb <n>   heap limit per realm in MiB (default 64)");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  doc-sandbox module ./page.js '[{{\"path\":\"/\"}}]'");
    eprintln!("  doc-sandbox --timeout-ms 1000 template ./page.html '{{\"title\":\"Home\"}}'");
}

/// Which evaluator a request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Module,
    Template,
    Detect,
}

impl Mode {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "module" => Ok(Mode::Module),
            "template" => Ok(Mode::Template),
            "detect" => Ok(Mode::Detect),
            other => Err(anyhow!("Unknown mode '{}'", other)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Request {
    source: String,
    #[serde(default)]
    input: Option<Value>,
}

/// Split leading `--flag value` options off `args`, returning the config and
/// the remaining positional arguments.
fn parse_options(args: &[String]) -> Result<(SandboxConfig, bool, Vec<String>)> {
    let mut config = SandboxConfig::default();
    let mut server = false;
    let mut rest = Vec::new();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--server" => server = true,
            "--timeout-ms" => {
                let value = iter.next().ok_or_else(|| anyhow!("--timeout-ms needs a value"))?;
                let ms: u64 = value
                    .parse()
                    .map_err(|e| anyhow!("Invalid --timeout-ms '{}': {}", value, e))?;
                config.timeout = Duration::from_millis(ms);
            }
            "--max-heap-mb" => {
                let value = iter.next().ok_or_else(|| anyhow!("--max-heap-mb needs a value"))?;
                let mb: usize = value
                    .parse()
                    .map_err(|e| anyhow!("Invalid --max-heap-mb '{}': {}", value, e))?;
                config.max_heap_size = Some(mb * 1024 * 1024);
            }
            _ => rest.push(arg.clone()),
        }
    }

    Ok((config, server, rest))
}

/// Run one request and produce the response body.
async fn handle(sandbox: &Sandbox, mode: Mode, source: &str, input: Option<Value>) -> Result<String> {
    match mode {
        Mode::Detect => Ok(has_embedded_code(source).to_string()),
        Mode::Module => {
            let call_args = match input {
                None | Some(Value::Null) => None,
                Some(Value::Array(items)) => Some(items.into_iter().map(HostValue::from).collect()),
                Some(_) => bail!("Call arguments must be a JSON array"),
            };
            let result = sandbox.evaluate_module(source, call_args).await?;
            log_console(&result.console);
            Ok(serde_json::to_string(&result)?)
        }
        Mode::Template => {
            let data = input.map_or(HostValue::Null, HostValue::from);
            Ok(sandbox.render_template(source, data).await?)
        }
    }
}

fn log_console(console: &doc_sandbox::ConsoleOutput) {
    for log in &console.logs {
        eprintln!("[LOG] {}", log);
    }
    for warn in &console.warns {
        eprintln!("[WARN] {}", warn);
    }
    for err in &console.errors {
        eprintln!("[ERROR] {}", err);
    }
}

async fn run_single_shot(config: SandboxConfig, args: &[String]) -> Result<()> {
    let (mode, file) = match args {
        [mode, file, ..] => (Mode::parse(mode)?, file),
        _ => {
            print_usage();
            bail!("Missing required arguments");
        }
    };

    let source = std::fs::read_to_string(file).map_err(|e| anyhow!("Cannot read {}: {}", file, e))?;
    let input = args
        .get(2)
        .map(|json| serde_json::from_str::<Value>(json))
        .transpose()
        .map_err(|e| anyhow!("Invalid input JSON: {}", e))?;

    let sandbox = Sandbox::new(config);
    let body = handle(&sandbox, mode, &source, input).await?;
    println!("{}", body);
    Ok(())
}

async fn run_server(config: SandboxConfig) -> Result<()> {
    let sandbox = Sandbox::new(config);

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut reader = stdin.lock();

    tracing::info!(
        timeout_ms = sandbox.config().timeout.as_millis() as u64,
        max_concurrent = sandbox.config().max_concurrent,
        "server ready, reading from stdin"
    );

    loop {
        let mut mode_line = String::new();
        let mut request_line = String::new();

        if reader.read_line(&mut mode_line)? == 0 {
            break;
        }
        reader.read_line(&mut request_line)?;

        let mode = match Mode::parse(mode_line.trim()) {
            Ok(mode) => mode,
            Err(e) => {
                write_response(&mut stdout, false, &e.to_string())?;
                continue;
            }
        };

        let request: Request = match serde_json::from_str(request_line.trim()) {
            Ok(request) => request,
            Err(e) => {
                write_response(&mut stdout, false, &format!("Invalid request JSON: {}", e))?;
                continue;
            }
        };

        match handle(&sandbox, mode, &request.source, request.input).await {
            Ok(body) => write_response(&mut stdout, true, &body)?,
            Err(e) => write_response(&mut stdout, false, &e.to_string())?,
        }
    }

    tracing::info!("server shutting down");
    Ok(())
}

/// Write response in length-prefixed protocol
fn write_response(stdout: &mut std::io::Stdout, ok: bool, body: &str) -> Result<()> {
    let status = if ok { "Ok" } else { "Error" };

    writeln!(stdout, "Status:{}", status)?;
    writeln!(stdout, "Length:{}", body.len())?;
    writeln!(stdout)?;
    write!(stdout, "{}", body)?;
    stdout.flush()?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        print_usage();
        bail!("Missing required arguments");
    }

    let (config, server, rest) = parse_options(&args)?;
    if server {
        return run_server(config).await;
    }
    run_single_shot(config, &rest).await
}
