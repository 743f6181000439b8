//! Entry point for the sandboxed agent process (§4.7). One invocation reads
//! exactly one [`nanoclaw::wire::ContainerInput`] from stdin, runs the
//! bounded function-calling loop, and writes exactly one framed
//! [`nanoclaw::wire::ContainerOutput`] to stdout (§6.1, §6.2).
//!
//! Tracing goes to stderr only — stdout is reserved for the framed JSON
//! block the host's container-runner parses (§4.4 "I/O contract": "the
//! child writes logs to stderr freely").

use nanoclaw::agent::turn::AgentConfig;
use nanoclaw::container::{MOUNT_GLOBAL, MOUNT_GROUP, MOUNT_IPC};
use nanoclaw::wire::{ContainerInput, ContainerOutput};
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[tokio::main]
async fn main() {
    init_tracing();

    let input = match read_input() {
        Ok(input) => input,
        Err(error) => {
            tracing::error!(%error, "failed to read ContainerInput from stdin");
            emit(ContainerOutput::error(format!("invalid stdin: {error}")));
            std::process::exit(1);
        }
    };

    let config = AgentConfig {
        gemini_api_key: std::env::var("GEMINI_API_KEY").unwrap_or_default(),
        gemini_model: std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
        group_dir: PathBuf::from(MOUNT_GROUP),
        ipc_dir: PathBuf::from(MOUNT_IPC),
        global_dir: PathBuf::from(MOUNT_GLOBAL),
    };

    let output = nanoclaw::agent::run_turn(input, config).await;
    emit(output);
}

fn read_input() -> std::io::Result<ContainerInput> {
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    serde_json::from_str(&buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Write the framed output to stdout (§6.2). A serialization failure here
/// is unreachable in practice (`ContainerOutput` is plain data) but falls
/// back to a hand-written error frame rather than panicking, since a panic
/// would leave stdout with no markers at all.
fn emit(output: ContainerOutput) {
    match output.to_framed_stdout() {
        Ok(framed) => print!("{framed}"),
        Err(error) => {
            tracing::error!(%error, "failed to serialize ContainerOutput");
            println!(
                "---NANOCLAW_OUTPUT_START---\n{{\"status\":\"error\",\"error\":\"serialization failure\"}}\n---NANOCLAW_OUTPUT_END---"
            );
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .compact();
    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}
