use std::io::{self, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tool_server::rpc::serve_lines;
use tool_server::tools::BuiltinToolExecutor;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Serve file and shell tools over line-delimited JSON-RPC on stdio.
#[derive(Debug, Parser)]
#[command(name = "lrm-tool-server", version)]
struct Cli {
    /// Directory that relative paths and bash commands resolve against.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Default bash timeout in seconds.
    #[arg(long, default_value_t = 120)]
    bash_timeout_secs: u64,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut executor = BuiltinToolExecutor::new(&cli.root)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("invalid --root {}", cli.root.display()))?
        .with_default_bash_timeout_sec(cli.bash_timeout_secs);
    tracing::info!(root = %executor.root().display(), "tool server ready");

    let stdin = io::stdin();
    let stdout = io::stdout();
    serve_lines(BufReader::new(stdin.lock()), stdout.lock(), |request| {
        tool_server::handle_request(&mut executor, request)
    })
    .context("stdio channel failed")?;

    tracing::info!("stdin closed; exiting");
    Ok(())
}

// stdout carries the protocol, so diagnostics go to stderr.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).compact())
        .init();
}
