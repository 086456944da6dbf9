use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use conversation_store::ConversationStore;
use lrm_relay::config::{EngineKind, RelayConfig};
use lrm_relay::{
    logging, ChildProcessBackend, ChildProcessConfig, DiffBuilder, Dispatcher, LoopController,
    RelayServer, ToolBackend,
};
use reasoning_engine::ReasoningEngine;
use reasoning_engine_mock::ScriptedEngine;
use reasoning_engine_responses::{ResponsesEngine, ResponsesEngineConfig};
use tokio::io::BufReader;

/// Serve the reasoning relay over JSON-RPC on stdio.
#[derive(Debug, Parser)]
#[command(name = "lrm-relay", version, about)]
struct Cli {
    /// Engine implementation: responses or mock.
    #[arg(long)]
    engine: Option<EngineKind>,

    /// Model identifier sent to the engine.
    #[arg(long)]
    model: Option<String>,

    /// Maximum engine calls per task.
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Directory holding conversation records.
    #[arg(long)]
    conversation_dir: Option<PathBuf>,

    /// Command line that starts the tool server.
    #[arg(long)]
    tool_server: Option<String>,

    /// Repository used for git diffs.
    #[arg(long, default_value = ".")]
    repo_dir: PathBuf,
}

impl Cli {
    fn apply(self, config: &mut RelayConfig) -> PathBuf {
        if let Some(engine) = self.engine {
            config.engine = engine;
        }
        if let Some(model) = self.model {
            config.model = model;
        }
        if let Some(max_iterations) = self.max_iterations {
            config.max_iterations = max_iterations;
        }
        if let Some(dir) = self.conversation_dir {
            config.conversation_dir = dir;
        }
        if let Some(command) = self.tool_server {
            config.tool_server_command = command;
        }
        self.repo_dir
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A subscriber installed by an embedding test harness is fine to keep.
    let _ = logging::init();

    let cli = Cli::parse();
    let mut config = RelayConfig::from_env().context("reading configuration")?;
    let repo_dir = cli.apply(&mut config);
    config.validate().context("validating configuration")?;

    let engine = build_engine(&config)?;
    let profile = engine.profile();
    tracing::info!(
        engine = %profile.engine_id,
        model = %profile.model_id,
        max_iterations = config.max_iterations,
        "starting relay"
    );

    let store = ConversationStore::open(&config.conversation_dir).with_context(|| {
        format!(
            "opening conversation store at {}",
            config.conversation_dir.display()
        )
    })?;

    let backend_config = ChildProcessConfig::from_command_line(&config.tool_server_command)
        .context("parsing tool server command")?
        .with_health_check_interval(config.health_check_interval);
    let backend = Arc::new(ChildProcessBackend::new(backend_config));

    let mut controller = LoopController::new(
        engine,
        Dispatcher::new(backend.clone()),
        Arc::new(store),
    )
    .with_max_iterations(config.max_iterations)
    .with_context_entries(config.context_entries)
    .with_reasoning_effort(config.reasoning_effort)
    .with_search_context_size(config.search_context_size)
    .with_diff_builder(DiffBuilder::new(repo_dir));
    if let Some(instructions) = &config.instructions {
        controller = controller.with_instructions(instructions.clone());
    }
    tracing::debug!(
        conversation_id = controller.session_conversation_id(),
        "session conversation"
    );

    let server = Arc::new(RelayServer::new(Arc::new(controller)));
    let serve = server.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout());

    let result = tokio::select! {
        result = serve => result.context("serving stdio"),
        () = shutdown_signal() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    };

    backend.shutdown().await;
    result
}

fn build_engine(config: &RelayConfig) -> Result<Arc<dyn ReasoningEngine>> {
    match config.engine {
        EngineKind::Mock => Ok(Arc::new(ScriptedEngine::default())),
        EngineKind::Responses => {
            let api_key = config
                .api_key
                .clone()
                .context("an API key is required for the responses engine")?;
            let mut engine_config = ResponsesEngineConfig::new(api_key, config.model.clone())
                .with_base_url(config.base_url.clone());
            if let Some(organization) = &config.organization {
                engine_config = engine_config.with_organization(organization.clone());
            }
            if let Some(project) = &config.project {
                engine_config = engine_config.with_project(project.clone());
            }
            if let Some(timeout) = config.timeout {
                engine_config = engine_config.with_timeout(timeout);
            }
            let engine =
                ResponsesEngine::new(engine_config).context("creating responses engine")?;
            Ok(Arc::new(engine))
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(error) => {
                tracing::warn!(%error, "cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
