//! EchoGarden binary: loads config, opens storage, wires the watcher, job
//! workers, and tool registry, then serves the HTTP API. `tool list`/`tool
//! show` inspect the same registry without starting the server, for manual
//! debugging from a shell.

mod log_format;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;

use echogarden_config::{AppConfig, BackendMode};
use echogarden_core::queue::{JobQueue, QueueConfig};
use echogarden_core::retriever::FusionWeights;
use echogarden_core::storage::Storage;
use echogarden_core::tools::{ToolConfig, VisionMode, WhisperMode};
use echogarden_core::watcher::{Watcher, WatcherConfig};
use echogarden_core::{bootstrap, BootstrapConfig};
use echogarden_server::AppState;

#[derive(Parser, Debug)]
#[command(name = "echogarden")]
#[command(about = "EchoGarden — local-first personal knowledge system")]
struct Args {
    #[command(subcommand)]
    cmd: Option<Command>,

    /// Path to the SQLite database file (overrides EG_DB_PATH)
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// HTTP bind address (overrides EG_BIND_ADDR)
    #[arg(long, value_name = "ADDR")]
    bind_addr: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run the HTTP server, filesystem watcher, and job workers (default)
    Serve,
    /// List or show tool definitions
    Tool(ToolArgs),
}

#[derive(clap::Args, Debug, Clone)]
struct ToolArgs {
    #[command(subcommand)]
    sub: ToolCommand,
}

#[derive(Subcommand, Debug, Clone)]
enum ToolCommand {
    /// List every registered tool name
    List,
    /// Show one tool's input/output schema
    Show(ShowToolArgs),
}

#[derive(clap::Args, Debug, Clone)]
struct ShowToolArgs {
    /// Tool name (e.g. text_embed, weaver, verifier)
    name: String,
    /// Output format: yaml (default) or json
    #[arg(long, value_name = "FORMAT", default_value = "yaml")]
    output: String,
}

fn backend_mode_whisper(mode: BackendMode) -> WhisperMode {
    match mode {
        BackendMode::Local => WhisperMode::Local,
        BackendMode::Stub => WhisperMode::Stub,
    }
}

fn backend_mode_vision(mode: BackendMode) -> VisionMode {
    match mode {
        BackendMode::Local => VisionMode::Local,
        BackendMode::Stub => VisionMode::Stub,
    }
}

fn bootstrap_config(config: &AppConfig) -> BootstrapConfig {
    BootstrapConfig {
        tool_config: ToolConfig::new(
            config.llm_url.clone(),
            config.llm_model.clone(),
            backend_mode_whisper(config.whisper_mode),
            backend_mode_vision(config.vision_mode),
        ),
        fusion_weights: FusionWeights {
            semantic: config.fusion_weights.semantic,
            fts: config.fusion_weights.fts,
            graph: config.fusion_weights.graph,
            recency: config.fusion_weights.recency,
        },
        max_file_mb: config.max_file_mb,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    echogarden_config::load_and_apply(echogarden_config::DEFAULT_APP_NAME, None::<&std::path::Path>).ok();
    logging::init()?;

    let args = Args::parse();
    let mut config = AppConfig::from_env()?;
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }
    if let Some(bind_addr) = args.bind_addr {
        config.bind_addr = bind_addr;
    }

    let storage = Storage::open(&config.db_path).await?;
    let llm_configured = config.llm_url.is_some();
    let handles = bootstrap(storage.clone(), bootstrap_config(&config)).await;

    match args.cmd.unwrap_or(Command::Serve) {
        Command::Serve => run_serve(storage, config, llm_configured, handles).await,
        Command::Tool(ta) => run_tool_cmd(&handles.registry, &ta.sub).await,
    }
}

async fn run_serve(
    storage: Storage,
    config: AppConfig,
    llm_configured: bool,
    handles: echogarden_core::AppHandles,
) -> Result<(), Box<dyn std::error::Error>> {
    let watcher = Arc::new(Watcher::new(
        storage.clone(),
        WatcherConfig {
            watch_path: config.watch_path.clone(),
            poll_interval: std::time::Duration::from_secs(config.poll_interval_s),
            max_file_mb: config.max_file_mb,
        },
    ));
    watcher.clone().spawn();

    let jobs = JobQueue::new(storage.clone());
    echogarden_core::queue::spawn_workers(
        storage.clone(),
        handles.orchestrator.clone(),
        QueueConfig { max_attempts: config.max_job_attempts, ..QueueConfig::default() },
    );

    let state = Arc::new(AppState {
        storage,
        registry: handles.registry,
        graph: handles.graph,
        retriever: handles.retriever,
        qa: handles.qa,
        orchestrator: handles.orchestrator,
        vector_index: handles.vector_index,
        watcher,
        jobs,
        capture_api_key: config.capture_api_key.clone(),
        llm_configured,
    });

    echogarden_server::run_server(Some(&config.bind_addr), state).await?;
    Ok(())
}

async fn run_tool_cmd(
    registry: &echogarden_core::tools::ToolRegistryLocked,
    cmd: &ToolCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        ToolCommand::List => {
            for name in registry.names().await {
                println!("{name}");
            }
        }
        ToolCommand::Show(args) => {
            let spec = registry.get_schema(&args.name).await?;
            let value = json!({
                "name": spec.name,
                "description": spec.description,
                "input_schema": spec.input_schema,
                "output_schema": spec.output_schema,
            });
            let rendered = if args.output.eq_ignore_ascii_case("json") {
                serde_json::to_string_pretty(&value)?
            } else {
                serde_yaml::to_string(&value)?
            };
            println!("{rendered}");
        }
    }
    Ok(())
}
