use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use carepath_core::config::AppConfig;
use carepath_core::error::CarepathError;
use carepath_core::event::EventBus;
use carepath_core::traits::GraphRepository;
use carepath_core::types::EngineEvent;
use carepath_engine::InstructionController;
use carepath_store::MemoryGraph;

#[derive(Parser)]
#[command(name = "carepath", version, about = "Care-guidance instruction graph engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "carepath.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an interactive guidance session over a graph fixture
    Run {
        /// TOML graph fixture to load
        #[arg(long)]
        graph: PathBuf,
        /// Task to auto-navigate to before handing over control
        #[arg(long)]
        target: Option<String>,
    },
    /// Show the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = match AppConfig::load(&cli.config) {
        Ok(config) => config,
        Err(CarepathError::ConfigNotFound(_)) => {
            info!(path = %cli.config.display(), "No config file, using defaults");
            AppConfig::default()
        }
        Err(e) => return Err(e).context("loading configuration"),
    };

    match cli.command {
        Commands::Run { graph, target } => run_session(config, &graph, target).await,
        Commands::Config => show_config(&config),
    }
}

async fn run_session(
    config: AppConfig,
    graph_path: &Path,
    target: Option<String>,
) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(graph_path)
        .with_context(|| format!("reading graph fixture {}", graph_path.display()))?;
    let repo: Arc<dyn GraphRepository> = Arc::new(MemoryGraph::load_toml(&text)?);

    let (order_oracle, enrichment_oracle) = match config.oracle {
        Some(oracle_config) => {
            let (order, enrichment) = carepath_oracle::build_oracles(oracle_config);
            (Some(order), Some(enrichment))
        }
        None => {
            info!("No oracle configured: deterministic ordering, raw task text");
            (None, None)
        }
    };

    let events = Arc::new(EventBus::new(config.engine.event_capacity));
    let controller = InstructionController::new(
        repo,
        order_oracle,
        enrichment_oracle,
        Arc::clone(&events),
        &config.engine,
    );

    let mut rx = events.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            print_event(&event);
        }
    });

    controller.start(target);
    println!("commands: advance | detail | reset | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => {}
            "quit" | "exit" => break,
            "advance" => controller.forward("advance"),
            "detail" => controller.forward("showDetail"),
            "reset" => controller.forward("resetToStart"),
            other => warn!(command = other, "Unknown command"),
        }
        if !controller.is_running() {
            break;
        }
    }

    controller.stop();
    printer.abort();
    Ok(())
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::StateChanged(info) => {
            println!();
            println!("── {} ──", info.title);
            println!("{}", info.description);
            if !info.detail_instruction.is_empty() {
                println!("{}", info.detail_instruction);
            }
            if !info.call_to_action.is_empty() {
                println!("→ {}", info.call_to_action);
            }
            let mut hints = Vec::new();
            if info.has_detail {
                hints.push("detail");
            }
            if info.has_next {
                hints.push("advance");
            }
            println!("[{}]", hints.join(" | "));
        }
        EngineEvent::DetailFinished => println!("(all steps here are done)"),
        EngineEvent::FlowFinished => println!("(guidance flow finished)"),
    }
}

fn show_config(config: &AppConfig) -> anyhow::Result<()> {
    let mut shown = config.clone();
    if let Some(oracle) = &mut shown.oracle {
        if oracle.api_key.is_some() {
            oracle.api_key = Some("<redacted>".into());
        }
    }
    println!("{}", toml::to_string_pretty(&shown)?);
    Ok(())
}
