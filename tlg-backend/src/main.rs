//! Task list generator backend - command line entry point
//!
//! ```text
//! tlg-backend flaws
//! tlg-backend --dataset data.json query --lang de --query "Physics; +Living people" --flaws ALL
//! tlg-backend --dataset data.json serve --bind 127.0.0.1:5790
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tlg_backend::collaborators::Collaborators;
use tlg_backend::filters::FilterRegistry;
use tlg_backend::fixture::FixtureBackend;
use tlg_backend::{build_router, AppState, EngineConfig, Orchestrator, RunRequest};
use tlg_common::config::{self, CliOverrides, Settings};
use tlg_common::TlgEvent;

/// Command-line arguments for tlg-backend
#[derive(Parser, Debug)]
#[command(name = "tlg-backend")]
#[command(about = "Task list generator: find flawed pages in wiki categories")]
#[command(version)]
struct Args {
    /// JSON dataset served by the built-in fixture backend
    #[arg(long, global = true)]
    dataset: Option<PathBuf>,

    /// Worker threads per query run
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the available flaw filters as JSON
    Flaws,

    /// Run one query and print its events as JSON lines
    Query {
        /// Wiki language code
        #[arg(long, default_value = "de")]
        lang: String,

        /// Query string, e.g. "Physics; +Living people; -title#Foo"
        #[arg(long)]
        query: String,

        /// Category search depth
        #[arg(long)]
        depth: Option<u32>,

        /// Whitespace-separated filter names, or ALL
        #[arg(long, default_value = "ALL")]
        flaws: String,
    },

    /// Serve the HTTP API
    Serve {
        /// Address to listen on
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = config::locate_config_file();
    let toml_config = config::load_or_default();
    let depth_override = match &args.command {
        Command::Query { depth, .. } => *depth,
        _ => None,
    };
    let bind_override = match &args.command {
        Command::Serve { bind } => bind.clone(),
        _ => None,
    };
    let settings = Settings::resolve(
        &CliOverrides {
            worker_threads: args.threads,
            default_depth: depth_override,
            dataset: args.dataset.clone(),
            bind_addr: bind_override,
        },
        &toml_config,
    );

    // Logs go to stderr; stdout carries the event stream
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "tlg_backend={level},tlg_common={level},tlg::stats={level},tower_http=info",
                    level = settings.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting tlg-backend v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        info!("Config file: {}", path.display());
    }

    let registry = Arc::new(FilterRegistry::with_builtin());

    match args.command {
        Command::Flaws => {
            let listing = serde_json::to_string_pretty(&registry.describe_json())?;
            println!("{}", listing);
            Ok(())
        }
        Command::Query {
            lang, query, flaws, ..
        } => {
            let orchestrator = build_orchestrator(&settings, registry)?;
            let request = RunRequest {
                lang,
                query,
                depth: settings.default_depth,
                flaws,
            };
            tokio::task::spawn_blocking(move || print_run(&orchestrator, request))
                .await
                .context("Query run panicked")?
        }
        Command::Serve { .. } => {
            let orchestrator = build_orchestrator(&settings, registry)?;
            let app = build_router(AppState::new(Arc::new(orchestrator), settings.default_depth));

            let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
                .await
                .with_context(|| format!("Failed to bind {}", settings.bind_addr))?;
            info!("tlg-backend listening on http://{}", settings.bind_addr);
            info!("Health check: http://{}/health", settings.bind_addr);

            axum::serve(listener, app).await?;
            Ok(())
        }
    }
}

fn build_orchestrator(settings: &Settings, registry: Arc<FilterRegistry>) -> Result<Orchestrator> {
    let Some(dataset) = &settings.dataset else {
        bail!("No dataset configured (use --dataset, TLG_DATASET or the config file)");
    };
    let backend = FixtureBackend::load(dataset)
        .with_context(|| format!("Failed to load dataset {}", dataset.display()))?;
    info!("Wikis available: {}", backend.wiki_names().join(", "));

    let engine_config = EngineConfig {
        worker_threads: settings.worker_threads,
        ..EngineConfig::default()
    };
    Ok(Orchestrator::new(
        Collaborators::from_backend(Arc::new(backend)),
        registry,
        engine_config,
    ))
}

/// Write every event of a run to stdout; fails if the run ended in an error
fn print_run(orchestrator: &Orchestrator, request: RunRequest) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut failure = None;

    for event in orchestrator.run(request) {
        writeln!(out, "{}", event.to_json_line()?)?;
        if let TlgEvent::Error(message) = event {
            failure = Some(message);
        }
    }
    out.flush()?;

    match failure {
        Some(message) => {
            warn!("Query run failed");
            Err(anyhow!(message))
        }
        None => Ok(()),
    }
}
