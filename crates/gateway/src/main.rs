use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use aiop_domain::{default_registry, Config, ConfigSeverity};
use aiop_gateway::cli::{Cli, Command, ConfigCommand};
use aiop_gateway::state::AppState;
use aiop_gateway::{api, cli};
use aiop_inference::{Inference, OllamaInference};
use aiop_store::{EventLog, PgStore, Store};
use aiop_worker::patch_apply::GitPatchApplier;
use aiop_worker::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = Cli::parse();

    match parsed.command {
        // Default to serve when no subcommand is given, matching this
        // crate's existing `None | Some(Command::Serve)` idiom.
        None | Some(Command::Serve) => {
            init_tracing();
            run_server(Arc::new(Config::from_env())).await
        }
        Some(Command::Worker) => {
            init_tracing();
            run_worker(Arc::new(Config::from_env())).await
        }
        Some(Command::Config { command: ConfigCommand::Show }) => {
            cli::config::show(&Config::from_env());
            Ok(())
        }
        Some(Command::Config { command: ConfigCommand::Validate }) => {
            if !cli::config::validate(&Config::from_env()) {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,aiop_gateway=debug")))
        .json()
        .init();
}

fn fail_on_config_errors(config: &Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }
    Ok(())
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("aiop orchestrator starting");
    fail_on_config_errors(&config)?;

    let pg_store = PgStore::connect(config.database_url()?, config.expected_embed_dim)
        .await
        .context("connecting to store")?;
    pg_store.migrate().await.context("running migrations")?;
    let store: Arc<dyn Store> = Arc::new(pg_store);

    let events = Arc::new(EventLog::new(store.clone()));
    let inference: Arc<dyn Inference> = Arc::new(OllamaInference::new(
        config.ollama_url.clone(),
        config.embed_model.clone(),
        config.chat_model.clone(),
        config.expected_embed_dim,
    ));

    let state = AppState { config: config.clone(), store, events, inference, tools: default_registry() };
    let app = api::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "aiop orchestrator listening");
    axum::serve(listener, app).await.context("axum server error")?;
    Ok(())
}

async fn run_worker(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("aiop worker starting");
    fail_on_config_errors(&config)?;

    let pg_store = PgStore::connect(config.database_url()?, config.expected_embed_dim)
        .await
        .context("connecting to store")?;
    let store: Arc<dyn Store> = Arc::new(pg_store);

    let worker = Worker::new(store, default_registry(), Arc::new(GitPatchApplier), config.worker_poll_s, config.worker_lock_s);
    tracing::info!(worker_id = worker.worker_id(), "worker ready");

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    worker.run_forever(cancel).await;
    Ok(())
}
