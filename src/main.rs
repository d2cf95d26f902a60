//! wasmrun CLI entry point.
//!
//! Loads configuration, connects the module cache, preloads modules, and
//! serves the HTTP API until shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use wasmrun_common::AppConfig;
use wasmrun_core::{ModuleInvoker, WasmEngine};
use wasmrun_loader::{LoaderOptions, ModuleBackend, ModuleLoader, RedisCache};
use wasmrun_server::{AppState, WasmrunServer};

/// Compute-on-demand WebAssembly execution service.
#[derive(Debug, Parser)]
#[command(name = "wasmrun", version, about)]
struct Args {
    /// Configuration file (YAML, TOML or JSON). Optional on disk.
    #[arg(long, env = "WASMRUN_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Log output format.
    #[arg(long, env = "WASMRUN_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,wasmrun=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!(config = %args.config.display(), "Starting wasmrun");

    let config = AppConfig::load(Some(&args.config)).context("failed to load configuration")?;
    let backend_config = config
        .loader
        .backend_config()
        .context("invalid module backend configuration")?;
    let backend =
        ModuleBackend::from_config(&backend_config).context("failed to build module backend")?;

    let cache = RedisCache::connect(&config.cache)
        .await
        .context("failed to connect to module cache")?;

    let engine = Arc::new(
        WasmEngine::new(&config.runtime.engine).context("failed to create execution engine")?,
    );
    let _ticker = engine
        .start_epoch_ticker()
        .context("failed to start epoch ticker")?;

    let loader = Arc::new(ModuleLoader::new(
        Arc::new(cache),
        backend,
        LoaderOptions::from(&config.loader),
    ));

    if config.loader.preload {
        if let Some(directory) = &config.loader.module_directory {
            let count = loader
                .preload(directory)
                .await
                .context("failed to preload modules")?;
            info!(count, directory = %directory.display(), "Preload complete");
        }
    }

    let invoker = Arc::new(ModuleInvoker::new(
        Arc::clone(&engine),
        config.runtime.execution.clone(),
    ));

    info!("Server initialized. Available endpoints:");
    info!("  POST /invoke  - Run a module");
    info!("  GET  /health  - Health check");
    info!("  GET  /ready   - Readiness check");

    WasmrunServer::new(AppState::new(loader, invoker), config.server.clone())
        .run()
        .await
        .context("server error")?;

    Ok(())
}
