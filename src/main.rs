//! Conversar CLI - OpenAI-compatible chat completion server
//!
//! # Commands
//!
//! - `serve` - Start the HTTP server
//! - `info` - Show version, compiled backends and detected device

use std::sync::Arc;

use clap::{Parser, Subcommand};
use conversar::{
    api::{create_router, AppState},
    backend::{mock::MockLoader, ModelLoader},
    config::ServerConfig,
    device::ComputeDevice,
    error::{ConversarError, Result},
    manager::ModelManager,
};
use tracing_subscriber::EnvFilter;

/// Conversar - chat completions over local and hub-hosted models
#[derive(Parser)]
#[command(name = "conversar")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the inference server
    ///
    /// Examples:
    ///   conversar serve --preload TinyLlama/TinyLlama-1.1B-Chat-v1.0
    ///   conversar serve --demo --port 9000
    Serve(ServerConfig),
    /// Show version and configuration info
    Info {
        /// Skip accelerator probing
        #[arg(long)]
        cpu: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve(config) => serve(config).await,
        Commands::Info { cpu } => {
            print_info(cpu);
            Ok(())
        },
    };
    if let Err(e) = &result {
        tracing::error!(error = %e, "fatal");
    }
    result
}

fn print_info(force_cpu: bool) {
    let report = ComputeDevice::detect(force_cpu).report();

    println!("Conversar v{}", conversar::VERSION);
    println!("OpenAI-compatible chat completion server");
    println!();
    println!("Backends:");
    println!("  - mock (demo)");
    if cfg!(feature = "candle") {
        println!("  - candle (Llama safetensors / GGUF from the Hugging Face hub)");
    }
    println!();
    println!("Device: {}", report.device);
    println!("  accelerator: {}", report.accelerator);
    println!("  cpu threads: {}", report.cpu_threads);
    if !report.simd.is_empty() {
        println!("  simd: {}", report.simd.join(", "));
    }
}

fn build_loader(config: &ServerConfig) -> Result<Arc<dyn ModelLoader>> {
    if config.demo {
        tracing::info!("demo mode: serving the scripted mock backend");
        return Ok(Arc::new(MockLoader::new()));
    }
    hub_loader(config)
}

#[cfg(feature = "candle")]
fn hub_loader(config: &ServerConfig) -> Result<Arc<dyn ModelLoader>> {
    Ok(Arc::new(conversar::backend::candle::HubLoader::new(
        config.hub_config(),
    )))
}

#[cfg(not(feature = "candle"))]
fn hub_loader(_config: &ServerConfig) -> Result<Arc<dyn ModelLoader>> {
    Err(ConversarError::InvalidConfiguration(
        "built without the candle backend; use --demo".to_string(),
    ))
}

async fn serve(config: ServerConfig) -> Result<()> {
    config.validate()?;
    let addr = config.socket_addr()?;

    let device = if config.demo {
        ComputeDevice::cpu()
    } else {
        ComputeDevice::detect(config.cpu)
    };
    let manager = Arc::new(
        ModelManager::new(build_loader(&config)?, device)
            .with_default_quantization(config.quantization),
    );
    manager.initialize();

    for model in &config.preload {
        manager.load(model, config.quantization).await?;
    }

    let app = create_router(AppState::new(Arc::clone(&manager)));
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        ConversarError::InvalidConfiguration(format!("failed to bind {addr}: {e}"))
    })?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.cleanup()?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received, unloading models");
}
