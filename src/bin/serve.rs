//! Voice clone and TTS HTTP server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use voicesvc::http::{router, AppState};
use voicesvc::{parse_device, ModelRegistry, RegistryConfig, ServiceDirs, VoiceService};

/// How often the stale-continuation sweep runs, and how old a continuation
/// file must be before it is considered orphaned.
const SWEEP_INTERVAL: Duration = Duration::from_secs(600);
const SWEEP_MAX_AGE: Duration = Duration::from_secs(3600);

#[derive(Debug, Parser)]
#[command(name = "voicesvc", about = "Voice clone, inference, and TTS services.")]
struct Args {
    /// Web server listener address
    #[arg(long, default_value = "127.0.0.1")]
    address: String,

    /// Web server port number
    #[arg(long, default_value_t = 8081)]
    port: u16,

    /// Computing device for AI workload: cpu, cuda[:N], metal, or auto
    #[arg(long, default_value = "auto")]
    ai_computing_device: String,

    /// Directory of static resources (model weights and text tokenizer)
    #[arg(long, default_value = "/tmp/voice_static_resource_dir")]
    static_resource_dir: PathBuf,

    /// Directory of incoming user voice samples
    #[arg(long, default_value = "/tmp/voice_sample_dir")]
    voice_sample_dir: PathBuf,

    /// Directory of constructed user voice models
    #[arg(long, default_value = "/tmp/voice_model_dir")]
    voice_model_dir: PathBuf,

    /// Directory of temporary voice models used during TTS
    #[arg(long, default_value = "/tmp/voice_temp_model_dir")]
    voice_temp_model_dir: PathBuf,

    /// Directory of TTS output files
    #[arg(long, default_value = "/tmp/voice_output_dir")]
    voice_output_dir: PathBuf,

    /// Concurrent model generations allowed (the device is shared)
    #[arg(long, default_value_t = 1)]
    max_concurrency: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    tracing::info!("initialising voice service");

    let device = parse_device(&args.ai_computing_device)
        .with_context(|| format!("invalid device {:?}", args.ai_computing_device))?;
    tracing::info!(device = ?device, "computing device selected");

    // Model acquisition is fatal: a server without models serves nothing.
    let registry = ModelRegistry::acquire(&RegistryConfig {
        device,
        static_resource_dir: args.static_resource_dir.clone(),
    })
    .context("model acquisition failed")?;

    let dirs = ServiceDirs {
        sample_dir: args.voice_sample_dir,
        model_dir: args.voice_model_dir,
        temp_model_dir: args.voice_temp_model_dir,
        output_dir: args.voice_output_dir,
    };
    let service = VoiceService::new(registry, dirs);
    let state = AppState::new(service, args.max_concurrency);

    // Continuations orphaned by a crash are reaped off the request path.
    let sweeper = state.service();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            match tokio::task::spawn_blocking({
                let sweeper = sweeper.clone();
                move || sweeper.sweep_stale_continuations(SWEEP_MAX_AGE)
            })
            .await
            {
                Ok(Ok(0)) => {}
                Ok(Ok(n)) => tracing::info!(removed = n, "stale continuation sweep"),
                Ok(Err(e)) => tracing::warn!(error = %e, "continuation sweep failed"),
                Err(e) => tracing::warn!(error = %e, "continuation sweep panicked"),
            }
        }
    });

    let app = router(state);
    let addr: SocketAddr = format!("{}:{}", args.address, args.port)
        .parse()
        .with_context(|| format!("invalid address {}:{}", args.address, args.port))?;
    tracing::info!("listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
