use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use tokio::time::{Instant, sleep, timeout};
use tracing::{info, warn};

use usp_client::{
    AuthenticationType, Client, RecognitionStatus, ThreadService, UspConfig, UspError, UspEvent,
    UspSettings,
};

/// USP streaming speech recognition client
#[derive(Parser, Debug)]
#[command(name = "usp-client")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream a WAV file and print recognition results
    Stream {
        /// WAV file to upload
        #[arg(short = 'f', long = "file")]
        file: PathBuf,

        /// Bytes per audio write
        #[arg(long = "chunk-size", default_value_t = 3200)]
        chunk_size: usize,

        /// Delay between writes in milliseconds
        #[arg(long = "pace-ms", default_value_t = 0)]
        pace_ms: u64,

        /// Seconds to wait for results after the upload
        #[arg(long = "linger-secs", default_value_t = 10)]
        linger_secs: u64,
    },

    /// Check that an endpoint accepts the WebSocket handshake
    Probe {
        /// Endpoint URL (ws:// for loopback, wss:// otherwise)
        #[arg(short = 'u', long = "url")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let service = ThreadService::new()?;
    service.init()?;

    let result = match cli.command {
        Commands::Stream {
            file,
            chunk_size,
            pace_ms,
            linger_secs,
        } => {
            let settings = match &cli.config {
                Some(path) => UspSettings::from_file(path)?,
                None => UspSettings::from_env()?,
            };
            let config = settings.to_config()?;
            stream_file(
                &service,
                config,
                &file,
                chunk_size.max(1),
                Duration::from_millis(pace_ms),
                Duration::from_secs(linger_secs),
            )
            .await
        }
        Commands::Probe { url } => probe(&service, &url).await,
    };

    service.term().await;
    result
}

async fn stream_file(
    service: &ThreadService,
    config: UspConfig,
    path: &PathBuf,
    chunk_size: usize,
    pace: Duration,
    linger: Duration,
) -> anyhow::Result<()> {
    let reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file {}", path.display()))?;
    let spec = reader.spec();
    info!(
        "Streaming {} ({} Hz, {} channel(s), {} bits, {:.1}s)",
        path.display(),
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample,
        reader.duration() as f64 / spec.sample_rate as f64
    );
    drop(reader);

    // The service expects the RIFF header as part of the stream.
    let audio = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut connection = Client::new(config, service).connect()?;
    let mut events = connection.events()?;
    info!("Session {} -> {}", connection.session_id(), connection.endpoint().url);

    for chunk in audio.chunks(chunk_size) {
        connection.write_audio(chunk).await?;
        if !pace.is_zero() {
            sleep(pace).await;
        }
    }
    connection.flush_audio().await?;

    let deadline = Instant::now() + linger;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = match timeout(remaining, events.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) | Err(_) => break,
        };

        match event {
            UspEvent::Recognition(r) => match r.result.status {
                RecognitionStatus::Recognized => println!("{}", r.result.text),
                RecognitionStatus::IntermediateResult => info!("... {}", r.result.text),
                status => info!("Recognition ended with {:?}", status),
            },
            UspEvent::Error(e) => {
                warn!("{}", e);
                if e.is_fatal() {
                    break;
                }
            }
            UspEvent::TurnEnded { .. } => break,
            other => info!("{:?}", other),
        }
    }

    let stats = connection.stats();
    info!(
        "Sent {} of {} bytes in {} audio messages",
        stats.bytes_sent, stats.bytes_queued, stats.audio_messages_sent
    );
    connection.term().await;
    Ok(())
}

async fn probe(service: &ThreadService, url: &str) -> anyhow::Result<()> {
    let config = UspConfig::builder()
        .authentication(AuthenticationType::SubscriptionKey, "probe")
        .endpoint_url(url)
        .build()?;

    let mut connection = Client::new(config, service).connect()?;
    let mut events = connection.events()?;
    connection.write_audio(b"RIFF1234567890").await?;

    let outcome = timeout(Duration::from_secs(10), async {
        while let Some(event) = events.recv().await {
            if let UspEvent::Error(e) = event {
                return Some(e);
            }
        }
        None
    })
    .await;

    let state = connection.state();
    connection.term().await;

    match outcome {
        Ok(Some(e)) => Err(UspError::from(e).into()),
        _ => {
            println!("Handshake succeeded ({:?})", state);
            Ok(())
        }
    }
}
