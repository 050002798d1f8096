use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use parking_lot::RwLock as SyncRwLock;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use streamscribe::config::AppConfig;
use streamscribe::core::session::SessionRotator;
use streamscribe::core::soniox::{StaticCredentialProvider, TranslationStatus};
use streamscribe::core::transcript::{TranscriptAssembler, TranscriptUpdate};

/// How long to wait for the upstream finished signal after finalize before
/// force-closing. Upstream does not guarantee a terminal signal, so the
/// caller owns this bound.
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(15);

/// Frame cadence for paced file playback
const FRAME_INTERVAL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Handle CLI arguments
    let mut args = env::args();
    let _ = args.next();
    let audio_path = match args.next() {
        Some(path) => PathBuf::from(path),
        None => anyhow::bail!("Usage: streamscribe <audio.pcm> (raw signed 16-bit little-endian)"),
    };
    if let Some(extra) = args.next() {
        anyhow::bail!("Unexpected argument '{extra}'");
    }

    // Load configuration
    let config = AppConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;
    let api_key = config.api_key().map_err(|e| anyhow!(e))?;
    let provider = Arc::new(StaticCredentialProvider::new(api_key));

    let rotator = SessionRotator::for_soniox(
        config.stream_config(),
        provider,
        config.rotation_policy(),
    );

    // Accumulate tokens into a transcript and print committed lines
    let assembler = Arc::new(SyncRwLock::new(TranscriptAssembler::new()));
    let sink = assembler.clone();
    rotator.on_result(Arc::new(move |tokens| {
        let sink = sink.clone();
        Box::pin(async move {
            let updates = sink.write().ingest(&tokens);
            for update in updates {
                render_update(&update);
            }
        })
    }));

    rotator.on_error(Arc::new(|stream_error| {
        Box::pin(async move {
            error!("Session error: {stream_error}");
        })
    }));

    let finished = Arc::new(Notify::new());
    let finished_signal = finished.clone();
    rotator.on_finished(Arc::new(move || {
        let finished_signal = finished_signal.clone();
        Box::pin(async move {
            finished_signal.notify_one();
        })
    }));

    rotator.on_progress(Arc::new(|audio_proc_ms| {
        Box::pin(async move {
            debug!("Upstream has processed {audio_proc_ms}ms of audio");
        })
    }));

    rotator.start().await?;

    // Stream the file at real-time pace, one frame per interval
    let audio = tokio::fs::read(&audio_path).await?;
    let frame_bytes =
        config.sample_rate as usize / 10 * config.channels as usize * 2;
    println!(
        "Streaming {} ({} bytes, {}ms frames)",
        audio_path.display(),
        audio.len(),
        FRAME_INTERVAL.as_millis()
    );

    let mut ticker = tokio::time::interval(FRAME_INTERVAL);
    for frame in audio.chunks(frame_bytes) {
        ticker.tick().await;
        rotator.send_audio(Bytes::copy_from_slice(frame));
    }

    // Ask upstream to flush and wait a bounded time for the finished signal
    rotator.finalize();
    if tokio::time::timeout(FINALIZE_TIMEOUT, finished.notified())
        .await
        .is_err()
    {
        warn!(
            "No finished signal within {:?}, closing anyway",
            FINALIZE_TIMEOUT
        );
    }
    rotator.stop();

    let assembler = assembler.read();
    println!("\n--- transcript ---");
    println!("{}", assembler.committed_text(TranslationStatus::Original));
    let translated = assembler.committed_text(TranslationStatus::Translation);
    if !translated.is_empty() {
        println!("--- translation ---");
        println!("{translated}");
    }

    Ok(())
}

/// Print final text as committed lines; interim tails only at debug level
fn render_update(update: &TranscriptUpdate) {
    if !update.is_final {
        debug!("interim: {}", update.text);
        return;
    }
    let mut prefix = String::new();
    if let Some(speaker) = update.speaker {
        prefix.push_str(&format!("[speaker {speaker}] "));
    }
    if update.role == TranslationStatus::Translation {
        prefix.push_str("[translation] ");
    }
    println!("{prefix}{}", update.text.trim_start());
}
