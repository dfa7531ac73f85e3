//! Application entry point: translate the default microphone live.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from the path given as the first argument, or from
//!    the platform `settings.toml`; apply `TRANSLATE_*` environment
//!    overrides and validate.
//! 3. Open the default output and input devices (their streams live on the
//!    main thread until exit).
//! 4. Create the [`tokio`] runtime and start a [`TranslationClient`].
//! 5. Run until Ctrl-C, then stop.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use translate_bridge::{
    audio::{MicrophoneSource, SpeakerOutput},
    config::AppConfig,
    pipeline::{
        ClientError, ConnectionState, TranscriptionEvent, TranslationClient, TranslationHandler,
    },
};

/// Time given to the final notification and channel close after `stop`.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Console handler
// ---------------------------------------------------------------------------

/// Prints final transcriptions and logs everything else.
struct ConsoleHandler;

impl TranslationHandler for ConsoleHandler {
    fn on_connection_state(&self, state: ConnectionState) {
        log::info!("client: {state}");
    }

    fn on_transcription(&self, event: &TranscriptionEvent) {
        if event.is_final {
            println!("[{}] {}", event.language_code, event.text);
        } else {
            log::debug!("partial [{}] {}", event.language_code, event.text);
        }
    }

    fn on_error(&self, error: &ClientError) {
        log::error!("client error {}: {}", error.code, error.message);
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("translate-bridge starting up");

    // 2. Config
    let mut config = match std::env::args_os().nth(1) {
        Some(path) => {
            let path = Path::new(&path);
            AppConfig::load_from(path)
                .with_context(|| format!("failed to load {}", path.display()))?
        }
        None => AppConfig::load().context("failed to load settings.toml")?,
    };
    config.client.apply_env_overrides();
    config.validate().context("invalid configuration")?;

    // 3. Audio devices
    let (speaker, _output_stream) = SpeakerOutput::open(config.playback.max_buffered_secs)
        .context("failed to open output device")?;
    let (microphone, _input_stream) =
        MicrophoneSource::open().context("failed to open input device")?;
    log::info!(
        "audio: capturing {} Hz x{}",
        microphone.sample_rate(),
        microphone.channels()
    );

    // 4. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    rt.block_on(async move {
        let client = TranslationClient::with_defaults(
            config.client.clone(),
            config.channel.clone(),
            Arc::new(speaker),
        )
        .context("failed to create translation client")?;
        client.set_handler(Arc::new(ConsoleHandler));
        client.set_translated_volume(config.playback.volume);
        client.start(Arc::new(microphone));

        // 5. Run until Ctrl-C
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
        log::info!("Ctrl-C received, stopping");
        client.stop();
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        anyhow::Ok(())
    })
}
