//! Speech backends available to the binary.

mod paced;
#[cfg(feature = "piper")]
mod piper;

pub use paced::PacedBackend;
#[cfg(feature = "piper")]
pub use piper::PiperBackend;

use anyhow::Result;
use narrator_core::AppConfig;
use narrator_core::backend::SpeechBackend;
use tracing::info;

pub type DynBackend = Box<dyn SpeechBackend>;

/// Build the Piper backend, falling back to the paced backend when the voice
/// model is unavailable.
#[cfg(feature = "piper")]
pub fn create_backend(config: &AppConfig) -> Result<DynBackend> {
    use std::path::PathBuf;
    use tracing::warn;

    match PiperBackend::new(
        PathBuf::from(&config.tts_model_path),
        PathBuf::from(&config.tts_espeak_path),
        PathBuf::from(&config.cache_dir),
    ) {
        Ok(backend) => {
            info!("Using Piper speech backend");
            Ok(Box::new(backend))
        }
        Err(err) => {
            warn!("Piper unavailable, falling back to paced backend: {err:#}");
            Ok(Box::new(PacedBackend::new(config.base_words_per_minute)))
        }
    }
}

#[cfg(not(feature = "piper"))]
pub fn create_backend(config: &AppConfig) -> Result<DynBackend> {
    info!(
        wpm = config.base_words_per_minute,
        "Using paced speech backend"
    );
    Ok(Box::new(PacedBackend::new(config.base_words_per_minute)))
}
