//! Configuration loading for the narrator.
//!
//! All user-tunable settings are centralized here and loaded from
//! `conf/config.toml` if present. Any missing or invalid entries fall back to
//! defaults so a reading session can always start.

use crate::chunker::DEFAULT_MAX_CHUNK_CHARS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const MIN_SPEECH_RATE: f32 = 0.1;
pub const MAX_SPEECH_RATE: f32 = 10.0;
pub const MIN_SPEECH_PITCH: f32 = 0.0;
pub const MAX_SPEECH_PITCH: f32 = 2.0;

/// High-level narrator configuration; deserializable from TOML.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default = "default_speech_rate")]
    pub speech_rate: f32,
    #[serde(default = "default_speech_pitch")]
    pub speech_pitch: f32,
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default = "default_page_sync_delay_per_page_ms")]
    pub page_sync_delay_per_page_ms: u64,
    #[serde(default = "default_page_sync_max_delay_ms")]
    pub page_sync_max_delay_ms: u64,
    #[serde(default = "default_base_words_per_minute")]
    pub base_words_per_minute: f32,
    #[serde(default = "default_tts_model")]
    pub tts_model_path: String,
    #[serde(default = "default_tts_espeak_path")]
    pub tts_espeak_path: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            log_level: default_log_level(),
            voice: None,
            speech_rate: default_speech_rate(),
            speech_pitch: default_speech_pitch(),
            max_chunk_chars: default_max_chunk_chars(),
            page_sync_delay_per_page_ms: default_page_sync_delay_per_page_ms(),
            page_sync_max_delay_ms: default_page_sync_max_delay_ms(),
            base_words_per_minute: default_base_words_per_minute(),
            tts_model_path: default_tts_model(),
            tts_espeak_path: default_tts_espeak_path(),
            cache_dir: default_cache_dir(),
        }
    }
}

impl AppConfig {
    /// Pull every numeric setting back into its supported range.
    pub fn clamped(mut self) -> Self {
        self.speech_rate = clamp_rate(self.speech_rate);
        self.speech_pitch = clamp_pitch(self.speech_pitch);
        self.max_chunk_chars = self.max_chunk_chars.max(1);
        if !self.base_words_per_minute.is_finite() || self.base_words_per_minute < 1.0 {
            self.base_words_per_minute = default_base_words_per_minute();
        }
        self
    }

    pub fn page_sync_delay_per_page(&self) -> Duration {
        Duration::from_millis(self.page_sync_delay_per_page_ms)
    }

    pub fn page_sync_max_delay(&self) -> Duration {
        Duration::from_millis(self.page_sync_max_delay_ms)
    }
}

pub fn clamp_rate(rate: f32) -> f32 {
    if rate.is_finite() {
        rate.clamp(MIN_SPEECH_RATE, MAX_SPEECH_RATE)
    } else {
        default_speech_rate()
    }
}

pub fn clamp_pitch(pitch: f32) -> f32 {
    if pitch.is_finite() {
        pitch.clamp(MIN_SPEECH_PITCH, MAX_SPEECH_PITCH)
    } else {
        default_speech_pitch()
    }
}

/// Load configuration from the given path, falling back to defaults on error.
pub fn load_config(path: &Path) -> AppConfig {
    let contents = match fs::read_to_string(path) {
        Ok(data) => {
            info!(path = %path.display(), "Loaded base config");
            data
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                "Falling back to default config: {err}"
            );
            return AppConfig::default();
        }
    };

    match parse_config(&contents) {
        Ok(cfg) => {
            debug!("Parsed configuration from disk");
            cfg
        }
        Err(err) => {
            warn!(path = %path.display(), "Invalid config TOML: {err}");
            AppConfig::default()
        }
    }
}

pub fn parse_config(contents: &str) -> Result<AppConfig, toml::de::Error> {
    toml::from_str::<AppConfig>(contents).map(AppConfig::clamped)
}

fn default_log_level() -> LogLevel {
    LogLevel::Debug
}

fn default_speech_rate() -> f32 {
    1.0
}

fn default_speech_pitch() -> f32 {
    1.0
}

fn default_max_chunk_chars() -> usize {
    DEFAULT_MAX_CHUNK_CHARS
}

fn default_page_sync_delay_per_page_ms() -> u64 {
    100
}

fn default_page_sync_max_delay_ms() -> u64 {
    1000
}

fn default_base_words_per_minute() -> f32 {
    170.0
}

fn default_tts_model() -> String {
    "/usr/share/piper-voices/en/en_US/ryan/high/en_US-ryan-high.onnx".to_string()
}

fn default_tts_espeak_path() -> String {
    "/usr/share".to_string()
}

fn default_cache_dir() -> String {
    ".cache".to_string()
}

/// Supported logging verbosity levels.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    #[default]
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_filter_str())
    }
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
