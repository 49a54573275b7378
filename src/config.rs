use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SubgenError};

/// Pipeline configuration, loaded from the config file with environment
/// variable overrides.
///
/// The translator tunables (batch bounds, retry ceiling, backoff) are
/// deliberately configuration rather than constants; the defaults below are
/// the documented starting points.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gemini_api_key: Option<String>,

    /// Maximum concurrent provider requests.
    pub concurrency: usize,
    /// Maximum segments per translation batch.
    pub max_batch_segments: usize,
    /// Maximum combined character length per translation batch.
    pub max_batch_chars: usize,
    /// Neighboring segments included as context on each side of a batch.
    pub context_window: usize,
    /// Retry attempts after the first failed provider call for a batch.
    pub max_retries: u32,
    /// Base delay for exponential retry backoff.
    pub retry_base_delay_ms: u64,

    /// VAD aggressiveness, 0-3. Stricter levels produce fewer false
    /// positives.
    pub vad_level: u8,
    /// Voiced runs separated by gaps shorter than this are merged.
    pub vad_merge_gap_ms: u64,
    /// Voiced runs shorter than this are discarded.
    pub vad_min_speech_ms: u64,

    /// Grace period before a cancelled subprocess is force-killed.
    pub grace_timeout_ms: u64,
    /// Bounded progress channel capacity.
    pub progress_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            concurrency: 4,
            max_batch_segments: 8,
            max_batch_chars: 1600,
            context_window: 2,
            max_retries: 2,
            retry_base_delay_ms: 500,
            vad_level: 2,
            vad_merge_gap_ms: 300,
            vad_min_speech_ms: 250,
            grace_timeout_ms: 3000,
            progress_buffer: 64,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                if let Ok(file_config) = toml::from_str::<Config>(&contents) {
                    config = file_config;
                }
            }
        }

        // Override with environment variables
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            config.gemini_api_key = Some(key);
        }
        if let Ok(concurrency) = std::env::var("SUBGEN_CONCURRENCY") {
            if let Ok(c) = concurrency.parse() {
                config.concurrency = c;
            }
        }
        if let Ok(level) = std::env::var("SUBGEN_VAD_LEVEL") {
            if let Ok(l) = level.parse() {
                config.vad_level = l;
            }
        }
        if let Ok(retries) = std::env::var("SUBGEN_MAX_RETRIES") {
            if let Ok(r) = retries.parse() {
                config.max_retries = r;
            }
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(SubgenError::Config(
                "Concurrency must be greater than 0".to_string(),
            ));
        }
        if self.max_batch_segments == 0 {
            return Err(SubgenError::Config(
                "max_batch_segments must be greater than 0".to_string(),
            ));
        }
        if self.max_batch_chars == 0 {
            return Err(SubgenError::Config(
                "max_batch_chars must be greater than 0".to_string(),
            ));
        }
        if self.vad_level > 3 {
            return Err(SubgenError::Config(format!(
                "VAD level must be 0-3, got {}",
                self.vad_level
            )));
        }
        Ok(())
    }

    /// Validate that a translation provider key is available.
    pub fn require_api_key(&self) -> Result<&str> {
        self.gemini_api_key.as_deref().ok_or_else(|| {
            SubgenError::Config(
                "GEMINI_API_KEY not set. Get one at https://aistudio.google.com/apikey".to_string(),
            )
        })
    }

    pub fn grace_timeout(&self) -> Duration {
        Duration::from_millis(self.grace_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("subgen").join("config.toml"))
    }
}
