use crate::defaults;
use crate::error::{Result, VoxlineError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub stt: SttConfig,
    pub playback: PlaybackConfig,
}

/// Media-stream server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Public host name the telephony provider can reach (used in the TwiML reply).
    pub public_host: Option<String>,
}

/// Language model configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub api_base: String,
    pub system_prompt: String,
    pub greeting: String,
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TtsConfig {
    pub voice_model: String,
    pub api_base: String,
}

/// Live transcription configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SttConfig {
    pub model: String,
    pub language: String,
    pub endpointing_ms: u32,
    pub utterance_end_ms: u32,
    pub api_base: String,
}

/// Fragment playback configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    pub pause_marker: char,
    pub interrupt_min_chars: usize,
    pub stall_timeout_ms: u64,
    pub max_concurrent_renders: usize,
    pub recognizer_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: defaults::BIND_ADDR.to_string(),
            public_host: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: defaults::LLM_MODEL.to_string(),
            api_base: defaults::LLM_API_BASE.to_string(),
            system_prompt: defaults::SYSTEM_PROMPT.to_string(),
            greeting: defaults::GREETING.to_string(),
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            voice_model: defaults::VOICE_MODEL.to_string(),
            api_base: defaults::SPEECH_API_BASE.to_string(),
        }
    }
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model: defaults::STT_MODEL.to_string(),
            language: defaults::STT_LANGUAGE.to_string(),
            endpointing_ms: defaults::ENDPOINTING_MS,
            utterance_end_ms: defaults::UTTERANCE_END_MS,
            api_base: defaults::SPEECH_API_BASE.to_string(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            pause_marker: defaults::PAUSE_MARKER,
            interrupt_min_chars: defaults::INTERRUPT_MIN_CHARS,
            stall_timeout_ms: defaults::STALL_TIMEOUT_MS,
            max_concurrent_renders: defaults::MAX_CONCURRENT_RENDERS,
            recognizer_buffer: defaults::RECOGNIZER_BUFFER,
        }
    }
}

impl PlaybackConfig {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only falls back to defaults when the file is missing; invalid TOML
    /// and unreadable files are errors.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                {
                    Ok(Self::default())
                } else {
                    match e.downcast::<toml::de::Error>() {
                        Ok(toml_err) => Err(VoxlineError::Config(toml_err)),
                        Err(other) => Err(VoxlineError::Other(format!(
                            "Failed to load config from {}: {}",
                            path.display(),
                            other
                        ))),
                    }
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXLINE_BIND → server.bind
    /// - VOXLINE_PUBLIC_HOST → server.public_host
    /// - VOXLINE_LLM_MODEL → llm.model
    /// - VOXLINE_VOICE_MODEL → tts.voice_model
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(bind) = std::env::var("VOXLINE_BIND")
            && !bind.is_empty()
        {
            self.server.bind = bind;
        }

        if let Ok(host) = std::env::var("VOXLINE_PUBLIC_HOST")
            && !host.is_empty()
        {
            self.server.public_host = Some(host);
        }

        if let Ok(model) = std::env::var("VOXLINE_LLM_MODEL")
            && !model.is_empty()
        {
            self.llm.model = model;
        }

        if let Ok(voice) = std::env::var("VOXLINE_VOICE_MODEL")
            && !voice.is_empty()
        {
            self.tts.voice_model = voice;
        }

        self
    }

    /// Reject values the call pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.playback.pause_marker.is_whitespace() {
            return Err(VoxlineError::ConfigInvalidValue {
                key: "playback.pause_marker".to_string(),
                message: "must not be whitespace".to_string(),
            });
        }
        if self.playback.stall_timeout_ms == 0 {
            return Err(VoxlineError::ConfigInvalidValue {
                key: "playback.stall_timeout_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.playback.max_concurrent_renders == 0 {
            return Err(VoxlineError::ConfigInvalidValue {
                key: "playback.max_concurrent_renders".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.playback.recognizer_buffer == 0 {
            return Err(VoxlineError::ConfigInvalidValue {
                key: "playback.recognizer_buffer".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.server.bind.trim().is_empty() {
            return Err(VoxlineError::ConfigInvalidValue {
                key: "server.bind".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| VoxlineError::Other(format!("Failed to serialize config: {e}")))
    }

    /// Render a fully-defaulted config file, suitable as a starting point.
    pub fn dump_template() -> Result<String> {
        Self::default().to_toml()
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxline/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("voxline")
            .join("config.toml")
    }
}
