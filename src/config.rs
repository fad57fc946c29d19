use crate::defaults;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub models: ModelsConfig,
    pub queues: QueuesConfig,
    pub generation: GenerationConfig,
    pub synthesis: SynthesisConfig,
    pub server: ServerConfig,
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub buffer_ms: u32,
    pub vad_threshold: f32,
    pub vad_capture_ms: u32,
}

/// Model paths per backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelsConfig {
    pub stt_model: PathBuf,
    pub llm_model: PathBuf,
    pub tts_voice: PathBuf,
}

/// Queue capacities and alt-text path deadlines
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueuesConfig {
    pub text_capacity: usize,
    pub response_capacity: usize,
    pub pcm_capacity: usize,
    pub text_timeout_ms: u64,
    pub response_timeout_ms: u64,
}

/// Reply chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub words_per_chunk: usize,
    pub max_chunk_bytes: usize,
}

/// Synthesis fade-out configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisConfig {
    pub fade_ms: u32,
    pub fade_strength: u32,
}

/// Server mode configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub socket: Option<PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
            buffer_ms: defaults::BUFFER_MS,
            vad_threshold: defaults::VAD_THRESHOLD,
            vad_capture_ms: defaults::VAD_CAPTURE_MS,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            stt_model: PathBuf::from("models/ggml-base.en.bin"),
            llm_model: PathBuf::from("models/llm.gguf"),
            tts_voice: PathBuf::from("models/en_US-lessac-medium.onnx"),
        }
    }
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            text_capacity: defaults::TEXT_QUEUE_CAPACITY,
            response_capacity: defaults::RESPONSE_QUEUE_CAPACITY,
            pcm_capacity: defaults::PCM_QUEUE_CAPACITY,
            text_timeout_ms: defaults::TEXT_TIMEOUT_MS,
            response_timeout_ms: defaults::RESPONSE_TIMEOUT_MS,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            words_per_chunk: defaults::WORDS_PER_CHUNK,
            max_chunk_bytes: defaults::MAX_CHUNK_BYTES,
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            fade_ms: defaults::FADE_MS,
            fade_strength: defaults::FADE_STRENGTH,
        }
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
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Self::default()
                } else {
                    panic!("Failed to load config from {}: {}", path.display(), e);
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXD_STT_MODEL → models.stt_model
    /// - VOXD_LLM_MODEL → models.llm_model
    /// - VOXD_AUDIO_DEVICE → audio.device
    /// - VOXD_SOCKET → server.socket
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var("VOXD_STT_MODEL")
            && !path.is_empty()
        {
            self.models.stt_model = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("VOXD_LLM_MODEL")
            && !path.is_empty()
        {
            self.models.llm_model = PathBuf::from(path);
        }

        if let Ok(device) = std::env::var("VOXD_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        if let Ok(socket) = std::env::var("VOXD_SOCKET")
            && !socket.is_empty()
        {
            self.server.socket = Some(PathBuf::from(socket));
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxd/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .expect("Could not determine config directory")
            .join("voxd")
            .join("config.toml")
    }
}
