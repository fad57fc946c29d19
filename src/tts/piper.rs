//! Text-to-speech through the piper CLI.
//!
//! Spawns `piper` per request, feeding text on stdin and reading the WAV it
//! writes. Heavyweight next to an in-process synthesizer, but it needs no
//! native bindings and any piper voice works unchanged.
//!
//! # Feature Gate
//!
//! Requires the `piper` feature and a `piper` binary on PATH:
//!
//! ```bash
//! cargo build --features piper
//! ```

#[cfg(feature = "piper")]
use crate::error::{Result, VoxdError};
#[cfg(feature = "piper")]
use crate::pipeline::message::PcmChunk;
#[cfg(feature = "piper")]
use crate::tts::TtsBackend;
#[cfg(feature = "piper")]
use std::io::Write;
#[cfg(feature = "piper")]
use std::path::PathBuf;
#[cfg(feature = "piper")]
use std::process::{Command, Stdio};

#[cfg(feature = "piper")]
pub struct PiperTts {
    voice: PathBuf,
    output_path: PathBuf,
    initialized: bool,
}

#[cfg(feature = "piper")]
impl PiperTts {
    pub fn new(voice: PathBuf) -> Self {
        let output_path =
            std::env::temp_dir().join(format!("voxd-tts-{}.wav", std::process::id()));
        Self {
            voice,
            output_path,
            initialized: false,
        }
    }
}

#[cfg(feature = "piper")]
impl TtsBackend for PiperTts {
    fn init(&mut self) -> Result<()> {
        if !self.voice.exists() {
            return Err(VoxdError::Synthesis {
                message: format!("piper voice not found at {}", self.voice.display()),
            });
        }

        let available = Command::new("piper")
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);

        if !available {
            return Err(VoxdError::Synthesis {
                message: "piper not found. Install it: pip install piper-tts".to_string(),
            });
        }

        self.initialized = true;
        Ok(())
    }

    fn speak(&mut self, text: &str) -> Result<Option<PcmChunk>> {
        if !self.initialized {
            return Err(VoxdError::Synthesis {
                message: "speak called before init".to_string(),
            });
        }
        if text.trim().is_empty() {
            return Ok(None);
        }

        let mut child = Command::new("piper")
            .arg("--model")
            .arg(&self.voice)
            .arg("--output_file")
            .arg(&self.output_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| VoxdError::Synthesis {
                message: format!("failed to spawn piper: {}", e),
            })?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(text.as_bytes())
                .map_err(|e| VoxdError::Synthesis {
                    message: format!("failed to write to piper: {}", e),
                })?;
        }

        let status = child.wait().map_err(|e| VoxdError::Synthesis {
            message: format!("piper did not exit cleanly: {}", e),
        })?;
        if !status.success() {
            return Err(VoxdError::Synthesis {
                message: format!("piper exited with {}", status),
            });
        }

        let mut reader =
            hound::WavReader::open(&self.output_path).map_err(|e| VoxdError::Synthesis {
                message: format!("failed to read piper output: {}", e),
            })?;
        let sample_rate = reader.spec().sample_rate;
        let samples: Vec<i16> = reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| VoxdError::Synthesis {
                message: format!("failed to decode piper output: {}", e),
            })?;

        if samples.is_empty() {
            return Ok(None);
        }
        Ok(Some(PcmChunk::new(samples, sample_rate)))
    }

    fn shutdown(&mut self) {
        self.initialized = false;
        let _ = std::fs::remove_file(&self.output_path);
    }
}
