//! whisper.cpp speech-to-text backend.
//!
//! # Feature Gate
//!
//! Requires the `whisper` feature and cmake:
//!
//! ```bash
//! cargo build --features whisper
//! ```

#[cfg(feature = "whisper")]
use crate::error::{Result, VoxdError};
#[cfg(feature = "whisper")]
use crate::stt::SttBackend;
#[cfg(feature = "whisper")]
use std::path::Path;
#[cfg(feature = "whisper")]
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters,
    install_logging_hooks,
};

#[cfg(feature = "whisper")]
static LOGGING_HOOKS_INSTALLED: std::sync::Once = std::sync::Once::new();

/// Speech-to-text through whisper-rs.
#[cfg(feature = "whisper")]
pub struct WhisperStt {
    context: Option<WhisperContext>,
    language: String,
}

#[cfg(feature = "whisper")]
impl WhisperStt {
    pub fn new() -> Self {
        Self::with_language("en")
    }

    pub fn with_language(language: &str) -> Self {
        // Route whisper.cpp's own logging away from stderr (only once).
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        Self {
            context: None,
            language: language.to_string(),
        }
    }
}

#[cfg(feature = "whisper")]
impl Default for WhisperStt {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "whisper")]
impl SttBackend for WhisperStt {
    fn init(&mut self, model_path: &Path) -> Result<()> {
        if !model_path.exists() {
            return Err(VoxdError::SttModelNotFound {
                path: model_path.to_string_lossy().to_string(),
            });
        }

        let params = WhisperContextParameters::default();
        let context = WhisperContext::new_with_params(
            model_path.to_str().ok_or_else(|| VoxdError::Transcription {
                message: "Invalid UTF-8 in model path".to_string(),
            })?,
            params,
        )
        .map_err(|e| VoxdError::Transcription {
            message: format!("Failed to load model: {}", e),
        })?;

        self.context = Some(context);
        Ok(())
    }

    fn transcribe(&mut self, samples: &[f32]) -> Result<Option<String>> {
        let context = self.context.as_ref().ok_or_else(|| VoxdError::Transcription {
            message: "transcribe called before init".to_string(),
        })?;

        let mut state = context.create_state().map_err(|e| VoxdError::Transcription {
            message: format!("Failed to create state: {}", e),
        })?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(self.language.as_str()));
        params.set_print_progress(false);
        params.set_print_special(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_single_segment(true);
        params.set_no_context(true);

        state
            .full(params, samples)
            .map_err(|e| VoxdError::Transcription {
                message: format!("Inference failed: {}", e),
            })?;

        let mut text = String::new();
        for segment in state.as_iter() {
            if let Ok(segment_text) = segment.to_str_lossy() {
                text.push_str(&segment_text);
            }
        }

        if text.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(text))
        }
    }

    fn shutdown(&mut self) {
        self.context = None;
    }
}
