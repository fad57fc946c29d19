//! Maps a pipeline mode onto a wired manager with real backends.
//!
//! Backend availability is a build-time property: each real backend sits
//! behind a cargo feature, and asking for a stage whose backend was not
//! compiled in fails pipeline creation outright.

use crate::audio::sink::AudioSink;
use crate::audio::source::AudioSource;
use crate::config::Config;
use crate::error::{Result, VoxdError};
use crate::llm::LlmBackend;
use crate::pipeline::capture_stage::CaptureSettings;
use crate::pipeline::chunker::ChunkerConfig;
use crate::pipeline::manager::{Backends, PipelineConfig, PipelineManager, PipelineMode};
use crate::pipeline::synthesis_stage::FadeConfig;
use crate::stt::SttBackend;
use crate::tts::TtsBackend;
use std::time::Duration;

/// Translate the configuration surface into a pipeline configuration.
pub fn pipeline_config(mode: PipelineMode, settings: &Config) -> PipelineConfig {
    let mut config = PipelineConfig::for_mode(mode);
    config.text_queue_capacity = settings.queues.text_capacity;
    config.response_queue_capacity = settings.queues.response_capacity;
    config.pcm_queue_capacity = settings.queues.pcm_capacity;
    config.text_timeout = Duration::from_millis(settings.queues.text_timeout_ms);
    config.response_timeout = Duration::from_millis(settings.queues.response_timeout_ms);
    config.capture = CaptureSettings {
        device: settings.audio.device.clone(),
        sample_rate: settings.audio.sample_rate,
        buffer_ms: settings.audio.buffer_ms,
        vad: crate::audio::vad::VadConfig {
            threshold: settings.audio.vad_threshold,
            ..crate::audio::vad::VadConfig::default()
        },
        capture_ms: settings.audio.vad_capture_ms,
        model_path: settings.models.stt_model.clone(),
        ..CaptureSettings::default()
    };
    config.chunker = ChunkerConfig {
        words_per_chunk: settings.generation.words_per_chunk,
        max_chunk_bytes: settings.generation.max_chunk_bytes,
    };
    config.fade = FadeConfig {
        fade_ms: settings.synthesis.fade_ms,
        strength: settings.synthesis.fade_strength,
    };
    config.llm_model = settings.models.llm_model.clone();
    config
}

/// Build and initialize a pipeline for `mode` with the compiled-in
/// backends. The manager is ready to `start()`.
pub fn create_pipeline(mode: PipelineMode, settings: &Config) -> Result<PipelineManager> {
    let config = pipeline_config(mode, settings);
    let needs_capture = config.enable_capture;
    let needs_generation = config.enable_generation;
    let needs_synthesis = config.enable_synthesis;

    let manager = PipelineManager::new(config);

    let backends = Backends {
        source: if needs_capture {
            Some(create_audio_source(&manager)?)
        } else {
            None
        },
        stt: if needs_capture {
            Some(create_stt_backend()?)
        } else {
            None
        },
        llm: if needs_generation {
            Some(create_llm_backend()?)
        } else {
            None
        },
        tts: if needs_synthesis {
            Some(create_tts_backend(settings)?)
        } else {
            None
        },
        sink: if needs_synthesis {
            Some(create_audio_sink()?)
        } else {
            None
        },
    };

    manager.initialize(backends)?;
    Ok(manager)
}

#[cfg(feature = "device")]
fn create_audio_source(manager: &PipelineManager) -> Result<Box<dyn AudioSource>> {
    let ring = manager.ring();
    let sink: crate::audio::source::FrameSink =
        std::sync::Arc::new(move |frames: &[f32]| ring.push(frames));
    Ok(Box::new(crate::audio::source::CpalAudioSource::new(sink)))
}

#[cfg(not(feature = "device"))]
fn create_audio_source(_manager: &PipelineManager) -> Result<Box<dyn AudioSource>> {
    Err(VoxdError::Pipeline {
        message: "no audio capture compiled in (enable the 'device' feature)".to_string(),
    })
}

#[cfg(feature = "device")]
fn create_audio_sink() -> Result<Box<dyn AudioSink>> {
    Ok(Box::new(crate::audio::sink::CpalAudioSink::new()))
}

#[cfg(not(feature = "device"))]
fn create_audio_sink() -> Result<Box<dyn AudioSink>> {
    Err(VoxdError::Pipeline {
        message: "no audio playback compiled in (enable the 'device' feature)".to_string(),
    })
}

#[cfg(feature = "whisper")]
fn create_stt_backend() -> Result<Box<dyn SttBackend>> {
    Ok(Box::new(crate::stt::whisper::WhisperStt::new()))
}

#[cfg(not(feature = "whisper"))]
fn create_stt_backend() -> Result<Box<dyn SttBackend>> {
    Err(VoxdError::Pipeline {
        message: "no STT backend compiled in (enable the 'whisper' feature)".to_string(),
    })
}

fn create_llm_backend() -> Result<Box<dyn LlmBackend>> {
    // The model runtime is an external collaborator; integrators provide
    // an LlmBackend and wire it through PipelineManager::initialize.
    Err(VoxdError::Pipeline {
        message: "no LLM backend compiled in".to_string(),
    })
}

#[cfg(feature = "piper")]
fn create_tts_backend(settings: &Config) -> Result<Box<dyn TtsBackend>> {
    Ok(Box::new(crate::tts::piper::PiperTts::new(
        settings.models.tts_voice.clone(),
    )))
}

#[cfg(not(feature = "piper"))]
fn create_tts_backend(_settings: &Config) -> Result<Box<dyn TtsBackend>> {
    Err(VoxdError::Pipeline {
        message: "no TTS backend compiled in (enable the 'piper' feature)".to_string(),
    })
}
