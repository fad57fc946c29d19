//! Pipeline manager: owns the queues, the interrupt flag, and the stages.
//!
//! Stages start in reverse data-flow order so every consumer is draining
//! before its producer begins, and stop in forward order after the queues
//! are shut down, so no worker is left blocked on a dead queue. The single
//! external-interrupt flag is constructed here and handed to every queue
//! and stage by reference; there are no process-wide singletons.

use crate::audio::RingBuffer;
use crate::audio::sink::AudioSink;
use crate::audio::source::AudioSource;
use crate::defaults;
use crate::error::{Result, VoxdError};
use crate::llm::LlmBackend;
use crate::pipeline::capture_stage::{CaptureSettings, CaptureStage};
use crate::pipeline::chunker::ChunkerConfig;
use crate::pipeline::generation_stage::GenerationStage;
use crate::pipeline::message::{ControlMessage, TextMessage};
use crate::pipeline::queue::{BoundedQueue, PopResult, PushResult};
use crate::pipeline::synthesis_stage::{FadeConfig, SynthesisStage};
use crate::pipeline::worker::StageRunner;
use crate::stt::SttBackend;
use crate::tts::TtsBackend;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// What the pipeline is wired up to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    /// Audio → STT → LLM → TTS → audio.
    VoiceAssistant,
    /// Text → LLM → text, over the alt-text path.
    TextOnly,
    /// Audio → STT → text.
    Transcription,
    /// Text → TTS → audio, over the alt-text path.
    Synthesis,
    /// Full voice pipeline with the alt-text path enabled too.
    VoiceAssistantWithAltText,
}

/// Static configuration for a pipeline instance.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub text_queue_capacity: usize,
    pub response_queue_capacity: usize,
    pub pcm_queue_capacity: usize,
    /// Alt-text path deadline for enqueueing a prompt.
    pub text_timeout: Duration,
    /// Alt-text path deadline for the first reply chunk.
    pub response_timeout: Duration,

    pub enable_capture: bool,
    pub enable_generation: bool,
    pub enable_synthesis: bool,
    pub enable_text_input: bool,

    pub capture: CaptureSettings,
    pub chunker: ChunkerConfig,
    pub fade: FadeConfig,
    pub llm_model: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            text_queue_capacity: defaults::TEXT_QUEUE_CAPACITY,
            response_queue_capacity: defaults::RESPONSE_QUEUE_CAPACITY,
            pcm_queue_capacity: defaults::PCM_QUEUE_CAPACITY,
            text_timeout: Duration::from_millis(defaults::TEXT_TIMEOUT_MS),
            response_timeout: Duration::from_millis(defaults::RESPONSE_TIMEOUT_MS),
            enable_capture: true,
            enable_generation: true,
            enable_synthesis: true,
            enable_text_input: false,
            capture: CaptureSettings::default(),
            chunker: ChunkerConfig::default(),
            fade: FadeConfig::default(),
            llm_model: PathBuf::new(),
        }
    }
}

impl PipelineConfig {
    /// Stage enablement for a mode, everything else at defaults.
    pub fn for_mode(mode: PipelineMode) -> Self {
        let (capture, generation, synthesis, text_input) = match mode {
            PipelineMode::VoiceAssistant => (true, true, true, false),
            PipelineMode::TextOnly => (false, true, false, true),
            PipelineMode::Transcription => (true, false, false, false),
            PipelineMode::Synthesis => (false, false, true, true),
            PipelineMode::VoiceAssistantWithAltText => (true, true, true, true),
        };
        Self {
            enable_capture: capture,
            enable_generation: generation,
            enable_synthesis: synthesis,
            enable_text_input: text_input,
            ..Self::default()
        }
    }
}

/// Backend instances handed to `initialize`; entries for disabled stages
/// may be None.
#[derive(Default)]
pub struct Backends {
    pub source: Option<Box<dyn AudioSource>>,
    pub stt: Option<Box<dyn SttBackend>>,
    pub llm: Option<Box<dyn LlmBackend>>,
    pub tts: Option<Box<dyn TtsBackend>>,
    pub sink: Option<Box<dyn AudioSink>>,
}

/// Best-effort queue depths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub text_queue_depth: usize,
    pub response_queue_depth: usize,
}

#[derive(Default)]
struct PendingStages {
    capture: Option<CaptureStage>,
    generation: Option<GenerationStage>,
    synthesis: Option<SynthesisStage>,
}

#[derive(Default)]
struct Runners {
    capture: Option<StageRunner>,
    generation: Option<StageRunner>,
    synthesis: Option<StageRunner>,
}

pub struct PipelineManager {
    config: PipelineConfig,
    interrupt: Arc<AtomicBool>,
    ring: Arc<RingBuffer>,
    text_queue: Arc<BoundedQueue<TextMessage>>,
    response_queue: Arc<BoundedQueue<TextMessage>>,
    pending: Mutex<PendingStages>,
    runners: Mutex<Runners>,
    initialized: AtomicBool,
    running: AtomicBool,
}

impl PipelineManager {
    pub fn new(config: PipelineConfig) -> Self {
        let interrupt = Arc::new(AtomicBool::new(false));
        let ring = Arc::new(RingBuffer::new(
            config.capture.buffer_ms,
            config.capture.sample_rate,
        ));
        let text_queue = Arc::new(BoundedQueue::with_interrupt(
            config.text_queue_capacity,
            interrupt.clone(),
        ));
        let response_queue = Arc::new(BoundedQueue::with_interrupt(
            config.response_queue_capacity,
            interrupt.clone(),
        ));
        Self {
            config,
            interrupt,
            ring,
            text_queue,
            response_queue,
            pending: Mutex::new(PendingStages::default()),
            runners: Mutex::new(Runners::default()),
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    /// The capture ring buffer, for wiring an audio source's callback.
    pub fn ring(&self) -> Arc<RingBuffer> {
        self.ring.clone()
    }

    /// The shared external-interrupt flag.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    /// Wire backends into the stages this pipeline's mode enables.
    ///
    /// A missing backend for an enabled stage is a hard failure: no
    /// partial pipelines are kept.
    pub fn initialize(&self, mut backends: Backends) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(VoxdError::Pipeline {
                message: "cannot initialize while running".to_string(),
            });
        }
        if !self.config.enable_capture
            && !self.config.enable_generation
            && !self.config.enable_synthesis
        {
            return Err(VoxdError::Pipeline {
                message: "no stages enabled".to_string(),
            });
        }

        let mut pending = self.pending.lock().unwrap();

        if self.config.enable_capture {
            let source = backends.source.take().ok_or_else(|| VoxdError::Pipeline {
                message: "capture enabled but no audio source provided".to_string(),
            })?;
            let stt = backends.stt.take().ok_or_else(|| VoxdError::Pipeline {
                message: "capture enabled but no STT backend provided".to_string(),
            })?;
            pending.capture = Some(CaptureStage::new(
                self.ring.clone(),
                source,
                stt,
                self.text_queue.clone(),
                self.config.capture.clone(),
            ));
        }

        if self.config.enable_generation {
            let llm = backends.llm.take().ok_or_else(|| VoxdError::Pipeline {
                message: "generation enabled but no LLM backend provided".to_string(),
            })?;
            pending.generation = Some(GenerationStage::new(
                self.text_queue.clone(),
                self.response_queue.clone(),
                llm,
                self.config.chunker,
                self.config.llm_model.clone(),
                Some(self.interrupt.clone()),
            ));
        }

        if self.config.enable_synthesis {
            let tts = backends.tts.take().ok_or_else(|| VoxdError::Pipeline {
                message: "synthesis enabled but no TTS backend provided".to_string(),
            })?;
            let sink = backends.sink.take().ok_or_else(|| VoxdError::Pipeline {
                message: "synthesis enabled but no audio sink provided".to_string(),
            })?;
            // Without a generation stage the synthesis stage speaks the
            // text queue directly (SYNTHESIS mode).
            let input = if self.config.enable_generation {
                self.response_queue.clone()
            } else {
                self.text_queue.clone()
            };
            pending.synthesis = Some(SynthesisStage::new(
                input,
                tts,
                sink,
                self.config.pcm_queue_capacity,
                Some(self.interrupt.clone()),
                self.config.fade,
            ));
        }

        self.initialized.store(true, Ordering::SeqCst);
        info!("pipeline initialized");
        Ok(())
    }

    /// Start stages in reverse data-flow order.
    ///
    /// A stage that fails to start takes the whole pipeline back down.
    pub fn start(&self) -> Result<()> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(VoxdError::Pipeline {
                message: "start before initialize".to_string(),
            });
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(VoxdError::Pipeline {
                message: "pipeline already running".to_string(),
            });
        }

        let mut pending = self.pending.lock().unwrap();
        let result = (|| -> Result<()> {
            if let Some(stage) = pending.synthesis.take() {
                self.runners.lock().unwrap().synthesis = Some(StageRunner::start(stage)?);
            }
            if let Some(stage) = pending.generation.take() {
                self.runners.lock().unwrap().generation = Some(StageRunner::start(stage)?);
            }
            if let Some(stage) = pending.capture.take() {
                self.runners.lock().unwrap().capture = Some(StageRunner::start(stage)?);
            }
            Ok(())
        })();
        drop(pending);

        match result {
            Ok(()) => {
                info!("pipeline started");
                Ok(())
            }
            Err(e) => {
                warn!("pipeline start failed: {}", e);
                self.stop();
                Err(e)
            }
        }
    }

    /// Shut the queues down, then stop stages in forward data-flow order.
    ///
    /// Idempotent; a second call is a no-op.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("stopping pipeline");

        // Wake anything blocked on a queue first. The PCM queue belongs to
        // the synthesis stage and is shut down in its cleanup.
        self.text_queue.shutdown();
        self.response_queue.shutdown();

        let mut runners = self.runners.lock().unwrap();
        if let Some(mut runner) = runners.capture.take() {
            runner.stop();
        }
        if let Some(mut runner) = runners.generation.take() {
            runner.stop();
        }
        if let Some(mut runner) = runners.synthesis.take() {
            runner.stop();
        }
        info!("pipeline stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Barge-in: raise the shared flag and deliver INTERRUPT to every
    /// stage. The synthesis stage lowers the flag once the speaker is
    /// silent; without one, it is lowered here after delivery.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Release);
        self.signal_all(ControlMessage::Interrupt);
        if !self.config.enable_synthesis {
            self.interrupt.store(false, Ordering::Release);
        }
    }

    /// Lower the external-interrupt flag without touching the stages.
    pub fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::Release);
    }

    fn signal_all(&self, msg: ControlMessage) {
        let runners = self.runners.lock().unwrap();
        for runner in [&runners.capture, &runners.generation, &runners.synthesis]
            .into_iter()
            .flatten()
        {
            runner.signal(msg);
        }
    }

    /// Synchronous text-in / text-out entry point (server mode).
    ///
    /// Shares `text_queue`/`response_queue` with the voice path, so voice
    /// utterances and socket prompts interleave in FIFO order. Without a
    /// generation stage (SYNTHESIS mode) the prompt goes straight to the
    /// synthesizer and the reply is empty.
    pub fn process_text_input(&self, text: &str) -> Result<String> {
        if !self.running.load(Ordering::SeqCst) || !self.config.enable_text_input {
            return Err(VoxdError::Pipeline {
                message: "text input not available".to_string(),
            });
        }
        if text.trim().is_empty() {
            return Err(VoxdError::Pipeline {
                message: "empty prompt".to_string(),
            });
        }

        match self
            .text_queue
            .push(TextMessage::new(text), self.config.text_timeout)
        {
            PushResult::Ok => {}
            PushResult::Timeout => {
                return Err(VoxdError::Timeout {
                    operation: "text queue push".to_string(),
                });
            }
            PushResult::Shutdown => {
                return Err(VoxdError::Pipeline {
                    message: "pipeline shutting down".to_string(),
                });
            }
        }

        if !self.config.enable_generation {
            return Ok(String::new());
        }

        match self.response_queue.pop(self.config.response_timeout) {
            PopResult::Item(msg) => Ok(msg.text),
            PopResult::Timeout | PopResult::Empty => Err(VoxdError::Timeout {
                operation: "response queue pop".to_string(),
            }),
            PopResult::Interrupted => Err(VoxdError::Pipeline {
                message: "interrupted".to_string(),
            }),
            PopResult::Shutdown => Err(VoxdError::Pipeline {
                message: "pipeline shutting down".to_string(),
            }),
        }
    }

    /// Drain one transcribed utterance (TRANSCRIPTION mode, where the text
    /// queue is the pipeline's product).
    pub fn next_transcript(&self, timeout: Duration) -> Option<String> {
        match self.text_queue.pop(timeout) {
            PopResult::Item(msg) => Some(msg.text),
            _ => None,
        }
    }

    /// Discard everything queued between stages.
    pub fn clear_queues(&self) {
        let text = self.text_queue.flush();
        let responses = self.response_queue.flush();
        if text > 0 || responses > 0 {
            info!("cleared {} prompts and {} reply chunks", text, responses);
        }
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            text_queue_depth: self.text_queue.len(),
            response_queue_depth: self.response_queue.len(),
        }
    }
}

impl Drop for PipelineManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sink::MockAudioSink;
    use crate::audio::source::MockAudioSource;
    use crate::llm::MockLlm;
    use crate::stt::MockStt;
    use crate::tts::MockTts;

    fn text_only_manager(llm: MockLlm) -> PipelineManager {
        let manager = PipelineManager::new(PipelineConfig::for_mode(PipelineMode::TextOnly));
        manager
            .initialize(Backends {
                llm: Some(Box::new(llm)),
                ..Backends::default()
            })
            .unwrap();
        manager
    }

    #[test]
    fn test_mode_table() {
        let config = PipelineConfig::for_mode(PipelineMode::VoiceAssistant);
        assert!(config.enable_capture && config.enable_generation && config.enable_synthesis);
        assert!(!config.enable_text_input);

        let config = PipelineConfig::for_mode(PipelineMode::TextOnly);
        assert!(!config.enable_capture && config.enable_generation && !config.enable_synthesis);
        assert!(config.enable_text_input);

        let config = PipelineConfig::for_mode(PipelineMode::Transcription);
        assert!(config.enable_capture && !config.enable_generation && !config.enable_synthesis);
        assert!(!config.enable_text_input);

        let config = PipelineConfig::for_mode(PipelineMode::Synthesis);
        assert!(!config.enable_capture && !config.enable_generation && config.enable_synthesis);
        assert!(config.enable_text_input);

        let config = PipelineConfig::for_mode(PipelineMode::VoiceAssistantWithAltText);
        assert!(config.enable_capture && config.enable_generation && config.enable_synthesis);
        assert!(config.enable_text_input);
    }

    #[test]
    fn test_initialize_requires_backends_for_enabled_stages() {
        let manager = PipelineManager::new(PipelineConfig::for_mode(PipelineMode::TextOnly));
        let result = manager.initialize(Backends::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_start_before_initialize_fails() {
        let manager = PipelineManager::new(PipelineConfig::for_mode(PipelineMode::TextOnly));
        assert!(manager.start().is_err());
    }

    #[test]
    fn test_text_only_echo_roundtrip() {
        let manager = text_only_manager(MockLlm::new().with_reverse_echo());
        manager.start().unwrap();
        assert!(manager.is_running());

        let reply = manager.process_text_input("hello").unwrap();
        assert_eq!(reply, "olleh");
        assert_eq!(manager.stats().response_queue_depth, 0);

        manager.stop();
        assert!(!manager.is_running());
    }

    #[test]
    fn test_double_start_fails_and_double_stop_is_noop() {
        let manager = text_only_manager(MockLlm::new());
        manager.start().unwrap();
        assert!(manager.start().is_err());

        manager.stop();
        manager.stop();
        assert!(!manager.is_running());
    }

    #[test]
    fn test_backend_init_failure_takes_pipeline_down() {
        let manager = text_only_manager(MockLlm::new().with_init_failure());
        assert!(manager.start().is_err());
        assert!(!manager.is_running());
    }

    #[test]
    fn test_text_input_rejected_when_not_running() {
        let manager = text_only_manager(MockLlm::new());
        assert!(manager.process_text_input("hello").is_err());
    }

    #[test]
    fn test_text_input_rejected_in_voice_mode() {
        let config = PipelineConfig::for_mode(PipelineMode::VoiceAssistant);
        let manager = PipelineManager::new(config);
        manager
            .initialize(Backends {
                source: Some(Box::new(MockAudioSource::new())),
                stt: Some(Box::new(MockStt::new())),
                llm: Some(Box::new(MockLlm::new())),
                tts: Some(Box::new(MockTts::new())),
                sink: Some(Box::new(MockAudioSink::new())),
            })
            .unwrap();
        manager.start().unwrap();

        assert!(manager.process_text_input("hello").is_err());
        manager.stop();
    }

    #[test]
    fn test_empty_prompt_is_rejected() {
        let manager = text_only_manager(MockLlm::new());
        manager.start().unwrap();
        assert!(manager.process_text_input("   ").is_err());
        manager.stop();
    }

    #[test]
    fn test_interrupt_without_synthesis_lowers_flag_itself() {
        let manager = text_only_manager(MockLlm::new());
        manager.start().unwrap();

        manager.interrupt();
        assert!(!manager.interrupt_flag().load(Ordering::Acquire));

        // Let the control message dispatch before offering new work, so
        // its queue flush cannot race the fresh prompt
        std::thread::sleep(Duration::from_millis(300));
        let reply = manager.process_text_input("ping").unwrap();
        assert_eq!(reply, "ping");
        manager.stop();
    }

    #[test]
    fn test_clear_queues_reports_empty_stats() {
        let manager = text_only_manager(MockLlm::new());
        manager.clear_queues();
        let stats = manager.stats();
        assert_eq!(stats.text_queue_depth, 0);
        assert_eq!(stats.response_queue_depth, 0);
    }

    #[test]
    fn test_stop_is_run_by_drop() {
        let manager = text_only_manager(MockLlm::new());
        manager.start().unwrap();
        drop(manager);
    }
}
