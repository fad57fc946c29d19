//! Synthesis stage: reply chunks in, PCM to the playback worker out.
//!
//! This stage owns both the PCM queue and the playback worker, which it
//! starts during its own initialization and stops during cleanup. The
//! manager only ever holds the synthesis stage, so the synthesis/playback
//! ownership cycle never reaches it. Each synthesized chunk gets a trailing
//! fade-out so back-to-back chunks concatenate without audible clicks.

use crate::audio::sink::AudioSink;
use crate::defaults;
use crate::error::Result;
use crate::pipeline::message::{ControlMessage, PcmChunk, TextMessage};
use crate::pipeline::playback_stage::{PlaybackHandle, PlaybackStage};
use crate::pipeline::queue::{BoundedQueue, PopResult, PushResult};
use crate::pipeline::worker::{Stage, StageError, StageRunner, StageStatus};
use crate::tts::TtsBackend;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Trailing fade-out parameters.
#[derive(Debug, Clone, Copy)]
pub struct FadeConfig {
    pub fade_ms: u32,
    /// Curve steepness; the gain exponent is `1 + strength / 25`.
    pub strength: u32,
}

impl Default for FadeConfig {
    fn default() -> Self {
        Self {
            fade_ms: defaults::FADE_MS,
            strength: defaults::FADE_STRENGTH,
        }
    }
}

/// Apply a power-curve fade to the tail of `samples`, then drop trailing
/// samples the fade silenced outright.
pub fn fade_out_tail(samples: &mut Vec<i16>, sample_rate: u32, config: &FadeConfig) {
    let fade_len = (sample_rate as usize * config.fade_ms as usize / 1000).min(samples.len());
    if fade_len == 0 {
        return;
    }

    let exponent = 1.0 + config.strength as f32 / 25.0;
    let start = samples.len() - fade_len;
    for i in 0..fade_len {
        let t = i as f32 / fade_len as f32;
        let gain = (1.0 - t).powf(exponent);
        let faded = samples[start + i] as f32 * gain;
        samples[start + i] = faded.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }

    while samples.last() == Some(&0) && samples.len() > start {
        samples.pop();
    }
}

pub struct SynthesisStage {
    input: Arc<BoundedQueue<TextMessage>>,
    tts: Box<dyn TtsBackend>,
    pcm_queue: Arc<BoundedQueue<PcmChunk>>,
    /// Consumed by `initialize` when the playback worker is built.
    sink: Option<Box<dyn AudioSink>>,
    playback: Option<StageRunner>,
    playback_handle: Option<PlaybackHandle>,
    interrupt: Option<Arc<AtomicBool>>,
    fade: FadeConfig,
}

impl SynthesisStage {
    pub fn new(
        input: Arc<BoundedQueue<TextMessage>>,
        tts: Box<dyn TtsBackend>,
        sink: Box<dyn AudioSink>,
        pcm_capacity: usize,
        interrupt: Option<Arc<AtomicBool>>,
        fade: FadeConfig,
    ) -> Self {
        let pcm_queue = match &interrupt {
            Some(flag) => Arc::new(BoundedQueue::with_interrupt(pcm_capacity, flag.clone())),
            None => Arc::new(BoundedQueue::new(pcm_capacity)),
        };
        Self {
            input,
            tts,
            pcm_queue,
            sink: Some(sink),
            playback: None,
            playback_handle: None,
            interrupt,
            fade,
        }
    }

    /// The PCM queue between synthesis and playback. Exposed for tests and
    /// statistics; production code outside this stage never pushes to it.
    pub fn pcm_queue(&self) -> Arc<BoundedQueue<PcmChunk>> {
        self.pcm_queue.clone()
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }
}

impl Stage for SynthesisStage {
    fn name(&self) -> &'static str {
        "synthesis"
    }

    fn initialize(&mut self) -> Result<()> {
        self.tts.init()?;

        let sink = self.sink.take().ok_or_else(|| crate::error::VoxdError::Pipeline {
            message: "synthesis stage initialized twice".to_string(),
        })?;
        let playback = PlaybackStage::new(self.pcm_queue.clone(), sink, self.interrupt.clone());
        self.playback_handle = Some(playback.handle());
        self.playback = Some(StageRunner::start(playback)?);
        Ok(())
    }

    fn process(&mut self) -> std::result::Result<StageStatus, StageError> {
        let msg = match self
            .input
            .pop(Duration::from_millis(defaults::STAGE_WAIT_MS))
        {
            PopResult::Item(msg) => msg,
            PopResult::Interrupted => {
                // Wait out the raised flag instead of spinning on the pop.
                std::thread::sleep(Duration::from_millis(defaults::STAGE_WAIT_MS));
                return Ok(StageStatus::Continue);
            }
            PopResult::Timeout | PopResult::Empty => return Ok(StageStatus::Continue),
            PopResult::Shutdown => return Ok(StageStatus::Shutdown),
        };

        debug!("synthesizing: {}", msg.text);
        match self.tts.speak(&msg.text) {
            Ok(Some(mut chunk)) => {
                if self.interrupted() {
                    // The user talked over us while the backend was busy.
                    debug!("chunk discarded, synthesis finished after interrupt");
                    return Ok(StageStatus::Continue);
                }

                fade_out_tail(&mut chunk.samples, chunk.sample_rate, &self.fade);
                if chunk.samples.is_empty() {
                    return Ok(StageStatus::Continue);
                }

                match self.pcm_queue.push(
                    chunk,
                    Duration::from_millis(defaults::STAGE_PUSH_TIMEOUT_MS),
                ) {
                    PushResult::Ok => Ok(StageStatus::Continue),
                    PushResult::Timeout => {
                        warn!("audio chunk dropped, playback queue full");
                        Ok(StageStatus::Continue)
                    }
                    PushResult::Shutdown => Ok(StageStatus::Shutdown),
                }
            }
            Ok(None) => {
                warn!("synthesis produced no audio for: {}", msg.text);
                Ok(StageStatus::Continue)
            }
            Err(e) => Err(StageError::Recoverable(format!("synthesis failed: {}", e))),
        }
    }

    fn handle_control(&mut self, msg: &ControlMessage) -> bool {
        match msg {
            ControlMessage::Interrupt | ControlMessage::Flush => {
                let flushed = self.input.flush();
                if flushed > 0 {
                    debug!("flushed {} pending reply chunks", flushed);
                }
                if let Some(handle) = &self.playback_handle {
                    handle.interrupt_audio_immediately();
                }
                if matches!(msg, ControlMessage::Interrupt)
                    && let Some(flag) = &self.interrupt
                {
                    // Downstream-most stage lowers the flag once the
                    // speaker is silent, readying the pipeline for the
                    // next utterance.
                    flag.store(false, Ordering::Release);
                    info!("interrupt handled, ready for new speech");
                }
                true
            }
            _ => false,
        }
    }

    fn cleanup(&mut self) {
        // Wake the playback worker, let it drain, then take it down.
        self.pcm_queue.shutdown();
        if let Some(mut playback) = self.playback.take() {
            playback.stop();
        }
        self.tts.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sink::{MockAudioSink, SinkLog};
    use crate::tts::MockTts;
    use std::sync::Mutex;

    fn fade() -> FadeConfig {
        FadeConfig::default()
    }

    #[test]
    fn test_fade_attenuates_tail_monotonically() {
        let mut samples = vec![10_000i16; 22050]; // 1s at 22050 Hz
        fade_out_tail(&mut samples, 22050, &fade());

        let fade_len = 22050 * defaults::FADE_MS as usize / 1000;
        let start = 22050 - fade_len;

        // Untouched before the fade window
        assert!(samples[..start].iter().all(|&s| s == 10_000));
        // Strictly no louder as the fade progresses
        for pair in samples[start..].windows(2) {
            assert!(pair[1] <= pair[0]);
        }
        // The silenced tail was truncated
        assert!(samples.len() < 22050);
        assert_ne!(samples.last(), Some(&0));
    }

    #[test]
    fn test_fade_on_short_chunk_covers_whole_chunk() {
        let mut samples = vec![10_000i16; 100];
        fade_out_tail(&mut samples, 22050, &fade());
        assert!(samples.len() <= 100);
        assert_eq!(samples[0], 10_000);
    }

    #[test]
    fn test_fade_zero_ms_is_noop() {
        let mut samples = vec![5_000i16; 1000];
        fade_out_tail(
            &mut samples,
            22050,
            &FadeConfig {
                fade_ms: 0,
                strength: 120,
            },
        );
        assert_eq!(samples, vec![5_000i16; 1000]);
    }

    #[test]
    fn test_fade_empty_chunk() {
        let mut samples: Vec<i16> = Vec::new();
        fade_out_tail(&mut samples, 22050, &fade());
        assert!(samples.is_empty());
    }

    fn stage_with(
        tts: MockTts,
    ) -> (
        SynthesisStage,
        Arc<BoundedQueue<TextMessage>>,
        Arc<Mutex<SinkLog>>,
    ) {
        let input = Arc::new(BoundedQueue::new(20));
        let sink = MockAudioSink::new();
        let log = sink.log_handle();
        let stage = SynthesisStage::new(
            input.clone(),
            Box::new(tts),
            Box::new(sink),
            50,
            None,
            fade(),
        );
        (stage, input, log)
    }

    #[test]
    fn test_reply_chunk_becomes_audio() {
        let (mut stage, input, log) = stage_with(MockTts::new().with_samples_per_call(4096));
        stage.initialize().unwrap();

        input.push(TextMessage::new("hello out loud"), Duration::ZERO);
        assert_eq!(stage.process().unwrap(), StageStatus::Continue);

        // The playback worker drains the PCM queue and writes to the sink
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while log.lock().unwrap().samples_written() == 0
            && std::time::Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(log.lock().unwrap().samples_written() > 0);

        stage.cleanup();
    }

    #[test]
    fn test_empty_synthesis_is_skipped() {
        let (mut stage, input, _log) =
            stage_with(MockTts::new().with_chunks(vec![None]));
        stage.initialize().unwrap();

        input.push(TextMessage::new("nothing"), Duration::ZERO);
        assert_eq!(stage.process().unwrap(), StageStatus::Continue);
        assert!(stage.pcm_queue().is_empty());

        stage.cleanup();
    }

    #[test]
    fn test_backend_failure_is_recoverable() {
        let (mut stage, input, _log) = stage_with(MockTts::new().with_speak_failure());
        stage.initialize().unwrap();

        input.push(TextMessage::new("x"), Duration::ZERO);
        match stage.process() {
            Err(StageError::Recoverable(_)) => {}
            other => panic!("expected recoverable error, got ok={}", other.is_ok()),
        }

        stage.cleanup();
    }

    #[test]
    fn test_init_failure_leaves_no_playback_worker() {
        let (mut stage, _input, _log) = stage_with(MockTts::new().with_init_failure());
        assert!(stage.initialize().is_err());
        assert!(stage.playback.is_none());
    }

    #[test]
    fn test_interrupt_flushes_input_and_silences_playback() {
        let flag = Arc::new(AtomicBool::new(true));
        let input = Arc::new(BoundedQueue::new(20));
        let sink = MockAudioSink::new();
        let log = sink.log_handle();
        let mut stage = SynthesisStage::new(
            input.clone(),
            Box::new(MockTts::new()),
            Box::new(sink),
            50,
            Some(flag.clone()),
            fade(),
        );
        stage.initialize().unwrap();

        input.push(TextMessage::new("stale"), Duration::ZERO);
        let pcm = stage.pcm_queue();
        pcm.push(PcmChunk::new(vec![1i16; 64], 22050), Duration::ZERO);

        assert!(stage.handle_control(&ControlMessage::Interrupt));
        assert!(input.is_empty());
        assert!(pcm.is_empty());
        assert!(log.lock().unwrap().discards >= 1);
        assert!(
            !flag.load(Ordering::Acquire),
            "interrupt handling must lower the flag"
        );

        stage.cleanup();
    }

    #[test]
    fn test_chunk_synthesized_after_interrupt_is_discarded() {
        let flag = Arc::new(AtomicBool::new(false));
        let input = Arc::new(BoundedQueue::new(20));
        let mut stage = SynthesisStage::new(
            input.clone(),
            Box::new(MockTts::new()),
            Box::new(MockAudioSink::new()),
            50,
            Some(flag.clone()),
            fade(),
        );
        stage.initialize().unwrap();

        input.push(TextMessage::new("about to be talked over"), Duration::ZERO);
        // Input queue does not observe the flag here, so the pop succeeds
        // and the discard check after speak() is what fires.
        flag.store(true, Ordering::Release);
        assert_eq!(stage.process().unwrap(), StageStatus::Continue);
        assert!(stage.pcm_queue().is_empty());

        stage.cleanup();
    }

    #[test]
    fn test_cleanup_stops_playback_and_backend() {
        let (mut stage, _input, log) = stage_with(MockTts::new());
        stage.initialize().unwrap();
        stage.cleanup();

        let log = log.lock().unwrap();
        assert_eq!(log.drains, 1, "orderly shutdown drains the device");
        assert!(log.closed);
    }
}
