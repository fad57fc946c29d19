//! Playback stage: drains PCM chunks into the speaker device.
//!
//! Writes happen one period at a time with the abort and external-interrupt
//! flags checked between periods, so a barge-in silences the speaker within
//! roughly one hardware period. Orderly shutdown drains the device instead
//! of dropping it, so the last sentence is not clipped.

use crate::audio::sink::AudioSink;
use crate::defaults;
use crate::error::Result;
use crate::pipeline::message::{ControlMessage, PcmChunk};
use crate::pipeline::queue::{BoundedQueue, PopResult};
use crate::pipeline::worker::{Stage, StageError, StageStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

type SharedSink = Arc<Mutex<Box<dyn AudioSink>>>;

pub struct PlaybackStage {
    queue: Arc<BoundedQueue<PcmChunk>>,
    sink: SharedSink,
    /// Raised by the handle to abandon the chunk currently being written.
    abort: Arc<AtomicBool>,
    interrupt: Option<Arc<AtomicBool>>,
    default_rate: u32,
}

impl PlaybackStage {
    pub fn new(
        queue: Arc<BoundedQueue<PcmChunk>>,
        sink: Box<dyn AudioSink>,
        interrupt: Option<Arc<AtomicBool>>,
    ) -> Self {
        Self {
            queue,
            sink: Arc::new(Mutex::new(sink)),
            abort: Arc::new(AtomicBool::new(false)),
            interrupt,
            default_rate: defaults::PLAYBACK_RATE,
        }
    }

    /// Handle for silencing playback from another thread.
    pub fn handle(&self) -> PlaybackHandle {
        PlaybackHandle {
            queue: self.queue.clone(),
            sink: self.sink.clone(),
            abort: self.abort.clone(),
        }
    }

    fn should_abort(&self) -> bool {
        self.abort.load(Ordering::Acquire)
            || self
                .interrupt
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::Acquire))
    }
}

/// Remote control over a running playback stage.
#[derive(Clone)]
pub struct PlaybackHandle {
    queue: Arc<BoundedQueue<PcmChunk>>,
    sink: SharedSink,
    abort: Arc<AtomicBool>,
}

impl PlaybackHandle {
    /// Silence the speaker now: flush queued chunks, abandon the chunk in
    /// flight, and drop whatever the device holds.
    pub fn interrupt_audio_immediately(&self) {
        self.abort.store(true, Ordering::Release);
        let flushed = self.queue.flush();
        if flushed > 0 {
            debug!("flushed {} queued audio chunks", flushed);
        }
        if let Ok(mut sink) = self.sink.lock()
            && let Err(e) = sink.discard()
        {
            warn!("discarding device buffer failed: {}", e);
        }
    }
}

impl Stage for PlaybackStage {
    fn name(&self) -> &'static str {
        "playback"
    }

    fn initialize(&mut self) -> Result<()> {
        self.sink.lock().unwrap().open(self.default_rate)
    }

    fn process(&mut self) -> std::result::Result<StageStatus, StageError> {
        let chunk = match self.queue.pop_blocking() {
            PopResult::Item(chunk) => chunk,
            PopResult::Interrupted => {
                // Wait out the raised flag instead of spinning on the pop.
                std::thread::sleep(std::time::Duration::from_millis(defaults::STAGE_WAIT_MS));
                return Ok(StageStatus::Continue);
            }
            PopResult::Empty | PopResult::Timeout => return Ok(StageStatus::Continue),
            PopResult::Shutdown => return Ok(StageStatus::Shutdown),
        };

        if chunk.samples.is_empty() {
            return Ok(StageStatus::Continue);
        }

        // A fresh chunk supersedes any abort raised for the previous one.
        self.abort.store(false, Ordering::Release);

        {
            let mut sink = self.sink.lock().unwrap();
            if sink.sample_rate() != Some(chunk.sample_rate) {
                debug!("reopening device at {} Hz", chunk.sample_rate);
                sink.open(chunk.sample_rate).map_err(|e| {
                    StageError::Recoverable(format!("device reopen failed: {}", e))
                })?;
            }
        }

        for period in chunk.samples.chunks(defaults::PLAYBACK_PERIOD_FRAMES) {
            if self.should_abort() {
                debug!("playback aborted mid-chunk");
                break;
            }
            // Lock per period so an interrupt is never blocked behind a
            // whole chunk.
            let mut sink = self.sink.lock().unwrap();
            if let Err(e) = sink.write(period) {
                return Err(StageError::Recoverable(format!("device write failed: {}", e)));
            }
        }

        Ok(StageStatus::Continue)
    }

    fn handle_control(&mut self, msg: &ControlMessage) -> bool {
        match msg {
            ControlMessage::Interrupt | ControlMessage::Flush => {
                self.handle().interrupt_audio_immediately();
                true
            }
            _ => false,
        }
    }

    fn cleanup(&mut self) {
        let mut sink = self.sink.lock().unwrap();
        if let Err(e) = sink.drain() {
            warn!("draining device failed: {}", e);
        }
        sink.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sink::{MockAudioSink, SinkLog};
    use std::time::Duration;

    fn stage_with(
        sink: MockAudioSink,
    ) -> (
        PlaybackStage,
        Arc<BoundedQueue<PcmChunk>>,
        Arc<Mutex<SinkLog>>,
    ) {
        let log = sink.log_handle();
        let queue = Arc::new(BoundedQueue::new(50));
        let stage = PlaybackStage::new(queue.clone(), Box::new(sink), None);
        (stage, queue, log)
    }

    #[test]
    fn test_initialize_opens_default_rate() {
        let (mut stage, _queue, log) = stage_with(MockAudioSink::new());
        stage.initialize().unwrap();
        assert_eq!(log.lock().unwrap().opens, vec![defaults::PLAYBACK_RATE]);
    }

    #[test]
    fn test_chunk_is_written_in_periods() {
        let (mut stage, queue, log) = stage_with(MockAudioSink::new());
        stage.initialize().unwrap();

        let samples = vec![1i16; defaults::PLAYBACK_PERIOD_FRAMES * 2 + 100];
        queue.push(PcmChunk::new(samples, defaults::PLAYBACK_RATE), Duration::ZERO);

        assert_eq!(stage.process().unwrap(), StageStatus::Continue);

        let log = log.lock().unwrap();
        assert_eq!(log.writes.len(), 3);
        assert_eq!(
            log.samples_written(),
            defaults::PLAYBACK_PERIOD_FRAMES * 2 + 100
        );
    }

    #[test]
    fn test_rate_change_reopens_device_before_writing() {
        let (mut stage, queue, log) = stage_with(MockAudioSink::new());
        stage.initialize().unwrap();

        queue.push(PcmChunk::new(vec![1i16; 256], 22050), Duration::ZERO);
        queue.push(PcmChunk::new(vec![2i16; 256], 16000), Duration::ZERO);

        stage.process().unwrap();
        stage.process().unwrap();

        let log = log.lock().unwrap();
        // Initial open at the default rate, reopen only on the rate switch
        assert_eq!(log.opens, vec![22050, 16000]);
        assert_eq!(log.writes, vec![(22050, 256), (16000, 256)]);
    }

    #[test]
    fn test_empty_chunk_is_skipped() {
        let (mut stage, queue, log) = stage_with(MockAudioSink::new());
        stage.initialize().unwrap();

        queue.push(PcmChunk::new(Vec::new(), 22050), Duration::ZERO);
        stage.process().unwrap();
        assert!(log.lock().unwrap().writes.is_empty());
    }

    #[test]
    fn test_queue_shutdown_ends_stage() {
        let (mut stage, queue, _log) = stage_with(MockAudioSink::new());
        stage.initialize().unwrap();
        queue.shutdown();
        assert_eq!(stage.process().unwrap(), StageStatus::Shutdown);
    }

    #[test]
    fn test_interrupt_handle_flushes_and_discards() {
        let (mut stage, queue, log) = stage_with(MockAudioSink::new());
        stage.initialize().unwrap();

        queue.push(PcmChunk::new(vec![1i16; 100], 22050), Duration::ZERO);
        queue.push(PcmChunk::new(vec![2i16; 100], 22050), Duration::ZERO);

        let handle = stage.handle();
        handle.interrupt_audio_immediately();

        assert!(queue.is_empty());
        assert_eq!(log.lock().unwrap().discards, 1);
    }

    #[test]
    fn test_abort_stops_mid_chunk_writes() {
        let (mut stage, queue, log) = stage_with(MockAudioSink::new());
        stage.initialize().unwrap();

        // Raise abort, then push a multi-period chunk: the fresh chunk
        // clears the stale abort, so everything plays.
        stage.handle().interrupt_audio_immediately();
        let samples = vec![1i16; defaults::PLAYBACK_PERIOD_FRAMES * 4];
        queue.push(PcmChunk::new(samples, defaults::PLAYBACK_RATE), Duration::ZERO);
        stage.process().unwrap();
        assert_eq!(
            log.lock().unwrap().samples_written(),
            defaults::PLAYBACK_PERIOD_FRAMES * 4
        );
    }

    #[test]
    fn test_external_interrupt_flag_stops_writes() {
        let flag = Arc::new(AtomicBool::new(false));
        let sink = MockAudioSink::new();
        let log = sink.log_handle();
        let queue = Arc::new(BoundedQueue::new(50));
        let mut stage = PlaybackStage::new(queue.clone(), Box::new(sink), Some(flag.clone()));
        stage.initialize().unwrap();

        flag.store(true, Ordering::Release);
        let samples = vec![1i16; defaults::PLAYBACK_PERIOD_FRAMES * 4];
        queue.push(PcmChunk::new(samples, defaults::PLAYBACK_RATE), Duration::ZERO);
        stage.process().unwrap();

        // No period is written while the flag is up
        assert_eq!(log.lock().unwrap().samples_written(), 0);
    }

    #[test]
    fn test_cleanup_drains_then_closes() {
        let (mut stage, _queue, log) = stage_with(MockAudioSink::new());
        stage.initialize().unwrap();
        stage.cleanup();

        let log = log.lock().unwrap();
        assert_eq!(log.drains, 1);
        assert!(log.closed);
        assert_eq!(log.discards, 0, "orderly shutdown must not drop audio");
    }
}
