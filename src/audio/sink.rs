//! Speaker playback behind the `AudioSink` contract.
//!
//! The contract separates the two ways playback ends: `discard` throws away
//! whatever the device holds so barge-in silences the speaker now, while
//! `drain` lets the device finish what it holds so orderly shutdown does not
//! clip the last words. Real playback lives behind the `device` feature.

use crate::error::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Trait for audio playback devices.
pub trait AudioSink: Send {
    /// Open (or reopen) the device at the given rate, S16_LE mono.
    fn open(&mut self, sample_rate: u32) -> Result<()>;

    /// Write one block of samples, blocking on hardware pacing.
    ///
    /// Implementations recover from underruns internally and resume from
    /// the next unwritten sample.
    fn write(&mut self, samples: &[i16]) -> Result<()>;

    /// Throw away queued audio and re-prepare the device for the next write.
    fn discard(&mut self) -> Result<()>;

    /// Let queued audio finish playing.
    fn drain(&mut self) -> Result<()>;

    /// Close the device. Safe to call when not open.
    fn close(&mut self);

    /// Rate the device is currently opened at, if open.
    fn sample_rate(&self) -> Option<u32>;
}

/// Recorded operations of a mock sink, shared with the test.
#[derive(Debug, Default, Clone)]
pub struct SinkLog {
    /// Rate passed to each `open` call, in order.
    pub opens: Vec<u32>,
    /// (rate, samples) of each `write` call, in order.
    pub writes: Vec<(u32, usize)>,
    pub discards: usize,
    pub drains: usize,
    pub closed: bool,
}

impl SinkLog {
    /// Total samples written since construction.
    pub fn samples_written(&self) -> usize {
        self.writes.iter().map(|(_, n)| n).sum()
    }
}

/// Mock playback sink for testing.
pub struct MockAudioSink {
    log: Arc<Mutex<SinkLog>>,
    rate: Option<u32>,
    write_delay: Duration,
    should_fail_open: bool,
}

impl MockAudioSink {
    /// Create a new mock sink with default settings
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(SinkLog::default())),
            rate: None,
            write_delay: Duration::ZERO,
            should_fail_open: false,
        }
    }

    /// Configure a per-write sleep to simulate hardware pacing
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// Configure the mock to fail on open
    pub fn with_open_failure(mut self) -> Self {
        self.should_fail_open = true;
        self
    }

    /// Handle for inspecting recorded operations after the sink moved
    /// into the pipeline
    pub fn log_handle(&self) -> Arc<Mutex<SinkLog>> {
        self.log.clone()
    }
}

impl Default for MockAudioSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for MockAudioSink {
    fn open(&mut self, sample_rate: u32) -> Result<()> {
        if self.should_fail_open {
            return Err(crate::error::VoxdError::AudioPlayback {
                message: "mock open failure".to_string(),
            });
        }
        self.rate = Some(sample_rate);
        self.log.lock().unwrap().opens.push(sample_rate);
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<()> {
        let rate = self.rate.unwrap_or(0);
        self.log.lock().unwrap().writes.push((rate, samples.len()));
        if !self.write_delay.is_zero() {
            std::thread::sleep(self.write_delay);
        }
        Ok(())
    }

    fn discard(&mut self) -> Result<()> {
        self.log.lock().unwrap().discards += 1;
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        self.log.lock().unwrap().drains += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.rate = None;
        self.log.lock().unwrap().closed = true;
    }

    fn sample_rate(&self) -> Option<u32> {
        self.rate
    }
}

#[cfg(feature = "device")]
pub use cpal_impl::CpalAudioSink;

#[cfg(feature = "device")]
mod cpal_impl {
    use super::AudioSink;
    use crate::error::{Result, VoxdError};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::collections::VecDeque;
    use std::sync::{Arc, Condvar, Mutex};
    use std::time::Duration;

    /// Samples buffered ahead of the output callback before `write` blocks.
    const HIGH_WATER_SAMPLES: usize = 8_192;

    struct SendableStream(cpal::Stream);

    // SAFETY: the stream is only touched under the sink owner's control.
    unsafe impl Send for SendableStream {}

    #[derive(Default)]
    struct Shared {
        queue: Mutex<VecDeque<i16>>,
        consumed: Condvar,
    }

    /// Real playback through cpal: `write` feeds a shared queue the output
    /// callback drains, blocking while the queue is above the high-water
    /// mark so the pipeline is paced by the hardware.
    pub struct CpalAudioSink {
        shared: Arc<Shared>,
        stream: Option<SendableStream>,
        rate: Option<u32>,
    }

    impl CpalAudioSink {
        pub fn new() -> Self {
            Self {
                shared: Arc::new(Shared::default()),
                stream: None,
                rate: None,
            }
        }

    }

    impl Default for CpalAudioSink {
        fn default() -> Self {
            Self::new()
        }
    }

    impl AudioSink for CpalAudioSink {
        fn open(&mut self, sample_rate: u32) -> Result<()> {
            self.close();

            let host = cpal::default_host();
            let device =
                host.default_output_device()
                    .ok_or_else(|| VoxdError::AudioDeviceNotFound {
                        device: "default output".to_string(),
                    })?;

            let config = cpal::StreamConfig {
                channels: 1,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let shared = self.shared.clone();
            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        let mut queue = shared.queue.lock().unwrap();
                        for slot in data.iter_mut() {
                            *slot = queue.pop_front().unwrap_or(0);
                        }
                        shared.consumed.notify_all();
                    },
                    |err| {
                        tracing::warn!("audio output stream error: {}", err);
                    },
                    None,
                )
                .map_err(|e| VoxdError::AudioPlayback {
                    message: format!("Failed to build output stream: {}", e),
                })?;

            stream.play().map_err(|e| VoxdError::AudioPlayback {
                message: format!("Failed to start playback: {}", e),
            })?;

            self.stream = Some(SendableStream(stream));
            self.rate = Some(sample_rate);
            Ok(())
        }

        fn write(&mut self, samples: &[i16]) -> Result<()> {
            if self.stream.is_none() {
                return Err(VoxdError::AudioPlayback {
                    message: "write on closed device".to_string(),
                });
            }

            let mut queue = self.shared.queue.lock().unwrap();
            queue.extend(samples.iter().copied());

            // Block until the callback has drained below the high-water
            // mark; the deadline keeps us live if the stream dies.
            let deadline = std::time::Instant::now() + Duration::from_secs(10);
            while queue.len() > HIGH_WATER_SAMPLES && std::time::Instant::now() < deadline {
                let (guard, _) = self
                    .shared
                    .consumed
                    .wait_timeout(queue, Duration::from_millis(100))
                    .unwrap();
                queue = guard;
            }
            Ok(())
        }

        fn discard(&mut self) -> Result<()> {
            self.shared.queue.lock().unwrap().clear();
            self.shared.consumed.notify_all();
            Ok(())
        }

        fn drain(&mut self) -> Result<()> {
            let deadline = std::time::Instant::now() + Duration::from_secs(10);
            let mut queue = self.shared.queue.lock().unwrap();
            while !queue.is_empty() && std::time::Instant::now() < deadline {
                let (guard, _) = self
                    .shared
                    .consumed
                    .wait_timeout(queue, Duration::from_millis(100))
                    .unwrap();
                queue = guard;
            }
            drop(queue);
            // Give the hardware buffer itself time to play out.
            std::thread::sleep(Duration::from_millis(100));
            Ok(())
        }

        fn close(&mut self) {
            self.stream = None;
            self.rate = None;
            self.shared.queue.lock().unwrap().clear();
            self.shared.consumed.notify_all();
        }

        fn sample_rate(&self) -> Option<u32> {
            self.rate
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_sink_records_opens_and_writes() {
        let mut sink = MockAudioSink::new();
        let log = sink.log_handle();

        sink.open(22050).unwrap();
        sink.write(&[0i16; 512]).unwrap();
        sink.open(16000).unwrap();
        sink.write(&[0i16; 256]).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.opens, vec![22050, 16000]);
        assert_eq!(log.writes, vec![(22050, 512), (16000, 256)]);
        assert_eq!(log.samples_written(), 768);
    }

    #[test]
    fn test_mock_sink_rate_tracks_open() {
        let mut sink = MockAudioSink::new();
        assert_eq!(sink.sample_rate(), None);

        sink.open(22050).unwrap();
        assert_eq!(sink.sample_rate(), Some(22050));

        sink.close();
        assert_eq!(sink.sample_rate(), None);
        assert!(sink.log_handle().lock().unwrap().closed);
    }

    #[test]
    fn test_mock_sink_discard_and_drain_counters() {
        let mut sink = MockAudioSink::new();
        let log = sink.log_handle();

        sink.open(22050).unwrap();
        sink.discard().unwrap();
        sink.discard().unwrap();
        sink.drain().unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.discards, 2);
        assert_eq!(log.drains, 1);
    }

    #[test]
    fn test_mock_sink_open_failure() {
        let mut sink = MockAudioSink::new().with_open_failure();
        assert!(sink.open(22050).is_err());
        assert_eq!(sink.sample_rate(), None);
    }

    #[test]
    fn test_sink_is_object_safe() {
        let mut sink: Box<dyn AudioSink> = Box::new(MockAudioSink::new());
        sink.open(22050).unwrap();
        sink.write(&[1i16, 2, 3]).unwrap();
        sink.drain().unwrap();
        sink.close();
    }
}
