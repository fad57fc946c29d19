//! Messages flowing between pipeline stages.

#[cfg(feature = "stats")]
use std::time::{Duration, Instant};

/// A transcribed utterance or a reply chunk.
///
/// Producers never enqueue empty text; they drop it instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMessage {
    pub text: String,
    #[cfg(feature = "stats")]
    created_at: Instant,
}

impl TextMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            #[cfg(feature = "stats")]
            created_at: Instant::now(),
        }
    }

    /// Time since this message was created.
    #[cfg(feature = "stats")]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// One block of synthesized PCM on its way to the speaker.
///
/// Adjacent chunks may carry different sample rates; playback reopens
/// the device when the rate changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmChunk {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl PcmChunk {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Playback length of this chunk.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

/// In-band control delivered to a stage's inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Drop in-flight work and flush downstream queues.
    Interrupt,
    /// Flush downstream queues without aborting in-flight work.
    Flush,
    /// Stop dispatching work until Resume.
    Pause,
    Resume,
    /// Exit the worker loop.
    Shutdown,
}
