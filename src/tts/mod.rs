//! Text-to-speech backend contract.

pub mod piper;

use crate::error::Result;
use crate::pipeline::message::PcmChunk;

/// Trait for text-to-speech backends.
pub trait TtsBackend: Send {
    /// Prepare the synthesizer.
    fn init(&mut self) -> Result<()>;

    /// Synthesize `text` into one PCM chunk at the backend's native rate.
    ///
    /// `Ok(None)` means the backend produced no audio; callers log and
    /// skip. Errors are backend failures.
    fn speak(&mut self, text: &str) -> Result<Option<PcmChunk>>;

    /// Release synthesizer resources.
    fn shutdown(&mut self);
}

/// Mock TTS backend for testing.
///
/// Synthesizes a fixed number of samples per request, or a scripted
/// per-call sequence of chunks.
pub struct MockTts {
    chunks: Vec<Option<PcmChunk>>,
    next: usize,
    samples_per_call: usize,
    sample_rate: u32,
    should_fail_init: bool,
    should_fail_speak: bool,
    init_calls: usize,
    shutdown_calls: usize,
    speak_calls: usize,
}

impl MockTts {
    /// Create a mock producing 1024 samples at 22050 Hz per request
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            next: 0,
            samples_per_call: 1024,
            sample_rate: 22_050,
            should_fail_init: false,
            should_fail_speak: false,
            init_calls: 0,
            shutdown_calls: 0,
            speak_calls: 0,
        }
    }

    /// Configure samples produced per request
    pub fn with_samples_per_call(mut self, n: usize) -> Self {
        self.samples_per_call = n;
        self
    }

    /// Configure the native sample rate
    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Configure a per-call sequence of chunks, then the default
    pub fn with_chunks(mut self, chunks: Vec<Option<PcmChunk>>) -> Self {
        self.chunks = chunks;
        self
    }

    /// Configure the mock to fail on init
    pub fn with_init_failure(mut self) -> Self {
        self.should_fail_init = true;
        self
    }

    /// Configure the mock to fail on speak
    pub fn with_speak_failure(mut self) -> Self {
        self.should_fail_speak = true;
        self
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls
    }

    pub fn speak_calls(&self) -> usize {
        self.speak_calls
    }
}

impl Default for MockTts {
    fn default() -> Self {
        Self::new()
    }
}

impl TtsBackend for MockTts {
    fn init(&mut self) -> Result<()> {
        self.init_calls += 1;
        if self.should_fail_init {
            return Err(crate::error::VoxdError::Synthesis {
                message: "mock init failure".to_string(),
            });
        }
        Ok(())
    }

    fn speak(&mut self, _text: &str) -> Result<Option<PcmChunk>> {
        self.speak_calls += 1;
        if self.should_fail_speak {
            return Err(crate::error::VoxdError::Synthesis {
                message: "mock synthesis failure".to_string(),
            });
        }

        if self.next < self.chunks.len() {
            let chunk = self.chunks[self.next].clone();
            self.next += 1;
            return Ok(chunk);
        }

        // A quiet ramp rather than silence, so fade-out tests see signal.
        let samples: Vec<i16> = (0..self.samples_per_call)
            .map(|i| ((i % 128) as i16 - 64) * 64)
            .collect();
        Ok(Some(PcmChunk::new(samples, self.sample_rate)))
    }

    fn shutdown(&mut self) {
        self.shutdown_calls += 1;
    }
}
