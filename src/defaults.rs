//! Default configuration constants for voxd.
//!
//! Shared between the config layer and the pipeline so the two never
//! disagree about what "default" means.

/// Default audio capture sample rate in Hz.
///
/// 16kHz is the standard for speech recognition and what every common
/// STT model expects as input.
pub const SAMPLE_RATE: u32 = 16_000;

/// Default capture ring buffer length in milliseconds.
///
/// 30 seconds gives the VAD and transcription windows plenty of history
/// without the buffer ever being the limiting factor.
pub const BUFFER_MS: u32 = 30_000;

/// Default VAD energy-ratio threshold.
///
/// Voice is reported when the RMS energy of the most recent analysis
/// window exceeds this fraction of the whole window's energy. Ratio-based
/// detection self-normalizes to the current microphone gain.
pub const VAD_THRESHOLD: f32 = 0.6;

/// Length of audio handed to the transcriber once voice is detected (ms).
pub const VAD_CAPTURE_MS: u32 = 10_000;

/// How much recent audio the VAD inspects each cycle (ms).
pub const VAD_PRE_WINDOW_MS: u32 = 2_000;

/// Most-recent segment the VAD compares against the whole window (ms).
///
/// Doubles as the start-of-analysis threshold: with fewer samples than
/// this buffered, detection always reports silence.
pub const VAD_ANALYSIS_MS: u32 = 1_250;

/// High-pass filter cutoff applied before energy analysis (Hz).
pub const VAD_FREQ_CUTOFF: f32 = 100.0;

/// Sleep between VAD polls of the ring buffer (ms).
pub const CAPTURE_POLL_MS: u64 = 50;

/// Attempts made to bring up the capture device before giving up.
pub const AUDIO_INIT_ATTEMPTS: u32 = 8;

/// Delay between capture device bring-up attempts (ms).
pub const AUDIO_INIT_RETRY_MS: u64 = 500;

/// Transcribed-utterance queue capacity.
pub const TEXT_QUEUE_CAPACITY: usize = 20;

/// Reply-chunk queue capacity.
pub const RESPONSE_QUEUE_CAPACITY: usize = 20;

/// Synthesized PCM queue capacity.
pub const PCM_QUEUE_CAPACITY: usize = 50;

/// Deadline for pushing a text prompt through the alt-text path (ms).
pub const TEXT_TIMEOUT_MS: u64 = 500;

/// Deadline for the alt-text path to see the first reply chunk (ms).
pub const RESPONSE_TIMEOUT_MS: u64 = 1_000;

/// Deadline for a stage pushing a reply chunk or PCM chunk downstream (ms).
pub const STAGE_PUSH_TIMEOUT_MS: u64 = 1_000;

/// Wait quantum for stage queue pops and control waits (ms).
///
/// Bounds how late a stop or interrupt can be observed.
pub const STAGE_WAIT_MS: u64 = 100;

/// Back-off after a recoverable stage error (ms).
pub const ERROR_BACKOFF_MS: u64 = 100;

/// Completed words that trigger a reply-chunk flush.
pub const WORDS_PER_CHUNK: usize = 4;

/// Reply-chunk byte ceiling; flushes even mid-word.
pub const MAX_CHUNK_BYTES: usize = 96;

/// Default playback device rate until the first chunk declares one (Hz).
pub const PLAYBACK_RATE: u32 = 22_050;

/// Frames written to the playback device per period.
pub const PLAYBACK_PERIOD_FRAMES: usize = 1_024;

/// Trailing fade-out applied to synthesized chunks (ms).
pub const FADE_MS: u32 = 325;

/// Fade-out curve strength; exponent is `1 + strength / 25`.
pub const FADE_STRENGTH: u32 = 120;
