//! Audio capture, playback, and analysis.

pub mod ring_buffer;
pub mod sink;
pub mod source;
pub mod vad;

pub use ring_buffer::RingBuffer;
pub use sink::{AudioSink, MockAudioSink, SinkLog};
pub use source::{AudioSource, FrameSink, MockAudioSource};
pub use vad::{VadConfig, detect_voice, high_pass_filter};
