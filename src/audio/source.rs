//! Microphone capture behind the `AudioSource` contract.
//!
//! A source owns the driver stream and forwards captured float frames into a
//! `FrameSink` callback from whatever thread the driver uses; the pipeline
//! points that callback at the shared ring buffer. Real capture lives behind
//! the `device` feature so the default build has no native dependencies.

use crate::error::Result;
use std::sync::Arc;

/// Receives captured mono f32 frames at the negotiated sample rate.
///
/// Called from the driver's thread; implementations must not block on
/// downstream stages.
pub type FrameSink = Arc<dyn Fn(&[f32]) + Send + Sync>;

/// Trait for audio capture devices.
///
/// This trait allows swapping implementations (real device vs mock).
pub trait AudioSource: Send {
    /// Open the device and negotiate the capture format.
    ///
    /// May be called again after a failure; implementations try their
    /// driver fallbacks internally.
    fn init(&mut self, device: Option<&str>, sample_rate: u32) -> Result<()>;

    /// Start (or restart) delivering frames to the sink.
    fn resume(&mut self) -> Result<()>;

    /// Stop delivering frames. The device stays open.
    fn pause(&mut self) -> Result<()>;
}

/// Mock audio source for testing.
///
/// Records lifecycle calls; tests feed audio into the ring buffer directly.
pub struct MockAudioSource {
    sink: Option<FrameSink>,
    initialized: bool,
    running: bool,
    init_failures_remaining: u32,
    should_fail_resume: bool,
    error_message: String,
}

impl MockAudioSource {
    /// Create a new mock audio source with default settings
    pub fn new() -> Self {
        Self {
            sink: None,
            initialized: false,
            running: false,
            init_failures_remaining: 0,
            should_fail_resume: false,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Configure the mock to fail the first `n` init attempts
    pub fn with_init_failures(mut self, n: u32) -> Self {
        self.init_failures_remaining = n;
        self
    }

    /// Configure the mock to fail on resume
    pub fn with_resume_failure(mut self) -> Self {
        self.should_fail_resume = true;
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Attach a frame sink, as a real source's constructor would
    pub fn with_sink(mut self, sink: FrameSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Check if init succeeded
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Check if the source is delivering frames
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Deliver frames through the attached sink, as the driver callback would
    pub fn emit(&self, frames: &[f32]) {
        if let Some(sink) = &self.sink {
            sink(frames);
        }
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn init(&mut self, _device: Option<&str>, _sample_rate: u32) -> Result<()> {
        if self.init_failures_remaining > 0 {
            self.init_failures_remaining -= 1;
            return Err(crate::error::VoxdError::AudioCapture {
                message: self.error_message.clone(),
            });
        }
        self.initialized = true;
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        if self.should_fail_resume {
            return Err(crate::error::VoxdError::AudioCapture {
                message: self.error_message.clone(),
            });
        }
        self.running = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }
}

#[cfg(feature = "device")]
pub use cpal_impl::CpalAudioSource;

#[cfg(feature = "device")]
mod cpal_impl {
    use super::{AudioSource, FrameSink};
    use crate::error::{Result, VoxdError};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    /// Wrapper for cpal::Stream to make it Send.
    ///
    /// SAFETY: the stream is only touched from the capture stage's thread;
    /// its methods are called synchronously and never shared.
    struct SendableStream(cpal::Stream);

    unsafe impl Send for SendableStream {}

    /// Real audio capture through cpal.
    ///
    /// Captures mono f32 at the requested rate, falling back to an i16
    /// stream with conversion when the device refuses float input.
    pub struct CpalAudioSource {
        sink: FrameSink,
        stream: Option<SendableStream>,
        running: bool,
    }

    impl CpalAudioSource {
        pub fn new(sink: FrameSink) -> Self {
            Self {
                sink,
                stream: None,
                running: false,
            }
        }

        fn find_device(name: Option<&str>) -> Result<cpal::Device> {
            let host = cpal::default_host();
            match name {
                Some(wanted) => {
                    let devices = host.input_devices().map_err(|e| VoxdError::AudioCapture {
                        message: format!("Failed to enumerate input devices: {}", e),
                    })?;
                    for device in devices {
                        if let Ok(device_name) = device.name()
                            && device_name == wanted
                        {
                            return Ok(device);
                        }
                    }
                    Err(VoxdError::AudioDeviceNotFound {
                        device: wanted.to_string(),
                    })
                }
                None => host
                    .default_input_device()
                    .ok_or_else(|| VoxdError::AudioDeviceNotFound {
                        device: "default".to_string(),
                    }),
            }
        }

        fn build_stream(&self, device: &cpal::Device, sample_rate: u32) -> Result<cpal::Stream> {
            let config = cpal::StreamConfig {
                channels: 1,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let err_callback = |err| {
                tracing::warn!("audio input stream error: {}", err);
            };

            // Preferred: f32 frames, forwarded as-is
            let sink = self.sink.clone();
            if let Ok(stream) = device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    sink(data);
                },
                err_callback,
                None,
            ) {
                return Ok(stream);
            }

            // Fallback: i16 frames, converted per callback
            let sink = self.sink.clone();
            device
                .build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let converted: Vec<f32> =
                            data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                        sink(&converted);
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| VoxdError::AudioCapture {
                    message: format!("Failed to build input stream: {}", e),
                })
        }
    }

    impl AudioSource for CpalAudioSource {
        fn init(&mut self, device: Option<&str>, sample_rate: u32) -> Result<()> {
            let device = Self::find_device(device)?;
            let stream = self.build_stream(&device, sample_rate)?;
            stream.pause().map_err(|e| VoxdError::AudioCapture {
                message: format!("Failed to pause new stream: {}", e),
            })?;
            self.stream = Some(SendableStream(stream));
            self.running = false;
            Ok(())
        }

        fn resume(&mut self) -> Result<()> {
            let stream = self.stream.as_ref().ok_or_else(|| VoxdError::AudioCapture {
                message: "resume called before init".to_string(),
            })?;
            stream.0.play().map_err(|e| VoxdError::AudioCapture {
                message: format!("Failed to start capture: {}", e),
            })?;
            self.running = true;
            Ok(())
        }

        fn pause(&mut self) -> Result<()> {
            if let Some(stream) = self.stream.as_ref() {
                stream.0.pause().map_err(|e| VoxdError::AudioCapture {
                    message: format!("Failed to pause capture: {}", e),
                })?;
            }
            self.running = false;
            Ok(())
        }
    }
}
