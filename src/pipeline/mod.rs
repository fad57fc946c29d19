//! The streaming voice pipeline.
//!
//! Four long-lived stages on their own threads, connected by bounded
//! single-producer/single-consumer queues: capture+VAD → generation →
//! synthesis → playback. The manager composes them for a mode; a single
//! shared interrupt flag gives the whole pipeline a fast cancellation path.

pub mod capture_stage;
pub mod chunker;
pub mod factory;
pub mod generation_stage;
pub mod manager;
pub mod message;
pub mod playback_stage;
pub mod queue;
pub mod synthesis_stage;
pub mod worker;

pub use capture_stage::{CaptureSettings, CaptureStage};
pub use chunker::{ChunkAssembler, ChunkerConfig};
pub use factory::create_pipeline;
pub use generation_stage::GenerationStage;
pub use manager::{Backends, PipelineConfig, PipelineManager, PipelineMode, PipelineStats};
pub use message::{ControlMessage, PcmChunk, TextMessage};
pub use playback_stage::{PlaybackHandle, PlaybackStage};
pub use queue::{BoundedQueue, PopResult, PushResult};
pub use synthesis_stage::{FadeConfig, SynthesisStage, fade_out_tail};
pub use worker::{Stage, StageError, StageRunner, StageStatus};
