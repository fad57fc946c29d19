//! Generation stage: prompts in, streamed reply chunks out.
//!
//! The backend's fragments are re-chunked here (see `chunker`) so playback
//! can start on the first sentence while the rest is still being generated.
//! An interrupt flushes both queues; if a generation is in flight, its
//! remaining fragments are discarded as they arrive, since a synchronous
//! backend has no cancel hook.

use crate::defaults;
use crate::error::Result;
use crate::llm::LlmBackend;
use crate::pipeline::chunker::{ChunkAssembler, ChunkerConfig};
use crate::pipeline::message::{ControlMessage, TextMessage};
use crate::pipeline::queue::{BoundedQueue, PopResult, PushResult};
use crate::pipeline::worker::{Stage, StageError, StageStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct GenerationStage {
    input: Arc<BoundedQueue<TextMessage>>,
    output: Arc<BoundedQueue<TextMessage>>,
    llm: Box<dyn LlmBackend>,
    chunker: ChunkerConfig,
    model_path: PathBuf,
    interrupt: Option<Arc<AtomicBool>>,
}

impl GenerationStage {
    pub fn new(
        input: Arc<BoundedQueue<TextMessage>>,
        output: Arc<BoundedQueue<TextMessage>>,
        llm: Box<dyn LlmBackend>,
        chunker: ChunkerConfig,
        model_path: PathBuf,
        interrupt: Option<Arc<AtomicBool>>,
    ) -> Self {
        Self {
            input,
            output,
            llm,
            chunker,
            model_path,
            interrupt,
        }
    }
}

/// Push one reply chunk downstream, dropping empties.
fn emit_chunk(output: &BoundedQueue<TextMessage>, chunk: String) {
    if chunk.is_empty() {
        return;
    }
    match output.push(
        TextMessage::new(chunk),
        Duration::from_millis(defaults::STAGE_PUSH_TIMEOUT_MS),
    ) {
        PushResult::Ok => {}
        PushResult::Timeout => warn!("reply chunk dropped, response queue full"),
        PushResult::Shutdown => {}
    }
}

impl Stage for GenerationStage {
    fn name(&self) -> &'static str {
        "generation"
    }

    fn initialize(&mut self) -> Result<()> {
        self.llm.init(&self.model_path)
    }

    fn process(&mut self) -> std::result::Result<StageStatus, StageError> {
        let prompt = match self
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

        #[cfg(feature = "stats")]
        debug!("prompt queued for {} ms", prompt.age().as_millis());
        info!("generating reply for: {}", prompt.text);

        let mut assembler = ChunkAssembler::new(self.chunker);
        let output = self.output.clone();
        let interrupt = self.interrupt.clone();
        let mut discarded = false;

        let result = self.llm.generate_stream(&prompt.text, &mut |fragment| {
            if interrupt
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::Acquire))
            {
                // Barge-in mid-generation: swallow the rest of this reply.
                discarded = true;
                return;
            }
            assembler.feed(fragment, &mut |chunk| emit_chunk(&output, chunk));
        });

        if discarded {
            debug!("reply abandoned after interrupt");
            return Ok(StageStatus::Continue);
        }
        assembler.finish(&mut |chunk| emit_chunk(&output, chunk));

        match result {
            Ok(()) => Ok(StageStatus::Continue),
            Err(e) => Err(StageError::Recoverable(format!(
                "generation failed for prompt: {}",
                e
            ))),
        }
    }

    fn handle_control(&mut self, msg: &ControlMessage) -> bool {
        match msg {
            ControlMessage::Interrupt | ControlMessage::Flush => {
                let dropped_in = self.input.flush();
                let dropped_out = self.output.flush();
                if dropped_in > 0 || dropped_out > 0 {
                    debug!(
                        "flushed {} prompts and {} reply chunks",
                        dropped_in, dropped_out
                    );
                }
                true
            }
            _ => false,
        }
    }

    fn cleanup(&mut self) {
        self.llm.shutdown();
    }
}
