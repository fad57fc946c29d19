//! Language-model backend contract.
//!
//! Generation is modeled as a synchronous call that hands each produced
//! fragment to a consumer closure; the generation stage already runs on its
//! own thread, so no extra scheduling is needed. The model runtime itself is
//! an external collaborator: integrators implement this trait for their
//! runtime, and the mock covers the pipeline's own tests.

use crate::error::Result;
use std::path::Path;

/// Trait for language-model backends.
pub trait LlmBackend: Send {
    /// Load the model. Must succeed before `generate_stream` is called.
    fn init(&mut self, model_path: &Path) -> Result<()>;

    /// Generate a reply to `prompt`, delivering fragments through
    /// `on_chunk` as they are produced. Returns once the reply is complete
    /// or the backend gives up.
    fn generate_stream(
        &mut self,
        prompt: &str,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<()>;

    /// Release model resources.
    fn shutdown(&mut self);
}

/// What the mock emits for a prompt.
enum MockReply {
    /// Fixed fragments, emitted in order for every prompt.
    Scripted(Vec<String>),
    /// The prompt reversed, emitted as one fragment.
    ReverseEcho,
    /// The prompt echoed back as one fragment.
    Echo,
}

/// Mock LLM backend for testing.
pub struct MockLlm {
    reply: MockReply,
    should_fail_init: bool,
    should_fail_generate: bool,
    init_calls: usize,
    shutdown_calls: usize,
    generate_calls: usize,
}

impl MockLlm {
    /// Create a mock that echoes prompts back
    pub fn new() -> Self {
        Self {
            reply: MockReply::Echo,
            should_fail_init: false,
            should_fail_generate: false,
            init_calls: 0,
            shutdown_calls: 0,
            generate_calls: 0,
        }
    }

    /// Configure fixed fragments emitted for every prompt
    pub fn with_fragments(mut self, fragments: &[&str]) -> Self {
        self.reply = MockReply::Scripted(fragments.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Configure the mock to reply with the reversed prompt in one fragment
    pub fn with_reverse_echo(mut self) -> Self {
        self.reply = MockReply::ReverseEcho;
        self
    }

    /// Configure the mock to fail on init
    pub fn with_init_failure(mut self) -> Self {
        self.should_fail_init = true;
        self
    }

    /// Configure the mock to fail on generate
    pub fn with_generate_failure(mut self) -> Self {
        self.should_fail_generate = true;
        self
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmBackend for MockLlm {
    fn init(&mut self, _model_path: &Path) -> Result<()> {
        self.init_calls += 1;
        if self.should_fail_init {
            return Err(crate::error::VoxdError::Generation {
                message: "mock init failure".to_string(),
            });
        }
        Ok(())
    }

    fn generate_stream(
        &mut self,
        prompt: &str,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<()> {
        self.generate_calls += 1;
        if self.should_fail_generate {
            return Err(crate::error::VoxdError::Generation {
                message: "mock generation failure".to_string(),
            });
        }

        match &self.reply {
            MockReply::Scripted(fragments) => {
                for fragment in fragments {
                    on_chunk(fragment);
                }
            }
            MockReply::ReverseEcho => {
                let reversed: String = prompt.chars().rev().collect();
                on_chunk(&reversed);
            }
            MockReply::Echo => on_chunk(prompt),
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.shutdown_calls += 1;
    }
}
