//! Speech-to-text backend contract and transcript cleanup.

pub mod whisper;

use crate::error::Result;
use std::path::Path;

/// Trait for speech-to-text backends.
///
/// This trait allows swapping implementations (real model vs mock).
pub trait SttBackend: Send {
    /// Load the model. Must succeed before `transcribe` is called.
    fn init(&mut self, model_path: &Path) -> Result<()>;

    /// Transcribe one utterance of mono f32 PCM at the capture rate.
    ///
    /// `Ok(None)` means the backend heard nothing usable; callers drop it
    /// silently. Errors are backend failures and get logged.
    fn transcribe(&mut self, samples: &[f32]) -> Result<Option<String>>;

    /// Release model resources.
    fn shutdown(&mut self);
}

/// Clean up raw transcriber output before it enters the pipeline.
///
/// Drops square-bracket and parenthesised segments (timestamp and event
/// markers), strips characters outside `[A-Za-z0-9.,?!:'\-\s]`, trims, and
/// keeps only the first line. An empty result means the utterance should
/// be dropped rather than enqueued.
pub fn normalize_transcript(raw: &str) -> String {
    let mut kept = String::with_capacity(raw.len());
    let mut bracket_depth = 0usize;
    let mut paren_depth = 0usize;

    for ch in raw.chars() {
        match ch {
            '[' => bracket_depth += 1,
            ']' => bracket_depth = bracket_depth.saturating_sub(1),
            '(' => paren_depth += 1,
            ')' => paren_depth = paren_depth.saturating_sub(1),
            _ if bracket_depth == 0 && paren_depth == 0 => {
                let allowed = ch.is_ascii_alphanumeric()
                    || ch.is_whitespace()
                    || matches!(ch, '.' | ',' | '?' | '!' | ':' | '\'' | '-');
                if allowed {
                    kept.push(ch);
                }
            }
            _ => {}
        }
    }

    kept.trim()
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Mock STT backend for testing.
pub struct MockStt {
    responses: Vec<Result<Option<String>>>,
    next: usize,
    default_response: Option<String>,
    should_fail_init: bool,
    init_calls: usize,
    shutdown_calls: usize,
    transcribe_calls: usize,
}

impl MockStt {
    /// Create a new mock returning no transcription
    pub fn new() -> Self {
        Self {
            responses: Vec::new(),
            next: 0,
            default_response: None,
            should_fail_init: false,
            init_calls: 0,
            shutdown_calls: 0,
            transcribe_calls: 0,
        }
    }

    /// Configure the mock to always return the given text
    pub fn with_response(mut self, text: &str) -> Self {
        self.default_response = Some(text.to_string());
        self
    }

    /// Configure a per-call sequence of results, then the default
    pub fn with_sequence(mut self, responses: Vec<Result<Option<String>>>) -> Self {
        self.responses = responses;
        self
    }

    /// Configure the mock to fail on init
    pub fn with_init_failure(mut self) -> Self {
        self.should_fail_init = true;
        self
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls
    }

    pub fn transcribe_calls(&self) -> usize {
        self.transcribe_calls
    }
}

impl Default for MockStt {
    fn default() -> Self {
        Self::new()
    }
}

impl SttBackend for MockStt {
    fn init(&mut self, _model_path: &Path) -> Result<()> {
        self.init_calls += 1;
        if self.should_fail_init {
            return Err(crate::error::VoxdError::Transcription {
                message: "mock init failure".to_string(),
            });
        }
        Ok(())
    }

    fn transcribe(&mut self, _samples: &[f32]) -> Result<Option<String>> {
        self.transcribe_calls += 1;
        if self.next < self.responses.len() {
            let result = std::mem::replace(&mut self.responses[self.next], Ok(None));
            self.next += 1;
            return result;
        }
        Ok(self.default_response.clone())
    }

    fn shutdown(&mut self) {
        self.shutdown_calls += 1;
    }
}
