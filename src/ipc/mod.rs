//! Unix socket entry point into the pipeline's text path.

pub mod protocol;
pub mod server;

pub use protocol::{PromptReply, PromptRequest};
pub use server::{IpcServer, PromptHandler};
