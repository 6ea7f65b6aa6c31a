//! Language model collaborator.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

pub mod ollama;

pub use ollama::OllamaClient;

/// Capacity of the token-fragment channel between the model client and the
/// pipeline.
pub const TOKEN_CHANNEL_CAPACITY: usize = 64;

/// Spoken when the model stream breaks mid-response. Delivered in-band so
/// it goes through the ordinary speak path.
pub const STREAM_ERROR_APOLOGY: &str = "Sorry, I lost my train of thought. Please try again.";

/// Streaming language model.
///
/// Fragments arrive on the returned channel in model order; the channel
/// closing is the end-of-stream signal. Connection-phase failures are an
/// error; mid-stream failures are reported in-band as a final apology
/// fragment.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn stream_response(&self, prompt: &str) -> Result<mpsc::Receiver<String>>;

    /// Optional startup warmup. Failures are the implementation's to log.
    async fn preload(&self) {}
}
