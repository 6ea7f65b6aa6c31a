//! Speech collaborators: transcription and synthesis.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::audio::RecordedAudio;
use crate::error::Result;

pub mod piper;
pub mod whisper;

pub use piper::PiperSynthesizer;
pub use whisper::WhisperClient;

/// Capacity of the PCM-chunk channel between the synthesizer and playback.
pub const PCM_CHANNEL_CAPACITY: usize = 16;

/// Speech-to-text collaborator.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a recorded command. `None` means nothing usable was
    /// heard.
    async fn transcribe(&self, audio: &RecordedAudio) -> Result<Option<String>>;
}

/// Text-to-speech collaborator.
///
/// PCM chunks arrive on the returned channel as raw s16le mono bytes at
/// [`sample_rate`](Self::sample_rate); a synthesis failure after the stream
/// opened arrives in-band as an `Err` item.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn sample_rate(&self) -> u32;

    async fn synthesize(&self, text: &str) -> Result<mpsc::Receiver<Result<Vec<u8>>>>;
}
