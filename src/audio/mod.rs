//! Audio collaborators: microphone input and playback output.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub mod capture;
pub mod playback;

pub use capture::ProcessCapture;
pub use playback::{PlaybackSink, PlaybackStream, ProcessSink};

/// Handle to one recorded command utterance (a temp WAV file).
///
/// The file is removed when the handle is dropped, whether or not
/// transcription happened.
#[derive(Debug)]
pub struct RecordedAudio {
    path: PathBuf,
}

impl RecordedAudio {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RecordedAudio {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!("cannot remove recording {}: {e}", self.path.display());
        }
    }
}

/// Microphone collaborator. Wake detection and command capture share the
/// microphone and are used strictly in sequence, so both live here.
#[async_trait]
pub trait AudioInput: Send {
    /// Block until the next wake event. An error here is fatal to the
    /// orchestrator.
    async fn wait_for_wake(&mut self) -> Result<()>;

    /// Record one command utterance and return a handle to it.
    async fn record_command(&mut self) -> Result<RecordedAudio>;
}
