//! Vesper: an interruptible wake-word voice assistant.
//!
//! One pipeline run handles one spoken command:
//! Wake → Record → STT → LLM stream → Parse/Segment → TTS → Playback
//!
//! The streaming model response is interpreted incrementally: a tag parser
//! classifies spans as reasoning or answer content, a segmenter releases
//! answer text at sentence boundaries for low-latency synthesis, and a
//! tolerant extractor recovers one structured command from the assembled
//! response. A new wake event cancels the in-flight run cooperatively and
//! waits for it to unwind before starting over.
//!
//! Everything with real I/O — microphone capture, transcription, model
//! inference, synthesis, playback, the visual status display — lives
//! behind a collaborator trait so the pipeline itself stays testable with
//! scripted fakes.

pub mod audio;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod response;
pub mod speech;
pub mod visual;

pub use config::AssistantConfig;
pub use dispatch::CommandDispatcher;
pub use error::{AssistantError, Result};
pub use pipeline::{Orchestrator, PipelineOutcome};
pub use response::{
    ChunkKind, ClassifiedChunk, CommandEnvelope, SentenceSegmenter, SentenceUnit, TagStreamParser,
    extract_command,
};
