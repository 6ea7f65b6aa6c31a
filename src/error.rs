//! Error types for the vesper assistant.

/// Top-level error type for the voice-assistant pipeline.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    /// Audio capture device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Wake-word listener error.
    #[error("wake error: {0}")]
    Wake(String),

    /// Speech-to-text transcription error.
    #[error("STT error: {0}")]
    Stt(String),

    /// Language model request or stream error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio playback error.
    #[error("playback error: {0}")]
    Playback(String),

    /// Visual state collaborator error.
    #[error("visual error: {0}")]
    Visual(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Pipeline coordination error.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AssistantError>;
