//! Visual state collaborator: a status display driven by state names.

use async_trait::async_trait;

use crate::error::Result;

pub mod http;
pub mod process;

pub use http::HttpVisual;
pub use process::ProcessVisual;

/// The states the orchestrator itself transitions through.
///
/// Commands arriving from the model may carry other strings; those are
/// passed to the collaborator unvalidated (validation, if any, is the
/// collaborator's concern).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualState {
    Idle,
    Listening,
    Speaking,
    Processing,
}

impl VisualState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Speaking => "speaking",
            Self::Processing => "processing",
        }
    }
}

/// External status display.
#[async_trait]
pub trait VisualStateController: Send + Sync {
    /// Set the displayed state. Callers treat this as fire-and-forget; the
    /// collaborator's own retry behavior is out of scope here.
    async fn set_state(&self, status: &str) -> Result<()>;
}

/// Backend used when visual output is disabled.
pub struct NoopVisual;

#[async_trait]
impl VisualStateController for NoopVisual {
    async fn set_state(&self, _status: &str) -> Result<()> {
        Ok(())
    }
}
