//! Subprocess visual backend: runs a program per state change.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use super::VisualStateController;
use crate::config::VisualConfig;
use crate::error::{AssistantError, Result};

/// Drives a status display by invoking an external executable with
/// `{status}` substituted into its argument template.
pub struct ProcessVisual {
    program: PathBuf,
    args: Vec<String>,
    warned_missing: AtomicBool,
}

impl ProcessVisual {
    pub fn new(config: &VisualConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            warned_missing: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl VisualStateController for ProcessVisual {
    async fn set_state(&self, status: &str) -> Result<()> {
        if !self.program.exists() {
            // Warn once, then stay a no-op: a missing display program is an
            // inconvenience, not a pipeline failure.
            if !self.warned_missing.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    "visual program not found at {}; visuals disabled",
                    self.program.display()
                );
            }
            return Ok(());
        }

        let args = substitute_status(&self.args, status);
        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|e| AssistantError::Visual(format!("failed to run visual program: {e}")))?;

        if output.status.success() {
            tracing::debug!("visual state set to '{status}'");
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(
                "visual program exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }
}

fn substitute_status(template: &[String], status: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| arg.replace("{status}", status))
        .collect()
}
