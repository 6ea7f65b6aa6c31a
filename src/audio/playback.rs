//! Playback collaborator: raw PCM fed to an external player process.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};

use crate::config::PlaybackConfig;
use crate::error::{AssistantError, Result};

/// Opens playback streams.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    async fn open(&self, sample_rate: u32) -> Result<Box<dyn PlaybackStream>>;
}

/// One open playback resource.
#[async_trait]
pub trait PlaybackStream: Send {
    /// Write raw s16le PCM bytes.
    async fn write(&mut self, pcm: &[u8]) -> Result<()>;

    /// Drain buffered audio, then release the resource.
    async fn finish(self: Box<Self>) -> Result<()>;

    /// Release the resource immediately, discarding buffered audio.
    async fn stop(self: Box<Self>) -> Result<()>;
}

/// Sink spawning a player process per stream (`aplay` by default), with
/// `{rate}` in the argv template replaced by the sample rate.
pub struct ProcessSink {
    program: Vec<String>,
}

impl ProcessSink {
    pub fn new(config: &PlaybackConfig) -> Self {
        Self {
            program: config.program.clone(),
        }
    }
}

#[async_trait]
impl PlaybackSink for ProcessSink {
    async fn open(&self, sample_rate: u32) -> Result<Box<dyn PlaybackStream>> {
        let argv = substitute_rate(&self.program, sample_rate);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| AssistantError::Playback("playback program not configured".into()))?;
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AssistantError::Playback(format!("cannot spawn {program}: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AssistantError::Playback("player stdin not piped".into()))?;
        tracing::debug!("playback stream opened at {sample_rate} Hz");
        Ok(Box::new(ProcessStream {
            child,
            stdin: Some(stdin),
        }))
    }
}

fn substitute_rate(template: &[String], sample_rate: u32) -> Vec<String> {
    let rate = sample_rate.to_string();
    template
        .iter()
        .map(|arg| arg.replace("{rate}", &rate))
        .collect()
}

struct ProcessStream {
    child: Child,
    stdin: Option<ChildStdin>,
}

#[async_trait]
impl PlaybackStream for ProcessStream {
    async fn write(&mut self, pcm: &[u8]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AssistantError::Playback("playback stream already closed".into()))?;
        stdin
            .write_all(pcm)
            .await
            .map_err(|e| AssistantError::Playback(format!("player write failed: {e}")))
    }

    async fn finish(mut self: Box<Self>) -> Result<()> {
        // Closing stdin lets the player drain what it has buffered.
        drop(self.stdin.take());
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| AssistantError::Playback(format!("player wait failed: {e}")))?;
        if !status.success() {
            tracing::warn!("player exited with {status}");
        }
        Ok(())
    }

    async fn stop(mut self: Box<Self>) -> Result<()> {
        drop(self.stdin.take());
        self.child
            .start_kill()
            .map_err(|e| AssistantError::Playback(format!("cannot stop player: {e}")))?;
        let _ = self.child.wait().await;
        tracing::debug!("playback stream stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn substitutes_the_rate_placeholder() {
        let template = vec!["-r".to_owned(), "{rate}".to_owned(), "raw".to_owned()];
        assert_eq!(substitute_rate(&template, 22_050), ["-r", "22050", "raw"]);
    }

    #[tokio::test]
    async fn write_then_finish_drains_the_player() {
        let sink = ProcessSink::new(&PlaybackConfig {
            program: vec!["sh".into(), "-c".into(), "cat > /dev/null".into()],
        });
        let mut stream = sink.open(16_000).await.unwrap();
        stream.write(&[0u8; 512]).await.unwrap();
        stream.finish().await.unwrap();
    }

    #[tokio::test]
    async fn stop_kills_a_blocked_player_promptly() {
        let sink = ProcessSink::new(&PlaybackConfig {
            program: vec!["sleep".into(), "30".into()],
        });
        let stream = sink.open(16_000).await.unwrap();
        let start = std::time::Instant::now();
        stream.stop().await.unwrap();
        assert!(start.elapsed() < std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_player_is_an_open_error() {
        let sink = ProcessSink::new(&PlaybackConfig {
            program: vec!["/nonexistent/player".into()],
        });
        assert!(sink.open(16_000).await.is_err());
    }
}
