//! Speech synthesis via the `piper` CLI, one child process per utterance.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use super::{PCM_CHANNEL_CAPACITY, SpeechSynthesizer};
use crate::config::TtsConfig;
use crate::error::{AssistantError, Result};

const READ_CHUNK: usize = 4096;

/// Synthesizer spawning `piper --model <voice> --output-raw` per sentence
/// and streaming the raw s16le PCM it writes to stdout.
pub struct PiperSynthesizer {
    program: String,
    voice: PathBuf,
    sample_rate: u32,
}

impl PiperSynthesizer {
    pub fn new(config: &TtsConfig) -> Self {
        Self {
            program: config.program.clone(),
            voice: config.voice_path.clone(),
            sample_rate: config.sample_rate,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for PiperSynthesizer {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn synthesize(&self, text: &str) -> Result<mpsc::Receiver<Result<Vec<u8>>>> {
        let mut child = tokio::process::Command::new(&self.program)
            .arg("--model")
            .arg(&self.voice)
            .arg("--output-raw")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AssistantError::Tts(format!("cannot spawn {}: {e}", self.program)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AssistantError::Tts("piper stdin not piped".into()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| AssistantError::Tts("piper stdout not piped".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| AssistantError::Tts("piper stderr not piped".into()))?;

        let line = format!("{}\n", text.replace('\n', " "));
        // A broken pipe here means the child already exited; the exit
        // status below carries the real diagnosis.
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            tracing::warn!("cannot write to piper stdin: {e}");
        }
        drop(stdin);

        let (tx, rx) = mpsc::channel(PCM_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            // Drained concurrently: a chatty synthesizer that fills the
            // stderr pipe buffer would otherwise block and never reach
            // stdout EOF.
            let stderr_capture = tokio::spawn(async move {
                let mut captured = Vec::new();
                let _ = stderr.read_to_end(&mut captured).await;
                captured
            });
            let mut carry: Vec<u8> = Vec::new();
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        carry.extend_from_slice(&buf[..n]);
                        if let Some(chunk) = take_whole_samples(&mut carry)
                            && tx.send(Ok(chunk)).await.is_err()
                        {
                            // Receiver gone: playback was cancelled.
                            let _ = child.start_kill();
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(AssistantError::Tts(format!("piper read error: {e}"))))
                            .await;
                        return;
                    }
                }
            }
            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    let captured = stderr_capture.await.unwrap_or_default();
                    let stderr = String::from_utf8_lossy(&captured);
                    let _ = tx
                        .send(Err(AssistantError::Tts(format!(
                            "piper exited with {status}: {}",
                            stderr.trim()
                        ))))
                        .await;
                }
                Err(e) => {
                    let _ = tx
                        .send(Err(AssistantError::Tts(format!("piper wait failed: {e}"))))
                        .await;
                }
            }
        });
        Ok(rx)
    }
}

/// Remove and return the even-length prefix of `pending`, leaving a
/// dangling half-sample byte (if any) for the next read. Samples are
/// 16-bit, so an odd-length write would shift every later sample by a
/// byte.
fn take_whole_samples(pending: &mut Vec<u8>) -> Option<Vec<u8>> {
    let whole = pending.len() & !1;
    if whole == 0 {
        return None;
    }
    let rest = pending.split_off(whole);
    Some(std::mem::replace(pending, rest))
}
