//! HTTP client for a whisper-compatible transcription server.

use async_trait::async_trait;

use super::Transcriber;
use crate::audio::RecordedAudio;
use crate::config::SttConfig;
use crate::error::{AssistantError, Result};

#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Client posting recorded WAV audio to a whisper server.
pub struct WhisperClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl WhisperClient {
    pub fn new(config: &SttConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl Transcriber for WhisperClient {
    async fn transcribe(&self, audio: &RecordedAudio) -> Result<Option<String>> {
        let wav = tokio::fs::read(audio.path())
            .await
            .map_err(|e| AssistantError::Stt(format!("cannot read recording: {e}")))?;
        tracing::debug!(wav_bytes = wav.len(), "transcribing command audio");

        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(wav)
                .file_name("command.wav")
                .mime_str("audio/wav")
                .map_err(|e| AssistantError::Stt(e.to_string()))?,
        );

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AssistantError::Stt(format!("STT server unreachable: {e}")))?;
        if !response.status().is_success() {
            let code = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::Stt(format!(
                "STT server returned {code}: {body}"
            )));
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| AssistantError::Stt(format!("bad STT response: {e}")))?;
        let text = parsed.text.trim().to_owned();
        if text.is_empty() {
            Ok(None)
        } else {
            tracing::info!("transcribed: '{text}'");
            Ok(Some(text))
        }
    }
}
