//! Streaming client for an Ollama-compatible `/api/generate` endpoint.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{LanguageModel, STREAM_ERROR_APOLOGY, TOKEN_CHANNEL_CAPACITY};
use crate::config::LlmConfig;
use crate::error::{AssistantError, Result};

/// One line of the newline-delimited JSON response stream.
#[derive(serde::Deserialize)]
struct GenerateLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

/// Ollama HTTP client.
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    system_prompt: String,
}

impl OllamaClient {
    /// # Errors
    ///
    /// Returns a `Config` error if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig, system_prompt: &str) -> Result<Self> {
        // A per-read timeout, not a whole-request deadline: the streamed
        // body lasts as long as the model keeps talking, so only a stall
        // between chunks counts as a failure.
        let client = reqwest::Client::builder()
            .read_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AssistantError::Config(format!("HTTP client: {e}")))?;
        tracing::info!(
            "Ollama client configured: {} model={}",
            config.base_url,
            config.model
        );
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            model: config.model.clone(),
            system_prompt: system_prompt.to_owned(),
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn stream_response(&self, prompt: &str) -> Result<mpsc::Receiver<String>> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&serde_json::json!({
                "model": self.model,
                "system": self.system_prompt,
                "prompt": prompt,
                "stream": true,
            }))
            .send()
            .await
            .map_err(|e| AssistantError::Llm(format!("cannot reach Ollama: {e}")))?
            .error_for_status()
            .map_err(|e| AssistantError::Llm(format!("Ollama rejected the request: {e}")))?;

        let (tx, rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut pending: Vec<u8> = Vec::new();
            'read: while let Some(piece) = body.next().await {
                let piece = match piece {
                    Ok(piece) => piece,
                    Err(e) => {
                        // Mid-stream failure is reported in-band so the user
                        // hears something instead of silence.
                        tracing::error!("LLM stream error: {e}");
                        let _ = tx.send(STREAM_ERROR_APOLOGY.to_owned()).await;
                        return;
                    }
                };
                pending.extend_from_slice(&piece);
                while let Some(nl) = pending.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=nl).collect();
                    match serde_json::from_slice::<GenerateLine>(&line) {
                        Ok(parsed) => {
                            if !parsed.response.is_empty()
                                && tx.send(parsed.response).await.is_err()
                            {
                                // Receiver gone: the pipeline was cancelled.
                                return;
                            }
                            if parsed.done {
                                break 'read;
                            }
                        }
                        // Undecodable lines (keep-alives, partial noise) are
                        // skipped.
                        Err(_) => continue,
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn preload(&self) {
        tracing::info!("pre-loading model '{}'", self.model);
        let result = self
            .client
            .post(format!("{}/api/show", self.base_url))
            .timeout(Duration::from_secs(300))
            .json(&serde_json::json!({ "name": self.model }))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        match result {
            Ok(_) => tracing::info!("model '{}' is ready", self.model),
            Err(e) => tracing::warn!("model preload failed: {e}"),
        }
    }
}
