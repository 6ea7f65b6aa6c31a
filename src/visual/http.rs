//! HTTP visual backend: POSTs state changes to a remote status display.

use async_trait::async_trait;

use super::VisualStateController;
use crate::error::{AssistantError, Result};

/// Client for a status-display server exposing `POST /set_state`.
pub struct HttpVisual {
    client: reqwest::Client,
    base_url: String,
}

impl HttpVisual {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait]
impl VisualStateController for HttpVisual {
    async fn set_state(&self, status: &str) -> Result<()> {
        let url = format!("{}/set_state", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await
            .map_err(|e| AssistantError::Visual(format!("visual server unreachable: {e}")))?;

        if !response.status().is_success() {
            let code = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::Visual(format!(
                "visual server returned {code}: {body}"
            )));
        }
        tracing::debug!("visual state set to '{status}'");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_the_status_as_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/set_state"))
            .and(body_json(serde_json::json!({ "status": "listening" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let visual = HttpVisual::new(&server.uri());
        visual.set_state("listening").await.unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/set_state"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad status"))
            .mount(&server)
            .await;

        let visual = HttpVisual::new(&server.uri());
        let err = visual.set_state("bogus").await.unwrap_err();
        assert!(err.to_string().contains("422"));
    }
}
