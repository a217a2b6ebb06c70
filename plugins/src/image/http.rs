use std::time::Duration;

use async_trait::async_trait;
use briefsmith_core::error::WorkflowError;
use briefsmith_core::workflow::ImageGenerator;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    file_name: &'a str,
    save_folder: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    image_path: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Client for an image service exposing `POST /generate`.
#[derive(Clone)]
pub struct HttpImageGenerator {
    http: reqwest::Client,
    url_generate: String,
}

impl HttpImageGenerator {
    pub fn new(base_url: &str, timeout_ms: u64) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        let normalized = base_url.trim_end_matches('/');
        Ok(Self {
            http,
            url_generate: format!("{}/generate", normalized),
        })
    }
}

#[async_trait]
impl ImageGenerator for HttpImageGenerator {
    fn name(&self) -> &str {
        "http"
    }

    async fn generate(
        &self,
        prompt: &str,
        file_name: &str,
        save_folder: &str,
    ) -> Result<String, WorkflowError> {
        let url = &self.url_generate;
        tracing::debug!(
            target: "briefsmith.workflow",
            stage = "image.http.in",
            url = %url,
            file_name = %file_name,
            prompt_chars = prompt.chars().count()
        );

        let resp = self
            .http
            .post(url)
            .json(&GenerateRequest {
                prompt,
                file_name,
                save_folder,
            })
            .send()
            .await
            .map_err(|err| WorkflowError::Image(format!("{} (url={})", err, url)))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|err| WorkflowError::Image(format!("{} (url={})", err, url)))?;
        if !status.is_success() {
            return Err(WorkflowError::Image(format!(
                "status={} body={}",
                status.as_u16(),
                body.trim()
            )));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|err| WorkflowError::Image(format!("undecodable response: {}", err)))?;

        match parsed.image_path.filter(|p| !p.trim().is_empty()) {
            Some(path) if parsed.success => {
                tracing::debug!(
                    target: "briefsmith.workflow",
                    stage = "image.http.out",
                    status = %status,
                    path = %path
                );
                Ok(path)
            }
            _ => Err(WorkflowError::Image(
                parsed
                    .message
                    .unwrap_or_else(|| "image service reported failure".to_string()),
            )),
        }
    }
}
