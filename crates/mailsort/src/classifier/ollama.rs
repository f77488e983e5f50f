//! Ollama `/api/generate` client.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::prompt::{build_prompt, parse_reply};
use super::{ClassificationRequest, ClassificationService, ClassifyError, ModelVerdict};

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub host: String,
    pub model: String,
    pub timeout: Duration,
    pub prompt_body_chars: usize,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://ollama:11434".to_string(),
            model: "mistral".to_string(),
            timeout: Duration::from_secs(120),
            prompt_body_chars: 1000,
            temperature: 0.1,
            top_p: 0.9,
        }
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

pub struct OllamaService {
    client: Client,
    config: OllamaConfig,
}

impl OllamaService {
    pub fn new(config: OllamaConfig) -> Result<Self, ClassifyError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClassifyError::Http(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.config.host.trim_end_matches('/'))
    }
}

#[async_trait]
impl ClassificationService for OllamaService {
    async fn classify(&self, request: &ClassificationRequest) -> Result<ModelVerdict, ClassifyError> {
        let body = json!({
            "model": self.config.model,
            "prompt": build_prompt(request, self.config.prompt_body_chars),
            "stream": false,
            "options": {
                "temperature": self.config.temperature,
                "top_p": self.config.top_p,
            }
        });

        let url = self.generate_url();
        debug!("Calling Ollama at {} with model {}", url, self.config.model);

        let response = self.client.post(&url).json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                ClassifyError::Timeout(self.config.timeout)
            } else {
                ClassifyError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ClassifyError::Status {
                status: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ClassifyError::MalformedResponse(format!("generate envelope: {}", e)))?;

        parse_reply(&parsed.response)
    }
}
