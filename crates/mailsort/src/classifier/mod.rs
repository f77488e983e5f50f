//! Classification: rules first, generative model as fallback.

mod ollama;
mod orchestrator;
pub mod prompt;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use ollama::{OllamaConfig, OllamaService};
pub use orchestrator::{Classification, ClassificationOutcome, Classifier};

use crate::model::Message;

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("Model service request failed: {0}")]
    Http(String),

    #[error("Model service timed out after {0:?}")]
    Timeout(Duration),

    #[error("Model service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unparseable model response: {0}")]
    MalformedResponse(String),

    #[error("Model returned unknown category '{0}'")]
    UnknownCategory(String),
}

/// What the model service sees of a message.
#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    pub subject: String,
    pub sender: String,
    pub body_preview: String,
    pub has_attachments: bool,
    pub attachment_names: Vec<String>,
}

impl From<&Message> for ClassificationRequest {
    fn from(message: &Message) -> Self {
        Self {
            subject: message.subject.clone(),
            sender: message.sender.clone(),
            body_preview: message.body_preview.clone(),
            has_attachments: message.has_attachments,
            attachment_names: message.attachment_names.clone(),
        }
    }
}

/// Raw model answer; `category` is not yet checked against the category set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelVerdict {
    pub category: String,
    pub confidence: u8,
    pub rationale: String,
}

#[async_trait]
pub trait ClassificationService: Send + Sync {
    async fn classify(&self, request: &ClassificationRequest) -> Result<ModelVerdict, ClassifyError>;
}
