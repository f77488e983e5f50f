//! Decides category, confidence and provenance for pending messages.

use std::sync::Arc;

use futures_util::{future, stream, StreamExt};
use log::{debug, warn};
use tokio::time::Instant;

use super::{ClassificationRequest, ClassificationService, ClassifyError};
use crate::db::ClassificationUpdate;
use crate::model::{Category, Message, ProcessingStatus, Provenance, RuleHint};
use crate::rules::{MatchInput, RuleRegistry, RuleSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationOutcome {
    Rule(String),
    Model,
    /// Soft failure: the message stays PENDING for a later run.
    Deferred(String),
}

#[derive(Debug, Clone)]
pub struct Classification {
    pub message_id: i64,
    pub provider_id: String,
    pub update: ClassificationUpdate,
    pub outcome: ClassificationOutcome,
}

impl Classification {
    pub fn is_deferred(&self) -> bool {
        matches!(self.outcome, ClassificationOutcome::Deferred(_))
    }
}

pub struct Classifier {
    registry: Arc<RuleRegistry>,
    service: Arc<dyn ClassificationService>,
    max_concurrent: usize,
}

impl Classifier {
    pub fn new(
        registry: Arc<RuleRegistry>,
        service: Arc<dyn ClassificationService>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            registry,
            service,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    pub async fn classify(&self, message: &Message) -> Classification {
        let rules = self.registry.snapshot();
        self.classify_with(&rules, message).await
    }

    /// Classifies a batch against one rule snapshot, at most `max_concurrent`
    /// model calls in flight. Nothing new starts once `deadline` has passed;
    /// messages not started are simply absent from the result.
    pub async fn classify_batch(
        &self,
        messages: Vec<Message>,
        deadline: Option<Instant>,
    ) -> Vec<Classification> {
        let rules = self.registry.snapshot();
        let rules = rules.as_ref();

        stream::iter(messages)
            .take_while(move |_| future::ready(deadline.map_or(true, |d| Instant::now() < d)))
            .map(|message| async move { self.classify_with(rules, &message).await })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await
    }

    async fn classify_with(&self, rules: &RuleSet, message: &Message) -> Classification {
        if let Some(rule) = rules.evaluate(&MatchInput::from(message)) {
            debug!("Message {} matched rule {}", message.id, rule.name);
            return Classification {
                message_id: message.id,
                provider_id: message.provider_id.clone(),
                update: ClassificationUpdate {
                    category: rule.category,
                    confidence: 100,
                    provenance: Provenance::Rule(rule.name.clone()),
                    status: ProcessingStatus::Classified,
                    rule_hint: rule.hint(),
                    rationale: None,
                },
                outcome: ClassificationOutcome::Rule(rule.name.clone()),
            };
        }

        let verdict = self
            .service
            .classify(&ClassificationRequest::from(message))
            .await
            .and_then(|v| {
                let category = v
                    .category
                    .parse::<Category>()
                    .map_err(|_| ClassifyError::UnknownCategory(v.category.clone()))?;
                Ok((category, v))
            });

        match verdict {
            Ok((category, v)) => Classification {
                message_id: message.id,
                provider_id: message.provider_id.clone(),
                update: ClassificationUpdate {
                    category,
                    confidence: v.confidence,
                    provenance: Provenance::Model,
                    status: ProcessingStatus::Classified,
                    rule_hint: RuleHint::default(),
                    rationale: Some(v.rationale).filter(|r| !r.is_empty()),
                },
                outcome: ClassificationOutcome::Model,
            },
            Err(e) => {
                warn!("Deferring classification of message {}: {}", message.id, e);
                Classification {
                    message_id: message.id,
                    provider_id: message.provider_id.clone(),
                    update: ClassificationUpdate {
                        category: Category::Unclassified,
                        confidence: 0,
                        provenance: Provenance::None,
                        status: ProcessingStatus::Pending,
                        rule_hint: RuleHint::default(),
                        rationale: None,
                    },
                    outcome: ClassificationOutcome::Deferred(e.to_string()),
                }
            }
        }
    }
}
