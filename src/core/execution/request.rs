#![allow(clippy::result_large_err)] // Webhook reordering returns AppError naming the mismatched keys.

use crate::core::error::AppError;
use crate::core::execution::task::ActionType;
use crate::core::types::ErrorCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    InProcessing,
    AwaitingAsync,
    RequiresManualReview,
    Complete,
    Canceled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::InProcessing => "in_processing",
            RequestStatus::AwaitingAsync => "awaiting_async",
            RequestStatus::RequiresManualReview => "requires_manual_review",
            RequestStatus::Complete => "complete",
            RequestStatus::Canceled => "canceled",
        }
    }
}

/// Whether a webhook fires before or after the request's graph runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookDirection {
    Pre,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyWebhook {
    pub key: String,
    pub direction: WebhookDirection,
    #[serde(default)]
    pub order: u32,
}

impl WebhookDirection {
    /// Webhooks of this direction, in firing order.
    pub fn select<'a>(&self, webhooks: &'a [PolicyWebhook]) -> Vec<&'a PolicyWebhook> {
        let mut selected: Vec<&PolicyWebhook> =
            webhooks.iter().filter(|w| w.direction == *self).collect();
        selected.sort_by(|a, b| a.order.cmp(&b.order).then(a.key.cmp(&b.key)));
        selected
    }

    /// Renumber this direction's webhooks to follow `keys`.
    ///
    /// `keys` must name every webhook of this direction exactly once; the
    /// other direction is left untouched.
    pub fn reorder(&self, webhooks: &mut [PolicyWebhook], keys: &[String]) -> Result<(), AppError> {
        let current: BTreeSet<&str> = webhooks
            .iter()
            .filter(|w| w.direction == *self)
            .map(|w| w.key.as_str())
            .collect();
        let requested: BTreeSet<&str> = keys.iter().map(String::as_str).collect();
        if requested.len() != keys.len() || current != requested {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!(
                    "new {:?} webhook order must list exactly [{}]",
                    self,
                    current.into_iter().collect::<Vec<_>>().join(", ")
                ),
            )
            .with_code("DSR-REQ-001"));
        }
        for webhook in webhooks.iter_mut().filter(|w| w.direction == *self) {
            if let Some(position) = keys.iter().position(|k| k == &webhook.key) {
                webhook.order = position as u32;
            }
        }
        Ok(())
    }
}

/// Policy handed through to connectors unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub key: String,
    /// Data categories the policy acts on; a field matches a target it equals or is nested under.
    #[serde(default)]
    pub data_category_targets: Vec<String>,
    #[serde(default)]
    pub webhooks: Vec<PolicyWebhook>,
}

impl Policy {
    pub fn new(key: impl Into<String>) -> Self {
        Policy {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data_category_targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_webhook(mut self, key: impl Into<String>, direction: WebhookDirection) -> Self {
        let order = direction.select(&self.webhooks).len() as u32;
        self.webhooks.push(PolicyWebhook {
            key: key.into(),
            direction,
            order,
        });
        self
    }

    pub fn targets(&self, categories: &[String]) -> bool {
        categories.iter().any(|category| {
            self.data_category_targets.iter().any(|target| {
                category == target || category.starts_with(&format!("{}.", target))
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivacyRequest {
    pub id: String,
    pub identity: Map<String, Value>,
    pub policy: Policy,
    /// Requested actions in execution order.
    pub actions: Vec<ActionType>,
    pub status: RequestStatus,
    #[serde(default)]
    pub graph_hash: Option<String>,
    /// Actions whose terminator already advanced the request.
    #[serde(default)]
    pub completed_actions: Vec<ActionType>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: u64,
}

impl PrivacyRequest {
    /// Actions are sorted into access → erasure → consent order; erasure
    /// always implies access, since masking runs on the rows access found.
    pub fn new<I>(identity: Map<String, Value>, policy: Policy, actions: I) -> Self
    where
        I: IntoIterator<Item = ActionType>,
    {
        let mut actions: BTreeSet<ActionType> = actions.into_iter().collect();
        if actions.contains(&ActionType::Erasure) {
            actions.insert(ActionType::Access);
        }
        let now = Utc::now();
        PrivacyRequest {
            id: Uuid::new_v4().to_string(),
            identity,
            policy,
            actions: actions.into_iter().collect(),
            status: RequestStatus::Pending,
            graph_hash: None,
            completed_actions: Vec::new(),
            created_at: now,
            updated_at: now,
            finished_at: None,
            version: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn is_canceled(&self) -> bool {
        self.status == RequestStatus::Canceled
    }

    pub fn webhooks(&self, direction: WebhookDirection) -> Vec<&PolicyWebhook> {
        direction.select(&self.policy.webhooks)
    }
}
