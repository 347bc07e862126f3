//! Alert dispatch boundary.
//!
//! The engine decides transitions; delivery belongs to an [`AlertDispatcher`]
//! implementation behind this trait. Dispatch runs on its own worker task fed
//! by a channel, so a slow or failing notification channel never blocks
//! scoring. Failures are retried with the shared backoff policy and then
//! surfaced as an operator-visible error log; the engine never fabricates
//! success, and the alert stays recorded open.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::errors::{EngineError, Result};
use crate::types::{AlertLevel, AlertRecord, AlertTransition, EventId};

use super::config::RetryPolicy;
use super::retry::retry_with_backoff;

/// What gets handed to the dispatch boundary on a transition.
#[derive(Debug, Clone, Serialize)]
pub struct AlertNotice {
    pub event_id: EventId,
    pub transition: AlertTransition,
    pub record: AlertRecord,
    /// Composite score of the triggering snapshot.
    pub score: f64,
    pub cycle: u64,
}

/// Delivery boundary for alert notices.
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn dispatch(&self, notice: &AlertNotice) -> Result<()>;

    /// Short name for logs.
    fn name(&self) -> &'static str {
        "dispatcher"
    }
}

/// Dispatcher that logs notices through `tracing` at a level matching the
/// alert severity.
pub struct LogDispatcher;

#[async_trait]
impl AlertDispatcher for LogDispatcher {
    async fn dispatch(&self, notice: &AlertNotice) -> Result<()> {
        match (notice.transition, notice.record.level) {
            (AlertTransition::Clear, _) | (_, AlertLevel::Info) => {
                info!(
                    event_id = %notice.event_id,
                    transition = notice.transition.as_str(),
                    score = notice.score,
                    "alert cleared"
                );
            }
            (_, AlertLevel::Warning) => {
                warn!(
                    event_id = %notice.event_id,
                    transition = notice.transition.as_str(),
                    level = notice.record.level.as_str(),
                    score = notice.score,
                    cycle = notice.cycle,
                    "alert transition"
                );
            }
            (_, AlertLevel::Critical) => {
                error!(
                    event_id = %notice.event_id,
                    transition = notice.transition.as_str(),
                    level = notice.record.level.as_str(),
                    score = notice.score,
                    cycle = notice.cycle,
                    "alert transition"
                );
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Dispatcher that POSTs the notice as JSON to a webhook URL
/// (Slack-compatible payload shape: `text` plus structured fields).
pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: String,
}

impl WebhookDispatcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl AlertDispatcher for WebhookDispatcher {
    async fn dispatch(&self, notice: &AlertNotice) -> Result<()> {
        let text = format!(
            "[{}] {} {} (score {:.3})",
            notice.record.level.as_str(),
            notice.transition.as_str(),
            notice.event_id,
            notice.score,
        );
        let payload = serde_json::json!({
            "text": text,
            "notice": notice,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| EngineError::Dispatch(e.to_string()))?;

        response
            .error_for_status()
            .map_err(|e| EngineError::Dispatch(e.to_string()))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// Spawn the dispatch worker: drains the notice channel, retrying each
/// delivery with backoff. Ends when every sender is dropped.
pub(crate) fn spawn_dispatch_worker(
    mut rx: mpsc::UnboundedReceiver<AlertNotice>,
    dispatcher: std::sync::Arc<dyn AlertDispatcher>,
    retry: RetryPolicy,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notice) = rx.recv().await {
            let result = retry_with_backoff(
                &retry,
                dispatcher.name(),
                |_| true,
                || dispatcher.dispatch(&notice),
            )
            .await;

            if let Err(err) = result {
                error!(
                    event_id = %notice.event_id,
                    transition = notice.transition.as_str(),
                    error = %err,
                    "dispatch_failed: alert delivery exhausted retries"
                );
            }
        }
    })
}
