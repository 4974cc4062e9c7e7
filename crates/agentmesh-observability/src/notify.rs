//! Notification sinks
//!
//! Fan-out targets for fired alerts. Each sink delivers independently:
//! one sink failing, retrying, or hanging never blocks another. Delivery
//! is best-effort with capped exponential backoff; terminal failures
//! are counted as `notification_failure_count`.

use crate::alert::Alert;
use crate::metrics::{MetricSample, MetricStore};
use agentmesh_core::{Error, Result, SYSTEM_OWNER};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One fan-out action attached to an alert rule.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SinkConfig {
    /// Sink name: "webhook", "email", or "chat".
    pub kind: String,
    #[serde(default)]
    pub config: Value,
}

#[async_trait::async_trait]
pub trait NotifySink: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver one alert. Errors are retried by the notifier.
    async fn deliver(&self, alert: &Alert, config: &Value) -> Result<()>;
}

/// POSTs the alert as a flat JSON document.
pub struct WebhookSink {
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn payload(alert: &Alert) -> Value {
        json!({
            "id": alert.id,
            "rule_name": alert.rule_name,
            "severity": alert.severity,
            "state": alert.state,
            "message": alert.message,
            "owner": alert.owner,
            "metric_name": alert.metric_name,
            "threshold": alert.threshold,
            "current_value": alert.current_value,
            "triggered_at": alert.triggered_at,
            "labels": alert.labels,
        })
    }
}

#[async_trait::async_trait]
impl NotifySink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, alert: &Alert, config: &Value) -> Result<()> {
        let url = config["url"]
            .as_str()
            .ok_or_else(|| Error::bad_input("webhook sink requires 'url'"))?;
        let response = self
            .client
            .post(url)
            .json(&Self::payload(alert))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| Error::external(format!("webhook post: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::external(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// POSTs a chat-room message with a severity-colored attachment.
pub struct ChatSink {
    client: reqwest::Client,
}

impl ChatSink {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn payload(alert: &Alert) -> Value {
        let color = match alert.severity {
            agentmesh_core::AlertSeverity::Low => "good",
            agentmesh_core::AlertSeverity::Medium => "warning",
            agentmesh_core::AlertSeverity::High | agentmesh_core::AlertSeverity::Critical => {
                "danger"
            }
        };
        json!({
            "text": format!("Alert: {}", alert.rule_name),
            "attachments": [{
                "color": color,
                "fields": [
                    {"title": "Severity", "value": alert.severity, "short": true},
                    {"title": "Message", "value": alert.message, "short": true},
                    {"title": "Current Value", "value": alert.current_value, "short": true},
                    {"title": "Threshold", "value": alert.threshold, "short": true},
                ],
            }],
        })
    }
}

#[async_trait::async_trait]
impl NotifySink for ChatSink {
    fn name(&self) -> &str {
        "chat"
    }

    async fn deliver(&self, alert: &Alert, config: &Value) -> Result<()> {
        let url = config["webhook_url"]
            .as_str()
            .ok_or_else(|| Error::bad_input("chat sink requires 'webhook_url'"))?;
        let response = self
            .client
            .post(url)
            .json(&Self::payload(alert))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| Error::external(format!("chat post: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::external(format!("chat hook returned {}", response.status())));
        }
        Ok(())
    }
}

/// Mail delivery is an external collaborator; the sink only formats and
/// hands off the message.
#[async_trait::async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<()>;
}

pub struct EmailSink {
    transport: Arc<dyn MailTransport>,
}

impl EmailSink {
    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait::async_trait]
impl NotifySink for EmailSink {
    fn name(&self) -> &str {
        "email"
    }

    async fn deliver(&self, alert: &Alert, config: &Value) -> Result<()> {
        let recipients: Vec<String> = config["recipients"]
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        if recipients.is_empty() {
            return Err(Error::bad_input("email sink requires 'recipients'"));
        }
        let subject = format!("Alert: {}", alert.rule_name);
        let body = format!(
            "Alert: {}\nSeverity: {:?}\nMessage: {}\nOwner: {}\nCurrent value: {:?}\nThreshold: {}\n",
            alert.rule_name, alert.severity, alert.message, alert.owner, alert.current_value,
            alert.threshold,
        );
        self.transport.send(&recipients, &subject, &body).await
    }
}

pub struct Notifier {
    sinks: HashMap<String, Arc<dyn NotifySink>>,
    metrics: Arc<MetricStore>,
    retry_max: u32,
    backoff_base: Duration,
}

impl Notifier {
    pub fn new(metrics: Arc<MetricStore>, retry_max: u32, backoff_base: Duration) -> Self {
        Self {
            sinks: HashMap::new(),
            metrics,
            retry_max,
            backoff_base,
        }
    }

    /// Default sink set: webhook + chat over a shared HTTP client.
    /// Email needs a transport and is registered by the caller.
    pub fn with_default_sinks(mut self, client: reqwest::Client) -> Self {
        self.register(WebhookSink::new(client.clone()));
        self.register(ChatSink::new(client));
        self
    }

    pub fn register(&mut self, sink: impl NotifySink + 'static) {
        self.sinks.insert(sink.name().to_string(), Arc::new(sink));
    }

    /// Fan an alert out to every configured action. Each sink runs in
    /// its own task; this call does not wait for delivery.
    pub fn dispatch(self: &Arc<Self>, alert: Alert, actions: Vec<SinkConfig>) {
        for action in actions {
            let Some(sink) = self.sinks.get(&action.kind).cloned() else {
                warn!(kind = %action.kind, "no sink registered for alert action");
                continue;
            };
            let notifier = self.clone();
            let alert = alert.clone();
            tokio::spawn(async move {
                notifier.deliver_with_retry(sink, alert, action.config).await;
            });
        }
    }

    async fn deliver_with_retry(&self, sink: Arc<dyn NotifySink>, alert: Alert, config: Value) {
        let mut attempt = 0;
        loop {
            match sink.deliver(&alert, &config).await {
                Ok(()) => {
                    debug!(sink = sink.name(), alert = %alert.rule_name, "notification delivered");
                    return;
                }
                Err(e) if attempt < self.retry_max => {
                    // Exponential backoff, capped at 30s.
                    let backoff = self
                        .backoff_base
                        .saturating_mul(2u32.saturating_pow(attempt))
                        .min(Duration::from_secs(30));
                    debug!(
                        sink = sink.name(),
                        attempt, error = %e, "notification failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(sink = sink.name(), alert = %alert.rule_name, error = %e,
                        "notification permanently failed");
                    self.metrics.record(
                        MetricSample::new(SYSTEM_OWNER, "notification_failure_count", 1.0)
                            .with_label("sink", sink.name())
                            .with_unit("count"),
                    );
                    return;
                }
            }
        }
    }
}
