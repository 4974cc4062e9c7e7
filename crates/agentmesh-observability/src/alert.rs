//! Alert engine
//!
//! Evaluates every enabled rule against the metric store on a fixed
//! cadence, per owner: the latest sample inside the rule's hold window
//! decides, older samples are ignored. Firing while already active is a
//! no-op; a false evaluation resolves. Silenced alerts are left alone
//! until the silence expires. A rule with no samples never fires.

use crate::metrics::{MetricFilter, MetricStore};
use crate::notify::{Notifier, SinkConfig};
use agentmesh_core::{AlertSeverity, AlertState, CompareOp, Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,
    pub description: String,
    pub metric_name: String,
    pub operator: CompareOp,
    pub threshold: f64,
    /// Window a sample must fall in to count, in seconds.
    pub hold_sec: i64,
    pub severity: AlertSeverity,
    #[serde(default)]
    pub actions: Vec<SinkConfig>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Clone, Debug, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub rule_name: String,
    /// Owner whose series fired the rule.
    pub owner: String,
    pub severity: AlertSeverity,
    pub state: AlertState,
    pub message: String,
    pub metric_name: String,
    pub threshold: f64,
    pub current_value: Option<f64>,
    pub labels: BTreeMap<String, String>,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub silenced_until: Option<DateTime<Utc>>,
}

impl Alert {
    fn is_silenced(&self, now: DateTime<Utc>) -> bool {
        self.silenced_until.is_some_and(|until| until > now)
    }
}

pub struct AlertEngine {
    metrics: Arc<MetricStore>,
    notifier: Arc<Notifier>,
    rules: dashmap::DashMap<String, AlertRule>,
    alerts: dashmap::DashMap<Uuid, Alert>,
    /// (rule name, owner) → live alert id, while active or silenced.
    live: dashmap::DashMap<(String, String), Uuid>,
    resolved_retention: Duration,
}

impl AlertEngine {
    pub fn new(metrics: Arc<MetricStore>, notifier: Arc<Notifier>) -> Self {
        let engine = Self {
            metrics,
            notifier,
            rules: dashmap::DashMap::new(),
            alerts: dashmap::DashMap::new(),
            live: dashmap::DashMap::new(),
            resolved_retention: Duration::hours(24),
        };
        for rule in default_rules() {
            engine.rules.insert(rule.name.clone(), rule);
        }
        engine
    }

    pub fn upsert_rule(&self, rule: AlertRule) {
        info!(rule = %rule.name, "alert rule installed");
        self.rules.insert(rule.name.clone(), rule);
    }

    pub fn remove_rule(&self, name: &str) -> bool {
        self.rules.remove(name).is_some()
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        self.rules.iter().map(|entry| entry.clone()).collect()
    }

    pub fn alerts(&self, state: Option<AlertState>) -> Vec<Alert> {
        self.alerts
            .iter()
            .map(|entry| entry.clone())
            .filter(|alert| state.is_none_or(|s| alert.state == s))
            .collect()
    }

    pub fn get(&self, id: Uuid) -> Option<Alert> {
        self.alerts.get(&id).map(|entry| entry.clone())
    }

    /// Suppress re-firing for an alert until the given instant.
    pub fn silence(&self, id: Uuid, until: DateTime<Utc>) -> Result<()> {
        let mut alert = self
            .alerts
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("alert {id}")))?;
        alert.state = AlertState::Silenced;
        alert.silenced_until = Some(until);
        info!(alert = %id, until = %until, "alert silenced");
        Ok(())
    }

    /// Manually resolve an alert.
    pub fn resolve(&self, id: Uuid) -> Result<()> {
        let mut alert = self
            .alerts
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("alert {id}")))?;
        alert.state = AlertState::Resolved;
        alert.resolved_at = Some(Utc::now());
        self.live
            .remove(&(alert.rule_name.clone(), alert.owner.clone()));
        Ok(())
    }

    /// One full evaluation pass over every enabled rule and owner.
    pub fn evaluate_once(&self) {
        let now = Utc::now();
        for rule in self.rules.iter() {
            if !rule.enabled {
                continue;
            }
            self.evaluate_rule(&rule, now);
        }
        self.prune_resolved(now);
    }

    fn evaluate_rule(&self, rule: &AlertRule, now: DateTime<Utc>) {
        let window_start = now - Duration::seconds(rule.hold_sec);
        for owner in self.metrics.owners_of(&rule.metric_name) {
            let filter = MetricFilter::named(&rule.metric_name)
                .for_owner(&owner)
                .since(window_start);
            // Latest sample in the window wins; no samples means no opinion.
            let Some(sample) = self.metrics.query(&filter).into_iter().next_back() else {
                continue;
            };
            let firing = rule.operator.evaluate(sample.value, rule.threshold);
            let key = (rule.name.clone(), owner.clone());

            match (firing, self.live.get(&key).map(|e| *e.value())) {
                (true, Some(id)) => {
                    // Already active or silenced; re-fire only after an
                    // expired silence.
                    let expired = self
                        .alerts
                        .get(&id)
                        .is_some_and(|a| a.state == AlertState::Silenced && !a.is_silenced(now));
                    if expired {
                        self.live.remove(&key);
                        self.trigger(rule, &owner, sample.value, now);
                    }
                }
                (true, None) => self.trigger(rule, &owner, sample.value, now),
                (false, Some(id)) => {
                    self.live.remove(&key);
                    if let Some(mut alert) = self.alerts.get_mut(&id) {
                        alert.state = AlertState::Resolved;
                        alert.resolved_at = Some(now);
                        alert.current_value = Some(sample.value);
                        info!(rule = %rule.name, owner = %owner, "alert resolved");
                    }
                }
                (false, None) => {}
            }
        }
    }

    fn trigger(&self, rule: &AlertRule, owner: &str, value: f64, now: DateTime<Utc>) {
        let alert = Alert {
            id: Uuid::new_v4(),
            rule_name: rule.name.clone(),
            owner: owner.to_string(),
            severity: rule.severity,
            state: AlertState::Active,
            message: rule.description.clone(),
            metric_name: rule.metric_name.clone(),
            threshold: rule.threshold,
            current_value: Some(value),
            labels: rule.labels.clone(),
            triggered_at: now,
            resolved_at: None,
            silenced_until: None,
        };
        warn!(rule = %rule.name, owner = %owner, value, "alert triggered");
        self.live
            .insert((rule.name.clone(), owner.to_string()), alert.id);
        self.alerts.insert(alert.id, alert.clone());
        self.notifier.dispatch(alert, rule.actions.clone());
    }

    fn prune_resolved(&self, now: DateTime<Utc>) {
        let horizon = now - self.resolved_retention;
        self.alerts.retain(|_, alert| {
            alert.state != AlertState::Resolved
                || alert.resolved_at.is_none_or(|at| at >= horizon)
        });
    }

    /// Cooperative evaluation loop. Errors inside a tick are contained
    /// per rule; the loop itself only stops on cancellation.
    pub async fn run(self: Arc<Self>, tick: std::time::Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("alert engine stopped");
                    return;
                }
                _ = interval.tick() => self.evaluate_once(),
            }
        }
    }
}

/// Rules installed at startup, mirroring the thresholds the health
/// monitor reports against.
fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule {
            name: "high_cpu_usage".into(),
            description: "CPU usage is above 80%".into(),
            metric_name: "cpu_usage_percent".into(),
            operator: CompareOp::Gt,
            threshold: 80.0,
            hold_sec: 300,
            severity: AlertSeverity::High,
            actions: vec![],
            enabled: true,
            labels: BTreeMap::new(),
        },
        AlertRule {
            name: "high_memory_usage".into(),
            description: "Memory usage is above 85%".into(),
            metric_name: "memory_usage_percent".into(),
            operator: CompareOp::Gt,
            threshold: 85.0,
            hold_sec: 300,
            severity: AlertSeverity::High,
            actions: vec![],
            enabled: true,
            labels: BTreeMap::new(),
        },
        AlertRule {
            name: "high_error_rate".into(),
            description: "Error rate is above 5%".into(),
            metric_name: "error_rate_percent".into(),
            operator: CompareOp::Gt,
            threshold: 5.0,
            hold_sec: 300,
            severity: AlertSeverity::High,
            actions: vec![],
            enabled: true,
            labels: BTreeMap::new(),
        },
        AlertRule {
            name: "low_success_rate".into(),
            description: "Success rate is below 95%".into(),
            metric_name: "success_rate".into(),
            operator: CompareOp::Lt,
            threshold: 95.0,
            hold_sec: 600,
            severity: AlertSeverity::Critical,
            actions: vec![],
            enabled: true,
            labels: BTreeMap::new(),
        },
        AlertRule {
            name: "agent_failure".into(),
            description: "Agent health probe has failed repeatedly".into(),
            metric_name: "agent_failure".into(),
            operator: CompareOp::Ge,
            threshold: 1.0,
            hold_sec: 60,
            severity: AlertSeverity::Critical,
            actions: vec![],
            enabled: true,
            labels: BTreeMap::new(),
        },
        AlertRule {
            name: "slow_response_time".into(),
            description: "Response time is above 2 seconds".into(),
            metric_name: "response_time_seconds".into(),
            operator: CompareOp::Gt,
            threshold: 2.0,
            hold_sec: 300,
            severity: AlertSeverity::Medium,
            actions: vec![],
            enabled: true,
            labels: BTreeMap::new(),
        },
    ]
}
