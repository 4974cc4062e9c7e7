//! Alert engine behavior against a live metric store and capturing sinks

use agentmesh_core::{AlertSeverity, AlertState, CompareOp, Result};
use agentmesh_observability::alert::{Alert, AlertEngine, AlertRule};
use agentmesh_observability::metrics::{MetricSample, MetricStore};
use agentmesh_observability::notify::{Notifier, NotifySink, SinkConfig};
use chrono::{Duration, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct CountingSink {
    delivered: Arc<AtomicUsize>,
    fail: bool,
}

#[async_trait::async_trait]
impl NotifySink for CountingSink {
    fn name(&self) -> &str {
        "counting"
    }

    async fn deliver(&self, _alert: &Alert, _config: &Value) -> Result<()> {
        self.delivered.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(agentmesh_core::Error::external("sink down"))
        } else {
            Ok(())
        }
    }
}

fn cpu_rule() -> AlertRule {
    AlertRule {
        name: "cpu_over_80".into(),
        description: "CPU usage is above 80%".into(),
        metric_name: "cpu_usage_percent".into(),
        operator: CompareOp::Gt,
        threshold: 80.0,
        hold_sec: 300,
        severity: AlertSeverity::High,
        actions: vec![],
        enabled: true,
        labels: BTreeMap::new(),
    }
}

fn engine_with_counter(fail: bool) -> (Arc<MetricStore>, AlertEngine, Arc<AtomicUsize>) {
    let metrics = Arc::new(MetricStore::default());
    let delivered = Arc::new(AtomicUsize::new(0));
    let mut notifier = Notifier::new(
        metrics.clone(),
        0,
        std::time::Duration::from_millis(1),
    );
    notifier.register(CountingSink {
        delivered: delivered.clone(),
        fail,
    });
    let engine = AlertEngine::new(metrics.clone(), Arc::new(notifier));
    (metrics, engine, delivered)
}

#[tokio::test]
async fn rule_fires_once_and_resolves() {
    let (metrics, engine, _) = engine_with_counter(false);
    engine.upsert_rule(cpu_rule());

    for _ in 0..6 {
        metrics.record(MetricSample::new("agent-1", "cpu_usage_percent", 85.0));
    }
    engine.evaluate_once();
    engine.evaluate_once(); // repeated trigger while active is ignored

    let active = engine.alerts(Some(AlertState::Active));
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].rule_name, "cpu_over_80");
    assert_eq!(active[0].owner, "agent-1");
    assert_eq!(active[0].current_value, Some(85.0));

    metrics.record(MetricSample::new("agent-1", "cpu_usage_percent", 50.0));
    engine.evaluate_once();

    assert!(engine.alerts(Some(AlertState::Active)).is_empty());
    let resolved = engine.alerts(Some(AlertState::Resolved));
    assert_eq!(resolved.len(), 1);
    assert!(resolved[0].resolved_at.is_some());
}

#[tokio::test]
async fn no_samples_never_fires() {
    let (_metrics, engine, _) = engine_with_counter(false);
    engine.upsert_rule(cpu_rule());
    engine.evaluate_once();
    assert!(engine.alerts(None).is_empty());
}

#[tokio::test]
async fn latest_sample_wins_in_window() {
    let (metrics, engine, _) = engine_with_counter(false);
    engine.upsert_rule(cpu_rule());
    metrics.record(MetricSample::new("agent-1", "cpu_usage_percent", 95.0));
    metrics.record(MetricSample::new("agent-1", "cpu_usage_percent", 40.0));
    engine.evaluate_once();
    assert!(engine.alerts(Some(AlertState::Active)).is_empty());
}

#[tokio::test]
async fn owners_fire_independently() {
    let (metrics, engine, _) = engine_with_counter(false);
    engine.upsert_rule(cpu_rule());
    metrics.record(MetricSample::new("agent-1", "cpu_usage_percent", 90.0));
    metrics.record(MetricSample::new("agent-2", "cpu_usage_percent", 10.0));
    engine.evaluate_once();
    let active = engine.alerts(Some(AlertState::Active));
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].owner, "agent-1");
}

#[tokio::test]
async fn silenced_alert_is_not_refired() {
    let (metrics, engine, _) = engine_with_counter(false);
    engine.upsert_rule(cpu_rule());
    metrics.record(MetricSample::new("agent-1", "cpu_usage_percent", 90.0));
    engine.evaluate_once();

    let alert = engine.alerts(Some(AlertState::Active)).remove(0);
    engine
        .silence(alert.id, Utc::now() + Duration::hours(1))
        .unwrap();

    metrics.record(MetricSample::new("agent-1", "cpu_usage_percent", 99.0));
    engine.evaluate_once();

    assert!(engine.alerts(Some(AlertState::Active)).is_empty());
    assert_eq!(engine.alerts(Some(AlertState::Silenced)).len(), 1);
}

#[tokio::test]
async fn actions_fan_out_to_sink() {
    let (metrics, engine, delivered) = engine_with_counter(false);
    let mut rule = cpu_rule();
    rule.actions = vec![SinkConfig {
        kind: "counting".into(),
        config: Value::Null,
    }];
    engine.upsert_rule(rule);

    metrics.record(MetricSample::new("agent-1", "cpu_usage_percent", 90.0));
    engine.evaluate_once();

    // Delivery happens on a spawned task.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn terminal_sink_failure_is_counted() {
    let (metrics, engine, delivered) = engine_with_counter(true);
    let mut rule = cpu_rule();
    rule.actions = vec![SinkConfig {
        kind: "counting".into(),
        config: Value::Null,
    }];
    engine.upsert_rule(rule);

    metrics.record(MetricSample::new("agent-1", "cpu_usage_percent", 90.0));
    engine.evaluate_once();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert_eq!(delivered.load(Ordering::SeqCst), 1);
    let failure = metrics
        .latest(agentmesh_core::SYSTEM_OWNER, "notification_failure_count")
        .expect("failure metric recorded");
    assert_eq!(failure.value, 1.0);
}

#[tokio::test]
async fn default_rules_are_installed() {
    let (_metrics, engine, _) = engine_with_counter(false);
    let names: Vec<String> = engine.rules().into_iter().map(|r| r.name).collect();
    assert!(names.contains(&"high_cpu_usage".to_string()));
    assert!(names.contains(&"agent_failure".to_string()));
    assert!(names.contains(&"low_success_rate".to_string()));
}
