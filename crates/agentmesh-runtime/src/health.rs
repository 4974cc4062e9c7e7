//! Health monitor
//!
//! Two independent cooperative loops over the active agents. The health
//! loop probes each agent's health URL and counts consecutive failures;
//! the metrics loop pulls the worker's usage report. Both only write
//! metrics (threshold rules in the alert engine do the judging), and
//! neither loop lets one agent's failure skip the rest.

use crate::orchestrator::Orchestrator;
use agentmesh_core::{AgentStatus, SYSTEM_OWNER};
use agentmesh_observability::{MetricSample, MetricStore};
use agentmesh_registry::Registry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const PROBE_DEADLINE: Duration = Duration::from_secs(10);
const FAILURE_ALERT_THRESHOLD: u32 = 5;
const HISTORY_LIMIT: usize = 200;

#[derive(Clone, Debug)]
pub struct HealthMonitorConfig {
    pub health_tick: Duration,
    pub metrics_tick: Duration,
    /// When set, a repeatedly failing agent is restarted through the
    /// orchestrator. Off by default.
    pub restart_policy: bool,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            health_tick: Duration::from_secs(30),
            metrics_tick: Duration::from_secs(30),
            restart_policy: false,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthCheckResult {
    pub agent_id: Uuid,
    pub healthy: bool,
    pub response_time_ms: i64,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Usage report served by workers from `GET /metrics`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct WorkerUsage {
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub memory_percent: f64,
    #[serde(default)]
    pub request_count: f64,
    #[serde(default)]
    pub avg_response_ms: f64,
    #[serde(default)]
    pub error_rate_percent: f64,
}

pub struct HealthMonitor {
    registry: Arc<Registry>,
    orchestrator: Arc<Orchestrator>,
    metrics: Arc<MetricStore>,
    client: reqwest::Client,
    config: HealthMonitorConfig,
    consecutive_failures: dashmap::DashMap<Uuid, u32>,
    history: dashmap::DashMap<Uuid, VecDeque<HealthCheckResult>>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<Registry>,
        orchestrator: Arc<Orchestrator>,
        metrics: Arc<MetricStore>,
        client: reqwest::Client,
        config: HealthMonitorConfig,
    ) -> Self {
        Self {
            registry,
            orchestrator,
            metrics,
            client,
            config,
            consecutive_failures: dashmap::DashMap::new(),
            history: dashmap::DashMap::new(),
        }
    }

    /// Spawn both loops; they stop together on cancellation.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) {
        let health = self.clone();
        let health_cancel = cancel.clone();
        tokio::spawn(async move { health.run_health_loop(health_cancel).await });

        let usage = self.clone();
        tokio::spawn(async move { usage.run_metrics_loop(cancel).await });
    }

    pub async fn run_health_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.health_tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("health loop stopped");
                    return;
                }
                _ = interval.tick() => self.health_pass(&cancel).await,
            }
        }
    }

    pub async fn run_metrics_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.metrics_tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("metrics loop stopped");
                    return;
                }
                _ = interval.tick() => self.metrics_pass(&cancel).await,
            }
        }
    }

    async fn health_pass(&self, cancel: &CancellationToken) {
        let agents = self
            .registry
            .list_agents(None, Some(AgentStatus::Active), None);
        self.metrics.record(
            MetricSample::new(SYSTEM_OWNER, "active_agents", agents.len() as f64).with_unit("count"),
        );

        for agent in agents {
            if cancel.is_cancelled() {
                return;
            }
            let result = self.check_agent(agent.id, agent.probe_url.as_deref()).await;
            self.apply_health_result(result).await;
        }
    }

    /// One probe. 2xx within the deadline is healthy; anything else,
    /// including transport errors and timeouts, is not.
    pub async fn check_agent(&self, agent_id: Uuid, probe_url: Option<&str>) -> HealthCheckResult {
        let checked_at = Utc::now();
        let started = tokio::time::Instant::now();

        let outcome = match probe_url {
            None => Err("agent has no probe url".to_string()),
            Some(url) => match self
                .client
                .get(url)
                .timeout(PROBE_DEADLINE)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => Ok(()),
                Ok(response) => Err(format!("probe returned {}", response.status())),
                Err(e) if e.is_timeout() => Err("probe timed out".to_string()),
                Err(e) => Err(format!("probe failed: {e}")),
            },
        };

        HealthCheckResult {
            agent_id,
            healthy: outcome.is_ok(),
            response_time_ms: started.elapsed().as_millis() as i64,
            error: outcome.err(),
            checked_at,
        }
    }

    async fn apply_health_result(&self, result: HealthCheckResult) {
        let agent_id = result.agent_id;
        let owner = agent_id.to_string();

        self.metrics.record(
            MetricSample::new(
                owner.clone(),
                "health_check_response_ms",
                result.response_time_ms as f64,
            )
            .with_unit("milliseconds"),
        );

        if result.healthy {
            self.consecutive_failures.insert(agent_id, 0);
            self.metrics
                .record(MetricSample::new(owner, "agent_failure", 0.0).with_unit("count"));
        } else {
            let failures = {
                let mut counter = self.consecutive_failures.entry(agent_id).or_insert(0);
                *counter += 1;
                *counter
            };
            if let Some(error) = &result.error {
                self.registry.record_probe_error(agent_id, error.clone());
            }
            debug!(agent = %agent_id, failures, "health probe failed");

            if failures >= FAILURE_ALERT_THRESHOLD {
                // The agent_failure rule fires off this sample.
                self.metrics.record(
                    MetricSample::new(owner, "agent_failure", failures as f64).with_unit("count"),
                );
                warn!(agent = %agent_id, failures, "agent failing repeatedly");

                if self.config.restart_policy {
                    info!(agent = %agent_id, "restart policy engaged");
                    if let Err(e) = self.orchestrator.restart(agent_id).await {
                        warn!(agent = %agent_id, error = %e, "policy restart failed");
                    } else {
                        self.consecutive_failures.insert(agent_id, 0);
                    }
                }
            }
        }

        self.push_history(agent_id, result);
    }

    async fn metrics_pass(&self, cancel: &CancellationToken) {
        let agents = self
            .registry
            .list_agents(None, Some(AgentStatus::Active), None);
        for agent in agents {
            if cancel.is_cancelled() {
                return;
            }
            let Some(endpoint) = &agent.endpoint else {
                continue;
            };
            match self.fetch_usage(endpoint).await {
                Ok(usage) => self.record_usage(agent.id, &usage),
                Err(e) => debug!(agent = %agent.id, error = %e, "usage fetch failed"),
            }
        }
    }

    async fn fetch_usage(&self, endpoint: &str) -> Result<WorkerUsage, String> {
        let url = format!("{}/metrics", endpoint.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .timeout(PROBE_DEADLINE)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("metrics endpoint returned {}", response.status()));
        }
        response.json().await.map_err(|e| e.to_string())
    }

    fn record_usage(&self, agent_id: Uuid, usage: &WorkerUsage) {
        let owner = agent_id.to_string();
        self.metrics.record(
            MetricSample::new(owner.clone(), "cpu_usage_percent", usage.cpu_percent)
                .with_unit("percent"),
        );
        self.metrics.record(
            MetricSample::new(owner.clone(), "memory_usage_percent", usage.memory_percent)
                .with_unit("percent"),
        );
        self.metrics.record(
            MetricSample::new(owner.clone(), "request_count", usage.request_count)
                .with_unit("count"),
        );
        self.metrics.record(
            MetricSample::new(
                owner.clone(),
                "response_time_seconds",
                usage.avg_response_ms / 1000.0,
            )
            .with_unit("seconds"),
        );
        self.metrics.record(
            MetricSample::new(owner, "error_rate_percent", usage.error_rate_percent)
                .with_unit("percent"),
        );
    }

    pub fn health_history(&self, agent_id: Uuid, limit: usize) -> Vec<HealthCheckResult> {
        self.history
            .get(&agent_id)
            .map(|ring| ring.iter().rev().take(limit).rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn consecutive_failures(&self, agent_id: Uuid) -> u32 {
        self.consecutive_failures
            .get(&agent_id)
            .map(|entry| *entry)
            .unwrap_or(0)
    }

    fn push_history(&self, agent_id: Uuid, result: HealthCheckResult) {
        let mut ring = self.history.entry(agent_id).or_default();
        ring.push_back(result);
        while ring.len() > HISTORY_LIMIT {
            ring.pop_front();
        }
    }
}
