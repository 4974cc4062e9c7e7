//! Mesh configuration - serde structs for the agentmesh config file
//!
//! Pure types and parsing only. Every section has code defaults; a JSON
//! config file overrides them, and `AGENTMESH_*` environment variables
//! override the file.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub token: TokenConfig,
    pub agent: AgentPortConfig,
    pub health: TickConfig,
    pub metrics: TickConfig,
    pub alerts: AlertTickConfig,
    pub dispatch: DispatchConfig,
    pub deploy: DeployConfig,
    pub worker: WorkerConfig,
    pub rate_limit: RateLimitConfig,
    pub notifier: NotifierConfig,
    pub models: ModelConfig,
    pub secrets: SecretsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Master secret the vault key is derived from. Secret storage is
    /// disabled when unset.
    pub master: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub secret: Option<String>,
    pub algorithm: String,
    pub access_ttl_min: u64,
    pub refresh_ttl_days: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: None,
            algorithm: "HS256".to_string(),
            access_ttl_min: 30,
            refresh_ttl_days: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentPortConfig {
    pub port_base: u16,
    pub port_capacity: u16,
}

impl Default for AgentPortConfig {
    fn default() -> Self {
        Self {
            port_base: 9000,
            port_capacity: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    pub tick_sec: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self { tick_sec: 30 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertTickConfig {
    pub tick_sec: u64,
}

impl Default for AlertTickConfig {
    fn default() -> Self {
        Self { tick_sec: 30 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub default_timeout_sec: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout_sec: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub startup_deadline_sec: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            startup_deadline_sec: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub drain_deadline_sec: u64,
    /// Command used to launch a templated worker process.
    pub command: String,
    /// Root directory for per-agent work dirs and rendered artifacts.
    pub work_root: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            drain_deadline_sec: 10,
            command: "agentmesh-worker".to_string(),
            work_root: "/var/lib/agentmesh/workers".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_sec: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 120,
            window_sec: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub retry_max: u32,
    pub backoff_base_ms: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            retry_max: 3,
            backoff_base_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Models the dispatcher knows how to route. Updates naming an
    /// unknown model produce a validation warning, not a rejection.
    pub supported: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            supported: vec![
                "gpt-4".to_string(),
                "gpt-4-turbo".to_string(),
                "gpt-3.5-turbo".to_string(),
                "claude-3-opus".to_string(),
                "claude-3-sonnet".to_string(),
            ],
        }
    }
}

impl MeshConfig {
    /// Load from a specific path; missing or malformed files fall back to defaults.
    pub fn load(path: &Path) -> Self {
        let mut cfg = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        };
        cfg.apply_env();
        cfg
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("AGENTMESH_TOKEN_SECRET") {
            self.token.secret = Some(v);
        }
        if let Ok(v) = std::env::var("AGENTMESH_MASTER_SECRET") {
            self.secrets.master = Some(v);
        }
        if let Some(v) = env_parse("AGENTMESH_PORT_BASE") {
            self.agent.port_base = v;
        }
        if let Some(v) = env_parse("AGENTMESH_PORT_CAPACITY") {
            self.agent.port_capacity = v;
        }
        if let Some(v) = env_parse("AGENTMESH_HEALTH_TICK_SEC") {
            self.health.tick_sec = v;
        }
        if let Some(v) = env_parse("AGENTMESH_METRICS_TICK_SEC") {
            self.metrics.tick_sec = v;
        }
        if let Some(v) = env_parse("AGENTMESH_ALERTS_TICK_SEC") {
            self.alerts.tick_sec = v;
        }
        if let Some(v) = env_parse("AGENTMESH_DISPATCH_TIMEOUT_SEC") {
            self.dispatch.default_timeout_sec = v;
        }
        if let Some(v) = env_parse("AGENTMESH_STARTUP_DEADLINE_SEC") {
            self.deploy.startup_deadline_sec = v;
        }
        if let Some(v) = env_parse("AGENTMESH_DRAIN_DEADLINE_SEC") {
            self.worker.drain_deadline_sec = v;
        }
        if let Ok(v) = std::env::var("AGENTMESH_WORKER_COMMAND") {
            self.worker.command = v;
        }
        if let Ok(v) = std::env::var("AGENTMESH_WORK_ROOT") {
            self.worker.work_root = v;
        }
        if let Some(v) = env_parse("AGENTMESH_RATE_MAX_REQUESTS") {
            self.rate_limit.max_requests = v;
        }
        if let Some(v) = env_parse("AGENTMESH_RATE_WINDOW_SEC") {
            self.rate_limit.window_sec = v;
        }
        if let Some(v) = env_parse("AGENTMESH_NOTIFIER_RETRY_MAX") {
            self.notifier.retry_max = v;
        }
        if let Some(v) = env_parse("AGENTMESH_NOTIFIER_BACKOFF_BASE_MS") {
            self.notifier.backoff_base_ms = v;
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = MeshConfig::default();
        assert_eq!(cfg.agent.port_base, 9000);
        assert_eq!(cfg.agent.port_capacity, 200);
        assert_eq!(cfg.dispatch.default_timeout_sec, 60);
        assert_eq!(cfg.notifier.retry_max, 3);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: MeshConfig =
            serde_json::from_str(r#"{"agent": {"port_base": 7000}}"#).unwrap();
        assert_eq!(cfg.agent.port_base, 7000);
        assert_eq!(cfg.agent.port_capacity, 200);
        assert_eq!(cfg.health.tick_sec, 30);
    }
}
