//! Worker orchestrator
//!
//! Owns the physical lifecycle of templated agents: render, spawn, probe,
//! drain, kill. Nothing else in the process touches a worker; every
//! signal goes through here. External agents are only probed, never
//! spawned.

use agentmesh_core::{AgentKind, AgentStatus, Error, PortAllocator, Result};
use agentmesh_registry::{render_template, Agent, Registry, TemplateStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use uuid::Uuid;

const LOG_RING_LINES: usize = 500;
const PROBE_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub startup_deadline: Duration,
    pub drain_deadline: Duration,
    pub work_root: PathBuf,
    /// Worker launch command; whitespace-separated, first token is the program.
    pub worker_command: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            startup_deadline: Duration::from_secs(60),
            drain_deadline: Duration::from_secs(10),
            work_root: std::env::temp_dir().join("agentmesh-workers"),
            worker_command: "agentmesh-worker".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct DeploymentStatus {
    pub agent_id: Uuid,
    pub status: String,
    pub message: String,
    pub replicas: u32,
    pub ready_replicas: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DeployValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl DeployValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

struct WorkerProcess {
    port: u16,
    child: Child,
}

pub struct Orchestrator {
    registry: Arc<Registry>,
    templates: Arc<TemplateStore>,
    ports: Arc<PortAllocator>,
    client: reqwest::Client,
    config: OrchestratorConfig,
    workers: dashmap::DashMap<Uuid, Vec<WorkerProcess>>,
    logs: dashmap::DashMap<Uuid, Arc<Mutex<VecDeque<String>>>>,
    deployments: dashmap::DashMap<Uuid, DeploymentStatus>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<Registry>,
        templates: Arc<TemplateStore>,
        ports: Arc<PortAllocator>,
        client: reqwest::Client,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            templates,
            ports,
            client,
            config,
            workers: dashmap::DashMap::new(),
            logs: dashmap::DashMap::new(),
            deployments: dashmap::DashMap::new(),
        }
    }

    /// Pre-deploy validation: missing name/model are fatal, the rest warn.
    pub fn validate(&self, agent: &Agent) -> DeployValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if agent.name.is_empty() {
            errors.push("agent name is required".to_string());
        }
        if agent.model.is_empty() {
            errors.push("LLM model is required".to_string());
        }
        if agent.system_prompt.is_empty() {
            warnings.push("no system prompt configured".to_string());
        }
        if agent.kind == AgentKind::Templated && agent.template_id.is_none() {
            errors.push("templated agent has no template".to_string());
        }
        if agent.kind == AgentKind::External && agent.endpoint.is_none() {
            errors.push("external agent has no endpoint".to_string());
        }
        if agent.desired_replicas > 10 {
            warnings.push("high replica count may impact performance".to_string());
        }
        DeployValidation { errors, warnings }
    }

    /// Deploy an agent. On success the agent is `active` with endpoint
    /// and probe recorded; on failure it is `error` with the reason in
    /// `last_error`. Port exhaustion is the exception: it leaves the agent
    /// untouched.
    pub async fn deploy(&self, agent_id: Uuid) -> Result<()> {
        let agent = self.registry.get_agent(agent_id)?;
        let validation = self.validate(&agent);
        if !validation.is_valid() {
            return Err(Error::bad_input(validation.errors.join("; ")));
        }

        self.record_deployment(agent_id, "deploying", "deployment in progress", 0);

        let result = match agent.kind {
            AgentKind::Templated => self.deploy_templated(&agent).await,
            AgentKind::External => self.deploy_external(&agent).await,
        };

        match &result {
            Ok(()) => {
                self.record_deployment(agent_id, "active", "deployment successful", 1);
                info!(agent = %agent_id, "agent deployed");
            }
            Err(e) => {
                self.record_deployment(agent_id, "failed", &e.to_string(), 0);
                warn!(agent = %agent_id, error = %e, "deployment failed");
            }
        }
        result
    }

    async fn deploy_templated(&self, agent: &Agent) -> Result<()> {
        let template_id = agent
            .template_id
            .ok_or_else(|| Error::bad_input("templated agent has no template"))?;
        let template = self.templates.get(template_id)?;

        // Allocate before any state mutation so exhaustion leaves the
        // agent exactly as it was.
        let port = self.ports.allocate()?;
        self.registry.set_status(agent.id, AgentStatus::Deploying)?;

        match self.spawn_and_probe(agent, &template.definition, port).await {
            Ok(rendered) => {
                let endpoint = format!("http://127.0.0.1:{port}");
                let probe_url = format!("{endpoint}/health");
                self.registry
                    .set_deployed(agent.id, endpoint, probe_url, Some(rendered))?;
                Ok(())
            }
            Err(e) => {
                self.ports.release(port);
                self.registry.set_error(agent.id, e.to_string())?;
                Err(e)
            }
        }
    }

    async fn spawn_and_probe(
        &self,
        agent: &Agent,
        definition: &Value,
        port: u16,
    ) -> Result<String> {
        // Render the template with the agent's configuration and prompt.
        let mut params: BTreeMap<String, Value> = agent.configuration.clone();
        params.insert("system_prompt".to_string(), Value::String(agent.system_prompt.clone()));
        params.insert("model".to_string(), Value::String(agent.model.clone()));
        params.insert("agent_id".to_string(), Value::String(agent.id.to_string()));
        let rendered = render_template(definition, &params);
        let artifact = serde_json::to_string_pretty(&rendered)?;

        let work_dir = self.config.work_root.join(agent.id.to_string());
        tokio::fs::create_dir_all(&work_dir).await?;
        tokio::fs::write(work_dir.join("agent.json"), &artifact).await?;

        let mut parts = self.config.worker_command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| Error::internal("empty worker command"))?;

        let mut child = Command::new(program)
            .args(parts)
            .current_dir(&work_dir)
            .env("AGENT_ID", agent.id.to_string())
            .env("AGENT_NAME", &agent.name)
            .env("LLM_MODEL", &agent.model)
            .env("SYSTEM_PROMPT", &agent.system_prompt)
            .env("PORT", port.to_string())
            .env(
                "CONFIGURATION",
                serde_json::to_string(&agent.configuration)?,
            )
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::unavailable(format!("failed to spawn worker: {e}")))?;

        self.pump_logs(agent.id, &mut child);

        let probe_url = format!("http://127.0.0.1:{port}/health");
        if self.await_healthy(&probe_url, self.config.startup_deadline).await {
            self.workers
                .entry(agent.id)
                .or_default()
                .push(WorkerProcess { port, child });
            Ok(artifact)
        } else {
            let _ = child.kill().await;
            Err(Error::timeout(format!(
                "worker did not become healthy within {}s",
                self.config.startup_deadline.as_secs()
            )))
        }
    }

    async fn deploy_external(&self, agent: &Agent) -> Result<()> {
        let endpoint = agent
            .endpoint
            .clone()
            .ok_or_else(|| Error::bad_input("external agent has no endpoint"))?;
        let probe_url = agent
            .probe_url
            .clone()
            .unwrap_or_else(|| format!("{}/health", endpoint.trim_end_matches('/')));

        self.registry.set_status(agent.id, AgentStatus::Deploying)?;

        if self.await_healthy(&probe_url, self.config.startup_deadline).await {
            self.registry
                .set_deployed(agent.id, endpoint, probe_url, None)?;
            Ok(())
        } else {
            let e = Error::timeout(format!(
                "external endpoint did not answer health within {}s",
                self.config.startup_deadline.as_secs()
            ));
            self.registry.set_error(agent.id, e.to_string())?;
            Err(e)
        }
    }

    /// Poll a probe with doubling backoff until healthy or deadline.
    async fn await_healthy(&self, probe_url: &str, deadline: Duration) -> bool {
        let started = tokio::time::Instant::now();
        let mut backoff = Duration::from_millis(200);
        loop {
            if self.probe_once(probe_url).await {
                return true;
            }
            if started.elapsed() + backoff > deadline {
                return false;
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(2));
        }
    }

    async fn probe_once(&self, url: &str) -> bool {
        matches!(
            self.client
                .get(url)
                .timeout(PROBE_ATTEMPT_TIMEOUT)
                .send()
                .await,
            Ok(response) if response.status().is_success()
        )
    }

    /// Stop all workers of an agent: graceful terminate, drain, force
    /// kill, release ports.
    pub async fn stop(&self, agent_id: Uuid) -> Result<()> {
        let agent = self.registry.get_agent(agent_id)?;

        if let Some((_, workers)) = self.workers.remove(&agent_id) {
            for worker in workers {
                self.drain_and_kill(worker).await;
            }
        }

        self.registry.set_stopped(agent_id)?;
        info!(agent = %agent_id, name = %agent.name, "agent stopped");
        Ok(())
    }

    async fn drain_and_kill(&self, mut worker: WorkerProcess) {
        terminate_gracefully(&worker.child);
        match tokio::time::timeout(self.config.drain_deadline, worker.child.wait()).await {
            Ok(_) => debug!(port = worker.port, "worker drained"),
            Err(_) => {
                debug!(port = worker.port, "drain deadline hit, force killing");
                let _ = worker.child.kill().await;
            }
        }
        self.ports.release(worker.port);
    }

    /// Stop-then-deploy on the current configuration.
    pub async fn restart(&self, agent_id: Uuid) -> Result<()> {
        if self.workers.contains_key(&agent_id) {
            self.stop(agent_id).await?;
        }
        self.deploy(agent_id).await
    }

    /// Converge the actual replica count toward the desired one.
    pub async fn scale(&self, agent_id: Uuid, desired: u32) -> Result<()> {
        let agent = self.registry.get_agent(agent_id)?;
        if agent.status != AgentStatus::Active {
            return Err(Error::unavailable("agent must be active to scale"));
        }
        if agent.kind != AgentKind::Templated {
            return Err(Error::bad_input("only templated agents scale"));
        }
        self.registry.set_desired_replicas(agent_id, desired)?;
        let desired = desired.max(1) as usize;

        let current = self
            .workers
            .get(&agent_id)
            .map(|w| w.len())
            .unwrap_or_default();

        if current < desired {
            let template = self
                .templates
                .get(agent.template_id.ok_or_else(|| {
                    Error::bad_input("templated agent has no template")
                })?)?;
            for _ in current..desired {
                let port = self.ports.allocate()?;
                if let Err(e) = self.spawn_and_probe(&agent, &template.definition, port).await {
                    self.ports.release(port);
                    return Err(e);
                }
            }
        } else if current > desired {
            if let Some(mut workers) = self.workers.get_mut(&agent_id) {
                let excess: Vec<WorkerProcess> =
                    workers.drain(desired..).collect();
                drop(workers);
                for worker in excess {
                    self.drain_and_kill(worker).await;
                }
            }
        }

        info!(agent = %agent_id, desired, "replicas converged");
        Ok(())
    }

    pub fn replica_count(&self, agent_id: Uuid) -> usize {
        self.workers
            .get(&agent_id)
            .map(|w| w.len())
            .unwrap_or_default()
    }

    pub fn deployment_status(&self, agent_id: Uuid) -> Option<DeploymentStatus> {
        self.deployments.get(&agent_id).map(|entry| entry.clone())
    }

    /// Captured stdout/stderr tail for an agent's workers.
    pub fn worker_logs(&self, agent_id: Uuid, lines: usize) -> Vec<String> {
        self.logs
            .get(&agent_id)
            .map(|ring| {
                let ring = ring.lock().expect("log ring poisoned");
                ring.iter()
                    .rev()
                    .take(lines)
                    .rev()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn pump_logs(&self, agent_id: Uuid, child: &mut Child) {
        let ring = self
            .logs
            .entry(agent_id)
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .clone();

        if let Some(stdout) = child.stdout.take() {
            let ring = ring.clone();
            tokio::spawn(async move {
                let mut lines = tokio::io::BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    push_log(&ring, line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = tokio::io::BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    push_log(&ring, line);
                }
            });
        }
    }

    fn record_deployment(&self, agent_id: Uuid, status: &str, message: &str, ready: u32) {
        let now = Utc::now();
        let done = status != "deploying";
        self.deployments
            .entry(agent_id)
            .and_modify(|d| {
                d.status = status.to_string();
                d.message = message.to_string();
                d.ready_replicas = ready;
                if done {
                    d.completed_at = Some(now);
                } else {
                    d.started_at = now;
                    d.completed_at = None;
                }
            })
            .or_insert_with(|| DeploymentStatus {
                agent_id,
                status: status.to_string(),
                message: message.to_string(),
                replicas: 1,
                ready_replicas: ready,
                started_at: now,
                completed_at: if done { Some(now) } else { None },
            });
    }
}

/// SIGTERM on unix so the worker can flush; elsewhere the follow-up
/// force kill is the only option.
fn terminate_gracefully(child: &Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    let _ = child;
}

fn push_log(ring: &Arc<Mutex<VecDeque<String>>>, line: String) {
    let mut ring = ring.lock().expect("log ring poisoned");
    ring.push_back(line);
    while ring.len() > LOG_RING_LINES {
        ring.pop_front();
    }
}
