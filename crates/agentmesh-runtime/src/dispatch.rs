//! Invocation dispatcher
//!
//! The hot path: resolve, authorize, validate, route, time out,
//! classify. Holds no global lock; per-agent pressure is tracked with
//! an atomic in-flight counter and capped by the agent's own
//! concurrency limit.

use crate::adapter::{AdapterRegistry, AdapterRequest};
use agentmesh_core::{AgentKind, AgentStatus, Caller, Error, LlmUsage, Result};
use agentmesh_observability::TraceRecorder;
use agentmesh_registry::Registry;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
pub struct InvokeParams {
    pub input: Value,
    pub session_id: Option<String>,
    pub trace_id: Option<Uuid>,
}

#[derive(Clone, Debug, Serialize)]
pub struct InvokeResponse {
    pub output: Value,
    pub trace_id: Uuid,
    pub execution_time_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_usage: Option<LlmUsage>,
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    traces: Arc<TraceRecorder>,
    adapters: Arc<AdapterRegistry>,
    default_timeout: Duration,
    inflight: dashmap::DashMap<Uuid, Arc<AtomicUsize>>,
}

/// Decrements the in-flight counter when the invocation leaves scope,
/// whatever path it took out.
struct InflightGuard(Arc<AtomicUsize>);

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        traces: Arc<TraceRecorder>,
        adapters: Arc<AdapterRegistry>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            traces,
            adapters,
            default_timeout,
            inflight: dashmap::DashMap::new(),
        }
    }

    pub async fn invoke(
        &self,
        agent_id: Uuid,
        params: InvokeParams,
        caller: &Caller,
        cancel: CancellationToken,
    ) -> Result<InvokeResponse> {
        let agent = self.registry.get_agent(agent_id)?;
        if !caller.may_act_on(agent.owner) {
            return Err(Error::forbidden("caller may not invoke this agent"));
        }
        if agent.status != AgentStatus::Active {
            return Err(Error::unavailable(format!(
                "agent is {:?}, not active",
                agent.status
            )));
        }

        // Schema check happens before any external call.
        if let Some(schema) = &agent.input_schema {
            if let Err(problems) = schema.validate(&params.input) {
                return Err(Error::bad_input(problems.join("; ")));
            }
        }

        // Per-agent backpressure: fail fast above the cap.
        let counter = self
            .inflight
            .entry(agent_id)
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .clone();
        if counter.fetch_add(1, Ordering::SeqCst) >= agent.max_concurrency {
            counter.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Overloaded(format!(
                "agent at max concurrency ({})",
                agent.max_concurrency
            )));
        }
        let _guard = InflightGuard(counter);

        let trace_id = self.traces.start(
            params.trace_id,
            params.session_id.clone(),
            agent_id.to_string(),
            params.input.clone(),
            Some(caller.user_id.to_string()),
        );

        let timeout = agent
            .invoke_timeout_sec
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        let started = tokio::time::Instant::now();

        let request = AdapterRequest {
            agent_id,
            model: agent.model.clone(),
            system_prompt: agent.system_prompt.clone(),
            input: params.input,
            trace_id,
            endpoint: agent.endpoint.clone(),
            auth_token: agent.auth_token.clone(),
        };

        // Templated agents go through the adapter bound to their model;
        // external agents always speak the worker HTTP contract, which
        // the fallback adapter implements.
        let adapter = match agent.kind {
            AgentKind::Templated => self.adapters.resolve(&agent.model),
            AgentKind::External => self.adapters.resolve(""),
        };

        let outcome = tokio::select! {
            result = tokio::time::timeout(timeout, adapter.invoke(request, cancel.clone())) => {
                match result {
                    Ok(inner) => inner,
                    Err(_) => Err(Error::timeout(format!(
                        "invocation exceeded {}s", timeout.as_secs()
                    ))),
                }
            }
            _ = cancel.cancelled() => Err(Error::internal("cancelled")),
        };

        let elapsed_ms = started.elapsed().as_millis() as i64;

        match outcome {
            Ok(outcome) => {
                self.traces
                    .end(trace_id, outcome.output.clone(), outcome.llm_usage.clone())?;
                self.registry.record_invocation(agent_id, true, None);
                for tool_id in &agent.tools {
                    self.registry.record_tool_invocation(*tool_id, true, elapsed_ms);
                }
                debug!(agent = %agent_id, trace = %trace_id, elapsed_ms, "invocation ok");
                Ok(InvokeResponse {
                    output: outcome.output,
                    trace_id,
                    execution_time_ms: elapsed_ms,
                    llm_usage: outcome.llm_usage,
                })
            }
            Err(e) => {
                let reason = if cancel.is_cancelled() {
                    "cancelled".to_string()
                } else {
                    e.to_string()
                };
                self.traces.fail(trace_id, reason.clone())?;
                self.registry
                    .record_invocation(agent_id, false, Some(reason));
                for tool_id in &agent.tools {
                    self.registry.record_tool_invocation(*tool_id, false, elapsed_ms);
                }
                Err(e)
            }
        }
    }

    pub fn inflight(&self, agent_id: Uuid) -> usize {
        self.inflight
            .get(&agent_id)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}
