//! Runtime adapter seam
//!
//! The dispatcher never talks to a model provider or a worker directly;
//! it resolves an adapter for the agent's model and hands over the
//! request. The stock adapter speaks the worker HTTP contract
//! (`POST {endpoint}/invoke`); tests and embedded providers plug in
//! their own implementations.

use agentmesh_core::{Error, LlmUsage, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Everything an adapter needs to service one invocation.
#[derive(Clone, Debug)]
pub struct AdapterRequest {
    pub agent_id: Uuid,
    pub model: String,
    pub system_prompt: String,
    pub input: Value,
    pub trace_id: Uuid,
    pub endpoint: Option<String>,
    pub auth_token: Option<String>,
}

#[derive(Clone, Debug)]
pub struct InvokeOutcome {
    pub output: Value,
    pub llm_usage: Option<LlmUsage>,
}

#[async_trait::async_trait]
pub trait RuntimeAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Service one invocation. The dispatcher owns the deadline; the
    /// token fires when the caller goes away or the workflow cancels.
    async fn invoke(&self, request: AdapterRequest, cancel: CancellationToken)
        -> Result<InvokeOutcome>;
}

/// Wire shape returned by workers from `POST /invoke`.
#[derive(Debug, Deserialize)]
struct WorkerResponse {
    output: Value,
    #[serde(default)]
    llm_usage: Option<LlmUsage>,
}

/// Adapter speaking the worker HTTP contract.
pub struct HttpWorkerAdapter {
    client: reqwest::Client,
}

impl HttpWorkerAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl RuntimeAdapter for HttpWorkerAdapter {
    fn name(&self) -> &str {
        "http-worker"
    }

    async fn invoke(
        &self,
        request: AdapterRequest,
        cancel: CancellationToken,
    ) -> Result<InvokeOutcome> {
        let endpoint = request
            .endpoint
            .as_deref()
            .ok_or_else(|| Error::unavailable("agent has no endpoint"))?;
        let url = format!("{}/invoke", endpoint.trim_end_matches('/'));

        let mut builder = self
            .client
            .post(&url)
            .header("x-trace-id", request.trace_id.to_string())
            .json(&request.input);
        if let Some(token) = &request.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = tokio::select! {
            response = builder.send() => {
                response.map_err(|e| {
                    if e.is_timeout() {
                        Error::timeout(format!("invoke {url}: {e}"))
                    } else {
                        Error::external(format!("invoke {url}: {e}"))
                    }
                })?
            }
            _ = cancel.cancelled() => return Err(Error::internal("invocation cancelled")),
        };

        if !response.status().is_success() {
            return Err(Error::external(format!(
                "worker returned {}",
                response.status()
            )));
        }

        let body: WorkerResponse = response
            .json()
            .await
            .map_err(|e| Error::external(format!("malformed worker response: {e}")))?;
        Ok(InvokeOutcome {
            output: body.output,
            llm_usage: body.llm_usage,
        })
    }
}

/// Adapters keyed by model-name prefix, with a fallback. Resolution
/// picks the longest matching prefix so "claude-3" can shadow "claude".
pub struct AdapterRegistry {
    by_prefix: HashMap<String, Arc<dyn RuntimeAdapter>>,
    fallback: Arc<dyn RuntimeAdapter>,
}

impl AdapterRegistry {
    pub fn new(fallback: Arc<dyn RuntimeAdapter>) -> Self {
        Self {
            by_prefix: HashMap::new(),
            fallback,
        }
    }

    pub fn bind(&mut self, model_prefix: impl Into<String>, adapter: Arc<dyn RuntimeAdapter>) {
        self.by_prefix.insert(model_prefix.into(), adapter);
    }

    pub fn resolve(&self, model: &str) -> Arc<dyn RuntimeAdapter> {
        self.by_prefix
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, adapter)| adapter.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}
