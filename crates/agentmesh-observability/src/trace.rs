//! Trace recorder
//!
//! Tracks the lifecycle of every invocation: started on dispatch, ended
//! or failed on completion. Completion emits the timing and usage
//! metrics the alert engine evaluates. Finished traces are retained for
//! a bounded horizon and then pruned.

use crate::metrics::{MetricSample, MetricStore};
use agentmesh_core::{Error, LlmUsage, Result, TraceStatus};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize)]
pub struct TraceRecord {
    pub id: Uuid,
    pub session_id: Option<String>,
    /// Agent or workflow the trace belongs to, as an id string.
    pub entity: String,
    pub input: Value,
    pub output: Option<Value>,
    pub llm_usage: Option<LlmUsage>,
    pub status: TraceStatus,
    pub error: Option<String>,
    pub user: Option<String>,
    pub parent_span: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

pub struct TraceRecorder {
    traces: dashmap::DashMap<Uuid, TraceRecord>,
    metrics: Arc<MetricStore>,
    retention: Duration,
}

impl TraceRecorder {
    pub fn new(metrics: Arc<MetricStore>, retention: Duration) -> Self {
        Self {
            traces: dashmap::DashMap::new(),
            metrics,
            retention,
        }
    }

    /// Open a trace. A caller-supplied id is reused; otherwise one is minted.
    pub fn start(
        &self,
        id: Option<Uuid>,
        session_id: Option<String>,
        entity: impl Into<String>,
        input: Value,
        user: Option<String>,
    ) -> Uuid {
        let id = id.unwrap_or_else(Uuid::new_v4);
        self.traces.insert(
            id,
            TraceRecord {
                id,
                session_id,
                entity: entity.into(),
                input,
                output: None,
                llm_usage: None,
                status: TraceStatus::Started,
                error: None,
                user,
                parent_span: None,
                started_at: Utc::now(),
                ended_at: None,
                duration_ms: None,
            },
        );
        id
    }

    /// Close a trace as successful and emit its metrics.
    pub fn end(&self, id: Uuid, output: Value, usage: Option<LlmUsage>) -> Result<()> {
        let (entity, duration_ms, tokens) = {
            let mut entry = self
                .traces
                .get_mut(&id)
                .ok_or_else(|| Error::not_found(format!("trace {id}")))?;
            let now = Utc::now();
            entry.status = TraceStatus::Success;
            entry.output = Some(output);
            entry.ended_at = Some(now);
            entry.duration_ms = Some(agentmesh_core::ids::elapsed_ms(entry.started_at, now));
            entry.llm_usage = usage;
            (
                entry.entity.clone(),
                entry.duration_ms.unwrap_or(0),
                entry.llm_usage.as_ref().map(|u| u.tokens),
            )
        };

        self.metrics.record(
            MetricSample::new(entity.clone(), "execution_time_seconds", duration_ms as f64 / 1000.0)
                .with_unit("seconds"),
        );
        if let Some(tokens) = tokens {
            self.metrics
                .record(MetricSample::new(entity, "llm_tokens", tokens as f64).with_unit("tokens"));
        }
        Ok(())
    }

    /// Close a trace as failed and count the error.
    pub fn fail(&self, id: Uuid, message: impl Into<String>) -> Result<()> {
        let entity = {
            let mut entry = self
                .traces
                .get_mut(&id)
                .ok_or_else(|| Error::not_found(format!("trace {id}")))?;
            let now = Utc::now();
            entry.status = TraceStatus::Error;
            entry.error = Some(message.into());
            entry.ended_at = Some(now);
            entry.duration_ms = Some(agentmesh_core::ids::elapsed_ms(entry.started_at, now));
            entry.entity.clone()
        };

        self.metrics
            .record(MetricSample::new(entity, "error_count", 1.0).with_unit("count"));
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<TraceRecord> {
        self.traces.get(&id).map(|entry| entry.clone())
    }

    /// Most recent traces for an entity, newest first.
    pub fn list_recent(&self, entity: &str, limit: usize) -> Vec<TraceRecord> {
        let mut out: Vec<TraceRecord> = self
            .traces
            .iter()
            .filter(|entry| entry.entity == entity)
            .map(|entry| entry.clone())
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        out.truncate(limit);
        out
    }

    /// Drop finished traces older than the retention horizon.
    pub fn prune(&self) -> usize {
        let horizon = Utc::now() - self.retention;
        let before = self.traces.len();
        self.traces.retain(|_, trace| {
            trace.status == TraceStatus::Started
                || trace.ended_at.is_none_or(|ended| ended >= horizon)
        });
        before - self.traces.len()
    }
}
