//! Workflow execution engine
//!
//! Drives a workflow's steps through the dispatcher. Sequential plans
//! thread each step's output into the next step's bag; parallel plans
//! fan the initial input out and fail together; conditional plans skip
//! steps whose predicate over the current bag is false. Execution state
//! is persisted before and after every step so an observer always sees
//! progress.

use crate::dispatch::{Dispatcher, InvokeParams};
use agentmesh_core::{Caller, Error, ExecutionStatus, Result, WorkflowKind};
use agentmesh_registry::{ConditionOp, Registry, StepCondition, Workflow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Pending,
    Running,
    Completed,
    Skipped,
    Failed,
    Cancelled,
}

#[derive(Clone, Debug, Serialize)]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub input: Value,
    /// Outputs keyed by agent id.
    pub outputs: BTreeMap<String, Value>,
    pub step_states: Vec<StepState>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

pub struct WorkflowEngine {
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    executions: dashmap::DashMap<Uuid, Execution>,
    cancels: dashmap::DashMap<Uuid, CancellationToken>,
}

impl WorkflowEngine {
    pub fn new(registry: Arc<Registry>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            registry,
            dispatcher,
            executions: dashmap::DashMap::new(),
            cancels: dashmap::DashMap::new(),
        }
    }

    /// Start an execution in the background and return its id.
    pub fn execute(
        self: &Arc<Self>,
        workflow_id: Uuid,
        input: Value,
        caller: Caller,
    ) -> Result<Uuid> {
        let workflow = self.registry.get_workflow(workflow_id)?;
        if !caller.may_act_on(workflow.owner) {
            return Err(Error::forbidden("caller may not execute this workflow"));
        }
        let execution_id = self.begin(&workflow, input.clone());
        let engine = self.clone();
        tokio::spawn(async move {
            engine.drive(workflow, execution_id, input, caller).await;
        });
        Ok(execution_id)
    }

    /// Run an execution to completion and return the final record.
    pub async fn execute_and_wait(
        self: &Arc<Self>,
        workflow_id: Uuid,
        input: Value,
        caller: Caller,
    ) -> Result<Execution> {
        let workflow = self.registry.get_workflow(workflow_id)?;
        if !caller.may_act_on(workflow.owner) {
            return Err(Error::forbidden("caller may not execute this workflow"));
        }
        let execution_id = self.begin(&workflow, input.clone());
        self.drive(workflow, execution_id, input, caller).await;
        self.get(execution_id)
            .ok_or_else(|| Error::internal("execution record vanished"))
    }

    pub fn get(&self, execution_id: Uuid) -> Option<Execution> {
        self.executions.get(&execution_id).map(|entry| entry.clone())
    }

    pub fn list(&self, workflow_id: Option<Uuid>) -> Vec<Execution> {
        self.executions
            .iter()
            .map(|entry| entry.clone())
            .filter(|exec| workflow_id.is_none_or(|id| exec.workflow_id == id))
            .collect()
    }

    /// Cancel an execution; in-flight steps are signalled and their
    /// traces end in error with reason "cancelled".
    pub fn stop(&self, execution_id: Uuid, caller: &Caller) -> Result<()> {
        let workflow_id = self
            .executions
            .get(&execution_id)
            .map(|exec| exec.workflow_id)
            .ok_or_else(|| Error::not_found(format!("execution {execution_id}")))?;
        let workflow = self.registry.get_workflow(workflow_id)?;
        if !caller.may_act_on(workflow.owner) {
            return Err(Error::forbidden("caller may not cancel this execution"));
        }
        let token = self
            .cancels
            .get(&execution_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| Error::not_found(format!("execution {execution_id}")))?;
        token.cancel();
        info!(execution = %execution_id, "execution cancellation requested");
        Ok(())
    }

    fn begin(&self, workflow: &Workflow, input: Value) -> Uuid {
        let execution_id = Uuid::new_v4();
        self.executions.insert(
            execution_id,
            Execution {
                id: execution_id,
                workflow_id: workflow.id,
                status: ExecutionStatus::Running,
                input,
                outputs: BTreeMap::new(),
                step_states: vec![StepState::Pending; workflow.steps.len()],
                error: None,
                started_at: Utc::now(),
                completed_at: None,
            },
        );
        self.cancels
            .insert(execution_id, CancellationToken::new());
        execution_id
    }

    async fn drive(&self, workflow: Workflow, execution_id: Uuid, input: Value, caller: Caller) {
        let cancel = self
            .cancels
            .get(&execution_id)
            .map(|entry| entry.clone())
            .unwrap_or_default();

        let result = match workflow.kind {
            WorkflowKind::Sequential => {
                self.run_ordered(&workflow, execution_id, input, &caller, &cancel, false)
                    .await
            }
            WorkflowKind::Conditional => {
                self.run_ordered(&workflow, execution_id, input, &caller, &cancel, true)
                    .await
            }
            WorkflowKind::Parallel => {
                self.run_parallel(&workflow, execution_id, input, &caller, &cancel)
                    .await
            }
        };

        let status = match &result {
            Ok(()) => ExecutionStatus::Completed,
            Err(_) if cancel.is_cancelled() => ExecutionStatus::Cancelled,
            Err(_) => ExecutionStatus::Failed,
        };
        self.finish(execution_id, status, result.err().map(|e| e.to_string()));
        self.cancels.remove(&execution_id);
    }

    /// Sequential and conditional execution share a loop; conditional
    /// additionally consults each step's predicate.
    async fn run_ordered(
        &self,
        workflow: &Workflow,
        execution_id: Uuid,
        input: Value,
        caller: &Caller,
        cancel: &CancellationToken,
        conditional: bool,
    ) -> Result<()> {
        let mut bag = input;

        for (index, step) in workflow.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                self.mark_step(execution_id, index, StepState::Cancelled);
                return Err(Error::internal("execution cancelled"));
            }

            // A step with no condition always executes.
            if conditional {
                if let Some(condition) = &step.condition {
                    if !evaluate_condition(condition, &bag) {
                        debug!(execution = %execution_id, step = index, "step skipped");
                        self.mark_step(execution_id, index, StepState::Skipped);
                        continue;
                    }
                }
            }

            self.mark_step(execution_id, index, StepState::Running);
            let step_input = map_input(&bag, &step.input_mapping);

            match self
                .dispatcher
                .invoke(
                    step.agent_id,
                    InvokeParams {
                        input: step_input,
                        ..Default::default()
                    },
                    caller,
                    cancel.child_token(),
                )
                .await
            {
                Ok(response) => {
                    self.record_output(execution_id, index, step.agent_id, response.output.clone());
                    bag = response.output;
                }
                Err(e) => {
                    let state = if cancel.is_cancelled() {
                        StepState::Cancelled
                    } else {
                        StepState::Failed
                    };
                    self.mark_step(execution_id, index, state);
                    warn!(execution = %execution_id, step = index, error = %e, "step failed");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Every step maps over the initial input concurrently; the first
    /// failure cancels the rest and fails the execution.
    async fn run_parallel(
        &self,
        workflow: &Workflow,
        execution_id: Uuid,
        input: Value,
        caller: &Caller,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut set: JoinSet<(usize, Uuid, Result<Value>)> = JoinSet::new();
        // One failure cancels the siblings without marking the whole
        // execution as caller-cancelled.
        let siblings = cancel.child_token();

        for (index, step) in workflow.steps.iter().enumerate() {
            self.mark_step(execution_id, index, StepState::Running);
            let step_input = map_input(&input, &step.input_mapping);
            let dispatcher = self.dispatcher.clone();
            let agent_id = step.agent_id;
            let caller = *caller;
            let token = siblings.child_token();
            set.spawn(async move {
                let result = dispatcher
                    .invoke(
                        agent_id,
                        InvokeParams {
                            input: step_input,
                            ..Default::default()
                        },
                        &caller,
                        token,
                    )
                    .await
                    .map(|response| response.output);
                (index, agent_id, result)
            });
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            let (index, agent_id, result) = match joined {
                Ok(entry) => entry,
                Err(e) => {
                    first_error.get_or_insert(Error::internal(format!("step task: {e}")));
                    continue;
                }
            };
            match result {
                Ok(output) => {
                    self.record_output(execution_id, index, agent_id, output);
                }
                Err(e) => {
                    let state = if cancel.is_cancelled() {
                        StepState::Cancelled
                    } else {
                        StepState::Failed
                    };
                    self.mark_step(execution_id, index, state);
                    if first_error.is_none() {
                        siblings.cancel();
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    fn record_output(&self, execution_id: Uuid, index: usize, agent_id: Uuid, output: Value) {
        if let Some(mut exec) = self.executions.get_mut(&execution_id) {
            exec.outputs.insert(agent_id.to_string(), output);
            if let Some(state) = exec.step_states.get_mut(index) {
                *state = StepState::Completed;
            }
        }
    }

    fn mark_step(&self, execution_id: Uuid, index: usize, state: StepState) {
        if let Some(mut exec) = self.executions.get_mut(&execution_id) {
            if let Some(slot) = exec.step_states.get_mut(index) {
                *slot = state;
            }
        }
    }

    fn finish(&self, execution_id: Uuid, status: ExecutionStatus, error: Option<String>) {
        if let Some(mut exec) = self.executions.get_mut(&execution_id) {
            exec.status = status;
            exec.error = error;
            exec.completed_at = Some(Utc::now());
        }
        info!(execution = %execution_id, ?status, "execution finished");
    }
}

/// Apply an input mapping. Empty mapping passes the bag through
/// unchanged; missing paths yield null rather than an error.
pub fn map_input(bag: &Value, mapping: &BTreeMap<String, String>) -> Value {
    if mapping.is_empty() {
        return bag.clone();
    }
    let mut out = Map::new();
    for (destination, path) in mapping {
        out.insert(destination.clone(), lookup_path(bag, path));
    }
    Value::Object(out)
}

/// Dotted-path lookup into a JSON value; null when any segment misses.
fn lookup_path(value: &Value, path: &str) -> Value {
    let mut current = value;
    for key in path.split('.') {
        match current.get(key) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// Step predicate over the current bag.
pub fn evaluate_condition(condition: &StepCondition, bag: &Value) -> bool {
    let actual = lookup_path(bag, &condition.field);
    match condition.operator {
        ConditionOp::Equals => actual == condition.value,
        ConditionOp::NotEquals => actual != condition.value,
        ConditionOp::Contains => match (&actual, &condition.value) {
            (Value::Null, _) => false,
            (Value::Array(items), needle) => items.contains(needle),
            (actual, Value::String(needle)) => value_text(actual).contains(needle.as_str()),
            _ => false,
        },
        ConditionOp::GreaterThan => match (actual.as_f64(), condition.value.as_f64()) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        ConditionOp::LessThan => match (actual.as_f64(), condition.value.as_f64()) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
