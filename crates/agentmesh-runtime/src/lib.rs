//! Agentmesh Runtime - worker orchestration, health monitoring, dispatch, workflows

pub mod adapter;
pub mod dispatch;
pub mod health;
pub mod orchestrator;
pub mod workflow;

pub use adapter::{AdapterRegistry, HttpWorkerAdapter, InvokeOutcome, RuntimeAdapter};
pub use dispatch::{Dispatcher, InvokeParams, InvokeResponse};
pub use health::{HealthMonitor, HealthMonitorConfig};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use workflow::{Execution, WorkflowEngine};
