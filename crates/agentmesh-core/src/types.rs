//! Core types shared across the mesh

use serde::{Deserialize, Serialize};

/// How an agent's runtime comes to exist.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Worker process spawned by the control plane from a template.
    Templated,
    /// Runtime owned elsewhere; the control plane only routes to it.
    External,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Inactive,
    Deploying,
    Active,
    Error,
    Stopped,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Rest,
    Function,
    Mcp,
    Builtin,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintKind {
    Validation,
    Security,
    Performance,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    Agent,
    Tool,
    Workflow,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowKind {
    Sequential,
    Parallel,
    Conditional,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Started,
    Success,
    Error,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Active,
    Resolved,
    Silenced,
}

/// Comparison operator used by alert rules.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum CompareOp {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = ">")]
    Gt,
}

impl CompareOp {
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Lt => value < threshold,
            Self::Le => value <= threshold,
            Self::Eq => value == threshold,
            Self::Ne => value != threshold,
            Self::Ge => value >= threshold,
            Self::Gt => value > threshold,
        }
    }
}

/// Token accounting reported by an LLM-backed worker.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LlmUsage {
    pub model: String,
    pub tokens: u64,
    pub cost: f64,
}

/// Metric owner for samples not attributed to any agent.
pub const SYSTEM_OWNER: &str = "system";

/// Authenticated principal making a request. Token issuance and
/// verification live at the edge; the core only consumes the result.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: uuid::Uuid,
    #[serde(default)]
    pub admin: bool,
}

impl Caller {
    pub fn user(user_id: uuid::Uuid) -> Self {
        Self {
            user_id,
            admin: false,
        }
    }

    pub fn admin(user_id: uuid::Uuid) -> Self {
        Self {
            user_id,
            admin: true,
        }
    }

    pub fn may_act_on(&self, owner: uuid::Uuid) -> bool {
        self.admin || self.user_id == owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_op_evaluates() {
        assert!(CompareOp::Gt.evaluate(85.0, 80.0));
        assert!(!CompareOp::Gt.evaluate(80.0, 80.0));
        assert!(CompareOp::Ge.evaluate(80.0, 80.0));
        assert!(CompareOp::Lt.evaluate(90.0, 95.0));
        assert!(CompareOp::Ne.evaluate(1.0, 0.0));
        assert!(CompareOp::Eq.evaluate(0.0, 0.0));
    }

    #[test]
    fn compare_op_serde_symbols() {
        let op: CompareOp = serde_json::from_str("\">=\"").unwrap();
        assert_eq!(op, CompareOp::Ge);
        assert_eq!(serde_json::to_string(&CompareOp::Gt).unwrap(), "\">\"");
    }
}
