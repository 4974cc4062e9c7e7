//! Registry entities
//!
//! Relations are id-based: agents hold skill/tool/constraint ids, never
//! owning pointers, so reference counting on master-data deletion is a
//! scan instead of a graph walk.

use agentmesh_core::{
    AgentKind, AgentStatus, ConstraintKind, IoSchema, TemplateKind, ToolKind, WorkflowKind,
    WorkflowStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    /// Slug, unique per owner.
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub kind: AgentKind,
    pub status: AgentStatus,
    pub owner: Uuid,
    /// Semver of the current configuration.
    pub version: String,
    pub model: String,
    pub system_prompt: String,
    #[serde(default)]
    pub configuration: BTreeMap<String, Value>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub skills: Vec<Uuid>,
    #[serde(default)]
    pub tools: Vec<Uuid>,
    #[serde(default)]
    pub constraints: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<IoSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<IoSchema>,
    #[serde(default)]
    pub tags: Vec<String>,

    /// Set while active; cleared on stop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Templated agents only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered_artifact: Option<String>,

    #[serde(default = "default_replicas")]
    pub desired_replicas: u32,
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoke_timeout_sec: Option<u64>,

    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_replicas() -> u32 {
    1
}

fn default_concurrency() -> usize {
    8
}

/// Immutable snapshot taken on every configuration change.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentVersion {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub version: String,
    pub configuration: BTreeMap<String, Value>,
    pub system_prompt: String,
    pub tools: Vec<Uuid>,
    pub changelog: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Skill {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub input_types: Vec<String>,
    #[serde(default)]
    pub output_types: Vec<String>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub usage_count: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ToolStats {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub avg_ms: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolEntry {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: ToolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Auth scheme: "none", "api_key", "bearer", "basic", or "oauth2".
    #[serde(default)]
    pub auth_kind: String,
    #[serde(default)]
    pub schema: Value,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub input_types: Vec<String>,
    #[serde(default)]
    pub output_types: Vec<String>,
    #[serde(default)]
    pub stats: ToolStats,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Constraint {
    pub id: Uuid,
    pub name: String,
    pub kind: ConstraintKind,
    pub rule: Value,
}

/// Parameter schema for template instantiation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ParamSchema {
    pub params: BTreeMap<String, ParamSpec>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParamSpec {
    /// "string", "number", "boolean", "object", or "array".
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default = "default_param_required")]
    pub required: bool,
}

fn default_param_required() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub kind: TemplateKind,
    #[serde(default)]
    pub category: String,
    /// Structured body carrying `{{placeholder}}` markers.
    pub definition: Value,
    #[serde(default)]
    pub parameter_schema: ParamSchema,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_version: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum ConditionOp {
    #[serde(rename = "equals")]
    Equals,
    #[serde(rename = "not_equals")]
    NotEquals,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "greater_than")]
    GreaterThan,
    #[serde(rename = "less_than")]
    LessThan,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepCondition {
    pub field: String,
    pub operator: ConditionOp,
    pub value: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub agent_id: Uuid,
    /// destination key → dotted path into the current bag.
    #[serde(default)]
    pub input_mapping: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<StepCondition>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub owner: Uuid,
    pub kind: WorkflowKind,
    pub steps: Vec<WorkflowStep>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sealed secret; the plaintext exists only transiently in memory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvironmentSecret {
    pub id: Uuid,
    pub owner: Uuid,
    pub name: String,
    /// base64(nonce || ciphertext); never the plaintext.
    pub sealed_value: String,
    pub created_at: DateTime<Utc>,
}
