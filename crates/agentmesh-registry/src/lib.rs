//! Agentmesh Registry - agents, versions, master data, templates, secrets, capabilities

pub mod capability;
pub mod integration;
pub mod model;
pub mod registry;
pub mod secrets;
pub mod template;

pub use capability::{Capability, CapabilityEngine, SkillCombination, SkillGap, ToolRecommendation};
pub use integration::{BatchOutcome, BatchReport, IntegrationFacade, Snapshot, SnapshotFormat};
pub use model::*;
pub use registry::{AgentDraft, AgentUpdate, Registry};
pub use secrets::SecretVault;
pub use template::{render_template, TemplateStore};
