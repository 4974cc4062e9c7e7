//! Integration facade
//!
//! Batch create, export, and import over the registry and template
//! store. Every element is attempted in isolation: one bad record never
//! aborts the batch, and the report carries a per-element outcome next
//! to the aggregate counts.

use crate::model::{Constraint, Skill, Template, ToolEntry, Workflow};
use crate::registry::{AgentDraft, Registry};
use crate::template::TemplateStore;
use agentmesh_core::{Error, Result, TemplateKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const SNAPSHOT_VERSION: &str = "1.0";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotFormat {
    Json,
    Yaml,
}

/// Self-contained export of the mesh's declarative state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub agents: Vec<crate::model::Agent>,
    #[serde(default)]
    pub workflows: Vec<Workflow>,
    #[serde(default)]
    pub skills: Vec<Skill>,
    #[serde(default)]
    pub tools: Vec<ToolEntry>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub templates: Vec<Template>,
}

#[derive(Clone, Debug, Serialize)]
pub struct BatchOutcome {
    pub name: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub outcomes: Vec<BatchOutcome>,
}

impl BatchReport {
    fn from_outcomes(outcomes: Vec<BatchOutcome>) -> Self {
        let successful = outcomes.iter().filter(|o| o.ok).count();
        Self {
            total: outcomes.len(),
            successful,
            failed: outcomes.len() - successful,
            outcomes,
        }
    }

    fn merge(reports: Vec<BatchReport>) -> Self {
        let outcomes: Vec<BatchOutcome> =
            reports.into_iter().flat_map(|r| r.outcomes).collect();
        Self::from_outcomes(outcomes)
    }
}

pub struct IntegrationFacade {
    registry: Arc<Registry>,
    templates: Arc<TemplateStore>,
}

impl IntegrationFacade {
    pub fn new(registry: Arc<Registry>, templates: Arc<TemplateStore>) -> Self {
        Self {
            registry,
            templates,
        }
    }

    /// Create many agents, isolating failures per element.
    pub fn batch_create_agents(&self, owner: Uuid, drafts: Vec<AgentDraft>) -> BatchReport {
        let outcomes = drafts
            .into_iter()
            .map(|draft| {
                let name = draft.name.clone();
                match self.registry.create_agent(owner, draft) {
                    Ok(agent) => BatchOutcome {
                        name,
                        ok: true,
                        id: Some(agent.id),
                        error: None,
                    },
                    Err(e) => BatchOutcome {
                        name,
                        ok: false,
                        id: None,
                        error: Some(e.to_string()),
                    },
                }
            })
            .collect();
        BatchReport::from_outcomes(outcomes)
    }

    /// Everything declarative, tagged with a snapshot version.
    pub fn export(&self) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION.to_string(),
            exported_at: Utc::now(),
            agents: self.registry.list_agents(None, None, None),
            workflows: self.registry.list_workflows(None),
            skills: self.registry.list_skills(),
            tools: self.registry.list_tools(),
            constraints: self.registry.list_constraints(),
            templates: self.templates.list(None),
        }
    }

    pub fn export_to_string(&self, format: SnapshotFormat) -> Result<String> {
        let snapshot = self.export();
        match format {
            SnapshotFormat::Json => Ok(serde_json::to_string_pretty(&snapshot)?),
            SnapshotFormat::Yaml => serde_yaml::to_string(&snapshot)
                .map_err(|e| Error::internal(format!("yaml encode: {e}"))),
        }
    }

    pub fn parse_snapshot(text: &str, format: SnapshotFormat) -> Result<Snapshot> {
        match format {
            SnapshotFormat::Json => {
                serde_json::from_str(text).map_err(|e| Error::bad_input(format!("json: {e}")))
            }
            SnapshotFormat::Yaml => {
                serde_yaml::from_str(text).map_err(|e| Error::bad_input(format!("yaml: {e}")))
            }
        }
    }

    /// Apply a snapshot element by element through the ordinary create
    /// paths. Master data lands before the agents that reference it.
    pub fn import(&self, owner: Uuid, snapshot: Snapshot) -> BatchReport {
        let mut reports = Vec::new();

        reports.push(BatchReport::from_outcomes(
            snapshot
                .skills
                .into_iter()
                .map(|skill| {
                    let name = skill.name.clone();
                    let id = skill.id;
                    self.registry.upsert_skill(skill);
                    ok_outcome(name, id)
                })
                .collect(),
        ));

        reports.push(BatchReport::from_outcomes(
            snapshot
                .tools
                .into_iter()
                .map(|tool| {
                    let name = tool.name.clone();
                    let id = tool.id;
                    self.registry.upsert_tool(tool);
                    ok_outcome(name, id)
                })
                .collect(),
        ));

        reports.push(BatchReport::from_outcomes(
            snapshot
                .constraints
                .into_iter()
                .map(|constraint| {
                    let name = constraint.name.clone();
                    let id = constraint.id;
                    self.registry.upsert_constraint(constraint);
                    ok_outcome(name, id)
                })
                .collect(),
        ));

        reports.push(BatchReport::from_outcomes(
            snapshot
                .templates
                .into_iter()
                .map(|template| {
                    let created = self.templates.create(
                        template.name.clone(),
                        template.kind,
                        template.category.clone(),
                        template.definition.clone(),
                        template.parameter_schema.clone(),
                    );
                    ok_outcome(template.name, created.id)
                })
                .collect(),
        ));

        // Agents go through create_agent so slug uniqueness and
        // reference checks hold for imported data too.
        let mut agent_ids: BTreeMap<Uuid, Uuid> = BTreeMap::new();
        let agent_outcomes: Vec<BatchOutcome> = snapshot
            .agents
            .into_iter()
            .map(|agent| {
                let name = agent.name.clone();
                let old_id = agent.id;
                let draft = AgentDraft {
                    name: agent.name,
                    display_name: agent.display_name,
                    description: agent.description,
                    kind: Some(agent.kind),
                    model: agent.model,
                    system_prompt: agent.system_prompt,
                    configuration: agent.configuration,
                    capabilities: agent.capabilities,
                    skills: agent.skills,
                    tools: agent.tools,
                    constraints: agent.constraints,
                    input_schema: agent.input_schema,
                    output_schema: agent.output_schema,
                    tags: agent.tags,
                    template_id: agent.template_id,
                    endpoint: None,
                    probe_url: None,
                    auth_token: None,
                };
                match self.registry.create_agent(owner, draft) {
                    Ok(created) => {
                        agent_ids.insert(old_id, created.id);
                        BatchOutcome {
                            name,
                            ok: true,
                            id: Some(created.id),
                            error: None,
                        }
                    }
                    Err(e) => BatchOutcome {
                        name,
                        ok: false,
                        id: None,
                        error: Some(e.to_string()),
                    },
                }
            })
            .collect();
        reports.push(BatchReport::from_outcomes(agent_outcomes));

        let workflow_outcomes: Vec<BatchOutcome> = snapshot
            .workflows
            .into_iter()
            .map(|workflow| {
                let name = workflow.name.clone();
                let mut steps = workflow.steps;
                for step in &mut steps {
                    if let Some(new_id) = agent_ids.get(&step.agent_id) {
                        step.agent_id = *new_id;
                    }
                }
                match self
                    .registry
                    .create_workflow(owner, name.clone(), workflow.kind, steps)
                {
                    Ok(created) => BatchOutcome {
                        name,
                        ok: true,
                        id: Some(created.id),
                        error: None,
                    },
                    Err(e) => BatchOutcome {
                        name,
                        ok: false,
                        id: None,
                        error: Some(e.to_string()),
                    },
                }
            })
            .collect();
        reports.push(BatchReport::from_outcomes(workflow_outcomes));

        let report = BatchReport::merge(reports);
        info!(
            total = report.total,
            successful = report.successful,
            failed = report.failed,
            "snapshot imported"
        );
        report
    }

    /// Render an agent template and create the agent it describes. The
    /// rendered body supplies prompt/model/configuration; the caller
    /// supplies identity.
    pub fn instantiate_agent(
        &self,
        template_id: Uuid,
        params: &BTreeMap<String, Value>,
        owner: Uuid,
        name: impl Into<String>,
    ) -> Result<crate::model::Agent> {
        let template = self.templates.get(template_id)?;
        if template.kind != TemplateKind::Agent {
            return Err(Error::bad_input("template does not describe an agent"));
        }
        let rendered = self.templates.instantiate(template_id, params)?;

        let system_prompt = rendered["system_prompt"]
            .as_str()
            .or_else(|| rendered["prompt"].as_str())
            .unwrap_or_default()
            .to_string();
        let model = rendered["model"].as_str().unwrap_or_default().to_string();
        let configuration: BTreeMap<String, Value> = rendered["configuration"]
            .as_object()
            .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        self.registry.create_agent(
            owner,
            AgentDraft {
                name: name.into(),
                system_prompt,
                model,
                configuration,
                template_id: Some(template_id),
                ..Default::default()
            },
        )
    }
}

fn ok_outcome(name: String, id: Uuid) -> BatchOutcome {
    BatchOutcome {
        name,
        ok: true,
        id: Some(id),
        error: None,
    }
}
