//! Authoritative store for agents, versions, master data, and workflows
//!
//! One process-wide instance, passed explicitly to the orchestrator,
//! dispatcher, and workflow engine. Mutations take the owning DashMap
//! entry lock, so a configuration update and its version snapshot land
//! together or not at all.

use crate::model::*;
use agentmesh_core::{
    AgentKind, AgentStatus, Caller, Error, IoSchema, Result, WorkflowKind, WorkflowStatus,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

const PROMPT_WARN_CHARS: usize = 10_000;
const CAPABILITY_WARN_COUNT: usize = 20;

#[derive(Clone, Debug, Default)]
pub struct AgentDraft {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub kind: Option<AgentKind>,
    pub model: String,
    pub system_prompt: String,
    pub configuration: BTreeMap<String, Value>,
    pub capabilities: Vec<String>,
    pub skills: Vec<Uuid>,
    pub tools: Vec<Uuid>,
    pub constraints: Vec<Uuid>,
    pub input_schema: Option<IoSchema>,
    pub output_schema: Option<IoSchema>,
    pub tags: Vec<String>,
    pub template_id: Option<Uuid>,
    pub endpoint: Option<String>,
    pub probe_url: Option<String>,
    pub auth_token: Option<String>,
}

/// Partial update; `None` leaves the field untouched.
#[derive(Clone, Debug, Default)]
pub struct AgentUpdate {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub configuration: Option<BTreeMap<String, Value>>,
    pub capabilities: Option<Vec<String>>,
    pub skills: Option<Vec<Uuid>>,
    pub tools: Option<Vec<Uuid>>,
    pub constraints: Option<Vec<Uuid>>,
    pub input_schema: Option<Option<IoSchema>>,
    pub output_schema: Option<Option<IoSchema>>,
    pub tags: Option<Vec<String>>,
    pub max_concurrency: Option<usize>,
    pub invoke_timeout_sec: Option<Option<u64>>,
    pub changelog: Option<String>,
}

pub struct Registry {
    agents: dashmap::DashMap<Uuid, Agent>,
    versions: dashmap::DashMap<Uuid, Vec<AgentVersion>>,
    skills: dashmap::DashMap<Uuid, Skill>,
    tools: dashmap::DashMap<Uuid, ToolEntry>,
    constraints: dashmap::DashMap<Uuid, Constraint>,
    workflows: dashmap::DashMap<Uuid, Workflow>,
    /// (owner, slug) → agent id; enforces per-owner name uniqueness.
    names: dashmap::DashMap<(Uuid, String), Uuid>,
    supported_models: Vec<String>,
}

impl Registry {
    pub fn new(supported_models: Vec<String>) -> Self {
        Self {
            agents: dashmap::DashMap::new(),
            versions: dashmap::DashMap::new(),
            skills: dashmap::DashMap::new(),
            tools: dashmap::DashMap::new(),
            constraints: dashmap::DashMap::new(),
            workflows: dashmap::DashMap::new(),
            names: dashmap::DashMap::new(),
            supported_models,
        }
    }

    // ------------------------------------------------------------------
    // Agents

    pub fn create_agent(&self, owner: Uuid, draft: AgentDraft) -> Result<Agent> {
        let slug = slugify(&draft.name);
        if slug.is_empty() {
            return Err(Error::bad_input("agent name must not be empty"));
        }
        self.check_refs(&draft.skills, &draft.tools, &draft.constraints)?;

        let id = Uuid::new_v4();
        // Fail closed on collision: the name entry is the reservation.
        match self.names.entry((owner, slug.clone())) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(Error::conflict(format!("agent '{slug}' already exists")));
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(id);
            }
        }

        let now = Utc::now();
        let agent = Agent {
            id,
            name: slug,
            display_name: if draft.display_name.is_empty() {
                draft.name.clone()
            } else {
                draft.display_name
            },
            description: draft.description,
            kind: draft.kind.unwrap_or(AgentKind::Templated),
            status: AgentStatus::Inactive,
            owner,
            version: "1.0.0".to_string(),
            model: draft.model,
            system_prompt: draft.system_prompt,
            configuration: draft.configuration,
            capabilities: draft.capabilities,
            skills: draft.skills,
            tools: draft.tools,
            constraints: draft.constraints,
            input_schema: draft.input_schema,
            output_schema: draft.output_schema,
            tags: draft.tags,
            endpoint: draft.endpoint,
            probe_url: draft.probe_url,
            auth_token: draft.auth_token,
            template_id: draft.template_id,
            rendered_artifact: None,
            desired_replicas: 1,
            max_concurrency: 8,
            invoke_timeout_sec: None,
            usage_count: 0,
            error_count: 0,
            last_error: None,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        };

        self.versions.insert(
            id,
            vec![version_snapshot(&agent, "initial configuration")],
        );
        self.agents.insert(id, agent.clone());
        info!(agent = %id, name = %agent.name, "agent created");
        Ok(agent)
    }

    pub fn get_agent(&self, id: Uuid) -> Result<Agent> {
        self.agents
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or_else(|| Error::not_found(format!("agent {id}")))
    }

    pub fn list_agents(
        &self,
        owner: Option<Uuid>,
        status: Option<AgentStatus>,
        tag: Option<&str>,
    ) -> Vec<Agent> {
        let mut out: Vec<Agent> = self
            .agents
            .iter()
            .map(|entry| entry.clone())
            .filter(|agent| owner.is_none_or(|o| agent.owner == o))
            .filter(|agent| status.is_none_or(|s| agent.status == s))
            .filter(|agent| tag.is_none_or(|t| agent.tags.iter().any(|have| have == t)))
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// Apply an update, snapshotting a new version first. Returns the
    /// updated agent plus any validation warnings. Semantically invalid
    /// updates are rejected before a version is created.
    pub fn update_agent(
        &self,
        id: Uuid,
        update: AgentUpdate,
        caller: &Caller,
    ) -> Result<(Agent, Vec<String>)> {
        if let Some(skills) = &update.skills {
            self.check_refs(skills, &[], &[])?;
        }
        if let Some(tools) = &update.tools {
            self.check_refs(&[], tools, &[])?;
        }
        if let Some(constraints) = &update.constraints {
            self.check_refs(&[], &[], constraints)?;
        }

        let mut entry = self
            .agents
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("agent {id}")))?;
        if !caller.may_act_on(entry.owner) {
            return Err(Error::forbidden("only the owner may modify an agent"));
        }

        // Rename: reserve the new slug before touching anything else.
        if let Some(name) = &update.name {
            let slug = slugify(name);
            if slug.is_empty() {
                return Err(Error::bad_input("agent name must not be empty"));
            }
            if slug != entry.name {
                match self.names.entry((entry.owner, slug.clone())) {
                    dashmap::mapref::entry::Entry::Occupied(_) => {
                        return Err(Error::conflict(format!("agent '{slug}' already exists")));
                    }
                    dashmap::mapref::entry::Entry::Vacant(vacant) => {
                        vacant.insert(id);
                    }
                }
                self.names.remove(&(entry.owner, entry.name.clone()));
                entry.name = slug;
            }
        }

        let warnings = self.validate_agent_fields(
            update.system_prompt.as_deref().unwrap_or(&entry.system_prompt),
            update.capabilities.as_deref().unwrap_or(&entry.capabilities),
            update.model.as_deref().unwrap_or(&entry.model),
        );

        // Version snapshot goes in before the agent row changes.
        let next = self.next_version(id);
        let changelog = update
            .changelog
            .unwrap_or_else(|| "configuration update".to_string());

        if let Some(v) = update.display_name {
            entry.display_name = v;
        }
        if let Some(v) = update.description {
            entry.description = v;
        }
        if let Some(v) = update.model {
            entry.model = v;
        }
        if let Some(v) = update.system_prompt {
            entry.system_prompt = v;
        }
        if let Some(v) = update.configuration {
            entry.configuration = v;
        }
        if let Some(v) = update.capabilities {
            entry.capabilities = v;
        }
        if let Some(v) = update.skills {
            entry.skills = v;
        }
        if let Some(v) = update.tools {
            entry.tools = v;
        }
        if let Some(v) = update.constraints {
            entry.constraints = v;
        }
        if let Some(v) = update.input_schema {
            entry.input_schema = v;
        }
        if let Some(v) = update.output_schema {
            entry.output_schema = v;
        }
        if let Some(v) = update.tags {
            entry.tags = v;
        }
        if let Some(v) = update.max_concurrency {
            entry.max_concurrency = v.max(1);
        }
        if let Some(v) = update.invoke_timeout_sec {
            entry.invoke_timeout_sec = v;
        }
        entry.version = next.clone();
        entry.updated_at = Utc::now();

        let mut snapshot = version_snapshot(&*entry, &changelog);
        snapshot.version = next;
        self.versions.entry(id).or_default().push(snapshot);

        debug!(agent = %id, version = %entry.version, "agent updated");
        Ok((entry.clone(), warnings))
    }

    pub fn delete_agent(&self, id: Uuid, caller: &Caller) -> Result<()> {
        let agent = self.get_agent(id)?;
        if !caller.may_act_on(agent.owner) {
            return Err(Error::forbidden("only the owner may delete an agent"));
        }
        self.agents.remove(&id);
        self.versions.remove(&id);
        self.names.remove(&(agent.owner, agent.name));
        info!(agent = %id, "agent deleted");
        Ok(())
    }

    /// Copy (configuration, prompt, tools) from a prior version back onto
    /// the agent and stamp a fresh version describing the rollback. The
    /// referenced version is left untouched.
    pub fn revert_agent(&self, id: Uuid, version: &str, caller: &Caller) -> Result<Agent> {
        let prior = self
            .versions
            .get(&id)
            .and_then(|versions| versions.iter().find(|v| v.version == version).cloned())
            .ok_or_else(|| Error::not_found(format!("version {version} of agent {id}")))?;

        let mut entry = self
            .agents
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("agent {id}")))?;
        if !caller.may_act_on(entry.owner) {
            return Err(Error::forbidden("only the owner may revert an agent"));
        }

        let next = self.next_version(id);
        entry.configuration = prior.configuration;
        entry.system_prompt = prior.system_prompt;
        entry.tools = prior.tools;
        entry.version = next.clone();
        entry.updated_at = Utc::now();

        let mut snapshot = version_snapshot(&*entry, &format!("rollback to {version}"));
        snapshot.version = next;
        self.versions.entry(id).or_default().push(snapshot);

        info!(agent = %id, from = %version, to = %entry.version, "agent reverted");
        Ok(entry.clone())
    }

    pub fn versions(&self, agent_id: Uuid) -> Vec<AgentVersion> {
        self.versions
            .get(&agent_id)
            .map(|versions| versions.clone())
            .unwrap_or_default()
    }

    fn next_version(&self, agent_id: Uuid) -> String {
        let latest = self
            .versions
            .get(&agent_id)
            .and_then(|versions| versions.last().map(|v| v.version.clone()))
            .unwrap_or_else(|| "1.0.0".to_string());
        bump_patch(&latest)
    }

    fn validate_agent_fields(
        &self,
        system_prompt: &str,
        capabilities: &[String],
        model: &str,
    ) -> Vec<String> {
        let mut warnings = Vec::new();
        if system_prompt.chars().count() > PROMPT_WARN_CHARS {
            warnings.push(format!(
                "system prompt exceeds {PROMPT_WARN_CHARS} characters"
            ));
        }
        if capabilities.len() > CAPABILITY_WARN_COUNT {
            warnings.push(format!(
                "more than {CAPABILITY_WARN_COUNT} declared capabilities"
            ));
        }
        if !model.is_empty() && !self.supported_models.iter().any(|m| m == model) {
            warnings.push(format!("model '{model}' is not in the supported set"));
        }
        warnings
    }

    // ------------------------------------------------------------------
    // Status and counters (orchestrator / dispatcher write paths)

    pub fn set_status(&self, id: Uuid, status: AgentStatus) -> Result<()> {
        let mut entry = self
            .agents
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("agent {id}")))?;
        entry.status = status;
        entry.updated_at = Utc::now();
        Ok(())
    }

    pub fn set_deployed(
        &self,
        id: Uuid,
        endpoint: String,
        probe_url: String,
        rendered_artifact: Option<String>,
    ) -> Result<()> {
        let mut entry = self
            .agents
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("agent {id}")))?;
        entry.status = AgentStatus::Active;
        entry.endpoint = Some(endpoint);
        entry.probe_url = Some(probe_url);
        if rendered_artifact.is_some() {
            entry.rendered_artifact = rendered_artifact;
        }
        entry.updated_at = Utc::now();
        Ok(())
    }

    pub fn set_stopped(&self, id: Uuid) -> Result<()> {
        let mut entry = self
            .agents
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("agent {id}")))?;
        entry.status = AgentStatus::Stopped;
        entry.endpoint = None;
        entry.probe_url = None;
        entry.updated_at = Utc::now();
        Ok(())
    }

    pub fn set_error(&self, id: Uuid, message: impl Into<String>) -> Result<()> {
        let mut entry = self
            .agents
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("agent {id}")))?;
        entry.status = AgentStatus::Error;
        entry.last_error = Some(message.into());
        entry.error_count += 1;
        entry.updated_at = Utc::now();
        Ok(())
    }

    pub fn set_desired_replicas(&self, id: Uuid, replicas: u32) -> Result<()> {
        let mut entry = self
            .agents
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("agent {id}")))?;
        entry.desired_replicas = replicas.max(1);
        Ok(())
    }

    pub fn record_invocation(&self, id: Uuid, ok: bool, error: Option<String>) {
        if let Some(mut entry) = self.agents.get_mut(&id) {
            entry.usage_count += 1;
            entry.last_used_at = Some(Utc::now());
            if !ok {
                entry.error_count += 1;
                if error.is_some() {
                    entry.last_error = error;
                }
            }
        }
    }

    pub fn record_probe_error(&self, id: Uuid, error: impl Into<String>) {
        if let Some(mut entry) = self.agents.get_mut(&id) {
            entry.last_error = Some(error.into());
        }
    }

    // ------------------------------------------------------------------
    // Master data

    pub fn upsert_skill(&self, skill: Skill) -> Skill {
        self.skills.insert(skill.id, skill.clone());
        skill
    }

    pub fn get_skill(&self, id: Uuid) -> Result<Skill> {
        self.skills
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or_else(|| Error::not_found(format!("skill {id}")))
    }

    pub fn list_skills(&self) -> Vec<Skill> {
        self.skills.iter().map(|entry| entry.clone()).collect()
    }

    pub fn delete_skill(&self, id: Uuid) -> Result<()> {
        if self.agents.iter().any(|agent| agent.skills.contains(&id)) {
            return Err(Error::in_use(format!("skill {id} is referenced by agents")));
        }
        self.skills
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("skill {id}")))
    }

    pub fn upsert_tool(&self, tool: ToolEntry) -> ToolEntry {
        self.tools.insert(tool.id, tool.clone());
        tool
    }

    pub fn get_tool(&self, id: Uuid) -> Result<ToolEntry> {
        self.tools
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or_else(|| Error::not_found(format!("tool {id}")))
    }

    pub fn list_tools(&self) -> Vec<ToolEntry> {
        self.tools.iter().map(|entry| entry.clone()).collect()
    }

    pub fn delete_tool(&self, id: Uuid) -> Result<()> {
        if self.agents.iter().any(|agent| agent.tools.contains(&id)) {
            return Err(Error::in_use(format!("tool {id} is referenced by agents")));
        }
        self.tools
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("tool {id}")))
    }

    /// Fold one invocation outcome into a tool's running stats.
    pub fn record_tool_invocation(&self, id: Uuid, ok: bool, elapsed_ms: i64) {
        if let Some(mut entry) = self.tools.get_mut(&id) {
            let stats = &mut entry.stats;
            let prior_total = stats.total as f64;
            stats.total += 1;
            if ok {
                stats.success += 1;
            } else {
                stats.failed += 1;
            }
            stats.avg_ms = (stats.avg_ms * prior_total + elapsed_ms as f64) / stats.total as f64;
        }
    }

    pub fn upsert_constraint(&self, constraint: Constraint) -> Constraint {
        self.constraints.insert(constraint.id, constraint.clone());
        constraint
    }

    pub fn get_constraint(&self, id: Uuid) -> Result<Constraint> {
        self.constraints
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or_else(|| Error::not_found(format!("constraint {id}")))
    }

    pub fn list_constraints(&self) -> Vec<Constraint> {
        self.constraints.iter().map(|entry| entry.clone()).collect()
    }

    pub fn delete_constraint(&self, id: Uuid) -> Result<()> {
        if self
            .agents
            .iter()
            .any(|agent| agent.constraints.contains(&id))
        {
            return Err(Error::in_use(format!(
                "constraint {id} is referenced by agents"
            )));
        }
        self.constraints
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("constraint {id}")))
    }

    fn check_refs(&self, skills: &[Uuid], tools: &[Uuid], constraints: &[Uuid]) -> Result<()> {
        for id in skills {
            if !self.skills.contains_key(id) {
                return Err(Error::not_found(format!("skill {id}")));
            }
        }
        for id in tools {
            if !self.tools.contains_key(id) {
                return Err(Error::not_found(format!("tool {id}")));
            }
        }
        for id in constraints {
            if !self.constraints.contains_key(id) {
                return Err(Error::not_found(format!("constraint {id}")));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Workflows

    /// Create a workflow in `active` state. Every referenced agent must
    /// exist at activation time.
    pub fn create_workflow(
        &self,
        owner: Uuid,
        name: impl Into<String>,
        kind: WorkflowKind,
        steps: Vec<WorkflowStep>,
    ) -> Result<Workflow> {
        if steps.is_empty() {
            return Err(Error::bad_input("workflow must declare at least one step"));
        }
        for step in &steps {
            if !self.agents.contains_key(&step.agent_id) {
                return Err(Error::not_found(format!(
                    "workflow references missing agent {}",
                    step.agent_id
                )));
            }
        }
        let now = Utc::now();
        let workflow = Workflow {
            id: Uuid::new_v4(),
            name: name.into(),
            owner,
            kind,
            steps,
            status: WorkflowStatus::Active,
            created_at: now,
            updated_at: now,
        };
        self.workflows.insert(workflow.id, workflow.clone());
        info!(workflow = %workflow.id, "workflow created");
        Ok(workflow)
    }

    pub fn get_workflow(&self, id: Uuid) -> Result<Workflow> {
        self.workflows
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or_else(|| Error::not_found(format!("workflow {id}")))
    }

    pub fn list_workflows(&self, owner: Option<Uuid>) -> Vec<Workflow> {
        self.workflows
            .iter()
            .map(|entry| entry.clone())
            .filter(|wf| owner.is_none_or(|o| wf.owner == o))
            .collect()
    }

    pub fn set_workflow_status(&self, id: Uuid, status: WorkflowStatus) -> Result<()> {
        let mut entry = self
            .workflows
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("workflow {id}")))?;
        entry.status = status;
        entry.updated_at = Utc::now();
        Ok(())
    }

    pub fn delete_workflow(&self, id: Uuid, caller: &Caller) -> Result<()> {
        let workflow = self.get_workflow(id)?;
        if !caller.may_act_on(workflow.owner) {
            return Err(Error::forbidden("only the owner may delete a workflow"));
        }
        self.workflows.remove(&id);
        Ok(())
    }
}

fn version_snapshot(agent: &Agent, changelog: &str) -> AgentVersion {
    AgentVersion {
        id: Uuid::new_v4(),
        agent_id: agent.id,
        version: agent.version.clone(),
        configuration: agent.configuration.clone(),
        system_prompt: agent.system_prompt.clone(),
        tools: agent.tools.clone(),
        changelog: changelog.to_string(),
        created_at: Utc::now(),
    }
}

/// `major.minor.(patch+1)` of the given version; unparseable input
/// restarts the chain at 1.0.0.
fn bump_patch(version: &str) -> String {
    let mut parts = version.split('.');
    let major: u64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(1);
    let minor: u64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let patch: u64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    format!("{major}.{minor}.{}", patch + 1)
}

/// Lowercase, alphanumerics and dashes only.
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut prev_dash = true;
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            prev_dash = false;
        } else if !prev_dash {
            slug.push('-');
            prev_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
