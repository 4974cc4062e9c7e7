//! Registry semantics: versioning, uniqueness, reverts, reference guards

use agentmesh_core::{AgentStatus, Caller, ConstraintKind, ErrorKind, ToolKind};
use agentmesh_registry::{
    AgentDraft, AgentUpdate, Constraint, Registry, Skill, ToolEntry,
};
use serde_json::json;
use uuid::Uuid;

fn registry() -> Registry {
    Registry::new(vec!["gpt-4".to_string(), "claude-3-opus".to_string()])
}

fn draft(name: &str) -> AgentDraft {
    AgentDraft {
        name: name.to_string(),
        model: "gpt-4".to_string(),
        system_prompt: "You are helpful.".to_string(),
        ..Default::default()
    }
}

fn skill(name: &str, category: &str) -> Skill {
    Skill {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: String::new(),
        category: category.to_string(),
        input_types: vec!["text".to_string()],
        output_types: vec!["text".to_string()],
        prerequisites: vec![],
        usage_count: 0,
    }
}

#[test]
fn slug_unique_per_owner() {
    let reg = registry();
    let owner = Uuid::new_v4();
    let other = Uuid::new_v4();

    reg.create_agent(owner, draft("Support Bot")).unwrap();
    let err = reg.create_agent(owner, draft("support bot")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // Same slug under a different owner is fine.
    assert!(reg.create_agent(other, draft("Support Bot")).is_ok());
}

#[test]
fn update_appends_version_and_bumps_semver() {
    let reg = registry();
    let owner = Uuid::new_v4();
    let caller = Caller::user(owner);
    let agent = reg.create_agent(owner, draft("bot")).unwrap();
    assert_eq!(agent.version, "1.0.0");

    let (updated, warnings) = reg
        .update_agent(
            agent.id,
            AgentUpdate {
                system_prompt: Some("New prompt".to_string()),
                ..Default::default()
            },
            &caller,
        )
        .unwrap();
    assert_eq!(updated.version, "1.0.1");
    assert!(warnings.is_empty());

    let versions = reg.versions(agent.id);
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].version, "1.0.0");
    assert_eq!(versions[1].version, "1.0.1");
    assert_eq!(versions[1].system_prompt, "New prompt");
    // The old snapshot is untouched.
    assert_eq!(versions[0].system_prompt, "You are helpful.");
}

#[test]
fn update_warns_on_prompt_capabilities_and_model() {
    let reg = registry();
    let owner = Uuid::new_v4();
    let caller = Caller::user(owner);
    let agent = reg.create_agent(owner, draft("bot")).unwrap();

    let (_, warnings) = reg
        .update_agent(
            agent.id,
            AgentUpdate {
                system_prompt: Some("x".repeat(10_001)),
                capabilities: Some((0..21).map(|i| format!("cap-{i}")).collect()),
                model: Some("not-a-model".to_string()),
                ..Default::default()
            },
            &caller,
        )
        .unwrap();
    assert_eq!(warnings.len(), 3);
}

#[test]
fn only_owner_may_update() {
    let reg = registry();
    let owner = Uuid::new_v4();
    let agent = reg.create_agent(owner, draft("bot")).unwrap();

    let stranger = Caller::user(Uuid::new_v4());
    let err = reg
        .update_agent(agent.id, AgentUpdate::default(), &stranger)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let admin = Caller::admin(Uuid::new_v4());
    assert!(reg
        .update_agent(agent.id, AgentUpdate::default(), &admin)
        .is_ok());
}

#[test]
fn revert_restores_config_and_stamps_new_version() {
    let reg = registry();
    let owner = Uuid::new_v4();
    let caller = Caller::user(owner);
    let mut first = draft("bot");
    first
        .configuration
        .insert("temperature".to_string(), json!(0.2));
    let agent = reg.create_agent(owner, first).unwrap();

    let mut config = agent.configuration.clone();
    config.insert("temperature".to_string(), json!(0.9));
    reg.update_agent(
        agent.id,
        AgentUpdate {
            configuration: Some(config),
            system_prompt: Some("Changed".to_string()),
            ..Default::default()
        },
        &caller,
    )
    .unwrap();

    let reverted = reg.revert_agent(agent.id, "1.0.0", &caller).unwrap();
    assert_eq!(reverted.configuration["temperature"], json!(0.2));
    assert_eq!(reverted.system_prompt, "You are helpful.");
    assert_eq!(reverted.version, "1.0.2");

    let versions = reg.versions(agent.id);
    assert_eq!(versions.len(), 3);
    assert!(versions[2].changelog.contains("rollback to 1.0.0"));
    // The reverted-to version still exists unchanged.
    assert!(versions.iter().any(|v| v.version == "1.0.0"));
}

#[test]
fn master_data_delete_blocked_while_referenced() {
    let reg = registry();
    let owner = Uuid::new_v4();
    let caller = Caller::user(owner);

    let s = reg.upsert_skill(skill("writing", "general"));
    let t = reg.upsert_tool(ToolEntry {
        id: Uuid::new_v4(),
        name: "search".to_string(),
        description: String::new(),
        kind: ToolKind::Rest,
        endpoint: Some("https://search.example".to_string()),
        auth_kind: "none".to_string(),
        schema: json!({}),
        capabilities: vec![],
        input_types: vec![],
        output_types: vec![],
        stats: Default::default(),
        active: true,
    });
    let c = reg.upsert_constraint(Constraint {
        id: Uuid::new_v4(),
        name: "no-pii".to_string(),
        kind: ConstraintKind::Security,
        rule: json!({"deny": "pii"}),
    });

    let mut d = draft("bot");
    d.skills = vec![s.id];
    d.tools = vec![t.id];
    d.constraints = vec![c.id];
    let agent = reg.create_agent(owner, d).unwrap();

    assert_eq!(reg.delete_skill(s.id).unwrap_err().kind(), ErrorKind::InUse);
    assert_eq!(reg.delete_tool(t.id).unwrap_err().kind(), ErrorKind::InUse);
    assert_eq!(
        reg.delete_constraint(c.id).unwrap_err().kind(),
        ErrorKind::InUse
    );

    reg.delete_agent(agent.id, &caller).unwrap();
    assert!(reg.delete_skill(s.id).is_ok());
    assert!(reg.delete_tool(t.id).is_ok());
    assert!(reg.delete_constraint(c.id).is_ok());
}

#[test]
fn create_rejects_missing_refs() {
    let reg = registry();
    let mut d = draft("bot");
    d.skills = vec![Uuid::new_v4()];
    let err = reg.create_agent(Uuid::new_v4(), d).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn delete_releases_slug() {
    let reg = registry();
    let owner = Uuid::new_v4();
    let caller = Caller::user(owner);
    let agent = reg.create_agent(owner, draft("bot")).unwrap();
    reg.delete_agent(agent.id, &caller).unwrap();
    assert!(reg.create_agent(owner, draft("bot")).is_ok());
}

#[test]
fn workflow_requires_existing_agents() {
    let reg = registry();
    let owner = Uuid::new_v4();
    let err = reg
        .create_workflow(
            owner,
            "wf",
            agentmesh_core::WorkflowKind::Sequential,
            vec![agentmesh_registry::WorkflowStep {
                agent_id: Uuid::new_v4(),
                input_mapping: Default::default(),
                condition: None,
            }],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn invocation_counters_accumulate() {
    let reg = registry();
    let owner = Uuid::new_v4();
    let agent = reg.create_agent(owner, draft("bot")).unwrap();

    reg.record_invocation(agent.id, true, None);
    reg.record_invocation(agent.id, false, Some("boom".to_string()));

    let agent = reg.get_agent(agent.id).unwrap();
    assert_eq!(agent.usage_count, 2);
    assert_eq!(agent.error_count, 1);
    assert_eq!(agent.last_error.as_deref(), Some("boom"));
    assert!(agent.last_used_at.is_some());
}

#[test]
fn tool_stats_running_average() {
    let reg = registry();
    let tool = reg.upsert_tool(ToolEntry {
        id: Uuid::new_v4(),
        name: "t".to_string(),
        description: String::new(),
        kind: ToolKind::Function,
        endpoint: None,
        auth_kind: "none".to_string(),
        schema: json!({}),
        capabilities: vec![],
        input_types: vec![],
        output_types: vec![],
        stats: Default::default(),
        active: true,
    });

    reg.record_tool_invocation(tool.id, true, 100);
    reg.record_tool_invocation(tool.id, false, 300);

    let tool = reg.get_tool(tool.id).unwrap();
    assert_eq!(tool.stats.total, 2);
    assert_eq!(tool.stats.success, 1);
    assert_eq!(tool.stats.failed, 1);
    assert_eq!(tool.stats.avg_ms, 200.0);
}

#[test]
fn active_status_requires_endpoint_invariant() {
    let reg = registry();
    let owner = Uuid::new_v4();
    let agent = reg.create_agent(owner, draft("bot")).unwrap();

    reg.set_deployed(
        agent.id,
        "http://127.0.0.1:9000".to_string(),
        "http://127.0.0.1:9000/health".to_string(),
        None,
    )
    .unwrap();
    let agent = reg.get_agent(agent.id).unwrap();
    assert_eq!(agent.status, AgentStatus::Active);
    assert!(agent.endpoint.is_some() && agent.probe_url.is_some());

    reg.set_stopped(agent.id).unwrap();
    let agent = reg.get_agent(agent.id).unwrap();
    assert_eq!(agent.status, AgentStatus::Stopped);
    assert!(agent.endpoint.is_none());
}
