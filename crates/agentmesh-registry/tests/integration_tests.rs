//! Batch operations and snapshot round-trips

use agentmesh_core::{TemplateKind, WorkflowKind};
use agentmesh_registry::{
    AgentDraft, IntegrationFacade, ParamSchema, ParamSpec, Registry, Skill, SnapshotFormat,
    TemplateStore, WorkflowStep,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

fn facade() -> (Arc<Registry>, Arc<TemplateStore>, IntegrationFacade) {
    let registry = Arc::new(Registry::new(vec!["gpt-4".to_string()]));
    let templates = Arc::new(TemplateStore::new());
    let facade = IntegrationFacade::new(registry.clone(), templates.clone());
    (registry, templates, facade)
}

fn draft(name: &str) -> AgentDraft {
    AgentDraft {
        name: name.to_string(),
        model: "gpt-4".to_string(),
        system_prompt: "prompt".to_string(),
        ..Default::default()
    }
}

#[test]
fn batch_create_reports_partial_success() {
    let (_registry, _templates, facade) = facade();
    let owner = Uuid::new_v4();

    let report = facade.batch_create_agents(
        owner,
        vec![draft("alpha"), draft("alpha"), draft("beta")],
    );

    assert_eq!(report.total, 3);
    assert_eq!(report.successful, 2);
    assert_eq!(report.failed, 1);
    let failed: Vec<_> = report.outcomes.iter().filter(|o| !o.ok).collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].error.as_ref().unwrap().contains("already exists"));
}

#[test]
fn export_import_roundtrip_json() {
    let (registry, _templates, facade) = facade();
    let owner = Uuid::new_v4();

    let s = registry.upsert_skill(Skill {
        id: Uuid::new_v4(),
        name: "writing".to_string(),
        description: String::new(),
        category: "general".to_string(),
        input_types: vec!["text".to_string()],
        output_types: vec!["text".to_string()],
        prerequisites: vec![],
        usage_count: 0,
    });
    let mut d = draft("exported-agent");
    d.skills = vec![s.id];
    let agent = registry.create_agent(owner, d).unwrap();
    registry
        .create_workflow(
            owner,
            "exported-wf",
            WorkflowKind::Sequential,
            vec![WorkflowStep {
                agent_id: agent.id,
                input_mapping: BTreeMap::new(),
                condition: None,
            }],
        )
        .unwrap();

    let text = facade.export_to_string(SnapshotFormat::Json).unwrap();

    // Import into a fresh mesh.
    let (registry2, _templates2, facade2) = self::facade();
    let snapshot = IntegrationFacade::parse_snapshot(&text, SnapshotFormat::Json).unwrap();
    let importer = Uuid::new_v4();
    let report = facade2.import(importer, snapshot);

    assert_eq!(report.failed, 0, "outcomes: {:?}", report.outcomes);
    let agents = registry2.list_agents(None, None, None);
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].name, "exported-agent");
    assert_eq!(agents[0].system_prompt, "prompt");
    let workflows = registry2.list_workflows(None);
    assert_eq!(workflows.len(), 1);
    // Step references were remapped onto the imported agent.
    assert_eq!(workflows[0].steps[0].agent_id, agents[0].id);
    assert_eq!(registry2.list_skills().len(), 1);
}

#[test]
fn export_import_roundtrip_yaml() {
    let (registry, _templates, facade) = facade();
    registry.create_agent(Uuid::new_v4(), draft("yaml-agent")).unwrap();

    let text = facade.export_to_string(SnapshotFormat::Yaml).unwrap();
    let snapshot = IntegrationFacade::parse_snapshot(&text, SnapshotFormat::Yaml).unwrap();
    assert_eq!(snapshot.agents.len(), 1);
    assert_eq!(snapshot.agents[0].name, "yaml-agent");
}

#[test]
fn import_isolates_bad_elements() {
    let (_registry, _templates, facade) = facade();
    let owner = Uuid::new_v4();
    facade.batch_create_agents(owner, vec![draft("taken")]);

    let text = facade.export_to_string(SnapshotFormat::Json).unwrap();
    // Importing into the same mesh collides on the slug but still
    // counts per-element outcomes rather than aborting.
    let snapshot = IntegrationFacade::parse_snapshot(&text, SnapshotFormat::Json).unwrap();
    let report = facade.import(owner, snapshot);
    assert_eq!(report.failed, 1);
    assert!(report.total > report.failed);
}

#[test]
fn template_instantiation_creates_agent() {
    let (registry, templates, facade) = facade();
    let owner = Uuid::new_v4();

    let mut schema = ParamSchema::default();
    schema.params.insert(
        "domain".to_string(),
        ParamSpec {
            param_type: "string".to_string(),
            required: true,
        },
    );
    let template = templates.create(
        "support-agent",
        TemplateKind::Agent,
        "support",
        json!({
            "system_prompt": "You answer {{domain}} questions.",
            "model": "gpt-4",
            "configuration": {"temperature": "{{temp}}"}
        }),
        schema,
    );

    let mut params = BTreeMap::new();
    params.insert("domain".to_string(), json!("billing"));
    params.insert("temp".to_string(), json!(0.3));

    let agent = facade
        .instantiate_agent(template.id, &params, owner, "billing-bot")
        .unwrap();

    assert_eq!(agent.system_prompt, "You answer billing questions.");
    assert_eq!(agent.model, "gpt-4");
    assert_eq!(agent.configuration["temperature"], json!(0.3));
    assert_eq!(agent.template_id, Some(template.id));
    assert!(registry.get_agent(agent.id).is_ok());
}

#[test]
fn non_agent_template_is_rejected() {
    let (_registry, templates, facade) = facade();
    let template = templates.create(
        "wf-template",
        TemplateKind::Workflow,
        "general",
        json!({}),
        ParamSchema::default(),
    );
    assert!(facade
        .instantiate_agent(template.id, &BTreeMap::new(), Uuid::new_v4(), "x")
        .is_err());
}
