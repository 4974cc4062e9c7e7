//! Orchestrator lifecycle: port exhaustion, deploy timeout, external probes

mod common;

use agentmesh_core::{
    AgentKind, AgentStatus, ErrorKind, PortAllocator, TemplateKind,
};
use agentmesh_registry::{AgentDraft, ParamSchema, Registry, TemplateStore};
use agentmesh_runtime::{Orchestrator, OrchestratorConfig};
use common::spawn_fake_worker;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn orchestrator(
    ports: Arc<PortAllocator>,
    config: OrchestratorConfig,
) -> (Arc<Registry>, Arc<TemplateStore>, Orchestrator) {
    let registry = Arc::new(Registry::new(vec!["gpt-4".to_string()]));
    let templates = Arc::new(TemplateStore::new());
    let orch = Orchestrator::new(
        registry.clone(),
        templates.clone(),
        ports,
        reqwest::Client::new(),
        config,
    );
    (registry, templates, orch)
}

fn templated_agent(
    registry: &Registry,
    templates: &TemplateStore,
    owner: Uuid,
) -> Uuid {
    let template = templates.create(
        "worker",
        TemplateKind::Agent,
        "general",
        json!({"prompt": "{{system_prompt}}", "model": "{{model}}"}),
        ParamSchema::default(),
    );
    registry
        .create_agent(
            owner,
            AgentDraft {
                name: format!("agent-{}", Uuid::new_v4()),
                model: "gpt-4".to_string(),
                system_prompt: "P".to_string(),
                template_id: Some(template.id),
                ..Default::default()
            },
        )
        .unwrap()
        .id
}

#[tokio::test]
async fn port_exhaustion_fails_without_mutating_agent() {
    let ports = Arc::new(PortAllocator::new(42100, 0));
    let (registry, templates, orch) = orchestrator(ports, OrchestratorConfig::default());
    let agent_id = templated_agent(&registry, &templates, Uuid::new_v4());

    let err = orch.deploy(agent_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);

    let agent = registry.get_agent(agent_id).unwrap();
    assert_eq!(agent.status, AgentStatus::Inactive);
    assert!(agent.endpoint.is_none());
    assert!(agent.last_error.is_none());
}

#[tokio::test]
async fn deploy_timeout_releases_port_and_records_error() {
    let ports = Arc::new(PortAllocator::new(42200, 4));
    let config = OrchestratorConfig {
        startup_deadline: Duration::from_millis(900),
        drain_deadline: Duration::from_millis(200),
        work_root: std::env::temp_dir().join(format!("agentmesh-test-{}", Uuid::new_v4())),
        // Never answers the health probe.
        worker_command: "sleep 30".to_string(),
    };
    let (registry, templates, orch) = orchestrator(ports.clone(), config);
    let agent_id = templated_agent(&registry, &templates, Uuid::new_v4());

    let err = orch.deploy(agent_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    let agent = registry.get_agent(agent_id).unwrap();
    assert_eq!(agent.status, AgentStatus::Error);
    assert!(agent.last_error.as_ref().unwrap().contains("timeout"));
    assert_eq!(ports.allocated(), 0, "port was released");

    let status = orch.deployment_status(agent_id).unwrap();
    assert_eq!(status.status, "failed");
}

#[tokio::test]
async fn external_agent_activates_when_probe_answers() {
    let ports = Arc::new(PortAllocator::new(42300, 4));
    let config = OrchestratorConfig {
        startup_deadline: Duration::from_secs(5),
        ..OrchestratorConfig::default()
    };
    let (registry, _templates, orch) = orchestrator(ports, config);

    let endpoint = spawn_fake_worker(json!({})).await;
    let owner = Uuid::new_v4();
    let agent = registry
        .create_agent(
            owner,
            AgentDraft {
                name: "remote".to_string(),
                kind: Some(AgentKind::External),
                model: "gpt-4".to_string(),
                endpoint: Some(endpoint.clone()),
                probe_url: Some(format!("{endpoint}/health")),
                ..Default::default()
            },
        )
        .unwrap();

    orch.deploy(agent.id).await.unwrap();

    let agent = registry.get_agent(agent.id).unwrap();
    assert_eq!(agent.status, AgentStatus::Active);
    assert_eq!(agent.endpoint.as_deref(), Some(endpoint.as_str()));
    assert!(agent.probe_url.is_some());
}

#[tokio::test]
async fn external_agent_errors_when_probe_is_dead() {
    let ports = Arc::new(PortAllocator::new(42400, 4));
    let config = OrchestratorConfig {
        startup_deadline: Duration::from_millis(600),
        ..OrchestratorConfig::default()
    };
    let (registry, _templates, orch) = orchestrator(ports, config);

    let owner = Uuid::new_v4();
    let agent = registry
        .create_agent(
            owner,
            AgentDraft {
                name: "dead-remote".to_string(),
                kind: Some(AgentKind::External),
                model: "gpt-4".to_string(),
                // Nothing listens here.
                endpoint: Some("http://127.0.0.1:42499".to_string()),
                probe_url: Some("http://127.0.0.1:42499/health".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    let err = orch.deploy(agent.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(
        registry.get_agent(agent.id).unwrap().status,
        AgentStatus::Error
    );
}

#[tokio::test]
async fn validation_blocks_deploy_of_incomplete_agent() {
    let ports = Arc::new(PortAllocator::new(42500, 4));
    let (registry, _templates, orch) = orchestrator(ports, OrchestratorConfig::default());

    // Templated agent without a template.
    let agent = registry
        .create_agent(
            Uuid::new_v4(),
            AgentDraft {
                name: "incomplete".to_string(),
                model: "gpt-4".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

    let err = orch.deploy(agent.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadInput);
    let validation = orch.validate(&registry.get_agent(agent.id).unwrap());
    assert!(!validation.is_valid());
}

#[tokio::test]
async fn stop_is_idempotent_for_stopped_agents() {
    let ports = Arc::new(PortAllocator::new(42600, 4));
    let (registry, _templates, orch) = orchestrator(ports, OrchestratorConfig::default());

    let agent = registry
        .create_agent(
            Uuid::new_v4(),
            AgentDraft {
                name: "stoppable".to_string(),
                model: "gpt-4".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

    // No workers exist; stop still lands the agent in stopped.
    orch.stop(agent.id).await.unwrap();
    assert_eq!(
        registry.get_agent(agent.id).unwrap().status,
        AgentStatus::Stopped
    );
    orch.stop(agent.id).await.unwrap();
}
