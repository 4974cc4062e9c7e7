//! Capability discovery over a populated registry

use agentmesh_core::ToolKind;
use agentmesh_registry::{
    AgentDraft, CapabilityEngine, Registry, Skill, ToolEntry,
};
use agentmesh_registry::capability::ToolRequirements;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn skill(name: &str, category: &str, inputs: &[&str], outputs: &[&str]) -> Skill {
    Skill {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: format!("{name} skill"),
        category: category.to_string(),
        input_types: inputs.iter().map(|s| s.to_string()).collect(),
        output_types: outputs.iter().map(|s| s.to_string()).collect(),
        prerequisites: vec![],
        usage_count: 0,
    }
}

fn tool(name: &str, caps: &[&str], inputs: &[&str], outputs: &[&str]) -> ToolEntry {
    ToolEntry {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: format!("{name} tool"),
        kind: ToolKind::Rest,
        endpoint: Some(format!("https://{name}.example")),
        auth_kind: "none".to_string(),
        schema: json!({}),
        capabilities: caps.iter().map(|s| s.to_string()).collect(),
        input_types: inputs.iter().map(|s| s.to_string()).collect(),
        output_types: outputs.iter().map(|s| s.to_string()).collect(),
        stats: Default::default(),
        active: true,
    }
}

fn setup() -> (Arc<Registry>, CapabilityEngine) {
    let registry = Arc::new(Registry::new(vec!["gpt-4".to_string()]));
    let engine = CapabilityEngine::new(registry.clone());
    (registry, engine)
}

#[test]
fn emergent_capability_from_skill_tool_pairing() {
    let (registry, engine) = setup();
    let s = registry.upsert_skill(skill("summarize", "general", &["document"], &["text"]));
    let t = registry.upsert_tool(tool("translator", &["translate"], &["text"], &["text"]));

    let agent = registry
        .create_agent(
            Uuid::new_v4(),
            AgentDraft {
                name: "summarizer".to_string(),
                model: "gpt-4".to_string(),
                skills: vec![s.id],
                tools: vec![t.id],
                ..Default::default()
            },
        )
        .unwrap();

    let capabilities = engine.discover(agent.id).unwrap();
    let emergent = capabilities
        .iter()
        .find(|c| c.category == "emergent")
        .expect("emergent capability present");
    assert_eq!(emergent.required_skills, vec!["summarize".to_string()]);
    assert_eq!(emergent.required_tools, vec!["translator".to_string()]);
}

#[test]
fn no_emergent_without_type_match() {
    let (registry, engine) = setup();
    let s = registry.upsert_skill(skill("draw", "art", &["text"], &["image"]));
    let t = registry.upsert_tool(tool("calculator", &["math"], &["number"], &["number"]));

    let agent = registry
        .create_agent(
            Uuid::new_v4(),
            AgentDraft {
                name: "artist".to_string(),
                model: "gpt-4".to_string(),
                skills: vec![s.id],
                tools: vec![t.id],
                ..Default::default()
            },
        )
        .unwrap();

    let capabilities = engine.discover(agent.id).unwrap();
    assert!(capabilities.iter().all(|c| c.category != "emergent"));
}

#[test]
fn discovery_sorts_by_confidence_and_includes_config() {
    let (registry, engine) = setup();
    let s = registry.upsert_skill(skill("writing", "general", &["text"], &["text"]));

    let agent = registry
        .create_agent(
            Uuid::new_v4(),
            AgentDraft {
                name: "writer".to_string(),
                model: "gpt-4".to_string(),
                skills: vec![s.id],
                capabilities: vec!["storytelling".to_string()],
                ..Default::default()
            },
        )
        .unwrap();

    let capabilities = engine.discover(agent.id).unwrap();
    assert!(capabilities.len() >= 2);
    for pair in capabilities.windows(2) {
        assert!(pair[0].confidence >= pair[1].confidence);
    }
    assert!(capabilities
        .iter()
        .any(|c| c.category == "configuration" && c.name.contains("storytelling")));
}

#[test]
fn missing_required_skill_penalizes_confidence() {
    let (registry, engine) = setup();
    // The skill capability itself always has its skill present, so the
    // penalty shows through emergent pairs with a foreign skill removed.
    let s = registry.upsert_skill(skill("writing", "general", &["text"], &["text"]));
    let agent = registry
        .create_agent(
            Uuid::new_v4(),
            AgentDraft {
                name: "writer".to_string(),
                model: "gpt-4".to_string(),
                skills: vec![s.id],
                ..Default::default()
            },
        )
        .unwrap();

    let capabilities = engine.discover(agent.id).unwrap();
    let skill_cap = capabilities
        .iter()
        .find(|c| c.required_skills.contains(&"writing".to_string()))
        .unwrap();
    // Present skill: base confidence survives.
    assert!(skill_cap.confidence >= 0.8);
}

#[test]
fn suggests_complementary_pairs() {
    let (registry, engine) = setup();
    registry.upsert_skill(skill("data-processing", "data", &["data"], &["analysis"]));
    registry.upsert_skill(skill("visualization", "data", &["analysis"], &["visualization"]));
    registry.upsert_skill(skill("empathy", "social", &["speech"], &["speech"]));

    let combinations = engine.suggest_skill_combinations("analyze my data warehouse");
    assert!(!combinations.is_empty());
    let pair = combinations
        .iter()
        .find(|c| c.skills.len() == 2)
        .expect("a complementary pair");
    assert!(pair.skills.contains(&"data-processing".to_string()));
    assert!(pair.skills.contains(&"visualization".to_string()));
    // Pairs outrank singles here: complementarity plus full category match.
    assert_eq!(combinations[0].skills.len(), 2);
}

#[test]
fn identifies_gaps_with_impact() {
    let (registry, engine) = setup();
    let s = registry.upsert_skill(skill("statistics", "data", &["data"], &["analysis"]));
    registry.upsert_skill(skill("data-cleaning", "data", &["data"], &["data"]));

    let agent = registry
        .create_agent(
            Uuid::new_v4(),
            AgentDraft {
                name: "analyst".to_string(),
                model: "gpt-4".to_string(),
                skills: vec![s.id],
                ..Default::default()
            },
        )
        .unwrap();

    let gaps = engine
        .identify_gaps(&["data_analysis".to_string()], Some(agent.id))
        .unwrap();
    assert_eq!(gaps.len(), 1);
    let gap = &gaps[0];
    // statistics is owned; data-processing and visualization are missing.
    assert_eq!(gap.missing_skills.len(), 2);
    assert_eq!(gap.impact, "medium");
    assert!(!gap.recommendations.is_empty());
}

#[test]
fn fully_missing_capability_is_high_impact() {
    let (_registry, engine) = setup();
    let gaps = engine
        .identify_gaps(&["code_generation".to_string()], None)
        .unwrap();
    assert_eq!(gaps[0].impact, "high");
    assert_eq!(gaps[0].missing_skills.len(), 3);
}

#[test]
fn recommends_matching_tools_first() {
    let (registry, engine) = setup();
    let mut strong = tool("search-api", &["web-search"], &["text"], &["json"]);
    strong.stats.total = 100;
    strong.stats.success = 98;
    registry.upsert_tool(strong);
    registry.upsert_tool(tool("image-gen", &["image-generation"], &["text"], &["image"]));
    let mut inactive = tool("legacy", &["web-search"], &["text"], &["json"]);
    inactive.active = false;
    registry.upsert_tool(inactive);

    let recommendations = engine.recommend_tools(&ToolRequirements {
        capabilities: vec!["web-search".to_string()],
        kind: Some(ToolKind::Rest),
    });

    assert_eq!(recommendations[0].tool_name, "search-api");
    assert!(recommendations[0].match_score > recommendations[1].match_score);
    assert!(recommendations.iter().all(|r| r.tool_name != "legacy"));
    assert_eq!(recommendations[0].integration_effort, "low");
}
