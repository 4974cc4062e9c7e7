//! Capability discovery engine
//!
//! Derives what an agent can do from four sources: its skills, its
//! tools' declared capability names, its own configuration, and
//! emergent skill+tool pairings where a skill's output feeds a tool's
//! input. Duplicates are merged, confidence is adjusted for usage and
//! for missing prerequisites, and the result is sorted best-first.

use crate::model::{Skill, ToolEntry};
use crate::registry::Registry;
use agentmesh_core::{Result, ToolKind};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

const SKILL_BASE_CONFIDENCE: f64 = 0.8;
const TOOL_BASE_CONFIDENCE: f64 = 0.7;
const CONFIG_BASE_CONFIDENCE: f64 = 0.6;
const EMERGENT_BASE_CONFIDENCE: f64 = 0.5;
const HIGH_USAGE_THRESHOLD: u64 = 100;
const HIGH_USAGE_BONUS: f64 = 0.1;
const TOP_RESULTS: usize = 10;

#[derive(Clone, Debug, Serialize)]
pub struct Capability {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub input_types: Vec<String>,
    pub output_types: Vec<String>,
    pub confidence: f64,
    pub required_skills: Vec<String>,
    pub required_tools: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SkillCombination {
    pub skills: Vec<String>,
    pub name: String,
    pub description: String,
    pub synergy_score: f64,
    pub prerequisites: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SkillGap {
    pub target_capability: String,
    pub missing_skills: Vec<String>,
    pub available_alternatives: Vec<String>,
    /// "high", "medium", or "low", by the share of required skills missing.
    pub impact: String,
    pub recommendations: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ToolRecommendation {
    pub tool_id: Uuid,
    pub tool_name: String,
    pub match_score: f64,
    pub reasons: Vec<String>,
    /// "low", "medium", or "high", from the tool's auth scheme.
    pub integration_effort: String,
}

/// Requirements fed to [`CapabilityEngine::recommend_tools`].
#[derive(Clone, Debug, Default)]
pub struct ToolRequirements {
    pub capabilities: Vec<String>,
    pub kind: Option<ToolKind>,
}

struct TaskRequirements {
    category: String,
    input_types: Vec<String>,
    output_types: Vec<String>,
}

pub struct CapabilityEngine {
    registry: Arc<Registry>,
}

impl CapabilityEngine {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// All capabilities of an agent, merged and sorted by confidence.
    pub fn discover(&self, agent_id: Uuid) -> Result<Vec<Capability>> {
        let agent = self.registry.get_agent(agent_id)?;
        let skills: Vec<Skill> = agent
            .skills
            .iter()
            .filter_map(|id| self.registry.get_skill(*id).ok())
            .collect();
        let tools: Vec<ToolEntry> = agent
            .tools
            .iter()
            .filter_map(|id| self.registry.get_tool(*id).ok())
            .collect();

        let mut capabilities = Vec::new();

        for skill in &skills {
            capabilities.push(Capability {
                id: format!("skill_{}", skill.id),
                name: format!("Skill: {}", skill.name),
                description: skill.description.clone(),
                category: skill.category.clone(),
                input_types: skill.input_types.clone(),
                output_types: skill.output_types.clone(),
                confidence: SKILL_BASE_CONFIDENCE,
                required_skills: vec![skill.name.clone()],
                required_tools: vec![],
            });
        }

        for tool in &tools {
            for cap_name in &tool.capabilities {
                capabilities.push(Capability {
                    id: format!("tool_{}_{}", tool.id, cap_name),
                    name: format!("Tool: {cap_name}"),
                    description: format!("Capability provided by {}", tool.name),
                    category: "tool".to_string(),
                    input_types: tool.input_types.clone(),
                    output_types: tool.output_types.clone(),
                    confidence: TOOL_BASE_CONFIDENCE,
                    required_skills: vec![],
                    required_tools: vec![tool.name.clone()],
                });
            }
        }

        for cap_name in &agent.capabilities {
            capabilities.push(Capability {
                id: format!("config_{cap_name}"),
                name: format!("Config: {cap_name}"),
                description: "Capability from agent configuration".to_string(),
                category: "configuration".to_string(),
                input_types: vec![],
                output_types: vec![],
                confidence: CONFIG_BASE_CONFIDENCE,
                required_skills: vec![],
                required_tools: vec![],
            });
        }

        // Emergent pairs: a skill whose output a tool can consume.
        for skill in &skills {
            for tool in &tools {
                if intersects(&skill.output_types, &tool.input_types) {
                    capabilities.push(Capability {
                        id: format!("emergent_{}_{}", skill.id, tool.id),
                        name: format!("Emergent: {} + {}", skill.name, tool.name),
                        description: format!(
                            "Combined capability from {} and {}",
                            skill.name, tool.name
                        ),
                        category: "emergent".to_string(),
                        input_types: skill.input_types.clone(),
                        output_types: tool.output_types.clone(),
                        confidence: EMERGENT_BASE_CONFIDENCE,
                        required_skills: vec![skill.name.clone()],
                        required_tools: vec![tool.name.clone()],
                    });
                }
            }
        }

        let mut merged = merge_capabilities(capabilities);

        let skill_names: BTreeSet<&str> = skills.iter().map(|s| s.name.as_str()).collect();
        let tool_names: BTreeSet<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        for cap in &mut merged {
            cap.confidence = adjusted_confidence(cap, agent.usage_count, &skill_names, &tool_names);
        }

        merged.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(merged)
    }

    /// Single skills and complementary pairs suited to a task, scored
    /// by complementarity plus category match, best ten.
    pub fn suggest_skill_combinations(&self, task_description: &str) -> Vec<SkillCombination> {
        let requirements = analyze_task(task_description);
        let skills = self.relevant_skills(&requirements);

        let mut combinations = Vec::new();

        for skill in &skills {
            combinations.push(SkillCombination {
                skills: vec![skill.name.clone()],
                name: format!("Single: {}", skill.name),
                description: format!("Using {} alone", skill.name),
                synergy_score: synergy_score(&[skill], &requirements),
                prerequisites: skill.prerequisites.clone(),
            });
        }

        for (i, first) in skills.iter().enumerate() {
            for second in skills.iter().skip(i + 1) {
                if !complementary(first, second) {
                    continue;
                }
                let mut prerequisites: Vec<String> = first
                    .prerequisites
                    .iter()
                    .chain(second.prerequisites.iter())
                    .cloned()
                    .collect();
                prerequisites.sort();
                prerequisites.dedup();
                combinations.push(SkillCombination {
                    skills: vec![first.name.clone(), second.name.clone()],
                    name: format!("Pair: {} + {}", first.name, second.name),
                    description: format!("Combining {} and {}", first.name, second.name),
                    synergy_score: synergy_score(&[first, second], &requirements),
                    prerequisites,
                });
            }
        }

        combinations.sort_by(|a, b| {
            b.synergy_score
                .partial_cmp(&a.synergy_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        combinations.truncate(TOP_RESULTS);
        combinations
    }

    /// Missing skills per target capability, with impact class and
    /// name-similar alternatives drawn from the skill catalog.
    pub fn identify_gaps(
        &self,
        target_capabilities: &[String],
        agent_id: Option<Uuid>,
    ) -> Result<Vec<SkillGap>> {
        let owned: BTreeSet<String> = match agent_id {
            Some(id) => self
                .registry
                .get_agent(id)?
                .skills
                .iter()
                .filter_map(|sid| self.registry.get_skill(*sid).ok())
                .map(|s| s.name)
                .collect(),
            None => BTreeSet::new(),
        };

        let catalog = self.registry.list_skills();
        let mut gaps = Vec::new();

        for capability in target_capabilities {
            let required = required_skills_for(capability);
            if required.is_empty() {
                continue;
            }
            let missing: Vec<String> = required
                .iter()
                .filter(|skill| !owned.contains(**skill))
                .map(|s| s.to_string())
                .collect();
            if missing.is_empty() {
                continue;
            }

            let missing_share = missing.len() as f64 / required.len() as f64;
            let impact = if missing_share >= 0.8 {
                "high"
            } else if missing_share >= 0.5 {
                "medium"
            } else {
                "low"
            };

            let mut alternatives = Vec::new();
            for skill in &missing {
                for candidate in &catalog {
                    if candidate.name != *skill && name_similarity(&candidate.name, skill) >= 0.4 {
                        alternatives.push(candidate.name.clone());
                    }
                }
            }
            alternatives.sort();
            alternatives.dedup();

            let mut recommendations =
                vec![format!("Acquire missing skills: {}", missing.join(", "))];
            if !alternatives.is_empty() {
                let shortlist: Vec<&str> =
                    alternatives.iter().take(3).map(String::as_str).collect();
                recommendations.push(format!("Consider alternatives: {}", shortlist.join(", ")));
            }

            gaps.push(SkillGap {
                target_capability: capability.clone(),
                missing_skills: missing,
                available_alternatives: alternatives,
                impact: impact.to_string(),
                recommendations,
            });
        }

        let rank = |impact: &str| match impact {
            "high" => 2,
            "medium" => 1,
            _ => 0,
        };
        gaps.sort_by(|a, b| rank(&b.impact).cmp(&rank(&a.impact)));
        Ok(gaps)
    }

    /// Active tools scored against the requirements, best ten.
    pub fn recommend_tools(&self, requirements: &ToolRequirements) -> Vec<ToolRecommendation> {
        let mut recommendations = Vec::new();

        for tool in self.registry.list_tools() {
            if !tool.active {
                continue;
            }

            let wanted: BTreeSet<&str> =
                requirements.capabilities.iter().map(String::as_str).collect();
            let have: BTreeSet<&str> = tool.capabilities.iter().map(String::as_str).collect();
            let overlap = if wanted.is_empty() {
                0.0
            } else {
                wanted.intersection(&have).count() as f64 / wanted.len() as f64
            };

            let kind_match = match requirements.kind {
                Some(kind) if kind == tool.kind => 1.0,
                Some(_) => 0.0,
                None => 0.5,
            };

            let success_rate = if tool.stats.total > 0 {
                tool.stats.success as f64 / tool.stats.total as f64
            } else {
                0.0
            };

            let popularity = (tool.stats.total as f64 / 1000.0).min(1.0);
            let documented = if tool.description.is_empty() { 0.0 } else { 1.0 };

            let match_score = overlap * 0.4
                + kind_match * 0.2
                + success_rate * 0.2
                + popularity * 0.1
                + documented * 0.1;

            let mut reasons = Vec::new();
            if overlap > 0.0 {
                reasons.push(format!("covers {:.0}% of requested capabilities", overlap * 100.0));
            }
            if kind_match == 1.0 {
                reasons.push("matches the requested tool kind".to_string());
            }
            if success_rate > 0.9 && tool.stats.total >= 10 {
                reasons.push("high observed success rate".to_string());
            }

            recommendations.push(ToolRecommendation {
                tool_id: tool.id,
                tool_name: tool.name.clone(),
                match_score,
                reasons,
                integration_effort: integration_effort(&tool.auth_kind).to_string(),
            });
        }

        recommendations.sort_by(|a, b| {
            b.match_score
                .partial_cmp(&a.match_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        recommendations.truncate(TOP_RESULTS);
        recommendations
    }

    fn relevant_skills(&self, requirements: &TaskRequirements) -> Vec<Skill> {
        self.registry
            .list_skills()
            .into_iter()
            .filter(|skill| {
                skill.category == requirements.category
                    || intersects(&skill.input_types, &requirements.input_types)
                    || intersects(&skill.output_types, &requirements.output_types)
            })
            .collect()
    }
}

/// Merge key is (category, sorted inputs, sorted outputs); the merged
/// capability takes the max confidence and the union of requirements.
/// Merging is idempotent and never grows the set.
pub fn merge_capabilities(capabilities: Vec<Capability>) -> Vec<Capability> {
    let mut groups: BTreeMap<(String, Vec<String>, Vec<String>), Vec<Capability>> =
        BTreeMap::new();
    for cap in capabilities {
        let mut inputs = cap.input_types.clone();
        inputs.sort();
        let mut outputs = cap.output_types.clone();
        outputs.sort();
        groups
            .entry((cap.category.clone(), inputs, outputs))
            .or_default()
            .push(cap);
    }

    let mut merged = Vec::new();
    for (_, mut group) in groups {
        if group.len() == 1 {
            merged.push(group.pop().unwrap());
            continue;
        }
        let confidence = group.iter().map(|c| c.confidence).fold(0.0, f64::max);
        let mut required_skills: Vec<String> =
            group.iter().flat_map(|c| c.required_skills.clone()).collect();
        required_skills.sort();
        required_skills.dedup();
        let mut required_tools: Vec<String> =
            group.iter().flat_map(|c| c.required_tools.clone()).collect();
        required_tools.sort();
        required_tools.dedup();
        let first = &group[0];
        merged.push(Capability {
            id: format!("merged_{}", first.category),
            name: format!("Merged: {}", first.category),
            description: format!("Combined capability from {} sources", group.len()),
            category: first.category.clone(),
            input_types: first.input_types.clone(),
            output_types: first.output_types.clone(),
            confidence,
            required_skills,
            required_tools,
        });
    }
    merged
}

fn adjusted_confidence(
    cap: &Capability,
    usage_count: u64,
    owned_skills: &BTreeSet<&str>,
    owned_tools: &BTreeSet<&str>,
) -> f64 {
    let mut score = cap.confidence;
    if usage_count > HIGH_USAGE_THRESHOLD {
        score += HIGH_USAGE_BONUS;
    }
    if !cap.required_skills.is_empty() {
        let present = cap
            .required_skills
            .iter()
            .filter(|s| owned_skills.contains(s.as_str()))
            .count();
        score *= present as f64 / cap.required_skills.len() as f64;
    }
    if !cap.required_tools.is_empty() {
        let present = cap
            .required_tools
            .iter()
            .filter(|t| owned_tools.contains(t.as_str()))
            .count();
        score *= present as f64 / cap.required_tools.len() as f64;
    }
    score.clamp(0.0, 1.0)
}

/// Keyword analysis of a task description into coarse requirements.
fn analyze_task(description: &str) -> TaskRequirements {
    let lower = description.to_lowercase();
    if lower.contains("data") {
        TaskRequirements {
            category: "data".to_string(),
            input_types: vec!["data".to_string(), "text".to_string()],
            output_types: vec!["analysis".to_string(), "visualization".to_string()],
        }
    } else if lower.contains("code") {
        TaskRequirements {
            category: "development".to_string(),
            input_types: vec!["code".to_string(), "text".to_string()],
            output_types: vec!["code".to_string(), "documentation".to_string()],
        }
    } else {
        TaskRequirements {
            category: "general".to_string(),
            input_types: vec!["text".to_string()],
            output_types: vec!["text".to_string()],
        }
    }
}

/// Complementary iff the output of one feeds the input of the other.
fn complementary(a: &Skill, b: &Skill) -> bool {
    intersects(&a.output_types, &b.input_types) || intersects(&b.output_types, &a.input_types)
}

fn synergy_score(skills: &[&Skill], requirements: &TaskRequirements) -> f64 {
    if skills.len() == 1 {
        return 0.5;
    }
    let mut complementarity = 0.0;
    for (i, first) in skills.iter().enumerate() {
        for second in skills.iter().skip(i + 1) {
            if complementary(first, second) {
                complementarity += 0.2;
            }
        }
    }
    let category_match = skills
        .iter()
        .filter(|s| s.category == requirements.category)
        .count() as f64
        / skills.len() as f64;
    (complementarity + category_match * 0.5).min(1.0)
}

/// Static capability → required skills mapping; the knowledge base the
/// original system deferred to.
fn required_skills_for(capability: &str) -> Vec<&'static str> {
    match capability.to_lowercase().as_str() {
        "data_analysis" => vec!["data-processing", "statistics", "visualization"],
        "content_creation" => vec!["writing", "research", "editing"],
        "code_generation" => vec!["programming", "debugging", "documentation"],
        "customer_service" => vec!["communication", "problem-solving", "empathy"],
        _ => vec![],
    }
}

fn integration_effort(auth_kind: &str) -> &'static str {
    match auth_kind {
        "" | "none" => "low",
        "api_key" | "bearer" => "medium",
        _ => "high",
    }
}

fn intersects(a: &[String], b: &[String]) -> bool {
    a.iter().any(|item| b.contains(item))
}

/// Token-overlap similarity over dash/underscore-separated names.
fn name_similarity(a: &str, b: &str) -> f64 {
    let tokens = |s: &str| -> BTreeSet<String> {
        s.to_lowercase()
            .split(['-', '_', ' '])
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    };
    let a_tokens = tokens(a);
    let b_tokens = tokens(b);
    if a_tokens.is_empty() || b_tokens.is_empty() {
        return 0.0;
    }
    let shared = a_tokens.intersection(&b_tokens).count() as f64;
    let union = a_tokens.union(&b_tokens).count() as f64;
    shared / union
}
