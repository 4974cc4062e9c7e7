//! Template store and rendering
//!
//! Instantiation is a pure function over (definition, parameters):
//! `{{name}}` markers are substituted and nothing else changes, so the
//! same inputs always produce the same artifact. Parameters are checked
//! against the template's declared schema first.

use crate::model::{ParamSchema, Template};
use agentmesh_core::{Error, Result, TemplateKind};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

pub struct TemplateStore {
    templates: dashmap::DashMap<Uuid, Template>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self {
            templates: dashmap::DashMap::new(),
        }
    }

    pub fn create(
        &self,
        name: impl Into<String>,
        kind: TemplateKind,
        category: impl Into<String>,
        definition: Value,
        parameter_schema: ParamSchema,
    ) -> Template {
        let template = Template {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            category: category.into(),
            definition,
            parameter_schema,
            version: "1.0.0".to_string(),
            parent_version: None,
            created_at: Utc::now(),
        };
        self.templates.insert(template.id, template.clone());
        template
    }

    pub fn get(&self, id: Uuid) -> Result<Template> {
        self.templates
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or_else(|| Error::not_found(format!("template {id}")))
    }

    pub fn list(&self, kind: Option<TemplateKind>) -> Vec<Template> {
        self.templates
            .iter()
            .map(|entry| entry.clone())
            .filter(|t| kind.is_none_or(|k| t.kind == k))
            .collect()
    }

    /// Replace the definition, chaining a new version off the old one.
    pub fn update_definition(&self, id: Uuid, definition: Value) -> Result<Template> {
        let mut entry = self
            .templates
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("template {id}")))?;
        entry.parent_version = Some(entry.version.clone());
        entry.version = bump(&entry.version);
        entry.definition = definition;
        Ok(entry.clone())
    }

    pub fn delete(&self, id: Uuid) -> Result<()> {
        self.templates
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("template {id}")))
    }

    /// Validate parameters and render the definition.
    pub fn instantiate(&self, id: Uuid, params: &BTreeMap<String, Value>) -> Result<Value> {
        let template = self.get(id)?;
        validate_params(&template.parameter_schema, params)?;
        Ok(render_template(&template.definition, params))
    }
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_params(schema: &ParamSchema, params: &BTreeMap<String, Value>) -> Result<()> {
    let mut problems = Vec::new();
    for (name, spec) in &schema.params {
        match params.get(name) {
            None => {
                if spec.required {
                    problems.push(format!("missing required parameter '{name}'"));
                }
            }
            Some(value) => {
                let ok = match spec.param_type.as_str() {
                    "string" => value.is_string(),
                    "number" => value.is_number(),
                    "boolean" => value.is_boolean(),
                    "object" => value.is_object(),
                    "array" => value.is_array(),
                    _ => true,
                };
                if !ok {
                    problems.push(format!(
                        "parameter '{name}' is not a {}",
                        spec.param_type
                    ));
                }
            }
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::bad_input(problems.join("; ")))
    }
}

/// Recursively substitute `{{name}}` markers throughout a definition.
///
/// A string that is exactly one marker takes the parameter's JSON value
/// verbatim, so numbers and objects survive; markers embedded in longer
/// strings are spliced in as text.
pub fn render_template(definition: &Value, params: &BTreeMap<String, Value>) -> Value {
    match definition {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_template(v, params)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| render_template(v, params)).collect())
        }
        Value::String(text) => render_string(text, params),
        other => other.clone(),
    }
}

fn render_string(text: &str, params: &BTreeMap<String, Value>) -> Value {
    // Whole-string marker: keep the raw value.
    if let Some(name) = text
        .strip_prefix("{{")
        .and_then(|rest| rest.strip_suffix("}}"))
    {
        let name = name.trim();
        if !name.contains("{{") {
            if let Some(value) = params.get(name) {
                return value.clone();
            }
        }
    }

    let mut rendered = text.to_string();
    for (name, value) in params {
        let marker = format!("{{{{{name}}}}}");
        if rendered.contains(&marker) {
            rendered = rendered.replace(&marker, &value_as_text(value));
        }
    }
    Value::String(rendered)
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn bump(version: &str) -> String {
    let mut parts = version.split('.');
    let major: u64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(1);
    let minor: u64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let patch: u64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    format!("{major}.{minor}.{}", patch + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParamSpec;
    use serde_json::json;

    fn params(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn substitutes_embedded_markers() {
        let definition = json!({"prompt": "You are {{name}}, an assistant for {{task}}."});
        let out = render_template(
            &definition,
            &params(&[("name", json!("Iris")), ("task", json!("billing"))]),
        );
        assert_eq!(out["prompt"], "You are Iris, an assistant for billing.");
    }

    #[test]
    fn whole_string_marker_keeps_value_type() {
        let definition = json!({"max_turns": "{{turns}}", "flags": "{{flags}}"});
        let out = render_template(
            &definition,
            &params(&[("turns", json!(5)), ("flags", json!({"verbose": true}))]),
        );
        assert_eq!(out["max_turns"], json!(5));
        assert_eq!(out["flags"]["verbose"], json!(true));
    }

    #[test]
    fn unknown_markers_are_left_in_place() {
        let definition = json!("hello {{missing}}");
        let out = render_template(&definition, &params(&[]));
        assert_eq!(out, json!("hello {{missing}}"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let definition = json!({"a": "{{x}}", "b": ["{{x}} and {{y}}"]});
        let p = params(&[("x", json!("one")), ("y", json!(2))]);
        assert_eq!(render_template(&definition, &p), render_template(&definition, &p));
    }

    #[test]
    fn instantiate_validates_schema() {
        let store = TemplateStore::new();
        let mut schema = ParamSchema::default();
        schema.params.insert(
            "name".to_string(),
            ParamSpec {
                param_type: "string".to_string(),
                required: true,
            },
        );
        let template = store.create(
            "greeter",
            TemplateKind::Agent,
            "general",
            json!({"prompt": "Hi {{name}}"}),
            schema,
        );

        assert!(store.instantiate(template.id, &params(&[])).is_err());
        assert!(store
            .instantiate(template.id, &params(&[("name", json!(42))]))
            .is_err());
        let out = store
            .instantiate(template.id, &params(&[("name", json!("Ada"))]))
            .unwrap();
        assert_eq!(out["prompt"], "Hi Ada");
    }

    #[test]
    fn update_chains_versions() {
        let store = TemplateStore::new();
        let t = store.create(
            "t",
            TemplateKind::Agent,
            "general",
            json!({}),
            ParamSchema::default(),
        );
        let updated = store.update_definition(t.id, json!({"v": 2})).unwrap();
        assert_eq!(updated.version, "1.0.1");
        assert_eq!(updated.parent_version.as_deref(), Some("1.0.0"));
    }
}
