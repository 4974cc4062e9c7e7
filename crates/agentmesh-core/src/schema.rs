//! Input/output schema evaluator
//!
//! A deliberately small contract checker over a closed type set. Agents
//! declare the shape of their invocation payloads with it; the dispatcher
//! rejects mismatches before any external call is made.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The closed set of payload field types the mesh understands.
///
/// Media and document kinds are carried as opaque string references
/// (URLs, ids, or base64); the schema only checks the JSON shape.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Text,
    Audio,
    Image,
    Video,
    Document,
    File,
    Binary,
    Json,
    Xml,
    Csv,
    Pdf,
    Any,
}

impl FieldType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String
            | Self::Text
            | Self::Audio
            | Self::Image
            | Self::Video
            | Self::Document
            | Self::File
            | Self::Binary
            | Self::Xml
            | Self::Csv
            | Self::Pdf => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Json | Self::Any => true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_required() -> bool {
    true
}

/// Field-by-field payload schema. Unknown fields in the payload pass
/// through unchecked; the contract is over declared fields only.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct IoSchema {
    pub fields: BTreeMap<String, FieldSpec>,
}

impl IoSchema {
    /// Validate a payload, collecting every violation.
    pub fn validate(&self, payload: &Value) -> std::result::Result<(), Vec<String>> {
        let mut problems = Vec::new();

        let obj = match payload.as_object() {
            Some(obj) => obj,
            None => {
                if self.fields.is_empty() {
                    return Ok(());
                }
                return Err(vec!["payload must be a JSON object".to_string()]);
            }
        };

        for (name, spec) in &self.fields {
            match obj.get(name) {
                Some(Value::Null) | None => {
                    if spec.required {
                        problems.push(format!("missing required field '{name}'"));
                    }
                }
                Some(value) => {
                    if !spec.field_type.accepts(value) {
                        problems.push(format!(
                            "field '{name}' does not match declared type {:?}",
                            spec.field_type
                        ));
                    }
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}
