use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::Number => write!(f, "number"),
            FieldType::Boolean => write!(f, "boolean"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub field_type: FieldType,
    pub description: String,
}

impl SchemaField {
    pub fn new(name: &str, field_type: FieldType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Duplicate field name: {0}")]
    DuplicateField(String),
}

/// Ordered set of fields a final answer must satisfy. Field names are unique.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<SchemaField>,
}

impl Schema {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn push(&mut self, field: SchemaField) -> Result<(), SchemaError> {
        if self.has_field(&field.name) {
            return Err(SchemaError::DuplicateField(field.name));
        }
        self.fields.push(field);
        Ok(())
    }

    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Number(f64),
    Boolean(bool),
}

impl FieldValue {
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Boolean(b) => Value::Bool(*b),
        }
    }
}

/// A validated final answer: one typed value per schema field, in
/// schema-declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRecord {
    entries: Vec<(String, FieldValue)>,
}

impl StructuredRecord {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn entries(&self) -> &[(String, FieldValue)] {
        &self.entries
    }

    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (key, value) in &self.entries {
            map.insert(key.clone(), value.to_json());
        }
        Value::Object(map)
    }

    pub fn render(&self) -> String {
        self.to_json().to_string()
    }
}

impl fmt::Display for StructuredRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFailure {
    NotJson,
    MissingField,
    TypeMismatch,
    ExtraField,
}

impl ValidationFailure {
    pub fn describe(&self) -> &'static str {
        match self {
            ValidationFailure::NotJson => "the output could not be interpreted as a JSON object",
            ValidationFailure::MissingField => "a required field is missing from the output",
            ValidationFailure::TypeMismatch => "a field has a value of the wrong type",
            ValidationFailure::ExtraField => "the output contains a field not present in the schema",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{detail}")]
pub struct ValidationError {
    pub offending_text: String,
    pub reason: ValidationFailure,
    pub detail: String,
}

impl ValidationError {
    fn new(text: &str, reason: ValidationFailure, detail: String) -> Self {
        Self {
            offending_text: text.to_string(),
            reason,
            detail,
        }
    }
}

/// Parses `text` against `schema`. Field order in the input does not affect
/// acceptance; on failure the first violation in schema-declaration order is
/// reported.
pub fn parse(text: &str, schema: &Schema) -> Result<StructuredRecord, ValidationError> {
    let value = extract_json(text).ok_or_else(|| {
        ValidationError::new(
            text,
            ValidationFailure::NotJson,
            "could not interpret the text as JSON".to_string(),
        )
    })?;

    let map = value.as_object().ok_or_else(|| {
        ValidationError::new(
            text,
            ValidationFailure::NotJson,
            format!("expected a JSON object, got {}", json_type_name(&value)),
        )
    })?;

    let mut entries = Vec::with_capacity(schema.len());
    for field in schema.fields() {
        let raw = map.get(&field.name).ok_or_else(|| {
            ValidationError::new(
                text,
                ValidationFailure::MissingField,
                format!("field '{}' is missing", field.name),
            )
        })?;
        let value = coerce(raw, field.field_type).ok_or_else(|| {
            ValidationError::new(
                text,
                ValidationFailure::TypeMismatch,
                format!(
                    "field '{}' expected {}, got {}",
                    field.name,
                    field.field_type,
                    json_type_name(raw)
                ),
            )
        })?;
        entries.push((field.name.clone(), value));
    }

    for key in map.keys() {
        if !schema.has_field(key) {
            return Err(ValidationError::new(
                text,
                ValidationFailure::ExtraField,
                format!("unexpected field '{}'", key),
            ));
        }
    }

    Ok(StructuredRecord { entries })
}

fn coerce(value: &Value, field_type: FieldType) -> Option<FieldValue> {
    match field_type {
        FieldType::String => value.as_str().map(|s| FieldValue::String(s.to_string())),
        FieldType::Number => value.as_f64().map(FieldValue::Number),
        FieldType::Boolean => value.as_bool().map(FieldValue::Boolean),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if trimmed.starts_with("```") {
        let stripped = trimmed.trim_start_matches("```json");
        let stripped = stripped.trim_start_matches("```JSON");
        let stripped = stripped.trim_start_matches("```");
        if let Some(end) = stripped.rfind("```") {
            let slice = &stripped[..end];
            if let Ok(value) = serde_json::from_str::<Value>(slice.trim()) {
                return Some(value);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            let candidate = &trimmed[start..=end];
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                return Some(value);
            }
        }
    }

    None
}

/// Human-readable rendering of the schema, embedded in the initial prompt and
/// the repair prompt as formatting instructions.
pub fn format_instructions(schema: &Schema) -> String {
    let fields: Vec<String> = schema
        .fields()
        .iter()
        .map(|f| format!("\t\"{}\": {} // {}", f.name, f.field_type, f.description))
        .collect();

    format!(
        "Your final answer must be a markdown code snippet containing a JSON object formatted \
         exactly as follows, including the leading and trailing \"```json\" and \"```\":\n\n\
         ```json\n{{\n{}\n}}\n```",
        fields.join("\n")
    )
}
