//! Tool trait and registry: the abstraction over agent capabilities.
//!
//! Tools are what let the agent act on behalf of a customer: look up an
//! order, issue a refund, track a parcel. Each tool declares a typed input
//! schema; the registry checks arguments against it before any handler
//! runs, so handlers only ever see structurally valid input.

use async_trait::async_trait;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{RegistryError, ToolError, ValidationError};
use crate::model::ToolDefinition;

/// Semantic type of a tool argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    /// Coerce a JSON value into this kind, if it is reasonably convertible.
    fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (Self::String, Value::String(_)) => Some(value.clone()),
            (Self::String, Value::Number(n)) => Some(Value::String(n.to_string())),

            (Self::Integer, Value::Number(n)) => {
                if n.is_i64() || n.is_u64() {
                    Some(value.clone())
                } else {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| Value::from(f as i64))
                }
            }
            (Self::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),

            (Self::Number, Value::Number(_)) => Some(value.clone()),
            (Self::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),

            (Self::Boolean, Value::Bool(_)) => Some(value.clone()),
            (Self::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },

            (Self::Object, Value::Object(_)) | (Self::Array, Value::Array(_)) => {
                Some(value.clone())
            }
            _ => None,
        }
    }
}

fn json_kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One declared argument of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub description: String,

    /// Anchored regular expression a string argument must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, kind: FieldKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: description.into(),
            pattern: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: FieldKind, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }
}

/// The declared input schema of a tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub fields: Vec<FieldSpec>,
}

impl ToolSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }

    /// Render as a JSON Schema object for the model gateway.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        for field in &self.fields {
            let mut prop = serde_json::json!({
                "type": field.kind.as_str(),
                "description": field.description,
            });
            if let Some(pattern) = &field.pattern {
                prop["pattern"] = Value::String(pattern.clone());
            }
            properties.insert(field.name.clone(), prop);
        }
        let required: Vec<&str> = self.required_fields().map(|f| f.name.as_str()).collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Structured result of a successful tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Short human-readable summary
    pub summary: String,

    /// Structured payload
    #[serde(default)]
    pub data: Value,
}

impl ToolOutput {
    pub fn new(summary: impl Into<String>, data: Value) -> Self {
        Self {
            summary: summary.into(),
            data,
        }
    }

    /// Text form fed back to the model.
    pub fn render(&self) -> String {
        if self.data.is_null() {
            return self.summary.clone();
        }
        format!("{}\n{}", self.summary, self.data)
    }
}

/// The core Tool trait.
///
/// Each customer-service capability (order lookup, refunds, shipment
/// tracking) implements this trait. Handlers classify their own failures
/// through [`ToolError`] so the orchestrator can decide whether to feed them
/// back to the model or abort.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "lookup_order").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// The declared input schema.
    fn schema(&self) -> ToolSchema;

    /// Run the tool. Arguments have already been validated and coerced.
    async fn invoke(&self, arguments: Value) -> std::result::Result<ToolOutput, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.schema().to_json_schema(),
        }
    }
}

struct RegisteredTool {
    tool: Box<dyn Tool>,
    schema: ToolSchema,
    patterns: HashMap<String, Regex>,
}

/// A registry of available tools.
///
/// Populated at startup, then shared read-only (`Arc<ToolRegistry>`) by
/// every request. The orchestrator uses it to:
/// 1. Get tool definitions to send to the model
/// 2. Validate arguments before dispatch
/// 3. Look up and invoke tools by name
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails if the name is taken or a pattern does not compile.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }

        let schema = tool.schema();
        let mut patterns = HashMap::new();
        for field in &schema.fields {
            if let Some(pattern) = &field.pattern {
                // Anchors already present in the pattern are harmless inside the group.
                let anchored = format!("^(?:{pattern})$");
                let regex = Regex::new(&anchored).map_err(|e| RegistryError::InvalidSchema {
                    tool_name: name.clone(),
                    reason: format!("field '{}': {e}", field.name),
                })?;
                patterns.insert(field.name.clone(), regex);
            }
        }

        tracing::debug!(tool = %name, fields = schema.fields.len(), "Registered tool");
        self.tools.insert(
            name,
            RegisteredTool {
                tool,
                schema,
                patterns,
            },
        );
        Ok(())
    }

    /// Look up a tool by name.
    pub fn resolve(&self, name: &str) -> Result<&dyn Tool, RegistryError> {
        self.tools
            .get(name)
            .map(|t| t.tool.as_ref())
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))
    }

    /// The declared schema of a registered tool.
    pub fn schema(&self, name: &str) -> Option<&ToolSchema> {
        self.tools.get(name).map(|t| &t.schema)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Check arguments against the tool's declared schema.
    ///
    /// Purely structural: required fields present, values coercible to the
    /// declared kind, string patterns matched. Returns the coerced arguments;
    /// undeclared fields pass through untouched.
    pub fn validate(&self, name: &str, arguments: &Value) -> Result<Value, ValidationError> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| ValidationError::UnknownTool(name.to_string()))?;

        let Value::Object(args) = arguments else {
            return Err(ValidationError::NotAnObject {
                tool_name: name.to_string(),
            });
        };

        let mut coerced = args.clone();
        for field in &entry.schema.fields {
            let value = match args.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(ValidationError::MissingField {
                        tool_name: name.to_string(),
                        field: field.name.clone(),
                    });
                }
                None | Some(Value::Null) => continue,
                Some(value) => value,
            };

            let converted = field.kind.coerce(value).ok_or_else(|| ValidationError::TypeMismatch {
                tool_name: name.to_string(),
                field: field.name.clone(),
                expected: field.kind.as_str(),
                found: json_kind_name(value).to_string(),
            })?;

            if let (Some(regex), Value::String(s)) = (entry.patterns.get(&field.name), &converted) {
                if !regex.is_match(s) {
                    return Err(ValidationError::PatternMismatch {
                        tool_name: name.to_string(),
                        field: field.name.clone(),
                        pattern: field.pattern.clone().unwrap_or_default(),
                    });
                }
            }

            coerced.insert(field.name.clone(), converted);
        }

        Ok(Value::Object(coerced))
    }

    /// Get all tool definitions (for sending to the model), sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.tool.name().to_string(),
                description: t.tool.description().to_string(),
                parameters: t.schema.to_json_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
