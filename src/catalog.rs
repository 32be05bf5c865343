// Swarm Gate - Tool Catalog
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Static registry of every tool the server can expose. Loaded once from
// tools.yaml at startup and immutable afterwards. A single bad entry
// aborts startup: a half-loaded catalog would advertise the wrong
// capabilities to the client.

use indexmap::IndexMap;
use jsonschema::{Draft, Validator};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Reserved task type for discovery tools. Hidden from the default view.
pub const META_OPS: &str = "meta-ops";

/// Scope that bypasses every per-tool authorization check.
pub const ADMIN_SCOPE: &str = "admin";

/// Name fragments that mark a tool as destructive for the startup audit.
const DESTRUCTIVE_MARKERS: &[&str] = &["remove", "delete", "scale", "stop"];

/// Ordered name -> tool mapping. Order is catalog order unless a filter
/// stage re-sorts it.
pub type ToolSet = IndexMap<String, Arc<Tool>>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("tool catalog not found at {0}")]
    NotFound(PathBuf),
    #[error("failed to read tool catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("tool catalog is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("tool catalog structure invalid: {0}")]
    Structure(String),
    #[error("tool '{name}' is invalid: {reason}")]
    InvalidTool { name: String, reason: String },
    #[error("duplicate tool name '{0}'")]
    Duplicate(String),
    #[error("tool catalog is empty")]
    Empty,
}

// ============================================================================
// TOOL DEFINITION - one entry of tools.yaml
// ============================================================================

/// Declarative form of a tool, exactly as it appears in the catalog file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_schema: Option<Value>,
    pub response_schema: Value,
    pub task_types: Vec<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_scopes: Option<Vec<String>>,
}

/// Effective authorization set, resolved once at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    /// Explicit `required_scopes` from the catalog.
    Scopes(BTreeSet<String>),
    /// No explicit scopes: the tool's task types stand in for them.
    TaskTypes(BTreeSet<String>),
}

impl Authorization {
    fn resolve(def: &ToolDefinition) -> Self {
        match &def.required_scopes {
            Some(scopes) => Self::Scopes(scopes.iter().cloned().collect()),
            None => Self::TaskTypes(def.task_types.iter().cloned().collect()),
        }
    }

    pub fn set(&self) -> &BTreeSet<String> {
        match self {
            Self::Scopes(s) | Self::TaskTypes(s) => s,
        }
    }

    /// Admin passes everything; otherwise the caller needs one shared scope.
    pub fn permits(&self, caller: &BTreeSet<String>) -> bool {
        caller.contains(ADMIN_SCOPE) || !self.set().is_disjoint(caller)
    }
}

/// First violation reported by a compiled schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub message: String,
    /// JSON pointer into the validated instance ("" = root).
    pub instance_path: String,
    pub schema_path: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.instance_path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} (at {})", self.message, self.instance_path)
        }
    }
}

#[derive(Clone)]
pub struct CompiledSchema(Arc<Validator>);

impl CompiledSchema {
    fn compile(schema: &Value) -> Result<Self, String> {
        jsonschema::options()
            .with_draft(Draft::Draft7)
            .build(schema)
            .map(|v| Self(Arc::new(v)))
            .map_err(|err| format!("invalid schema: {err}"))
    }

    pub fn check(&self, instance: &Value) -> Result<(), SchemaViolation> {
        match self.0.iter_errors(instance).next() {
            None => Ok(()),
            Some(err) => Err(SchemaViolation {
                message: err.to_string(),
                instance_path: err.instance_path.to_string(),
                schema_path: err.schema_path.to_string(),
            }),
        }
    }
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompiledSchema")
    }
}

// ============================================================================
// TOOL - validated, schema-compiled catalog entry
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    #[serde(flatten)]
    def: ToolDefinition,
    #[serde(skip)]
    authorization: Authorization,
    #[serde(skip)]
    request_validator: Option<CompiledSchema>,
    #[serde(skip)]
    response_validator: CompiledSchema,
}

impl Tool {
    pub fn new(def: ToolDefinition) -> Result<Self, CatalogError> {
        let invalid = |reason: String| CatalogError::InvalidTool {
            name: def.name.clone(),
            reason,
        };

        if def.name.trim().is_empty() {
            return Err(invalid("name must not be empty".into()));
        }
        if def.task_types.is_empty() {
            return Err(invalid("task_types must not be empty".into()));
        }
        if !def.response_schema.is_object() {
            return Err(invalid("response_schema must be a JSON object".into()));
        }
        let response_validator = CompiledSchema::compile(&def.response_schema)
            .map_err(|e| invalid(format!("response_schema: {e}")))?;

        let request_validator = match &def.request_schema {
            None => None,
            Some(schema) if schema.is_object() => Some(
                CompiledSchema::compile(schema)
                    .map_err(|e| invalid(format!("request_schema: {e}")))?,
            ),
            Some(_) => return Err(invalid("request_schema must be a JSON object".into())),
        };

        Ok(Self {
            authorization: Authorization::resolve(&def),
            def,
            request_validator,
            response_validator,
        })
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn description(&self) -> &str {
        &self.def.description
    }

    pub fn definition(&self) -> &ToolDefinition {
        &self.def
    }

    pub fn task_types(&self) -> &[String] {
        &self.def.task_types
    }

    pub fn has_task_type(&self, task_type: &str) -> bool {
        self.def.task_types.iter().any(|t| t == task_type)
    }

    pub fn priority(&self) -> i64 {
        self.def.priority
    }

    pub fn request_schema(&self) -> Option<&Value> {
        self.def.request_schema.as_ref()
    }

    pub fn authorization(&self) -> &Authorization {
        &self.authorization
    }

    pub fn is_destructive(&self) -> bool {
        let name = self.def.name.to_lowercase();
        DESTRUCTIVE_MARKERS.iter().any(|m| name.contains(m))
    }

    /// Arguments are unconstrained when the tool declares no request schema.
    pub fn validate_arguments(&self, args: &Value) -> Result<(), SchemaViolation> {
        match &self.request_validator {
            Some(schema) => schema.check(args),
            None => Ok(()),
        }
    }

    pub fn validate_output(&self, output: &Value) -> Result<(), SchemaViolation> {
        self.response_validator.check(output)
    }

    /// MCP `inputSchema`: always an object schema with `properties` and
    /// `required`, carrying over any other keys from `request_schema`.
    pub fn input_schema(&self) -> Value {
        let source = self.def.request_schema.as_ref().and_then(Value::as_object);
        let mut schema = Map::new();
        schema.insert("type".into(), json!("object"));
        schema.insert(
            "properties".into(),
            source
                .and_then(|s| s.get("properties"))
                .cloned()
                .unwrap_or_else(|| json!({})),
        );
        schema.insert(
            "required".into(),
            source
                .and_then(|s| s.get("required"))
                .cloned()
                .unwrap_or_else(|| json!([])),
        );
        if let Some(source) = source {
            for (key, value) in source {
                if !matches!(key.as_str(), "type" | "properties" | "required") {
                    schema.insert(key.clone(), value.clone());
                }
            }
        }
        Value::Object(schema)
    }

    /// Wire descriptor advertised by `tools/list`.
    pub fn descriptor(&self) -> Value {
        json!({
            "name": self.def.name,
            "description": self.def.description,
            "inputSchema": self.input_schema(),
        })
    }
}

// ============================================================================
// CATALOG
// ============================================================================

#[derive(Debug, Clone)]
pub struct Catalog {
    tools: ToolSet,
}

impl Catalog {
    /// Load and validate the catalog file. Every failure is fatal.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        if !path.exists() {
            return Err(CatalogError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_yaml_str(&text)?;
        log::info!("Loaded {} tools from {:?}", catalog.len(), path);
        Ok(catalog)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, CatalogError> {
        let doc: serde_yaml::Value = serde_yaml::from_str(text)?;
        let root = doc
            .as_mapping()
            .ok_or_else(|| CatalogError::Structure("top level must be a mapping".into()))?;
        let entries = root
            .get("tools")
            .ok_or_else(|| CatalogError::Structure("missing 'tools' key".into()))?
            .as_sequence()
            .ok_or_else(|| CatalogError::Structure("'tools' must be a list".into()))?;

        let mut defs = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let def: ToolDefinition =
                serde_yaml::from_value(entry.clone()).map_err(|e| CatalogError::InvalidTool {
                    name: entry_label(entry, index),
                    reason: e.to_string(),
                })?;
            defs.push(def);
        }
        Self::from_definitions(defs)
    }

    pub fn from_definitions(defs: Vec<ToolDefinition>) -> Result<Self, CatalogError> {
        let mut tools = ToolSet::with_capacity(defs.len());
        for def in defs {
            let tool = Tool::new(def)?;
            let name = tool.name().to_string();
            if tools.contains_key(&name) {
                return Err(CatalogError::Duplicate(name));
            }
            tools.insert(name, Arc::new(tool));
        }
        if tools.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(Self { tools })
    }

    /// Copy of the full set. Tools are shared, the map is not.
    pub fn get_all(&self) -> ToolSet {
        self.tools.clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Tool>> {
        self.tools.values()
    }

    /// Task type -> member tool names, task types sorted by name.
    pub fn task_type_groups(&self) -> BTreeMap<String, Vec<String>> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for tool in self.tools.values() {
            for task_type in tool.task_types() {
                groups
                    .entry(task_type.clone())
                    .or_default()
                    .push(tool.name().to_string());
            }
        }
        groups
    }

    /// Destructive tools that anyone holding a matching task-type scope may call.
    pub fn security_warnings(&self) -> Vec<String> {
        self.tools
            .values()
            .filter(|t| t.is_destructive() && t.definition().required_scopes.is_none())
            .map(|t| {
                format!(
                    "Destructive tool '{}' has no required_scopes; falls back to task types {:?}",
                    t.name(),
                    t.task_types()
                )
            })
            .collect()
    }
}

fn entry_label(entry: &serde_yaml::Value, index: usize) -> String {
    entry
        .get("name")
        .and_then(serde_yaml::Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{index}"))
}

// ============================================================================
// TEST FIXTURES
// ============================================================================


// ============================================================================
// TESTS
// ============================================================================
