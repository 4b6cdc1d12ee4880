//! Agent-facing tools over an opened index.
//!
//! Tools are registered in a [`ToolRegistry`] and exposed by the HTTP
//! server via `GET /tools/list` for discovery and `POST /tools/{name}` for
//! invocation.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              ToolRegistry                │
//! │  ┌─────────┐ ┌────────────┐ ┌─────────┐ │
//! │  │ search  │ │ list_files │ │read_file│ │
//! │  └─────────┘ └────────────┘ └─────────┘ │
//! │  + custom Rust tools                     │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!      ToolContext → IndexClient → engine / source
//! ```
//!
//! # Usage
//!
//! ```rust
//! use context_connectors::tools::ToolRegistry;
//!
//! let mut tools = ToolRegistry::with_builtins();
//! // tools.register(Box::new(MyTool::new()));
//! assert_eq!(tools.len(), 3);
//! ```

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::client::IndexClient;

// ═══════════════════════════════════════════════════════════════════════
// Tool Trait
// ═══════════════════════════════════════════════════════════════════════

/// A tool that agents can discover and call.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use serde_json::{json, Value};
/// use context_connectors::tools::{Tool, ToolContext};
///
/// pub struct IndexInfoTool;
///
/// #[async_trait]
/// impl Tool for IndexInfoTool {
///     fn name(&self) -> &str { "index_info" }
///     fn description(&self) -> &str { "Describe the loaded index" }
///
///     fn parameters_schema(&self) -> Value {
///         json!({ "type": "object", "properties": {} })
///     }
///
///     async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
///         let client = ctx.client()?;
///         Ok(json!({ "key": client.key(), "source": client.metadata() }))
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Route name (`POST /tools/{name}`). Lowercase with underscores.
    fn name(&self) -> &str;

    /// One-line description for agent discovery.
    fn description(&self) -> &str;

    /// Whether this tool ships with the crate. Defaults to `false`.
    fn is_builtin(&self) -> bool {
        false
    }

    /// JSON Schema (`type: "object"`) for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute with parameters already checked by [`validate_params`].
    ///
    /// The returned value is wrapped in `{ "result": ... }` by the server.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Serializable tool info for the `/tools/list` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub builtin: bool,
    pub parameters: Value,
}

impl ToolInfo {
    pub fn from_tool(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            builtin: tool.is_builtin(),
            parameters: tool.parameters_schema(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// ToolContext
// ═══════════════════════════════════════════════════════════════════════

/// What a tool can reach while executing: the index the server was
/// started with, if any.
#[derive(Clone, Default)]
pub struct ToolContext {
    client: Option<Arc<IndexClient>>,
}

impl ToolContext {
    pub fn new(client: Option<Arc<IndexClient>>) -> Self {
        Self { client }
    }

    /// The opened index, or an error if the server runs without one.
    pub fn client(&self) -> Result<&IndexClient> {
        self.client
            .as_deref()
            .ok_or_else(|| anyhow!("no index loaded; start the server with --key"))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in Tool Implementations
// ═══════════════════════════════════════════════════════════════════════

/// Searches the loaded index.
pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the indexed content"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Natural-language or keyword query" },
                "max_output_length": { "type": "integer", "description": "Truncate the formatted results to this many characters" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = params["query"].as_str().unwrap_or("");
        if query.trim().is_empty() {
            bail!("query must not be empty");
        }
        let max = params["max_output_length"].as_u64().map(|n| n as usize);

        let results = ctx.client()?.search(query, max).await?;
        Ok(json!({ "results": results }))
    }
}

/// Lists files from the index's source.
pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files in the indexed source, optionally under a directory"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "directory": { "type": "string", "description": "Directory relative to the source root" }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let dir = params["directory"].as_str();
        let files = ctx.client()?.list_files(dir).await?;
        Ok(json!({ "files": files }))
    }
}

/// Reads one file from the index's source.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the indexed source"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the source root" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let path = params["path"].as_str().unwrap_or("");
        if path.trim().is_empty() {
            bail!("path must not be empty");
        }
        match ctx.client()?.read_file(path).await? {
            Some(contents) => Ok(json!({ "path": path, "contents": contents })),
            None => bail!("file not found: {}", path),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Parameter validation
// ═══════════════════════════════════════════════════════════════════════

/// Check `params` against a tool's schema.
///
/// Required properties must be present, present properties must have the
/// declared JSON type, and missing properties with a `default` receive it.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => bail!("parameters must be a JSON object, got {}", json_type_name(other)),
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>())
        .unwrap_or_default();
    for field in required {
        if !params_obj.contains_key(field) {
            bail!("missing required parameter: {}", field);
        }
    }

    let mut result = params_obj.clone();
    for (name, prop_schema) in &properties {
        match params_obj.get(name) {
            Some(value) => {
                let Some(expected) = prop_schema.get("type").and_then(|t| t.as_str()) else {
                    continue;
                };
                let type_ok = match expected {
                    "string" => value.is_string(),
                    "integer" => value.is_i64() || value.is_u64(),
                    "number" => value.is_number(),
                    "boolean" => value.is_boolean(),
                    "array" => value.is_array(),
                    "object" => value.is_object(),
                    _ => true,
                };
                if !type_ok {
                    bail!(
                        "parameter '{}' must be of type '{}', got {}",
                        name,
                        expected,
                        json_type_name(value)
                    );
                }
            }
            None => {
                if let Some(default) = prop_schema.get("default") {
                    result.insert(name.clone(), default.clone());
                }
            }
        }
    }

    Ok(Value::Object(result))
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

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Registry of built-in and custom tools.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// A registry holding `search`, `list_files`, and `read_file`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchTool));
        registry.register(Box::new(ListFilesTool));
        registry.register(Box::new(ReadFileTool));
        registry
    }

    /// Register a tool. Lookups return the first tool registered under a name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = ToolRegistry::with_builtins();
        let names: Vec<_> = registry.tools().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["search", "list_files", "read_file"]);
        assert!(registry.find("read_file").unwrap().is_builtin());
        assert!(registry.find("get").is_none());
    }

    #[test]
    fn test_validate_params() {
        let schema = SearchTool.parameters_schema();
        assert!(validate_params(&schema, &json!({})).unwrap_err().to_string().contains("query"));
        assert!(validate_params(&schema, &json!({ "query": 5 }))
            .unwrap_err()
            .to_string()
            .contains("must be of type 'string'"));
        assert!(validate_params(&schema, &json!([1])).is_err());
        let ok = validate_params(&schema, &json!({ "query": "deploy" })).unwrap();
        assert_eq!(ok["query"], "deploy");
    }

    #[tokio::test]
    async fn test_tools_require_loaded_index() {
        let ctx = ToolContext::default();
        let err = SearchTool
            .execute(json!({ "query": "x" }), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no index loaded"));
    }
}
