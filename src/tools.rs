//! Tool-style entry points over the sync engine.
//!
//! Each tool takes a JSON object of parameters and answers with a JSON
//! object carrying an explicit `status`. Recoverable problems (missing file,
//! unknown folder, unreachable index) are reported as `"status": "error"`
//! payloads; `Err` is reserved for failures the caller cannot act on.
//!
//! | Tool | Writes? |
//! |------|---------|
//! | `search_knowledge` | no |
//! | `list_kb_files` | no |
//! | `read_kb_file` | no |
//! | `preview_sync` | no |
//! | `sync_single_file` | yes |
//! | `sync_kb_folder` | yes |

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::Component;
use std::sync::Arc;

use crate::config::Config;
use crate::connector_fs;
use crate::models::{SyncStatus, SyncSummary};
use crate::search;
use crate::sync::SyncEngine;

/// A callable tool.
///
/// `name` doubles as the route (`POST /tools/{name}`); `parameters_schema`
/// is a JSON Schema object with `type`, `properties` and `required`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> Value;

    /// Run with parameters already checked by [`validate_params`].
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// What a tool can reach while executing.
#[derive(Clone)]
pub struct ToolContext {
    engine: Arc<SyncEngine>,
}

impl ToolContext {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn config(&self) -> &Config {
        self.engine.config()
    }
}

/// Serializable tool info for `GET /tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

fn error_payload(message: impl Into<String>) -> Value {
    json!({ "status": "error", "message": message.into() })
}

/// Folder argument with leading slashes removed; empty means everything.
fn folder_param(params: &Value) -> Option<String> {
    params["folder"]
        .as_str()
        .map(|f| f.trim().trim_start_matches('/').to_string())
        .filter(|f| !f.is_empty())
}

fn folder_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "folder": {
                "type": "string",
                "description": "Folder prefix relative to the knowledge-base root, e.g. \"AI/\". Empty for everything.",
                "default": ""
            }
        }
    })
}

fn path_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": {
                "type": "string",
                "description": "File path relative to the knowledge-base root, e.g. \"AI/3_methods/01_intro.md\""
            }
        },
        "required": ["path"]
    })
}

/// Relative path that stays under the root.
fn is_contained(path: &str) -> bool {
    std::path::Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

// ============ Read-only tools ============

pub struct SearchKnowledgeTool;

#[async_trait]
impl Tool for SearchKnowledgeTool {
    fn name(&self) -> &str {
        "search_knowledge"
    }

    fn description(&self) -> &str {
        "Search the knowledge base by semantic similarity; use before external research"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Natural language question or search terms" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = params["query"].as_str().unwrap_or("").trim();
        if query.is_empty() {
            return Ok(error_payload("query must not be empty"));
        }
        let engine = ctx.engine();
        let outcome = search::search_knowledge(
            query,
            engine.embedder().as_ref(),
            engine.index().as_ref(),
            &ctx.config().search,
        )
        .await;
        Ok(json!({
            "status": outcome.status(),
            "report": outcome.render(),
            "outcome": outcome,
        }))
    }
}

pub struct ListKbFilesTool;

#[async_trait]
impl Tool for ListKbFilesTool {
    fn name(&self) -> &str {
        "list_kb_files"
    }

    fn description(&self) -> &str {
        "List syncable markdown files, optionally under one folder"
    }

    fn parameters_schema(&self) -> Value {
        folder_schema()
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let kb = &ctx.config().kb;
        let folder = folder_param(&params);
        if let Some(folder) = &folder {
            if !is_contained(folder) || !kb.root.join(folder).is_dir() {
                return Ok(error_payload(format!("Folder not found in KB: {}", folder)));
            }
        }
        let files = match connector_fs::scan_kb(kb, folder.as_deref()) {
            Ok(files) => files,
            Err(e) => return Ok(error_payload(format!("{:#}", e))),
        };
        let paths: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        Ok(json!({
            "status": "ok",
            "count": paths.len(),
            "files": paths,
        }))
    }
}

pub struct ReadKbFileTool;

#[async_trait]
impl Tool for ReadKbFileTool {
    fn name(&self) -> &str {
        "read_kb_file"
    }

    fn description(&self) -> &str {
        "Read the raw markdown of a knowledge-base file, frontmatter included"
    }

    fn parameters_schema(&self) -> Value {
        path_schema()
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let path = params["path"].as_str().unwrap_or("").trim_start_matches('/');
        if path.is_empty() || !is_contained(path) {
            return Ok(error_payload(format!("Invalid path: {}", path)));
        }
        let full = ctx.config().kb.root.join(path);
        if !full.exists() {
            return Ok(error_payload(format!("File not found: {}", path)));
        }
        if !full.is_file() {
            return Ok(error_payload(format!("Path is not a file: {}", path)));
        }
        match std::fs::read_to_string(&full) {
            Ok(content) => Ok(json!({
                "status": "ok",
                "path": path,
                "content": content,
            })),
            Err(e) => Ok(error_payload(format!("Failed to read {}: {}", path, e))),
        }
    }
}

pub struct PreviewSyncTool;

#[async_trait]
impl Tool for PreviewSyncTool {
    fn name(&self) -> &str {
        "preview_sync"
    }

    fn description(&self) -> &str {
        "Dry-run a sync and report which files would be created or updated"
    }

    fn parameters_schema(&self) -> Value {
        folder_schema()
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let folder = folder_param(&params);
        let results = match ctx.engine().sync_all(true, folder.as_deref()).await {
            Ok(results) => results,
            Err(e) => return Ok(error_payload(format!("Error running preview: {:#}", e))),
        };
        let summary = SyncSummary::from_results(&results);
        let would_sync: Vec<Value> = results
            .iter()
            .filter(|r| r.status == SyncStatus::DryRun)
            .map(|r| {
                json!({
                    "file": r.file,
                    "title": r.title,
                    "slug": r.slug,
                    "topics": r.topics,
                })
            })
            .collect();
        Ok(json!({
            "status": "ok",
            "would_sync": summary.dry_run,
            "skipped": summary.skipped,
            "errors": summary.errors,
            "files": would_sync,
        }))
    }
}

// ============ Write tools ============

pub struct SyncSingleFileTool;

#[async_trait]
impl Tool for SyncSingleFileTool {
    fn name(&self) -> &str {
        "sync_single_file"
    }

    fn description(&self) -> &str {
        "Publish one knowledge-base file to the CMS and vector index (write operation)"
    }

    fn parameters_schema(&self) -> Value {
        path_schema()
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let path = params["path"].as_str().unwrap_or("").trim();
        if path.is_empty() {
            return Ok(error_payload("path must not be empty"));
        }
        let result = ctx.engine().sync_file_by_path(path, false).await;
        Ok(json!({
            "status": result.status.as_str(),
            "result": serde_json::to_value(&result)?,
        }))
    }
}

pub struct SyncKbFolderTool;

#[async_trait]
impl Tool for SyncKbFolderTool {
    fn name(&self) -> &str {
        "sync_kb_folder"
    }

    fn description(&self) -> &str {
        "Publish every file under a folder to the CMS and vector index (write operation)"
    }

    fn parameters_schema(&self) -> Value {
        folder_schema()
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let folder = folder_param(&params);
        let results = match ctx.engine().sync_all(false, folder.as_deref()).await {
            Ok(results) => results,
            Err(e) => return Ok(error_payload(format!("{:#}", e))),
        };
        let summary = SyncSummary::from_results(&results);
        let errors: Vec<Value> = results
            .iter()
            .filter(|r| r.status == SyncStatus::Error)
            .map(|r| {
                json!({
                    "file": r.file,
                    "title": r.title,
                    "error": r.error,
                })
            })
            .collect();
        Ok(json!({
            "status": "ok",
            "processed": results.len(),
            "summary": summary,
            "errors": errors,
        }))
    }
}

// ============ Registry ============

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry with every knowledge-base tool.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchKnowledgeTool));
        registry.register(Box::new(ListKbFilesTool));
        registry.register(Box::new(ReadKbFileTool));
        registry.register(Box::new(PreviewSyncTool));
        registry.register(Box::new(SyncSingleFileTool));
        registry.register(Box::new(SyncKbFolderTool));
        registry
    }

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

    pub fn infos(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Validate and run a tool by name.
    pub async fn call(&self, name: &str, params: &Value, ctx: &ToolContext) -> Result<Value> {
        let Some(tool) = self.find(name) else {
            bail!("no tool registered with name: {}", name);
        };
        let params = validate_params(&tool.parameters_schema(), params)?;
        tool.execute(params, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Parameter validation ============

/// Check required fields, types and enums, and fill in schema defaults.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => bail!("parameters must be an object, got {}", json_type_name(other)),
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    for field in &required {
        if !params_obj.contains_key(*field) {
            bail!("missing required parameter: {}", field);
        }
    }

    let mut result = params_obj.clone();
    for (prop_name, prop_schema) in &properties {
        match params_obj.get(prop_name) {
            Some(value) => {
                if let Some(expected) = prop_schema.get("type").and_then(|t| t.as_str()) {
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
                            prop_name,
                            expected,
                            json_type_name(value)
                        );
                    }
                }
                if let Some(allowed) = prop_schema.get("enum").and_then(|e| e.as_array()) {
                    if !allowed.contains(value) {
                        let names: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
                        bail!(
                            "parameter '{}' must be one of [{}], got {}",
                            prop_name,
                            names.join(", "),
                            value
                        );
                    }
                }
            }
            None => {
                if let Some(default) = prop_schema.get("default") {
                    result.insert(prop_name.clone(), default.clone());
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
