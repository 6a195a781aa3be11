//! Core data models shared by the sync pipeline.
//!
//! These types represent the local documents, remote records, vector entries
//! and per-file results that flow between the orchestrator and its
//! collaborators.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::PathBuf;

use crate::error::SyncFailure;
use crate::frontmatter::Frontmatter;

/// One markdown file, read fresh for every sync pass.
#[derive(Debug, Clone)]
pub struct Document {
    /// Path relative to the knowledge-base root, `/`-separated.
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub frontmatter: Frontmatter,
    pub body: String,
}

/// A record as reported by the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: u64,
    pub slug: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub status: String,
    /// Publication and last-modified timestamps, as the store reports them.
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub modified: String,
}

/// Custom-field bundle attached to a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CustomFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_summary: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub synthetic_questions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub key_concepts: Vec<String>,
}

impl CustomFields {
    pub fn is_empty(&self) -> bool {
        self.semantic_summary.is_none()
            && self.synthetic_questions.is_empty()
            && self.key_concepts.is_empty()
    }

    /// Repeater-style JSON: `[{question}]` and `[{concept}]` rows.
    pub fn to_json(&self) -> Value {
        let mut acf = Map::new();
        if let Some(s) = &self.semantic_summary {
            acf.insert("semantic_summary".into(), json!(s));
        }
        if !self.synthetic_questions.is_empty() {
            let rows: Vec<Value> = self
                .synthetic_questions
                .iter()
                .map(|q| json!({ "question": q }))
                .collect();
            acf.insert("synthetic_questions".into(), Value::Array(rows));
        }
        if !self.key_concepts.is_empty() {
            let rows: Vec<Value> = self
                .key_concepts
                .iter()
                .map(|c| json!({ "concept": c }))
                .collect();
            acf.insert("key_concepts".into(), Value::Array(rows));
        }
        Value::Object(acf)
    }
}

/// Body of a create or update request.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordPayload {
    pub title: String,
    /// Rendered HTML.
    pub content: String,
    pub status: String,
    /// `[parent, fine]` topic IDs.
    pub topics: Vec<u64>,
    pub tag_ids: Vec<u64>,
    pub excerpt: Option<String>,
    pub date: Option<String>,
    pub custom_fields: CustomFields,
}

impl RecordPayload {
    /// Serialise using the store's taxonomy field names.
    pub fn to_json(&self, topic_taxonomy: &str, tag_taxonomy: &str) -> Value {
        let mut body = Map::new();
        body.insert("title".into(), json!(self.title));
        body.insert("content".into(), json!(self.content));
        body.insert("status".into(), json!(self.status));
        body.insert(topic_taxonomy.into(), json!(self.topics));
        body.insert(tag_taxonomy.into(), json!(self.tag_ids));
        if let Some(excerpt) = &self.excerpt {
            body.insert("excerpt".into(), json!(excerpt));
        }
        if let Some(date) = &self.date {
            body.insert("date".into(), json!(date));
        }
        if !self.custom_fields.is_empty() {
            body.insert("acf".into(), self.custom_fields.to_json());
        }
        Value::Object(body)
    }
}

/// A retrieval excerpt of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub index: usize,
    /// `"Introduction"` for lead text, empty when the body has no sections.
    pub section_header: String,
    /// Embedding input: shared preamble followed by the section text.
    pub content: String,
    /// Section text without the preamble.
    pub raw_text: String,
}

/// Metadata stored alongside each vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub text: String,
    pub title: String,
    pub source: String,
    pub date: String,
    pub post_type: String,
    pub url: String,
    pub tags: String,
    pub key_concepts: String,
    pub synthetic_questions: String,
    pub section_header: String,
    /// `-1` for a whole-document vector.
    pub chunk_index: i64,
    pub total_chunks: i64,
}

/// One vector to upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: VectorMetadata,
}

/// A ranked query result.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMatch {
    pub id: String,
    pub score: f32,
    pub metadata: VectorMetadata,
}

impl IndexMatch {
    /// Vector ID with any `-chunk-<n>` suffix removed.
    pub fn base_id(&self) -> &str {
        match self.id.rsplit_once("-chunk-") {
            Some((base, _)) => base,
            None => &self.id,
        }
    }
}

/// Terminal state of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Created,
    Updated,
    Skipped,
    DryRun,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Created => "created",
            SyncStatus::Updated => "updated",
            SyncStatus::Skipped => "skipped",
            SyncStatus::DryRun => "dry_run",
            SyncStatus::Error => "error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SyncStatus::Created | SyncStatus::Updated)
    }
}

/// Outcome of the secondary SEO metadata call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeoOutcome {
    Updated,
    Failed,
}

/// Outcome of the vector index write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndexOutcome {
    Upserted { vectors: usize },
    Disabled,
    Failed { message: String },
}

/// Per-file sync result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncResult {
    pub file: String,
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seo: Option<SeoOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexOutcome>,
    /// Number of vectors written, used to prune stale chunk IDs next time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SyncFailure>,
}

impl SyncResult {
    pub fn new(file: impl Into<String>, status: SyncStatus) -> Self {
        Self {
            file: file.into(),
            status,
            record_id: None,
            title: None,
            slug: None,
            url: None,
            topics: Vec::new(),
            seo: None,
            index: None,
            chunk_count: None,
            reason: None,
            error: None,
        }
    }

    pub fn skipped(file: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut result = Self::new(file, SyncStatus::Skipped);
        result.reason = Some(reason.into());
        result
    }

    pub fn failed(file: impl Into<String>, failure: SyncFailure) -> Self {
        let mut result = Self::new(file, SyncStatus::Error);
        result.error = Some(failure);
        result
    }
}

/// Counts per status for a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub dry_run: usize,
    pub errors: usize,
}

impl SyncSummary {
    pub fn from_results(results: &[SyncResult]) -> Self {
        let mut summary = Self::default();
        for r in results {
            match r.status {
                SyncStatus::Created => summary.created += 1,
                SyncStatus::Updated => summary.updated += 1,
                SyncStatus::Skipped => summary.skipped += 1,
                SyncStatus::DryRun => summary.dry_run += 1,
                SyncStatus::Error => summary.errors += 1,
            }
        }
        summary
    }
}
