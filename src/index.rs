//! Vector index abstraction and the Pinecone data-plane client.
//!
//! Upsert is idempotent by ID: writing an ID again replaces its vector and
//! metadata. Document vectors use `kb-<record id>` and section vectors use
//! `kb-<record id>-chunk-<n>`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::{credential, IndexConfig};
use crate::models::{IndexEntry, IndexMatch, VectorMetadata};

const UPSERT_BATCH: usize = 100;
const API_VERSION: &str = "2024-07";

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn name(&self) -> &str;

    async fn upsert(&self, entries: &[IndexEntry]) -> Result<usize>;

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>>;

    async fn delete(&self, ids: &[String]) -> Result<()>;
}

/// Base vector ID for a remote record.
pub fn document_id(record_id: u64) -> String {
    format!("kb-{}", record_id)
}

pub fn chunk_id(record_id: u64, index: usize) -> String {
    format!("kb-{}-chunk-{}", record_id, index)
}

/// Truncate to at most `limit` characters.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte, _)) => text[..byte].to_string(),
        None => text.to_string(),
    }
}

/// Read stored metadata leniently: numbers may come back as floats and any
/// field may be missing.
pub fn metadata_from_json(value: &Value) -> VectorMetadata {
    let s = |key: &str| {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let n = |key: &str, default: i64| {
        value
            .get(key)
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
            .unwrap_or(default)
    };
    VectorMetadata {
        text: s("text"),
        title: s("title"),
        source: s("source"),
        date: s("date"),
        post_type: s("post_type"),
        url: s("url"),
        tags: s("tags"),
        key_concepts: s("key_concepts"),
        synthetic_questions: s("synthetic_questions"),
        section_header: s("section_header"),
        chunk_index: n("chunk_index", -1),
        total_chunks: n("total_chunks", 1),
    }
}

pub fn create_index(config: &IndexConfig) -> Result<Box<dyn VectorIndex>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledIndex)),
        "pinecone" => Ok(Box::new(PineconeIndex::new(config)?)),
        other => bail!("Unknown index provider: {}", other),
    }
}

// ============ Disabled ============

/// Used when `index.provider = "disabled"`. Every call fails.
pub struct DisabledIndex;

#[async_trait]
impl VectorIndex for DisabledIndex {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn upsert(&self, _entries: &[IndexEntry]) -> Result<usize> {
        bail!("Vector index is disabled")
    }

    async fn query(&self, _vector: &[f32], _top_k: usize) -> Result<Vec<IndexMatch>> {
        bail!("Vector index is disabled")
    }

    async fn delete(&self, _ids: &[String]) -> Result<()> {
        bail!("Vector index is disabled")
    }
}

// ============ Pinecone ============

/// Pinecone serverless index, addressed by its data-plane host.
/// Requires `PINECONE_API_KEY`.
pub struct PineconeIndex {
    client: reqwest::Client,
    host: String,
    namespace: Option<String>,
    api_key: String,
}

impl PineconeIndex {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let api_key = credential("PINECONE_API_KEY")?;
        let host = config
            .host
            .clone()
            .ok_or_else(|| anyhow::anyhow!("index.host required for Pinecone"))?;
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host
        } else {
            format!("https://{}", host)
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            namespace: config.namespace.clone(),
            api_key,
        })
    }

    async fn post(&self, path: &str, mut body: Value) -> Result<Value> {
        if let (Some(ns), Some(obj)) = (&self.namespace, body.as_object_mut()) {
            obj.insert("namespace".into(), json!(ns));
        }
        let response = self
            .client
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Pinecone {} error {}: {}", path, status, text);
        }
        Ok(response.json().await.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    fn name(&self) -> &str {
        "pinecone"
    }

    async fn upsert(&self, entries: &[IndexEntry]) -> Result<usize> {
        let mut total = 0;
        for batch in entries.chunks(UPSERT_BATCH) {
            let vectors: Vec<Value> = batch
                .iter()
                .map(|e| {
                    json!({
                        "id": e.id,
                        "values": e.values,
                        "metadata": e.metadata,
                    })
                })
                .collect();
            let resp = self
                .post("/vectors/upsert", json!({ "vectors": vectors }))
                .await?;
            total += resp
                .get("upsertedCount")
                .and_then(|v| v.as_u64())
                .map(|n| n as usize)
                .unwrap_or(batch.len());
        }
        tracing::debug!(vectors = total, "upserted vectors");
        Ok(total)
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>> {
        let resp = self
            .post(
                "/query",
                json!({
                    "vector": vector,
                    "topK": top_k,
                    "includeMetadata": true,
                }),
            )
            .await?;

        let matches = resp
            .get("matches")
            .and_then(|m| m.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(matches
            .iter()
            .filter_map(|m| {
                Some(IndexMatch {
                    id: m.get("id")?.as_str()?.to_string(),
                    score: m.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0) as f32,
                    metadata: m
                        .get("metadata")
                        .map(metadata_from_json)
                        .unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.post("/vectors/delete", json!({ "ids": ids })).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids() {
        assert_eq!(document_id(42), "kb-42");
        assert_eq!(chunk_id(42, 3), "kb-42-chunk-3");
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_metadata_from_json_float_numbers() {
        let value = json!({
            "text": "body",
            "title": "T",
            "chunk_index": 2.0,
            "total_chunks": 4.0,
        });
        let meta = metadata_from_json(&value);
        assert_eq!(meta.text, "body");
        assert_eq!(meta.chunk_index, 2);
        assert_eq!(meta.total_chunks, 4);
        assert_eq!(meta.section_header, "");
    }

    #[test]
    fn test_metadata_defaults() {
        let meta = metadata_from_json(&json!({}));
        assert_eq!(meta.chunk_index, -1);
        assert_eq!(meta.total_chunks, 1);
    }

    #[tokio::test]
    async fn test_disabled_index_errors() {
        let index = create_index(&IndexConfig::default()).unwrap();
        assert_eq!(index.name(), "disabled");
        assert!(index.query(&[0.0], 5).await.is_err());
    }
}
