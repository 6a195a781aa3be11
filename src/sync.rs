//! Sync orchestration.
//!
//! Drives each file through the pipeline:
//!
//! ```text
//! read → empty body? → SKIPPED
//!      → derive title / slug / topics / tags / date
//!      → dry run? → DRY_RUN
//!      → resolve tags → build payload
//!      → identity map hit? → UPDATE by ID
//!        else slug lookup hit? → UPDATE by ID
//!        else → CREATE
//!      → SEO metadata (non-fatal)
//!      → vector upsert (non-fatal)
//! ```
//!
//! Files are processed one at a time. A failing file becomes an ERROR result
//! and the batch continues. The identity map is loaded once per batch and
//! saved once at the end with every CREATED/UPDATED file.

use anyhow::{Context, Result};
use chrono::Local;
use std::path::Path;
use std::sync::Arc;

use crate::chunk::{chunk_document, ChunkContext};
use crate::cms::{DocumentStore, WordPressClient};
use crate::config::Config;
use crate::connector_fs::{self, KbFile};
use crate::embedding::{create_embedder, Embedder};
use crate::error::{SyncError, SyncFailure};
use crate::identity_map::{IdentityMap, MapEntry};
use crate::index::{chunk_id, create_index, document_id, truncate_chars, VectorIndex};
use crate::markdown::markdown_to_html;
use crate::models::{
    CustomFields, Document, IndexEntry, IndexOutcome, RecordPayload, SeoOutcome, SyncResult,
    SyncStatus, VectorMetadata,
};
use crate::slug::{hierarchical_slug, title_from_filename};
use crate::taxonomy::TopicResolver;

/// Everything derived from a document before any remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedDocument {
    pub rel_path: String,
    pub title: String,
    pub slug: String,
    pub topics: Vec<u64>,
    pub tags: Vec<String>,
    pub excerpt: Option<String>,
    pub date: Option<String>,
    pub keyword: Option<String>,
    pub meta_description: Option<String>,
    pub semantic_summary: Option<String>,
    pub synthetic_questions: Vec<String>,
    pub key_concepts: Vec<String>,
    pub html: String,
    pub body: String,
}

impl PreparedDocument {
    pub fn payload(&self, tag_ids: Vec<u64>) -> RecordPayload {
        RecordPayload {
            title: self.title.clone(),
            content: self.html.clone(),
            status: "publish".to_string(),
            topics: self.topics.clone(),
            tag_ids,
            excerpt: self.excerpt.clone(),
            date: self.date.clone(),
            custom_fields: CustomFields {
                semantic_summary: self.semantic_summary.clone(),
                synthetic_questions: self.synthetic_questions.clone(),
                key_concepts: self.key_concepts.clone(),
            },
        }
    }

    fn chunk_context(&self) -> ChunkContext<'_> {
        ChunkContext {
            title: &self.title,
            semantic_summary: self.semantic_summary.as_deref(),
            synthetic_questions: &self.synthetic_questions,
            key_concepts: &self.key_concepts,
            tags: &self.tags,
        }
    }

    /// Embedding input for a whole-document vector.
    fn full_text(&self) -> String {
        match &self.semantic_summary {
            Some(summary) => format!("{}\n\n{}\n\n{}", self.title, summary, self.body),
            None => format!("{}\n\n{}", self.title, self.body),
        }
    }
}

pub struct SyncEngine {
    config: Arc<Config>,
    store: Arc<dyn DocumentStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    topics: TopicResolver,
}

impl SyncEngine {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn DocumentStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        topics: TopicResolver,
    ) -> Self {
        Self {
            config,
            store,
            index,
            embedder,
            topics,
        }
    }

    /// Build the engine against the configured remote services.
    pub async fn connect(config: Arc<Config>) -> Result<Self> {
        let store: Arc<dyn DocumentStore> =
            Arc::new(WordPressClient::new(&config.cms, &config.kb.link_prefix)?);
        let index: Arc<dyn VectorIndex> = Arc::from(create_index(&config.index)?);
        let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding)?);
        let topics = resolve_topics(&config, store.as_ref()).await;
        Ok(Self::new(config, store, index, embedder, topics))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    fn vectors_enabled(&self) -> bool {
        self.index.name() != "disabled" && self.embedder.model_name() != "disabled"
    }

    /// Derive title, slug, topics and payload fields from a parsed document.
    pub fn prepare(&self, doc: &Document) -> PreparedDocument {
        let fm = &doc.frontmatter;
        let rel = Path::new(&doc.rel_path);
        let file_name = rel
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        PreparedDocument {
            rel_path: doc.rel_path.clone(),
            title: fm.title().unwrap_or_else(|| title_from_filename(&file_name)),
            slug: fm
                .slug()
                .unwrap_or_else(|| hierarchical_slug(rel, Path::new(""))),
            topics: self.topics.topics(&doc.rel_path, fm.topic()),
            tags: fm.tags(),
            excerpt: fm.excerpt(),
            date: fm.updated(),
            keyword: fm.primary_keyword(),
            meta_description: fm.meta_description(),
            semantic_summary: fm.semantic_summary(),
            synthetic_questions: fm.synthetic_questions(),
            key_concepts: fm.key_concepts(),
            html: markdown_to_html(&doc.body, &self.config.kb.link_prefix),
            body: doc.body.clone(),
        }
    }

    /// Sync one file against a loaded identity map. Never fails; problems
    /// come back as an ERROR result.
    pub async fn sync_file(&self, file: &KbFile, map: &IdentityMap, dry_run: bool) -> SyncResult {
        let doc = match connector_fs::read_document(file) {
            Ok(doc) => doc,
            Err(e) => {
                let err = if file.abs_path.exists() {
                    SyncError::Io(format!("{:#}", e))
                } else {
                    SyncError::NotFound(file.abs_path.display().to_string())
                };
                return SyncResult::failed(&file.rel_path, err.into());
            }
        };

        if doc.body.trim().is_empty() {
            return SyncResult::skipped(&file.rel_path, "No body content");
        }

        let prepared = self.prepare(&doc);

        if dry_run {
            let mut result = SyncResult::new(&file.rel_path, SyncStatus::DryRun);
            result.title = Some(prepared.title);
            result.slug = Some(prepared.slug);
            result.topics = prepared.topics;
            return result;
        }

        match self.publish(&prepared, map.lookup(&file.rel_path)).await {
            Ok(result) => result,
            Err(err) => {
                let mut result = SyncResult::failed(&file.rel_path, SyncFailure::from(&err));
                result.title = Some(prepared.title);
                result.slug = Some(prepared.slug);
                result
            }
        }
    }

    async fn publish(
        &self,
        prepared: &PreparedDocument,
        known: Option<&MapEntry>,
    ) -> Result<SyncResult, SyncError> {
        let mut tag_ids = Vec::with_capacity(prepared.tags.len());
        for tag in &prepared.tags {
            let resolved = self
                .store
                .resolve_tag(tag)
                .await
                .with_context(|| format!("Tag '{}'", tag))
                .map_err(SyncError::remote)?;
            if let Some(id) = resolved {
                tag_ids.push(id);
            }
        }

        let payload = prepared.payload(tag_ids);

        // The remote ID survives slug and title edits; slugs do not.
        let (record, status) = match known {
            Some(entry) => {
                let record = self
                    .store
                    .update(entry.record_id, &payload)
                    .await
                    .map_err(SyncError::remote)?;
                (record, SyncStatus::Updated)
            }
            None => match self
                .store
                .find_by_slug(&prepared.slug)
                .await
                .map_err(SyncError::remote)?
            {
                Some(existing) => {
                    let record = self
                        .store
                        .update(existing.id, &payload)
                        .await
                        .map_err(SyncError::remote)?;
                    (record, SyncStatus::Updated)
                }
                None => {
                    let record = self
                        .store
                        .create(&payload)
                        .await
                        .map_err(SyncError::remote)?;
                    (record, SyncStatus::Created)
                }
            },
        };

        let url = if record.link.is_empty() {
            self.store.fallback_url(&prepared.slug)
        } else {
            record.link.clone()
        };

        let mut result = SyncResult::new(&prepared.rel_path, status);
        result.record_id = Some(record.id);
        result.title = Some(prepared.title.clone());
        result.slug = Some(prepared.slug.clone());
        result.url = Some(url.clone());
        result.topics = prepared.topics.clone();

        if prepared.keyword.is_some() || prepared.meta_description.is_some() {
            result.seo = Some(self.update_seo(record.id, prepared).await);
        }

        let previous_chunks = known
            .filter(|e| e.record_id == record.id)
            .map(|e| e.chunk_count);
        let (outcome, chunk_count) = self
            .write_vectors(record.id, prepared, &url, previous_chunks)
            .await;
        result.index = Some(outcome);
        result.chunk_count = chunk_count;

        Ok(result)
    }

    async fn update_seo(&self, id: u64, prepared: &PreparedDocument) -> SeoOutcome {
        match self
            .store
            .update_seo(
                id,
                prepared.keyword.as_deref(),
                prepared.meta_description.as_deref(),
            )
            .await
        {
            Ok(true) => SeoOutcome::Updated,
            Ok(false) => {
                tracing::warn!(file = %prepared.rel_path, "SEO metadata update rejected");
                SeoOutcome::Failed
            }
            Err(e) => {
                tracing::warn!(file = %prepared.rel_path, "SEO metadata update failed: {:#}", e);
                SeoOutcome::Failed
            }
        }
    }

    /// Build the vectors for one record. Returns the entries and, in
    /// per-section mode, the chunk count to remember.
    async fn build_entries(
        &self,
        record_id: u64,
        prepared: &PreparedDocument,
        url: &str,
    ) -> Result<(Vec<IndexEntry>, Option<usize>), SyncError> {
        let limit = self.config.index.metadata_text_limit;
        let base = VectorMetadata {
            text: String::new(),
            title: prepared.title.clone(),
            source: self.store.fallback_url(&prepared.slug),
            date: prepared
                .date
                .clone()
                .unwrap_or_else(|| Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()),
            post_type: self.config.index.post_type.clone(),
            url: url.to_string(),
            tags: prepared.tags.join(","),
            key_concepts: prepared.key_concepts.join(","),
            synthetic_questions: prepared.synthetic_questions.join(" | "),
            section_header: String::new(),
            chunk_index: -1,
            total_chunks: 1,
        };

        if !self.config.index.chunk_documents {
            let content = prepared.full_text();
            let values = self
                .embedder
                .embed_one(&content)
                .await
                .map_err(SyncError::embedding)?;
            let entry = IndexEntry {
                id: document_id(record_id),
                values,
                metadata: VectorMetadata {
                    text: truncate_chars(&content, limit),
                    ..base
                },
            };
            return Ok((vec![entry], None));
        }

        let chunks = chunk_document(&prepared.chunk_context(), &prepared.body);
        let inputs: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self
            .embedder
            .embed(&inputs)
            .await
            .map_err(SyncError::embedding)?;
        if vectors.len() != chunks.len() {
            return Err(SyncError::Embedding(format!(
                "expected {} vectors, got {}",
                chunks.len(),
                vectors.len()
            )));
        }

        let total = chunks.len() as i64;
        let entries = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, values)| IndexEntry {
                id: chunk_id(record_id, chunk.index),
                values,
                metadata: VectorMetadata {
                    text: truncate_chars(&chunk.raw_text, limit),
                    section_header: chunk.section_header.clone(),
                    chunk_index: chunk.index as i64,
                    total_chunks: total,
                    ..base.clone()
                },
            })
            .collect();
        Ok((entries, Some(chunks.len())))
    }

    /// Upsert the record's vectors and drop IDs left over from a longer
    /// previous version. Failures are reported, not raised.
    async fn write_vectors(
        &self,
        record_id: u64,
        prepared: &PreparedDocument,
        url: &str,
        previous_chunks: Option<Option<usize>>,
    ) -> (IndexOutcome, Option<usize>) {
        if !self.vectors_enabled() {
            return (IndexOutcome::Disabled, None);
        }

        let (entries, chunk_count) = match self.build_entries(record_id, prepared, url).await {
            Ok(built) => built,
            Err(e) => {
                tracing::warn!(file = %prepared.rel_path, "{}", e);
                return (
                    IndexOutcome::Failed {
                        message: e.to_string(),
                    },
                    None,
                );
            }
        };

        let vectors = match self.index.upsert(&entries).await {
            Ok(n) => n,
            Err(e) => {
                let err = SyncError::index(e);
                tracing::warn!(file = %prepared.rel_path, "{}", err);
                return (
                    IndexOutcome::Failed {
                        message: err.to_string(),
                    },
                    None,
                );
            }
        };

        let stale = stale_vector_ids(record_id, chunk_count, previous_chunks);
        if !stale.is_empty() {
            if let Err(e) = self.index.delete(&stale).await {
                tracing::warn!(file = %prepared.rel_path, "Failed to delete stale vectors: {:#}", e);
            }
        }

        (IndexOutcome::Upserted { vectors }, chunk_count)
    }

    /// Sync every file under the root, optionally restricted to a path
    /// prefix. Errors only when the root cannot be scanned or the identity
    /// map cannot be written.
    pub async fn sync_all(&self, dry_run: bool, filter: Option<&str>) -> Result<Vec<SyncResult>> {
        let files = connector_fs::scan_kb(&self.config.kb, filter)?;
        let mut map = IdentityMap::load(self.config.kb.mapping_path());

        let mut results = Vec::with_capacity(files.len());
        for file in &files {
            let result = self.sync_file(file, &map, dry_run).await;
            log_result(&result);
            results.push(result);
        }

        if !dry_run {
            let recorded = record_results(&mut map, &results);
            if recorded > 0 {
                map.save().context("Failed to save identity map")?;
                tracing::info!(entries = recorded, path = %map.path().display(), "identity map saved");
            }
        }

        Ok(results)
    }

    /// Sync one file given a root-relative or absolute path. A successful
    /// create or update is written to the identity map immediately.
    pub async fn sync_file_by_path(&self, path: &str, dry_run: bool) -> SyncResult {
        let file = connector_fs::resolve_path(&self.config.kb.root, path);
        if !file.abs_path.is_file() {
            let err = SyncError::NotFound(file.abs_path.display().to_string());
            return SyncResult::failed(&file.rel_path, err.into());
        }

        let mut map = IdentityMap::load(self.config.kb.mapping_path());
        let result = self.sync_file(&file, &map, dry_run).await;
        log_result(&result);

        if !dry_run && record_results(&mut map, std::slice::from_ref(&result)) > 0 {
            if let Err(e) = map.save() {
                tracing::error!("Failed to save identity map: {:#}", e);
            }
        }
        result
    }
}

/// Fetch the remote topic table when enabled, falling back to the
/// configured one on any failure or empty answer.
pub async fn resolve_topics(config: &Config, store: &dyn DocumentStore) -> TopicResolver {
    let resolver = TopicResolver::from_config(&config.taxonomy);
    if !config.taxonomy.fetch_remote {
        return resolver;
    }
    match store.topic_mapping().await {
        Ok(mapping) if !mapping.is_empty() => {
            tracing::info!(topics = mapping.len(), "topic mapping fetched from CMS");
            resolver.with_mapping(&mapping)
        }
        Ok(_) => resolver,
        Err(e) => {
            tracing::debug!("Topic endpoint unavailable, using configured mapping: {:#}", e);
            resolver
        }
    }
}

/// Vector IDs that a previous, longer sync left behind.
fn stale_vector_ids(
    record_id: u64,
    chunk_count: Option<usize>,
    previous: Option<Option<usize>>,
) -> Vec<String> {
    let Some(previous) = previous else {
        return Vec::new();
    };
    match (chunk_count, previous) {
        (Some(now), Some(before)) => (now..before).map(|i| chunk_id(record_id, i)).collect(),
        // Switched from a whole-document vector to sections.
        (Some(_), None) => vec![document_id(record_id)],
        // Switched from sections to a whole-document vector.
        (None, Some(before)) => (0..before).map(|i| chunk_id(record_id, i)).collect(),
        (None, None) => Vec::new(),
    }
}

/// Fold successful results into the map. Returns how many were recorded.
pub fn record_results(map: &mut IdentityMap, results: &[SyncResult]) -> usize {
    let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
    let mut recorded = 0;
    for result in results {
        if !result.status.is_success() {
            continue;
        }
        let Some(record_id) = result.record_id else {
            continue;
        };
        map.upsert(
            result.file.clone(),
            MapEntry {
                record_id,
                slug: result.slug.clone().unwrap_or_default(),
                url: result.url.clone().unwrap_or_default(),
                title: result.title.clone().unwrap_or_default(),
                last_synced: timestamp.clone(),
                chunk_count: result.chunk_count,
            },
        );
        recorded += 1;
    }
    recorded
}

fn log_result(result: &SyncResult) {
    match (&result.status, &result.error) {
        (SyncStatus::Error, Some(err)) => {
            tracing::warn!(file = %result.file, kind = ?err.kind, "sync failed: {}", err.message)
        }
        (status, _) => tracing::info!(file = %result.file, status = status.as_str(), "synced"),
    }
}
