//! In-memory [`DocumentStore`] and [`VectorIndex`] implementations.
//!
//! Used by tests and offline runs. State lives behind `std::sync::RwLock`;
//! vector queries are brute-force cosine similarity. The document store
//! assigns slugs the way WordPress does: from the title, suffixed `-2`,
//! `-3`, ... on collision, and left unchanged by updates.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::cms::{tag_slug, DocumentStore};
use crate::embedding::cosine_similarity;
use crate::index::VectorIndex;
use crate::models::{IndexEntry, IndexMatch, RecordPayload, RemoteRecord};
use crate::slug::slugify;

pub use crate::embedding::HashEmbedder;

struct StoredRecord {
    record: RemoteRecord,
    payload: Option<RecordPayload>,
}

#[derive(Default)]
struct StoreState {
    records: BTreeMap<u64, StoredRecord>,
    tags: BTreeMap<String, u64>,
    seo: BTreeMap<u64, (Option<String>, Option<String>)>,
    next_id: u64,
}

/// In-memory document store.
pub struct InMemoryDocumentStore {
    base_url: String,
    link_prefix: String,
    state: RwLock<StoreState>,
    fail_titles: RwLock<HashSet<String>>,
    fail_seo: AtomicBool,
    fail_lookup: AtomicBool,
    creates: AtomicUsize,
    updates: AtomicUsize,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            base_url: "https://kb.test".to_string(),
            link_prefix: "kb".to_string(),
            state: RwLock::new(StoreState {
                next_id: 100,
                ..StoreState::default()
            }),
            fail_titles: RwLock::new(HashSet::new()),
            fail_seo: AtomicBool::new(false),
            fail_lookup: AtomicBool::new(false),
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
        }
    }

    /// Seed a record directly, bypassing slug assignment.
    pub fn insert_record(&self, slug: &str, title: &str) -> u64 {
        let mut state = self.state.write().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        let record = self.make_record(id, slug, title);
        state.records.insert(
            id,
            StoredRecord {
                record,
                payload: None,
            },
        );
        id
    }

    pub fn record(&self, id: u64) -> Option<RemoteRecord> {
        let state = self.state.read().unwrap();
        state.records.get(&id).map(|r| r.record.clone())
    }

    pub fn payload(&self, id: u64) -> Option<RecordPayload> {
        let state = self.state.read().unwrap();
        state.records.get(&id).and_then(|r| r.payload.clone())
    }

    pub fn records(&self) -> Vec<RemoteRecord> {
        let state = self.state.read().unwrap();
        state.records.values().map(|r| r.record.clone()).collect()
    }

    pub fn tag_names(&self) -> Vec<String> {
        let state = self.state.read().unwrap();
        state.tags.keys().cloned().collect()
    }

    pub fn seo_for(&self, id: u64) -> Option<(Option<String>, Option<String>)> {
        self.state.read().unwrap().seo.get(&id).cloned()
    }

    /// Make create/update fail for payloads with this title.
    pub fn fail_on_title(&self, title: &str) {
        self.fail_titles.write().unwrap().insert(title.to_string());
    }

    pub fn set_fail_seo(&self, fail: bool) {
        self.fail_seo.store(fail, Ordering::SeqCst);
    }

    /// Make slug lookups fail the way an overloaded server would.
    pub fn set_fail_lookup(&self, fail: bool) {
        self.fail_lookup.store(fail, Ordering::SeqCst);
    }

    /// Stamp a record's publication and modification dates.
    pub fn set_dates(&self, id: u64, date: &str, modified: &str) {
        let mut state = self.state.write().unwrap();
        if let Some(stored) = state.records.get_mut(&id) {
            stored.record.date = date.to_string();
            stored.record.modified = modified.to_string();
        }
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    fn make_record(&self, id: u64, slug: &str, title: &str) -> RemoteRecord {
        RemoteRecord {
            id,
            slug: slug.to_string(),
            title: title.to_string(),
            link: self.fallback_url(slug),
            status: "publish".to_string(),
            date: String::new(),
            modified: String::new(),
        }
    }

    fn check_failure(&self, payload: &RecordPayload) -> Result<()> {
        if self.fail_titles.read().unwrap().contains(&payload.title) {
            bail!("500 Internal Server Error: simulated failure for '{}'", payload.title);
        }
        Ok(())
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn unique_slug(taken: &BTreeSet<String>, base: &str) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}-{}", base, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<RemoteRecord>> {
        if self.fail_lookup.load(Ordering::SeqCst) {
            bail!("Slug lookup failed: 503 Service Unavailable");
        }
        let state = self.state.read().unwrap();
        Ok(state
            .records
            .values()
            .find(|r| r.record.slug == slug)
            .map(|r| r.record.clone()))
    }

    async fn get(&self, id: u64) -> Result<Option<RemoteRecord>> {
        Ok(self.record(id))
    }

    async fn create(&self, payload: &RecordPayload) -> Result<RemoteRecord> {
        self.check_failure(payload)?;
        let mut state = self.state.write().unwrap();
        let taken: BTreeSet<String> = state.records.values().map(|r| r.record.slug.clone()).collect();
        let mut base = slugify(&payload.title);
        if base.is_empty() {
            base = "untitled".to_string();
        }
        let slug = unique_slug(&taken, &base);

        let id = state.next_id;
        state.next_id += 1;
        let record = self.make_record(id, &slug, &payload.title);
        state.records.insert(
            id,
            StoredRecord {
                record: record.clone(),
                payload: Some(payload.clone()),
            },
        );
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    async fn update(&self, id: u64, payload: &RecordPayload) -> Result<RemoteRecord> {
        self.check_failure(payload)?;
        let mut state = self.state.write().unwrap();
        let Some(stored) = state.records.get_mut(&id) else {
            bail!("404 Not Found: record {}", id);
        };
        stored.record.title = payload.title.clone();
        stored.payload = Some(payload.clone());
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(stored.record.clone())
    }

    async fn resolve_tag(&self, name: &str) -> Result<Option<u64>> {
        let slug = tag_slug(name);
        let mut state = self.state.write().unwrap();
        if let Some(id) = state.tags.get(&slug) {
            return Ok(Some(*id));
        }
        let id = state.next_id;
        state.next_id += 1;
        state.tags.insert(slug, id);
        Ok(Some(id))
    }

    async fn update_seo(
        &self,
        id: u64,
        keyword: Option<&str>,
        description: Option<&str>,
    ) -> Result<bool> {
        if self.fail_seo.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let mut state = self.state.write().unwrap();
        state.seo.insert(
            id,
            (keyword.map(String::from), description.map(String::from)),
        );
        Ok(true)
    }

    async fn list_all(&self) -> Result<Vec<RemoteRecord>> {
        Ok(self.records())
    }

    async fn delete(&self, id: u64) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.records.remove(&id).is_none() {
            bail!("404 Not Found: record {}", id);
        }
        Ok(())
    }

    fn fallback_url(&self, slug: &str) -> String {
        format!("{}/{}/{}/", self.base_url, self.link_prefix, slug)
    }
}

// ============ Vector index ============

/// In-memory vector index.
pub struct InMemoryVectorIndex {
    entries: RwLock<BTreeMap<String, IndexEntry>>,
    fail: AtomicBool,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            fail: AtomicBool::new(false),
        }
    }

    /// Make every call fail, as an unreachable service would.
    pub fn set_unavailable(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.read().unwrap().keys().cloned().collect()
    }

    pub fn entry(&self, id: &str) -> Option<IndexEntry> {
        self.entries.read().unwrap().get(id).cloned()
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("vector index unreachable");
        }
        Ok(())
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert(&self, entries: &[IndexEntry]) -> Result<usize> {
        self.check()?;
        let mut map = self.entries.write().unwrap();
        for entry in entries {
            map.insert(entry.id.clone(), entry.clone());
        }
        Ok(entries.len())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>> {
        self.check()?;
        let map = self.entries.read().unwrap();
        let mut matches: Vec<IndexMatch> = map
            .values()
            .map(|e| IndexMatch {
                id: e.id.clone(),
                score: cosine_similarity(vector, &e.values),
                metadata: e.metadata.clone(),
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        self.check()?;
        let mut map = self.entries.write().unwrap();
        for id in ids {
            map.remove(id);
        }
        Ok(())
    }
}
