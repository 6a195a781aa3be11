//! Reconciliation between remote records and local files.
//!
//! Every remote record is run through an ordered cascade of matchers; the
//! first one that names a local file wins and labels the match. From the
//! matches we derive:
//!
//! - **duplicates**: several records matched to one file (lowest ID kept)
//! - **orphan duplicates**: unmatched records whose slug, minus a trailing
//!   `-<digits>`, equals the slug of a matched record
//! - **clusters**: unmatched records sharing a base slug (lowest ID kept)
//!
//! Nothing is deleted unless asked. Rebuilding the identity map keeps the
//! lowest matched ID per file and writes the map atomically.

use anyhow::Result;
use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use crate::cms::DocumentStore;
use crate::config::KbConfig;
use crate::connector_fs::{self, KbFile};
use crate::frontmatter::parse_frontmatter;
use crate::identity_map::{IdentityMap, MapEntry};
use crate::models::RemoteRecord;
use crate::slug::{hierarchical_slug, slug_from_filename, slugify};

static NUMERIC_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"-\d+$").unwrap());

/// Slug with any `-<digits>` collision suffix removed.
pub fn base_slug(slug: &str) -> &str {
    match NUMERIC_SUFFIX.find(slug) {
        Some(m) => &slug[..m.start()],
        None => slug,
    }
}

// ============ File index ============

#[derive(Debug, Clone, PartialEq)]
pub struct LocalFile {
    pub rel_path: String,
    pub path_slug: String,
    pub filename_slug: String,
    pub frontmatter_slug: Option<String>,
}

impl LocalFile {
    pub fn read(file: &KbFile) -> Self {
        let rel = Path::new(&file.rel_path);
        let name = rel
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let frontmatter_slug = std::fs::read_to_string(&file.abs_path)
            .ok()
            .and_then(|text| parse_frontmatter(&text).0.slug());
        Self {
            rel_path: file.rel_path.clone(),
            path_slug: hierarchical_slug(rel, Path::new("")),
            filename_slug: slug_from_filename(&name),
            frontmatter_slug,
        }
    }
}

/// Lookup tables over the syncable files.
pub struct FileIndex {
    root: PathBuf,
    files: Vec<LocalFile>,
    by_path_slug: BTreeMap<String, usize>,
    by_filename_slug: BTreeMap<String, Vec<usize>>,
}

impl FileIndex {
    pub fn new(root: impl Into<PathBuf>, files: Vec<LocalFile>) -> Self {
        let mut by_path_slug = BTreeMap::new();
        let mut by_filename_slug: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, f) in files.iter().enumerate() {
            by_path_slug.insert(f.path_slug.clone(), i);
            by_filename_slug
                .entry(f.filename_slug.clone())
                .or_default()
                .push(i);
        }
        Self {
            root: root.into(),
            files,
            by_path_slug,
            by_filename_slug,
        }
    }

    pub fn scan(config: &KbConfig) -> Result<Self> {
        let files = connector_fs::scan_kb(config, None)?;
        Ok(Self::new(
            &config.root,
            files.iter().map(LocalFile::read).collect(),
        ))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> &[LocalFile] {
        &self.files
    }

    fn rel(&self, i: usize) -> String {
        self.files[i].rel_path.clone()
    }

    fn path_slugs(&self) -> impl Iterator<Item = (&String, &usize)> {
        self.by_path_slug.iter()
    }
}

// ============ Matchers ============

pub struct MatchContext<'a> {
    pub files: &'a FileIndex,
    /// Record ID → file from the existing identity map.
    pub known: &'a HashMap<u64, String>,
}

pub trait Matcher: Send + Sync {
    fn label(&self) -> &'static str;

    fn find(&self, record: &RemoteRecord, ctx: &MatchContext<'_>) -> Option<String>;
}

/// Record ID already in the identity map and the file still exists.
pub struct MappingMatcher;

impl Matcher for MappingMatcher {
    fn label(&self) -> &'static str {
        "mapping"
    }

    fn find(&self, record: &RemoteRecord, ctx: &MatchContext<'_>) -> Option<String> {
        let rel = ctx.known.get(&record.id)?;
        ctx.files.root.join(rel).is_file().then(|| rel.clone())
    }
}

pub struct PathSlugMatcher;

impl Matcher for PathSlugMatcher {
    fn label(&self) -> &'static str {
        "path_slug"
    }

    fn find(&self, record: &RemoteRecord, ctx: &MatchContext<'_>) -> Option<String> {
        ctx.files
            .by_path_slug
            .get(&record.slug)
            .map(|&i| ctx.files.rel(i))
    }
}

/// Slug equals a file-name slug shared by exactly one file.
pub struct FilenameSlugMatcher;

impl Matcher for FilenameSlugMatcher {
    fn label(&self) -> &'static str {
        "filename_slug"
    }

    fn find(&self, record: &RemoteRecord, ctx: &MatchContext<'_>) -> Option<String> {
        let slug = &record.slug;
        let (_, files) = ctx
            .files
            .by_filename_slug
            .iter()
            .find(|(name, _)| slug == *name || slug.ends_with(&format!("/{}", name)))?;
        match files.as_slice() {
            [only] => Some(ctx.files.rel(*only)),
            _ => None,
        }
    }
}

/// Slug is the trailing segment of a path slug.
pub struct PartialSlugMatcher;

impl Matcher for PartialSlugMatcher {
    fn label(&self) -> &'static str {
        "partial_slug"
    }

    fn find(&self, record: &RemoteRecord, ctx: &MatchContext<'_>) -> Option<String> {
        let suffix = format!("/{}", record.slug);
        ctx.files
            .path_slugs()
            .find(|(ps, _)| ps.ends_with(&suffix) || **ps == record.slug)
            .map(|(_, &i)| ctx.files.rel(i))
    }
}

pub struct TitleMatcher;

impl Matcher for TitleMatcher {
    fn label(&self) -> &'static str {
        "title_match"
    }

    fn find(&self, record: &RemoteRecord, ctx: &MatchContext<'_>) -> Option<String> {
        if record.title.is_empty() {
            return None;
        }
        let title_slug = slugify(&record.title);
        if title_slug.is_empty() {
            return None;
        }
        ctx.files
            .path_slugs()
            .find(|(ps, _)| {
                let last = ps.rsplit('/').next().unwrap_or_default();
                last == title_slug || **ps == title_slug
            })
            .map(|(_, &i)| ctx.files.rel(i))
    }
}

pub struct FrontmatterSlugMatcher;

impl Matcher for FrontmatterSlugMatcher {
    fn label(&self) -> &'static str {
        "frontmatter_slug"
    }

    fn find(&self, record: &RemoteRecord, ctx: &MatchContext<'_>) -> Option<String> {
        ctx.files
            .path_slugs()
            .map(|(_, &i)| &ctx.files.files[i])
            .find(|f| f.frontmatter_slug.as_deref() == Some(record.slug.as_str()))
            .map(|f| f.rel_path.clone())
    }
}

/// The cascade, in priority order.
pub fn default_matchers() -> Vec<Box<dyn Matcher>> {
    vec![
        Box::new(MappingMatcher),
        Box::new(PathSlugMatcher),
        Box::new(FilenameSlugMatcher),
        Box::new(PartialSlugMatcher),
        Box::new(TitleMatcher),
        Box::new(FrontmatterSlugMatcher),
    ]
}

// ============ Plan ============

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordMatch {
    pub record: RemoteRecord,
    pub file: Option<String>,
    pub method: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    pub file: String,
    pub keep: u64,
    pub delete: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlugCluster {
    pub base_slug: String,
    pub keep: u64,
    pub delete: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcilePlan {
    /// One entry per remote record, ordered by ID.
    pub matches: Vec<RecordMatch>,
    pub duplicates: Vec<DuplicateGroup>,
    pub orphan_duplicates: Vec<u64>,
    pub clusters: Vec<SlugCluster>,
    /// Unmatched records with no sibling, left alone.
    pub unmatched_unique: Vec<u64>,
}

impl ReconcilePlan {
    /// ` (slug=..., date=..., modified=...)` for a listed record, empty fields omitted.
    fn describe(&self, id: u64) -> String {
        let Some(m) = self.matches.iter().find(|m| m.record.id == id) else {
            return String::new();
        };
        let r = &m.record;
        let parts: Vec<String> = [("slug", &r.slug), ("date", &r.date), ("modified", &r.modified)]
            .into_iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        if parts.is_empty() {
            String::new()
        } else {
            format!(" ({})", parts.join(", "))
        }
    }

    pub fn matched_count(&self) -> usize {
        self.matches.iter().filter(|m| m.file.is_some()).count()
    }

    pub fn unmatched_count(&self) -> usize {
        self.matches.len() - self.matched_count()
    }

    pub fn method_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for method in self.matches.iter().filter_map(|m| m.method) {
            *counts.entry(method).or_insert(0) += 1;
        }
        counts
    }

    /// Every record ID the plan would delete.
    pub fn to_delete(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .duplicates
            .iter()
            .flat_map(|d| d.delete.iter().copied())
            .chain(self.orphan_duplicates.iter().copied())
            .chain(self.clusters.iter().flat_map(|c| c.delete.iter().copied()))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

pub fn match_records(
    records: &[RemoteRecord],
    files: &FileIndex,
    map: &IdentityMap,
    matchers: &[Box<dyn Matcher>],
) -> Vec<RecordMatch> {
    let known: HashMap<u64, String> = map
        .iter()
        .map(|(rel, entry)| (entry.record_id, rel.clone()))
        .collect();
    let ctx = MatchContext {
        files,
        known: &known,
    };

    let mut sorted: Vec<&RemoteRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.id);

    sorted
        .into_iter()
        .map(|record| {
            let hit = matchers
                .iter()
                .find_map(|m| m.find(record, &ctx).map(|file| (file, m.label())));
            RecordMatch {
                record: record.clone(),
                file: hit.as_ref().map(|(f, _)| f.clone()),
                method: hit.map(|(_, label)| label),
            }
        })
        .collect()
}

pub fn build_plan(matches: Vec<RecordMatch>) -> ReconcilePlan {
    let mut by_file: BTreeMap<&str, Vec<u64>> = BTreeMap::new();
    let mut matched_slugs: BTreeSet<&str> = BTreeSet::new();
    for m in &matches {
        if let Some(file) = &m.file {
            by_file.entry(file.as_str()).or_default().push(m.record.id);
            matched_slugs.insert(m.record.slug.as_str());
        }
    }

    let duplicates = by_file
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(file, mut ids)| {
            ids.sort_unstable();
            DuplicateGroup {
                file: file.to_string(),
                keep: ids[0],
                delete: ids[1..].to_vec(),
            }
        })
        .collect();

    let mut orphan_duplicates = Vec::new();
    let mut unknown: BTreeMap<&str, Vec<u64>> = BTreeMap::new();
    for m in matches.iter().filter(|m| m.file.is_none()) {
        let base = base_slug(&m.record.slug);
        if matched_slugs.contains(base) {
            orphan_duplicates.push(m.record.id);
        } else {
            unknown.entry(base).or_default().push(m.record.id);
        }
    }

    let mut clusters = Vec::new();
    let mut unmatched_unique = Vec::new();
    for (base, mut ids) in unknown {
        ids.sort_unstable();
        if ids.len() > 1 {
            clusters.push(SlugCluster {
                base_slug: base.to_string(),
                keep: ids[0],
                delete: ids[1..].to_vec(),
            });
        } else {
            unmatched_unique.extend(ids);
        }
    }

    ReconcilePlan {
        matches,
        duplicates,
        orphan_duplicates,
        clusters,
        unmatched_unique,
    }
}

pub fn plan(records: &[RemoteRecord], files: &FileIndex, map: &IdentityMap) -> ReconcilePlan {
    build_plan(match_records(records, files, map, &default_matchers()))
}

// ============ Actions ============

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeletionReport {
    pub deleted: Vec<u64>,
    pub failed: Vec<(u64, String)>,
}

pub async fn apply_deletions(store: &dyn DocumentStore, ids: &[u64]) -> DeletionReport {
    let mut report = DeletionReport::default();
    for (i, &id) in ids.iter().enumerate() {
        match store.delete(id).await {
            Ok(()) => report.deleted.push(id),
            Err(e) => {
                tracing::warn!(record_id = id, "Delete failed: {:#}", e);
                report.failed.push((id, format!("{:#}", e)));
            }
        }
        if (i + 1) % 20 == 0 {
            tracing::info!("Deleted {}/{}", i + 1, ids.len());
        }
    }
    report
}

/// New map entries: lowest matched record ID per file. Chunk counts carry
/// over when the file keeps the same record.
pub fn rebuild_entries(
    matches: &[RecordMatch],
    previous: &IdentityMap,
    store: &dyn DocumentStore,
) -> BTreeMap<String, MapEntry> {
    let mut best: BTreeMap<&str, &RemoteRecord> = BTreeMap::new();
    for m in matches {
        if let Some(file) = &m.file {
            best.entry(file.as_str())
                .and_modify(|cur| {
                    if m.record.id < cur.id {
                        *cur = &m.record;
                    }
                })
                .or_insert(&m.record);
        }
    }

    let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
    best.into_iter()
        .map(|(file, record)| {
            let chunk_count = previous
                .lookup(file)
                .filter(|e| e.record_id == record.id)
                .and_then(|e| e.chunk_count);
            let url = if record.link.is_empty() {
                store.fallback_url(&record.slug)
            } else {
                record.link.clone()
            };
            (
                file.to_string(),
                MapEntry {
                    record_id: record.id,
                    slug: record.slug.clone(),
                    url,
                    title: record.title.clone(),
                    last_synced: timestamp.clone(),
                    chunk_count,
                },
            )
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub delete: bool,
    pub rebuild: bool,
}

impl ReconcileOptions {
    pub fn analyze() -> Self {
        Self::default()
    }

    pub fn full() -> Self {
        Self {
            delete: true,
            rebuild: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebuildSummary {
    pub entries: usize,
    pub unmapped_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub local_files: usize,
    pub plan: ReconcilePlan,
    pub deletions: Option<DeletionReport>,
    pub rebuild: Option<RebuildSummary>,
}

pub async fn run_reconcile(
    store: &dyn DocumentStore,
    kb: &KbConfig,
    options: ReconcileOptions,
) -> Result<ReconcileReport> {
    let mut map = IdentityMap::load(kb.mapping_path());
    let files = FileIndex::scan(kb)?;
    tracing::info!(files = files.len(), mapped = map.len(), "reconciling");

    let records = store.list_all().await?;
    tracing::info!(records = records.len(), "fetched remote records");
    let mut current = plan(&records, &files, &map);

    let mut deletions = None;
    let to_delete = current.to_delete();
    if options.delete && !to_delete.is_empty() {
        deletions = Some(apply_deletions(store, &to_delete).await);
        if options.rebuild {
            let records = store.list_all().await?;
            current = plan(&records, &files, &map);
        }
    }

    let mut rebuild = None;
    if options.rebuild {
        let entries = rebuild_entries(&current.matches, &map, store);
        let unmapped_files = files
            .files()
            .iter()
            .filter(|f| !entries.contains_key(&f.rel_path))
            .map(|f| f.rel_path.clone())
            .collect();
        let count = entries.len();
        map.replace_all(entries);
        map.save()?;
        tracing::info!(entries = count, path = %map.path().display(), "identity map rebuilt");
        rebuild = Some(RebuildSummary {
            entries: count,
            unmapped_files,
        });
    }

    Ok(ReconcileReport {
        local_files: files.len(),
        plan: current,
        deletions,
        rebuild,
    })
}

impl ReconcileReport {
    pub fn render(&self) -> String {
        let plan = &self.plan;
        let mut out = Vec::new();
        out.push(format!("Local files (syncable): {}", self.local_files));
        out.push(format!("Records matched to files: {}", plan.matched_count()));
        out.push(format!("Records with no file match: {}", plan.unmatched_count()));
        let methods: Vec<String> = plan
            .method_counts()
            .iter()
            .map(|(m, n)| format!("{}={}", m, n))
            .collect();
        out.push(format!("Match methods: {}", methods.join(", ")));

        for dup in &plan.duplicates {
            out.push(format!("\n{}", dup.file));
            out.push(format!("  KEEP:   ID {}{}", dup.keep, plan.describe(dup.keep)));
            for id in &dup.delete {
                out.push(format!("  DELETE: ID {}{}", id, plan.describe(*id)));
            }
        }
        if !plan.orphan_duplicates.is_empty() {
            out.push(format!(
                "\nOrphan duplicates (slug-N): {}",
                plan.orphan_duplicates.len()
            ));
            for m in plan
                .matches
                .iter()
                .filter(|m| plan.orphan_duplicates.contains(&m.record.id))
            {
                out.push(format!("  DELETE: ID {} slug={}", m.record.id, m.record.slug));
            }
        }
        for cluster in &plan.clusters {
            out.push(format!("\nBase: {}", cluster.base_slug));
            out.push(format!("  KEEP:   ID {}", cluster.keep));
            for id in &cluster.delete {
                out.push(format!("  DELETE: ID {}", id));
            }
        }
        out.push(format!("\nTotal records to delete: {}", plan.to_delete().len()));

        if let Some(d) = &self.deletions {
            out.push(format!("Deleted: {}, Failed: {}", d.deleted.len(), d.failed.len()));
            for (id, err) in &d.failed {
                out.push(format!("  FAILED {}: {}", id, err));
            }
        }
        if let Some(r) = &self.rebuild {
            out.push(format!("Identity map entries: {}", r.entries));
            out.push(format!(
                "Files still unmapped (created on next sync): {}",
                r.unmapped_files.len()
            ));
            for f in &r.unmapped_files {
                out.push(format!("  {}", f));
            }
        }
        out.join("\n")
    }
}
