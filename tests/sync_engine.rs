use std::fs;
use std::path::Path;
use std::sync::Arc;

use kb_sync::config::{parse_config, Config};
use kb_sync::error::ErrorKind;
use kb_sync::identity_map::IdentityMap;
use kb_sync::memory::{HashEmbedder, InMemoryDocumentStore, InMemoryVectorIndex};
use kb_sync::models::{IndexOutcome, SeoOutcome, SyncStatus, SyncSummary};
use kb_sync::sync::SyncEngine;
use kb_sync::taxonomy::TopicResolver;
use tempfile::TempDir;

struct Harness {
    _tmp: TempDir,
    root: std::path::PathBuf,
    store: Arc<InMemoryDocumentStore>,
    index: Arc<InMemoryVectorIndex>,
    engine: SyncEngine,
}

fn config_for(root: &Path, extra: &str) -> Config {
    parse_config(&format!(
        r#"[kb]
root = "{}"

[cms]
site_url = "https://kb.test"
username = "agents"

[taxonomy]
fetch_remote = false
default_topic_id = 1
parent_topics = {{ AI = 10, GROWTH = 20 }}
topic_mapping = {{ "AI/3_methods" = 31 }}
{}
"#,
        root.display(),
        extra
    ))
    .unwrap()
}

fn harness_with(extra: &str) -> Harness {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    let config = config_for(&root, extra);
    let topics = TopicResolver::from_config(&config.taxonomy);
    let store = Arc::new(InMemoryDocumentStore::new());
    let index = Arc::new(InMemoryVectorIndex::new());
    let engine = SyncEngine::new(
        Arc::new(config),
        store.clone(),
        index.clone(),
        Arc::new(HashEmbedder::new(128)),
        topics,
    );
    Harness {
        _tmp: tmp,
        root,
        store,
        index,
        engine,
    }
}

fn harness() -> Harness {
    harness_with("")
}

impl Harness {
    fn write(&self, rel: &str, text: &str) {
        let path = self.root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    fn map(&self) -> IdentityMap {
        IdentityMap::load(self.root.join("kb_sync_mapping.json"))
    }
}

#[tokio::test]
async fn test_second_run_updates_instead_of_creating() {
    let h = harness();
    h.write("AI/3_methods/01_intro.md", "---\ntitle: Intro\n---\nWelcome to methods.");
    h.write("GROWTH/email.md", "Email playbook body.");

    let first = h.engine.sync_all(false, None).await.unwrap();
    let summary = SyncSummary::from_results(&first);
    assert_eq!(summary.created, 2);
    assert_eq!(summary.errors, 0);

    let second = h.engine.sync_all(false, None).await.unwrap();
    let summary = SyncSummary::from_results(&second);
    assert_eq!(summary.created, 0);
    assert_eq!(summary.updated, 2);

    assert_eq!(h.store.create_count(), 2);
    assert_eq!(h.store.records().len(), 2);
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.record_id, b.record_id);
    }
}

#[tokio::test]
async fn test_title_and_slug_change_updates_same_record() {
    let h = harness();
    h.write("guides/setup.md", "---\ntitle: Setup\n---\nInstall things.");
    let first = h.engine.sync_all(false, None).await.unwrap();
    let id = first[0].record_id.unwrap();

    h.write(
        "guides/setup.md",
        "---\ntitle: Setup Guide (Revised)\nslug: setup-guide-revised\n---\nInstall things carefully.",
    );
    let second = h.engine.sync_all(false, None).await.unwrap();

    assert_eq!(second[0].status, SyncStatus::Updated);
    assert_eq!(second[0].record_id, Some(id));
    assert_eq!(h.store.records().len(), 1);
    assert_eq!(h.store.record(id).unwrap().title, "Setup Guide (Revised)");

    let map = h.map();
    let entry = map.lookup("guides/setup.md").unwrap();
    assert_eq!(entry.record_id, id);
    assert_eq!(entry.slug, "setup-guide-revised");
    assert_eq!(entry.title, "Setup Guide (Revised)");
}

#[tokio::test]
async fn test_dry_run_has_no_side_effects() {
    let h = harness();
    h.write("AI/3_methods/01_intro.md", "Body text.");

    let results = h.engine.sync_all(true, None).await.unwrap();
    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert_eq!(r.status, SyncStatus::DryRun);
    assert_eq!(r.title.as_deref(), Some("Intro"));
    assert_eq!(r.slug.as_deref(), Some("ai/methods/intro"));
    assert_eq!(r.topics, vec![10, 31]);

    assert_eq!(h.store.create_count(), 0);
    assert_eq!(h.store.update_count(), 0);
    assert!(h.store.tag_names().is_empty());
    assert!(h.index.ids().is_empty());
    assert!(!h.root.join("kb_sync_mapping.json").exists());
}

#[tokio::test]
async fn test_failing_file_does_not_stop_batch() {
    let h = harness();
    h.write("a.md", "---\ntitle: Good One\n---\nFine.");
    h.write("b.md", "---\ntitle: Broken\n---\nWill fail.");
    h.write("c.md", "---\ntitle: Good Two\n---\nAlso fine.");
    h.store.fail_on_title("Broken");

    let results = h.engine.sync_all(false, None).await.unwrap();
    let statuses: Vec<SyncStatus> = results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![SyncStatus::Created, SyncStatus::Error, SyncStatus::Created]
    );
    let err = results[1].error.as_ref().unwrap();
    assert_eq!(err.kind, ErrorKind::Remote);
    assert!(err.message.contains("simulated failure"));

    let map = h.map();
    assert!(map.lookup("a.md").is_some());
    assert!(map.lookup("b.md").is_none());
    assert!(map.lookup("c.md").is_some());
}

#[tokio::test]
async fn test_empty_body_is_skipped() {
    let h = harness();
    h.write("empty.md", "---\ntitle: Nothing\n---\n   \n");
    let results = h.engine.sync_all(false, None).await.unwrap();
    assert_eq!(results[0].status, SyncStatus::Skipped);
    assert_eq!(results[0].reason.as_deref(), Some("No body content"));
    assert_eq!(h.store.create_count(), 0);
}

#[tokio::test]
async fn test_existing_record_adopted_by_slug() {
    let h = harness();
    let id = h.store.insert_record("guides/onboarding", "Onboarding");
    h.write("guides/onboarding.md", "Day one checklist.");

    let results = h.engine.sync_all(false, None).await.unwrap();
    assert_eq!(results[0].status, SyncStatus::Updated);
    assert_eq!(results[0].record_id, Some(id));
    assert_eq!(h.store.create_count(), 0);
    assert_eq!(h.map().lookup("guides/onboarding.md").unwrap().record_id, id);
}

#[tokio::test]
async fn test_failed_slug_lookup_is_an_error_not_a_create() {
    let h = harness();
    h.store.insert_record("guides/onboarding", "Onboarding");
    h.write("guides/onboarding.md", "Day one checklist.");
    h.store.set_fail_lookup(true);

    let results = h.engine.sync_all(false, None).await.unwrap();
    assert_eq!(results[0].status, SyncStatus::Error);
    let err = results[0].error.as_ref().unwrap();
    assert_eq!(err.kind, ErrorKind::Remote);
    assert!(err.message.contains("503"));
    assert_eq!(h.store.create_count(), 0);
    assert_eq!(h.store.records().len(), 1);
    assert!(h.map().lookup("guides/onboarding.md").is_none());

    h.store.set_fail_lookup(false);
    let retry = h.engine.sync_all(false, None).await.unwrap();
    assert_eq!(retry[0].status, SyncStatus::Updated);
    assert_eq!(h.store.create_count(), 0);
}

#[tokio::test]
async fn test_stale_chunks_removed_when_document_shrinks() {
    let h = harness();
    h.write(
        "long.md",
        "Lead paragraph.\n\n## First\nOne.\n\n## Second\nTwo.",
    );
    let first = h.engine.sync_all(false, None).await.unwrap();
    let id = first[0].record_id.unwrap();
    assert_eq!(first[0].chunk_count, Some(3));
    assert_eq!(
        first[0].index,
        Some(IndexOutcome::Upserted { vectors: 3 })
    );
    assert_eq!(h.index.ids().len(), 3);

    h.write("long.md", "## Only\nJust one section now.");
    let second = h.engine.sync_all(false, None).await.unwrap();
    assert_eq!(second[0].chunk_count, Some(1));
    assert_eq!(h.index.ids(), vec![format!("kb-{}-chunk-0", id)]);

    let entry = h.index.entry(&format!("kb-{}-chunk-0", id)).unwrap();
    assert_eq!(entry.metadata.section_header, "Only");
    assert_eq!(entry.metadata.total_chunks, 1);
    assert_eq!(entry.metadata.post_type, "knowledge_base");
}

#[tokio::test]
async fn test_whole_document_vector_when_chunking_off() {
    let h = harness_with("[index]\nchunk_documents = false\n");
    h.write(
        "note.md",
        "---\ntitle: Note\nsemantic_summary: Short summary\n---\nThe body.",
    );
    let results = h.engine.sync_all(false, None).await.unwrap();
    let id = results[0].record_id.unwrap();
    let entry = h.index.entry(&format!("kb-{}", id)).unwrap();
    assert_eq!(entry.metadata.text, "Note\n\nShort summary\n\nThe body.");
    assert_eq!(entry.metadata.chunk_index, -1);
    assert_eq!(results[0].chunk_count, None);
}

#[tokio::test]
async fn test_index_failure_is_not_fatal() {
    let h = harness();
    h.index.set_unavailable(true);
    h.write("a.md", "Body.");

    let results = h.engine.sync_all(false, None).await.unwrap();
    assert_eq!(results[0].status, SyncStatus::Created);
    assert!(matches!(
        results[0].index,
        Some(IndexOutcome::Failed { .. })
    ));
    assert!(h.map().lookup("a.md").is_some());
}

#[tokio::test]
async fn test_seo_and_tags() {
    let h = harness();
    h.write(
        "seo.md",
        "---\ntitle: Pricing\nprimary_keyword: saas pricing\nmeta_description: How we price.\ntags: [Pricing, Go To Market]\n---\nBody.",
    );
    let results = h.engine.sync_all(false, None).await.unwrap();
    let r = &results[0];
    assert_eq!(r.seo, Some(SeoOutcome::Updated));
    let id = r.record_id.unwrap();
    assert_eq!(
        h.store.seo_for(id),
        Some((Some("saas pricing".into()), Some("How we price.".into())))
    );
    assert_eq!(h.store.tag_names(), vec!["go-to-market", "pricing"]);
    assert_eq!(h.store.payload(id).unwrap().tag_ids.len(), 2);

    h.store.set_fail_seo(true);
    let again = h.engine.sync_all(false, None).await.unwrap();
    assert_eq!(again[0].status, SyncStatus::Updated);
    assert_eq!(again[0].seo, Some(SeoOutcome::Failed));
}

#[tokio::test]
async fn test_single_file_sync() {
    let h = harness();
    h.write("GROWTH/email.md", "Body.");

    let missing = h.engine.sync_file_by_path("GROWTH/nope.md", false).await;
    assert_eq!(missing.status, SyncStatus::Error);
    assert_eq!(missing.error.unwrap().kind, ErrorKind::NotFound);

    let absolute = h.root.join("GROWTH/email.md");
    let result = h
        .engine
        .sync_file_by_path(absolute.to_str().unwrap(), false)
        .await;
    assert_eq!(result.status, SyncStatus::Created);
    assert_eq!(result.file, "GROWTH/email.md");
    assert_eq!(result.topics, vec![20, 1]);

    let entry = h.map().lookup("GROWTH/email.md").cloned().unwrap();
    assert_eq!(Some(entry.record_id), result.record_id);
}

#[tokio::test]
async fn test_filter_limits_batch() {
    let h = harness();
    h.write("AI/a.md", "A.");
    h.write("GROWTH/b.md", "B.");
    let results = h.engine.sync_all(true, Some("AI/")).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].file, "AI/a.md");
}
