use std::fs;
use std::path::Path;

use kb_sync::cms::DocumentStore;
use kb_sync::config::KbConfig;
use kb_sync::identity_map::{IdentityMap, MapEntry};
use kb_sync::memory::InMemoryDocumentStore;
use kb_sync::reconcile::{run_reconcile, DuplicateGroup, ReconcileOptions};
use tempfile::TempDir;

fn kb_config(root: &Path) -> KbConfig {
    KbConfig {
        root: root.to_path_buf(),
        mapping_file: "kb_sync_mapping.json".to_string(),
        include_globs: vec!["**/*.md".to_string()],
        exclude_globs: Vec::new(),
        follow_symlinks: false,
        link_prefix: "kb".to_string(),
    }
}

/// Two local files, seven remote records:
///
/// | ID  | slug                | outcome                          |
/// |-----|---------------------|----------------------------------|
/// | 100 | guides/onboarding   | path match, kept                 |
/// | 101 | onboarding          | filename match, duplicate        |
/// | 102 | onboarding-2        | orphan copy of a matched slug    |
/// | 103 | pricing             | identity map match               |
/// | 104 | stale-draft         | cluster, kept                    |
/// | 105 | stale-draft-2       | cluster, deleted                 |
/// | 106 | lonely              | unmatched, left alone            |
fn fixture() -> (TempDir, KbConfig, InMemoryDocumentStore) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("guides")).unwrap();
    fs::write(root.join("guides/onboarding.md"), "Day one.").unwrap();
    fs::write(root.join("pricing.md"), "How we price.").unwrap();

    let store = InMemoryDocumentStore::new();
    store.insert_record("guides/onboarding", "Onboarding");
    store.insert_record("onboarding", "Onboarding");
    store.insert_record("onboarding-2", "Old Copy");
    store.insert_record("pricing", "Pricing");
    store.insert_record("stale-draft", "Stale Draft");
    store.insert_record("stale-draft-2", "Stale Draft");
    store.insert_record("lonely", "Lonely");

    let config = kb_config(root);
    let mut map = IdentityMap::empty(config.mapping_path());
    map.upsert(
        "pricing.md",
        MapEntry {
            record_id: 103,
            slug: "pricing".into(),
            url: "https://kb.test/kb/pricing/".into(),
            title: "Pricing".into(),
            last_synced: "2024-01-01T00:00:00".into(),
            chunk_count: Some(4),
        },
    );
    map.save().unwrap();

    (tmp, config, store)
}

#[tokio::test]
async fn test_analyze_changes_nothing() {
    let (_tmp, config, store) = fixture();
    let before = fs::read_to_string(config.mapping_path()).unwrap();

    let report = run_reconcile(&store, &config, ReconcileOptions::analyze())
        .await
        .unwrap();

    assert_eq!(report.local_files, 2);
    assert_eq!(report.plan.matched_count(), 3);
    assert_eq!(report.plan.unmatched_count(), 4);
    assert_eq!(
        report.plan.duplicates,
        vec![DuplicateGroup {
            file: "guides/onboarding.md".into(),
            keep: 100,
            delete: vec![101],
        }]
    );
    assert_eq!(report.plan.orphan_duplicates, vec![102]);
    assert_eq!(report.plan.unmatched_unique, vec![106]);
    assert_eq!(report.plan.to_delete(), vec![101, 102, 105]);

    let methods = report.plan.method_counts();
    assert_eq!(methods.get("path_slug"), Some(&1));
    assert_eq!(methods.get("filename_slug"), Some(&1));
    assert_eq!(methods.get("mapping"), Some(&1));

    assert!(report.deletions.is_none());
    assert!(report.rebuild.is_none());
    assert_eq!(store.records().len(), 7);
    assert_eq!(fs::read_to_string(config.mapping_path()).unwrap(), before);

    let text = report.render();
    assert!(text.contains("Records matched to files: 3"));
    assert!(text.contains("DELETE: ID 101"));
}

#[tokio::test]
async fn test_duplicate_listing_shows_record_dates() {
    let (_tmp, config, store) = fixture();
    store.set_dates(100, "2023-05-02T09:00:00", "2024-02-11T16:30:00");
    store.set_dates(101, "2023-09-14T12:00:00", "2023-09-14T12:00:00");

    let report = run_reconcile(&store, &config, ReconcileOptions::analyze())
        .await
        .unwrap();
    let text = report.render();
    assert!(text.contains(
        "KEEP:   ID 100 (slug=guides/onboarding, date=2023-05-02T09:00:00, modified=2024-02-11T16:30:00)"
    ));
    assert!(text.contains(
        "DELETE: ID 101 (slug=onboarding, date=2023-09-14T12:00:00, modified=2023-09-14T12:00:00)"
    ));
}

#[tokio::test]
async fn test_full_run_deletes_and_rebuilds() {
    let (_tmp, config, store) = fixture();

    let report = run_reconcile(&store, &config, ReconcileOptions::full())
        .await
        .unwrap();

    let deletions = report.deletions.as_ref().unwrap();
    assert_eq!(deletions.deleted, vec![101, 102, 105]);
    assert!(deletions.failed.is_empty());

    let mut remaining: Vec<u64> = store.records().iter().map(|r| r.id).collect();
    remaining.sort_unstable();
    assert_eq!(remaining, vec![100, 103, 104, 106]);

    // The plan is recomputed after deletion.
    assert!(report.plan.to_delete().is_empty());

    let rebuild = report.rebuild.as_ref().unwrap();
    assert_eq!(rebuild.entries, 2);
    assert!(rebuild.unmapped_files.is_empty());

    let map = IdentityMap::load(config.mapping_path());
    assert_eq!(map.len(), 2);
    let onboarding = map.lookup("guides/onboarding.md").unwrap();
    assert_eq!(onboarding.record_id, 100);
    assert_eq!(onboarding.url, "https://kb.test/kb/guides/onboarding/");
    assert_eq!(onboarding.chunk_count, None);
    let pricing = map.lookup("pricing.md").unwrap();
    assert_eq!(pricing.record_id, 103);
    assert_eq!(pricing.chunk_count, Some(4));
}

#[tokio::test]
async fn test_rebuild_without_delete_keeps_lowest_id() {
    let (_tmp, config, store) = fixture();
    let options = ReconcileOptions {
        delete: false,
        rebuild: true,
    };

    let report = run_reconcile(&store, &config, options).await.unwrap();
    assert!(report.deletions.is_none());
    assert_eq!(store.records().len(), 7);

    let map = IdentityMap::load(config.mapping_path());
    assert_eq!(map.lookup("guides/onboarding.md").unwrap().record_id, 100);
    assert!(store.get(101).await.unwrap().is_some());
}

#[tokio::test]
async fn test_missing_root_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let config = kb_config(&tmp.path().join("absent"));
    let store = InMemoryDocumentStore::new();
    assert!(run_reconcile(&store, &config, ReconcileOptions::analyze())
        .await
        .is_err());
}
