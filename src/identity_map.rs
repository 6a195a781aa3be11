//! Durable mapping from relative file path to remote record identity.
//!
//! The map lives in a pretty-printed JSON file under the knowledge-base root
//! (`kb_sync_mapping.json` by default). It is loaded once before a batch and
//! written once after it. Keys are kept sorted so the file diffs cleanly.
//!
//! Loading never fails: a missing file is an empty map, and a corrupt file
//! (or a corrupt entry) is logged and ignored. Saving writes a sibling
//! temporary file and renames it over the target, so readers never observe
//! a truncated map.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEntry {
    #[serde(alias = "post_id")]
    pub record_id: u64,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub last_synced: String,
    /// Vectors written at last sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct IdentityMap {
    path: PathBuf,
    entries: BTreeMap<String, MapEntry>,
}

impl IdentityMap {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Load the map at `path`. Never fails.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut map = Self::empty(&path);

        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return map,
            Err(e) => {
                tracing::warn!("Cannot read identity map {}: {}", path.display(), e);
                return map;
            }
        };

        let raw: BTreeMap<String, Value> = match serde_json::from_str(&text) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(
                    "Identity map {} is corrupt, starting empty: {}",
                    path.display(),
                    e
                );
                return map;
            }
        };

        for (rel, value) in raw {
            match serde_json::from_value::<MapEntry>(value) {
                Ok(entry) => {
                    map.entries.insert(rel, entry);
                }
                Err(e) => tracing::warn!("Ignoring identity map entry {}: {}", rel, e),
            }
        }
        map
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lookup(&self, rel_path: &str) -> Option<&MapEntry> {
        self.entries.get(rel_path)
    }

    pub fn upsert(&mut self, rel_path: impl Into<String>, entry: MapEntry) {
        self.entries.insert(rel_path.into(), entry);
    }

    pub fn remove(&mut self, rel_path: &str) -> Option<MapEntry> {
        self.entries.remove(rel_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MapEntry)> {
        self.entries.iter()
    }

    /// Replace every entry, keeping the file location.
    pub fn replace_all(&mut self, entries: BTreeMap<String, MapEntry>) {
        self.entries = entries;
    }

    /// Relative path currently mapped to `record_id`, if any.
    pub fn path_for_record(&self, record_id: u64) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, e)| e.record_id == record_id)
            .map(|(p, _)| p.as_str())
    }

    /// Write the map atomically.
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        tmp.write_all(json.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to write identity map {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(id: u64, slug: &str) -> MapEntry {
        MapEntry {
            record_id: id,
            slug: slug.to_string(),
            url: format!("https://example.com/kb/{}/", slug),
            title: "T".to_string(),
            last_synced: "2026-01-01T00:00:00".to_string(),
            chunk_count: None,
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let map = IdentityMap::load(tmp.path().join("nope.json"));
        assert!(map.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("map.json");
        std::fs::write(&path, "{ not json").unwrap();
        let map = IdentityMap::load(&path);
        assert!(map.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("map.json");
        let mut map = IdentityMap::empty(&path);
        map.upsert("AI/b.md", entry(2, "ai/b"));
        map.upsert("AI/a.md", entry(1, "ai/a"));
        map.save().unwrap();

        let reloaded = IdentityMap::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.lookup("AI/a.md"), Some(&entry(1, "ai/a")));

        let text = std::fs::read_to_string(&path).unwrap();
        let a = text.find("AI/a.md").unwrap();
        let b = text.find("AI/b.md").unwrap();
        assert!(a < b, "keys should be sorted");
        assert!(text.contains("\"record_id\": 1"));
    }

    #[test]
    fn test_legacy_post_id_and_bad_entries() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("map.json");
        std::fs::write(
            &path,
            r#"{
  "a.md": {"post_id": 10, "slug": "a", "url": "u", "title": "A", "last_synced": "x"},
  "b.md": {"post_id": null, "slug": "b"}
}"#,
        )
        .unwrap();
        let map = IdentityMap::load(&path);
        assert_eq!(map.len(), 1);
        assert_eq!(map.lookup("a.md").unwrap().record_id, 10);
        assert_eq!(map.path_for_record(10), Some("a.md"));
        assert!(map.lookup("b.md").is_none());
    }

    #[test]
    fn test_save_overwrites_without_leftovers() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("map.json");
        let mut map = IdentityMap::empty(&path);
        map.upsert("x.md", entry(1, "x"));
        map.save().unwrap();
        map.upsert("x.md", entry(5, "x"));
        map.save().unwrap();

        assert_eq!(IdentityMap::load(&path).lookup("x.md").unwrap().record_id, 5);
        let files: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }
}
