//! Topic assignment from a file's location.
//!
//! Every record gets two topic IDs: a coarse parent chosen by the file's
//! top-level folder, and a fine topic chosen by the longest path pattern
//! contained in the relative path. Both fall back to the configured default.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::config::TaxonomyConfig;

#[derive(Debug, Clone, Default)]
pub struct TopicResolver {
    /// `(pattern, topic)` ordered longest pattern first.
    patterns: Vec<(String, u64)>,
    parents: BTreeMap<String, u64>,
    default_topic: u64,
}

impl TopicResolver {
    pub fn new(
        mapping: &BTreeMap<String, u64>,
        parents: BTreeMap<String, u64>,
        default_topic: u64,
    ) -> Self {
        let mut patterns: Vec<(String, u64)> = mapping
            .iter()
            .map(|(p, id)| (p.trim_matches('/').to_string(), *id))
            .filter(|(p, _)| !p.is_empty())
            .collect();
        // Stable sort keeps the map's key order among equal lengths.
        patterns.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        Self {
            patterns,
            parents,
            default_topic,
        }
    }

    pub fn from_config(config: &TaxonomyConfig) -> Self {
        Self::new(
            &config.topic_mapping,
            config.parent_topics.clone(),
            config.default_topic_id,
        )
    }

    /// Same parents and default, different pattern table.
    pub fn with_mapping(&self, mapping: &BTreeMap<String, u64>) -> Self {
        Self::new(mapping, self.parents.clone(), self.default_topic)
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn fine_topic(&self, rel_path: &str) -> u64 {
        self.patterns
            .iter()
            .find(|(pattern, _)| rel_path.contains(pattern.as_str()))
            .map(|(_, id)| *id)
            .unwrap_or(self.default_topic)
    }

    pub fn parent_topic(&self, rel_path: &str) -> u64 {
        match rel_path.split_once('/') {
            Some((top, _)) => self.parents.get(top).copied().unwrap_or(self.default_topic),
            None => self.default_topic,
        }
    }

    /// `[parent, fine]`, with an explicit fine topic taking precedence.
    pub fn topics(&self, rel_path: &str, explicit: Option<u64>) -> Vec<u64> {
        let fine = explicit.unwrap_or_else(|| self.fine_topic(rel_path));
        vec![self.parent_topic(rel_path), fine]
    }
}

/// Convert a JSON object of `pattern → id` into a topic table. Values may be
/// numbers or numeric strings; anything else is skipped.
pub fn mapping_from_json(value: &Value) -> BTreeMap<String, u64> {
    let Some(obj) = value.as_object() else {
        return BTreeMap::new();
    };
    obj.iter()
        .filter_map(|(k, v)| {
            let id = match v {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }?;
            Some((k.clone(), id))
        })
        .collect()
}
