//! Knowledge search with confidence tiers.
//!
//! The query is embedded, the index is asked for `top_k` matches, section
//! matches are collapsed to one hit per source document (highest score wins),
//! and the survivors are split into high and medium tiers. Anything below the
//! low threshold is dropped. Search never fails: an unreachable embedder or
//! index becomes [`SearchOutcome::Unavailable`].

use serde::Serialize;
use std::collections::HashMap;

use crate::config::SearchConfig;
use crate::embedding::Embedder;
use crate::index::VectorIndex;
use crate::models::IndexMatch;

const NO_CONTENT: &str = "No content available";
const NO_SOURCE: &str = "Internal research";
const NO_DATE: &str = "Unknown date";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub label: String,
    pub text: String,
    pub source: String,
    pub date: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
}

impl SearchHit {
    fn from_match(m: &IndexMatch) -> Self {
        let meta = &m.metadata;
        let or = |value: &str, fallback: &str| {
            if value.is_empty() {
                fallback.to_string()
            } else {
                value.to_string()
            }
        };
        let source = or(&meta.source, NO_SOURCE);
        let parts: Vec<&str> = [meta.title.as_str(), meta.section_header.as_str()]
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect();
        let label = if parts.is_empty() {
            source.clone()
        } else {
            parts.join(" > ")
        };
        Self {
            id: m.base_id().to_string(),
            score: m.score,
            label,
            text: or(&meta.text, NO_CONTENT),
            source,
            date: or(&meta.date, NO_DATE),
            url: meta.url.clone(),
        }
    }

    fn render(&self) -> String {
        format!(
            "**{} (Score: {:.2})**\n{}\nSource: {} | Date: {}",
            self.label, self.score, self.text, self.source, self.date
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchOutcome {
    Found {
        query: String,
        high: Vec<SearchHit>,
        medium: Vec<SearchHit>,
    },
    NoMatches {
        query: String,
    },
    BelowThreshold {
        query: String,
        count: usize,
        low_threshold: f32,
    },
    Unavailable {
        message: String,
    },
}

impl SearchOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            SearchOutcome::Found { .. } => "found",
            SearchOutcome::NoMatches { .. } => "no_matches",
            SearchOutcome::BelowThreshold { .. } => "below_threshold",
            SearchOutcome::Unavailable { .. } => "unavailable",
        }
    }

    /// Human-readable report.
    pub fn render(&self) -> String {
        match self {
            SearchOutcome::Found { high, medium, .. } => {
                let mut tiers = Vec::new();
                if !high.is_empty() {
                    tiers.push(render_tier("High-Confidence Results", high));
                }
                if !medium.is_empty() {
                    tiers.push(render_tier("Medium-Confidence Results", medium));
                }
                format!("**Knowledge Core Intelligence Found:**\n\n{}", tiers.join("\n\n"))
            }
            SearchOutcome::NoMatches { query } => format!(
                "Knowledge Core Search: No existing intelligence found on '{}'. This is new territory - proceed with external research.",
                query
            ),
            SearchOutcome::BelowThreshold {
                query,
                count,
                low_threshold,
            } => format!(
                "Knowledge Core Search: Found {} matches for '{}' but none above confidence threshold ({}). Recommend fresh external research.",
                count, query, low_threshold
            ),
            SearchOutcome::Unavailable { message } => format!(
                "Knowledge Core unavailable: {}. Proceeding with external search only.",
                message
            ),
        }
    }
}

fn render_tier(heading: &str, hits: &[SearchHit]) -> String {
    let entries: Vec<String> = hits.iter().map(SearchHit::render).collect();
    format!("**{}:**\n\n{}", heading, entries.join("\n\n---\n\n"))
}

/// Keep the best-scoring match per source document, highest first.
pub fn dedupe_matches(matches: &[IndexMatch]) -> Vec<IndexMatch> {
    let mut best: HashMap<&str, &IndexMatch> = HashMap::new();
    for m in matches {
        best.entry(m.base_id())
            .and_modify(|cur| {
                if m.score > cur.score {
                    *cur = m;
                }
            })
            .or_insert(m);
    }
    let mut deduped: Vec<IndexMatch> = best.into_values().cloned().collect();
    deduped.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    deduped
}

/// Split raw index matches into the tiered outcome.
pub fn tier_matches(query: &str, matches: &[IndexMatch], config: &SearchConfig) -> SearchOutcome {
    if matches.is_empty() {
        return SearchOutcome::NoMatches {
            query: query.to_string(),
        };
    }

    let deduped = dedupe_matches(matches);
    let mut high = Vec::new();
    let mut medium = Vec::new();
    for m in &deduped {
        if m.score >= config.high_threshold {
            high.push(SearchHit::from_match(m));
        } else if m.score >= config.low_threshold {
            medium.push(SearchHit::from_match(m));
        }
    }

    if high.is_empty() && medium.is_empty() {
        return SearchOutcome::BelowThreshold {
            query: query.to_string(),
            count: matches.len(),
            low_threshold: config.low_threshold,
        };
    }

    SearchOutcome::Found {
        query: query.to_string(),
        high,
        medium,
    }
}

pub async fn search_knowledge(
    query: &str,
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    config: &SearchConfig,
) -> SearchOutcome {
    let query = query.trim();
    if query.is_empty() {
        return SearchOutcome::NoMatches {
            query: String::new(),
        };
    }

    let vector = match embedder.embed_one(query).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("Query embedding failed: {:#}", e);
            return SearchOutcome::Unavailable {
                message: format!("{:#}", e),
            };
        }
    };

    match index.query(&vector, config.top_k).await {
        Ok(matches) => {
            tracing::debug!(matches = matches.len(), "index query returned");
            tier_matches(query, &matches, config)
        }
        Err(e) => {
            tracing::warn!("Index query failed: {:#}", e);
            SearchOutcome::Unavailable {
                message: format!("{:#}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VectorMetadata;

    fn hit(id: &str, score: f32) -> IndexMatch {
        IndexMatch {
            id: id.to_string(),
            score,
            metadata: VectorMetadata {
                text: format!("text of {}", id),
                title: format!("Doc {}", id),
                source: format!("https://kb.test/kb/{}/", id),
                date: "2024-03-01T00:00:00".into(),
                ..Default::default()
            },
        }
    }

    fn config() -> SearchConfig {
        SearchConfig {
            top_k: 5,
            high_threshold: 0.70,
            low_threshold: 0.55,
        }
    }

    #[test]
    fn test_high_medium_and_discarded() {
        let matches = vec![hit("kb-1", 0.91), hit("kb-2", 0.62), hit("kb-3", 0.50)];
        let outcome = tier_matches("pricing", &matches, &config());
        match &outcome {
            SearchOutcome::Found { high, medium, .. } => {
                assert_eq!(high.len(), 1);
                assert_eq!(high[0].id, "kb-1");
                assert_eq!(medium.len(), 1);
                assert_eq!(medium[0].id, "kb-2");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let report = outcome.render();
        assert!(report.starts_with("**Knowledge Core Intelligence Found:**"));
        assert!(report.contains("**High-Confidence Results:**"));
        assert!(report.contains("**Medium-Confidence Results:**"));
        assert!(report.contains("**Doc kb-1 (Score: 0.91)**"));
        assert!(!report.contains("kb-3"));
    }

    #[test]
    fn test_only_high_tier_header_when_medium_empty() {
        let matches = vec![
            hit("kb-1", 0.91),
            hit("kb-2", 0.72),
            hit("kb-3", 0.40),
        ];
        let outcome = tier_matches("pricing", &matches, &config());
        let SearchOutcome::Found { high, medium, .. } = &outcome else {
            panic!("expected found");
        };
        assert_eq!(high.len(), 2);
        assert!(medium.is_empty());
        let report = outcome.render();
        assert!(report.contains("**High-Confidence Results:**"));
        assert!(!report.contains("Medium-Confidence"));
        assert!(report.contains("\n\n---\n\n"));
    }

    #[test]
    fn test_score_exactly_at_threshold() {
        let matches = vec![hit("kb-1", 0.70), hit("kb-2", 0.55)];
        let SearchOutcome::Found { high, medium, .. } = tier_matches("q", &matches, &config())
        else {
            panic!("expected found");
        };
        assert_eq!(high.len(), 1);
        assert_eq!(medium.len(), 1);
    }

    #[test]
    fn test_dedupe_keeps_best_chunk() {
        let matches = vec![
            hit("kb-5-chunk-0", 0.61),
            hit("kb-5-chunk-2", 0.83),
            hit("kb-6", 0.70),
        ];
        let deduped = dedupe_matches(&matches);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].id, "kb-5-chunk-2");
        assert_eq!(deduped[1].id, "kb-6");
    }

    #[test]
    fn test_no_matches_message() {
        let outcome = tier_matches("quantum billing", &[], &config());
        assert_eq!(outcome.status(), "no_matches");
        assert_eq!(
            outcome.render(),
            "Knowledge Core Search: No existing intelligence found on 'quantum billing'. This is new territory - proceed with external research."
        );
    }

    #[test]
    fn test_below_threshold_message() {
        let outcome = tier_matches("q", &[hit("kb-1", 0.3), hit("kb-2", 0.2)], &config());
        assert_eq!(
            outcome.render(),
            "Knowledge Core Search: Found 2 matches for 'q' but none above confidence threshold (0.55). Recommend fresh external research."
        );
    }

    #[test]
    fn test_below_threshold_counts_every_raw_match() {
        let matches = vec![
            hit("kb-1-chunk-0", 0.30),
            hit("kb-1-chunk-1", 0.25),
            hit("kb-2", 0.20),
        ];
        let outcome = tier_matches("q", &matches, &config());
        assert!(outcome.render().starts_with("Knowledge Core Search: Found 3 matches for 'q'"));
    }

    #[test]
    fn test_section_hit_label_joins_title_and_header() {
        let mut m = hit("kb-4-chunk-2", 0.88);
        m.metadata.title = "Pricing Guide".into();
        m.metadata.section_header = "Enterprise Tiers".into();
        assert_eq!(SearchHit::from_match(&m).label, "Pricing Guide > Enterprise Tiers");

        m.metadata.title.clear();
        assert_eq!(SearchHit::from_match(&m).label, "Enterprise Tiers");
    }

    #[test]
    fn test_missing_metadata_defaults() {
        let m = IndexMatch {
            id: "kb-9".into(),
            score: 0.8,
            metadata: VectorMetadata::default(),
        };
        let h = SearchHit::from_match(&m);
        assert_eq!(h.label, "Internal research");
        assert_eq!(h.text, "No content available");
        assert_eq!(h.date, "Unknown date");
    }

    #[tokio::test]
    async fn test_unavailable_index() {
        use crate::embedding::HashEmbedder;
        use crate::memory::InMemoryVectorIndex;

        let index = InMemoryVectorIndex::new();
        index.set_unavailable(true);
        let outcome =
            search_knowledge("anything", &HashEmbedder::new(32), &index, &config()).await;
        assert_eq!(outcome.status(), "unavailable");
        assert!(outcome
            .render()
            .starts_with("Knowledge Core unavailable: "));
        assert!(outcome
            .render()
            .ends_with(". Proceeding with external search only."));
    }
}
