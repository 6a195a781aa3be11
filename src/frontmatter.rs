//! YAML frontmatter extraction and typed accessors.
//!
//! A document has frontmatter only if its first line is `---` (trailing
//! whitespace allowed). The block ends at the next line that is `---` on its
//! own; a `---` run inside a longer line (for example `# --- note ---`) is
//! ordinary content. A malformed block is treated as absent and logged.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::collections::BTreeMap;

/// Parsed frontmatter fields, converted to JSON values for uniform access.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frontmatter {
    fields: BTreeMap<String, Value>,
}

fn is_delimiter(line: &str) -> bool {
    line.trim_end() == "---"
}

/// Split a document into frontmatter and body.
///
/// Without a well-formed block the original text is returned unchanged and
/// the frontmatter is empty. With one, the body is trimmed.
pub fn parse_frontmatter(text: &str) -> (Frontmatter, String) {
    let lines: Vec<&str> = text.split('\n').collect();

    if !lines.first().is_some_and(|l| is_delimiter(l)) {
        return (Frontmatter::default(), text.to_string());
    }

    let Some(end) = lines.iter().skip(1).position(|l| is_delimiter(l)).map(|i| i + 1) else {
        return (Frontmatter::default(), text.to_string());
    };

    let yaml = lines[1..end].join("\n");
    let body = lines[end + 1..].join("\n").trim().to_string();

    match parse_yaml_to_json_map(&yaml) {
        Ok(fields) => (Frontmatter { fields }, body),
        Err(e) => {
            tracing::warn!("YAML parse error in frontmatter: {}", e);
            (Frontmatter::default(), text.to_string())
        }
    }
}

/// Parse YAML into a string-keyed JSON map. A null or non-mapping document
/// yields an empty map.
fn parse_yaml_to_json_map(yaml: &str) -> Result<BTreeMap<String, Value>, serde_yaml::Error> {
    let yaml_value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
    let json_value = serde_json::to_value(yaml_value).unwrap_or(Value::Null);

    Ok(match json_value {
        Value::Object(map) => map.into_iter().collect(),
        _ => BTreeMap::new(),
    })
}

impl Frontmatter {
    pub fn from_fields(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Non-empty scalar rendered as a trimmed string.
    pub fn get_str(&self, key: &str) -> Option<String> {
        let s = match self.fields.get(key)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return None,
        };
        (!s.is_empty()).then_some(s)
    }

    /// A list of strings; a scalar string is split on commas.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        match self.fields.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn title(&self) -> Option<String> {
        self.get_str("title")
    }

    pub fn slug(&self) -> Option<String> {
        self.get_str("slug")
    }

    pub fn excerpt(&self) -> Option<String> {
        self.get_str("excerpt").or_else(|| self.get_str("summary"))
    }

    pub fn tags(&self) -> Vec<String> {
        self.get_list("tags")
    }

    /// Explicit fine-grained topic ID.
    pub fn topic(&self) -> Option<u64> {
        match self.fields.get("topic")? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn primary_keyword(&self) -> Option<String> {
        self.get_str("primary_keyword")
            .or_else(|| self.get_str("keyword"))
    }

    pub fn meta_description(&self) -> Option<String> {
        self.get_str("meta_description")
    }

    pub fn semantic_summary(&self) -> Option<String> {
        self.get_str("semantic_summary")
    }

    pub fn synthetic_questions(&self) -> Vec<String> {
        self.get_list("synthetic_questions")
    }

    pub fn key_concepts(&self) -> Vec<String> {
        self.get_list("key_concepts")
    }

    /// The `updated` field as an ISO 8601 datetime, if it parses.
    pub fn updated(&self) -> Option<String> {
        normalize_date(&self.get_str("updated")?)
    }
}

/// Normalise a date or datetime string to ISO 8601 with a time component.
///
/// Date-only values become midnight. Offsets are preserved, and a trailing
/// `Z` is read as UTC. Anything else is `None`.
pub fn normalize_date(raw: &str) -> Option<String> {
    let raw = raw.trim();

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(format!("{}T00:00:00", date.format("%Y-%m-%d")));
    }

    let with_offset = match raw.strip_suffix('Z') {
        Some(rest) => format!("{}+00:00", rest),
        None => raw.to_string(),
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&with_offset) {
        return Some(dt.format("%Y-%m-%dT%H:%M:%S%:z").to_string());
    }
    if let Ok(dt) = DateTime::parse_from_str(&with_offset, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(dt.format("%Y-%m-%dT%H:%M:%S%:z").to_string());
    }

    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    NAIVE_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(raw, fmt)
            .ok()
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_frontmatter_returns_original() {
        let text = "# Title\n\nBody\n";
        let (fm, body) = parse_frontmatter(text);
        assert!(fm.is_empty());
        assert_eq!(body, text);
    }

    #[test]
    fn test_basic_frontmatter() {
        let text = "---\ntitle: Hello\ntags: [a, b]\n---\n\n  Body text\n\n";
        let (fm, body) = parse_frontmatter(text);
        assert_eq!(fm.title().as_deref(), Some("Hello"));
        assert_eq!(fm.tags(), vec!["a", "b"]);
        assert_eq!(body, "Body text");
    }

    #[test]
    fn test_inline_dashes_are_not_a_delimiter() {
        let text = "---\ntitle: Note\n---\n# --- note ---\nmore";
        let (fm, body) = parse_frontmatter(text);
        assert_eq!(fm.title().as_deref(), Some("Note"));
        assert_eq!(body, "# --- note ---\nmore");
    }

    #[test]
    fn test_dashes_inside_yaml_line_do_not_close() {
        let text = "---\ntitle: a --- b\nslug: x\n---\nBody";
        let (fm, body) = parse_frontmatter(text);
        assert_eq!(fm.title().as_deref(), Some("a --- b"));
        assert_eq!(fm.slug().as_deref(), Some("x"));
        assert_eq!(body, "Body");
    }

    #[test]
    fn test_trailing_whitespace_on_delimiters() {
        let text = "---   \ntitle: T\n---\t\nBody";
        let (fm, body) = parse_frontmatter(text);
        assert_eq!(fm.title().as_deref(), Some("T"));
        assert_eq!(body, "Body");
    }

    #[test]
    fn test_unclosed_block_is_not_frontmatter() {
        let text = "---\ntitle: T\nBody";
        let (fm, body) = parse_frontmatter(text);
        assert!(fm.is_empty());
        assert_eq!(body, text);
    }

    #[test]
    fn test_malformed_yaml_recovers() {
        let text = "---\ntitle: [unclosed\n---\nBody";
        let (fm, body) = parse_frontmatter(text);
        assert!(fm.is_empty());
        assert_eq!(body, text);
    }

    #[test]
    fn test_empty_and_scalar_blocks() {
        let (fm, body) = parse_frontmatter("---\n---\nBody");
        assert!(fm.is_empty());
        assert_eq!(body, "Body");

        let (fm, body) = parse_frontmatter("---\njust a string\n---\nBody");
        assert!(fm.is_empty());
        assert_eq!(body, "Body");
    }

    #[test]
    fn test_aliases() {
        let (fm, _) = parse_frontmatter("---\nsummary: S\nkeyword: k\n---\nx");
        assert_eq!(fm.excerpt().as_deref(), Some("S"));
        assert_eq!(fm.primary_keyword().as_deref(), Some("k"));

        let (fm, _) = parse_frontmatter("---\nexcerpt: E\nsummary: S\n---\nx");
        assert_eq!(fm.excerpt().as_deref(), Some("E"));
    }

    #[test]
    fn test_comma_separated_tags_and_topic() {
        let (fm, _) = parse_frontmatter("---\ntags: seo, ai , \ntopic: \"42\"\n---\nx");
        assert_eq!(fm.tags(), vec!["seo", "ai"]);
        assert_eq!(fm.topic(), Some(42));

        let (fm, _) = parse_frontmatter("---\ntopic: 7\n---\nx");
        assert_eq!(fm.topic(), Some(7));
    }

    #[test]
    fn test_list_fields() {
        let text = "---\nsynthetic_questions:\n  - What is RAG?\n  - Why chunk?\nkey_concepts: [embeddings, retrieval]\n---\nx";
        let (fm, _) = parse_frontmatter(text);
        assert_eq!(fm.synthetic_questions(), vec!["What is RAG?", "Why chunk?"]);
        assert_eq!(fm.key_concepts(), vec!["embeddings", "retrieval"]);
    }

    #[test]
    fn test_normalize_date() {
        assert_eq!(
            normalize_date("2026-01-15").as_deref(),
            Some("2026-01-15T00:00:00")
        );
        assert_eq!(
            normalize_date("2026-01-15T10:30:00").as_deref(),
            Some("2026-01-15T10:30:00")
        );
        assert_eq!(
            normalize_date("2026-01-15 10:30").as_deref(),
            Some("2026-01-15T10:30:00")
        );
        assert_eq!(
            normalize_date("2026-01-15T10:30:00Z").as_deref(),
            Some("2026-01-15T10:30:00+00:00")
        );
        assert_eq!(
            normalize_date("2026-01-15T10:30:00+02:00").as_deref(),
            Some("2026-01-15T10:30:00+02:00")
        );
        assert_eq!(normalize_date("last tuesday"), None);
    }

    #[test]
    fn test_updated_accessor() {
        let (fm, _) = parse_frontmatter("---\nupdated: 2026-02-01\n---\nx");
        assert_eq!(fm.updated().as_deref(), Some("2026-02-01T00:00:00"));
    }
}
