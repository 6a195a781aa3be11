//! Slug and title derivation.
//!
//! Pure functions mapping file names, directory paths and free text to the
//! URL-safe identifiers used by the CMS. Every function is total: any input
//! produces a (possibly empty) string.
//!
//! | Function | Example |
//! |----------|---------|
//! | [`slugify`] | `"Writer.com – AI/ML"` → `writer-com-ai-ml` |
//! | [`slug_from_filename`] | `02_title-tags-and-meta.md` → `title-tags-and-meta` |
//! | [`hierarchical_slug`] | `AI/1_models/claude.md` → `ai/models/claude` |
//! | [`title_from_filename`] | `03_seo_for_llm.md` → `SEO For LLM` |

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Component, Path};

static NUMERIC_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+[_-]").unwrap());
static MD_EXTENSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.md$").unwrap());
static DISALLOWED: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s-]").unwrap());
static SEPARATOR_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s_]+").unwrap());
static HYPHEN_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"-+").unwrap());

/// Acronyms restored to upper case after title-casing.
pub const ACRONYMS: &[&str] = &[
    "AI", "SEO", "LLM", "NLP", "API", "UI", "UX", "ML", "GPT", "RAG", "HTML", "CSS", "URL", "IO",
    "MCP",
];

static ACRONYM_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    ACRONYMS
        .iter()
        .map(|a| (Regex::new(&format!(r"(?i)\b{}\b", a)).unwrap(), *a))
        .collect()
});

fn is_dash(c: char) -> bool {
    matches!(c, '\u{2010}'..='\u{2015}' | '\u{2212}')
}

/// Convert arbitrary text to a URL slug made of `[a-z0-9-]`.
///
/// Idempotent: `slugify(&slugify(x)) == slugify(x)`.
pub fn slugify(text: &str) -> String {
    let lowered: String = text
        .to_lowercase()
        .chars()
        .map(|c| if is_dash(c) || c == '.' || c == '/' { '-' } else { c })
        .collect();

    let s = DISALLOWED.replace_all(&lowered, "");
    let s = SEPARATOR_RUN.replace_all(&s, "-");
    let s = HYPHEN_RUN.replace_all(&s, "-");
    s.trim_matches('-').to_string()
}

/// Remove a leading `NN_` / `NN-` ordering prefix.
pub fn strip_numeric_prefix(name: &str) -> &str {
    match NUMERIC_PREFIX.find(name) {
        Some(m) => &name[m.end()..],
        None => name,
    }
}

fn strip_md_extension(name: &str) -> &str {
    match MD_EXTENSION.find(name) {
        Some(m) => &name[..m.start()],
        None => name,
    }
}

/// Slug for a bare file name: extension and ordering prefix removed.
pub fn slug_from_filename(name: &str) -> String {
    let stem = strip_md_extension(name);
    slugify(strip_numeric_prefix(stem))
}

/// Slug including the directory structure below `root`.
///
/// Each directory has its ordering prefix stripped and is slugified; parts
/// that reduce to nothing are dropped. If `path` is not under `root` it is
/// treated as already relative.
pub fn hierarchical_slug(path: &Path, root: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);

    let mut parts: Vec<String> = Vec::new();
    if let Some(parent) = rel.parent() {
        for component in parent.components() {
            if let Component::Normal(os) = component {
                let dir = os.to_string_lossy();
                let clean = slugify(strip_numeric_prefix(&dir));
                if !clean.is_empty() {
                    parts.push(clean);
                }
            }
        }
    }

    let file_name = rel
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    parts.push(slug_from_filename(&file_name));
    parts.join("/")
}

/// Human title for a file name, with domain acronyms kept upper case.
pub fn title_from_filename(name: &str) -> String {
    let stem = strip_md_extension(strip_numeric_prefix(name));
    let spaced = stem.replace(['_', '-'], " ");
    fix_acronyms(&title_case(&spaced))
}

/// Upper-case the first letter of every alphabetic run, lower-case the rest.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_alpha = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

/// Restore known acronyms (matched case-insensitively on word boundaries).
pub fn fix_acronyms(text: &str) -> String {
    let mut out = text.to_string();
    for (re, acronym) in ACRONYM_PATTERNS.iter() {
        out = re.replace_all(&out, *acronym).into_owned();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_basic() {
        assert_eq!(slugify("Getting Started"), "getting-started");
        assert_eq!(slugify("Writer.com"), "writer-com");
        assert_eq!(slugify("AI/ML Overview"), "ai-ml-overview");
        assert_eq!(slugify("  --Hello   World--  "), "hello-world");
    }

    #[test]
    fn test_slugify_unicode_dashes() {
        assert_eq!(slugify("pre\u{2013}post"), "pre-post");
        assert_eq!(slugify("a\u{2014}b\u{2212}c"), "a-b-c");
    }

    #[test]
    fn test_slugify_drops_punctuation_and_underscores() {
        assert_eq!(slugify("What's new? (2024)"), "whats-new-2024");
        assert_eq!(slugify("snake_case name"), "snakecase-name");
    }

    #[test]
    fn test_slugify_total_on_odd_input() {
        assert_eq!(slugify(""), "");
        assert_eq!(slugify("!!!"), "");
        assert_eq!(slugify("日本語"), "");
    }

    #[test]
    fn test_slugify_idempotent_and_charset() {
        let inputs = [
            "Getting Started",
            "02_title-tags-and-meta.md",
            "Écrire -- un   Test",
            "a..b//c",
            "\u{2010}lead and trail\u{2015}",
            "MiXeD_CaSe\tTabs\nNewlines",
        ];
        for input in inputs {
            let once = slugify(input);
            assert_eq!(slugify(&once), once, "not idempotent for {:?}", input);
            assert!(once
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
            assert!(!once.starts_with('-') && !once.ends_with('-'));
            assert!(!once.contains("--"));
        }
    }

    #[test]
    fn test_slug_from_filename() {
        assert_eq!(
            slug_from_filename("02_title-tags-and-meta.md"),
            "title-tags-and-meta"
        );
        assert_eq!(slug_from_filename("10-intro.md"), "intro");
        assert_eq!(slug_from_filename("Getting Started.md"), "getting-started");
        assert_eq!(slug_from_filename("2024 roadmap.md"), "2024-roadmap");
    }

    #[test]
    fn test_hierarchical_slug() {
        let root = Path::new("/kb");
        assert_eq!(
            hierarchical_slug(Path::new("/kb/TOOLS/marketing-automation/adobe-target.md"), root),
            "tools/marketing-automation/adobe-target"
        );
        assert_eq!(
            hierarchical_slug(
                Path::new("/kb/AI/1_models/1_specific-models/claude/claude-overview.md"),
                root
            ),
            "ai/models/specific-models/claude/claude-overview"
        );
        assert_eq!(hierarchical_slug(Path::new("/kb/00_top.md"), root), "top");
    }

    #[test]
    fn test_hierarchical_slug_drops_empty_dirs() {
        let root = Path::new("/kb");
        assert_eq!(
            hierarchical_slug(Path::new("/kb/01_/___/Guide.md"), root),
            "guide"
        );
        assert_eq!(
            hierarchical_slug(Path::new("SEO/basics.md"), root),
            "seo/basics"
        );
    }

    #[test]
    fn test_title_from_filename() {
        assert_eq!(title_from_filename("03_seo_for_llm.md"), "SEO For LLM");
        assert_eq!(title_from_filename("api-design-guide.md"), "API Design Guide");
        assert_eq!(title_from_filename("mcp_io.md"), "MCP IO");
        assert_eq!(title_from_filename("guide.md"), "Guide");
    }

    #[test]
    fn test_acronyms_only_on_word_boundaries() {
        assert_eq!(fix_acronyms("Email Ui"), "Email UI");
        assert_eq!(fix_acronyms("Maintain"), "Maintain");
    }

    #[test]
    fn test_title_case_after_digits_and_apostrophes() {
        assert_eq!(title_case("3d models"), "3D Models");
        assert_eq!(title_case("it's fine"), "It'S Fine");
    }
}
