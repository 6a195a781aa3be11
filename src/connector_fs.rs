//! Knowledge-base file enumeration.
//!
//! Walks the configured root with `walkdir`, applies include/exclude globs,
//! and drops files that are never published: `index.md`, folder-marker
//! notes (`topic/topic.md`) and anything under a hidden path component.
//! Results are sorted by relative path.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::config::KbConfig;
use crate::frontmatter::parse_frontmatter;
use crate::models::Document;

/// A syncable file under the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KbFile {
    /// `/`-separated path relative to the root.
    pub rel_path: String,
    pub abs_path: PathBuf,
}

pub fn scan_kb(config: &KbConfig, filter: Option<&str>) -> Result<Vec<KbFile>> {
    let root = &config.root;
    if !root.is_dir() {
        bail!("Knowledge base root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;
    let mut excludes = vec!["**/node_modules/**".to_string()];
    excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let filter = filter.map(|f| f.replace('\\', "/")).filter(|f| !f.is_empty());

    let mut files = Vec::new();
    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = to_rel_string(relative);

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        if let Some(prefix) = &filter {
            if !rel_str.starts_with(prefix.as_str()) {
                continue;
            }
        }
        if !is_syncable(relative) {
            continue;
        }

        files.push(KbFile {
            rel_path: rel_str,
            abs_path: path.to_path_buf(),
        });
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

/// Whether a root-relative path is ever published.
pub fn is_syncable(relative: &Path) -> bool {
    let Some(name) = relative.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    if name == "index.md" {
        return false;
    }

    let stem = relative.file_stem().map(|s| s.to_string_lossy());
    let parent = relative
        .parent()
        .and_then(|p| p.file_name())
        .map(|p| p.to_string_lossy());
    if let (Some(stem), Some(parent)) = (stem, parent) {
        if stem == parent {
            return false;
        }
    }

    !relative.components().any(|c| match c {
        Component::Normal(os) => os.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

/// `/`-joined form of a relative path on every platform.
pub fn to_rel_string(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(os) => Some(os.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve a user-supplied path (absolute or root-relative) to a file entry.
pub fn resolve_path(root: &Path, input: &str) -> KbFile {
    let given = Path::new(input);
    let abs_path = if given.is_absolute() {
        given.to_path_buf()
    } else {
        root.join(given)
    };
    let rel_path = match abs_path.strip_prefix(root) {
        Ok(rel) => to_rel_string(rel),
        Err(_) => input.replace('\\', "/"),
    };
    KbFile { rel_path, abs_path }
}

/// Read and split one file.
pub fn read_document(file: &KbFile) -> Result<Document> {
    let text = std::fs::read_to_string(&file.abs_path)
        .with_context(|| format!("Failed to read {}", file.abs_path.display()))?;
    let (frontmatter, body) = parse_frontmatter(&text);
    Ok(Document {
        rel_path: file.rel_path.clone(),
        abs_path: file.abs_path.clone(),
        frontmatter,
        body,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
