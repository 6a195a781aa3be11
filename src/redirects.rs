//! Redirect export for records whose public slug changed.
//!
//! For each identity-map entry whose file still exists, the stored slug is
//! compared with the file's current hierarchical slug. Differences become
//! `source,destination` rows ready for a redirect manager import.

use anyhow::{bail, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::KbConfig;
use crate::identity_map::IdentityMap;
use crate::slug::hierarchical_slug;

pub const DEFAULT_OUTPUT: &str = "redirects_export.csv";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redirect {
    pub source: String,
    pub destination: String,
    pub file: String,
}

pub fn collect_redirects(map: &IdentityMap, root: &Path, link_prefix: &str) -> Vec<Redirect> {
    map.iter()
        .filter(|(rel, _)| root.join(rel.as_str()).is_file())
        .filter_map(|(rel, entry)| {
            let current = hierarchical_slug(Path::new(rel.as_str()), Path::new(""));
            (current != entry.slug).then(|| Redirect {
                source: format!("/{}/{}/", link_prefix, entry.slug),
                destination: format!("/{}/{}/", link_prefix, current),
                file: rel.clone(),
            })
        })
        .collect()
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn to_csv(redirects: &[Redirect]) -> String {
    let mut out = String::from("source,destination\r\n");
    for r in redirects {
        out.push_str(&csv_field(&r.source));
        out.push(',');
        out.push_str(&csv_field(&r.destination));
        out.push_str("\r\n");
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedirectExport {
    pub redirects: Vec<Redirect>,
    /// Where the CSV was written; `None` when nothing changed.
    pub path: Option<PathBuf>,
}

/// Export redirects to `output`, defaulting to `redirects_export.csv` under
/// the root. Fails when no identity map exists yet.
pub fn export_redirects(kb: &KbConfig, output: Option<&Path>) -> Result<RedirectExport> {
    let mapping_path = kb.mapping_path();
    if !mapping_path.is_file() {
        bail!(
            "Mapping file not found: {}. Run a sync first.",
            mapping_path.display()
        );
    }
    let map = IdentityMap::load(&mapping_path);
    let redirects = collect_redirects(&map, &kb.root, &kb.link_prefix);
    if redirects.is_empty() {
        return Ok(RedirectExport {
            redirects,
            path: None,
        });
    }

    let path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| kb.root.join(DEFAULT_OUTPUT));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, to_csv(&redirects))?;
    tracing::info!(rows = redirects.len(), path = %path.display(), "redirects exported");

    Ok(RedirectExport {
        redirects,
        path: Some(path),
    })
}
