//! Markdown dialect normalisation and HTML rendering.
//!
//! Notes are written in an Obsidian-flavoured dialect. Before rendering,
//! [`normalize_dialect`] rewrites the constructs the CMS cannot display:
//!
//! - `[[target]]`, `[[target|label]]`, `[[target#heading]]` and
//!   `[[target#heading|label]]` become `[label](/kb/<slug>/#<anchor>)`.
//! - `![[asset]]` embeds are removed.
//! - `^block-id` anchors are removed.
//! - ```` ```dataview ```` blocks are removed.
//!
//! [`render_html`] then converts to HTML with `pulldown-cmark` (tables,
//! strikethrough, task lists, smart punctuation), gives every heading a
//! stable `id`, expands a `[TOC]` paragraph into a table of contents, and
//! inlines presentational styles on tables and code.

use once_cell::sync::Lazy;
use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, TagEnd};
use regex::{Captures, Regex};
use std::collections::HashMap;

use crate::slug::{fix_acronyms, slug_from_filename, slugify, title_case};

static WIKILINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(!?)\[\[([^\]]+)\]\]").unwrap());
static BLOCK_ANCHOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\^[a-zA-Z0-9-]+").unwrap());
static DATAVIEW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```dataview.*?```").unwrap());
static LABEL_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+[_\s-]*").unwrap());
static MD_EXTENSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.md$").unwrap());

static TABLE_CELL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<(th|td)(?: style="([^"]*)")?>"#).unwrap());
static TEXT_ALIGN: Lazy<Regex> = Lazy::new(|| Regex::new(r"text-align:\s*([a-z]+)").unwrap());
static CODE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(<pre[^>]*>)?<code>").unwrap());

const TABLE_STYLE: &str = "border-collapse:collapse;width:100%;border:1px solid #ddd;";
const TH_STYLE: &str = "border:1px solid #ddd;padding:8px;background:#f4f4f4;";
const TD_STYLE: &str = "border:1px solid #ddd;padding:8px;";
const PRE_STYLE: &str = "background:#f5f5f5;padding:16px;border-radius:4px;overflow-x:auto;white-space:pre-wrap;word-wrap:break-word;";
const CODE_STYLE: &str = "background:#f5f5f5;padding:2px 6px;border-radius:3px;";

/// Full pipeline: dialect normalisation followed by HTML rendering.
pub fn markdown_to_html(content: &str, link_prefix: &str) -> String {
    render_html(&normalize_dialect(content, link_prefix))
}

// ============ Dialect ============

/// Rewrite dialect-specific syntax into portable markdown.
pub fn normalize_dialect(content: &str, link_prefix: &str) -> String {
    let content = DATAVIEW.replace_all(content, "");
    let content = WIKILINK.replace_all(&content, |caps: &Captures| {
        if &caps[1] == "!" {
            String::new()
        } else {
            convert_wikilink(&caps[2], link_prefix)
        }
    });
    BLOCK_ANCHOR.replace_all(&content, "").into_owned()
}

/// Convert the inside of a `[[...]]` link to a markdown link.
pub fn convert_wikilink(inner: &str, link_prefix: &str) -> String {
    let (target, label) = match inner.split_once('|') {
        Some((t, l)) => (t, Some(l.trim())),
        None => (inner, None),
    };
    let (target, heading) = match target.split_once('#') {
        Some((t, h)) => (t, Some(h)),
        None => (target, None),
    };
    let target = target.rsplit('/').next().unwrap_or(target).trim();
    let target = MD_EXTENSION.replace(target, "");

    let anchor = heading.map(slugify).filter(|a| !a.is_empty());
    let label = match label.filter(|l| !l.is_empty()) {
        Some(l) => l.to_string(),
        None if target.is_empty() => heading.unwrap_or_default().trim().to_string(),
        None => label_from_target(&target),
    };

    let slug = slug_from_filename(&target);
    let url = match (slug.is_empty(), anchor) {
        (true, Some(a)) => format!("#{}", a),
        (true, None) => format!("/{}/", link_prefix),
        (false, Some(a)) => format!("/{}/{}/#{}", link_prefix, slug, a),
        (false, None) => format!("/{}/{}/", link_prefix, slug),
    };
    format!("[{}]({})", label, url)
}

fn label_from_target(target: &str) -> String {
    let spaced = target.replace(['-', '_'], " ");
    let stripped = LABEL_PREFIX.replace(&spaced, "");
    fix_acronyms(&title_case(&stripped))
}

// ============ HTML ============

struct TocEntry {
    level: u8,
    id: String,
    text: String,
}

/// Render markdown to styled HTML.
pub fn render_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_SMART_PUNCTUATION);

    let mut events: Vec<Event> = Parser::new_ext(markdown, options).collect();
    let toc = assign_heading_ids(&mut events);
    let events = replace_toc_marker(events, &toc);

    let mut html = String::with_capacity(markdown.len() * 3 / 2);
    pulldown_cmark::html::push_html(&mut html, events.into_iter());
    style_html(&html)
}

fn assign_heading_ids(events: &mut [Event<'_>]) -> Vec<TocEntry> {
    let mut used: HashMap<String, usize> = HashMap::new();
    let mut toc = Vec::new();
    let mut i = 0;

    while i < events.len() {
        let Event::Start(Tag::Heading { level, .. }) = &events[i] else {
            i += 1;
            continue;
        };
        let level = *level as u8;

        let mut text = String::new();
        let mut j = i + 1;
        while j < events.len() {
            match &events[j] {
                Event::End(TagEnd::Heading(_)) => break,
                Event::Text(t) | Event::Code(t) => text.push_str(t),
                _ => {}
            }
            j += 1;
        }

        let id = unique_id(&mut used, &text);
        if let Event::Start(Tag::Heading { id: slot, .. }) = &mut events[i] {
            *slot = Some(CowStr::from(id.clone()));
        }
        toc.push(TocEntry {
            level,
            id,
            text: text.trim().to_string(),
        });
        i = j + 1;
    }
    toc
}

fn unique_id(used: &mut HashMap<String, usize>, text: &str) -> String {
    let mut base = slugify(text);
    if base.is_empty() {
        base = "section".to_string();
    }
    let count = used.entry(base.clone()).or_insert(0);
    let id = if *count == 0 {
        base
    } else {
        format!("{}_{}", base, count)
    };
    *count += 1;
    id
}

/// Swap a paragraph consisting solely of `[TOC]` for the rendered contents.
fn replace_toc_marker<'a>(events: Vec<Event<'a>>, toc: &[TocEntry]) -> Vec<Event<'a>> {
    let mut out = Vec::with_capacity(events.len());
    let mut i = 0;
    while i < events.len() {
        if matches!(events[i], Event::Start(Tag::Paragraph)) {
            if let Some(end) = toc_paragraph_end(&events, i) {
                out.push(Event::Html(CowStr::from(render_toc(toc))));
                i = end + 1;
                continue;
            }
        }
        out.push(events[i].clone());
        i += 1;
    }
    out
}

fn toc_paragraph_end(events: &[Event<'_>], start: usize) -> Option<usize> {
    let mut text = String::new();
    for (offset, event) in events[start + 1..].iter().enumerate() {
        match event {
            Event::Text(t) => text.push_str(t),
            Event::End(TagEnd::Paragraph) => {
                return (text.trim() == "[TOC]").then_some(start + 1 + offset);
            }
            _ => return None,
        }
    }
    None
}

fn render_toc(toc: &[TocEntry]) -> String {
    let mut out = String::from("<div class=\"toc\">\n");
    let mut stack: Vec<u8> = Vec::new();

    for entry in toc {
        match stack.last() {
            None => {
                out.push_str("<ul>\n");
                stack.push(entry.level);
            }
            Some(&top) if entry.level > top => {
                out.push_str("\n<ul>\n");
                stack.push(entry.level);
            }
            Some(_) => {
                out.push_str("</li>\n");
                while stack.len() > 1 && stack.last().is_some_and(|&top| entry.level < top) {
                    stack.pop();
                    out.push_str("</ul>\n</li>\n");
                }
            }
        }
        out.push_str(&format!(
            "<li><a href=\"#{}\">{}</a>",
            entry.id,
            escape_html(&entry.text)
        ));
    }

    if !stack.is_empty() {
        out.push_str("</li>\n");
        for _ in 1..stack.len() {
            out.push_str("</ul>\n</li>\n");
        }
        out.push_str("</ul>\n");
    }
    out.push_str("</div>\n");
    out
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Inline presentational styles on tables and code.
fn style_html(html: &str) -> String {
    let html = html.replace("<table>", &format!("<table style=\"{}\">", TABLE_STYLE));

    let html = TABLE_CELL.replace_all(&html, |caps: &Captures| {
        let align = caps
            .get(2)
            .and_then(|s| TEXT_ALIGN.captures(s.as_str()))
            .map(|c| c[1].to_string())
            .unwrap_or_else(|| "left".to_string());
        let base = if &caps[1] == "th" { TH_STYLE } else { TD_STYLE };
        format!("<{} style=\"{}text-align:{};\">", &caps[1], base, align)
    });

    let html = CODE_OPEN.replace_all(&html, |caps: &Captures| {
        if caps.get(1).is_some() {
            caps[0].to_string()
        } else {
            format!("<code style=\"{}\">", CODE_STYLE)
        }
    });

    html.replace("<pre>", &format!("<pre style=\"{}\">", PRE_STYLE))
}
