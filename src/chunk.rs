//! Section-boundary document chunker.
//!
//! Splits a document body into [`Chunk`]s on second-level headings
//! (`## ...`). Every chunk's embedding input starts with the same preamble
//! (title, summary, key concepts, tags, questions) so each vector keeps the
//! document-level context, while `raw_text` holds only the section.
//!
//! Indices are contiguous over emitted chunks: a heading with an empty
//! section is dropped without consuming an index.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::Chunk;

static SECTION_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^## .+$").unwrap());

/// Header label for text preceding the first section.
pub const INTRODUCTION: &str = "Introduction";

/// Document-level context repeated in every chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkContext<'a> {
    pub title: &'a str,
    pub semantic_summary: Option<&'a str>,
    pub synthetic_questions: &'a [String],
    pub key_concepts: &'a [String],
    pub tags: &'a [String],
}

impl ChunkContext<'_> {
    /// Preamble lines joined by newlines, followed by a blank line.
    pub fn preamble(&self) -> String {
        let mut parts = vec![self.title.to_string()];
        if let Some(summary) = self.semantic_summary.filter(|s| !s.is_empty()) {
            parts.push(summary.to_string());
        }
        if !self.key_concepts.is_empty() {
            parts.push(format!("Key concepts: {}", self.key_concepts.join(", ")));
        }
        if !self.tags.is_empty() {
            parts.push(format!("Tags: {}", self.tags.join(", ")));
        }
        if !self.synthetic_questions.is_empty() {
            parts.push(format!(
                "Questions this answers: {}",
                self.synthetic_questions.join(" | ")
            ));
        }
        format!("{}\n\n", parts.join("\n"))
    }
}

/// Split `body` into section chunks. An empty body yields no chunks.
pub fn chunk_document(ctx: &ChunkContext<'_>, body: &str) -> Vec<Chunk> {
    let preamble = ctx.preamble();
    let mut chunks: Vec<Chunk> = Vec::new();

    let headings: Vec<_> = SECTION_HEADING.find_iter(body).collect();
    let intro_end = headings.first().map(|m| m.start()).unwrap_or(body.len());

    if !headings.is_empty() {
        let intro = body[..intro_end].trim();
        if !intro.is_empty() {
            push_chunk(&mut chunks, &preamble, INTRODUCTION, intro.to_string());
        }
    }

    for (i, heading) in headings.iter().enumerate() {
        let section_end = headings
            .get(i + 1)
            .map(|next| next.start())
            .unwrap_or(body.len());
        let section_body = body[heading.end()..section_end].trim();
        if section_body.is_empty() {
            continue;
        }
        let header = heading.as_str().trim();
        let label = header.trim_start_matches(['#', ' ']).trim();
        push_chunk(
            &mut chunks,
            &preamble,
            label,
            format!("{}\n{}", header, section_body),
        );
    }

    let whole = body.trim();
    if chunks.is_empty() && !whole.is_empty() {
        push_chunk(&mut chunks, &preamble, "", whole.to_string());
    }

    chunks
}

fn push_chunk(chunks: &mut Vec<Chunk>, preamble: &str, header: &str, raw_text: String) {
    chunks.push(Chunk {
        index: chunks.len(),
        section_header: header.to_string(),
        content: format!("{}{}", preamble, raw_text),
        raw_text,
    });
}
