//! Assembles the system/user prompt pair for task synthesis, estimates token
//! cost, and splits oversized contexts into chunks the planner re-merges.

use std::fmt::Write as _;

use crate::schema::{task_plan_schema, Annotation, Structure};

/// Gate L1: hard constraints the model sees on every call.
pub const SYSTEM_PROMPT: &str = "\
You are a document automation assistant. Reviewer annotations are attached to \
a document; turn them into an ordered list of edit tasks.

Hard rules:
- Do NOT change formatting unless an annotation explicitly demands it. \
Formatting includes styles, heading levels, templates, tables of contents, \
and hyperlink targets.
- Emit ONLY a single valid JSON object matching the supplied schema. No \
prose, no code fences.
- Every task must reference the id of the annotation that requested it in \
source_comment_id. Formatting tasks without an authorizing annotation will \
be discarded.

Supported task types:
- rewrite, insert, delete, refresh_toc_numbers: content edits, allowed \
without an annotation reference.
- set_paragraph_style, set_heading_level, apply_template, replace_hyperlink, \
rebuild_toc, update_toc_levels: formatting edits, each REQUIRES \
source_comment_id.

Locator types: find (text search), heading (heading text), bookmark \
(bookmark name), range (\"start-end\" character offsets).";

const MAX_HEADING_EXAMPLES: usize = 3;
const MAX_TOC_EXAMPLES: usize = 5;
const MAX_STYLE_NAMES_PER_KIND: usize = 5;
const ANCHOR_EXCERPT_CAP: usize = 80;
const BODY_EXCERPT_CAP: usize = 150;

/// System + user message pair, ready for the LLM client.
#[derive(Debug, Clone)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

/// Everything the prompt is built from. Chunking produces derived contexts
/// with filtered headings/annotations; styles stay global.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub structure: Structure,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone)]
pub struct LengthCheck {
    pub estimated_tokens: usize,
    pub budget: usize,
    pub within_budget: bool,
}

fn truncate(text: &str, cap: usize) -> String {
    let count = text.chars().count();
    if count <= cap {
        return text.to_string();
    }
    let mut out: String = text.chars().take(cap.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

/// Heuristic token estimate: 1.5x East-Asian code points + whitespace-split
/// Latin tokens + 0.5x other punctuation. Only used for overflow detection.
pub fn estimate_tokens(text: &str) -> usize {
    let east_asian = text.chars().filter(|&c| is_east_asian(c)).count();
    let latin_tokens = text
        .split_whitespace()
        .filter(|token| token.chars().any(|c| c.is_alphanumeric() && !is_east_asian(c)))
        .count();
    let punct = text
        .chars()
        .filter(|&c| !c.is_alphanumeric() && !c.is_whitespace() && !is_east_asian(c))
        .count();
    (east_asian * 3) / 2 + latin_tokens + punct / 2
}

fn is_east_asian(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}'     // hiragana, katakana
        | '\u{3400}'..='\u{4DBF}'   // CJK extension A
        | '\u{4E00}'..='\u{9FFF}'   // CJK unified
        | '\u{AC00}'..='\u{D7AF}'   // hangul syllables
        | '\u{F900}'..='\u{FAFF}'   // CJK compatibility
    )
}

pub fn build_prompt(context: &PromptContext) -> PromptPair {
    PromptPair {
        system: SYSTEM_PROMPT.to_string(),
        user: build_user_prompt(context),
    }
}

fn build_user_prompt(context: &PromptContext) -> String {
    let schema = task_plan_schema();
    let schema_json =
        serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string());

    format!(
        "Document structure summary:\n{}\n\nAnnotations:\n{}\n\nReturn a task \
         list as a single JSON object matching this schema:\n{}\n\nRemember: \
         no format changes without an explicit annotation, and every task \
         carries the source_comment_id of the annotation that requested it.",
        structure_summary(&context.structure),
        annotation_summary(&context.annotations),
        schema_json
    )
}

/// Bucketed overview of the document's format-bearing elements.
pub fn structure_summary(structure: &Structure) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Statistics: {} pages, {} words",
        structure.page_count, structure.word_count
    );

    if !structure.headings.is_empty() {
        let _ = writeln!(out, "Headings ({}):", structure.headings.len());
        let mut levels: Vec<u8> = structure.headings.iter().map(|h| h.level).collect();
        levels.sort_unstable();
        levels.dedup();
        for level in levels {
            let of_level: Vec<_> = structure
                .headings
                .iter()
                .filter(|h| h.level == level)
                .collect();
            let _ = writeln!(out, "  level {} ({}):", level, of_level.len());
            for heading in of_level.iter().take(MAX_HEADING_EXAMPLES) {
                let _ = writeln!(out, "    - {}", truncate(&heading.text, 60));
            }
            if of_level.len() > MAX_HEADING_EXAMPLES {
                let _ = writeln!(out, "    - ... {} more", of_level.len() - MAX_HEADING_EXAMPLES);
            }
        }
    }

    let in_use: Vec<_> = structure.styles.iter().filter(|s| s.in_use).collect();
    if !in_use.is_empty() {
        let _ = writeln!(out, "Styles in use ({}):", in_use.len());
        for kind in ["paragraph", "character", "table", "list"] {
            let names: Vec<&str> = in_use
                .iter()
                .filter(|s| s.kind.as_str() == kind)
                .map(|s| s.name.as_str())
                .collect();
            if names.is_empty() {
                continue;
            }
            let shown = names
                .iter()
                .take(MAX_STYLE_NAMES_PER_KIND)
                .copied()
                .collect::<Vec<_>>()
                .join(", ");
            if names.len() > MAX_STYLE_NAMES_PER_KIND {
                let _ = writeln!(
                    out,
                    "  {kind}: {shown} (+{} more)",
                    names.len() - MAX_STYLE_NAMES_PER_KIND
                );
            } else {
                let _ = writeln!(out, "  {kind}: {shown}");
            }
        }
    }

    if !structure.toc_entries.is_empty() {
        let _ = writeln!(out, "TOC entries ({}):", structure.toc_entries.len());
        for entry in structure.toc_entries.iter().take(MAX_TOC_EXAMPLES) {
            let _ = writeln!(
                out,
                "  level {}: {} (page {})",
                entry.level,
                truncate(&entry.text, 50),
                entry.page_number
            );
        }
        if structure.toc_entries.len() > MAX_TOC_EXAMPLES {
            let _ = writeln!(
                out,
                "  ... {} more entries",
                structure.toc_entries.len() - MAX_TOC_EXAMPLES
            );
        }
    }

    if !structure.hyperlinks.is_empty() {
        let _ = writeln!(out, "Hyperlinks ({}):", structure.hyperlinks.len());
        for kind in ["web", "email", "file", "internal"] {
            let count = structure
                .hyperlinks
                .iter()
                .filter(|h| h.kind.as_str() == kind)
                .count();
            if count > 0 {
                let _ = writeln!(out, "  {kind}: {count}");
            }
        }
    }

    out
}

/// Per-annotation detail list the model plans from.
pub fn annotation_summary(annotations: &[Annotation]) -> String {
    if annotations.is_empty() {
        return "(none)".to_string();
    }
    let mut out = String::new();
    for (i, ann) in annotations.iter().enumerate() {
        let _ = writeln!(out, "{}. id: {}", i + 1, ann.id);
        let _ = writeln!(out, "   author: {} (page {})", ann.author, ann.page);
        if !ann.anchor_text.is_empty() {
            let _ = writeln!(
                out,
                "   anchor: \"{}\"",
                truncate(&ann.anchor_text, ANCHOR_EXCERPT_CAP)
            );
        }
        let _ = writeln!(
            out,
            "   instruction: \"{}\"",
            truncate(&ann.body_text, BODY_EXCERPT_CAP)
        );
        let _ = writeln!(out, "   range: {}-{}", ann.range_start, ann.range_end);
    }
    out
}

pub fn check_context_length(context: &PromptContext, budget: usize) -> LengthCheck {
    let pair = build_prompt(context);
    let estimated = estimate_tokens(&pair.system) + estimate_tokens(&pair.user);
    LengthCheck {
        estimated_tokens: estimated,
        budget,
        within_budget: estimated <= budget,
    }
}

/// Split an oversized context. Preferred: bands between consecutive level-1
/// heading starts (styles stay global in every chunk). Fallback when fewer
/// than two level-1 headings exist: annotations in roughly three equal
/// groups.
pub fn split_into_chunks(context: &PromptContext) -> Vec<PromptContext> {
    let chunks = split_by_headings(context);
    if chunks.len() > 1 {
        return chunks;
    }
    split_by_annotations(context)
}

fn split_by_headings(context: &PromptContext) -> Vec<PromptContext> {
    let level_1: Vec<_> = context
        .structure
        .headings
        .iter()
        .filter(|h| h.level == 1)
        .collect();
    if level_1.len() <= 1 {
        return vec![context.clone()];
    }

    let mut chunks = Vec::with_capacity(level_1.len());
    for (i, top) in level_1.iter().enumerate() {
        let band_start = top.range_start;
        let band_end = level_1
            .get(i + 1)
            .map(|next| next.range_start)
            .unwrap_or(usize::MAX);

        let in_band = |start: usize| start >= band_start && start < band_end;

        let structure = Structure {
            headings: context
                .structure
                .headings
                .iter()
                .filter(|h| in_band(h.range_start))
                .cloned()
                .collect(),
            // styles are global
            styles: context.structure.styles.clone(),
            toc_entries: Vec::new(),
            hyperlinks: context
                .structure
                .hyperlinks
                .iter()
                .filter(|h| in_band(h.range_start))
                .cloned()
                .collect(),
            page_count: context.structure.page_count,
            word_count: context.structure.word_count,
        };
        let annotations = context
            .annotations
            .iter()
            .filter(|a| in_band(a.range_start))
            .cloned()
            .collect();
        chunks.push(PromptContext {
            structure,
            annotations,
        });
    }
    chunks
}

fn split_by_annotations(context: &PromptContext) -> Vec<PromptContext> {
    if context.annotations.is_empty() {
        return vec![context.clone()];
    }
    let per_chunk = (context.annotations.len() / 3).max(1);
    context
        .annotations
        .chunks(per_chunk)
        .map(|group| PromptContext {
            structure: context.structure.clone(),
            annotations: group.to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Heading;

    fn annotation(id: &str, start: usize) -> Annotation {
        Annotation {
            id: id.to_string(),
            author: "Reviewer".to_string(),
            page: 1,
            anchor_text: "anchor".to_string(),
            body_text: "do something".to_string(),
            range_start: start,
            range_end: start + 5,
            created_at: None,
        }
    }

    fn heading(level: u8, text: &str, start: usize) -> Heading {
        Heading {
            level,
            text: text.to_string(),
            style: format!("Heading {level}"),
            range_start: start,
            range_end: start + text.chars().count(),
        }
    }

    #[test]
    fn token_estimate_weights_east_asian_text() {
        // 4 CJK chars -> 6; "hello world" -> 2 tokens
        assert_eq!(estimate_tokens("文档结构"), 6);
        assert_eq!(estimate_tokens("hello world"), 2);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn prompt_carries_schema_and_annotations() {
        let context = PromptContext {
            structure: Structure::default(),
            annotations: vec![annotation("comment_1", 0)],
        };
        let pair = build_prompt(&context);
        assert!(pair.system.contains("source_comment_id"));
        assert!(pair.user.contains("comment_1"));
        assert!(pair.user.contains("\"tasks\""));
    }

    #[test]
    fn two_top_headings_split_into_bands() {
        let context = PromptContext {
            structure: Structure {
                headings: vec![
                    heading(1, "One", 0),
                    heading(2, "One.A", 20),
                    heading(1, "Two", 100),
                ],
                ..Structure::default()
            },
            annotations: vec![annotation("comment_1", 25), annotation("comment_2", 150)],
        };
        let chunks = split_into_chunks(&context);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].structure.headings.len(), 2);
        assert_eq!(chunks[0].annotations.len(), 1);
        assert_eq!(chunks[0].annotations[0].id, "comment_1");
        assert_eq!(chunks[1].annotations[0].id, "comment_2");
    }

    #[test]
    fn single_top_heading_falls_back_to_annotation_split() {
        let annotations: Vec<Annotation> = (0..6)
            .map(|i| annotation(&format!("comment_{}", i + 1), i * 10))
            .collect();
        let context = PromptContext {
            structure: Structure {
                headings: vec![heading(1, "Only", 0)],
                ..Structure::default()
            },
            annotations,
        };
        let chunks = split_into_chunks(&context);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.annotations.len() == 2));
        // structure is carried whole in the fallback split
        assert_eq!(chunks[0].structure.headings.len(), 1);
    }
}
