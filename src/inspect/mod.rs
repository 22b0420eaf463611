//! Builds value-typed [`Structure`] and [`Annotation`] snapshots from a live
//! document session. Element-level failures are logged and skipped; only a
//! document that cannot be read at all aborts extraction.

use snafu::ResultExt;

use crate::driver::DocumentSession;
use crate::error::{redline_error, Result};
use crate::schema::{Annotation, Heading, Hyperlink, LinkKind, Structure, Style, StyleKind, TocEntry};

/// Anchor excerpts are capped at extraction time.
const ANCHOR_TEXT_CAP: usize = 50;

/// Style-name prefixes that mark a paragraph as a heading.
const HEADING_STYLE_PREFIXES: &[&str] = &["Heading", "Title", "标题"];

/// Localized number words tried when a heading style carries no digit.
const NUMBER_WORDS: &[(char, u8)] = &[
    ('一', 1),
    ('二', 2),
    ('三', 3),
    ('四', 4),
    ('五', 5),
    ('六', 6),
    ('七', 7),
    ('八', 8),
    ('九', 9),
];

/// Heading level from a style name: first Arabic digit 1-9 wins, then
/// localized number words, then 1.
pub fn heading_level_from_style(style: &str) -> u8 {
    for ch in style.chars() {
        if let Some(digit) = ch.to_digit(10) {
            if (1..=9).contains(&digit) {
                return digit as u8;
            }
        }
    }
    for ch in style.chars() {
        if let Some(&(_, level)) = NUMBER_WORDS.iter().find(|(word, _)| *word == ch) {
            return level;
        }
    }
    1
}

pub fn is_heading_style(style: &str) -> bool {
    HEADING_STYLE_PREFIXES
        .iter()
        .any(|prefix| style.starts_with(prefix))
}

/// Classify a hyperlink address.
pub fn classify_link(address: &str) -> LinkKind {
    let trimmed = address.trim();
    let lower = trimmed.to_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return LinkKind::Web;
    }
    if lower.starts_with("mailto:") {
        return LinkKind::Email;
    }
    if trimmed.contains('@') && trimmed.contains('.') && !trimmed.contains(' ') {
        return LinkKind::Email;
    }
    if lower.starts_with("file://") {
        return LinkKind::File;
    }
    // extension-bearing relative path, e.g. "docs/intro.pdf"
    if (trimmed.contains('/') || trimmed.contains('\\'))
        && trimmed.rsplit('.').next().map(|ext| !ext.is_empty() && ext.len() <= 5)
            == Some(true)
    {
        return LinkKind::File;
    }
    LinkKind::Internal
}

fn truncate_chars(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        text.to_string()
    } else {
        text.chars().take(cap).collect()
    }
}

/// Extract the annotation list. Ids are `comment_<n>`, stable for the run.
pub fn extract_annotations(session: &dyn DocumentSession) -> Result<Vec<Annotation>> {
    let raw = session
        .annotations()
        .context(redline_error::DriverSnafu)?;

    let mut annotations = Vec::with_capacity(raw.len());
    for (i, info) in raw.into_iter().enumerate() {
        let anchor = session
            .text_range(info.anchor_start, info.anchor_end)
            .unwrap_or_default();
        let annotation = Annotation {
            id: format!("comment_{}", i + 1),
            author: info.author,
            page: info.page,
            anchor_text: truncate_chars(anchor.trim(), ANCHOR_TEXT_CAP),
            body_text: info.body.trim().to_string(),
            range_start: info.anchor_start,
            range_end: info.anchor_end,
            created_at: None,
        };
        if let Err(reason) = annotation.validate() {
            tracing::warn!(index = i + 1, "skipping malformed annotation: {reason}");
            continue;
        }
        annotations.push(annotation);
    }
    Ok(annotations)
}

/// Extract the format-bearing structure of the document.
pub fn extract_structure(session: &dyn DocumentSession) -> Result<Structure> {
    let paragraphs = session.paragraphs().context(redline_error::DriverSnafu)?;

    let mut headings = Vec::new();
    for p in &paragraphs {
        if !is_heading_style(&p.style) {
            continue;
        }
        let text = p.text.trim();
        if text.is_empty() {
            tracing::debug!(index = p.index, "skipping empty heading paragraph");
            continue;
        }
        headings.push(Heading {
            level: heading_level_from_style(&p.style),
            text: text.to_string(),
            style: p.style.clone(),
            range_start: p.start,
            range_end: p.end,
        });
    }

    let styles = session
        .styles()
        .context(redline_error::DriverSnafu)?
        .into_iter()
        .map(|s| Style {
            name: s.name,
            kind: StyleKind::from_driver_code(s.kind_code),
            built_in: s.built_in,
            in_use: s.in_use,
        })
        .collect();

    let mut toc_entries = Vec::new();
    for field in session.toc_fields().context(redline_error::DriverSnafu)? {
        for entry in field.entries {
            toc_entries.push(TocEntry {
                level: entry.level,
                text: entry.text,
                page_number: entry.page_number,
                range_start: entry.start,
                range_end: entry.end,
            });
        }
    }

    let hyperlinks = session
        .hyperlinks()
        .context(redline_error::DriverSnafu)?
        .into_iter()
        .map(|h| Hyperlink {
            kind: classify_link(&h.address),
            text: h.text,
            address: h.address,
            range_start: h.start,
            range_end: h.end,
        })
        .collect();

    Ok(Structure {
        headings,
        styles,
        toc_entries,
        hyperlinks,
        page_count: session.page_count().context(redline_error::DriverSnafu)?,
        word_count: session.word_count().context(redline_error::DriverSnafu)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digit_beats_number_word() {
        assert_eq!(heading_level_from_style("Heading 3"), 3);
        assert_eq!(heading_level_from_style("标题 2"), 2);
        assert_eq!(heading_level_from_style("标题 二"), 2);
        assert_eq!(heading_level_from_style("标题三"), 3);
    }

    #[test]
    fn unnumbered_heading_defaults_to_one() {
        assert_eq!(heading_level_from_style("Title"), 1);
        assert_eq!(heading_level_from_style("Heading"), 1);
    }

    #[test]
    fn link_classification() {
        assert_eq!(classify_link("https://example.com"), LinkKind::Web);
        assert_eq!(classify_link("http://example.com/x"), LinkKind::Web);
        assert_eq!(classify_link("mailto:a@b.com"), LinkKind::Email);
        assert_eq!(classify_link("a@b.com"), LinkKind::Email);
        assert_eq!(classify_link("file:///tmp/x.pdf"), LinkKind::File);
        assert_eq!(classify_link("docs/intro.pdf"), LinkKind::File);
        assert_eq!(classify_link("section-2"), LinkKind::Internal);
    }

    #[test]
    fn heading_style_prefixes() {
        assert!(is_heading_style("Heading 1"));
        assert!(is_heading_style("Title"));
        assert!(is_heading_style("标题 1"));
        assert!(!is_heading_style("Normal"));
    }
}
