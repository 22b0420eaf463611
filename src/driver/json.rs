//! File-backed fixture driver. Documents are JSON files describing
//! paragraphs, styles, bookmarks, annotations, hyperlinks, and TOC fields;
//! all ranges are half-open character offsets into the paragraph texts
//! joined with `\n`. This is the reference implementation of the driver
//! traits. Real office-suite drivers live out of crate behind the same
//! seam.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::driver::{
    AnnotationInfo, DocumentDriver, DocumentSession, HyperlinkInfo, ParagraphInfo, StyleInfo,
    TocEntryInfo, TocFieldInfo,
};
use crate::error::DriverError;

/// Simulated page size, in characters.
const CHARS_PER_PAGE: usize = 2400;

const DEFAULT_STYLE: &str = "Normal";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ParagraphRec {
    text: String,
    #[serde(default = "default_style")]
    style: String,
}

fn default_style() -> String {
    DEFAULT_STYLE.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StyleRec {
    name: String,
    #[serde(default = "default_kind_code")]
    kind: i32,
    #[serde(default)]
    built_in: bool,
    #[serde(default)]
    in_use: bool,
}

fn default_kind_code() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BookmarkRec {
    name: String,
    start: usize,
    end: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnnotationRec {
    author: String,
    body: String,
    #[serde(default = "default_page")]
    page: u32,
    anchor_start: usize,
    anchor_end: usize,
}

fn default_page() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HyperlinkRec {
    text: String,
    address: String,
    start: usize,
    end: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TocEntryRec {
    level: u8,
    text: String,
    page_number: u32,
    start: usize,
    end: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TocFieldRec {
    position: usize,
    upper_level: u8,
    lower_level: u8,
    #[serde(default)]
    entries: Vec<TocEntryRec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DocModel {
    #[serde(default)]
    paragraphs: Vec<ParagraphRec>,
    #[serde(default)]
    styles: Vec<StyleRec>,
    #[serde(default)]
    bookmarks: Vec<BookmarkRec>,
    #[serde(default)]
    annotations: Vec<AnnotationRec>,
    #[serde(default)]
    hyperlinks: Vec<HyperlinkRec>,
    #[serde(default)]
    toc_fields: Vec<TocFieldRec>,
    #[serde(default)]
    templates: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attached_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    page_count: Option<u32>,
}

/// Driver factory for JSON fixture documents.
#[derive(Debug, Default, Clone)]
pub struct JsonDriver;

impl JsonDriver {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentDriver for JsonDriver {
    fn name(&self) -> &str {
        "json"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn supports_extension(&self, ext: &str) -> bool {
        ext.eq_ignore_ascii_case("json")
    }

    fn open(&self, path: &Path) -> Result<Box<dyn DocumentSession>, DriverError> {
        let raw = std::fs::read_to_string(path).map_err(|e| DriverError::Open {
            path: path.to_path_buf(),
            message: e.to_string(),
            location: snafu::Location::default(),
        })?;
        let model: DocModel = serde_json::from_str(&raw).map_err(|e| DriverError::Open {
            path: path.to_path_buf(),
            message: format!("not a valid fixture document: {e}"),
            location: snafu::Location::default(),
        })?;
        Ok(Box::new(JsonSession {
            path: path.to_path_buf(),
            model,
        }))
    }
}

pub struct JsonSession {
    path: PathBuf,
    model: DocModel,
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn char_slice(s: &str, start: usize, end: usize) -> String {
    s.chars().skip(start).take(end.saturating_sub(start)).collect()
}

fn is_builtin_style(name: &str) -> bool {
    name == DEFAULT_STYLE
        || name == "Title"
        || name.starts_with("Heading ")
        || name.starts_with("标题")
}

/// Heading level implied by a style name, for TOC simulation.
fn heading_level_of(style: &str) -> Option<u8> {
    let heading_like =
        style.starts_with("Heading") || style.starts_with("标题") || style.starts_with("Title");
    if !heading_like {
        return None;
    }
    for ch in style.chars() {
        if let Some(digit) = ch.to_digit(10) {
            if (1..=9).contains(&digit) {
                return Some(digit as u8);
            }
        }
    }
    Some(1)
}

impl JsonSession {
    fn full_text(&self) -> String {
        self.model
            .paragraphs
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Half-open char bounds of each paragraph (excluding the joining `\n`).
    fn paragraph_bounds(&self) -> Vec<(usize, usize)> {
        let mut bounds = Vec::with_capacity(self.model.paragraphs.len());
        let mut pos = 0;
        for p in &self.model.paragraphs {
            let len = char_len(&p.text);
            bounds.push((pos, pos + len));
            pos += len + 1;
        }
        bounds
    }

    fn paragraph_at(&self, pos: usize) -> Option<usize> {
        let bounds = self.paragraph_bounds();
        for (i, (start, end)) in bounds.iter().enumerate() {
            // the joining newline belongs to the paragraph before it
            if pos >= *start && pos <= *end {
                return Some(i);
            }
        }
        if bounds.is_empty() {
            None
        } else {
            Some(bounds.len() - 1)
        }
    }

    fn clamp(&self, start: usize, end: usize) -> (usize, usize) {
        let len = char_len(&self.full_text());
        let s = start.min(len);
        let e = end.clamp(s, len);
        (s, e)
    }

    /// Core splice. Rebuilds paragraphs from the edited text, carrying styles
    /// over positionally, and shifts every stored range.
    fn apply_edit(&mut self, start: usize, end: usize, replacement: &str) {
        let text = self.full_text();
        let (start, end) = self.clamp(start, end);

        let first_p = self.paragraph_at(start).unwrap_or(0);
        let last_p = self.paragraph_at(end).unwrap_or(first_p);
        let old_styles: Vec<String> = self.model.paragraphs.iter().map(|p| p.style.clone()).collect();

        let new_text = format!(
            "{}{}{}",
            char_slice(&text, 0, start),
            replacement,
            char_slice(&text, end, char_len(&text))
        );

        let parts: Vec<&str> = new_text.split('\n').collect();
        let before = &old_styles[..first_p.min(old_styles.len())];
        let after: &[String] = if last_p + 1 < old_styles.len() {
            &old_styles[last_p + 1..]
        } else {
            &[]
        };
        let middle_count = parts.len().saturating_sub(before.len() + after.len());
        let middle_style = old_styles
            .get(first_p)
            .cloned()
            .unwrap_or_else(default_style);

        let mut styles = Vec::with_capacity(parts.len());
        styles.extend_from_slice(before);
        styles.extend(std::iter::repeat(middle_style).take(middle_count));
        styles.extend_from_slice(after);
        styles.truncate(parts.len());
        while styles.len() < parts.len() {
            styles.push(default_style());
        }

        self.model.paragraphs = parts
            .into_iter()
            .zip(styles)
            .map(|(text, style)| ParagraphRec {
                text: text.to_string(),
                style,
            })
            .collect();

        let delta = char_len(replacement) as isize - (end - start) as isize;
        let shift = |s: &mut usize, e: &mut usize| {
            if *e <= start {
                return;
            }
            if *s >= end {
                *s = (*s as isize + delta).max(0) as usize;
                *e = (*e as isize + delta).max(0) as usize;
            } else {
                // overlapping the edit: clamp onto the replaced span
                *s = (*s).min(start);
                *e = ((*e as isize + delta).max(*s as isize + 1)) as usize;
            }
        };

        for b in &mut self.model.bookmarks {
            shift(&mut b.start, &mut b.end);
        }
        for h in &mut self.model.hyperlinks {
            shift(&mut h.start, &mut h.end);
        }
        for a in &mut self.model.annotations {
            shift(&mut a.anchor_start, &mut a.anchor_end);
        }
    }

    fn recompute_toc_entries(&mut self) {
        let bounds = self.paragraph_bounds();
        let paragraphs = self.model.paragraphs.clone();
        for field in &mut self.model.toc_fields {
            let mut entries = Vec::new();
            for (i, p) in paragraphs.iter().enumerate() {
                if let Some(level) = heading_level_of(&p.style) {
                    if level >= field.upper_level && level <= field.lower_level {
                        let (start, end) = bounds[i];
                        entries.push(TocEntryRec {
                            level,
                            text: p.text.clone(),
                            page_number: (1 + start / CHARS_PER_PAGE) as u32,
                            start,
                            end,
                        });
                    }
                }
            }
            field.entries = entries;
        }
    }

    fn write_to(&self, path: &Path) -> Result<(), DriverError> {
        let json = serde_json::to_string_pretty(&self.model).map_err(|e| DriverError::Save {
            message: e.to_string(),
            location: snafu::Location::default(),
        })?;
        std::fs::write(path, json).map_err(|e| DriverError::Save {
            message: format!("{}: {e}", path.display()),
            location: snafu::Location::default(),
        })
    }
}

impl DocumentSession for JsonSession {
    fn path(&self) -> &Path {
        &self.path
    }

    fn paragraphs(&self) -> Result<Vec<ParagraphInfo>, DriverError> {
        let bounds = self.paragraph_bounds();
        Ok(self
            .model
            .paragraphs
            .iter()
            .enumerate()
            .map(|(i, p)| ParagraphInfo {
                index: i,
                style: p.style.clone(),
                text: p.text.clone(),
                start: bounds[i].0,
                end: bounds[i].1,
            })
            .collect())
    }

    fn annotations(&self) -> Result<Vec<AnnotationInfo>, DriverError> {
        Ok(self
            .model
            .annotations
            .iter()
            .map(|a| AnnotationInfo {
                author: a.author.clone(),
                body: a.body.clone(),
                page: a.page,
                anchor_start: a.anchor_start,
                anchor_end: a.anchor_end,
            })
            .collect())
    }

    fn styles(&self) -> Result<Vec<StyleInfo>, DriverError> {
        let mut styles: Vec<StyleInfo> = self
            .model
            .styles
            .iter()
            .map(|s| StyleInfo {
                name: s.name.clone(),
                kind_code: s.kind,
                built_in: s.built_in,
                in_use: s.in_use
                    || self.model.paragraphs.iter().any(|p| p.style == s.name),
            })
            .collect();
        // paragraph styles missing from the catalog still count
        for p in &self.model.paragraphs {
            if !styles.iter().any(|s| s.name == p.style) {
                styles.push(StyleInfo {
                    name: p.style.clone(),
                    kind_code: 1,
                    built_in: is_builtin_style(&p.style),
                    in_use: true,
                });
            }
        }
        Ok(styles)
    }

    fn toc_fields(&self) -> Result<Vec<TocFieldInfo>, DriverError> {
        Ok(self
            .model
            .toc_fields
            .iter()
            .map(|f| TocFieldInfo {
                position: f.position,
                upper_level: f.upper_level,
                lower_level: f.lower_level,
                entries: f
                    .entries
                    .iter()
                    .map(|e| TocEntryInfo {
                        level: e.level,
                        text: e.text.clone(),
                        page_number: e.page_number,
                        start: e.start,
                        end: e.end,
                    })
                    .collect(),
            })
            .collect())
    }

    fn hyperlinks(&self) -> Result<Vec<HyperlinkInfo>, DriverError> {
        Ok(self
            .model
            .hyperlinks
            .iter()
            .map(|h| HyperlinkInfo {
                text: h.text.clone(),
                address: h.address.clone(),
                start: h.start,
                end: h.end,
            })
            .collect())
    }

    fn page_count(&self) -> Result<u32, DriverError> {
        if let Some(pages) = self.model.page_count {
            return Ok(pages);
        }
        Ok((1 + char_len(&self.full_text()) / CHARS_PER_PAGE) as u32)
    }

    fn word_count(&self) -> Result<u32, DriverError> {
        Ok(self.full_text().split_whitespace().count() as u32)
    }

    fn text_len(&self) -> Result<usize, DriverError> {
        Ok(char_len(&self.full_text()))
    }

    fn text_range(&self, start: usize, end: usize) -> Result<String, DriverError> {
        let (s, e) = self.clamp(start, end);
        Ok(char_slice(&self.full_text(), s, e))
    }

    fn bookmark_range(&self, name: &str) -> Result<Option<(usize, usize)>, DriverError> {
        Ok(self
            .model
            .bookmarks
            .iter()
            .find(|b| b.name == name)
            .map(|b| (b.start, b.end)))
    }

    fn replace_range(&mut self, start: usize, end: usize, text: &str) -> Result<(), DriverError> {
        self.apply_edit(start, end, text);
        Ok(())
    }

    fn insert_after(&mut self, pos: usize, text: &str) -> Result<(), DriverError> {
        self.apply_edit(pos, pos, text);
        Ok(())
    }

    fn delete_range(&mut self, start: usize, end: usize) -> Result<(), DriverError> {
        self.apply_edit(start, end, "");
        Ok(())
    }

    fn set_paragraph_style(&mut self, pos: usize, style: &str) -> Result<String, DriverError> {
        let index = self.paragraph_at(pos).ok_or_else(|| DriverError::Primitive {
            op: "set_paragraph_style".to_string(),
            message: "document has no paragraphs".to_string(),
            location: snafu::Location::default(),
        })?;
        let old = std::mem::replace(&mut self.model.paragraphs[index].style, style.to_string());
        if !self.model.styles.iter().any(|s| s.name == style) {
            self.model.styles.push(StyleRec {
                name: style.to_string(),
                kind: 1,
                built_in: is_builtin_style(style),
                in_use: false,
            });
        }
        Ok(old)
    }

    fn set_hyperlink_address(
        &mut self,
        start: usize,
        end: usize,
        address: &str,
    ) -> Result<Option<String>, DriverError> {
        if let Some(link) = self
            .model
            .hyperlinks
            .iter_mut()
            .find(|h| h.start < end && start < h.end)
        {
            let old = std::mem::replace(&mut link.address, address.to_string());
            return Ok(Some(old));
        }
        let text = self.text_range(start, end)?;
        self.model.hyperlinks.push(HyperlinkRec {
            text,
            address: address.to_string(),
            start,
            end,
        });
        Ok(None)
    }

    fn delete_toc_fields(&mut self) -> Result<usize, DriverError> {
        let count = self.model.toc_fields.len();
        self.model.toc_fields.clear();
        Ok(count)
    }

    fn add_toc_field(&mut self, pos: usize, upper: u8, lower: u8) -> Result<(), DriverError> {
        self.model.toc_fields.push(TocFieldRec {
            position: pos,
            upper_level: upper,
            lower_level: lower,
            entries: Vec::new(),
        });
        self.recompute_toc_entries();
        Ok(())
    }

    fn set_toc_levels(&mut self, upper: u8, lower: u8) -> Result<usize, DriverError> {
        let count = self.model.toc_fields.len();
        for field in &mut self.model.toc_fields {
            field.upper_level = upper;
            field.lower_level = lower;
        }
        self.recompute_toc_entries();
        Ok(count)
    }

    fn refresh_toc_fields(&mut self) -> Result<usize, DriverError> {
        let count = self.model.toc_fields.len();
        self.recompute_toc_entries();
        Ok(count)
    }

    fn apply_template(&mut self, name: &str) -> Result<bool, DriverError> {
        if name == "default" || self.model.templates.iter().any(|t| t == name) {
            self.model.attached_template = Some(name.to_string());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn save(&mut self) -> Result<(), DriverError> {
        let path = self.path.clone();
        self.write_to(&path)
    }

    fn save_as(&mut self, path: &Path) -> Result<(), DriverError> {
        self.write_to(path)?;
        self.path = path.to_path_buf();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> JsonSession {
        JsonSession {
            path: PathBuf::from("doc.json"),
            model: DocModel {
                paragraphs: vec![
                    ParagraphRec {
                        text: "Introduction".to_string(),
                        style: "Heading 1".to_string(),
                    },
                    ParagraphRec {
                        text: "Some body text with foo inside.".to_string(),
                        style: DEFAULT_STYLE.to_string(),
                    },
                    ParagraphRec {
                        text: "Details".to_string(),
                        style: "Heading 2".to_string(),
                    },
                ],
                bookmarks: vec![BookmarkRec {
                    name: "intro".to_string(),
                    start: 0,
                    end: 12,
                }],
                hyperlinks: vec![HyperlinkRec {
                    text: "foo".to_string(),
                    address: "https://old.example.com".to_string(),
                    start: 33,
                    end: 36,
                }],
                toc_fields: vec![TocFieldRec {
                    position: 0,
                    upper_level: 1,
                    lower_level: 3,
                    entries: Vec::new(),
                }],
                ..DocModel::default()
            },
        }
    }

    #[test]
    fn text_is_paragraphs_joined_by_newline() {
        let doc = fixture();
        let text = doc.full_text();
        assert!(text.starts_with("Introduction\nSome body"));
        assert_eq!(doc.text_range(0, 12).unwrap(), "Introduction");
    }

    #[test]
    fn replace_shifts_later_ranges() {
        let mut doc = fixture();
        // replace "Introduction" (12 chars) with "Intro" (5 chars)
        doc.replace_range(0, 12, "Intro").unwrap();
        assert_eq!(doc.model.paragraphs[0].text, "Intro");
        // hyperlink moved left by 7
        assert_eq!(doc.model.hyperlinks[0].start, 26);
        assert_eq!(doc.model.hyperlinks[0].end, 29);
        // styles survive the splice
        assert_eq!(doc.model.paragraphs[0].style, "Heading 1");
        assert_eq!(doc.model.paragraphs[2].style, "Heading 2");
    }

    #[test]
    fn set_paragraph_style_returns_old_name() {
        let mut doc = fixture();
        let old = doc.set_paragraph_style(0, "Heading 2").unwrap();
        assert_eq!(old, "Heading 1");
        assert_eq!(doc.model.paragraphs[0].style, "Heading 2");
    }

    #[test]
    fn styles_report_in_use_from_paragraphs() {
        let doc = fixture();
        let styles = doc.styles().unwrap();
        let h1 = styles.iter().find(|s| s.name == "Heading 1").unwrap();
        assert!(h1.in_use);
        assert!(h1.built_in);
    }

    #[test]
    fn toc_refresh_collects_headings_in_bounds() {
        let mut doc = fixture();
        doc.refresh_toc_fields().unwrap();
        let fields = doc.toc_fields().unwrap();
        assert_eq!(fields[0].entries.len(), 2);
        assert_eq!(fields[0].entries[0].text, "Introduction");
        assert_eq!(fields[0].entries[1].level, 2);

        doc.set_toc_levels(1, 1).unwrap();
        let fields = doc.toc_fields().unwrap();
        assert_eq!(fields[0].entries.len(), 1);
    }

    #[test]
    fn unknown_template_is_rejected() {
        let mut doc = fixture();
        assert!(!doc.apply_template("corporate").unwrap());
        assert!(doc.apply_template("default").unwrap());
        assert_eq!(doc.model.attached_template.as_deref(), Some("default"));
    }
}
