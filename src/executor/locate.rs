//! Locator resolution against a live session. Every locator resolves to a
//! concrete range or the `[0, 1)` sentinel with a warning; no error escapes
//! except driver faults. Safe mode disables the fuzzy fallback instead.

use crate::driver::DocumentSession;
use crate::error::DriverError;
use crate::inspect::is_heading_style;
use crate::schema::Locator;

/// A resolved target range. `warning` is set when resolution fell back to
/// something weaker than the caller asked for.
#[derive(Debug, Clone)]
pub struct Located {
    pub start: usize,
    pub end: usize,
    pub warning: Option<String>,
}

impl Located {
    fn exact(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            warning: None,
        }
    }

    /// The total-function sentinel: the document start, flagged.
    fn sentinel(reason: String) -> Self {
        Self {
            start: 0,
            end: 1,
            warning: Some(reason),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.start == 0 && self.end == 1 && self.warning.is_some()
    }
}

/// Resolve a locator. With `allow_fuzzy` off (safe mode) a miss returns
/// `None` instead of the sentinel, and the caller fails the task.
pub fn resolve(
    session: &dyn DocumentSession,
    locator: &Locator,
    allow_fuzzy: bool,
) -> Result<Option<Located>, DriverError> {
    match locator {
        Locator::Bookmark(name) => {
            if let Some((start, end)) = session.bookmark_range(name)? {
                return Ok(Some(Located::exact(start, end)));
            }
            tracing::warn!(bookmark = %name, "bookmark not found, falling back to text search");
            find_text(session, name, allow_fuzzy)
        }
        Locator::Range { start, end } => {
            let len = session.text_len()?;
            let s = (*start).min(len.saturating_sub(1));
            let e = (*end).clamp(s + 1, len.max(s + 1));
            Ok(Some(Located::exact(s, e)))
        }
        Locator::Heading(text) => {
            let needle = text.trim();
            for p in session.paragraphs()? {
                if !is_heading_style(&p.style) {
                    continue;
                }
                let para_text = p.text.trim();
                // substring match either way
                if para_text.contains(needle)
                    || (!para_text.is_empty() && needle.contains(para_text))
                {
                    return Ok(Some(Located::exact(p.start, p.end)));
                }
            }
            tracing::warn!(heading = %needle, "heading not found, falling back to text search");
            find_text(session, needle, allow_fuzzy)
        }
        Locator::Find(text) => find_text(session, text, allow_fuzzy),
    }
}

/// Case-insensitive whole-document search with a fuzzy token fallback.
fn find_text(
    session: &dyn DocumentSession,
    needle: &str,
    allow_fuzzy: bool,
) -> Result<Option<Located>, DriverError> {
    let len = session.text_len()?;
    let haystack = session.text_range(0, len)?;

    if let Some((start, end)) = search_ci(&haystack, needle) {
        return Ok(Some(Located::exact(start, end)));
    }

    if !allow_fuzzy {
        return Ok(None);
    }

    // fuzzy fallback: each whitespace token of length >= 3, first hit wins
    for token in needle.split_whitespace() {
        if token.chars().count() < 3 {
            continue;
        }
        if let Some((start, end)) = search_ci(&haystack, token) {
            tracing::info!(token = %token, "fuzzy match succeeded");
            return Ok(Some(Located {
                start,
                end,
                warning: Some(format!("fuzzy match on token '{token}'")),
            }));
        }
    }

    tracing::warn!(needle = %needle, "no match anywhere in document");
    Ok(Some(Located::sentinel(format!(
        "could not locate '{needle}'; using document start"
    ))))
}

/// Case-insensitive search returning char offsets. Lowercasing is done
/// per-char (first mapping only) so offsets stay 1:1 with the original.
fn search_ci(haystack: &str, needle: &str) -> Option<(usize, usize)> {
    let hay: Vec<char> = haystack
        .chars()
        .map(|c| c.to_lowercase().next().unwrap_or(c))
        .collect();
    let pat: Vec<char> = needle
        .trim()
        .chars()
        .map(|c| c.to_lowercase().next().unwrap_or(c))
        .collect();
    if pat.is_empty() || pat.len() > hay.len() {
        return None;
    }
    for start in 0..=(hay.len() - pat.len()) {
        if hay[start..start + pat.len()] == pat[..] {
            return Some((start, start + pat.len()));
        }
    }
    None
}
