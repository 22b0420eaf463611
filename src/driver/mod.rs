pub mod json;

pub use json::JsonDriver;

use std::path::Path;

use crate::error::DriverError;

/// Raw paragraph as the driver reports it. Ranges are half-open character
/// offsets into the document text.
#[derive(Debug, Clone)]
pub struct ParagraphInfo {
    pub index: usize,
    pub style: String,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Raw annotation as the driver reports it; the inspector assigns ids and
/// truncates anchors.
#[derive(Debug, Clone)]
pub struct AnnotationInfo {
    pub author: String,
    pub body: String,
    pub page: u32,
    pub anchor_start: usize,
    pub anchor_end: usize,
}

#[derive(Debug, Clone)]
pub struct StyleInfo {
    pub name: String,
    /// Driver style-type code: 1 paragraph, 2 character, 3 table, 4 list.
    pub kind_code: i32,
    pub built_in: bool,
    pub in_use: bool,
}

#[derive(Debug, Clone)]
pub struct TocEntryInfo {
    pub level: u8,
    pub text: String,
    pub page_number: u32,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone)]
pub struct TocFieldInfo {
    pub position: usize,
    pub upper_level: u8,
    pub lower_level: u8,
    pub entries: Vec<TocEntryInfo>,
}

#[derive(Debug, Clone)]
pub struct HyperlinkInfo {
    pub text: String,
    pub address: String,
    pub start: usize,
    pub end: usize,
}

/// One open document. Single-threaded and blocking by contract; the core
/// never mutates a session from two places. Dropping the session closes the
/// document without saving.
pub trait DocumentSession {
    fn path(&self) -> &Path;

    // -- enumeration --
    fn paragraphs(&self) -> Result<Vec<ParagraphInfo>, DriverError>;
    fn annotations(&self) -> Result<Vec<AnnotationInfo>, DriverError>;
    fn styles(&self) -> Result<Vec<StyleInfo>, DriverError>;
    fn toc_fields(&self) -> Result<Vec<TocFieldInfo>, DriverError>;
    fn hyperlinks(&self) -> Result<Vec<HyperlinkInfo>, DriverError>;
    fn page_count(&self) -> Result<u32, DriverError>;
    fn word_count(&self) -> Result<u32, DriverError>;
    fn text_len(&self) -> Result<usize, DriverError>;
    /// Text of `[start, end)`, clamped to the document.
    fn text_range(&self, start: usize, end: usize) -> Result<String, DriverError>;
    fn bookmark_range(&self, name: &str) -> Result<Option<(usize, usize)>, DriverError>;

    // -- mutation --
    fn replace_range(&mut self, start: usize, end: usize, text: &str) -> Result<(), DriverError>;
    fn insert_after(&mut self, pos: usize, text: &str) -> Result<(), DriverError>;
    fn delete_range(&mut self, start: usize, end: usize) -> Result<(), DriverError>;
    /// Set the style of the paragraph containing `pos`; returns the old
    /// style name.
    fn set_paragraph_style(&mut self, pos: usize, style: &str) -> Result<String, DriverError>;
    /// Update the address of the hyperlink overlapping `[start, end)`, or
    /// create one spanning the range. Returns the old address if one existed.
    fn set_hyperlink_address(
        &mut self,
        start: usize,
        end: usize,
        address: &str,
    ) -> Result<Option<String>, DriverError>;
    /// Delete every TOC field; returns how many were removed.
    fn delete_toc_fields(&mut self) -> Result<usize, DriverError>;
    fn add_toc_field(&mut self, pos: usize, upper: u8, lower: u8) -> Result<(), DriverError>;
    /// Set level bounds on all TOC fields; returns how many were updated.
    fn set_toc_levels(&mut self, upper: u8, lower: u8) -> Result<usize, DriverError>;
    /// Refresh page numbers / entries of all TOC fields; returns the count.
    fn refresh_toc_fields(&mut self) -> Result<usize, DriverError>;
    /// Attach a named template. Returns false when the template is unknown
    /// to the driver (the caller decides the fallback policy).
    fn apply_template(&mut self, name: &str) -> Result<bool, DriverError>;

    fn save(&mut self) -> Result<(), DriverError>;
    fn save_as(&mut self, path: &Path) -> Result<(), DriverError>;
}

/// Factory for document sessions. Implementations wrap a concrete automation
/// backend; the crate ships [`JsonDriver`], a file-backed fixture driver the
/// CLI and test suite run against.
pub trait DocumentDriver: Send + Sync {
    fn name(&self) -> &str;
    fn is_available(&self) -> bool;
    fn supports_extension(&self, ext: &str) -> bool;
    fn open(&self, path: &Path) -> Result<Box<dyn DocumentSession>, DriverError>;
}
