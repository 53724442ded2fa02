//! Expected processing time by document type.
//!
//! Page-heavy formats get the largest budget; plain text the smallest. The
//! timeout sweep multiplies these, so they only need to be in the right
//! ballpark.

use std::path::Path;

use chrono::Duration;

/// Broad document class, decided by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentClass {
    Paged,
    Spreadsheet,
    Image,
    Text,
    Other,
}

impl DocumentClass {
    pub fn of(document_path: &str) -> Self {
        let ext = Path::new(document_path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("pdf" | "doc" | "docx" | "ppt" | "pptx") => DocumentClass::Paged,
            Some("xls" | "xlsx" | "xlsm" | "csv") => DocumentClass::Spreadsheet,
            Some("png" | "jpg" | "jpeg" | "tif" | "tiff" | "gif") => DocumentClass::Image,
            Some("txt" | "md" | "json" | "xml") => DocumentClass::Text,
            _ => DocumentClass::Other,
        }
    }

    pub fn estimated_duration(self) -> Duration {
        match self {
            DocumentClass::Paged => Duration::minutes(10),
            DocumentClass::Spreadsheet => Duration::minutes(5),
            DocumentClass::Image => Duration::minutes(3),
            DocumentClass::Text => Duration::minutes(1),
            DocumentClass::Other => Duration::minutes(5),
        }
    }
}

pub fn estimate_duration(document_path: &str) -> Duration {
    DocumentClass::of(document_path).estimated_duration()
}
