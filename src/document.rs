//! Plain-text extraction from uploaded documents.
//!
//! Dispatch is by filename suffix, case-insensitive. PDF extraction is
//! delegated to `pdf-extract` behind a `catch_unwind` guard: the underlying
//! parser is allowed to panic on hostile input, this component is not.
//! Failures are always recoverable ingestion errors, never crashes.

use crate::{Error, Result};
use docx_rs::DocumentChild;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;

/// Extract plain text from `bytes`, dispatching on `filename`'s suffix.
///
/// - `.pdf`: concatenated page text; pages without extractable text
///   contribute nothing.
/// - `.docx`: paragraph text joined by newlines.
/// - `.txt` / `.md`: UTF-8 decode with invalid bytes replaced, not rejected.
/// - anything else: [`Error::UnsupportedFormat`].
///
/// A PDF or DOCX that parses but yields only whitespace fails with
/// [`Error::EmptyDocument`]; plain-text files may legitimately be empty.
pub fn parse(filename: &str, bytes: &[u8]) -> Result<String> {
    let suffix = Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match suffix.as_str() {
        "pdf" => parse_pdf(filename, bytes),
        "docx" => parse_docx(filename, bytes),
        "txt" | "md" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        _ => Err(Error::UnsupportedFormat(filename.to_string())),
    }
}

fn parse_pdf(filename: &str, bytes: &[u8]) -> Result<String> {
    // pdf-extract panics on some malformed inputs; contain that here.
    let extracted = catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes)));

    let text = match extracted {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            return Err(Error::EmptyDocument(format!(
                "{filename}: PDF extraction failed: {e}"
            )));
        }
        Err(_) => {
            return Err(Error::EmptyDocument(format!(
                "{filename}: PDF extraction panicked on malformed input"
            )));
        }
    };

    if text.trim().is_empty() {
        return Err(Error::EmptyDocument(filename.to_string()));
    }
    Ok(text)
}

fn parse_docx(filename: &str, bytes: &[u8]) -> Result<String> {
    let docx = docx_rs::read_docx(bytes)
        .map_err(|e| Error::EmptyDocument(format!("{filename}: DOCX read failed: {e}")))?;

    let mut paragraphs = Vec::new();
    for child in &docx.document.children {
        if let DocumentChild::Paragraph(p) = child {
            paragraphs.push(p.raw_text());
        }
    }
    let text = paragraphs.join("\n");

    if text.trim().is_empty() {
        return Err(Error::EmptyDocument(filename.to_string()));
    }
    Ok(text)
}
