//! Document type detection and text extraction.

use crate::error::PipelineError;
use lopdf::Document;
use std::path::Path;
use tracing::debug;

const PDF_MIME: &str = "application/pdf";

/// MIME type for a file, inferred from its extension.
pub fn detect_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => PDF_MIME,
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "ppt" => "application/vnd.ms-powerpoint",
        "txt" | "text" => "text/plain",
        "csv" => "text/csv",
        "md" | "markdown" => "text/markdown",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

/// Whether text can be read directly out of this MIME type.
pub fn is_text_type(mime: &str) -> bool {
    mime.starts_with("text/") || mime == "application/csv" || mime == "application/json"
}

/// Read the text content of a stored document.
///
/// Text types are read as UTF-8 and PDFs page by page. Images and slide
/// decks are not supported.
pub async fn extract_text(path: &Path, mime: &str) -> Result<String, PipelineError> {
    if mime == PDF_MIME {
        let bytes = tokio::fs::read(path).await?;
        return tokio::task::spawn_blocking(move || pdf_text(&bytes))
            .await
            .map_err(|e| PipelineError::PdfParse(e.to_string()))?;
    }

    if !is_text_type(mime) {
        return Err(PipelineError::UnsupportedDocumentType(mime.to_string()));
    }

    let bytes = tokio::fs::read(path).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Text of every page, whitespace-collapsed, one line per page.
fn pdf_text(bytes: &[u8]) -> Result<String, PipelineError> {
    let doc = Document::load_mem(bytes).map_err(|e| PipelineError::PdfParse(e.to_string()))?;

    let mut pages = Vec::new();
    for page_number in doc.get_pages().keys() {
        let text = doc
            .extract_text(&[*page_number])
            .map_err(|e| PipelineError::PdfParse(e.to_string()))?;
        pages.push(text.split_whitespace().collect::<Vec<_>>().join(" "));
    }
    debug!("Read {} PDF page(s)", pages.len());

    Ok(pages.join("\n").trim().to_string())
}
