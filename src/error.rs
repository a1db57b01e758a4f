//! Error types.
//!
//! Plumbing code uses `anyhow`; the enums here cover the failures that
//! callers need to tell apart.

use thiserror::Error;

/// Failures that end an upload's processing attempt in `error`.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Text could not be extracted from this document format.
    #[error("Unsupported file type for text extraction: {0}")]
    UnsupportedDocumentType(String),

    #[error("Failed to read document: {0}")]
    DocumentRead(#[from] std::io::Error),

    #[error("Failed to parse PDF file: {0}")]
    PdfParse(String),

    /// The external model call failed (network, auth, quota, bad payload).
    #[error("Failed to extract data: {0}")]
    ModelCall(String),

    #[error("Failed to extract data: model did not respond within {0}s")]
    ModelTimeout(u64),

    #[error("Failed to store results: {0}")]
    Storage(String),
}

/// Synchronous request failures, reported directly to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Period and dataCoverage are required")]
    MissingPeriodOrCoverage,

    #[error("dataCoverage must be between 0 and 100, got {0}")]
    CoverageOutOfRange(f64),

    #[error("A user id is required")]
    MissingUser,

    #[error("No files uploaded")]
    NoFiles,

    #[error("Invalid file type '{0}'. Only PDF, images, PowerPoint and text files are allowed.")]
    DisallowedFileType(String),

    #[error("File '{name}' is {size} bytes, larger than the {limit} byte limit")]
    FileTooLarge { name: String, size: u64, limit: u64 },

    #[error("Invalid export type '{0}'. Use \"monthly\" or \"annual\"")]
    InvalidExportType(String),

    #[error("{0} not found")]
    NotFound(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            PipelineError::UnsupportedDocumentType("image/png".to_string()).to_string(),
            "Unsupported file type for text extraction: image/png"
        );
        assert_eq!(
            PipelineError::ModelTimeout(30).to_string(),
            "Failed to extract data: model did not respond within 30s"
        );
        assert_eq!(
            PipelineError::PdfParse("no pages".to_string()).to_string(),
            "Failed to parse PDF file: no pages"
        );
        assert_eq!(
            ValidationError::NotFound("Upload").to_string(),
            "Upload not found"
        );
    }
}
