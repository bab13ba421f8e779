use serde::Serialize;
use thiserror::Error;

use crate::page::PageId;
use crate::report::PartialFailureReport;

/// Rejection of a whole input file at ingestion
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    #[error("Unsupported format '{kind}' for '{name}' (expected pdf, jpg or png)")]
    UnsupportedFormat { name: String, kind: String },

    #[error("Failed to parse '{name}': {reason}")]
    Parse { name: String, reason: String },

    #[error("'{0}' is encrypted")]
    Encrypted(String),

    #[error("'{0}' has no pages")]
    EmptyDocument(String),

    #[error("'{0}' is already part of this session")]
    DuplicateSource(String),
}

/// A page that could not be decoded, rasterized or re-encoded
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RenderError {
    #[error("Failed to decode page content: {0}")]
    Decode(String),

    #[error("Page cannot be rendered: {0}")]
    Unsupported(String),

    #[error("Failed to encode page: {0}")]
    Encode(String),

    #[error("Render cancelled")]
    Cancelled,
}

/// Kept pages do not form a total order by position
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReorderConsistencyError {
    #[error("Position {position} is shared by pages {}", join_ids(.pages))]
    DuplicatePosition { position: u32, pages: Vec<PageId> },
}

#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error(transparent)]
    Reorder(#[from] ReorderConsistencyError),

    #[error("Guard-rail breached for {subject}: {actual} bytes exceeds limit of {limit} bytes")]
    GuardRail {
        subject: String,
        actual: usize,
        limit: usize,
    },

    #[error("No pages selected for assembly")]
    NothingSelected,

    #[error("Every selected page failed ({} excluded)", .0.excluded.len())]
    AllPagesFailed(PartialFailureReport),

    #[error("PDF operation failed: {0}")]
    Pdf(String),

    #[error("Assembly cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Unknown page {0}")]
    UnknownPage(PageId),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Invalid page range: {0}")]
    InvalidRange(String),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn join_ids(ids: &[PageId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
