//! Error types for readpace.
//!
//! Engine operations are total and never fail; only the collaborator
//! boundaries (word extraction, book storage) produce errors.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to obtain a word sequence for a document.
#[derive(Error, Debug)]
pub enum ContentError {
    /// The document could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid UTF-8 text
    #[error("{path} is not valid UTF-8 text")]
    Encoding { path: PathBuf },

    /// The document contains no words
    #[error("{path} contains no words")]
    Empty { path: PathBuf },
}

/// Failure reported by a book store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Library file I/O errors
    #[error("library I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Library file (de)serialization errors
    #[error("library format error: {0}")]
    Serde(#[from] serde_json::Error),

    /// No record with the given id
    #[error("book not found: {0}")]
    NotFound(String),

    /// Record violates `current_word_index <= total_words`
    #[error("invalid record for {id}: index {index} exceeds {total} words")]
    InvalidRecord { id: String, index: usize, total: usize },

    /// Backend-specific failure
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by the progress coordinator.
#[derive(Error, Debug)]
pub enum ProgressError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("book not found: {0}")]
    BookNotFound(String),
}

/// Failure opening or closing a reading session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Progress(#[from] ProgressError),
}
