//! Word extraction from documents.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::ContentError;

/// Turns a document into the ordered words shown by the engine.
///
/// Words keep their trailing punctuation; the engine uses it for timing.
pub trait WordSource {
    fn extract_words(&self, document: &Path) -> Result<Vec<String>, ContentError>;
}

/// UTF-8 plain text, split on whitespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextSource;

impl PlainTextSource {
    pub fn split_words(text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_owned).collect()
    }
}

impl WordSource for PlainTextSource {
    fn extract_words(&self, document: &Path) -> Result<Vec<String>, ContentError> {
        let bytes = fs::read(document).map_err(|source| ContentError::Io {
            path: document.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8(bytes).map_err(|_| ContentError::Encoding {
            path: document.to_path_buf(),
        })?;

        let words = Self::split_words(text.strip_prefix('\u{feff}').unwrap_or(&text));
        debug!("Extracted {} words from {}", words.len(), document.display());
        Ok(words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn punctuation_stays_attached() {
        assert_eq!(
            PlainTextSource::split_words("Hello  world.\n\tGo!  "),
            vec!["Hello", "world.", "Go!"]
        );
        assert!(PlainTextSource::split_words(" \n ").is_empty());
    }

    #[test]
    fn reads_files_and_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("book.txt");
        fs::write(&text, "\u{feff}Call me Ishmael.").unwrap();
        assert_eq!(
            PlainTextSource.extract_words(&text).unwrap(),
            vec!["Call", "me", "Ishmael."]
        );

        let binary = dir.path().join("book.bin");
        fs::write(&binary, [0xff, 0xfe, 0x00, 0xc3]).unwrap();
        assert!(matches!(
            PlainTextSource.extract_words(&binary),
            Err(ContentError::Encoding { .. })
        ));

        assert!(matches!(
            PlainTextSource.extract_words(&dir.path().join("missing.txt")),
            Err(ContentError::Io { .. })
        ));
    }
}
