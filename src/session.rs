//! Reading session: document → engine → coordinator, in that order.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Local;
use tracing::{debug, info};

use crate::engine::{PlaybackEngine, PlaybackState};
use crate::error::{ContentError, ProgressError, SessionError};
use crate::history::{self, SessionRecord};
use crate::progress::ProgressCoordinator;
use crate::source::WordSource;
use crate::store::BookRecord;

#[derive(Debug)]
struct OpenDocument {
    book_id: String,
    title: String,
    start_index: usize,
    started_at: Instant,
}

/// Owns the coordinator (and through it the engine) for one reader.
#[derive(Debug)]
pub struct ReadingSession {
    coordinator: ProgressCoordinator,
    history_dir: Option<PathBuf>,
    current: Option<OpenDocument>,
}

impl ReadingSession {
    pub fn new(coordinator: ProgressCoordinator) -> Self {
        Self {
            coordinator,
            history_dir: None,
            current: None,
        }
    }

    /// Append a [`SessionRecord`] to `dir` whenever a document is closed.
    pub fn with_history(mut self, dir: impl Into<PathBuf>) -> Self {
        self.history_dir = Some(dir.into());
        self
    }

    pub fn engine(&self) -> &PlaybackEngine {
        self.coordinator.engine()
    }

    pub fn coordinator(&self) -> &ProgressCoordinator {
        &self.coordinator
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn book_id(&self) -> Option<&str> {
        self.current.as_ref().map(|doc| doc.book_id.as_str())
    }

    /// Load `document` and resume `book` from its saved position.
    ///
    /// A document that is already open is closed first. If the words
    /// cannot be extracted the engine is left empty.
    pub fn open<S>(&mut self, source: &S, document: &Path, book: BookRecord) -> Result<(), SessionError>
    where
        S: WordSource + ?Sized,
    {
        self.close()?;

        let engine = self.coordinator.engine();
        let words = match source.extract_words(document) {
            Ok(words) if words.is_empty() => {
                engine.clear();
                return Err(ContentError::Empty {
                    path: document.to_path_buf(),
                }
                .into());
            }
            Ok(words) => words,
            Err(e) => {
                engine.clear();
                return Err(e.into());
            }
        };

        engine.load(words);
        let book_id = book.id.clone();
        let title = book.title.clone();
        self.coordinator.start_tracking(book)?;

        let start_index = engine.current_index();
        info!(
            "Opened {} ({} words) at word {start_index}",
            document.display(),
            engine.total_words()
        );
        self.current = Some(OpenDocument {
            book_id,
            title,
            start_index,
            started_at: Instant::now(),
        });
        Ok(())
    }

    /// Pause, save the final position and summarize the session.
    ///
    /// Returns `None` when no document is open. On a failed save the
    /// document stays open.
    pub fn close(&mut self) -> Result<Option<SessionRecord>, ProgressError> {
        let Some(doc) = self.current.take() else {
            return Ok(None);
        };

        let engine = self.coordinator.engine();
        engine.pause();
        let snapshot = engine.snapshot();

        if let Err(e) = self.coordinator.stop_tracking() {
            self.current = Some(doc);
            return Err(e);
        }

        let finished = snapshot.state == PlaybackState::Finished;
        let record = SessionRecord {
            timestamp: Local::now(),
            book_id: doc.book_id,
            title: doc.title,
            start_index: doc.start_index,
            end_index: snapshot.index,
            total_words: snapshot.total_words,
            words_read: snapshot.index.saturating_sub(doc.start_index) + usize::from(finished),
            elapsed_s: doc.started_at.elapsed().as_secs_f64(),
            wpm: snapshot.wpm,
            finished,
        };

        if let Some(dir) = &self.history_dir {
            history::save_record(dir, &record);
        }
        debug!("Closed {}: {} words read", record.book_id, record.words_read);
        Ok(Some(record))
    }
}
