//! Progress coordinator: commits the engine's position to the book store.
//!
//! Position changes are saved once the reader has moved `interval` words
//! away from the last saved index, and immediately when the text is
//! finished. A session starts by resuming the engine at the stored index
//! and ends with a final save.
//!
//! A session is bound to the content the engine held when it started. Once
//! the engine loads or clears content, the tracked book keeps the last
//! position seen for its own words and later saves write that position,
//! never the position within the new content.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::engine::{EngineEvent, EngineEventKind, PlaybackEngine, PlaybackSnapshot, PlaybackState};
use crate::error::ProgressError;
use crate::observer::{Listeners, SubscriptionId};
use crate::store::{BookRecord, BookStore};

pub const DEFAULT_AUTO_SAVE_INTERVAL: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoSaveSettings {
    /// Words of net movement since the last save that trigger a save.
    pub interval: usize,
    pub enabled: bool,
}

impl Default for AutoSaveSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_AUTO_SAVE_INTERVAL,
            enabled: true,
        }
    }
}

/// Notifications published by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Resumed {
        book_id: String,
        index: usize,
        wpm: u32,
    },
    Saved {
        book_id: String,
        index: usize,
        total_words: usize,
    },
    SaveFailed {
        book_id: String,
        reason: String,
    },
    Reset {
        book_id: String,
    },
    Stopped {
        book_id: String,
    },
}

#[derive(Debug, Clone)]
struct TrackedBook {
    book: BookRecord,
    /// Index written by the last successful save.
    baseline_index: usize,
    dirty: bool,
    /// Engine content generation this book was resumed into.
    generation: u64,
    /// Latest engine state observed for that content.
    last_seen: PlaybackSnapshot,
}

impl TrackedBook {
    fn owns(&self, snapshot: &PlaybackSnapshot) -> bool {
        snapshot.generation == self.generation
    }
}

#[derive(Debug, Default)]
enum Session {
    #[default]
    NoSession,
    Tracking(TrackedBook),
}

impl Session {
    fn tracked(&mut self, book_id: &str) -> Option<&mut TrackedBook> {
        match self {
            Session::Tracking(tracked) if tracked.book.id == book_id => Some(tracked),
            _ => None,
        }
    }
}

struct Shared {
    engine: PlaybackEngine,
    store: Arc<dyn BookStore>,
    settings: Mutex<AutoSaveSettings>,
    session: Mutex<Session>,
    events: Listeners<ProgressEvent>,
}

impl Shared {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settings(&self) -> AutoSaveSettings {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_engine_event(&self, event: &EngineEvent) {
        let settings = self.settings();
        let snapshot = &event.snapshot;
        let should_save = {
            let mut session = self.session();
            let Session::Tracking(tracked) = &mut *session else {
                return;
            };

            // Other content is not reading movement for this book.
            if !tracked.owns(snapshot) {
                if matches!(
                    event.kind,
                    EngineEventKind::Loaded | EngineEventKind::Cleared
                ) {
                    debug!(
                        "Engine content replaced, {} stays at word {}",
                        tracked.book.id, tracked.last_seen.index
                    );
                }
                return;
            }
            tracked.last_seen = snapshot.clone();
            if !settings.enabled {
                return;
            }

            let moved = snapshot.index.abs_diff(tracked.baseline_index);
            if moved != 0 {
                tracked.dirty = true;
            }
            let finished = snapshot.state == PlaybackState::Finished && tracked.dirty;
            moved >= settings.interval || finished
        };

        if should_save {
            if let Err(e) = self.persist(snapshot.clone()) {
                warn!("Auto-save failed: {e}");
            }
        }
    }

    /// Write `snapshot` to the store for the tracked book.
    ///
    /// A snapshot of other content is replaced by the last one seen for
    /// the tracked book. Returns `Ok(false)` when nothing was written.
    fn persist(&self, snapshot: PlaybackSnapshot) -> Result<bool, ProgressError> {
        let (mut record, snapshot) = match &*self.session() {
            Session::Tracking(tracked) if tracked.owns(&snapshot) => {
                (tracked.book.clone(), snapshot)
            }
            Session::Tracking(tracked) => (tracked.book.clone(), tracked.last_seen.clone()),
            Session::NoSession => return Ok(false),
        };

        if snapshot.total_words == 0 {
            debug!("Engine has no content, not saving {}", record.id);
            return Ok(false);
        }

        record.current_word_index = snapshot.index;
        record.total_words = snapshot.total_words;
        record.last_wpm = snapshot.wpm;
        record.last_accessed = Some(Utc::now());

        if let Err(e) = self.store.update(&record) {
            self.events.emit(&ProgressEvent::SaveFailed {
                book_id: record.id.clone(),
                reason: e.to_string(),
            });
            return Err(e.into());
        }

        let refreshed = match self.store.get_by_id(&record.id) {
            Ok(Some(stored)) => stored,
            Ok(None) => record.clone(),
            Err(e) => {
                warn!("Saved {} but could not re-read it: {e}", record.id);
                record.clone()
            }
        };

        if let Some(tracked) = self.session().tracked(&record.id) {
            tracked.baseline_index = record.current_word_index;
            tracked.dirty = false;
            tracked.book = refreshed;
        }

        debug!(
            "Saved {} at word {}/{}",
            record.id, record.current_word_index, record.total_words
        );
        self.events.emit(&ProgressEvent::Saved {
            book_id: record.id,
            index: record.current_word_index,
            total_words: record.total_words,
        });
        Ok(true)
    }
}

/// Bridges one engine to the book store for the duration of a session.
pub struct ProgressCoordinator {
    shared: Arc<Shared>,
    subscription: SubscriptionId,
}

impl ProgressCoordinator {
    pub fn new(engine: PlaybackEngine, store: Arc<dyn BookStore>, settings: AutoSaveSettings) -> Self {
        let shared = Arc::new(Shared {
            engine: engine.clone(),
            store,
            settings: Mutex::new(AutoSaveSettings {
                interval: settings.interval.max(1),
                enabled: settings.enabled,
            }),
            session: Mutex::new(Session::NoSession),
            events: Listeners::new(),
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let subscription = engine.subscribe(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.on_engine_event(event);
            }
        });

        Self {
            shared,
            subscription,
        }
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.shared.engine
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    /// Begin tracking `book`, resuming the engine at its saved position and speed.
    ///
    /// Load the book's words into the engine first; an empty engine cannot
    /// be resumed. A session already in progress is stopped (and saved)
    /// before the new one starts.
    pub fn start_tracking(&self, book: BookRecord) -> Result<(), ProgressError> {
        if self.has_active_session() {
            self.stop_tracking()?;
        }

        let engine = &self.shared.engine;
        let committed = book.current_word_index;

        if engine.has_content() {
            if book.total_words != 0 && book.total_words != engine.total_words() {
                warn!(
                    "{} was saved with {} words but {} are loaded",
                    book.id,
                    book.total_words,
                    engine.total_words()
                );
            }
            if committed > 0 {
                engine.jump_to_index(committed);
            }
        }
        if book.last_wpm > 0 {
            engine.set_wpm(book.last_wpm);
        }

        let book_id = book.id.clone();
        let snapshot = engine.snapshot();
        let (index, wpm) = (snapshot.index, snapshot.wpm);
        *self.shared.session() = Session::Tracking(TrackedBook {
            book,
            baseline_index: committed,
            dirty: false,
            generation: snapshot.generation,
            last_seen: snapshot,
        });

        info!("Tracking {book_id} from word {index} at {wpm} wpm");
        self.shared
            .events
            .emit(&ProgressEvent::Resumed { book_id, index, wpm });
        Ok(())
    }

    /// Look up `book_id` in the store and start tracking it.
    pub fn resume(&self, book_id: &str) -> Result<(), ProgressError> {
        let book = self
            .shared
            .store
            .get_by_id(book_id)?
            .ok_or_else(|| ProgressError::BookNotFound(book_id.to_string()))?;
        self.start_tracking(book)
    }

    /// Save the final position and end the session.
    ///
    /// If the save fails the session stays active so the caller can retry.
    pub fn stop_tracking(&self) -> Result<(), ProgressError> {
        if !self.has_active_session() {
            return Ok(());
        }

        self.save_progress()?;

        let previous = std::mem::take(&mut *self.shared.session());
        if let Session::Tracking(tracked) = previous {
            info!("Stopped tracking {}", tracked.book.id);
            self.shared.events.emit(&ProgressEvent::Stopped {
                book_id: tracked.book.id,
            });
        }
        Ok(())
    }

    /// Write the current position now. Does nothing without an active session.
    pub fn save_progress(&self) -> Result<(), ProgressError> {
        let snapshot = self.shared.engine.snapshot();
        self.shared.persist(snapshot).map(|_| ())
    }

    /// Store index 0 for `book_id`; a tracked book also rewinds the engine
    /// if the engine still holds that book's words.
    pub fn reset_progress(&self, book_id: &str) -> Result<(), ProgressError> {
        let store = &self.shared.store;
        let mut record = store
            .get_by_id(book_id)?
            .ok_or_else(|| ProgressError::BookNotFound(book_id.to_string()))?;
        record.current_word_index = 0;
        record.last_accessed = Some(Utc::now());
        store.update(&record)?;

        let current = self.shared.engine.snapshot();
        let rewind_engine = match self.shared.session().tracked(book_id) {
            Some(tracked) => {
                tracked.baseline_index = 0;
                tracked.dirty = false;
                tracked.book = record;
                tracked.last_seen.index = 0;
                tracked.last_seen.state = PlaybackState::Ready;
                tracked.owns(&current)
            }
            None => false,
        };
        if rewind_engine {
            self.shared.engine.restart();
        }

        info!("Reset progress for {book_id}");
        self.shared.events.emit(&ProgressEvent::Reset {
            book_id: book_id.to_string(),
        });
        Ok(())
    }

    // -- status --

    pub fn has_active_session(&self) -> bool {
        matches!(*self.shared.session(), Session::Tracking(_))
    }

    /// True when the position has moved since the last successful save.
    pub fn is_dirty(&self) -> bool {
        match &*self.shared.session() {
            Session::Tracking(tracked) => tracked.dirty,
            Session::NoSession => false,
        }
    }

    /// Index written by the last successful save of the tracked book.
    pub fn baseline_index(&self) -> Option<usize> {
        match &*self.shared.session() {
            Session::Tracking(tracked) => Some(tracked.baseline_index),
            Session::NoSession => None,
        }
    }

    /// The tracked book as last read from the store.
    pub fn tracked_book(&self) -> Option<BookRecord> {
        match &*self.shared.session() {
            Session::Tracking(tracked) => Some(tracked.book.clone()),
            Session::NoSession => None,
        }
    }

    pub fn auto_save_interval(&self) -> usize {
        self.shared.settings().interval
    }

    pub fn auto_save_enabled(&self) -> bool {
        self.shared.settings().enabled
    }

    /// Values below 1 are raised to 1.
    pub fn set_auto_save_interval(&self, interval: usize) {
        self.shared
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .interval = interval.max(1);
    }

    pub fn set_auto_save_enabled(&self, enabled: bool) {
        self.shared
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .enabled = enabled;
    }
}

impl Drop for ProgressCoordinator {
    fn drop(&mut self) {
        self.shared.engine.unsubscribe(self.subscription);
    }
}

impl std::fmt::Debug for ProgressCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressCoordinator")
            .field("session", &*self.shared.session())
            .field("settings", &self.shared.settings())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBookStore;

    fn setup(words: usize, book: BookRecord) -> (PlaybackEngine, Arc<MemoryBookStore>, ProgressCoordinator) {
        let engine = PlaybackEngine::new(300);
        engine.load((0..words).map(|i| format!("w{i}")).collect());
        let store = Arc::new(MemoryBookStore::new());
        store.insert(book);
        let coordinator =
            ProgressCoordinator::new(engine.clone(), store.clone(), AutoSaveSettings::default());
        (engine, store, coordinator)
    }

    #[tokio::test]
    async fn no_session_means_no_saves() {
        let (engine, store, coordinator) = setup(30, BookRecord::new("a", "A"));
        engine.skip_forward(20);

        coordinator.save_progress().unwrap();
        coordinator.stop_tracking().unwrap();

        assert_eq!(store.write_count(), 0);
        assert!(!coordinator.is_dirty());
        assert_eq!(coordinator.baseline_index(), None);
    }

    #[tokio::test]
    async fn small_moves_mark_dirty_without_saving() {
        let (engine, store, coordinator) = setup(30, BookRecord::new("a", "A"));
        coordinator.start_tracking(BookRecord::new("a", "A")).unwrap();
        assert!(!coordinator.is_dirty());

        engine.skip_forward(3);
        assert!(coordinator.is_dirty());
        assert_eq!(store.write_count(), 0);

        engine.skip_backward(3);
        assert!(coordinator.is_dirty(), "returning to baseline keeps the flag");
    }

    #[tokio::test]
    async fn backward_movement_counts_toward_threshold() {
        let book = BookRecord {
            current_word_index: 25,
            total_words: 30,
            ..BookRecord::new("a", "A")
        };
        let (engine, store, coordinator) = setup(30, book.clone());
        coordinator.start_tracking(book).unwrap();

        engine.skip_backward(10);
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.get_by_id("a").unwrap().unwrap().current_word_index, 15);
        assert_eq!(coordinator.baseline_index(), Some(15));
    }

    #[tokio::test]
    async fn disabled_auto_save_only_saves_on_request() {
        let (engine, store, coordinator) = setup(30, BookRecord::new("a", "A"));
        coordinator.set_auto_save_enabled(false);
        coordinator.start_tracking(BookRecord::new("a", "A")).unwrap();

        engine.skip_forward(29);
        assert_eq!(engine.state(), PlaybackState::Finished);
        assert_eq!(store.write_count(), 0);

        coordinator.stop_tracking().unwrap();
        assert_eq!(store.write_count(), 1);
        assert!(!coordinator.has_active_session());
    }

    #[tokio::test]
    async fn interval_is_at_least_one() {
        let (_, _, coordinator) = setup(1, BookRecord::new("a", "A"));
        coordinator.set_auto_save_interval(0);
        assert_eq!(coordinator.auto_save_interval(), 1);
    }

    #[tokio::test]
    async fn reload_is_not_treated_as_movement() {
        let book = BookRecord {
            current_word_index: 20,
            total_words: 30,
            ..BookRecord::new("a", "A")
        };
        let (engine, store, coordinator) = setup(30, book.clone());
        coordinator.start_tracking(book).unwrap();

        engine.load((0..30).map(|i| format!("w{i}")).collect());
        assert_eq!(store.write_count(), 0);
        assert!(!coordinator.is_dirty());
    }

    #[tokio::test]
    async fn dropping_coordinator_detaches_listener() {
        let (engine, store, coordinator) = setup(30, BookRecord::new("a", "A"));
        coordinator.start_tracking(BookRecord::new("a", "A")).unwrap();
        drop(coordinator);

        engine.skip_forward(15);
        assert_eq!(store.write_count(), 0);
    }
}
