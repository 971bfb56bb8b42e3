//! readpace: RSVP speed reading with resumable progress.
//!
//! A [`PlaybackEngine`] shows one word at a time, pausing longer at
//! sentence ends. A [`ProgressCoordinator`] watches it and commits the
//! reader's position to a [`BookStore`] so a session can be resumed.

pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod observer;
pub mod progress;
pub mod session;
pub mod source;
pub mod store;
pub mod timing;

pub use engine::{EngineEvent, EngineEventKind, PlaybackEngine, PlaybackSnapshot, PlaybackState};
pub use error::{ContentError, ProgressError, SessionError, StoreError};
pub use observer::SubscriptionId;
pub use progress::{AutoSaveSettings, ProgressCoordinator, ProgressEvent};
pub use session::ReadingSession;
pub use source::{PlainTextSource, WordSource};
pub use store::{BookRecord, BookStore, JsonBookStore, MemoryBookStore};
