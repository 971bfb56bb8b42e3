//! Presentation engine: word list, position, speed and the tick loop.
//!
//! IDLE → READY → PLAYING ⇄ PAUSED → FINISHED
//!
//! While playing there is exactly one pending tick, timed for the word
//! currently shown. When it fires the engine advances and schedules the
//! next tick for the new word, so each word gets its own duration.
//! Every mutating operation cancels the pending tick before touching
//! state, and a tick that fires after being cancelled is discarded by id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::observer::{Listeners, SubscriptionId};
use crate::timing::{self, WPM_STEP};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No content loaded
    Idle,
    /// Content loaded, not started or explicitly stopped
    Ready,
    Playing,
    Paused,
    /// The last word has been shown
    Finished,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Ready => write!(f, "READY"),
            Self::Playing => write!(f, "PLAYING"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Finished => write!(f, "FINISHED"),
        }
    }
}

/// Point-in-time view of the engine, carried by every [`EngineEvent`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub index: usize,
    pub total_words: usize,
    pub state: PlaybackState,
    pub wpm: u32,
    pub word: Option<String>,
    /// Bumped by every `load` and `clear`; equal generations mean the same content.
    pub generation: u64,
}

impl PlaybackSnapshot {
    /// Fraction read: `index / total_words`, 1.0 once finished, 0.0 when empty.
    pub fn progress(&self) -> f64 {
        if self.total_words == 0 {
            0.0
        } else if self.state == PlaybackState::Finished {
            1.0
        } else {
            self.index as f64 / self.total_words as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEventKind {
    /// New content replaced the word list
    Loaded,
    /// Content was discarded
    Cleared,
    /// The tick moved to the next word
    Advanced,
    /// Manual navigation or seek
    Moved,
    /// Play, pause, stop or restart
    StateChanged,
    SpeedChanged,
    /// Reached the end of the word list
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineEvent {
    pub kind: EngineEventKind,
    pub snapshot: PlaybackSnapshot,
}

struct PendingTick {
    id: u64,
    delay: Duration,
    task: JoinHandle<()>,
}

struct EngineInner {
    words: Vec<String>,
    index: usize,
    state: PlaybackState,
    wpm: u32,
    pending: Option<PendingTick>,
    next_tick_id: u64,
    generation: u64,
    next_event_seq: u64,
}

impl EngineInner {
    fn has_content(&self) -> bool {
        !self.words.is_empty()
    }

    fn last_index(&self) -> usize {
        self.words.len().saturating_sub(1)
    }

    fn cancel_tick(&mut self) {
        if let Some(tick) = self.pending.take() {
            tick.task.abort();
        }
    }

    fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            index: self.index,
            total_words: self.words.len(),
            state: self.state,
            wpm: self.wpm,
            word: self.words.get(self.index).cloned(),
            generation: self.generation,
        }
    }

    /// Build the event for `kind`, numbered in mutation order.
    fn event(&mut self, kind: EngineEventKind) -> (u64, EngineEvent) {
        self.next_event_seq += 1;
        let event = EngineEvent {
            kind,
            snapshot: self.snapshot(),
        };
        (self.next_event_seq, event)
    }

    /// Place the cursor on the last word and stop the clock.
    fn finish(&mut self) -> Option<EngineEventKind> {
        self.index = self.last_index();
        if self.state == PlaybackState::Finished {
            return None;
        }
        self.cancel_tick();
        self.state = PlaybackState::Finished;
        Some(EngineEventKind::Finished)
    }

    fn reset_to_start(&mut self) {
        self.cancel_tick();
        self.index = 0;
        self.state = if self.has_content() {
            PlaybackState::Ready
        } else {
            PlaybackState::Idle
        };
    }
}

struct Shared {
    inner: Mutex<EngineInner>,
    listeners: Listeners<EngineEvent>,
    /// Sequence number of the newest event handed to listeners.
    emitted: AtomicU64,
    runtime: Handle,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `event` unless a later mutation has already been delivered.
    ///
    /// Events are built under the lock but delivered after it is released,
    /// so a tick on one worker can lose the race against a pause on another.
    fn emit(&self, seq: u64, event: &EngineEvent) {
        let newest = self.emitted.fetch_max(seq, Ordering::SeqCst);
        if newest > seq {
            debug!("Dropping stale {:?} event #{seq}", event.kind);
            return;
        }
        self.listeners.emit(event);
    }

    /// Replace any pending tick with one for the current word.
    fn schedule_tick(self: &Arc<Self>, inner: &mut EngineInner) {
        inner.cancel_tick();
        let Some(word) = inner.words.get(inner.index) else {
            return;
        };

        let delay = timing::word_duration(word, inner.wpm);
        let id = inner.next_tick_id;
        inner.next_tick_id = inner.next_tick_id.wrapping_add(1);

        let deadline = Instant::now() + delay;
        let weak: Weak<Shared> = Arc::downgrade(self);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(shared) = weak.upgrade() {
                shared.fire_tick(id);
            }
        });

        inner.pending = Some(PendingTick { id, delay, task });
    }

    fn fire_tick(self: &Arc<Self>, id: u64) {
        let event = {
            let mut inner = self.lock();
            if inner.pending.as_ref().map(|tick| tick.id) != Some(id) {
                debug!("Discarding stale tick {id}");
                return;
            }
            inner.pending = None;
            if inner.state != PlaybackState::Playing {
                return;
            }

            let kind = if inner.index < inner.last_index() {
                inner.index += 1;
                self.schedule_tick(&mut *inner);
                EngineEventKind::Advanced
            } else {
                inner.state = PlaybackState::Finished;
                info!("Reached end of text ({} words)", inner.words.len());
                EngineEventKind::Finished
            };
            debug!("Tick {id}: index {} of {}", inner.index, inner.words.len());

            inner.event(kind)
        };

        self.emit(event.0, &event.1);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.inner
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel_tick();
    }
}

/// RSVP playback engine for a single reading session.
///
/// Cloning yields another handle to the same engine. All operations are
/// synchronous and total: out-of-range input is clamped and operations
/// on an empty engine do nothing.
#[derive(Clone)]
pub struct PlaybackEngine {
    shared: Arc<Shared>,
}

impl PlaybackEngine {
    /// Create an engine that schedules ticks on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn new(wpm: u32) -> Self {
        Self::with_runtime(Handle::current(), wpm)
    }

    pub fn with_runtime(runtime: Handle, wpm: u32) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(EngineInner {
                    words: Vec::new(),
                    index: 0,
                    state: PlaybackState::Idle,
                    wpm: timing::clamp_wpm(wpm),
                    pending: None,
                    next_tick_id: 0,
                    generation: 0,
                    next_event_seq: 0,
                }),
                listeners: Listeners::new(),
                emitted: AtomicU64::new(0),
                runtime,
            }),
        }
    }

    /// Register a listener called synchronously after every change.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.shared.listeners.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.listeners.unsubscribe(id)
    }

    /// Apply `op` under the lock, then notify listeners once it is released.
    fn update<F>(&self, op: F)
    where
        F: FnOnce(&Arc<Shared>, &mut EngineInner) -> Option<EngineEventKind>,
    {
        let event = {
            let mut inner = self.shared.lock();
            op(&self.shared, &mut *inner).map(|kind| inner.event(kind))
        };

        if let Some((seq, event)) = event {
            self.shared.emit(seq, &event);
        }
    }

    // -- content --

    /// Replace the word list. An empty list leaves the engine idle.
    pub fn load(&self, words: Vec<String>) {
        self.update(|_, inner| {
            inner.cancel_tick();
            inner.words = words;
            inner.generation += 1;
            inner.reset_to_start();
            info!("Loaded {} words (state: {})", inner.words.len(), inner.state);
            Some(EngineEventKind::Loaded)
        });
    }

    pub fn clear(&self) {
        self.update(|_, inner| {
            if !inner.has_content() && inner.state == PlaybackState::Idle {
                return None;
            }
            inner.cancel_tick();
            inner.words.clear();
            inner.generation += 1;
            inner.reset_to_start();
            debug!("Content cleared");
            Some(EngineEventKind::Cleared)
        });
    }

    // -- transport --

    /// Start or resume playback. Playing again after the end starts over.
    pub fn play(&self) {
        self.update(|shared, inner| {
            if !inner.has_content() {
                return None;
            }
            if inner.state == PlaybackState::Playing {
                if inner.pending.is_none() {
                    shared.schedule_tick(inner);
                }
                return None;
            }
            if inner.state == PlaybackState::Finished {
                inner.index = 0;
            }

            debug!("State: {} → PLAYING at word {}", inner.state, inner.index);
            inner.state = PlaybackState::Playing;
            shared.schedule_tick(inner);
            Some(EngineEventKind::StateChanged)
        });
    }

    /// Pause on the current word. The next play gives it a full tick again.
    pub fn pause(&self) {
        self.update(|_, inner| {
            if inner.state != PlaybackState::Playing {
                return None;
            }
            inner.cancel_tick();
            inner.state = PlaybackState::Paused;
            debug!("State: PLAYING → PAUSED at word {}", inner.index);
            Some(EngineEventKind::StateChanged)
        });
    }

    pub fn toggle_play_pause(&self) {
        if self.state() == PlaybackState::Playing {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Cancel playback and rewind to the first word.
    pub fn stop(&self) {
        self.update(|_, inner| {
            let before = (inner.index, inner.state);
            inner.reset_to_start();
            ((inner.index, inner.state) != before).then_some(EngineEventKind::StateChanged)
        });
    }

    /// Rewind to the first word in the ready state, whatever the current state.
    pub fn restart(&self) {
        self.update(|_, inner| {
            if !inner.has_content() {
                return None;
            }
            inner.reset_to_start();
            Some(EngineEventKind::StateChanged)
        });
    }

    // -- navigation --

    pub fn next_word(&self) {
        self.update(|shared, inner| {
            if !inner.has_content() {
                return None;
            }
            if inner.index >= inner.last_index() {
                return inner.finish();
            }
            inner.index += 1;
            reschedule_if_playing(shared, inner);
            Some(EngineEventKind::Moved)
        });
    }

    pub fn previous_word(&self) {
        self.skip_backward(1);
    }

    /// Move forward `n` words; reaching the last word finishes playback.
    pub fn skip_forward(&self, n: usize) {
        self.update(|shared, inner| {
            if !inner.has_content() {
                return None;
            }
            let target = inner.index.saturating_add(n);
            if target >= inner.last_index() {
                return inner.finish();
            }
            if target == inner.index {
                return None;
            }
            inner.index = target;
            reschedule_if_playing(shared, inner);
            Some(EngineEventKind::Moved)
        });
    }

    /// Move back `n` words, stopping at the first. Leaves the finished state.
    pub fn skip_backward(&self, n: usize) {
        self.update(|shared, inner| {
            if !inner.has_content() {
                return None;
            }
            let target = inner.index.saturating_sub(n);
            if target == inner.index && inner.state != PlaybackState::Finished {
                return None;
            }
            inner.index = target;
            if inner.state == PlaybackState::Finished {
                inner.state = PlaybackState::Paused;
            }
            reschedule_if_playing(shared, inner);
            Some(EngineEventKind::Moved)
        });
    }

    /// Seek to `index`, clamped to the word list.
    pub fn jump_to_index(&self, index: usize) {
        self.update(|shared, inner| {
            if !inner.has_content() {
                return None;
            }
            let target = index.min(inner.last_index());
            let leaves_end =
                inner.state == PlaybackState::Finished && target != inner.last_index();
            if target == inner.index && !leaves_end {
                return None;
            }
            inner.index = target;
            if leaves_end {
                inner.state = PlaybackState::Paused;
            }
            reschedule_if_playing(shared, inner);
            Some(EngineEventKind::Moved)
        });
    }

    /// Seek to `floor(fraction * total_words)`; `fraction` is clamped to [0, 1].
    pub fn jump_to_progress(&self, fraction: f64) {
        let total = self.total_words();
        if total == 0 {
            return;
        }
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        self.jump_to_index((fraction * total as f64).floor() as usize);
    }

    // -- speed --

    /// Change speed, clamped to [100, 1000] wpm. A pending tick restarts at the new rate.
    pub fn set_wpm(&self, wpm: u32) {
        self.update(|shared, inner| {
            let wpm = timing::clamp_wpm(wpm);
            if wpm == inner.wpm {
                return None;
            }
            debug!("Speed: {} → {} wpm", inner.wpm, wpm);
            inner.wpm = wpm;
            reschedule_if_playing(shared, inner);
            Some(EngineEventKind::SpeedChanged)
        });
    }

    pub fn increase_speed(&self) {
        self.set_wpm(self.words_per_minute().saturating_add(WPM_STEP));
    }

    pub fn decrease_speed(&self) {
        self.set_wpm(self.words_per_minute().saturating_sub(WPM_STEP));
    }

    // -- queries --

    pub fn state(&self) -> PlaybackState {
        self.shared.lock().state
    }

    pub fn current_index(&self) -> usize {
        self.shared.lock().index
    }

    pub fn current_word(&self) -> Option<String> {
        let inner = self.shared.lock();
        inner.words.get(inner.index).cloned()
    }

    pub fn total_words(&self) -> usize {
        self.shared.lock().words.len()
    }

    pub fn words_per_minute(&self) -> u32 {
        self.shared.lock().wpm
    }

    pub fn ms_per_word(&self) -> u64 {
        timing::ms_per_word(self.words_per_minute())
    }

    pub fn progress(&self) -> f64 {
        self.snapshot().progress()
    }

    pub fn has_content(&self) -> bool {
        self.shared.lock().has_content()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.shared.lock().snapshot()
    }

    /// Identifies the loaded content; changes on every `load` and `clear`.
    pub fn content_generation(&self) -> u64 {
        self.shared.lock().generation
    }

    /// Duration of the outstanding tick, if one is scheduled.
    pub fn pending_tick_delay(&self) -> Option<Duration> {
        self.shared.lock().pending.as_ref().map(|tick| tick.delay)
    }
}

impl std::fmt::Debug for PlaybackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("PlaybackEngine")
            .field("state", &inner.state)
            .field("index", &inner.index)
            .field("total_words", &inner.words.len())
            .field("wpm", &inner.wpm)
            .finish()
    }
}

fn reschedule_if_playing(shared: &Arc<Shared>, inner: &mut EngineInner) {
    if inner.state == PlaybackState::Playing {
        shared.schedule_tick(inner);
    }
}
