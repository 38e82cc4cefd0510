//! Per-connection session state.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use voxlane_core::types::ContextEntry;

use crate::queue::WorkQueue;
use crate::segmenter::TokenSegmenter;

/// Turn lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Generating,
    Interrupting,
}

/// How a generation task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Cancelled,
}

/// The single in-flight generation of a session.
pub struct GenerationTask {
    pub(crate) handle: JoinHandle<TurnOutcome>,
    pub(crate) cancel: CancellationToken,
    pub(crate) turn: u64,
}

impl GenerationTask {
    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything one connection's conversation owns.
///
/// The context window only grows in `[user, assistant]` pairs because at
/// most one [`GenerationTask`] exists at a time.
pub struct Session {
    pub id: String,
    context: Mutex<Vec<ContextEntry>>,
    pub char_queue: WorkQueue<String>,
    pub sentence_queue: WorkQueue<String>,
    segmenter: Mutex<TokenSegmenter>,
    active: Mutex<Option<GenerationTask>>,
    turn_cancel: Mutex<CancellationToken>,
    state: Mutex<TurnState>,
    turns: Mutex<u64>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            context: Mutex::new(Vec::new()),
            char_queue: WorkQueue::new(),
            sentence_queue: WorkQueue::new(),
            segmenter: Mutex::new(TokenSegmenter::new()),
            active: Mutex::new(None),
            turn_cancel: Mutex::new(CancellationToken::new()),
            state: Mutex::new(TurnState::Idle),
            turns: Mutex::new(0),
        }
    }

    pub fn push_context(&self, entry: ContextEntry) {
        lock(&self.context).push(entry);
    }

    pub fn context(&self) -> Vec<ContextEntry> {
        lock(&self.context).clone()
    }

    pub fn context_len(&self) -> usize {
        lock(&self.context).len()
    }

    pub fn state(&self) -> TurnState {
        *lock(&self.state)
    }

    pub(crate) fn set_state(&self, state: TurnState) {
        *lock(&self.state) = state;
    }

    /// Move from `from` to `to` only if the session is still in `from`.
    pub(crate) fn transition(&self, from: TurnState, to: TurnState) -> bool {
        let mut state = lock(&self.state);
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    /// Token observed by the consumers for the turn in progress.
    pub fn turn_token(&self) -> CancellationToken {
        lock(&self.turn_cancel).clone()
    }

    pub(crate) fn renew_turn_token(&self) {
        *lock(&self.turn_cancel) = CancellationToken::new();
    }

    pub(crate) fn next_turn(&self) -> u64 {
        let mut turns = lock(&self.turns);
        *turns += 1;
        *turns
    }

    pub(crate) fn segmenter(&self) -> MutexGuard<'_, TokenSegmenter> {
        lock(&self.segmenter)
    }

    pub(crate) fn install_task(&self, task: GenerationTask) {
        *lock(&self.active) = Some(task);
    }

    pub(crate) fn take_task(&self) -> Option<GenerationTask> {
        lock(&self.active).take()
    }

    /// Whether a generation task exists and has not finished.
    pub fn has_running_task(&self) -> bool {
        lock(&self.active)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}
