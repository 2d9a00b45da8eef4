//! Long-term lesson history
//!
//! Lessons are append-only: once stored they are never rewritten or removed.
//! [`LessonStore::recent`] returns the newest `n` lessons oldest-first, so
//! the last element is always the most recent lesson.
//!
//! - [`MemoryLessonStore`]: process-local store
//! - [`JsonlLessonStore`]: hash-chained JSON-lines file

mod jsonl;
mod memory;

pub use jsonl::{verify_file, JsonlLessonStore, LogEntry, DEFAULT_TAIL_CAPACITY, GENESIS_HASH};
pub use memory::MemoryLessonStore;

use crate::error::StoreError;
use payops_core::Lesson;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a lesson in its store, starting at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LessonSeq(pub u64);

impl fmt::Display for LessonSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Append-only lesson store
pub trait LessonStore: Send + Sync {
    /// Persist a lesson
    ///
    /// # Errors
    /// Returns [`StoreError`] when the lesson could not be persisted; the
    /// store is left unchanged in that case
    fn append(&self, lesson: Lesson) -> Result<LessonSeq, StoreError>;

    /// Newest `n` lessons, oldest first
    ///
    /// # Errors
    /// Returns [`StoreError`] when the store cannot be read
    fn recent(&self, n: usize) -> Result<Vec<Lesson>, StoreError>;

    /// Number of stored lessons
    fn len(&self) -> usize;

    /// Whether no lesson has been stored
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tail of a chronological slice
pub(crate) fn tail(lessons: &[Lesson], n: usize) -> Vec<Lesson> {
    lessons[lessons.len().saturating_sub(n)..].to_vec()
}
