use super::{tail, LessonSeq, LessonStore};
use crate::error::StoreError;
use parking_lot::RwLock;
use payops_core::Lesson;

/// In-process lesson store; lost on restart
#[derive(Debug, Default)]
pub struct MemoryLessonStore {
    inner: RwLock<Vec<Lesson>>,
}

impl MemoryLessonStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored lesson, oldest first
    #[must_use]
    pub fn lessons(&self) -> Vec<Lesson> {
        self.inner.read().clone()
    }
}

impl LessonStore for MemoryLessonStore {
    fn append(&self, lesson: Lesson) -> Result<LessonSeq, StoreError> {
        let mut guard = self.inner.write();
        guard.push(lesson);
        Ok(LessonSeq(guard.len() as u64))
    }

    fn recent(&self, n: usize) -> Result<Vec<Lesson>, StoreError> {
        Ok(tail(&self.inner.read(), n))
    }

    fn len(&self) -> usize {
        self.inner.read().len()
    }
}
