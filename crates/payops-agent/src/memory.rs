//! Short-term memory
//!
//! Bounded ring of the most recent cycles, owned by the control loop. The
//! oldest record is evicted once capacity is reached.

use payops_core::{Aggregate, Decision, Disposition, LessonOutcome};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default ring capacity
pub const DEFAULT_CAPACITY: usize = 200;

/// Everything one cycle saw and decided
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    /// Cycle number
    pub cycle: u64,
    /// Window the cycle diagnosed
    pub aggregate: Aggregate,
    /// Decision after lesson feedback
    pub decision: Decision,
    /// Guardrail verdict
    pub disposition: Disposition,
    /// What happened
    pub outcome: LessonOutcome,
}

/// Fixed-capacity ring of recent cycles
#[derive(Debug, Clone)]
pub struct ShortTermMemory {
    capacity: usize,
    records: VecDeque<CycleRecord>,
}

impl ShortTermMemory {
    /// Create ring; a zero capacity is raised to one
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    /// Store a record, evicting the oldest when full
    pub fn remember(&mut self, record: CycleRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Newest `n` records, oldest first
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<&CycleRecord> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).collect()
    }

    /// Most recent record
    #[must_use]
    pub fn last(&self) -> Option<&CycleRecord> {
        self.records.back()
    }

    /// Records held
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing has been remembered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maximum records held
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ShortTermMemory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use payops_core::{Diagnosis, ProposedAction, RuleId};

    fn record(cycle: u64) -> CycleRecord {
        CycleRecord {
            cycle,
            aggregate: Aggregate::empty(Utc::now(), 60),
            decision: Decision {
                diagnosis: Diagnosis::InsufficientSample,
                evidence: vec![],
                proposed_action: ProposedAction::NoAction,
                risk_assessment: String::new(),
                confidence_score: 0.4,
                rule: RuleId::InsufficientSample,
                target: None,
            },
            disposition: Disposition::Monitor,
            outcome: LessonOutcome::Monitored,
        }
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut memory = ShortTermMemory::new(3);
        for cycle in 1..=5 {
            memory.remember(record(cycle));
        }
        assert_eq!(memory.len(), 3);
        let cycles: Vec<u64> = memory.recent(10).iter().map(|r| r.cycle).collect();
        assert_eq!(cycles, vec![3, 4, 5]);
        assert_eq!(memory.last().map(|r| r.cycle), Some(5));
    }

    #[test]
    fn recent_takes_newest() {
        let mut memory = ShortTermMemory::default();
        for cycle in 1..=10 {
            memory.remember(record(cycle));
        }
        let cycles: Vec<u64> = memory.recent(2).iter().map(|r| r.cycle).collect();
        assert_eq!(cycles, vec![9, 10]);
        assert_eq!(memory.capacity(), 200);
    }
}
