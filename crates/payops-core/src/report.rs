//! Cycle output contract
//!
//! [`CycleReport`] is what every cycle emits, whatever happened inside it.
//! Rendering to text belongs to the presentation layer.

use crate::types::{Decision, Diagnosis, Disposition, LessonOutcome, ProposedAction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured result of one control cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Cycle number, starting at 1
    pub cycle: u64,
    /// Cycle start time
    pub at: DateTime<Utc>,
    /// Classified failure mode
    pub diagnosis: Diagnosis,
    /// Facts supporting the diagnosis
    pub evidence: Vec<String>,
    /// Single proposed action
    pub proposed_action: ProposedAction,
    /// Qualitative risk note
    pub risk_assessment: String,
    /// Confidence after lesson feedback
    pub confidence_score: f64,
    /// Confidence fell below the guardrail threshold
    pub human_approval_required: bool,
    /// Guardrail verdict
    pub disposition: Disposition,
    /// What actually happened
    pub outcome: LessonOutcome,
    /// Transactions in the window
    pub volume: u64,
    /// Free-form note: guard reason, dispatch ack or fault
    pub detail: Option<String>,
}

impl CycleReport {
    /// Build report from a cycle's decision and verdict
    #[must_use]
    pub fn new(
        cycle: u64,
        at: DateTime<Utc>,
        decision: &Decision,
        confidence_threshold: f64,
        disposition: Disposition,
        outcome: LessonOutcome,
        volume: u64,
    ) -> Self {
        Self {
            cycle,
            at,
            diagnosis: decision.diagnosis,
            evidence: decision.evidence.clone(),
            proposed_action: decision.proposed_action,
            risk_assessment: decision.risk_assessment.clone(),
            confidence_score: decision.confidence_score,
            human_approval_required: decision.requires_approval(confidence_threshold),
            disposition,
            outcome,
            volume,
            detail: None,
        }
    }

    /// Attach a detail note
    #[inline]
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Whether an external side effect was performed this cycle
    #[inline]
    #[must_use]
    pub fn executed(&self) -> bool {
        self.outcome == LessonOutcome::Executed && self.proposed_action.is_actionable()
    }
}
