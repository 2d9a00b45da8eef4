//! Lesson feedback
//!
//! Recent lessons for the same (diagnosis, action) pair shift the confidence
//! of a fresh decision by at most `max_nudge`. Executed outcomes push it up;
//! escalations, safety skips and failed dispatches push it down. The
//! diagnosis and the action are never changed, and an insufficient sample is
//! never nudged.

use crate::config::FeedbackConfig;
use crate::diagnosis::round_confidence;
use crate::types::{Decision, Diagnosis, Lesson, ProposedAction};

/// Signed confidence shift implied by `lessons` for a diagnosis/action pair
///
/// Zero when no lesson matches. Otherwise `max_nudge * net / matching`, where
/// `net` sums each matching lesson's [`feedback_score`].
///
/// [`feedback_score`]: crate::types::LessonOutcome::feedback_score
#[must_use]
pub fn confidence_delta(
    diagnosis: Diagnosis,
    action: ProposedAction,
    lessons: &[Lesson],
    max_nudge: f64,
) -> f64 {
    let (matching, net) = lessons
        .iter()
        .filter(|lesson| lesson.matches(diagnosis, action))
        .fold((0u32, 0i32), |(count, net), lesson| {
            (count + 1, net + lesson.outcome.feedback_score())
        });
    if matching == 0 {
        return 0.0;
    }
    max_nudge * f64::from(net) / f64::from(matching)
}

/// Apply lesson feedback to a decision
#[must_use]
pub fn apply(mut decision: Decision, lessons: &[Lesson], config: &FeedbackConfig) -> Decision {
    if decision.diagnosis == Diagnosis::InsufficientSample {
        return decision;
    }
    let delta = confidence_delta(
        decision.diagnosis,
        decision.proposed_action,
        lessons,
        config.max_nudge,
    );
    if delta != 0.0 {
        let nudged = round_confidence((decision.confidence_score + delta).clamp(0.0, 1.0));
        tracing::trace!(
            before = decision.confidence_score,
            after = nudged,
            "lesson feedback applied"
        );
        decision.confidence_score = nudged;
    }
    decision
}
