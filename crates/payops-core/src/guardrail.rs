//! Guardrail
//!
//! Maps a decision plus the window's transaction volume to a [`Disposition`].
//! Checks run in a fixed order:
//!
//! 1. `NoAction` is always [`Disposition::Monitor`]
//! 2. confidence below the threshold escalates
//! 3. volume above the autonomous limit escalates, or skips under
//!    [`VolumeBreachPolicy::Skip`]
//! 4. everything else executes
//!
//! The mapping is total and never panics, whatever the inputs.

use crate::config::{GuardrailConfig, VolumeBreachPolicy};
use crate::types::{Decision, Disposition, ProposedAction};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why the guardrail chose a disposition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardReason {
    /// Nothing to act on
    NoActionProposed,
    /// Confidence below the autonomous threshold (also true for NaN)
    LowConfidence,
    /// Window volume above the autonomous limit
    VolumeLimit,
    /// Every check passed
    Cleared,
}

impl fmt::Display for GuardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GuardReason::NoActionProposed => "no action proposed",
            GuardReason::LowConfidence => "confidence below threshold",
            GuardReason::VolumeLimit => "volume above autonomous limit",
            GuardReason::Cleared => "cleared for autonomous execution",
        })
    }
}

/// Disposition with the check that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    /// Final disposition
    pub disposition: Disposition,
    /// Deciding check
    pub reason: GuardReason,
}

/// Safety policy applied before any side effect
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Guardrail {
    config: GuardrailConfig,
}

impl Guardrail {
    /// Create guardrail from its config section
    #[inline]
    #[must_use]
    pub fn new(config: GuardrailConfig) -> Self {
        Self { config }
    }

    /// Active policy
    #[inline]
    #[must_use]
    pub fn config(&self) -> &GuardrailConfig {
        &self.config
    }

    /// Disposition for a decision at the given volume
    #[must_use]
    pub fn evaluate(&self, decision: &Decision, volume: u64) -> Disposition {
        self.assess(decision, volume).disposition
    }

    /// Disposition and the reason behind it
    #[must_use]
    pub fn assess(&self, decision: &Decision, volume: u64) -> Assessment {
        // NaN compares false and so never clears the threshold
        let confident = decision.confidence_score >= self.config.confidence_threshold;
        let (disposition, reason) = if decision.proposed_action == ProposedAction::NoAction {
            (Disposition::Monitor, GuardReason::NoActionProposed)
        } else if !confident {
            (Disposition::Escalate, GuardReason::LowConfidence)
        } else if volume > self.config.max_autonomous_volume {
            let disposition = match self.config.volume_breach {
                VolumeBreachPolicy::Escalate => Disposition::Escalate,
                VolumeBreachPolicy::Skip => Disposition::Skip,
            };
            (disposition, GuardReason::VolumeLimit)
        } else {
            (Disposition::Execute, GuardReason::Cleared)
        };

        tracing::debug!(
            action = %decision.proposed_action,
            confidence = decision.confidence_score,
            volume,
            %disposition,
            %reason,
            "guardrail evaluated"
        );
        Assessment {
            disposition,
            reason,
        }
    }

    /// Whether a human must approve the decision
    #[inline]
    #[must_use]
    pub fn requires_approval(&self, decision: &Decision) -> bool {
        decision.requires_approval(self.config.confidence_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Diagnosis, RuleId};

    fn decision(action: ProposedAction, confidence: f64) -> Decision {
        Decision {
            diagnosis: Diagnosis::BankIssuerDegradation,
            evidence: vec![],
            proposed_action: action,
            risk_assessment: String::new(),
            confidence_score: confidence,
            rule: RuleId::Concentration,
            target: None,
        }
    }

    #[test]
    fn no_action_always_monitors() {
        let guard = Guardrail::default();
        for confidence in [0.0, 0.4, 0.85, 1.0] {
            for volume in [0, 50, 1_000_000] {
                let d = decision(ProposedAction::NoAction, confidence);
                assert_eq!(guard.evaluate(&d, volume), Disposition::Monitor);
            }
        }
    }

    #[test]
    fn low_confidence_escalates() {
        let guard = Guardrail::default();
        let d = decision(ProposedAction::AlertOps, 0.72);
        let assessment = guard.assess(&d, 50);
        assert_eq!(assessment.disposition, Disposition::Escalate);
        assert_eq!(assessment.reason, GuardReason::LowConfidence);
        assert!(guard.requires_approval(&d));
    }

    #[test]
    fn threshold_is_inclusive() {
        let guard = Guardrail::default();
        assert_eq!(
            guard.evaluate(&decision(ProposedAction::Suppress, 0.8), 50),
            Disposition::Execute
        );
        assert_eq!(
            guard.evaluate(&decision(ProposedAction::Suppress, 0.79), 50),
            Disposition::Escalate
        );
    }

    #[test]
    fn volume_breach_escalates_by_default() {
        let guard = Guardrail::default();
        let d = decision(ProposedAction::Suppress, 0.85);
        assert_eq!(guard.evaluate(&d, 5000), Disposition::Execute);
        let assessment = guard.assess(&d, 5001);
        assert_eq!(assessment.disposition, Disposition::Escalate);
        assert_eq!(assessment.reason, GuardReason::VolumeLimit);
    }

    #[test]
    fn volume_breach_can_skip() {
        let guard = Guardrail::new(GuardrailConfig {
            volume_breach: VolumeBreachPolicy::Skip,
            ..GuardrailConfig::default()
        });
        let d = decision(ProposedAction::Reroute, 0.9);
        assert_eq!(guard.evaluate(&d, 10_000), Disposition::Skip);
    }

    #[test]
    fn nan_confidence_never_executes() {
        let guard = Guardrail::default();
        let d = decision(ProposedAction::Reroute, f64::NAN);
        assert_eq!(guard.evaluate(&d, 10), Disposition::Escalate);
    }
}
