//! Diagnosis engine
//!
//! Classifies an [`Aggregate`] by evaluating [`RULES`] in order; the first
//! rule that matches produces the [`Decision`] and no later rule is consulted.
//! Recent lessons may then nudge the confidence (see [`crate::feedback`]),
//! never the diagnosis or the action.
//!
//! # Rule order
//!
//! | # | Rule | Diagnosis | Action |
//! |---|------|-----------|--------|
//! | 1 | insufficient_sample | InsufficientSample | NoAction |
//! | 2 | user_declined | UserRelated | NoAction |
//! | 3 | concentration | BankIssuerDegradation | Suppress / Reroute |
//! | 4 | bank_timeout | BankIssuerDegradation | AdjustRetryPolicy |
//! | 5 | network_failure | NetworkOrSystemFailure | AlertOps |
//! | 6 | retry_misconfiguration | RetryOrRoutingMisconfiguration | AlertOps |
//! | 7 | unattributed_spike | NetworkOrSystemFailure | AlertOps |
//! | 8 | baseline | NormalVariance | NoAction |
//!
//! The engine is a pure function of its inputs: no clock, no randomness.

use crate::aggregate::Aggregate;
use crate::config::{AgentConfig, FeedbackConfig, RuleThresholds};
use crate::feedback;
use crate::types::{
    ActionTarget, Decision, Diagnosis, Dimension, ErrorCode, Lesson, ProposedAction, RuleId,
};

/// Confidence of a decision taken on too few transactions
pub const INSUFFICIENT_SAMPLE_CONFIDENCE: f64 = 0.4;
/// Confidence that failures are user-driven
pub const USER_RELATED_CONFIDENCE: f64 = 0.82;
/// Floor of the bank/issuer confidence band
pub const DEGRADATION_CONFIDENCE_FLOOR: f64 = 0.75;
/// Width of the bank/issuer confidence band
pub const DEGRADATION_CONFIDENCE_SPAN: f64 = 0.10;
/// Confidence of a network/system diagnosis
pub const NETWORK_CONFIDENCE: f64 = 0.72;
/// Confidence of a retry/routing diagnosis
pub const MISCONFIGURATION_CONFIDENCE: f64 = 0.68;
/// Confidence of a spike with no attributable cause
pub const UNATTRIBUTED_CONFIDENCE: f64 = 0.65;
/// Confidence that nothing is wrong
pub const BASELINE_CONFIDENCE: f64 = 0.85;

/// Rule body: `Some` when the rule matches
pub type RuleFn = fn(&Aggregate, &RuleThresholds) -> Option<Decision>;

/// One predicate+result pair of the ordered rule list
#[derive(Clone, Copy)]
pub struct Rule {
    /// Rule identity
    pub id: RuleId,
    /// Rule body
    pub evaluate: RuleFn,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("id", &self.id).finish()
    }
}

/// Ordered rule list; first match wins
pub const RULES: [Rule; 8] = [
    Rule {
        id: RuleId::InsufficientSample,
        evaluate: insufficient_sample,
    },
    Rule {
        id: RuleId::UserDeclined,
        evaluate: user_declined,
    },
    Rule {
        id: RuleId::Concentration,
        evaluate: concentration,
    },
    Rule {
        id: RuleId::BankTimeout,
        evaluate: bank_timeout,
    },
    Rule {
        id: RuleId::NetworkFailure,
        evaluate: network_failure,
    },
    Rule {
        id: RuleId::RetryMisconfiguration,
        evaluate: retry_misconfiguration,
    },
    Rule {
        id: RuleId::UnattributedSpike,
        evaluate: unattributed_spike,
    },
    Rule {
        id: RuleId::Baseline,
        evaluate: baseline,
    },
];

/// Deterministic rule evaluator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiagnosisEngine {
    thresholds: RuleThresholds,
    feedback: FeedbackConfig,
}

impl DiagnosisEngine {
    /// Create engine with explicit cutoffs
    #[inline]
    #[must_use]
    pub fn new(thresholds: RuleThresholds, feedback: FeedbackConfig) -> Self {
        Self {
            thresholds,
            feedback,
        }
    }

    /// Create engine from an agent config
    #[must_use]
    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.rules.clone(), config.feedback.clone())
    }

    /// Rule cutoffs in use
    #[inline]
    #[must_use]
    pub fn thresholds(&self) -> &RuleThresholds {
        &self.thresholds
    }

    /// Classify an aggregate and let recent lessons nudge the confidence
    #[must_use]
    pub fn diagnose(&self, aggregate: &Aggregate, recent_lessons: &[Lesson]) -> Decision {
        let decision = self.classify(aggregate);
        let nudged = feedback::apply(decision, recent_lessons, &self.feedback);
        tracing::debug!(
            rule = %nudged.rule,
            diagnosis = %nudged.diagnosis,
            confidence = nudged.confidence_score,
            "diagnosis complete"
        );
        nudged
    }

    /// First matching rule, without lesson feedback
    #[must_use]
    pub fn classify(&self, aggregate: &Aggregate) -> Decision {
        RULES
            .iter()
            .find_map(|rule| (rule.evaluate)(aggregate, &self.thresholds))
            .unwrap_or_else(|| baseline_decision(aggregate))
    }

    /// Evaluate a single rule in isolation
    #[must_use]
    pub fn evaluate_rule(&self, id: RuleId, aggregate: &Aggregate) -> Option<Decision> {
        RULES
            .iter()
            .find(|rule| rule.id == id)
            .and_then(|rule| (rule.evaluate)(aggregate, &self.thresholds))
    }

    /// Every rule that matches, in evaluation order
    #[must_use]
    pub fn matching_rules(&self, aggregate: &Aggregate) -> Vec<RuleId> {
        RULES
            .iter()
            .filter(|rule| (rule.evaluate)(aggregate, &self.thresholds).is_some())
            .map(|rule| rule.id)
            .collect()
    }
}

/// Diagnose with the default cutoffs
#[must_use]
pub fn diagnose(aggregate: &Aggregate, recent_lessons: &[Lesson]) -> Decision {
    DiagnosisEngine::default().diagnose(aggregate, recent_lessons)
}

/// Round a confidence to two decimals
#[inline]
#[must_use]
pub fn round_confidence(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn decision(
    rule: RuleId,
    diagnosis: Diagnosis,
    proposed_action: ProposedAction,
    confidence_score: f64,
    evidence: Vec<String>,
    risk_assessment: impl Into<String>,
) -> Decision {
    Decision {
        diagnosis,
        evidence,
        proposed_action,
        risk_assessment: risk_assessment.into(),
        confidence_score: round_confidence(confidence_score),
        rule,
        target: None,
    }
}

fn percent(share: f64) -> String {
    format!("{:.0}%", share * 100.0)
}

fn rate(share: f64) -> String {
    format!("{:.1}%", share * 100.0)
}

/// Normalised excess of `share` over `cutoff`, in [0, 1]
fn excess(share: f64, cutoff: f64) -> f64 {
    if cutoff >= 1.0 {
        return if share >= cutoff { 1.0 } else { 0.0 };
    }
    ((share - cutoff) / (1.0 - cutoff)).clamp(0.0, 1.0)
}

fn degradation_confidence(strength: f64) -> f64 {
    DEGRADATION_CONFIDENCE_FLOOR + DEGRADATION_CONFIDENCE_SPAN * strength.clamp(0.0, 1.0)
}

fn code_fact(aggregate: &Aggregate, code: ErrorCode) -> String {
    format!(
        "{code} {}/{} failures ({})",
        aggregate.code_count(code),
        aggregate.failure_count,
        percent(aggregate.failure_share(code))
    )
}

fn entity_fact(name: &str, count: u64, failures: u64) -> String {
    format!(
        "{name}: {count}/{failures} failures ({})",
        percent(count as f64 / failures as f64)
    )
}

/// Code-driven rules need both an absolute floor and a share of failures
fn code_dominates(aggregate: &Aggregate, code: ErrorCode, share: f64, floor: u64) -> bool {
    let count = aggregate.code_count(code) as f64;
    aggregate.failure_count > 0
        && count >= (share * aggregate.failure_count as f64).max(floor as f64)
}

fn insufficient_sample(aggregate: &Aggregate, t: &RuleThresholds) -> Option<Decision> {
    if aggregate.total_count >= t.min_sample {
        return None;
    }
    Some(decision(
        RuleId::InsufficientSample,
        Diagnosis::InsufficientSample,
        ProposedAction::NoAction,
        INSUFFICIENT_SAMPLE_CONFIDENCE,
        vec![format!(
            "sample size {} below minimum {}",
            aggregate.total_count, t.min_sample
        )],
        "low: no intervention on an unreliable read",
    ))
}

fn user_declined(aggregate: &Aggregate, t: &RuleThresholds) -> Option<Decision> {
    let share = aggregate.failure_share(ErrorCode::UserDeclined);
    let plurality = aggregate.plurality_failure_code() == Some(ErrorCode::UserDeclined);
    if !plurality || share < t.user_declined_share {
        return None;
    }
    Some(decision(
        RuleId::UserDeclined,
        Diagnosis::UserRelated,
        ProposedAction::NoAction,
        USER_RELATED_CONFIDENCE,
        vec![
            code_fact(aggregate, ErrorCode::UserDeclined),
            format!(
                "failure rate {} over {} transactions",
                rate(aggregate.failure_rate().unwrap_or(0.0)),
                aggregate.total_count
            ),
        ],
        "low: automated intervention is unlikely to help and could add payer friction",
    ))
}

fn concentration(aggregate: &Aggregate, t: &RuleThresholds) -> Option<Decision> {
    let failures = aggregate.failure_count;
    if failures == 0 || failures < t.min_attributable_failures {
        return None;
    }

    let share_of = |count: u64| count as f64 / failures as f64;
    let bank = aggregate
        .top_failing_bank()
        .map(|(name, count)| (Dimension::Bank, name, count, share_of(count)))
        .filter(|(_, _, _, share)| *share >= t.bank_concentration);
    let issuer = aggregate
        .top_failing_issuer()
        .map(|(name, count)| (Dimension::Issuer, name, count, share_of(count)))
        .filter(|(_, _, _, share)| *share >= t.issuer_concentration);
    let down_share = aggregate.failure_share(ErrorCode::IssuerDown);
    let issuers_down = down_share >= t.issuer_down_share;

    let entity = match (bank, issuer) {
        (Some(b), Some(i)) => Some(if i.3 > b.3 { i } else { b }),
        (b, i) => b.or(i),
    };
    if entity.is_none() && !issuers_down {
        return None;
    }

    let mut strength: f64 = 0.0;
    let mut evidence = Vec::new();
    if let Some((dimension, name, count, share)) = entity {
        let cutoff = match dimension {
            Dimension::Issuer => t.issuer_concentration,
            _ => t.bank_concentration,
        };
        strength = strength.max(excess(share, cutoff));
        evidence.push(entity_fact(name, count, failures));
    }
    if issuers_down {
        strength = strength.max(excess(down_share, t.issuer_down_share));
    }
    if aggregate.code_count(ErrorCode::IssuerDown) > 0 {
        evidence.push(code_fact(aggregate, ErrorCode::IssuerDown));
    }

    let extreme = entity.filter(|(_, _, _, share)| *share >= t.extreme_concentration);
    let (action, risk) = match (extreme, entity) {
        (Some((_, name, count, _)), _) => (
            ProposedAction::Suppress,
            format!(
                "medium: withholds traffic from {name}, which failed {count} of {} transactions; reversible",
                aggregate.total_count
            ),
        ),
        (None, Some((_, name, _, _))) => (
            ProposedAction::Reroute,
            format!("low: shifts a bounded share of {name} traffic to a backup processor; reversible"),
        ),
        (None, None) => (
            ProposedAction::Reroute,
            "low: shifts a bounded share of traffic to a backup processor; reversible".to_string(),
        ),
    };

    let mut result = decision(
        RuleId::Concentration,
        Diagnosis::BankIssuerDegradation,
        action,
        degradation_confidence(strength),
        evidence,
        risk,
    );
    result.target = entity.map(|(dimension, name, _, _)| ActionTarget::new(dimension, name));
    Some(result)
}

fn bank_timeout(aggregate: &Aggregate, t: &RuleThresholds) -> Option<Decision> {
    if aggregate.failure_count < t.min_attributable_failures
        || !code_dominates(
            aggregate,
            ErrorCode::BankTimeout,
            t.bank_timeout_share,
            t.min_code_failures,
        )
    {
        return None;
    }

    let share = aggregate.failure_share(ErrorCode::BankTimeout);
    let mut evidence = vec![code_fact(aggregate, ErrorCode::BankTimeout)];
    let top_bank = aggregate.top_failing_bank();
    if let Some((name, count)) = top_bank {
        evidence.push(entity_fact(name, count, aggregate.failure_count));
    }

    let mut result = decision(
        RuleId::BankTimeout,
        Diagnosis::BankIssuerDegradation,
        ProposedAction::AdjustRetryPolicy,
        degradation_confidence(excess(share, t.bank_timeout_share)),
        evidence,
        "medium: retry policy change is reversible; aggressive backoff can slow recovery",
    );
    result.target = top_bank.map(|(name, _)| ActionTarget::new(Dimension::Bank, name));
    Some(result)
}

fn network_failure(aggregate: &Aggregate, t: &RuleThresholds) -> Option<Decision> {
    let network = code_dominates(
        aggregate,
        ErrorCode::NetworkError,
        t.network_error_share,
        t.min_code_failures,
    );
    let failure_rate = aggregate.failure_rate().unwrap_or(0.0);
    let latency = aggregate.average_latency_ms;
    let critical = latency.is_some_and(|l| l >= t.critical_latency_ms)
        && failure_rate >= t.failure_spike_rate;
    if !network && !critical {
        return None;
    }

    let mut evidence = Vec::new();
    if network {
        evidence.push(code_fact(aggregate, ErrorCode::NetworkError));
    }
    if let (true, Some(latency)) = (critical, latency) {
        evidence.push(format!(
            "average latency {latency:.0}ms (threshold {:.0}ms)",
            t.critical_latency_ms
        ));
        evidence.push(format!(
            "failure rate {} (threshold {})",
            rate(failure_rate),
            rate(t.failure_spike_rate)
        ));
    }

    Some(decision(
        RuleId::NetworkFailure,
        Diagnosis::NetworkOrSystemFailure,
        ProposedAction::AlertOps,
        NETWORK_CONFIDENCE,
        evidence,
        "medium: root cause needs investigation; autonomous rerouting could mask it",
    ))
}

fn retry_misconfiguration(aggregate: &Aggregate, t: &RuleThresholds) -> Option<Decision> {
    let failure_rate = aggregate.failure_rate()?;
    let latency = aggregate.average_latency_ms?;
    if failure_rate < t.failure_spike_rate || latency <= t.elevated_latency_ms {
        return None;
    }
    Some(decision(
        RuleId::RetryMisconfiguration,
        Diagnosis::RetryOrRoutingMisconfiguration,
        ProposedAction::AlertOps,
        MISCONFIGURATION_CONFIDENCE,
        vec![
            format!(
                "failure rate {} (threshold {})",
                rate(failure_rate),
                rate(t.failure_spike_rate)
            ),
            format!(
                "average latency {latency:.0}ms (threshold {:.0}ms)",
                t.elevated_latency_ms
            ),
        ],
        "medium: retry and routing changes are sensitive; review before changing them",
    ))
}

fn unattributed_spike(aggregate: &Aggregate, t: &RuleThresholds) -> Option<Decision> {
    let failure_rate = aggregate.failure_rate()?;
    if failure_rate < t.failure_spike_rate {
        return None;
    }
    let mix = ErrorCode::FAILURES
        .iter()
        .map(|code| format!("{code}={}", aggregate.code_count(*code)))
        .collect::<Vec<_>>()
        .join(", ");
    Some(decision(
        RuleId::UnattributedSpike,
        Diagnosis::NetworkOrSystemFailure,
        ProposedAction::AlertOps,
        UNATTRIBUTED_CONFIDENCE,
        vec![
            format!(
                "failure rate {} (threshold {})",
                rate(failure_rate),
                rate(t.failure_spike_rate)
            ),
            format!("error mix: {mix}"),
        ],
        "uncertain root cause; escalating avoids a wrong intervention",
    ))
}

fn baseline(aggregate: &Aggregate, _t: &RuleThresholds) -> Option<Decision> {
    Some(baseline_decision(aggregate))
}

fn baseline_decision(aggregate: &Aggregate) -> Decision {
    let fact = match aggregate.success_rate {
        Some(success_rate) => format!(
            "success rate {} with {} failures in {} transactions",
            rate(success_rate),
            aggregate.failure_count,
            aggregate.total_count
        ),
        None => "no transactions in window".to_string(),
    };
    decision(
        RuleId::Baseline,
        Diagnosis::NormalVariance,
        ProposedAction::NoAction,
        BASELINE_CONFIDENCE,
        vec![fact],
        "none: no change",
    )
}
