//! Core types for the decision core
//!
//! Defines the fundamental vocabulary shared by every stage of a cycle:
//! - Raw payment events and their outcome codes
//! - Diagnoses, proposed actions and the decision record
//! - Guardrail dispositions
//! - Lessons persisted for future cycles

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use ulid::Ulid;

/// Outcome code carried by every payment event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Payment went through
    Success,
    /// Acquiring bank did not answer in time
    BankTimeout,
    /// Card issuer unavailable
    IssuerDown,
    /// Payer or issuer declined the payment
    UserDeclined,
    /// Transport or platform failure
    NetworkError,
}

impl ErrorCode {
    /// Every code, in distribution order
    pub const ALL: [ErrorCode; 5] = [
        ErrorCode::Success,
        ErrorCode::BankTimeout,
        ErrorCode::IssuerDown,
        ErrorCode::UserDeclined,
        ErrorCode::NetworkError,
    ];

    /// Codes that count as failures
    pub const FAILURES: [ErrorCode; 4] = [
        ErrorCode::BankTimeout,
        ErrorCode::IssuerDown,
        ErrorCode::UserDeclined,
        ErrorCode::NetworkError,
    ];

    /// Whether this code is a failed payment
    #[inline]
    #[must_use]
    pub fn is_failure(self) -> bool {
        !matches!(self, ErrorCode::Success)
    }

    /// Wire name of the code
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Success => "SUCCESS",
            ErrorCode::BankTimeout => "BANK_TIMEOUT",
            ErrorCode::IssuerDown => "ISSUER_DOWN",
            ErrorCode::UserDeclined => "USER_DECLINED",
            ErrorCode::NetworkError => "NETWORK_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single payment outcome observed by the signal source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    /// Acquiring bank
    pub bank: String,
    /// Card network / issuer
    pub issuer: String,
    /// Payment method (CARD, UPI, ...)
    pub method: String,
    /// Outcome code
    pub status: ErrorCode,
    /// End-to-end latency
    pub latency_ms: u32,
    /// When the outcome was observed
    pub timestamp: DateTime<Utc>,
}

impl PaymentEvent {
    /// Create a new event
    #[must_use]
    pub fn new(
        bank: impl Into<String>,
        issuer: impl Into<String>,
        method: impl Into<String>,
        status: ErrorCode,
        latency_ms: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            bank: bank.into(),
            issuer: issuer.into(),
            method: method.into(),
            status,
            latency_ms,
            timestamp,
        }
    }

    /// Whether the payment succeeded
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.status.is_failure()
    }
}

/// Failure mode classified by the diagnosis engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Diagnosis {
    /// Failures driven by payers, not infrastructure
    UserRelated,
    /// A bank or issuer is degrading
    BankIssuerDegradation,
    /// Transport, platform or unexplained failure
    NetworkOrSystemFailure,
    /// Failure rate and latency point at retry storms or bad routing
    RetryOrRoutingMisconfiguration,
    /// Too few transactions to decide anything
    InsufficientSample,
    /// Nothing abnormal
    NormalVariance,
}

impl Diagnosis {
    /// Human-readable label
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Diagnosis::UserRelated => "User-related",
            Diagnosis::BankIssuerDegradation => "Bank/issuer degradation",
            Diagnosis::NetworkOrSystemFailure => "Network or system failure",
            Diagnosis::RetryOrRoutingMisconfiguration => "Retry or routing misconfiguration",
            Diagnosis::InsufficientSample => "Insufficient sample",
            Diagnosis::NormalVariance => "Normal variance",
        }
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The single corrective action proposed for a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProposedAction {
    /// Shift a share of traffic to a backup processor
    Reroute,
    /// Change retry count / backoff
    AdjustRetryPolicy,
    /// Stop sending traffic down a failing path
    Suppress,
    /// Page human operators
    AlertOps,
    /// Do nothing
    NoAction,
}

impl ProposedAction {
    /// Human-readable label
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            ProposedAction::Reroute => "Reroute traffic",
            ProposedAction::AdjustRetryPolicy => "Adjust retry policy",
            ProposedAction::Suppress => "Suppress failing path",
            ProposedAction::AlertOps => "Alert human operators",
            ProposedAction::NoAction => "Take no action",
        }
    }

    /// Whether the action has an external side effect
    #[inline]
    #[must_use]
    pub fn is_actionable(self) -> bool {
        !matches!(self, ProposedAction::NoAction)
    }
}

impl fmt::Display for ProposedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Entity dimension a failure can be attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    /// Acquiring bank
    Bank,
    /// Card issuer
    Issuer,
    /// Payment method
    Method,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dimension::Bank => "bank",
            Dimension::Issuer => "issuer",
            Dimension::Method => "method",
        })
    }
}

/// Entity an action should be applied to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionTarget {
    /// Which mapping the entity came from
    pub dimension: Dimension,
    /// Entity name as seen in events
    pub name: String,
}

impl ActionTarget {
    /// Create a new target
    #[must_use]
    pub fn new(dimension: Dimension, name: impl Into<String>) -> Self {
        Self {
            dimension,
            name: name.into(),
        }
    }
}

impl fmt::Display for ActionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.dimension, self.name)
    }
}

/// Identifies a rule in the ordered diagnosis list
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    /// Too few transactions
    InsufficientSample,
    /// USER_DECLINED dominates failures
    UserDeclined,
    /// Failures cluster on one bank/issuer, or issuers are down
    Concentration,
    /// BANK_TIMEOUT dominates failures
    BankTimeout,
    /// NETWORK_ERROR dominates, or latency and failure rate both critical
    NetworkFailure,
    /// Elevated failure rate with elevated latency
    RetryMisconfiguration,
    /// Elevated failure rate with no attributable cause
    UnattributedSpike,
    /// Nothing matched
    Baseline,
}

impl RuleId {
    /// Evaluation order; first match wins
    pub const ORDER: [RuleId; 8] = [
        RuleId::InsufficientSample,
        RuleId::UserDeclined,
        RuleId::Concentration,
        RuleId::BankTimeout,
        RuleId::NetworkFailure,
        RuleId::RetryMisconfiguration,
        RuleId::UnattributedSpike,
        RuleId::Baseline,
    ];

    /// Stable name used in logs
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            RuleId::InsufficientSample => "insufficient_sample",
            RuleId::UserDeclined => "user_declined",
            RuleId::Concentration => "concentration",
            RuleId::BankTimeout => "bank_timeout",
            RuleId::NetworkFailure => "network_failure",
            RuleId::RetryMisconfiguration => "retry_misconfiguration",
            RuleId::UnattributedSpike => "unattributed_spike",
            RuleId::Baseline => "baseline",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One cycle's diagnosis and proposed action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Classified failure mode
    pub diagnosis: Diagnosis,
    /// Facts drawn from the aggregate, in citation order
    pub evidence: Vec<String>,
    /// Exactly one proposed action
    pub proposed_action: ProposedAction,
    /// Short qualitative risk note
    pub risk_assessment: String,
    /// Confidence in [0, 1]
    pub confidence_score: f64,
    /// Rule that produced this decision
    pub rule: RuleId,
    /// Entity the action should touch, when one was identified
    pub target: Option<ActionTarget>,
}

impl Decision {
    /// Whether a human must approve before acting at the given threshold
    #[inline]
    #[must_use]
    pub fn requires_approval(&self, confidence_threshold: f64) -> bool {
        self.confidence_score < confidence_threshold
    }
}

/// Guardrail verdict for a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Disposition {
    /// Act autonomously
    Execute,
    /// Hand to a human for approval
    Escalate,
    /// Blocked, recorded as a non-escalated pass-through
    Skip,
    /// Nothing to do; keep watching
    Monitor,
}

impl Disposition {
    /// All dispositions
    pub const ALL: [Disposition; 4] = [
        Disposition::Execute,
        Disposition::Escalate,
        Disposition::Skip,
        Disposition::Monitor,
    ];
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Disposition::Execute => "execute",
            Disposition::Escalate => "escalate",
            Disposition::Skip => "skip",
            Disposition::Monitor => "monitor",
        })
    }
}

/// What actually happened to a cycle's decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LessonOutcome {
    /// Action dispatched and acknowledged
    Executed,
    /// Handed to a human
    Escalated,
    /// Blocked by a guardrail without escalation
    SkippedSafety,
    /// No action proposed
    Monitored,
    /// Execute was decided but the external call failed
    DispatchFailed,
    /// Input was rejected before diagnosis
    Degraded,
}

impl LessonOutcome {
    /// Outcome implied by a disposition when no dispatch is involved
    #[must_use]
    pub fn from_disposition(disposition: Disposition) -> Self {
        match disposition {
            Disposition::Execute => LessonOutcome::Executed,
            Disposition::Escalate => LessonOutcome::Escalated,
            Disposition::Skip => LessonOutcome::SkippedSafety,
            Disposition::Monitor => LessonOutcome::Monitored,
        }
    }

    /// Contribution of this outcome to future confidence
    #[must_use]
    pub fn feedback_score(self) -> i32 {
        match self {
            LessonOutcome::Executed => 1,
            LessonOutcome::Escalated
            | LessonOutcome::SkippedSafety
            | LessonOutcome::DispatchFailed => -1,
            LessonOutcome::Monitored | LessonOutcome::Degraded => 0,
        }
    }
}

impl fmt::Display for LessonOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LessonOutcome::Executed => "EXECUTED",
            LessonOutcome::Escalated => "ESCALATED",
            LessonOutcome::SkippedSafety => "SKIPPED_SAFETY",
            LessonOutcome::Monitored => "MONITORED",
            LessonOutcome::DispatchFailed => "DISPATCH_FAILED",
            LessonOutcome::Degraded => "DEGRADED",
        })
    }
}

/// Unique lesson identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LessonId(pub Ulid);

impl LessonId {
    /// Generate new lesson ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for LessonId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LessonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable record of one past decision and its outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    /// Lesson identifier
    pub id: LessonId,
    /// Cycle that produced the lesson
    pub cycle: u64,
    /// Diagnosis of that cycle
    pub diagnosis: Diagnosis,
    /// Action proposed in that cycle
    pub proposed_action: ProposedAction,
    /// What happened
    pub outcome: LessonOutcome,
    /// Confidence at decision time
    pub confidence_score: f64,
    /// When the lesson was recorded
    pub timestamp: DateTime<Utc>,
    /// Free-form context (action key, dispatch detail, ...)
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Lesson {
    /// Record the outcome of a decision
    #[must_use]
    pub fn record(
        cycle: u64,
        decision: &Decision,
        outcome: LessonOutcome,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LessonId::new(),
            cycle,
            diagnosis: decision.diagnosis,
            proposed_action: decision.proposed_action,
            outcome,
            confidence_score: decision.confidence_score,
            timestamp,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether this lesson concerns the given diagnosis/action pair
    #[inline]
    #[must_use]
    pub fn matches(&self, diagnosis: Diagnosis, action: ProposedAction) -> bool {
        self.diagnosis == diagnosis && self.proposed_action == action
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_failure_split() {
        assert!(!ErrorCode::Success.is_failure());
        for code in ErrorCode::FAILURES {
            assert!(code.is_failure());
        }
    }

    #[test]
    fn error_code_wire_names() {
        let json = serde_json::to_string(&ErrorCode::IssuerDown).unwrap();
        assert_eq!(json, "\"ISSUER_DOWN\"");
        assert_eq!(ErrorCode::UserDeclined.to_string(), "USER_DECLINED");
    }

    #[test]
    fn outcome_from_disposition() {
        assert_eq!(
            LessonOutcome::from_disposition(Disposition::Skip),
            LessonOutcome::SkippedSafety
        );
        assert_eq!(
            LessonOutcome::from_disposition(Disposition::Monitor),
            LessonOutcome::Monitored
        );
    }

    #[test]
    fn dispatch_failure_is_not_favourable() {
        assert_eq!(LessonOutcome::Executed.feedback_score(), 1);
        assert_eq!(LessonOutcome::DispatchFailed.feedback_score(), -1);
        assert_eq!(LessonOutcome::Degraded.feedback_score(), 0);
    }

    #[test]
    fn lesson_matches_pair() {
        let decision = Decision {
            diagnosis: Diagnosis::BankIssuerDegradation,
            evidence: vec![],
            proposed_action: ProposedAction::Suppress,
            risk_assessment: String::new(),
            confidence_score: 0.85,
            rule: RuleId::Concentration,
            target: None,
        };
        let lesson = Lesson::record(1, &decision, LessonOutcome::Executed, Utc::now())
            .with_metadata("action_key", "suppress");

        assert!(lesson.matches(Diagnosis::BankIssuerDegradation, ProposedAction::Suppress));
        assert!(!lesson.matches(Diagnosis::BankIssuerDegradation, ProposedAction::Reroute));
        assert_eq!(lesson.metadata.get("action_key").map(String::as_str), Some("suppress"));
    }
}
