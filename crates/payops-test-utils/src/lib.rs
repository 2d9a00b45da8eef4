//! Testing utilities for the PayOps workspace
//!
//! Shared fixtures: event windows, canned scenarios and collaborator doubles.

#![allow(missing_docs)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use payops_agent::{
    LessonSeq, LessonStore, OpsAck, OpsError, PaymentOps, Severity, SignalSource, SignalWindow,
    SourceError, StoreError,
};
use payops_core::{
    aggregate, Aggregate, Decision, Diagnosis, ErrorCode, Lesson, PaymentEvent, ProposedAction,
    RuleId,
};
use std::collections::VecDeque;

/// Fixed window end used across fixtures
pub fn window_end() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Builder for a window of events, all stamped inside the window
#[derive(Debug, Clone)]
pub struct EventBatch {
    end: DateTime<Utc>,
    method: String,
    latency_ms: u32,
    events: Vec<PaymentEvent>,
}

impl Default for EventBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBatch {
    pub fn new() -> Self {
        Self::ending_at(window_end())
    }

    pub fn ending_at(end: DateTime<Utc>) -> Self {
        Self {
            end,
            method: "CARD".to_string(),
            latency_ms: 300,
            events: Vec::new(),
        }
    }

    /// Latency of events added from now on
    #[must_use]
    pub fn latency(mut self, ms: u32) -> Self {
        self.latency_ms = ms;
        self
    }

    /// Payment method of events added from now on
    #[must_use]
    pub fn method(mut self, method: &str) -> Self {
        self.method = method.to_string();
        self
    }

    #[must_use]
    pub fn successes(self, n: usize) -> Self {
        self.push(n, ErrorCode::Success, "HDFC", "VISA")
    }

    #[must_use]
    pub fn failures(self, n: usize, code: ErrorCode, bank: &str, issuer: &str) -> Self {
        self.push(n, code, bank, issuer)
    }

    fn push(mut self, n: usize, code: ErrorCode, bank: &str, issuer: &str) -> Self {
        let at = self.end - Duration::seconds(1);
        for _ in 0..n {
            self.events.push(PaymentEvent::new(
                bank,
                issuer,
                self.method.as_str(),
                code,
                self.latency_ms,
                at,
            ));
        }
        self
    }

    pub fn events(&self) -> Vec<PaymentEvent> {
        self.events.clone()
    }

    pub fn window(&self) -> SignalWindow {
        SignalWindow::Events(self.events())
    }

    /// Aggregate over a 60-second window
    pub fn aggregate(&self) -> Aggregate {
        aggregate(&self.events, self.end, 60)
    }
}

/// Scenario A: 50 transactions, 2 scattered failures
pub fn healthy_window() -> EventBatch {
    EventBatch::new()
        .successes(48)
        .failures(1, ErrorCode::BankTimeout, "HDFC", "VISA")
        .failures(1, ErrorCode::NetworkError, "ICICI", "RUPAY")
}

/// Scenario B: 50 transactions, 45 ISSUER_DOWN on SBI
pub fn sbi_outage_window() -> EventBatch {
    EventBatch::new()
        .successes(5)
        .failures(45, ErrorCode::IssuerDown, "SBI", "VISA")
}

/// Scenario D: 3 transactions
pub fn tiny_window() -> EventBatch {
    EventBatch::new()
        .successes(1)
        .failures(2, ErrorCode::IssuerDown, "SBI", "VISA")
}

/// Scenario C: the scenario B decision at a lower confidence
pub fn low_confidence_suppress(confidence: f64) -> Decision {
    Decision {
        diagnosis: Diagnosis::BankIssuerDegradation,
        evidence: vec!["SBI: 45/45 failures (100%)".to_string()],
        proposed_action: ProposedAction::Suppress,
        risk_assessment: "medium".to_string(),
        confidence_score: confidence,
        rule: RuleId::Concentration,
        target: None,
    }
}

/// One call received by [`RecordingOps`]
#[derive(Debug, Clone, PartialEq)]
pub enum OpsCall {
    Reroute { percent: f64, reason: String },
    Suppress { target: String, reason: String },
    AdjustRetry {
        max_retries: Option<u32>,
        backoff: std::time::Duration,
        reason: String,
    },
    Alert { message: String, severity: Severity },
}

/// [`PaymentOps`] double that records calls and optionally fails actions
#[derive(Debug, Default)]
pub struct RecordingOps {
    calls: Mutex<Vec<OpsCall>>,
    fail_actions: Option<OpsError>,
}

impl RecordingOps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every action call (alerts still succeed)
    pub fn failing(error: OpsError) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_actions: Some(error),
        }
    }

    pub fn calls(&self) -> Vec<OpsCall> {
        self.calls.lock().clone()
    }

    /// Calls other than alerts
    pub fn actions(&self) -> Vec<OpsCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, OpsCall::Alert { .. }))
            .collect()
    }

    pub fn alerts(&self) -> Vec<OpsCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, OpsCall::Alert { .. }))
            .collect()
    }

    fn record_action(&self, call: OpsCall) -> Result<OpsAck, OpsError> {
        self.calls.lock().push(call);
        match &self.fail_actions {
            Some(err) => Err(err.clone()),
            None => Ok(OpsAck::with_detail("recorded")),
        }
    }
}

#[async_trait::async_trait]
impl PaymentOps for RecordingOps {
    async fn reroute_traffic(&self, percent: f64, reason: &str) -> Result<OpsAck, OpsError> {
        self.record_action(OpsCall::Reroute {
            percent,
            reason: reason.to_string(),
        })
    }

    async fn suppress_path(&self, target: &str, reason: &str) -> Result<OpsAck, OpsError> {
        self.record_action(OpsCall::Suppress {
            target: target.to_string(),
            reason: reason.to_string(),
        })
    }

    async fn adjust_retry_policy(
        &self,
        max_retries: Option<u32>,
        backoff: std::time::Duration,
        reason: &str,
    ) -> Result<OpsAck, OpsError> {
        self.record_action(OpsCall::AdjustRetry {
            max_retries,
            backoff,
            reason: reason.to_string(),
        })
    }

    async fn alert_ops(&self, message: &str, severity: Severity) -> Result<OpsAck, OpsError> {
        self.calls.lock().push(OpsCall::Alert {
            message: message.to_string(),
            severity,
        });
        Ok(OpsAck::default())
    }
}

/// [`SignalSource`] that replays scripted windows, then fails
#[derive(Debug, Default)]
pub struct ScriptedSource {
    windows: Mutex<VecDeque<Result<SignalWindow, SourceError>>>,
}

impl ScriptedSource {
    pub fn new(windows: Vec<Result<SignalWindow, SourceError>>) -> Self {
        Self {
            windows: Mutex::new(windows.into()),
        }
    }

    /// Replay windows in order
    pub fn windows(windows: impl IntoIterator<Item = SignalWindow>) -> Self {
        Self::new(windows.into_iter().map(Ok).collect())
    }
}

#[async_trait::async_trait]
impl SignalSource for ScriptedSource {
    async fn next_window(&self, _now: DateTime<Utc>) -> Result<SignalWindow, SourceError> {
        self.windows
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SourceError::Unavailable("script exhausted".to_string())))
    }
}

/// [`LessonStore`] whose every operation fails
#[derive(Debug, Default)]
pub struct BrokenStore;

impl LessonStore for BrokenStore {
    fn append(&self, _lesson: Lesson) -> Result<LessonSeq, StoreError> {
        Err(StoreError::Unavailable("disk full".to_string()))
    }

    fn recent(&self, _n: usize) -> Result<Vec<Lesson>, StoreError> {
        Err(StoreError::Unavailable("disk full".to_string()))
    }

    fn len(&self) -> usize {
        0
    }
}
