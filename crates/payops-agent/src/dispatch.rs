//! Action dispatch
//!
//! Turns an executed decision into exactly one call on the external
//! [`PaymentOps`] system, bounded by a timeout. Dispatch never decides
//! anything: by the time it runs, the guardrail has already said Execute.
//!
//! - [`ActionParams`]: call parameters derived from a decision
//! - [`Dispatcher`]: runs the call and types the result
//! - [`TracingOps`]: default ops backend that records actions as tracing events

use crate::error::{DispatchError, OpsError};
use payops_core::{ActionConfig, Decision, Disposition, GuardReason, ProposedAction};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Suppress target used when the decision named no entity
pub const DEFAULT_SUPPRESS_TARGET: &str = "affected path";

/// Alert text used when a decision carries no evidence
pub const DEFAULT_ALERT_MESSAGE: &str = "Escalation: low confidence or policy.";

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Info,
    /// Needs attention
    Warning,
    /// Needs attention now
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        })
    }
}

/// Acknowledgement from the ops system
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpsAck {
    /// Optional diagnostic text
    pub detail: Option<String>,
}

impl OpsAck {
    /// Acknowledgement with a detail note
    #[must_use]
    pub fn with_detail(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
        }
    }
}

/// External payment-operations system
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PaymentOps: Send + Sync {
    /// Shift `percent` of traffic to a backup processor
    async fn reroute_traffic(&self, percent: f64, reason: &str) -> Result<OpsAck, OpsError>;

    /// Stop routing traffic through `target`
    async fn suppress_path(&self, target: &str, reason: &str) -> Result<OpsAck, OpsError>;

    /// Change retry behaviour
    async fn adjust_retry_policy(
        &self,
        max_retries: Option<u32>,
        backoff: Duration,
        reason: &str,
    ) -> Result<OpsAck, OpsError>;

    /// Notify human operators
    async fn alert_ops(&self, message: &str, severity: Severity) -> Result<OpsAck, OpsError>;
}

/// Call parameters for every action kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionParams {
    /// Share of traffic to reroute
    pub reroute_percent: f64,
    /// Entity to suppress
    pub suppress_target: String,
    /// Retry count; `None` leaves it unchanged
    pub max_retries: Option<u32>,
    /// Retry backoff
    pub retry_backoff: Duration,
    /// Alert body
    pub alert_message: String,
    /// Short reason attached to every call
    pub reason: String,
}

impl ActionParams {
    /// Derive parameters from a decision
    #[must_use]
    pub fn from_decision(decision: &Decision, config: &ActionConfig) -> Self {
        let suppress_target = decision
            .target
            .as_ref()
            .map_or_else(|| DEFAULT_SUPPRESS_TARGET.to_string(), |t| t.name.clone());
        let alert_message = if decision.evidence.is_empty() {
            DEFAULT_ALERT_MESSAGE.to_string()
        } else {
            format!("{}: {}", decision.diagnosis, decision.evidence.join("; "))
        };
        Self {
            reroute_percent: config.reroute_percent,
            suppress_target,
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            alert_message,
            reason: decision
                .diagnosis
                .label()
                .chars()
                .take(config.reason_max_len)
                .collect(),
        }
    }
}

/// Result of a dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The external call was made and acknowledged
    Performed(OpsAck),
    /// The action needs no external call
    NoCall,
}

/// Executes actions against a [`PaymentOps`] backend
#[derive(Clone)]
pub struct Dispatcher {
    ops: Arc<dyn PaymentOps>,
    timeout: Duration,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create dispatcher with a per-call timeout
    #[must_use]
    pub fn new(ops: Arc<dyn PaymentOps>, timeout: Duration) -> Self {
        Self { ops, timeout }
    }

    /// Carry out one action
    ///
    /// # Errors
    /// - [`DispatchError::Ops`] if the ops system rejected the call
    /// - [`DispatchError::Timeout`] if it did not answer in time
    pub async fn dispatch(
        &self,
        action: ProposedAction,
        params: &ActionParams,
    ) -> Result<DispatchOutcome, DispatchError> {
        let ops = &self.ops;
        let ack = match action {
            ProposedAction::NoAction => return Ok(DispatchOutcome::NoCall),
            ProposedAction::Reroute => {
                self.bounded(ops.reroute_traffic(params.reroute_percent, &params.reason))
                    .await?
            }
            ProposedAction::Suppress => {
                self.bounded(ops.suppress_path(&params.suppress_target, &params.reason))
                    .await?
            }
            ProposedAction::AdjustRetryPolicy => {
                self.bounded(ops.adjust_retry_policy(
                    params.max_retries,
                    params.retry_backoff,
                    &params.reason,
                ))
                .await?
            }
            ProposedAction::AlertOps => {
                self.bounded(ops.alert_ops(&params.alert_message, Severity::Warning))
                    .await?
            }
        };
        tracing::info!(action = %action, "action dispatched");
        Ok(DispatchOutcome::Performed(ack))
    }

    /// Tell operators why a decision was not executed autonomously
    ///
    /// # Errors
    /// Same as [`Dispatcher::dispatch`]
    pub async fn notify_withheld(
        &self,
        decision: &Decision,
        disposition: Disposition,
        reason: GuardReason,
    ) -> Result<OpsAck, DispatchError> {
        let headline = match disposition {
            Disposition::Skip => "Skipped autonomous action",
            _ => "Escalated for human approval",
        };
        let message = format!(
            "{headline} ({reason}): {} -> {} at confidence {:.2}. Evidence: {}",
            decision.diagnosis,
            decision.proposed_action,
            decision.confidence_score,
            decision.evidence.join("; ")
        );
        self.bounded(self.ops.alert_ops(&message, Severity::Warning))
            .await
    }

    async fn bounded<F>(&self, call: F) -> Result<OpsAck, DispatchError>
    where
        F: std::future::Future<Output = Result<OpsAck, OpsError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(DispatchError::from),
            Err(_) => Err(DispatchError::Timeout(self.timeout)),
        }
    }
}

/// Ops backend that records every action as a structured tracing event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingOps;

#[async_trait::async_trait]
impl PaymentOps for TracingOps {
    async fn reroute_traffic(&self, percent: f64, reason: &str) -> Result<OpsAck, OpsError> {
        tracing::info!(target: "payops::action", percent, reason, "rerouting traffic to backup processor");
        Ok(OpsAck::with_detail(format!(
            "Rerouting {percent}% of traffic to backup PSP"
        )))
    }

    async fn suppress_path(&self, target: &str, reason: &str) -> Result<OpsAck, OpsError> {
        tracing::info!(target: "payops::action", path = target, reason, "suppressing failing path");
        Ok(OpsAck::with_detail(format!("Suppressing failing path: {target}")))
    }

    async fn adjust_retry_policy(
        &self,
        max_retries: Option<u32>,
        backoff: Duration,
        reason: &str,
    ) -> Result<OpsAck, OpsError> {
        tracing::info!(
            target: "payops::action",
            max_retries,
            backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
            reason,
            "adjusting retry policy"
        );
        let mut detail = format!("Adjusting retry policy: backoff={}s", backoff.as_secs_f64());
        if let Some(retries) = max_retries {
            detail.push_str(&format!(", max_retries={retries}"));
        }
        Ok(OpsAck::with_detail(detail))
    }

    async fn alert_ops(&self, message: &str, severity: Severity) -> Result<OpsAck, OpsError> {
        match severity {
            Severity::Critical => {
                tracing::error!(target: "payops::action", %severity, alert = message, "ops alert");
            }
            Severity::Warning => {
                tracing::warn!(target: "payops::action", %severity, alert = message, "ops alert");
            }
            Severity::Info => {
                tracing::info!(target: "payops::action", %severity, alert = message, "ops alert");
            }
        }
        Ok(OpsAck::default())
    }
}
