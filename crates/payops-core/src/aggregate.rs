//! Window aggregation
//!
//! Reduces a raw event window into the fixed-shape [`Aggregate`] consumed by
//! the diagnosis engine. [`aggregate`] is total: any event sequence yields a
//! consistent aggregate, and an empty window yields zero counts with the rate
//! and latency left undefined.

use crate::error::InputError;
use crate::types::{ErrorCode, PaymentEvent};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default aggregation window
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// Tolerance when reconciling a reported rate with its counts
const RATE_TOLERANCE: f64 = 1e-6;

/// Summarised traffic health for one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    /// Window length
    pub window_seconds: u64,
    /// Inclusive end of the window
    pub window_end: DateTime<Utc>,
    /// Events in the window
    pub total_count: u64,
    /// SUCCESS events
    pub success_count: u64,
    /// Non-SUCCESS events
    pub failure_count: u64,
    /// `success_count / total_count`; `None` for an empty window
    pub success_rate: Option<f64>,
    /// Count per outcome code, summing to `total_count`
    pub error_code_distribution: BTreeMap<ErrorCode, u64>,
    /// Failures per bank (entities with at least one failure)
    pub failures_by_bank: BTreeMap<String, u64>,
    /// Failures per issuer
    pub failures_by_issuer: BTreeMap<String, u64>,
    /// Failures per payment method
    pub failures_by_method: BTreeMap<String, u64>,
    /// Mean latency; `None` for an empty window
    pub average_latency_ms: Option<f64>,
}

impl Aggregate {
    /// Aggregate of a window with no events
    #[must_use]
    pub fn empty(window_end: DateTime<Utc>, window_seconds: u64) -> Self {
        Self {
            window_seconds,
            window_end,
            total_count: 0,
            success_count: 0,
            failure_count: 0,
            success_rate: None,
            error_code_distribution: BTreeMap::new(),
            failures_by_bank: BTreeMap::new(),
            failures_by_issuer: BTreeMap::new(),
            failures_by_method: BTreeMap::new(),
            average_latency_ms: None,
        }
    }

    /// Whether the window held no events
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }

    /// `failure_count / total_count`; `None` for an empty window
    #[must_use]
    pub fn failure_rate(&self) -> Option<f64> {
        (self.total_count > 0).then(|| self.failure_count as f64 / self.total_count as f64)
    }

    /// Events with the given outcome code
    #[inline]
    #[must_use]
    pub fn code_count(&self, code: ErrorCode) -> u64 {
        self.error_code_distribution.get(&code).copied().unwrap_or(0)
    }

    /// Share of failures carrying `code`; zero when there are no failures
    #[must_use]
    pub fn failure_share(&self, code: ErrorCode) -> f64 {
        if self.failure_count == 0 || !code.is_failure() {
            return 0.0;
        }
        self.code_count(code) as f64 / self.failure_count as f64
    }

    /// Bank with the most failures (ties broken by name)
    #[must_use]
    pub fn top_failing_bank(&self) -> Option<(&str, u64)> {
        top_entity(&self.failures_by_bank)
    }

    /// Issuer with the most failures (ties broken by name)
    #[must_use]
    pub fn top_failing_issuer(&self) -> Option<(&str, u64)> {
        top_entity(&self.failures_by_issuer)
    }

    /// Failure code with the strictly highest count, if unique
    #[must_use]
    pub fn plurality_failure_code(&self) -> Option<ErrorCode> {
        let mut best: Option<(ErrorCode, u64)> = None;
        let mut tied = false;
        for code in ErrorCode::FAILURES {
            let count = self.code_count(code);
            if count == 0 {
                continue;
            }
            match best {
                Some((_, top)) if count < top => {}
                Some((_, top)) if count == top => tied = true,
                _ => {
                    best = Some((code, count));
                    tied = false;
                }
            }
        }
        best.filter(|_| !tied).map(|(code, _)| code)
    }

    /// Check every reconciliation invariant
    ///
    /// # Errors
    /// Returns the first violated invariant
    pub fn validate(&self) -> Result<(), InputError> {
        let counted = self.success_count.checked_add(self.failure_count);
        if counted != Some(self.total_count) {
            return Err(InputError::CountMismatch {
                total: self.total_count,
                success: self.success_count,
                failure: self.failure_count,
            });
        }

        check_sum(
            "error_code_distribution",
            self.error_code_distribution.values(),
            self.total_count,
        )?;
        let success_bucket = self.code_count(ErrorCode::Success);
        if success_bucket != self.success_count {
            return Err(InputError::SuccessBucketMismatch {
                expected: self.success_count,
                actual: success_bucket,
            });
        }

        for (field, map) in [
            ("failures_by_bank", &self.failures_by_bank),
            ("failures_by_issuer", &self.failures_by_issuer),
            ("failures_by_method", &self.failures_by_method),
        ] {
            if let Some((entity, _)) = map.iter().find(|(_, count)| **count == 0) {
                return Err(InputError::EmptyEntity {
                    field,
                    entity: entity.clone(),
                });
            }
            check_sum(field, map.values(), self.failure_count)?;
        }

        self.validate_rate()?;
        self.validate_latency()
    }

    fn validate_rate(&self) -> Result<(), InputError> {
        match (self.total_count, self.success_rate) {
            (0, None) => Ok(()),
            (0, Some(rate)) => Err(InputError::InvalidRate(format!(
                "{rate} reported for an empty window"
            ))),
            (_, None) => Err(InputError::InvalidRate(
                "undefined for a non-empty window".to_string(),
            )),
            (total, Some(rate)) => {
                let expected = self.success_count as f64 / total as f64;
                if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
                    Err(InputError::InvalidRate(format!("{rate} outside [0, 1]")))
                } else if (rate - expected).abs() > RATE_TOLERANCE {
                    Err(InputError::InvalidRate(format!(
                        "{rate} disagrees with counts ({expected})"
                    )))
                } else {
                    Ok(())
                }
            }
        }
    }

    fn validate_latency(&self) -> Result<(), InputError> {
        match (self.total_count, self.average_latency_ms) {
            (0, None) => Ok(()),
            (0, Some(latency)) => Err(InputError::InvalidLatency(format!(
                "{latency} reported for an empty window"
            ))),
            (_, None) => Err(InputError::InvalidLatency(
                "undefined for a non-empty window".to_string(),
            )),
            (_, Some(latency)) if !latency.is_finite() || latency < 0.0 => {
                Err(InputError::InvalidLatency(latency.to_string()))
            }
            _ => Ok(()),
        }
    }
}

fn check_sum<'a>(
    field: &'static str,
    values: impl Iterator<Item = &'a u64>,
    expected: u64,
) -> Result<(), InputError> {
    let actual = values.fold(0u64, |acc, v| acc.saturating_add(*v));
    if actual == expected {
        Ok(())
    } else {
        Err(InputError::DistributionMismatch {
            field,
            expected,
            actual,
        })
    }
}

fn top_entity(map: &BTreeMap<String, u64>) -> Option<(&str, u64)> {
    map.iter().fold(None, |best, (name, &count)| match best {
        Some((_, top)) if top >= count => best,
        _ => Some((name.as_str(), count)),
    })
}

/// Reduce the events inside `(window_end - window_seconds, window_end]`
///
/// Events outside the window are ignored. The result always satisfies
/// [`Aggregate::validate`].
#[must_use]
pub fn aggregate(
    events: &[PaymentEvent],
    window_end: DateTime<Utc>,
    window_seconds: u64,
) -> Aggregate {
    let window_start = i64::try_from(window_seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|span| window_end.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let mut agg = Aggregate::empty(window_end, window_seconds);
    let mut latency_sum: u128 = 0;

    for event in events
        .iter()
        .filter(|e| e.timestamp > window_start && e.timestamp <= window_end)
    {
        agg.total_count += 1;
        latency_sum += u128::from(event.latency_ms);
        *agg.error_code_distribution.entry(event.status).or_insert(0) += 1;

        if event.is_success() {
            agg.success_count += 1;
        } else {
            agg.failure_count += 1;
            *agg.failures_by_bank.entry(event.bank.clone()).or_insert(0) += 1;
            *agg.failures_by_issuer.entry(event.issuer.clone()).or_insert(0) += 1;
            *agg.failures_by_method.entry(event.method.clone()).or_insert(0) += 1;
        }
    }

    if agg.total_count > 0 {
        let total = agg.total_count as f64;
        agg.success_rate = Some(agg.success_count as f64 / total);
        agg.average_latency_ms = Some(latency_sum as f64 / total);
    }

    agg
}
