//! Signal sources
//!
//! A [`SignalSource`] hands the control loop one window of traffic per tick,
//! either as raw events (aggregated by the loop) or as a ready-made snapshot.
//! [`SyntheticSource`] generates seeded demo traffic with a degrading bank.

use crate::error::SourceError;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use payops_core::{Aggregate, ErrorCode, PaymentEvent, SourceConfig};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

/// Banks the synthetic source routes through
pub const BANKS: [&str; 5] = ["HDFC", "ICICI", "SBI", "AXIS", "KOTAK"];
/// Card issuers
pub const ISSUERS: [&str; 3] = ["VISA", "MASTERCARD", "RUPAY"];
/// Payment methods
pub const METHODS: [&str; 3] = ["CARD", "UPI", "NETBANKING"];

const BANK_TIMEOUT_RATE: f64 = 0.08;
const NETWORK_ERROR_RATE: f64 = 0.05;
const USER_DECLINED_RATE: f64 = 0.04;
const LATENCY_MS: std::ops::RangeInclusive<u32> = 80..=2500;

/// One window of traffic
#[derive(Debug, Clone, PartialEq)]
pub enum SignalWindow {
    /// Raw events; the loop aggregates them
    Events(Vec<PaymentEvent>),
    /// Pre-aggregated snapshot; validated before use
    Snapshot(Aggregate),
}

/// Supplier of traffic windows
#[async_trait::async_trait]
pub trait SignalSource: Send + Sync {
    /// Window ending at `now`
    async fn next_window(&self, now: DateTime<Utc>) -> Result<SignalWindow, SourceError>;
}

/// Seeded synthetic traffic with one degrading bank
///
/// Each call generates `events_per_tick` new events stamped `now`, appends
/// them to an owned buffer and drops everything that has aged out of the
/// aggregation window.
#[derive(Debug)]
pub struct SyntheticSource {
    config: SourceConfig,
    window: Duration,
    state: Mutex<SyntheticState>,
}

#[derive(Debug)]
struct SyntheticState {
    rng: StdRng,
    buffer: VecDeque<PaymentEvent>,
}

impl SyntheticSource {
    /// Create source; an unset seed draws one from the OS
    ///
    /// `degradation_rate` is clamped to `[0, 1]`; NaN means no degradation.
    #[must_use]
    pub fn new(mut config: SourceConfig, window_secs: u64) -> Self {
        config.degradation_rate = if config.degradation_rate.is_nan() {
            0.0
        } else {
            config.degradation_rate.clamp(0.0, 1.0)
        };
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let window = i64::try_from(window_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        Self {
            config,
            window,
            state: Mutex::new(SyntheticState {
                rng,
                buffer: VecDeque::new(),
            }),
        }
    }

    /// Events currently held
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.state.lock().buffer.len()
    }

    fn generate(&self, rng: &mut StdRng, now: DateTime<Utc>) -> PaymentEvent {
        let bank = BANKS.choose(rng).copied().unwrap_or(BANKS[0]);
        let issuer = ISSUERS.choose(rng).copied().unwrap_or(ISSUERS[0]);
        let method = METHODS.choose(rng).copied().unwrap_or(METHODS[0]);

        let status = if bank == self.config.degraded_bank
            && rng.gen_bool(self.config.degradation_rate)
        {
            ErrorCode::IssuerDown
        } else if rng.gen_bool(BANK_TIMEOUT_RATE) {
            ErrorCode::BankTimeout
        } else if rng.gen_bool(NETWORK_ERROR_RATE) {
            ErrorCode::NetworkError
        } else if rng.gen_bool(USER_DECLINED_RATE) {
            ErrorCode::UserDeclined
        } else {
            ErrorCode::Success
        };

        PaymentEvent::new(
            bank,
            issuer,
            method,
            status,
            rng.gen_range(LATENCY_MS),
            now,
        )
    }
}

#[async_trait::async_trait]
impl SignalSource for SyntheticSource {
    async fn next_window(&self, now: DateTime<Utc>) -> Result<SignalWindow, SourceError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for _ in 0..self.config.events_per_tick {
            let event = self.generate(&mut state.rng, now);
            state.buffer.push_back(event);
        }

        let cutoff = now.checked_sub_signed(self.window);
        while let (Some(front), Some(cutoff)) = (state.buffer.front(), cutoff) {
            if front.timestamp > cutoff {
                break;
            }
            state.buffer.pop_front();
        }

        tracing::trace!(buffered = state.buffer.len(), "synthetic window generated");
        Ok(SignalWindow::Events(state.buffer.iter().cloned().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config(seed: u64) -> SourceConfig {
        SourceConfig {
            seed: Some(seed),
            ..SourceConfig::default()
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    fn events(window: SignalWindow) -> Vec<PaymentEvent> {
        match window {
            SignalWindow::Events(events) => events,
            SignalWindow::Snapshot(_) => panic!("expected events"),
        }
    }

    #[tokio::test]
    async fn same_seed_same_traffic() {
        let a = SyntheticSource::new(config(7), 60);
        let b = SyntheticSource::new(config(7), 60);
        for tick in 0..5 {
            let now = at(tick * 5);
            assert_eq!(
                a.next_window(now).await.unwrap(),
                b.next_window(now).await.unwrap()
            );
        }
    }

    #[tokio::test]
    async fn buffer_is_pruned_to_window() {
        let source = SyntheticSource::new(config(1), 60);
        for tick in 0..30 {
            source.next_window(at(tick * 5)).await.unwrap();
        }
        // 12 ticks of 8 events fit in (t-60, t]
        assert_eq!(source.buffered(), 12 * 8);

        let window = events(source.next_window(at(150)).await.unwrap());
        assert!(window.iter().all(|e| e.timestamp > at(90)));
    }

    #[tokio::test]
    async fn events_use_known_entities() {
        let source = SyntheticSource::new(config(3), 60);
        let window = events(source.next_window(at(0)).await.unwrap());
        assert_eq!(window.len(), 8);
        for e in &window {
            assert!(BANKS.contains(&e.bank.as_str()));
            assert!(ISSUERS.contains(&e.issuer.as_str()));
            assert!(METHODS.contains(&e.method.as_str()));
            assert!(LATENCY_MS.contains(&e.latency_ms));
        }
    }

    #[tokio::test]
    async fn full_degradation_fails_every_degraded_payment() {
        let source = SyntheticSource::new(
            SourceConfig {
                seed: Some(11),
                events_per_tick: 200,
                degradation_rate: 1.0,
                ..SourceConfig::default()
            },
            60,
        );
        let window = events(source.next_window(at(0)).await.unwrap());
        assert!(window
            .iter()
            .filter(|e| e.bank == "SBI")
            .all(|e| e.status == ErrorCode::IssuerDown));
    }

    #[tokio::test]
    async fn out_of_range_degradation_rate_is_clamped() {
        let source = |rate: f64| {
            SyntheticSource::new(
                SourceConfig {
                    seed: Some(5),
                    events_per_tick: 200,
                    degradation_rate: rate,
                    ..SourceConfig::default()
                },
                60,
            )
        };

        let high = events(source(5.0).next_window(at(0)).await.unwrap());
        assert!(high
            .iter()
            .filter(|e| e.bank == "SBI")
            .all(|e| e.status == ErrorCode::IssuerDown));

        for rate in [f64::NAN, -0.5] {
            let none = events(source(rate).next_window(at(0)).await.unwrap());
            assert!(none.iter().all(|e| e.status != ErrorCode::IssuerDown));
        }
    }
}
