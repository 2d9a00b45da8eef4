//! Control loop
//!
//! One cycle: observe -> diagnose -> guard -> act -> remember -> report.
//!
//! A cycle never fails. Faults are contained where they happen:
//! - source failure or timeout: the window is treated as empty
//! - rejected snapshot: the cycle is recorded as degraded, nothing is dispatched
//! - history read failure: diagnosis runs without lessons
//! - dispatch failure or timeout: the lesson records `DispatchFailed`
//! - history write failure: the cycle proceeds without persistence
//!
//! Only an invalid configuration stops the loop, and it does so before the
//! first cycle.

use crate::dispatch::{ActionParams, DispatchOutcome, Dispatcher, PaymentOps};
use crate::error::{AgentError, SourceError};
use crate::history::LessonStore;
use crate::memory::{CycleRecord, ShortTermMemory};
use crate::source::{SignalSource, SignalWindow};
use chrono::{DateTime, Utc};
use payops_core::{
    aggregate, AgentConfig, Aggregate, CycleReport, Decision, Diagnosis, DiagnosisEngine,
    Disposition, Guardrail, InputError, Lesson, LessonOutcome, ProposedAction, RuleId,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;

/// Counters over every cycle a loop has run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopSummary {
    /// Cycles completed
    pub cycles: u64,
    /// Actions dispatched and acknowledged
    pub executed: u64,
    /// Decisions handed to a human
    pub escalated: u64,
    /// Decisions skipped by the volume guard
    pub skipped: u64,
    /// Cycles with nothing to do
    pub monitored: u64,
    /// Execute decisions whose call failed
    pub dispatch_failed: u64,
    /// Cycles whose input was rejected
    pub degraded: u64,
    /// Source failures and timeouts
    pub source_faults: u64,
    /// History read or write failures
    pub store_faults: u64,
}

impl LoopSummary {
    fn count(&mut self, outcome: LessonOutcome) {
        self.cycles += 1;
        let counter = match outcome {
            LessonOutcome::Executed => &mut self.executed,
            LessonOutcome::Escalated => &mut self.escalated,
            LessonOutcome::SkippedSafety => &mut self.skipped,
            LessonOutcome::Monitored => &mut self.monitored,
            LessonOutcome::DispatchFailed => &mut self.dispatch_failed,
            LessonOutcome::Degraded => &mut self.degraded,
        };
        *counter += 1;
    }
}

/// Window as observed by the loop
enum Observation {
    Window(Aggregate),
    Rejected(Aggregate, InputError),
}

/// Periodic observe/decide/act loop; owns all mutable cycle state
pub struct ControlLoop {
    config: AgentConfig,
    source: Arc<dyn SignalSource>,
    store: Arc<dyn LessonStore>,
    engine: DiagnosisEngine,
    guardrail: Guardrail,
    dispatcher: Dispatcher,
    memory: ShortTermMemory,
    summary: LoopSummary,
}

impl std::fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("config", &self.config)
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

impl ControlLoop {
    /// Create a loop over the given collaborators
    ///
    /// # Errors
    /// [`AgentError::Config`] if the configuration is invalid
    pub fn new(
        config: AgentConfig,
        source: Arc<dyn SignalSource>,
        store: Arc<dyn LessonStore>,
        ops: Arc<dyn PaymentOps>,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        Ok(Self {
            engine: DiagnosisEngine::from_config(&config),
            guardrail: Guardrail::new(config.guardrail.clone()),
            dispatcher: Dispatcher::new(ops, config.control.dispatch_timeout()),
            memory: ShortTermMemory::new(config.control.short_term_capacity),
            summary: LoopSummary::default(),
            config,
            source,
            store,
        })
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Short-term memory of recent cycles
    #[inline]
    #[must_use]
    pub fn memory(&self) -> &ShortTermMemory {
        &self.memory
    }

    /// Counters so far
    #[inline]
    #[must_use]
    pub fn summary(&self) -> &LoopSummary {
        &self.summary
    }

    /// Run one full cycle for the window ending at `now`
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        let cycle = self.summary.cycles + 1;
        let report = match self.observe(now).await {
            Observation::Window(window) => self.decide_and_act(cycle, now, window).await,
            Observation::Rejected(window, err) => self.degrade(cycle, now, window, &err),
        };
        self.summary.count(report.outcome);

        tracing::info!(
            cycle,
            diagnosis = %report.diagnosis,
            action = %report.proposed_action,
            confidence = report.confidence_score,
            disposition = %report.disposition,
            outcome = %report.outcome,
            volume = report.volume,
            "cycle complete"
        );
        report
    }

    /// Tick until `shutdown` resolves or `max_cycles` is reached
    pub async fn run<F>(&mut self, shutdown: F) -> LoopSummary
    where
        F: Future<Output = ()>,
    {
        self.run_with(shutdown, |_| {}).await
    }

    /// Like [`ControlLoop::run`], handing every report to `on_report`
    pub async fn run_with<F, R>(&mut self, shutdown: F, mut on_report: R) -> LoopSummary
    where
        F: Future<Output = ()>,
        R: FnMut(&CycleReport),
    {
        let mut ticker = tokio::time::interval(self.config.control.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            tick_ms = self.config.control.tick_ms,
            max_cycles = ?self.config.control.max_cycles,
            "control loop started"
        );
        loop {
            if let Some(max) = self.config.control.max_cycles {
                if self.summary.cycles >= max {
                    break;
                }
            }
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.run_cycle(Utc::now()).await;
                    on_report(&report);
                }
            }
        }
        tracing::info!(cycles = self.summary.cycles, "control loop stopped");
        self.summary.clone()
    }

    async fn observe(&mut self, now: DateTime<Utc>) -> Observation {
        let window_secs = self.config.aggregation.window_secs;
        let budget = self.config.control.source_timeout();
        let fetched = match tokio::time::timeout(budget, self.source.next_window(now)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(budget)),
        };

        match fetched {
            Ok(SignalWindow::Events(events)) => {
                Observation::Window(aggregate(&events, now, window_secs))
            }
            Ok(SignalWindow::Snapshot(snapshot)) => match snapshot.validate() {
                Ok(()) => Observation::Window(snapshot),
                Err(err) => Observation::Rejected(snapshot, err),
            },
            Err(err) => {
                self.summary.source_faults += 1;
                tracing::warn!(error = %err, "signal source failed; treating window as empty");
                Observation::Window(Aggregate::empty(now, window_secs))
            }
        }
    }

    async fn decide_and_act(
        &mut self,
        cycle: u64,
        now: DateTime<Utc>,
        window: Aggregate,
    ) -> CycleReport {
        let lessons = match self.store.recent(self.config.control.lesson_window) {
            Ok(lessons) => lessons,
            Err(err) => {
                self.summary.store_faults += 1;
                tracing::warn!(error = %err, "lesson history unavailable; diagnosing without it");
                Vec::new()
            }
        };

        let decision = self.engine.diagnose(&window, &lessons);
        let volume = window.total_count;
        let assessment = self.guardrail.assess(&decision, volume);
        let disposition = assessment.disposition;

        let (outcome, detail) = match disposition {
            Disposition::Execute => {
                let params = ActionParams::from_decision(&decision, &self.config.actions);
                match self
                    .dispatcher
                    .dispatch(decision.proposed_action, &params)
                    .await
                {
                    Ok(DispatchOutcome::Performed(ack)) => (
                        LessonOutcome::Executed,
                        ack.detail.unwrap_or_else(|| assessment.reason.to_string()),
                    ),
                    Ok(DispatchOutcome::NoCall) => {
                        (LessonOutcome::Executed, assessment.reason.to_string())
                    }
                    Err(err) => {
                        tracing::warn!(
                            cycle,
                            action = %decision.proposed_action,
                            error = %err,
                            "dispatch failed"
                        );
                        (LessonOutcome::DispatchFailed, err.to_string())
                    }
                }
            }
            Disposition::Escalate | Disposition::Skip => {
                if let Err(err) = self
                    .dispatcher
                    .notify_withheld(&decision, disposition, assessment.reason)
                    .await
                {
                    tracing::warn!(cycle, error = %err, "ops alert for withheld action failed");
                }
                (
                    LessonOutcome::from_disposition(disposition),
                    assessment.reason.to_string(),
                )
            }
            Disposition::Monitor => (LessonOutcome::Monitored, assessment.reason.to_string()),
        };

        self.conclude(cycle, now, window, decision, disposition, outcome, detail)
    }

    fn degrade(
        &mut self,
        cycle: u64,
        now: DateTime<Utc>,
        window: Aggregate,
        err: &InputError,
    ) -> CycleReport {
        tracing::warn!(cycle, error = %err, "aggregate rejected");
        let decision = Decision {
            diagnosis: Diagnosis::InsufficientSample,
            evidence: vec![format!("input rejected: {err}")],
            proposed_action: ProposedAction::NoAction,
            risk_assessment: "unknown: input could not be trusted".to_string(),
            confidence_score: 0.0,
            rule: RuleId::InsufficientSample,
            target: None,
        };
        self.conclude(
            cycle,
            now,
            window,
            decision,
            Disposition::Monitor,
            LessonOutcome::Degraded,
            err.to_string(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn conclude(
        &mut self,
        cycle: u64,
        now: DateTime<Utc>,
        window: Aggregate,
        decision: Decision,
        disposition: Disposition,
        outcome: LessonOutcome,
        detail: String,
    ) -> CycleReport {
        let mut lesson = Lesson::record(cycle, &decision, outcome, now)
            .with_metadata("rule", decision.rule.name())
            .with_metadata("disposition", disposition.to_string())
            .with_metadata("detail", detail.clone());
        if let Some(target) = &decision.target {
            lesson = lesson.with_metadata("target", target.to_string());
        }
        if let Err(err) = self.store.append(lesson) {
            self.summary.store_faults += 1;
            tracing::warn!(cycle, error = %err, "lesson not persisted");
        }

        let volume = window.total_count;
        let report = CycleReport::new(
            cycle,
            now,
            &decision,
            self.config.guardrail.confidence_threshold,
            disposition,
            outcome,
            volume,
        )
        .with_detail(detail);

        self.memory.remember(CycleRecord {
            cycle,
            aggregate: window,
            decision,
            disposition,
            outcome,
        });
        report
    }
}
