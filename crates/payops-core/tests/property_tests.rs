use chrono::Duration;
use payops_core::{
    aggregate, diagnose, Decision, Disposition, ErrorCode, Guardrail, GuardrailConfig, Lesson,
    LessonOutcome, PaymentEvent, ProposedAction, VolumeBreachPolicy, RULES,
};
use payops_test_utils::{low_confidence_suppress, window_end};
use proptest::prelude::*;

const BANKS: [&str; 4] = ["SBI", "HDFC", "ICICI", "AXIS"];
const ISSUERS: [&str; 3] = ["VISA", "MASTERCARD", "RUPAY"];
const OUTCOMES: [LessonOutcome; 6] = [
    LessonOutcome::Executed,
    LessonOutcome::Escalated,
    LessonOutcome::SkippedSafety,
    LessonOutcome::Monitored,
    LessonOutcome::DispatchFailed,
    LessonOutcome::Degraded,
];

fn event_strategy() -> impl Strategy<Value = PaymentEvent> {
    (0..BANKS.len(), 0..ISSUERS.len(), 0..ErrorCode::ALL.len(), 0..3_000u32, -90..5i64).prop_map(
        |(bank, issuer, code, latency, offset)| {
            PaymentEvent::new(
                BANKS[bank],
                ISSUERS[issuer],
                "CARD",
                ErrorCode::ALL[code],
                latency,
                window_end() + Duration::seconds(offset),
            )
        },
    )
}

fn lessons_for(decision: &Decision, outcomes: &[usize]) -> Vec<Lesson> {
    outcomes
        .iter()
        .enumerate()
        .map(|(i, o)| Lesson::record(i as u64 + 1, decision, OUTCOMES[*o], window_end()))
        .collect()
}

proptest! {
    #[test]
    fn prop_aggregate_always_reconciles(
        events in proptest::collection::vec(event_strategy(), 0..200)
    ) {
        let window = aggregate(&events, window_end(), 60);

        // Invariant: whatever goes in, the aggregate is internally consistent
        prop_assert!(window.validate().is_ok());
        prop_assert_eq!(window.success_count + window.failure_count, window.total_count);
        prop_assert_eq!(window.success_rate.is_none(), window.total_count == 0);
    }

    #[test]
    fn prop_diagnosis_is_deterministic(
        events in proptest::collection::vec(event_strategy(), 0..200),
        outcomes in proptest::collection::vec(0..OUTCOMES.len(), 0..10)
    ) {
        let window = aggregate(&events, window_end(), 60);
        let seed = diagnose(&window, &[]);
        let lessons = lessons_for(&seed, &outcomes);

        prop_assert_eq!(diagnose(&window, &lessons), diagnose(&window, &lessons));
    }

    #[test]
    fn prop_confidence_stays_in_unit_interval(
        events in proptest::collection::vec(event_strategy(), 0..200),
        outcomes in proptest::collection::vec(0..OUTCOMES.len(), 0..10)
    ) {
        let window = aggregate(&events, window_end(), 60);
        let seed = diagnose(&window, &[]);
        let decision = diagnose(&window, &lessons_for(&seed, &outcomes));

        prop_assert!((0.0..=1.0).contains(&decision.confidence_score));
        prop_assert!(!decision.evidence.is_empty());
        // Feedback never changes what was diagnosed
        prop_assert_eq!(decision.diagnosis, seed.diagnosis);
        prop_assert_eq!(decision.proposed_action, seed.proposed_action);
    }

    #[test]
    fn prop_first_matching_rule_wins(
        events in proptest::collection::vec(event_strategy(), 0..200)
    ) {
        let window = aggregate(&events, window_end(), 60);
        let thresholds = payops_core::RuleThresholds::default();
        let first = RULES
            .iter()
            .find_map(|rule| (rule.evaluate)(&window, &thresholds));

        prop_assert_eq!(first, Some(diagnose(&window, &[])));
    }

    #[test]
    fn prop_guardrail_is_total(
        confidence in prop_oneof![Just(f64::NAN), -1.0..2.0f64],
        volume in 0..20_000u64,
        threshold in 0.0..1.0f64,
        max_volume in 0..10_000u64,
        skip in any::<bool>(),
        no_action in any::<bool>()
    ) {
        let guardrail = Guardrail::new(GuardrailConfig {
            confidence_threshold: threshold,
            max_autonomous_volume: max_volume,
            volume_breach: if skip { VolumeBreachPolicy::Skip } else { VolumeBreachPolicy::Escalate },
        });
        let mut decision = low_confidence_suppress(confidence);
        if no_action {
            decision.proposed_action = ProposedAction::NoAction;
        }

        let disposition = guardrail.evaluate(&decision, volume);
        match disposition {
            Disposition::Monitor => prop_assert!(no_action),
            Disposition::Execute => {
                prop_assert!(!no_action);
                prop_assert!(confidence >= threshold);
                prop_assert!(volume <= max_volume);
            }
            Disposition::Skip => prop_assert!(skip && volume > max_volume),
            Disposition::Escalate => prop_assert!(!no_action),
        }
    }
}
