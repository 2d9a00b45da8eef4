use payops_core::{
    diagnose, ActionTarget, AgentConfig, Dimension, Diagnosis, DiagnosisEngine, Disposition,
    ErrorCode, GuardReason, Guardrail, GuardrailConfig, Lesson, LessonOutcome, ProposedAction,
    RuleId, VolumeBreachPolicy,
};
use payops_test_utils::{
    healthy_window, low_confidence_suppress, sbi_outage_window, tiny_window, window_end,
    EventBatch,
};
use pretty_assertions::assert_eq;

#[test]
fn test_healthy_window_is_normal_variance() {
    let window = healthy_window().aggregate();
    let decision = diagnose(&window, &[]);

    assert_eq!(decision.diagnosis, Diagnosis::NormalVariance);
    assert_eq!(decision.proposed_action, ProposedAction::NoAction);
    assert_eq!(decision.confidence_score, 0.85);
    assert_eq!(
        decision.evidence,
        vec!["success rate 96.0% with 2 failures in 50 transactions".to_string()]
    );
    assert_eq!(
        Guardrail::default().evaluate(&decision, window.total_count),
        Disposition::Monitor
    );
}

#[test]
fn test_sbi_outage_suppresses_sbi() {
    let window = sbi_outage_window().aggregate();
    let decision = diagnose(&window, &[]);

    assert_eq!(decision.diagnosis, Diagnosis::BankIssuerDegradation);
    assert_eq!(decision.proposed_action, ProposedAction::Suppress);
    assert_eq!(decision.rule, RuleId::Concentration);
    assert_eq!(decision.confidence_score, 0.85);
    assert_eq!(
        decision.target,
        Some(ActionTarget::new(Dimension::Bank, "SBI"))
    );
    assert_eq!(decision.evidence[0], "SBI: 45/45 failures (100%)");
    assert!(decision
        .evidence
        .contains(&"ISSUER_DOWN 45/45 failures (100%)".to_string()));

    let assessment = Guardrail::default().assess(&decision, window.total_count);
    assert_eq!(assessment.disposition, Disposition::Execute);
    assert_eq!(assessment.reason, GuardReason::Cleared);
}

#[test]
fn test_low_confidence_escalates_with_approval() {
    let guardrail = Guardrail::default();
    let decision = low_confidence_suppress(0.70);

    let assessment = guardrail.assess(&decision, 50);
    assert_eq!(assessment.disposition, Disposition::Escalate);
    assert_eq!(assessment.reason, GuardReason::LowConfidence);
    assert!(guardrail.requires_approval(&decision));
}

#[test]
fn test_tiny_window_is_insufficient_sample() {
    let window = tiny_window().aggregate();
    let decision = diagnose(&window, &[]);

    assert_eq!(decision.diagnosis, Diagnosis::InsufficientSample);
    assert_eq!(decision.proposed_action, ProposedAction::NoAction);
    assert_eq!(decision.confidence_score, 0.4);
    assert_eq!(
        decision.evidence,
        vec!["sample size 3 below minimum 10".to_string()]
    );
    assert_eq!(
        Guardrail::default().evaluate(&decision, window.total_count),
        Disposition::Monitor
    );
}

#[test]
fn test_user_declines_take_precedence_over_concentration() {
    // Every failure on one bank, but payers declined them
    let window = EventBatch::new()
        .successes(20)
        .failures(10, ErrorCode::UserDeclined, "SBI", "VISA")
        .aggregate();
    let decision = diagnose(&window, &[]);

    assert_eq!(decision.diagnosis, Diagnosis::UserRelated);
    assert_eq!(decision.proposed_action, ProposedAction::NoAction);
    assert_eq!(decision.confidence_score, 0.82);
}

#[test]
fn test_network_errors_alert_ops() {
    let window = EventBatch::new()
        .successes(30)
        .failures(4, ErrorCode::NetworkError, "HDFC", "VISA")
        .failures(3, ErrorCode::NetworkError, "ICICI", "MASTERCARD")
        .failures(3, ErrorCode::NetworkError, "AXIS", "RUPAY")
        .aggregate();
    let decision = diagnose(&window, &[]);

    assert_eq!(decision.diagnosis, Diagnosis::NetworkOrSystemFailure);
    assert_eq!(decision.proposed_action, ProposedAction::AlertOps);
    assert_eq!(decision.rule, RuleId::NetworkFailure);
}

#[test]
fn test_slow_failing_window_is_misconfiguration() {
    let window = EventBatch::new()
        .latency(1600)
        .successes(20)
        .failures(1, ErrorCode::BankTimeout, "HDFC", "VISA")
        .failures(1, ErrorCode::IssuerDown, "ICICI", "MASTERCARD")
        .failures(1, ErrorCode::UserDeclined, "AXIS", "RUPAY")
        .failures(1, ErrorCode::NetworkError, "KOTAK", "AMEX")
        .aggregate();
    let decision = diagnose(&window, &[]);

    assert_eq!(
        decision.diagnosis,
        Diagnosis::RetryOrRoutingMisconfiguration
    );
    assert_eq!(decision.proposed_action, ProposedAction::AlertOps);
    assert_eq!(decision.confidence_score, 0.68);
}

#[test]
fn test_lessons_shift_confidence_across_threshold() {
    let window = sbi_outage_window().aggregate();
    let engine = DiagnosisEngine::from_config(&AgentConfig::new());
    let first = engine.diagnose(&window, &[]);

    let escalated: Vec<Lesson> = (1..=3)
        .map(|cycle| Lesson::record(cycle, &first, LessonOutcome::Escalated, window_end()))
        .collect();
    let nudged = engine.diagnose(&window, &escalated);

    assert_eq!(nudged.proposed_action, first.proposed_action);
    assert_eq!(nudged.diagnosis, first.diagnosis);
    assert_eq!(nudged.confidence_score, 0.8);
    assert_eq!(
        Guardrail::default().evaluate(&nudged, window.total_count),
        Disposition::Execute
    );

    // A failed dispatch weighs like an escalation
    let mut with_failure = escalated;
    with_failure.push(Lesson::record(
        4,
        &first,
        LessonOutcome::DispatchFailed,
        window_end(),
    ));
    assert_eq!(engine.diagnose(&window, &with_failure).confidence_score, 0.8);
}

#[test]
fn test_unrelated_lessons_are_ignored() {
    let window = sbi_outage_window().aggregate();
    let other = low_confidence_suppress(0.7);
    let mut lesson = Lesson::record(1, &other, LessonOutcome::Escalated, window_end());
    lesson.proposed_action = ProposedAction::Reroute;

    let decision = diagnose(&window, &[lesson]);
    assert_eq!(decision.confidence_score, 0.85);
}

#[test]
fn test_volume_breach_policy() {
    let decision = low_confidence_suppress(0.9);
    let escalate = Guardrail::new(GuardrailConfig {
        max_autonomous_volume: 100,
        ..GuardrailConfig::default()
    });
    let skip = Guardrail::new(GuardrailConfig {
        max_autonomous_volume: 100,
        volume_breach: VolumeBreachPolicy::Skip,
        ..GuardrailConfig::default()
    });

    assert_eq!(escalate.evaluate(&decision, 100), Disposition::Execute);
    assert_eq!(escalate.evaluate(&decision, 101), Disposition::Escalate);
    assert_eq!(skip.evaluate(&decision, 101), Disposition::Skip);
    assert_eq!(
        skip.assess(&decision, 101).reason,
        GuardReason::VolumeLimit
    );
}
