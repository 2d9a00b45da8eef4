use payops_agent::history::{verify_file, LogEntry, GENESIS_HASH};
use payops_agent::{JsonlLessonStore, LessonSeq, LessonStore, MemoryLessonStore, StoreError};
use payops_core::{Lesson, LessonOutcome};
use payops_test_utils::{low_confidence_suppress, window_end};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::fs;

const OUTCOMES: [LessonOutcome; 4] = [
    LessonOutcome::Executed,
    LessonOutcome::Escalated,
    LessonOutcome::Monitored,
    LessonOutcome::DispatchFailed,
];

fn lesson(cycle: u64, outcome: LessonOutcome) -> Lesson {
    Lesson::record(cycle, &low_confidence_suppress(0.7), outcome, window_end())
}

fn cycles(lessons: &[Lesson]) -> Vec<u64> {
    lessons.iter().map(|l| l.cycle).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_jsonl_log_is_append_only(
        outcomes in proptest::collection::vec(0..OUTCOMES.len(), 1..20),
        window in 0..25usize
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lessons.jsonl");
        let store = JsonlLessonStore::open(&path).unwrap();

        for (i, o) in outcomes.iter().enumerate() {
            let seq = store.append(lesson(i as u64 + 1, OUTCOMES[*o])).unwrap();
            prop_assert_eq!(seq, LessonSeq(i as u64 + 1));
        }

        let n = outcomes.len() as u64;
        let expected: Vec<u64> = (n.saturating_sub(window as u64) + 1..=n).collect();
        prop_assert_eq!(cycles(&store.recent(window).unwrap()), expected);
        prop_assert_eq!(verify_file(&path).unwrap(), outcomes.len());
    }

    #[test]
    fn prop_memory_and_jsonl_agree(
        outcomes in proptest::collection::vec(0..OUTCOMES.len(), 0..15),
        window in 0..20usize
    ) {
        let dir = tempfile::tempdir().unwrap();
        let jsonl = JsonlLessonStore::open(dir.path().join("lessons.jsonl")).unwrap();
        let memory = MemoryLessonStore::new();

        for (i, o) in outcomes.iter().enumerate() {
            let entry = lesson(i as u64 + 1, OUTCOMES[*o]);
            jsonl.append(entry.clone()).unwrap();
            memory.append(entry).unwrap();
        }

        prop_assert_eq!(jsonl.recent(window).unwrap(), memory.recent(window).unwrap());
        prop_assert_eq!(jsonl.len(), memory.len());
    }
}

#[test]
fn test_log_lines_chain_from_genesis() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lessons.jsonl");
    let store = JsonlLessonStore::open(&path).unwrap();
    store.append(lesson(1, LessonOutcome::Executed)).unwrap();
    store.append(lesson(2, LessonOutcome::Escalated)).unwrap();

    let entries: Vec<LogEntry> = fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].seq, 1);
    assert_eq!(entries[0].prev_hash, GENESIS_HASH);
    assert_eq!(entries[1].prev_hash, entries[0].hash);
    assert_eq!(entries[1].lesson.outcome, LessonOutcome::Escalated);
}

#[test]
fn test_rewritten_outcome_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lessons.jsonl");
    {
        let store = JsonlLessonStore::open(&path).unwrap();
        store.append(lesson(1, LessonOutcome::Escalated)).unwrap();
    }

    let text = fs::read_to_string(&path).unwrap();
    fs::write(&path, text.replace("ESCALATED", "EXECUTED")).unwrap();

    assert!(matches!(
        JsonlLessonStore::open(&path),
        Err(StoreError::IntegrityViolation { seq: 1, .. })
    ));
    assert!(verify_file(&path).is_err());
}

#[test]
fn test_torn_final_line_is_cut_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lessons.jsonl");
    {
        let store = JsonlLessonStore::open(&path).unwrap();
        for cycle in 1..=3 {
            store.append(lesson(cycle, LessonOutcome::Executed)).unwrap();
        }
    }
    let intact = fs::read_to_string(&path).unwrap();
    fs::write(&path, format!("{intact}{{\"seq\":4,\"prev_hash\":\"ab")).unwrap();

    // Read-only check reports the intact entries and leaves the file alone
    assert_eq!(verify_file(&path).unwrap(), 3);

    let store = JsonlLessonStore::open(&path).unwrap();
    assert_eq!(store.len(), 3);
    assert_eq!(cycles(&store.recent(5).unwrap()), vec![1, 2, 3]);
    assert_eq!(fs::read_to_string(&path).unwrap(), intact);

    assert_eq!(
        store.append(lesson(4, LessonOutcome::Escalated)).unwrap(),
        LessonSeq(4)
    );
    assert_eq!(verify_file(&path).unwrap(), 4);
}

#[test]
fn test_garbage_before_the_last_line_still_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lessons.jsonl");
    {
        let store = JsonlLessonStore::open(&path).unwrap();
        store.append(lesson(1, LessonOutcome::Executed)).unwrap();
        store.append(lesson(2, LessonOutcome::Executed)).unwrap();
    }
    let text = fs::read_to_string(&path).unwrap();
    let mut lines: Vec<&str> = text.lines().collect();
    lines.insert(1, "{\"seq\":2,\"prev_ha");
    fs::write(&path, lines.join("\n")).unwrap();

    assert!(matches!(
        JsonlLessonStore::open(&path),
        Err(StoreError::Serialization(_))
    ));
}
