use super::{LessonSeq, LessonStore};
use crate::error::StoreError;
use parking_lot::Mutex;
use payops_core::Lesson;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// `prev_hash` of the first entry
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Lessons kept in memory by [`JsonlLessonStore::open`]
pub const DEFAULT_TAIL_CAPACITY: usize = 64;

/// One line of the lesson log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log, starting at 1
    pub seq: u64,
    /// Hash of the previous entry
    pub prev_hash: String,
    /// sha256(seq || prev_hash || lesson json), hex
    pub hash: String,
    /// Stored lesson
    pub lesson: Lesson,
}

impl LogEntry {
    fn seal(seq: u64, prev_hash: String, lesson: Lesson) -> Result<Self, StoreError> {
        let hash = compute_hash(seq, &prev_hash, &lesson)?;
        Ok(Self {
            seq,
            prev_hash,
            hash,
            lesson,
        })
    }
}

fn compute_hash(seq: u64, prev_hash: &str, lesson: &Lesson) -> Result<String, StoreError> {
    let mut hasher = Sha256::new();
    hasher.update(seq.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update([0]);
    hasher.update(serde_json::to_vec(lesson)?);
    Ok(hex::encode(hasher.finalize()))
}

/// Chain head plus the newest lessons; the file holds the rest
#[derive(Debug)]
struct ChainState {
    head: String,
    count: u64,
    /// Length of the file up to the last intact entry
    intact_len: u64,
    tail: VecDeque<Lesson>,
    capacity: usize,
}

impl ChainState {
    fn remember(&mut self, lesson: Lesson) {
        if self.tail.len() == self.capacity {
            self.tail.pop_front();
        }
        self.tail.push_back(lesson);
    }
}

/// Append-only JSON-lines lesson log with a sha256 hash chain
///
/// Opening replays and verifies the whole file; a broken chain refuses to
/// open rather than feeding tampered lessons back into diagnosis. An
/// unterminated, unparseable final line is a write torn by a crash and is cut
/// off on open.
///
/// Only the newest `capacity` lessons stay in memory, so
/// [`LessonStore::recent`] returns at most that many.
#[derive(Debug)]
pub struct JsonlLessonStore {
    path: PathBuf,
    state: Mutex<ChainState>,
}

impl JsonlLessonStore {
    /// Open (or create) the log at `path` and verify its chain
    ///
    /// # Errors
    /// - [`StoreError::Io`] if the file cannot be created, read or repaired
    /// - [`StoreError::Serialization`] if a complete line is not a log entry
    /// - [`StoreError::IntegrityViolation`] if the chain is broken
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_capacity(path, DEFAULT_TAIL_CAPACITY)
    }

    /// Like [`JsonlLessonStore::open`], keeping `capacity` lessons in memory
    ///
    /// # Errors
    /// Same as [`JsonlLessonStore::open`]
    pub fn open_with_capacity(path: impl AsRef<Path>, capacity: usize) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| io_error(&path, source))?;

        let scan = scan_log(&path)?;
        let head = verify_chain(&scan.entries)?;
        let mut intact_len = scan.intact_len;
        if let Some(err) = &scan.torn {
            tracing::warn!(
                path = %path.display(),
                kept = scan.entries.len(),
                error = %err,
                "dropping torn final line of lesson log"
            );
            file.set_len(intact_len)
                .map_err(|source| io_error(&path, source))?;
        } else if !scan.terminated {
            file.write_all(b"\n")
                .map_err(|source| io_error(&path, source))?;
            intact_len += 1;
        }

        let capacity = capacity.max(1);
        let count = scan.entries.len() as u64;
        let skip = scan.entries.len().saturating_sub(capacity);
        let tail = scan.entries.into_iter().skip(skip).map(|e| e.lesson).collect();
        tracing::debug!(path = %path.display(), entries = count, "lesson log opened");

        Ok(Self {
            path,
            state: Mutex::new(ChainState {
                head,
                count,
                intact_len,
                tail,
                capacity,
            }),
        })
    }

    /// Log file path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file and re-check every link of the chain
    ///
    /// # Errors
    /// Same as [`JsonlLessonStore::open`]
    pub fn verify_integrity(&self) -> Result<usize, StoreError> {
        let _guard = self.state.lock();
        verify_file(&self.path)
    }
}

/// Verify a lesson log without opening a store; returns the entry count
///
/// A torn final line is reported in the log but not counted and not removed.
///
/// # Errors
/// Same as [`JsonlLessonStore::open`], except that a missing file is an
/// [`StoreError::Io`] error
pub fn verify_file(path: impl AsRef<Path>) -> Result<usize, StoreError> {
    let path = path.as_ref();
    let scan = scan_log(path)?;
    verify_chain(&scan.entries)?;
    if let Some(err) = &scan.torn {
        tracing::warn!(path = %path.display(), error = %err, "lesson log ends in a torn line");
    }
    Ok(scan.entries.len())
}

impl LessonStore for JsonlLessonStore {
    fn append(&self, lesson: Lesson) -> Result<LessonSeq, StoreError> {
        let mut state = self.state.lock();
        let seq = state.count + 1;
        let entry = LogEntry::seal(seq, state.head.clone(), lesson)?;
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|source| io_error(&self.path, source))?;
        let len = file
            .metadata()
            .map_err(|source| io_error(&self.path, source))?
            .len();
        if len > state.intact_len {
            tracing::warn!(
                path = %self.path.display(),
                stray_bytes = len - state.intact_len,
                "discarding partial write left by an earlier append"
            );
            file.set_len(state.intact_len)
                .map_err(|source| io_error(&self.path, source))?;
        }

        if let Err(source) = file
            .write_all(line.as_bytes())
            .and_then(|()| file.flush())
        {
            if let Err(rollback) = file.set_len(state.intact_len) {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %rollback,
                    "partial lesson write not rolled back; next append retries"
                );
            }
            return Err(io_error(&self.path, source));
        }

        state.intact_len += line.len() as u64;
        state.head = entry.hash;
        state.count = seq;
        state.remember(entry.lesson);
        Ok(LessonSeq(seq))
    }

    fn recent(&self, n: usize) -> Result<Vec<Lesson>, StoreError> {
        let state = self.state.lock();
        let skip = state.tail.len().saturating_sub(n);
        Ok(state.tail.iter().skip(skip).cloned().collect())
    }

    fn len(&self) -> usize {
        usize::try_from(self.state.lock().count).unwrap_or(usize::MAX)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Parsed log plus where its intact prefix ends
struct LogScan {
    entries: Vec<LogEntry>,
    intact_len: u64,
    /// Whether the intact prefix ends with a newline (or is empty)
    terminated: bool,
    /// Parse error of an unterminated final line
    torn: Option<serde_json::Error>,
}

fn scan_log(path: &Path) -> Result<LogScan, StoreError> {
    let bytes = fs::read(path).map_err(|source| io_error(path, source))?;
    let mut entries = Vec::new();
    let mut offset = 0u64;
    for line in bytes.split_inclusive(|b| *b == b'\n') {
        let start = offset;
        offset += line.len() as u64;
        let body = line.strip_suffix(b"\n");
        let complete = body.is_some();
        let body = body.unwrap_or(line);
        if body.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<LogEntry>(body) {
            Ok(entry) => entries.push(entry),
            Err(err) if !complete => {
                return Ok(LogScan {
                    entries,
                    intact_len: start,
                    terminated: true,
                    torn: Some(err),
                });
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(LogScan {
        entries,
        intact_len: offset,
        terminated: bytes.last().map_or(true, |b| *b == b'\n'),
        torn: None,
    })
}

/// Check sequence, links and hashes; returns the head hash
fn verify_chain(entries: &[LogEntry]) -> Result<String, StoreError> {
    let mut prev = GENESIS_HASH.to_string();
    for (index, entry) in entries.iter().enumerate() {
        let expected_seq = index as u64 + 1;
        if entry.seq != expected_seq {
            return Err(StoreError::IntegrityViolation {
                seq: entry.seq,
                reason: format!("expected seq {expected_seq}"),
            });
        }
        if entry.prev_hash != prev {
            return Err(StoreError::IntegrityViolation {
                seq: entry.seq,
                reason: "prev_hash does not link to the previous entry".to_string(),
            });
        }
        if compute_hash(entry.seq, &entry.prev_hash, &entry.lesson)? != entry.hash {
            return Err(StoreError::IntegrityViolation {
                seq: entry.seq,
                reason: "hash does not match contents".to_string(),
            });
        }
        prev.clone_from(&entry.hash);
    }
    Ok(prev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use payops_core::{Decision, Diagnosis, LessonOutcome, ProposedAction, RuleId};

    fn lesson(cycle: u64, outcome: LessonOutcome) -> Lesson {
        let decision = Decision {
            diagnosis: Diagnosis::BankIssuerDegradation,
            evidence: vec!["SBI: 45/45 failures (100%)".into()],
            proposed_action: ProposedAction::Suppress,
            risk_assessment: "medium".into(),
            confidence_score: 0.85,
            rule: RuleId::Concentration,
            target: None,
        };
        Lesson::record(cycle, &decision, outcome, Utc::now()).with_metadata("target", "bank SBI")
    }

    #[test]
    fn reopen_replays_lessons_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lessons.jsonl");
        {
            let store = JsonlLessonStore::open(&path).unwrap();
            for cycle in 1..=4 {
                store.append(lesson(cycle, LessonOutcome::Executed)).unwrap();
            }
        }

        let store = JsonlLessonStore::open(&path).unwrap();
        assert_eq!(store.len(), 4);
        let cycles: Vec<u64> = store.recent(2).unwrap().iter().map(|l| l.cycle).collect();
        assert_eq!(cycles, vec![3, 4]);
        assert_eq!(store.append(lesson(5, LessonOutcome::Escalated)).unwrap(), LessonSeq(5));
        assert_eq!(store.verify_integrity().unwrap(), 5);
    }

    #[test]
    fn first_entry_links_to_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lessons.jsonl");
        let store = JsonlLessonStore::open(&path).unwrap();
        store.append(lesson(1, LessonOutcome::Monitored)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let entry: LogEntry = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(entry.seq, 1);
        assert_eq!(entry.prev_hash, GENESIS_HASH);
        assert_eq!(entry.hash.len(), 64);
    }

    #[test]
    fn tampered_lesson_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lessons.jsonl");
        {
            let store = JsonlLessonStore::open(&path).unwrap();
            store.append(lesson(1, LessonOutcome::Executed)).unwrap();
            store.append(lesson(2, LessonOutcome::Escalated)).unwrap();
            store.append(lesson(3, LessonOutcome::Executed)).unwrap();
        }

        let text = std::fs::read_to_string(&path).unwrap();
        let tampered: Vec<String> = text
            .lines()
            .enumerate()
            .map(|(i, line)| {
                if i == 1 {
                    line.replace("ESCALATED", "EXECUTED")
                } else {
                    line.to_string()
                }
            })
            .collect();
        std::fs::write(&path, tampered.join("\n")).unwrap();

        match JsonlLessonStore::open(&path) {
            Err(StoreError::IntegrityViolation { seq, .. }) => assert_eq!(seq, 2),
            other => panic!("expected integrity violation, got {other:?}"),
        }
        assert!(verify_file(&path).is_err());
    }

    #[test]
    fn dropped_line_breaks_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lessons.jsonl");
        {
            let store = JsonlLessonStore::open(&path).unwrap();
            for cycle in 1..=3 {
                store.append(lesson(cycle, LessonOutcome::Executed)).unwrap();
            }
        }
        let text = std::fs::read_to_string(&path).unwrap();
        let kept: Vec<&str> = text.lines().filter(|l| !l.contains("\"seq\":2")).collect();
        std::fs::write(&path, kept.join("\n")).unwrap();

        assert!(matches!(
            verify_file(&path),
            Err(StoreError::IntegrityViolation { seq: 3, .. })
        ));
    }

    #[test]
    fn garbage_line_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lessons.jsonl");
        std::fs::write(&path, "not json\n").unwrap();
        assert!(matches!(
            JsonlLessonStore::open(&path),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn memory_keeps_only_the_newest_lessons() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lessons.jsonl");
        let store = JsonlLessonStore::open_with_capacity(&path, 3).unwrap();
        for cycle in 1..=50 {
            store.append(lesson(cycle, LessonOutcome::Monitored)).unwrap();
        }

        assert_eq!(store.len(), 50);
        assert_eq!(store.state.lock().tail.len(), 3);
        let cycles: Vec<u64> = store.recent(10).unwrap().iter().map(|l| l.cycle).collect();
        assert_eq!(cycles, vec![48, 49, 50]);

        let reopened = JsonlLessonStore::open_with_capacity(&path, 3).unwrap();
        assert_eq!(reopened.len(), 50);
        assert_eq!(reopened.state.lock().tail.len(), 3);
        assert_eq!(reopened.append(lesson(51, LessonOutcome::Executed)).unwrap(), LessonSeq(51));
    }

    #[test]
    fn stray_bytes_from_a_failed_append_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lessons.jsonl");
        let store = JsonlLessonStore::open(&path).unwrap();
        store.append(lesson(1, LessonOutcome::Executed)).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"seq\":2,\"prev_ha").unwrap();

        assert_eq!(store.append(lesson(2, LessonOutcome::Executed)).unwrap(), LessonSeq(2));
        assert_eq!(verify_file(&path).unwrap(), 2);
    }

    #[test]
    fn unterminated_final_entry_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lessons.jsonl");
        {
            let store = JsonlLessonStore::open(&path).unwrap();
            store.append(lesson(1, LessonOutcome::Executed)).unwrap();
        }
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.trim_end()).unwrap();

        let store = JsonlLessonStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        store.append(lesson(2, LessonOutcome::Escalated)).unwrap();
        assert_eq!(store.verify_integrity().unwrap(), 2);
    }

    #[test]
    fn missing_file_cannot_be_verified() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            verify_file(dir.path().join("absent.jsonl")),
            Err(StoreError::Io { .. })
        ));
    }
}
