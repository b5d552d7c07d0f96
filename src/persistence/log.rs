//! Append-only car journal with crash-safe replay.
//!
//! One JSON object per line, each terminated by `\n`. A crash mid-write
//! leaves at most one unterminated final line; replay drops it and
//! truncates the file so the next append starts on a clean line.
//!
//! Critical events are fsynced as they are written. Pipeline bookkeeping
//! is not; [`EventLog::sync`] flushes it.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use super::event::{StateEvent, StateEventPayload};
use super::fsync::fsync_file;
use crate::types::MergeRequestId;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("journal record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The journal names a car the replayed state does not know about.
    #[error("journal event {seq} refers to unknown car {merge_request}")]
    UnknownCar {
        seq: u64,
        merge_request: MergeRequestId,
    },
}

pub type Result<T> = std::result::Result<T, JournalError>;

/// What [`EventLog::replay_from`] recovered.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<StateEvent>,
    /// Sequence number the next append must use.
    pub next_seq: u64,
}

/// Writer half of the journal.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    file: File,
    next_seq: u64,
}

impl EventLog {
    /// Opens the journal at `path` for appending, creating it if missing.
    ///
    /// `next_seq` comes from a prior [`EventLog::replay_from`].
    pub fn open_with_seq(path: impl AsRef<Path>, next_seq: u64) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(EventLog {
            path,
            file,
            next_seq,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::open_with_seq(path, 0)
    }

    /// Writes one record. Critical payloads are on disk when this returns.
    pub fn append(&mut self, payload: StateEventPayload) -> Result<StateEvent> {
        let event = StateEvent::new(self.next_seq, payload);

        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        if event.is_critical() {
            fsync_file(&self.file)?;
        }

        self.next_seq += 1;
        Ok(event)
    }

    pub fn sync(&self) -> io::Result<()> {
        fsync_file(&self.file)
    }

    /// Byte offset the next record will be written at.
    pub fn offset(&mut self) -> io::Result<u64> {
        self.file.seek(SeekFrom::End(0))
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every valid record at or after byte `offset`.
    ///
    /// Reading stops at the first record that is unterminated, unparseable
    /// or does not raise the sequence number. The file is cut back to the
    /// end of the last good record. A missing file replays as empty.
    pub fn replay_from(path: impl AsRef<Path>, offset: u64) -> Result<Replay> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e.into()),
        };
        let file_len = file.metadata()?.len();
        if offset >= file_len {
            return Ok(Replay::default());
        }

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(offset))?;
        let (events, valid_end) = scan(reader, offset)?;

        if valid_end < file_len {
            warn!(
                path = %path.display(),
                valid_end,
                file_len,
                "truncating torn journal tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_end)?;
            fsync_file(&file)?;
        }

        let next_seq = events.last().map_or(0, |e| e.seq + 1);
        Ok(Replay { events, next_seq })
    }
}

/// Collects records until the first bad one; returns them with the byte
/// offset just past the last good line.
fn scan(mut reader: impl BufRead, start: u64) -> io::Result<(Vec<StateEvent>, u64)> {
    let mut events: Vec<StateEvent> = Vec::new();
    let mut valid_end = start;
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line)?;
        if read == 0 || line.last() != Some(&b'\n') {
            break;
        }

        let record = line.trim_ascii();
        if !record.is_empty() {
            let Ok(event) = serde_json::from_slice::<StateEvent>(record) else {
                break;
            };
            if events.last().is_some_and(|prev| event.seq <= prev.seq) {
                break;
            }
            events.push(event);
        }
        valid_end += read as u64;
    }

    Ok((events, valid_end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::make_mr;
    use crate::types::{Car, DequeueCause, ProjectId, TrainKey, UserId};
    use proptest::prelude::*;
    use tempfile::{TempDir, tempdir};

    fn journal() -> (TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cars.jsonl");
        (dir, path)
    }

    fn merged(id: u64) -> StateEventPayload {
        StateEventPayload::CarDequeued {
            train: TrainKey::new(ProjectId(1), "main"),
            merge_request: MergeRequestId(id),
            cause: DequeueCause::Merged,
        }
    }

    fn write_journal(path: &Path, payloads: &[StateEventPayload]) {
        let mut log = EventLog::open(path).unwrap();
        for payload in payloads {
            log.append(payload.clone()).unwrap();
        }
        log.sync().unwrap();
    }

    fn append_raw(path: &Path, bytes: &[u8]) {
        OpenOptions::new()
            .append(true)
            .open(path)
            .unwrap()
            .write_all(bytes)
            .unwrap();
    }

    fn any_payload() -> impl Strategy<Value = StateEventPayload> {
        let car = |id: u64| Car::new(&make_mr(id, "main"), UserId(1));
        prop_oneof![
            (1u64..500, -20i64..20).prop_map(move |(id, position)| {
                StateEventPayload::CarEnqueued {
                    car: car(id),
                    position,
                }
            }),
            (1u64..500).prop_map(move |id| StateEventPayload::CarTransitioned { car: car(id) }),
            (1u64..500).prop_map(move |id| StateEventPayload::CarUpdated { car: car(id) }),
            (1u64..500).prop_map(merged),
        ]
    }

    #[test]
    fn sequence_numbers_continue_after_reopen() {
        let (_dir, path) = journal();
        write_journal(&path, &[merged(1), merged(2)]);

        let replay = EventLog::replay_from(&path, 0).unwrap();
        assert_eq!(replay.next_seq, 2);

        let mut log = EventLog::open_with_seq(&path, replay.next_seq).unwrap();
        assert_eq!(log.append(merged(3)).unwrap().seq, 2);
        assert_eq!(log.path(), path.as_path());
    }

    #[test]
    fn unterminated_record_is_dropped_even_if_complete() {
        let (_dir, path) = journal();
        write_journal(&path, &[merged(1)]);
        let good_len = std::fs::metadata(&path).unwrap().len();

        let mut tail = serde_json::to_vec(&StateEvent::new(1, merged(2))).unwrap();
        append_raw(&path, &tail);
        let replay = EventLog::replay_from(&path, 0).unwrap();
        assert_eq!(replay.events.len(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);

        // The next writer starts on a fresh line.
        tail.push(b'\n');
        append_raw(&path, &tail);
        assert_eq!(EventLog::replay_from(&path, 0).unwrap().events.len(), 2);
    }

    #[test]
    fn garbage_and_invalid_utf8_are_cut() {
        let (_dir, path) = journal();
        write_journal(&path, &[merged(1)]);
        append_raw(&path, b"{\"seq\":1,\"ts\":\xff\xfe\n");

        let replay = EventLog::replay_from(&path, 0).unwrap();
        assert_eq!(replay.events.len(), 1);
        assert_eq!(replay.next_seq, 1);
    }

    #[test]
    fn repeated_sequence_number_ends_replay() {
        let (_dir, path) = journal();
        write_journal(&path, &[merged(1), merged(2)]);
        let mut log = EventLog::open_with_seq(&path, 1).unwrap();
        log.append(merged(3)).unwrap();
        let mut log = EventLog::open_with_seq(&path, 9).unwrap();
        log.append(merged(4)).unwrap();
        drop(log);

        let ids: Vec<_> = EventLog::replay_from(&path, 0)
            .unwrap()
            .events
            .iter()
            .map(|e| e.payload.merge_request())
            .collect();
        assert_eq!(ids, vec![MergeRequestId(1), MergeRequestId(2)]);
        // Truncation made the cut permanent.
        assert_eq!(EventLog::replay_from(&path, 0).unwrap().events.len(), 2);
    }

    #[test]
    fn blank_lines_are_tolerated() {
        let (_dir, path) = journal();
        write_journal(&path, &[merged(1)]);
        append_raw(&path, b"\n  \n");
        let mut log = EventLog::open_with_seq(&path, 1).unwrap();
        log.append(merged(2)).unwrap();
        drop(log);

        let replay = EventLog::replay_from(&path, 0).unwrap();
        assert_eq!(replay.events.len(), 2);
        assert_eq!(replay.next_seq, 2);
    }

    #[test]
    fn replay_can_start_mid_file() {
        let (_dir, path) = journal();
        let mut log = EventLog::open(&path).unwrap();
        log.append(merged(1)).unwrap();
        let offset = log.offset().unwrap();
        log.append(merged(2)).unwrap();
        drop(log);

        let replay = EventLog::replay_from(&path, offset).unwrap();
        assert_eq!(replay.events.len(), 1);
        assert_eq!(replay.events[0].payload.merge_request(), MergeRequestId(2));
        assert_eq!(replay.next_seq, 2);
    }

    #[test]
    fn missing_or_empty_journal_replays_nothing() {
        let (_dir, path) = journal();
        let replay = EventLog::replay_from(&path, 0).unwrap();
        assert!(replay.events.is_empty());
        assert_eq!(replay.next_seq, 0);

        File::create(&path).unwrap();
        assert_eq!(EventLog::replay_from(&path, 0).unwrap().next_seq, 0);
    }

    proptest! {
        #[test]
        fn replay_returns_what_was_written(payloads in prop::collection::vec(any_payload(), 1..12)) {
            let (_dir, path) = journal();
            write_journal(&path, &payloads);

            let replay = EventLog::replay_from(&path, 0).unwrap();
            prop_assert_eq!(replay.next_seq, payloads.len() as u64);
            let replayed: Vec<_> = replay.events.into_iter().map(|e| e.payload).collect();
            prop_assert_eq!(replayed, payloads);
        }

        #[test]
        fn any_cut_leaves_a_consistent_prefix(
            payloads in prop::collection::vec(any_payload(), 2..8),
            keep in 0.05f64..0.95,
        ) {
            let (_dir, path) = journal();
            write_journal(&path, &payloads);
            let len = std::fs::metadata(&path).unwrap().len();
            OpenOptions::new()
                .write(true)
                .open(&path)
                .unwrap()
                .set_len((len as f64 * keep) as u64)
                .unwrap();

            let replay = EventLog::replay_from(&path, 0).unwrap();
            prop_assert!(replay.events.len() < payloads.len());
            for (i, event) in replay.events.iter().enumerate() {
                prop_assert_eq!(event.seq, i as u64);
                prop_assert_eq!(&event.payload, &payloads[i]);
            }
            prop_assert_eq!(replay.next_seq, replay.events.len() as u64);
        }
    }
}
