use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{Event, Timestamp};

pub const MAGIC: &[u8; 8] = b"RBWAL001";

/// Payloads above this are treated as corruption rather than allocated.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// One log entry as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub seq: u64,
    pub written_at: Timestamp,
    pub event: Event,
}

/// Borrowing twin of `Record`; bincode encodes both identically.
#[derive(Serialize)]
struct RecordRef<'a> {
    seq: u64,
    written_at: Timestamp,
    event: &'a Event,
}

/// Encode a single record to `[len][bincode][crc32]`.
fn encode_record(writer: &mut impl Write, seq: u64, event: &Event) -> io::Result<()> {
    let record = RecordRef {
        seq,
        written_at: Utc::now(),
        event,
    };
    let payload =
        bincode::serialize(&record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Records read back from disk plus the byte length of the valid prefix.
pub struct Replay {
    pub records: Vec<Record>,
    pub valid_len: u64,
}

/// Append-only write-ahead log.
///
/// File layout: the 8-byte magic `RBWAL001`, then entries of
/// `[u32: len][bincode: Record][u32: crc32]`. A torn or corrupt tail is
/// discarded on replay and cut off when the log is reopened.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    next_seq: u64,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the log at `path`, returning it with every valid record.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Record>)> {
        let Replay { records, valid_len } = Self::replay(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let on_disk = file.metadata()?.len();

        if valid_len == 0 {
            file.set_len(0)?;
        } else if on_disk > valid_len {
            warn!(
                "discarding {} trailing bytes from {}",
                on_disk - valid_len,
                path.display()
            );
            file.set_len(valid_len)?;
        }

        let mut writer = BufWriter::new(file);
        if valid_len == 0 {
            writer.write_all(MAGIC)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        let next_seq = records.last().map_or(1, |r| r.seq + 1);
        Ok((
            Self {
                writer,
                path: path.to_path_buf(),
                next_seq,
                appends_since_compact: 0,
            },
            records,
        ))
    }

    /// Append a single event and fsync. Production code batches with
    /// `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without flushing. Call `flush_sync()` after the batch.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_record(&mut self.writer, self.next_seq, event)?;
        self.next_seq += 1;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Rewrite the log as exactly `events`, renumbered from 1.
    /// Written to a temp file, fsynced, then renamed over the log.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        self.flush_sync()?;
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(MAGIC)?;
            for (i, event) in events.iter().enumerate() {
                encode_record(&mut writer, i as u64 + 1, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.next_seq = events.len() as u64 + 1;
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Read every valid record. A missing file is an empty log; a file with a
    /// foreign header is an error.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Replay {
                    records: Vec::new(),
                    valid_len: 0,
                });
            }
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();

        let mut header = [0u8; 8];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            // torn header from a crash during creation
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Ok(Replay {
                    records,
                    valid_len: 0,
                });
            }
            Err(e) => return Err(e),
        }
        if &header != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a roombook log", path.display()),
            ));
        }
        let mut valid_len = MAGIC.len() as u64;
        let mut last_seq = 0u64;

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_RECORD_LEN {
                break;
            }

            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }

            let mut crc_buf = [0u8; 4];
            match reader.read_exact(&mut crc_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break;
            }

            let record = match bincode::deserialize::<Record>(&payload) {
                Ok(record) => record,
                Err(_) => break,
            };
            if record.seq <= last_seq {
                break;
            }
            last_seq = record.seq;
            valid_len += (4 + len + 4) as u64;
            records.push(record);
        }

        Ok(Replay { records, valid_len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::OperationalHours;
    use crate::model::{Room, RoomStatus};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roombook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn room_created() -> Event {
        Event::RoomCreated {
            room: Room {
                id: Ulid::new(),
                building_id: Ulid::new(),
                category_id: Ulid::new(),
                name: "Lab 2".into(),
                capacity: 24,
                status: RoomStatus::Available,
                hours: OperationalHours::default(),
                requires_approval: true,
                deleted_at: None,
            },
        }
    }

    fn status_changed(room_id: Ulid) -> Event {
        Event::RoomStatusChanged {
            room_id,
            status: RoomStatus::Maintenance,
        }
    }

    fn events_of(replay: Replay) -> Vec<Event> {
        replay.records.into_iter().map(|r| r.event).collect()
    }

    #[test]
    fn new_file_gets_header() {
        let path = tmp_path("header.wal");
        let (_wal, records) = Wal::open(&path).unwrap();
        assert!(records.is_empty());
        assert_eq!(fs::read(&path).unwrap(), MAGIC.to_vec());
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let created = room_created();
        let events = vec![created.clone(), status_changed(created.room_id())];
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        let replay = Wal::replay(&path).unwrap();
        let seqs: Vec<u64> = replay.records.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(replay.valid_len, fs::metadata(&path).unwrap().len());
        assert_eq!(events_of(replay), events);
    }

    #[test]
    fn sequence_continues_after_reopen() {
        let path = tmp_path("reopen_seq.wal");
        let created = room_created();
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.append(&created).unwrap();
        }
        {
            let (mut wal, records) = Wal::open(&path).unwrap();
            assert_eq!(records.len(), 1);
            wal.append(&status_changed(created.room_id())).unwrap();
        }
        let seqs: Vec<u64> = Wal::replay(&path).unwrap().records.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn torn_tail_is_cut_on_reopen() {
        let path = tmp_path("torn_tail.wal");
        let created = room_created();
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.append(&created).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 6]).unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.records.len(), 1);
        assert!(replay.valid_len < fs::metadata(&path).unwrap().len());

        // appends after reopening must not land behind the garbage
        let follow_up = status_changed(created.room_id());
        {
            let (mut wal, records) = Wal::open(&path).unwrap();
            assert_eq!(records.len(), 1);
            wal.append(&follow_up).unwrap();
        }
        assert_eq!(events_of(Wal::replay(&path).unwrap()), vec![created, follow_up]);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        let replay = Wal::replay(&path).unwrap();
        assert!(replay.records.is_empty());
        assert_eq!(replay.valid_len, 0);
    }

    #[test]
    fn replay_corrupt_crc() {
        let path = tmp_path("corrupt_crc.wal");
        {
            let record = Record {
                seq: 1,
                written_at: Utc::now(),
                event: room_created(),
            };
            let payload = bincode::serialize(&record).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(MAGIC).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }
        let replay = Wal::replay(&path).unwrap();
        assert!(replay.records.is_empty());
        assert_eq!(replay.valid_len, MAGIC.len() as u64);
    }

    #[test]
    fn foreign_header_rejected() {
        let path = tmp_path("foreign.wal");
        fs::write(&path, b"NOTALOG!rest").unwrap();
        let err = Wal::replay(&path).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(Wal::open(&path).is_err());
    }

    #[test]
    fn compact_rewrites_and_renumbers() {
        let path = tmp_path("compact.wal");
        let created = room_created();
        let rid = created.room_id();
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            wal.append(&created).unwrap();
            for _ in 0..20 {
                wal.append(&status_changed(rid)).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 21);
            let before = fs::metadata(&path).unwrap().len();

            wal.compact(std::slice::from_ref(&created)).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            assert!(fs::metadata(&path).unwrap().len() < before);

            wal.append(&status_changed(rid)).unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        let seqs: Vec<u64> = replay.records.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(events_of(replay), vec![created, status_changed(rid)]);
    }

    #[test]
    fn append_buffered_then_flush_sync() {
        let path = tmp_path("buffered_flush.wal");
        let events: Vec<Event> = (0..5).map(|_| room_created()).collect();
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }
        assert_eq!(events_of(Wal::replay(&path).unwrap()), events);
    }
}
