// houndb - store.rs
// Durable record storage: append-only record log, in-memory record map, blob store.
//
// Log frame layout (little endian):
//   [payload_len: u32][crc32(payload): u32][payload: bincode(LogFrame)]
//
// Replay stops at the first short or checksum-failing frame and truncates the
// file back to the last good frame, so a torn append only loses itself.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::record::{BlobRef, Record, RecordId, Value};
use crate::schema::Schema;
use crate::{HoundError, Result};

pub const LOG_FILE: &str = "records.log";
pub const BLOB_DIR: &str = "blobs";

const FRAME_HEADER: usize = 8;

// ── Record Log ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
enum LogEntry {
    Put(Record),
    Delete(RecordId),
    /// Carries only `seq`; written when a rewrite has no live records.
    Mark,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogFrame {
    seq: u64,
    entry: LogEntry,
}

fn encode_frame(frame: &LogFrame) -> Result<Vec<u8>> {
    let payload = bincode::serialize(frame)?;
    let mut buf = Vec::with_capacity(FRAME_HEADER + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode every intact frame. Returns the frames and the byte length they span.
fn decode_frames(bytes: &[u8]) -> (Vec<LogFrame>, usize) {
    let mut frames = Vec::new();
    let mut pos = 0usize;

    while pos + FRAME_HEADER <= bytes.len() {
        let len = u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
            as usize;
        let crc = u32::from_le_bytes([
            bytes[pos + 4],
            bytes[pos + 5],
            bytes[pos + 6],
            bytes[pos + 7],
        ]);
        let start = pos + FRAME_HEADER;
        let end = match start.checked_add(len) {
            Some(end) if end <= bytes.len() => end,
            _ => break,
        };
        let payload = &bytes[start..end];
        if crc32fast::hash(payload) != crc {
            break;
        }
        match bincode::deserialize::<LogFrame>(payload) {
            Ok(frame) => frames.push(frame),
            Err(_) => break,
        }
        pos = end;
    }

    (frames, pos)
}

struct RecordLog {
    path: PathBuf,
    file: File,
    len: u64,
}

impl RecordLog {
    fn open(path: PathBuf) -> Result<(Self, Vec<LogFrame>)> {
        let mut bytes = Vec::new();
        if path.exists() {
            File::open(&path)?.read_to_end(&mut bytes)?;
        }

        let (frames, good_len) = decode_frames(&bytes);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        if good_len < bytes.len() {
            log::warn!(
                "record log {:?}: dropping {} trailing bytes after frame {}",
                path,
                bytes.len() - good_len,
                frames.len()
            );
            file.set_len(good_len as u64)?;
            file.sync_all()?;
        }

        let log = Self {
            path,
            file,
            len: good_len as u64,
        };
        Ok((log, frames))
    }

    fn append(&mut self, frame: &LogFrame) -> Result<()> {
        let buf = encode_frame(frame)?;
        if let Err(e) = write_at(&mut self.file, self.len, &buf) {
            // Cut off whatever part of the frame made it to disk.
            let _ = self.file.set_len(self.len);
            return Err(e.into());
        }
        self.len += buf.len() as u64;
        Ok(())
    }

    /// Replace the log with one `Put` frame per live record.
    fn rewrite<'a>(&mut self, seq: u64, records: impl Iterator<Item = &'a Record>) -> Result<()> {
        let tmp = self.path.with_extension("log.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            let mut written = 0usize;
            for record in records {
                let frame = LogFrame {
                    seq,
                    entry: LogEntry::Put(record.clone()),
                };
                writer.write_all(&encode_frame(&frame)?)?;
                written += 1;
            }
            if written == 0 && seq > 0 {
                writer.write_all(&encode_frame(&LogFrame {
                    seq,
                    entry: LogEntry::Mark,
                })?)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        if let Some(dir) = self.path.parent() {
            sync_dir(dir)?;
        }

        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.len = self.file.metadata()?.len();
        Ok(())
    }
}

fn write_at(file: &mut File, offset: u64, buf: &[u8]) -> std::io::Result<()> {
    use std::io::{Seek, SeekFrom};

    file.seek(SeekFrom::Start(offset))?;
    file.write_all(buf)?;
    file.sync_data()
}

/// Flush a directory entry so a preceding rename survives power loss.
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

/// Directories cannot be opened for syncing here; renames are best-effort.
#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

// ── Blob Store ────────────────────────────────────────────────────────────────

/// Opaque payload storage. Records keep only a [`BlobRef`].
pub struct BlobStore {
    dir: Option<PathBuf>,
    /// key → length; the authoritative "exists" set
    keys: HashMap<String, u64>,
    /// payloads for the in-memory mode
    memory: HashMap<String, Vec<u8>>,
}

impl BlobStore {
    fn in_memory() -> Self {
        Self {
            dir: None,
            keys: HashMap::new(),
            memory: HashMap::new(),
        }
    }

    fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        let mut keys = HashMap::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            if let Some(key) = path.file_stem().and_then(|s| s.to_str()) {
                keys.insert(key.to_string(), entry.metadata()?.len());
            }
        }
        Ok(Self {
            dir: Some(dir),
            keys,
            memory: HashMap::new(),
        })
    }

    fn blob_path(dir: &Path, key: &str) -> PathBuf {
        dir.join(format!("{key}.bin"))
    }

    pub fn put(&mut self, bytes: &[u8]) -> Result<BlobRef> {
        let key = uuid::Uuid::new_v4().simple().to_string();
        match &self.dir {
            Some(dir) => {
                let tmp = dir.join(format!("{key}.tmp"));
                {
                    let mut file = File::create(&tmp)?;
                    file.write_all(bytes)?;
                    file.sync_all()?;
                }
                fs::rename(&tmp, Self::blob_path(dir, &key))?;
                sync_dir(dir)?;
            }
            None => {
                self.memory.insert(key.clone(), bytes.to_vec());
            }
        }
        let len = bytes.len() as u64;
        self.keys.insert(key.clone(), len);
        Ok(BlobRef { key, len })
    }

    pub fn read(&self, blob: &BlobRef) -> Result<Vec<u8>> {
        if !self.contains(blob) {
            return Err(HoundError::NotFound {
                kind: "Blob",
                id: blob.key.clone(),
            });
        }
        match &self.dir {
            Some(dir) => Ok(fs::read(Self::blob_path(dir, &blob.key))?),
            None => Ok(self.memory.get(&blob.key).cloned().unwrap_or_default()),
        }
    }

    pub fn contains(&self, blob: &BlobRef) -> bool {
        self.keys.get(&blob.key) == Some(&blob.len)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        if self.keys.remove(key).is_none() {
            return Ok(());
        }
        match &self.dir {
            Some(dir) => match fs::remove_file(Self::blob_path(dir, key)) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            },
            None => {
                self.memory.remove(key);
                Ok(())
            }
        }
    }

    /// Delete every blob whose key is not in `live`. Returns how many went.
    fn retain(&mut self, live: &HashSet<String>) -> Result<usize> {
        let dead: Vec<String> = self
            .keys
            .keys()
            .filter(|k| !live.contains(*k))
            .cloned()
            .collect();
        for key in &dead {
            self.remove(key)?;
        }
        Ok(dead.len())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

// ── Record Store ──────────────────────────────────────────────────────────────

/// Outcome of [`RecordStore::compact`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactReport {
    pub live_records: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub blobs_removed: usize,
}

/// Key-value storage of records with durable writes.
///
/// Every mutation is appended to the record log and synced before it is
/// applied to the in-memory map, so `get` after `put` always observes the
/// write and a crash never exposes a record that was not logged.
pub struct RecordStore {
    records: HashMap<RecordId, Record>,
    log: Option<RecordLog>,
    blobs: BlobStore,
    seq: u64,
}

impl RecordStore {
    /// An ephemeral store: nothing touches disk.
    pub fn in_memory() -> Self {
        Self {
            records: HashMap::new(),
            log: None,
            blobs: BlobStore::in_memory(),
            seq: 0,
        }
    }

    /// Open (or create) the store under `dir`, replaying the record log.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let (log, frames) = RecordLog::open(dir.join(LOG_FILE))?;
        let blobs = BlobStore::open(dir.join(BLOB_DIR))?;

        let mut records = HashMap::new();
        let mut seq = 0;
        for frame in frames {
            seq = seq.max(frame.seq);
            match frame.entry {
                LogEntry::Put(record) => {
                    records.insert(record.id, record);
                }
                LogEntry::Delete(id) => {
                    records.remove(&id);
                }
                LogEntry::Mark => {}
            }
        }

        log::debug!("record store {:?}: replayed {} live records (seq {})", dir, records.len(), seq);

        Ok(Self {
            records,
            log: Some(log),
            blobs,
            seq,
        })
    }

    /// Validate `record` against `schema` and persist it.
    ///
    /// # Errors
    /// `SchemaViolation` without any write; I/O errors leave the store unchanged.
    pub fn put(&mut self, schema: &Schema, record: Record) -> Result<RecordId> {
        schema.validate(&record.properties, |b| self.blobs.contains(b))?;
        if let Some(blob) = &record.blob {
            if !self.blobs.contains(blob) {
                return Err(HoundError::schema("blob", format!("dangling blob reference {}", blob.key)));
            }
        }

        let id = record.id;
        self.append(LogEntry::Put(record.clone()))?;
        self.records.insert(id, record);
        Ok(id)
    }

    pub fn get(&self, id: &RecordId) -> Result<&Record> {
        self.records.get(id).ok_or_else(|| HoundError::NotFound {
            kind: "Record",
            id: id.to_string(),
        })
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.records.contains_key(id)
    }

    /// Delete by id. Deleting a missing id returns `false`.
    pub fn delete(&mut self, id: &RecordId) -> Result<bool> {
        if !self.records.contains_key(id) {
            return Ok(false);
        }
        self.append(LogEntry::Delete(*id))?;
        self.records.remove(id);
        Ok(true)
    }

    /// Iterate all live records. Finite; call again to restart.
    pub fn scan(&self) -> impl Iterator<Item = &Record> + '_ {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sequence number of the last applied mutation.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn put_blob(&mut self, bytes: &[u8]) -> Result<BlobRef> {
        self.blobs.put(bytes)
    }

    /// Best-effort removal of a blob that never got referenced.
    pub(crate) fn discard_blob(&mut self, blob: &BlobRef) {
        if let Err(e) = self.blobs.remove(&blob.key) {
            log::warn!("could not remove unreferenced blob {}: {}", blob.key, e);
        }
    }

    /// Rewrite the log with only live records and drop unreferenced blobs.
    pub fn compact(&mut self) -> Result<CompactReport> {
        let mut report = CompactReport {
            live_records: self.records.len(),
            ..Default::default()
        };

        if let Some(log) = &mut self.log {
            report.bytes_before = log.len;
            let mut live: Vec<&Record> = self.records.values().collect();
            live.sort_by_key(|r| r.id);
            log.rewrite(self.seq, live.into_iter())?;
            report.bytes_after = log.len;
        }

        let referenced: HashSet<String> = self
            .records
            .values()
            .flat_map(|r| {
                r.blob.iter().map(|b| b.key.clone()).chain(r.properties.values().filter_map(
                    |v| match v {
                        Value::Blob(b) => Some(b.key.clone()),
                        _ => None,
                    },
                ))
            })
            .collect();
        report.blobs_removed = self.blobs.retain(&referenced)?;

        Ok(report)
    }

    fn append(&mut self, entry: LogEntry) -> Result<()> {
        let seq = self.seq + 1;
        if let Some(log) = &mut self.log {
            log.append(&LogFrame { seq, entry })?;
        }
        self.seq = seq;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
