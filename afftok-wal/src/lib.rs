//! Segmented append-only write-ahead log (component F).
//!
//! Directory of `wal-<seq_start>.log` files, each holding length-prefixed,
//! CRC32-checked records. The active segment is rolled once it crosses
//! `segment_cap_bytes`; terminal (processed/failed) segments are eligible
//! for compaction.

mod record;
mod segment;

pub use record::{WalRecord, WalStatus};

use anyhow::Context;
use record::{decode_one, encode, DecodeOutcome};
use segment::{list_segments, segment_path};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct WalConfig {
    pub dir: PathBuf,
    pub durable: bool,
    pub segment_cap_bytes: u64,
    pub max_attempts: u32,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./wal"),
            durable: true,
            segment_cap_bytes: 64 * 1024 * 1024,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct WalMetrics {
    pub pending: u64,
    pub processed: u64,
    pub failed: u64,
    pub corrupted: u64,
    pub file_count: u64,
    pub is_running: bool,
}

struct WriterState {
    file: File,
    path: PathBuf,
    seq_start: u64,
    size: u64,
}

struct EntryState {
    status: WalStatus,
    attempts: u32,
}

pub struct Wal {
    config: WalConfig,
    writer: Mutex<WriterState>,
    /// seq -> terminal/pending state, used to decide replay outcomes and
    /// whether a segment is fully compactable. Rebuilt from disk at open.
    entries: Mutex<HashMap<u64, EntryState>>,
    /// Held for the duration of `replay()` and `compact()` so the two never
    /// run concurrently: compaction deletes segment files a replay pass may
    /// still be reading.
    read_pass: Mutex<()>,
    next_seq: AtomicU64,
    corrupted: AtomicU64,
    is_running: AtomicBool,
}

impl Wal {
    pub fn open(config: WalConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.dir)
            .with_context(|| format!("creating wal dir {:?}", config.dir))?;

        let segments = list_segments(&config.dir)?;
        let mut entries = HashMap::new();
        let mut max_seq = 0u64;
        let mut corrupted = 0u64;

        for (_, path) in &segments {
            let mut buf = Vec::new();
            File::open(path)?.read_to_end(&mut buf)?;
            let mut pos = 0;
            while let Some((outcome, new_pos)) = decode_one(&buf, pos) {
                pos = new_pos;
                match outcome {
                    DecodeOutcome::Record(r) => {
                        max_seq = max_seq.max(r.seq);
                        entries.insert(r.seq, EntryState { status: r.status, attempts: r.attempts });
                    }
                    DecodeOutcome::Corrupt => corrupted += 1,
                    DecodeOutcome::CorruptTail => {
                        corrupted += 1;
                        break;
                    }
                }
            }
        }

        let (active_path, seq_start, size) = match segments.last() {
            Some((seq_start, path)) => (path.clone(), *seq_start, std::fs::metadata(path)?.len()),
            None => {
                let seq_start = 1;
                let path = segment_path(&config.dir, seq_start);
                (path, seq_start, 0)
            }
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&active_path)
            .with_context(|| format!("opening active wal segment {active_path:?}"))?;

        Ok(Self {
            writer: Mutex::new(WriterState { file, path: active_path, seq_start, size }),
            entries: Mutex::new(entries),
            read_pass: Mutex::new(()),
            next_seq: AtomicU64::new(max_seq + 1),
            corrupted: AtomicU64::new(corrupted),
            is_running: AtomicBool::new(true),
            config,
        })
    }

    /// Writes one already-framed record to the active segment, rolling to a
    /// fresh segment file once `segment_cap_bytes` is crossed. Shared by
    /// `append` (new pending records) and `replay` (status-transition
    /// records for seqs that already exist on disk).
    fn write_frame(&self, frame: &[u8]) -> anyhow::Result<()> {
        let durable = self.config.durable;
        let cap = self.config.segment_cap_bytes;
        let dir = self.config.dir.clone();

        let mut writer = self.writer.lock().unwrap();
        writer.file.write_all(frame)?;
        if durable {
            writer.file.sync_all()?;
        }
        writer.size += frame.len() as u64;

        if writer.size >= cap {
            let new_seq_start = self.next_seq.load(Ordering::SeqCst);
            let new_path = segment_path(&dir, new_seq_start);
            let new_file = OpenOptions::new().create(true).append(true).open(&new_path)?;
            *writer = WriterState { file: new_file, path: new_path, seq_start: new_seq_start, size: 0 };
        }

        Ok(())
    }

    /// Appends a new pending record and returns its seq.
    pub async fn append(&self, event_type: &str, payload: serde_json::Value) -> anyhow::Result<u64> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let record = WalRecord {
            seq,
            event_type: event_type.to_string(),
            created_at: chrono::Utc::now(),
            payload,
            status: WalStatus::Pending,
            attempts: 0,
        };

        let frame = encode(&record)?;
        self.write_frame(&frame)?;

        self.entries.lock().unwrap().insert(seq, EntryState { status: WalStatus::Pending, attempts: 0 });
        metrics::counter!("afftok_wal_appended_total").increment(1);

        Ok(seq)
    }

    /// Replays every pending entry in seq order, invoking `processor` for
    /// each. On success the entry is marked processed; on error, attempts
    /// is incremented and the entry is marked failed once `max_attempts`
    /// is exhausted (otherwise it stays pending for a later replay pass).
    ///
    /// Every transition is also appended to disk as a new frame carrying the
    /// original seq, so a restart's `open()` rebuild — which folds records by
    /// seq in file order — sees the latest status instead of replaying (and
    /// re-publishing) entries this process already finished. Frames are
    /// folded to one record per seq (last write wins, same as `open()`)
    /// before deciding what's pending, so a seq's own earlier, now-stale
    /// on-disk frame is never re-fed to `processor` once a later frame for
    /// it exists.
    pub fn replay<F>(&self, mut processor: F) -> anyhow::Result<()>
    where
        F: FnMut(&WalRecord) -> anyhow::Result<()>,
    {
        let _read_pass = self.read_pass.lock().unwrap();
        let segments = list_segments(&self.config.dir)?;
        let mut latest: HashMap<u64, WalRecord> = HashMap::new();

        for (_, path) in &segments {
            let mut buf = Vec::new();
            File::open(path)?.read_to_end(&mut buf)?;
            let mut pos = 0;
            while let Some((outcome, new_pos)) = decode_one(&buf, pos) {
                pos = new_pos;
                match outcome {
                    DecodeOutcome::Record(r) => {
                        latest.insert(r.seq, r);
                    }
                    DecodeOutcome::Corrupt => {
                        self.corrupted.fetch_add(1, Ordering::Relaxed);
                    }
                    DecodeOutcome::CorruptTail => {
                        self.corrupted.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                }
            }
        }

        let mut seqs: Vec<u64> = latest.keys().copied().collect();
        seqs.sort_unstable();

        let mut outcomes: Vec<(u64, WalStatus, u32)> = Vec::new();
        let mut updates: Vec<WalRecord> = Vec::new();

        for seq in seqs {
            let mut record = latest.remove(&seq).unwrap();
            if record.status != WalStatus::Pending {
                continue;
            }

            match processor(&record) {
                Ok(()) => {
                    outcomes.push((seq, WalStatus::Processed, record.attempts));
                    record.status = WalStatus::Processed;
                    updates.push(record);
                }
                Err(_) => {
                    let attempts = record.attempts + 1;
                    let status = if attempts >= self.config.max_attempts {
                        WalStatus::Failed
                    } else {
                        WalStatus::Pending
                    };
                    outcomes.push((seq, status, attempts));
                    record.status = status;
                    record.attempts = attempts;
                    updates.push(record);
                }
            }
        }

        for record in &updates {
            let frame = encode(record)?;
            self.write_frame(&frame)?;
        }

        let mut entries = self.entries.lock().unwrap();
        for (seq, status, attempts) in outcomes {
            entries.insert(seq, EntryState { status, attempts });
        }

        Ok(())
    }

    /// Deletes segments whose every known entry is terminal. The currently
    /// active segment is never deleted.
    pub fn compact(&self) -> anyhow::Result<u64> {
        let _read_pass = self.read_pass.lock().unwrap();
        let segments = list_segments(&self.config.dir)?;
        let active_path = self.writer.lock().unwrap().path.clone();
        let entries = self.entries.lock().unwrap();
        let mut removed = 0u64;

        for (_, path) in segments {
            if path == active_path {
                continue;
            }

            let mut buf = Vec::new();
            File::open(&path)?.read_to_end(&mut buf)?;
            let mut pos = 0;
            let mut all_terminal = true;
            let mut saw_any = false;

            while let Some((outcome, new_pos)) = decode_one(&buf, pos) {
                pos = new_pos;
                if let DecodeOutcome::Record(r) = outcome {
                    saw_any = true;
                    let terminal = entries.get(&r.seq).map(|e| e.status.is_terminal()).unwrap_or(false);
                    if !terminal {
                        all_terminal = false;
                        break;
                    }
                }
            }

            if saw_any && all_terminal {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Flushes pending buffers and marks the WAL stopped. Idempotent.
    pub async fn stop(&self) -> anyhow::Result<()> {
        let writer = self.writer.lock().unwrap();
        writer.file.sync_all().ok();
        self.is_running.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn metrics(&self) -> WalMetrics {
        let entries = self.entries.lock().unwrap();
        let mut pending = 0;
        let mut processed = 0;
        let mut failed = 0;
        for entry in entries.values() {
            match entry.status {
                WalStatus::Pending => pending += 1,
                WalStatus::Processed => processed += 1,
                WalStatus::Failed => failed += 1,
            }
        }
        let file_count = list_segments(&self.config.dir).map(|s| s.len() as u64).unwrap_or(0);

        WalMetrics {
            pending,
            processed,
            failed,
            corrupted: self.corrupted.load(Ordering::Relaxed),
            file_count,
            is_running: self.is_running.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_wal(dir: &std::path::Path) -> Wal {
        Wal::open(WalConfig { dir: dir.to_path_buf(), durable: false, segment_cap_bytes: 1024, max_attempts: 3 }).unwrap()
    }

    #[tokio::test]
    async fn append_then_replay_marks_processed() {
        let dir = tempfile::tempdir().unwrap();
        let wal = open_wal(dir.path());

        wal.append("click", serde_json::json!({"code": "uo-1"})).await.unwrap();
        wal.replay(|_record| Ok(())).unwrap();

        let metrics = wal.metrics();
        assert_eq!(metrics.processed, 1);
        assert_eq!(metrics.pending, 0);
    }

    #[tokio::test]
    async fn failed_processor_marks_failed_after_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let wal = open_wal(dir.path());

        wal.append("conversion", serde_json::json!({})).await.unwrap();
        for _ in 0..3 {
            wal.replay(|_record| Err(anyhow::anyhow!("downstream unavailable"))).unwrap();
        }

        let metrics = wal.metrics();
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.pending, 0);
    }

    #[tokio::test]
    async fn compaction_deletes_fully_terminal_non_active_segments() {
        let dir = tempfile::tempdir().unwrap();
        let wal = Wal::open(WalConfig { dir: dir.path().to_path_buf(), durable: false, segment_cap_bytes: 1, max_attempts: 3 }).unwrap();

        wal.append("click", serde_json::json!({"n": 1})).await.unwrap();
        wal.append("click", serde_json::json!({"n": 2})).await.unwrap();
        wal.replay(|_| Ok(())).unwrap();

        let removed = wal.compact().unwrap();
        assert_eq!(removed, 2);
    }

    #[tokio::test]
    async fn reopening_preserves_next_seq() {
        let dir = tempfile::tempdir().unwrap();
        {
            let wal = open_wal(dir.path());
            wal.append("click", serde_json::json!({})).await.unwrap();
        }
        let wal = open_wal(dir.path());
        let seq = wal.append("click", serde_json::json!({})).await.unwrap();
        assert_eq!(seq, 2);
    }

    #[tokio::test]
    async fn repeated_replay_calls_do_not_reprocess_stale_on_disk_frames() {
        // Each replay() appends a status-update frame rather than rewriting
        // the original in place, so a seq accumulates multiple on-disk
        // frames across calls. processor must still be invoked exactly once
        // per call for a still-pending entry, not once per stale frame.
        let dir = tempfile::tempdir().unwrap();
        let wal = open_wal(dir.path());
        wal.append("conversion", serde_json::json!({})).await.unwrap();

        for _ in 0..2 {
            let mut calls = 0;
            wal.replay(|_record| {
                calls += 1;
                anyhow::bail!("downstream unavailable")
            })
            .unwrap();
            assert_eq!(calls, 1);
        }

        let metrics = wal.metrics();
        assert_eq!(metrics.pending, 1);
    }

    #[tokio::test]
    async fn reopening_after_replay_does_not_reprocess_entries() {
        let dir = tempfile::tempdir().unwrap();
        {
            let wal = open_wal(dir.path());
            wal.append("click", serde_json::json!({})).await.unwrap();
            wal.replay(|_record| Ok(())).unwrap();
        }

        let wal = open_wal(dir.path());
        let metrics = wal.metrics();
        assert_eq!(metrics.processed, 1);
        assert_eq!(metrics.pending, 0);

        let mut replayed = 0;
        wal.replay(|_record| {
            replayed += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(replayed, 0);
    }
}
