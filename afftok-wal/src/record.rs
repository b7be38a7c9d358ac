use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalStatus {
    Pending,
    Processed,
    Failed,
}

impl WalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WalStatus::Processed | WalStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalRecord {
    pub seq: u64,
    pub event_type: String,
    pub created_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub status: WalStatus,
    pub attempts: u32,
}

/// Frames a record as `len(u32 BE) | json bytes | crc32(u32 BE)`.
pub fn encode(record: &WalRecord) -> anyhow::Result<Vec<u8>> {
    let body = serde_json::to_vec(record)?;
    let crc = crc32fast::hash(&body);

    let mut out = Vec::with_capacity(8 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    out.extend_from_slice(&crc.to_be_bytes());
    Ok(out)
}

pub enum DecodeOutcome {
    Record(WalRecord),
    /// Length prefix present, checksum mismatch: skip and count, keep reading.
    Corrupt,
    /// Length prefix present but the file ends before body+crc are fully
    /// written (a crash mid-append). Discard and stop reading this segment.
    CorruptTail,
}

/// Decodes one frame starting at `buf[pos..]`. Returns the outcome plus the
/// new read position, or `None` if `buf` is exhausted (clean EOF).
pub fn decode_one(buf: &[u8], pos: usize) -> Option<(DecodeOutcome, usize)> {
    if pos + 4 > buf.len() {
        return None;
    }
    let len = u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
    let body_start = pos + 4;
    let body_end = body_start + len;
    let crc_end = body_end + 4;

    if crc_end > buf.len() {
        return Some((DecodeOutcome::CorruptTail, buf.len()));
    }

    let body = &buf[body_start..body_end];
    let stored_crc = u32::from_be_bytes(buf[body_end..crc_end].try_into().unwrap());
    let actual_crc = crc32fast::hash(body);

    if stored_crc != actual_crc {
        return Some((DecodeOutcome::Corrupt, crc_end));
    }

    match serde_json::from_slice::<WalRecord>(body) {
        Ok(record) => Some((DecodeOutcome::Record(record), crc_end)),
        Err(_) => Some((DecodeOutcome::Corrupt, crc_end)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(seq: u64) -> WalRecord {
        WalRecord {
            seq,
            event_type: "click".to_string(),
            created_at: Utc::now(),
            payload: serde_json::json!({"uo": "abc"}),
            status: WalStatus::Pending,
            attempts: 0,
        }
    }

    #[test]
    fn round_trips_a_record() {
        let encoded = encode(&sample(1)).unwrap();
        let (outcome, pos) = decode_one(&encoded, 0).unwrap();
        assert_eq!(pos, encoded.len());
        match outcome {
            DecodeOutcome::Record(r) => assert_eq!(r.seq, 1),
            _ => panic!("expected a record"),
        }
    }

    #[test]
    fn detects_checksum_corruption() {
        let mut encoded = encode(&sample(1)).unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        let (outcome, _) = decode_one(&encoded, 0).unwrap();
        assert!(matches!(outcome, DecodeOutcome::Corrupt));
    }

    #[test]
    fn detects_truncated_tail() {
        let encoded = encode(&sample(1)).unwrap();
        let truncated = &encoded[..encoded.len() - 2];
        let (outcome, _) = decode_one(truncated, 0).unwrap();
        assert!(matches!(outcome, DecodeOutcome::CorruptTail));
    }
}
