use std::path::{Path, PathBuf};

pub fn segment_path(dir: &Path, seq_start: u64) -> PathBuf {
    dir.join(format!("wal-{seq_start:020}.log"))
}

/// Lists existing segment files in ascending `seq_start` order.
pub fn list_segments(dir: &Path) -> std::io::Result<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();
    if !dir.exists() {
        return Ok(segments);
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        let Some(seq_str) = name.strip_prefix("wal-").and_then(|s| s.strip_suffix(".log")) else { continue };
        if let Ok(seq_start) = seq_str.parse::<u64>() {
            segments.push((seq_start, path));
        }
    }

    segments.sort_by_key(|(seq, _)| *seq);
    Ok(segments)
}
