use crate::errors::ChirpError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Delete the oldest `.jsonl` logs in `dir` until their combined size fits
/// `budget_bytes`. Other files in the directory are neither counted nor removed.
pub fn enforce_total_budget(dir: &Path, budget_bytes: u64) -> Result<Vec<PathBuf>, ChirpError> {
    let mut logs = fs::read_dir(dir)
        .map_err(|e| ChirpError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_log_file(path))
        .filter_map(|path| {
            let meta = fs::metadata(&path).ok()?;
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((path, modified, meta.len()))
        })
        .collect::<Vec<_>>();

    logs.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let mut total = logs.iter().map(|(_, _, len)| *len).sum::<u64>();
    let mut deleted = Vec::new();
    for (path, _, len) in logs {
        if total <= budget_bytes {
            break;
        }
        fs::remove_file(&path).map_err(|e| ChirpError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }

    Ok(deleted)
}

fn is_log_file(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("jsonl")
}
