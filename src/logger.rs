// =============================================================================
// Decision Logger (C10)
// =============================================================================
//
// Append-only audit trail: one JSON-lines file per trader under a
// configurable directory. `record` appends a whole line and fsyncs before
// returning, so a reader never observes a torn write. `clean_old_records`
// rewrites the file via a tmp-then-rename atomic-save pattern, the same
// approach used elsewhere in this codebase for persisting mutable config.
// =============================================================================

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::types::CycleRecord;

pub struct DecisionLogger {
    log_dir: PathBuf,
}

impl DecisionLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self { log_dir: log_dir.into() }
    }

    fn path_for(&self, trader_id: &str) -> PathBuf {
        self.log_dir.join(format!("{trader_id}.jsonl"))
    }

    /// Append one record, durably. Whole-record durability: the write is a
    /// single `write_all` of one JSON line followed by an explicit `sync_all`.
    pub fn record(&self, record: &CycleRecord) -> Result<()> {
        std::fs::create_dir_all(&self.log_dir)
            .with_context(|| format!("creating decision log directory {}", self.log_dir.display()))?;

        let path = self.path_for(&record.trader_id);
        let line = serde_json::to_string(record).context("serializing cycle record")?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening decision log {}", path.display()))?;

        file.write_all(line.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .with_context(|| format!("appending to decision log {}", path.display()))?;
        file.sync_all()
            .with_context(|| format!("fsyncing decision log {}", path.display()))?;

        Ok(())
    }

    /// The most recent `n` records for `trader_id`, newest first. Lines that
    /// fail to parse (e.g. truncated by a prior crash mid-write) are skipped
    /// rather than surfaced as an error — the log is best-effort history,
    /// not a transactional store.
    pub fn latest_n(&self, trader_id: &str, n: usize) -> Result<Vec<CycleRecord>> {
        let path = self.path_for(trader_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let records = read_all(&path)?;
        let start = records.len().saturating_sub(n);
        Ok(records[start..].iter().rev().cloned().collect())
    }

    /// Remove records strictly older than `retention_days`, rewriting the
    /// file atomically (write to a `.tmp` sibling, then rename) so a crash
    /// mid-compaction never leaves a corrupt log in place.
    pub fn clean_old_records(&self, retention_days: i64) -> Result<()> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days);

        let entries = match std::fs::read_dir(&self.log_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).context("reading decision log directory"),
        };

        for entry in entries {
            let entry = entry.context("reading decision log directory entry")?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            self.compact_file(&path, cutoff)?;
        }
        Ok(())
    }

    fn compact_file(&self, path: &Path, cutoff: chrono::DateTime<chrono::Utc>) -> Result<()> {
        let records = read_all(path)?;
        let kept: Vec<&CycleRecord> = records.iter().filter(|r| r.timestamp >= cutoff).collect();
        if kept.len() == records.len() {
            return Ok(());
        }

        let mut content = String::new();
        for record in &kept {
            content.push_str(&serde_json::to_string(record).context("serializing cycle record during compaction")?);
            content.push('\n');
        }

        let tmp_path = path.with_extension("jsonl.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("writing compacted log to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("renaming compacted log into place at {}", path.display()))?;

        info!(
            path = %path.display(),
            kept = kept.len(),
            dropped = records.len() - kept.len(),
            "decision log compacted"
        );
        Ok(())
    }
}

fn read_all(path: &Path) -> Result<Vec<CycleRecord>> {
    let file = std::fs::File::open(path).with_context(|| format!("opening decision log {}", path.display()))?;
    let reader = std::io::BufReader::new(file);

    let mut records = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading line {i} of {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CycleRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(path = %path.display(), line = i, error = %e, "skipping unparseable decision log line"),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccountInfo;

    fn record(trader_id: &str, cycle_number: u64, timestamp: chrono::DateTime<chrono::Utc>) -> CycleRecord {
        CycleRecord {
            cycle_number,
            trader_id: trader_id.to_string(),
            timestamp,
            success: true,
            input_prompt: String::new(),
            cot_trace: String::new(),
            decisions_json: "[]".to_string(),
            per_action_outcomes: vec![],
            account_state_snapshot: None::<AccountInfo>,
            error_message: None,
        }
    }

    #[test]
    fn record_then_latest_n_round_trips() {
        let dir = tempdir();
        let logger = DecisionLogger::new(dir.clone());
        let now = chrono::Utc::now();
        for i in 0..5 {
            logger.record(&record("t1", i, now)).unwrap();
        }
        let latest = logger.latest_n("t1", 3).unwrap();
        assert_eq!(latest.len(), 3);
        // Newest first.
        assert_eq!(latest[0].cycle_number, 4);
        assert_eq!(latest[2].cycle_number, 2);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn latest_n_on_missing_trader_is_empty() {
        let dir = tempdir();
        let logger = DecisionLogger::new(dir.clone());
        assert!(logger.latest_n("ghost", 5).unwrap().is_empty());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn clean_old_records_drops_records_past_retention() {
        let dir = tempdir();
        let logger = DecisionLogger::new(dir.clone());
        let now = chrono::Utc::now();
        logger.record(&record("t1", 0, now - chrono::Duration::days(30))).unwrap();
        logger.record(&record("t1", 1, now)).unwrap();

        logger.clean_old_records(7).unwrap();
        let remaining = logger.latest_n("t1", 10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].cycle_number, 1);
        std::fs::remove_dir_all(dir).ok();
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("decision-logger-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
