//! Bounded operational logs: the in-memory operation log buffer flushed to
//! `logs/operations.log` and the access-plan cache persisted to
//! `meta/access_plans.log`.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::common::errors::DbResult;

fn ensure_parent(path: &Path) -> DbResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn count_lines(path: &Path) -> usize {
    File::open(path)
        .map(|f| BufReader::new(f).lines().count())
        .unwrap_or(0)
}

fn tail_lines(path: &Path, limit: usize) -> Vec<String> {
    let Ok(file) = File::open(path) else {
        return Vec::new();
    };
    let lines: Vec<String> = BufReader::new(file)
        .lines()
        .map_while(Result::ok)
        .collect();
    if limit == 0 || lines.len() <= limit {
        lines
    } else {
        lines[lines.len() - limit..].to_vec()
    }
}

/// Buffers operation lines in memory up to a byte budget, appending them to
/// the operations log file on flush (or when the budget is exceeded).
#[derive(Debug)]
pub struct LogBuffer {
    capacity_bytes: usize,
    path: PathBuf,
    buffered: VecDeque<String>,
    buffered_bytes: usize,
    persisted: usize,
}

impl LogBuffer {
    pub fn new(capacity_bytes: usize, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let persisted = count_lines(&path);
        Self {
            capacity_bytes,
            path,
            buffered: VecDeque::new(),
            buffered_bytes: 0,
            persisted,
        }
    }

    pub fn append(&mut self, line: impl Into<String>) {
        let line = line.into();
        self.buffered_bytes += line.len();
        self.buffered.push_back(line);
        if self.capacity_bytes > 0 && self.buffered_bytes > self.capacity_bytes {
            let _ = self.flush_to_disk();
        }
    }

    pub fn flush_to_disk(&mut self) -> DbResult<()> {
        if self.buffered.is_empty() {
            return Ok(());
        }
        ensure_parent(&self.path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for line in &self.buffered {
            writeln!(file, "{}", line)?;
        }
        file.flush()?;
        self.persisted += self.buffered.len();
        self.buffered.clear();
        self.buffered_bytes = 0;
        Ok(())
    }

    pub fn buffered_entries(&self) -> Vec<String> {
        self.buffered.iter().cloned().collect()
    }

    pub fn persisted_entries(&self, limit: usize) -> Vec<String> {
        tail_lines(&self.path, limit)
    }

    pub fn persisted_count(&self) -> usize {
        self.persisted
    }

    pub fn describe(&self) -> String {
        format!(
            "Log buffer: {} buffered entry/entries ({} / {} bytes), {} persisted",
            self.buffered.len(),
            self.buffered_bytes,
            self.capacity_bytes,
            self.persisted
        )
    }
}

/// Keeps a bounded list of recent access plans and appends each plan line to
/// the plan log file as it is recorded.
#[derive(Debug)]
pub struct AccessPlanCache {
    capacity_bytes: usize,
    path: PathBuf,
    recent: VecDeque<String>,
    recent_bytes: usize,
    persisted: usize,
}

impl AccessPlanCache {
    pub fn new(capacity_bytes: usize, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let persisted = count_lines(&path);
        Self {
            capacity_bytes,
            path,
            recent: VecDeque::new(),
            recent_bytes: 0,
            persisted,
        }
    }

    pub fn record_plan(&mut self, plan: impl Into<String>) {
        let plan = plan.into();
        if ensure_parent(&self.path).is_ok() {
            if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&self.path) {
                if writeln!(file, "{}", plan).is_ok() {
                    self.persisted += 1;
                }
            }
        }
        self.recent_bytes += plan.len();
        self.recent.push_back(plan);
        while self.capacity_bytes > 0 && self.recent_bytes > self.capacity_bytes {
            if let Some(evicted) = self.recent.pop_front() {
                self.recent_bytes -= evicted.len();
            } else {
                break;
            }
        }
    }

    pub fn recent_plans(&self, limit: usize) -> Vec<String> {
        let all: Vec<String> = self.recent.iter().cloned().collect();
        if limit == 0 || all.len() <= limit {
            all
        } else {
            all[all.len() - limit..].to_vec()
        }
    }

    pub fn persisted_plans(&self, limit: usize) -> Vec<String> {
        tail_lines(&self.path, limit)
    }

    pub fn persisted_count(&self) -> usize {
        self.persisted
    }

    pub fn describe(&self) -> String {
        format!(
            "Access plans: {} recent ({} / {} bytes), {} persisted",
            self.recent.len(),
            self.recent_bytes,
            self.capacity_bytes,
            self.persisted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_buffer_flushes_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/operations.log");
        let mut buffer = LogBuffer::new(1024, &path);
        buffer.append("insert into users");
        buffer.append("commit");
        assert_eq!(buffer.buffered_entries().len(), 2);
        assert_eq!(buffer.persisted_count(), 0);
        buffer.flush_to_disk().unwrap();
        assert!(buffer.buffered_entries().is_empty());
        assert_eq!(buffer.persisted_count(), 2);
        assert_eq!(
            buffer.persisted_entries(1),
            vec!["commit".to_string()]
        );
    }

    #[test]
    fn log_buffer_auto_flushes_over_budget() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ops.log");
        let mut buffer = LogBuffer::new(8, &path);
        buffer.append("0123456789");
        assert!(buffer.buffered_entries().is_empty());
        assert_eq!(buffer.persisted_count(), 1);
    }

    #[test]
    fn plan_cache_bounds_recent_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plans.log");
        let mut cache = AccessPlanCache::new(30, &path);
        for i in 0..10 {
            cache.record_plan(format!("SCAN table_{i}"));
        }
        assert!(cache.recent_plans(0).len() < 10);
        assert_eq!(cache.persisted_count(), 10);
        let persisted = cache.persisted_plans(3);
        assert_eq!(persisted.last().unwrap(), "SCAN table_9");
    }

    #[test]
    fn persisted_counts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plans.log");
        {
            let mut cache = AccessPlanCache::new(100, &path);
            cache.record_plan("SCAN t");
        }
        let cache = AccessPlanCache::new(100, &path);
        assert_eq!(cache.persisted_count(), 1);
    }
}
