use super::entry::LogEntry;
use super::reader::LogFileReader;
use super::scanner;
use super::{LOG_FILE, LOG_FILE_OLD, MAX_SEARCH_ENTRIES};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use warden_dns_application::ports::{
    QueryLogRecord, QueryLogStore, SearchCriteria, SearchResult,
};
use warden_dns_domain::{QueryLogConfig, WardenError};

const DEFAULT_SEARCH_LIMIT: usize = 100;

struct Inner {
    conf: QueryLogConfig,
    dir: PathBuf,
    /// Memory ring. Appenders hold this lock only for the push.
    buffer: Mutex<Vec<LogEntry>>,
    /// True while a background flush task is running; appenders that
    /// arrive meanwhile keep appending and never spawn a second one.
    flush_pending: AtomicBool,
    /// Serializes file append, rotation and clearing.
    file_lock: tokio::sync::Mutex<()>,
}

impl Inner {
    fn current_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    fn old_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE_OLD)
    }
}

/// Append-only query log with an in-memory ring, a rotating JSON-lines
/// file, and interactive search.
#[derive(Clone)]
pub struct QueryLog {
    inner: Arc<Inner>,
}

impl QueryLog {
    pub fn new(dir: impl Into<PathBuf>, conf: QueryLogConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                conf,
                dir: dir.into(),
                buffer: Mutex::new(Vec::new()),
                flush_pending: AtomicBool::new(false),
                file_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    async fn flush_inner(inner: &Inner) -> Result<(), WardenError> {
        let entries: Vec<LogEntry> = {
            let mut buffer = inner.buffer.lock().unwrap();
            std::mem::take(&mut *buffer)
        };
        if entries.is_empty() {
            return Ok(());
        }

        let mut out = String::with_capacity(entries.len() * 256);
        for entry in &entries {
            match serde_json::to_string(entry) {
                Ok(line) => {
                    out.push_str(&line);
                    out.push('\n');
                }
                Err(e) => warn!(error = %e, "Dropping unserializable log entry"),
            }
        }

        let _guard = inner.file_lock.lock().await;
        let result = tokio::task::block_in_place(|| -> std::io::Result<()> {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(inner.current_path())?;
            file.write_all(out.as_bytes())
        });

        match result {
            Ok(()) => {
                debug!(entries = entries.len(), "Query log flushed");
                Ok(())
            }
            Err(e) => {
                // Keep the entries in memory up to the cap; oldest go first.
                let mut buffer = inner.buffer.lock().unwrap();
                let mut restored = entries;
                restored.append(&mut buffer);
                let cap = inner.conf.mem_size.max(1);
                if restored.len() > cap {
                    let excess = restored.len() - cap;
                    restored.drain(0..excess);
                }
                *buffer = restored;
                Err(WardenError::QueryLogError(format!("flush failed: {}", e)))
            }
        }
    }

    fn schedule_flush(&self) {
        if self
            .inner
            .flush_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(e) = Self::flush_inner(&inner).await {
                warn!(error = %e, "Background query log flush failed");
            }
            inner.flush_pending.store(false, Ordering::Release);
        });
    }

    /// Scan one file backward applying `criteria`; shared by both
    /// generations. Returns `false` when the caller should stop paging.
    fn search_file(
        path: &Path,
        criteria: &SearchCriteria,
        limit: usize,
        results: &mut Vec<QueryLogRecord>,
        scanned: &mut usize,
        oldest_visited: &mut Option<i64>,
        truncated: &mut bool,
    ) -> Result<bool, WardenError> {
        let Some(mut reader) = LogFileReader::open(path)? else {
            return Ok(true);
        };

        // With a cursor set, binary-search to the cut and scan backward
        // from there instead of from EOF.
        let end = match criteria.older_than {
            Some(older_than) => {
                let target_ns = older_than.timestamp_nanos_opt().unwrap_or(i64::MAX);
                reader.seek_to_time(target_ns)?
            }
            None => reader.len(),
        };

        let mut keep_going = true;
        reader.for_each_line_backward(end, |_, line| {
            *scanned += 1;
            if *scanned > MAX_SEARCH_ENTRIES {
                *truncated = true;
                keep_going = false;
                return false;
            }
            if let Some(ts) = scanner::line_timestamp_ns(line) {
                *oldest_visited = Some(match oldest_visited {
                    Some(prev) => (*prev).min(ts),
                    None => ts,
                });
            }
            if !scanner::quick_matches(line, criteria) {
                return true;
            }
            // Prefilter survivor: full decode and strict re-check.
            if let Ok(entry) = serde_json::from_str::<LogEntry>(line) {
                if let Some(record) = entry.to_record() {
                    if criteria.matches(&record) {
                        results.push(record);
                        if results.len() >= limit {
                            keep_going = false;
                            return false;
                        }
                    }
                }
            }
            true
        })?;

        Ok(keep_going)
    }
}

#[async_trait]
impl QueryLogStore for QueryLog {
    fn append(&self, record: QueryLogRecord) {
        if !self.inner.conf.enabled {
            return;
        }
        let entry = LogEntry::from_record(&record, self.inner.conf.anonymize_client_ip);

        let should_flush = {
            let mut buffer = self.inner.buffer.lock().unwrap();
            buffer.push(entry);
            if !self.inner.conf.file_enabled {
                // Pure ring mode: drop oldest beyond the cap.
                let cap = self.inner.conf.mem_size.max(1);
                if buffer.len() > cap {
                    let excess = buffer.len() - cap;
                    buffer.drain(0..excess);
                }
                false
            } else {
                buffer.len() >= self.inner.conf.mem_size.max(1)
            }
        };

        if should_flush {
            self.schedule_flush();
        }
    }

    async fn search(&self, criteria: SearchCriteria) -> Result<SearchResult, WardenError> {
        let limit = if criteria.limit == 0 {
            DEFAULT_SEARCH_LIMIT
        } else {
            criteria.limit
        };

        let mut results: Vec<QueryLogRecord> = Vec::new();
        let mut scanned = 0usize;
        let mut oldest_visited: Option<i64> = None;
        let mut truncated = false;

        // Memory ring first: it holds the newest entries.
        let snapshot: Vec<LogEntry> = {
            let buffer = self.inner.buffer.lock().unwrap();
            buffer.clone()
        };
        for entry in snapshot.iter().rev() {
            if results.len() >= limit || scanned >= MAX_SEARCH_ENTRIES {
                break;
            }
            scanned += 1;
            if let Some(ts) = entry.timestamp_ns() {
                oldest_visited = Some(match oldest_visited {
                    Some(prev) => prev.min(ts),
                    None => ts,
                });
            }
            if let Some(record) = entry.to_record() {
                if criteria.matches(&record) {
                    results.push(record);
                }
            }
        }

        if scanned >= MAX_SEARCH_ENTRIES {
            truncated = true;
        }

        // Then both file generations, newest first, off the async runtime.
        if results.len() < limit && !truncated {
            let inner = Arc::clone(&self.inner);
            let criteria_files = criteria.clone();
            let remaining = limit - results.len();
            let mut scanned_so_far = scanned;
            let mut oldest_so_far = oldest_visited;
            let _guard = self.inner.file_lock.lock().await;
            let outcome = tokio::task::spawn_blocking(move || {
                let mut file_results = Vec::new();
                let mut file_truncated = false;
                for path in [inner.current_path(), inner.old_path()] {
                    let keep_going = Self::search_file(
                        &path,
                        &criteria_files,
                        remaining,
                        &mut file_results,
                        &mut scanned_so_far,
                        &mut oldest_so_far,
                        &mut file_truncated,
                    )?;
                    if !keep_going {
                        break;
                    }
                }
                Ok::<_, WardenError>((file_results, oldest_so_far, file_truncated))
            })
            .await
            .map_err(|e| WardenError::QueryLogError(e.to_string()))?;

            let (file_results, file_oldest, file_truncated) = outcome?;
            results.extend(file_results);
            oldest_visited = file_oldest;
            truncated = file_truncated;
        }

        let oldest = if truncated && results.len() < limit {
            oldest_visited.map(DateTime::from_timestamp_nanos)
        } else {
            None
        };

        Ok(SearchResult {
            entries: results,
            oldest,
        })
    }

    async fn flush(&self) -> Result<(), WardenError> {
        Self::flush_inner(&self.inner).await
    }

    async fn rotate(&self) -> Result<(), WardenError> {
        let _guard = self.inner.file_lock.lock().await;
        let current = self.inner.current_path();
        let old = self.inner.old_path();
        let retention = ChronoDuration::days(i64::from(self.inner.conf.retention.as_days()));

        let first_ts = tokio::task::block_in_place(|| -> Result<Option<i64>, WardenError> {
            let Some(mut reader) = LogFileReader::open(&current)? else {
                return Ok(None);
            };
            let Some(line) = reader.first_line()? else {
                return Ok(None);
            };
            Ok(scanner::line_timestamp_ns(&line))
        })?;

        let Some(first_ts) = first_ts else {
            return Ok(());
        };
        let first_time = DateTime::<Utc>::from_timestamp_nanos(first_ts);
        if Utc::now() - first_time <= retention {
            return Ok(());
        }

        // Rename is atomic for readers: they see either generation, never
        // a half-moved file.
        std::fs::rename(&current, &old)?;
        info!(rotated = %current.display(), "Query log rotated");
        Ok(())
    }

    async fn clear(&self) -> Result<(), WardenError> {
        let _guard = self.inner.file_lock.lock().await;
        for path in [self.inner.current_path(), self.inner.old_path()] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.inner.buffer.lock().unwrap().clear();
        info!("Query log cleared");
        Ok(())
    }
}
