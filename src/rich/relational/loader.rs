//! Batched bulk loader
//!
//! Rows are appended to a staging batch while collecting. After each call the
//! loader checks two thresholds:
//! - the number of blocks appended since the last flush
//! - the time elapsed since the last flush
//!
//! When either is reached the batch is swapped for a fresh one under the
//! state lock, and the sealed files are bulk-loaded outside it through the
//! writer connection. Loads are upserts, so loading a file twice is harmless.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rusqlite::{params_from_iter, Connection};

use crate::core::{BlockRecord, TransactionRecord};
use crate::rich::error::{IndexError, IndexResult};
use crate::rich::references::IndexRows;
use crate::rich::relational::schema::{index_lines, Table};
use crate::rich::relational::staging::{quarantine, scan_orphans, StagingBatch};

// =============================================================================
// Clock
// =============================================================================

/// Time source for the flush interval
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

// =============================================================================
// Flush Policy
// =============================================================================

pub const DEFAULT_FLUSH_BLOCK_THRESHOLD: usize = 50;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Blocks per batch
    pub block_threshold: usize,
    /// Maximum age of a batch
    pub interval: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            block_threshold: DEFAULT_FLUSH_BLOCK_THRESHOLD,
            interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Outcome of loading a set of staging files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Files loaded and deleted
    pub loaded_files: usize,
    /// Rows upserted
    pub rows: usize,
    /// Files left in place after a backend failure
    pub failed_files: Vec<PathBuf>,
    /// Files renamed to `*.corrupt`
    pub corrupt_files: Vec<PathBuf>,
}

// =============================================================================
// Bulk Loader
// =============================================================================

struct Collecting {
    batch: StagingBatch,
    blocks: usize,
    since: Instant,
}

pub struct BulkLoader {
    staging_dir: PathBuf,
    policy: FlushPolicy,
    clock: Arc<dyn Clock>,
    state: Mutex<Option<Collecting>>,
    writer: Mutex<Connection>,
}

impl BulkLoader {
    /// Recover orphans left in `staging_dir`, then start collecting
    pub fn open(
        staging_dir: impl AsRef<Path>,
        writer: Connection,
        policy: FlushPolicy,
        clock: Arc<dyn Clock>,
    ) -> IndexResult<Self> {
        let staging_dir = staging_dir.as_ref().to_path_buf();
        fs::create_dir_all(&staging_dir)?;

        let loader = Self {
            staging_dir,
            policy,
            clock,
            state: Mutex::new(None),
            writer: Mutex::new(writer),
        };

        let report = loader.recover()?;
        if report.loaded_files > 0
            || !report.corrupt_files.is_empty()
            || !report.failed_files.is_empty()
        {
            log::info!(
                "Recovered {} staging files ({} rows, {} corrupt, {} failed)",
                report.loaded_files,
                report.rows,
                report.corrupt_files.len(),
                report.failed_files.len()
            );
        }

        *loader.state.lock() = Some(loader.fresh_state()?);
        Ok(loader)
    }

    fn fresh_state(&self) -> IndexResult<Collecting> {
        Ok(Collecting {
            batch: StagingBatch::create(&self.staging_dir)?,
            blocks: 0,
            since: self.clock.now(),
        })
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    /// Blocks appended since the last flush
    pub fn pending_blocks(&self) -> usize {
        self.state.lock().as_ref().map_or(0, |s| s.blocks)
    }

    /// Bytes staged since the last flush
    pub fn staged_bytes(&self) -> u64 {
        self.state.lock().as_ref().map_or(0, |s| s.batch.bytes())
    }

    /// Run `f` with the writer connection, serialized with loads
    pub fn with_writer<T>(&self, f: impl FnOnce(&mut Connection) -> IndexResult<T>) -> IndexResult<T> {
        let mut conn = self.writer.lock();
        f(&mut *conn)
    }

    /// Stage the rows of a block and its transactions
    pub fn append_block(&self, block: &BlockRecord) -> IndexResult<()> {
        let rows = IndexRows::from_block(block);
        let txs: Vec<&TransactionRecord> = block.transactions.iter().collect();
        self.append(index_lines(Some(block), &txs, &rows), 1)
    }

    /// Stage the rows of a transaction outside any block
    pub fn append_transaction(&self, tx: &TransactionRecord) -> IndexResult<()> {
        let rows = IndexRows::from_transaction(tx);
        self.append(index_lines(None, &[tx], &rows), 0)
    }

    fn append(&self, lines: Vec<(Table, String)>, blocks: usize) -> IndexResult<()> {
        let sealed = {
            let mut guard = self.state.lock();
            let state = match guard.as_mut() {
                Some(state) => state,
                None => {
                    return Err(IndexError::BackendUnavailable(
                        "bulk loader is closed".to_string(),
                    ))
                }
            };

            for (table, line) in &lines {
                state.batch.append(*table, line)?;
            }
            state.blocks += blocks;

            if self.should_flush(state) {
                self.swap(&mut guard)?
            } else {
                None
            }
        };

        if let Some(files) = sealed {
            self.load(files);
        }
        Ok(())
    }

    fn should_flush(&self, state: &Collecting) -> bool {
        state.blocks >= self.policy.block_threshold
            || self.clock.now().saturating_duration_since(state.since) >= self.policy.interval
    }

    /// Replace the current batch with a fresh one and seal the old one
    fn swap(&self, guard: &mut Option<Collecting>) -> IndexResult<Option<Vec<(Table, PathBuf)>>> {
        let fresh = self.fresh_state()?;
        match guard.replace(fresh) {
            Some(old) => {
                log::debug!(
                    "Flushing staging batch: {} blocks, {} rows, {} bytes",
                    old.blocks,
                    old.batch.rows(),
                    old.batch.bytes()
                );
                Ok(Some(old.batch.seal()?))
            }
            None => Ok(None),
        }
    }

    /// Load everything staged so far regardless of thresholds
    pub fn flush(&self) -> IndexResult<LoadReport> {
        let sealed = {
            let mut guard = self.state.lock();
            let empty = match guard.as_ref() {
                Some(state) => state.batch.rows() == 0,
                None => return Ok(LoadReport::default()),
            };
            if empty {
                if let Some(state) = guard.as_mut() {
                    state.since = self.clock.now();
                    state.blocks = 0;
                }
                None
            } else {
                self.swap(&mut guard)?
            }
        };

        Ok(sealed.map(|files| self.load(files)).unwrap_or_default())
    }

    /// Flush and stop accepting rows
    pub fn close(&self) -> IndexResult<LoadReport> {
        let report = self.flush()?;
        if let Some(state) = self.state.lock().take() {
            state.batch.discard()?;
        }
        Ok(report)
    }

    /// Load sealed files in order; a failing table does not stop the rest
    fn load(&self, files: Vec<(Table, PathBuf)>) -> LoadReport {
        let mut conn = self.writer.lock();
        let mut report = LoadReport::default();
        for (table, path) in files {
            match load_file(&mut conn, table, &path) {
                Ok(rows) => {
                    report.rows += rows;
                    report.loaded_files += 1;
                    if let Err(e) = fs::remove_file(&path) {
                        log::warn!("Failed to delete loaded staging file {}: {}", path.display(), e);
                    }
                }
                Err(e) => {
                    log::error!("Failed to load {} from {}: {}", table.name(), path.display(), e);
                    report.failed_files.push(path);
                }
            }
        }
        log::debug!("Loaded {} rows from {} files", report.rows, report.loaded_files);
        report
    }

    /// Best-effort load of every orphaned staging file
    pub fn recover(&self) -> IndexResult<LoadReport> {
        // The open batch lives in the same directory
        if self.state.lock().is_some() {
            return Err(IndexError::BackendUnavailable(
                "recovery must run before collecting starts".to_string(),
            ));
        }
        let orphans = scan_orphans(&self.staging_dir)?;

        let mut report = LoadReport::default();
        let mut conn = self.writer.lock();
        for (table, path) in orphans {
            let table = match table {
                Some(table) => table,
                None => {
                    log::warn!("Unrecognised staging file {}", path.display());
                    set_aside(&mut report, path);
                    continue;
                }
            };

            match load_file(&mut conn, table, &path) {
                Ok(rows) => {
                    report.rows += rows;
                    match fs::remove_file(&path) {
                        Ok(()) => report.loaded_files += 1,
                        Err(e) => {
                            log::error!(
                                "Loaded {} but failed to delete it: {}",
                                path.display(),
                                e
                            );
                            report.failed_files.push(path);
                        }
                    }
                }
                Err(e @ IndexError::MalformedStagingFile { .. }) => {
                    log::warn!("Skipping corrupt staging file: {}", e);
                    set_aside(&mut report, path);
                }
                Err(e) => {
                    log::error!("Failed to recover {}: {}", path.display(), e);
                    report.failed_files.push(path);
                }
            }
        }
        Ok(report)
    }
}

/// Quarantine a bad orphan, or leave it in place if it cannot be renamed
fn set_aside(report: &mut LoadReport, path: PathBuf) {
    match quarantine(&path) {
        Ok(target) => report.corrupt_files.push(target),
        Err(e) => {
            log::error!("Failed to quarantine {}: {}", path.display(), e);
            report.failed_files.push(path);
        }
    }
}

impl Drop for BulkLoader {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to flush staging batch on shutdown: {}", e);
        }
    }
}

/// Upsert every line of a staging file into its table in one transaction
///
/// A first line equal to the table's header row is skipped.
pub fn load_file(conn: &mut Connection, table: Table, path: &Path) -> IndexResult<usize> {
    let content = fs::read_to_string(path)?;
    let header = table.header();

    let tx = conn.transaction()?;
    let mut rows = 0;
    {
        let mut stmt = tx.prepare_cached(&table.upsert_sql())?;
        for (i, line) in content.lines().enumerate() {
            if line.is_empty() || (i == 0 && line == header) {
                continue;
            }
            let values = table
                .parse_line(line)
                .map_err(|reason| IndexError::MalformedStagingFile {
                    path: path.to_path_buf(),
                    line: i + 1,
                    reason,
                })?;
            stmt.execute(params_from_iter(values))?;
            rows += 1;
        }
    }
    tx.commit()?;
    Ok(rows)
}
