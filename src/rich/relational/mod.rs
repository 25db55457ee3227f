//! SQLite-backed relational index
//!
//! Writes go through the `BulkLoader`: rows are staged into flat files and
//! bulk-loaded in batches by a dedicated writer connection. Reads use a pool
//! of read-only connections; WAL mode lets them run next to a load.
//!
//! Rows staged but not yet loaded are invisible to readers until the next
//! flush.

pub mod loader;
pub mod schema;
pub mod staging;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use serde::{Deserialize, Serialize};

use crate::core::{Address, BlockDigest, BlockRecord, TransactionRecord, TxId};
use crate::rich::backend::IndexBackend;
use crate::rich::error::{IndexError, IndexResult};
use crate::rich::references::{
    BlockReference, Page, SignerReference, TxReference, UpdatedAddressReference,
};

pub use loader::{
    BulkLoader, Clock, FlushPolicy, LoadReport, ManualClock, SystemClock,
    DEFAULT_FLUSH_BLOCK_THRESHOLD, DEFAULT_FLUSH_INTERVAL,
};
pub use schema::Table;

use schema::{block_reference_from_columns, BLOCK_REFERENCE_SELECT, SCHEMA};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the relational backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationalConfig {
    /// SQLite database file
    pub database_path: PathBuf,
    /// Directory holding this instance's staging files
    pub staging_dir: PathBuf,
    /// Blocks per batch before a flush
    pub flush_block_threshold: usize,
    /// Seconds before a batch is flushed regardless of size
    pub flush_interval_secs: u64,
    /// Number of pooled read connections
    pub read_pool_size: u32,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(".rich_store/index.db"),
            staging_dir: PathBuf::from(".rich_store/staging"),
            flush_block_threshold: DEFAULT_FLUSH_BLOCK_THRESHOLD,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL.as_secs(),
            read_pool_size: 4,
        }
    }
}

impl RelationalConfig {
    /// Database and staging directory side by side under `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            database_path: dir.join("index.db"),
            staging_dir: dir.join("staging"),
            ..Self::default()
        }
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy {
            block_threshold: self.flush_block_threshold.max(1),
            interval: Duration::from_secs(self.flush_interval_secs),
        }
    }
}

/// Configure a connection with the PRAGMAs shared by writer and readers.
fn configure_connection(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;",
    )
}

// =============================================================================
// Relational Backend
// =============================================================================

pub struct RelationalBackend {
    loader: BulkLoader,
    read_pool: Pool<SqliteConnectionManager>,
}

impl RelationalBackend {
    /// Open the database, recover orphaned staging files and start collecting
    pub fn open(config: &RelationalConfig) -> IndexResult<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(config: &RelationalConfig, clock: Arc<dyn Clock>) -> IndexResult<Self> {
        if let Some(parent) = config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let writer = Connection::open(&config.database_path)?;
        configure_connection(&writer)?;
        writer.execute_batch(SCHEMA)?;

        let manager = SqliteConnectionManager::file(&config.database_path)
            .with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX)
            .with_init(|conn| conn.busy_timeout(Duration::from_secs(5)));
        let read_pool = Pool::builder()
            .max_size(config.read_pool_size.max(1))
            .build(manager)?;

        let loader = BulkLoader::open(&config.staging_dir, writer, config.flush_policy(), clock)?;
        log::info!(
            "Opened relational index at {} (staging in {})",
            config.database_path.display(),
            config.staging_dir.display()
        );

        Ok(Self { loader, read_pool })
    }

    pub fn loader(&self) -> &BulkLoader {
        &self.loader
    }

    /// Bulk-load a directory of flat files, such as one written by the export tool
    pub fn import_dir(&self, dir: &Path) -> IndexResult<LoadReport> {
        self.loader.flush()?;

        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let table = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|stem| Table::from_name(stem.rsplit('.').next().unwrap_or(stem)));
            if let Some(table) = table {
                files.push((table, path));
            }
        }
        files.sort();

        self.loader.with_writer(|conn| {
            let mut report = LoadReport::default();
            for (table, path) in &files {
                let rows = loader::load_file(conn, *table, path)?;
                log::info!("Imported {} rows into {} from {}", rows, table.name(), path.display());
                report.loaded_files += 1;
                report.rows += rows;
            }
            Ok(report)
        })
    }

    fn read_conn(&self) -> IndexResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.read_pool.get()?)
    }

    /// Run an ordered, paginated query returning string/integer triples
    fn query_triples(
        &self,
        sql: &str,
        params: Vec<Value>,
    ) -> IndexResult<Vec<(String, String, i64)>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(params_from_iter(params), |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Scan one reference table
    ///
    /// `columns` lists the filter column, the second key column and the nonce
    /// column in that order.
    fn iterate_references(
        &self,
        table: Table,
        columns: [&str; 3],
        filter: Option<String>,
        page: Page,
    ) -> IndexResult<Vec<(String, String, i64)>> {
        let [first, second, nonce] = columns;
        let direction = if page.desc { "DESC" } else { "ASC" };

        let mut params = Vec::new();
        let mut sql = format!(
            "SELECT \"{first}\", \"{second}\", \"{nonce}\" FROM \"{table}\"",
            table = table.name()
        );
        if let Some(filter) = filter {
            sql.push_str(&format!(" WHERE \"{first}\" = ?"));
            params.push(Value::Text(filter));
        }
        sql.push_str(&format!(
            " ORDER BY \"{nonce}\" {direction}, \"{first}\" {direction}, \"{second}\" {direction} LIMIT ? OFFSET ?"
        ));
        params.extend(page_params(page));

        self.query_triples(&sql, params)
    }
}

fn clamp(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn page_params(page: Page) -> [Value; 2] {
    [Value::Integer(clamp(page.limit)), Value::Integer(clamp(page.offset))]
}

impl IndexBackend for RelationalBackend {
    fn name(&self) -> &'static str {
        "relational"
    }

    fn index_block(&self, block: &BlockRecord) -> IndexResult<()> {
        self.loader.append_block(block)
    }

    fn index_transaction(&self, tx: &TransactionRecord) -> IndexResult<()> {
        self.loader.append_transaction(tx)
    }

    fn remove_block(&self, block: &BlockDigest) -> IndexResult<()> {
        // Load staged rows first so they cannot bring the block back later
        self.loader.flush()?;
        let hash = block.hash().to_hex();
        self.loader.with_writer(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM \"tx_references\" WHERE \"block_hash\" = ?",
                [&hash],
            )?;
            tx.execute("DELETE FROM \"block\" WHERE \"hash\" = ?", [&hash])?;
            tx.commit()?;
            Ok(())
        })
    }

    fn remove_transaction(&self, record: &TransactionRecord) -> IndexResult<()> {
        self.loader.flush()?;
        let tx_id = record.id.to_hex();
        self.loader.with_writer(|conn| {
            let tx = conn.transaction()?;
            for table in [
                Table::TxReferences,
                Table::SignerReferences,
                Table::UpdatedAddressReferences,
                Table::Transaction,
            ] {
                tx.execute(
                    &format!("DELETE FROM \"{}\" WHERE \"tx_id\" = ?", table.name()),
                    [&tx_id],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn iterate_tx_references(
        &self,
        tx_id: Option<TxId>,
        page: Page,
    ) -> IndexResult<Vec<TxReference>> {
        self.iterate_references(
            Table::TxReferences,
            ["tx_id", "block_hash", "tx_nonce"],
            tx_id.map(|id| id.to_hex()),
            page,
        )?
        .into_iter()
        .map(|(tx_id, block_hash, tx_nonce)| -> IndexResult<TxReference> {
            Ok(TxReference {
                tx_id: tx_id.parse()?,
                block_hash: block_hash.parse()?,
                tx_nonce,
            })
        })
        .collect()
    }

    fn iterate_signer_references(
        &self,
        signer: Option<Address>,
        page: Page,
    ) -> IndexResult<Vec<SignerReference>> {
        self.iterate_references(
            Table::SignerReferences,
            ["signer", "tx_id", "tx_nonce"],
            signer.map(|a| a.to_hex()),
            page,
        )?
        .into_iter()
        .map(|(signer, tx_id, tx_nonce)| -> IndexResult<SignerReference> {
            Ok(SignerReference {
                signer: signer.parse()?,
                tx_id: tx_id.parse()?,
                tx_nonce,
            })
        })
        .collect()
    }

    fn iterate_updated_address_references(
        &self,
        address: Option<Address>,
        page: Page,
    ) -> IndexResult<Vec<UpdatedAddressReference>> {
        self.iterate_references(
            Table::UpdatedAddressReferences,
            ["updated_address", "tx_id", "tx_nonce"],
            address.map(|a| a.to_hex()),
            page,
        )?
        .into_iter()
        .map(|(updated_address, tx_id, tx_nonce)| -> IndexResult<UpdatedAddressReference> {
            Ok(UpdatedAddressReference {
                updated_address: updated_address.parse()?,
                tx_id: tx_id.parse()?,
                tx_nonce,
            })
        })
        .collect()
    }

    fn iterate_block_references(
        &self,
        miner: Option<Address>,
        exclude_empty: bool,
        page: Page,
    ) -> IndexResult<Vec<BlockReference>> {
        let direction = if page.desc { "DESC" } else { "ASC" };
        let mut conditions = Vec::new();
        let mut params = Vec::new();
        if let Some(miner) = miner {
            conditions.push("\"miner\" = ?");
            params.push(Value::Text(miner.to_hex()));
        }
        if exclude_empty {
            conditions.push("\"tx_count\" > 0");
        }

        let mut sql = format!("SELECT {} FROM \"block\"", BLOCK_REFERENCE_SELECT);
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(&format!(
            " ORDER BY \"index\" {direction}, \"hash\" {direction} LIMIT ? OFFSET ?"
        ));
        params.extend(page_params(page));

        let conn = self.read_conn()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(hash, index, miner, tx_count)| {
                block_reference_from_columns(&hash, index, miner.as_deref(), tx_count)
                    .map_err(IndexError::from)
            })
            .collect()
    }

    fn flush(&self) -> IndexResult<()> {
        self.loader.flush()?;
        Ok(())
    }

    fn staged_bytes(&self) -> u64 {
        self.loader.staged_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::HashDigest;

    fn open_temp(clock: Arc<dyn Clock>) -> (tempfile::TempDir, RelationalBackend) {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = RelationalConfig::in_dir(temp_dir.path());
        let backend = RelationalBackend::open_with_clock(&config, clock).unwrap();
        (temp_dir, backend)
    }

    fn make_tx(id: u8, signer: u8, nonce: i64, updated: &[u8]) -> TransactionRecord {
        let mut builder =
            TransactionRecord::builder(TxId::new([id; 32]), Address::new([signer; 20]), nonce);
        for a in updated {
            builder = builder.updates(Address::new([*a; 20]));
        }
        builder.build()
    }

    fn make_block(index: i64, txs: Vec<TransactionRecord>) -> BlockRecord {
        BlockRecord::new(index, HashDigest::new([index as u8; 32]), None, txs)
    }

    #[test]
    fn test_rows_visible_after_flush() {
        let (_dir, backend) = open_temp(Arc::new(ManualClock::new()));
        backend
            .index_block(&make_block(1, vec![make_tx(1, 1, 0, &[2, 3])]))
            .unwrap();

        assert!(backend
            .iterate_tx_references(None, Page::ascending())
            .unwrap()
            .is_empty());

        backend.flush().unwrap();
        assert_eq!(backend.iterate_tx_references(None, Page::ascending()).unwrap().len(), 1);
        assert_eq!(
            backend
                .iterate_updated_address_references(None, Page::ascending())
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn test_nonce_pagination_both_directions() {
        let (_dir, backend) = open_temp(Arc::new(ManualClock::new()));
        let signer = Address::new([1; 20]);
        for nonce in 0..10 {
            backend
                .index_block(&make_block(nonce, vec![make_tx(nonce as u8 + 100, 1, nonce, &[])]))
                .unwrap();
        }
        backend
            .index_block(&make_block(60, vec![make_tx(200, 2, 4, &[])]))
            .unwrap();
        backend.flush().unwrap();

        let asc = backend
            .iterate_signer_references(Some(signer), Page::new(false, 2, 3))
            .unwrap();
        assert_eq!(asc.iter().map(|r| r.tx_nonce).collect::<Vec<_>>(), vec![2, 3, 4]);

        let desc = backend
            .iterate_signer_references(Some(signer), Page::new(true, 2, 3))
            .unwrap();
        assert_eq!(desc.iter().map(|r| r.tx_nonce).collect::<Vec<_>>(), vec![7, 6, 5]);

        assert!(backend
            .iterate_signer_references(Some(signer), Page::ascending().with_offset(10))
            .unwrap()
            .is_empty());
        assert_eq!(
            backend
                .iterate_signer_references(None, Page::ascending())
                .unwrap()
                .len(),
            11
        );
    }

    #[test]
    fn test_remove_block_keeps_moved_references() {
        let (_dir, backend) = open_temp(Arc::new(ManualClock::new()));
        let tx = make_tx(1, 1, 0, &[]);
        let first = make_block(1, vec![tx.clone()]);
        let second = make_block(2, vec![tx.clone()]);
        backend.index_block(&first).unwrap();
        backend.index_block(&second).unwrap();

        // Removal flushes the staged rows before deleting
        backend.remove_block(&first.to_digest()).unwrap();

        let refs = backend.iterate_tx_references(Some(tx.id), Page::ascending()).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].block_hash, second.hash());
        let blocks = backend
            .iterate_block_references(None, false, Page::ascending())
            .unwrap();
        assert_eq!(blocks.iter().map(|b| b.index).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_remove_transaction_cascades() {
        let (_dir, backend) = open_temp(Arc::new(ManualClock::new()));
        let tx = make_tx(1, 1, 0, &[4]);
        backend.index_block(&make_block(1, vec![tx.clone()])).unwrap();

        backend.remove_transaction(&tx).unwrap();
        assert!(backend.iterate_tx_references(None, Page::ascending()).unwrap().is_empty());
        assert!(backend.iterate_signer_references(None, Page::ascending()).unwrap().is_empty());
        assert!(backend
            .iterate_updated_address_references(None, Page::ascending())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_block_listing_filters() {
        let (_dir, backend) = open_temp(Arc::new(ManualClock::new()));
        let miner = Address::new([9; 20]);
        backend.index_block(&make_block(0, vec![]).with_miner(miner)).unwrap();
        backend
            .index_block(&make_block(1, vec![make_tx(1, 1, 0, &[])]).with_miner(miner))
            .unwrap();
        backend.index_block(&make_block(2, vec![make_tx(2, 1, 1, &[])])).unwrap();
        backend.flush().unwrap();

        let by_miner = backend
            .iterate_block_references(Some(miner), false, Page::descending())
            .unwrap();
        assert_eq!(by_miner.iter().map(|b| b.index).collect::<Vec<_>>(), vec![1, 0]);

        let non_empty = backend
            .iterate_block_references(None, true, Page::ascending())
            .unwrap();
        assert_eq!(non_empty.iter().map(|b| b.index).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(non_empty[0].miner, Some(miner));
    }

    #[test]
    fn test_drop_loads_pending_rows() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = RelationalConfig::in_dir(temp_dir.path());
        {
            let backend = RelationalBackend::open(&config).unwrap();
            backend
                .index_block(&make_block(1, vec![make_tx(1, 1, 0, &[])]))
                .unwrap();
        }

        let backend = RelationalBackend::open(&config).unwrap();
        assert_eq!(
            backend
                .iterate_tx_references(None, Page::ascending())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_short_hash_orphan_does_not_break_reads() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = RelationalConfig::in_dir(temp_dir.path());
        fs::create_dir_all(&config.staging_dir).unwrap();
        fs::write(config.staging_dir.join("x.tx_references.tmp"), "00;00;1\n").unwrap();

        let backend = RelationalBackend::open(&config).unwrap();
        assert!(config.staging_dir.join("x.tx_references.corrupt").exists());
        assert!(backend
            .iterate_tx_references(None, Page::ascending())
            .unwrap()
            .is_empty());
    }
}
