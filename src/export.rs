//! Flat-file export
//!
//! Walks a primary store and writes the five bulk-load files
//! (`block.csv`, `transaction.csv`, `tx_references.csv`,
//! `signer_references.csv`, `updated_address_references.csv`) in the same
//! line format the relational backend stages. The output can be loaded into
//! a fresh backend with `RelationalBackend::import_dir`.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::{BlockRecord, TransactionRecord};
use crate::rich::relational::schema::index_lines;
use crate::rich::{IndexRows, Table};
use crate::storage::{Store, StoreError, StoreResult};

pub const EXPORT_EXTENSION: &str = "csv";

/// Summary of an export run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub blocks: usize,
    pub transactions: usize,
    pub files: Vec<PathBuf>,
}

/// Path of a table's export file inside `dir`
pub fn export_path(dir: &Path, table: Table) -> PathBuf {
    dir.join(format!("{}.{}", table.name(), EXPORT_EXTENSION))
}

/// Export every block of `store` into `dir`, ordered by block index
///
/// A transaction carried by several blocks is written once per block.
pub fn export_store<S: Store + ?Sized>(
    store: &S,
    dir: &Path,
    header: bool,
) -> StoreResult<ExportReport> {
    if store.count_blocks()? == 0 {
        return Err(StoreError::InvalidData("store has no blocks".to_string()));
    }
    fs::create_dir_all(dir)?;

    let mut writers = HashMap::new();
    let mut report = ExportReport::default();
    for table in Table::LOAD_ORDER {
        let path = export_path(dir, table);
        let mut writer = BufWriter::new(File::create(&path)?);
        if header {
            writeln!(writer, "{}", table.header())?;
        }
        writers.insert(table, writer);
        report.files.push(path);
    }

    let mut hashes = Vec::new();
    for hash in store.iterate_block_hashes()? {
        if let Some(index) = store.get_block_index(hash)? {
            hashes.push((index, hash));
        }
    }
    hashes.sort();

    let total = hashes.len();
    for (i, (_, hash)) in hashes.into_iter().enumerate() {
        let block: BlockRecord = match store.get_block(hash)? {
            Some(block) => block,
            None => continue,
        };

        let rows = IndexRows::from_block(&block);
        let txs: Vec<&TransactionRecord> = block.transactions.iter().collect();
        for (table, line) in index_lines(Some(&block), &txs, &rows) {
            if let Some(writer) = writers.get_mut(&table) {
                writeln!(writer, "{}", line)?;
            }
        }

        report.blocks += 1;
        report.transactions += txs.len();
        if (i + 1) % 1000 == 0 {
            log::info!("Export progress: {}/{} blocks", i + 1, total);
        }
    }

    for writer in writers.values_mut() {
        writer.flush()?;
    }

    log::info!(
        "Exported {} blocks and {} transactions to {}",
        report.blocks,
        report.transactions,
        dir.display()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Address, HashDigest, TxId};
    use crate::rich::{IndexBackend, Page, RelationalBackend, RelationalConfig};
    use crate::storage::MemoryStore;

    fn populated_store() -> MemoryStore {
        let store = MemoryStore::new();
        for i in 0..3u8 {
            let tx = TransactionRecord::builder(TxId::new([i; 32]), Address::new([1; 20]), i as i64)
                .updates(Address::new([2; 20]))
                .updates(Address::new([3; 20]))
                .build();
            let block = BlockRecord::new(i as i64, HashDigest::new([i; 32]), None, vec![tx]);
            store.put_block(&block).unwrap();
        }
        store
    }

    #[test]
    fn test_export_writes_five_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let report = export_store(&populated_store(), temp_dir.path(), true).unwrap();

        assert_eq!(report.blocks, 3);
        assert_eq!(report.transactions, 3);
        assert_eq!(report.files.len(), 5);

        let blocks = fs::read_to_string(export_path(temp_dir.path(), Table::Block)).unwrap();
        let lines: Vec<&str> = blocks.lines().collect();
        assert_eq!(lines[0], Table::Block.header());
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("0;"));
        assert!(lines[3].starts_with("2;"));

        let addresses = fs::read_to_string(export_path(
            temp_dir.path(),
            Table::UpdatedAddressReferences,
        ))
        .unwrap();
        assert_eq!(addresses.lines().count(), 7);
    }

    #[test]
    fn test_empty_store_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(export_store(&MemoryStore::new(), temp_dir.path(), false).is_err());
    }

    #[test]
    fn test_export_then_import() {
        let temp_dir = tempfile::tempdir().unwrap();
        let out = temp_dir.path().join("export");
        export_store(&populated_store(), &out, true).unwrap();

        let backend =
            RelationalBackend::open(&RelationalConfig::in_dir(temp_dir.path().join("db"))).unwrap();
        let report = backend.import_dir(&out).unwrap();
        assert_eq!(report.loaded_files, 5);
        // 3 blocks, 3 transactions, 3 tx refs, 3 signer refs, 6 address refs
        assert_eq!(report.rows, 18);

        let refs = backend
            .iterate_tx_references(None, Page::descending())
            .unwrap();
        assert_eq!(refs.iter().map(|r| r.tx_nonce).collect::<Vec<_>>(), vec![2, 1, 0]);
    }
}
