//! CLI commands for the rich store
//!
//! Implements the command handlers behind the `rich-store` binary.

use std::path::Path;

use crate::config::{BackendConfig, RichStoreConfig};
use crate::core::Address;
use crate::export::export_store;
use crate::rich::{Explorer, RelationalBackend, RelationalConfig, RichStore};
use crate::storage::load_from_file;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Which index a transaction listing walks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFilter {
    Signer(Address),
    Involved(Address),
}

/// Export a store snapshot into bulk-load files
pub fn cmd_export(store_file: &Path, out_dir: &Path, header: bool) -> CliResult<()> {
    let store = load_from_file(store_file)?;
    println!("📦 Exporting {} ...", store_file.display());

    let report = export_store(&store, out_dir, header)?;

    println!("✅ Export complete!");
    println!("   ├─ Blocks: {}", report.blocks);
    println!("   ├─ Transactions: {}", report.transactions);
    println!("   └─ Output: {}", out_dir.display());
    Ok(())
}

/// Bulk-load a directory of exported files into a relational index
pub fn cmd_import(dir: &Path, database: &Path, staging_dir: &Path) -> CliResult<()> {
    let config = RelationalConfig {
        database_path: database.to_path_buf(),
        staging_dir: staging_dir.to_path_buf(),
        ..RelationalConfig::default()
    };
    let backend = RelationalBackend::open(&config)?;

    println!("📥 Importing {} ...", dir.display());
    let report = backend.import_dir(dir)?;

    println!("✅ Import complete!");
    println!("   ├─ Files: {}", report.loaded_files);
    println!("   └─ Rows: {}", report.rows);
    Ok(())
}

/// List indexed transactions of the store named in the config
pub fn cmd_transactions(
    config_file: &Path,
    store_file: &Path,
    filter: Option<AddressFilter>,
    desc: bool,
    offset: i64,
    limit: Option<usize>,
) -> CliResult<()> {
    let config = RichStoreConfig::load(config_file)?;
    let store = RichStore::from_config(load_from_file(store_file)?, &config)?;
    let explorer = Explorer::new(&store);

    let (signer, involved) = match filter {
        Some(AddressFilter::Signer(a)) => (Some(a), None),
        Some(AddressFilter::Involved(a)) => (None, Some(a)),
        None => (None, None),
    };
    let txs = explorer.list_transactions(signer, involved, desc, offset, limit)?;

    if txs.is_empty() {
        println!("📭 No transactions found");
        return Ok(());
    }

    println!("📜 {} transaction(s):", txs.len());
    for tx in &txs {
        let block = store
            .containing_block(tx.id)?
            .map(|h| h.to_hex())
            .unwrap_or_else(|| "-".to_string());
        println!("   ├─ {} nonce {} signer {}", tx.id, tx.nonce, tx.signer);
        println!("   │  └─ block {}", block);
    }
    Ok(())
}

/// List indexed blocks of the store named in the config
pub fn cmd_blocks(
    config_file: &Path,
    store_file: &Path,
    miner: Option<Address>,
    exclude_empty: bool,
    desc: bool,
    offset: i64,
    limit: Option<usize>,
) -> CliResult<()> {
    let config = RichStoreConfig::load(config_file)?;
    let store = RichStore::from_config(load_from_file(store_file)?, &config)?;
    let explorer = Explorer::new(&store);

    let blocks = explorer.list_blocks(desc, offset, limit, exclude_empty, miner)?;
    if blocks.is_empty() {
        println!("📭 No blocks found");
        return Ok(());
    }

    println!("🧱 {} block(s):", blocks.len());
    for block in &blocks {
        println!(
            "   ├─ #{} {} ({} txs)",
            block.index(),
            block.hash(),
            block.transactions.len()
        );
    }
    Ok(())
}

/// Open the configured relational index, which loads any orphaned staging files
pub fn cmd_recover(config_file: &Path) -> CliResult<()> {
    let config = RichStoreConfig::load(config_file)?;
    let relational = match &config.backend {
        BackendConfig::Relational(relational) => relational,
        BackendConfig::Document(_) => {
            println!("ℹ️  Document backend writes synchronously; nothing to recover");
            return Ok(());
        }
    };

    println!("🔄 Recovering staging files in {} ...", relational.staging_dir.display());
    let backend = RelationalBackend::open(relational)?;
    backend.loader().close()?;
    println!("✅ Recovery complete!");
    Ok(())
}
