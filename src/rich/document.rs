//! RocksDB-backed document index.
//!
//! Column families:
//! - `tx_refs`                    tx references keyed by `<nonce><tx_id>`
//! - `tx_refs_by_id`              tx references keyed by `<tx_id>`
//! - `signer_refs`                signer references keyed by `<signer><nonce><tx_id>`
//! - `signer_refs_by_nonce`       signer references keyed by `<nonce><signer><tx_id>`
//! - `updated_address_refs`       address references keyed by `<address><nonce><tx_id>`
//! - `updated_address_refs_by_nonce` address references keyed by `<nonce><address><tx_id>`
//! - `block_refs`                 block rows keyed by `<index><hash>`
//! - `block_refs_by_miner`        block rows keyed by `<miner><index><hash>`
//!
//! Every value is the JSON document of the row, so each family can answer a
//! scan on its own. Numbers are stored big-endian with the sign bit flipped,
//! which makes byte order equal numeric order; a filtered scan is a prefix
//! scan and a descending scan walks the same prefix backwards.

use std::path::PathBuf;

use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompressionType, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::{Address, BlockDigest, BlockRecord, TransactionRecord, TxId};
use crate::rich::backend::IndexBackend;
use crate::rich::error::{IndexError, IndexResult};
use crate::rich::references::{
    BlockReference, IndexRows, Page, SignerReference, TxReference, UpdatedAddressReference,
};

const CF_TX_REFS: &str = "tx_refs";
const CF_TX_REFS_BY_ID: &str = "tx_refs_by_id";
const CF_SIGNER_REFS: &str = "signer_refs";
const CF_SIGNER_REFS_BY_NONCE: &str = "signer_refs_by_nonce";
const CF_ADDRESS_REFS: &str = "updated_address_refs";
const CF_ADDRESS_REFS_BY_NONCE: &str = "updated_address_refs_by_nonce";
const CF_BLOCK_REFS: &str = "block_refs";
const CF_BLOCK_REFS_BY_MINER: &str = "block_refs_by_miner";

const COLUMN_FAMILIES: &[&str] = &[
    CF_TX_REFS,
    CF_TX_REFS_BY_ID,
    CF_SIGNER_REFS,
    CF_SIGNER_REFS_BY_NONCE,
    CF_ADDRESS_REFS,
    CF_ADDRESS_REFS_BY_NONCE,
    CF_BLOCK_REFS,
    CF_BLOCK_REFS_BY_MINER,
];

/// Longer than any key, used as the upper bound of a reverse prefix scan.
const KEY_SUFFIX_MAX: [u8; 64] = [0xff; 64];

/// Configuration for the document backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// Database directory.
    pub path: PathBuf,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".rich_store/index"),
        }
    }
}

/// Encode a signed ordering key so that byte order matches numeric order.
fn ordered(n: i64) -> [u8; 8] {
    ((n as u64) ^ (1 << 63)).to_be_bytes()
}

fn key(parts: &[&[u8]]) -> Vec<u8> {
    parts.concat()
}

/// Index backend that upserts rows synchronously into RocksDB.
pub struct DocumentBackend {
    db: DB,
}

impl DocumentBackend {
    /// Open (or create) the index database.
    pub fn open(config: &DocumentConfig) -> IndexResult<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_compression_type(DBCompressionType::None);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                cf_opts.set_compression_type(DBCompressionType::None);
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, &config.path, cf_descriptors)?;
        log::info!("Opened document index at {}", config.path.display());
        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> IndexResult<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| IndexError::BackendUnavailable(format!("missing column family {}", name)))
    }

    fn get_doc<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> IndexResult<Option<T>> {
        match self.db.get_cf(self.cf(cf_name)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Ordered scan over all keys starting with `prefix`.
    ///
    /// Rows rejected by `filter` do not count towards the offset.
    fn scan<T: DeserializeOwned>(
        &self,
        cf_name: &str,
        prefix: &[u8],
        page: Page,
        filter: Option<&dyn Fn(&T) -> bool>,
    ) -> IndexResult<Vec<T>> {
        let mut rows = Vec::new();
        if page.limit == 0 {
            return Ok(rows);
        }

        let cf = self.cf(cf_name)?;
        let upper = key(&[prefix, &KEY_SUFFIX_MAX]);
        let mode = match (page.desc, prefix.is_empty()) {
            (false, true) => IteratorMode::Start,
            (false, false) => IteratorMode::From(prefix, Direction::Forward),
            (true, true) => IteratorMode::End,
            (true, false) => IteratorMode::From(&upper, Direction::Reverse),
        };

        let mut skipped = 0;
        for item in self.db.iterator_cf(cf, mode) {
            let (k, value) = item?;
            if !k.starts_with(prefix) {
                break;
            }

            if filter.is_none() && skipped < page.offset {
                skipped += 1;
                continue;
            }

            let row: T = serde_json::from_slice(&value)?;
            if let Some(filter) = filter {
                if !filter(&row) {
                    continue;
                }
                if skipped < page.offset {
                    skipped += 1;
                    continue;
                }
            }

            rows.push(row);
            if rows.len() >= page.limit {
                break;
            }
        }

        Ok(rows)
    }

    fn write_rows(&self, rows: &IndexRows) -> IndexResult<()> {
        let mut batch = WriteBatch::default();

        if let Some(block) = &rows.block {
            let doc = serde_json::to_vec(block)?;
            let index = ordered(block.index);
            batch.put_cf(self.cf(CF_BLOCK_REFS)?, key(&[&index, block.hash.as_ref()]), &doc);
            if let Some(miner) = &block.miner {
                batch.put_cf(
                    self.cf(CF_BLOCK_REFS_BY_MINER)?,
                    key(&[miner.as_ref(), &index, block.hash.as_ref()]),
                    &doc,
                );
            }
        }

        for r in &rows.tx_references {
            // Upsert by tx id: a re-delivered transaction moves to its new block
            if let Some(previous) = self.get_doc::<TxReference>(CF_TX_REFS_BY_ID, r.tx_id.as_ref())? {
                batch.delete_cf(
                    self.cf(CF_TX_REFS)?,
                    key(&[&ordered(previous.tx_nonce), previous.tx_id.as_ref()]),
                );
            }
            let doc = serde_json::to_vec(r)?;
            batch.put_cf(
                self.cf(CF_TX_REFS)?,
                key(&[&ordered(r.tx_nonce), r.tx_id.as_ref()]),
                &doc,
            );
            batch.put_cf(self.cf(CF_TX_REFS_BY_ID)?, r.tx_id.as_ref(), &doc);
        }

        for r in &rows.signer_references {
            let doc = serde_json::to_vec(r)?;
            let nonce = ordered(r.tx_nonce);
            batch.put_cf(
                self.cf(CF_SIGNER_REFS)?,
                key(&[r.signer.as_ref(), &nonce, r.tx_id.as_ref()]),
                &doc,
            );
            batch.put_cf(
                self.cf(CF_SIGNER_REFS_BY_NONCE)?,
                key(&[&nonce, r.signer.as_ref(), r.tx_id.as_ref()]),
                &doc,
            );
        }

        for r in &rows.updated_address_references {
            let doc = serde_json::to_vec(r)?;
            let nonce = ordered(r.tx_nonce);
            batch.put_cf(
                self.cf(CF_ADDRESS_REFS)?,
                key(&[r.updated_address.as_ref(), &nonce, r.tx_id.as_ref()]),
                &doc,
            );
            batch.put_cf(
                self.cf(CF_ADDRESS_REFS_BY_NONCE)?,
                key(&[&nonce, r.updated_address.as_ref(), r.tx_id.as_ref()]),
                &doc,
            );
        }

        self.db.write(batch)?;
        Ok(())
    }

    fn delete_tx_reference(&self, batch: &mut WriteBatch, r: &TxReference) -> IndexResult<()> {
        batch.delete_cf(
            self.cf(CF_TX_REFS)?,
            key(&[&ordered(r.tx_nonce), r.tx_id.as_ref()]),
        );
        batch.delete_cf(self.cf(CF_TX_REFS_BY_ID)?, r.tx_id.as_ref());
        Ok(())
    }
}

impl IndexBackend for DocumentBackend {
    fn name(&self) -> &'static str {
        "document"
    }

    fn index_block(&self, block: &BlockRecord) -> IndexResult<()> {
        self.write_rows(&IndexRows::from_block(block))
    }

    fn index_transaction(&self, tx: &TransactionRecord) -> IndexResult<()> {
        self.write_rows(&IndexRows::from_transaction(tx))
    }

    fn remove_block(&self, block: &BlockDigest) -> IndexResult<()> {
        let hash = block.hash();
        let index = ordered(block.index());
        let mut batch = WriteBatch::default();

        batch.delete_cf(self.cf(CF_BLOCK_REFS)?, key(&[&index, hash.as_ref()]));
        if let Some(miner) = &block.header.miner {
            batch.delete_cf(
                self.cf(CF_BLOCK_REFS_BY_MINER)?,
                key(&[miner.as_ref(), &index, hash.as_ref()]),
            );
        }

        for tx_id in &block.tx_ids {
            if let Some(r) = self.get_doc::<TxReference>(CF_TX_REFS_BY_ID, tx_id.as_ref())? {
                // Leave references that a later block took over
                if r.block_hash == hash {
                    self.delete_tx_reference(&mut batch, &r)?;
                }
            }
        }

        self.db.write(batch)?;
        Ok(())
    }

    fn remove_transaction(&self, tx: &TransactionRecord) -> IndexResult<()> {
        let mut batch = WriteBatch::default();

        if let Some(r) = self.get_doc::<TxReference>(CF_TX_REFS_BY_ID, tx.id.as_ref())? {
            self.delete_tx_reference(&mut batch, &r)?;
        }

        let rows = IndexRows::from_transaction(tx);
        for r in &rows.signer_references {
            let nonce = ordered(r.tx_nonce);
            batch.delete_cf(
                self.cf(CF_SIGNER_REFS)?,
                key(&[r.signer.as_ref(), &nonce, r.tx_id.as_ref()]),
            );
            batch.delete_cf(
                self.cf(CF_SIGNER_REFS_BY_NONCE)?,
                key(&[&nonce, r.signer.as_ref(), r.tx_id.as_ref()]),
            );
        }
        for r in &rows.updated_address_references {
            let nonce = ordered(r.tx_nonce);
            batch.delete_cf(
                self.cf(CF_ADDRESS_REFS)?,
                key(&[r.updated_address.as_ref(), &nonce, r.tx_id.as_ref()]),
            );
            batch.delete_cf(
                self.cf(CF_ADDRESS_REFS_BY_NONCE)?,
                key(&[&nonce, r.updated_address.as_ref(), r.tx_id.as_ref()]),
            );
        }

        self.db.write(batch)?;
        Ok(())
    }

    fn iterate_tx_references(
        &self,
        tx_id: Option<TxId>,
        page: Page,
    ) -> IndexResult<Vec<TxReference>> {
        match tx_id {
            Some(tx_id) => {
                let row = self.get_doc::<TxReference>(CF_TX_REFS_BY_ID, tx_id.as_ref())?;
                Ok(row
                    .into_iter()
                    .skip(page.offset)
                    .take(page.limit)
                    .collect())
            }
            None => self.scan(CF_TX_REFS, &[], page, None),
        }
    }

    fn iterate_signer_references(
        &self,
        signer: Option<Address>,
        page: Page,
    ) -> IndexResult<Vec<SignerReference>> {
        match signer {
            Some(signer) => self.scan(CF_SIGNER_REFS, signer.as_ref(), page, None),
            None => self.scan(CF_SIGNER_REFS_BY_NONCE, &[], page, None),
        }
    }

    fn iterate_updated_address_references(
        &self,
        address: Option<Address>,
        page: Page,
    ) -> IndexResult<Vec<UpdatedAddressReference>> {
        match address {
            Some(address) => self.scan(CF_ADDRESS_REFS, address.as_ref(), page, None),
            None => self.scan(CF_ADDRESS_REFS_BY_NONCE, &[], page, None),
        }
    }

    fn iterate_block_references(
        &self,
        miner: Option<Address>,
        exclude_empty: bool,
        page: Page,
    ) -> IndexResult<Vec<BlockReference>> {
        let non_empty = |r: &BlockReference| r.tx_count > 0;
        let filter: Option<&dyn Fn(&BlockReference) -> bool> =
            if exclude_empty { Some(&non_empty) } else { None };

        match miner {
            Some(miner) => self.scan(CF_BLOCK_REFS_BY_MINER, miner.as_ref(), page, filter),
            None => self.scan(CF_BLOCK_REFS, &[], page, filter),
        }
    }

    fn flush(&self) -> IndexResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
