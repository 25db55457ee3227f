//! Index backend capability
//!
//! A backend receives reference rows and serves ordered, paginated scans over
//! them. Two implementations exist:
//! - `DocumentBackend` upserts rows synchronously into RocksDB
//! - `RelationalBackend` stages rows into files and bulk-loads them into SQLite
//!
//! The facade holds one of them behind `Box<dyn IndexBackend>` and never asks
//! which one it has.

use crate::core::{Address, BlockDigest, BlockRecord, TransactionRecord, TxId};
use crate::rich::error::IndexResult;
use crate::rich::references::{
    BlockReference, Page, SignerReference, TxReference, UpdatedAddressReference,
};

pub trait IndexBackend: Send + Sync {
    /// Short name used in log lines
    fn name(&self) -> &'static str;

    /// Derive and store the rows of a block and all its transactions
    fn index_block(&self, block: &BlockRecord) -> IndexResult<()>;

    /// Derive and store the rows of a transaction outside any block
    fn index_transaction(&self, tx: &TransactionRecord) -> IndexResult<()>;

    /// Drop the block listing row and the tx references pointing at the block
    fn remove_block(&self, block: &BlockDigest) -> IndexResult<()>;

    /// Drop every reference row of a transaction
    fn remove_transaction(&self, tx: &TransactionRecord) -> IndexResult<()>;

    /// Tx references ordered by nonce, optionally restricted to one transaction
    fn iterate_tx_references(
        &self,
        tx_id: Option<TxId>,
        page: Page,
    ) -> IndexResult<Vec<TxReference>>;

    /// Signer references ordered by nonce, optionally restricted to one signer
    fn iterate_signer_references(
        &self,
        signer: Option<Address>,
        page: Page,
    ) -> IndexResult<Vec<SignerReference>>;

    /// Updated address references ordered by nonce, optionally restricted to one address
    fn iterate_updated_address_references(
        &self,
        address: Option<Address>,
        page: Page,
    ) -> IndexResult<Vec<UpdatedAddressReference>>;

    /// Block listing rows ordered by block index
    fn iterate_block_references(
        &self,
        miner: Option<Address>,
        exclude_empty: bool,
        page: Page,
    ) -> IndexResult<Vec<BlockReference>>;

    /// Make every accepted row visible to readers
    fn flush(&self) -> IndexResult<()>;

    /// Bytes accepted but not yet visible to readers
    fn staged_bytes(&self) -> u64 {
        0
    }
}
