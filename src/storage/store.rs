//! Primary store contract
//!
//! The primary store is the authoritative, append-only home of blocks and
//! transactions. Everything else in this crate is derived from it.

use crate::core::{Address, BlockDigest, BlockRecord, HashDigest, TransactionRecord, TxId};
use chrono::{DateTime, Utc};
use std::io;
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// Store Errors
// =============================================================================

/// Primary store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Unknown chain: {0}")]
    UnknownChain(Uuid),
}

/// Result type for primary store operations
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Store Trait
// =============================================================================

/// Operations every primary store provides
///
/// Absent keys are reported as `None` or `false`, never as errors.
pub trait Store: Send + Sync {
    // ---- chain ids ----

    fn list_chain_ids(&self) -> StoreResult<Vec<Uuid>>;

    fn delete_chain_id(&self, chain_id: Uuid) -> StoreResult<()>;

    fn canonical_chain_id(&self) -> StoreResult<Option<Uuid>>;

    fn set_canonical_chain_id(&self, chain_id: Uuid) -> StoreResult<()>;

    // ---- chain index ----

    /// Number of blocks on the given chain
    fn count_index(&self, chain_id: Uuid) -> StoreResult<u64>;

    /// Block hashes of a chain in height order
    fn iterate_indexes(
        &self,
        chain_id: Uuid,
        offset: usize,
        limit: Option<usize>,
    ) -> StoreResult<Vec<HashDigest>>;

    /// Block hash at a height; negative heights count back from the tip
    fn index_block_hash(&self, chain_id: Uuid, index: i64) -> StoreResult<Option<HashDigest>>;

    /// Append a block hash to a chain and return its height
    fn append_index(&self, chain_id: Uuid, hash: HashDigest) -> StoreResult<i64>;

    /// Copy the chain prefix ending at `branch_point` into `destination`
    fn fork_block_indexes(
        &self,
        source: Uuid,
        destination: Uuid,
        branch_point: HashDigest,
    ) -> StoreResult<()>;

    // ---- staged transactions ----

    fn stage_transaction_ids(&self, tx_ids: &[TxId]) -> StoreResult<()>;

    fn unstage_transaction_ids(&self, tx_ids: &[TxId]) -> StoreResult<()>;

    fn iterate_staged_transaction_ids(&self) -> StoreResult<Vec<TxId>>;

    // ---- transactions ----

    fn iterate_transaction_ids(&self) -> StoreResult<Vec<TxId>>;

    fn get_transaction(&self, tx_id: TxId) -> StoreResult<Option<TransactionRecord>>;

    fn put_transaction(&self, tx: &TransactionRecord) -> StoreResult<()>;

    /// Returns `false` when the transaction was not present
    fn delete_transaction(&self, tx_id: TxId) -> StoreResult<bool>;

    fn contains_transaction(&self, tx_id: TxId) -> StoreResult<bool>;

    fn count_transactions(&self) -> StoreResult<u64>;

    // ---- blocks ----

    fn iterate_block_hashes(&self) -> StoreResult<Vec<HashDigest>>;

    fn get_block(&self, hash: HashDigest) -> StoreResult<Option<BlockRecord>>;

    fn get_block_digest(&self, hash: HashDigest) -> StoreResult<Option<BlockDigest>>;

    fn get_block_index(&self, hash: HashDigest) -> StoreResult<Option<i64>>;

    /// Store a block together with its transactions
    fn put_block(&self, block: &BlockRecord) -> StoreResult<()>;

    /// Returns `false` when the block was not present
    fn delete_block(&self, hash: HashDigest) -> StoreResult<bool>;

    fn contains_block(&self, hash: HashDigest) -> StoreResult<bool>;

    fn count_blocks(&self) -> StoreResult<u64>;

    fn block_perceived_time(&self, hash: HashDigest) -> StoreResult<Option<DateTime<Utc>>>;

    fn set_block_perceived_time(
        &self,
        hash: HashDigest,
        perceived_time: DateTime<Utc>,
    ) -> StoreResult<()>;

    // ---- nonces ----

    fn list_tx_nonces(&self, chain_id: Uuid) -> StoreResult<Vec<(Address, i64)>>;

    fn get_tx_nonce(&self, chain_id: Uuid, address: Address) -> StoreResult<i64>;

    fn increase_tx_nonce(&self, chain_id: Uuid, signer: Address, delta: i64) -> StoreResult<()>;

    fn fork_tx_nonces(&self, source: Uuid, destination: Uuid) -> StoreResult<()>;
}
