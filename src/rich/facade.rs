//! Rich store facade
//!
//! `RichStore` wraps a primary store and keeps the secondary indices in step
//! with it. Every `Store` operation is answered by the primary store; writes
//! and deletes of blocks and transactions additionally drive the index
//! backend and the block digest cache.
//!
//! Ordering rules:
//! - puts write the primary store first, then index
//! - deletes remove index rows first, then delete from the primary store
//! - index failures are logged and never fail the primary operation

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::core::{Address, BlockDigest, BlockRecord, HashDigest, TransactionRecord, TxId};
use crate::rich::backend::IndexBackend;
use crate::rich::cache::BlockDigestCache;
use crate::rich::error::IndexResult;
use crate::rich::references::{
    BlockReference, Page, SignerReference, TxReference, UpdatedAddressReference,
};
use crate::storage::{Store, StoreResult};

/// Primary store augmented with reference indices
pub struct RichStore<S: Store> {
    store: S,
    backend: Box<dyn IndexBackend>,
    cache: BlockDigestCache,
}

impl<S: Store> RichStore<S> {
    pub fn new(store: S, backend: Box<dyn IndexBackend>, cache_capacity: usize) -> Self {
        log::info!(
            "Rich store using {} index, cache capacity {}",
            backend.name(),
            cache_capacity
        );
        Self {
            store,
            backend,
            cache: BlockDigestCache::with_capacity(cache_capacity),
        }
    }

    /// The wrapped primary store
    pub fn inner(&self) -> &S {
        &self.store
    }

    pub fn backend(&self) -> &dyn IndexBackend {
        self.backend.as_ref()
    }

    pub fn cache(&self) -> &BlockDigestCache {
        &self.cache
    }

    /// Index a block unless its hash is already cached
    ///
    /// Returns whether rows were emitted.
    pub fn index_block(&self, block: &BlockRecord) -> IndexResult<bool> {
        if self.cache.contains(&block.hash()) {
            return Ok(false);
        }
        self.backend.index_block(block)?;
        self.cache.insert(block.to_digest());
        Ok(true)
    }

    /// Make every staged row visible to readers
    pub fn flush(&self) -> IndexResult<()> {
        self.backend.flush()
    }

    pub fn iterate_tx_references(
        &self,
        tx_id: Option<TxId>,
        page: Page,
    ) -> IndexResult<Vec<TxReference>> {
        self.backend.iterate_tx_references(tx_id, page)
    }

    pub fn iterate_signer_references(
        &self,
        signer: Option<Address>,
        page: Page,
    ) -> IndexResult<Vec<SignerReference>> {
        self.backend.iterate_signer_references(signer, page)
    }

    pub fn iterate_updated_address_references(
        &self,
        address: Option<Address>,
        page: Page,
    ) -> IndexResult<Vec<UpdatedAddressReference>> {
        self.backend.iterate_updated_address_references(address, page)
    }

    /// Block listing rows by index, optionally by miner and skipping empty blocks
    pub fn iterate_block_references(
        &self,
        miner: Option<Address>,
        exclude_empty: bool,
        page: Page,
    ) -> IndexResult<Vec<BlockReference>> {
        self.backend.iterate_block_references(miner, exclude_empty, page)
    }

    /// Transaction ids of a signer, ordered by nonce
    pub fn iterate_transaction_ids_by_signer(
        &self,
        signer: Address,
        page: Page,
    ) -> IndexResult<Vec<TxId>> {
        Ok(self
            .iterate_signer_references(Some(signer), page)?
            .into_iter()
            .map(|r| r.tx_id)
            .collect())
    }

    /// Transaction ids that updated an address, ordered by nonce
    pub fn iterate_transaction_ids_by_updated_address(
        &self,
        address: Address,
        page: Page,
    ) -> IndexResult<Vec<TxId>> {
        Ok(self
            .iterate_updated_address_references(Some(address), page)?
            .into_iter()
            .map(|r| r.tx_id)
            .collect())
    }

    /// Hash of the block that currently carries a transaction
    pub fn containing_block(&self, tx_id: TxId) -> IndexResult<Option<HashDigest>> {
        Ok(self
            .iterate_tx_references(Some(tx_id), Page::ascending().with_limit(1))?
            .into_iter()
            .next()
            .map(|r| r.block_hash))
    }
}

impl<S: Store> Store for RichStore<S> {
    fn list_chain_ids(&self) -> StoreResult<Vec<Uuid>> {
        self.store.list_chain_ids()
    }

    fn delete_chain_id(&self, chain_id: Uuid) -> StoreResult<()> {
        self.store.delete_chain_id(chain_id)
    }

    fn canonical_chain_id(&self) -> StoreResult<Option<Uuid>> {
        self.store.canonical_chain_id()
    }

    fn set_canonical_chain_id(&self, chain_id: Uuid) -> StoreResult<()> {
        self.store.set_canonical_chain_id(chain_id)
    }

    fn count_index(&self, chain_id: Uuid) -> StoreResult<u64> {
        self.store.count_index(chain_id)
    }

    fn iterate_indexes(
        &self,
        chain_id: Uuid,
        offset: usize,
        limit: Option<usize>,
    ) -> StoreResult<Vec<HashDigest>> {
        self.store.iterate_indexes(chain_id, offset, limit)
    }

    fn index_block_hash(&self, chain_id: Uuid, index: i64) -> StoreResult<Option<HashDigest>> {
        self.store.index_block_hash(chain_id, index)
    }

    fn append_index(&self, chain_id: Uuid, hash: HashDigest) -> StoreResult<i64> {
        self.store.append_index(chain_id, hash)
    }

    fn fork_block_indexes(
        &self,
        source: Uuid,
        destination: Uuid,
        branch_point: HashDigest,
    ) -> StoreResult<()> {
        self.store
            .fork_block_indexes(source, destination, branch_point)
    }

    fn stage_transaction_ids(&self, tx_ids: &[TxId]) -> StoreResult<()> {
        self.store.stage_transaction_ids(tx_ids)
    }

    fn unstage_transaction_ids(&self, tx_ids: &[TxId]) -> StoreResult<()> {
        self.store.unstage_transaction_ids(tx_ids)
    }

    fn iterate_staged_transaction_ids(&self) -> StoreResult<Vec<TxId>> {
        self.store.iterate_staged_transaction_ids()
    }

    fn iterate_transaction_ids(&self) -> StoreResult<Vec<TxId>> {
        self.store.iterate_transaction_ids()
    }

    fn get_transaction(&self, tx_id: TxId) -> StoreResult<Option<TransactionRecord>> {
        self.store.get_transaction(tx_id)
    }

    fn put_transaction(&self, tx: &TransactionRecord) -> StoreResult<()> {
        self.store.put_transaction(tx)?;
        if let Err(e) = self.backend.index_transaction(tx) {
            log::warn!("Failed to index transaction {}: {}", tx.id, e);
        }
        Ok(())
    }

    fn delete_transaction(&self, tx_id: TxId) -> StoreResult<bool> {
        if let Some(tx) = self.store.get_transaction(tx_id)? {
            if let Err(e) = self.backend.remove_transaction(&tx) {
                log::warn!("Failed to remove index rows of transaction {}: {}", tx_id, e);
            }
        }
        self.store.delete_transaction(tx_id)
    }

    fn contains_transaction(&self, tx_id: TxId) -> StoreResult<bool> {
        self.store.contains_transaction(tx_id)
    }

    fn count_transactions(&self) -> StoreResult<u64> {
        self.store.count_transactions()
    }

    fn iterate_block_hashes(&self) -> StoreResult<Vec<HashDigest>> {
        self.store.iterate_block_hashes()
    }

    fn get_block(&self, hash: HashDigest) -> StoreResult<Option<BlockRecord>> {
        self.store.get_block(hash)
    }

    fn get_block_digest(&self, hash: HashDigest) -> StoreResult<Option<BlockDigest>> {
        if let Some(digest) = self.cache.get(&hash) {
            return Ok(Some(digest));
        }
        let digest = self.store.get_block_digest(hash)?;
        if let Some(digest) = &digest {
            self.cache.insert(digest.clone());
        }
        Ok(digest)
    }

    fn get_block_index(&self, hash: HashDigest) -> StoreResult<Option<i64>> {
        if let Some(digest) = self.cache.get(&hash) {
            return Ok(Some(digest.index()));
        }
        self.store.get_block_index(hash)
    }

    fn put_block(&self, block: &BlockRecord) -> StoreResult<()> {
        self.store.put_block(block)?;
        if let Err(e) = self.index_block(block) {
            log::warn!("Failed to index block #{} {}: {}", block.index(), block.hash(), e);
        }
        Ok(())
    }

    fn delete_block(&self, hash: HashDigest) -> StoreResult<bool> {
        if let Some(digest) = self.get_block_digest(hash)? {
            if let Err(e) = self.backend.remove_block(&digest) {
                log::warn!("Failed to remove index rows of block {}: {}", hash, e);
            }
        }
        self.cache.remove(&hash);
        self.store.delete_block(hash)
    }

    fn contains_block(&self, hash: HashDigest) -> StoreResult<bool> {
        if self.cache.contains(&hash) {
            return Ok(true);
        }
        self.store.contains_block(hash)
    }

    fn count_blocks(&self) -> StoreResult<u64> {
        self.store.count_blocks()
    }

    fn block_perceived_time(&self, hash: HashDigest) -> StoreResult<Option<DateTime<Utc>>> {
        self.store.block_perceived_time(hash)
    }

    fn set_block_perceived_time(
        &self,
        hash: HashDigest,
        perceived_time: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.store.set_block_perceived_time(hash, perceived_time)
    }

    fn list_tx_nonces(&self, chain_id: Uuid) -> StoreResult<Vec<(Address, i64)>> {
        self.store.list_tx_nonces(chain_id)
    }

    fn get_tx_nonce(&self, chain_id: Uuid, address: Address) -> StoreResult<i64> {
        self.store.get_tx_nonce(chain_id, address)
    }

    fn increase_tx_nonce(&self, chain_id: Uuid, signer: Address, delta: i64) -> StoreResult<()> {
        self.store.increase_tx_nonce(chain_id, signer, delta)
    }

    fn fork_tx_nonces(&self, source: Uuid, destination: Uuid) -> StoreResult<()> {
        self.store.fork_tx_nonces(source, destination)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rich::error::IndexError;
    use crate::storage::MemoryStore;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Backend that records calls and can be told to fail
    struct RecordingBackend {
        calls: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl RecordingBackend {
        fn record(&self, call: String) -> IndexResult<()> {
            if self.fail {
                return Err(IndexError::BackendUnavailable("down".to_string()));
            }
            self.calls.lock().push(call);
            Ok(())
        }
    }

    impl IndexBackend for RecordingBackend {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn index_block(&self, block: &BlockRecord) -> IndexResult<()> {
            self.record(format!("index_block {}", block.index()))
        }

        fn index_transaction(&self, tx: &TransactionRecord) -> IndexResult<()> {
            self.record(format!("index_transaction {}", tx.nonce))
        }

        fn remove_block(&self, block: &BlockDigest) -> IndexResult<()> {
            self.record(format!("remove_block {}", block.index()))
        }

        fn remove_transaction(&self, tx: &TransactionRecord) -> IndexResult<()> {
            self.record(format!("remove_transaction {}", tx.nonce))
        }

        fn iterate_tx_references(&self, _: Option<TxId>, _: Page) -> IndexResult<Vec<TxReference>> {
            self.record("iterate".to_string()).map(|_| Vec::new())
        }

        fn iterate_signer_references(
            &self,
            _: Option<Address>,
            _: Page,
        ) -> IndexResult<Vec<SignerReference>> {
            self.record("iterate".to_string()).map(|_| Vec::new())
        }

        fn iterate_updated_address_references(
            &self,
            _: Option<Address>,
            _: Page,
        ) -> IndexResult<Vec<UpdatedAddressReference>> {
            self.record("iterate".to_string()).map(|_| Vec::new())
        }

        fn iterate_block_references(
            &self,
            _: Option<Address>,
            _: bool,
            _: Page,
        ) -> IndexResult<Vec<BlockReference>> {
            self.record("iterate".to_string()).map(|_| Vec::new())
        }

        fn flush(&self) -> IndexResult<()> {
            self.record("flush".to_string())
        }
    }

    fn make_block(index: u8) -> BlockRecord {
        let tx = TransactionRecord::builder(TxId::new([index; 32]), Address::new([1; 20]), index as i64)
            .build();
        BlockRecord::new(index as i64, HashDigest::new([index; 32]), None, vec![tx])
    }

    fn rich_store(fail: bool) -> (RichStore<MemoryStore>, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let backend = RecordingBackend {
            calls: calls.clone(),
            fail,
        };
        (RichStore::new(MemoryStore::new(), Box::new(backend), 8), calls)
    }

    #[test]
    fn test_put_block_is_idempotent() {
        let (store, calls) = rich_store(false);
        let block = make_block(1);

        store.put_block(&block).unwrap();
        store.put_block(&block).unwrap();
        assert!(!store.index_block(&block).unwrap());

        assert!(store.cache().contains(&block.hash()));
        assert_eq!(*calls.lock(), vec!["index_block 1".to_string()]);
    }

    #[test]
    fn test_index_failure_does_not_fail_put() {
        let (store, _) = rich_store(true);
        let block = make_block(1);

        store.put_block(&block).unwrap();
        assert!(store.inner().contains_block(block.hash()).unwrap());
        // A failed index run leaves the block uncached so it is retried
        assert!(!store.cache().contains(&block.hash()));

        store.put_transaction(&block.transactions[0]).unwrap();
        assert!(store.delete_block(block.hash()).unwrap());
    }

    #[test]
    fn test_delete_purges_cache() {
        let (store, calls) = rich_store(false);
        let block = make_block(2);
        store.put_block(&block).unwrap();
        assert!(store.contains_block(block.hash()).unwrap());

        assert!(store.delete_block(block.hash()).unwrap());
        assert_eq!(calls.lock().last().map(String::as_str), Some("remove_block 2"));
        assert!(!store.cache().contains(&block.hash()));
        assert!(!store.contains_block(block.hash()).unwrap());
        assert!(store.get_block_digest(block.hash()).unwrap().is_none());
        assert!(!store.delete_block(block.hash()).unwrap());
    }

    #[test]
    fn test_digest_reads_through_cache() {
        let (store, _) = rich_store(false);
        let block = make_block(3);
        store.inner().put_block(&block).unwrap();

        let digest = store.get_block_digest(block.hash()).unwrap();
        assert_eq!(digest, Some(block.to_digest()));
        assert!(store.cache().contains(&block.hash()));
        assert_eq!(store.get_block_index(block.hash()).unwrap(), Some(3));
        assert_eq!(store.cache().stats().hits, 1);
    }

    #[test]
    fn test_delete_transaction_removes_rows_first() {
        let (store, calls) = rich_store(false);
        let tx = TransactionRecord::builder(TxId::new([7; 32]), Address::new([1; 20]), 4).build();
        store.put_transaction(&tx).unwrap();

        assert!(store.delete_transaction(tx.id).unwrap());
        assert!(!store.delete_transaction(tx.id).unwrap());
        assert_eq!(
            *calls.lock(),
            vec!["index_transaction 4".to_string(), "remove_transaction 4".to_string()]
        );
    }

    #[test]
    fn test_read_errors_propagate() {
        let (store, _) = rich_store(true);
        assert!(store
            .iterate_signer_references(None, Page::ascending())
            .is_err());
    }
}
