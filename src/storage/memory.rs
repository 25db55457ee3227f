//! In-memory primary store
//!
//! Keeps every block, transaction and chain index in maps guarded by a single
//! lock. Snapshots can be written to and read from JSON (see `persistence`).

use crate::core::{Address, BlockDigest, BlockRecord, HashDigest, TransactionRecord, TxId};
use crate::storage::store::{Store, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

// =============================================================================
// Store State
// =============================================================================

/// Everything a memory store holds; this is also the snapshot format
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StoreState {
    /// Block digests by hash
    pub blocks: HashMap<HashDigest, BlockDigest>,
    /// Transactions by id
    pub transactions: HashMap<TxId, TransactionRecord>,
    /// Block hashes per chain, in height order
    pub chains: HashMap<Uuid, Vec<HashDigest>>,
    /// Canonical chain id
    pub canonical_chain: Option<Uuid>,
    /// Staged transaction ids
    pub staged: BTreeSet<TxId>,
    /// Next nonce per chain and signer
    pub nonces: HashMap<Uuid, HashMap<Address, i64>>,
    /// First time each block was seen locally
    pub perceived_times: HashMap<HashDigest, DateTime<Utc>>,
}

// =============================================================================
// Memory Store
// =============================================================================

/// Primary store kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a store from a previously captured state
    pub fn from_state(state: StoreState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> StoreState {
        self.state.read().clone()
    }
}

impl Store for MemoryStore {
    fn list_chain_ids(&self) -> StoreResult<Vec<Uuid>> {
        Ok(self.state.read().chains.keys().copied().collect())
    }

    fn delete_chain_id(&self, chain_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write();
        state.chains.remove(&chain_id);
        state.nonces.remove(&chain_id);
        if state.canonical_chain == Some(chain_id) {
            state.canonical_chain = None;
        }
        Ok(())
    }

    fn canonical_chain_id(&self) -> StoreResult<Option<Uuid>> {
        Ok(self.state.read().canonical_chain)
    }

    fn set_canonical_chain_id(&self, chain_id: Uuid) -> StoreResult<()> {
        self.state.write().canonical_chain = Some(chain_id);
        Ok(())
    }

    fn count_index(&self, chain_id: Uuid) -> StoreResult<u64> {
        Ok(self
            .state
            .read()
            .chains
            .get(&chain_id)
            .map(|c| c.len() as u64)
            .unwrap_or(0))
    }

    fn iterate_indexes(
        &self,
        chain_id: Uuid,
        offset: usize,
        limit: Option<usize>,
    ) -> StoreResult<Vec<HashDigest>> {
        let state = self.state.read();
        let chain = match state.chains.get(&chain_id) {
            Some(chain) => chain,
            None => return Ok(Vec::new()),
        };
        Ok(chain
            .iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .copied()
            .collect())
    }

    fn index_block_hash(&self, chain_id: Uuid, index: i64) -> StoreResult<Option<HashDigest>> {
        let state = self.state.read();
        let chain = match state.chains.get(&chain_id) {
            Some(chain) => chain,
            None => return Ok(None),
        };
        let position = if index < 0 {
            chain.len() as i64 + index
        } else {
            index
        };
        if position < 0 {
            return Ok(None);
        }
        Ok(chain.get(position as usize).copied())
    }

    fn append_index(&self, chain_id: Uuid, hash: HashDigest) -> StoreResult<i64> {
        let mut state = self.state.write();
        let chain = state.chains.entry(chain_id).or_default();
        chain.push(hash);
        Ok(chain.len() as i64 - 1)
    }

    fn fork_block_indexes(
        &self,
        source: Uuid,
        destination: Uuid,
        branch_point: HashDigest,
    ) -> StoreResult<()> {
        let mut state = self.state.write();
        let chain = state
            .chains
            .get(&source)
            .ok_or(StoreError::UnknownChain(source))?;
        let position = chain
            .iter()
            .position(|h| *h == branch_point)
            .ok_or_else(|| {
                StoreError::InvalidData(format!(
                    "Branch point {} not found on chain {}",
                    branch_point, source
                ))
            })?;
        let forked = chain[..=position].to_vec();
        state.chains.insert(destination, forked);
        Ok(())
    }

    fn stage_transaction_ids(&self, tx_ids: &[TxId]) -> StoreResult<()> {
        self.state.write().staged.extend(tx_ids.iter().copied());
        Ok(())
    }

    fn unstage_transaction_ids(&self, tx_ids: &[TxId]) -> StoreResult<()> {
        let mut state = self.state.write();
        for tx_id in tx_ids {
            state.staged.remove(tx_id);
        }
        Ok(())
    }

    fn iterate_staged_transaction_ids(&self) -> StoreResult<Vec<TxId>> {
        Ok(self.state.read().staged.iter().copied().collect())
    }

    fn iterate_transaction_ids(&self) -> StoreResult<Vec<TxId>> {
        Ok(self.state.read().transactions.keys().copied().collect())
    }

    fn get_transaction(&self, tx_id: TxId) -> StoreResult<Option<TransactionRecord>> {
        Ok(self.state.read().transactions.get(&tx_id).cloned())
    }

    fn put_transaction(&self, tx: &TransactionRecord) -> StoreResult<()> {
        self.state
            .write()
            .transactions
            .entry(tx.id)
            .or_insert_with(|| tx.clone());
        Ok(())
    }

    fn delete_transaction(&self, tx_id: TxId) -> StoreResult<bool> {
        Ok(self.state.write().transactions.remove(&tx_id).is_some())
    }

    fn contains_transaction(&self, tx_id: TxId) -> StoreResult<bool> {
        Ok(self.state.read().transactions.contains_key(&tx_id))
    }

    fn count_transactions(&self) -> StoreResult<u64> {
        Ok(self.state.read().transactions.len() as u64)
    }

    fn iterate_block_hashes(&self) -> StoreResult<Vec<HashDigest>> {
        Ok(self.state.read().blocks.keys().copied().collect())
    }

    fn get_block(&self, hash: HashDigest) -> StoreResult<Option<BlockRecord>> {
        let state = self.state.read();
        let digest = match state.blocks.get(&hash) {
            Some(digest) => digest,
            None => return Ok(None),
        };

        let mut transactions = Vec::with_capacity(digest.tx_ids.len());
        for tx_id in &digest.tx_ids {
            let tx = state.transactions.get(tx_id).ok_or_else(|| {
                StoreError::InvalidData(format!(
                    "Block {} references missing transaction {}",
                    hash, tx_id
                ))
            })?;
            transactions.push(tx.clone());
        }

        Ok(Some(BlockRecord {
            header: digest.header.clone(),
            transactions,
        }))
    }

    fn get_block_digest(&self, hash: HashDigest) -> StoreResult<Option<BlockDigest>> {
        Ok(self.state.read().blocks.get(&hash).cloned())
    }

    fn get_block_index(&self, hash: HashDigest) -> StoreResult<Option<i64>> {
        Ok(self.state.read().blocks.get(&hash).map(|d| d.index()))
    }

    fn put_block(&self, block: &BlockRecord) -> StoreResult<()> {
        let mut state = self.state.write();
        for tx in &block.transactions {
            state
                .transactions
                .entry(tx.id)
                .or_insert_with(|| tx.clone());
        }
        state
            .blocks
            .entry(block.hash())
            .or_insert_with(|| block.to_digest());
        Ok(())
    }

    fn delete_block(&self, hash: HashDigest) -> StoreResult<bool> {
        let mut state = self.state.write();
        state.perceived_times.remove(&hash);
        Ok(state.blocks.remove(&hash).is_some())
    }

    fn contains_block(&self, hash: HashDigest) -> StoreResult<bool> {
        Ok(self.state.read().blocks.contains_key(&hash))
    }

    fn count_blocks(&self) -> StoreResult<u64> {
        Ok(self.state.read().blocks.len() as u64)
    }

    fn block_perceived_time(&self, hash: HashDigest) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.state.read().perceived_times.get(&hash).copied())
    }

    fn set_block_perceived_time(
        &self,
        hash: HashDigest,
        perceived_time: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.state
            .write()
            .perceived_times
            .insert(hash, perceived_time);
        Ok(())
    }

    fn list_tx_nonces(&self, chain_id: Uuid) -> StoreResult<Vec<(Address, i64)>> {
        Ok(self
            .state
            .read()
            .nonces
            .get(&chain_id)
            .map(|n| n.iter().map(|(a, n)| (*a, *n)).collect())
            .unwrap_or_default())
    }

    fn get_tx_nonce(&self, chain_id: Uuid, address: Address) -> StoreResult<i64> {
        Ok(self
            .state
            .read()
            .nonces
            .get(&chain_id)
            .and_then(|n| n.get(&address).copied())
            .unwrap_or(0))
    }

    fn increase_tx_nonce(&self, chain_id: Uuid, signer: Address, delta: i64) -> StoreResult<()> {
        let mut state = self.state.write();
        *state
            .nonces
            .entry(chain_id)
            .or_default()
            .entry(signer)
            .or_insert(0) += delta;
        Ok(())
    }

    fn fork_tx_nonces(&self, source: Uuid, destination: Uuid) -> StoreResult<()> {
        let mut state = self.state.write();
        let nonces = state
            .nonces
            .get(&source)
            .cloned()
            .ok_or(StoreError::UnknownChain(source))?;
        state.nonces.insert(destination, nonces);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_block(index: u8, tx_count: u8) -> BlockRecord {
        let txs = (0..tx_count)
            .map(|i| {
                TransactionRecord::builder(TxId::new([index * 16 + i; 32]), Address::new([i; 20]), i as i64)
                    .build()
            })
            .collect();
        BlockRecord::new(index as i64, HashDigest::new([index; 32]), None, txs)
    }

    #[test]
    fn test_put_get_block() {
        let store = MemoryStore::new();
        let block = make_block(1, 2);
        store.put_block(&block).unwrap();

        assert!(store.contains_block(block.hash()).unwrap());
        assert_eq!(store.count_transactions().unwrap(), 2);
        assert_eq!(store.get_block(block.hash()).unwrap(), Some(block.clone()));
        assert_eq!(store.get_block_index(block.hash()).unwrap(), Some(1));
    }

    #[test]
    fn test_delete_reports_presence() {
        let store = MemoryStore::new();
        let block = make_block(2, 1);
        store.put_block(&block).unwrap();

        assert!(store.delete_block(block.hash()).unwrap());
        assert!(!store.delete_block(block.hash()).unwrap());
        assert!(store.get_block(block.hash()).unwrap().is_none());
        // Transactions outlive the block
        assert!(store.contains_transaction(block.transactions[0].id).unwrap());
    }

    #[test]
    fn test_chain_index_and_fork() {
        let store = MemoryStore::new();
        let chain = Uuid::new_v4();
        for i in 0..4u8 {
            assert_eq!(
                store.append_index(chain, HashDigest::new([i; 32])).unwrap(),
                i as i64
            );
        }

        assert_eq!(store.count_index(chain).unwrap(), 4);
        assert_eq!(
            store.index_block_hash(chain, -1).unwrap(),
            Some(HashDigest::new([3; 32]))
        );
        assert_eq!(store.index_block_hash(chain, -5).unwrap(), None);
        assert_eq!(
            store.iterate_indexes(chain, 1, Some(2)).unwrap(),
            vec![HashDigest::new([1; 32]), HashDigest::new([2; 32])]
        );

        let fork = Uuid::new_v4();
        store
            .fork_block_indexes(chain, fork, HashDigest::new([1; 32]))
            .unwrap();
        assert_eq!(store.count_index(fork).unwrap(), 2);
    }

    #[test]
    fn test_nonces() {
        let store = MemoryStore::new();
        let chain = Uuid::new_v4();
        let signer = Address::new([7; 20]);

        store.increase_tx_nonce(chain, signer, 1).unwrap();
        store.increase_tx_nonce(chain, signer, 2).unwrap();
        assert_eq!(store.get_tx_nonce(chain, signer).unwrap(), 3);

        let fork = Uuid::new_v4();
        store.fork_tx_nonces(chain, fork).unwrap();
        assert_eq!(store.list_tx_nonces(fork).unwrap(), vec![(signer, 3)]);
    }
}
