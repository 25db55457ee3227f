//! Explorer queries
//!
//! Resolves index rows into blocks and transactions for consumers. Offsets
//! may be negative, in which case they count back from the canonical tip:
//! an offset of `-1` on a chain whose tip is at height 9 becomes `9`.

use std::cmp::Reverse;

use thiserror::Error;

use crate::core::{Address, BlockRecord, TransactionRecord};
use crate::rich::error::IndexError;
use crate::rich::facade::RichStore;
use crate::rich::references::Page;
use crate::storage::{Store, StoreError};

/// Errors raised while answering an explorer query
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Invalid offset: {0}")]
    InvalidOffset(i64),
}

pub type QueryResult<T> = Result<T, QueryError>;

/// Read-only query layer over a rich store
pub struct Explorer<'a, S: Store> {
    store: &'a RichStore<S>,
}

impl<'a, S: Store> Explorer<'a, S> {
    pub fn new(store: &'a RichStore<S>) -> Self {
        Self { store }
    }

    /// Height of the canonical tip, if there is a non-empty canonical chain
    pub fn tip_index(&self) -> QueryResult<Option<i64>> {
        let chain_id = match self.store.canonical_chain_id()? {
            Some(id) => id,
            None => return Ok(None),
        };
        let count = self.store.count_index(chain_id)?;
        Ok(count.checked_sub(1).map(|tip| tip as i64))
    }

    /// Translate an offset against the tip; `None` if it falls outside the chain
    fn resolve_offset(&self, offset: i64) -> QueryResult<Option<usize>> {
        let tip = match self.tip_index()? {
            Some(tip) => tip,
            None => return Ok(None),
        };
        let offset = if offset < 0 { tip + offset + 1 } else { offset };
        if offset < 0 || offset > tip {
            return Ok(None);
        }
        Ok(Some(offset as usize))
    }

    /// Transactions by nonce, optionally by signer or by updated address
    ///
    /// `signer` takes precedence over `involved` when both are given.
    pub fn list_transactions(
        &self,
        signer: Option<Address>,
        involved: Option<Address>,
        desc: bool,
        offset: i64,
        limit: Option<usize>,
    ) -> QueryResult<Vec<TransactionRecord>> {
        let offset = match self.resolve_offset(offset)? {
            Some(offset) => offset,
            None => return Ok(Vec::new()),
        };
        let page = Page::new(desc, offset, limit.unwrap_or(usize::MAX));

        let tx_ids: Vec<_> = match (signer, involved) {
            (Some(signer), _) => self.store.iterate_transaction_ids_by_signer(signer, page)?,
            (None, Some(involved)) => self
                .store
                .iterate_transaction_ids_by_updated_address(involved, page)?,
            (None, None) => self
                .store
                .iterate_tx_references(None, page)?
                .into_iter()
                .map(|r| r.tx_id)
                .collect(),
        };

        let mut txs = Vec::with_capacity(tx_ids.len());
        for tx_id in tx_ids {
            match self.store.get_transaction(tx_id)? {
                Some(tx) => txs.push(tx),
                None => log::debug!("Index refers to unknown transaction {}", tx_id),
            }
        }
        Ok(txs)
    }

    /// Blocks by index, optionally by miner and skipping empty blocks
    pub fn list_blocks(
        &self,
        desc: bool,
        offset: i64,
        limit: Option<usize>,
        exclude_empty: bool,
        miner: Option<Address>,
    ) -> QueryResult<Vec<BlockRecord>> {
        let offset = match self.resolve_offset(offset)? {
            Some(offset) => offset,
            None => return Ok(Vec::new()),
        };
        let page = Page::new(desc, offset, limit.unwrap_or(usize::MAX));

        let mut blocks = Vec::new();
        for r in self.store.iterate_block_references(miner, exclude_empty, page)? {
            match self.store.get_block(r.hash)? {
                Some(block) => blocks.push(block),
                None => log::debug!("Index refers to unknown block {}", r.hash),
            }
        }
        Ok(blocks)
    }

    /// Staged transactions ordered by timestamp
    pub fn list_staged_transactions(
        &self,
        signer: Option<Address>,
        involved: Option<Address>,
        desc: bool,
        offset: i64,
        limit: Option<usize>,
    ) -> QueryResult<Vec<TransactionRecord>> {
        if offset < 0 {
            return Err(QueryError::InvalidOffset(offset));
        }

        let mut txs = Vec::new();
        for tx_id in self.store.iterate_staged_transaction_ids()? {
            if let Some(tx) = self.store.get_transaction(tx_id)? {
                if is_relevant(&tx, signer, involved) {
                    txs.push(tx);
                }
            }
        }

        if desc {
            txs.sort_by_key(|tx| Reverse(tx.timestamp));
        } else {
            txs.sort_by_key(|tx| tx.timestamp);
        }

        Ok(txs
            .into_iter()
            .skip(offset as usize)
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }
}

fn is_relevant(tx: &TransactionRecord, signer: Option<Address>, involved: Option<Address>) -> bool {
    match (signer, involved) {
        (Some(signer), _) => tx.signer == signer,
        (None, Some(involved)) => tx.updated_addresses.contains(&involved),
        (None, None) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{HashDigest, TxId};
    use crate::rich::document::{DocumentBackend, DocumentConfig};
    use crate::storage::MemoryStore;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn setup(blocks: u8) -> (tempfile::TempDir, RichStore<MemoryStore>) {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = DocumentBackend::open(&DocumentConfig {
            path: temp_dir.path().join("index"),
        })
        .unwrap();
        let store = RichStore::new(MemoryStore::new(), Box::new(backend), 16);

        let chain = Uuid::new_v4();
        store.set_canonical_chain_id(chain).unwrap();
        for i in 0..blocks {
            let signer = Address::new([i % 2; 20]);
            let tx = TransactionRecord::builder(TxId::new([i; 32]), signer, i as i64)
                .updates(Address::new([0xaa; 20]))
                .build();
            let txs = if i == 0 { vec![] } else { vec![tx] };
            let mut block = BlockRecord::new(i as i64, HashDigest::new([i; 32]), None, txs);
            if i % 2 == 1 {
                block = block.with_miner(Address::new([0xbb; 20]));
            }
            store.put_block(&block).unwrap();
            store.append_index(chain, block.hash()).unwrap();
        }
        (temp_dir, store)
    }

    #[test]
    fn test_negative_offset_counts_from_tip() {
        let (_dir, store) = setup(10);
        let explorer = Explorer::new(&store);
        assert_eq!(explorer.tip_index().unwrap(), Some(9));

        // -3 on a tip at height 9 starts at offset 7
        let txs = explorer.list_transactions(None, None, false, -3, None).unwrap();
        assert_eq!(txs.iter().map(|tx| tx.nonce).collect::<Vec<_>>(), vec![8, 9]);

        assert!(explorer
            .list_transactions(None, None, false, -11, None)
            .unwrap()
            .is_empty());
        assert!(explorer
            .list_transactions(None, None, false, 10, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_filters_and_order() {
        let (_dir, store) = setup(10);
        let explorer = Explorer::new(&store);

        let by_signer = explorer
            .list_transactions(Some(Address::new([1; 20])), None, true, 0, Some(2))
            .unwrap();
        assert_eq!(by_signer.iter().map(|tx| tx.nonce).collect::<Vec<_>>(), vec![9, 7]);

        let involved = explorer
            .list_transactions(None, Some(Address::new([0xaa; 20])), false, 0, None)
            .unwrap();
        assert_eq!(involved.len(), 9);
    }

    #[test]
    fn test_list_blocks() {
        let (_dir, store) = setup(6);
        let explorer = Explorer::new(&store);

        let all = explorer.list_blocks(true, 0, Some(3), false, None).unwrap();
        assert_eq!(all.iter().map(|b| b.index()).collect::<Vec<_>>(), vec![5, 4, 3]);

        let non_empty = explorer.list_blocks(false, 0, None, true, None).unwrap();
        assert_eq!(non_empty.first().map(|b| b.index()), Some(1));

        let mined = explorer
            .list_blocks(false, 0, None, false, Some(Address::new([0xbb; 20])))
            .unwrap();
        assert_eq!(mined.iter().map(|b| b.index()).collect::<Vec<_>>(), vec![1, 3, 5]);
    }

    #[test]
    fn test_no_canonical_chain_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = DocumentBackend::open(&DocumentConfig {
            path: temp_dir.path().join("index"),
        })
        .unwrap();
        let store = RichStore::new(MemoryStore::new(), Box::new(backend), 4);
        let explorer = Explorer::new(&store);
        assert!(explorer.list_blocks(false, 0, None, false, None).unwrap().is_empty());
    }

    #[test]
    fn test_staged_transactions() {
        let (_dir, store) = setup(1);
        let now = Utc::now();
        let ids: Vec<TxId> = (0..3u8)
            .map(|i| {
                let tx = TransactionRecord::builder(TxId::new([100 + i; 32]), Address::new([i; 20]), 0)
                    .timestamp(now + Duration::seconds(i as i64))
                    .build();
                store.put_transaction(&tx).unwrap();
                tx.id
            })
            .collect();
        store.stage_transaction_ids(&ids).unwrap();

        let explorer = Explorer::new(&store);
        let desc = explorer
            .list_staged_transactions(None, None, true, 1, None)
            .unwrap();
        assert_eq!(desc.iter().map(|tx| tx.id).collect::<Vec<_>>(), vec![ids[1], ids[0]]);

        let by_signer = explorer
            .list_staged_transactions(Some(Address::new([2; 20])), None, false, 0, None)
            .unwrap();
        assert_eq!(by_signer.len(), 1);

        assert!(matches!(
            explorer.list_staged_transactions(None, None, false, -1, None),
            Err(QueryError::InvalidOffset(-1))
        ));
    }
}
