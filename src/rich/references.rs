//! Reference rows and their derivation from blocks
//!
//! Every transaction in a block yields:
//! - one `TxReference` (transaction -> containing block)
//! - one `SignerReference` (signer -> transaction)
//! - one `UpdatedAddressReference` per updated address
//!
//! Every block additionally yields one `BlockReference` for block listings.

use crate::core::{Address, BlockRecord, HashDigest, TransactionRecord, TxId};
use serde::{Deserialize, Serialize};

// =============================================================================
// Reference Rows
// =============================================================================

/// Transaction to containing block, upserted by transaction id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReference {
    pub tx_id: TxId,
    pub block_hash: HashDigest,
    pub tx_nonce: i64,
}

/// Signer to transaction, one row per (signer, transaction)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerReference {
    pub signer: Address,
    pub tx_id: TxId,
    pub tx_nonce: i64,
}

/// Updated address to transaction, one row per (address, transaction)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatedAddressReference {
    pub updated_address: Address,
    pub tx_id: TxId,
    pub tx_nonce: i64,
}

/// Block listing row, one per block hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockReference {
    pub hash: HashDigest,
    pub index: i64,
    pub miner: Option<Address>,
    pub tx_count: u32,
}

impl BlockReference {
    pub fn from_block(block: &BlockRecord) -> Self {
        Self {
            hash: block.hash(),
            index: block.index(),
            miner: block.header.miner,
            tx_count: block.transactions.len() as u32,
        }
    }
}

// =============================================================================
// Pagination
// =============================================================================

/// Ordering, offset and limit of an index scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Highest ordering key first
    pub desc: bool,
    /// Rows to skip
    pub offset: usize,
    /// Maximum rows to return
    pub limit: usize,
}

impl Page {
    pub fn new(desc: bool, offset: usize, limit: usize) -> Self {
        Self {
            desc,
            offset,
            limit,
        }
    }

    pub fn ascending() -> Self {
        Self::default()
    }

    pub fn descending() -> Self {
        Self {
            desc: true,
            ..Self::default()
        }
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            desc: false,
            offset: 0,
            limit: usize::MAX,
        }
    }
}

// =============================================================================
// Index Rows
// =============================================================================

/// All reference rows derived from one block or transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRows {
    pub block: Option<BlockReference>,
    pub tx_references: Vec<TxReference>,
    pub signer_references: Vec<SignerReference>,
    pub updated_address_references: Vec<UpdatedAddressReference>,
}

impl IndexRows {
    /// Rows for a block and every transaction it carries
    pub fn from_block(block: &BlockRecord) -> Self {
        let mut rows = Self {
            block: Some(BlockReference::from_block(block)),
            ..Self::default()
        };

        for tx in &block.transactions {
            rows.tx_references.push(TxReference {
                tx_id: tx.id,
                block_hash: block.hash(),
                tx_nonce: tx.nonce,
            });
            rows.push_transaction(tx);
        }

        rows
    }

    /// Rows for a transaction that is not (yet) attached to a block
    pub fn from_transaction(tx: &TransactionRecord) -> Self {
        let mut rows = Self::default();
        rows.push_transaction(tx);
        rows
    }

    fn push_transaction(&mut self, tx: &TransactionRecord) {
        self.signer_references.push(SignerReference {
            signer: tx.signer,
            tx_id: tx.id,
            tx_nonce: tx.nonce,
        });
        self.updated_address_references
            .extend(
                tx.updated_addresses
                    .iter()
                    .map(|address| UpdatedAddressReference {
                        updated_address: *address,
                        tx_id: tx.id,
                        tx_nonce: tx.nonce,
                    }),
            );
    }

    /// Number of transaction-level rows
    pub fn len(&self) -> usize {
        self.tx_references.len()
            + self.signer_references.len()
            + self.updated_address_references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.block.is_none() && self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tx(id: u8, nonce: i64, updated: &[u8]) -> TransactionRecord {
        let mut builder = TransactionRecord::builder(TxId::new([id; 32]), Address::new([0xaa; 20]), nonce);
        for a in updated {
            builder = builder.updates(Address::new([*a; 20]));
        }
        builder.build()
    }

    #[test]
    fn test_row_counts_match_block_contents() {
        let txs = vec![make_tx(1, 0, &[1, 2]), make_tx(2, 1, &[]), make_tx(3, 2, &[3, 4, 5])];
        let block = BlockRecord::new(9, HashDigest::new([9; 32]), None, txs);

        let rows = IndexRows::from_block(&block);
        assert_eq!(rows.tx_references.len(), 3);
        assert_eq!(rows.signer_references.len(), 3);
        assert_eq!(rows.updated_address_references.len(), 5);
        assert_eq!(rows.len(), 11);
        assert_eq!(
            rows.block,
            Some(BlockReference {
                hash: HashDigest::new([9; 32]),
                index: 9,
                miner: None,
                tx_count: 3,
            })
        );
        assert!(rows
            .tx_references
            .iter()
            .all(|r| r.block_hash == HashDigest::new([9; 32])));
    }

    #[test]
    fn test_transaction_rows_have_no_block() {
        let rows = IndexRows::from_transaction(&make_tx(4, 3, &[6]));
        assert!(rows.block.is_none());
        assert!(rows.tx_references.is_empty());
        assert_eq!(rows.signer_references[0].tx_nonce, 3);
        assert_eq!(rows.updated_address_references.len(), 1);
    }

    #[test]
    fn test_empty_block_still_lists() {
        let block = BlockRecord::new(0, HashDigest::new([0; 32]), None, vec![]);
        let rows = IndexRows::from_block(&block);
        assert_eq!(rows.len(), 0);
        assert!(!rows.is_empty());
    }
}
