//! Block records and their compact digests
//!
//! A block carries its header fields and the transactions it includes.
//! The digest keeps the header and only the transaction ids.

use crate::core::transaction::TransactionRecord;
use crate::core::types::{serde_hex, Address, HashDigest, TxId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Block Header
// =============================================================================

/// Header fields shared by full blocks and digests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height
    pub index: i64,
    /// Block hash
    pub hash: HashDigest,
    /// Hash computed before action evaluation
    pub pre_evaluation_hash: HashDigest,
    /// State root after evaluation
    pub state_root_hash: Option<HashDigest>,
    /// Difficulty of this block
    pub difficulty: i64,
    /// Cumulative difficulty up to this block
    pub total_difficulty: i64,
    /// Proof of work nonce
    #[serde(with = "serde_hex")]
    pub nonce: Vec<u8>,
    /// Miner address
    pub miner: Option<Address>,
    /// Previous block hash (none for genesis)
    pub previous_hash: Option<HashDigest>,
    /// Block timestamp
    pub timestamp: DateTime<Utc>,
    /// Hash over the included transactions (none when empty)
    pub tx_hash: Option<HashDigest>,
    /// Protocol version the block was produced under
    pub protocol_version: i32,
    /// Encoded size in bytes
    pub size: u32,
}

// =============================================================================
// Block Record
// =============================================================================

/// An immutable block keyed by its hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub header: BlockHeader,
    pub transactions: Vec<TransactionRecord>,
}

impl BlockRecord {
    /// Create a block with default header values for the remaining fields
    pub fn new(
        index: i64,
        hash: HashDigest,
        previous_hash: Option<HashDigest>,
        transactions: Vec<TransactionRecord>,
    ) -> Self {
        let header = BlockHeader {
            index,
            hash,
            pre_evaluation_hash: hash,
            state_root_hash: None,
            difficulty: 0,
            total_difficulty: 0,
            nonce: Vec::new(),
            miner: None,
            previous_hash,
            timestamp: Utc::now(),
            tx_hash: None,
            protocol_version: 0,
            size: 0,
        };
        Self {
            header,
            transactions,
        }
    }

    /// Set the miner address
    pub fn with_miner(mut self, miner: Address) -> Self {
        self.header.miner = Some(miner);
        self
    }

    pub fn index(&self) -> i64 {
        self.header.index
    }

    pub fn hash(&self) -> HashDigest {
        self.header.hash
    }

    /// Compact digest for caching
    pub fn to_digest(&self) -> BlockDigest {
        BlockDigest {
            header: self.header.clone(),
            tx_ids: self.transactions.iter().map(|tx| tx.id).collect(),
        }
    }
}

// =============================================================================
// Block Digest
// =============================================================================

/// Block header plus the ids of its transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDigest {
    pub header: BlockHeader,
    pub tx_ids: Vec<TxId>,
}

impl BlockDigest {
    pub fn hash(&self) -> HashDigest {
        self.header.hash
    }

    pub fn index(&self) -> i64 {
        self.header.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_keeps_transaction_order() {
        let txs = (0..3u8)
            .map(|i| TransactionRecord::builder(TxId::new([i; 32]), Address::new([1; 20]), i as i64).build())
            .collect();
        let block = BlockRecord::new(5, HashDigest::new([5; 32]), None, txs);

        let digest = block.to_digest();
        assert_eq!(digest.index(), 5);
        assert_eq!(digest.hash(), block.hash());
        assert_eq!(
            digest.tx_ids,
            vec![TxId::new([0; 32]), TxId::new([1; 32]), TxId::new([2; 32])]
        );
    }
}
