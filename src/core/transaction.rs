//! Transaction records
//!
//! Transactions arrive already signed and validated; the store only keeps
//! them and derives index rows from them.

use crate::core::types::{serde_hex, Address, HashDigest, TxId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// Transaction Record
// =============================================================================

/// An immutable transaction keyed by its id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Transaction id
    pub id: TxId,
    /// Per-signer monotonic nonce
    pub nonce: i64,
    /// Address of the signer
    pub signer: Address,
    /// Signature over the transaction payload
    #[serde(with = "serde_hex")]
    pub signature: Vec<u8>,
    /// Signing timestamp
    pub timestamp: DateTime<Utc>,
    /// Compressed public key of the signer
    #[serde(with = "serde_hex")]
    pub public_key: Vec<u8>,
    /// Genesis block this transaction was made for
    pub genesis_hash: Option<HashDigest>,
    /// Addresses whose state this transaction touches
    pub updated_addresses: BTreeSet<Address>,
    /// Encoded size in bytes
    pub size: u32,
}

impl TransactionRecord {
    /// Start building a transaction with empty signature material
    pub fn builder(id: TxId, signer: Address, nonce: i64) -> TransactionBuilder {
        TransactionBuilder::new(id, signer, nonce)
    }
}

// =============================================================================
// Transaction Builder
// =============================================================================

/// Builder for transaction records
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    record: TransactionRecord,
}

impl TransactionBuilder {
    pub fn new(id: TxId, signer: Address, nonce: i64) -> Self {
        Self {
            record: TransactionRecord {
                id,
                nonce,
                signer,
                signature: Vec::new(),
                timestamp: Utc::now(),
                public_key: Vec::new(),
                genesis_hash: None,
                updated_addresses: BTreeSet::new(),
                size: 0,
            },
        }
    }

    pub fn signature(mut self, signature: Vec<u8>) -> Self {
        self.record.signature = signature;
        self
    }

    pub fn public_key(mut self, public_key: Vec<u8>) -> Self {
        self.record.public_key = public_key;
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.record.timestamp = timestamp;
        self
    }

    pub fn genesis_hash(mut self, genesis_hash: HashDigest) -> Self {
        self.record.genesis_hash = Some(genesis_hash);
        self
    }

    /// Add one updated address (duplicates collapse)
    pub fn updates(mut self, address: Address) -> Self {
        self.record.updated_addresses.insert(address);
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.record.size = size;
        self
    }

    pub fn build(self) -> TransactionRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_updated_addresses_are_deduplicated() {
        let tx = TransactionRecord::builder(TxId::new([1; 32]), Address::new([2; 20]), 7)
            .updates(Address::new([3; 20]))
            .updates(Address::new([3; 20]))
            .updates(Address::new([4; 20]))
            .build();

        assert_eq!(tx.nonce, 7);
        assert_eq!(tx.updated_addresses.len(), 2);
    }

    #[test]
    fn test_json_round_trip_keeps_bytes() {
        let tx = TransactionRecord::builder(TxId::new([9; 32]), Address::new([8; 20]), 0)
            .signature(vec![0xde, 0xad])
            .public_key(vec![0x02, 0x03])
            .build();

        let json = serde_json::to_string(&tx).unwrap();
        assert!(json.contains("\"dead\""));
        let back: TransactionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tx);
    }
}
