//! Core record types
//!
//! This module contains the records the store persists and indexes:
//! - Identifiers (block hashes, transaction ids, addresses)
//! - Transactions (signer, nonce, updated addresses)
//! - Blocks and their compact digests

pub mod block;
pub mod transaction;
pub mod types;

pub use block::{BlockDigest, BlockHeader, BlockRecord};
pub use transaction::{TransactionBuilder, TransactionRecord};
pub use types::{Address, HashDigest, IdentifierError, TxId};
