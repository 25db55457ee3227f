//! Rich Store: secondary indices for an append-only block store
//!
//! This crate provides:
//! - A primary store contract with an in-memory, JSON-persisted implementation
//! - Transaction, signer and updated-address reference indices
//! - A RocksDB document backend with synchronous upserts
//! - A SQLite relational backend fed by batched bulk loads with crash recovery
//! - An LRU block digest cache
//! - Paginated explorer queries and a flat-file export tool
//!
//! # Example
//!
//! ```rust,no_run
//! use rich_store::core::{Address, BlockRecord, HashDigest, TransactionRecord, TxId};
//! use rich_store::rich::{Page, RelationalBackend, RelationalConfig, RichStore};
//! use rich_store::storage::{MemoryStore, Store};
//!
//! let backend = RelationalBackend::open(&RelationalConfig::in_dir("/tmp/rich")).unwrap();
//! let store = RichStore::new(MemoryStore::new(), Box::new(backend), 512);
//!
//! let signer = Address::new([1; 20]);
//! let tx = TransactionRecord::builder(TxId::new([7; 32]), signer, 0).build();
//! let block = BlockRecord::new(0, HashDigest::new([9; 32]), None, vec![tx]);
//! store.put_block(&block).unwrap();
//! store.flush().unwrap();
//!
//! let ids = store
//!     .iterate_transaction_ids_by_signer(signer, Page::descending().with_limit(10))
//!     .unwrap();
//! println!("{} transaction(s) signed by {}", ids.len(), signer);
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod export;
pub mod rich;
pub mod storage;

// Re-export commonly used types
pub use config::{BackendConfig, ConfigError, RichStoreConfig};
pub use crate::core::{Address, BlockDigest, BlockRecord, HashDigest, TransactionRecord, TxId};
pub use export::{export_store, ExportReport};
pub use rich::{
    BlockDigestCache, DocumentBackend, DocumentConfig, Explorer, IndexBackend, IndexError, Page,
    RelationalBackend, RelationalConfig, RichStore,
};
pub use storage::{MemoryStore, Store, StoreError};
