//! Secondary indices over a primary store
//!
//! This module provides:
//! - Reference rows derived from blocks and transactions
//! - Two index backends (RocksDB documents, SQLite bulk loads)
//! - A block digest cache
//! - The `RichStore` facade and the explorer query layer

pub mod backend;
pub mod cache;
pub mod document;
pub mod error;
pub mod explorer;
pub mod facade;
pub mod references;
pub mod relational;

pub use backend::IndexBackend;
pub use cache::{BlockDigestCache, CacheStats, DEFAULT_CACHE_CAPACITY};
pub use document::{DocumentBackend, DocumentConfig};
pub use error::{IndexError, IndexResult};
pub use explorer::{Explorer, QueryError, QueryResult};
pub use facade::RichStore;
pub use references::{
    BlockReference, IndexRows, Page, SignerReference, TxReference, UpdatedAddressReference,
};
pub use relational::{
    BulkLoader, Clock, FlushPolicy, LoadReport, ManualClock, RelationalBackend, RelationalConfig,
    SystemClock, Table,
};
