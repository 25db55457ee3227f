//! Primary store: the contract, an in-memory implementation and persistence

pub mod memory;
pub mod persistence;
pub mod store;

pub use memory::{MemoryStore, StoreState};
pub use persistence::{load_from_file, save_to_file};
pub use store::{Store, StoreError, StoreResult};
