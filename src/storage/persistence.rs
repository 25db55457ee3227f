//! Primary store persistence
//!
//! Saves and loads `MemoryStore` snapshots as JSON files.

use crate::storage::memory::{MemoryStore, StoreState};
use crate::storage::store::StoreResult;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Save a store snapshot to `path`
///
/// The snapshot is written to a sibling temporary file and renamed into place.
pub fn save_to_file(store: &MemoryStore, path: &Path) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let temp_path = path.with_extension("json.tmp");
    let file = fs::File::create(&temp_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &store.snapshot())?;
    writer.flush()?;

    fs::rename(&temp_path, path)?;
    log::debug!("Saved store snapshot to {}", path.display());
    Ok(())
}

/// Load a store snapshot from `path`
pub fn load_from_file(path: &Path) -> StoreResult<MemoryStore> {
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    let state: StoreState = serde_json::from_reader(reader)?;
    Ok(MemoryStore::from_state(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Address, BlockRecord, HashDigest, TransactionRecord, TxId};
    use crate::storage::Store;
    use uuid::Uuid;

    #[test]
    fn test_save_load_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("store.json");

        let store = MemoryStore::new();
        let tx = TransactionRecord::builder(TxId::new([1; 32]), Address::new([2; 20]), 0)
            .updates(Address::new([3; 20]))
            .build();
        let block = BlockRecord::new(0, HashDigest::new([4; 32]), None, vec![tx]);
        let chain = Uuid::new_v4();
        store.put_block(&block).unwrap();
        store.append_index(chain, block.hash()).unwrap();
        store.set_canonical_chain_id(chain).unwrap();

        save_to_file(&store, &path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = load_from_file(&path).unwrap();
        assert_eq!(loaded.get_block(block.hash()).unwrap(), Some(block));
        assert_eq!(loaded.canonical_chain_id().unwrap(), Some(chain));
        assert_eq!(loaded.count_index(chain).unwrap(), 1);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(load_from_file(&temp_dir.path().join("absent.json")).is_err());
    }
}
