//! Staging files
//!
//! A batch owns one append-only file per table, named
//! `<random>.<table>.tmp` inside the instance's staging directory. Anything
//! matching `*.tmp` found there at startup belongs to a batch that was never
//! loaded.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::rich::error::IndexResult;
use crate::rich::relational::schema::Table;

pub const STAGING_EXTENSION: &str = "tmp";
pub const CORRUPT_EXTENSION: &str = "corrupt";

const NAME_LENGTH: usize = 16;

struct StagingFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

/// Five open staging files being appended to
pub struct StagingBatch {
    files: HashMap<Table, StagingFile>,
    rows: usize,
    bytes: u64,
}

impl StagingBatch {
    /// Create fresh, randomly named files for every table
    pub fn create(dir: &Path) -> IndexResult<Self> {
        fs::create_dir_all(dir)?;
        let prefix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NAME_LENGTH)
            .map(char::from)
            .collect();

        let mut files = HashMap::new();
        for table in Table::LOAD_ORDER {
            let path = dir.join(format!("{}.{}.{}", prefix, table.name(), STAGING_EXTENSION));
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)?;
            files.insert(
                table,
                StagingFile {
                    path,
                    writer: BufWriter::new(file),
                },
            );
        }

        Ok(Self {
            files,
            rows: 0,
            bytes: 0,
        })
    }

    /// Append one line to a table's file
    pub fn append(&mut self, table: Table, line: &str) -> IndexResult<()> {
        if let Some(file) = self.files.get_mut(&table) {
            file.writer.write_all(line.as_bytes())?;
            file.writer.write_all(b"\n")?;
            self.rows += 1;
            self.bytes += line.len() as u64 + 1;
        }
        Ok(())
    }

    /// Rows appended since creation
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Bytes appended since creation
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Flush and close every file, returning them in load order
    pub fn seal(self) -> IndexResult<Vec<(Table, PathBuf)>> {
        let mut files = self.files;
        let mut sealed = Vec::with_capacity(files.len());
        for table in Table::LOAD_ORDER {
            if let Some(mut file) = files.remove(&table) {
                file.writer.flush()?;
                file.writer.get_ref().sync_data()?;
                sealed.push((table, file.path));
            }
        }
        Ok(sealed)
    }

    /// Close and delete every file without loading it
    pub fn discard(self) -> IndexResult<()> {
        for (_, file) in self.files {
            drop(file.writer);
            fs::remove_file(&file.path)?;
        }
        Ok(())
    }
}

/// Table a staging file belongs to, from its `<random>.<table>.tmp` name
pub fn table_of(path: &Path) -> Option<Table> {
    if path.extension()? != STAGING_EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (_, table) = stem.split_once('.')?;
    Table::from_name(table)
}

/// Leftover `*.tmp` files in a staging directory, in load order
///
/// Files whose table cannot be recognised are returned with `None`.
pub fn scan_orphans(dir: &Path) -> IndexResult<Vec<(Option<Table>, PathBuf)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut orphans = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().map_or(true, |e| e != STAGING_EXTENSION) {
            continue;
        }
        orphans.push((table_of(&path), path));
    }

    // Unknown tables first, then the regular load order
    orphans.sort_by(|(a, pa), (b, pb)| a.cmp(b).then_with(|| pa.cmp(pb)));
    Ok(orphans)
}

/// Rename a staging file so it is no longer picked up
pub fn quarantine(path: &Path) -> IndexResult<PathBuf> {
    let target = path.with_extension(CORRUPT_EXTENSION);
    fs::rename(path, &target)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_creates_five_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut batch = StagingBatch::create(temp_dir.path()).unwrap();
        batch.append(Table::SignerReferences, "aa;bb;1").unwrap();
        assert_eq!(batch.rows(), 1);
        assert_eq!(batch.bytes(), 8);

        let sealed = batch.seal().unwrap();
        assert_eq!(
            sealed.iter().map(|(t, _)| *t).collect::<Vec<_>>(),
            Table::LOAD_ORDER.to_vec()
        );
        let (_, signer_path) = &sealed[2];
        assert_eq!(fs::read_to_string(signer_path).unwrap(), "aa;bb;1\n");
        assert_eq!(table_of(signer_path), Some(Table::SignerReferences));
    }

    #[test]
    fn test_two_batches_do_not_collide() {
        let temp_dir = tempfile::tempdir().unwrap();
        let first = StagingBatch::create(temp_dir.path()).unwrap();
        let second = StagingBatch::create(temp_dir.path()).unwrap();
        assert_eq!(scan_orphans(temp_dir.path()).unwrap().len(), 10);

        first.discard().unwrap();
        second.discard().unwrap();
        assert!(scan_orphans(temp_dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_scan_orphans_orders_and_flags_unknown() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("x.block.tmp"), "").unwrap();
        fs::write(temp_dir.path().join("x.transaction.tmp"), "").unwrap();
        fs::write(temp_dir.path().join("x.mystery.tmp"), "").unwrap();
        fs::write(temp_dir.path().join("x.block.corrupt"), "").unwrap();

        let orphans = scan_orphans(temp_dir.path()).unwrap();
        let tables: Vec<_> = orphans.iter().map(|(t, _)| *t).collect();
        assert_eq!(tables, vec![None, Some(Table::Transaction), Some(Table::Block)]);
    }

    #[test]
    fn test_quarantine_renames() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("x.block.tmp");
        fs::write(&path, "garbage").unwrap();

        let target = quarantine(&path).unwrap();
        assert!(!path.exists());
        assert_eq!(target, temp_dir.path().join("x.block.corrupt"));
        assert!(scan_orphans(temp_dir.path()).unwrap().is_empty());
    }
}
