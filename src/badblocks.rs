//! Persisted bad block lists.
//!
//! Plain text, one decimal block address per line. Blank lines and lines
//! starting with `#` are ignored when reading.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::blkdev::{BlockAddress, DeviceIdentity};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}:{line}: invalid block address `{content}`", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        content: String,
    },
}

pub trait BadBlockStore {
    /// Load a list. Fails if the file is missing or unreadable.
    fn read(&self, path: &Path) -> Result<Vec<BlockAddress>, StoreError>;

    /// Replace whatever is stored at `path` with `blocks`.
    fn write(&self, path: &Path, blocks: &[BlockAddress]) -> Result<(), StoreError>;
}

/// Text file store. Lists come back sorted and deduplicated.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextFileStore;

impl BadBlockStore for TextFileStore {
    fn read(&self, path: &Path) -> Result<Vec<BlockAddress>, StoreError> {
        let io_err = |source| StoreError::Io { path: path.to_path_buf(), source };
        let reader = BufReader::new(File::open(path).map_err(io_err)?);

        let mut blocks = BTreeSet::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(io_err)?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let block = trimmed.parse::<BlockAddress>().map_err(|_| StoreError::Parse {
                path: path.to_path_buf(),
                line: idx + 1,
                content: trimmed.to_string(),
            })?;
            blocks.insert(block);
        }
        Ok(blocks.into_iter().collect())
    }

    fn write(&self, path: &Path, blocks: &[BlockAddress]) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io { path: path.to_path_buf(), source };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let unique: BTreeSet<_> = blocks.iter().copied().collect();
        let mut out = BufWriter::new(File::create(path).map_err(io_err)?);
        for block in unique {
            writeln!(out, "{block}").map_err(io_err)?;
        }
        out.flush().map_err(io_err)
    }
}

/// Default list location for a device when the operator names none.
pub fn default_filepath(identity: &DeviceIdentity) -> PathBuf {
    PathBuf::from(format!("badblocks.{}.txt", identity.label()))
}
