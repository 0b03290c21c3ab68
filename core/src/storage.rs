//! Shared output file written at independent offsets by every segment worker.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};

#[cfg(unix)]
use std::os::unix::fs::FileExt;

/// Cheap to clone; each clone writes through the same handle. Workers own
/// disjoint byte ranges, so positioned writes need no lock.
#[derive(Clone)]
pub struct OutputFile {
    file: Arc<File>,
    path: PathBuf,
}

impl OutputFile {
    /// Opens (creating if needed) without truncating. `preallocate` sets the
    /// file length, which is done once when the segment plan is first made.
    pub fn open(path: &Path, preallocate: Option<u64>) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| CoreError::Io(err.to_string()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| CoreError::Io(format!("{}: {}", path.display(), err)))?;
        if let Some(len) = preallocate {
            file.set_len(len)
                .map_err(|err| CoreError::Io(err.to_string()))?;
        }
        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> CoreResult<()> {
        self.file
            .write_all_at(data, offset)
            .map_err(|err| CoreError::Io(format!("write at {}: {}", offset, err)))
    }

    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> CoreResult<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut file = self
            .file
            .try_clone()
            .map_err(|err| CoreError::Io(err.to_string()))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|err| CoreError::Io(err.to_string()))?;
        file.write_all(data)
            .map_err(|err| CoreError::Io(format!("write at {}: {}", offset, err)))
    }

    pub fn sync(&self) -> CoreResult<()> {
        self.file
            .sync_all()
            .map_err(|err| CoreError::Io(err.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
