//! Shared-memory pool backing both rings of a channel.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use cosim_core::TransportError;
use memmap2::MmapMut;
use tracing::{debug, warn};

/// A file-backed shared mapping. The creating side owns the file and
/// unlinks it on drop.
#[derive(Debug)]
pub struct ShmPool {
    path: PathBuf,
    map: MmapMut,
    owner: bool,
}

impl ShmPool {
    /// Creates (or truncates) the pool file with `len` zeroed bytes.
    pub fn create(path: &Path, len: usize) -> Result<Self, TransportError> {
        if path.as_os_str().is_empty() {
            return Err(TransportError::InvalidPath(path.to_path_buf()));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(len as u64)?;

        let map = map_shared(&file)?;
        debug!(path = %path.display(), len, "shared memory pool created");
        Ok(Self {
            path: path.to_path_buf(),
            map,
            owner: true,
        })
    }

    /// Maps an existing pool created by the peer.
    pub fn open(path: &Path, min_len: usize) -> Result<Self, TransportError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        if len < min_len {
            return Err(TransportError::Handshake(format!(
                "pool {} is {len} bytes, expected at least {min_len}",
                path.display()
            )));
        }

        let map = map_shared(&file)?;
        debug!(path = %path.display(), len, "shared memory pool mapped");
        Ok(Self {
            path: path.to_path_buf(),
            map,
            owner: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Base of the mapping. Valid for as long as `self` lives.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.map.as_mut_ptr()
    }
}

fn map_shared(file: &File) -> Result<MmapMut, TransportError> {
    // SAFETY: the file length is fixed before mapping and never resized.
    // Concurrent access from the peer process is confined to the ring
    // protocol in `layout`, which synchronizes through the owner byte.
    Ok(unsafe { MmapMut::map_mut(file)? })
}

impl Drop for ShmPool {
    fn drop(&mut self) {
        if self.owner {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to unlink pool");
            }
        }
    }
}
