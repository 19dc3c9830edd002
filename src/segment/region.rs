//! Shared-memory segment mapping

use std::fs::File;

use memmap2::{MmapMut, MmapOptions};
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;

use crate::error::{Result, StorageError};

use super::config::{shm_object_name, SegmentConfig};

/// A mapped POSIX shared-memory segment.
///
/// The mapping is shared (`MAP_SHARED`), so writes are visible to every
/// process holding the same segment open. Unlinking the backing object does
/// not invalidate existing mappings; handles created before the unlink keep
/// operating against orphaned memory.
#[derive(Debug)]
pub struct SharedSegment {
    /// Store name (without the shm namespace prefix)
    name: String,
    /// Memory-mapped segment
    mmap: MmapMut,
    /// Backing shm object, kept open for the lifetime of the mapping
    _file: File,
    /// Mapped length in bytes
    len: usize,
}

impl SharedSegment {
    /// Create a new named segment, failing if one of that name already exists
    pub fn create(config: &SegmentConfig) -> Result<Self> {
        config.validate()?;

        let shm_name = config.shm_name();
        let fd = shm_open(
            shm_name.as_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::from_bits_truncate(config.permissions),
        )
        .map_err(|e| StorageError::cannot_create(&config.name, e.desc()))?;

        let file = File::from(fd);

        // The object is zero-filled up to the requested capacity; a partial
        // failure past this point must not leak a half-built named object.
        let sized_and_mapped = file
            .set_len(config.size as u64)
            .map_err(|e| StorageError::cannot_create(&config.name, e.to_string()))
            .and_then(|_| Self::map(&file, config.size, &config.name, true));

        match sized_and_mapped {
            Ok(mmap) => Ok(Self {
                name: config.name.clone(),
                mmap,
                _file: file,
                len: config.size,
            }),
            Err(e) => {
                let _ = shm_unlink(shm_name.as_str());
                Err(e)
            }
        }
    }

    /// Map an existing named segment, failing if no such object exists
    pub fn open(name: &str) -> Result<Self> {
        let shm_name = shm_object_name(name);
        let fd = shm_open(
            shm_name.as_str(),
            OFlag::O_RDWR,
            Mode::from_bits_truncate(0o600),
        )
        .map_err(|e| StorageError::cannot_open(name, e.desc()))?;

        let file = File::from(fd);
        let len = file
            .metadata()
            .map_err(|e| StorageError::cannot_open(name, e.to_string()))?
            .len() as usize;

        if len < super::config::MIN_SEGMENT_SIZE {
            return Err(StorageError::cannot_open(
                name,
                "backing object is too small to hold a store",
            ));
        }

        let mmap = Self::map(&file, len, name, false)?;

        Ok(Self {
            name: name.to_string(),
            mmap,
            _file: file,
            len,
        })
    }

    /// Remove the named backing object from the system
    pub fn unlink(name: &str) -> Result<()> {
        let shm_name = shm_object_name(name);
        shm_unlink(shm_name.as_str()).map_err(|e| StorageError::cannot_destroy(name, e.desc()))
    }

    fn map(file: &File, len: usize, name: &str, creating: bool) -> Result<MmapMut> {
        unsafe { MmapOptions::new().len(len).map_mut(file) }.map_err(|e| {
            if creating {
                StorageError::cannot_create(name, e.to_string())
            } else {
                StorageError::cannot_open(name, e.to_string())
            }
        })
    }

    /// Get the name of the segment
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the mapped length of the segment
    pub fn len(&self) -> usize {
        self.len
    }

    /// Get the raw memory slice (read-only)
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    /// Get a mutable base pointer without requiring exclusive access
    ///
    /// # Safety
    /// Caller must serialize writes through the segment's shared lock
    pub unsafe fn base_ptr(&self) -> *mut u8 {
        self.mmap.as_ptr() as *mut u8
    }
}

unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}
