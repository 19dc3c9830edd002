//! Segment header: the first structure in every mapped segment

use std::mem::size_of;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::error::{Result, StorageError};
use crate::sync::SharedMutex;

use super::constants::*;
use super::directory::DirEntry;
use super::align_up;

/// Geometry of a segment's interior sections, derived from its capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentGeometry {
    pub directory_offset: u64,
    pub directory_slots: u64,
    pub arena_offset: u64,
    pub arena_size: u64,
}

impl SegmentGeometry {
    /// Compute the interior layout for a segment of the given capacity.
    ///
    /// Returns `None` when the capacity cannot hold the header, the directory
    /// and a usable arena.
    pub fn for_capacity(capacity: usize) -> Option<Self> {
        let directory_offset = align_up(size_of::<SegmentHeader>(), ALLOC_ALIGN);

        let slots = ((capacity / DIRECTORY_BYTES_PER_SLOT) as u64)
            .clamp(MIN_DIRECTORY_SLOTS, MAX_DIRECTORY_SLOTS);
        let directory_bytes = slots as usize * size_of::<DirEntry>();

        let arena_offset = align_up(directory_offset + directory_bytes, ALLOC_ALIGN);
        if capacity <= arena_offset + MIN_BLOCK_SIZE * 4 {
            return None;
        }
        let arena_size = capacity - arena_offset;

        Some(Self {
            directory_offset: directory_offset as u64,
            directory_slots: slots,
            arena_offset: arena_offset as u64,
            arena_size: arena_size as u64,
        })
    }
}

/// Control header at the start of each segment.
///
/// Mutable fields (`free_head`, `item_count`) are only touched while holding
/// the embedded mutex; the bootstrap `state` word is the single field with
/// cross-process ordering semantics of its own.
#[repr(C)]
pub struct SegmentHeader {
    /// Magic number for validation
    pub magic: u64,
    /// On-segment layout version
    pub version: u32,
    /// Bootstrap state, flipped to ready once construction is complete
    state: AtomicU32,
    /// Total segment capacity in bytes
    pub capacity: u64,
    /// Offset of the directory slot table
    pub directory_offset: u64,
    /// Number of directory slots
    pub directory_slots: u64,
    /// Offset of the allocation arena
    pub arena_offset: u64,
    /// Arena size in bytes
    pub arena_size: u64,
    /// Offset of the first free arena block, NIL when exhausted
    pub free_head: u64,
    /// Number of live items
    pub item_count: u64,
    /// The segment's process-shared recursive lock
    pub mutex: SharedMutex,
}

impl SegmentHeader {
    /// Write a fresh header into a zero-filled segment.
    ///
    /// Leaves the segment in the not-ready state; the caller finishes
    /// bootstrap (mutex init, arena format) and then calls
    /// [`publish_ready`](Self::publish_ready).
    ///
    /// # Safety
    /// `header` must point at the base of a mapping of at least `capacity`
    /// bytes that no other process can observe yet.
    pub unsafe fn initialize(header: *mut SegmentHeader, geometry: SegmentGeometry, capacity: usize) {
        std::ptr::write(
            header,
            SegmentHeader {
                magic: STORE_MAGIC,
                version: LAYOUT_VERSION,
                state: AtomicU32::new(STATE_UNINITIALIZED),
                capacity: capacity as u64,
                directory_offset: geometry.directory_offset,
                directory_slots: geometry.directory_slots,
                arena_offset: geometry.arena_offset,
                arena_size: geometry.arena_size,
                free_head: NIL,
                item_count: 0,
                mutex: SharedMutex::uninit(),
            },
        );
    }

    /// Mark bootstrap as complete, making the segment visible to openers
    pub fn publish_ready(&self) {
        self.state.store(STATE_READY, Ordering::Release);
    }

    /// Wait for the creating process to finish bootstrap
    pub fn wait_ready(&self, name: &str) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(BOOTSTRAP_WAIT_MS);
        while self.state.load(Ordering::Acquire) != STATE_READY {
            if Instant::now() >= deadline {
                return Err(StorageError::cannot_open(
                    name,
                    "segment never finished initializing",
                ));
            }
            std::thread::yield_now();
        }
        Ok(())
    }

    /// Validate magic, version and geometry against the mapped length
    pub fn validate(&self, name: &str, mapped_len: usize) -> Result<()> {
        if self.magic != STORE_MAGIC {
            return Err(StorageError::cannot_open(name, "not a shmstore segment"));
        }
        if self.version != LAYOUT_VERSION {
            return Err(StorageError::cannot_open(
                name,
                format!(
                    "layout version mismatch: segment has v{}, this build speaks v{}",
                    self.version, LAYOUT_VERSION
                ),
            ));
        }
        if self.capacity != mapped_len as u64 {
            return Err(StorageError::cannot_open(
                name,
                "segment capacity does not match its backing object",
            ));
        }

        let dir_end = self
            .directory_offset
            .checked_add(self.directory_slots.saturating_mul(size_of::<DirEntry>() as u64));
        let arena_end = self.arena_offset.checked_add(self.arena_size);
        let bounded = matches!((dir_end, arena_end), (Some(d), Some(a))
            if d <= self.arena_offset && a <= self.capacity && self.directory_slots > 0);
        if !bounded {
            return Err(StorageError::cannot_open(name, "segment geometry is corrupt"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_for_default_capacity() {
        let geo = SegmentGeometry::for_capacity(1024 * 1024).unwrap();
        assert_eq!(geo.directory_slots, 1024);
        assert!(geo.directory_offset as usize >= size_of::<SegmentHeader>());
        assert!(geo.arena_offset > geo.directory_offset);
        assert_eq!(geo.arena_offset + geo.arena_size, 1024 * 1024);
    }

    #[test]
    fn test_geometry_slot_clamping() {
        let small = SegmentGeometry::for_capacity(16 * 1024).unwrap();
        assert_eq!(small.directory_slots, MIN_DIRECTORY_SLOTS);

        let huge = SegmentGeometry::for_capacity(64 * 1024 * 1024).unwrap();
        assert_eq!(huge.directory_slots, MAX_DIRECTORY_SLOTS);
    }

    #[test]
    fn test_geometry_rejects_tiny_capacity() {
        assert!(SegmentGeometry::for_capacity(256).is_none());
    }

    #[test]
    fn test_header_validation() {
        let capacity = 64 * 1024;
        let geo = SegmentGeometry::for_capacity(capacity).unwrap();
        let mut storage = vec![0u64; capacity / 8];
        let header = storage.as_mut_ptr() as *mut SegmentHeader;

        unsafe {
            SegmentHeader::initialize(header, geo, capacity);
            let header = &*header;
            assert!(header.validate("t", capacity).is_ok());
            assert!(header.validate("t", capacity - 1).is_err());
            assert!(header.wait_ready("t").is_err());

            header.publish_ready();
            assert!(header.wait_ready("t").is_ok());
        }
    }
}
