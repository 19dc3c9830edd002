//! The storage engine: segment lifecycle, item CRUD and explicit locking

use crate::error::{Result, StorageError};
use crate::item::{self, Item, ItemKind, ItemOpError, ValueSlot};
use crate::layout::arena::Arena;
use crate::layout::constants::NIL;
use crate::layout::directory::{hash_key, DirEntry, Directory};
use crate::layout::header::{SegmentGeometry, SegmentHeader};
use crate::segment::{SegmentConfig, SharedSegment};
use crate::sync::SharedMutex;

/// Usage statistics for a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Segment capacity in bytes, fixed at creation
    pub capacity: usize,
    /// Payload bytes still allocatable in the arena
    pub free_bytes: usize,
    /// Number of live items
    pub item_count: u64,
    /// Number of directory slots
    pub directory_slots: u64,
}

/// A handle onto a named, typed, process-shared key-value store.
///
/// Every process holding a handle maps the same segment; the directory and
/// the values it references are the only shared state. All item operations
/// take the segment's recursive lock for their full duration, so a caller
/// that needs several operations to be atomic can bracket them with
/// [`lock`](Self::lock)/[`unlock`](Self::unlock) without deadlocking the
/// inner acquisitions.
///
/// Destroying a store does not invalidate handles other processes already
/// hold; they keep operating against the orphaned mapping.
#[derive(Debug)]
pub struct SharedStore {
    segment: SharedSegment,
    header: *mut SegmentHeader,
}

unsafe impl Send for SharedStore {}
unsafe impl Sync for SharedStore {}

impl SharedStore {
    /// Create a new named store with the given capacity in bytes.
    ///
    /// Fails with `CannotCreateStorage` if a store of that name already
    /// exists or the OS-level allocation fails.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        let config = SegmentConfig::new(name, size);
        let segment = SharedSegment::create(&config)?;

        let geometry = SegmentGeometry::for_capacity(segment.len()).ok_or_else(|| {
            StorageError::cannot_create(name, "capacity too small for store layout")
        })?;

        let base = unsafe { segment.base_ptr() };
        let header = base as *mut SegmentHeader;
        unsafe {
            SegmentHeader::initialize(header, geometry, segment.len());
            (*header).mutex.init();
            Arena::attach(base).format();
            // Directory slots rely on the object being zero-filled at
            // creation: every slot starts out empty.
            (*header).publish_ready();
        }

        Ok(Self { segment, header })
    }

    /// Create a new named store with the default 1 MiB capacity
    pub fn create_default(name: &str) -> Result<Self> {
        Self::create(name, crate::segment::config::DEFAULT_SEGMENT_SIZE)
    }

    /// Open an existing named store.
    ///
    /// Fails with `CannotOpenStorage` if no store of that name exists.
    pub fn open(name: &str) -> Result<Self> {
        let segment = SharedSegment::open(name)?;
        let base = unsafe { segment.base_ptr() };
        let header = base as *mut SegmentHeader;

        unsafe {
            (*header).wait_ready(name)?;
            (*header).validate(name, segment.len())?;
        }

        Ok(Self { segment, header })
    }

    /// Remove the named backing object from the system.
    ///
    /// Fails with `CannotDestroyStorage` if removal fails, including when no
    /// such store exists. Handles already open elsewhere are unaffected.
    pub fn destroy(name: &str) -> Result<()> {
        SharedSegment::unlink(name)
    }

    /// Get the name of the store
    pub fn name(&self) -> &str {
        self.segment.name()
    }

    fn mutex(&self) -> &SharedMutex {
        unsafe { &(*self.header).mutex }
    }

    fn arena(&self) -> Arena {
        unsafe { Arena::attach(self.segment.base_ptr()) }
    }

    fn directory(&self) -> Directory {
        unsafe { Directory::attach(self.segment.base_ptr()) }
    }

    /// Set `key` to the given item, creating, updating or replacing as needed
    pub fn set_item(&self, key: &str, item: impl Into<Item>) -> Result<()> {
        let item = item.into();
        let _guard = self.mutex().guard();
        let arena = self.arena();
        let directory = self.directory();

        match directory.find(key, &arena) {
            Some(slot) => {
                let entry = unsafe { &mut *directory.entry_ptr(slot) };
                let kind = ItemKind::from_code(entry.kind)
                    .ok_or_else(|| StorageError::unknown_type(key, entry.kind))?;

                if kind == item.kind() {
                    self.overwrite_in_place(key, entry, &item, &arena)
                } else {
                    self.replace_with_new_kind(key, slot, entry, &item, &arena, &directory)
                }
            }
            None => self.insert_new(key, &item, &arena, &directory),
        }
    }

    /// Same-kind update: the value is overwritten through `write`, the tag
    /// through the directory entry; the entry itself stays put.
    fn overwrite_in_place(
        &self,
        key: &str,
        entry: &mut DirEntry,
        item: &Item,
        arena: &Arena,
    ) -> Result<()> {
        let mut slot = ValueSlot {
            off: entry.val_off,
            len: entry.val_len,
            cap: entry.val_cap,
        };
        item::write_value(arena, &mut slot, &item.value)
            .map_err(|e| construct_status(key, e))?;
        entry.val_off = slot.off;
        entry.val_len = slot.len;
        entry.val_cap = slot.cap;

        item::rewrite_string(
            arena,
            &mut entry.tag_off,
            &mut entry.tag_len,
            &mut entry.tag_cap,
            &item.tag,
        )
        .map_err(|e| construct_status(key, e))?;
        Ok(())
    }

    /// Type transition: destroy the old value first; only once that has
    /// succeeded is the entry rewritten for the new kind. A failed
    /// destruction leaves directory and value exactly as they were.
    fn replace_with_new_kind(
        &self,
        key: &str,
        slot: u64,
        entry: &mut DirEntry,
        item: &Item,
        arena: &Arena,
        directory: &Directory,
    ) -> Result<()> {
        let old_value = ValueSlot {
            off: entry.val_off,
            len: entry.val_len,
            cap: entry.val_cap,
        };
        item::destroy_value(arena, old_value).map_err(|_| StorageError::cannot_replace(key))?;
        entry.val_off = NIL;
        entry.val_len = 0;
        entry.val_cap = 0;

        match item::construct_value(arena, &item.value) {
            Ok(new_value) => {
                entry.kind = item.kind().code();
                entry.val_off = new_value.off;
                entry.val_len = new_value.len;
                entry.val_cap = new_value.cap;
                item::rewrite_string(
                    arena,
                    &mut entry.tag_off,
                    &mut entry.tag_len,
                    &mut entry.tag_cap,
                    &item.tag,
                )
                .map_err(|e| construct_status(key, e))
            }
            Err(e) => {
                // The old value is gone and the new one never existed; the
                // entry must not claim otherwise
                let _ = directory.vacate(slot, arena);
                Err(construct_status(key, e))
            }
        }
    }

    /// First set for this key: stage every allocation, then occupy a slot.
    /// Any failure releases the partial allocations and leaves the
    /// directory untouched.
    fn insert_new(
        &self,
        key: &str,
        item: &Item,
        arena: &Arena,
        directory: &Directory,
    ) -> Result<()> {
        let slot = directory.probe_vacant(key).ok_or_else(|| {
            StorageError::cannot_construct(key, "directory is full")
        })?;

        let (key_off, _) = arena
            .alloc(key.len().max(1))
            .map_err(|e| construct_status(key, e.into()))?;
        if let Err(e) = arena.write_bytes(key_off, key.as_bytes()) {
            let _ = arena.free(key_off);
            return Err(construct_status(key, e.into()));
        }

        let value = match item::construct_value(arena, &item.value) {
            Ok(value) => value,
            Err(e) => {
                let _ = arena.free(key_off);
                return Err(construct_status(key, e));
            }
        };

        let (mut tag_off, mut tag_len, mut tag_cap) = (NIL, 0u64, 0u64);
        if let Err(e) =
            item::rewrite_string(arena, &mut tag_off, &mut tag_len, &mut tag_cap, &item.tag)
        {
            let _ = item::destroy_value(arena, value);
            let _ = arena.free(key_off);
            return Err(construct_status(key, e));
        }

        let mut entry = DirEntry::empty();
        entry.kind = item.kind().code();
        entry.key_hash = hash_key(key);
        entry.key_off = key_off;
        entry.key_len = key.len() as u64;
        entry.tag_off = tag_off;
        entry.tag_len = tag_len;
        entry.tag_cap = tag_cap;
        entry.val_off = value.off;
        entry.val_len = value.len;
        entry.val_cap = value.cap;
        directory.occupy(slot, entry);
        Ok(())
    }

    /// Get the item stored at `key`.
    ///
    /// Fails with `ItemNotFound` when the key is absent, and conservatively
    /// reports the same when a directory entry exists but its value cannot
    /// be read back (segment corruption).
    pub fn get_item(&self, key: &str) -> Result<Item> {
        let _guard = self.mutex().guard();
        let arena = self.arena();
        let directory = self.directory();

        let slot = directory
            .find(key, &arena)
            .ok_or_else(|| StorageError::not_found(key))?;
        let entry = unsafe { &*directory.entry_ptr(slot) };
        let kind = ItemKind::from_code(entry.kind)
            .ok_or_else(|| StorageError::unknown_type(key, entry.kind))?;

        let value = item::read_value(
            &arena,
            kind,
            ValueSlot {
                off: entry.val_off,
                len: entry.val_len,
                cap: entry.val_cap,
            },
        )
        .map_err(|_| StorageError::not_found(key))?;
        let tag = item::read_string(&arena, entry.tag_off, entry.tag_len)
            .map_err(|_| StorageError::not_found(key))?;

        Ok(Item { value, tag })
    }

    /// Remove the item stored at `key`.
    ///
    /// Fails with `ItemNotFound` when the key is absent, and with
    /// `CannotRemoveItem` when the value cannot be destroyed (entry and
    /// value are then left in place, still consistent with each other).
    pub fn remove_item(&self, key: &str) -> Result<()> {
        let _guard = self.mutex().guard();
        let arena = self.arena();
        let directory = self.directory();

        let slot = directory
            .find(key, &arena)
            .ok_or_else(|| StorageError::not_found(key))?;
        let entry = unsafe { &*directory.entry_ptr(slot) };
        let value = ValueSlot {
            off: entry.val_off,
            len: entry.val_len,
            cap: entry.val_cap,
        };

        // Validate every release up front so the removal is all-or-nothing
        item::validate_value(&arena, value).map_err(|_| StorageError::cannot_remove(key))?;
        directory
            .validate_vacate(slot, &arena)
            .map_err(|_| StorageError::cannot_remove(key))?;

        item::destroy_value(&arena, value).map_err(|_| StorageError::cannot_remove(key))?;
        directory
            .vacate(slot, &arena)
            .map_err(|_| StorageError::cannot_remove(key))?;
        Ok(())
    }

    /// Remove every item, atomically: either the directory ends up empty or
    /// it is left exactly as it was.
    ///
    /// The validation pass proves that every entry's allocations can be
    /// released before anything is touched, so a partial clear cannot
    /// happen.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.mutex().guard();
        let arena = self.arena();
        let directory = self.directory();

        let live = directory.occupied_slots();

        for &slot in &live {
            let entry = unsafe { &*directory.entry_ptr(slot) };
            let value = ValueSlot {
                off: entry.val_off,
                len: entry.val_len,
                cap: entry.val_cap,
            };
            let valid = item::validate_value(&arena, value).is_ok()
                && directory.validate_vacate(slot, &arena).is_ok();
            if !valid {
                let key = item::read_string(&arena, entry.key_off, entry.key_len)
                    .unwrap_or_else(|_| "<unreadable>".to_string());
                return Err(StorageError::cannot_remove(key));
            }
        }

        for &slot in &live {
            let entry = unsafe { &*directory.entry_ptr(slot) };
            let value = ValueSlot {
                off: entry.val_off,
                len: entry.val_len,
                cap: entry.val_cap,
            };
            let _ = item::destroy_value(&arena, value);
            let _ = directory.vacate(slot, &arena);
        }

        directory.reset();
        Ok(())
    }

    /// Number of live items
    pub fn len(&self) -> u64 {
        let _guard = self.mutex().guard();
        self.directory().len()
    }

    /// Whether the store holds no items
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current usage statistics
    pub fn stats(&self) -> StoreStats {
        let _guard = self.mutex().guard();
        let header = unsafe { &*self.header };
        StoreStats {
            capacity: self.segment.len(),
            free_bytes: self.arena().free_bytes(),
            item_count: header.item_count,
            directory_slots: header.directory_slots,
        }
    }

    /// Acquire the store's recursive lock, blocking until it is available.
    ///
    /// Item operations acquire the same lock internally, so they may be
    /// called while it is held. The lock is not robust: if a holding process
    /// dies, every waiter blocks forever.
    pub fn lock(&self) {
        self.mutex().lock();
    }

    /// Release the store's recursive lock
    pub fn unlock(&self) {
        self.mutex().unlock();
    }

    /// Try to acquire the lock without blocking; returns whether it was taken
    pub fn try_lock(&self) -> bool {
        self.mutex().try_lock()
    }

    /// Convenience: read a Double value, or a default when the key is absent
    /// or holds a different kind. Useful for lock-bracketed counters.
    pub fn double_or(&self, key: &str, default: f64) -> f64 {
        match self.get_item(key) {
            Ok(item) => item.value.as_double().unwrap_or(default),
            Err(_) => default,
        }
    }
}

fn construct_status(key: &str, err: ItemOpError) -> StorageError {
    match err {
        ItemOpError::OutOfSpace { requested } => StorageError::cannot_construct(
            key,
            format!("segment capacity exhausted ({} bytes requested)", requested),
        ),
        ItemOpError::Corrupt => StorageError::cannot_construct(key, "value storage is corrupt"),
        ItemOpError::Encode(message) => StorageError::cannot_construct(key, message),
    }
}
