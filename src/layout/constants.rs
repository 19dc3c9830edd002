//! Layout constants shared by every process mapping a segment

/// Magic number identifying a shmstore segment ("SHMSTORE")
pub const STORE_MAGIC: u64 = 0x5348_4D53_544F_5245;

/// On-segment layout version; all participating processes must agree
pub const LAYOUT_VERSION: u32 = 1;

/// Alignment for every arena allocation and layout section
pub const ALLOC_ALIGN: usize = 8;

/// Null offset: no structure ever lives at the start of the segment, so
/// offset zero doubles as the "no allocation" sentinel
pub const NIL: u64 = 0;

/// Size of the per-block bookkeeping header in the arena
pub const BLOCK_HEADER_SIZE: usize = 16;

/// Smallest arena block (header plus one aligned payload unit)
pub const MIN_BLOCK_SIZE: usize = BLOCK_HEADER_SIZE + ALLOC_ALIGN;

/// Link value marking an arena block as live (not on the free list)
pub const ALLOCATED_TAG: u64 = u64::MAX;

/// Directory sizing rule: one slot per this many bytes of capacity
pub const DIRECTORY_BYTES_PER_SLOT: usize = 1024;

/// Bounds on the directory slot count
pub const MIN_DIRECTORY_SLOTS: u64 = 64;
pub const MAX_DIRECTORY_SLOTS: u64 = 8192;

/// How long an opener waits for the creating process to finish bootstrap
pub const BOOTSTRAP_WAIT_MS: u64 = 2000;

/// Bootstrap state values (the segment is zero-filled at creation, so the
/// uninitialized state must be zero)
pub const STATE_UNINITIALIZED: u32 = 0;
pub const STATE_READY: u32 = 1;
