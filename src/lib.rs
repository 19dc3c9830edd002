//! # shmstore - Process-Shared Typed Key-Value Store
//!
//! shmstore is a named, typed key-value store whose backing storage is a
//! POSIX shared-memory segment mapped by any number of independent OS
//! processes. It gives cooperating processes a lightweight, low-latency
//! shared data bag (counters, flags, small documents) without running a
//! separate service.
//!
//! ## Features
//!
//! - **Named stores**: create once, open from any process, destroy by name
//! - **Typed items**: bool, double, UTF-8 text, JSON documents and null,
//!   each carrying a free-form tag
//! - **Offset-only layout**: nothing inside the segment is a pointer, so
//!   every process can map it at a different base address
//! - **Cross-process locking**: one recursive, process-shared mutex per
//!   store serializes all access; explicit `lock`/`unlock` brackets make
//!   multi-operation sequences atomic
//! - **Fixed capacity**: a store never grows past its creation size;
//!   exhaustion is reported, not hidden
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │              Shared segment (shm)              │
//! ├──────────┬──────────────────┬──────────────────┤
//! │  Header  │    Directory     │      Arena       │
//! │  magic   │  key → kind,tag  │  key/tag/value   │
//! │  mutex   │  (open-addressed │  bytes (free-    │
//! │  geometry│   slot table)    │  list allocator) │
//! └──────────┴──────────────────┴──────────────────┘
//!        ▲                ▲               ▲
//!   process A        process B       process C
//!   (own mapping)   (own mapping)   (own mapping)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use shmstore::{Item, SharedStore};
//!
//! let store = SharedStore::create("example", 1 << 20)?;
//! store.set_item("greeting", Item::new("hello", "motd"))?;
//!
//! let item = store.get_item("greeting")?;
//! assert_eq!(item.value.as_text(), Some("hello"));
//! assert_eq!(item.tag, "motd");
//!
//! SharedStore::destroy("example")?;
//! # Ok::<(), shmstore::StorageError>(())
//! ```

// Core modules
pub mod error;
pub mod item;
pub mod layout;
pub mod segment;
pub mod store;
pub mod sync;

// Main API re-exports
pub use error::{Result, StorageError};
pub use item::{Item, ItemKind, ItemValue};
pub use segment::config::{DEFAULT_SEGMENT_SIZE, MIN_SEGMENT_SIZE};
pub use segment::{SegmentConfig, SharedSegment};
pub use store::{SharedStore, StoreStats};
pub use sync::{SharedMutex, SharedMutexGuard};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
