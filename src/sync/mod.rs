//! Cross-process synchronization primitives

pub mod mutex;

pub use mutex::{SharedMutex, SharedMutexGuard};
