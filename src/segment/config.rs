//! Configuration for shared-memory segments

use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};

/// Default segment capacity: 1 MiB
pub const DEFAULT_SEGMENT_SIZE: usize = 1024 * 1024;

/// Smallest capacity that leaves room for the header, the directory and a
/// usable arena
pub const MIN_SEGMENT_SIZE: usize = 16 * 1024;

/// Configuration for creating a shared-memory segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Name of the segment (POSIX shm object name, without the leading '/')
    pub name: String,
    /// Total capacity of the segment in bytes, fixed at creation
    pub size: usize,
    /// Unix permissions for the backing object
    pub permissions: u32,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            size: DEFAULT_SEGMENT_SIZE,
            permissions: 0o600,
        }
    }
}

impl SegmentConfig {
    /// Create a new segment configuration
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            ..Default::default()
        }
    }

    /// Set the permissions for the backing object
    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(StorageError::invalid_parameter(
                "name",
                "segment name cannot be empty",
            ));
        }

        if self.name.contains('/') {
            return Err(StorageError::invalid_parameter(
                "name",
                "segment name cannot contain '/'",
            ));
        }

        if self.size < MIN_SEGMENT_SIZE {
            return Err(StorageError::invalid_parameter(
                "size",
                format!("segment size must be at least {} bytes", MIN_SEGMENT_SIZE),
            ));
        }

        Ok(())
    }

    /// POSIX shm object name for this segment
    pub fn shm_name(&self) -> String {
        shm_object_name(&self.name)
    }
}

/// Map a store name onto the POSIX shm namespace
pub(crate) fn shm_object_name(name: &str) -> String {
    format!("/{}", name)
}
