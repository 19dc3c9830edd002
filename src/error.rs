//! Error types and handling for shmstore

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Status codes returned by every fallible storage operation.
///
/// Underlying OS and allocator failures are trapped where they occur and
/// converted to one of these codes; nothing else crosses the engine boundary.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A segment of that name already exists, or OS-level creation failed
    #[error("cannot create storage '{name}': {message}")]
    CannotCreateStorage { name: String, message: String },

    /// No segment of that name exists
    #[error("cannot open storage '{name}': {message}")]
    CannotOpenStorage { name: String, message: String },

    /// OS-level removal of the backing object failed
    #[error("cannot destroy storage '{name}': {message}")]
    CannotDestroyStorage { name: String, message: String },

    /// Segment capacity exhausted while allocating a new value
    #[error("cannot construct item '{key}': {message}")]
    CannotConstructItem { key: String, message: String },

    /// Old value could not be destroyed during a type transition; state unchanged
    #[error("cannot replace item '{key}': old value could not be destroyed")]
    CannotReplaceItem { key: String },

    /// Value could not be destroyed during removal or clear
    #[error("cannot remove item '{key}'")]
    CannotRemoveItem { key: String },

    /// Key absent from the directory, or its value unexpectedly unreadable
    #[error("item not found: '{key}'")]
    ItemNotFound { key: String },

    /// Directory entry references a type this build does not recognize
    #[error("unknown item type {type_code} for key '{key}'")]
    UnknownItemType { key: String, type_code: u8 },

    /// Invalid parameters or configuration, rejected before any engine work
    #[error("invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },
}

impl StorageError {
    /// Create a storage creation error
    pub fn cannot_create(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CannotCreateStorage {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a storage open error
    pub fn cannot_open(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CannotOpenStorage {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a storage destroy error
    pub fn cannot_destroy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CannotDestroyStorage {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an item construction error
    pub fn cannot_construct(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CannotConstructItem {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create an item replacement error
    pub fn cannot_replace(key: impl Into<String>) -> Self {
        Self::CannotReplaceItem { key: key.into() }
    }

    /// Create an item removal error
    pub fn cannot_remove(key: impl Into<String>) -> Self {
        Self::CannotRemoveItem { key: key.into() }
    }

    /// Create an item-not-found error
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::ItemNotFound { key: key.into() }
    }

    /// Create an unknown-item-type error
    pub fn unknown_type(key: impl Into<String>, type_code: u8) -> Self {
        Self::UnknownItemType {
            key: key.into(),
            type_code,
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }
}
