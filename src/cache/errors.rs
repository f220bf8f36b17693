//! Cache engine error types

/// Errors from the interception layer and its cache store
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Transport failure, no response at all
    #[error("Network error: {0}")]
    Network(String),

    /// Network failed and nothing usable was cached
    #[error("Offline and no cached copy of {0}")]
    Unavailable(String),

    #[error("Entry of {size} bytes exceeds the {limit} byte limit")]
    EntryTooLarge { size: u64, limit: u64 },

    /// The generation was purged by a newer activation
    #[error("Cache generation '{0}' no longer exists")]
    GenerationClosed(String),

    #[error("Cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache entry serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
