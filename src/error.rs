use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors produced while mirroring files into a cache location.
///
/// None of these escape the public `FileCache` operations: the engine catches
/// every variant, logs one warning and returns the operation's safe fallback
/// path instead.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot derive a cache file name for {path}")]
    UnmappablePath { path: PathBuf },

    #[error("failed to create cache location {path}: {source}")]
    LocationCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache at {location} is over budget and nothing more can be evicted")]
    BudgetExhausted { location: PathBuf },

    #[error("{path} is not held by this cache instance")]
    NotHeld { path: PathBuf },
}
