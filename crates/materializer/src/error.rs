//! Cache errors; these degrade gracefully and never abort compilation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("catalogue hit for {0} but the artifact at {1} is unreadable")]
    Corrupt(String, String),
    #[error("catalogue serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
