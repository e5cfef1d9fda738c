use thiserror::Error;

use crate::shared::config::ConfigError;
use crate::storage::domain::embedding_store::StorageError;

/// Failures that stop the identity engine from starting.
///
/// Everything that can go wrong while a frame is processed is handled inside
/// the frame cycle and only logged.
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to load identities: {0}")]
    Storage(#[from] StorageError),
}
