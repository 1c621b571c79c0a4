pub mod albums;
pub mod engine;
pub mod folders;
pub mod scheduler;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

use synofoto_core::Scope;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotFoundError {
    #[error("album not found: {0}")]
    Album(String),
    #[error("{scope} folder {id} is not indexed")]
    Folder { scope: Scope, id: i64 },
    #[error("file {0} is not part of the active album")]
    File(String),
}
