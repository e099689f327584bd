//! xflink core: field paths over loose documents, function wire types, durable status.

#![forbid(unsafe_code)]

pub mod fieldpath;
pub mod protocol;
pub mod status;

pub use fieldpath::{FieldPath, Paved, PavedMut, Segment};
pub use protocol::{RunFunctionRequest, RunFunctionResponse};
pub use status::{Checkpoint, Clock, StatusStore};

/// Errors raised while walking a document by field path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("{path}: no such field")]
    NotFound { path: String },
    #[error("invalid field path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("{path}: not an object")]
    NotAnObject { path: String },
    #[error("{path}: not an array")]
    NotAnArray { path: String },
    #[error("{path}: expected {expected}, found {found}")]
    WrongType { path: String, expected: &'static str, found: &'static str },
}

impl PathError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PathError::NotFound { .. })
    }
}

pub mod prelude {
    pub use super::fieldpath::{Paved, PavedMut};
    pub use super::protocol::{Resource, RunFunctionRequest, RunFunctionResponse, State};
    pub use super::status::{Checkpoint, Clock, FixedClock, StatusStore, SystemClock};
    pub use super::PathError;
}
