//! xflink compose: renders the managed Flink resource graph from an `XManagedFlink` composite.
//!
//! Four composed resources are generated on every invocation, in a fixed order:
//! the Flink application, its execution role, the CloudWatch log group and the log stream.
//! The application's `startApplication` flag is gated by the activation watchdog in
//! [`activation`], which keeps its only durable state in the composite's status.

#![forbid(unsafe_code)]

pub mod activation;
pub mod application;
pub mod config;
pub mod logs;
pub mod manifest;
pub mod render;
pub mod role;

use xflink_core::PathError;

pub use config::{ConfigReader, RenderContext};
pub use render::{RenderOptions, Renderer};

/// Logical names of the composed resources this function owns.
pub const APPLICATION_RESOURCE_NAME: &str = "flink-application";
pub const ROLE_RESOURCE_NAME: &str = "flink-role";
pub const LOG_GROUP_RESOURCE_NAME: &str = "flink-log-group";
pub const LOG_STREAM_RESOURCE_NAME: &str = "flink-log-stream";

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("cannot get {path}: required field is missing")]
    MissingField { path: String },
    #[error("{path}: {reason}")]
    Malformed { path: String, reason: String },
    #[error("cannot get {key} from environment")]
    MissingReference { key: String },
    #[error("cannot encode {kind} manifest")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Path(#[from] PathError),
}

impl RenderError {
    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed { path: path.into(), reason: reason.into() }
    }
}

pub type RenderResult<T> = Result<T, RenderError>;
