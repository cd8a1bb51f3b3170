//! Typed errors that callers need to tell apart from transient failures.
//!
//! Everything else in the crate returns [`anyhow::Result`]. A [`ConfigError`]
//! travels inside the `anyhow::Error` and can be recovered with
//! `err.downcast_ref::<ConfigError>()`.

use thiserror::Error;

/// A setup defect detected before any network call. Never worth retrying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Vector mode was requested but no `[vector]` settings were supplied.
    #[error("vector search requested without vector settings")]
    MissingVectorSettings,

    /// A required `[vector]` field is empty.
    #[error("vector search requires vector.{0} to be set")]
    MissingVectorField(&'static str),

    /// Provider name not understood by the HTTP embedder.
    #[error("unknown embedding provider '{0}'; expected openai or ollama")]
    UnknownProvider(String),
}
