//! Definition errors detected while expanding an annotated document.

use thiserror::Error;

/// Errors that abort an expansion. No document is produced when one occurs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExpansionError {
    /// Annotation key the engine does not know.
    #[error("unhandled annotation '{0}'")]
    UnhandledAnnotation(String),

    /// Known annotation with an invalid body.
    #[error("malformed {annotation} annotation: {reason}")]
    MalformedAnnotation { annotation: String, reason: String },

    #[error("replication '{token}' has negative pool size {pool_size}")]
    NegativePoolSize { token: String, pool_size: i64 },

    #[error("replication template string must not be empty")]
    EmptyToken,

    /// An inner replication reuses a token already bound on the same path.
    ///
    /// Only identical tokens collide. Overlapping ones (`N` inside `NN`) are
    /// accepted and substituted outermost first.
    #[error("replication token '{0}' is already bound by an enclosing replication")]
    TokenCollision(String),

    /// Handler inside a replication that cannot take a branch index.
    #[error("handler '{0}' does not accept a branch index but appears inside a replication")]
    HandlerArity(String),

    #[error("unknown handler '{0}'")]
    UnknownHandler(String),

    /// Two mapping keys became identical after substitution.
    #[error("duplicate mapping key '{0}' after substitution")]
    DuplicateKey(String),
}
