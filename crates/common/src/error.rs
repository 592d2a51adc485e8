//! Typed error taxonomy for the engine. Every store and the assembler
//! returns these so callers can branch on kind instead of string-matching.

/// Engine-wide error taxonomy.
///
/// `BudgetTooSmall` is deliberately absent: a degenerate context budget is
/// a warning carried alongside a best-effort result, not a failure.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A referenced entity does not exist. Not retryable.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// A uniqueness constraint on a name was violated.
    #[error("{kind} name already exists: {name}")]
    DuplicateName { kind: &'static str, name: String },

    /// Lost a concurrent-append race on a session. The caller retries with
    /// a freshly read index; the engine never retries on its behalf.
    #[error("concurrent append conflict on session {session}")]
    Conflict { session: String },

    /// Optimistic-concurrency loss: the supplied `row_version` no longer
    /// matches the stored one. No mutation was performed.
    #[error("stale write on {kind} {id}: expected row_version {expected}")]
    StaleWrite {
        kind: &'static str,
        id: String,
        expected: i64,
    },

    /// The entity is still referenced and deletion was rejected rather
    /// than cascaded.
    #[error("{kind} {name} is still referenced and cannot be deleted")]
    InUse { kind: &'static str, name: String },

    /// The embedding collaborator failed. Indexing callers retry; the
    /// assembler degrades to recency-only instead of surfacing this.
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Malformed caller input (unknown metric name, forbidden patch field).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Whether a storage error is a UNIQUE constraint violation, used to
    /// translate raw sqlx errors into `DuplicateName`/`Conflict`.
    pub fn is_unique_violation(err: &sqlx::Error) -> bool {
        matches!(
            err,
            sqlx::Error::Database(db) if db.is_unique_violation()
        )
    }
}
