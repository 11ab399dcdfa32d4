//! Error types for the progression core
//!
//! Duplicate operations are deliberately absent here: a retried award or
//! grant is ordinary traffic and surfaces as a tagged outcome
//! (`AppendOutcome::Duplicate`, `GrantOutcome::AlreadyGranted`), never as an
//! error.

/// Result alias used by the progression API
pub type Result<T> = std::result::Result<T, ProgressError>;

#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    /// Invalid or missing identifiers; rejected before any write
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown lesson or course
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Ledger sum and cached total disagree; repaired by reconciliation,
    /// never surfaced through the normal award paths
    #[error("cached XP for {user_id} is {cached} but ledger sums to {ledger_sum}")]
    Consistency {
        user_id: String,
        ledger_sum: i64,
        cached: i64,
    },

    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

impl ProgressError {
    pub(crate) fn not_found(kind: &'static str, id: &str) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}
