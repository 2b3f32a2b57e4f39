// ⚠️ Error taxonomy for the tally engine
//
// Every failure the core can report maps to exactly one variant, so the
// routing layer can translate them without string matching.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ElectionError {
    /// Referenced candidate/party does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Id 0 supplied where a real target is required
    #[error("{entity} id 0 is not a valid target here")]
    InvalidSentinel { entity: &'static str },

    /// Target declares no area and the caller supplied none
    #[error("area is required for a {topic} ballot targeting {target_id}")]
    MissingArea { topic: &'static str, target_id: i64 },

    #[error("unknown vote topic {0}")]
    UnknownTopic(i64),

    /// Registry read failed (transport, timeout, non-success status)
    #[error("external registry unavailable: {0}")]
    ExternalUnavailable(String),

    /// Registry write failed for one area
    #[error("submission failed: {0}")]
    SubmissionFailed(String),

    #[error("malformed citizen identifier {0:?}")]
    MalformedIdentifier(String),

    #[error("roster file error: {0}")]
    Roster(#[from] csv::Error),

    #[error("SQLite error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ElectionError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        ElectionError::NotFound { entity, id }
    }

    /// Client-side errors (bad id, bad topic, missing area) vs. server-side ones
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ElectionError::InvalidSentinel { .. }
                | ElectionError::MissingArea { .. }
                | ElectionError::UnknownTopic(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ElectionError>;
