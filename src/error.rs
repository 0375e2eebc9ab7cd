use thiserror::Error;

use crate::model::ChallengeId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to decode: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("challenge {0} is already registered")]
    DuplicateChallenge(ChallengeId),

    #[error("challenge {id} rejected: {reason}")]
    InvalidChallenge { id: ChallengeId, reason: &'static str },

    #[error("host call failed: {0}")]
    Host(String),
}

pub type Result<T> = std::result::Result<T, Error>;
