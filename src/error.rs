use thiserror::Error;

use crate::domain::{LeagueId, TeamId};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("league not found: {0}")]
    LeagueNotFound(LeagueId),

    #[error("team not found: {0}")]
    TeamNotFound(TeamId),

    #[error("team not found: {0}")]
    TeamNameNotFound(String),

    #[error("season not found for league {league_id}: {detail}")]
    SeasonNotFound { league_id: LeagueId, detail: String },

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        !matches!(self, EngineError::Store(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
