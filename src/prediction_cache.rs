use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{LeagueId, TeamId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub league_id: LeagueId,
    pub home_team_id: TeamId,
    pub away_team_id: TeamId,
}

impl CacheKey {
    pub fn new(league_id: LeagueId, home_team_id: TeamId, away_team_id: TeamId) -> Self {
        Self {
            league_id,
            home_team_id,
            away_team_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPayload {
    pub payload: String,
    pub updated_at: DateTime<Utc>,
}

/// Key-value store for serialized predictions. Upserts on one key must not
/// disturb others; last writer wins per key.
pub trait PredictionCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedPayload>>;

    fn upsert(&self, key: &CacheKey, payload: &str) -> Result<()>;
}

pub fn is_fresh(updated_at: DateTime<Utc>, ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
    let Some(ttl) = ttl else {
        return true;
    };
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => now.signed_duration_since(updated_at) < ttl,
        Err(_) => true,
    }
}

pub type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct MemoryPredictionCache {
    entries: Mutex<HashMap<CacheKey, CachedPayload>>,
    ttl: Option<Duration>,
    clock: Clock,
}

impl Default for MemoryPredictionCache {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MemoryPredictionCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self::with_clock(ttl, Box::new(Utc::now))
    }

    pub fn with_clock(ttl: Option<Duration>, clock: Clock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace a stored payload verbatim, keeping its timestamp.
    pub fn overwrite_payload(&self, key: &CacheKey, payload: &str) {
        let mut guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = guard.get_mut(key) {
            entry.payload = payload.to_string();
        }
    }
}

impl PredictionCache for MemoryPredictionCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedPayload>> {
        let now = (self.clock)();
        let mut guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.get(key) {
            Some(entry) if is_fresh(entry.updated_at, self.ttl, now) => Ok(Some(entry.clone())),
            Some(_) => {
                guard.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn upsert(&self, key: &CacheKey, payload: &str) -> Result<()> {
        let entry = CachedPayload {
            payload: payload.to_string(),
            updated_at: (self.clock)(),
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(*key, entry);
        Ok(())
    }
}
