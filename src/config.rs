use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::LeagueId;

const CACHE_DIR: &str = "matchday";
const DB_FILE: &str = "matches.sqlite";
const DEFAULT_PRIMARY_LEAGUE_IDS: &[LeagueId] = &[47, 87, 54, 55, 53, 42, 77];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Window for single-team form queries.
    pub form_window: usize,
    /// Window for league-wide form guides.
    pub guide_window: usize,
    pub wave_size: usize,
    pub parallelism: usize,
    /// Preferred leagues, in order, when a team name resolves to several rows globally.
    pub primary_league_ids: Vec<LeagueId>,
    /// Goals per side substituted for thin H2H samples.
    pub league_avg_goals: f64,
    pub cache_ttl: Option<Duration>,
    pub seeded_fallback: bool,
    pub db_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            form_window: 5,
            guide_window: 6,
            wave_size: 20,
            parallelism: 6,
            primary_league_ids: DEFAULT_PRIMARY_LEAGUE_IDS.to_vec(),
            league_avg_goals: 1.35,
            cache_ttl: None,
            seeded_fallback: false,
            db_path: default_db_path(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            form_window: env_parse("FORM_WINDOW")
                .unwrap_or(defaults.form_window)
                .clamp(1, 50),
            guide_window: env_parse("GUIDE_WINDOW")
                .unwrap_or(defaults.guide_window)
                .clamp(1, 50),
            wave_size: env_parse("BATCH_WAVE_SIZE")
                .unwrap_or(defaults.wave_size)
                .clamp(1, 500),
            parallelism: env_parse("BATCH_PARALLELISM")
                .unwrap_or(defaults.parallelism)
                .clamp(2, 32),
            primary_league_ids: match env::var("PRIMARY_LEAGUE_IDS") {
                Ok(raw) if !raw.trim().is_empty() => parse_ids(&raw),
                _ => defaults.primary_league_ids,
            },
            league_avg_goals: env_parse::<f64>("LEAGUE_AVG_GOALS")
                .filter(|v| v.is_finite())
                .unwrap_or(defaults.league_avg_goals)
                .clamp(0.1, 5.0),
            cache_ttl: env_parse::<u64>("PREDICTION_CACHE_TTL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            seeded_fallback: env::var("SEEDED_FALLBACK")
                .ok()
                .is_some_and(|v| parse_flag(&v)),
            db_path: env::var("MATCH_DB_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .or(defaults.db_path),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn parse_ids(raw: &str) -> Vec<LeagueId> {
    let mut seen = HashSet::new();
    raw.split([',', ';', ' '])
        .filter_map(|part| part.trim().parse::<LeagueId>().ok())
        .filter(|id| *id != 0)
        .filter(|id| seen.insert(*id))
        .collect()
}

pub fn default_db_path() -> Option<PathBuf> {
    // Prefer XDG cache.
    if let Ok(base) = env::var("XDG_CACHE_HOME")
        && !base.trim().is_empty()
    {
        return Some(PathBuf::from(base).join(CACHE_DIR).join(DB_FILE));
    }
    let home = env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join(CACHE_DIR).join(DB_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ids_dedups_and_skips_zero() {
        assert_eq!(parse_ids("47, 87;47 0 x 54"), vec![47, 87, 54]);
        assert!(parse_ids("").is_empty());
    }

    #[test]
    fn flags_accept_common_truthy_values() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" 1 "));
        assert!(!parse_flag("off"));
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.form_window, 5);
        assert_eq!(cfg.guide_window, 6);
        assert_eq!(cfg.wave_size, 20);
        assert!(cfg.cache_ttl.is_none());
        assert!(!cfg.seeded_fallback);
    }
}
