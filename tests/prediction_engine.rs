use std::sync::Arc;

use assert_float_eq::*;
use chrono::NaiveDate;

use matchday_engine::config::EngineConfig;
use matchday_engine::domain::{League, MatchRecord, MatchStatus, Season, TeamId, TeamIdentity};
use matchday_engine::error::EngineError;
use matchday_engine::prediction::PredictionEngine;
use matchday_engine::prediction_cache::{CacheKey, MemoryPredictionCache, PredictionCache};
use matchday_engine::store::MemoryStore;

const LEAGUE: u32 = 47;
const SEASON: u32 = 2024;

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 9, day).unwrap()
}

fn base_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    store.insert_league(League {
        league_id: LEAGUE,
        name: "Premier League".to_string(),
        season_label: Some("2024/2025".to_string()),
    });
    store.insert_season(Season {
        season_id: SEASON,
        league_id: LEAGUE,
        label: "2024/2025".to_string(),
    });
    for id in 1..=6 {
        store.insert_team(TeamIdentity {
            team_id: id,
            name: format!("Team {id}"),
            aliases: Vec::new(),
            league_id: LEAGUE,
        });
    }
    store
}

fn played(id: u64, day: u32, home: TeamId, away: TeamId, hg: i32, ag: i32) -> MatchRecord {
    MatchRecord {
        match_id: id,
        league_id: LEAGUE,
        season_id: SEASON,
        home_team_id: home,
        away_team_id: away,
        home_team: format!("Team {home}"),
        away_team: format!("Team {away}"),
        date: date(day),
        round: None,
        home_goals: Some(hg),
        away_goals: Some(ag),
        status: MatchStatus::Played,
    }
}

/// Team 1 wins every home game 3-0, team 2 loses every away game 0-2.
fn lopsided_store() -> MemoryStore {
    let mut store = base_store();
    for (i, opp) in (3..=6).enumerate() {
        let i = i as u32;
        store.insert_match(played(u64::from(10 + i), 1 + i, 1, opp, 3, 0));
        store.insert_match(played(u64::from(20 + i), 5 + i, opp, 2, 2, 0));
    }
    store
}

fn engine_with(store: MemoryStore, cache: Arc<MemoryPredictionCache>, config: EngineConfig) -> PredictionEngine {
    PredictionEngine::new(Arc::new(store), cache, config).with_as_of(date(30))
}

fn engine(store: MemoryStore) -> (PredictionEngine, Arc<MemoryPredictionCache>) {
    let cache = Arc::new(MemoryPredictionCache::default());
    (engine_with(store, cache.clone(), EngineConfig::default()), cache)
}

#[test]
fn neutral_defaults_for_single_match_teams() {
    let mut store = base_store();
    store.insert_match(played(1, 1, 1, 3, 0, 0));
    store.insert_match(played(2, 2, 4, 2, 0, 0));
    let (engine, _) = engine(store);

    let result = engine.analyze(LEAGUE, 1, 2, None, false).unwrap();
    assert_eq!(
        (result.home_win_pct, result.draw_pct, result.away_win_pct),
        (33, 34, 33)
    );
    assert!(result.neutral_defaults);
    assert_float_absolute_eq!(result.btts_pct, 50.0);
    assert_float_absolute_eq!(result.over_2_5_pct, 50.0);
    assert_float_absolute_eq!(result.expected_goals_home, 1.5);
    assert_float_absolute_eq!(result.expected_goals_away, 1.5);
    // No meetings: 0.7 * 1.5 + 0.3 * 1.35.
    assert_float_absolute_eq!(result.score_grid.lambda_home, 1.455, 1e-9);
    assert!(result.h2h.insufficient_data);
    assert!(result.advisory.iter().any(|a| a.contains("neutral")));
}

#[test]
fn lopsided_form_favours_home_and_sums_to_100() {
    let (engine, _) = engine(lopsided_store());
    let result = engine.analyze(LEAGUE, 1, 2, None, false).unwrap();

    assert_eq!(result.home_win_pct + result.draw_pct + result.away_win_pct, 100);
    assert_eq!(
        (result.home_win_pct, result.draw_pct, result.away_win_pct),
        (69, 23, 8)
    );
    assert!(!result.neutral_defaults);
    assert!(!result.used_form_fallback);
    assert_float_absolute_eq!(result.btts_pct, 0.0);
    assert_float_absolute_eq!(result.over_2_5_pct, 50.0);
    assert_float_absolute_eq!(result.expected_goals_home, 2.5);
    // Both contributing values are zero.
    assert_float_absolute_eq!(result.expected_goals_away, 1.5);
    assert_eq!(result.correct_scores.len(), 3);
    assert!(result.correct_scores[0].pct >= result.correct_scores[1].pct);
    let grid_total =
        result.score_grid.home_win_pct + result.score_grid.draw_pct + result.score_grid.away_win_pct;
    assert_float_absolute_eq!(grid_total, 100.0, 0.2);
    assert!(result.advisory.iter().any(|a| a == "Team 1 favoured"));
}

#[test]
fn reversed_fixture_uses_opposite_splits() {
    let (engine, _) = engine(lopsided_store());
    // Team 2 has no home games, team 1 no away games: both fall back to overall form.
    let result = engine.analyze(LEAGUE, 2, 1, None, false).unwrap();
    assert_eq!(result.home_win_pct + result.draw_pct + result.away_win_pct, 100);
    assert!(result.away_win_pct > result.home_win_pct);
    assert!(result.advisory.iter().any(|a| a.contains("overall form used")));
}

#[test]
fn second_call_is_served_from_cache() {
    let (engine, cache) = engine(lopsided_store());
    let first = engine.analyze(LEAGUE, 1, 2, None, false).unwrap();
    assert!(!first.cache_hit);
    assert_eq!(cache.len(), 1);

    let mut second = engine.analyze(LEAGUE, 1, 2, None, false).unwrap();
    assert!(second.cache_hit);
    second.cache_hit = false;
    assert_eq!(first, second);
}

#[test]
fn refresh_bypasses_cache() {
    let (engine, cache) = engine(lopsided_store());
    engine.analyze(LEAGUE, 1, 2, None, false).unwrap();
    let refreshed = engine.analyze(LEAGUE, 1, 2, None, true).unwrap();
    assert!(!refreshed.cache_hit);
    assert_eq!(cache.len(), 1);
}

#[test]
fn undecodable_cache_entry_is_recomputed() {
    let (engine, cache) = engine(lopsided_store());
    let key = CacheKey::new(LEAGUE, 1, 2);
    engine.analyze(LEAGUE, 1, 2, None, false).unwrap();
    cache.overwrite_payload(&key, "{not json");

    let result = engine.analyze(LEAGUE, 1, 2, None, false).unwrap();
    assert!(!result.cache_hit);
    let stored = cache.get(&key).unwrap().unwrap();
    assert!(stored.payload.starts_with('{'));
    assert!(engine.analyze(LEAGUE, 1, 2, None, false).unwrap().cache_hit);
}

#[test]
fn unknown_ids_are_not_found() {
    let (engine, _) = engine(lopsided_store());
    assert!(matches!(
        engine.analyze(99, 1, 2, None, false),
        Err(EngineError::LeagueNotFound(99))
    ));
    assert!(matches!(
        engine.analyze(LEAGUE, 1, 404, None, false),
        Err(EngineError::TeamNotFound(404))
    ));
    let err = engine.analyze(LEAGUE, 1, 2, Some(1999), false).unwrap_err();
    assert!(matches!(err, EngineError::SeasonNotFound { .. }));
    assert!(err.is_not_found());
}

#[test]
fn seeded_fallback_is_deterministic_placeholder() {
    let mut store = base_store();
    store.insert_match(played(1, 1, 1, 3, 1, 1));
    let config = EngineConfig {
        seeded_fallback: true,
        ..EngineConfig::default()
    };
    let a = engine_with(store.clone(), Arc::new(MemoryPredictionCache::default()), config.clone())
        .analyze(LEAGUE, 1, 2, None, false)
        .unwrap();
    let b = engine_with(store, Arc::new(MemoryPredictionCache::default()), config)
        .analyze(LEAGUE, 1, 2, None, false)
        .unwrap();
    assert_eq!(a.home_win_pct + a.draw_pct + a.away_win_pct, 100);
    assert_eq!(
        (a.home_win_pct, a.draw_pct, a.away_win_pct),
        (b.home_win_pct, b.draw_pct, b.away_win_pct)
    );
    assert!(a.draw_pct >= 30);
    assert!(a.advisory.iter().any(|n| n.contains("Placeholder")));
}

#[test]
fn thick_h2h_sample_replaces_league_average() {
    let mut store = lopsided_store();
    for (i, day) in [11, 12, 13].into_iter().enumerate() {
        store.insert_match(played(100 + i as u64, day, 1, 2, 4, 0));
    }
    let (engine, _) = engine(store);
    let result = engine.analyze(LEAGUE, 1, 2, None, false).unwrap();
    assert!(!result.h2h.insufficient_data);
    assert_eq!(result.h2h.oriented_meetings, 3);
    assert_eq!(result.h2h.home_wins, 3);
    let expected = 0.7 * result.expected_goals_home + 0.3 * 4.0;
    assert_float_absolute_eq!(result.score_grid.lambda_home, expected, 0.01);
}
