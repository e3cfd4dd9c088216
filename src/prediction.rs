use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::domain::{FormScope, LeagueId, SeasonId, TeamId};
use crate::error::{EngineError, EngineResult};
use crate::form::{FormAggregator, FormRow};
use crate::h2h::{H2hSnapshot, TeamResolver};
use crate::poisson::{ScoreGrid, ScoreProb, TOP_SCORES};
use crate::prediction_cache::{CacheKey, PredictionCache};
use crate::seeded::SeededFallback;
use crate::store::MatchStore;

/// Below this many matches a directional split defers to overall form,
/// and overall form is not treated as a usable signal.
pub const MIN_SPLIT_MATCHES: usize = 2;

const NEUTRAL_XG: f64 = 1.5;
const NEUTRAL_PCT: f64 = 50.0;
const NEUTRAL_PPG: f64 = 1.4;
const DRAW_BASE: f64 = 34.0;
const DRAW_SPREAD: f64 = 14.0;
// Matches per side at which the PPG gap is trusted in full.
const SHRINK_MATCHES: f64 = 5.0;
const H2H_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSummary {
    pub lambda_home: f64,
    pub lambda_away: f64,
    pub home_win_pct: f64,
    pub draw_pct: f64,
    pub away_win_pct: f64,
    pub btts_pct: f64,
    pub over_1_5_pct: f64,
    pub over_2_5_pct: f64,
    pub over_3_5_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub league_id: LeagueId,
    pub season_id: SeasonId,
    pub home_team_id: TeamId,
    pub away_team_id: TeamId,
    pub home_team: String,
    pub away_team: String,
    pub home_win_pct: u32,
    pub draw_pct: u32,
    pub away_win_pct: u32,
    pub btts_pct: f64,
    pub over_1_5_pct: f64,
    pub over_2_5_pct: f64,
    pub over_3_5_pct: f64,
    pub expected_goals_home: f64,
    pub expected_goals_away: f64,
    pub correct_scores: Vec<ScoreProb>,
    pub score_grid: GridSummary,
    pub h2h: H2hSnapshot,
    pub used_form_fallback: bool,
    pub neutral_defaults: bool,
    pub cache_hit: bool,
    pub generated_at: DateTime<Utc>,
    pub advisory: Vec<String>,
}

/// What one side contributes to the blend, after split/overall fallback.
#[derive(Debug, Clone, Copy)]
struct SideSignal {
    matches: usize,
    ppg: f64,
    goals_for: f64,
    goals_against: f64,
    btts_pct: f64,
    over_pct: [f64; 3],
    from_split: bool,
}

impl SideSignal {
    /// Directional split when it holds enough matches, else the team's own overall row.
    fn pick(row: &FormRow, home: bool) -> Option<Self> {
        if let Some(split) = row.split(home, MIN_SPLIT_MATCHES) {
            return Some(Self {
                matches: split.matches,
                ppg: split.weighted_ppg,
                goals_for: split.weighted_goals_for,
                goals_against: split.weighted_goals_against,
                btts_pct: split.weighted_btts_pct,
                over_pct: [
                    split.weighted_over_1_5_pct,
                    split.weighted_over_2_5_pct,
                    split.weighted_over_3_5_pct,
                ],
                from_split: true,
            });
        }
        if row.matches_used < MIN_SPLIT_MATCHES {
            return None;
        }
        Some(Self {
            matches: row.matches_used,
            ppg: row.weighted_ppg,
            goals_for: row.weighted_goals_for,
            goals_against: row.weighted_goals_against,
            btts_pct: row.weighted_btts_pct,
            over_pct: [
                row.weighted_over_1_5_pct,
                row.weighted_over_2_5_pct,
                row.weighted_over_3_5_pct,
            ],
            from_split: false,
        })
    }
}

/// Whole percentages summing to exactly 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutcomeSplit {
    home: u32,
    draw: u32,
    away: u32,
}

impl OutcomeSplit {
    const NEUTRAL: OutcomeSplit = OutcomeSplit {
        home: 33,
        draw: 34,
        away: 33,
    };

    fn from_shares(home_share: f64, away_share: f64) -> Self {
        let draw = DRAW_BASE - DRAW_SPREAD * (home_share - away_share).abs();
        let rest = 100.0 - draw;
        let home = (rest * home_share).round().clamp(0.0, 100.0) as u32;
        let away = ((rest * away_share).round() as u32).min(100 - home);
        Self {
            home,
            draw: 100 - home - away,
            away,
        }
    }
}

fn blend_outcomes(home: Option<SideSignal>, away: Option<SideSignal>) -> Option<OutcomeSplit> {
    if home.is_none() && away.is_none() {
        return None;
    }
    let (h_ppg, h_n) = home.map_or((NEUTRAL_PPG, 0), |s| (s.ppg, s.matches));
    let (a_ppg, a_n) = away.map_or((NEUTRAL_PPG, 0), |s| (s.ppg, s.matches));

    let total = h_ppg + a_ppg;
    let raw_home = if total > 0.0 { h_ppg / total } else { 0.5 };
    let confidence = (((h_n + a_n) as f64 / 2.0) / SHRINK_MATCHES).min(1.0);
    let home_share = 0.5 + (raw_home - 0.5) * confidence;
    Some(OutcomeSplit::from_shares(home_share, 1.0 - home_share))
}

fn blend_pct(home: Option<f64>, away: Option<f64>) -> f64 {
    match (home, away) {
        (Some(h), Some(a)) => (h + a) / 2.0,
        (Some(v), None) | (None, Some(v)) => v,
        (None, None) => NEUTRAL_PCT,
    }
}

fn blend_xg(attack: Option<f64>, defence: Option<f64>) -> f64 {
    let values = [attack, defence].into_iter().flatten().collect::<Vec<_>>();
    let sum = values.iter().sum::<f64>();
    if values.is_empty() || sum <= 0.0 {
        return NEUTRAL_XG;
    }
    sum / values.len() as f64
}

fn round_to(v: f64, places: i32) -> f64 {
    let f = 10f64.powi(places);
    (v * f).round() / f
}

pub struct PredictionEngine {
    store: Arc<dyn MatchStore>,
    cache: Arc<dyn PredictionCache>,
    config: EngineConfig,
    as_of: Option<NaiveDate>,
}

impl PredictionEngine {
    pub fn new(
        store: Arc<dyn MatchStore>,
        cache: Arc<dyn PredictionCache>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            cache,
            config,
            as_of: None,
        }
    }

    /// Reference date for the all-competitions form fallback.
    pub fn with_as_of(mut self, date: NaiveDate) -> Self {
        self.as_of = Some(date);
        self
    }

    pub fn store(&self) -> &dyn MatchStore {
        self.store.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolver(&self) -> TeamResolver<'_> {
        TeamResolver::new(self.store.as_ref(), &self.config.primary_league_ids)
    }

    pub fn aggregator(&self) -> FormAggregator<'_> {
        let agg = FormAggregator::new(self.store.as_ref())
            .with_default_windows(self.config.form_window, self.config.guide_window);
        match self.as_of {
            Some(date) => agg.as_of(date),
            None => agg,
        }
    }

    /// Explicit season id, else the league's configured season label.
    pub fn resolve_season(
        &self,
        league_id: LeagueId,
        season_id: Option<SeasonId>,
    ) -> EngineResult<SeasonId> {
        let league = self
            .store
            .league(league_id)?
            .ok_or(EngineError::LeagueNotFound(league_id))?;
        if let Some(id) = season_id {
            return match self.store.season(id)? {
                Some(season) => Ok(season.season_id),
                None => Err(EngineError::SeasonNotFound {
                    league_id,
                    detail: format!("season id {id} does not exist"),
                }),
            };
        }
        let Some(label) = league.season_label.as_deref() else {
            return Err(EngineError::SeasonNotFound {
                league_id,
                detail: format!("no season configured for {}", league.name),
            });
        };
        self.store
            .season_by_label(league_id, label)?
            .map(|s| s.season_id)
            .ok_or_else(|| EngineError::SeasonNotFound {
                league_id,
                detail: format!("season '{label}' not found for {}", league.name),
            })
    }

    pub fn analyze(
        &self,
        league_id: LeagueId,
        home_team_id: TeamId,
        away_team_id: TeamId,
        season_id: Option<SeasonId>,
        refresh: bool,
    ) -> EngineResult<PredictionResult> {
        if self.store.league(league_id)?.is_none() {
            return Err(EngineError::LeagueNotFound(league_id));
        }
        let home = self
            .store
            .team(home_team_id)?
            .ok_or(EngineError::TeamNotFound(home_team_id))?;
        let away = self
            .store
            .team(away_team_id)?
            .ok_or(EngineError::TeamNotFound(away_team_id))?;

        let key = CacheKey::new(league_id, home_team_id, away_team_id);
        if !refresh && let Some(hit) = self.cached(&key) {
            return Ok(hit);
        }

        let season_id = self.resolve_season(league_id, season_id)?;
        let agg = self.aggregator();
        let home_form = agg.compute_form(league_id, season_id, home_team_id, 0, FormScope::Overall)?;
        let away_form = agg.compute_form(league_id, season_id, away_team_id, 0, FormScope::Overall)?;
        let h2h = self.resolver().h2h_snapshot(home_team_id, away_team_id)?;

        let mut result = self.blend(&key, season_id, &home_form, &away_form, h2h);
        result.home_team = home.name;
        result.away_team = away.name;

        match serde_json::to_string(&result) {
            Ok(payload) => {
                if let Err(err) = self.cache.upsert(&key, &payload) {
                    warn!(?key, error = %err, "prediction cache write failed");
                }
            }
            Err(err) => warn!(?key, error = %err, "prediction not serializable"),
        }
        Ok(result)
    }

    fn cached(&self, key: &CacheKey) -> Option<PredictionResult> {
        let entry = match self.cache.get(key) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!(?key, "prediction cache miss");
                return None;
            }
            Err(err) => {
                warn!(?key, error = %err, "prediction cache read failed");
                return None;
            }
        };
        match serde_json::from_str::<PredictionResult>(&entry.payload) {
            Ok(mut hit) => {
                debug!(?key, updated_at = %entry.updated_at, "prediction cache hit");
                hit.cache_hit = true;
                Some(hit)
            }
            Err(err) => {
                warn!(?key, error = %err, "undecodable cached prediction, recomputing");
                None
            }
        }
    }

    fn blend(
        &self,
        key: &CacheKey,
        season_id: SeasonId,
        home_form: &FormRow,
        away_form: &FormRow,
        h2h: H2hSnapshot,
    ) -> PredictionResult {
        let mut advisory = Vec::new();
        let home = SideSignal::pick(home_form, true);
        let away = SideSignal::pick(away_form, false);

        for (row, side, label) in [(home_form, home, "home"), (away_form, away, "away")] {
            if row.used_fallback {
                advisory.push(format!("{}: form drawn from all competitions", row.team_name));
            }
            if side.is_some_and(|s| !s.from_split) {
                advisory.push(format!(
                    "{}: {label} split too thin, overall form used",
                    row.team_name
                ));
            }
        }

        let blended = blend_outcomes(home, away);
        let neutral_defaults = blended.is_none();
        let outcome = match blended {
            Some(split) => split,
            None if self.config.seeded_fallback => {
                let (h, d, a) = SeededFallback::for_key(key).outcome_split();
                advisory.push("Placeholder outcome split (seeded, no statistical signal)".to_string());
                OutcomeSplit {
                    home: h,
                    draw: d,
                    away: a,
                }
            }
            None => {
                advisory.push("Insufficient form data: neutral outcome split applied".to_string());
                OutcomeSplit::NEUTRAL
            }
        };

        let btts_pct = blend_pct(home.map(|s| s.btts_pct), away.map(|s| s.btts_pct));
        let over = |i: usize| blend_pct(home.map(|s| s.over_pct[i]), away.map(|s| s.over_pct[i]));
        let over_pct = [over(0), over(1), over(2)];

        let xg_home = blend_xg(home.map(|s| s.goals_for), away.map(|s| s.goals_against));
        let xg_away = blend_xg(away.map(|s| s.goals_for), home.map(|s| s.goals_against));

        let (rate_home, rate_away) = if h2h.insufficient_data {
            if h2h.total_meetings > 0 {
                advisory.push(format!(
                    "Only {} head-to-head meeting(s) at this venue; league average goal rate used",
                    h2h.oriented_meetings
                ));
            }
            (self.config.league_avg_goals, self.config.league_avg_goals)
        } else {
            (h2h.avg_home_goals, h2h.avg_away_goals)
        };
        let lambda_home = (1.0 - H2H_WEIGHT) * xg_home + H2H_WEIGHT * rate_home;
        let lambda_away = (1.0 - H2H_WEIGHT) * xg_away + H2H_WEIGHT * rate_away;

        let grid = ScoreGrid::new(lambda_home, lambda_away);
        let (g_home, g_draw, g_away) = grid.outcome_probs();
        let score_grid = GridSummary {
            lambda_home: round_to(lambda_home, 3),
            lambda_away: round_to(lambda_away, 3),
            home_win_pct: round_to(g_home * 100.0, 1),
            draw_pct: round_to(g_draw * 100.0, 1),
            away_win_pct: round_to(g_away * 100.0, 1),
            btts_pct: round_to(grid.both_score() * 100.0, 1),
            over_1_5_pct: round_to(grid.over(1.5) * 100.0, 1),
            over_2_5_pct: round_to(grid.over(2.5) * 100.0, 1),
            over_3_5_pct: round_to(grid.over(3.5) * 100.0, 1),
        };
        let correct_scores = grid
            .top_scores(TOP_SCORES)
            .into_iter()
            .map(|s| ScoreProb {
                pct: round_to(s.pct, 2),
                ..s
            })
            .collect();

        if !neutral_defaults {
            let gap = outcome.home as i32 - outcome.away as i32;
            if gap >= 15 {
                advisory.push(format!("{} favoured", home_form.team_name));
            } else if gap <= -15 {
                advisory.push(format!("{} favoured", away_form.team_name));
            } else {
                advisory.push("Evenly matched".to_string());
            }
        }
        if over_pct[1] >= 60.0 {
            advisory.push("High-scoring profile".to_string());
        } else if over_pct[1] <= 40.0 {
            advisory.push("Low-scoring profile".to_string());
        }

        PredictionResult {
            league_id: key.league_id,
            season_id,
            home_team_id: key.home_team_id,
            away_team_id: key.away_team_id,
            home_team: home_form.team_name.clone(),
            away_team: away_form.team_name.clone(),
            home_win_pct: outcome.home,
            draw_pct: outcome.draw,
            away_win_pct: outcome.away,
            btts_pct: round_to(btts_pct, 1),
            over_1_5_pct: round_to(over_pct[0], 1),
            over_2_5_pct: round_to(over_pct[1], 1),
            over_3_5_pct: round_to(over_pct[2], 1),
            expected_goals_home: round_to(xg_home, 2),
            expected_goals_away: round_to(xg_away, 2),
            correct_scores,
            score_grid,
            h2h,
            used_form_fallback: home_form.used_fallback || away_form.used_fallback,
            neutral_defaults,
            cache_hit: false,
            generated_at: Utc::now(),
            advisory,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_shares_give_neutral_split() {
        let split = OutcomeSplit::from_shares(0.5, 0.5);
        assert_eq!(split, OutcomeSplit::NEUTRAL);
    }

    #[test]
    fn splits_always_sum_to_100() {
        for i in 0..=100 {
            let h = i as f64 / 100.0;
            let s = OutcomeSplit::from_shares(h, 1.0 - h);
            assert_eq!(s.home + s.draw + s.away, 100);
            assert!(s.draw >= 20);
        }
    }

    #[test]
    fn blend_pct_defaults_to_fifty() {
        assert_eq!(blend_pct(None, None), 50.0);
        assert_eq!(blend_pct(Some(20.0), None), 20.0);
        assert_eq!(blend_pct(Some(20.0), Some(60.0)), 40.0);
    }

    #[test]
    fn blend_xg_defaults_when_zero_or_absent() {
        assert_eq!(blend_xg(None, None), NEUTRAL_XG);
        assert_eq!(blend_xg(Some(0.0), Some(0.0)), NEUTRAL_XG);
        assert_eq!(blend_xg(Some(2.0), None), 2.0);
        assert_eq!(blend_xg(Some(2.0), Some(1.0)), 1.5);
    }

    #[test]
    fn one_sided_signal_still_blends() {
        let strong = SideSignal {
            matches: 6,
            ppg: 3.0,
            goals_for: 2.0,
            goals_against: 0.5,
            btts_pct: 30.0,
            over_pct: [80.0, 50.0, 20.0],
            from_split: true,
        };
        let split = blend_outcomes(Some(strong), None).unwrap();
        assert!(split.home > split.away);
        assert_eq!(split.home + split.draw + split.away, 100);
        assert!(blend_outcomes(None, None).is_none());
    }
}
