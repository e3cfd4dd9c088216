use anyhow::Result;
use chrono::{NaiveDate, Utc};
use once_cell::unsync::OnceCell;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{FormScope, LeagueId, SeasonId, TeamId, TeamMatchView, TeamResult};
use crate::error::{EngineError, EngineResult};
use crate::store::{MatchFilter, MatchStore};
use crate::streak::{self, points_for};

pub const FALLBACK_THRESHOLD: usize = 3;
pub const DEFAULT_FORM_WINDOW: usize = 5;
pub const DEFAULT_GUIDE_WINDOW: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitForm {
    pub matches: usize,
    pub weighted_goals_for: f64,
    pub weighted_goals_against: f64,
    pub weighted_ppg: f64,
    pub weighted_btts_pct: f64,
    pub weighted_over_1_5_pct: f64,
    pub weighted_over_2_5_pct: f64,
    pub weighted_over_3_5_pct: f64,
    pub used_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormRow {
    pub team_id: TeamId,
    pub team_name: String,
    pub scope: FormScope,
    /// Requested window after defaulting.
    pub window_size: usize,
    /// Matches actually inside the window (may be below `window_size`).
    pub matches_used: usize,
    /// Matches available in the scope the window was cut from.
    pub total_matches: usize,
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
    pub goals_for: i32,
    pub goals_against: i32,
    pub points: u32,
    pub weighted_ppg: f64,
    pub weighted_goals_for: f64,
    pub weighted_goals_against: f64,
    pub weighted_btts_pct: f64,
    pub weighted_over_1_5_pct: f64,
    pub weighted_over_2_5_pct: f64,
    pub weighted_over_3_5_pct: f64,
    pub recent_results: Vec<String>,
    pub current_streak: Option<String>,
    pub unbeaten_run: usize,
    pub used_fallback: bool,
    pub home: Option<SplitForm>,
    pub away: Option<SplitForm>,
}

impl FormRow {
    pub fn empty(team_id: TeamId, team_name: &str, scope: FormScope, window_size: usize) -> Self {
        Self::from_stats(team_id, team_name, scope, window_size, &WindowStats::default(), 0, false)
    }

    fn from_stats(
        team_id: TeamId,
        team_name: &str,
        scope: FormScope,
        window_size: usize,
        stats: &WindowStats,
        total_matches: usize,
        used_fallback: bool,
    ) -> Self {
        Self {
            team_id,
            team_name: team_name.to_string(),
            scope,
            window_size,
            matches_used: stats.results.len(),
            total_matches,
            wins: stats.count(TeamResult::Win),
            draws: stats.count(TeamResult::Draw),
            losses: stats.count(TeamResult::Loss),
            goals_for: stats.goals_for,
            goals_against: stats.goals_against,
            points: stats.results.iter().map(|r| points_for(*r)).sum(),
            weighted_ppg: stats.weighted_ppg,
            weighted_goals_for: stats.weighted_goals_for,
            weighted_goals_against: stats.weighted_goals_against,
            weighted_btts_pct: stats.weighted_btts_pct,
            weighted_over_1_5_pct: stats.weighted_over_pct[0],
            weighted_over_2_5_pct: stats.weighted_over_pct[1],
            weighted_over_3_5_pct: stats.weighted_over_pct[2],
            recent_results: stats.results.iter().map(|r| r.letter().to_string()).collect(),
            current_streak: streak::current_streak(&stats.results).map(|s| s.label()),
            unbeaten_run: streak::unbeaten_run(&stats.results),
            used_fallback,
            home: None,
            away: None,
        }
    }

    /// The home (or away) split when it carries at least `min_matches`, else `None`.
    pub fn split(&self, home: bool, min_matches: usize) -> Option<&SplitForm> {
        let split = if home { self.home.as_ref() } else { self.away.as_ref() };
        split.filter(|s| s.matches >= min_matches)
    }
}

#[derive(Debug, Clone, Default)]
struct WindowStats {
    results: Vec<TeamResult>,
    goals_for: i32,
    goals_against: i32,
    weighted_ppg: f64,
    weighted_goals_for: f64,
    weighted_goals_against: f64,
    weighted_btts_pct: f64,
    weighted_over_pct: [f64; 3],
}

impl WindowStats {
    fn from_window(window: &[TeamMatchView]) -> Self {
        if window.is_empty() {
            return Self::default();
        }
        let results = window.iter().map(|v| v.result).collect::<Vec<_>>();
        let over = |line: i32| streak::weighted_pct(window.iter().map(|v| v.total_goals() > line));
        Self {
            goals_for: window.iter().map(|v| v.goals_for).sum(),
            goals_against: window.iter().map(|v| v.goals_against).sum(),
            weighted_ppg: streak::weighted_ppg(&results),
            weighted_goals_for: streak::weighted_mean(window.iter().map(|v| v.goals_for as f64))
                .unwrap_or(0.0),
            weighted_goals_against: streak::weighted_mean(
                window.iter().map(|v| v.goals_against as f64),
            )
            .unwrap_or(0.0),
            weighted_btts_pct: streak::weighted_pct(window.iter().map(|v| v.both_scored())),
            weighted_over_pct: [over(1), over(2), over(3)],
            results,
        }
    }

    fn count(&self, want: TeamResult) -> u32 {
        self.results.iter().filter(|r| **r == want).count() as u32
    }
}

/// A team's scoped history with the all-competitions history fetched on first need.
struct History<'s> {
    store: &'s dyn MatchStore,
    team_id: TeamId,
    until: NaiveDate,
    scoped: Vec<TeamMatchView>,
    broad: OnceCell<Vec<TeamMatchView>>,
}

impl<'s> History<'s> {
    fn load(
        store: &'s dyn MatchStore,
        team_id: TeamId,
        league_id: LeagueId,
        season_id: SeasonId,
        until: NaiveDate,
    ) -> Result<Self> {
        let scoped = views_for(store, team_id, &MatchFilter::scoped(league_id, season_id))?;
        Ok(Self {
            store,
            team_id,
            until,
            scoped,
            broad: OnceCell::new(),
        })
    }

    /// Views admitted by `scope`, widened to all competitions below the threshold.
    fn select(&self, scope: FormScope) -> Result<(Vec<TeamMatchView>, bool)> {
        let scoped = filter_scope(&self.scoped, scope);
        if scoped.len() >= FALLBACK_THRESHOLD {
            return Ok((scoped, false));
        }
        let broad = self.broad.get_or_try_init(|| {
            views_for(
                self.store,
                self.team_id,
                &MatchFilter::all_competitions(self.until),
            )
        })?;
        let broad = filter_scope(broad, scope);
        if broad.is_empty() && scoped.is_empty() {
            return Ok((Vec::new(), false));
        }
        debug!(
            team_id = self.team_id,
            ?scope,
            in_scope = scoped.len(),
            all_competitions = broad.len(),
            "form fallback to all competitions"
        );
        if broad.len() >= scoped.len() {
            Ok((broad, true))
        } else {
            Ok((scoped, true))
        }
    }
}

fn views_for(
    store: &dyn MatchStore,
    team_id: TeamId,
    filter: &MatchFilter,
) -> Result<Vec<TeamMatchView>> {
    Ok(store
        .played_matches(team_id, filter)?
        .iter()
        .filter_map(|m| m.view_for(team_id))
        .collect())
}

fn filter_scope(views: &[TeamMatchView], scope: FormScope) -> Vec<TeamMatchView> {
    views.iter().filter(|v| scope.admits(v)).copied().collect()
}

pub struct FormAggregator<'a> {
    store: &'a dyn MatchStore,
    form_window: usize,
    guide_window: usize,
    as_of: Option<NaiveDate>,
}

impl<'a> FormAggregator<'a> {
    pub fn new(store: &'a dyn MatchStore) -> Self {
        Self {
            store,
            form_window: DEFAULT_FORM_WINDOW,
            guide_window: DEFAULT_GUIDE_WINDOW,
            as_of: None,
        }
    }

    pub fn with_default_windows(mut self, form_window: usize, guide_window: usize) -> Self {
        self.form_window = form_window.max(1);
        self.guide_window = guide_window.max(1);
        self
    }

    /// Reference date bounding the all-competitions fallback. Defaults to today (UTC).
    pub fn as_of(mut self, date: NaiveDate) -> Self {
        self.as_of = Some(date);
        self
    }

    fn reference_date(&self) -> NaiveDate {
        self.as_of.unwrap_or_else(|| Utc::now().date_naive())
    }

    fn validate_scope(&self, league_id: LeagueId, season_id: SeasonId) -> EngineResult<()> {
        if self.store.league(league_id)?.is_none() {
            return Err(EngineError::LeagueNotFound(league_id));
        }
        if self.store.season(season_id)?.is_none() {
            return Err(EngineError::SeasonNotFound {
                league_id,
                detail: format!("season id {season_id} does not exist"),
            });
        }
        Ok(())
    }

    /// Form for one team. A window of zero means the single-team default.
    /// An unknown team or a team with no played matches yields a zeroed row.
    pub fn compute_form(
        &self,
        league_id: LeagueId,
        season_id: SeasonId,
        team_id: TeamId,
        window: usize,
        scope: FormScope,
    ) -> EngineResult<FormRow> {
        self.validate_scope(league_id, season_id)?;
        let window = if window == 0 { self.form_window } else { window };
        Ok(self.form_unchecked(league_id, season_id, team_id, window, scope)?)
    }

    fn form_unchecked(
        &self,
        league_id: LeagueId,
        season_id: SeasonId,
        team_id: TeamId,
        window: usize,
        scope: FormScope,
    ) -> Result<FormRow> {
        let Some(team) = self.store.team(team_id)? else {
            return Ok(FormRow::empty(team_id, "", scope, window));
        };
        let history = History::load(
            self.store,
            team_id,
            league_id,
            season_id,
            self.reference_date(),
        )?;

        let (views, used_fallback) = history.select(scope)?;
        let active = &views[..views.len().min(window)];
        let stats = WindowStats::from_window(active);
        let mut row = FormRow::from_stats(
            team_id,
            &team.name,
            scope,
            window,
            &stats,
            views.len(),
            used_fallback,
        );

        if scope == FormScope::Overall {
            row.home = Some(split_form(&history, FormScope::Home, window)?);
            row.away = Some(split_form(&history, FormScope::Away, window)?);
        }
        Ok(row)
    }

    /// Form rows for several teams of one league. With no ids, every team
    /// registered to the league. A window of zero means the guide default.
    /// Sorted by weighted PPG, then points, then name.
    pub fn compute_form_for_teams(
        &self,
        league_id: LeagueId,
        season_id: SeasonId,
        team_ids: Option<&[TeamId]>,
        window: usize,
        scope: FormScope,
    ) -> EngineResult<Vec<FormRow>> {
        self.validate_scope(league_id, season_id)?;
        let window = if window == 0 { self.guide_window } else { window };
        let ids = match team_ids {
            Some(ids) => ids.to_vec(),
            None => self
                .store
                .teams_in_league(league_id)?
                .into_iter()
                .map(|t| t.team_id)
                .collect(),
        };

        let mut rows = ids
            .par_iter()
            .map(|id| self.form_unchecked(league_id, season_id, *id, window, scope))
            .collect::<Result<Vec<_>>>()?;
        rows.sort_by(|a, b| {
            b.weighted_ppg
                .total_cmp(&a.weighted_ppg)
                .then_with(|| b.points.cmp(&a.points))
                .then_with(|| a.team_name.cmp(&b.team_name))
        });
        Ok(rows)
    }
}

fn split_form(history: &History<'_>, scope: FormScope, window: usize) -> Result<SplitForm> {
    let (views, used_fallback) = history.select(scope)?;
    let active = &views[..views.len().min(window)];
    let stats = WindowStats::from_window(active);
    Ok(SplitForm {
        matches: active.len(),
        weighted_goals_for: stats.weighted_goals_for,
        weighted_goals_against: stats.weighted_goals_against,
        weighted_ppg: stats.weighted_ppg,
        weighted_btts_pct: stats.weighted_btts_pct,
        weighted_over_1_5_pct: stats.weighted_over_pct[0],
        weighted_over_2_5_pct: stats.weighted_over_pct[1],
        weighted_over_3_5_pct: stats.weighted_over_pct[2],
        used_fallback,
    })
}
