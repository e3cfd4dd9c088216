use std::collections::HashMap;

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{
    Fixture, League, LeagueId, MatchRecord, Season, SeasonId, TeamId, TeamIdentity,
    sort_most_recent_first,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchFilter {
    pub league_id: Option<LeagueId>,
    pub season_id: Option<SeasonId>,
    /// Inclusive upper bound on match date.
    pub until: Option<NaiveDate>,
}

impl MatchFilter {
    pub fn scoped(league_id: LeagueId, season_id: SeasonId) -> Self {
        Self {
            league_id: Some(league_id),
            season_id: Some(season_id),
            until: None,
        }
    }

    pub fn all_competitions(until: NaiveDate) -> Self {
        Self {
            league_id: None,
            season_id: None,
            until: Some(until),
        }
    }

    pub fn admits(&self, m: &MatchRecord) -> bool {
        self.league_id.is_none_or(|id| m.league_id == id)
            && self.season_id.is_none_or(|id| m.season_id == id)
            && self.until.is_none_or(|d| m.date <= d)
    }
}

pub trait MatchStore: Send + Sync {
    fn league(&self, league_id: LeagueId) -> Result<Option<League>>;

    fn season(&self, season_id: SeasonId) -> Result<Option<Season>>;

    fn season_by_label(&self, league_id: LeagueId, label: &str) -> Result<Option<Season>>;

    fn team(&self, team_id: TeamId) -> Result<Option<TeamIdentity>>;

    /// Case-insensitive exact name match, optionally restricted to one league.
    fn teams_named(&self, name: &str, league_id: Option<LeagueId>) -> Result<Vec<TeamIdentity>>;

    fn teams_by_alias(&self, alias: &str) -> Result<Vec<TeamIdentity>>;

    fn teams_in_league(&self, league_id: LeagueId) -> Result<Vec<TeamIdentity>>;

    fn played_match_count(&self, team_id: TeamId) -> Result<usize>;

    /// Played matches for a team, most recent first.
    fn played_matches(&self, team_id: TeamId, filter: &MatchFilter) -> Result<Vec<MatchRecord>>;

    /// Played meetings between two teams in either orientation, most recent first.
    fn meetings(&self, team_a: TeamId, team_b: TeamId) -> Result<Vec<MatchRecord>>;

    fn fixtures_for_date(&self, date: NaiveDate) -> Result<Vec<Fixture>>;
}

/// Lowercase, trim and collapse inner whitespace.
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// A whole dataset in one document; the CLI import format and the
/// way tests seed stores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub leagues: Vec<League>,
    #[serde(default)]
    pub seasons: Vec<Season>,
    #[serde(default)]
    pub teams: Vec<TeamIdentity>,
    #[serde(default)]
    pub matches: Vec<MatchRecord>,
    #[serde(default)]
    pub fixtures: Vec<Fixture>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    leagues: HashMap<LeagueId, League>,
    seasons: HashMap<SeasonId, Season>,
    teams: HashMap<TeamId, TeamIdentity>,
    matches: Vec<MatchRecord>,
    fixtures: Vec<Fixture>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dataset(dataset: Dataset) -> Self {
        let mut store = Self::new();
        for league in dataset.leagues {
            store.insert_league(league);
        }
        for season in dataset.seasons {
            store.insert_season(season);
        }
        for team in dataset.teams {
            store.insert_team(team);
        }
        for m in dataset.matches {
            store.insert_match(m);
        }
        for f in dataset.fixtures {
            store.insert_fixture(f);
        }
        store
    }

    pub fn insert_league(&mut self, league: League) {
        self.leagues.insert(league.league_id, league);
    }

    pub fn insert_season(&mut self, season: Season) {
        self.seasons.insert(season.season_id, season);
    }

    pub fn insert_team(&mut self, team: TeamIdentity) {
        self.teams.insert(team.team_id, team);
    }

    /// Upserts by match id.
    pub fn insert_match(&mut self, m: MatchRecord) {
        match self.matches.iter_mut().find(|x| x.match_id == m.match_id) {
            Some(slot) => *slot = m,
            None => self.matches.push(m),
        }
    }

    pub fn insert_fixture(&mut self, f: Fixture) {
        match self.fixtures.iter_mut().find(|x| x.fixture_id == f.fixture_id) {
            Some(slot) => *slot = f,
            None => self.fixtures.push(f),
        }
    }

    fn sorted_teams(&self, pred: impl Fn(&TeamIdentity) -> bool) -> Vec<TeamIdentity> {
        let mut out = self
            .teams
            .values()
            .filter(|t| pred(t))
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by_key(|t| t.team_id);
        out
    }
}

impl MatchStore for MemoryStore {
    fn league(&self, league_id: LeagueId) -> Result<Option<League>> {
        Ok(self.leagues.get(&league_id).cloned())
    }

    fn season(&self, season_id: SeasonId) -> Result<Option<Season>> {
        Ok(self.seasons.get(&season_id).cloned())
    }

    fn season_by_label(&self, league_id: LeagueId, label: &str) -> Result<Option<Season>> {
        let want = normalize_name(label);
        let mut hits = self
            .seasons
            .values()
            .filter(|s| s.league_id == league_id && normalize_name(&s.label) == want)
            .cloned()
            .collect::<Vec<_>>();
        hits.sort_by_key(|s| s.season_id);
        Ok(hits.pop())
    }

    fn team(&self, team_id: TeamId) -> Result<Option<TeamIdentity>> {
        Ok(self.teams.get(&team_id).cloned())
    }

    fn teams_named(&self, name: &str, league_id: Option<LeagueId>) -> Result<Vec<TeamIdentity>> {
        let want = normalize_name(name);
        Ok(self.sorted_teams(|t| {
            normalize_name(&t.name) == want && league_id.is_none_or(|id| t.league_id == id)
        }))
    }

    fn teams_by_alias(&self, alias: &str) -> Result<Vec<TeamIdentity>> {
        let want = normalize_name(alias);
        Ok(self.sorted_teams(|t| t.aliases.iter().any(|a| normalize_name(a) == want)))
    }

    fn teams_in_league(&self, league_id: LeagueId) -> Result<Vec<TeamIdentity>> {
        Ok(self.sorted_teams(|t| t.league_id == league_id))
    }

    fn played_match_count(&self, team_id: TeamId) -> Result<usize> {
        Ok(self
            .matches
            .iter()
            .filter(|m| m.is_played() && m.involves(team_id))
            .count())
    }

    fn played_matches(&self, team_id: TeamId, filter: &MatchFilter) -> Result<Vec<MatchRecord>> {
        let mut out = self
            .matches
            .iter()
            .filter(|m| m.is_played() && m.involves(team_id) && filter.admits(m))
            .cloned()
            .collect::<Vec<_>>();
        sort_most_recent_first(&mut out);
        Ok(out)
    }

    fn meetings(&self, team_a: TeamId, team_b: TeamId) -> Result<Vec<MatchRecord>> {
        let mut out = self
            .matches
            .iter()
            .filter(|m| m.is_played() && m.involves(team_a) && m.involves(team_b))
            .cloned()
            .collect::<Vec<_>>();
        sort_most_recent_first(&mut out);
        Ok(out)
    }

    fn fixtures_for_date(&self, date: NaiveDate) -> Result<Vec<Fixture>> {
        Ok(self
            .fixtures
            .iter()
            .filter(|f| f.date == date)
            .cloned()
            .collect())
    }
}
