use std::collections::HashSet;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::domain::{LeagueId, MatchRecord, TeamId, TeamIdentity, TeamResult, sort_most_recent_first};
use crate::store::{MatchStore, normalize_name};

pub const MIN_H2H_MATCHES: usize = 3;
const MIN_SUBSTRING_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoalDifferential {
    pub matches: usize,
    pub total: i32,
    pub average: f64,
    /// Fewer than three scored matches; `average` is not a stable figure.
    pub insufficient_data: bool,
}

/// Goal differential from `team_id`'s side over the matches it played in.
pub fn goal_differential(matches: &[MatchRecord], team_id: TeamId) -> GoalDifferential {
    let diffs = matches
        .iter()
        .filter_map(|m| m.view_for(team_id))
        .map(|v| v.goals_for - v.goals_against)
        .collect::<Vec<_>>();
    let total = diffs.iter().sum::<i32>();
    let average = if diffs.is_empty() {
        0.0
    } else {
        total as f64 / diffs.len() as f64
    };
    GoalDifferential {
        matches: diffs.len(),
        total,
        average,
        insufficient_data: diffs.len() < MIN_H2H_MATCHES,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct H2hSnapshot {
    /// Meetings with the same home/away roles as the fixture.
    pub oriented_meetings: usize,
    /// Meetings regardless of venue.
    pub total_meetings: usize,
    pub home_wins: u32,
    pub draws: u32,
    pub away_wins: u32,
    pub avg_home_goals: f64,
    pub avg_away_goals: f64,
    pub goal_differential: GoalDifferential,
    pub insufficient_data: bool,
}

impl H2hSnapshot {
    pub fn from_meetings(home_id: TeamId, oriented: &[MatchRecord], total_meetings: usize) -> Self {
        let mut home_wins = 0;
        let mut draws = 0;
        let mut away_wins = 0;
        let mut home_goals = 0;
        let mut away_goals = 0;
        let mut scored = 0usize;
        for (h, a) in oriented.iter().filter_map(|m| m.score()) {
            match TeamResult::from_goals(h, a) {
                TeamResult::Win => home_wins += 1,
                TeamResult::Draw => draws += 1,
                TeamResult::Loss => away_wins += 1,
            }
            home_goals += h;
            away_goals += a;
            scored += 1;
        }
        let avg = |goals: i32| {
            if scored == 0 {
                0.0
            } else {
                goals as f64 / scored as f64
            }
        };
        Self {
            oriented_meetings: scored,
            total_meetings,
            home_wins,
            draws,
            away_wins,
            avg_home_goals: avg(home_goals),
            avg_away_goals: avg(away_goals),
            goal_differential: goal_differential(oriented, home_id),
            insufficient_data: scored < MIN_H2H_MATCHES,
        }
    }
}

pub struct TeamResolver<'a> {
    store: &'a dyn MatchStore,
    primary_league_ids: &'a [LeagueId],
}

impl<'a> TeamResolver<'a> {
    pub fn new(store: &'a dyn MatchStore, primary_league_ids: &'a [LeagueId]) -> Self {
        Self {
            store,
            primary_league_ids,
        }
    }

    pub fn resolve_team_id(&self, name: &str, league_id: Option<LeagueId>) -> Result<Option<TeamId>> {
        Ok(self.resolve_team(name, league_id)?.map(|t| t.team_id))
    }

    pub fn resolve_team(
        &self,
        name: &str,
        league_id: Option<LeagueId>,
    ) -> Result<Option<TeamIdentity>> {
        let query = normalize_name(name);
        if query.is_empty() {
            return Ok(None);
        }

        if let Some(league_id) = league_id {
            let exact = self.store.teams_named(&query, Some(league_id))?;
            if let Some(team) = self.pick(exact)? {
                return Ok(Some(team));
            }

            let aliased = self.store.teams_by_alias(&query)?;
            let (in_league, elsewhere): (Vec<_>, Vec<_>) =
                aliased.into_iter().partition(|t| t.league_id == league_id);
            if let Some(team) = self.pick(in_league)? {
                return Ok(Some(team));
            }
            if let Some(team) = self.pick(elsewhere)? {
                return Ok(Some(team));
            }

            if let Some(team) = self.substring_match(&query, league_id)? {
                return Ok(Some(team));
            }
        }

        if let Some(team) = self.pick(self.store.teams_named(&query, None)?)? {
            return Ok(Some(team));
        }
        if league_id.is_none() {
            return self.pick(self.store.teams_by_alias(&query)?);
        }
        Ok(None)
    }

    fn substring_match(&self, query: &str, league_id: LeagueId) -> Result<Option<TeamIdentity>> {
        if query.chars().count() < MIN_SUBSTRING_LEN {
            return Ok(None);
        }
        let mut hits = Vec::new();
        for team in self.store.teams_in_league(league_id)? {
            let name = normalize_name(&team.name);
            if name.contains(query) || query.contains(name.as_str()) {
                let distance = name.len().abs_diff(query.len());
                let played = self.store.played_match_count(team.team_id)?;
                hits.push((distance, played, team));
            }
        }
        hits.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| a.2.team_id.cmp(&b.2.team_id))
        });
        Ok(hits.into_iter().next().map(|(_, _, team)| team))
    }

    /// Primary-league rank, then played-match count, then lowest id.
    fn pick(&self, candidates: Vec<TeamIdentity>) -> Result<Option<TeamIdentity>> {
        if candidates.len() <= 1 {
            return Ok(candidates.into_iter().next());
        }
        let mut ranked = Vec::with_capacity(candidates.len());
        for team in candidates {
            let rank = self
                .primary_league_ids
                .iter()
                .position(|id| *id == team.league_id)
                .unwrap_or(usize::MAX);
            let played = self.store.played_match_count(team.team_id)?;
            ranked.push((rank, played, team));
        }
        ranked.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| a.2.team_id.cmp(&b.2.team_id))
        });
        Ok(ranked.into_iter().next().map(|(_, _, team)| team))
    }

    /// Meetings where `home_id` hosted `away_id`, most recent first.
    pub fn oriented_history(&self, home_id: TeamId, away_id: TeamId) -> Result<Vec<MatchRecord>> {
        Ok(self
            .store
            .meetings(home_id, away_id)?
            .into_iter()
            .filter(|m| m.home_team_id == home_id && m.away_team_id == away_id)
            .collect())
    }

    /// Meetings between any rows carrying either name, venue ignored.
    pub fn any_orientation_history(&self, name_a: &str, name_b: &str) -> Result<Vec<MatchRecord>> {
        let side_a = self.identities_for(name_a)?;
        let side_b = self.identities_for(name_b)?;
        if side_a.is_empty() || side_b.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for a in &side_a {
            for b in &side_b {
                if a == b {
                    continue;
                }
                for m in self.store.meetings(*a, *b)? {
                    if seen.insert(m.match_id) {
                        out.push(m);
                    }
                }
            }
        }
        sort_most_recent_first(&mut out);
        Ok(out)
    }

    fn identities_for(&self, name: &str) -> Result<Vec<TeamId>> {
        let query = normalize_name(name);
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let mut ids = self
            .store
            .teams_named(&query, None)?
            .into_iter()
            .chain(self.store.teams_by_alias(&query)?)
            .map(|t| t.team_id)
            .collect::<Vec<_>>();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    pub fn h2h_snapshot(&self, home_id: TeamId, away_id: TeamId) -> Result<H2hSnapshot> {
        let total = self
            .store
            .meetings(home_id, away_id)?
            .iter()
            .filter(|m| m.is_played())
            .count();
        let oriented = self.oriented_history(home_id, away_id)?;
        Ok(H2hSnapshot::from_meetings(home_id, &oriented, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MatchStatus;
    use crate::store::MemoryStore;
    use assert_float_eq::*;
    use chrono::NaiveDate;

    const PRIMARY: &[LeagueId] = &[47, 87];

    fn team(id: TeamId, name: &str, league_id: LeagueId, aliases: &[&str]) -> TeamIdentity {
        TeamIdentity {
            team_id: id,
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            league_id,
        }
    }

    fn game(id: u64, day: u32, home: TeamId, away: TeamId, hg: i32, ag: i32) -> MatchRecord {
        MatchRecord {
            match_id: id,
            league_id: 47,
            season_id: 1,
            home_team_id: home,
            away_team_id: away,
            home_team: format!("T{home}"),
            away_team: format!("T{away}"),
            date: NaiveDate::from_ymd_opt(2023, 1, day).unwrap(),
            round: None,
            home_goals: Some(hg),
            away_goals: Some(ag),
            status: MatchStatus::Played,
        }
    }

    fn store() -> MemoryStore {
        let mut s = MemoryStore::new();
        s.insert_team(team(1, "Manchester United", 47, &["Man Utd"]));
        s.insert_team(team(2, "Liverpool", 47, &[]));
        s.insert_team(team(3, "Liverpool", 42, &[]));
        s.insert_team(team(4, "Real Madrid", 87, &["Los Blancos"]));
        s.insert_team(team(5, "Real Madrid", 42, &[]));
        s.insert_team(team(6, "Wrexham", 99, &[]));
        s.insert_team(team(7, "Wrexham", 98, &[]));
        s
    }

    #[test]
    fn exact_league_scoped_match_wins() {
        let s = store();
        let r = TeamResolver::new(&s, PRIMARY);
        assert_eq!(r.resolve_team_id("liverpool", Some(42)).unwrap(), Some(3));
        assert_eq!(r.resolve_team_id("LIVERPOOL", Some(47)).unwrap(), Some(2));
    }

    #[test]
    fn alias_then_substring_then_global() {
        let s = store();
        let r = TeamResolver::new(&s, PRIMARY);
        assert_eq!(r.resolve_team_id("man utd", Some(47)).unwrap(), Some(1));
        assert_eq!(r.resolve_team_id("Manchester", Some(47)).unwrap(), Some(1));
        // Not in league 53: falls through to global, primary league preferred.
        assert_eq!(r.resolve_team_id("Real Madrid", Some(53)).unwrap(), Some(4));
        assert_eq!(r.resolve_team_id("Nobody FC", Some(47)).unwrap(), None);
        assert_eq!(r.resolve_team_id("  ", None).unwrap(), None);
    }

    #[test]
    fn global_tie_break_prefers_activity_outside_primary_leagues() {
        let mut s = store();
        s.insert_match(game(1, 1, 7, 1, 1, 0));
        let r = TeamResolver::new(&s, PRIMARY);
        assert_eq!(r.resolve_team_id("Wrexham", None).unwrap(), Some(7));

        s.insert_match(game(2, 2, 6, 1, 1, 0));
        s.insert_match(game(3, 3, 6, 2, 1, 0));
        let r = TeamResolver::new(&s, PRIMARY);
        assert_eq!(r.resolve_team_id("Wrexham", None).unwrap(), Some(6));
    }

    #[test]
    fn oriented_history_keeps_roles() {
        let mut s = store();
        s.insert_match(game(1, 1, 1, 2, 2, 0));
        s.insert_match(game(2, 2, 2, 1, 1, 1));
        s.insert_match(game(3, 3, 1, 2, 0, 1));
        let r = TeamResolver::new(&s, PRIMARY);

        let oriented = r.oriented_history(1, 2).unwrap();
        assert_eq!(oriented.iter().map(|m| m.match_id).collect::<Vec<_>>(), vec![3, 1]);
        assert!(oriented.iter().all(|m| m.home_team_id == 1));

        let any = r.any_orientation_history("Man Utd", "liverpool").unwrap();
        assert_eq!(any.len(), 3);
        assert!(r.any_orientation_history("Man Utd", "Nobody").unwrap().is_empty());
    }

    #[test]
    fn goal_differential_flags_thin_samples() {
        let two = vec![game(1, 1, 1, 2, 3, 0), game(2, 2, 2, 1, 1, 1)];
        let gd = goal_differential(&two, 1);
        assert_eq!(gd.matches, 2);
        assert_eq!(gd.total, 3);
        assert!(gd.insufficient_data);

        let mut three = two.clone();
        three.push(game(3, 3, 2, 1, 2, 0));
        let gd = goal_differential(&three, 1);
        assert_eq!(gd.total, 1);
        assert_float_absolute_eq!(gd.average, 1.0 / 3.0);
        assert!(!gd.insufficient_data);
    }

    #[test]
    fn snapshot_counts_oriented_results() {
        let mut s = store();
        s.insert_match(game(1, 1, 1, 2, 2, 0));
        s.insert_match(game(2, 2, 1, 2, 1, 1));
        s.insert_match(game(3, 3, 1, 2, 0, 3));
        s.insert_match(game(4, 4, 2, 1, 0, 0));
        let snap = TeamResolver::new(&s, PRIMARY).h2h_snapshot(1, 2).unwrap();
        assert_eq!(snap.oriented_meetings, 3);
        assert_eq!(snap.total_meetings, 4);
        assert_eq!((snap.home_wins, snap.draws, snap.away_wins), (1, 1, 1));
        assert_float_absolute_eq!(snap.avg_home_goals, 1.0);
        assert_float_absolute_eq!(snap.avg_away_goals, 4.0 / 3.0);
        assert!(!snap.insufficient_data);

        let reversed = TeamResolver::new(&s, PRIMARY).h2h_snapshot(2, 1).unwrap();
        assert_eq!(reversed.oriented_meetings, 1);
        assert_eq!(reversed.total_meetings, 4);
        assert!(reversed.insufficient_data);
    }
}
