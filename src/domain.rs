use std::cmp::Ordering;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

pub type LeagueId = u32;
pub type SeasonId = u32;
pub type TeamId = u32;
pub type MatchId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Scheduled,
    Played,
}

impl MatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStatus::Scheduled => "scheduled",
            MatchStatus::Played => "played",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Some(MatchStatus::Scheduled),
            "played" | "finished" => Some(MatchStatus::Played),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeamResult {
    Win,
    Draw,
    Loss,
}

impl TeamResult {
    pub fn from_goals(goals_for: i32, goals_against: i32) -> Self {
        match goals_for.cmp(&goals_against) {
            Ordering::Greater => TeamResult::Win,
            Ordering::Less => TeamResult::Loss,
            Ordering::Equal => TeamResult::Draw,
        }
    }

    pub fn letter(self) -> &'static str {
        match self {
            TeamResult::Win => "W",
            TeamResult::Draw => "D",
            TeamResult::Loss => "L",
        }
    }
}

/// One played (or scheduled) match as supplied by the match history store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: MatchId,
    pub league_id: LeagueId,
    pub season_id: SeasonId,
    pub home_team_id: TeamId,
    pub away_team_id: TeamId,
    pub home_team: String,
    pub away_team: String,
    pub date: NaiveDate,
    pub round: Option<i64>,
    pub home_goals: Option<i32>,
    pub away_goals: Option<i32>,
    pub status: MatchStatus,
}

/// A played match seen from one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeamMatchView {
    pub is_home: bool,
    pub goals_for: i32,
    pub goals_against: i32,
    pub result: TeamResult,
}

impl TeamMatchView {
    pub fn total_goals(&self) -> i32 {
        self.goals_for + self.goals_against
    }

    pub fn both_scored(&self) -> bool {
        self.goals_for > 0 && self.goals_against > 0
    }
}

impl MatchRecord {
    /// Both goals present and the match marked as played; a half-filled score is treated as unplayed.
    pub fn score(&self) -> Option<(i32, i32)> {
        if self.status != MatchStatus::Played {
            return None;
        }
        match (self.home_goals, self.away_goals) {
            (Some(h), Some(a)) => Some((h, a)),
            _ => None,
        }
    }

    pub fn is_played(&self) -> bool {
        self.score().is_some()
    }

    pub fn involves(&self, team_id: TeamId) -> bool {
        self.home_team_id == team_id || self.away_team_id == team_id
    }

    pub fn view_for(&self, team_id: TeamId) -> Option<TeamMatchView> {
        let (home_goals, away_goals) = self.score()?;
        let (is_home, goals_for, goals_against) = if self.home_team_id == team_id {
            (true, home_goals, away_goals)
        } else if self.away_team_id == team_id {
            (false, away_goals, home_goals)
        } else {
            return None;
        };
        Some(TeamMatchView {
            is_home,
            goals_for,
            goals_against,
            result: TeamResult::from_goals(goals_for, goals_against),
        })
    }

    /// Ordering used everywhere a history is read: date desc, round desc, match id desc.
    pub fn recency_cmp(&self, other: &MatchRecord) -> Ordering {
        other
            .date
            .cmp(&self.date)
            .then_with(|| other.round.unwrap_or(i64::MIN).cmp(&self.round.unwrap_or(i64::MIN)))
            .then_with(|| other.match_id.cmp(&self.match_id))
    }
}

pub fn sort_most_recent_first(matches: &mut [MatchRecord]) {
    matches.sort_by(|a, b| a.recency_cmp(b));
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamIdentity {
    pub team_id: TeamId,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub league_id: LeagueId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct League {
    pub league_id: LeagueId,
    pub name: String,
    /// Label of the season batch runs should use when no explicit season is given.
    #[serde(default)]
    pub season_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Season {
    pub season_id: SeasonId,
    pub league_id: LeagueId,
    pub label: String,
}

/// An upcoming fixture as listed for a match day. Teams are names, not ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    pub fixture_id: u64,
    pub league_id: LeagueId,
    pub league_name: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub kickoff: Option<NaiveTime>,
    pub home_team: String,
    pub away_team: String,
}

/// League name, then kickoff with unknown kickoffs last, then fixture id.
pub fn sort_fixtures(fixtures: &mut [Fixture]) {
    fixtures.sort_by(|a, b| {
        a.league_name
            .to_lowercase()
            .cmp(&b.league_name.to_lowercase())
            .then_with(|| match (a.kickoff, b.kickoff) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.fixture_id.cmp(&b.fixture_id))
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FormScope {
    #[default]
    Overall,
    Home,
    Away,
}

impl FormScope {
    /// Unknown labels resolve to `Overall`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "home" => FormScope::Home,
            "away" => FormScope::Away,
            _ => FormScope::Overall,
        }
    }

    pub fn admits(self, view: &TeamMatchView) -> bool {
        match self {
            FormScope::Overall => true,
            FormScope::Home => view.is_home,
            FormScope::Away => !view.is_home,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: MatchId, date: &str, round: Option<i64>) -> MatchRecord {
        MatchRecord {
            match_id: id,
            league_id: 1,
            season_id: 1,
            home_team_id: 10,
            away_team_id: 20,
            home_team: "Home".to_string(),
            away_team: "Away".to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            round,
            home_goals: Some(1),
            away_goals: Some(0),
            status: MatchStatus::Played,
        }
    }

    #[test]
    fn recency_order_breaks_ties_by_round_then_id() {
        let mut rows = vec![
            record(1, "2024-03-01", Some(3)),
            record(2, "2024-03-02", Some(1)),
            record(4, "2024-03-01", Some(4)),
            record(3, "2024-03-01", Some(4)),
        ];
        sort_most_recent_first(&mut rows);
        let ids = rows.iter().map(|m| m.match_id).collect::<Vec<_>>();
        assert_eq!(ids, vec![2, 4, 3, 1]);
    }

    #[test]
    fn half_filled_score_is_not_played() {
        let mut m = record(1, "2024-03-01", None);
        m.away_goals = None;
        assert!(m.score().is_none());
        assert!(m.view_for(10).is_none());
    }

    #[test]
    fn view_flips_for_away_side() {
        let m = record(1, "2024-03-01", None);
        let away = m.view_for(20).unwrap();
        assert!(!away.is_home);
        assert_eq!(away.result, TeamResult::Loss);
        assert!(m.view_for(99).is_none());
    }

    #[test]
    fn fixtures_sort_by_league_then_kickoff_nulls_last() {
        let mk = |id: u64, league: &str, kickoff: Option<&str>| Fixture {
            fixture_id: id,
            league_id: 1,
            league_name: league.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            kickoff: kickoff.map(|k| NaiveTime::parse_from_str(k, "%H:%M").unwrap()),
            home_team: "A".to_string(),
            away_team: "B".to_string(),
        };
        let mut rows = vec![
            mk(1, "Serie A", None),
            mk(2, "Premier League", Some("17:30")),
            mk(3, "Serie A", Some("12:00")),
            mk(4, "Premier League", Some("12:30")),
        ];
        sort_fixtures(&mut rows);
        let ids = rows.iter().map(|f| f.fixture_id).collect::<Vec<_>>();
        assert_eq!(ids, vec![4, 2, 3, 1]);
    }

    #[test]
    fn unknown_scope_is_overall() {
        assert_eq!(FormScope::parse("HOME"), FormScope::Home);
        assert_eq!(FormScope::parse("neutral"), FormScope::Overall);
    }
}
