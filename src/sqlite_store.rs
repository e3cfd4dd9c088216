use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};

use crate::domain::{
    Fixture, League, LeagueId, MatchRecord, MatchStatus, Season, SeasonId, TeamId, TeamIdentity,
};
use crate::prediction_cache::{CacheKey, CachedPayload, PredictionCache, is_fresh};
use crate::store::{Dataset, MatchFilter, MatchStore, normalize_name};

const DATE_FMT: &str = "%Y-%m-%d";
const KICKOFF_FMT: &str = "%H:%M";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub leagues: usize,
    pub seasons: usize,
    pub teams: usize,
    pub aliases: usize,
    pub matches: usize,
    pub fixtures: usize,
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
    cache_ttl: Option<Duration>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create db dir {}", parent.display()))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .context("enable WAL")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            cache_ttl: None,
        })
    }

    /// Cached predictions older than `ttl` read as absent.
    pub fn with_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = ttl;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Upsert a whole dataset inside one transaction; nothing is written if any row fails.
    pub fn import_dataset(&self, dataset: &Dataset) -> Result<ImportSummary> {
        let mut conn = self.lock();
        let tx = conn.transaction().context("begin import transaction")?;
        let mut summary = ImportSummary::default();
        for league in &dataset.leagues {
            upsert_league(&tx, league)?;
            summary.leagues += 1;
        }
        for season in &dataset.seasons {
            upsert_season(&tx, season)?;
            summary.seasons += 1;
        }
        for team in &dataset.teams {
            upsert_team(&tx, team)?;
            summary.teams += 1;
            summary.aliases += team.aliases.len();
        }
        for m in &dataset.matches {
            upsert_match(&tx, m)?;
            summary.matches += 1;
        }
        for f in &dataset.fixtures {
            upsert_fixture(&tx, f)?;
            summary.fixtures += 1;
        }
        tx.commit().context("commit import transaction")?;
        Ok(summary)
    }

    fn query_team_ids(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<TeamIdentity>> {
        let conn = self.lock();
        let ids = {
            let mut stmt = conn.prepare(sql).context("prepare team query")?;
            let rows = stmt
                .query_map(params, |row| row.get::<_, i64>(0))
                .context("query team ids")?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row.context("decode team id")? as TeamId);
            }
            ids
        };
        ids.into_iter()
            .filter_map(|id| load_team(&conn, id).transpose())
            .collect()
    }

    fn query_matches(
        &self,
        where_clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<MatchRecord>> {
        let conn = self.lock();
        let sql = format!(
            r#"
            SELECT
                match_id, league_id, season_id, home_team_id, away_team_id,
                home_team, away_team, date, round, home_goals, away_goals, status
            FROM matches
            WHERE status = 'played'
              AND home_goals IS NOT NULL
              AND away_goals IS NOT NULL
              AND {where_clause}
            ORDER BY date DESC, round DESC, match_id DESC
            "#
        );
        let mut stmt = conn.prepare(&sql).context("prepare match query")?;
        let rows = stmt
            .query_map(params, RawMatch::from_row)
            .context("query matches")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("decode match row")?.into_record()?);
        }
        Ok(out)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS leagues (
            league_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            season_label TEXT NULL
        );

        CREATE TABLE IF NOT EXISTS seasons (
            season_id INTEGER PRIMARY KEY,
            league_id INTEGER NOT NULL,
            label TEXT NOT NULL,
            label_key TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_seasons_league ON seasons(league_id, label_key);

        CREATE TABLE IF NOT EXISTS teams (
            team_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            name_key TEXT NOT NULL,
            league_id INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_teams_name_key ON teams(name_key);
        CREATE INDEX IF NOT EXISTS idx_teams_league ON teams(league_id);

        CREATE TABLE IF NOT EXISTS team_aliases (
            team_id INTEGER NOT NULL,
            alias TEXT NOT NULL,
            alias_key TEXT NOT NULL,
            PRIMARY KEY (team_id, alias_key)
        );
        CREATE INDEX IF NOT EXISTS idx_team_aliases_key ON team_aliases(alias_key);

        CREATE TABLE IF NOT EXISTS matches (
            match_id INTEGER PRIMARY KEY,
            league_id INTEGER NOT NULL,
            season_id INTEGER NOT NULL,
            home_team_id INTEGER NOT NULL,
            away_team_id INTEGER NOT NULL,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL,
            date TEXT NOT NULL,
            round INTEGER NULL,
            home_goals INTEGER NULL,
            away_goals INTEGER NULL,
            status TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_matches_home ON matches(home_team_id);
        CREATE INDEX IF NOT EXISTS idx_matches_away ON matches(away_team_id);
        CREATE INDEX IF NOT EXISTS idx_matches_scope ON matches(league_id, season_id);
        CREATE INDEX IF NOT EXISTS idx_matches_date ON matches(date);

        CREATE TABLE IF NOT EXISTS fixtures (
            fixture_id INTEGER PRIMARY KEY,
            league_id INTEGER NOT NULL,
            league_name TEXT NOT NULL,
            date TEXT NOT NULL,
            kickoff TEXT NULL,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_fixtures_date ON fixtures(date);

        CREATE TABLE IF NOT EXISTS prediction_cache (
            league_id INTEGER NOT NULL,
            home_team_id INTEGER NOT NULL,
            away_team_id INTEGER NOT NULL,
            payload TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (league_id, home_team_id, away_team_id)
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

fn upsert_league(tx: &Transaction<'_>, league: &League) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO leagues (league_id, name, season_label) VALUES (?1, ?2, ?3)
        ON CONFLICT(league_id) DO UPDATE SET
            name = excluded.name,
            season_label = excluded.season_label
        "#,
        params![league.league_id as i64, league.name, league.season_label],
    )
    .with_context(|| format!("upsert league {}", league.league_id))?;
    Ok(())
}

fn upsert_season(tx: &Transaction<'_>, season: &Season) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO seasons (season_id, league_id, label, label_key) VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(season_id) DO UPDATE SET
            league_id = excluded.league_id,
            label = excluded.label,
            label_key = excluded.label_key
        "#,
        params![
            season.season_id as i64,
            season.league_id as i64,
            season.label,
            normalize_name(&season.label),
        ],
    )
    .with_context(|| format!("upsert season {}", season.season_id))?;
    Ok(())
}

fn upsert_team(tx: &Transaction<'_>, team: &TeamIdentity) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO teams (team_id, name, name_key, league_id) VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(team_id) DO UPDATE SET
            name = excluded.name,
            name_key = excluded.name_key,
            league_id = excluded.league_id
        "#,
        params![
            team.team_id as i64,
            team.name,
            normalize_name(&team.name),
            team.league_id as i64,
        ],
    )
    .with_context(|| format!("upsert team {}", team.team_id))?;
    for alias in &team.aliases {
        let key = normalize_name(alias);
        if key.is_empty() {
            continue;
        }
        tx.execute(
            "INSERT OR IGNORE INTO team_aliases (team_id, alias, alias_key) VALUES (?1, ?2, ?3)",
            params![team.team_id as i64, alias, key],
        )
        .with_context(|| format!("insert alias {alias} for team {}", team.team_id))?;
    }
    Ok(())
}

fn upsert_match(tx: &Transaction<'_>, m: &MatchRecord) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO matches (
            match_id, league_id, season_id, home_team_id, away_team_id,
            home_team, away_team, date, round, home_goals, away_goals,
            status, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7, ?8, ?9, ?10, ?11,
            ?12, ?13
        )
        ON CONFLICT(match_id) DO UPDATE SET
            league_id = excluded.league_id,
            season_id = excluded.season_id,
            home_team_id = excluded.home_team_id,
            away_team_id = excluded.away_team_id,
            home_team = excluded.home_team,
            away_team = excluded.away_team,
            date = excluded.date,
            round = excluded.round,
            home_goals = excluded.home_goals,
            away_goals = excluded.away_goals,
            status = excluded.status,
            updated_at = excluded.updated_at
        "#,
        params![
            m.match_id as i64,
            m.league_id as i64,
            m.season_id as i64,
            m.home_team_id as i64,
            m.away_team_id as i64,
            m.home_team,
            m.away_team,
            m.date.format(DATE_FMT).to_string(),
            m.round,
            m.home_goals,
            m.away_goals,
            m.status.as_str(),
            Utc::now().to_rfc3339(),
        ],
    )
    .with_context(|| format!("upsert match {}", m.match_id))?;
    Ok(())
}

fn upsert_fixture(tx: &Transaction<'_>, f: &Fixture) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO fixtures (
            fixture_id, league_id, league_name, date, kickoff, home_team, away_team
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(fixture_id) DO UPDATE SET
            league_id = excluded.league_id,
            league_name = excluded.league_name,
            date = excluded.date,
            kickoff = excluded.kickoff,
            home_team = excluded.home_team,
            away_team = excluded.away_team
        "#,
        params![
            f.fixture_id as i64,
            f.league_id as i64,
            f.league_name,
            f.date.format(DATE_FMT).to_string(),
            f.kickoff.map(|t| t.format(KICKOFF_FMT).to_string()),
            f.home_team,
            f.away_team,
        ],
    )
    .with_context(|| format!("upsert fixture {}", f.fixture_id))?;
    Ok(())
}

fn load_team(conn: &Connection, team_id: TeamId) -> Result<Option<TeamIdentity>> {
    let team = conn
        .query_row(
            "SELECT team_id, name, league_id FROM teams WHERE team_id = ?1",
            params![team_id as i64],
            |row| {
                Ok(TeamIdentity {
                    team_id: row.get::<_, i64>(0)? as TeamId,
                    name: row.get(1)?,
                    aliases: Vec::new(),
                    league_id: row.get::<_, i64>(2)? as LeagueId,
                })
            },
        )
        .optional()
        .with_context(|| format!("load team {team_id}"))?;
    let Some(mut team) = team else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare("SELECT alias FROM team_aliases WHERE team_id = ?1 ORDER BY alias")
        .context("prepare alias query")?;
    let rows = stmt
        .query_map(params![team_id as i64], |row| row.get::<_, String>(0))
        .context("query aliases")?;
    for row in rows {
        team.aliases.push(row.context("decode alias row")?);
    }
    Ok(Some(team))
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FMT).with_context(|| format!("invalid stored date {raw}"))
}

struct RawMatch {
    match_id: i64,
    league_id: i64,
    season_id: i64,
    home_team_id: i64,
    away_team_id: i64,
    home_team: String,
    away_team: String,
    date: String,
    round: Option<i64>,
    home_goals: Option<i32>,
    away_goals: Option<i32>,
    status: String,
}

impl RawMatch {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            match_id: row.get(0)?,
            league_id: row.get(1)?,
            season_id: row.get(2)?,
            home_team_id: row.get(3)?,
            away_team_id: row.get(4)?,
            home_team: row.get(5)?,
            away_team: row.get(6)?,
            date: row.get(7)?,
            round: row.get(8)?,
            home_goals: row.get(9)?,
            away_goals: row.get(10)?,
            status: row.get(11)?,
        })
    }

    fn into_record(self) -> Result<MatchRecord> {
        let status = MatchStatus::parse(&self.status)
            .ok_or_else(|| anyhow!("invalid stored status {}", self.status))?;
        Ok(MatchRecord {
            match_id: self.match_id as u64,
            league_id: self.league_id as LeagueId,
            season_id: self.season_id as SeasonId,
            home_team_id: self.home_team_id as TeamId,
            away_team_id: self.away_team_id as TeamId,
            home_team: self.home_team,
            away_team: self.away_team,
            date: parse_date(&self.date)?,
            round: self.round,
            home_goals: self.home_goals,
            away_goals: self.away_goals,
            status,
        })
    }
}

impl MatchStore for SqliteStore {
    fn league(&self, league_id: LeagueId) -> Result<Option<League>> {
        self.lock()
            .query_row(
                "SELECT league_id, name, season_label FROM leagues WHERE league_id = ?1",
                params![league_id as i64],
                |row| {
                    Ok(League {
                        league_id: row.get::<_, i64>(0)? as LeagueId,
                        name: row.get(1)?,
                        season_label: row.get(2)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("load league {league_id}"))
    }

    fn season(&self, season_id: SeasonId) -> Result<Option<Season>> {
        self.lock()
            .query_row(
                "SELECT season_id, league_id, label FROM seasons WHERE season_id = ?1",
                params![season_id as i64],
                season_from_row,
            )
            .optional()
            .with_context(|| format!("load season {season_id}"))
    }

    fn season_by_label(&self, league_id: LeagueId, label: &str) -> Result<Option<Season>> {
        self.lock()
            .query_row(
                r#"
                SELECT season_id, league_id, label FROM seasons
                WHERE league_id = ?1 AND label_key = ?2
                ORDER BY season_id DESC
                LIMIT 1
                "#,
                params![league_id as i64, normalize_name(label)],
                season_from_row,
            )
            .optional()
            .with_context(|| format!("load season '{label}' for league {league_id}"))
    }

    fn team(&self, team_id: TeamId) -> Result<Option<TeamIdentity>> {
        load_team(&self.lock(), team_id)
    }

    fn teams_named(&self, name: &str, league_id: Option<LeagueId>) -> Result<Vec<TeamIdentity>> {
        self.query_team_ids(
            r#"
            SELECT team_id FROM teams
            WHERE name_key = ?1 AND (?2 IS NULL OR league_id = ?2)
            ORDER BY team_id
            "#,
            params![normalize_name(name), league_id.map(i64::from)],
        )
    }

    fn teams_by_alias(&self, alias: &str) -> Result<Vec<TeamIdentity>> {
        self.query_team_ids(
            r#"
            SELECT DISTINCT a.team_id FROM team_aliases a
            JOIN teams t ON t.team_id = a.team_id
            WHERE a.alias_key = ?1
            ORDER BY a.team_id
            "#,
            params![normalize_name(alias)],
        )
    }

    fn teams_in_league(&self, league_id: LeagueId) -> Result<Vec<TeamIdentity>> {
        self.query_team_ids(
            "SELECT team_id FROM teams WHERE league_id = ?1 ORDER BY team_id",
            params![league_id as i64],
        )
    }

    fn played_match_count(&self, team_id: TeamId) -> Result<usize> {
        let count = self
            .lock()
            .query_row(
                r#"
                SELECT COUNT(*) FROM matches
                WHERE status = 'played'
                  AND home_goals IS NOT NULL
                  AND away_goals IS NOT NULL
                  AND (home_team_id = ?1 OR away_team_id = ?1)
                "#,
                params![team_id as i64],
                |row| row.get::<_, i64>(0),
            )
            .with_context(|| format!("count matches for team {team_id}"))?;
        Ok(count.max(0) as usize)
    }

    fn played_matches(&self, team_id: TeamId, filter: &MatchFilter) -> Result<Vec<MatchRecord>> {
        self.query_matches(
            r#"(home_team_id = ?1 OR away_team_id = ?1)
              AND (?2 IS NULL OR league_id = ?2)
              AND (?3 IS NULL OR season_id = ?3)
              AND (?4 IS NULL OR date <= ?4)"#,
            params![
                team_id as i64,
                filter.league_id.map(i64::from),
                filter.season_id.map(i64::from),
                filter.until.map(|d| d.format(DATE_FMT).to_string()),
            ],
        )
    }

    fn meetings(&self, team_a: TeamId, team_b: TeamId) -> Result<Vec<MatchRecord>> {
        self.query_matches(
            r#"((home_team_id = ?1 AND away_team_id = ?2)
               OR (home_team_id = ?2 AND away_team_id = ?1))"#,
            params![team_a as i64, team_b as i64],
        )
    }

    fn fixtures_for_date(&self, date: NaiveDate) -> Result<Vec<Fixture>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                r#"
                SELECT fixture_id, league_id, league_name, date, kickoff, home_team, away_team
                FROM fixtures
                WHERE date = ?1
                ORDER BY fixture_id
                "#,
            )
            .context("prepare fixtures query")?;
        let rows = stmt
            .query_map(params![date.format(DATE_FMT).to_string()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .context("query fixtures")?;

        let mut out = Vec::new();
        for row in rows {
            let (id, league_id, league_name, raw_date, kickoff, home_team, away_team) =
                row.context("decode fixture row")?;
            let kickoff = match kickoff {
                Some(raw) => Some(
                    NaiveTime::parse_from_str(&raw, KICKOFF_FMT)
                        .with_context(|| format!("invalid kickoff {raw} on fixture {id}"))?,
                ),
                None => None,
            };
            out.push(Fixture {
                fixture_id: id as u64,
                league_id: league_id as LeagueId,
                league_name,
                date: parse_date(&raw_date)?,
                kickoff,
                home_team,
                away_team,
            });
        }
        Ok(out)
    }
}

fn season_from_row(row: &Row<'_>) -> rusqlite::Result<Season> {
    Ok(Season {
        season_id: row.get::<_, i64>(0)? as SeasonId,
        league_id: row.get::<_, i64>(1)? as LeagueId,
        label: row.get(2)?,
    })
}

impl PredictionCache for SqliteStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedPayload>> {
        let row = self
            .lock()
            .query_row(
                r#"
                SELECT payload, updated_at FROM prediction_cache
                WHERE league_id = ?1 AND home_team_id = ?2 AND away_team_id = ?3
                "#,
                params![
                    key.league_id as i64,
                    key.home_team_id as i64,
                    key.away_team_id as i64
                ],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .context("read prediction cache")?;
        let Some((payload, raw_updated)) = row else {
            return Ok(None);
        };
        let updated_at = DateTime::parse_from_rfc3339(&raw_updated)
            .with_context(|| format!("invalid cache timestamp {raw_updated}"))?
            .with_timezone(&Utc);
        if !is_fresh(updated_at, self.cache_ttl, Utc::now()) {
            return Ok(None);
        }
        Ok(Some(CachedPayload {
            payload,
            updated_at,
        }))
    }

    fn upsert(&self, key: &CacheKey, payload: &str) -> Result<()> {
        self.lock()
            .execute(
                r#"
                INSERT INTO prediction_cache (
                    league_id, home_team_id, away_team_id, payload, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(league_id, home_team_id, away_team_id) DO UPDATE SET
                    payload = excluded.payload,
                    updated_at = excluded.updated_at
                "#,
                params![
                    key.league_id as i64,
                    key.home_team_id as i64,
                    key.away_team_id as i64,
                    payload,
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("upsert prediction cache")?;
        Ok(())
    }
}
