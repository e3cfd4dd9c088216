use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use matchday_engine::batch::BatchOrchestrator;
use matchday_engine::config::EngineConfig;
use matchday_engine::domain::{FormScope, LeagueId, SeasonId, TeamId};
use matchday_engine::error::EngineError;
use matchday_engine::form::FormRow;
use matchday_engine::prediction::{PredictionEngine, PredictionResult};
use matchday_engine::sqlite_store::SqliteStore;
use matchday_engine::store::Dataset;

#[derive(Debug, Parser, Clone)]
#[clap(name = "matchday", about = "Form guides and fixture predictions from match history")]
struct Args {
    /// sqlite database (defaults to MATCH_DB_PATH or the user cache dir)
    #[clap(long, global = true)]
    db: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand, Clone)]
enum Command {
    /// Upsert a JSON dataset (leagues, seasons, teams, matches, fixtures)
    Import {
        #[clap(short = 'f', long)]
        file: PathBuf,
    },
    /// Weighted form for one team
    Form {
        #[clap(short = 'l', long)]
        league: LeagueId,
        #[clap(short = 's', long)]
        season: Option<SeasonId>,
        /// team id or name
        #[clap(short = 't', long)]
        team: String,
        #[clap(short = 'w', long, default_value_t = 0)]
        window: usize,
        #[clap(long, default_value = "overall")]
        scope: String,
        #[clap(long)]
        json: bool,
    },
    /// League-wide form guide
    Guide {
        #[clap(short = 'l', long)]
        league: LeagueId,
        #[clap(short = 's', long)]
        season: Option<SeasonId>,
        #[clap(short = 'w', long, default_value_t = 0)]
        window: usize,
        #[clap(long, default_value = "overall")]
        scope: String,
    },
    /// Predict one fixture
    Analyze {
        #[clap(short = 'l', long)]
        league: LeagueId,
        #[clap(long)]
        home: String,
        #[clap(long)]
        away: String,
        #[clap(short = 's', long)]
        season: Option<SeasonId>,
        #[clap(long)]
        refresh: bool,
        #[clap(long)]
        json: bool,
    },
    /// Predict every fixture on a date
    Batch {
        #[clap(short = 'd', long)]
        date: NaiveDate,
        #[clap(short = 's', long)]
        season: Option<SeasonId>,
        #[clap(long)]
        refresh: bool,
        #[clap(long, default_value_t = 600)]
        timeout_secs: u64,
    },
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    debug!("args: {args:?}");
    let config = EngineConfig::from_env();
    let db_path = args
        .db
        .clone()
        .or_else(|| config.db_path.clone())
        .context("unable to resolve sqlite path")?;
    let store = Arc::new(SqliteStore::open(&db_path)?.with_cache_ttl(config.cache_ttl));

    if let Command::Import { file } = &args.command {
        let raw = std::fs::read_to_string(file)
            .with_context(|| format!("read dataset {}", file.display()))?;
        let dataset = serde_json::from_str::<Dataset>(&raw)
            .with_context(|| format!("parse dataset {}", file.display()))?;
        let summary = store.import_dataset(&dataset)?;
        println!("Import complete");
        println!("DB: {}", db_path.display());
        println!(
            "leagues={} seasons={} teams={} aliases={} matches={} fixtures={}",
            summary.leagues,
            summary.seasons,
            summary.teams,
            summary.aliases,
            summary.matches,
            summary.fixtures
        );
        return Ok(());
    }

    let engine = Arc::new(PredictionEngine::new(store.clone(), store, config));
    match args.command {
        Command::Import { .. } => Ok(()),
        Command::Form {
            league,
            season,
            team,
            window,
            scope,
            json,
        } => {
            let season = engine.resolve_season(league, season)?;
            let team = team_arg(&engine, &team, league)?;
            let row = engine.aggregator().compute_form(
                league,
                season,
                team,
                window,
                FormScope::parse(&scope),
            )?;
            if json {
                println!("{}", serde_json::to_string_pretty(&row)?);
            } else {
                print_form(&row);
            }
            Ok(())
        }
        Command::Guide {
            league,
            season,
            window,
            scope,
        } => {
            let season = engine.resolve_season(league, season)?;
            let rows = engine.aggregator().compute_form_for_teams(
                league,
                season,
                None,
                window,
                FormScope::parse(&scope),
            )?;
            println!(
                "{:>3}  {:<28} {:>3} {:>3} {:>3} {:>3} {:>6} {:>6}  form",
                "#", "team", "P", "W", "D", "L", "pts", "wppg"
            );
            for (idx, row) in rows.iter().enumerate() {
                println!(
                    "{:>3}  {:<28} {:>3} {:>3} {:>3} {:>3} {:>6} {:>6.2}  {}{}",
                    idx + 1,
                    row.team_name,
                    row.matches_used,
                    row.wins,
                    row.draws,
                    row.losses,
                    row.points,
                    row.weighted_ppg,
                    row.recent_results.join(""),
                    if row.used_fallback { " *" } else { "" }
                );
            }
            Ok(())
        }
        Command::Analyze {
            league,
            home,
            away,
            season,
            refresh,
            json,
        } => {
            let home = team_arg(&engine, &home, league)?;
            let away = team_arg(&engine, &away, league)?;
            let result = engine.analyze(league, home, away, season, refresh)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_prediction(&result);
            }
            Ok(())
        }
        Command::Batch {
            date,
            season,
            refresh,
            timeout_secs,
        } => {
            let orchestrator = BatchOrchestrator::new(engine);
            let job_id = orchestrator.start(date, season, refresh)?;
            info!(job_id = %job_id, "batch submitted");
            let snapshot = orchestrator
                .wait(&job_id, Duration::from_secs(timeout_secs))
                .ok_or_else(|| anyhow!("job {job_id} vanished"))?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            for item in orchestrator.results(&job_id).unwrap_or_default() {
                let f = &item.fixture;
                match (&item.prediction, &item.error) {
                    (Some(p), _) => println!(
                        "[{}] {} v {}: {}/{}/{}{}",
                        f.league_name,
                        f.home_team,
                        f.away_team,
                        p.home_win_pct,
                        p.draw_pct,
                        p.away_win_pct,
                        if item.cache_hit { " (cached)" } else { "" }
                    ),
                    (None, Some(err)) => {
                        println!("[{}] {} v {}: {err}", f.league_name, f.home_team, f.away_team)
                    }
                    (None, None) => {}
                }
            }
            Ok(())
        }
    }
}

/// Numeric ids pass through; anything else goes through name resolution.
fn team_arg(engine: &PredictionEngine, raw: &str, league: LeagueId) -> Result<TeamId> {
    if let Ok(id) = raw.trim().parse::<TeamId>() {
        return Ok(id);
    }
    engine
        .resolver()
        .resolve_team_id(raw, Some(league))?
        .ok_or_else(|| EngineError::TeamNameNotFound(raw.to_string()).into())
}

fn print_form(row: &FormRow) {
    println!(
        "{} ({:?}) window={} used={} of {}{}",
        row.team_name,
        row.scope,
        row.window_size,
        row.matches_used,
        row.total_matches,
        if row.used_fallback { " [all competitions]" } else { "" }
    );
    println!(
        "W{} D{} L{}  GF {} GA {}  pts {}  form {}",
        row.wins,
        row.draws,
        row.losses,
        row.goals_for,
        row.goals_against,
        row.points,
        row.recent_results.join("")
    );
    println!(
        "weighted: ppg {:.2} gf {:.2} ga {:.2} btts {:.1}% o1.5 {:.1}% o2.5 {:.1}% o3.5 {:.1}%",
        row.weighted_ppg,
        row.weighted_goals_for,
        row.weighted_goals_against,
        row.weighted_btts_pct,
        row.weighted_over_1_5_pct,
        row.weighted_over_2_5_pct,
        row.weighted_over_3_5_pct
    );
    for (label, split) in [("home", &row.home), ("away", &row.away)] {
        if let Some(s) = split {
            println!(
                "  {label}: n={} ppg {:.2} gf {:.2} ga {:.2}",
                s.matches, s.weighted_ppg, s.weighted_goals_for, s.weighted_goals_against
            );
        }
    }
}

fn print_prediction(p: &PredictionResult) {
    println!(
        "{} v {}{}",
        p.home_team,
        p.away_team,
        if p.cache_hit { " (cached)" } else { "" }
    );
    println!(
        "1X2: {}% / {}% / {}%",
        p.home_win_pct, p.draw_pct, p.away_win_pct
    );
    println!(
        "BTTS {:.1}%  O1.5 {:.1}%  O2.5 {:.1}%  O3.5 {:.1}%",
        p.btts_pct, p.over_1_5_pct, p.over_2_5_pct, p.over_3_5_pct
    );
    println!(
        "xG {:.2} - {:.2}  (lambda {:.2} - {:.2})",
        p.expected_goals_home,
        p.expected_goals_away,
        p.score_grid.lambda_home,
        p.score_grid.lambda_away
    );
    let scores = p
        .correct_scores
        .iter()
        .map(|s| format!("{} {:.1}%", s.label(), s.pct))
        .collect::<Vec<_>>();
    println!("scores: {}", scores.join(", "));
    println!(
        "h2h: {} meetings here ({} total) {}-{}-{}",
        p.h2h.oriented_meetings, p.h2h.total_meetings, p.h2h.home_wins, p.h2h.draws, p.h2h.away_wins
    );
    for note in &p.advisory {
        println!("- {note}");
    }
}
