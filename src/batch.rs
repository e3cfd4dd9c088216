use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{Fixture, SeasonId, sort_fixtures};
use crate::error::{EngineError, EngineResult};
use crate::prediction::{PredictionEngine, PredictionResult};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        self != JobStatus::Running
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureResult {
    pub fixture: Fixture,
    /// Zero-based wave the fixture ran in.
    pub wave: usize,
    /// Fixtures already settled when this task started.
    pub settled_at_start: usize,
    pub prediction: Option<PredictionResult>,
    pub cache_hit: bool,
    pub elapsed_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

/// Live state of one batch job. Counters are written by many wave workers at
/// once; `completed` counts every settled fixture, `failed` the subset that
/// did not produce a prediction.
#[derive(Debug)]
pub struct JobMetadata {
    pub id: String,
    pub date: NaiveDate,
    pub started_at: DateTime<Utc>,
    status: Mutex<JobStatus>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
    error: Mutex<Option<String>>,
    total: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    in_progress: AtomicUsize,
    cache_hits: AtomicUsize,
    total_duration_ms: AtomicU64,
    results: Mutex<Vec<FixtureResult>>,
    cancel_requested: AtomicBool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    pub date: NaiveDate,
    pub status: JobStatus,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub cache_hits: usize,
    pub total_duration_ms: u64,
    pub avg_duration_ms: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl JobMetadata {
    fn new(date: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            date,
            started_at: Utc::now(),
            status: Mutex::new(JobStatus::Running),
            finished_at: Mutex::new(None),
            error: Mutex::new(None),
            total: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            in_progress: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
            total_duration_ms: AtomicU64::new(0),
            results: Mutex::new(Vec::new()),
            cancel_requested: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> JobStatus {
        *lock(&self.status)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Per-fixture results in completion order.
    pub fn results(&self) -> Vec<FixtureResult> {
        lock(&self.results).clone()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let completed = self.completed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        JobSnapshot {
            id: self.id.clone(),
            date: self.date,
            status: self.status(),
            total: self.total.load(Ordering::SeqCst),
            completed,
            failed: self.failed.load(Ordering::SeqCst),
            in_progress: self.in_progress.load(Ordering::SeqCst),
            cache_hits: self.cache_hits.load(Ordering::SeqCst),
            total_duration_ms,
            avg_duration_ms: if completed == 0 {
                0.0
            } else {
                total_duration_ms as f64 / completed as f64
            },
            started_at: self.started_at,
            finished_at: *lock(&self.finished_at),
            error: lock(&self.error).clone(),
        }
    }

    fn finish(&self, status: JobStatus, error: Option<String>) {
        *lock(&self.error) = error;
        *lock(&self.finished_at) = Some(Utc::now());
        *lock(&self.status) = status;
    }

    fn record(&self, result: FixtureResult) {
        if !result.success {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        if result.cache_hit {
            self.cache_hits.fetch_add(1, Ordering::SeqCst);
        }
        self.total_duration_ms
            .fetch_add(result.elapsed_ms, Ordering::SeqCst);
        lock(&self.results).push(result);
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.in_progress.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct JobStore {
    jobs: Mutex<HashMap<String, Arc<JobMetadata>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Arc<JobMetadata>) {
        lock(&self.jobs).insert(job.id.clone(), job);
    }

    pub fn get(&self, id: &str) -> Option<Arc<JobMetadata>> {
        lock(&self.jobs).get(id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.jobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Human-readable failure text for one fixture.
pub fn classify_error(err: &EngineError) -> String {
    match err {
        EngineError::TeamNameNotFound(name) => format!("Team ID not found: {name}"),
        EngineError::TeamNotFound(id) => format!("Team ID not found: {id}"),
        EngineError::SeasonNotFound { detail, .. } => format!("Skipped: {detail}"),
        other => format!("Failed: {other}"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "task panicked".to_string()
    }
}

fn build_pool(threads: usize) -> Option<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("matchday-wave-{i}"))
        .build()
        .inspect_err(|e| warn!(threads, error = %e, "wave pool unavailable, using global rayon pool"))
        .ok()
}

fn with_pool<T>(pool: &Option<rayon::ThreadPool>, action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    if let Some(pool) = pool.as_ref() {
        pool.install(action)
    } else {
        action()
    }
}

pub struct BatchOrchestrator {
    engine: Arc<PredictionEngine>,
    jobs: Arc<JobStore>,
    pool: Arc<Option<rayon::ThreadPool>>,
}

impl BatchOrchestrator {
    pub fn new(engine: Arc<PredictionEngine>) -> Self {
        let pool = build_pool(engine.config().parallelism);
        Self {
            engine,
            jobs: Arc::new(JobStore::new()),
            pool: Arc::new(pool),
        }
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    /// Register a job for `date` and run it on a background thread. Returns the job id at once.
    pub fn start(
        &self,
        date: NaiveDate,
        season_id: Option<SeasonId>,
        refresh: bool,
    ) -> Result<String> {
        let job = Arc::new(JobMetadata::new(date));
        self.jobs.insert(job.clone());
        let id = job.id.clone();

        let run = JobRun {
            engine: self.engine.clone(),
            pool: self.pool.clone(),
            job,
            season_id,
            refresh,
        };
        thread::Builder::new()
            .name(format!("matchday-batch-{date}"))
            .spawn(move || run.execute())
            .context("spawn batch thread")?;
        Ok(id)
    }

    pub fn status(&self, job_id: &str) -> Option<JobSnapshot> {
        self.jobs.get(job_id).map(|job| job.snapshot())
    }

    pub fn results(&self, job_id: &str) -> Option<Vec<FixtureResult>> {
        self.jobs.get(job_id).map(|job| job.results())
    }

    /// Ask a running job to stop at its next wave barrier. False if unknown or already finished.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.jobs.get(job_id) {
            Some(job) if !job.status().is_terminal() => {
                job.cancel_requested.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    /// Poll until the job reaches a terminal status or `timeout` elapses.
    pub fn wait(&self, job_id: &str, timeout: Duration) -> Option<JobSnapshot> {
        let deadline = Instant::now() + timeout;
        loop {
            let snapshot = self.status(job_id)?;
            if snapshot.status.is_terminal() || Instant::now() >= deadline {
                return Some(snapshot);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

struct JobRun {
    engine: Arc<PredictionEngine>,
    pool: Arc<Option<rayon::ThreadPool>>,
    job: Arc<JobMetadata>,
    season_id: Option<SeasonId>,
    refresh: bool,
}

impl JobRun {
    fn execute(self) {
        let job = self.job.clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_waves()));
        match outcome {
            Ok(Ok(status)) => {
                let snap = job.snapshot();
                info!(
                    job_id = %job.id,
                    ?status,
                    completed = snap.completed,
                    failed = snap.failed,
                    cache_hits = snap.cache_hits,
                    "batch finished"
                );
                job.finish(status, None);
            }
            Ok(Err(err)) => {
                error!(job_id = %job.id, error = %format!("{err:#}"), "batch failed");
                job.finish(JobStatus::Failed, Some(format!("{err:#}")));
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!(job_id = %job.id, error = %msg, "batch panicked");
                job.finish(JobStatus::Failed, Some(msg));
            }
        }
    }

    fn run_waves(&self) -> Result<JobStatus> {
        let mut fixtures = self
            .engine
            .store()
            .fixtures_for_date(self.job.date)
            .with_context(|| format!("load fixtures for {}", self.job.date))?;
        sort_fixtures(&mut fixtures);
        self.job.total.store(fixtures.len(), Ordering::SeqCst);

        let wave_size = self.engine.config().wave_size.max(1);
        let waves = fixtures.len().div_ceil(wave_size);
        info!(
            job_id = %self.job.id,
            date = %self.job.date,
            fixtures = fixtures.len(),
            waves,
            "batch started"
        );

        for (index, wave) in fixtures.chunks(wave_size).enumerate() {
            if self.job.cancel_requested.load(Ordering::SeqCst) {
                info!(job_id = %self.job.id, wave = index, "batch cancelled at wave barrier");
                return Ok(JobStatus::Cancelled);
            }
            with_pool(&self.pool, || {
                wave.par_iter()
                    .for_each(|fixture| self.run_fixture(index, fixture));
            });
            info!(
                job_id = %self.job.id,
                wave = index,
                settled = self.job.completed(),
                failed = self.job.failed.load(Ordering::SeqCst),
                "wave complete"
            );
        }
        Ok(JobStatus::Completed)
    }

    fn run_fixture(&self, wave: usize, fixture: &Fixture) {
        self.job.in_progress.fetch_add(1, Ordering::SeqCst);
        let settled_at_start = self.job.completed();
        let started = Instant::now();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.analyze_fixture(fixture)));
        let outcome = match outcome {
            Ok(Ok(prediction)) => Ok(prediction),
            Ok(Err(err)) => Err(classify_error(&err)),
            Err(payload) => Err(format!("Failed: {}", panic_message(payload.as_ref()))),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(prediction) => FixtureResult {
                fixture: fixture.clone(),
                wave,
                settled_at_start,
                cache_hit: prediction.cache_hit,
                prediction: Some(prediction),
                elapsed_ms,
                success: true,
                error: None,
            },
            Err(message) => {
                warn!(
                    job_id = %self.job.id,
                    fixture_id = fixture.fixture_id,
                    home = %fixture.home_team,
                    away = %fixture.away_team,
                    error = %message,
                    "fixture failed"
                );
                FixtureResult {
                    fixture: fixture.clone(),
                    wave,
                    settled_at_start,
                    prediction: None,
                    cache_hit: false,
                    elapsed_ms,
                    success: false,
                    error: Some(message),
                }
            }
        };
        self.job.record(result);
    }

    fn analyze_fixture(&self, fixture: &Fixture) -> EngineResult<PredictionResult> {
        let resolver = self.engine.resolver();
        let league = Some(fixture.league_id);
        let home = resolver
            .resolve_team_id(&fixture.home_team, league)?
            .ok_or_else(|| EngineError::TeamNameNotFound(fixture.home_team.clone()))?;
        let away = resolver
            .resolve_team_id(&fixture.away_team, league)?
            .ok_or_else(|| EngineError::TeamNameNotFound(fixture.away_team.clone()))?;
        let season = self
            .engine
            .resolve_season(fixture.league_id, self.season_id)?;
        self.engine
            .analyze(fixture.league_id, home, away, Some(season), self.refresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_messages() {
        assert_eq!(
            classify_error(&EngineError::TeamNameNotFound("Nowhere FC".to_string())),
            "Team ID not found: Nowhere FC"
        );
        assert_eq!(
            classify_error(&EngineError::SeasonNotFound {
                league_id: 47,
                detail: "no season configured for Premier League".to_string(),
            }),
            "Skipped: no season configured for Premier League"
        );
        assert_eq!(
            classify_error(&EngineError::LeagueNotFound(9)),
            "Failed: league not found: 9"
        );
    }

    #[test]
    fn waves_run_on_the_bounded_pool() {
        let pool = build_pool(3);
        assert_eq!(with_pool(&pool, rayon::current_num_threads), 3);
        assert_eq!(with_pool(&None, || 7), 7);
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload = panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 7");
        let payload = panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static");
    }

    #[test]
    fn snapshot_averages_settled_durations() {
        let job = JobMetadata::new(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        job.total.store(2, Ordering::SeqCst);
        for (ms, ok) in [(10, true), (30, false)] {
            job.in_progress.fetch_add(1, Ordering::SeqCst);
            job.record(FixtureResult {
                fixture: Fixture {
                    fixture_id: ms,
                    league_id: 47,
                    league_name: "Premier League".to_string(),
                    date: job.date,
                    kickoff: None,
                    home_team: "A".to_string(),
                    away_team: "B".to_string(),
                },
                wave: 0,
                settled_at_start: 0,
                prediction: None,
                cache_hit: false,
                elapsed_ms: ms,
                success: ok,
                error: None,
            });
        }
        let snap = job.snapshot();
        assert_eq!(snap.completed, 2);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.in_progress, 0);
        assert_eq!(snap.avg_duration_ms, 20.0);
        assert_eq!(snap.status, JobStatus::Running);
    }
}
