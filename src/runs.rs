use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use jiff::{Timestamp, civil::Date};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::orchestrator::{ScrapeOrchestrator, ScrapeReport};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunKind {
    Single { date: Date },
    Schedule { start: Date, days: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Finished,
    Cancelled,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunStatus {
    pub id: Uuid,
    #[serde(flatten)]
    pub kind: RunKind,
    pub state: RunState,
    pub started_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    pub reports: Vec<ScrapeReport>,
}

/// Longest forward range a schedule run may cover.
pub const MAX_SCHEDULE_DAYS: u32 = 31;

/// Finished runs kept for status lookups; older ones are dropped first.
const FINISHED_RUN_HISTORY: usize = 100;

#[derive(Default)]
struct Runs {
    by_id: HashMap<Uuid, RunStatus>,
    finished: VecDeque<Uuid>,
}

/// Status of background runs, keyed by run id. Kept in memory only, with a
/// bounded history of finished runs. Running ones are never evicted.
#[derive(Clone)]
pub struct RunTracker {
    runs: Arc<RwLock<Runs>>,
    history: usize,
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::with_history(FINISHED_RUN_HISTORY)
    }
}

impl RunTracker {
    pub fn with_history(history: usize) -> Self {
        Self { runs: Arc::default(), history }
    }

    async fn start(&self, kind: RunKind) -> Uuid {
        let id = Uuid::new_v4();
        let status = RunStatus {
            id,
            kind,
            state: RunState::Running,
            started_at: Timestamp::now(),
            finished_at: None,
            reports: Vec::new(),
        };
        self.runs.write().await.by_id.insert(id, status);
        id
    }

    async fn finish(&self, id: Uuid, reports: Vec<ScrapeReport>) {
        let mut runs = self.runs.write().await;
        let Some(run) = runs.by_id.get_mut(&id) else {
            return;
        };
        run.state =
            if reports.iter().any(|r| r.cancelled) { RunState::Cancelled } else { RunState::Finished };
        run.finished_at = Some(Timestamp::now());
        run.reports = reports;

        runs.finished.push_back(id);
        while runs.finished.len() > self.history {
            if let Some(oldest) = runs.finished.pop_front() {
                runs.by_id.remove(&oldest);
                debug!(run_id = %oldest, "evicted finished run");
            }
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<RunStatus> {
        self.runs.read().await.by_id.get(&id).cloned()
    }
}

/// Acknowledgement returned by the scrape triggers.
#[derive(Clone, Debug, Serialize)]
pub struct Triggered {
    pub message: String,
    pub run_id: Uuid,
}

/// Starts orchestrator runs in the background and records their outcome.
#[derive(Clone)]
pub struct ScrapeRunner {
    orchestrator: Arc<ScrapeOrchestrator>,
    runs: RunTracker,
    cancel: CancellationToken,
    default_days: u32,
}

impl ScrapeRunner {
    pub fn new(
        orchestrator: Arc<ScrapeOrchestrator>,
        cancel: CancellationToken,
        default_days: u32,
    ) -> Self {
        Self { orchestrator, runs: RunTracker::default(), cancel, default_days }
    }

    /// Scrapes one date (today if absent) without waiting for the result.
    pub async fn trigger_scrape(&self, date: Option<Date>) -> Triggered {
        let date = date.unwrap_or_else(today);
        let run_id = self.runs.start(RunKind::Single { date }).await;

        let this = self.clone();
        tokio::spawn(
            async move {
                let report = this.orchestrator.scrape_all(date, &this.cancel).await;
                this.runs.finish(run_id, vec![report]).await;
            }
            .instrument(info_span!("scrape_run", run_id = %run_id, date = %date)),
        );

        info!(run_id = %run_id, date = %date, "scrape triggered");
        Triggered { message: format!("Scraping started for date {date}"), run_id }
    }

    /// Scrapes today and the following days without waiting for the result.
    /// The range is clamped to [`MAX_SCHEDULE_DAYS`].
    pub async fn schedule_scrape(&self, days: Option<u32>) -> Triggered {
        let days = self.clamp_days(days.unwrap_or(self.default_days));
        let start = today();
        let run_id = self.runs.start(RunKind::Schedule { start, days }).await;

        let this = self.clone();
        tokio::spawn(
            async move {
                let reports =
                    this.orchestrator.schedule_daily_scraping(start, days, &this.cancel).await;
                this.runs.finish(run_id, reports).await;
            }
            .instrument(info_span!("scheduled_run", run_id = %run_id, days)),
        );

        info!(run_id = %run_id, days, "scheduled scraping triggered");
        Triggered { message: format!("Scheduled scraping for {days} days ahead"), run_id }
    }

    /// Runs the forward schedule inline; used by the periodic auto-scrape.
    pub async fn run_schedule_now(&self) -> Vec<ScrapeReport> {
        let days = self.clamp_days(self.default_days);
        self.orchestrator.schedule_daily_scraping(today(), days, &self.cancel).await
    }

    fn clamp_days(&self, days: u32) -> u32 {
        if days > MAX_SCHEDULE_DAYS {
            warn!(days, max = MAX_SCHEDULE_DAYS, "schedule range clamped");
        }
        days.min(MAX_SCHEDULE_DAYS)
    }

    pub async fn run_status(&self, id: Uuid) -> Option<RunStatus> {
        self.runs.get(id).await
    }
}

pub fn today() -> Date {
    jiff::Zoned::now().date()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use jiff::civil::date;

    use super::*;
    use crate::{
        memory::MemoryRepository,
        models::{Movie, Showtime},
        orchestrator::fakes::FakeExtractor,
    };

    async fn wait_for(runner: &ScrapeRunner, id: Uuid) -> RunStatus {
        for _ in 0..200 {
            if let Some(status) = runner.run_status(id).await {
                if status.state != RunState::Running {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {id} did not finish");
    }

    fn runner(extractor: Arc<FakeExtractor>) -> ScrapeRunner {
        let repo = Arc::new(MemoryRepository::new());
        let extractors: Vec<Arc<dyn crate::extract::Extractor>> = vec![extractor];
        let orchestrator = Arc::new(ScrapeOrchestrator::new(extractors, repo));
        ScrapeRunner::new(orchestrator, CancellationToken::new(), 7)
    }

    fn wonka() -> Movie {
        let mut movie = Movie::new("Wonka", date(2024, 3, 1));
        movie.showtimes = vec![Showtime {
            time: "16:00".to_string(),
            theater: "Grand Cinema City".to_string(),
            room: None,
            is_original_language: false,
            is_3d: false,
            booking_url: None,
        }];
        movie
    }

    #[tokio::test]
    async fn trigger_records_a_finished_run() {
        let runner = runner(FakeExtractor::returning("a", vec![wonka()]));

        let triggered = runner.trigger_scrape(Some(date(2024, 3, 1))).await;
        assert_eq!(triggered.message, "Scraping started for date 2024-03-01");

        let status = wait_for(&runner, triggered.run_id).await;
        assert_eq!(status.state, RunState::Finished);
        assert_eq!(status.kind, RunKind::Single { date: date(2024, 3, 1) });
        assert_eq!(status.reports.len(), 1);
        assert_eq!(status.reports[0].persisted, 1);
        assert!(status.finished_at.is_some());
    }

    #[tokio::test]
    async fn schedule_defaults_to_configured_days() {
        let extractor = FakeExtractor::returning("a", vec![]);
        let runner = runner(extractor.clone());

        let triggered = runner.schedule_scrape(None).await;
        assert_eq!(triggered.message, "Scheduled scraping for 7 days ahead");

        let status = wait_for(&runner, triggered.run_id).await;
        assert_eq!(status.reports.len(), 7);
        assert_eq!(extractor.calls.lock().unwrap().len(), 7);
    }

    #[tokio::test]
    async fn oversized_schedule_is_clamped() {
        let extractor = FakeExtractor::returning("a", vec![]);
        let runner = runner(extractor.clone());

        let triggered = runner.schedule_scrape(Some(u32::MAX)).await;
        assert_eq!(triggered.message, format!("Scheduled scraping for {MAX_SCHEDULE_DAYS} days ahead"));

        let status = wait_for(&runner, triggered.run_id).await;
        assert_eq!(status.kind, RunKind::Schedule { start: today(), days: MAX_SCHEDULE_DAYS });
        assert_eq!(status.reports.len(), MAX_SCHEDULE_DAYS as usize);
    }

    #[tokio::test]
    async fn finished_runs_beyond_history_are_evicted() {
        let tracker = RunTracker::with_history(2);
        let kind = || RunKind::Single { date: date(2024, 3, 1) };

        let first = tracker.start(kind()).await;
        let second = tracker.start(kind()).await;
        let third = tracker.start(kind()).await;
        let running = tracker.start(kind()).await;

        tracker.finish(first, vec![]).await;
        tracker.finish(second, vec![]).await;
        assert!(tracker.get(first).await.is_some());

        tracker.finish(third, vec![]).await;
        assert!(tracker.get(first).await.is_none());
        assert!(tracker.get(second).await.is_some());
        assert!(tracker.get(third).await.is_some());
        assert_eq!(tracker.get(running).await.unwrap().state, RunState::Running);
    }

    #[tokio::test]
    async fn unknown_run_is_none() {
        let runner = runner(FakeExtractor::returning("a", vec![]));
        assert!(runner.run_status(Uuid::new_v4()).await.is_none());
    }

    #[test]
    fn status_serializes_kind_inline() {
        let status = RunStatus {
            id: Uuid::nil(),
            kind: RunKind::Schedule { start: date(2024, 3, 1), days: 3 },
            state: RunState::Running,
            started_at: Timestamp::UNIX_EPOCH,
            finished_at: None,
            reports: vec![],
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["kind"], "schedule");
        assert_eq!(json["start"], "2024-03-01");
        assert_eq!(json["state"], "running");
        assert!(json.get("finished_at").is_none());
    }
}
