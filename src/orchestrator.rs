use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use jiff::{Span, civil::Date};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    extract::Extractor, merge::merge_by_title, models::Movie, repository::SharedRepository,
};

/// How one extractor fared in a run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExtractorOutcome {
    pub name: String,
    pub movies: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScrapeReport {
    pub date: Date,
    pub extractors: Vec<ExtractorOutcome>,
    /// Distinct films after the cross-extractor merge.
    pub merged: usize,
    pub persisted: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl ScrapeReport {
    fn new(date: Date) -> Self {
        Self {
            date,
            extractors: Vec::new(),
            merged: 0,
            persisted: 0,
            failed: 0,
            cancelled: false,
        }
    }
}

/// Runs every configured extractor for a date and commits the merged result.
pub struct ScrapeOrchestrator {
    extractors: Vec<Arc<dyn Extractor>>,
    repo: SharedRepository,
}

impl ScrapeOrchestrator {
    pub fn new(extractors: Vec<Arc<dyn Extractor>>, repo: SharedRepository) -> Self {
        Self { extractors, repo }
    }

    pub async fn scrape_all(&self, date: Date, cancel: &CancellationToken) -> ScrapeReport {
        info!(date = %date, extractors = self.extractors.len(), "scrape run started");
        let mut report = ScrapeReport::new(date);
        let mut collected: Vec<Movie> = Vec::new();

        for extractor in &self.extractors {
            if cancel.is_cancelled() {
                break;
            }
            let (outcome, movies) = run_extractor(extractor.as_ref(), date).await;
            report.extractors.push(outcome);
            collected.extend(movies);
        }

        // A cancelled run saw truncated or empty pages; storing it would
        // overwrite good showtimes with a partial snapshot.
        if cancel.is_cancelled() {
            warn!(date = %date, "scrape run cancelled, nothing persisted");
            report.cancelled = true;
            return report;
        }

        let movies: Vec<Movie> = collected
            .into_iter()
            .map(|mut movie| {
                movie.date = date;
                movie
            })
            .filter(|movie| !movie.showtimes.is_empty())
            .collect();

        let merged = merge_by_title(movies);
        report.merged = merged.len();

        if merged.is_empty() {
            info!(date = %date, "no movies extracted");
            return report;
        }

        for movie in &merged {
            match self.repo.insert_or_update_movie(movie).await {
                Ok(stored) => {
                    debug!(title = %stored.title, id = ?stored.id, showtimes = stored.showtimes.len(), "stored movie");
                    report.persisted += 1;
                },
                Err(err) => {
                    error!(title = %movie.title, date = %date, error = %err, "failed to store movie");
                    report.failed += 1;
                },
            }
        }

        info!(
            date = %date,
            merged = report.merged,
            persisted = report.persisted,
            failed = report.failed,
            "scrape run finished"
        );
        report
    }

    /// Scrapes `start`, `start + 1`, ... for `days` dates, one after another.
    pub async fn schedule_daily_scraping(
        &self,
        start: Date,
        days: u32,
        cancel: &CancellationToken,
    ) -> Vec<ScrapeReport> {
        let mut reports = Vec::new();

        for offset in 0..days {
            if cancel.is_cancelled() {
                warn!(start = %start, done = reports.len(), days, "scheduled scraping cancelled");
                break;
            }
            let date = match start.checked_add(Span::new().days(i64::from(offset))) {
                Ok(date) => date,
                Err(err) => {
                    error!(start = %start, offset, error = %err, "date out of range");
                    break;
                },
            };
            reports.push(self.scrape_all(date, cancel).await);
        }

        reports
    }
}

async fn run_extractor(extractor: &dyn Extractor, date: Date) -> (ExtractorOutcome, Vec<Movie>) {
    let name = extractor.name().to_string();
    debug!(extractor = %name, date = %date, "running extractor");

    let result = AssertUnwindSafe(extractor.extract_for_date(date)).catch_unwind().await;

    let (movies, error) = match result {
        Ok(Ok(movies)) => (movies, None),
        Ok(Err(err)) => {
            error!(extractor = %name, date = %date, error = %err, "extractor failed");
            (Vec::new(), Some(err.to_string()))
        },
        Err(panic) => {
            let msg = panic_message(panic.as_ref());
            error!(extractor = %name, date = %date, panic = %msg, "extractor panicked");
            (Vec::new(), Some(format!("panicked: {msg}")))
        },
    };

    info!(extractor = %name, movies = movies.len(), "extractor finished");
    (ExtractorOutcome { name, movies: movies.len(), error }, movies)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    pub enum Behavior {
        Return(Vec<Movie>),
        Fail,
        Panic,
    }

    /// Extractor with canned output that records the dates it was asked for.
    pub struct FakeExtractor {
        pub name: &'static str,
        pub behavior: Behavior,
        pub calls: Mutex<Vec<Date>>,
    }

    impl FakeExtractor {
        pub fn returning(name: &'static str, movies: Vec<Movie>) -> Arc<Self> {
            Arc::new(Self { name, behavior: Behavior::Return(movies), calls: Mutex::default() })
        }

        pub fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self { name, behavior: Behavior::Fail, calls: Mutex::default() })
        }

        pub fn panicking(name: &'static str) -> Arc<Self> {
            Arc::new(Self { name, behavior: Behavior::Panic, calls: Mutex::default() })
        }
    }

    #[async_trait]
    impl Extractor for FakeExtractor {
        fn name(&self) -> &str {
            self.name
        }

        async fn extract_for_date(&self, date: Date) -> anyhow::Result<Vec<Movie>> {
            self.calls.lock().unwrap().push(date);
            match &self.behavior {
                Behavior::Return(movies) => Ok(movies.clone()),
                Behavior::Fail => anyhow::bail!("site layout changed"),
                Behavior::Panic => panic!("selector blew up"),
            }
        }
    }
}
