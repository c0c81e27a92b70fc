mod browser;
mod config;
mod db;
mod entities;
mod error;
mod extract;
mod fetch;
mod memory;
mod merge;
mod models;
mod orchestrator;
mod repository;
mod routes;
mod runs;
mod store;

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    browser::BrowserOptions,
    config::{Config, StorageBackend},
    extract::{CinessaExtractor, Extractor, SpazioCinemaExtractor, UciCinemasExtractor, YelmoExtractor},
    fetch::{SharedFetcher, WebFetcher},
    memory::MemoryRepository,
    orchestrator::ScrapeOrchestrator,
    repository::SharedRepository,
    runs::ScrapeRunner,
    store::SqlRepository,
};

pub struct AppState {
    pub repo: SharedRepository,
    pub runner: ScrapeRunner,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,movieobserver=debug,sqlx=warn".to_string()),
        )
        .init();

    let config = Config::from_env()?;
    let cancel = CancellationToken::new();

    let repo: SharedRepository = match config.storage {
        StorageBackend::Sqlite => {
            let url = config.database_url.as_deref().context("DATABASE_URL")?;
            let db = db::connect_and_migrate(url).await.context("database setup failed")?;
            info!("using sqlite storage");
            Arc::new(SqlRepository::new(db))
        },
        StorageBackend::Memory => {
            warn!("using in-memory storage, data is lost on restart");
            Arc::new(MemoryRepository::new())
        },
    };

    let browser =
        BrowserOptions::new(config.chrome_path.clone(), config.render_timeout, config.render_wait);
    let fetcher: SharedFetcher = Arc::new(WebFetcher::new(
        config.fetch_timeout,
        config.fetch_rps,
        browser,
        cancel.clone(),
    )?);

    let orchestrator = Arc::new(ScrapeOrchestrator::new(extractors(&config, fetcher)?, repo.clone()));
    let runner = ScrapeRunner::new(orchestrator, cancel.clone(), config.schedule_days);

    if let Some(every) = config.auto_scrape_every {
        spawn_auto_scrape(runner.clone(), every, cancel.clone());
    }

    let state = Arc::new(AppState { repo, runner });

    let app = routes::router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!(addr = %config.addr, "listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(cancel)).await?;

    Ok(())
}

/// Extractors in the order every run visits them.
fn extractors(config: &Config, fetcher: SharedFetcher) -> anyhow::Result<Vec<Arc<dyn Extractor>>> {
    let base = |raw: &str| url::Url::parse(raw).with_context(|| format!("base url {raw}"));

    let extractors: Vec<Arc<dyn Extractor>> = vec![
        Arc::new(UciCinemasExtractor::new(
            fetcher.clone(),
            base(UciCinemasExtractor::BASE_URL)?,
            config.uci_max_locations,
            Duration::from_millis(config.branch_delay_ms),
        )),
        Arc::new(SpazioCinemaExtractor::new(
            fetcher.clone(),
            base(SpazioCinemaExtractor::BASE_URL)?,
            &config.spazio_city,
        )),
        Arc::new(YelmoExtractor::new(fetcher.clone(), base(YelmoExtractor::BASE_URL)?)),
        Arc::new(CinessaExtractor::new(fetcher, base(CinessaExtractor::BASE_URL)?)),
    ];
    Ok(extractors)
}

fn spawn_auto_scrape(runner: ScrapeRunner, every: Duration, cancel: CancellationToken) {
    info!(every_secs = every.as_secs(), "periodic scraping enabled");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let reports = runner.run_schedule_now().await;
                    let persisted: usize = reports.iter().map(|r| r.persisted).sum();
                    info!(dates = reports.len(), persisted, "periodic scraping finished");
                }
            }
        }
    });
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
    cancel.cancel();
}
