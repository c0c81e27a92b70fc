use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, bail};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown STORAGE_BACKEND {other:?} (expected sqlite or memory)"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub storage: StorageBackend,
    pub database_url: Option<String>,
    pub fetch_timeout: Duration,
    pub render_timeout: Duration,
    pub render_wait: Duration,
    pub fetch_rps: u32,
    pub branch_delay_ms: u64,
    pub uci_max_locations: usize,
    pub spazio_city: String,
    pub chrome_path: Option<PathBuf>,
    pub schedule_days: u32,
    pub auto_scrape_every: Option<Duration>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 =
            std::env::var("PORT").unwrap_or_else(|_| "8000".to_string()).parse().context("PORT")?;

        let storage: StorageBackend = std::env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "sqlite".to_string())
            .parse()?;

        let database_url = std::env::var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty());
        if storage == StorageBackend::Sqlite && database_url.is_none() {
            bail!("DATABASE_URL must be set when STORAGE_BACKEND is sqlite");
        }

        let fetch_timeout_secs: u64 =
            std::env::var("FETCH_TIMEOUT_SECS").ok().and_then(|s| s.parse().ok()).unwrap_or(30);

        let render_timeout_secs: u64 =
            std::env::var("RENDER_TIMEOUT_SECS").ok().and_then(|s| s.parse().ok()).unwrap_or(30);

        let render_wait_secs: u64 =
            std::env::var("RENDER_WAIT_SECS").ok().and_then(|s| s.parse().ok()).unwrap_or(10);

        let fetch_rps: u32 =
            std::env::var("FETCH_RPS").ok().and_then(|s| s.parse().ok()).unwrap_or(2);

        let branch_delay_ms: u64 =
            std::env::var("BRANCH_DELAY_MS").ok().and_then(|s| s.parse().ok()).unwrap_or(1000);

        let uci_max_locations: usize =
            std::env::var("UCI_MAX_LOCATIONS").ok().and_then(|s| s.parse().ok()).unwrap_or(3);

        let spazio_city = std::env::var("SPAZIO_CITY").unwrap_or_else(|_| "milano".to_string());

        let chrome_path = std::env::var("CHROME_PATH").ok().filter(|s| !s.is_empty()).map(PathBuf::from);

        let schedule_days: u32 =
            std::env::var("SCHEDULE_DAYS").ok().and_then(|s| s.parse().ok()).unwrap_or(7);

        let auto_scrape_every = match std::env::var("AUTO_SCRAPE_HOURS") {
            Ok(s) => {
                let hours: u64 = s.parse().context("AUTO_SCRAPE_HOURS")?;
                (hours > 0).then(|| Duration::from_secs(hours * 3600))
            },
            Err(_) => None,
        };

        Ok(Self {
            addr: format!("{host}:{port}").parse().context("HOST/PORT")?,
            storage,
            database_url,
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            render_timeout: Duration::from_secs(render_timeout_secs),
            render_wait: Duration::from_secs(render_wait_secs),
            fetch_rps,
            branch_delay_ms,
            uci_max_locations,
            spazio_city: spazio_city.to_lowercase(),
            chrome_path,
            schedule_days,
            auto_scrape_every,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_backend_parses_case_insensitively() {
        assert_eq!("SQLite".parse::<StorageBackend>().unwrap(), StorageBackend::Sqlite);
        assert_eq!(" memory ".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert!("mongo".parse::<StorageBackend>().is_err());
    }
}
