use std::path::PathBuf;
use std::time::Duration;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_GEOCODER_ENDPOINT: &str = "https://geocode-maps.yandex.ru/1.x/";
const DEFAULT_REGION_BBOX: &str = "35.5,62.8~49.0,67.5";
const DEFAULT_CITY: &str = "Архангельск";
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko)";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub database_file_name: String,
    pub geocode_cache_file: String,
    pub gazetteer_path: PathBuf,
    pub known_places_path: PathBuf,
    pub landmarks_path: PathBuf,
    pub default_city: String,
    pub region_bbox: String,
    pub geocoder_endpoint: String,
    pub geocoder_api_key: Option<SecretString>,
    pub geocoder_timeout_secs: u64,
    pub content_timeout_secs: u64,
    pub user_agent: String,
    pub worker: WorkerConfig,
}

/// Pacing of the backlog loop. Every delay exists to keep the geocoder and the news site
/// below their (undocumented) request limits.
#[derive(Clone, Debug, Serialize)]
pub struct WorkerConfig {
    pub batch_size: usize,
    pub idle_secs: u64,
    pub item_delay_ms: u64,
    pub batch_delay_secs: u64,
    pub backoff_secs: u64,
}

impl WorkerConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_secs(self.batch_delay_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 6,
            idle_secs: 60,
            item_delay_ms: 1_500,
            batch_delay_secs: 10,
            backoff_secs: 60,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub data_dir: String,
    pub database_file_name: String,
    pub geocode_cache_file: String,
    pub gazetteer_path: String,
    pub default_city: String,
    pub region_bbox: String,
    pub geocoder_endpoint: String,
    pub has_geocoder_api_key: bool,
    pub worker: WorkerConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        let defaults = WorkerConfig::default();
        Self {
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            database_file_name: env::var("DATABASE_FILE_NAME")
                .unwrap_or_else(|_| "news.db".to_string()),
            geocode_cache_file: env::var("GEOCODE_CACHE_FILE")
                .unwrap_or_else(|_| "geo_cache.json".to_string()),
            gazetteer_path: parse_path("GAZETTEER_PATH", "data/streets.json"),
            known_places_path: parse_path("KNOWN_PLACES_PATH", "data/known_places.json"),
            landmarks_path: parse_path("LANDMARKS_PATH", "data/landmarks.json"),
            default_city: env::var("DEFAULT_CITY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CITY.to_string()),
            region_bbox: env::var("REGION_BBOX").unwrap_or_else(|_| DEFAULT_REGION_BBOX.into()),
            geocoder_endpoint: env::var("GEOCODER_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_GEOCODER_ENDPOINT.to_string()),
            geocoder_api_key: env::var("GEOCODER_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            geocoder_timeout_secs: parse_u64("GEOCODER_TIMEOUT_SECS", 10).clamp(1, 60),
            content_timeout_secs: parse_u64("CONTENT_TIMEOUT_SECS", 15).clamp(1, 120),
            user_agent: env::var("HTTP_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            worker: WorkerConfig {
                batch_size: parse_usize("WORKER_BATCH_SIZE", defaults.batch_size).max(1),
                idle_secs: parse_u64("WORKER_IDLE_SECS", defaults.idle_secs),
                item_delay_ms: parse_u64("WORKER_ITEM_DELAY_MS", defaults.item_delay_ms),
                batch_delay_secs: parse_u64("WORKER_BATCH_DELAY_SECS", defaults.batch_delay_secs),
                backoff_secs: parse_u64("WORKER_BACKOFF_SECS", defaults.backoff_secs),
            },
        }
    }

    /// Defaults with no environment lookups, rooted at `data_dir`.
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            database_file_name: "news.db".into(),
            geocode_cache_file: "geo_cache.json".into(),
            gazetteer_path: PathBuf::from("data/streets.json"),
            known_places_path: PathBuf::from("data/known_places.json"),
            landmarks_path: PathBuf::from("data/landmarks.json"),
            default_city: DEFAULT_CITY.into(),
            region_bbox: DEFAULT_REGION_BBOX.into(),
            geocoder_endpoint: DEFAULT_GEOCODER_ENDPOINT.into(),
            geocoder_api_key: None,
            geocoder_timeout_secs: 10,
            content_timeout_secs: 15,
            user_agent: DEFAULT_USER_AGENT.into(),
            worker: WorkerConfig::default(),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file_name)
    }

    pub fn geocode_cache_path(&self) -> PathBuf {
        self.data_dir.join(&self.geocode_cache_file)
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            data_dir: self.data_dir.to_string_lossy().to_string(),
            database_file_name: self.database_file_name.clone(),
            geocode_cache_file: self.geocode_cache_file.clone(),
            gazetteer_path: self.gazetteer_path.to_string_lossy().to_string(),
            default_city: self.default_city.clone(),
            region_bbox: self.region_bbox.clone(),
            geocoder_endpoint: self.geocoder_endpoint.clone(),
            has_geocoder_api_key: self.geocoder_api_key.is_some(),
            worker: self.worker.clone(),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_path(key: &str, default: &str) -> PathBuf {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}
