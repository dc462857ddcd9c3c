pub mod building;
pub mod cli;
pub mod commands;
pub mod config;
pub mod content;
pub mod db;
pub mod entities;
pub mod errors;
pub mod gazetteer;
pub mod geocache;
pub mod geocoder;
pub mod resolver;
pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::commands::AppHealth;
use crate::config::AppConfig;
use crate::content::{ContentSource, HttpContentExtractor};
use crate::db::{bootstrap, DatabaseBootstrap, DatabaseContext, SqliteArticleStore};
use crate::errors::AppResult;
use crate::geocache::GeocodeCache;
use crate::geocoder::{GeocodingClient, HttpGeocoder, RegionBounds};
use crate::resolver::AddressResolver;
use crate::worker::BacklogWorker;

pub use crate::errors::AppError;

/// Everything the subcommands need, built once from configuration.
pub struct App {
    config: AppConfig,
    store: SqliteArticleStore,
    db_path: PathBuf,
    db_bootstrap_recovered: bool,
    resolver: Arc<AddressResolver>,
    geocoder: GeocodingClient,
    content: Arc<dyn ContentSource>,
    region: RegionBounds,
}

impl App {
    pub fn initialize(config: AppConfig) -> AppResult<Self> {
        init_tracing();
        let region = RegionBounds::parse(&config.region_bbox)?;

        let DatabaseBootstrap {
            context: DatabaseContext { connection, path },
            recovered,
            ..
        } = bootstrap(&config.data_dir, &config.database_file_name)?;
        let store = SqliteArticleStore::new(Arc::new(Mutex::new(connection)));

        let cache = Arc::new(GeocodeCache::open(config.geocode_cache_path()));
        let geocoder = GeocodingClient::new(cache, Arc::new(HttpGeocoder::new(&config)?));
        let content: Arc<dyn ContentSource> = Arc::new(HttpContentExtractor::new(&config)?);
        let resolver = Arc::new(AddressResolver::from_config(&config));

        let app = Self {
            config,
            store,
            db_path: path,
            db_bootstrap_recovered: recovered,
            resolver,
            geocoder,
            content,
            region,
        };
        info!(
            target: "app",
            db_path = %app.db_path.display(),
            recovered = app.db_bootstrap_recovered,
            gazetteer_entries = app.resolver.gazetteer().len(),
            cache_entries = app.geocoder.cache().len(),
            "application initialized"
        );
        Ok(app)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &SqliteArticleStore {
        &self.store
    }

    pub fn resolver(&self) -> &AddressResolver {
        &self.resolver
    }

    pub fn geocoder(&self) -> &GeocodingClient {
        &self.geocoder
    }

    pub fn region(&self) -> &RegionBounds {
        &self.region
    }

    pub fn worker(&self) -> BacklogWorker {
        BacklogWorker::new(
            Arc::new(self.store.clone()),
            Arc::clone(&self.content),
            Arc::clone(&self.resolver),
            self.geocoder.clone(),
            self.region,
            self.config.worker.clone(),
        )
    }

    pub fn health(&self) -> AppHealth {
        AppHealth {
            db_path: self.db_path.to_string_lossy().to_string(),
            db_bootstrap_recovered: self.db_bootstrap_recovered,
            geocode_cache_path: self.geocoder.cache().path().to_string_lossy().to_string(),
            geocode_cache_entries: self.geocoder.cache().len(),
            gazetteer_entries: self.resolver.gazetteer().len(),
            config: self.config.public_profile(),
        }
    }
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,news_geocoder=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}
