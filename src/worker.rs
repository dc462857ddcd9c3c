use std::sync::Arc;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::content::{self, ContentSource};
use crate::db::{Article, ArticleStore, ADDRESS_NOT_FOUND};
use crate::errors::{AppError, AppResult};
use crate::geocache::Coordinates;
use crate::geocoder::{GeocodingClient, RegionBounds};
use crate::resolver::{AddressCandidate, AddressResolver};

/// Counts for one pass over the backlog.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Articles whose result was written back, with or without coordinates.
    pub processed: usize,
    pub geocoded: usize,
    pub unresolved: usize,
    pub failed: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.processed == 0 && self.failed == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArticleOutcome {
    Geocoded {
        candidate: AddressCandidate,
        coords: Coordinates,
    },
    NotGeocoded {
        candidate: AddressCandidate,
    },
    Unresolved,
}

/// Drains the store's unresolved articles: content, address, coordinates, write-back.
/// Processing is sequential and paced by [`WorkerConfig`].
pub struct BacklogWorker {
    store: Arc<dyn ArticleStore>,
    content: Arc<dyn ContentSource>,
    resolver: Arc<AddressResolver>,
    geocoder: GeocodingClient,
    region: RegionBounds,
    config: WorkerConfig,
}

impl BacklogWorker {
    pub fn new(
        store: Arc<dyn ArticleStore>,
        content: Arc<dyn ContentSource>,
        resolver: Arc<AddressResolver>,
        geocoder: GeocodingClient,
        region: RegionBounds,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            content,
            resolver,
            geocoder,
            region,
            config,
        }
    }

    /// Runs until the surrounding task is dropped.
    pub async fn run(&self) {
        info!(
            target: "worker",
            batch_size = self.config.batch_size,
            region = %self.region,
            "backlog worker started"
        );
        loop {
            match self.run_cycle().await {
                Ok(report) if report.is_idle() => {
                    debug!(target: "worker", "backlog empty");
                    sleep(self.config.idle_interval()).await;
                }
                Ok(report) => {
                    info!(
                        target: "worker",
                        processed = report.processed,
                        geocoded = report.geocoded,
                        unresolved = report.unresolved,
                        failed = report.failed,
                        "batch finished"
                    );
                    sleep(self.config.batch_delay()).await;
                }
                Err(err) => {
                    warn!(target: "worker", ?err, "failed to fetch backlog batch");
                    sleep(self.config.backoff()).await;
                }
            }
        }
    }

    /// Fetches one batch and processes it. Only the batch fetch itself can fail; per-article
    /// errors are counted in the report.
    pub async fn run_cycle(&self) -> AppResult<CycleReport> {
        let batch = self.store.fetch_unresolved_batch(self.config.batch_size)?;
        let mut report = CycleReport::default();

        for article in &batch {
            match self.process_article(article).await {
                Ok(outcome) => {
                    report.processed += 1;
                    match outcome {
                        ArticleOutcome::Geocoded { .. } => report.geocoded += 1,
                        ArticleOutcome::Unresolved => report.unresolved += 1,
                        ArticleOutcome::NotGeocoded { .. } => {}
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        target: "worker",
                        article_id = article.id,
                        url = %article.url,
                        error = %err,
                        "failed to process article"
                    );
                }
            }
            sleep(self.config.item_delay()).await;
        }

        Ok(report)
    }

    pub async fn process_article(&self, article: &Article) -> AppResult<ArticleOutcome> {
        let content = match article.content.as_deref() {
            Some(existing) if !content::is_unavailable(existing) => existing.to_string(),
            _ => self.content.fetch(&article.url).await,
        };
        let text = if content::is_unavailable(&content) {
            String::new()
        } else {
            content::strip_markup(&content)
        };

        let Some(candidate) = self.resolver.resolve(&article.title, &text) else {
            self.store
                .update(article.id, &content, None, ADDRESS_NOT_FOUND)
                .map_err(|err| AppError::for_article(article.id, ADDRESS_NOT_FOUND, err))?;
            info!(target: "worker", article_id = article.id, "no address found");
            return Ok(ArticleOutcome::Unresolved);
        };

        let coords = self.geocoder.resolve(&candidate.address, &self.region).await;
        self.store
            .update(article.id, &content, coords, &candidate.address)
            .map_err(|err| AppError::for_article(article.id, &candidate.address, err))?;

        match coords {
            Some(coords) => {
                info!(
                    target: "worker",
                    article_id = article.id,
                    address = %candidate.address,
                    strategy = candidate.strategy.as_str(),
                    latitude = coords.latitude,
                    longitude = coords.longitude,
                    "article geocoded"
                );
                Ok(ArticleOutcome::Geocoded { candidate, coords })
            }
            None => {
                warn!(
                    target: "worker",
                    article_id = article.id,
                    address = %candidate.address,
                    strategy = candidate.strategy.as_str(),
                    "address not geocoded"
                );
                Ok(ArticleOutcome::NotGeocoded { candidate })
            }
        }
    }
}
