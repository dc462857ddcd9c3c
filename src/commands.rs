use serde::Serialize;
use tracing::info;

use crate::config::PublicAppConfig;
use crate::errors::AppResult;
use crate::geocache::Coordinates;
use crate::geocoder::GeocodeOutcome;
use crate::resolver::AddressCandidate;
use crate::App;

#[derive(Debug, Serialize)]
pub struct AppHealth {
    pub db_path: String,
    pub db_bootstrap_recovered: bool,
    pub geocode_cache_path: String,
    pub geocode_cache_entries: usize,
    pub gazetteer_entries: usize,
    pub config: PublicAppConfig,
}

/// Result of a dry-run resolution, printed as JSON by the `resolve` subcommand.
#[derive(Debug, Serialize)]
pub struct ResolveReport {
    pub candidate: Option<AddressCandidate>,
    pub coords: Option<Coordinates>,
    pub geocode_source: Option<&'static str>,
}

pub async fn run_worker(app: &App) {
    app.worker().run().await
}

pub async fn resolve(app: &App, title: &str, text: &str, geocode: bool) -> ResolveReport {
    let candidate = app.resolver().resolve(title, text);
    let outcome = match (&candidate, geocode) {
        (Some(candidate), true) => Some(
            app.geocoder()
                .resolve_detailed(&candidate.address, app.region())
                .await,
        ),
        _ => None,
    };
    ResolveReport {
        coords: outcome.and_then(|outcome| outcome.coordinates()),
        geocode_source: outcome.map(|outcome| match outcome {
            GeocodeOutcome::Cached(_) => "cache",
            GeocodeOutcome::Fetched(_) => "service",
            GeocodeOutcome::NotFound => "not_found",
            GeocodeOutcome::Failed => "failed",
        }),
        candidate,
    }
}

pub fn requeue(app: &App, id: Option<i64>) -> AppResult<usize> {
    let cleared = app.store().requeue_not_found(id)?;
    info!(target: "commands", cleared, article_id = ?id, "requeue finished");
    Ok(cleared)
}
