use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::geocache::{Coordinates, GeocodeCache};

/// Bounding box given by two `(longitude, latitude)` corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionBounds {
    pub lower: (f64, f64),
    pub upper: (f64, f64),
}

impl RegionBounds {
    pub fn new(lower: (f64, f64), upper: (f64, f64)) -> Self {
        Self {
            lower: (lower.0.min(upper.0), lower.1.min(upper.1)),
            upper: (lower.0.max(upper.0), lower.1.max(upper.1)),
        }
    }

    /// Parses the `lon,lat~lon,lat` notation.
    pub fn parse(value: &str) -> AppResult<Self> {
        let invalid = || AppError::Config(format!("invalid region bounding box: {value}"));
        let (lower, upper) = value.trim().split_once('~').ok_or_else(invalid)?;
        let corner = |text: &str| -> AppResult<(f64, f64)> {
            let (lon, lat) = text.split_once(',').ok_or_else(invalid)?;
            let lon = lon.trim().parse::<f64>().map_err(|_| invalid())?;
            let lat = lat.trim().parse::<f64>().map_err(|_| invalid())?;
            if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
                return Err(invalid());
            }
            Ok((lon, lat))
        };
        Ok(Self::new(corner(lower)?, corner(upper)?))
    }

    pub fn contains(&self, coords: &Coordinates) -> bool {
        (self.lower.0..=self.upper.0).contains(&coords.longitude)
            && (self.lower.1..=self.upper.1).contains(&coords.latitude)
    }
}

impl fmt::Display for RegionBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{}~{},{}",
            self.lower.0, self.lower.1, self.upper.0, self.upper.1
        )
    }
}

impl FromStr for RegionBounds {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

/// External geocoding service. `Ok(None)` means the service answered with no match.
#[async_trait]
pub trait GeocodeLookup: Send + Sync {
    async fn lookup(&self, address: &str, region: &RegionBounds)
        -> AppResult<Option<Coordinates>>;
}

/// How a `resolve` call was answered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeocodeOutcome {
    Cached(Coordinates),
    Fetched(Coordinates),
    NotFound,
    Failed,
}

impl GeocodeOutcome {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match self {
            GeocodeOutcome::Cached(coords) | GeocodeOutcome::Fetched(coords) => Some(*coords),
            GeocodeOutcome::NotFound | GeocodeOutcome::Failed => None,
        }
    }
}

/// Cache-first geocoder. A miss costs exactly one external call; failures are logged and
/// never cached. Callers are responsible for spacing calls.
#[derive(Clone)]
pub struct GeocodingClient {
    cache: Arc<GeocodeCache>,
    lookup: Arc<dyn GeocodeLookup>,
}

impl GeocodingClient {
    pub fn new(cache: Arc<GeocodeCache>, lookup: Arc<dyn GeocodeLookup>) -> Self {
        Self { cache, lookup }
    }

    pub fn cache(&self) -> &GeocodeCache {
        &self.cache
    }

    pub async fn resolve(&self, address: &str, region: &RegionBounds) -> Option<Coordinates> {
        self.resolve_detailed(address, region).await.coordinates()
    }

    pub async fn resolve_detailed(&self, address: &str, region: &RegionBounds) -> GeocodeOutcome {
        let address = address.trim();
        if address.is_empty() {
            return GeocodeOutcome::NotFound;
        }

        if let Some(coords) = self.cache.get(address) {
            debug!(target: "geocoder", address, "geocode cache hit");
            return GeocodeOutcome::Cached(coords);
        }

        match self.lookup.lookup(address, region).await {
            Ok(Some(coords)) => {
                if let Err(err) = self.cache.put(address, coords) {
                    warn!(target: "geocoder", ?err, address, "failed to persist geocode cache");
                }
                info!(
                    target: "geocoder",
                    address,
                    latitude = coords.latitude,
                    longitude = coords.longitude,
                    "address geocoded"
                );
                GeocodeOutcome::Fetched(coords)
            }
            Ok(None) => {
                info!(target: "geocoder", address, "geocoder returned no results");
                GeocodeOutcome::NotFound
            }
            Err(err) => {
                warn!(target: "geocoder", ?err, address, "geocoding request failed");
                GeocodeOutcome::Failed
            }
        }
    }
}

/// Yandex Geocoder HTTP API client.
pub struct HttpGeocoder {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl HttpGeocoder {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.geocoder_timeout_secs))
            .build()?;
        if config.geocoder_api_key.is_none() {
            warn!(target: "geocoder", "GEOCODER_API_KEY not set; requests will likely be rejected");
        }
        Ok(Self {
            http,
            endpoint: config.geocoder_endpoint.clone(),
            api_key: config.geocoder_api_key.clone(),
        })
    }
}

#[async_trait]
impl GeocodeLookup for HttpGeocoder {
    async fn lookup(
        &self,
        address: &str,
        region: &RegionBounds,
    ) -> AppResult<Option<Coordinates>> {
        let bbox = region.to_string();
        let mut query = vec![
            ("geocode", address),
            ("format", "json"),
            ("results", "1"),
            ("bbox", bbox.as_str()),
            ("rspn", "1"),
        ];
        if let Some(key) = &self.api_key {
            query.push(("apikey", key.expose_secret()));
        }

        debug!(target: "geocoder", address, "requesting geocoder");
        let response = self
            .http
            .get(&self.endpoint)
            .query(&query)
            .send()
            .await?
            .error_for_status()?;
        let body: GeocoderEnvelope = response.json().await?;
        let Some(member) = body.response.collection.members.into_iter().next() else {
            return Ok(None);
        };

        let coords = parse_position(&member.geo_object.point.pos)?;
        if !region.contains(&coords) {
            warn!(
                target: "geocoder",
                address,
                latitude = coords.latitude,
                longitude = coords.longitude,
                "geocoder result outside region; ignoring"
            );
            return Ok(None);
        }
        Ok(Some(coords))
    }
}

/// Converts the service's `"lon lat"` position into canonical coordinates.
fn parse_position(pos: &str) -> AppResult<Coordinates> {
    let mut parts = pos.split_whitespace();
    let mut next = || -> AppResult<f64> {
        parts
            .next()
            .ok_or_else(|| AppError::Geocoder(format!("incomplete position: {pos}")))?
            .parse::<f64>()
            .map_err(|err| AppError::Geocoder(format!("invalid position {pos}: {err}")))
    };
    let longitude = next()?;
    let latitude = next()?;
    Ok(Coordinates::new(latitude, longitude))
}

#[derive(Deserialize)]
struct GeocoderEnvelope {
    response: GeocoderResponse,
}

#[derive(Deserialize)]
struct GeocoderResponse {
    #[serde(rename = "GeoObjectCollection")]
    collection: GeoObjectCollection,
}

#[derive(Deserialize)]
struct GeoObjectCollection {
    #[serde(rename = "featureMember", default)]
    members: Vec<FeatureMember>,
}

#[derive(Deserialize)]
struct FeatureMember {
    #[serde(rename = "GeoObject")]
    geo_object: GeoObject,
}

#[derive(Deserialize)]
struct GeoObject {
    #[serde(rename = "Point")]
    point: GeoPoint,
}

#[derive(Deserialize)]
struct GeoPoint {
    pos: String,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use parking_lot::Mutex;
    use tempfile::tempdir;

    use super::*;

    struct CountingLookup {
        answers: HashMap<String, Coordinates>,
        fail: bool,
        calls: Mutex<Vec<String>>,
    }

    impl CountingLookup {
        fn new(answers: &[(&str, Coordinates)]) -> Self {
            Self {
                answers: answers
                    .iter()
                    .map(|(address, coords)| (address.to_string(), *coords))
                    .collect(),
                fail: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(&[])
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl GeocodeLookup for CountingLookup {
        async fn lookup(
            &self,
            address: &str,
            _region: &RegionBounds,
        ) -> AppResult<Option<Coordinates>> {
            self.calls.lock().push(address.to_string());
            if self.fail {
                return Err(AppError::Geocoder("stub outage".into()));
            }
            Ok(self.answers.get(address).copied())
        }
    }

    fn region() -> RegionBounds {
        RegionBounds::parse("35.5,62.8~49.0,67.5").unwrap()
    }

    #[tokio::test]
    async fn second_resolve_uses_cache() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(GeocodeCache::open(dir.path().join("geo.json")));
        let lookup = Arc::new(CountingLookup::new(&[(
            "Arkhangelsk, lenina, 5",
            Coordinates::new(64.54, 40.54),
        )]));
        let client = GeocodingClient::new(cache.clone(), lookup.clone());

        let first = client.resolve("Arkhangelsk, lenina, 5", &region()).await;
        let second = client
            .resolve_detailed("Arkhangelsk, lenina, 5", &region())
            .await;

        assert_eq!(first, Some(Coordinates::new(64.54, 40.54)));
        assert_eq!(second, GeocodeOutcome::Cached(Coordinates::new(64.54, 40.54)));
        assert_eq!(lookup.call_count(), 1);
        assert_eq!(
            cache.get("Arkhangelsk, lenina, 5"),
            Some(Coordinates::new(64.54, 40.54))
        );
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(GeocodeCache::open(dir.path().join("geo.json")));
        let lookup = Arc::new(CountingLookup::failing());
        let client = GeocodingClient::new(cache.clone(), lookup.clone());

        assert_eq!(
            client.resolve_detailed("Arkhangelsk, pobedy", &region()).await,
            GeocodeOutcome::Failed
        );
        assert_eq!(client.resolve("Arkhangelsk, pobedy", &region()).await, None);
        assert_eq!(lookup.call_count(), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn empty_results_and_blank_addresses() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(GeocodeCache::open(dir.path().join("geo.json")));
        let lookup = Arc::new(CountingLookup::new(&[]));
        let client = GeocodingClient::new(cache.clone(), lookup.clone());

        assert_eq!(
            client.resolve_detailed("Nowhere street", &region()).await,
            GeocodeOutcome::NotFound
        );
        assert_eq!(client.resolve("   ", &region()).await, None);
        assert_eq!(lookup.call_count(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn parses_region_bounds() {
        let bounds = region();
        assert_eq!(bounds.lower, (35.5, 62.8));
        assert_eq!(bounds.upper, (49.0, 67.5));
        assert_eq!(bounds.to_string(), "35.5,62.8~49,67.5");
        assert!(bounds.contains(&Coordinates::new(64.54, 40.54)));
        assert!(!bounds.contains(&Coordinates::new(55.75, 37.61)));

        let swapped: RegionBounds = "49.0,67.5~35.5,62.8".parse().unwrap();
        assert_eq!(swapped, bounds);
        assert!(RegionBounds::parse("35.5,62.8").is_err());
        assert!(RegionBounds::parse("a,b~c,d").is_err());
        assert!(RegionBounds::parse("200,62.8~49.0,67.5").is_err());
    }

    #[test]
    fn converts_lon_lat_position() {
        let coords = parse_position("40.54 64.54").unwrap();
        assert_eq!(coords, Coordinates::new(64.54, 40.54));
        assert!(parse_position("40.54").is_err());
        assert!(parse_position("east north").is_err());
    }
}
