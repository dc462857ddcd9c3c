use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::AppResult;

/// A point in the canonical `(latitude, longitude)` order, stored as `[lat, lon]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl From<[f64; 2]> for Coordinates {
    fn from([latitude, longitude]: [f64; 2]) -> Self {
        Self::new(latitude, longitude)
    }
}

impl From<Coordinates> for [f64; 2] {
    fn from(value: Coordinates) -> Self {
        [value.latitude, value.longitude]
    }
}

/// Persistent address → coordinates map.
///
/// Entries are never evicted; one metro area's street set stays small. Every `put`
/// rewrites the whole file through a temporary sibling that is renamed into place.
pub struct GeocodeCache {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Coordinates>>,
}

impl GeocodeCache {
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = read_entries(&path);
        info!(
            target: "geocache",
            path = %path.display(),
            entries = entries.len(),
            "geocode cache loaded"
        );
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn get(&self, address: &str) -> Option<Coordinates> {
        self.entries.lock().get(address).copied()
    }

    /// Inserts and persists. The in-memory entry survives a failed write.
    pub fn put(&self, address: &str, coords: Coordinates) -> AppResult<()> {
        let mut entries = self.entries.lock();
        entries.insert(address.to_string(), coords);
        self.persist_locked(&entries)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist_locked(&self, entries: &BTreeMap<String, Coordinates>) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let serialized = serde_json::to_string_pretty(entries)?;
        let staging = self.staging_path();
        fs::write(&staging, serialized)?;
        fs::rename(&staging, &self.path)?;
        debug!(
            target: "geocache",
            path = %self.path.display(),
            entries = entries.len(),
            "geocode cache persisted"
        );
        Ok(())
    }

    fn staging_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "geo_cache.json".into());
        self.path.with_file_name(format!("{name}.tmp"))
    }
}

fn read_entries(path: &Path) -> BTreeMap<String, Coordinates> {
    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    target: "geocache",
                    path = %path.display(),
                    error = ?err,
                    "geocode cache unreadable; starting empty"
                );
                BTreeMap::new()
            }
        },
        Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
        Err(err) => {
            warn!(
                target: "geocache",
                path = %path.display(),
                error = ?err,
                "failed to open geocode cache; starting empty"
            );
            BTreeMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("geo_cache.json");
        {
            let cache = GeocodeCache::open(&path);
            assert!(cache.is_empty());
            cache
                .put("Архангельск, ленина, 5", Coordinates::new(64.54, 40.54))
                .unwrap();
        }

        let cache = GeocodeCache::open(&path);
        assert_eq!(
            cache.get("Архангельск, ленина, 5"),
            Some(Coordinates::new(64.54, 40.54))
        );
        assert_eq!(cache.get("Архангельск, ленина"), None);
        assert!(!path.with_file_name("geo_cache.json.tmp").exists());
    }

    #[test]
    fn stores_lat_lon_arrays() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache = GeocodeCache::open(&path);
        cache
            .put("Arkhangelsk, lenina, 5", Coordinates::new(64.54, 40.54))
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["Arkhangelsk, lenina, 5"], serde_json::json!([64.54, 40.54]));
    }

    #[test]
    fn corrupted_file_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("geo_cache.json");
        fs::write(&path, "{\"half\": [64.5").unwrap();

        let cache = GeocodeCache::open(&path);
        assert!(cache.is_empty());
        cache.put("a", Coordinates::new(1.0, 2.0)).unwrap();
        assert_eq!(GeocodeCache::open(&path).len(), 1);
    }

    #[test]
    fn keeps_entry_when_persist_fails() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();
        let cache = GeocodeCache::open(blocker.join("geo_cache.json"));

        assert!(cache.put("a", Coordinates::new(1.0, 2.0)).is_err());
        assert_eq!(cache.get("a"), Some(Coordinates::new(1.0, 2.0)));
    }
}
