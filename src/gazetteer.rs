use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Known street and place names, case-folded and ordered longest first so that a more
/// specific name always wins over a shorter name it contains.
#[derive(Debug, Clone, Default)]
pub struct Gazetteer {
    entries: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GazetteerFile {
    #[serde(default)]
    streets: Vec<String>,
}

impl Gazetteer {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut entries: Vec<String> = entries
            .into_iter()
            .map(|entry| entry.as_ref().trim().to_lowercase())
            .filter(|entry| !entry.is_empty())
            .filter(|entry| seen.insert(entry.clone()))
            .collect();
        entries.sort_by(|a, b| {
            b.chars()
                .count()
                .cmp(&a.chars().count())
                .then_with(|| a.cmp(b))
        });
        Self { entries }
    }

    /// Reads `{"streets": [...]}`. A missing or malformed file yields an empty gazetteer.
    pub fn load(path: &Path) -> Self {
        let file: GazetteerFile = load_data_file(path, "gazetteer");
        let gazetteer = Self::new(file.streets);
        info!(
            target: "gazetteer",
            path = %path.display(),
            entries = gazetteer.len(),
            "gazetteer loaded"
        );
        gazetteer
    }

    pub fn find(&self, text: &str) -> Option<&str> {
        let folded = text.to_lowercase();
        let found = self
            .entries
            .iter()
            .find(|entry| folded.contains(entry.as_str()))
            .map(String::as_str);
        if let Some(entry) = found {
            debug!(target: "gazetteer", entry, "street matched");
        }
        found
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

/// Loads a JSON data file, falling back to `T::default()` when it is absent or unreadable.
pub(crate) fn load_data_file<T>(path: &Path, label: &str) -> T
where
    T: DeserializeOwned + Default,
{
    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<T>(&contents) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(
                    target: "gazetteer",
                    path = %path.display(),
                    error = ?err,
                    "failed to parse {label} file; continuing with an empty set"
                );
                T::default()
            }
        },
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warn!(
                target: "gazetteer",
                path = %path.display(),
                "{label} file not found; continuing with an empty set"
            );
            T::default()
        }
        Err(err) => {
            warn!(
                target: "gazetteer",
                path = %path.display(),
                error = ?err,
                "failed to read {label} file; continuing with an empty set"
            );
            T::default()
        }
    }
}
