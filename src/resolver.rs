use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::building;
use crate::config::AppConfig;
use crate::entities::{
    AddressFactExtractor, EntityKind, EntityTagger, PatternAddressExtractor, TaggedSpan,
};
use crate::gazetteer::{load_data_file, Gazetteer};

/// Entity spans shorter than this are noise ("МЧС" aside, which is filtered anyway).
const MIN_ENTITY_CHARS: usize = 4;

/// Site branding, region and country names, and agencies that appear in almost every
/// article without pointing at a place.
pub const DEFAULT_STOP_PHRASES: &[&str] = &[
    "news29",
    "новости",
    "архангельская область",
    "архангельской области",
    "поморье",
    "россия",
    "российская федерация",
    "мчс",
    "гибдд",
    "мвд",
    "правительство",
    "администрация",
    "russia",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStrategy {
    KnownPlace,
    Gazetteer,
    Whitelist,
    NerFallback,
    StructuredFallback,
    None,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::KnownPlace => "KNOWN_PLACE",
            ResolutionStrategy::Gazetteer => "GAZETTEER",
            ResolutionStrategy::Whitelist => "WHITELIST",
            ResolutionStrategy::NerFallback => "NER_FALLBACK",
            ResolutionStrategy::StructuredFallback => "STRUCTURED_FALLBACK",
            ResolutionStrategy::None => "NONE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressCandidate {
    pub matched_phrase: String,
    pub building: Option<String>,
    pub address: String,
    pub strategy: ResolutionStrategy,
}

impl AddressCandidate {
    fn new(
        matched_phrase: impl Into<String>,
        building: Option<String>,
        address: String,
        strategy: ResolutionStrategy,
    ) -> Self {
        Self {
            matched_phrase: matched_phrase.into(),
            building,
            address,
            strategy,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct KnownPlacesFile {
    #[serde(default)]
    places: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct LandmarksFile {
    #[serde(default)]
    landmarks: Vec<String>,
}

/// Fixed phrase → canonical address overrides.
#[derive(Debug, Clone, Default)]
pub struct KnownPlaces {
    entries: Vec<(String, String)>,
}

impl KnownPlaces {
    pub fn new<I, P, A>(entries: I) -> Self
    where
        I: IntoIterator<Item = (P, A)>,
        P: AsRef<str>,
        A: AsRef<str>,
    {
        let mut entries: Vec<(String, String)> = entries
            .into_iter()
            .map(|(phrase, address)| {
                (
                    phrase.as_ref().trim().to_lowercase(),
                    address.as_ref().trim().to_string(),
                )
            })
            .filter(|(phrase, address)| !phrase.is_empty() && !address.is_empty())
            .collect();
        sort_longest_first(&mut entries, |(phrase, _)| phrase);
        entries.dedup_by(|a, b| a.0 == b.0);
        Self { entries }
    }

    /// Reads `{"places": {"phrase": "address", ...}}`.
    pub fn load(path: &Path) -> Self {
        let file: KnownPlacesFile = load_data_file(path, "known places");
        let places = Self::new(file.places);
        info!(
            target: "resolver",
            path = %path.display(),
            entries = places.len(),
            "known places loaded"
        );
        places
    }

    fn find(&self, folded: &str) -> Option<(&str, &str)> {
        self.entries
            .iter()
            .find(|(phrase, _)| folded.contains(phrase.as_str()))
            .map(|(phrase, address)| (phrase.as_str(), address.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Curated landmark phrases without coordinates of their own.
#[derive(Debug, Clone, Default)]
pub struct Landmarks {
    phrases: Vec<String>,
}

impl Landmarks {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut phrases: Vec<String> = phrases
            .into_iter()
            .map(|phrase| phrase.as_ref().trim().to_lowercase())
            .filter(|phrase| !phrase.is_empty() && seen.insert(phrase.clone()))
            .collect();
        sort_longest_first(&mut phrases, |phrase| phrase);
        Self { phrases }
    }

    /// Reads `{"landmarks": [...]}`.
    pub fn load(path: &Path) -> Self {
        let file: LandmarksFile = load_data_file(path, "landmarks");
        let landmarks = Self::new(file.landmarks);
        info!(
            target: "resolver",
            path = %path.display(),
            entries = landmarks.len(),
            "landmarks loaded"
        );
        landmarks
    }

    fn find(&self, folded: &str) -> Option<&str> {
        self.phrases
            .iter()
            .find(|phrase| folded.contains(phrase.as_str()))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

fn sort_longest_first<T>(items: &mut [T], key: impl Fn(&T) -> &String) {
    items.sort_by(|a, b| {
        let (a, b) = (key(a), key(b));
        b.chars()
            .count()
            .cmp(&a.chars().count())
            .then_with(|| a.cmp(b))
    });
}

/// Ordered address strategy chain. The first strategy that yields a usable address wins;
/// when none does the article has no address.
pub struct AddressResolver {
    default_city: String,
    folded_city: String,
    known_places: KnownPlaces,
    gazetteer: Gazetteer,
    landmarks: Landmarks,
    entity_tagger: Option<Arc<dyn EntityTagger>>,
    fact_extractor: Option<Arc<dyn AddressFactExtractor>>,
    stop_phrases: Vec<String>,
}

impl AddressResolver {
    pub fn new(default_city: impl Into<String>, gazetteer: Gazetteer) -> Self {
        let default_city = default_city.into().trim().to_string();
        let folded_city = default_city.to_lowercase();
        let mut resolver = Self {
            default_city,
            folded_city,
            known_places: KnownPlaces::default(),
            gazetteer,
            landmarks: Landmarks::default(),
            entity_tagger: None,
            fact_extractor: None,
            stop_phrases: Vec::new(),
        };
        resolver.set_stop_phrases(DEFAULT_STOP_PHRASES.iter().copied());
        resolver
    }

    /// Loads the data files and installs the rule-based structured extractor. No entity
    /// tagger ships with the crate: `with_entity_tagger` is the seam for plugging a
    /// statistical model in, and without one the entity step is skipped.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.default_city.clone(),
            Gazetteer::load(&config.gazetteer_path),
        )
        .with_known_places(KnownPlaces::load(&config.known_places_path))
        .with_landmarks(Landmarks::load(&config.landmarks_path))
        .with_fact_extractor(Arc::new(PatternAddressExtractor))
    }

    pub fn with_known_places(mut self, known_places: KnownPlaces) -> Self {
        self.known_places = known_places;
        self
    }

    pub fn with_landmarks(mut self, landmarks: Landmarks) -> Self {
        self.landmarks = landmarks;
        self
    }

    pub fn with_entity_tagger(mut self, tagger: Arc<dyn EntityTagger>) -> Self {
        self.entity_tagger = Some(tagger);
        self
    }

    pub fn with_fact_extractor(mut self, extractor: Arc<dyn AddressFactExtractor>) -> Self {
        self.fact_extractor = Some(extractor);
        self
    }

    pub fn with_stop_phrases<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.set_stop_phrases(phrases);
        self
    }

    fn set_stop_phrases<I, S>(&mut self, phrases: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.stop_phrases = phrases
            .into_iter()
            .map(|phrase| phrase.as_ref().trim().to_lowercase())
            .filter(|phrase| !phrase.is_empty())
            .collect();
    }

    pub fn default_city(&self) -> &str {
        &self.default_city
    }

    pub fn gazetteer(&self) -> &Gazetteer {
        &self.gazetteer
    }

    pub fn resolve(&self, title: &str, content: &str) -> Option<AddressCandidate> {
        let text = format!("{} {}", title.trim(), content.trim());
        self.resolve_text(&text)
    }

    pub fn resolve_text(&self, text: &str) -> Option<AddressCandidate> {
        let folded = text.to_lowercase();
        let candidate = self
            .known_place(&folded)
            .or_else(|| self.gazetteer_address(text))
            .or_else(|| self.landmark(&folded))
            .or_else(|| self.entity_fallback(text))
            .or_else(|| self.structured_fallback(text));

        match &candidate {
            Some(found) => debug!(
                target: "resolver",
                address = %found.address,
                strategy = found.strategy.as_str(),
                "address resolved"
            ),
            None => debug!(
                target: "resolver",
                strategy = ResolutionStrategy::None.as_str(),
                "no address in text"
            ),
        }
        candidate
    }

    fn known_place(&self, folded: &str) -> Option<AddressCandidate> {
        let (phrase, address) = self.known_places.find(folded)?;
        accept(AddressCandidate::new(
            phrase,
            None,
            address.to_string(),
            ResolutionStrategy::KnownPlace,
        ))
    }

    fn gazetteer_address(&self, text: &str) -> Option<AddressCandidate> {
        let street = self.gazetteer.find(text)?;
        let number = building::extract(text, street);
        let address = match &number {
            Some(number) => format!("{}, {street}, {number}", self.default_city),
            None => format!("{}, {street}", self.default_city),
        };
        accept(AddressCandidate::new(
            street,
            number,
            address,
            ResolutionStrategy::Gazetteer,
        ))
    }

    fn landmark(&self, folded: &str) -> Option<AddressCandidate> {
        let phrase = self.landmarks.find(folded)?;
        let address = if self.names_city(phrase) {
            phrase.to_string()
        } else {
            format!("{}, {phrase}", self.default_city)
        };
        accept(AddressCandidate::new(
            phrase,
            None,
            address,
            ResolutionStrategy::Whitelist,
        ))
    }

    fn names_city(&self, phrase: &str) -> bool {
        phrase.contains(',') || (!self.folded_city.is_empty() && phrase.contains(&self.folded_city))
    }

    /// Tagger spans arrive with surrounding whitespace and newlines from stripped markup;
    /// the address is the span text with that padding trimmed and nothing else changed.
    fn entity_fallback(&self, text: &str) -> Option<AddressCandidate> {
        let tagger = self.entity_tagger.as_ref()?;
        let span = tagger
            .tag(text)
            .filter(|span| matches!(span.kind, EntityKind::Location | EntityKind::Organization))
            .find(|span| self.acceptable_span(span))?;
        let address = span.text.trim().to_string();
        accept(AddressCandidate::new(
            address.clone(),
            None,
            address,
            ResolutionStrategy::NerFallback,
        ))
    }

    fn acceptable_span(&self, span: &TaggedSpan) -> bool {
        let trimmed = span.text.trim();
        if trimmed.chars().count() < MIN_ENTITY_CHARS {
            return false;
        }
        let folded = trimmed.to_lowercase();
        // The bare city would geocode to the city centre; names built on it are fine.
        if !self.folded_city.is_empty() && folded == self.folded_city {
            return false;
        }
        !self
            .stop_phrases
            .iter()
            .any(|stop| folded.contains(stop.as_str()))
    }

    fn structured_fallback(&self, text: &str) -> Option<AddressCandidate> {
        let extractor = self.fact_extractor.as_ref()?;
        let fact = extractor.extract(text)?;
        let address = fact.to_address()?;
        let phrase = fact.street.clone().unwrap_or_else(|| address.clone());
        accept(AddressCandidate::new(
            phrase,
            fact.building.clone(),
            address,
            ResolutionStrategy::StructuredFallback,
        ))
    }
}

/// Drops candidates that cannot be sent to the geocoder.
fn accept(candidate: AddressCandidate) -> Option<AddressCandidate> {
    let trimmed = candidate.address.trim();
    if trimmed.is_empty() || !trimmed.chars().any(char::is_alphabetic) {
        debug!(
            target: "resolver",
            strategy = candidate.strategy.as_str(),
            "discarding malformed address candidate"
        );
        return None;
    }
    Some(candidate)
}
