//! Statistical and rule-based collaborators consulted after the literal strategies fail.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::building;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Organization,
    Location,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedSpan {
    pub kind: EntityKind,
    pub text: String,
}

impl TaggedSpan {
    pub fn new(kind: EntityKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// Named-entity tagger. Spans are produced lazily so the resolver can stop at the first
/// usable one.
pub trait EntityTagger: Send + Sync {
    fn tag<'a>(&'a self, text: &'a str) -> Box<dyn Iterator<Item = TaggedSpan> + 'a>;
}

/// Address parts recognised by a structured extractor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressFact {
    pub street: Option<String>,
    pub building: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

impl AddressFact {
    /// Comma-joins the present parts, broadest first.
    pub fn to_address(&self) -> Option<String> {
        let parts: Vec<&str> = [&self.region, &self.city, &self.street, &self.building]
            .into_iter()
            .filter_map(|part| part.as_deref())
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

pub trait AddressFactExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Option<AddressFact>;
}

static STREET_MENTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(улиц[аеуы]|ул\.?|проспект[аеу]?|пр-т|пр\.?|переул(?:ок|ке|ка)|пер\.?|набережн(?:ая|ой|ую)|наб\.?|шоссе|площад[ьи]|пл\.?)\s+([а-яё][а-яё\-]+)",
    )
    .expect("street mention pattern")
});

/// Recognises "<street type> <Name>" mentions such as "ул. Гайдара" or "проспект Ломоносова"
/// and the house number that follows them.
#[derive(Debug, Clone, Default)]
pub struct PatternAddressExtractor;

impl AddressFactExtractor for PatternAddressExtractor {
    fn extract(&self, text: &str) -> Option<AddressFact> {
        let caps = STREET_MENTION.captures(text)?;
        let mention = caps.get(0)?.as_str();
        let kind = caps.get(1)?.as_str();
        let name = caps.get(2)?.as_str();
        let street = format!("{kind} {name}");
        let building = building::extract(text, mention);
        Some(AddressFact {
            street: Some(street),
            building,
            region: None,
            city: None,
        })
    }
}
