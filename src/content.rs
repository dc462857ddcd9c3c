use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::errors::AppResult;

/// Stored in place of article text when the page could not be fetched or had no text.
pub const CONTENT_UNAVAILABLE: &str = "Текст недоступен";

static COMMENTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comments"));
static NON_CONTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<noscript\b.*?</noscript\s*>|<template\b.*?</template\s*>",
    )
    .expect("non-content blocks")
});
static ARTICLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<article\b[^>]*>(.*?)</article\s*>").expect("article"));
static PARAGRAPH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<p\b[^>]*>(.*?)</p\s*>").expect("paragraph"));
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag"));
static NUMERIC_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|\d+);").expect("numeric entity"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace"));

const NAMED_ENTITIES: &[(&str, &str)] = &[
    ("&nbsp;", " "),
    ("&laquo;", "«"),
    ("&raquo;", "»"),
    ("&mdash;", "—"),
    ("&ndash;", "–"),
    ("&hellip;", "…"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&apos;", "'"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&amp;", "&"),
];

/// Fetches article text for a URL. Never fails: an unusable page yields
/// [`CONTENT_UNAVAILABLE`].
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(&self, url: &str) -> String;
}

pub fn is_unavailable(content: &str) -> bool {
    let trimmed = content.trim();
    trimmed.is_empty() || strip_markup(trimmed) == CONTENT_UNAVAILABLE
}

/// Removes tags, comments and script blocks, decodes common entities and collapses
/// whitespace. Plain text passes through unchanged apart from whitespace.
pub fn strip_markup(text: &str) -> String {
    let without_comments = COMMENTS.replace_all(text, " ");
    let without_scripts = NON_CONTENT.replace_all(&without_comments, " ");
    let without_tags = TAG.replace_all(&without_scripts, " ");
    let decoded = decode_entities(&without_tags);
    WHITESPACE.replace_all(&decoded, " ").trim().to_string()
}

/// Pulls readable paragraphs out of a news page, preferring the `<article>` element.
pub fn extract_article_text(html: &str) -> Option<String> {
    let cleaned = NON_CONTENT.replace_all(&COMMENTS.replace_all(html, " "), " ").into_owned();
    let scope = ARTICLE
        .captures(&cleaned)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(cleaned.as_str());

    let paragraphs: Vec<String> = PARAGRAPH
        .captures_iter(scope)
        .filter_map(|caps| caps.get(1))
        .map(|m| strip_markup(m.as_str()))
        .filter(|paragraph| !paragraph.is_empty())
        .collect();

    let text = if paragraphs.is_empty() {
        strip_markup(scope)
    } else {
        paragraphs.join("\n\n")
    };
    (!text.is_empty()).then_some(text)
}

fn decode_entities(text: &str) -> String {
    let mut decoded = NUMERIC_ENTITY
        .replace_all(text, |caps: &Captures<'_>| {
            let raw = &caps[1];
            let code = match raw.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => raw.parse::<u32>().ok(),
            };
            code.and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned();
    for (entity, replacement) in NAMED_ENTITIES {
        if decoded.contains(entity) {
            decoded = decoded.replace(entity, replacement);
        }
    }
    decoded
}

pub struct HttpContentExtractor {
    http: reqwest::Client,
}

impl HttpContentExtractor {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.content_timeout_secs))
            .build()?;
        Ok(Self { http })
    }

    async fn try_fetch(&self, url: &str) -> AppResult<Option<String>> {
        let html = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(extract_article_text(&html))
    }
}

#[async_trait]
impl ContentSource for HttpContentExtractor {
    async fn fetch(&self, url: &str) -> String {
        match self.try_fetch(url).await {
            Ok(Some(text)) => {
                debug!(target: "content", url, chars = text.chars().count(), "article text fetched");
                text
            }
            Ok(None) => {
                warn!(target: "content", url, "article page had no readable text");
                CONTENT_UNAVAILABLE.to_string()
            }
            Err(err) => {
                warn!(target: "content", ?err, url, "failed to fetch article page");
                CONTENT_UNAVAILABLE.to_string()
            }
        }
    }
}
