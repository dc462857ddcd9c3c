use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to resolve required path: {0}")]
    Path(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Config(String),
    #[error("geocoder response malformed: {0}")]
    Geocoder(String),
    #[error("article {article_id} (address {address:?}): {source}")]
    Article {
        article_id: i64,
        address: String,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    pub fn for_article(article_id: i64, address: &str, source: AppError) -> Self {
        AppError::Article {
            article_id,
            address: address.to_string(),
            source: Box::new(source),
        }
    }
}
