use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::ffi::ErrorCode;
use rusqlite::{params, Connection, Error as SqliteError, OpenFlags, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::{AppError, AppResult};
use crate::geocache::Coordinates;

/// Written to `address` when resolution failed so the article leaves the backlog.
pub const ADDRESS_NOT_FOUND: &str = "NOT_FOUND";

const ARTICLE_COLUMNS: &str =
    "id, url, title, preview, date, source, image, category, content, coords, address, resolved_at";

pub struct DatabaseContext {
    pub connection: Connection,
    pub path: PathBuf,
}

pub struct DatabaseBootstrap {
    pub context: DatabaseContext,
    pub recovered: bool,
    pub quarantined: Option<PathBuf>,
}

pub fn bootstrap<P: AsRef<Path>>(data_dir: P, database_file: &str) -> AppResult<DatabaseBootstrap> {
    let data_dir = data_dir.as_ref();
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join(database_file);

    match establish_context(&db_path) {
        Ok(context) => {
            info!(
                target: "database_bootstrap",
                path = %db_path.display(),
                "article store opened"
            );
            Ok(DatabaseBootstrap {
                context,
                recovered: false,
                quarantined: None,
            })
        }
        Err(AppError::Database(err)) if should_attempt_recovery(&err, &db_path) => {
            warn!(
                target: "database_bootstrap",
                path = %db_path.display(),
                error = %err,
                "article store failed to open, moving it aside"
            );
            let quarantined = quarantine_corrupt_store(&db_path)?;
            let context = establish_context(&db_path)?;
            Ok(DatabaseBootstrap {
                context,
                recovered: true,
                quarantined: Some(quarantined),
            })
        }
        Err(err) => Err(err),
    }
}

fn establish_context(db_path: &Path) -> AppResult<DatabaseContext> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let connection = Connection::open_with_flags(db_path, flags)?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA busy_timeout = 5000;
        "#,
    )?;
    run_migrations(&connection)?;

    Ok(DatabaseContext {
        connection,
        path: db_path.to_path_buf(),
    })
}

fn run_migrations(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS news (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            preview TEXT,
            date TEXT,
            source TEXT,
            image TEXT,
            category TEXT,
            content TEXT,
            coords TEXT
        );
        "#,
    )?;

    ensure_column(connection, "news", "content TEXT")?;
    ensure_column(connection, "news", "coords TEXT")?;
    ensure_column(connection, "news", "address TEXT")?;
    ensure_column(connection, "news", "resolved_at TEXT")?;
    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_news_unresolved ON news(address, coords)",
        [],
    )?;
    Ok(())
}

fn ensure_column(connection: &Connection, table: &str, definition: &str) -> AppResult<()> {
    let column_name = definition
        .split_whitespace()
        .next()
        .ok_or_else(|| AppError::Config(format!("invalid column definition: {definition}")))?;
    if column_exists(connection, table, column_name)? {
        return Ok(());
    }
    let sql = format!("ALTER TABLE {table} ADD COLUMN {definition}");
    connection.execute(&sql, [])?;
    debug!(target: "database_bootstrap", table, column = column_name, "column added");
    Ok(())
}

fn column_exists(connection: &Connection, table: &str, column: &str) -> AppResult<bool> {
    let pragma = format!("PRAGMA table_info({table})");
    let mut stmt = connection.prepare(&pragma)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn should_attempt_recovery(err: &SqliteError, db_path: &Path) -> bool {
    if !db_path.exists() {
        return false;
    }

    match err {
        SqliteError::SqliteFailure(code, message) => {
            matches!(code.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
                || message
                    .as_deref()
                    .map(|msg| msg.contains("database disk image is malformed"))
                    .unwrap_or(false)
        }
        _ => false,
    }
}

fn quarantine_corrupt_store(db_path: &Path) -> AppResult<PathBuf> {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let target = sibling_path(db_path, &format!(".corrupt-{stamp}"))?;
    std::fs::rename(db_path, &target)?;
    remove_if_exists(&sibling_path(db_path, "-wal")?)?;
    remove_if_exists(&sibling_path(db_path, "-shm")?)?;
    warn!(
        target: "database_bootstrap",
        moved_to = %target.display(),
        "corrupt article store quarantined"
    );
    Ok(target)
}

fn remove_if_exists(path: &Path) -> AppResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::Io(err)),
    }
}

fn sibling_path(db_path: &Path, suffix: &str) -> AppResult<PathBuf> {
    let name = db_path
        .file_name()
        .ok_or_else(|| AppError::Path(format!("{} has no file name", db_path.display())))?;
    Ok(db_path.with_file_name(format!("{}{suffix}", name.to_string_lossy())))
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// A news item as the worker sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Article {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub preview: Option<String>,
    pub date: Option<String>,
    pub source: Option<String>,
    pub image: Option<String>,
    pub category: Option<String>,
    pub content: Option<String>,
    pub coords: Option<Coordinates>,
    pub address: Option<String>,
    pub resolved_at: Option<String>,
}

impl Article {
    pub fn is_not_found(&self) -> bool {
        self.address.as_deref() == Some(ADDRESS_NOT_FOUND)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let id: i64 = row.get(0)?;
        let raw_coords: Option<String> = row.get(9)?;
        Ok(Self {
            id,
            url: row.get(1)?,
            title: row.get(2)?,
            preview: row.get(3)?,
            date: row.get(4)?,
            source: row.get(5)?,
            image: row.get(6)?,
            category: row.get(7)?,
            content: row.get(8)?,
            coords: raw_coords.as_deref().and_then(|raw| decode_coords(id, raw)),
            address: row.get(10)?,
            resolved_at: row.get(11)?,
        })
    }
}

fn decode_coords(id: i64, raw: &str) -> Option<Coordinates> {
    if raw.trim().is_empty() || raw.trim() == "null" {
        return None;
    }
    match serde_json::from_str(raw) {
        Ok(coords) => Some(coords),
        Err(err) => {
            warn!(target: "article_store", article_id = id, ?err, "ignoring malformed coords");
            None
        }
    }
}

/// Fields accepted when a collaborator records a freshly scraped item.
#[derive(Debug, Clone, Default)]
pub struct NewArticle {
    pub url: String,
    pub title: String,
    pub preview: Option<String>,
    pub date: Option<String>,
    pub source: Option<String>,
    pub image: Option<String>,
    pub category: Option<String>,
    pub content: Option<String>,
}

pub trait ArticleStore: Send + Sync {
    /// Articles with neither address nor coordinates, newest first.
    fn fetch_unresolved_batch(&self, limit: usize) -> AppResult<Vec<Article>>;

    fn update(
        &self,
        id: i64,
        content: &str,
        coords: Option<Coordinates>,
        address: &str,
    ) -> AppResult<()>;

    fn fetch_by_id(&self, id: i64) -> AppResult<Option<Article>>;
}

#[derive(Clone)]
pub struct SqliteArticleStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteArticleStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.db)
    }

    /// Inserts an article, returning the id of the existing row when the URL is known.
    pub fn insert_article(&self, article: &NewArticle) -> AppResult<i64> {
        let conn = self.db.lock();
        let inserted = conn.execute(
            "INSERT INTO news (url, title, preview, date, source, image, category, content)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(url) DO NOTHING",
            params![
                article.url,
                article.title,
                article.preview,
                article.date,
                article.source,
                article.image,
                article.category,
                article.content,
            ],
        )?;
        if inserted > 0 {
            return Ok(conn.last_insert_rowid());
        }
        let id = conn.query_row(
            "SELECT id FROM news WHERE url = ?1",
            [&article.url],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Clears the not-found marker so the worker picks the rows up again.
    pub fn requeue_not_found(&self, id: Option<i64>) -> AppResult<usize> {
        let conn = self.db.lock();
        let cleared = match id {
            Some(id) => conn.execute(
                "UPDATE news SET address = NULL, resolved_at = NULL
                WHERE id = ?1 AND address = ?2 AND coords IS NULL",
                params![id, ADDRESS_NOT_FOUND],
            )?,
            None => conn.execute(
                "UPDATE news SET address = NULL, resolved_at = NULL
                WHERE address = ?1 AND coords IS NULL",
                [ADDRESS_NOT_FOUND],
            )?,
        };
        info!(target: "article_store", cleared, article_id = ?id, "not-found articles requeued");
        Ok(cleared)
    }
}

impl ArticleStore for SqliteArticleStore {
    fn fetch_unresolved_batch(&self, limit: usize) -> AppResult<Vec<Article>> {
        let conn = self.db.lock();
        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM news
            WHERE (coords IS NULL OR coords = '' OR coords = 'null')
              AND (address IS NULL OR address = '')
            ORDER BY id DESC
            LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map([limit], Article::from_row)?;
        let mut articles = Vec::new();
        for row in rows {
            articles.push(row?);
        }
        Ok(articles)
    }

    fn update(
        &self,
        id: i64,
        content: &str,
        coords: Option<Coordinates>,
        address: &str,
    ) -> AppResult<()> {
        let coords = coords.map(|coords| serde_json::to_string(&coords)).transpose()?;
        let conn = self.db.lock();
        let updated = conn.execute(
            "UPDATE news SET content = ?2, coords = ?3, address = ?4, resolved_at = ?5 WHERE id = ?1",
            params![id, content, coords, address, now_timestamp()],
        )?;
        if updated == 0 {
            return Err(AppError::Database(SqliteError::QueryReturnedNoRows));
        }
        Ok(())
    }

    fn fetch_by_id(&self, id: i64) -> AppResult<Option<Article>> {
        let conn = self.db.lock();
        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM news WHERE id = ?1");
        let article = conn.query_row(&sql, [id], Article::from_row).optional()?;
        Ok(article)
    }
}
