pub mod memory;
pub mod sqlx_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `{book, manga}` — derived from extension at create time, immutable after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Book,
    Manga,
}

impl ContentType {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "epub" => Some(ContentType::Book),
            "cbz" | "cbr" => Some(ContentType::Manga),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Epub,
    Cbz,
    Cbr,
}

impl FileType {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "epub" => Some(FileType::Epub),
            "cbz" => Some(FileType::Cbz),
            "cbr" => Some(FileType::Cbr),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Epub => "epub",
            FileType::Cbz => "cbz",
            FileType::Cbr => "cbr",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Enriched,
    Quarantine,
}

/// Single persistent entity of interest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookRow {
    pub id: i64,
    pub file_path: String,
    pub filename: String,
    pub extension: String,
    pub content_type: ContentType,
    pub file_type: FileType,
    pub status: Status,
    pub failure_reason: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub publisher: Option<String>,
    pub language: Option<String>,
    pub isbn: Option<String>,
    pub publication_date: Option<String>,
    pub series: Option<String>,
    pub volume: Option<i32>,
    pub genres: Vec<String>,
    pub cover_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied to `LibraryStore::create`.
#[derive(Debug, Clone)]
pub struct NewBook {
    pub file_path: String,
    pub filename: String,
    pub extension: String,
    pub content_type: ContentType,
    pub file_type: FileType,
    pub title: Option<String>,
}

/// A partial update. Every field is `None` unless the caller wants it set —
/// callers (enrichment adapters) must only populate fields that pass the
/// non-overwriting check before calling `update`.
#[derive(Debug, Clone, Default)]
pub struct BookPatch {
    pub status: Option<Status>,
    pub failure_reason: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub publisher: Option<String>,
    pub language: Option<String>,
    pub isbn: Option<String>,
    pub publication_date: Option<String>,
    pub series: Option<String>,
    pub volume: Option<i32>,
    pub genres: Option<Vec<String>>,
    pub cover_path: Option<String>,
}

impl BookPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.failure_reason.is_none()
            && self.title.is_none()
            && self.author.is_none()
            && self.description.is_none()
            && self.publisher.is_none()
            && self.language.is_none()
            && self.isbn.is_none()
            && self.publication_date.is_none()
            && self.series.is_none()
            && self.volume.is_none()
            && self.genres.is_none()
            && self.cover_path.is_none()
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_failure_reason(mut self, reason: String) -> Self {
        self.failure_reason = Some(reason);
        self
    }
}

pub fn covers_dir_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("covers")
}

/// The capability the core consumes for persistence. The database engine
/// itself — schema migrations, connection pooling — is out of core scope;
/// implementations of this trait own that.
#[async_trait]
pub trait LibraryStore: Send + Sync {
    async fn create(&self, dto: NewBook) -> Result<i64, StoreError>;
    async fn get_by_id(&self, id: i64) -> Result<Option<BookRow>, StoreError>;
    async fn get_by_file_path(&self, path: &str) -> Result<Option<BookRow>, StoreError>;
    async fn update(&self, id: i64, patch: BookPatch) -> Result<(), StoreError>;
    #[allow(dead_code)]
    async fn delete(&self, id: i64) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("book not found: {0}")]
    NotFound(i64),
    #[error("duplicate file_path: {0}")]
    DuplicatePath(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Returns true iff a field is eligible for a non-overwriting patch: the
/// book's current value is null (or, for genres, null/empty).
pub fn is_overwrite_eligible_scalar(current: &Option<String>) -> bool {
    current.is_none()
}

pub fn is_overwrite_eligible_genres(current: &[String]) -> bool {
    current.is_empty()
}
