use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::AnyPoolOptions;
use sqlx::Row;

use crate::config::DatabaseConfig;

use super::{BookPatch, BookRow, ContentType, FileType, LibraryStore, NewBook, Status, StoreError};

/// All query modules use this instead of a concrete pool type, allowing
/// runtime backend selection via the connection URI scheme.
pub type DbPool = sqlx::AnyPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbBackend {
    Sqlite,
    Postgres,
    Mysql,
}

impl DbBackend {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres") {
            DbBackend::Postgres
        } else if url.starts_with("mysql") {
            DbBackend::Mysql
        } else {
            DbBackend::Sqlite
        }
    }
}

/// `sqlx::AnyPool`-backed `LibraryStore`. The database engine proper —
/// schema, pooling, backend selection — is ambient infrastructure; the
/// pipeline core only ever talks to the `LibraryStore` trait.
pub struct SqlxStore {
    pool: DbPool,
}

impl SqlxStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        sqlx::any::install_default_drivers();

        let backend = DbBackend::from_url(&config.url);
        let pool = AnyPoolOptions::new()
            .max_connections(5)
            .connect(&config.url)
            .await?;

        if backend == DbBackend::Sqlite {
            configure_sqlite(&pool).await?;
        }

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn connect_test() -> Self {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("failed to open in-memory sqlite pool");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("failed to run migrations");
        Self { pool }
    }
}

async fn configure_sqlite(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;
    sqlx::query("PRAGMA foreign_keys=ON").execute(pool).await?;
    Ok(())
}

fn row_to_book(row: sqlx::any::AnyRow) -> Result<BookRow, sqlx::Error> {
    let content_type: String = row.try_get("content_type")?;
    let file_type: String = row.try_get("file_type")?;
    let status: String = row.try_get("status")?;
    let genres_json: String = row.try_get("genres")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(BookRow {
        id: row.try_get("id")?,
        file_path: row.try_get("file_path")?,
        filename: row.try_get("filename")?,
        extension: row.try_get("extension")?,
        content_type: match content_type.as_str() {
            "book" => ContentType::Book,
            _ => ContentType::Manga,
        },
        file_type: match file_type.as_str() {
            "epub" => FileType::Epub,
            "cbz" => FileType::Cbz,
            _ => FileType::Cbr,
        },
        status: match status.as_str() {
            "enriched" => Status::Enriched,
            "quarantine" => Status::Quarantine,
            _ => Status::Pending,
        },
        failure_reason: row.try_get("failure_reason")?,
        title: row.try_get("title")?,
        author: row.try_get("author")?,
        description: row.try_get("description")?,
        publisher: row.try_get("publisher")?,
        language: row.try_get("language")?,
        isbn: row.try_get("isbn")?,
        publication_date: row.try_get("publication_date")?,
        series: row.try_get("series")?,
        volume: row.try_get("volume")?,
        genres: serde_json::from_str(&genres_json).unwrap_or_default(),
        cover_path: row.try_get("cover_path")?,
        created_at: created_at
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now()),
        updated_at: updated_at
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn status_str(status: Status) -> &'static str {
    match status {
        Status::Pending => "pending",
        Status::Enriched => "enriched",
        Status::Quarantine => "quarantine",
    }
}

#[async_trait]
impl LibraryStore for SqlxStore {
    async fn create(&self, dto: NewBook) -> Result<i64, StoreError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO books \
             (file_path, filename, extension, content_type, file_type, status, title, genres, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, 'pending', ?, '[]', ?, ?)",
        )
        .bind(&dto.file_path)
        .bind(&dto.filename)
        .bind(&dto.extension)
        .bind(match dto.content_type {
            ContentType::Book => "book",
            ContentType::Manga => "manga",
        })
        .bind(dto.file_type.as_str())
        .bind(&dto.title)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::DuplicatePath(dto.file_path.clone())
            }
            _ => StoreError::Db(e),
        })?;

        Ok(result.last_insert_id().unwrap_or_default())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<BookRow>, StoreError> {
        let row = sqlx::query("SELECT * FROM books WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_book).transpose().map_err(StoreError::from)
    }

    async fn get_by_file_path(&self, path: &str) -> Result<Option<BookRow>, StoreError> {
        let row = sqlx::query("SELECT * FROM books WHERE file_path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_book).transpose().map_err(StoreError::from)
    }

    async fn update(&self, id: i64, patch: BookPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut set_clauses: Vec<&str> = Vec::new();
        if patch.status.is_some() {
            set_clauses.push("status = ?");
        }
        if patch.failure_reason.is_some() {
            set_clauses.push("failure_reason = ?");
        }
        if patch.title.is_some() {
            set_clauses.push("title = ?");
        }
        if patch.author.is_some() {
            set_clauses.push("author = ?");
        }
        if patch.description.is_some() {
            set_clauses.push("description = ?");
        }
        if patch.publisher.is_some() {
            set_clauses.push("publisher = ?");
        }
        if patch.language.is_some() {
            set_clauses.push("language = ?");
        }
        if patch.isbn.is_some() {
            set_clauses.push("isbn = ?");
        }
        if patch.publication_date.is_some() {
            set_clauses.push("publication_date = ?");
        }
        if patch.series.is_some() {
            set_clauses.push("series = ?");
        }
        if patch.volume.is_some() {
            set_clauses.push("volume = ?");
        }
        if patch.genres.is_some() {
            set_clauses.push("genres = ?");
        }
        if patch.cover_path.is_some() {
            set_clauses.push("cover_path = ?");
        }
        set_clauses.push("updated_at = ?");

        let sql = format!(
            "UPDATE books SET {} WHERE id = ?",
            set_clauses.join(", ")
        );
        let mut query = sqlx::query(&sql);

        if let Some(v) = patch.status {
            query = query.bind(status_str(v));
        }
        if let Some(v) = patch.failure_reason {
            query = query.bind(v);
        }
        if let Some(v) = patch.title {
            query = query.bind(v);
        }
        if let Some(v) = patch.author {
            query = query.bind(v);
        }
        if let Some(v) = patch.description {
            query = query.bind(v);
        }
        if let Some(v) = patch.publisher {
            query = query.bind(v);
        }
        if let Some(v) = patch.language {
            query = query.bind(v);
        }
        if let Some(v) = patch.isbn {
            query = query.bind(v);
        }
        if let Some(v) = patch.publication_date {
            query = query.bind(v);
        }
        if let Some(v) = patch.series {
            query = query.bind(v);
        }
        if let Some(v) = patch.volume {
            query = query.bind(v);
        }
        if let Some(v) = patch.genres {
            query = query.bind(serde_json::to_string(&v).unwrap_or_else(|_| "[]".to_string()));
        }
        if let Some(v) = patch.cover_path {
            query = query.bind(v);
        }
        query = query.bind(Utc::now().to_rfc3339());
        query = query.bind(id);

        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM books WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}
