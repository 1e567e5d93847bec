use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

use super::{BookPatch, BookRow, LibraryStore, NewBook, Status, StoreError};

/// `RwLock<HashMap>`-backed `LibraryStore`: a zero-config store good for
/// tests and for running the pipeline without a database.
#[derive(Default)]
pub struct InMemoryStore {
    books: RwLock<HashMap<i64, BookRow>>,
    next_id: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl LibraryStore for InMemoryStore {
    async fn create(&self, dto: NewBook) -> Result<i64, StoreError> {
        let mut books = self.books.write().await;
        if books.values().any(|b| b.file_path == dto.file_path) {
            return Err(StoreError::DuplicatePath(dto.file_path));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let row = BookRow {
            id,
            file_path: dto.file_path,
            filename: dto.filename,
            extension: dto.extension,
            content_type: dto.content_type,
            file_type: dto.file_type,
            status: Status::Pending,
            failure_reason: None,
            title: dto.title,
            author: None,
            description: None,
            publisher: None,
            language: None,
            isbn: None,
            publication_date: None,
            series: None,
            volume: None,
            genres: Vec::new(),
            cover_path: None,
            created_at: now,
            updated_at: now,
        };
        books.insert(id, row);
        Ok(id)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<BookRow>, StoreError> {
        Ok(self.books.read().await.get(&id).cloned())
    }

    async fn get_by_file_path(&self, path: &str) -> Result<Option<BookRow>, StoreError> {
        Ok(self
            .books
            .read()
            .await
            .values()
            .find(|b| b.file_path == path)
            .cloned())
    }

    async fn update(&self, id: i64, patch: BookPatch) -> Result<(), StoreError> {
        let mut books = self.books.write().await;
        let row = books.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        apply_patch(row, patch);
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.books
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }
}

fn apply_patch(row: &mut BookRow, patch: BookPatch) {
    if let Some(status) = patch.status {
        row.status = status;
    }
    if let Some(v) = patch.failure_reason {
        row.failure_reason = Some(v);
    }
    if let Some(v) = patch.title {
        row.title = Some(v);
    }
    if let Some(v) = patch.author {
        row.author = Some(v);
    }
    if let Some(v) = patch.description {
        row.description = Some(v);
    }
    if let Some(v) = patch.publisher {
        row.publisher = Some(v);
    }
    if let Some(v) = patch.language {
        row.language = Some(v);
    }
    if let Some(v) = patch.isbn {
        row.isbn = Some(v);
    }
    if let Some(v) = patch.publication_date {
        row.publication_date = Some(v);
    }
    if let Some(v) = patch.series {
        row.series = Some(v);
    }
    if let Some(v) = patch.volume {
        row.volume = Some(v);
    }
    if let Some(v) = patch.genres {
        row.genres = v;
    }
    if let Some(v) = patch.cover_path {
        row.cover_path = Some(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ContentType, FileType};

    fn dto(path: &str) -> NewBook {
        NewBook {
            file_path: path.to_string(),
            filename: "book.epub".to_string(),
            extension: "epub".to_string(),
            content_type: ContentType::Book,
            file_type: FileType::Epub,
            title: Some("Title".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryStore::new();
        let id = store.create(dto("/a.epub")).await.unwrap();
        let row = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(row.file_path, "/a.epub");
        assert_eq!(row.status, Status::Pending);
    }

    #[tokio::test]
    async fn test_duplicate_file_path_rejected() {
        let store = InMemoryStore::new();
        store.create(dto("/a.epub")).await.unwrap();
        let err = store.create(dto("/a.epub")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicatePath(_)));
    }

    #[tokio::test]
    async fn test_update_is_partial() {
        let store = InMemoryStore::new();
        let id = store.create(dto("/a.epub")).await.unwrap();
        store
            .update(
                id,
                BookPatch {
                    author: Some("Jane Doe".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let row = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(row.author.as_deref(), Some("Jane Doe"));
        assert_eq!(row.title.as_deref(), Some("Title"));
    }

    #[tokio::test]
    async fn test_update_missing_book_errors() {
        let store = InMemoryStore::new();
        let err = store.update(42, BookPatch::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(42)));
    }

    #[tokio::test]
    async fn test_get_by_file_path() {
        let store = InMemoryStore::new();
        store.create(dto("/a.epub")).await.unwrap();
        assert!(store.get_by_file_path("/a.epub").await.unwrap().is_some());
        assert!(store.get_by_file_path("/b.epub").await.unwrap().is_none());
    }
}
