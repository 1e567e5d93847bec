use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::covers::{self, LOW_QUALITY_THRESHOLD_BYTES};
use crate::events::{EventBus, Message};
use crate::extract::{self, ExtractedMetadata};
use crate::quarantine::{self, SourceAttempt};
use crate::sources::anilist::AniListClient;
use crate::sources::googlebooks::GoogleBooksClient;
use crate::sources::mangadex::MangaDexClient;
use crate::sources::myanimelist::MyAnimeListClient;
use crate::sources::openlibrary::OpenLibraryClient;
use crate::sources::{Candidate, PartialMetadata, SearchQuery, SourceClient};
use crate::store::{BookPatch, BookRow, ContentType, FileType, LibraryStore, Status, StoreError};
use crate::validate;

/// Result of `orchestrate(bookId)`.
#[derive(Debug, Clone)]
pub struct OrchestrationOutcome {
    pub status: Status,
    pub source: Option<&'static str>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("book {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The pipeline's state-machine engine: local extraction followed by the
/// content-type-appropriate external fallback chain.
pub struct Orchestrator {
    store: Arc<dyn LibraryStore>,
    events: Arc<dyn EventBus>,
    data_dir: std::path::PathBuf,
    http: reqwest::Client,
    openlibrary: OpenLibraryClient,
    googlebooks: GoogleBooksClient,
    anilist: AniListClient,
    myanimelist: MyAnimeListClient,
    mangadex: MangaDexClient,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        http: reqwest::Client,
        store: Arc<dyn LibraryStore>,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            store,
            events,
            data_dir: config.data_dir.clone(),
            http: http.clone(),
            openlibrary: OpenLibraryClient::new(http.clone(), config.sources.openlibrary.clone()),
            googlebooks: GoogleBooksClient::new(http.clone(), config.sources.googlebooks.clone()),
            anilist: AniListClient::new(http.clone(), config.sources.anilist.clone()),
            myanimelist: MyAnimeListClient::new(http.clone(), config.sources.myanimelist.clone()),
            mangadex: MangaDexClient::new(http, config.sources.mangadex.clone()),
        }
    }

    pub async fn orchestrate(&self, book_id: i64) -> Result<OrchestrationOutcome, OrchestratorError> {
        let book = self
            .store
            .get_by_id(book_id)
            .await?
            .ok_or(OrchestratorError::NotFound(book_id))?;

        let local_success = self.run_local_extraction(&book).await;

        // Re-read: local extraction may have just populated title/author/cover.
        let book = self
            .store
            .get_by_id(book_id)
            .await?
            .ok_or(OrchestratorError::NotFound(book_id))?;

        let chain: Vec<(&'static str, &dyn SourceClient)> = match book.content_type {
            ContentType::Book => vec![
                (self.openlibrary.display_name(), &self.openlibrary as &dyn SourceClient),
                (self.googlebooks.display_name(), &self.googlebooks as &dyn SourceClient),
            ],
            ContentType::Manga => vec![
                (self.anilist.display_name(), &self.anilist as &dyn SourceClient),
                (self.myanimelist.display_name(), &self.myanimelist as &dyn SourceClient),
                (self.mangadex.display_name(), &self.mangadex as &dyn SourceClient),
            ],
        };

        self.events
            .broadcast(Message::new(
                crate::events::EventType::EnrichmentStarted,
                serde_json::json!({ "bookId": book_id, "contentType": content_type_str(book.content_type) }),
            ))
            .await;

        let mut attempts: Vec<SourceAttempt> = Vec::new();
        let mut winning_source: Option<&'static str> = None;

        for (name, client) in chain.iter().copied() {
            let outcome = self.run_source_adapter(client, &book).await;
            let success = outcome.success;
            attempts.push(SourceAttempt {
                source: name,
                success,
                error: outcome.error.clone(),
            });
            if success {
                winning_source = Some(name);
                break;
            }
        }

        let chain_success = winning_source.is_some();
        let chain_all_unavailable = !attempts.is_empty()
            && attempts
                .iter()
                .all(|a| a.error.as_deref().is_some_and(is_unavailable_error));

        let outcome = if chain_success {
            self.store
                .update(book_id, BookPatch::default().with_status(Status::Enriched))
                .await?;
            self.events
                .broadcast(Message::enrichment_completed(
                    book_id,
                    serde_json::json!({ "source": winning_source }),
                ))
                .await;
            OrchestrationOutcome {
                status: Status::Enriched,
                source: winning_source,
                failure_reason: None,
            }
        } else if chain_all_unavailable && local_success {
            self.store
                .update(book_id, BookPatch::default().with_status(Status::Enriched))
                .await?;
            self.events
                .broadcast(Message::enrichment_completed(
                    book_id,
                    serde_json::json!({ "source": serde_json::Value::Null, "locallyEnriched": true }),
                ))
                .await;
            OrchestrationOutcome {
                status: Status::Enriched,
                source: None,
                failure_reason: None,
            }
        } else {
            quarantine::quarantine(
                self.store.as_ref(),
                self.events.as_ref(),
                book_id,
                content_type_str(book.content_type),
                &attempts,
            )
            .await?;
            let reason = quarantine::synthesize_failure_reason(&attempts);
            OrchestrationOutcome {
                status: Status::Quarantine,
                source: None,
                failure_reason: Some(reason),
            }
        };

        Ok(outcome)
    }

    /// Step 1 of `orchestrate`: run the content-type-appropriate local
    /// extractor and persist whatever it found. Returns `localSuccess`.
    async fn run_local_extraction(&self, book: &BookRow) -> bool {
        let path = Path::new(&book.file_path).to_path_buf();
        let file_type = book.file_type;

        let extracted = match tokio::task::spawn_blocking(move || extract_sync(&path, file_type)).await {
            Ok(meta) => meta,
            Err(err) => {
                error!(?err, book_id = book.id, "local extraction task panicked");
                ExtractedMetadata::default()
            }
        };

        if extracted.metadata_extracted {
            self.events
                .broadcast(Message::enrichment_progress(
                    book.id,
                    "metadata-extracted",
                    serde_json::json!({}),
                ))
                .await;
        }

        let mut patch = BookPatch::default();
        patch.title = extracted.title.clone();
        patch.author = extracted.author.clone();
        patch.description = extracted.description.clone();
        patch.publisher = extracted.publisher.clone();
        patch.language = extracted.language.clone();
        patch.isbn = extracted.isbn.clone();
        patch.publication_date = extracted.publication_date.clone();
        patch.series = extracted.series.clone();
        patch.volume = extracted.volume;
        if !extracted.genres.is_empty() {
            patch.genres = Some(extracted.genres.clone());
        }

        if let (Some(bytes), Some(ext)) = (&extracted.cover_bytes, &extracted.cover_ext) {
            match covers::persist_bytes(&self.data_dir.join("covers"), book.id, bytes, ext).await {
                Ok(cover_path) => {
                    patch.cover_path = Some(cover_path.to_string_lossy().to_string());
                    self.events
                        .broadcast(Message::enrichment_progress(
                            book.id,
                            "cover-extracted",
                            serde_json::json!({}),
                        ))
                        .await;
                }
                Err(err) => warn!(?err, book_id = book.id, "failed to persist extracted cover"),
            }
        }

        if !patch.is_empty() {
            if let Err(err) = self.store.update(book.id, patch).await {
                error!(?err, book_id = book.id, "failed to persist local extraction results");
            }
        }

        extracted.success()
    }

    /// Common per-source adapter contract shared by all five sources:
    /// search, score, map, maybe fetch a cover, persist non-destructively.
    async fn run_source_adapter(&self, client: &dyn SourceClient, book: &BookRow) -> SourceAdapterOutcome {
        let source = client.display_name();
        self.events
            .broadcast(Message::enrichment_progress(
                book.id,
                &format!("{source}-search-started"),
                serde_json::json!({}),
            ))
            .await;

        let query = SearchQuery {
            title: book.title.clone().unwrap_or_default(),
            author: book.author.clone(),
            isbn: book.isbn.clone(),
        };

        let cancel = CancellationToken::new();
        let candidate = match client.find_best_match(&query, &cancel).await {
            Ok(Some(candidate)) => candidate,
            Ok(None) => {
                self.events
                    .broadcast(Message::enrichment_progress(
                        book.id,
                        &format!("{source}-no-match"),
                        serde_json::json!({}),
                    ))
                    .await;
                return SourceAdapterOutcome {
                    success: false,
                    error: Some("no match".to_string()),
                };
            }
            Err(err) => {
                let message = err.to_string();
                self.events
                    .broadcast(Message::enrichment_failed(
                        book.id,
                        &message,
                        content_type_str(book.content_type),
                        &[source],
                    ))
                    .await;
                return SourceAdapterOutcome {
                    success: false,
                    error: Some(message),
                };
            }
        };

        self.events
            .broadcast(Message::enrichment_progress(
                book.id,
                &format!("{source}-match-found"),
                serde_json::json!({ "score": candidate.score }),
            ))
            .await;

        let cover_updated = self.maybe_download_cover(book, source, &candidate).await;

        let patch = build_non_overwriting_patch(book, &candidate.metadata);
        let mut fields_updated: Vec<&'static str> = patch.fields_touched();
        if cover_updated {
            fields_updated.push("cover_path");
        }

        let mut to_persist = patch;
        to_persist.status = Some(Status::Enriched);
        if let Err(err) = self.store.update(book.id, to_persist).await {
            error!(?err, book_id = book.id, source, "failed to persist enrichment patch");
            return SourceAdapterOutcome {
                success: false,
                error: Some(err.to_string()),
            };
        }

        self.events
            .broadcast(Message::book_updated(book.id, source, &candidate.external_id, &fields_updated))
            .await;

        SourceAdapterOutcome {
            success: true,
            error: None,
        }
    }

    /// Step 7: download a cover if the book has none, with the
    /// OpenLibrary-only low-quality-replacement exception.
    async fn maybe_download_cover(&self, book: &BookRow, source: &str, candidate: &Candidate) -> bool {
        let Some(cover_url) = &candidate.cover_url else {
            return false;
        };

        let should_download = match &book.cover_path {
            None => true,
            Some(existing) if source == crate::sources::DISPLAY_OPENLIBRARY => {
                covers::is_low_quality(&self.data_dir, existing).await
            }
            Some(_) => false,
        };

        if !should_download {
            return false;
        }

        match covers::download(&self.http, &self.data_dir.join("covers"), book.id, cover_url).await {
            Ok(cover_path) => {
                let patch = BookPatch {
                    cover_path: Some(cover_path.to_string_lossy().to_string()),
                    ..Default::default()
                };
                if let Err(err) = self.store.update(book.id, patch).await {
                    warn!(?err, book_id = book.id, "failed to persist downloaded cover");
                    return false;
                }
                true
            }
            Err(err) => {
                warn!(?err, book_id = book.id, source, "cover download failed");
                false
            }
        }
    }
}

struct SourceAdapterOutcome {
    success: bool,
    error: Option<String>,
}

fn extract_sync(path: &Path, file_type: FileType) -> ExtractedMetadata {
    match file_type {
        FileType::Epub => std::fs::File::open(path)
            .map(extract::epub::extract)
            .unwrap_or_default(),
        FileType::Cbz => {
            let Ok(listing_file) = std::fs::File::open(path) else {
                return ExtractedMetadata::default();
            };
            let outcome = validate::cbz::validate(std::io::BufReader::new(listing_file));

            let Ok(read_file) = std::fs::File::open(path) else {
                return ExtractedMetadata::default();
            };
            extract::comic::extract_cbz(
                std::io::BufReader::new(read_file),
                outcome.first_image_path.as_deref(),
            )
        }
        FileType::Cbr => {
            let outcome = validate::cbr::validate(path);
            extract::comic::extract_cbr(path, outcome.first_image_path.as_deref())
        }
    }
}

/// Non-overwriting patch: a field is only included when the book's current
/// value is null (or, for `genres`, null/empty).
fn build_non_overwriting_patch(book: &BookRow, meta: &PartialMetadata) -> BookPatch {
    let mut patch = BookPatch::default();

    if book.title.is_none() {
        patch.title = meta.title.clone();
    }
    if book.author.is_none() {
        patch.author = meta.author.clone();
    }
    if book.description.is_none() {
        patch.description = meta.description.clone();
    }
    if book.publisher.is_none() {
        patch.publisher = meta.publisher.clone();
    }
    if book.language.is_none() {
        patch.language = meta.language.clone();
    }
    if book.isbn.is_none() {
        patch.isbn = meta.isbn.clone();
    }
    if book.publication_date.is_none() {
        patch.publication_date = meta.publication_date.clone();
    }
    if book.series.is_none() {
        patch.series = meta.series.clone();
    }
    if book.volume.is_none() {
        patch.volume = meta.volume;
    }
    if book.genres.is_empty() && !meta.genres.is_empty() {
        // Unique values only, bounded to 5.
        let mut seen = std::collections::HashSet::new();
        patch.genres = Some(
            meta.genres
                .iter()
                .filter(|g| seen.insert(g.as_str()))
                .take(5)
                .cloned()
                .collect(),
        );
    }

    patch
}

trait FieldsTouched {
    fn fields_touched(&self) -> Vec<&'static str>;
}

impl FieldsTouched for BookPatch {
    fn fields_touched(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.title.is_some() {
            fields.push("title");
        }
        if self.author.is_some() {
            fields.push("author");
        }
        if self.description.is_some() {
            fields.push("description");
        }
        if self.publisher.is_some() {
            fields.push("publisher");
        }
        if self.language.is_some() {
            fields.push("language");
        }
        if self.isbn.is_some() {
            fields.push("isbn");
        }
        if self.publication_date.is_some() {
            fields.push("publication_date");
        }
        if self.series.is_some() {
            fields.push("series");
        }
        if self.volume.is_some() {
            fields.push("volume");
        }
        if self.genres.is_some() {
            fields.push("genres");
        }
        fields
    }
}

fn content_type_str(content_type: ContentType) -> &'static str {
    match content_type {
        ContentType::Book => "book",
        ContentType::Manga => "manga",
    }
}

/// A source's failure is "unavailable" (missing credentials) rather than an
/// ordinary no-match/network failure — used to decide whether a whole chain
/// never had a real chance to run.
fn is_unavailable_error(error: &str) -> bool {
    error.contains("not configured")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileType as StoreFileType;

    fn book(title: Option<&str>, genres: Vec<String>) -> BookRow {
        BookRow {
            id: 1,
            file_path: "x.epub".to_string(),
            filename: "x.epub".to_string(),
            extension: "epub".to_string(),
            content_type: ContentType::Book,
            file_type: StoreFileType::Epub,
            status: Status::Pending,
            failure_reason: None,
            title: title.map(str::to_string),
            author: None,
            description: None,
            publisher: None,
            language: None,
            isbn: None,
            publication_date: None,
            series: None,
            volume: None,
            genres,
            cover_path: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_non_overwriting_patch_skips_populated_title() {
        let b = book(Some("Existing Title"), vec![]);
        let meta = PartialMetadata {
            title: Some("New Title".to_string()),
            ..Default::default()
        };
        let patch = build_non_overwriting_patch(&b, &meta);
        assert!(patch.title.is_none());
    }

    #[test]
    fn test_non_overwriting_patch_fills_null_fields() {
        let b = book(None, vec![]);
        let meta = PartialMetadata {
            title: Some("New Title".to_string()),
            genres: vec!["Fantasy".to_string()],
            ..Default::default()
        };
        let patch = build_non_overwriting_patch(&b, &meta);
        assert_eq!(patch.title.as_deref(), Some("New Title"));
        assert_eq!(patch.genres, Some(vec!["Fantasy".to_string()]));
    }

    #[test]
    fn test_non_overwriting_patch_respects_non_empty_genres() {
        let b = book(None, vec!["Existing".to_string()]);
        let meta = PartialMetadata {
            genres: vec!["New".to_string()],
            ..Default::default()
        };
        let patch = build_non_overwriting_patch(&b, &meta);
        assert!(patch.genres.is_none());
    }

    #[test]
    fn test_is_unavailable_error() {
        assert!(is_unavailable_error("Google Books API key not configured"));
        assert!(!is_unavailable_error("no match"));
    }

    #[test]
    fn test_fields_touched_reflects_patch() {
        let patch = BookPatch {
            title: Some("T".to_string()),
            genres: Some(vec!["G".to_string()]),
            ..Default::default()
        };
        let fields = patch.fields_touched();
        assert!(fields.contains(&"title"));
        assert!(fields.contains(&"genres"));
        assert_eq!(fields.len(), 2);
    }
}
