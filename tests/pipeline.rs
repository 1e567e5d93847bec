//! End-to-end pipeline tests: Processor -> Orchestrator -> LibraryStore,
//! with wiremock standing in for the external enrichment sources.

use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;

use archivist::config::Config;
use archivist::events::BroadcastEventBus;
use archivist::orchestrator::Orchestrator;
use archivist::processor::{FileDetected, ProcessAction, Processor};
use archivist::scanner::Scanner;
use archivist::store::memory::InMemoryStore;
use archivist::store::{LibraryStore, Status};
use wiremock::matchers::path;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn minimal_epub_bytes() -> Vec<u8> {
    let cursor = Cursor::new(Vec::new());
    let mut zip = zip::ZipWriter::new(cursor);
    let opts = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

    zip.start_file("mimetype", opts).unwrap();
    zip.write_all(b"application/epub+zip").unwrap();

    zip.start_file("META-INF/container.xml", opts).unwrap();
    zip.write_all(
        br#"<container><rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles></container>"#,
    )
    .unwrap();

    zip.start_file("OEBPS/content.opf", opts).unwrap();
    zip.write_all(b"<package><metadata/></package>").unwrap();

    zip.finish().unwrap().into_inner()
}

fn test_config(data_dir: &std::path::Path) -> Config {
    let toml_str = format!(
        r#"
watch_dir = "/unused"
data_dir = "{}"
"#,
        data_dir.display()
    );
    toml::from_str(&toml_str).unwrap()
}

async fn wait_for_status(store: &InMemoryStore, book_id: i64, want: Status, attempts: u32) -> Status {
    for _ in 0..attempts {
        if let Some(row) = store.get_by_id(book_id).await.unwrap() {
            if row.status == want {
                return row.status;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    store.get_by_id(book_id).await.unwrap().unwrap().status
}

#[tokio::test(flavor = "multi_thread")]
async fn test_happy_path_epub_matches_openlibrary() {
    let mock_server = MockServer::start().await;
    Mock::given(path("/search.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "docs": [{
                "title": "Clean Code",
                "author_name": ["Robert C. Martin"],
                "first_publish_year": 2008,
                "publisher": ["Prentice Hall"],
                "language": ["eng"],
                "subject": ["Software engineering"],
                "isbn": ["9780132350884"],
                "cover_i": null,
            }]
        })))
        .mount(&mock_server)
        .await;

    let data_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(data_dir.path());
    config.sources.openlibrary.base_url = mock_server.uri();
    // Google Books is never reached once OpenLibrary wins, but give it a
    // harmless empty response in case ordering ever changes.
    config.sources.googlebooks.api_key = None;

    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let events = Arc::new(BroadcastEventBus::default());
    let http = reqwest::Client::new();
    let orchestrator = Arc::new(Orchestrator::new(
        &config,
        http,
        store.clone() as Arc<dyn LibraryStore>,
        events.clone(),
    ));
    let processor = Processor::new(store.clone() as Arc<dyn LibraryStore>, events, orchestrator);

    let book_dir = tempfile::tempdir().unwrap();
    let book_path = book_dir.path().join("clean_code.epub");
    std::fs::write(&book_path, minimal_epub_bytes()).unwrap();

    let outcome = processor
        .process(FileDetected {
            path: book_path.clone(),
            filename: "clean_code.epub".to_string(),
            extension: "epub".to_string(),
            ts: chrono::Utc::now(),
        })
        .await;

    assert_eq!(outcome.action, ProcessAction::Created);
    let book_id = outcome.book_id.unwrap();

    let status = wait_for_status(&store, book_id, Status::Enriched, 40).await;
    assert_eq!(status, Status::Enriched);

    let row = store.get_by_id(book_id).await.unwrap().unwrap();
    assert_eq!(row.author.as_deref(), Some("Robert C. Martin"));
    assert_eq!(row.isbn.as_deref(), Some("9780132350884"));
    assert_eq!(row.genres, vec!["Software engineering".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_quarantine_when_no_source_matches() {
    let mock_server = MockServer::start().await;
    Mock::given(path("/search.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "docs": [] })))
        .mount(&mock_server)
        .await;

    let data_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(data_dir.path());
    config.sources.openlibrary.base_url = mock_server.uri();
    config.sources.googlebooks.base_url = mock_server.uri();

    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let events = Arc::new(BroadcastEventBus::default());
    let http = reqwest::Client::new();
    let orchestrator = Arc::new(Orchestrator::new(
        &config,
        http,
        store.clone() as Arc<dyn LibraryStore>,
        events.clone(),
    ));
    let processor = Processor::new(store.clone() as Arc<dyn LibraryStore>, events, orchestrator);

    let book_dir = tempfile::tempdir().unwrap();
    let book_path = book_dir.path().join("unknown_title.epub");
    std::fs::write(&book_path, minimal_epub_bytes()).unwrap();

    let outcome = processor
        .process(FileDetected {
            path: book_path,
            filename: "unknown_title.epub".to_string(),
            extension: "epub".to_string(),
            ts: chrono::Utc::now(),
        })
        .await;
    let book_id = outcome.book_id.unwrap();

    let status = wait_for_status(&store, book_id, Status::Quarantine, 40).await;
    assert_eq!(status, Status::Quarantine);

    let row = store.get_by_id(book_id).await.unwrap().unwrap();
    let reason = row.failure_reason.unwrap();
    assert!(reason.contains("OpenLibrary: no match"));
    assert!(reason.contains("Google Books: Google Books API key not configured"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_scanner_skips_already_known_file() {
    let mock_server = MockServer::start().await;
    Mock::given(path("/search.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "docs": [] })))
        .mount(&mock_server)
        .await;

    let data_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(data_dir.path());
    config.sources.openlibrary.base_url = mock_server.uri();
    config.sources.googlebooks.base_url = mock_server.uri();

    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let events = Arc::new(BroadcastEventBus::default());
    let http = reqwest::Client::new();
    let orchestrator = Arc::new(Orchestrator::new(
        &config,
        http,
        store.clone() as Arc<dyn LibraryStore>,
        events.clone(),
    ));
    let processor = Arc::new(Processor::new(
        store.clone() as Arc<dyn LibraryStore>,
        events.clone(),
        orchestrator,
    ));

    let library_dir = tempfile::tempdir().unwrap();
    let book_path = library_dir.path().join("duplicate.epub");
    std::fs::write(&book_path, minimal_epub_bytes()).unwrap();

    let scanner = Scanner::new(
        store.clone() as Arc<dyn LibraryStore>,
        events.clone(),
        processor.clone(),
        vec!["epub".to_string()],
    );

    let first = scanner.scan(library_dir.path()).await.unwrap();
    assert_eq!(first.files_found, 1);
    assert_eq!(first.files_processed, 1);
    assert_eq!(first.files_skipped, 0);

    // Give the background orchestration for the first scan a moment to run
    // so it doesn't race with the second scan's own store writes.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = scanner.scan(library_dir.path()).await.unwrap();
    assert_eq!(second.files_found, 1);
    assert_eq!(second.files_processed, 0);
    assert_eq!(second.files_skipped, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_epub_is_rejected_before_store_create() {
    let data_dir = tempfile::tempdir().unwrap();
    let config = test_config(data_dir.path());

    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let events = Arc::new(BroadcastEventBus::default());
    let http = reqwest::Client::new();
    let orchestrator = Arc::new(Orchestrator::new(
        &config,
        http,
        store.clone() as Arc<dyn LibraryStore>,
        events.clone(),
    ));
    let processor = Processor::new(store.clone() as Arc<dyn LibraryStore>, events, orchestrator);

    let book_dir = tempfile::tempdir().unwrap();
    let book_path = book_dir.path().join("corrupt.epub");
    std::fs::write(&book_path, b"not a zip file at all").unwrap();

    let outcome = processor
        .process(FileDetected {
            path: book_path,
            filename: "corrupt.epub".to_string(),
            extension: "epub".to_string(),
            ts: chrono::Utc::now(),
        })
        .await;

    assert_eq!(outcome.action, ProcessAction::Failed);
    assert_eq!(outcome.reason.as_deref(), Some("not a valid ZIP archive"));
    assert!(outcome.book_id.is_none());
}
