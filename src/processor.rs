use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::events::{EventBus, Message};
use crate::orchestrator::Orchestrator;
use crate::store::{ContentType, FileType, LibraryStore, NewBook, StoreError};
use crate::validate;

/// Outcome of `process(event)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessAction {
    Created,
    Skipped,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub action: ProcessAction,
    pub book_id: Option<i64>,
    pub reason: Option<String>,
}

/// A file observed by the Watcher or Scanner.
#[derive(Debug, Clone)]
pub struct FileDetected {
    pub path: std::path::PathBuf,
    pub filename: String,
    pub extension: String,
    pub ts: DateTime<Utc>,
}

/// Entry point for every detected file: dedupe, validate, create the row,
/// and launch background extraction+enrichment.
pub struct Processor {
    store: Arc<dyn LibraryStore>,
    events: Arc<dyn EventBus>,
    orchestrator: Arc<Orchestrator>,
}

impl Processor {
    pub fn new(store: Arc<dyn LibraryStore>, events: Arc<dyn EventBus>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            store,
            events,
            orchestrator,
        }
    }

    pub async fn process(&self, event: FileDetected) -> ProcessOutcome {
        let file_path = event.path.to_string_lossy().to_string();

        match self.store.get_by_file_path(&file_path).await {
            Ok(Some(_)) => {
                return ProcessOutcome {
                    action: ProcessAction::Skipped,
                    book_id: None,
                    reason: None,
                };
            }
            Ok(None) => {}
            Err(err) => {
                error!(?err, path = %file_path, "dedupe lookup failed");
                return ProcessOutcome {
                    action: ProcessAction::Failed,
                    book_id: None,
                    reason: Some(err.to_string()),
                };
            }
        }

        let Some(file_type) = FileType::from_extension(&event.extension) else {
            return ProcessOutcome {
                action: ProcessAction::Failed,
                book_id: None,
                reason: Some(format!("unsupported extension: {}", event.extension)),
            };
        };
        let content_type = ContentType::from_extension(&event.extension)
            .expect("file_type resolved implies content_type resolves");

        let validation = match validate_sync(&event.path, file_type) {
            Ok(outcome) => outcome,
            Err(err) => {
                return ProcessOutcome {
                    action: ProcessAction::Failed,
                    book_id: None,
                    reason: Some(err),
                };
            }
        };

        if !validation.valid {
            return ProcessOutcome {
                action: ProcessAction::Failed,
                book_id: None,
                reason: validation.reason,
            };
        }

        let title = derive_title(&event.filename);
        let new_book = NewBook {
            file_path: file_path.clone(),
            filename: event.filename.clone(),
            extension: event.extension.clone(),
            content_type,
            file_type,
            title: Some(title),
        };

        let book_id = match self.store.create(new_book).await {
            Ok(id) => id,
            Err(StoreError::DuplicatePath(_)) => {
                return ProcessOutcome {
                    action: ProcessAction::Skipped,
                    book_id: None,
                    reason: None,
                };
            }
            Err(err) => {
                return ProcessOutcome {
                    action: ProcessAction::Failed,
                    book_id: None,
                    reason: Some(err.to_string()),
                };
            }
        };

        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            if let Err(err) = orchestrator.orchestrate(book_id).await {
                error!(?err, book_id, "orchestration failed");
            }
        });

        let content_type_label = match content_type {
            ContentType::Book => "book",
            ContentType::Manga => "manga",
        };
        self.events
            .broadcast(Message::file_detected(&event.filename, content_type_label, book_id))
            .await;

        info!(book_id, path = %file_path, "created book row");

        ProcessOutcome {
            action: ProcessAction::Created,
            book_id: Some(book_id),
            reason: None,
        }
    }
}

fn validate_sync(path: &Path, file_type: FileType) -> Result<validate::ValidationOutcome, String> {
    match file_type {
        FileType::Epub => {
            let file = std::fs::File::open(path).map_err(|e| e.to_string())?;
            Ok(validate::epub::validate(std::io::BufReader::new(file)))
        }
        FileType::Cbz => {
            let file = std::fs::File::open(path).map_err(|e| e.to_string())?;
            Ok(validate::cbz::validate(std::io::BufReader::new(file)))
        }
        FileType::Cbr => Ok(validate::cbr::validate(path)),
    }
}

/// Strip extension; replace `_`/`-` with spaces; collapse whitespace;
/// title-case each word.
fn derive_title(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string());

    let replaced = stem.replace(['_', '-'], " ");

    replaced
        .split_whitespace()
        .map(title_case_word)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
