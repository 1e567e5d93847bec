use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::events::{EventBus, Message};
use crate::processor::{FileDetected, ProcessAction, Processor};
use crate::store::LibraryStore;

/// Process-wide singleton scan lock: forbids overlapping scans.
static SCAN_LOCK: AtomicBool = AtomicBool::new(false);

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("scan already running")]
    AlreadyRunning,
}

#[derive(Debug, Clone, Default)]
pub struct ScanStats {
    pub files_found: usize,
    pub files_processed: usize,
    pub files_skipped: usize,
    pub errors: usize,
}

pub struct Scanner {
    store: Arc<dyn LibraryStore>,
    events: Arc<dyn EventBus>,
    processor: Arc<Processor>,
    extensions: Vec<String>,
}

impl Scanner {
    pub fn new(
        store: Arc<dyn LibraryStore>,
        events: Arc<dyn EventBus>,
        processor: Arc<Processor>,
        extensions: Vec<String>,
    ) -> Self {
        Self {
            store,
            events,
            processor,
            extensions,
        }
    }

    /// One-shot recursive rescan of `root`. Concurrent calls while a scan is
    /// already in flight fail with `ScanError::AlreadyRunning`; the lock is
    /// released on every exit path, success or error.
    pub async fn scan(&self, root: &Path) -> Result<ScanStats, ScanError> {
        if SCAN_LOCK
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ScanError::AlreadyRunning);
        }

        let result = self.do_scan(root).await;

        SCAN_LOCK.store(false, Ordering::SeqCst);
        result
    }

    async fn do_scan(&self, root: &Path) -> Result<ScanStats, ScanError> {
        let started = Instant::now();
        info!(root = %root.display(), "starting library scan");

        let extensions = self.extensions.clone();
        let root_owned = root.to_path_buf();
        let candidates = tokio::task::spawn_blocking(move || collect_candidates(&root_owned, &extensions))
            .await
            .unwrap_or_default();

        let mut stats = ScanStats {
            files_found: candidates.len(),
            ..Default::default()
        };

        // Sequential by design: the scan's own metrics must be deterministic;
        // each file's background extraction+enrichment still runs
        // independently once its row is created.
        for event in candidates {
            match self.store.get_by_file_path(&event.path.to_string_lossy()).await {
                Ok(Some(_)) => {
                    stats.files_skipped += 1;
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(?err, path = %event.path.display(), "dedupe lookup failed during scan");
                    stats.errors += 1;
                    continue;
                }
            }

            match self.processor.process(event).await.action {
                ProcessAction::Created => stats.files_processed += 1,
                ProcessAction::Skipped => stats.files_skipped += 1,
                ProcessAction::Failed => stats.errors += 1,
            }
        }

        let duration_ms = started.elapsed().as_millis();
        info!(
            files_found = stats.files_found,
            files_processed = stats.files_processed,
            files_skipped = stats.files_skipped,
            errors = stats.errors,
            duration_ms,
            "scan complete"
        );

        self.events
            .broadcast(Message::scan_completed(
                stats.files_found,
                stats.files_processed,
                stats.files_skipped,
                stats.errors,
                duration_ms,
            ))
            .await;

        Ok(stats)
    }
}

fn collect_candidates(root: &Path, extensions: &[String]) -> Vec<FileDetected> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root).follow_links(true).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if filename.starts_with('.') {
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !extensions.iter().any(|candidate| candidate.eq_ignore_ascii_case(ext)) {
            continue;
        }
        found.push(FileDetected {
            path: path.to_path_buf(),
            filename: filename.to_string(),
            extension: ext.to_string(),
            ts: chrono::Utc::now(),
        });
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_candidates_filters_by_extension_and_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("book.epub"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join(".hidden.epub"), b"x").unwrap();

        let found = collect_candidates(dir.path(), &["epub".to_string(), "cbz".to_string()]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].filename, "book.epub");
    }

    #[test]
    fn test_collect_candidates_recurses_into_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("series-a");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("vol1.cbz"), b"x").unwrap();

        let found = collect_candidates(dir.path(), &["cbz".to_string()]);
        assert_eq!(found.len(), 1);
    }
}
