use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::config::WatcherConfig;
use crate::processor::{FileDetected, Processor};

/// Per-path write generation, used to debounce rapid successive writes to
/// the same file before declaring it "settled".
type Generations = Arc<Mutex<HashMap<PathBuf, u64>>>;

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("failed to start filesystem watcher: {0}")]
    Notify(#[from] notify::Error),
}

/// Observes `root` recursively and dispatches settled, extension-matching
/// files to the Processor. Runs until the returned watcher is dropped.
pub async fn watch(
    root: PathBuf,
    config: WatcherConfig,
    processor: Arc<Processor>,
) -> Result<RecommendedWatcher, WatcherError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if tx.send(event).is_err() {
                debug!("watcher event dropped: receiver gone");
            }
        }
        Err(err) => warn!(?err, "filesystem watch error; continuing"),
    })?;

    watcher.watch(&root, RecursiveMode::Recursive)?;

    let generations: Generations = Arc::new(Mutex::new(HashMap::new()));
    let settle = Duration::from_millis(config.settle_ms);
    let ignored_suffixes = config.ignored_suffixes.clone();
    let extensions = config.extensions.clone();

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                continue;
            }
            for path in event.paths {
                if !is_candidate(&path, &ignored_suffixes, &extensions) {
                    continue;
                }
                schedule_settle_check(
                    path,
                    settle,
                    Arc::clone(&generations),
                    Arc::clone(&processor),
                );
            }
        }
    });

    Ok(watcher)
}

fn schedule_settle_check(path: PathBuf, settle: Duration, generations: Generations, processor: Arc<Processor>) {
    let generation = {
        let mut map = generations.lock().expect("generations mutex poisoned");
        let entry = map.entry(path.clone()).or_insert(0);
        *entry += 1;
        *entry
    };

    tokio::spawn(async move {
        tokio::time::sleep(settle).await;

        let is_latest = {
            let mut map = generations.lock().expect("generations mutex poisoned");
            match map.get(&path) {
                Some(current) if *current == generation => {
                    map.remove(&path);
                    true
                }
                _ => false,
            }
        };

        if !is_latest {
            return;
        }

        let Some(event) = build_file_detected(&path) else {
            return;
        };
        processor.process(event).await;
    });
}

/// Dotfile / ignored-suffix / extension filtering.
fn is_candidate(path: &Path, ignored_suffixes: &[String], extensions: &[String]) -> bool {
    let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if filename.starts_with('.') {
        return false;
    }
    if ignored_suffixes.iter().any(|suffix| filename.ends_with(suffix.as_str())) {
        return false;
    }
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions.iter().any(|candidate| candidate.eq_ignore_ascii_case(ext))
}

fn build_file_detected(path: &Path) -> Option<FileDetected> {
    if !path.is_file() {
        return None;
    }
    let filename = path.file_name()?.to_str()?.to_string();
    let extension = path.extension()?.to_str()?.to_string();
    Some(FileDetected {
        path: path.to_path_buf(),
        filename,
        extension,
        ts: chrono::Utc::now(),
    })
}
