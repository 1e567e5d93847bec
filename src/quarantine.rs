use crate::events::{EventBus, Message};
use crate::store::{BookPatch, LibraryStore, Status, StoreError};

/// Outcome of a single source adapter's attempt, as fed into
/// `synthesize_failure_reason`.
#[derive(Debug, Clone)]
pub struct SourceAttempt {
    pub source: &'static str,
    pub success: bool,
    pub error: Option<String>,
}

/// `quarantine(bookId, reason, attemptedSources)`: sets `{status:
/// quarantine, failure_reason: reason}` and emits `enrichment.failed`.
pub async fn quarantine(
    store: &dyn LibraryStore,
    events: &dyn EventBus,
    book_id: i64,
    content_type: &str,
    attempted: &[SourceAttempt],
) -> Result<(), StoreError> {
    let reason = synthesize_failure_reason(attempted);

    let patch = BookPatch::default()
        .with_status(Status::Quarantine)
        .with_failure_reason(reason.clone());
    store.update(book_id, patch).await?;

    let sources_attempted: Vec<&str> = attempted.iter().map(|a| a.source).collect();
    events
        .broadcast(Message::enrichment_failed(
            book_id,
            &reason,
            content_type,
            &sources_attempted,
        ))
        .await;

    Ok(())
}

/// Failure-reason synthesis rules.
pub fn synthesize_failure_reason(attempted: &[SourceAttempt]) -> String {
    if attempted.is_empty() {
        return "No enrichment sources available".to_string();
    }

    let failing: Vec<&SourceAttempt> = attempted.iter().filter(|a| !a.success).collect();

    if !failing.is_empty() && failing.iter().all(|a| a.error.as_deref() == Some("API timeout")) {
        let names: Vec<&str> = failing.iter().map(|a| a.source).collect();
        return format!("API timeout on all sources ({})", names.join(", "));
    }

    failing
        .iter()
        .map(|a| format!("{}: {}", a.source, a.error.as_deref().unwrap_or("Unknown error")))
        .collect::<Vec<_>>()
        .join(". ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(source: &'static str, success: bool, error: Option<&str>) -> SourceAttempt {
        SourceAttempt {
            source,
            success,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_empty_attempts() {
        assert_eq!(synthesize_failure_reason(&[]), "No enrichment sources available");
    }

    #[test]
    fn test_all_timeouts() {
        let attempts = vec![
            attempt("OpenLibrary", false, Some("API timeout")),
            attempt("Google Books", false, Some("API timeout")),
        ];
        assert_eq!(
            synthesize_failure_reason(&attempts),
            "API timeout on all sources (OpenLibrary, Google Books)"
        );
    }

    #[test]
    fn test_mixed_failures_joined() {
        let attempts = vec![
            attempt("AniList", false, Some("no match")),
            attempt("MyAnimeList", false, None),
        ];
        assert_eq!(
            synthesize_failure_reason(&attempts),
            "AniList: no match. MyAnimeList: Unknown error"
        );
    }
}
