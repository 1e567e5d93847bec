pub mod anilist;
pub mod googlebooks;
pub mod mangadex;
pub mod myanimelist;
pub mod openlibrary;
pub mod similarity;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Human-readable name used in failure-reason synthesis.
pub const DISPLAY_OPENLIBRARY: &str = "OpenLibrary";
pub const DISPLAY_GOOGLEBOOKS: &str = "Google Books";
pub const DISPLAY_ANILIST: &str = "AniList";
pub const DISPLAY_MYANIMELIST: &str = "MyAnimeList";
pub const DISPLAY_MANGADEX: &str = "MangaDex";

/// Inputs to a source search. Ebook clients prefer `isbn`, falling back to
/// `title`+`author`; manga clients use `title` (already cleaned by the
/// caller via `title_clean::clean_manga_title`).
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub title: String,
    pub author: Option<String>,
    pub isbn: Option<String>,
}

/// Fields a source adapter is prepared to contribute. The orchestrator
/// intersects this with the non-overwriting-field rule before persisting.
#[derive(Debug, Clone, Default)]
pub struct PartialMetadata {
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
}

/// A scored, already-mapped candidate. `score` has already cleared the
/// source's match threshold by the time a client returns `Some`.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub metadata: PartialMetadata,
    pub cover_url: Option<String>,
    pub external_id: String,
    pub score: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{0}")]
    Client(String),
    #[error("request cancelled")]
    Cancelled,
}

/// Uniform contract all five external sources implement.
/// `find_best_match` folds search + selection + mapping into one call: by
/// the time it returns `Some`, the candidate has already cleared the
/// source's match-score threshold.
#[async_trait]
pub trait SourceClient: Send + Sync {
    fn display_name(&self) -> &'static str;

    async fn find_best_match(
        &self,
        query: &SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<Option<Candidate>, SourceError>;
}

/// Exponential backoff between retry attempts: 1s, 2s, 4s, ...
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.saturating_sub(1))
}

/// Parses a `Retry-After` header value expressed in seconds.
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value.and_then(|v| v.trim().parse::<u64>().ok()).map(Duration::from_secs)
}

/// Strips HTML tags from source descriptions/synopses, converting `<br/>`
/// variants to newlines and decoding the standard entities.
pub fn strip_html(input: &str) -> String {
    let with_breaks = BR_RE.replace_all(input, "\n");
    let without_tags = TAG_RE.replace_all(&with_breaks, "");
    decode_entities(&without_tags).trim().to_string()
}

fn decode_entities(input: &str) -> String {
    input
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&nbsp;", " ")
}

use once_cell::sync::Lazy;
use regex::Regex;

static BR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Flat 60s fallback for REST sources on an un-annotated 429, per each
/// REST client's `rest_fallback_delay` argument to `get_with_retry`.
pub const REST_RATE_LIMIT_FALLBACK: Duration = Duration::from_secs(60);

/// Shared HTTP GET-with-retry loop: applies the per-request timeout and
/// cancellation deadline to each attempt, and exponential backoff between
/// attempts. `stop_retry` lets each source enforce its own "do not retry
/// this status" rules (e.g. MangaDex 403, Google Books 403). On a 429 with
/// no `Retry-After` header, `rest_fallback_delay(attempt)` is used instead
/// of the exponential step — REST clients pass a closure returning a flat
/// `REST_RATE_LIMIT_FALLBACK`, while AniList (the one GraphQL client) passes
/// `backoff_delay` itself to keep the exponential behavior. Returns the
/// last response received (even an error status) once retries are
/// exhausted or `stop_retry` fires, so callers can still inspect it.
pub async fn get_with_retry(
    client: &reqwest::Client,
    request: impl Fn() -> reqwest::RequestBuilder,
    timeout: Duration,
    max_retries: u32,
    cancel: &CancellationToken,
    stop_retry: impl Fn(reqwest::StatusCode) -> bool,
    rest_fallback_delay: impl Fn(u32) -> Duration,
) -> Result<reqwest::Response, SourceError> {
    let _ = client;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let fut = request().timeout(timeout).send();
        let outcome = tokio::select! {
            res = fut => res,
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
        };

        match outcome {
            Ok(response) => {
                let status = response.status();
                if status.is_success() || stop_retry(status) || attempt > max_retries {
                    return Ok(response);
                }
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| parse_retry_after(Some(v)));
                let delay = retry_after.unwrap_or_else(|| {
                    if status.as_u16() == 429 {
                        rest_fallback_delay(attempt)
                    } else {
                        backoff_delay(attempt)
                    }
                });
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                }
            }
            Err(err) => {
                if attempt > max_retries {
                    return Err(SourceError::Network(err));
                }
                let delay = backoff_delay(attempt);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_sequence() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("30")), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after(None), None);
        assert_eq!(parse_retry_after(Some("bogus")), None);
    }

    #[test]
    fn test_strip_html() {
        let input = "Line one<br/>Line two&nbsp;&amp; more <b>bold</b> text";
        assert_eq!(strip_html(input), "Line one\nLine two & more bold text");
    }
}
