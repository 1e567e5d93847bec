use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::SourceConfig;
use crate::ratelimit::RateLimiter;

use super::similarity::{char_jaccard, ebook_score, normalize_string, EBOOK_MATCH_THRESHOLD};
use super::{get_with_retry, Candidate, PartialMetadata, SearchQuery, SourceClient, SourceError, DISPLAY_OPENLIBRARY};

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    docs: Vec<Doc>,
}

#[derive(Debug, Deserialize)]
struct Doc {
    #[serde(default)]
    title: String,
    #[serde(default)]
    author_name: Vec<String>,
    #[serde(default)]
    first_publish_year: Option<i64>,
    #[serde(default)]
    publisher: Vec<String>,
    #[serde(default)]
    language: Vec<String>,
    #[serde(default)]
    subject: Vec<String>,
    #[serde(default)]
    isbn: Vec<String>,
    cover_i: Option<i64>,
}

pub struct OpenLibraryClient {
    http: reqwest::Client,
    config: SourceConfig,
    limiter: RateLimiter,
}

impl OpenLibraryClient {
    pub fn new(http: reqwest::Client, config: SourceConfig) -> Self {
        let limiter = RateLimiter::new(config.rate_limit, config.rate_limit_window_ms);
        Self {
            http,
            config,
            limiter,
        }
    }

    fn score(query: &SearchQuery, doc: &Doc) -> f64 {
        let title_sim = char_jaccard(&normalize_string(&query.title), &normalize_string(&doc.title));
        let best_author_sim = query
            .author
            .as_ref()
            .map(|q_author| {
                doc.author_name
                    .iter()
                    .map(|a| char_jaccard(&normalize_string(q_author), &normalize_string(a)))
                    .fold(0.0_f64, f64::max)
            })
            .unwrap_or(0.0);
        ebook_score(title_sim, best_author_sim)
    }

    fn map(doc: &Doc) -> PartialMetadata {
        PartialMetadata {
            title: Some(doc.title.clone()).filter(|t| !t.is_empty()),
            author: (!doc.author_name.is_empty()).then(|| doc.author_name.join(", ")),
            description: None,
            publisher: doc.publisher.first().cloned(),
            language: doc.language.first().cloned(),
            isbn: doc.isbn.first().cloned(),
            publication_date: doc.first_publish_year.map(|y| y.to_string()),
            series: None,
            volume: None,
            genres: doc.subject.clone(),
        }
    }

    fn cover_url(doc: &Doc) -> Option<String> {
        doc.cover_i.map(|id| format!("https://covers.openlibrary.org/b/id/{id}-L.jpg"))
    }
}

#[async_trait]
impl SourceClient for OpenLibraryClient {
    fn display_name(&self) -> &'static str {
        DISPLAY_OPENLIBRARY
    }

    async fn find_best_match(
        &self,
        query: &SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<Option<Candidate>, SourceError> {
        self.limiter.acquire().await;

        let base = &self.config.base_url;
        let mut url = format!("{base}/search.json?");
        if let Some(isbn) = &query.isbn {
            url.push_str(&format!("isbn={}", urlencoding::encode(isbn)));
        } else {
            url.push_str(&format!("title={}", urlencoding::encode(&query.title)));
            if let Some(author) = &query.author {
                url.push_str(&format!("&author={}", urlencoding::encode(author)));
            }
        }

        let timeout = std::time::Duration::from_millis(self.config.search_timeout_ms);
        let response = get_with_retry(
            &self.http,
            || self.http.get(&url),
            timeout,
            self.config.max_retries,
            cancel,
            |_status| false,
            |_attempt| super::REST_RATE_LIMIT_FALLBACK,
        )
        .await?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Client(format!("malformed OpenLibrary response: {e}")))?;

        let best = parsed
            .docs
            .iter()
            .map(|doc| (Self::score(query, doc), doc))
            .max_by(|a, b| a.0.total_cmp(&b.0));

        match best {
            Some((score, doc)) if score >= EBOOK_MATCH_THRESHOLD => Ok(Some(Candidate {
                metadata: Self::map(doc),
                cover_url: Self::cover_url(doc),
                external_id: doc.isbn.first().cloned().unwrap_or_else(|| doc.title.clone()),
                score,
            })),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> SearchQuery {
        SearchQuery {
            title: "Clean Code".to_string(),
            author: Some("Robert C. Martin".to_string()),
            isbn: Some("9780132350884".to_string()),
        }
    }

    #[test]
    fn test_score_exact_match() {
        let doc = Doc {
            title: "Clean Code".to_string(),
            author_name: vec!["Robert C. Martin".to_string()],
            first_publish_year: Some(2008),
            publisher: vec![],
            language: vec![],
            subject: vec![],
            isbn: vec![],
            cover_i: None,
        };
        let score = OpenLibraryClient::score(&query(), &doc);
        assert_eq!(score, 100.0);
    }

    #[test]
    fn test_score_below_threshold_for_unrelated_title() {
        let doc = Doc {
            title: "Zzyzx Quarry Notes".to_string(),
            author_name: vec!["Nobody".to_string()],
            first_publish_year: None,
            publisher: vec![],
            language: vec![],
            subject: vec![],
            isbn: vec![],
            cover_i: None,
        };
        let score = OpenLibraryClient::score(&query(), &doc);
        assert!(score < EBOOK_MATCH_THRESHOLD);
    }

    #[test]
    fn test_cover_url_format() {
        let doc = Doc {
            title: "x".into(),
            author_name: vec![],
            first_publish_year: None,
            publisher: vec![],
            language: vec![],
            subject: vec![],
            isbn: vec![],
            cover_i: Some(12345),
        };
        assert_eq!(
            OpenLibraryClient::cover_url(&doc).as_deref(),
            Some("https://covers.openlibrary.org/b/id/12345-L.jpg")
        );
    }
}
