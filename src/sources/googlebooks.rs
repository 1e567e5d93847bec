use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::SourceConfig;
use crate::ratelimit::RateLimiter;

use super::similarity::{ebook_score, word_jaccard, EBOOK_MATCH_THRESHOLD};
use super::{get_with_retry, Candidate, PartialMetadata, SearchQuery, SourceClient, SourceError, DISPLAY_GOOGLEBOOKS};

static ZOOM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"zoom=\d+").unwrap());

#[derive(Debug, Deserialize, Default)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    #[serde(rename = "volumeInfo")]
    volume_info: VolumeInfo,
}

#[derive(Debug, Deserialize, Default)]
struct VolumeInfo {
    #[serde(default)]
    title: String,
    #[serde(default)]
    authors: Vec<String>,
    description: Option<String>,
    publisher: Option<String>,
    #[serde(rename = "publishedDate")]
    published_date: Option<String>,
    language: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(rename = "industryIdentifiers", default)]
    industry_identifiers: Vec<IndustryIdentifier>,
    #[serde(rename = "imageLinks")]
    image_links: Option<ImageLinks>,
}

#[derive(Debug, Deserialize)]
struct IndustryIdentifier {
    #[serde(rename = "type")]
    id_type: String,
    identifier: String,
}

#[derive(Debug, Deserialize, Default)]
struct ImageLinks {
    #[serde(rename = "extraLarge")]
    extra_large: Option<String>,
    large: Option<String>,
    medium: Option<String>,
    thumbnail: Option<String>,
    #[serde(rename = "smallThumbnail")]
    small_thumbnail: Option<String>,
}

pub struct GoogleBooksClient {
    http: reqwest::Client,
    config: SourceConfig,
    limiter: RateLimiter,
}

impl GoogleBooksClient {
    pub fn new(http: reqwest::Client, config: SourceConfig) -> Self {
        let limiter = RateLimiter::new(config.rate_limit, config.rate_limit_window_ms);
        Self {
            http,
            config,
            limiter,
        }
    }

    fn score(query: &SearchQuery, info: &VolumeInfo) -> f64 {
        let title_sim = word_jaccard(&query.title, &info.title);
        let best_author_sim = query
            .author
            .as_ref()
            .map(|q_author| {
                info.authors
                    .iter()
                    .map(|a| word_jaccard(q_author, a))
                    .fold(0.0_f64, f64::max)
            })
            .unwrap_or(0.0);
        ebook_score(title_sim, best_author_sim)
    }

    fn map(info: &VolumeInfo) -> PartialMetadata {
        let isbn = info
            .industry_identifiers
            .iter()
            .find(|id| id.id_type == "ISBN_13")
            .or_else(|| info.industry_identifiers.iter().find(|id| id.id_type == "ISBN_10"))
            .map(|id| id.identifier.clone());

        PartialMetadata {
            title: (!info.title.is_empty()).then(|| info.title.clone()),
            author: (!info.authors.is_empty()).then(|| info.authors.join(", ")),
            description: info.description.clone(),
            publisher: info.publisher.clone(),
            language: info.language.clone(),
            isbn,
            publication_date: info.published_date.clone(),
            series: None,
            volume: None,
            genres: info.categories.clone(),
        }
    }

    /// Prefer `{extraLarge, large, medium, thumbnail, smallThumbnail}`;
    /// rewrite to https, strip `&edge=curl`, force `zoom=1`.
    fn cover_url(info: &VolumeInfo) -> Option<String> {
        let links = info.image_links.as_ref()?;
        let raw = links
            .extra_large
            .clone()
            .or_else(|| links.large.clone())
            .or_else(|| links.medium.clone())
            .or_else(|| links.thumbnail.clone())
            .or_else(|| links.small_thumbnail.clone())?;

        let https = raw.replacen("http://", "https://", 1);
        let no_curl = https.replace("&edge=curl", "");
        Some(ZOOM_RE.replace(&no_curl, "zoom=1").to_string())
    }
}

#[async_trait]
impl SourceClient for GoogleBooksClient {
    fn display_name(&self) -> &'static str {
        DISPLAY_GOOGLEBOOKS
    }

    async fn find_best_match(
        &self,
        query: &SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<Option<Candidate>, SourceError> {
        self.limiter.acquire().await;

        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| SourceError::Client("Google Books API key not configured".to_string()))?;

        let q = if let Some(isbn) = &query.isbn {
            format!("isbn:{isbn}")
        } else {
            match &query.author {
                Some(author) => format!("intitle:{} inauthor:{}", query.title, author),
                None => format!("intitle:{}", query.title),
            }
        };
        let url = format!(
            "{}/volumes?q={}&key={}",
            self.config.base_url,
            urlencoding::encode(&q),
            urlencoding::encode(api_key)
        );

        let timeout = std::time::Duration::from_millis(self.config.search_timeout_ms);
        let response = get_with_retry(
            &self.http,
            || self.http.get(&url),
            timeout,
            self.config.max_retries,
            cancel,
            |status| status.as_u16() == 403,
            |_attempt| super::REST_RATE_LIMIT_FALLBACK,
        )
        .await?;

        if response.status().as_u16() == 403 {
            return Err(SourceError::Client(
                "API key invalid or quota exceeded".to_string(),
            ));
        }
        if !response.status().is_success() {
            return Ok(None);
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Client(format!("malformed Google Books response: {e}")))?;

        let best = parsed
            .items
            .iter()
            .map(|item| (Self::score(query, &item.volume_info), &item.volume_info))
            .max_by(|a, b| a.0.total_cmp(&b.0));

        match best {
            Some((score, info)) if score >= EBOOK_MATCH_THRESHOLD => Ok(Some(Candidate {
                metadata: Self::map(info),
                cover_url: Self::cover_url(info),
                external_id: info.title.clone(),
                score,
            })),
            _ => Ok(None),
        }
    }
}
