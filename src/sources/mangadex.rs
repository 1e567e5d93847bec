use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::SourceConfig;
use crate::ratelimit::RateLimiter;
use crate::title_clean::clean_manga_title;

use super::similarity::{char_jaccard, manga_score, normalize_string, MANGA_MATCH_THRESHOLD};
use super::{get_with_retry, strip_html, Candidate, PartialMetadata, SearchQuery, SourceClient, SourceError, DISPLAY_MANGADEX};

const COVER_BASE: &str = "https://uploads.mangadex.org/covers";

type LocalizedString = HashMap<String, String>;

#[derive(Debug, Deserialize, Default)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<MangaEntry>,
}

#[derive(Debug, Deserialize)]
struct MangaEntry {
    id: String,
    attributes: MangaAttributes,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Debug, Deserialize)]
struct MangaAttributes {
    title: LocalizedString,
    #[serde(rename = "altTitles", default)]
    alt_titles: Vec<LocalizedString>,
    #[serde(default)]
    description: LocalizedString,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    attributes: TagAttributes,
}

#[derive(Debug, Deserialize)]
struct TagAttributes {
    name: LocalizedString,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    #[serde(rename = "type")]
    rel_type: String,
    attributes: Option<RelationshipAttributes>,
}

#[derive(Debug, Deserialize, Default)]
struct RelationshipAttributes {
    #[serde(rename = "fileName")]
    file_name: Option<String>,
    name: Option<String>,
}

/// `en` preferred, else the first key present.
fn localized(map: &LocalizedString) -> Option<String> {
    map.get("en")
        .cloned()
        .or_else(|| map.values().next().cloned())
}

pub struct MangaDexClient {
    http: reqwest::Client,
    config: SourceConfig,
    limiter: RateLimiter,
}

impl MangaDexClient {
    pub fn new(http: reqwest::Client, config: SourceConfig) -> Self {
        let limiter = RateLimiter::new(config.rate_limit, config.rate_limit_window_ms);
        Self {
            http,
            config,
            limiter,
        }
    }

    fn title_variants(attrs: &MangaAttributes) -> Vec<String> {
        let mut variants: Vec<String> = attrs.title.values().cloned().collect();
        for alt in &attrs.alt_titles {
            variants.extend(alt.values().cloned());
        }
        variants
    }

    fn author(entry: &MangaEntry) -> Option<String> {
        entry
            .relationships
            .iter()
            .find(|r| r.rel_type == "author")
            .and_then(|r| r.attributes.as_ref())
            .and_then(|a| a.name.clone())
    }

    fn cover_file_name(entry: &MangaEntry) -> Option<String> {
        entry
            .relationships
            .iter()
            .find(|r| r.rel_type == "cover_art")
            .and_then(|r| r.attributes.as_ref())
            .and_then(|a| a.file_name.clone())
    }

    fn score(cleaned_title: &str, entry: &MangaEntry) -> f64 {
        let normalized_query = normalize_string(cleaned_title);
        let best_title_sim = Self::title_variants(&entry.attributes)
            .iter()
            .map(|v| char_jaccard(&normalized_query, &normalize_string(v)))
            .fold(0.0_f64, f64::max);

        let mut bonus = 0.0;
        if localized(&entry.attributes.description).is_some_and(|d| !d.is_empty()) {
            bonus += 5.0;
        }
        if Self::cover_file_name(entry).is_some() {
            bonus += 5.0;
        }
        if Self::author(entry).is_some() {
            bonus += 5.0;
        }
        if !entry.attributes.tags.is_empty() {
            bonus += 5.0;
        }
        manga_score(best_title_sim, bonus)
    }

    fn map(entry: &MangaEntry) -> PartialMetadata {
        let genres = entry
            .attributes
            .tags
            .iter()
            .filter_map(|t| localized(&t.attributes.name))
            .collect();

        PartialMetadata {
            title: localized(&entry.attributes.title),
            author: Self::author(entry),
            description: localized(&entry.attributes.description).map(|d| strip_html(&d)),
            publisher: None,
            language: None,
            isbn: None,
            publication_date: None,
            series: None,
            volume: None,
            genres,
        }
    }

    fn cover_url(entry: &MangaEntry) -> Option<String> {
        Self::cover_file_name(entry).map(|file_name| format!("{COVER_BASE}/{}/{file_name}", entry.id))
    }
}

#[async_trait]
impl SourceClient for MangaDexClient {
    fn display_name(&self) -> &'static str {
        DISPLAY_MANGADEX
    }

    async fn find_best_match(
        &self,
        query: &SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<Option<Candidate>, SourceError> {
        self.limiter.acquire().await;

        let cleaned = clean_manga_title(&query.title);
        let url = format!(
            "{}/manga?title={}&includes[]=cover_art&includes[]=author&limit=10",
            self.config.base_url,
            urlencoding::encode(&cleaned)
        );

        let timeout = std::time::Duration::from_millis(self.config.search_timeout_ms);
        // MangaDex returns 403 as an IP-ban/DDoS-protection signal; never retry it.
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
                "MangaDex request blocked (403)".to_string(),
            ));
        }
        if !response.status().is_success() {
            return Ok(None);
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Client(format!("malformed MangaDex response: {e}")))?;

        let best = parsed
            .data
            .iter()
            .map(|entry| (Self::score(&cleaned, entry), entry))
            .max_by(|a, b| a.0.total_cmp(&b.0));

        match best {
            Some((score, entry)) if score >= MANGA_MATCH_THRESHOLD => Ok(Some(Candidate {
                metadata: Self::map(entry),
                cover_url: Self::cover_url(entry),
                external_id: entry.id.clone(),
                score,
            })),
            _ => Ok(None),
        }
    }
}
