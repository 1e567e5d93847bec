use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::SourceConfig;
use crate::ratelimit::RateLimiter;
use crate::title_clean::clean_manga_title;

use super::similarity::{char_jaccard, manga_score, normalize_string, MANGA_MATCH_THRESHOLD};
use super::{get_with_retry, strip_html, Candidate, PartialMetadata, SearchQuery, SourceClient, SourceError, DISPLAY_ANILIST};

const QUERY: &str = r#"
query ($search: String) {
  Page(page: 1, perPage: 10) {
    media(search: $search, type: MANGA) {
      title { romaji english native }
      synonyms
      format
      averageScore
      description
      genres
      coverImage { extraLarge }
      staff(sort: RELEVANCE) {
        edges { role node { name { full } } }
      }
    }
  }
}
"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<Data>,
}

#[derive(Debug, Deserialize)]
struct Data {
    #[serde(rename = "Page")]
    page: Page,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    media: Vec<Media>,
}

#[derive(Debug, Deserialize)]
struct Media {
    title: Title,
    #[serde(default)]
    synonyms: Vec<String>,
    format: Option<String>,
    #[serde(rename = "averageScore")]
    average_score: Option<f64>,
    description: Option<String>,
    #[serde(default)]
    genres: Vec<String>,
    #[serde(rename = "coverImage")]
    cover_image: Option<CoverImage>,
    #[serde(default)]
    staff: Option<StaffConnection>,
}

#[derive(Debug, Deserialize)]
struct Title {
    romaji: Option<String>,
    english: Option<String>,
    native: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CoverImage {
    #[serde(rename = "extraLarge")]
    extra_large: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StaffConnection {
    #[serde(default)]
    edges: Vec<StaffEdge>,
}

#[derive(Debug, Deserialize)]
struct StaffEdge {
    role: Option<String>,
    node: StaffNode,
}

#[derive(Debug, Deserialize)]
struct StaffNode {
    name: StaffName,
}

#[derive(Debug, Deserialize)]
struct StaffName {
    full: Option<String>,
}

pub struct AniListClient {
    http: reqwest::Client,
    config: SourceConfig,
    limiter: RateLimiter,
}

impl AniListClient {
    pub fn new(http: reqwest::Client, config: SourceConfig) -> Self {
        let limiter = RateLimiter::new(config.rate_limit, config.rate_limit_window_ms);
        Self {
            http,
            config,
            limiter,
        }
    }

    fn title_variants(title: &Title, synonyms: &[String]) -> Vec<String> {
        let mut variants: Vec<String> = vec![
            title.romaji.clone(),
            title.english.clone(),
            title.native.clone(),
        ]
        .into_iter()
        .flatten()
        .collect();
        variants.extend(synonyms.iter().cloned());
        variants
    }

    fn score(cleaned_title: &str, media: &Media) -> f64 {
        let normalized_query = normalize_string(cleaned_title);
        let best_title_sim = Self::title_variants(&media.title, &media.synonyms)
            .iter()
            .map(|v| char_jaccard(&normalized_query, &normalize_string(v)))
            .fold(0.0_f64, f64::max);

        let mut bonus = 0.0;
        if media.format.as_deref() == Some("MANGA") {
            bonus += 10.0;
        }
        if let Some(avg) = media.average_score {
            bonus += (avg / 10.0).min(10.0);
        }
        manga_score(best_title_sim, bonus)
    }

    fn author(media: &Media) -> Option<String> {
        let staff = media.staff.as_ref()?;
        staff
            .edges
            .iter()
            .find(|e| {
                e.role
                    .as_deref()
                    .is_some_and(|r| r.to_lowercase().contains("story"))
            })
            .or_else(|| staff.edges.first())
            .and_then(|e| e.node.name.full.clone())
    }

    fn map(media: &Media) -> PartialMetadata {
        PartialMetadata {
            title: media.title.romaji.clone().or_else(|| media.title.english.clone()),
            author: Self::author(media),
            description: media.description.as_deref().map(strip_html),
            publisher: None,
            language: None,
            isbn: None,
            publication_date: None,
            series: None,
            volume: None,
            genres: media.genres.clone(),
        }
    }
}

#[async_trait]
impl SourceClient for AniListClient {
    fn display_name(&self) -> &'static str {
        DISPLAY_ANILIST
    }

    async fn find_best_match(
        &self,
        query: &SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<Option<Candidate>, SourceError> {
        self.limiter.acquire().await;

        let cleaned = clean_manga_title(&query.title);
        let body = serde_json::json!({
            "query": QUERY,
            "variables": { "search": cleaned },
        });

        let timeout = std::time::Duration::from_millis(self.config.search_timeout_ms);
        let response = get_with_retry(
            &self.http,
            || self.http.post(&self.config.base_url).json(&body),
            timeout,
            self.config.max_retries,
            cancel,
            |_status| false,
            super::backoff_delay,
        )
        .await?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let parsed: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Client(format!("malformed AniList response: {e}")))?;

        let Some(media_list) = parsed.data.map(|d| d.page.media) else {
            return Ok(None);
        };

        let best = media_list
            .iter()
            .map(|m| (Self::score(&cleaned, m), m))
            .max_by(|a, b| a.0.total_cmp(&b.0));

        match best {
            Some((score, media)) if score >= MANGA_MATCH_THRESHOLD => Ok(Some(Candidate {
                metadata: Self::map(media),
                cover_url: media.cover_image.as_ref().and_then(|c| c.extra_large.clone()),
                external_id: media
                    .title
                    .romaji
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                score,
            })),
            _ => Ok(None),
        }
    }
}
