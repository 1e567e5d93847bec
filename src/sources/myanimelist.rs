use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::SourceConfig;
use crate::ratelimit::RateLimiter;
use crate::title_clean::clean_manga_title;

use super::similarity::{char_jaccard, manga_score, normalize_string, MANGA_MATCH_THRESHOLD};
use super::{get_with_retry, strip_html, Candidate, PartialMetadata, SearchQuery, SourceClient, SourceError, DISPLAY_MYANIMELIST};

#[derive(Debug, Deserialize, Default)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    node: Node,
}

#[derive(Debug, Deserialize)]
struct Node {
    title: String,
    #[serde(default)]
    alternative_titles: Option<AlternativeTitles>,
    synopsis: Option<String>,
    #[serde(rename = "media_type")]
    media_type: Option<String>,
    #[serde(default)]
    authors: Vec<AuthorEdge>,
    #[serde(rename = "main_picture")]
    main_picture: Option<MainPicture>,
}

#[derive(Debug, Deserialize, Default)]
struct AlternativeTitles {
    #[serde(default)]
    synonyms: Vec<String>,
    en: Option<String>,
    ja: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorEdge {
    node: AuthorNode,
    #[serde(default)]
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorNode {
    #[serde(rename = "first_name")]
    first_name: Option<String>,
    #[serde(rename = "last_name")]
    last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MainPicture {
    large: Option<String>,
    medium: Option<String>,
}

pub struct MyAnimeListClient {
    http: reqwest::Client,
    config: SourceConfig,
    limiter: RateLimiter,
}

impl MyAnimeListClient {
    pub fn new(http: reqwest::Client, config: SourceConfig) -> Self {
        let limiter = RateLimiter::new(config.rate_limit, config.rate_limit_window_ms);
        Self {
            http,
            config,
            limiter,
        }
    }

    fn title_variants(node: &Node) -> Vec<String> {
        let mut variants = vec![node.title.clone()];
        if let Some(alt) = &node.alternative_titles {
            variants.extend(alt.en.clone());
            variants.extend(alt.ja.clone());
            variants.extend(alt.synonyms.iter().cloned());
        }
        variants
    }

    fn score(cleaned_title: &str, node: &Node) -> f64 {
        let normalized_query = normalize_string(cleaned_title);
        let best_title_sim = Self::title_variants(node)
            .iter()
            .map(|v| char_jaccard(&normalized_query, &normalize_string(v)))
            .fold(0.0_f64, f64::max);

        let mut bonus = 0.0;
        if node.media_type.as_deref() == Some("manga") {
            bonus += 10.0;
        }
        if node.synopsis.as_deref().is_some_and(|s| !s.is_empty()) {
            bonus += 5.0;
        }
        if node.main_picture.is_some() {
            bonus += 5.0;
        }
        manga_score(best_title_sim, bonus)
    }

    fn author(node: &Node) -> Option<String> {
        let edge = node
            .authors
            .iter()
            .find(|e| e.role.as_deref().is_some_and(|r| r.to_lowercase().contains("story")))
            .or_else(|| node.authors.first())?;
        let name = [&edge.node.first_name, &edge.node.last_name]
            .into_iter()
            .flatten()
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        (!name.is_empty()).then_some(name)
    }

    fn map(node: &Node) -> PartialMetadata {
        PartialMetadata {
            title: Some(node.title.clone()).filter(|t| !t.is_empty()),
            author: Self::author(node),
            description: node.synopsis.as_deref().map(strip_html),
            publisher: None,
            language: None,
            isbn: None,
            publication_date: None,
            series: None,
            volume: None,
            genres: Vec::new(),
        }
    }

    fn cover_url(node: &Node) -> Option<String> {
        node.main_picture
            .as_ref()
            .and_then(|p| p.large.clone().or_else(|| p.medium.clone()))
    }
}

#[async_trait]
impl SourceClient for MyAnimeListClient {
    fn display_name(&self) -> &'static str {
        DISPLAY_MYANIMELIST
    }

    async fn find_best_match(
        &self,
        query: &SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<Option<Candidate>, SourceError> {
        self.limiter.acquire().await;

        let client_id = self
            .config
            .client_id
            .as_ref()
            .ok_or_else(|| SourceError::Client("MyAnimeList client id not configured".to_string()))?;

        let cleaned = clean_manga_title(&query.title);
        let url = format!(
            "{}/manga?q={}&fields=alternative_titles,synopsis,media_type,authors{{first_name,last_name}},main_picture&limit=10",
            self.config.base_url,
            urlencoding::encode(&cleaned)
        );

        let timeout = std::time::Duration::from_millis(self.config.search_timeout_ms);
        let response = get_with_retry(
            &self.http,
            || self.http.get(&url).header("X-MAL-CLIENT-ID", client_id),
            timeout,
            self.config.max_retries,
            cancel,
            |status| status.as_u16() == 401 || status.as_u16() == 403,
            |_attempt| super::REST_RATE_LIMIT_FALLBACK,
        )
        .await?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(SourceError::Client(
                "MyAnimeList client id invalid or unauthorized".to_string(),
            ));
        }
        if !status.is_success() {
            return Ok(None);
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Client(format!("malformed MyAnimeList response: {e}")))?;

        let best = parsed
            .data
            .iter()
            .map(|entry| (Self::score(&cleaned, &entry.node), &entry.node))
            .max_by(|a, b| a.0.total_cmp(&b.0));

        match best {
            Some((score, node)) if score >= MANGA_MATCH_THRESHOLD => Ok(Some(Candidate {
                metadata: Self::map(node),
                cover_url: Self::cover_url(node),
                external_id: node.title.clone(),
                score,
            })),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(title: &str, media_type: &str) -> Node {
        Node {
            title: title.to_string(),
            alternative_titles: None,
            synopsis: None,
            media_type: Some(media_type.to_string()),
            authors: vec![],
            main_picture: None,
        }
    }

    #[test]
    fn test_score_with_manga_and_synopsis_bonus() {
        let mut n = node("Berserk", "manga");
        n.synopsis = Some("A dark fantasy.".to_string());
        assert_eq!(MyAnimeListClient::score("Berserk", &n), 80.0 + 10.0 + 5.0);
    }

    #[test]
    fn test_score_novel_media_type_no_bonus() {
        let n = node("Berserk", "novel");
        assert_eq!(MyAnimeListClient::score("Berserk", &n), 80.0);
    }

    #[test]
    fn test_author_joins_first_and_last_name() {
        let mut n = node("Berserk", "manga");
        n.authors = vec![AuthorEdge {
            role: Some("Story & Art".to_string()),
            node: AuthorNode {
                first_name: Some("Kentarou".to_string()),
                last_name: Some("Miura".to_string()),
            },
        }];
        assert_eq!(MyAnimeListClient::author(&n).as_deref(), Some("Kentarou Miura"));
    }

    #[test]
    fn test_cover_url_prefers_large() {
        let mut n = node("Berserk", "manga");
        n.main_picture = Some(MainPicture {
            large: Some("https://example.com/large.jpg".to_string()),
            medium: Some("https://example.com/medium.jpg".to_string()),
        });
        assert_eq!(
            MyAnimeListClient::cover_url(&n).as_deref(),
            Some("https://example.com/large.jpg")
        );
    }
}
