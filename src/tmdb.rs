use moka::future::Cache;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org";

/// TMDB search client used to enrich replies with title/year/rating/poster.
/// Lookups are cached; the catalog itself never depends on TMDB.
#[derive(Clone)]
pub struct TmdbClient {
    api_key: String,
    http: Client,
    base_url: String,
    cache: Cache<String, Option<MovieInfo>>,
}

#[derive(Debug, Clone)]
pub struct MovieInfo {
    pub title: String,
    pub year: Option<String>,
    pub rating: Option<f32>,
    pub overview: String,
    pub poster_url: Option<String>,
}

impl TmdbClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            api_key,
            http,
            base_url,
            cache: Cache::builder()
                .max_capacity(1_000)
                .time_to_live(Duration::from_secs(6 * 3600))
                .build(),
        }
    }

    /// First search hit for a title, or None when TMDB has nothing / errors out.
    pub async fn movie_info(&self, query: &str) -> reqwest::Result<Option<MovieInfo>> {
        let key = query.to_lowercase();
        if let Some(hit) = self.cache.get(&key).await {
            return Ok(hit);
        }

        let url = format!(
            "{}/3/search/movie?query={}&language=en-US&include_adult=false&page=1",
            self.base_url,
            urlencoding::encode(query)
        );
        let resp = self.http.get(url).bearer_auth(self.api_key.clone()).send().await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let data: SearchResp = resp.json().await?;
        let info = data.results.into_iter().next().map(|m| MovieInfo {
            year: m.release_date.as_deref().and_then(|d| d.get(..4)).map(str::to_string),
            rating: m.vote_average,
            poster_url: m
                .poster_path
                .map(|p| format!("https://image.tmdb.org/t/p/w500{p}")),
            title: m.title,
            overview: m.overview.unwrap_or_default(),
        });

        self.cache.insert(key, info.clone()).await;
        Ok(info)
    }
}

/* ======= DTOs ======= */

#[derive(Deserialize, Debug)]
struct SearchResp {
    results: Vec<RawMovie>,
}

#[derive(Deserialize, Debug)]
struct RawMovie {
    title: String,
    overview: Option<String>,
    poster_path: Option<String>,
    release_date: Option<String>,
    vote_average: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn picks_first_search_hit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/3/search/movie"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {
                        "title": "Dune",
                        "overview": "Paul Atreides leads nomadic tribes.",
                        "poster_path": "/dune.jpg",
                        "release_date": "2021-09-15",
                        "vote_average": 7.8
                    },
                    { "title": "Dune Part Two", "overview": null,
                      "poster_path": null, "release_date": null, "vote_average": null }
                ]
            })))
            .mount(&server)
            .await;

        let client = TmdbClient::with_base_url("test-key".into(), server.uri());
        let info = client.movie_info("dune").await.unwrap().unwrap();
        assert_eq!(info.title, "Dune");
        assert_eq!(info.year.as_deref(), Some("2021"));
        assert_eq!(
            info.poster_url.as_deref(),
            Some("https://image.tmdb.org/t/p/w500/dune.jpg")
        );
    }

    #[tokio::test]
    async fn error_status_is_none_not_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/3/search/movie"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = TmdbClient::with_base_url("test-key".into(), server.uri());
        assert!(client.movie_info("dune").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/3/search/movie"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{ "title": "Dune", "overview": "x",
                              "poster_path": null, "release_date": "2021-09-15",
                              "vote_average": 7.8 }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = TmdbClient::with_base_url("test-key".into(), server.uri());
        assert!(client.movie_info("Dune").await.unwrap().is_some());
        assert!(client.movie_info("dune").await.unwrap().is_some());
    }
}
