use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    extract_freshness, key_suffix, payload_records, FeedSource, FetchOutcome, FetchRequest,
    FetchedPayload,
};

/// Where the API key travels on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPlacement {
    /// Header name, e.g. `X-Auth-Token`
    Header(&'static str),
    /// Query parameter name, e.g. `APIkey`
    Query(&'static str),
}

/// Thin reqwest-backed HTTP GET client for one provider.
#[derive(Clone)]
pub struct ProviderClient {
    name: String,
    http: Client,
    base_url: String,
    key_placement: KeyPlacement,
}

impl ProviderClient {
    pub fn new(
        name: &str,
        base_url: &str,
        key_placement: KeyPlacement,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        // Reject unusable base URLs at construction, not per request
        Url::parse(base_url).with_context(|| format!("Invalid base URL for {}: {}", name, base_url))?;
        Ok(ProviderClient {
            name: name.to_string(),
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            key_placement,
        })
    }

    /// Fixtures/teams provider: header-based key.
    pub fn football_data(base_url: &str, timeout: Duration) -> Result<Self> {
        Self::new("football-data", base_url, KeyPlacement::Header("X-Auth-Token"), timeout)
    }

    /// Squads/injuries provider: query-parameter key.
    pub fn squads(base_url: &str, timeout: Duration) -> Result<Self> {
        Self::new("squads", base_url, KeyPlacement::Query("APIkey"), timeout)
    }

    fn build_url(&self, request: &FetchRequest, key: &str) -> Result<Url, String> {
        let raw = format!("{}/{}", self.base_url, request.path.trim_start_matches('/'));
        let mut url = Url::parse_with_params(&raw, &request.query).map_err(|e| e.to_string())?;
        if let KeyPlacement::Query(param) = self.key_placement {
            url.query_pairs_mut().append_pair(param, key);
        }
        Ok(url)
    }

    async fn attempt(&self, request: &FetchRequest, key: &str) -> FetchOutcome {
        let url = match self.build_url(request, key) {
            Ok(u) => u,
            Err(e) => return FetchOutcome::Invalid(format!("bad request URL: {}", e)),
        };

        let mut req = self.http.get(url);
        if let KeyPlacement::Header(header) = self.key_placement {
            req = req.header(header, key);
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return FetchOutcome::Transport("request timed out".into()),
            Err(e) => return FetchOutcome::Transport(e.to_string()),
        };

        if let Some(remaining) = resp
            .headers()
            .get("x-requests-available-minute")
            .and_then(|v| v.to_str().ok())
        {
            debug!("[{}] requests available this minute: {}", self.name, remaining);
        }

        if !resp.status().is_success() {
            return FetchOutcome::Http(resp.status().as_u16());
        }

        let body: serde_json::Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => return FetchOutcome::Invalid(format!("body is not JSON: {}", e)),
        };

        let freshness = match payload_records(request, &body) {
            Some(records) => extract_freshness(records),
            None => {
                return FetchOutcome::Invalid(format!(
                    "missing top-level '{}' array",
                    request.expected_key()
                ))
            }
        };

        FetchOutcome::Success(FetchedPayload { body, freshness })
    }
}

#[async_trait]
impl FeedSource for ProviderClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, request: &FetchRequest, key: &str) -> FetchOutcome {
        let outcome = self.attempt(request, key).await;
        let suffix = key_suffix(key);
        match &outcome {
            FetchOutcome::Success(p) => info!(
                provider = %self.name,
                endpoint = %request.path,
                key = %suffix,
                freshness = ?p.freshness,
                "provider attempt succeeded"
            ),
            FetchOutcome::Transport(e) | FetchOutcome::Invalid(e) => warn!(
                provider = %self.name,
                endpoint = %request.path,
                key = %suffix,
                outcome = outcome.label(),
                "provider attempt failed: {}",
                e
            ),
            FetchOutcome::Http(status) => warn!(
                provider = %self.name,
                endpoint = %request.path,
                key = %suffix,
                outcome = outcome.label(),
                "provider attempt failed with HTTP {}",
                status
            ),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Query,
        http::{HeaderMap, StatusCode},
        routing::get,
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::collections::HashMap;

    /// Serve a router on an ephemeral local port and return its base URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn matches_handler(headers: HeaderMap) -> (StatusCode, Json<Value>) {
        match headers.get("X-Auth-Token").and_then(|v| v.to_str().ok()) {
            Some("good-key") => (
                StatusCode::OK,
                Json(json!({"matches": [{"id": 1, "lastUpdated": "2024-08-17T15:00:00Z"}]})),
            ),
            Some("broken-key") => (StatusCode::OK, Json(json!({"message": "quota"}))),
            _ => (StatusCode::FORBIDDEN, Json(json!({"message": "bad token"}))),
        }
    }

    async fn squads_handler(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
        if q.get("APIkey").map(String::as_str) == Some("sq-key") {
            Json(json!([{"team_name": "Arsenal", "players": []}]))
        } else {
            Json(json!({"error": 401}))
        }
    }

    fn timeout() -> Duration {
        Duration::from_secs(5)
    }

    #[tokio::test]
    async fn test_header_key_success_extracts_freshness() {
        let base = serve(Router::new().route("/competitions/PL/matches", get(matches_handler))).await;
        let client = ProviderClient::football_data(&base, timeout()).unwrap();
        let outcome = client.fetch(&FetchRequest::season_matches("PL"), "good-key").await;
        match outcome {
            FetchOutcome::Success(p) => {
                assert_eq!(
                    p.freshness.unwrap().to_rfc3339(),
                    "2024-08-17T15:00:00+00:00"
                );
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_error_is_tagged() {
        let base = serve(Router::new().route("/competitions/PL/matches", get(matches_handler))).await;
        let client = ProviderClient::football_data(&base, timeout()).unwrap();
        let outcome = client.fetch(&FetchRequest::season_matches("PL"), "wrong").await;
        assert!(matches!(outcome, FetchOutcome::Http(403)));
    }

    #[tokio::test]
    async fn test_missing_top_level_key_is_invalid() {
        let base = serve(Router::new().route("/competitions/PL/matches", get(matches_handler))).await;
        let client = ProviderClient::football_data(&base, timeout()).unwrap();
        let outcome = client.fetch(&FetchRequest::season_matches("PL"), "broken-key").await;
        assert!(matches!(outcome, FetchOutcome::Invalid(_)));
    }

    #[tokio::test]
    async fn test_query_key_placement() {
        let base = serve(Router::new().route("/", get(squads_handler))).await;
        let client = ProviderClient::squads(&base, timeout()).unwrap();
        let ok = client.fetch(&FetchRequest::squads("152"), "sq-key").await;
        assert!(matches!(ok, FetchOutcome::Success(_)));
        let bad = client.fetch(&FetchRequest::squads("152"), "nope").await;
        assert!(matches!(bad, FetchOutcome::Invalid(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_failure() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client =
            ProviderClient::football_data(&format!("http://{}", addr), timeout()).unwrap();
        let outcome = client.fetch(&FetchRequest::season_matches("PL"), "good-key").await;
        assert!(matches!(outcome, FetchOutcome::Transport(_)));
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(ProviderClient::football_data("not a url", timeout()).is_err());
    }
}
