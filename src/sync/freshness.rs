//! Picks the freshest response when the same request is raced across keys.
//!
//! Providers serve cached data unevenly per key/edge node, so a response may
//! be older than what another key would return. Keys are tried one at a time
//! in rotation order; the first response fresh enough ends the loop, otherwise
//! the newest response seen is used once every key has been tried.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::key_pool::ApiKeyPool;
use crate::providers::{key_suffix, FeedSource, FetchOutcome, FetchRequest, FetchedPayload};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no API key configured for {provider}")]
    NoKeys { provider: String },
    #[error("no valid response from {provider} after {attempts} attempt(s)")]
    Exhausted { provider: String, attempts: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct FreshnessThresholds {
    /// Older than this is stale: keep trying, but still usable as fallback
    pub reject_after: Duration,
    /// Within this is fresh enough to stop trying further keys
    pub accept_within: Duration,
}

impl Default for FreshnessThresholds {
    fn default() -> Self {
        FreshnessThresholds {
            reject_after: Duration::minutes(30),
            accept_within: Duration::minutes(5),
        }
    }
}

/// The response chosen for use.
#[derive(Debug, Clone)]
pub struct Selected {
    pub payload: FetchedPayload,
    pub key_suffix: String,
    /// Provider attempts spent, including failed ones
    pub attempts: usize,
    /// Age of the payload's freshness stamp, when it has one
    pub age: Option<Duration>,
    pub stale: bool,
}

/// Try each key in the pool once, starting at its cursor.
///
/// Returns early on a fresh-enough response (or one without any freshness
/// stamp, which no other key can improve on). Otherwise returns the newest
/// successful response, stale or not.
pub async fn fetch_freshest(
    source: &dyn FeedSource,
    pool: &mut ApiKeyPool,
    request: &FetchRequest,
    thresholds: &FreshnessThresholds,
    now: DateTime<Utc>,
) -> Result<Selected, FetchError> {
    let provider = source.name().to_string();
    let rounds = pool.size();
    if rounds == 0 {
        return Err(FetchError::NoKeys { provider });
    }

    let mut best: Option<Selected> = None;
    let mut attempts = 0;

    for _ in 0..rounds {
        let key = match pool.next() {
            Some(k) => k.to_string(),
            None => break,
        };
        attempts += 1;

        let payload = match source.fetch(request, &key).await {
            FetchOutcome::Success(p) => p,
            // Failures are logged by the source; rotate to the next key
            _ => continue,
        };

        let age = payload.freshness.map(|stamp| now - stamp);
        let stale = age.map_or(false, |a| a > thresholds.reject_after);
        let candidate = Selected {
            payload,
            key_suffix: key_suffix(&key),
            attempts,
            age,
            stale,
        };

        match age {
            None => {
                debug!("[{}] response has no freshness stamp, accepting", provider);
                return Ok(candidate);
            }
            Some(a) if a <= thresholds.accept_within => {
                debug!(
                    "[{}] fresh response from key {} ({}s old)",
                    provider,
                    candidate.key_suffix,
                    a.num_seconds()
                );
                return Ok(candidate);
            }
            Some(a) if stale => {
                warn!(
                    "[{}] stale response from key {} ({} min old), trying next key",
                    provider,
                    candidate.key_suffix,
                    a.num_minutes()
                );
            }
            Some(a) => {
                debug!(
                    "[{}] response from key {} is {} min old, trying next key",
                    provider,
                    candidate.key_suffix,
                    a.num_minutes()
                );
            }
        }

        let newer = match &best {
            None => true,
            Some(b) => candidate.payload.freshness > b.payload.freshness,
        };
        if newer {
            best = Some(candidate);
        }
    }

    match best {
        Some(mut chosen) => {
            chosen.attempts = attempts;
            let minutes = chosen.age.map(|a| a.num_minutes()).unwrap_or_default();
            if chosen.stale {
                warn!(
                    "[{}] using stale best-effort response from key {} ({} min old)",
                    provider, chosen.key_suffix, minutes
                );
            } else {
                info!(
                    "[{}] using newest response from key {} ({} min old)",
                    provider, chosen.key_suffix, minutes
                );
            }
            Ok(chosen)
        }
        None => {
            warn!(
                "[{}] no valid response after {} attempt(s), last key tried {}",
                provider,
                attempts,
                pool.current().map(key_suffix).unwrap_or_default()
            );
            Err(FetchError::Exhausted { provider, attempts })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::PayloadKind;
    use crate::sync::test_support::ScriptedSource;

    fn aged(now: DateTime<Utc>, minutes: i64) -> FetchOutcome {
        ScriptedSource::matches_payload(now - Duration::minutes(minutes), serde_json::json!([]))
    }

    fn request() -> FetchRequest {
        FetchRequest::season_matches("PL")
    }

    #[tokio::test]
    async fn test_fresh_response_returns_immediately() {
        let now = Utc::now();
        let source = ScriptedSource::new("fd")
            .respond(PayloadKind::Matches, "k1", aged(now, 40))
            .respond(PayloadKind::Matches, "k2", aged(now, 20))
            .respond(PayloadKind::Matches, "k3", aged(now, 3))
            .respond(PayloadKind::Matches, "k4", aged(now, 1));
        let mut pool = ApiKeyPool::new(Some("k1"), ["k2", "k3", "k4"]);

        let chosen = fetch_freshest(&source, &mut pool, &request(), &Default::default(), now)
            .await
            .unwrap();
        assert_eq!(chosen.age, Some(Duration::minutes(3)));
        assert_eq!(chosen.attempts, 3);
        assert!(!chosen.stale);
        assert_eq!(source.keys_called(), vec!["k1", "k2", "k3"]);
    }

    #[tokio::test]
    async fn test_all_stale_returns_newest_after_exhausting_keys() {
        let now = Utc::now();
        let source = ScriptedSource::new("fd")
            .respond(PayloadKind::Matches, "primary-k1", aged(now, 40))
            .respond(PayloadKind::Matches, "spare-k2", aged(now, 35));
        let mut pool = ApiKeyPool::new(Some("primary-k1"), ["spare-k2"]);

        let chosen = fetch_freshest(&source, &mut pool, &request(), &Default::default(), now)
            .await
            .unwrap();
        assert_eq!(chosen.age, Some(Duration::minutes(35)));
        assert!(chosen.stale);
        assert_eq!(chosen.attempts, 2);
        assert_eq!(chosen.key_suffix, "…e-k2");
    }

    #[tokio::test]
    async fn test_newer_best_survives_older_later_response() {
        let now = Utc::now();
        let source = ScriptedSource::new("fd")
            .respond(PayloadKind::Matches, "k1", aged(now, 10))
            .respond(PayloadKind::Matches, "k2", FetchOutcome::Http(500))
            .respond(PayloadKind::Matches, "k3", aged(now, 45));
        let mut pool = ApiKeyPool::new(Some("k1"), ["k2", "k3"]);

        let chosen = fetch_freshest(&source, &mut pool, &request(), &Default::default(), now)
            .await
            .unwrap();
        assert_eq!(chosen.age, Some(Duration::minutes(10)));
        assert_eq!(chosen.attempts, 3);
    }

    #[tokio::test]
    async fn test_all_failures_exhaust_pool() {
        let now = Utc::now();
        let source = ScriptedSource::new("fd")
            .respond(PayloadKind::Matches, "k1", FetchOutcome::Transport("timeout".into()))
            .respond(PayloadKind::Matches, "k2", FetchOutcome::Invalid("no matches".into()));
        let mut pool = ApiKeyPool::new(Some("k1"), ["k2"]);

        let err = fetch_freshest(&source, &mut pool, &request(), &Default::default(), now)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Exhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_empty_pool_is_fatal() {
        let source = ScriptedSource::new("fd");
        let mut pool = ApiKeyPool::new(None, Vec::<String>::new());
        let err = fetch_freshest(&source, &mut pool, &request(), &Default::default(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NoKeys { .. }));
        assert!(source.keys_called().is_empty());
    }

    #[tokio::test]
    async fn test_unstamped_response_accepted_immediately() {
        let source = ScriptedSource::new("fd").respond(
            PayloadKind::Matches,
            "k1",
            FetchOutcome::Success(FetchedPayload {
                body: serde_json::json!({"matches": []}),
                freshness: None,
            }),
        );
        let mut pool = ApiKeyPool::new(Some("k1"), ["k2"]);
        let chosen = fetch_freshest(&source, &mut pool, &request(), &Default::default(), Utc::now())
            .await
            .unwrap();
        assert_eq!(chosen.attempts, 1);
        assert_eq!(source.keys_called(), vec!["k1"]);
    }

    #[tokio::test]
    async fn test_rotation_starts_at_pool_cursor() {
        let now = Utc::now();
        let source = ScriptedSource::new("fd")
            .respond(PayloadKind::Matches, "k1", aged(now, 1))
            .respond(PayloadKind::Matches, "k2", aged(now, 1));
        let mut pool = ApiKeyPool::new(Some("k1"), ["k2"]);
        pool.next();
        fetch_freshest(&source, &mut pool, &request(), &Default::default(), now)
            .await
            .unwrap();
        assert_eq!(source.keys_called(), vec!["k2"]);
    }
}
