pub mod client;
pub mod football_data;
pub mod squads;

pub use client::ProviderClient;
pub use football_data::{NormalizedMatch, NormalizedTeam};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use crate::db::models::SquadPlayer;

/// What an outbound request is expected to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Matches,
    Teams,
    Squads,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Matches => "matches",
            PayloadKind::Teams => "teams",
            PayloadKind::Squads => "squads",
        }
    }
}

/// One GET against a provider endpoint, minus the credential.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub kind: PayloadKind,
    /// Path relative to the provider base URL
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl FetchRequest {
    /// Competition matches played between two UTC dates (inclusive).
    pub fn matches_between(competition: &str, from: NaiveDate, to: NaiveDate) -> Self {
        FetchRequest {
            kind: PayloadKind::Matches,
            path: format!("competitions/{}/matches", competition),
            query: vec![
                ("dateFrom".into(), from.format("%Y-%m-%d").to_string()),
                ("dateTo".into(), to.format("%Y-%m-%d").to_string()),
            ],
        }
    }

    /// Every match of the current season.
    pub fn season_matches(competition: &str) -> Self {
        FetchRequest {
            kind: PayloadKind::Matches,
            path: format!("competitions/{}/matches", competition),
            query: Vec::new(),
        }
    }

    pub fn teams(competition: &str) -> Self {
        FetchRequest {
            kind: PayloadKind::Teams,
            path: format!("competitions/{}/teams", competition),
            query: Vec::new(),
        }
    }

    /// Teams with their squads and injury flags for one league.
    pub fn squads(league: &str) -> Self {
        FetchRequest {
            kind: PayloadKind::Squads,
            path: String::new(),
            query: vec![
                ("action".into(), "get_teams".into()),
                ("league_id".into(), league.to_string()),
            ],
        }
    }

    /// Top-level key the payload must carry.
    pub fn expected_key(&self) -> &'static str {
        match self.kind {
            PayloadKind::Matches => "matches",
            PayloadKind::Teams => "teams",
            PayloadKind::Squads => "response",
        }
    }
}

/// A successfully fetched, shape-checked payload.
#[derive(Debug, Clone)]
pub struct FetchedPayload {
    pub body: Value,
    /// Newest per-record "last updated" instant in the payload
    pub freshness: Option<DateTime<Utc>>,
}

/// Tagged result of one provider attempt. Attempts never raise.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Success(FetchedPayload),
    /// Timeout or connection failure
    Transport(String),
    /// Non-2xx response
    Http(u16),
    /// Body missing or not the expected shape
    Invalid(String),
}

impl FetchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Success(_) => "success",
            FetchOutcome::Transport(_) => "transport_error",
            FetchOutcome::Http(_) => "http_error",
            FetchOutcome::Invalid(_) => "invalid_payload",
        }
    }
}

/// Provider payload normalized into local vocabulary.
#[derive(Debug, Clone)]
pub enum ProviderPayload {
    Matches(Vec<NormalizedMatch>),
    Teams(Vec<NormalizedTeam>),
    Squads(Vec<SquadPlayer>),
}

impl ProviderPayload {
    pub fn normalize(kind: PayloadKind, body: &Value) -> Self {
        match kind {
            PayloadKind::Matches => ProviderPayload::Matches(football_data::parse_matches(body)),
            PayloadKind::Teams => ProviderPayload::Teams(football_data::parse_teams(body)),
            PayloadKind::Squads => ProviderPayload::Squads(squads::parse_squads(body)),
        }
    }
}

/// Trait every outbound data provider implements.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Human-readable name for logging and the call ledger.
    fn name(&self) -> &str;

    /// Perform one GET with the given key.
    async fn fetch(&self, request: &FetchRequest, key: &str) -> FetchOutcome;
}

/// Last four characters of a key, for logs. Keys too short to keep a
/// hidden part are masked entirely.
pub fn key_suffix(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "…****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("…{}", tail)
}

/// Records under the expected key. Squads payloads may also be a bare array.
pub fn payload_records<'a>(request: &FetchRequest, body: &'a Value) -> Option<&'a Vec<Value>> {
    if request.kind == PayloadKind::Squads {
        if let Some(items) = body.as_array() {
            return Some(items);
        }
    }
    body.get(request.expected_key()).and_then(Value::as_array)
}

/// Newest `lastUpdated` / `last_updated` stamp across the records.
pub fn extract_freshness(records: &[Value]) -> Option<DateTime<Utc>> {
    records
        .iter()
        .filter_map(|r| {
            r.get("lastUpdated")
                .or_else(|| r.get("last_updated"))
                .and_then(Value::as_str)
        })
        .filter_map(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .max()
}
