//! Normalization of the fixtures provider's `matches` and `teams` payloads.
//!
//! Records that fail validation are dropped here so nothing downstream has to
//! second-guess provider field names.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::db::models::{FixtureStatus, MatchEvent};

/// A match record in local vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMatch {
    pub external_id: i64,
    pub matchday: Option<i32>,
    pub season: Option<String>,
    pub kickoff_at: DateTime<Utc>,
    pub status: FixtureStatus,
    pub home_team_external_id: i64,
    pub away_team_external_id: i64,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub minute: Option<i32>,
    pub events: Vec<MatchEvent>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTeam {
    pub external_id: i64,
    pub name: String,
    pub short_name: Option<String>,
    pub tla: Option<String>,
    pub crest_url: Option<String>,
}

pub fn parse_teams(raw: &Value) -> Vec<NormalizedTeam> {
    let teams = match raw["teams"].as_array() {
        Some(a) => a,
        None => return vec![],
    };

    teams
        .iter()
        .filter_map(|t| {
            Some(NormalizedTeam {
                external_id: t["id"].as_i64()?,
                name: t["name"].as_str()?.to_string(),
                short_name: t["shortName"].as_str().map(str::to_string),
                tla: t["tla"].as_str().map(str::to_string),
                crest_url: t["crest"].as_str().map(str::to_string),
            })
        })
        .collect()
}

pub fn parse_matches(raw: &Value) -> Vec<NormalizedMatch> {
    let matches = match raw["matches"].as_array() {
        Some(a) => a,
        None => return vec![],
    };

    matches.iter().filter_map(parse_match).collect()
}

fn parse_match(m: &Value) -> Option<NormalizedMatch> {
    let external_id = m["id"].as_i64()?;

    let status_str = m["status"].as_str()?;
    let status = match FixtureStatus::parse(status_str) {
        Some(s) => s,
        None => {
            debug!("Skipping match {}: unknown status '{}'", external_id, status_str);
            return None;
        }
    };

    let kickoff_at = parse_instant(&m["utcDate"])?;
    let home_team_external_id = m["homeTeam"]["id"].as_i64()?;
    let away_team_external_id = m["awayTeam"]["id"].as_i64()?;

    // fullTime carries the running score while a match is in play
    let home_score = as_i32(&m["score"]["fullTime"]["home"]);
    let away_score = as_i32(&m["score"]["fullTime"]["away"]);

    if status == FixtureStatus::Finished && (home_score.is_none() || away_score.is_none()) {
        warn!(
            "Skipping match {}: reported FINISHED without a full-time score",
            external_id
        );
        return None;
    }

    Some(NormalizedMatch {
        external_id,
        matchday: as_i32(&m["matchday"]),
        season: m["season"]["startDate"]
            .as_str()
            .and_then(|d| d.get(..4))
            .map(str::to_string),
        kickoff_at,
        status,
        home_team_external_id,
        away_team_external_id,
        home_score,
        away_score,
        minute: parse_minute(&m["minute"]),
        events: parse_events(m),
        last_updated: parse_instant(&m["lastUpdated"]),
    })
}

fn parse_instant(v: &Value) -> Option<DateTime<Utc>> {
    v.as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn as_i32(v: &Value) -> Option<i32> {
    v.as_i64().and_then(|n| i32::try_from(n).ok())
}

/// Minute arrives as a number or as a string such as `"45+2"`.
fn parse_minute(v: &Value) -> Option<i32> {
    if let Some(n) = as_i32(v) {
        return Some(n);
    }
    let s = v.as_str()?;
    let mut total = 0;
    for part in s.split('+') {
        total += part.trim().trim_end_matches('\'').parse::<i32>().ok()?;
    }
    Some(total)
}

fn parse_events(m: &Value) -> Vec<MatchEvent> {
    let mut events = Vec::new();

    for g in m["goals"].as_array().into_iter().flatten() {
        let kind = match g["type"].as_str().unwrap_or("REGULAR") {
            "OWN" => "own_goal",
            "PENALTY" => "penalty",
            _ => "goal",
        };
        events.push(MatchEvent {
            minute: parse_minute(&g["minute"]),
            kind: kind.to_string(),
            team_external_id: g["team"]["id"].as_i64(),
            player: g["scorer"]["name"].as_str().map(str::to_string),
            detail: g["assist"]["name"].as_str().map(|a| format!("assist: {}", a)),
        });
    }

    for b in m["bookings"].as_array().into_iter().flatten() {
        events.push(MatchEvent {
            minute: parse_minute(&b["minute"]),
            kind: "booking".to_string(),
            team_external_id: b["team"]["id"].as_i64(),
            player: b["player"]["name"].as_str().map(str::to_string),
            detail: b["card"].as_str().map(str::to_string),
        });
    }

    for s in m["substitutions"].as_array().into_iter().flatten() {
        events.push(MatchEvent {
            minute: parse_minute(&s["minute"]),
            kind: "substitution".to_string(),
            team_external_id: s["team"]["id"].as_i64(),
            player: s["playerIn"]["name"].as_str().map(str::to_string),
            detail: s["playerOut"]["name"].as_str().map(|p| format!("off: {}", p)),
        });
    }

    events.sort_by_key(|e| e.minute.unwrap_or(i32::MAX));
    events
}
