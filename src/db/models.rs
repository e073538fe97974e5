use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a fixture as reported by the fixtures provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixtureStatus {
    Scheduled,
    Timed,
    InPlay,
    Paused,
    Suspended,
    Finished,
    Postponed,
    Cancelled,
}

impl FixtureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixtureStatus::Scheduled => "SCHEDULED",
            FixtureStatus::Timed => "TIMED",
            FixtureStatus::InPlay => "IN_PLAY",
            FixtureStatus::Paused => "PAUSED",
            FixtureStatus::Suspended => "SUSPENDED",
            FixtureStatus::Finished => "FINISHED",
            FixtureStatus::Postponed => "POSTPONED",
            FixtureStatus::Cancelled => "CANCELLED",
        }
    }

    /// Parse a provider status string. `LIVE` is an alias of `IN_PLAY` and
    /// `AWARDED` (result decided off the pitch) counts as finished.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SCHEDULED" => Some(FixtureStatus::Scheduled),
            "TIMED" => Some(FixtureStatus::Timed),
            "LIVE" | "IN_PLAY" => Some(FixtureStatus::InPlay),
            "PAUSED" => Some(FixtureStatus::Paused),
            "SUSPENDED" => Some(FixtureStatus::Suspended),
            "FINISHED" | "AWARDED" => Some(FixtureStatus::Finished),
            "POSTPONED" => Some(FixtureStatus::Postponed),
            "CANCELLED" | "CANCELED" => Some(FixtureStatus::Cancelled),
            _ => None,
        }
    }

    /// Statuses carrying a live score worth caching.
    pub fn has_live_state(&self) -> bool {
        matches!(
            self,
            FixtureStatus::InPlay | FixtureStatus::Paused | FixtureStatus::Finished
        )
    }

    /// Finished, cancelled and postponed fixtures need no further polling.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FixtureStatus::Finished | FixtureStatus::Cancelled | FixtureStatus::Postponed
        )
    }
}

impl fmt::Display for FixtureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for FixtureStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for FixtureStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        FixtureStatus::parse(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown fixture status '{}'", s).into()))
    }
}

/// Result of a finished fixture, fed to the scoring routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchOutcome {
    HomeWin,
    AwayWin,
    Draw,
}

impl MatchOutcome {
    pub fn from_scores(home: i32, away: i32) -> Self {
        match home.cmp(&away) {
            std::cmp::Ordering::Greater => MatchOutcome::HomeWin,
            std::cmp::Ordering::Less => MatchOutcome::AwayWin,
            std::cmp::Ordering::Equal => MatchOutcome::Draw,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchOutcome::HomeWin => "HOME_WIN",
            MatchOutcome::AwayWin => "AWAY_WIN",
            MatchOutcome::Draw => "DRAW",
        }
    }
}

impl fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Premier League club
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: Option<i64>,
    /// Fixtures-provider team ID
    pub external_id: i64,
    pub name: String,
    pub short_name: Option<String>,
    /// Three-letter abbreviation, e.g. "ARS"
    pub tla: Option<String>,
    pub crest_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A round of fixtures plus the pick-selection window around it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gameweek {
    pub id: Option<i64>,
    /// Matchday number, unique per season
    pub number: i32,
    pub season: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub selection_opens: DateTime<Utc>,
    pub selection_deadline: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single scheduled or played match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub id: Option<i64>,
    /// Fixtures-provider match ID
    pub external_id: i64,
    pub gameweek_id: i64,
    pub home_team_id: i64,
    pub away_team_id: i64,
    pub kickoff_at: DateTime<Utc>,
    pub status: FixtureStatus,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    /// Last time this row was written locally
    pub updated_at: DateTime<Utc>,
}

/// One structured in-match event (goal, booking, substitution...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchEvent {
    pub minute: Option<i32>,
    /// "goal" | "own_goal" | "penalty" | "booking" | "substitution"
    pub kind: String,
    pub team_external_id: Option<i64>,
    pub player: Option<String>,
    pub detail: Option<String>,
}

/// Ephemeral projection of a fixture's live state, refreshed on every poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMatchCacheEntry {
    pub fixture_id: i64,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub status: FixtureStatus,
    pub minute: Option<i32>,
    pub events: Vec<MatchEvent>,
    pub last_updated: DateTime<Utc>,
}

/// A queued request for the scoring subsystem to recalculate picks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringJob {
    pub id: i64,
    pub fixture_id: i64,
    pub outcome: String,
    pub enqueued_at: DateTime<Utc>,
}

/// A squad member with injury flag, from the squads provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquadPlayer {
    pub team_name: String,
    pub player_name: String,
    pub position: Option<String>,
    pub injured: bool,
    pub injury_reason: Option<String>,
}
