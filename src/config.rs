use chrono::Duration;
use clap::{Parser, Subcommand};

use crate::sync::{FreshnessThresholds, KeyConfig, SyncSettings};

/// Gameweek fixture synchronization and live-result reconciliation
#[derive(Parser, Debug, Clone)]
#[command(name = "gameweek-sync", version, about)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,

    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "gameweek.db")]
    pub database_path: String,

    /// Directory holding the per-job lock files
    #[arg(long, env = "LOCK_DIR", default_value = "locks")]
    pub lock_dir: String,

    /// Fixtures/teams provider base URL
    #[arg(
        long,
        env = "FOOTBALL_DATA_API_URL",
        default_value = "https://api.football-data.org/v4"
    )]
    pub football_data_api_url: String,

    /// Competition code at the fixtures provider
    #[arg(long, env = "FOOTBALL_DATA_COMPETITION", default_value = "PL")]
    pub competition: String,

    /// Primary fixtures provider API key
    #[arg(long, env = "FOOTBALL_DATA_API_KEY")]
    pub football_data_api_key: Option<String>,

    /// Comma-separated spare fixtures provider API keys
    #[arg(long, env = "FOOTBALL_DATA_SPARE_KEYS")]
    pub football_data_spare_keys: Option<String>,

    /// Squads/injuries provider base URL
    #[arg(long, env = "SQUADS_API_URL", default_value = "https://apiv3.apifootball.com")]
    pub squads_api_url: String,

    /// League identifier at the squads provider
    #[arg(long, env = "SQUADS_LEAGUE_ID", default_value = "152")]
    pub squads_league_id: String,

    /// Primary squads provider API key (squads are skipped without one)
    #[arg(long, env = "SQUADS_API_KEY")]
    pub squads_api_key: Option<String>,

    /// Comma-separated spare squads provider API keys
    #[arg(long, env = "SQUADS_SPARE_KEYS")]
    pub squads_spare_keys: Option<String>,

    /// Provider calls allowed per UTC day, daily full sync included
    #[arg(long, env = "DAILY_CALL_BUDGET", default_value = "10")]
    pub daily_call_budget: u32,

    /// Calls the daily full sync is assumed to spend
    #[arg(long, env = "FIXED_DAILY_CALLS", default_value = "3")]
    pub fixed_daily_calls: u32,

    /// Responses older than this many minutes are stale
    #[arg(long, env = "REJECT_STALE_MINUTES", default_value = "30")]
    pub reject_stale_minutes: i64,

    /// Responses at most this many minutes old end key rotation early
    #[arg(long, env = "ACCEPT_FRESH_MINUTES", default_value = "5")]
    pub accept_fresh_minutes: i64,

    /// Finished live-cache entries older than this many hours are removed
    #[arg(long, env = "CLEANUP_AFTER_HOURS", default_value = "2")]
    pub cleanup_after_hours: i64,

    /// Per-request HTTP timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "10")]
    pub request_timeout_secs: u64,

    /// UTC hour of the daily full sync in `serve` mode
    #[arg(long, env = "FULL_SYNC_HOUR", default_value = "4")]
    pub full_sync_hour: u32,

    /// Pick selection closes this many minutes before a gameweek's first kickoff
    #[arg(long, env = "SELECTION_DEADLINE_LEAD_MINUTES", default_value = "90")]
    pub selection_deadline_lead_minutes: i64,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Sync teams, gameweeks, fixtures and squads
    FullSync {
        #[arg(long)]
        teams_only: bool,
        #[arg(long)]
        gameweeks_only: bool,
        /// Rewrite data that is already stored
        #[arg(long)]
        force: bool,
    },
    /// Fetch today's results if a match window is open
    SmartSync {
        /// Ignore the match window and the daily budget
        #[arg(long)]
        force: bool,
    },
    /// Print the match window decision and the daily poll plan without calling any provider
    Schedule,
    /// Remove stale finished entries from the live match cache
    Cleanup,
    /// Run every trigger on its own clock until interrupted
    Serve,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.accept_fresh_minutes < 0 || self.reject_stale_minutes <= 0 {
            anyhow::bail!("freshness thresholds must be positive");
        }
        if self.accept_fresh_minutes >= self.reject_stale_minutes {
            anyhow::bail!(
                "accept_fresh_minutes ({}) must be smaller than reject_stale_minutes ({})",
                self.accept_fresh_minutes,
                self.reject_stale_minutes
            );
        }
        if self.daily_call_budget < self.fixed_daily_calls {
            anyhow::bail!(
                "daily_call_budget ({}) cannot be below fixed_daily_calls ({})",
                self.daily_call_budget,
                self.fixed_daily_calls
            );
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be positive");
        }
        if self.cleanup_after_hours <= 0 {
            anyhow::bail!("cleanup_after_hours must be positive");
        }
        if self.full_sync_hour > 23 {
            anyhow::bail!("full_sync_hour must be between 0 and 23");
        }
        if self.selection_deadline_lead_minutes < 0 {
            anyhow::bail!("selection_deadline_lead_minutes cannot be negative");
        }
        Ok(())
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            competition: self.competition.clone(),
            squads_league: self.squads_league_id.clone(),
            freshness: FreshnessThresholds {
                reject_after: Duration::minutes(self.reject_stale_minutes),
                accept_within: Duration::minutes(self.accept_fresh_minutes),
            },
            cleanup_after: Duration::hours(self.cleanup_after_hours),
            daily_budget: self.daily_call_budget,
            fixed_daily_calls: self.fixed_daily_calls,
            selection_deadline_lead: Duration::minutes(self.selection_deadline_lead_minutes),
        }
    }

    pub fn football_data_keys(&self) -> KeyConfig {
        KeyConfig {
            primary: self.football_data_api_key.clone(),
            spares: self.football_data_spare_keys.clone(),
        }
    }

    pub fn squads_keys(&self) -> KeyConfig {
        KeyConfig {
            primary: self.squads_api_key.clone(),
            spares: self.squads_spare_keys.clone(),
        }
    }
}
