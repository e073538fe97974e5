pub mod daemon;
pub mod freshness;
pub mod job_lock;
pub mod key_pool;
pub mod match_window;
pub mod planner;
pub mod reconcile;
pub mod scheduler;

pub use freshness::{FetchError, FreshnessThresholds};
pub use job_lock::JobLocks;
pub use key_pool::ApiKeyPool;
pub use reconcile::{QueueScoringHook, ReconciliationWriter};
pub use scheduler::{FullSyncOptions, SyncOutcome, UpdateScheduler};

use chrono::Duration;

/// Thresholds and budgets steering the synchronization jobs.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Fixtures provider competition code, e.g. "PL"
    pub competition: String,
    /// Squads provider league identifier
    pub squads_league: String,
    pub freshness: FreshnessThresholds,
    /// FINISHED live-cache rows older than this are removed
    pub cleanup_after: Duration,
    /// Provider calls allowed per UTC day, full sync included
    pub daily_budget: u32,
    /// Calls the daily full sync always spends
    pub fixed_daily_calls: u32,
    /// Pick selection closes this long before a gameweek's first kickoff
    pub selection_deadline_lead: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            competition: "PL".to_string(),
            squads_league: "152".to_string(),
            freshness: FreshnessThresholds::default(),
            cleanup_after: Duration::hours(2),
            daily_budget: 10,
            fixed_daily_calls: 3,
            selection_deadline_lead: Duration::minutes(90),
        }
    }
}

/// Primary + spare credentials for one provider, as configured.
#[derive(Debug, Clone, Default)]
pub struct KeyConfig {
    pub primary: Option<String>,
    /// Comma-separated
    pub spares: Option<String>,
}

impl KeyConfig {
    /// Fresh pool for one job run.
    pub fn pool(&self) -> ApiKeyPool {
        ApiKeyPool::from_config(self.primary.as_deref(), self.spares.as_deref())
    }
}

#[cfg(test)]
pub mod test_support {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::providers::{FeedSource, FetchOutcome, FetchRequest, FetchedPayload, PayloadKind};

    /// Feed source answering from a script keyed by (payload kind, key).
    /// Unscripted calls answer HTTP 500.
    pub struct ScriptedSource {
        name: String,
        script: HashMap<(&'static str, String), FetchOutcome>,
        calls: Mutex<Vec<(PayloadKind, String)>>,
    }

    impl ScriptedSource {
        pub fn new(name: &str) -> Self {
            ScriptedSource {
                name: name.to_string(),
                script: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn respond(mut self, kind: PayloadKind, key: &str, outcome: FetchOutcome) -> Self {
            self.script.insert((kind.as_str(), key.to_string()), outcome);
            self
        }

        pub fn matches_payload(freshness: DateTime<Utc>, matches: Value) -> FetchOutcome {
            FetchOutcome::Success(FetchedPayload {
                body: json!({ "matches": matches }),
                freshness: Some(freshness),
            })
        }

        pub fn keys_called(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(_, k)| k.clone()).collect()
        }

        pub fn kinds_called(&self) -> Vec<PayloadKind> {
            self.calls.lock().unwrap().iter().map(|(kind, _)| *kind).collect()
        }
    }

    #[async_trait]
    impl FeedSource for ScriptedSource {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch(&self, request: &FetchRequest, key: &str) -> FetchOutcome {
            self.calls
                .lock()
                .unwrap()
                .push((request.kind, key.to_string()));
            self.script
                .get(&(request.kind.as_str(), key.to_string()))
                .cloned()
                .unwrap_or(FetchOutcome::Http(500))
        }
    }
}
