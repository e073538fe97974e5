use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::db::models::{FixtureStatus, LiveMatchCacheEntry, MatchOutcome};
use crate::db::Database;
use crate::providers::NormalizedMatch;

/// Receiver of FINISHED transitions, owned by the scoring subsystem.
///
/// Called at most once per transition; implementations may compute
/// synchronously or just enqueue.
pub trait ScoringHook: Send + Sync {
    fn fixture_finished(&self, fixture_id: i64, outcome: MatchOutcome) -> Result<()>;
}

/// Hook that enqueues a row in `scoring_queue` for the scoring worker.
pub struct QueueScoringHook {
    db: Database,
}

impl QueueScoringHook {
    pub fn new(db: Database) -> Self {
        QueueScoringHook { db }
    }
}

impl ScoringHook for QueueScoringHook {
    fn fixture_finished(&self, fixture_id: i64, outcome: MatchOutcome) -> Result<()> {
        let job_id = self.db.enqueue_scoring(fixture_id, outcome, Utc::now())?;
        debug!("Scoring job {} queued for fixture {}", job_id, fixture_id);
        Ok(())
    }
}

/// What applying one match record did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No local fixture with this provider ID; nothing written
    MissingFixture,
    /// Payload would move a FINISHED fixture backwards; nothing written
    StatusRegression,
    Applied {
        /// Score or status differed from what was stored
        changed: bool,
        /// Set when this record moved the fixture into FINISHED
        finished: Option<MatchOutcome>,
    },
}

/// Turns normalized match records into persisted live state.
///
/// Only updates existing fixtures: fixture identity belongs to the full sync.
#[derive(Clone)]
pub struct ReconciliationWriter {
    db: Database,
    hook: Arc<dyn ScoringHook>,
}

impl ReconciliationWriter {
    pub fn new(db: Database, hook: Arc<dyn ScoringHook>) -> Self {
        ReconciliationWriter { db, hook }
    }

    pub fn apply(&self, record: &NormalizedMatch, now: DateTime<Utc>) -> Result<ReconcileOutcome> {
        let fixture = match self.db.find_fixture_by_external_id(record.external_id)? {
            Some(f) => f,
            None => {
                warn!(
                    "No local fixture for provider match {}, skipping",
                    record.external_id
                );
                return Ok(ReconcileOutcome::MissingFixture);
            }
        };
        let fixture_id = match fixture.id {
            Some(id) => id,
            None => return Ok(ReconcileOutcome::MissingFixture),
        };

        if fixture.status == FixtureStatus::Finished && record.status != FixtureStatus::Finished {
            warn!(
                "Ignoring {} for finished fixture {} (provider match {})",
                record.status, fixture_id, record.external_id
            );
            return Ok(ReconcileOutcome::StatusRegression);
        }

        self.db.upsert_live_entry(&LiveMatchCacheEntry {
            fixture_id,
            home_score: record.home_score,
            away_score: record.away_score,
            status: record.status,
            minute: record.minute,
            events: record.events.clone(),
            last_updated: now,
        })?;

        let changed = fixture.status != record.status
            || fixture.home_score != record.home_score
            || fixture.away_score != record.away_score;
        if changed {
            self.db.update_fixture_result(
                fixture_id,
                record.status,
                record.home_score,
                record.away_score,
                now,
            )?;
            info!(
                "Fixture {} now {} ({}-{})",
                record.external_id,
                record.status,
                score_text(record.home_score),
                score_text(record.away_score)
            );
        } else {
            self.db.touch_fixture(fixture_id, now)?;
        }

        let mut finished = None;
        if record.status == FixtureStatus::Finished && fixture.status != FixtureStatus::Finished {
            if let (Some(home), Some(away)) = (record.home_score, record.away_score) {
                let outcome = MatchOutcome::from_scores(home, away);
                info!(
                    "Fixture {} finished {}-{}: {}",
                    record.external_id, home, away, outcome
                );
                // The fixture is already FINISHED locally, so a failed hook is
                // not retried; log loudly for the operator
                if let Err(e) = self.hook.fixture_finished(fixture_id, outcome) {
                    error!("Scoring hook failed for fixture {}: {:#}", fixture_id, e);
                }
                finished = Some(outcome);
            }
        }

        Ok(ReconcileOutcome::Applied { changed, finished })
    }
}

/// Remove FINISHED live-cache rows not refreshed within `older_than`.
pub fn cleanup_live_cache(db: &Database, now: DateTime<Utc>, older_than: Duration) -> Result<usize> {
    let removed = db.delete_live_entries_before(FixtureStatus::Finished, now - older_than)?;
    if removed > 0 {
        info!("Removed {} stale live cache entr(y/ies)", removed);
    }
    Ok(removed)
}

fn score_text(score: Option<i32>) -> String {
    score.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string())
}
