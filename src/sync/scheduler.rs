//! Job entry points: full sync, smart (results) sync, cache cleanup and the
//! dry-run schedule analysis.
//!
//! Every job runs under its named file lock and reports a [`SyncOutcome`]
//! value instead of raising, so the CLI and the daemon treat them alike.

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::freshness::{fetch_freshest, Selected};
use super::key_pool::ApiKeyPool;
use super::job_lock::JobLocks;
use super::match_window::{self, WindowDecision};
use super::planner::{self, DailyPlan};
use super::reconcile::{cleanup_live_cache, ReconcileOutcome, ReconciliationWriter};
use super::{FetchError, KeyConfig, SyncSettings};
use crate::db::models::{Fixture, FixtureStatus, Gameweek, Team};
use crate::db::Database;
use crate::providers::{
    FeedSource, FetchRequest, NormalizedMatch, NormalizedTeam, PayloadKind, ProviderPayload,
};

pub const FULL_SYNC_JOB: &str = "full-sync";
pub const SMART_SYNC_JOB: &str = "smart-sync";
pub const CLEANUP_JOB: &str = "cleanup";

/// Smart sync asks for matches kicked off up to this far back.
const RESULTS_LOOKBACK_HOURS: i64 = 5;
/// Gameweek end is the last kickoff plus this.
const GAMEWEEK_TAIL_HOURS: i64 = 2;
/// Selection for the first gameweek of a season opens this long before its deadline.
const FIRST_SELECTION_WINDOW_DAYS: i64 = 7;

/// Phases of one job invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Deciding,
    Skipped,
    Fetching,
    Reconciling,
    Done,
    Failed,
}

struct PhaseTracker {
    job: &'static str,
    phase: SyncPhase,
}

impl PhaseTracker {
    fn new(job: &'static str) -> Self {
        PhaseTracker {
            job,
            phase: SyncPhase::Idle,
        }
    }

    fn advance(&mut self, next: SyncPhase) {
        if self.phase != next {
            debug!("{}: {:?} -> {:?}", self.job, self.phase, next);
            self.phase = next;
        }
    }

    fn finish(&mut self, outcome: &SyncOutcome) {
        self.advance(match outcome {
            SyncOutcome::Skipped(_) => SyncPhase::Skipped,
            SyncOutcome::Done(_) => SyncPhase::Done,
            SyncOutcome::Failed(_) => SyncPhase::Failed,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No stored fixture makes a call worthwhile right now
    OutsideMatchWindow,
    BudgetExhausted { used: i64, budget: u32 },
    /// Another run of the same job holds its lock
    AlreadyRunning,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::OutsideMatchWindow => write!(f, "outside match window"),
            SkipReason::BudgetExhausted { used, budget } => {
                write!(f, "daily budget exhausted ({}/{})", used, budget)
            }
            SkipReason::AlreadyRunning => write!(f, "already running"),
        }
    }
}

/// Counters collected while a job runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Match records in the chosen payload
    pub fetched: usize,
    pub updated: usize,
    pub missing: usize,
    pub regressions: usize,
    pub finished: usize,
    pub errors: usize,
    pub teams: usize,
    pub gameweeks: usize,
    pub fixtures: usize,
    pub players: usize,
    pub cache_entries_removed: usize,
    pub stale: bool,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = [
            ("fetched", self.fetched),
            ("updated", self.updated),
            ("finished", self.finished),
            ("missing", self.missing),
            ("regressions", self.regressions),
            ("errors", self.errors),
            ("teams", self.teams),
            ("gameweeks", self.gameweeks),
            ("fixtures", self.fixtures),
            ("players", self.players),
            ("cache_removed", self.cache_entries_removed),
        ];
        let parts: Vec<String> = fields
            .iter()
            .filter(|(_, n)| *n > 0)
            .map(|(name, n)| format!("{}={}", name, n))
            .collect();
        if parts.is_empty() {
            f.write_str("no changes")?;
        } else {
            f.write_str(&parts.join(" "))?;
        }
        if self.stale {
            f.write_str(" (stale data)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Skipped(SkipReason),
    Done(SyncReport),
    Failed(String),
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Skipped(reason) => write!(f, "skipped: {}", reason),
            SyncOutcome::Done(report) => write!(f, "done: {}", report),
            SyncOutcome::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FullSyncOptions {
    pub teams_only: bool,
    pub gameweeks_only: bool,
    /// Rewrite teams and gameweeks even when already stored
    pub force: bool,
}

impl FullSyncOptions {
    fn sync_teams(&self) -> bool {
        self.teams_only || !self.gameweeks_only
    }

    fn sync_gameweeks(&self) -> bool {
        self.gameweeks_only || !self.teams_only
    }
}

/// Result of the dry-run schedule analysis.
#[derive(Debug, Clone)]
pub struct ScheduleAnalysis {
    pub now: DateTime<Utc>,
    pub decision: WindowDecision,
    pub plan: DailyPlan,
    pub calls_today: i64,
    pub daily_budget: u32,
    pub fixed_daily_calls: u32,
    /// FINISHED transitions still waiting for the scoring worker
    pub pending_scoring: usize,
}

impl fmt::Display for ScheduleAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Schedule analysis at {}", self.now.format("%Y-%m-%d %H:%M UTC"))?;
        writeln!(
            f,
            "  API calls today: {}/{} ({} reserved for the daily full sync)",
            self.calls_today, self.daily_budget, self.fixed_daily_calls
        )?;
        if self.decision.should_poll() {
            writeln!(f, "  Match window: OPEN")?;
            for (reason, ids) in &self.decision.reasons {
                writeln!(f, "    - {} ({:?})", reason, ids)?;
            }
        } else {
            writeln!(f, "  Match window: closed, an unforced smart sync would skip")?;
        }
        writeln!(
            f,
            "  Planned polls: {} of {} candidate(s), {} slot(s)",
            self.plan.polls.len(),
            self.plan.candidates,
            self.plan.slots
        )?;
        for poll in &self.plan.polls {
            writeln!(
                f,
                "    - {} for fixtures {:?}",
                poll.at.format("%Y-%m-%d %H:%M"),
                poll.fixture_ids
            )?;
        }
        writeln!(
            f,
            "  Projected calls: {}",
            self.plan.projected_calls(self.fixed_daily_calls)
        )?;
        write!(f, "  Pending scoring jobs: {}", self.pending_scoring)
    }
}

/// Owns everything a job needs: the store, both providers, their key
/// configuration, thresholds and the job locks.
pub struct UpdateScheduler {
    db: Database,
    fixtures_source: Arc<dyn FeedSource>,
    fixtures_keys: KeyConfig,
    squads_source: Option<Arc<dyn FeedSource>>,
    squads_keys: KeyConfig,
    settings: SyncSettings,
    writer: ReconciliationWriter,
    locks: JobLocks,
}

impl UpdateScheduler {
    pub fn new(
        db: Database,
        fixtures_source: Arc<dyn FeedSource>,
        fixtures_keys: KeyConfig,
        settings: SyncSettings,
        writer: ReconciliationWriter,
        locks: JobLocks,
    ) -> Self {
        UpdateScheduler {
            db,
            fixtures_source,
            fixtures_keys,
            squads_source: None,
            squads_keys: KeyConfig::default(),
            settings,
            writer,
            locks,
        }
    }

    pub fn with_squads(mut self, source: Arc<dyn FeedSource>, keys: KeyConfig) -> Self {
        self.squads_source = Some(source);
        self.squads_keys = keys;
        self
    }

    // ── Smart sync ───────────────────────────────────────────────────────────

    /// Budget-aware results sync. Unless forced, only calls the provider when
    /// the match window says it is worthwhile and today's budget allows it.
    pub async fn smart_sync(&self, force: bool, now: DateTime<Utc>) -> SyncOutcome {
        let mut phase = PhaseTracker::new(SMART_SYNC_JOB);
        let outcome = self
            .exclusive(SMART_SYNC_JOB, self.run_smart_sync(force, now, &mut phase))
            .await;
        phase.finish(&outcome);
        outcome
    }

    async fn run_smart_sync(
        &self,
        force: bool,
        now: DateTime<Utc>,
        phase: &mut PhaseTracker,
    ) -> Result<SyncOutcome> {
        phase.advance(SyncPhase::Deciding);
        if force {
            info!("Smart sync forced, bypassing match window and budget checks");
        } else {
            let decision = match_window::evaluate(&self.db, now)?;
            if !decision.should_poll() {
                info!("No fixtures in a match window, skipping provider call");
                return Ok(SyncOutcome::Skipped(SkipReason::OutsideMatchWindow));
            }
            for (reason, ids) in &decision.reasons {
                info!("Match window open: {} (fixtures {:?})", reason, ids);
            }

            let used = self.calls_today(now)?;
            if used >= i64::from(self.settings.daily_budget) {
                warn!(
                    "Daily API budget spent ({}/{}), skipping smart sync",
                    used, self.settings.daily_budget
                );
                return Ok(SyncOutcome::Skipped(SkipReason::BudgetExhausted {
                    used,
                    budget: self.settings.daily_budget,
                }));
            }
        }

        phase.advance(SyncPhase::Fetching);
        let request = FetchRequest::matches_between(
            &self.settings.competition,
            (now - Duration::hours(RESULTS_LOOKBACK_HOURS)).date_naive(),
            now.date_naive(),
        );
        let mut pool = self.fixtures_keys.pool();
        let selected = self
            .fetch(self.fixtures_source.as_ref(), &mut pool, &request, now)
            .await?;

        phase.advance(SyncPhase::Reconciling);
        let mut report = SyncReport {
            stale: selected.stale,
            ..Default::default()
        };
        if let ProviderPayload::Matches(records) =
            ProviderPayload::normalize(PayloadKind::Matches, &selected.payload.body)
        {
            report.fetched = records.len();
            for record in &records {
                self.reconcile(record, now, &mut report);
            }
        }

        info!("Smart sync complete: {}", report);
        Ok(SyncOutcome::Done(report))
    }

    fn reconcile(&self, record: &NormalizedMatch, now: DateTime<Utc>, report: &mut SyncReport) {
        match self.writer.apply(record, now) {
            Ok(ReconcileOutcome::MissingFixture) => report.missing += 1,
            Ok(ReconcileOutcome::StatusRegression) => report.regressions += 1,
            Ok(ReconcileOutcome::Applied { changed, finished }) => {
                if changed {
                    report.updated += 1;
                }
                if finished.is_some() {
                    report.finished += 1;
                }
            }
            Err(e) => {
                // One bad record must not block the rest of the payload
                warn!("Failed to reconcile match {}: {:#}", record.external_id, e);
                report.errors += 1;
            }
        }
    }

    // ── Full sync ────────────────────────────────────────────────────────────

    /// Daily sync of teams, gameweeks, fixtures and (when configured) squads.
    pub async fn full_sync(&self, options: FullSyncOptions, now: DateTime<Utc>) -> SyncOutcome {
        let mut phase = PhaseTracker::new(FULL_SYNC_JOB);
        let outcome = self
            .exclusive(FULL_SYNC_JOB, self.run_full_sync(options, now, &mut phase))
            .await;
        phase.finish(&outcome);
        outcome
    }

    async fn run_full_sync(
        &self,
        options: FullSyncOptions,
        now: DateTime<Utc>,
        phase: &mut PhaseTracker,
    ) -> Result<SyncOutcome> {
        phase.advance(SyncPhase::Deciding);
        let mut report = SyncReport::default();
        let mut pool = self.fixtures_keys.pool();

        if options.sync_teams() {
            if !options.force && self.db.count_teams()? > 0 {
                info!("Teams already stored, skipping (use --force to refresh)");
            } else {
                phase.advance(SyncPhase::Fetching);
                let request = FetchRequest::teams(&self.settings.competition);
                let selected = self
                    .fetch(self.fixtures_source.as_ref(), &mut pool, &request, now)
                    .await?;
                phase.advance(SyncPhase::Reconciling);
                if let ProviderPayload::Teams(teams) =
                    ProviderPayload::normalize(PayloadKind::Teams, &selected.payload.body)
                {
                    report.teams = self.store_teams(&teams, now)?;
                }
                info!("Synced {} team(s)", report.teams);
            }
        }

        if options.sync_gameweeks() {
            phase.advance(SyncPhase::Fetching);
            let request = FetchRequest::season_matches(&self.settings.competition);
            let selected = self
                .fetch(self.fixtures_source.as_ref(), &mut pool, &request, now)
                .await?;
            report.stale = selected.stale;

            phase.advance(SyncPhase::Reconciling);
            if let ProviderPayload::Matches(records) =
                ProviderPayload::normalize(PayloadKind::Matches, &selected.payload.body)
            {
                report.fetched = records.len();
                let gameweek_ids =
                    self.store_gameweeks(&records, options.force, now, &mut report)?;
                self.store_fixtures(&records, &gameweek_ids, now, &mut report)?;
            }
            info!(
                "Synced {} gameweek(s) and {} fixture(s)",
                report.gameweeks, report.fixtures
            );
        }

        if !options.teams_only && !options.gameweeks_only {
            phase.advance(SyncPhase::Fetching);
            // Squads are enrichment; the sync stands without them
            match self.sync_squads(now).await {
                Ok(players) => report.players = players,
                Err(e) => warn!("Squad sync failed: {:#}", e),
            }
        }

        info!("Full sync complete: {}", report);
        Ok(SyncOutcome::Done(report))
    }

    fn store_teams(&self, teams: &[NormalizedTeam], now: DateTime<Utc>) -> Result<usize> {
        for team in teams {
            self.db.upsert_team(&Team {
                id: None,
                external_id: team.external_id,
                name: team.name.clone(),
                short_name: team.short_name.clone(),
                tla: team.tla.clone(),
                crest_url: team.crest_url.clone(),
                updated_at: now,
            })?;
        }
        Ok(teams.len())
    }

    /// Derive one gameweek per matchday and return matchday -> local ID.
    ///
    /// Stored gameweeks are kept as they are unless `force`.
    fn store_gameweeks(
        &self,
        records: &[NormalizedMatch],
        force: bool,
        now: DateTime<Utc>,
        report: &mut SyncReport,
    ) -> Result<HashMap<i32, i64>> {
        let mut by_matchday: BTreeMap<i32, Vec<&NormalizedMatch>> = BTreeMap::new();
        for record in records {
            match record.matchday {
                Some(md) => by_matchday.entry(md).or_default().push(record),
                None => debug!("Match {} has no matchday, skipping", record.external_id),
            }
        }

        let mut ids = HashMap::new();
        let mut previous_end: Option<DateTime<Utc>> = None;

        for (number, matches) in by_matchday {
            let first_kickoff = matches.iter().map(|m| m.kickoff_at).min();
            let last_kickoff = matches.iter().map(|m| m.kickoff_at).max();
            let (first_kickoff, last_kickoff) = match (first_kickoff, last_kickoff) {
                (Some(first), Some(last)) => (first, last),
                _ => continue,
            };

            if !force {
                if let Some(existing) = self.db.find_gameweek_by_number(number)? {
                    if let Some(id) = existing.id {
                        ids.insert(number, id);
                        previous_end = Some(existing.end_date);
                        continue;
                    }
                }
            }

            let end_date = last_kickoff + Duration::hours(GAMEWEEK_TAIL_HOURS);
            let selection_deadline = first_kickoff - self.settings.selection_deadline_lead;
            let selection_opens = previous_end
                .unwrap_or(selection_deadline - Duration::days(FIRST_SELECTION_WINDOW_DAYS))
                .min(selection_deadline);

            let id = self.db.upsert_gameweek(&Gameweek {
                id: None,
                number,
                season: matches.iter().find_map(|m| m.season.clone()),
                start_date: first_kickoff,
                end_date,
                selection_opens,
                selection_deadline,
                updated_at: now,
            })?;
            ids.insert(number, id);
            previous_end = Some(end_date);
            report.gameweeks += 1;
        }

        Ok(ids)
    }

    /// Upsert fixture identity. Live and final result changes on known
    /// fixtures go through the reconciliation writer so a FINISHED transition
    /// still reaches scoring; schedule changes are mirrored directly.
    fn store_fixtures(
        &self,
        records: &[NormalizedMatch],
        gameweek_ids: &HashMap<i32, i64>,
        now: DateTime<Utc>,
        report: &mut SyncReport,
    ) -> Result<()> {
        for record in records {
            let gameweek_id = match record.matchday.and_then(|md| gameweek_ids.get(&md)) {
                Some(id) => *id,
                None => continue,
            };
            let home = self.db.find_team_by_external_id(record.home_team_external_id)?;
            let away = self.db.find_team_by_external_id(record.away_team_external_id)?;
            let (home_team_id, away_team_id) = match (home.and_then(|t| t.id), away.and_then(|t| t.id))
            {
                (Some(h), Some(a)) => (h, a),
                _ => {
                    warn!(
                        "Match {} references unknown team(s) {} / {}, run a team sync first",
                        record.external_id,
                        record.home_team_external_id,
                        record.away_team_external_id
                    );
                    report.missing += 1;
                    continue;
                }
            };

            match self.db.find_fixture_by_external_id(record.external_id)? {
                Some(existing) => {
                    self.db.upsert_fixture(&Fixture {
                        gameweek_id,
                        home_team_id,
                        away_team_id,
                        kickoff_at: record.kickoff_at,
                        ..existing.clone()
                    })?;
                    let changed = existing.status != record.status
                        || existing.home_score != record.home_score
                        || existing.away_score != record.away_score;
                    let live = record.status.has_live_state()
                        || existing.status == FixtureStatus::Finished;
                    match existing.id {
                        Some(_) if changed && live => self.reconcile(record, now, report),
                        // Schedule changes (TIMED, POSTPONED, ...) have no live state to cache
                        Some(id) if changed => {
                            self.db.update_fixture_result(
                                id,
                                record.status,
                                record.home_score,
                                record.away_score,
                                now,
                            )?;
                            report.updated += 1;
                        }
                        _ => {}
                    }
                }
                None => {
                    self.db.upsert_fixture(&Fixture {
                        id: None,
                        external_id: record.external_id,
                        gameweek_id,
                        home_team_id,
                        away_team_id,
                        kickoff_at: record.kickoff_at,
                        status: record.status,
                        home_score: record.home_score,
                        away_score: record.away_score,
                        updated_at: now,
                    })?;
                }
            }
            report.fixtures += 1;
        }
        Ok(())
    }

    async fn sync_squads(&self, now: DateTime<Utc>) -> Result<usize> {
        let source = match &self.squads_source {
            Some(s) => s,
            None => return Ok(0),
        };
        let mut pool = self.squads_keys.pool();
        if pool.is_empty() {
            debug!("No squads provider key configured, skipping squads");
            return Ok(0);
        }

        let request = FetchRequest::squads(&self.settings.squads_league);
        let selected = self.fetch(source.as_ref(), &mut pool, &request, now).await?;
        let players =
            match ProviderPayload::normalize(PayloadKind::Squads, &selected.payload.body) {
                ProviderPayload::Squads(players) => players,
                _ => return Ok(0),
            };

        let mut unmatched = 0;
        for player in &players {
            let team_id = self
                .db
                .find_team_by_name(&player.team_name)?
                .and_then(|t| t.id);
            if team_id.is_none() {
                unmatched += 1;
            }
            self.db.upsert_squad_player(player, team_id, now)?;
        }
        if unmatched > 0 {
            debug!("{} squad player(s) with no matching team", unmatched);
        }
        let recovered = self.db.clear_stale_injuries(now)?;
        if recovered > 0 {
            info!("{} player(s) no longer listed as injured", recovered);
        }
        info!(
            "Synced {} squad player(s), {} injured overall",
            players.len(),
            self.db.count_injured_players()?
        );
        Ok(players.len())
    }

    // ── Cleanup / analysis ───────────────────────────────────────────────────

    pub async fn cleanup(&self, now: DateTime<Utc>) -> SyncOutcome {
        let mut phase = PhaseTracker::new(CLEANUP_JOB);
        phase.advance(SyncPhase::Reconciling);
        let body = async {
            let removed = cleanup_live_cache(&self.db, now, self.settings.cleanup_after)?;
            Ok::<_, anyhow::Error>(SyncOutcome::Done(SyncReport {
                cache_entries_removed: removed,
                ..Default::default()
            }))
        };
        let outcome = self.exclusive(CLEANUP_JOB, body).await;
        phase.finish(&outcome);
        outcome
    }

    /// Dry-run: window decision, daily plan and today's usage. No provider calls.
    pub fn analyze(&self, now: DateTime<Utc>) -> Result<ScheduleAnalysis> {
        Ok(ScheduleAnalysis {
            now,
            decision: match_window::evaluate(&self.db, now)?,
            plan: self.plan(now)?,
            calls_today: self.calls_today(now)?,
            daily_budget: self.settings.daily_budget,
            fixed_daily_calls: self.settings.fixed_daily_calls,
            pending_scoring: self.db.pending_scoring_jobs()?.len(),
        })
    }

    pub fn plan(&self, now: DateTime<Utc>) -> Result<DailyPlan> {
        planner::plan_from_store(
            &self.db,
            now,
            self.settings.daily_budget,
            self.settings.fixed_daily_calls,
        )
    }

    fn calls_today(&self, now: DateTime<Utc>) -> Result<i64> {
        let midnight = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        self.db.count_api_calls_since(midnight)
    }

    // ── Plumbing ─────────────────────────────────────────────────────────────

    /// One logical provider call: rotate keys from the primary, pick the
    /// freshest response and record it in the call ledger.
    async fn fetch(
        &self,
        source: &dyn FeedSource,
        pool: &mut ApiKeyPool,
        request: &FetchRequest,
        now: DateTime<Utc>,
    ) -> Result<Selected> {
        pool.reset_to_primary();
        let result = fetch_freshest(source, pool, request, &self.settings.freshness, now).await;

        let attempts = match &result {
            Ok(selected) => selected.attempts,
            Err(FetchError::Exhausted { attempts, .. }) => *attempts,
            Err(FetchError::NoKeys { .. }) => 0,
        };
        if attempts > 0 {
            self.db.record_api_call(
                source.name(),
                request.kind.as_str(),
                attempts as u32,
                result.is_ok(),
                now,
            )?;
        }
        Ok(result?)
    }

    /// Run a job body under its lock, folding errors into [`SyncOutcome::Failed`].
    async fn exclusive<Fut>(&self, job: &'static str, body: Fut) -> SyncOutcome
    where
        Fut: Future<Output = Result<SyncOutcome>>,
    {
        match self.locks.run_exclusive(job, move || body).await {
            Ok(Some(Ok(outcome))) => outcome,
            Ok(Some(Err(e))) => {
                error!("{} failed: {:#}", job, e);
                SyncOutcome::Failed(format!("{:#}", e))
            }
            Ok(None) => SyncOutcome::Skipped(SkipReason::AlreadyRunning),
            Err(e) => {
                error!("{} could not take its lock: {:#}", job, e);
                SyncOutcome::Failed(format!("{:#}", e))
            }
        }
    }
}
