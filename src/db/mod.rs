use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use std::sync::{Arc, Mutex, MutexGuard};

pub mod models;
use models::*;

/// Thread-safe SQLite handle (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// Fixture query: every populated field must match.
///
/// Kickoff bounds are half-open, `(kickoff_after, kickoff_until]`.
#[derive(Debug, Clone, Default)]
pub struct FixtureFilter {
    pub statuses: Vec<FixtureStatus>,
    pub kickoff_after: Option<DateTime<Utc>>,
    pub kickoff_until: Option<DateTime<Utc>>,
    /// UTC calendar day of kickoff
    pub kickoff_on: Option<NaiveDate>,
    /// Only rows whose `updated_at` is at or before this instant
    pub updated_before: Option<DateTime<Utc>>,
}

impl FixtureFilter {
    pub fn statuses(statuses: &[FixtureStatus]) -> Self {
        FixtureFilter {
            statuses: statuses.to_vec(),
            ..Default::default()
        }
    }

    pub fn kickoff_between(mut self, after: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.kickoff_after = Some(after);
        self.kickoff_until = Some(until);
        self
    }

    pub fn kickoff_on(mut self, day: NaiveDate) -> Self {
        self.kickoff_on = Some(day);
        self
    }

    pub fn updated_before(mut self, at: DateTime<Utc>) -> Self {
        self.updated_before = Some(at);
        self
    }
}

impl Database {
    /// Open (or create) the SQLite database at the given path.
    /// `":memory:"` gives a throwaway in-memory store.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))
    }

    // ── Teams ────────────────────────────────────────────────────────────────

    /// Insert or update a team keyed by its provider ID; returns the local ID.
    pub fn upsert_team(&self, team: &Team) -> Result<i64> {
        let conn = self.conn()?;
        let id = conn.query_row(
            "INSERT INTO teams (external_id, name, short_name, tla, crest_url, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT(external_id) DO UPDATE SET
                name=excluded.name,
                short_name=excluded.short_name,
                tla=excluded.tla,
                crest_url=excluded.crest_url,
                updated_at=excluded.updated_at
             RETURNING id",
            params![
                team.external_id,
                team.name,
                team.short_name,
                team.tla,
                team.crest_url,
                team.updated_at,
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn count_teams(&self) -> Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM teams", [], |r| r.get(0))?)
    }

    pub fn find_team_by_external_id(&self, external_id: i64) -> Result<Option<Team>> {
        let conn = self.conn()?;
        let team = conn
            .query_row(
                "SELECT id, external_id, name, short_name, tla, crest_url, updated_at
                 FROM teams WHERE external_id=?1",
                params![external_id],
                map_team,
            )
            .optional()?;
        Ok(team)
    }

    /// Case-insensitive match on full name, short name or TLA.
    pub fn find_team_by_name(&self, name: &str) -> Result<Option<Team>> {
        let conn = self.conn()?;
        let team = conn
            .query_row(
                "SELECT id, external_id, name, short_name, tla, crest_url, updated_at
                 FROM teams
                 WHERE lower(name)=lower(?1) OR lower(short_name)=lower(?1) OR lower(tla)=lower(?1)
                 LIMIT 1",
                params![name.trim()],
                map_team,
            )
            .optional()?;
        Ok(team)
    }

    // ── Gameweeks ────────────────────────────────────────────────────────────

    /// Insert or update a gameweek keyed by its number; returns the local ID.
    pub fn upsert_gameweek(&self, gw: &Gameweek) -> Result<i64> {
        let conn = self.conn()?;
        let id = conn.query_row(
            "INSERT INTO gameweeks (number, season, start_date, end_date,
                                    selection_opens, selection_deadline, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7)
             ON CONFLICT(number) DO UPDATE SET
                season=excluded.season,
                start_date=excluded.start_date,
                end_date=excluded.end_date,
                selection_opens=excluded.selection_opens,
                selection_deadline=excluded.selection_deadline,
                updated_at=excluded.updated_at
             RETURNING id",
            params![
                gw.number,
                gw.season,
                gw.start_date,
                gw.end_date,
                gw.selection_opens,
                gw.selection_deadline,
                gw.updated_at,
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn find_gameweek_by_number(&self, number: i32) -> Result<Option<Gameweek>> {
        let conn = self.conn()?;
        let gw = conn
            .query_row(
                "SELECT id, number, season, start_date, end_date,
                        selection_opens, selection_deadline, updated_at
                 FROM gameweeks WHERE number=?1",
                params![number],
                map_gameweek,
            )
            .optional()?;
        Ok(gw)
    }

    // ── Fixtures ─────────────────────────────────────────────────────────────

    /// Insert or update a fixture keyed by its provider ID; returns the local ID.
    pub fn upsert_fixture(&self, fixture: &Fixture) -> Result<i64> {
        let conn = self.conn()?;
        let id = conn.query_row(
            "INSERT INTO fixtures (external_id, gameweek_id, home_team_id, away_team_id,
                                   kickoff_at, status, home_score, away_score, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)
             ON CONFLICT(external_id) DO UPDATE SET
                gameweek_id=excluded.gameweek_id,
                home_team_id=excluded.home_team_id,
                away_team_id=excluded.away_team_id,
                kickoff_at=excluded.kickoff_at,
                status=excluded.status,
                home_score=excluded.home_score,
                away_score=excluded.away_score,
                updated_at=excluded.updated_at
             RETURNING id",
            params![
                fixture.external_id,
                fixture.gameweek_id,
                fixture.home_team_id,
                fixture.away_team_id,
                fixture.kickoff_at,
                fixture.status,
                fixture.home_score,
                fixture.away_score,
                fixture.updated_at,
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn find_fixture_by_external_id(&self, external_id: i64) -> Result<Option<Fixture>> {
        let conn = self.conn()?;
        let fixture = conn
            .query_row(
                &format!("SELECT {} FROM fixtures WHERE external_id=?1", FIXTURE_COLUMNS),
                params![external_id],
                map_fixture,
            )
            .optional()?;
        Ok(fixture)
    }

    /// Fixtures matching the filter, ordered by kickoff.
    pub fn find_fixtures(&self, filter: &FixtureFilter) -> Result<Vec<Fixture>> {
        let mut sql = format!("SELECT {} FROM fixtures WHERE 1=1", FIXTURE_COLUMNS);
        let mut args: Vec<Box<dyn ToSql>> = Vec::new();

        if !filter.statuses.is_empty() {
            let marks = vec!["?"; filter.statuses.len()].join(",");
            sql.push_str(&format!(" AND status IN ({})", marks));
            for status in &filter.statuses {
                args.push(Box::new(*status));
            }
        }
        // julianday() compares instants regardless of fractional-second width
        if let Some(after) = filter.kickoff_after {
            sql.push_str(" AND julianday(kickoff_at) > julianday(?)");
            args.push(Box::new(after));
        }
        if let Some(until) = filter.kickoff_until {
            sql.push_str(" AND julianday(kickoff_at) <= julianday(?)");
            args.push(Box::new(until));
        }
        if let Some(day) = filter.kickoff_on {
            sql.push_str(" AND date(kickoff_at) = ?");
            args.push(Box::new(day.format("%Y-%m-%d").to_string()));
        }
        if let Some(before) = filter.updated_before {
            sql.push_str(" AND julianday(updated_at) <= julianday(?)");
            args.push(Box::new(before));
        }
        sql.push_str(" ORDER BY julianday(kickoff_at) ASC, external_id ASC");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let fixtures = stmt
            .query_map(params_from_iter(args.iter()), map_fixture)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(fixtures)
    }

    /// Mirror a live result onto the fixture row.
    pub fn update_fixture_result(
        &self,
        id: i64,
        status: FixtureStatus,
        home_score: Option<i32>,
        away_score: Option<i32>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE fixtures SET status=?1, home_score=?2, away_score=?3, updated_at=?4 WHERE id=?5",
            params![status, home_score, away_score, at, id],
        )?;
        Ok(())
    }

    /// Bump `updated_at` without changing the result.
    pub fn touch_fixture(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE fixtures SET updated_at=?1 WHERE id=?2",
            params![at, id],
        )?;
        Ok(())
    }

    // ── Live match cache ─────────────────────────────────────────────────────

    pub fn upsert_live_entry(&self, entry: &LiveMatchCacheEntry) -> Result<()> {
        let events = serde_json::to_string(&entry.events).context("Failed to encode match events")?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO live_match_cache (fixture_id, home_score, away_score, status,
                                           minute, events, last_updated)
             VALUES (?1,?2,?3,?4,?5,?6,?7)
             ON CONFLICT(fixture_id) DO UPDATE SET
                home_score=excluded.home_score,
                away_score=excluded.away_score,
                status=excluded.status,
                minute=excluded.minute,
                events=excluded.events,
                last_updated=excluded.last_updated",
            params![
                entry.fixture_id,
                entry.home_score,
                entry.away_score,
                entry.status,
                entry.minute,
                events,
                entry.last_updated,
            ],
        )?;
        Ok(())
    }

    /// Delete cache rows in `status` last refreshed before `older_than`.
    pub fn delete_live_entries_before(
        &self,
        status: FixtureStatus,
        older_than: DateTime<Utc>,
    ) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM live_match_cache
             WHERE status=?1 AND julianday(last_updated) < julianday(?2)",
            params![status, older_than],
        )?;
        Ok(removed)
    }

    // ── Scoring queue ────────────────────────────────────────────────────────

    pub fn enqueue_scoring(
        &self,
        fixture_id: i64,
        outcome: MatchOutcome,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO scoring_queue (fixture_id, outcome, enqueued_at) VALUES (?1,?2,?3)",
            params![fixture_id, outcome.as_str(), at],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Jobs not yet picked up by the scoring subsystem, oldest first.
    pub fn pending_scoring_jobs(&self) -> Result<Vec<ScoringJob>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, fixture_id, outcome, enqueued_at FROM scoring_queue
             WHERE processed_at IS NULL ORDER BY id ASC",
        )?;
        let jobs = stmt
            .query_map([], |row| {
                Ok(ScoringJob {
                    id: row.get(0)?,
                    fixture_id: row.get(1)?,
                    outcome: row.get(2)?,
                    enqueued_at: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    // ── Squads ───────────────────────────────────────────────────────────────

    pub fn upsert_squad_player(
        &self,
        player: &SquadPlayer,
        team_id: Option<i64>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO squad_players (team_name, team_id, player_name, position,
                                        injured, injury_reason, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7)
             ON CONFLICT(team_name, player_name) DO UPDATE SET
                team_id=excluded.team_id,
                position=excluded.position,
                injured=excluded.injured,
                injury_reason=excluded.injury_reason,
                updated_at=excluded.updated_at",
            params![
                player.team_name,
                team_id,
                player.player_name,
                player.position,
                player.injured,
                player.injury_reason,
                at,
            ],
        )?;
        Ok(())
    }

    /// Clear the injury flag on players last refreshed before `refreshed_at`.
    ///
    /// Injury listings only name currently injured players, so anyone missing
    /// from the latest listing has recovered.
    pub fn clear_stale_injuries(&self, refreshed_at: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let cleared = conn.execute(
            "UPDATE squad_players SET injured=0, injury_reason=NULL
             WHERE injured=1 AND julianday(updated_at) < julianday(?1)",
            params![refreshed_at],
        )?;
        Ok(cleared)
    }

    pub fn count_injured_players(&self) -> Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM squad_players WHERE injured=1",
            [],
            |r| r.get(0),
        )?)
    }

    // ── API call ledger ──────────────────────────────────────────────────────

    pub fn record_api_call(
        &self,
        provider: &str,
        endpoint: &str,
        attempts: u32,
        succeeded: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO api_calls (provider, endpoint, attempts, succeeded, called_at)
             VALUES (?1,?2,?3,?4,?5)",
            params![provider, endpoint, attempts, succeeded, at],
        )?;
        Ok(())
    }

    /// Logical provider calls recorded at or after `since`.
    pub fn count_api_calls_since(&self, since: DateTime<Utc>) -> Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM api_calls WHERE julianday(called_at) >= julianday(?1)",
            params![since],
            |r| r.get(0),
        )?)
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

const FIXTURE_COLUMNS: &str = "id, external_id, gameweek_id, home_team_id, away_team_id,
     kickoff_at, status, home_score, away_score, updated_at";

fn map_team(row: &rusqlite::Row) -> rusqlite::Result<Team> {
    Ok(Team {
        id: row.get(0)?,
        external_id: row.get(1)?,
        name: row.get(2)?,
        short_name: row.get(3)?,
        tla: row.get(4)?,
        crest_url: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn map_gameweek(row: &rusqlite::Row) -> rusqlite::Result<Gameweek> {
    Ok(Gameweek {
        id: row.get(0)?,
        number: row.get(1)?,
        season: row.get(2)?,
        start_date: row.get(3)?,
        end_date: row.get(4)?,
        selection_opens: row.get(5)?,
        selection_deadline: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn map_fixture(row: &rusqlite::Row) -> rusqlite::Result<Fixture> {
    Ok(Fixture {
        id: row.get(0)?,
        external_id: row.get(1)?,
        gameweek_id: row.get(2)?,
        home_team_id: row.get(3)?,
        away_team_id: row.get(4)?,
        kickoff_at: row.get(5)?,
        status: row.get(6)?,
        home_score: row.get(7)?,
        away_score: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS teams (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id INTEGER NOT NULL UNIQUE,
    name        TEXT    NOT NULL,
    short_name  TEXT,
    tla         TEXT,
    crest_url   TEXT,
    updated_at  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS gameweeks (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    number             INTEGER NOT NULL UNIQUE,
    season             TEXT,
    start_date         TEXT    NOT NULL,
    end_date           TEXT    NOT NULL,
    selection_opens    TEXT    NOT NULL,
    selection_deadline TEXT    NOT NULL,
    updated_at         TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS fixtures (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id  INTEGER NOT NULL UNIQUE,
    gameweek_id  INTEGER NOT NULL,
    home_team_id INTEGER NOT NULL,
    away_team_id INTEGER NOT NULL,
    kickoff_at   TEXT    NOT NULL,
    status       TEXT    NOT NULL,
    home_score   INTEGER,
    away_score   INTEGER,
    updated_at   TEXT    NOT NULL,
    FOREIGN KEY (gameweek_id)  REFERENCES gameweeks(id),
    FOREIGN KEY (home_team_id) REFERENCES teams(id),
    FOREIGN KEY (away_team_id) REFERENCES teams(id)
);

CREATE TABLE IF NOT EXISTS live_match_cache (
    fixture_id   INTEGER PRIMARY KEY,
    home_score   INTEGER,
    away_score   INTEGER,
    status       TEXT    NOT NULL,
    minute       INTEGER,
    events       TEXT    NOT NULL DEFAULT '[]',
    last_updated TEXT    NOT NULL,
    FOREIGN KEY (fixture_id) REFERENCES fixtures(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS scoring_queue (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    fixture_id   INTEGER NOT NULL,
    outcome      TEXT    NOT NULL,
    enqueued_at  TEXT    NOT NULL,
    processed_at TEXT,
    FOREIGN KEY (fixture_id) REFERENCES fixtures(id)
);

CREATE TABLE IF NOT EXISTS squad_players (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    team_name     TEXT    NOT NULL,
    team_id       INTEGER,
    player_name   TEXT    NOT NULL,
    position      TEXT,
    injured       INTEGER NOT NULL DEFAULT 0,
    injury_reason TEXT,
    updated_at    TEXT    NOT NULL,
    UNIQUE (team_name, player_name)
);

CREATE TABLE IF NOT EXISTS api_calls (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    provider  TEXT    NOT NULL,
    endpoint  TEXT    NOT NULL,
    attempts  INTEGER NOT NULL,
    succeeded INTEGER NOT NULL,
    called_at TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_fixtures_status ON fixtures(status);
CREATE INDEX IF NOT EXISTS idx_fixtures_kickoff ON fixtures(kickoff_at);
CREATE INDEX IF NOT EXISTS idx_live_cache_status ON live_match_cache(status);
CREATE INDEX IF NOT EXISTS idx_api_calls_called_at ON api_calls(called_at);
"#;


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_upsert_fixture_is_keyed_by_external_id() {
        let db = memory_db();
        let now = Utc::now();
        let basics = seed_basics(&db, now);
        let first = seed_fixture(&db, basics, 500, now, FixtureStatus::Scheduled, now);
        let second = seed_fixture(&db, basics, 500, now, FixtureStatus::Timed, now);
        assert_eq!(first, second);

        let stored = db.find_fixture_by_external_id(500).unwrap().unwrap();
        assert_eq!(stored.status, FixtureStatus::Timed);
        assert!(db.find_fixture_by_external_id(501).unwrap().is_none());
    }

    #[test]
    fn test_find_fixtures_by_status_and_range() {
        let db = memory_db();
        let now = Utc::now();
        let basics = seed_basics(&db, now);
        seed_fixture(&db, basics, 1, now - Duration::hours(2), FixtureStatus::InPlay, now);
        seed_fixture(&db, basics, 2, now - Duration::hours(6), FixtureStatus::InPlay, now);
        seed_fixture(&db, basics, 3, now - Duration::hours(1), FixtureStatus::Finished, now);

        let live = db
            .find_fixtures(&FixtureFilter::statuses(&[FixtureStatus::InPlay]))
            .unwrap();
        assert_eq!(live.len(), 2);

        let recent = db
            .find_fixtures(
                &FixtureFilter::statuses(&[FixtureStatus::InPlay])
                    .kickoff_between(now - Duration::hours(3), now),
            )
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].external_id, 1);

        let any_recent = db
            .find_fixtures(&FixtureFilter::default().kickoff_between(now - Duration::hours(3), now))
            .unwrap();
        let ids: Vec<i64> = any_recent.iter().map(|f| f.external_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_updated_before_filter() {
        let db = memory_db();
        let now = Utc::now();
        let basics = seed_basics(&db, now);
        seed_fixture(&db, basics, 1, now, FixtureStatus::Finished, now - Duration::hours(1));
        seed_fixture(&db, basics, 2, now, FixtureStatus::Finished, now - Duration::minutes(1));

        let stale = db
            .find_fixtures(&FixtureFilter::default().updated_before(now - Duration::minutes(30)))
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].external_id, 1);
    }

    #[test]
    fn test_live_entry_roundtrip_and_cleanup() {
        let db = memory_db();
        let now = Utc::now();
        let basics = seed_basics(&db, now);
        let fixture_id = seed_fixture(&db, basics, 9, now, FixtureStatus::InPlay, now);

        let entry = LiveMatchCacheEntry {
            fixture_id,
            home_score: Some(1),
            away_score: Some(0),
            status: FixtureStatus::Finished,
            minute: Some(90),
            events: vec![MatchEvent {
                minute: Some(12),
                kind: "goal".into(),
                team_external_id: Some(57),
                player: Some("Saka".into()),
                detail: None,
            }],
            last_updated: now - Duration::hours(3),
        };
        db.upsert_live_entry(&entry).unwrap();
        assert_eq!(db.get_live_entry(fixture_id).unwrap(), Some(entry));

        let removed = db
            .delete_live_entries_before(FixtureStatus::Finished, now - Duration::hours(2))
            .unwrap();
        assert_eq!(removed, 1);
        assert!(db.get_live_entry(fixture_id).unwrap().is_none());
    }

    #[test]
    fn test_api_call_ledger_counts_since() {
        let db = memory_db();
        let now = Utc::now();
        db.record_api_call("football-data", "matches", 2, true, now - Duration::days(1))
            .unwrap();
        db.record_api_call("football-data", "matches", 1, true, now).unwrap();
        db.record_api_call("football-data", "teams", 3, false, now).unwrap();
        assert_eq!(db.count_api_calls_since(now - Duration::hours(1)).unwrap(), 2);
    }

    #[test]
    fn test_find_team_by_name_matches_short_name_and_tla() {
        let db = memory_db();
        let now = Utc::now();
        seed_basics(&db, now);
        assert_eq!(db.find_team_by_name("arsenal").unwrap().unwrap().external_id, 57);
        assert_eq!(db.find_team_by_name("CHE").unwrap().unwrap().external_id, 61);
        assert!(db.find_team_by_name("Everton").unwrap().is_none());
    }

    #[test]
    fn test_clear_stale_injuries_keeps_refreshed_players() {
        let db = memory_db();
        let now = Utc::now();
        let player = |name: &str| SquadPlayer {
            team_name: "Arsenal".into(),
            player_name: name.into(),
            position: None,
            injured: true,
            injury_reason: Some("Knock".into()),
        };
        db.upsert_squad_player(&player("Saka"), None, now - Duration::days(1)).unwrap();
        db.upsert_squad_player(&player("Timber"), None, now).unwrap();

        assert_eq!(db.clear_stale_injuries(now).unwrap(), 1);
        assert_eq!(db.count_injured_players().unwrap(), 1);
        assert_eq!(db.clear_stale_injuries(now).unwrap(), 0);
    }
}
