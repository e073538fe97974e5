//! Decides, from locally stored fixtures only, whether spending a provider
//! call right now is worthwhile. No network access happens here.

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use std::fmt;

use crate::db::models::FixtureStatus;
use crate::db::{Database, FixtureFilter};

/// Kickoffs this far back may still be missing their final result.
const MISSED_RESULT_FROM: i64 = 5 * 60;
const MISSED_RESULT_UNTIL: i64 = 60;
/// A fixture refreshed more recently than this is not a missed result.
const MISSED_RESULT_RECHECK: i64 = 30;
/// Kicked off within this window and not yet terminal.
const RECENT_KICKOFF: i64 = 3 * 60;
/// Upcoming kickoffs worth a pre-match status check.
const PRE_KICKOFF: i64 = 15;
/// Window around the expected full-time whistle.
const FULL_TIME_FROM: i64 = 90;
const FULL_TIME_UNTIL: i64 = 10;

const NON_TERMINAL: [FixtureStatus; 5] = [
    FixtureStatus::Scheduled,
    FixtureStatus::Timed,
    FixtureStatus::InPlay,
    FixtureStatus::Paused,
    FixtureStatus::Suspended,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowReason {
    /// Kicked off 1–5h ago, in play or finished, not refreshed for 30 min
    MissedResult,
    /// Something is in play or at half time right now
    LiveNow,
    /// Kicked off within 3h and not yet finished/cancelled/postponed
    RecentKickoff,
    /// Kicks off within 15 min
    PreKickoff,
    /// Expected to reach full time soon
    ApproachingFullTime,
    /// Weekend with a fixture still to be completed today
    WeekendMatchday,
}

impl fmt::Display for WindowReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WindowReason::MissedResult => "possible missed result",
            WindowReason::LiveNow => "match in play",
            WindowReason::RecentKickoff => "recent kickoff not yet final",
            WindowReason::PreKickoff => "kickoff within 15 minutes",
            WindowReason::ApproachingFullTime => "approaching full time",
            WindowReason::WeekendMatchday => "weekend matchday",
        };
        f.write_str(s)
    }
}

/// Every rule that fired, with the fixtures that triggered it.
#[derive(Debug, Clone, Default)]
pub struct WindowDecision {
    pub reasons: Vec<(WindowReason, Vec<i64>)>,
}

impl WindowDecision {
    pub fn should_poll(&self) -> bool {
        !self.reasons.is_empty()
    }

    fn check(&mut self, reason: WindowReason, fixture_ids: Vec<i64>) {
        if !fixture_ids.is_empty() {
            self.reasons.push((reason, fixture_ids));
        }
    }
}

/// Evaluate every window rule against `now`.
pub fn evaluate(db: &Database, now: DateTime<Utc>) -> Result<WindowDecision> {
    let minutes = Duration::minutes;
    let ids = |filter: FixtureFilter| -> Result<Vec<i64>> {
        Ok(db
            .find_fixtures(&filter)?
            .into_iter()
            .map(|f| f.external_id)
            .collect())
    };

    let mut decision = WindowDecision::default();

    decision.check(
        WindowReason::MissedResult,
        ids(FixtureFilter::statuses(&[
            FixtureStatus::InPlay,
            FixtureStatus::Paused,
            FixtureStatus::Finished,
        ])
        .kickoff_between(now - minutes(MISSED_RESULT_FROM), now - minutes(MISSED_RESULT_UNTIL))
        .updated_before(now - minutes(MISSED_RESULT_RECHECK)))?,
    );

    decision.check(
        WindowReason::LiveNow,
        ids(FixtureFilter::statuses(&[FixtureStatus::InPlay, FixtureStatus::Paused]))?,
    );

    decision.check(
        WindowReason::RecentKickoff,
        ids(FixtureFilter::statuses(&NON_TERMINAL)
            .kickoff_between(now - minutes(RECENT_KICKOFF), now))?,
    );

    decision.check(
        WindowReason::PreKickoff,
        ids(FixtureFilter::statuses(&[FixtureStatus::Scheduled, FixtureStatus::Timed])
            .kickoff_between(now, now + minutes(PRE_KICKOFF)))?,
    );

    decision.check(
        WindowReason::ApproachingFullTime,
        ids(FixtureFilter::statuses(&[
            FixtureStatus::Timed,
            FixtureStatus::InPlay,
            FixtureStatus::Paused,
        ])
        .kickoff_between(now - minutes(FULL_TIME_FROM), now + minutes(FULL_TIME_UNTIL)))?,
    );

    if is_weekend(now) {
        decision.check(
            WindowReason::WeekendMatchday,
            ids(FixtureFilter::statuses(&NON_TERMINAL).kickoff_on(now.date_naive()))?,
        );
    }

    Ok(decision)
}

fn is_weekend(now: DateTime<Utc>) -> bool {
    matches!(now.weekday(), Weekday::Sat | Weekday::Sun)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::*;
    use chrono::TimeZone;

    /// A Wednesday, so the weekend rule stays quiet unless asked for.
    fn midweek() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 21, 20, 0, 0).unwrap()
    }

    fn saturday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 17, 9, 0, 0).unwrap()
    }

    fn has(decision: &WindowDecision, reason: WindowReason) -> bool {
        decision.reasons.iter().any(|(r, _)| *r == reason)
    }

    #[test]
    fn test_empty_store_never_polls() {
        let db = memory_db();
        assert!(!evaluate(&db, midweek()).unwrap().should_poll());
    }

    #[test]
    fn test_in_play_fixture_always_polls() {
        let db = memory_db();
        let now = midweek();
        let basics = seed_basics(&db, now);
        // Kickoff far outside every time window
        seed_fixture(&db, basics, 1, now - Duration::days(2), FixtureStatus::InPlay, now);
        let decision = evaluate(&db, now).unwrap();
        assert!(decision.should_poll());
        assert!(has(&decision, WindowReason::LiveNow));
    }

    #[test]
    fn test_recently_refreshed_finished_fixture_does_not_poll() {
        let db = memory_db();
        let now = midweek();
        let basics = seed_basics(&db, now);
        seed_fixture(
            &db,
            basics,
            1,
            now - Duration::hours(2),
            FixtureStatus::Finished,
            now - Duration::minutes(1),
        );
        assert!(!evaluate(&db, now).unwrap().should_poll());
    }

    #[test]
    fn test_finished_fixture_not_refreshed_is_missed_result() {
        let db = memory_db();
        let now = midweek();
        let basics = seed_basics(&db, now);
        seed_fixture(
            &db,
            basics,
            1,
            now - Duration::hours(2),
            FixtureStatus::Finished,
            now - Duration::minutes(45),
        );
        let decision = evaluate(&db, now).unwrap();
        assert!(has(&decision, WindowReason::MissedResult));
        assert_eq!(decision.reasons.len(), 1);
    }

    #[test]
    fn test_recent_kickoff_still_timed() {
        let db = memory_db();
        let now = midweek();
        let basics = seed_basics(&db, now);
        seed_fixture(&db, basics, 1, now - Duration::minutes(150), FixtureStatus::Timed, now);
        let decision = evaluate(&db, now).unwrap();
        assert!(has(&decision, WindowReason::RecentKickoff));
        assert!(!has(&decision, WindowReason::ApproachingFullTime));
    }

    #[test]
    fn test_pre_kickoff_window() {
        let db = memory_db();
        let now = midweek();
        let basics = seed_basics(&db, now);
        seed_fixture(&db, basics, 1, now + Duration::minutes(10), FixtureStatus::Timed, now);
        seed_fixture(&db, basics, 2, now + Duration::minutes(40), FixtureStatus::Scheduled, now);
        let decision = evaluate(&db, now).unwrap();
        assert!(has(&decision, WindowReason::PreKickoff));
        assert!(has(&decision, WindowReason::ApproachingFullTime));
        let pre = decision
            .reasons
            .iter()
            .find(|(r, _)| *r == WindowReason::PreKickoff)
            .unwrap();
        assert_eq!(pre.1, vec![1]);
    }

    #[test]
    fn test_postponed_fixture_ignored() {
        let db = memory_db();
        let now = midweek();
        let basics = seed_basics(&db, now);
        seed_fixture(&db, basics, 1, now - Duration::minutes(30), FixtureStatus::Postponed, now);
        assert!(!evaluate(&db, now).unwrap().should_poll());
    }

    #[test]
    fn test_weekend_with_fixture_later_today() {
        let db = memory_db();
        let now = saturday();
        let basics = seed_basics(&db, now);
        seed_fixture(&db, basics, 1, now + Duration::hours(6), FixtureStatus::Timed, now);
        let decision = evaluate(&db, now).unwrap();
        assert!(decision.should_poll());
        assert!(has(&decision, WindowReason::WeekendMatchday));

        // Same fixture on a weekday morning is not worth a call
        let weekday = memory_db();
        let now = midweek() - Duration::hours(11);
        let basics = seed_basics(&weekday, now);
        seed_fixture(&weekday, basics, 1, now + Duration::hours(6), FixtureStatus::Timed, now);
        assert!(!evaluate(&weekday, now).unwrap().should_poll());
    }
}
