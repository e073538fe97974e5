//! Daily poll planning under the provider call budget.
//!
//! Each upcoming fixture proposes result checks 105 and 135 minutes after
//! kickoff. One call returns every fixture of the day, so identical instants
//! are merged. Whatever the daily full sync does not already spend is the
//! number of slots; the earliest instants win.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use tracing::info;

use crate::db::models::{Fixture, FixtureStatus};
use crate::db::{Database, FixtureFilter};

const LOOKAHEAD_HOURS: i64 = 48;
const POLL_OFFSETS_MINUTES: [i64; 2] = [105, 135];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPoll {
    pub at: DateTime<Utc>,
    /// Provider IDs of the fixtures this poll is for
    pub fixture_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct DailyPlan {
    /// Kept polls, earliest first
    pub polls: Vec<PlannedPoll>,
    /// Distinct instants proposed before the budget cut
    pub candidates: usize,
    pub slots: usize,
}

impl DailyPlan {
    pub fn dropped(&self) -> usize {
        self.candidates - self.polls.len()
    }

    /// Calls the day is projected to spend, full sync included.
    pub fn projected_calls(&self, fixed_daily_calls: u32) -> usize {
        self.polls.len() + fixed_daily_calls as usize
    }
}

/// Build the plan from an explicit fixture list.
pub fn plan_polls(
    fixtures: &[Fixture],
    now: DateTime<Utc>,
    daily_budget: u32,
    fixed_daily_calls: u32,
) -> DailyPlan {
    let horizon = now + Duration::hours(LOOKAHEAD_HOURS);
    let mut by_instant: BTreeMap<DateTime<Utc>, Vec<i64>> = BTreeMap::new();

    for fixture in fixtures {
        if fixture.status.is_terminal() || fixture.kickoff_at > horizon {
            continue;
        }
        for offset in POLL_OFFSETS_MINUTES {
            let at = fixture.kickoff_at + Duration::minutes(offset);
            if at > now {
                by_instant.entry(at).or_default().push(fixture.external_id);
            }
        }
    }

    let candidates = by_instant.len();
    let slots = daily_budget.saturating_sub(fixed_daily_calls) as usize;

    // BTreeMap iterates in time order
    let polls: Vec<PlannedPoll> = by_instant
        .into_iter()
        .take(slots)
        .map(|(at, fixture_ids)| PlannedPoll { at, fixture_ids })
        .collect();

    let plan = DailyPlan {
        polls,
        candidates,
        slots,
    };
    if plan.dropped() > 0 {
        info!(
            "Daily plan trimmed from {} to {} poll(s) to stay within budget {} ({} fixed)",
            plan.candidates,
            plan.polls.len(),
            daily_budget,
            fixed_daily_calls
        );
    }
    plan
}

/// Build the plan from the fixture store.
pub fn plan_from_store(
    db: &Database,
    now: DateTime<Utc>,
    daily_budget: u32,
    fixed_daily_calls: u32,
) -> Result<DailyPlan> {
    let latest_offset = POLL_OFFSETS_MINUTES.iter().copied().max().unwrap_or_default();
    let fixtures = db.find_fixtures(
        &FixtureFilter::statuses(&[
            FixtureStatus::Scheduled,
            FixtureStatus::Timed,
            FixtureStatus::InPlay,
            FixtureStatus::Paused,
            FixtureStatus::Suspended,
        ])
        .kickoff_between(
            now - Duration::minutes(latest_offset),
            now + Duration::hours(LOOKAHEAD_HOURS),
        ),
    )?;
    Ok(plan_polls(&fixtures, now, daily_budget, fixed_daily_calls))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 17, 8, 0, 0).unwrap()
    }

    fn fixture(external_id: i64, kickoff_at: DateTime<Utc>, status: FixtureStatus) -> Fixture {
        Fixture {
            id: Some(external_id),
            external_id,
            gameweek_id: 1,
            home_team_id: 1,
            away_team_id: 2,
            kickoff_at,
            status,
            home_score: None,
            away_score: None,
            updated_at: now(),
        }
    }

    #[test]
    fn test_budget_keeps_earliest_candidates() {
        // 8 fixtures three hours apart: 16 distinct candidate instants
        let fixtures: Vec<Fixture> = (0..8)
            .map(|i| fixture(i, now() + Duration::hours(1 + 3 * i), FixtureStatus::Timed))
            .collect();
        let plan = plan_polls(&fixtures, now(), 10, 3);

        assert_eq!(plan.candidates, 16);
        assert_eq!(plan.slots, 7);
        assert_eq!(plan.polls.len(), 7);
        assert_eq!(plan.dropped(), 9);

        let mut all: Vec<DateTime<Utc>> = fixtures
            .iter()
            .flat_map(|f| {
                [
                    f.kickoff_at + Duration::minutes(105),
                    f.kickoff_at + Duration::minutes(135),
                ]
            })
            .collect();
        all.sort();
        let kept: Vec<DateTime<Utc>> = plan.polls.iter().map(|p| p.at).collect();
        assert_eq!(kept, all[..7].to_vec());
    }

    #[test]
    fn test_simultaneous_kickoffs_share_a_poll() {
        let kickoff = now() + Duration::hours(7);
        let fixtures = vec![
            fixture(1, kickoff, FixtureStatus::Timed),
            fixture(2, kickoff, FixtureStatus::Timed),
            fixture(3, kickoff, FixtureStatus::Scheduled),
        ];
        let plan = plan_polls(&fixtures, now(), 10, 3);
        assert_eq!(plan.candidates, 2);
        assert_eq!(plan.polls[0].fixture_ids, vec![1, 2, 3]);
        assert_eq!(plan.projected_calls(3), 5);
    }

    #[test]
    fn test_terminal_far_and_past_instants_skipped() {
        let fixtures = vec![
            fixture(1, now() + Duration::hours(2), FixtureStatus::Postponed),
            fixture(2, now() + Duration::hours(60), FixtureStatus::Timed),
            // In play: +105 already passed, +135 still ahead
            fixture(3, now() - Duration::minutes(120), FixtureStatus::InPlay),
        ];
        let plan = plan_polls(&fixtures, now(), 10, 3);
        assert_eq!(plan.polls.len(), 1);
        assert_eq!(plan.polls[0].at, now() + Duration::minutes(15));
    }

    #[test]
    fn test_budget_below_fixed_cost_leaves_no_slots() {
        let fixtures = vec![fixture(1, now() + Duration::hours(2), FixtureStatus::Timed)];
        let plan = plan_polls(&fixtures, now(), 2, 3);
        assert_eq!(plan.slots, 0);
        assert!(plan.polls.is_empty());
    }

    #[test]
    fn test_plan_from_store() {
        use crate::db::test_support::*;
        let db = memory_db();
        let basics = seed_basics(&db, now());
        seed_fixture(&db, basics, 1, now() + Duration::hours(4), FixtureStatus::Timed, now());
        seed_fixture(&db, basics, 2, now() + Duration::hours(4), FixtureStatus::Cancelled, now());
        let plan = plan_from_store(&db, now(), 10, 3).unwrap();
        assert_eq!(plan.polls.len(), 2);
        assert_eq!(plan.polls[0].fixture_ids, vec![1]);
    }
}
