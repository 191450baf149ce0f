use chrono::offset::LocalResult;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Weekday};
use chrono_tz::Tz;
use core_types::{Plan, PlanFrequency};

use crate::error::SchedulerError;

/// Identity of one timer. A monthly plan with several configured days owns
/// one timer per day, so the day participates in the key; editing the plan's
/// day set then cancels exactly the timers that disappeared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub plan_id: i64,
    pub month_day: Option<u32>,
}

/// A plan's recurrence rule, reduced to pure date math.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    Daily,
    Weekly(Weekday),
    /// Fires on this calendar day of each month. Months without the day are
    /// skipped entirely (day 31 in April, day 30 in February).
    Monthly(u32),
}

/// Parses the stored `HH:MM` fire time.
pub fn parse_fire_time(raw: &str) -> Result<NaiveTime, SchedulerError> {
    let invalid = || SchedulerError::InvalidFireTime(raw.to_string());
    let (h, m) = raw.split_once(':').ok_or_else(invalid)?;
    let hour: u32 = h.parse().map_err(|_| invalid())?;
    let minute: u32 = m.parse().map_err(|_| invalid())?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)
}

/// Resolves a local wall-clock instant in `tz`. Ambiguous times (fall-back)
/// take the earlier offset; nonexistent times (spring-forward gap) are pushed
/// one hour past the gap.
fn resolve_local(tz: Tz, date: NaiveDate, at: NaiveTime) -> Option<DateTime<Tz>> {
    let naive = date.and_time(at);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earlier, _) => Some(earlier),
        LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest(),
    }
}

impl Recurrence {
    fn matches(&self, date: NaiveDate) -> bool {
        match self {
            Recurrence::Daily => true,
            Recurrence::Weekly(weekday) => date.weekday() == *weekday,
            Recurrence::Monthly(day) => date.day() == *day,
        }
    }

    /// The first fire instant strictly after `after`.
    pub fn next_fire_after(&self, after: DateTime<Tz>, at: NaiveTime) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let mut date = after.date_naive();
        // Day 31 recurs within two months at worst; 800 days is a safe bound.
        for _ in 0..800 {
            if self.matches(date) {
                if let Some(fire) = resolve_local(tz, date, at) {
                    if fire > after {
                        return Some(fire);
                    }
                }
            }
            date = date.succ_opt()?;
        }
        None
    }

    /// The most recent fire instant at or before `now`, used to detect
    /// misfires when a plan is (re)synced.
    pub fn last_fire_at_or_before(&self, now: DateTime<Tz>, at: NaiveTime) -> Option<DateTime<Tz>> {
        let tz = now.timezone();
        let mut date = now.date_naive();
        for _ in 0..800 {
            if self.matches(date) {
                if let Some(fire) = resolve_local(tz, date, at) {
                    if fire <= now {
                        return Some(fire);
                    }
                }
            }
            date = date.pred_opt()?;
        }
        None
    }
}

/// Expands a plan into its timers. Weekly plans need `day_of_week` (0 =
/// Monday); a monthly plan with an absent or unreadable `month_days` set
/// schedules the first of the month.
pub fn triggers_for_plan(plan: &Plan) -> Result<Vec<(TimerKey, Recurrence)>, SchedulerError> {
    let key = |month_day| TimerKey {
        plan_id: plan.id,
        month_day,
    };
    match plan.frequency {
        PlanFrequency::Daily => Ok(vec![(key(None), Recurrence::Daily)]),
        PlanFrequency::Weekly => {
            let day = plan
                .day_of_week
                .ok_or_else(|| SchedulerError::InvalidPlan(plan.id, "missing day_of_week".to_string()))?;
            let weekday = Weekday::try_from(day)
                .map_err(|_| SchedulerError::InvalidPlan(plan.id, format!("day_of_week {day} out of range")))?;
            Ok(vec![(key(None), Recurrence::Weekly(weekday))])
        }
        PlanFrequency::Monthly => {
            let mut days = plan.parsed_month_days();
            if days.is_empty() {
                days = vec![1];
            }
            Ok(days
                .into_iter()
                .map(|d| (key(Some(d)), Recurrence::Monthly(d)))
                .collect())
        }
    }
}
