//! When each tier is due
//!
//! The engine is meant to be invoked once an hour by an external scheduler
//! (cron, a systemd timer, Task Scheduler). Every invocation takes an hourly
//! snapshot; the daily and weekly snapshots are taken by the invocation that
//! lands in the last minutes of the day, and of the week's chosen day.

use crate::types::Tier;
use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Timelike, Weekday};

/// Set of tiers due in one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DueTiers {
    /// Hourly snapshot due
    pub hourly: bool,
    /// Daily snapshot due
    pub daily: bool,
    /// Weekly snapshot due
    pub weekly: bool,
}

impl DueTiers {
    /// Every tier due
    pub fn all() -> Self {
        Self::from_tiers(&Tier::ALL)
    }

    /// Exactly the given tiers due
    pub fn from_tiers(tiers: &[Tier]) -> Self {
        let mut due = Self::default();
        for tier in tiers {
            match tier {
                Tier::Hourly => due.hourly = true,
                Tier::Daily => due.daily = true,
                Tier::Weekly => due.weekly = true,
            }
        }
        due
    }

    /// Whether `tier` is due
    pub fn contains(&self, tier: Tier) -> bool {
        match tier {
            Tier::Hourly => self.hourly,
            Tier::Daily => self.daily,
            Tier::Weekly => self.weekly,
        }
    }

    /// Due tiers in cadence order
    pub fn tiers(&self) -> Vec<Tier> {
        Tier::ALL.into_iter().filter(|t| self.contains(*t)).collect()
    }

    /// Whether no tier is due
    pub fn is_empty(&self) -> bool {
        !(self.hourly || self.daily || self.weekly)
    }
}

/// Time-of-day windows for the daily and weekly tiers
///
/// A window opens at its configured time and lasts until the end of that
/// hour, so with the defaults the 23:59 run takes the daily snapshot and a
/// Sunday run between 23:55 and 23:59 takes the weekly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Start of the daily window
    pub daily_at: NaiveTime,
    /// Day of the weekly snapshot
    pub weekly_day: Weekday,
    /// Start of the weekly window on `weekly_day`
    pub weekly_at: NaiveTime,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            daily_at: NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN),
            weekly_day: Weekday::Sun,
            weekly_at: NaiveTime::from_hms_opt(23, 55, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl Schedule {
    /// Tiers due at `now`
    pub fn due_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DueTiers {
        DueTiers {
            hourly: true,
            daily: in_window(now, self.daily_at),
            weekly: now.weekday() == self.weekly_day && in_window(now, self.weekly_at),
        }
    }
}

fn in_window<Tz: TimeZone>(now: &DateTime<Tz>, start: NaiveTime) -> bool {
    now.hour() == start.hour() && now.minute() >= start.minute()
}
