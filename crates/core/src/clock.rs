//! Source of "now" for day-partitioned bookkeeping and mail timestamps.

use std::sync::Mutex;

use chrono::{Days, Local, NaiveDate, NaiveDateTime, NaiveTime};

/// Local wall-clock time. The ledger day and the time shown in mails both
/// come from the same clock, so they never disagree.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock pinned to a given instant until moved.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    /// Pinned to midnight at the start of `date`.
    pub fn new(date: NaiveDate) -> Self {
        Self::at(date.and_time(NaiveTime::MIN))
    }

    pub fn at(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Move the pinned instant forward by `days`.
    pub fn advance_days(&self, days: u64) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(next) = guard.checked_add_days(Days::new(days)) {
            *guard = next;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
