//! crates/compliance_core/src/trial.rs
//!
//! The access gate. `has_access` is the single check protected functionality goes
//! through; it must be evaluated per request since trials expire against the wall clock.

use crate::domain::Company;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TRIAL_DAYS: i64 = 14;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Active,
    Expired,
    /// Not governed by a trial: subscribed, or never granted one.
    None,
}

pub fn trial_status(company: Option<&Company>, now: DateTime<Utc>) -> TrialStatus {
    let Some(company) = company else {
        return TrialStatus::None;
    };
    if company.is_subscribed {
        return TrialStatus::None;
    }
    match company.trial_ends_at {
        None => TrialStatus::None,
        Some(ends_at) if now < ends_at => TrialStatus::Active,
        Some(_) => TrialStatus::Expired,
    }
}

/// Whole days left in an active trial, rounded up; zero otherwise.
pub fn days_remaining(company: Option<&Company>, now: DateTime<Utc>) -> i64 {
    if trial_status(company, now) != TrialStatus::Active {
        return 0;
    }
    let Some(ends_at) = company.and_then(|c| c.trial_ends_at) else {
        return 0;
    };
    let millis = (ends_at - now).num_milliseconds();
    // ceil for a positive numerator
    (millis + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY
}

pub fn has_access(company: Option<&Company>, now: DateTime<Utc>) -> bool {
    company.is_some_and(|c| c.is_subscribed) || trial_status(company, now) == TrialStatus::Active
}

/// End of a trial granted at `start`, or `None` when it falls outside the
/// representable range.
pub fn trial_end_for(start: DateTime<Utc>, trial_days: i64) -> Option<DateTime<Utc>> {
    Duration::try_days(trial_days).and_then(|length| start.checked_add_signed(length))
}

/// Everything the client needs to render the trial banner and gate screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub trial_status: TrialStatus,
    pub days_remaining: i64,
    pub has_access: bool,
    pub trial_ends_at: Option<DateTime<Utc>>,
}

impl AccessDecision {
    pub fn evaluate(company: Option<&Company>, now: DateTime<Utc>) -> Self {
        Self {
            trial_status: trial_status(company, now),
            days_remaining: days_remaining(company, now),
            has_access: has_access(company, now),
            trial_ends_at: company.and_then(|c| c.trial_ends_at),
        }
    }
}
