//! crates/compliance_core/src/notification.rs
//!
//! Decides whether a dated record should produce a reminder. The window is
//! configured separately from the status-badge threshold in `expiration`.

use crate::dates::days_until;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const DEFAULT_NOTIFICATION_WINDOW_DAYS: i64 = 30;

/// The reminder category a record falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ExpirationWarning,
    Expired,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ExpirationWarning => "expiration_warning",
            NotificationKind::Expired => "expired",
        }
    }
}

/// True iff the record expires strictly after today and no later than
/// `window_days` from now. Records expiring today or earlier are excluded.
pub fn is_within_window(expiration_date: NaiveDate, today: NaiveDate, window_days: i64) -> bool {
    let days = days_until(expiration_date, today);
    days > 0 && days <= window_days
}

pub fn notification_kind(
    expiration_date: NaiveDate,
    today: NaiveDate,
    window_days: i64,
) -> Option<NotificationKind> {
    if days_until(expiration_date, today) < 1 {
        Some(NotificationKind::Expired)
    } else if is_within_window(expiration_date, today, window_days) {
        Some(NotificationKind::ExpirationWarning)
    } else {
        None
    }
}
