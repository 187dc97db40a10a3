//! crates/compliance_core/src/expiration.rs
//!
//! Classifies dated records into compliance states. The result is derived on
//! every read and never stored.

use crate::dates::days_until;
use crate::domain::DatedRecord;
use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// Look-ahead, in days, inside which a record counts as expiring.
pub const DEFAULT_EXPIRING_THRESHOLD_DAYS: i64 = 30;

/// QR-tagged documents are valid for a fixed period from their extracted date.
pub const QR_DOCUMENT_VALIDITY_MONTHS: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationStatus {
    Valid,
    Expiring,
    Expired,
}

impl ExpirationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpirationStatus::Valid => "valid",
            ExpirationStatus::Expiring => "expiring",
            ExpirationStatus::Expired => "expired",
        }
    }
}

/// Classifies `expiration_date` as seen on `today`.
///
/// A record expiring today is already expired: the threshold only covers the
/// days strictly ahead.
pub fn classify(expiration_date: NaiveDate, today: NaiveDate, threshold_days: i64) -> ExpirationStatus {
    let days = days_until(expiration_date, today);
    if days < 1 {
        ExpirationStatus::Expired
    } else if days <= threshold_days {
        ExpirationStatus::Expiring
    } else {
        ExpirationStatus::Valid
    }
}

/// A configured threshold. Callers with stricter needs build their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationPolicy {
    pub threshold_days: i64,
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        Self {
            threshold_days: DEFAULT_EXPIRING_THRESHOLD_DAYS,
        }
    }
}

impl ExpirationPolicy {
    pub fn new(threshold_days: i64) -> Self {
        Self { threshold_days }
    }

    pub fn classify<R: DatedRecord + ?Sized>(&self, record: &R, today: NaiveDate) -> ExpirationStatus {
        classify(record.expiration_date(), today, self.threshold_days)
    }
}

/// Badge counts for a set of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationSummary {
    pub valid: usize,
    pub expiring: usize,
    pub expired: usize,
}

impl ExpirationSummary {
    pub fn total(&self) -> usize {
        self.valid + self.expiring + self.expired
    }

    fn add(&mut self, status: ExpirationStatus) {
        match status {
            ExpirationStatus::Valid => self.valid += 1,
            ExpirationStatus::Expiring => self.expiring += 1,
            ExpirationStatus::Expired => self.expired += 1,
        }
    }
}

pub fn summarize<'a, R, I>(records: I, today: NaiveDate, policy: ExpirationPolicy) -> ExpirationSummary
where
    R: DatedRecord + 'a,
    I: IntoIterator<Item = &'a R>,
{
    records
        .into_iter()
        .fold(ExpirationSummary::default(), |mut summary, record| {
            summary.add(policy.classify(record, today));
            summary
        })
}

//=========================================================================================
// QR Documents
//=========================================================================================

/// Expiration of a QR-tagged document: its extracted date plus
/// [`QR_DOCUMENT_VALIDITY_MONTHS`], clamped to the end of a shorter month
/// (29 Feb extracts expire 28 Feb the following year).
///
/// This is a separate rule from the threshold classifier and is kept apart from it;
/// the resulting date is then classified like any other record.
pub fn qr_document_expiration(extracted_date: NaiveDate) -> Option<NaiveDate> {
    extracted_date.checked_add_months(Months::new(QR_DOCUMENT_VALIDITY_MONTHS))
}
