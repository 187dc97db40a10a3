//! crates/compliance_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or wire format; adapters map
//! their own records into these types.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//=========================================================================================
// Dated Records
//=========================================================================================

/// Any entity carrying a civil expiration date (certificates, inspection systems,
/// extinguisher controls, QR documents).
pub trait DatedRecord {
    fn expiration_date(&self) -> NaiveDate;
}

impl DatedRecord for NaiveDate {
    fn expiration_date(&self) -> NaiveDate {
        *self
    }
}

//=========================================================================================
// Company
//=========================================================================================

/// The trial-relevant view of a company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub is_subscribed: bool,
    /// Inert once `is_subscribed` is true; never cleared.
    pub trial_ends_at: Option<DateTime<Utc>>,
}

//=========================================================================================
// Subscription
//=========================================================================================

/// The closed set of subscription states. Processor strings are mapped into this
/// enum at the boundary and unknown values are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    ApprovalPending,
    Active,
    Suspended,
    Cancelled,
    Expired,
}

/// Returned when a processor reports a status outside [`SubscriptionStatus`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized subscription status '{0}'")]
pub struct UnrecognizedStatus(pub String);

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::ApprovalPending => "approval_pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Suspended => "suspended",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    /// Maps a processor or database status string. Case-insensitive; accepts the
    /// American `canceled` spelling some processors emit.
    pub fn parse(raw: &str) -> Result<Self, UnrecognizedStatus> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(SubscriptionStatus::Pending),
            "approval_pending" => Ok(SubscriptionStatus::ApprovalPending),
            "active" => Ok(SubscriptionStatus::Active),
            "suspended" => Ok(SubscriptionStatus::Suspended),
            "cancelled" | "canceled" => Ok(SubscriptionStatus::Cancelled),
            "expired" => Ok(SubscriptionStatus::Expired),
            _ => Err(UnrecognizedStatus(raw.to_string())),
        }
    }

    /// A governing subscription blocks creation of a new one for the same company.
    pub fn is_governing(&self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Cancelled | SubscriptionStatus::Expired
        )
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single current billing relationship for a company.
///
/// Temporal fields are populated only once the corresponding transition has been
/// observed through a sync with the processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub company_id: Uuid,
    /// Set once the processor confirms creation.
    pub external_subscription_id: Option<String>,
    pub external_plan_id: Option<String>,
    pub plan_key: String,
    pub plan_name: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub next_billing_time: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub suspended_at: Option<DateTime<Utc>>,
    /// Written only by sync.
    pub failed_payments_count: i32,
    pub payment_method_brand: Option<String>,
    pub card_last_four: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_governing(&self) -> bool {
        self.status.is_governing()
    }

    /// A cancelled subscription keeps product access until the end of the paid period.
    pub fn access_retained_until(&self) -> Option<DateTime<Utc>> {
        match self.status {
            SubscriptionStatus::Cancelled => self.next_billing_time,
            _ => None,
        }
    }

    /// Whether the owning company should count as subscribed at `now`. `None` while
    /// the status says nothing either way (pending, approval pending or suspended).
    pub fn grants_access(&self, now: DateTime<Utc>) -> Option<bool> {
        match self.status {
            SubscriptionStatus::Active => Some(true),
            SubscriptionStatus::Cancelled => {
                Some(self.next_billing_time.is_some_and(|until| now < until))
            }
            SubscriptionStatus::Expired => Some(false),
            SubscriptionStatus::Pending
            | SubscriptionStatus::ApprovalPending
            | SubscriptionStatus::Suspended => None,
        }
    }
}

//=========================================================================================
// Payment Transactions
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Completed,
    Pending,
    Refunded,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "completed",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Refunded => "refunded",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "completed" => Some(TransactionStatus::Completed),
            "pending" => Some(TransactionStatus::Pending),
            "refunded" => Some(TransactionStatus::Refunded),
            "failed" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }
}

/// An append-only charge record written by the processor side. Read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub external_transaction_id: Option<String>,
    pub gross_amount: Decimal,
    pub fee_amount: Decimal,
    pub net_amount: Decimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub paid_at: Option<DateTime<Utc>>,
}
