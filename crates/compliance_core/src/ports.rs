//! crates/compliance_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the backend data store and the payment processor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Company, PaymentTransaction, Subscription};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// The processor refused the request; the message is meant for the end user.
    #[error("{0}")]
    Processor(String),
    /// The processor no longer holds a valid payment mandate for the subscription.
    #[error("{0}")]
    MandateInvalid(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Payment Processor Wire Types
//=========================================================================================

/// Everything needed to open a new subscription with a tokenized card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSubscriptionRequest {
    pub plan_key: String,
    pub company_id: Uuid,
    pub card_token: String,
    pub payer_email: String,
}

/// The processor's answer to a creation request. `status` is the raw processor string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSubscription {
    pub subscription_id: String,
    pub status: String,
    pub external_plan_id: Option<String>,
}

/// A mutating request against an existing processor subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManageAction {
    ChangePlan { new_plan_key: String },
    ChangeCard { card_token: String },
    Cancel { reason: Option<String> },
    Reactivate,
}

impl ManageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManageAction::ChangePlan { .. } => "change_plan",
            ManageAction::ChangeCard { .. } => "change_card",
            ManageAction::Cancel { .. } => "cancel",
            ManageAction::Reactivate => "reactivate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ManageResponse {
    pub status: Option<String>,
}

/// The processor's authoritative view of a subscription. Fields the processor
/// omits are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessorSnapshot {
    pub status: String,
    pub plan_key: Option<String>,
    pub external_plan_id: Option<String>,
    pub next_billing_time: Option<DateTime<Utc>>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub payment_method_brand: Option<String>,
    pub card_last_four: Option<String>,
    pub failed_payments_count: Option<i32>,
    pub activated_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub suspended_at: Option<DateTime<Utc>>,
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Opens a subscription. Never retried: a second call may create a second
    /// billing relationship.
    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> PortResult<CreatedSubscription>;

    async fn manage_subscription(
        &self,
        external_subscription_id: &str,
        action: &ManageAction,
    ) -> PortResult<ManageResponse>;

    /// Read-only; never changes processor state.
    async fn get_subscription_status(
        &self,
        external_subscription_id: &str,
    ) -> PortResult<ProcessorSnapshot>;
}

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Companies ---
    async fn get_company(&self, company_id: Uuid) -> PortResult<Company>;

    async fn create_company(&self, company: &Company) -> PortResult<()>;

    async fn set_company_subscribed(&self, company_id: Uuid, is_subscribed: bool) -> PortResult<()>;

    // --- Subscriptions ---
    async fn get_subscription(&self, subscription_id: Uuid) -> PortResult<Subscription>;

    /// The most recently created subscription for a company, governing or not.
    async fn find_latest_subscription(&self, company_id: Uuid) -> PortResult<Option<Subscription>>;

    async fn insert_subscription(&self, subscription: &Subscription) -> PortResult<()>;

    async fn update_subscription(&self, subscription: &Subscription) -> PortResult<()>;

    // --- Payment Transactions (read-only) ---
    async fn list_transactions(&self, subscription_id: Uuid) -> PortResult<Vec<PaymentTransaction>>;
}
