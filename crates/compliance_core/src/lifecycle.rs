//! crates/compliance_core/src/lifecycle.rs
//!
//! Orchestrates the subscription state machine against the payment processor.
//!
//! Local status is never flipped on the strength of a request having been sent.
//! Every dispatched transition is followed by a sync, and only the sync writes
//! what the processor reports.

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::{PaymentTransaction, Subscription, SubscriptionStatus, UnrecognizedStatus};
use crate::plans::{classify_plan_change, PlanCatalog, PlanChange};
use crate::ports::{
    CreateSubscriptionRequest, DatabaseService, ManageAction, PaymentProcessor, PortError,
    ProcessorSnapshot,
};

//=========================================================================================
// Errors and Outcomes
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Create,
    ChangePlan,
    ChangeCard,
    Cancel,
    Reactivate,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Create => "create",
            Transition::ChangePlan => "change_plan",
            Transition::ChangeCard => "change_card",
            Transition::Cancel => "cancel",
            Transition::Reactivate => "reactivate",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Unknown plan '{0}'")]
    UnknownPlan(String),
    #[error("Subscription {0} has no processor id yet")]
    MissingExternalId(Uuid),
    #[error("Cannot {transition} a subscription that is {status}")]
    InvalidState {
        transition: Transition,
        status: SubscriptionStatus,
    },
    #[error("Company already has a {0} subscription")]
    AlreadySubscribed(SubscriptionStatus),
    #[error("Another change to {0} is still in progress")]
    TransitionInFlight(Uuid),
    #[error("Not found: {0}")]
    NotFound(String),
    /// Processor refusal, passed through verbatim.
    #[error("{0}")]
    Processor(String),
    #[error("{0}. Start a new subscription instead")]
    MandateInvalid(String),
    #[error("Processor reported an {0}")]
    UnrecognizedStatus(#[from] UnrecognizedStatus),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<PortError> for LifecycleError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(what) => LifecycleError::NotFound(what),
            PortError::Processor(msg) => LifecycleError::Processor(msg),
            PortError::MandateInvalid(msg) => LifecycleError::MandateInvalid(msg),
            PortError::Unexpected(msg) => LifecycleError::Storage(msg),
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// What a settled transition left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub transition: Transition,
    /// The local copy after the follow-up sync.
    pub subscription: Subscription,
    /// False for idempotent no-ops that never reached the processor.
    pub applied: bool,
    /// False when the follow-up sync failed; `subscription` is then the last known copy.
    pub synced: bool,
    pub plan_change: Option<PlanChange>,
    /// When a deferred change takes effect.
    pub effective_at: Option<DateTime<Utc>>,
}

impl TransitionOutcome {
    fn new(transition: Transition, subscription: Subscription, synced: bool) -> Self {
        Self {
            transition,
            subscription,
            applied: true,
            synced,
            plan_change: None,
            effective_at: None,
        }
    }
}

/// Input to [`SubscriptionManager::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubscription {
    pub company_id: Uuid,
    pub plan_key: String,
    pub card_token: String,
    pub payer_email: String,
}

//=========================================================================================
// In-flight Guard
//=========================================================================================

/// Marks a key busy until dropped, so early returns and failures release it.
struct InFlight<'a> {
    keys: &'a DashSet<Uuid>,
    key: Uuid,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.keys.remove(&self.key);
    }
}

//=========================================================================================
// The Manager
//=========================================================================================

/// Drives subscription transitions. One instance is shared by every entry point so
/// the per-subscription in-flight guard covers all of them.
pub struct SubscriptionManager {
    processor: Arc<dyn PaymentProcessor>,
    db: Arc<dyn DatabaseService>,
    catalog: Arc<PlanCatalog>,
    clock: Arc<dyn Clock>,
    in_flight: DashSet<Uuid>,
}

impl SubscriptionManager {
    pub fn new(
        processor: Arc<dyn PaymentProcessor>,
        db: Arc<dyn DatabaseService>,
        catalog: Arc<PlanCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            processor,
            db,
            catalog,
            clock,
            in_flight: DashSet::new(),
        }
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    /// True while a transition for `key` (subscription id, or company id for
    /// creation) is running. Used to disable controls.
    pub fn is_in_flight(&self, key: Uuid) -> bool {
        self.in_flight.contains(&key)
    }

    fn begin(&self, key: Uuid) -> LifecycleResult<InFlight<'_>> {
        if !self.in_flight.insert(key) {
            warn!(key = %key, "Rejected transition: another one is in flight");
            return Err(LifecycleError::TransitionInFlight(key));
        }
        Ok(InFlight {
            keys: &self.in_flight,
            key,
        })
    }

    // --- Reads ---

    /// The company's latest subscription, re-synced with the processor first.
    pub async fn current(&self, company_id: Uuid) -> LifecycleResult<Option<Subscription>> {
        match self.db.find_latest_subscription(company_id).await? {
            Some(local) => Ok(Some(self.refresh(local).await?)),
            None => Ok(None),
        }
    }

    pub async fn transactions(&self, subscription_id: Uuid) -> LifecycleResult<Vec<PaymentTransaction>> {
        Ok(self.db.list_transactions(subscription_id).await?)
    }

    // --- Transitions ---

    pub async fn create(&self, input: NewSubscription) -> LifecycleResult<TransitionOutcome> {
        let card_token = input.card_token.trim();
        let payer_email = input.payer_email.trim();
        if card_token.is_empty() {
            return Err(LifecycleError::InvalidInput("card token is required".to_string()));
        }
        if !payer_email.contains('@') {
            return Err(LifecycleError::InvalidInput(format!(
                "'{}' is not an email address",
                payer_email
            )));
        }
        let plan = self
            .catalog
            .get(&input.plan_key)
            .ok_or_else(|| LifecycleError::UnknownPlan(input.plan_key.clone()))?
            .clone();

        let _guard = self.begin(input.company_id)?;

        // A pending record means an earlier create may have reached the processor.
        if let Some(existing) = self.db.find_latest_subscription(input.company_id).await? {
            if existing.is_governing() {
                return Err(LifecycleError::AlreadySubscribed(existing.status));
            }
        }

        let request = CreateSubscriptionRequest {
            plan_key: plan.key.clone(),
            company_id: input.company_id,
            card_token: card_token.to_string(),
            payer_email: payer_email.to_string(),
        };
        info!(company_id = %input.company_id, plan = %plan.key, "Submitting new subscription to processor");
        let created = self.processor.create_subscription(&request).await.map_err(|e| {
            warn!(company_id = %input.company_id, error = %e, "Processor rejected subscription");
            LifecycleError::from(e)
        })?;

        // Only the follow-up sync may move the record past pending.
        let status = match SubscriptionStatus::parse(&created.status) {
            Ok(SubscriptionStatus::ApprovalPending) => SubscriptionStatus::ApprovalPending,
            Ok(_) => SubscriptionStatus::Pending,
            Err(e) => {
                warn!(
                    company_id = %input.company_id,
                    raw_status = %created.status,
                    error = %e,
                    "Processor returned an unrecognized status on creation; storing as pending"
                );
                SubscriptionStatus::Pending
            }
        };
        let now = self.clock.now();
        let record = Subscription {
            id: Uuid::new_v4(),
            company_id: input.company_id,
            external_subscription_id: Some(created.subscription_id.clone()),
            external_plan_id: created.external_plan_id.or(plan.external_plan_id.clone()),
            plan_key: plan.key.clone(),
            plan_name: plan.name.clone(),
            amount: plan.amount,
            currency: plan.currency.clone(),
            status,
            current_period_start: None,
            current_period_end: None,
            next_billing_time: None,
            activated_at: None,
            cancelled_at: None,
            suspended_at: None,
            failed_payments_count: 0,
            payment_method_brand: None,
            card_last_four: None,
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.db.insert_subscription(&record).await {
            error!(
                company_id = %input.company_id,
                external_subscription_id = %created.subscription_id,
                error = %e,
                "Processor created a subscription but it could not be stored"
            );
            return Err(e.into());
        }

        let (subscription, synced) = self.settle(record).await;
        Ok(TransitionOutcome::new(Transition::Create, subscription, synced))
    }

    /// Requests a plan change that takes effect at the next billing time. The
    /// current plan stays on record until a sync reports the switch.
    pub async fn change_plan(
        &self,
        subscription_id: Uuid,
        new_plan_key: &str,
    ) -> LifecycleResult<TransitionOutcome> {
        let plan = self
            .catalog
            .get(new_plan_key)
            .ok_or_else(|| LifecycleError::UnknownPlan(new_plan_key.to_string()))?
            .clone();

        let _guard = self.begin(subscription_id)?;
        let subscription = self.db.get_subscription(subscription_id).await?;
        let external_id = require_external_id(&subscription)?;
        require_status(&subscription, Transition::ChangePlan, SubscriptionStatus::Active)?;
        if subscription.plan_key == plan.key {
            return Err(LifecycleError::InvalidInput(format!(
                "subscription is already on plan '{}'",
                plan.key
            )));
        }

        let direction = classify_plan_change(subscription.amount, plan.amount);
        let effective_at = subscription.next_billing_time;
        let action = ManageAction::ChangePlan {
            new_plan_key: plan.key.clone(),
        };
        let mut outcome = self
            .dispatch(Transition::ChangePlan, subscription, &external_id, action)
            .await?;
        outcome.plan_change = Some(direction);
        outcome.effective_at = effective_at;
        Ok(outcome)
    }

    /// Replaces the card on file. Plan and billing date are untouched.
    pub async fn change_card(&self, subscription_id: Uuid, card_token: &str) -> LifecycleResult<TransitionOutcome> {
        let card_token = card_token.trim();
        if card_token.is_empty() {
            return Err(LifecycleError::InvalidInput("card token is required".to_string()));
        }

        let _guard = self.begin(subscription_id)?;
        let subscription = self.db.get_subscription(subscription_id).await?;
        let external_id = require_external_id(&subscription)?;
        require_status(&subscription, Transition::ChangeCard, SubscriptionStatus::Active)?;

        let action = ManageAction::ChangeCard {
            card_token: card_token.to_string(),
        };
        self.dispatch(Transition::ChangeCard, subscription, &external_id, action)
            .await
    }

    /// Cancels at the processor. Access continues through `next_billing_time`.
    /// Cancelling an already cancelled subscription is a no-op.
    pub async fn cancel(&self, subscription_id: Uuid, reason: Option<String>) -> LifecycleResult<TransitionOutcome> {
        let _guard = self.begin(subscription_id)?;
        let subscription = self.db.get_subscription(subscription_id).await?;

        if subscription.status == SubscriptionStatus::Cancelled {
            info!(subscription_id = %subscription_id, "Subscription already cancelled; nothing to do");
            let mut outcome = TransitionOutcome::new(Transition::Cancel, subscription, false);
            outcome.applied = false;
            outcome.effective_at = outcome.subscription.access_retained_until();
            return Ok(outcome);
        }

        let external_id = require_external_id(&subscription)?;
        require_status(&subscription, Transition::Cancel, SubscriptionStatus::Active)?;

        let action = ManageAction::Cancel { reason };
        let mut outcome = self
            .dispatch(Transition::Cancel, subscription, &external_id, action)
            .await?;
        outcome.effective_at = outcome.subscription.next_billing_time;
        Ok(outcome)
    }

    /// Resumes a suspended subscription. Fails with `MandateInvalid` when the
    /// processor can no longer charge it; the caller must create a new one.
    pub async fn reactivate(&self, subscription_id: Uuid) -> LifecycleResult<TransitionOutcome> {
        let _guard = self.begin(subscription_id)?;
        let subscription = self.db.get_subscription(subscription_id).await?;
        let external_id = require_external_id(&subscription)?;
        require_status(&subscription, Transition::Reactivate, SubscriptionStatus::Suspended)?;

        self.dispatch(
            Transition::Reactivate,
            subscription,
            &external_id,
            ManageAction::Reactivate,
        )
        .await
    }

    /// Re-reads the processor's view and overwrites the local copy.
    pub async fn sync(&self, subscription_id: Uuid) -> LifecycleResult<Subscription> {
        let subscription = self.db.get_subscription(subscription_id).await?;
        self.refresh(subscription).await
    }

    // --- Internals ---

    /// Sync for readers. While a transition holds the subscription its own
    /// follow-up sync is the one that writes, so the stored copy is served as is.
    async fn refresh(&self, local: Subscription) -> LifecycleResult<Subscription> {
        if self.is_in_flight(local.id) {
            debug!(subscription_id = %local.id, "Transition in flight; serving the stored copy");
            return Ok(local);
        }
        self.sync_record(local).await
    }

    /// Sends one mutating call, waits for it to settle, then syncs whatever the outcome.
    async fn dispatch(
        &self,
        transition: Transition,
        subscription: Subscription,
        external_id: &str,
        action: ManageAction,
    ) -> LifecycleResult<TransitionOutcome> {
        info!(
            subscription_id = %subscription.id,
            external_subscription_id = %external_id,
            transition = transition.as_str(),
            "Submitting transition to processor"
        );
        let result = self.processor.manage_subscription(external_id, &action).await;

        // The processor may have partially applied a failed call.
        let (subscription, synced) = self.settle(subscription).await;

        match result {
            Ok(_) => Ok(TransitionOutcome::new(transition, subscription, synced)),
            Err(e) => {
                warn!(
                    subscription_id = %subscription.id,
                    transition = transition.as_str(),
                    error = %e,
                    "Processor rejected transition"
                );
                Err(e.into())
            }
        }
    }

    /// Sync after a transition; on failure keep the last known copy.
    async fn settle(&self, subscription: Subscription) -> (Subscription, bool) {
        match self.sync_record(subscription.clone()).await {
            Ok(synced) => (synced, true),
            Err(e) => {
                warn!(subscription_id = %subscription.id, error = %e, "Follow-up sync failed");
                (subscription, false)
            }
        }
    }

    async fn sync_record(&self, local: Subscription) -> LifecycleResult<Subscription> {
        let Some(external_id) = local.external_subscription_id.clone() else {
            return Ok(local);
        };
        let snapshot = self.processor.get_subscription_status(&external_id).await?;
        let mut updated = self.apply_snapshot(&local, snapshot)?;
        if updated == local {
            self.reconcile_company(&local).await;
            return Ok(local);
        }
        updated.updated_at = self.clock.now();
        self.db.update_subscription(&updated).await?;
        if updated.status != local.status {
            info!(
                subscription_id = %local.id,
                from = local.status.as_str(),
                to = updated.status.as_str(),
                "Subscription status changed"
            );
        }
        self.reconcile_company(&updated).await;
        Ok(updated)
    }

    /// Brings `Company.is_subscribed` in line with a synced subscription. The
    /// subscription write already happened, so failures are logged and the next
    /// sync tries again.
    async fn reconcile_company(&self, subscription: &Subscription) {
        let Some(entitled) = subscription.grants_access(self.clock.now()) else {
            return;
        };
        let company = match self.db.get_company(subscription.company_id).await {
            Ok(company) => company,
            Err(e) => {
                warn!(
                    company_id = %subscription.company_id,
                    error = %e,
                    "Could not load company to update its subscription flag"
                );
                return;
            }
        };
        if company.is_subscribed == entitled {
            return;
        }
        match self.db.set_company_subscribed(company.id, entitled).await {
            Ok(()) => info!(
                company_id = %company.id,
                subscription_id = %subscription.id,
                is_subscribed = entitled,
                "Company subscription flag updated"
            ),
            Err(e) => error!(
                company_id = %company.id,
                error = %e,
                "Failed to update company subscription flag"
            ),
        }
    }

    /// Overlays a processor snapshot on the local copy. Fields the processor omits
    /// keep their cached value.
    fn apply_snapshot(&self, local: &Subscription, snapshot: ProcessorSnapshot) -> LifecycleResult<Subscription> {
        let status = SubscriptionStatus::parse(&snapshot.status)?;
        let now = self.clock.now();
        let mut next = local.clone();

        next.status = status;
        if let Some(plan_key) = snapshot.plan_key.filter(|k| *k != local.plan_key) {
            match self.catalog.get(&plan_key) {
                Some(plan) => {
                    next.plan_key = plan.key.clone();
                    next.plan_name = plan.name.clone();
                    next.amount = plan.amount;
                    next.currency = plan.currency.clone();
                }
                None => warn!(plan = %plan_key, "Processor reported a plan missing from the catalog"),
            }
        }
        overwrite(&mut next.external_plan_id, snapshot.external_plan_id);
        overwrite(&mut next.next_billing_time, snapshot.next_billing_time);
        overwrite(&mut next.current_period_start, snapshot.current_period_start);
        overwrite(&mut next.current_period_end, snapshot.current_period_end);
        overwrite(&mut next.payment_method_brand, snapshot.payment_method_brand);
        overwrite(&mut next.card_last_four, snapshot.card_last_four);
        if let Some(count) = snapshot.failed_payments_count {
            next.failed_payments_count = count;
        }

        match status {
            SubscriptionStatus::Active if next.activated_at.is_none() => {
                next.activated_at = snapshot.activated_at.or(Some(now));
            }
            SubscriptionStatus::Cancelled if next.cancelled_at.is_none() => {
                next.cancelled_at = snapshot.cancelled_at.or(Some(now));
            }
            SubscriptionStatus::Suspended if local.status != SubscriptionStatus::Suspended => {
                next.suspended_at = snapshot.suspended_at.or(Some(now));
            }
            _ => {}
        }
        Ok(next)
    }
}

fn overwrite<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

fn require_external_id(subscription: &Subscription) -> LifecycleResult<String> {
    subscription
        .external_subscription_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or(LifecycleError::MissingExternalId(subscription.id))
}

fn require_status(
    subscription: &Subscription,
    transition: Transition,
    expected: SubscriptionStatus,
) -> LifecycleResult<()> {
    if subscription.status == expected {
        Ok(())
    } else {
        Err(LifecycleError::InvalidState {
            transition,
            status: subscription.status,
        })
    }
}
