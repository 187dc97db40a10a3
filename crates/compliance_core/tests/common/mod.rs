//! In-memory test doubles for the core ports.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use compliance_core::domain::{Company, PaymentTransaction, Subscription, SubscriptionStatus};
use compliance_core::plans::{BillingInterval, Plan, PlanCatalog};
use compliance_core::ports::{
    CreateSubscriptionRequest, CreatedSubscription, DatabaseService, ManageAction,
    ManageResponse, PaymentProcessor, PortError, PortResult, ProcessorSnapshot,
};
use compliance_core::{FixedClock, SubscriptionManager};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use uuid::Uuid;

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap()
}

pub fn clock() -> FixedClock {
    FixedClock::new(now())
}

pub fn catalog() -> PlanCatalog {
    PlanCatalog::new(vec![
        plan("basic", "Basic", 99),
        plan("pro", "Pro", 249),
        plan("starter", "Starter", 49),
    ])
    .unwrap()
}

fn plan(key: &str, name: &str, amount: i64) -> Plan {
    Plan {
        key: key.to_string(),
        name: name.to_string(),
        amount: Decimal::from(amount),
        currency: "NOK".to_string(),
        interval: BillingInterval::Monthly,
        external_plan_id: Some(format!("P-{}", key.to_uppercase())),
    }
}

/// An active `basic` subscription billed again in ten days.
pub fn active_subscription(company_id: Uuid) -> Subscription {
    Subscription {
        id: Uuid::new_v4(),
        company_id,
        external_subscription_id: Some("I-BASIC0001".to_string()),
        external_plan_id: Some("P-BASIC".to_string()),
        plan_key: "basic".to_string(),
        plan_name: "Basic".to_string(),
        amount: Decimal::from(99),
        currency: "NOK".to_string(),
        status: SubscriptionStatus::Active,
        current_period_start: Some(now() - Duration::days(20)),
        current_period_end: Some(now() + Duration::days(10)),
        next_billing_time: Some(now() + Duration::days(10)),
        activated_at: Some(now() - Duration::days(80)),
        cancelled_at: None,
        suspended_at: None,
        failed_payments_count: 0,
        payment_method_brand: Some("VISA".to_string()),
        card_last_four: Some("4242".to_string()),
        created_at: now() - Duration::days(80),
        updated_at: now() - Duration::days(20),
    }
}

pub fn with_status(mut subscription: Subscription, status: SubscriptionStatus) -> Subscription {
    subscription.status = status;
    match status {
        SubscriptionStatus::Suspended => subscription.suspended_at = Some(now() - Duration::days(2)),
        SubscriptionStatus::Cancelled => subscription.cancelled_at = Some(now() - Duration::days(1)),
        _ => {}
    }
    subscription
}

/// The processor's view that matches `subscription` exactly.
pub fn snapshot_of(subscription: &Subscription) -> ProcessorSnapshot {
    ProcessorSnapshot {
        status: subscription.status.as_str().to_uppercase(),
        plan_key: Some(subscription.plan_key.clone()),
        external_plan_id: subscription.external_plan_id.clone(),
        next_billing_time: subscription.next_billing_time,
        current_period_start: subscription.current_period_start,
        current_period_end: subscription.current_period_end,
        payment_method_brand: subscription.payment_method_brand.clone(),
        card_last_four: subscription.card_last_four.clone(),
        failed_payments_count: Some(subscription.failed_payments_count),
        activated_at: subscription.activated_at,
        cancelled_at: subscription.cancelled_at,
        suspended_at: subscription.suspended_at,
    }
}

//=========================================================================================
// In-memory DatabaseService
//=========================================================================================

#[derive(Default)]
pub struct MemoryDb {
    pub companies: DashMap<Uuid, Company>,
    pub subscriptions: DashMap<Uuid, Subscription>,
    pub transactions: DashMap<Uuid, Vec<PaymentTransaction>>,
    pub updates: AtomicUsize,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, subscription: Subscription) {
        self.subscriptions.insert(subscription.id, subscription);
    }

    pub fn stored(&self, id: Uuid) -> Subscription {
        self.subscriptions.get(&id).unwrap().value().clone()
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseService for MemoryDb {
    async fn get_company(&self, company_id: Uuid) -> PortResult<Company> {
        self.companies
            .get(&company_id)
            .map(|c| c.value().clone())
            .ok_or_else(|| PortError::NotFound(format!("Company {} not found", company_id)))
    }

    async fn create_company(&self, company: &Company) -> PortResult<()> {
        self.companies.insert(company.id, company.clone());
        Ok(())
    }

    async fn set_company_subscribed(&self, company_id: Uuid, is_subscribed: bool) -> PortResult<()> {
        let mut company = self
            .companies
            .get_mut(&company_id)
            .ok_or_else(|| PortError::NotFound(format!("Company {} not found", company_id)))?;
        company.is_subscribed = is_subscribed;
        Ok(())
    }

    async fn get_subscription(&self, subscription_id: Uuid) -> PortResult<Subscription> {
        self.subscriptions
            .get(&subscription_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| PortError::NotFound(format!("Subscription {} not found", subscription_id)))
    }

    async fn find_latest_subscription(&self, company_id: Uuid) -> PortResult<Option<Subscription>> {
        Ok(self
            .subscriptions
            .iter()
            .filter(|s| s.company_id == company_id)
            .max_by_key(|s| s.created_at)
            .map(|s| s.value().clone()))
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> PortResult<()> {
        self.subscriptions.insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn update_subscription(&self, subscription: &Subscription) -> PortResult<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn list_transactions(&self, subscription_id: Uuid) -> PortResult<Vec<PaymentTransaction>> {
        Ok(self
            .transactions
            .get(&subscription_id)
            .map(|t| t.value().clone())
            .unwrap_or_default())
    }
}

//=========================================================================================
// Scripted PaymentProcessor
//=========================================================================================

/// A processor double that records every call and answers from a script.
#[derive(Default)]
pub struct ScriptedProcessor {
    pub snapshot: Mutex<ProcessorSnapshot>,
    /// Becomes the snapshot once a manage call succeeds.
    pub after_manage: Mutex<Option<ProcessorSnapshot>>,
    pub created: Mutex<Option<CreatedSubscription>>,
    pub create_error: Mutex<Option<PortError>>,
    pub manage_error: Mutex<Option<PortError>>,
    pub status_error: Mutex<Option<PortError>>,
    pub actions: Mutex<Vec<(String, ManageAction)>>,
    pub create_calls: AtomicUsize,
    pub manage_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    /// When set, manage calls signal `entered` and wait for `release`.
    pub hold: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl ScriptedProcessor {
    pub fn reporting(snapshot: ProcessorSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            ..Self::default()
        }
    }

    pub fn set_snapshot(&self, snapshot: ProcessorSnapshot) {
        *self.snapshot.lock().unwrap() = snapshot;
    }

    pub fn then_report(&self, snapshot: ProcessorSnapshot) {
        *self.after_manage.lock().unwrap() = Some(snapshot);
    }

    pub fn fail_manage(&self, error: PortError) {
        *self.manage_error.lock().unwrap() = Some(error);
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn manages(&self) -> usize {
        self.manage_calls.load(Ordering::SeqCst)
    }

    pub fn status_reads(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn network_calls(&self) -> usize {
        self.creates() + self.manages() + self.status_reads()
    }
}

#[async_trait]
impl PaymentProcessor for ScriptedProcessor {
    async fn create_subscription(
        &self,
        _request: &CreateSubscriptionRequest,
    ) -> PortResult<CreatedSubscription> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.create_error.lock().unwrap().clone() {
            return Err(err);
        }
        self.created
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| PortError::Unexpected("no scripted creation".to_string()))
    }

    async fn manage_subscription(
        &self,
        external_subscription_id: &str,
        action: &ManageAction,
    ) -> PortResult<ManageResponse> {
        self.manage_calls.fetch_add(1, Ordering::SeqCst);
        self.actions
            .lock()
            .unwrap()
            .push((external_subscription_id.to_string(), action.clone()));
        if let Some((entered, release)) = &self.hold {
            entered.notify_one();
            release.notified().await;
        }
        if let Some(err) = self.manage_error.lock().unwrap().clone() {
            return Err(err);
        }
        if let Some(next) = self.after_manage.lock().unwrap().take() {
            *self.snapshot.lock().unwrap() = next;
        }
        Ok(ManageResponse {
            status: Some(self.snapshot.lock().unwrap().status.clone()),
        })
    }

    async fn get_subscription_status(
        &self,
        _external_subscription_id: &str,
    ) -> PortResult<ProcessorSnapshot> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.status_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.snapshot.lock().unwrap().clone())
    }
}

//=========================================================================================
// Wiring
//=========================================================================================

pub struct Harness {
    pub db: Arc<MemoryDb>,
    pub processor: Arc<ScriptedProcessor>,
    pub manager: Arc<SubscriptionManager>,
}

pub fn harness(processor: ScriptedProcessor) -> Harness {
    let db = Arc::new(MemoryDb::new());
    let processor = Arc::new(processor);
    let manager = Arc::new(SubscriptionManager::new(
        processor.clone(),
        db.clone(),
        Arc::new(catalog()),
        Arc::new(clock()),
    ));
    Harness {
        db,
        processor,
        manager,
    }
}
