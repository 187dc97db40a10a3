//! In-memory doubles and app wiring for router tests.

#![allow(dead_code)]

use api_lib::config::Config;
use api_lib::web::{router, state::AppState};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
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
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap()
}

pub fn config() -> Config {
    Config::from_lookup(|name| match name {
        "DATABASE_URL" => Some("postgres://unused".to_string()),
        "PROCESSOR_BASE_URL" => Some("http://unused".to_string()),
        _ => None,
    })
    .unwrap()
}

pub fn catalog() -> PlanCatalog {
    let plan = |key: &str, name: &str, amount: i64| Plan {
        key: key.to_string(),
        name: name.to_string(),
        amount: Decimal::from(amount),
        currency: "NOK".to_string(),
        interval: BillingInterval::Monthly,
        external_plan_id: Some(format!("P-{}", key.to_uppercase())),
    };
    PlanCatalog::new(vec![plan("basic", "Basic", 99), plan("pro", "Pro", 249)]).unwrap()
}

pub fn company(is_subscribed: bool, trial_ends_at: Option<DateTime<Utc>>) -> Company {
    Company {
        id: Uuid::new_v4(),
        name: "Fjord Bygg AS".to_string(),
        is_subscribed,
        trial_ends_at,
    }
}

pub fn subscription(company_id: Uuid, status: SubscriptionStatus) -> Subscription {
    Subscription {
        id: Uuid::new_v4(),
        company_id,
        external_subscription_id: Some("I-BASIC0001".to_string()),
        external_plan_id: Some("P-BASIC".to_string()),
        plan_key: "basic".to_string(),
        plan_name: "Basic".to_string(),
        amount: Decimal::from(99),
        currency: "NOK".to_string(),
        status,
        current_period_start: Some(now() - Duration::days(20)),
        current_period_end: Some(now() + Duration::days(10)),
        next_billing_time: Some(now() + Duration::days(10)),
        activated_at: Some(now() - Duration::days(50)),
        cancelled_at: (status == SubscriptionStatus::Cancelled).then(|| now() - Duration::days(1)),
        suspended_at: None,
        failed_payments_count: 0,
        payment_method_brand: Some("VISA".to_string()),
        card_last_four: Some("4242".to_string()),
        created_at: now() - Duration::days(50),
        updated_at: now() - Duration::days(20),
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
// Counting PaymentProcessor
//=========================================================================================

/// Reports a fixed snapshot and counts every call.
#[derive(Default)]
pub struct StubProcessor {
    pub snapshot: Mutex<ProcessorSnapshot>,
    pub manage_error: Mutex<Option<PortError>>,
    pub calls: AtomicUsize,
}

impl StubProcessor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProcessor for StubProcessor {
    async fn create_subscription(
        &self,
        _request: &CreateSubscriptionRequest,
    ) -> PortResult<CreatedSubscription> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CreatedSubscription {
            subscription_id: "I-NEW0001".to_string(),
            status: "APPROVAL_PENDING".to_string(),
            external_plan_id: None,
        })
    }

    async fn manage_subscription(
        &self,
        _external_subscription_id: &str,
        _action: &ManageAction,
    ) -> PortResult<ManageResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.manage_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(ManageResponse::default()),
        }
    }

    async fn get_subscription_status(
        &self,
        _external_subscription_id: &str,
    ) -> PortResult<ProcessorSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot.lock().unwrap().clone())
    }
}

//=========================================================================================
// App Wiring
//=========================================================================================

pub struct TestApp {
    pub db: Arc<MemoryDb>,
    pub processor: Arc<StubProcessor>,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        let db = Arc::new(MemoryDb::default());
        let processor = Arc::new(StubProcessor::default());
        let clock = Arc::new(FixedClock::new(now()));
        let manager = Arc::new(SubscriptionManager::new(
            processor.clone(),
            db.clone(),
            Arc::new(catalog()),
            clock.clone(),
        ));
        let state = Arc::new(AppState {
            db: db.clone(),
            manager,
            config: Arc::new(config()),
            clock,
        });
        Self {
            db,
            processor,
            router: router(state),
        }
    }

    pub fn add_company(&self, company: Company) -> Uuid {
        let id = company.id;
        self.db.companies.insert(id, company);
        id
    }

    pub fn add_subscription(&self, subscription: Subscription) -> Uuid {
        let id = subscription.id;
        self.db.subscriptions.insert(id, subscription);
        id
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

pub fn get(uri: &str, company_id: Option<Uuid>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(id) = company_id {
        builder = builder.header("x-company-id", id.to_string());
    }
    builder.body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, company_id: Uuid, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-company-id", company_id.to_string())
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
