//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::reject;
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, NaiveDate, Utc};
use compliance_core::dates::{
    days_until, format_amount, format_date, format_local_timestamp, parse_civil_date, PLACEHOLDER,
};
use compliance_core::domain::{Company, PaymentTransaction, Subscription};
use compliance_core::expiration::{
    qr_document_expiration, summarize, ExpirationPolicy, ExpirationSummary,
};
use compliance_core::lifecycle::{LifecycleError, NewSubscription, TransitionOutcome};
use compliance_core::notification::notification_kind;
use compliance_core::plans::{BillingInterval, Plan, PlanChange};
use compliance_core::trial::{trial_end_for, AccessDecision, TrialStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

type HandlerResult<T> = Result<T, (StatusCode, String)>;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        access_handler,
        register_company_handler,
        classify_handler,
        list_plans_handler,
        current_subscription_handler,
        create_subscription_handler,
        change_plan_handler,
        change_card_handler,
        cancel_subscription_handler,
        reactivate_subscription_handler,
        sync_subscription_handler,
        list_transactions_handler,
    ),
    components(schemas(
        AccessResponse,
        RegisterCompanyRequest,
        ClassifyRequest,
        RecordInput,
        ClassifyResponse,
        ClassifiedRecord,
        SummaryView,
        PlanView,
        SubscriptionView,
        CurrentSubscriptionResponse,
        TransitionResponse,
        CreateSubscriptionRequest,
        ChangePlanRequest,
        ChangeCardRequest,
        CancelRequest,
        TransactionView,
    )),
    tags(
        (name = "Compliance API", description = "Document expiry classification, trial access and subscription lifecycle.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// Trial banner and access gate state for the calling company.
#[derive(Serialize, ToSchema)]
pub struct AccessResponse {
    pub company_id: Uuid,
    /// `active`, `expired` or `none`.
    pub trial_status: String,
    pub days_remaining: i64,
    pub has_access: bool,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub trial_ends_on: String,
    pub trial_length_days: i64,
}

impl AccessResponse {
    fn new(company: &Company, state: &AppState) -> Self {
        let decision = AccessDecision::evaluate(Some(company), state.clock.now());
        Self {
            company_id: company.id,
            trial_status: match decision.trial_status {
                TrialStatus::Active => "active",
                TrialStatus::Expired => "expired",
                TrialStatus::None => "none",
            }
            .to_string(),
            days_remaining: decision.days_remaining,
            has_access: decision.has_access,
            trial_ends_at: decision.trial_ends_at,
            trial_ends_on: format_local_timestamp(decision.trial_ends_at, &state.config.date_format),
            trial_length_days: state.config.trial_days,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct RegisterCompanyRequest {
    pub name: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ClassifyRequest {
    pub records: Vec<RecordInput>,
}

#[derive(Deserialize, ToSchema)]
pub struct RecordInput {
    /// Caller's own reference, echoed back.
    #[serde(default)]
    pub id: Option<String>,
    /// `YYYY-MM-DD` or an ISO-8601 timestamp.
    pub expiration_date: Option<String>,
    /// When set, `expiration_date` is the date extracted from a QR code and the
    /// record expires twelve months later.
    #[serde(default)]
    pub qr_document: bool,
}

#[derive(Serialize, ToSchema)]
pub struct ClassifiedRecord {
    pub id: Option<String>,
    pub expiration_date: Option<NaiveDate>,
    pub expiration_date_display: String,
    pub days_until: Option<i64>,
    /// `valid`, `expiring` or `expired`; absent when the date could not be read.
    pub status: Option<String>,
    /// `expiration_warning` or `expired` when a reminder is due.
    pub notification: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct SummaryView {
    pub valid: usize,
    pub expiring: usize,
    pub expired: usize,
    pub total: usize,
}

impl From<ExpirationSummary> for SummaryView {
    fn from(summary: ExpirationSummary) -> Self {
        Self {
            valid: summary.valid,
            expiring: summary.expiring,
            expired: summary.expired,
            total: summary.total(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ClassifyResponse {
    pub today: NaiveDate,
    pub threshold_days: i64,
    pub notification_window_days: i64,
    pub records: Vec<ClassifiedRecord>,
    pub summary: SummaryView,
    /// Records whose date could not be read.
    pub unreadable: usize,
}

#[derive(Serialize, ToSchema)]
pub struct PlanView {
    pub key: String,
    pub name: String,
    /// Decimal string, e.g. `"249.00"`.
    pub amount: String,
    pub currency: String,
    /// `monthly` or `yearly`.
    pub interval: String,
    pub price_display: String,
}

impl From<&Plan> for PlanView {
    fn from(plan: &Plan) -> Self {
        Self {
            key: plan.key.clone(),
            name: plan.name.clone(),
            amount: format!("{:.2}", plan.amount),
            currency: plan.currency.clone(),
            interval: match plan.interval {
                BillingInterval::Monthly => "monthly".to_string(),
                BillingInterval::Yearly => "yearly".to_string(),
            },
            price_display: format_amount(plan.amount, &plan.currency),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SubscriptionView {
    pub id: Uuid,
    pub status: String,
    pub plan_key: String,
    pub plan_name: String,
    pub amount: String,
    pub currency: String,
    pub price_display: String,
    pub next_billing_time: Option<DateTime<Utc>>,
    pub next_billing_date: String,
    /// For cancelled subscriptions, the end of the already paid period.
    pub access_until: Option<DateTime<Utc>>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub suspended_at: Option<DateTime<Utc>>,
    pub failed_payments_count: i32,
    pub payment_method_brand: Option<String>,
    pub card_last_four: Option<String>,
    /// True while a change is being processed; controls should be disabled.
    pub change_in_progress: bool,
}

impl SubscriptionView {
    fn new(subscription: &Subscription, state: &AppState) -> Self {
        let pattern = &state.config.date_format;
        Self {
            id: subscription.id,
            status: subscription.status.as_str().to_string(),
            plan_key: subscription.plan_key.clone(),
            plan_name: subscription.plan_name.clone(),
            amount: format!("{:.2}", subscription.amount),
            currency: subscription.currency.clone(),
            price_display: format_amount(subscription.amount, &subscription.currency),
            next_billing_time: subscription.next_billing_time,
            next_billing_date: format_local_timestamp(subscription.next_billing_time, pattern),
            access_until: subscription.access_retained_until(),
            current_period_start: subscription.current_period_start,
            current_period_end: subscription.current_period_end,
            activated_at: subscription.activated_at,
            cancelled_at: subscription.cancelled_at,
            suspended_at: subscription.suspended_at,
            failed_payments_count: subscription.failed_payments_count,
            payment_method_brand: subscription.payment_method_brand.clone(),
            card_last_four: subscription.card_last_four.clone(),
            change_in_progress: state.manager.is_in_flight(subscription.id),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct CurrentSubscriptionResponse {
    pub subscription: Option<SubscriptionView>,
}

#[derive(Serialize, ToSchema)]
pub struct TransitionResponse {
    pub transition: String,
    /// False when nothing had to be done (e.g. cancelling twice).
    pub applied: bool,
    /// False when the follow-up sync failed and the data may be stale.
    pub synced: bool,
    /// `upgrade`, `downgrade` or `lateral` for plan changes.
    pub plan_change: Option<String>,
    pub effective_at: Option<DateTime<Utc>>,
    pub effective_date: String,
    pub subscription: SubscriptionView,
}

impl TransitionResponse {
    fn new(outcome: TransitionOutcome, state: &AppState) -> Self {
        Self {
            transition: outcome.transition.as_str().to_string(),
            applied: outcome.applied,
            synced: outcome.synced,
            plan_change: outcome.plan_change.map(|change| {
                match change {
                    PlanChange::Upgrade => "upgrade",
                    PlanChange::Downgrade => "downgrade",
                    PlanChange::Lateral => "lateral",
                }
                .to_string()
            }),
            effective_at: outcome.effective_at,
            effective_date: format_local_timestamp(outcome.effective_at, &state.config.date_format),
            subscription: SubscriptionView::new(&outcome.subscription, state),
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct CreateSubscriptionRequest {
    pub plan_key: String,
    pub card_token: String,
    pub payer_email: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ChangePlanRequest {
    pub plan_key: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ChangeCardRequest {
    pub card_token: String,
}

#[derive(Deserialize, ToSchema)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct TransactionView {
    pub id: Uuid,
    pub external_transaction_id: Option<String>,
    pub status: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub paid_on: String,
    pub gross_amount: String,
    pub fee_amount: String,
    pub net_amount: String,
    pub currency: String,
}

impl TransactionView {
    fn new(tx: &PaymentTransaction, pattern: &str) -> Self {
        Self {
            id: tx.id,
            external_transaction_id: tx.external_transaction_id.clone(),
            status: tx.status.as_str().to_string(),
            paid_at: tx.paid_at,
            paid_on: format_local_timestamp(tx.paid_at, pattern),
            gross_amount: format_amount(tx.gross_amount, &tx.currency),
            fee_amount: format_amount(tx.fee_amount, &tx.currency),
            net_amount: format_amount(tx.net_amount, &tx.currency),
            currency: tx.currency.clone(),
        }
    }
}

//=========================================================================================
// Access and Compliance Handlers
//=========================================================================================

/// Trial and access state for the calling company. Evaluated fresh on every call.
#[utoipa::path(
    get,
    path = "/access",
    responses(
        (status = 200, description = "Access decision", body = AccessResponse),
        (status = 401, description = "Missing or malformed x-company-id header"),
        (status = 404, description = "Unknown company")
    ),
    params(("x-company-id" = Uuid, Header, description = "The calling company."))
)]
pub async fn access_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(company): Extension<Company>,
) -> Json<AccessResponse> {
    Json(AccessResponse::new(&company, &app_state))
}

/// Registers a company and starts its free trial.
#[utoipa::path(
    post,
    path = "/companies",
    request_body = RegisterCompanyRequest,
    responses(
        (status = 201, description = "Company registered, trial started", body = AccessResponse),
        (status = 400, description = "Missing company name")
    )
)]
pub async fn register_company_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<RegisterCompanyRequest>,
) -> HandlerResult<impl IntoResponse> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Company name is required".to_string()));
    }
    let trial_ends_at = trial_end_for(app_state.clock.now(), app_state.config.trial_days)
        .ok_or_else(|| {
            error!(trial_days = app_state.config.trial_days, "Trial end is out of range");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to register company".to_string(),
            )
        })?;
    let company = Company {
        id: Uuid::new_v4(),
        name: name.to_string(),
        is_subscribed: false,
        trial_ends_at: Some(trial_ends_at),
    };
    app_state.db.create_company(&company).await.map_err(|e| {
        error!("Failed to register company: {:?}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to register company".to_string(),
        )
    })?;
    info!(company_id = %company.id, "Company registered");
    Ok((StatusCode::CREATED, Json(AccessResponse::new(&company, &app_state))))
}

/// Classifies dated records as valid, expiring or expired, and flags the ones
/// that are due a reminder.
#[utoipa::path(
    post,
    path = "/compliance/classify",
    request_body = ClassifyRequest,
    responses(
        (status = 200, description = "Classified records", body = ClassifyResponse),
        (status = 402, description = "Trial expired and no subscription")
    ),
    params(("x-company-id" = Uuid, Header, description = "The calling company."))
)]
pub async fn classify_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<ClassifyRequest>,
) -> Json<ClassifyResponse> {
    let today = app_state.clock.today();
    let config = &app_state.config;
    let window = config.notification_window_days;

    let policy = ExpirationPolicy::new(config.expiring_threshold_days);

    let dated: Vec<(Option<String>, Option<NaiveDate>)> = payload
        .records
        .into_iter()
        .map(|record| {
            let date = record
                .expiration_date
                .as_deref()
                .and_then(parse_civil_date)
                .and_then(|date| {
                    if record.qr_document {
                        qr_document_expiration(date)
                    } else {
                        Some(date)
                    }
                });
            (record.id, date)
        })
        .collect();

    let summary = summarize(dated.iter().filter_map(|(_, d)| d.as_ref()), today, policy);
    let unreadable = dated.iter().filter(|(_, d)| d.is_none()).count();

    let records = dated
        .into_iter()
        .map(|(id, date)| match date {
            Some(date) => ClassifiedRecord {
                id,
                expiration_date: Some(date),
                expiration_date_display: format_date(date, &config.date_format),
                days_until: Some(days_until(date, today)),
                status: Some(policy.classify(&date, today).as_str().to_string()),
                notification: notification_kind(date, today, window)
                    .map(|kind| kind.as_str().to_string()),
            },
            None => ClassifiedRecord {
                id,
                expiration_date: None,
                expiration_date_display: PLACEHOLDER.to_string(),
                days_until: None,
                status: None,
                notification: None,
            },
        })
        .collect();

    Json(ClassifyResponse {
        today,
        threshold_days: policy.threshold_days,
        notification_window_days: window,
        records,
        summary: summary.into(),
        unreadable,
    })
}

/// Lists the purchasable plans.
#[utoipa::path(
    get,
    path = "/plans",
    responses((status = 200, description = "Plan catalog", body = [PlanView]))
)]
pub async fn list_plans_handler(State(app_state): State<Arc<AppState>>) -> Json<Vec<PlanView>> {
    Json(app_state.manager.catalog().plans().iter().map(PlanView::from).collect())
}

//=========================================================================================
// Subscription Handlers
//=========================================================================================

/// Loads a subscription and checks it belongs to the caller. Other companies'
/// subscriptions are reported as missing.
async fn owned_subscription(
    app_state: &AppState,
    company: &Company,
    subscription_id: Uuid,
) -> HandlerResult<Subscription> {
    let subscription = app_state
        .db
        .get_subscription(subscription_id)
        .await
        .map_err(|e| reject(LifecycleError::from(e)))?;
    if subscription.company_id != company.id {
        return Err((
            StatusCode::NOT_FOUND,
            format!("Subscription {} not found", subscription_id),
        ));
    }
    Ok(subscription)
}

/// The company's current subscription, refreshed from the processor first.
#[utoipa::path(
    get,
    path = "/subscription",
    responses(
        (status = 200, description = "The current subscription, if any", body = CurrentSubscriptionResponse),
        (status = 502, description = "Processor error")
    ),
    params(("x-company-id" = Uuid, Header, description = "The calling company."))
)]
pub async fn current_subscription_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(company): Extension<Company>,
) -> HandlerResult<impl IntoResponse> {
    let current = app_state.manager.current(company.id).await.map_err(reject)?;
    Ok(Json(CurrentSubscriptionResponse {
        subscription: current.as_ref().map(|s| SubscriptionView::new(s, &app_state)),
    }))
}

/// Starts a new subscription with a tokenized card.
#[utoipa::path(
    post,
    path = "/subscription",
    request_body = CreateSubscriptionRequest,
    responses(
        (status = 201, description = "Subscription created", body = TransitionResponse),
        (status = 400, description = "Invalid input or unknown plan"),
        (status = 409, description = "Company already subscribed or creation in progress"),
        (status = 502, description = "Processor error")
    ),
    params(("x-company-id" = Uuid, Header, description = "The calling company."))
)]
pub async fn create_subscription_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(company): Extension<Company>,
    Json(payload): Json<CreateSubscriptionRequest>,
) -> HandlerResult<impl IntoResponse> {
    let outcome = app_state
        .manager
        .create(NewSubscription {
            company_id: company.id,
            plan_key: payload.plan_key,
            card_token: payload.card_token,
            payer_email: payload.payer_email,
        })
        .await
        .map_err(reject)?;
    info!(company_id = %company.id, subscription_id = %outcome.subscription.id, "Subscription created");
    Ok((StatusCode::CREATED, Json(TransitionResponse::new(outcome, &app_state))))
}

/// Requests a plan change effective at the next billing time.
#[utoipa::path(
    post,
    path = "/subscription/{id}/change-plan",
    request_body = ChangePlanRequest,
    responses(
        (status = 200, description = "Change accepted", body = TransitionResponse),
        (status = 400, description = "Unknown plan or same plan"),
        (status = 409, description = "Subscription not active or change in progress"),
        (status = 502, description = "Processor error")
    ),
    params(
        ("id" = Uuid, Path, description = "Subscription id"),
        ("x-company-id" = Uuid, Header, description = "The calling company.")
    )
)]
pub async fn change_plan_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(company): Extension<Company>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ChangePlanRequest>,
) -> HandlerResult<Json<TransitionResponse>> {
    owned_subscription(&app_state, &company, id).await?;
    let outcome = app_state
        .manager
        .change_plan(id, &payload.plan_key)
        .await
        .map_err(reject)?;
    Ok(Json(TransitionResponse::new(outcome, &app_state)))
}

/// Replaces the card on file.
#[utoipa::path(
    post,
    path = "/subscription/{id}/change-card",
    request_body = ChangeCardRequest,
    responses(
        (status = 200, description = "Card replaced", body = TransitionResponse),
        (status = 409, description = "Subscription not active or change in progress"),
        (status = 502, description = "Processor error")
    ),
    params(
        ("id" = Uuid, Path, description = "Subscription id"),
        ("x-company-id" = Uuid, Header, description = "The calling company.")
    )
)]
pub async fn change_card_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(company): Extension<Company>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ChangeCardRequest>,
) -> HandlerResult<Json<TransitionResponse>> {
    owned_subscription(&app_state, &company, id).await?;
    let outcome = app_state
        .manager
        .change_card(id, &payload.card_token)
        .await
        .map_err(reject)?;
    Ok(Json(TransitionResponse::new(outcome, &app_state)))
}

/// Cancels the subscription. Access continues until the end of the paid period.
#[utoipa::path(
    post,
    path = "/subscription/{id}/cancel",
    request_body = CancelRequest,
    responses(
        (status = 200, description = "Cancelled, or already cancelled", body = TransitionResponse),
        (status = 409, description = "Subscription not active or change in progress"),
        (status = 502, description = "Processor error")
    ),
    params(
        ("id" = Uuid, Path, description = "Subscription id"),
        ("x-company-id" = Uuid, Header, description = "The calling company.")
    )
)]
pub async fn cancel_subscription_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(company): Extension<Company>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelRequest>,
) -> HandlerResult<Json<TransitionResponse>> {
    owned_subscription(&app_state, &company, id).await?;
    let reason = payload.reason.filter(|r| !r.trim().is_empty());
    let outcome = app_state.manager.cancel(id, reason).await.map_err(reject)?;
    Ok(Json(TransitionResponse::new(outcome, &app_state)))
}

/// Resumes a suspended subscription.
#[utoipa::path(
    post,
    path = "/subscription/{id}/reactivate",
    responses(
        (status = 200, description = "Reactivated", body = TransitionResponse),
        (status = 402, description = "Mandate no longer valid; start a new subscription"),
        (status = 409, description = "Subscription not suspended or change in progress")
    ),
    params(
        ("id" = Uuid, Path, description = "Subscription id"),
        ("x-company-id" = Uuid, Header, description = "The calling company.")
    )
)]
pub async fn reactivate_subscription_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(company): Extension<Company>,
    Path(id): Path<Uuid>,
) -> HandlerResult<Json<TransitionResponse>> {
    owned_subscription(&app_state, &company, id).await?;
    let outcome = app_state.manager.reactivate(id).await.map_err(reject)?;
    Ok(Json(TransitionResponse::new(outcome, &app_state)))
}

/// Re-reads the processor's view of the subscription and stores it.
#[utoipa::path(
    post,
    path = "/subscription/{id}/sync",
    responses(
        (status = 200, description = "Synced subscription", body = SubscriptionView),
        (status = 502, description = "Processor error or unrecognized status")
    ),
    params(
        ("id" = Uuid, Path, description = "Subscription id"),
        ("x-company-id" = Uuid, Header, description = "The calling company.")
    )
)]
pub async fn sync_subscription_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(company): Extension<Company>,
    Path(id): Path<Uuid>,
) -> HandlerResult<Json<SubscriptionView>> {
    owned_subscription(&app_state, &company, id).await?;
    let subscription = app_state.manager.sync(id).await.map_err(reject)?;
    Ok(Json(SubscriptionView::new(&subscription, &app_state)))
}

/// Payment history for a subscription, newest first.
#[utoipa::path(
    get,
    path = "/subscription/{id}/transactions",
    responses((status = 200, description = "Payment transactions", body = [TransactionView])),
    params(
        ("id" = Uuid, Path, description = "Subscription id"),
        ("x-company-id" = Uuid, Header, description = "The calling company.")
    )
)]
pub async fn list_transactions_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(company): Extension<Company>,
    Path(id): Path<Uuid>,
) -> HandlerResult<Json<Vec<TransactionView>>> {
    owned_subscription(&app_state, &company, id).await?;
    let transactions = app_state.manager.transactions(id).await.map_err(reject)?;
    let pattern = &app_state.config.date_format;
    Ok(Json(
        transactions
            .iter()
            .map(|tx| TransactionView::new(tx, pattern))
            .collect(),
    ))
}
