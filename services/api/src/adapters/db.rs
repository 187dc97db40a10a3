//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use compliance_core::domain::{
    Company, PaymentTransaction, Subscription, SubscriptionStatus, TransactionStatus,
};
use compliance_core::ports::{DatabaseService, PortError, PortResult};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const SUBSCRIPTION_COLUMNS: &str = "id, company_id, external_subscription_id, external_plan_id, \
    plan_key, plan_name, amount, currency, status, current_period_start, current_period_end, \
    next_billing_time, activated_at, cancelled_at, suspended_at, failed_payments_count, \
    payment_method_brand, card_last_four, created_at, updated_at";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn not_found_or_unexpected(e: sqlx::Error, what: String) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what),
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct CompanyRecord {
    id: Uuid,
    name: String,
    is_subscribed: bool,
    trial_ends_at: Option<DateTime<Utc>>,
}
impl CompanyRecord {
    fn to_domain(self) -> Company {
        Company {
            id: self.id,
            name: self.name,
            is_subscribed: self.is_subscribed,
            trial_ends_at: self.trial_ends_at,
        }
    }
}

#[derive(FromRow)]
struct SubscriptionRecord {
    id: Uuid,
    company_id: Uuid,
    external_subscription_id: Option<String>,
    external_plan_id: Option<String>,
    plan_key: String,
    plan_name: String,
    amount: Decimal,
    currency: String,
    status: String,
    current_period_start: Option<DateTime<Utc>>,
    current_period_end: Option<DateTime<Utc>>,
    next_billing_time: Option<DateTime<Utc>>,
    activated_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    suspended_at: Option<DateTime<Utc>>,
    failed_payments_count: i32,
    payment_method_brand: Option<String>,
    card_last_four: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl SubscriptionRecord {
    fn to_domain(self) -> PortResult<Subscription> {
        let status = SubscriptionStatus::parse(&self.status)
            .map_err(|e| PortError::Unexpected(format!("subscription {}: {}", self.id, e)))?;
        Ok(Subscription {
            id: self.id,
            company_id: self.company_id,
            external_subscription_id: self.external_subscription_id,
            external_plan_id: self.external_plan_id,
            plan_key: self.plan_key,
            plan_name: self.plan_name,
            amount: self.amount,
            currency: self.currency,
            status,
            current_period_start: self.current_period_start,
            current_period_end: self.current_period_end,
            next_billing_time: self.next_billing_time,
            activated_at: self.activated_at,
            cancelled_at: self.cancelled_at,
            suspended_at: self.suspended_at,
            failed_payments_count: self.failed_payments_count,
            payment_method_brand: self.payment_method_brand,
            card_last_four: self.card_last_four,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct TransactionRecord {
    id: Uuid,
    subscription_id: Uuid,
    external_transaction_id: Option<String>,
    gross_amount: Decimal,
    fee_amount: Decimal,
    net_amount: Decimal,
    currency: String,
    status: String,
    paid_at: Option<DateTime<Utc>>,
}
impl TransactionRecord {
    fn to_domain(self) -> PortResult<PaymentTransaction> {
        let status = TransactionStatus::parse(&self.status).ok_or_else(|| {
            PortError::Unexpected(format!(
                "transaction {} has unknown status '{}'",
                self.id, self.status
            ))
        })?;
        Ok(PaymentTransaction {
            id: self.id,
            subscription_id: self.subscription_id,
            external_transaction_id: self.external_transaction_id,
            gross_amount: self.gross_amount,
            fee_amount: self.fee_amount,
            net_amount: self.net_amount,
            currency: self.currency,
            status,
            paid_at: self.paid_at,
        })
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn get_company(&self, company_id: Uuid) -> PortResult<Company> {
        let record = sqlx::query_as::<_, CompanyRecord>(
            "SELECT id, name, is_subscribed, trial_ends_at FROM companies WHERE id = $1",
        )
        .bind(company_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or_unexpected(e, format!("Company {} not found", company_id)))?;
        Ok(record.to_domain())
    }

    async fn create_company(&self, company: &Company) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO companies (id, name, is_subscribed, trial_ends_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(company.id)
        .bind(&company.name)
        .bind(company.is_subscribed)
        .bind(company.trial_ends_at)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }

    async fn set_company_subscribed(&self, company_id: Uuid, is_subscribed: bool) -> PortResult<()> {
        let result = sqlx::query("UPDATE companies SET is_subscribed = $2 WHERE id = $1")
            .bind(company_id)
            .bind(is_subscribed)
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Company {} not found", company_id)));
        }
        Ok(())
    }

    async fn get_subscription(&self, subscription_id: Uuid) -> PortResult<Subscription> {
        let query = format!("SELECT {} FROM subscriptions WHERE id = $1", SUBSCRIPTION_COLUMNS);
        let record = sqlx::query_as::<_, SubscriptionRecord>(&query)
            .bind(subscription_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                not_found_or_unexpected(e, format!("Subscription {} not found", subscription_id))
            })?;
        record.to_domain()
    }

    async fn find_latest_subscription(&self, company_id: Uuid) -> PortResult<Option<Subscription>> {
        let query = format!(
            "SELECT {} FROM subscriptions WHERE company_id = $1 ORDER BY created_at DESC LIMIT 1",
            SUBSCRIPTION_COLUMNS
        );
        let record = sqlx::query_as::<_, SubscriptionRecord>(&query)
            .bind(company_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        record.map(SubscriptionRecord::to_domain).transpose()
    }

    async fn insert_subscription(&self, s: &Subscription) -> PortResult<()> {
        let query = format!(
            "INSERT INTO subscriptions ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)",
            SUBSCRIPTION_COLUMNS
        );
        sqlx::query(&query)
            .bind(s.id)
            .bind(s.company_id)
            .bind(&s.external_subscription_id)
            .bind(&s.external_plan_id)
            .bind(&s.plan_key)
            .bind(&s.plan_name)
            .bind(s.amount)
            .bind(&s.currency)
            .bind(s.status.as_str())
            .bind(s.current_period_start)
            .bind(s.current_period_end)
            .bind(s.next_billing_time)
            .bind(s.activated_at)
            .bind(s.cancelled_at)
            .bind(s.suspended_at)
            .bind(s.failed_payments_count)
            .bind(&s.payment_method_brand)
            .bind(&s.card_last_four)
            .bind(s.created_at)
            .bind(s.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }

    async fn update_subscription(&self, s: &Subscription) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE subscriptions SET external_subscription_id = $2, external_plan_id = $3, \
             plan_key = $4, plan_name = $5, amount = $6, currency = $7, status = $8, \
             current_period_start = $9, current_period_end = $10, next_billing_time = $11, \
             activated_at = $12, cancelled_at = $13, suspended_at = $14, \
             failed_payments_count = $15, payment_method_brand = $16, card_last_four = $17, \
             updated_at = $18 WHERE id = $1",
        )
        .bind(s.id)
        .bind(&s.external_subscription_id)
        .bind(&s.external_plan_id)
        .bind(&s.plan_key)
        .bind(&s.plan_name)
        .bind(s.amount)
        .bind(&s.currency)
        .bind(s.status.as_str())
        .bind(s.current_period_start)
        .bind(s.current_period_end)
        .bind(s.next_billing_time)
        .bind(s.activated_at)
        .bind(s.cancelled_at)
        .bind(s.suspended_at)
        .bind(s.failed_payments_count)
        .bind(&s.payment_method_brand)
        .bind(&s.card_last_four)
        .bind(s.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Subscription {} not found", s.id)));
        }
        Ok(())
    }

    async fn list_transactions(&self, subscription_id: Uuid) -> PortResult<Vec<PaymentTransaction>> {
        let records = sqlx::query_as::<_, TransactionRecord>(
            "SELECT id, subscription_id, external_transaction_id, gross_amount, fee_amount, \
             net_amount, currency, status, paid_at FROM payment_transactions \
             WHERE subscription_id = $1 ORDER BY paid_at DESC NULLS LAST",
        )
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        records.into_iter().map(TransactionRecord::to_domain).collect()
    }
}
