//! services/api/src/adapters/processor.rs
//!
//! The HTTP adapter for the `PaymentProcessor` port. The processor is fronted by
//! three hosted functions that take and return JSON and authenticate with a
//! bearer key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use compliance_core::ports::{
    CreateSubscriptionRequest, CreatedSubscription, ManageAction, ManageResponse,
    PaymentProcessor, PortError, PortResult, ProcessorSnapshot,
};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

/// Error codes meaning the stored payment mandate can no longer be charged.
const MANDATE_ERROR_CODES: [&str; 2] = ["MANDATE_INVALID", "SUBSCRIPTION_STATUS_INVALID"];

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Serialize)]
struct CreateBody<'a> {
    plan_key: &'a str,
    company_id: Uuid,
    card_token: &'a str,
    payer_email: &'a str,
}

#[derive(Deserialize)]
struct CreateReply {
    subscription_id: String,
    status: String,
    #[serde(default)]
    plan_id: Option<String>,
}

#[derive(Serialize)]
struct ManageBody<'a> {
    subscription_id: &'a str,
    action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_plan_key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    card_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

impl<'a> ManageBody<'a> {
    fn new(subscription_id: &'a str, action: &'a ManageAction) -> Self {
        let mut body = Self {
            subscription_id,
            action: action.as_str(),
            new_plan_key: None,
            card_token: None,
            reason: None,
        };
        match action {
            ManageAction::ChangePlan { new_plan_key } => body.new_plan_key = Some(new_plan_key),
            ManageAction::ChangeCard { card_token } => body.card_token = Some(card_token),
            ManageAction::Cancel { reason } => body.reason = reason.as_deref(),
            ManageAction::Reactivate => {}
        }
        body
    }
}

#[derive(Deserialize)]
struct ManageReply {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Serialize)]
struct StatusBody<'a> {
    subscription_id: &'a str,
}

#[derive(Deserialize)]
struct StatusReply {
    status: String,
    #[serde(default)]
    plan_key: Option<String>,
    #[serde(default)]
    plan_id: Option<String>,
    #[serde(default)]
    next_billing_time: Option<DateTime<Utc>>,
    #[serde(default)]
    current_period_start: Option<DateTime<Utc>>,
    #[serde(default)]
    current_period_end: Option<DateTime<Utc>>,
    #[serde(default)]
    payment_method_brand: Option<String>,
    #[serde(default)]
    card_last_four: Option<String>,
    #[serde(default)]
    failed_payments_count: Option<i32>,
    #[serde(default)]
    activated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    suspended_at: Option<DateTime<Utc>>,
}

impl StatusReply {
    fn to_domain(self) -> ProcessorSnapshot {
        ProcessorSnapshot {
            status: self.status,
            plan_key: self.plan_key,
            external_plan_id: self.plan_id,
            next_billing_time: self.next_billing_time,
            current_period_start: self.current_period_start,
            current_period_end: self.current_period_end,
            payment_method_brand: self.payment_method_brand,
            card_last_four: self.card_last_four,
            failed_payments_count: self.failed_payments_count,
            activated_at: self.activated_at,
            cancelled_at: self.cancelled_at,
            suspended_at: self.suspended_at,
        }
    }
}

#[derive(Deserialize, Default)]
struct ErrorReply {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

//=========================================================================================
// The Adapter
//=========================================================================================

#[derive(Clone)]
pub struct HttpProcessorAdapter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpProcessorAdapter {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> PortResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PortError::Unexpected(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// POSTs `body` to one hosted function and decodes the reply.
    async fn call<B, T>(&self, function: &str, body: &B) -> PortResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, function);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            error!(function, error = %e, "Payment processor request failed");
            PortError::Processor("The payment processor could not be reached".to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            warn!(function, status = %status, body = %raw, "Payment processor returned an error");
            return Err(error_from_reply(status, &raw));
        }

        response.json::<T>().await.map_err(|e| {
            error!(function, error = %e, "Failed to parse payment processor response");
            PortError::Unexpected(format!("malformed {} response: {}", function, e))
        })
    }
}

/// Maps a failed reply. The processor's own message is kept for the end user.
fn error_from_reply(status: StatusCode, raw: &str) -> PortError {
    let reply: ErrorReply = serde_json::from_str(raw).unwrap_or_default();
    let message = reply
        .error
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("Payment processor error ({})", status));

    if reply
        .code
        .as_deref()
        .is_some_and(|code| MANDATE_ERROR_CODES.contains(&code))
    {
        return PortError::MandateInvalid(message);
    }
    if status == StatusCode::NOT_FOUND {
        return PortError::NotFound(message);
    }
    PortError::Processor(message)
}

#[async_trait]
impl PaymentProcessor for HttpProcessorAdapter {
    #[instrument(skip(self, request), fields(company_id = %request.company_id, plan = %request.plan_key))]
    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> PortResult<CreatedSubscription> {
        debug!("Creating processor subscription");
        let body = CreateBody {
            plan_key: &request.plan_key,
            company_id: request.company_id,
            card_token: &request.card_token,
            payer_email: &request.payer_email,
        };
        let reply: CreateReply = self.call("create-subscription", &body).await?;
        Ok(CreatedSubscription {
            subscription_id: reply.subscription_id,
            status: reply.status,
            external_plan_id: reply.plan_id,
        })
    }

    #[instrument(skip(self, action), fields(action = action.as_str()))]
    async fn manage_subscription(
        &self,
        external_subscription_id: &str,
        action: &ManageAction,
    ) -> PortResult<ManageResponse> {
        debug!("Managing processor subscription");
        let body = ManageBody::new(external_subscription_id, action);
        let reply: ManageReply = self.call("manage-subscription", &body).await?;
        Ok(ManageResponse {
            status: reply.status,
        })
    }

    #[instrument(skip(self))]
    async fn get_subscription_status(
        &self,
        external_subscription_id: &str,
    ) -> PortResult<ProcessorSnapshot> {
        debug!("Reading processor subscription status");
        let body = StatusBody {
            subscription_id: external_subscription_id,
        };
        let reply: StatusReply = self.call("get-subscription-status", &body).await?;
        Ok(reply.to_domain())
    }
}
