//! services/api/src/web/middleware.rs
//!
//! Company identification and the product access gate.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use compliance_core::domain::Company;
use compliance_core::ports::PortError;
use compliance_core::trial::has_access;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::web::state::AppState;

/// The header carrying the calling company's id.
pub const COMPANY_HEADER: &str = "x-company-id";

/// Resolves the calling company and inserts it into the request extensions.
///
/// Missing or malformed ids return 401 Unauthorized; unknown companies 404.
pub async fn require_company(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let company_id = company_id_from(&req)?;
    let company = load_company(&state, company_id).await?;
    req.extensions_mut().insert(company);
    Ok(next.run(req).await)
}

/// Like [`require_company`], but also refuses companies whose trial has run out
/// without a subscription (402 Payment Required).
///
/// Access is evaluated against the clock on every request; nothing is cached.
pub async fn require_access(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let company_id = company_id_from(&req)?;
    let company = load_company(&state, company_id).await?;
    if !has_access(Some(&company), state.clock.now()) {
        debug!(company_id = %company.id, "Access denied: trial expired and no subscription");
        return Err(StatusCode::PAYMENT_REQUIRED);
    }
    req.extensions_mut().insert(company);
    Ok(next.run(req).await)
}

/// Reads the company id from the header. Kept synchronous so the request is not
/// held across an await.
fn company_id_from(req: &Request) -> Result<Uuid, StatusCode> {
    req.headers()
        .get(COMPANY_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or(StatusCode::UNAUTHORIZED)
}

async fn load_company(state: &AppState, company_id: Uuid) -> Result<Company, StatusCode> {
    state.db.get_company(company_id).await.map_err(|e| match e {
        PortError::NotFound(_) => {
            warn!(company_id = %company_id, "Request for unknown company");
            StatusCode::NOT_FOUND
        }
        other => {
            error!("Failed to load company: {:?}", other);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    })
}
