pub mod middleware;
pub mod rest;
pub mod state;

pub use middleware::{require_access, require_company};
pub use rest::ApiDoc;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use rest::{
    access_handler, cancel_subscription_handler, change_card_handler, change_plan_handler,
    classify_handler, create_subscription_handler, current_subscription_handler,
    list_plans_handler, list_transactions_handler, reactivate_subscription_handler,
    register_company_handler, sync_subscription_handler,
};
use state::AppState;

/// Builds the API routes. CORS and the Swagger UI are added by the binary.
pub fn router(app_state: Arc<AppState>) -> Router {
    // Public routes (no company required)
    let public_routes = Router::new()
        .route("/plans", get(list_plans_handler))
        .route("/companies", post(register_company_handler));

    // Routes any known company may call, including after the trial has run out,
    // so that it can subscribe.
    let company_routes = Router::new()
        .route("/access", get(access_handler))
        .route(
            "/subscription",
            get(current_subscription_handler).post(create_subscription_handler),
        )
        .route("/subscription/{id}/change-plan", post(change_plan_handler))
        .route("/subscription/{id}/change-card", post(change_card_handler))
        .route("/subscription/{id}/cancel", post(cancel_subscription_handler))
        .route("/subscription/{id}/reactivate", post(reactivate_subscription_handler))
        .route("/subscription/{id}/sync", post(sync_subscription_handler))
        .route("/subscription/{id}/transactions", get(list_transactions_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_company,
        ));

    // Product routes (subscription or active trial required)
    let gated_routes = Router::new()
        .route("/compliance/classify", post(classify_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_access,
        ));

    Router::new()
        .merge(public_routes)
        .merge(company_routes)
        .merge(gated_routes)
        .with_state(app_state)
}
