use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use validator::Validate;

use crate::error::{ApiError, Result};
use crate::fakestore::{Category, FakeStoreService, Product};
use crate::financial::{FinancialRawInfo, FinancialResultInfo, FinancialService, DEFAULT_ROUNDING_DIGITS};
use crate::health::{HealthChecker, HealthStatus};
use crate::response::{MessageResponse, ReadinessResponse};

/// Shared application state. Everything in it is immutable after startup.
#[derive(Clone)]
pub struct AppState {
    pub financial: FinancialService,
    pub catalog: Arc<FakeStoreService>,
    pub health: HealthChecker,
    pub fanout_concurrency: usize,
}

pub async fn ping() -> Json<MessageResponse> {
    Json(MessageResponse::new("pong"))
}

/// POST /calculate
pub async fn calculate(State(state): State<AppState>, body: Bytes) -> Result<Json<FinancialResultInfo>> {
    let request = parse_financial_body(&body)?;

    request
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let result = state.financial.calculate(&request, DEFAULT_ROUNDING_DIGITS)?;
    Ok(Json(result))
}

fn parse_financial_body(body: &[u8]) -> Result<FinancialRawInfo> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::BadRequest("Request body is empty".to_string()));
    }
    let Json(request) = Json::<FinancialRawInfo>::from_bytes(body)
        .map_err(|rejection| ApiError::BadRequest(format!("Invalid request: {}", rejection.body_text())))?;
    Ok(request)
}

/// GET /fake-store/all/category
pub async fn all_categories(State(state): State<AppState>) -> Result<Json<Vec<Category>>> {
    Ok(Json(state.catalog.categories(false).await?))
}

/// GET /fake-store/all/category/products
pub async fn all_category_products(State(state): State<AppState>) -> Result<Json<Vec<Product>>> {
    let categories = state.catalog.categories(false).await?;
    let products = state
        .catalog
        .all_category_products(categories, state.fanout_concurrency)
        .await
        .map_err(|e| ApiError::Internal(format!("err when getting categories products: {}", e)))?;
    Ok(Json(products))
}

/// GET /fake-store/products/:id
pub async fn product(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Product>> {
    Ok(Json(state.catalog.product(id).await?))
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(state.health.check_health().await)
}

/// Readiness check endpoint; not ready while the store is unreachable.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_connected = state.health.check_store().await.is_healthy();
    let status = if store_connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(ReadinessResponse::ready(store_connected)))
}
