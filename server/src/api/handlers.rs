use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::models::{ErrorResponse, HealthResponse, ListResponse, StockParams};
use crate::error::ErpError;
use crate::fetchers::{
    NewOrder, OperationTypeQuery, OrderQuery, OrderReceipt, Page, PartnerQuery, ProductQuery,
    ReceivableQuery, StockQuery,
};
use crate::normalize::Record;
use crate::state::AppState;

pub type AppResult<T> = Result<T, AppError>;

pub enum AppError {
    Erp(ErpError),
    BadRequest(String),
}

impl From<ErpError> for AppError {
    fn from(err: ErpError) -> Self {
        Self::Erp(err)
    }
}

impl AppError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Erp(ErpError::ServiceUnavailable(_) | ErpError::LockTimeout) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Erp(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let error = match self {
            Self::Erp(e) => e.to_string(),
            Self::BadRequest(msg) => msg,
        };
        let body = Json(ErrorResponse {
            error,
            code: status.as_u16(),
        });
        (status, body).into_response()
    }
}

/// Read endpoints answer with an empty result rather than an error.
fn degrade<T: Default>(operation: &str, result: Result<T, ErpError>) -> T {
    degrade_or(operation, result, T::default())
}

fn degrade_or<T>(operation: &str, result: Result<T, ErpError>, fallback: T) -> T {
    result.unwrap_or_else(|e| {
        tracing::warn!(operation, error = %e, kind = e.kind(), "Serving empty result");
        fallback
    })
}

fn empty_page(page: u32) -> Page<Record> {
    Page {
        page,
        ..Page::default()
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    use std::sync::LazyLock;

    static INSTANCE_ID: LazyLock<String> =
        LazyLock::new(|| uuid::Uuid::new_v4().to_string()[..8].to_string());

    Json(HealthResponse {
        status: "ok".to_string(),
        instance_id: INSTANCE_ID.clone(),
        authenticated: state.fetchers.client().tokens().current().await.is_some(),
    })
}

pub async fn partners(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PartnerQuery>,
) -> Json<Page<Record>> {
    let result = state.fetchers.partners(&query).await;
    Json(degrade_or("partners", result, empty_page(query.page)))
}

pub async fn products(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProductQuery>,
) -> Json<Page<Record>> {
    let result = state.fetchers.products(&query).await;
    Json(degrade_or("products", result, empty_page(query.page)))
}

pub async fn stock(
    State(state): State<Arc<AppState>>,
    Path(code): Path<i64>,
    Query(params): Query<StockParams>,
) -> Json<ListResponse<Record>> {
    let query = StockQuery {
        product: code,
        company: params.company,
    };
    let items = degrade("stock", state.fetchers.stock(&query).await);
    Json(ListResponse { items })
}

pub async fn operation_types(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OperationTypeQuery>,
) -> Json<ListResponse<Record>> {
    let items = degrade(
        "operation_types",
        state.fetchers.operation_types(&query).await,
    );
    Json(ListResponse { items })
}

pub async fn negotiation_types(State(state): State<Arc<AppState>>) -> Json<ListResponse<Record>> {
    let items = degrade(
        "negotiation_types",
        state.fetchers.negotiation_types().await,
    );
    Json(ListResponse { items })
}

pub async fn orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OrderQuery>,
) -> Json<Page<Record>> {
    let result = state.fetchers.orders_by_model(&query).await;
    Json(degrade_or("orders", result, empty_page(query.page)))
}

pub async fn receivables(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReceivableQuery>,
) -> Json<Page<Record>> {
    let result = state.fetchers.receivables(&query).await;
    Json(degrade_or("receivables", result, empty_page(query.page)))
}

pub async fn create_order(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewOrder>, JsonRejection>,
) -> AppResult<(StatusCode, Json<OrderReceipt>)> {
    let Json(order) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    order.validate().map_err(AppError::BadRequest)?;
    let receipt = state.fetchers.create_order(&order).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}
