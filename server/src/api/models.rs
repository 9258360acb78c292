use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub instance_id: String,
    /// Whether a valid ERP credential is currently stored.
    pub authenticated: bool,
}

/// Query string of the stock endpoint; the product comes from the path.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StockParams {
    pub company: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
}
