//! Authenticated calls into the ERP with retry.

use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::dedup::{dedup_key, RequestDeduplicator};
use crate::error::ErpError;
use crate::login::join_url;
use crate::normalize::{check_status, parse_entities, EntityPage};
use crate::recorder::{report, RequestRecord, RequestRecorder};
use crate::token::TokenManager;

#[derive(Debug, Clone, Copy)]
pub struct RetrySettings {
    /// Retries after a 5xx or network failure; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Linear backoff step: the n-th retry waits `base_delay * n`.
    pub base_delay: Duration,
    /// Pause before the single retry that follows a 401/403.
    pub session_retry_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            session_retry_delay: Duration::from_millis(500),
        }
    }
}

impl From<&sankhya_config::RetryConfig> for RetrySettings {
    fn from(config: &sankhya_config::RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            session_retry_delay: Duration::from_millis(config.session_retry_delay_ms),
        }
    }
}

/// Body of a `loadRecords` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub root_entity: String,
    pub fields: Vec<String>,
    /// Criteria expression; empty means no filter.
    pub criteria: String,
    pub order_by: Option<String>,
    /// Zero-based page offset.
    pub page: u32,
}

impl QueryRequest {
    pub fn new(root_entity: &str, fields: &[&str]) -> Self {
        Self {
            root_entity: root_entity.to_string(),
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
            criteria: String::new(),
            order_by: None,
            page: 0,
        }
    }

    #[must_use]
    pub fn criteria(mut self, expression: String) -> Self {
        self.criteria = expression;
        self
    }

    #[must_use]
    pub fn order_by(mut self, expression: &str) -> Self {
        self.order_by = Some(expression.to_string());
        self
    }

    #[must_use]
    pub const fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn body(&self) -> Value {
        let mut data_set = json!({
            "rootEntity": self.root_entity,
            "includePresentationFields": "N",
            "offsetPage": self.page.to_string(),
            "entity": {"fieldset": {"list": self.fields.join(",")}},
        });
        if !self.criteria.is_empty() {
            data_set["criteria"] = json!({"expression": {"$": self.criteria}});
        }
        if let Some(order_by) = &self.order_by {
            data_set["orderByExpression"] = json!({"$": order_by});
        }
        json!({
            "serviceName": "CRUDServiceProvider.loadRecords",
            "requestBody": {"dataSet": data_set},
        })
    }
}

/// One row to insert or update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveRecord {
    /// Primary key of an existing row; absent for inserts.
    pub pk: Option<Map<String, Value>>,
    pub values: Map<String, Value>,
}

/// Body of a `DatasetSP.save` call.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest {
    pub entity: String,
    pub fields: Vec<String>,
    pub records: Vec<SaveRecord>,
}

impl SaveRequest {
    pub fn new(entity: &str, fields: &[&str]) -> Self {
        Self {
            entity: entity.to_string(),
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
            records: Vec::new(),
        }
    }

    #[must_use]
    pub fn record(mut self, record: SaveRecord) -> Self {
        self.records.push(record);
        self
    }

    /// Values are keyed by 1-based position in `fields`; fields a record
    /// does not set are left out.
    pub fn body(&self) -> Value {
        let records: Vec<Value> = self
            .records
            .iter()
            .map(|record| {
                let values: Map<String, Value> = self
                    .fields
                    .iter()
                    .enumerate()
                    .filter_map(|(i, field)| {
                        record
                            .values
                            .get(field)
                            .map(|v| ((i + 1).to_string(), v.clone()))
                    })
                    .collect();
                let mut row = json!({"values": values});
                if let Some(pk) = &record.pk {
                    row["pk"] = Value::Object(pk.clone());
                }
                row
            })
            .collect();

        json!({
            "serviceName": "DatasetSP.save",
            "requestBody": {
                "entityName": self.entity,
                "standAlone": false,
                "fields": self.fields,
                "records": records,
            },
        })
    }
}

enum Attempt {
    Success(Value),
    /// 401 or 403, with the token the ERP refused.
    Unauthorized { status: StatusCode, token: String },
    /// 5xx or network failure.
    Transient(String),
    Failed(ErpError),
}

/// Executes ERP calls with the shared bearer token.
#[derive(Clone)]
pub struct ErpClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: Client,
    base_url: String,
    query_path: String,
    save_path: String,
    tokens: TokenManager,
    recorder: Arc<dyn RequestRecorder>,
    retry: RetrySettings,
    in_flight: RequestDeduplicator<Value>,
}

impl ErpClient {
    pub fn new(
        config: &sankhya_config::SankhyaConfig,
        retry: RetrySettings,
        tokens: TokenManager,
        recorder: Arc<dyn RequestRecorder>,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                base_url: config.base_url.clone(),
                query_path: config.query_path.clone(),
                save_path: config.save_path.clone(),
                tokens,
                recorder,
                retry,
                in_flight: RequestDeduplicator::new(),
            }),
        })
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.inner.tokens
    }

    /// Outbound calls currently shared through [`ErpClient::execute_deduplicated`].
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.in_flight()
    }

    /// Call `path` on the ERP and return its JSON response.
    ///
    /// A 401/403 invalidates the refused credential and retries once with a new
    /// token. 5xx and network failures retry with linear backoff up to
    /// `max_retries` times. Other 4xx fail at once.
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ErpError> {
        let url = join_url(&self.inner.base_url, path);
        self.inner.execute(&method, &url, body.as_ref()).await
    }

    /// Like [`ErpClient::execute`], collapsing concurrent identical calls into one.
    pub async fn execute_deduplicated(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ErpError> {
        let url = join_url(&self.inner.base_url, path);
        let key = dedup_key(method.as_str(), &url, body.as_ref().unwrap_or(&Value::Null));
        let inner = Arc::clone(&self.inner);
        self.inner
            .in_flight
            .dedupe(&key, move || async move {
                inner.execute(&method, &url, body.as_ref()).await
            })
            .await
    }

    /// Run a `loadRecords` query and normalize its rows.
    pub async fn load_records(&self, query: &QueryRequest) -> Result<EntityPage, ErpError> {
        let path = self.inner.query_path.clone();
        let body = self.execute(Method::POST, &path, Some(query.body())).await?;
        parse_entities(&body)
    }

    pub async fn load_records_deduplicated(
        &self,
        query: &QueryRequest,
    ) -> Result<EntityPage, ErpError> {
        let path = self.inner.query_path.clone();
        let body = self
            .execute_deduplicated(Method::POST, &path, Some(query.body()))
            .await?;
        parse_entities(&body)
    }

    pub async fn save_records(&self, request: &SaveRequest) -> Result<Value, ErpError> {
        let path = self.inner.save_path.clone();
        let body = self.execute(Method::POST, &path, Some(request.body())).await?;
        check_status(&body)?;
        Ok(body)
    }
}

impl ClientInner {
    async fn execute(
        &self,
        method: &Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Value, ErpError> {
        let mut session_retried = false;
        let mut retries = 0u32;
        loop {
            match self.attempt(method, url, body).await {
                Attempt::Success(value) => return Ok(value),
                Attempt::Unauthorized { status, token } => {
                    self.tokens.invalidate_if(&token).await;
                    if session_retried {
                        tracing::warn!(%url, %status, "Session rejected after token refresh");
                        return Err(ErpError::SessionExpired);
                    }
                    session_retried = true;
                    tracing::info!(%url, %status, "Session rejected; retrying with a new token");
                    tokio::time::sleep(self.retry.session_retry_delay).await;
                }
                Attempt::Transient(reason) => {
                    if retries >= self.retry.max_retries {
                        return Err(ErpError::ServiceUnavailable(reason));
                    }
                    retries += 1;
                    let delay = self.retry.base_delay * retries;
                    tracing::warn!(%url, retry = retries, delay_ms = delay.as_millis(), %reason, "Retrying ERP call");
                    tokio::time::sleep(delay).await;
                }
                Attempt::Failed(err) => return Err(err),
            }
        }
    }

    async fn attempt(&self, method: &Method, url: &str, body: Option<&Value>) -> Attempt {
        let token = match self.tokens.get_token(false).await {
            Ok(token) => token,
            Err(e) => {
                self.record(method, url, None, Duration::ZERO, false, Some(e.to_string()));
                return Attempt::Failed(e);
            }
        };

        let start = Instant::now();
        let mut request = self.http.request(method.clone(), url).bearer_auth(&token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                self.record(method, url, None, start.elapsed(), true, Some(e.to_string()));
                return Attempt::Transient(e.to_string());
            }
        };

        let status = response.status();
        if status.is_success() {
            return match response.json::<Value>().await {
                Ok(value) => {
                    self.record(method, url, Some(status), start.elapsed(), true, None);
                    Attempt::Success(value)
                }
                Err(e) => {
                    self.record(method, url, Some(status), start.elapsed(), true, Some(e.to_string()));
                    Attempt::Failed(ErpError::InvalidResponse(e.to_string()))
                }
            };
        }

        let text = response.text().await.unwrap_or_default();
        self.record(method, url, Some(status), start.elapsed(), true, Some(text.clone()));
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Attempt::Unauthorized { status, token },
            s if s.is_server_error() => Attempt::Transient(format!("HTTP {s}: {text}")),
            s => Attempt::Failed(ErpError::RequestFailed {
                status: s.as_u16(),
                body: text,
            }),
        }
    }

    fn record(
        &self,
        method: &Method,
        url: &str,
        status: Option<StatusCode>,
        duration: Duration,
        token_used: bool,
        error: Option<String>,
    ) {
        let record = RequestRecord {
            method: method.to_string(),
            url: url.to_string(),
            status: status.map(|s| s.as_u16()),
            duration,
            token_used,
            error,
        };
        report(self.recorder.as_ref(), &record);
    }
}
