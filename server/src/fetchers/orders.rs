use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Fetchers, Page, Volatility};
use crate::client::{QueryRequest, SaveRecord, SaveRequest};
use crate::error::ErpError;
use crate::filter::Filter;
use crate::normalize::Record;

const ENTITY: &str = "CabecalhoNota";
const HEADER_FIELDS: &[&str] = &[
    "NUNOTA",
    "NUMNOTA",
    "CODEMP",
    "CODPARC",
    "CODVEND",
    "CODTIPOPER",
    "CODTIPVENDA",
    "DTNEG",
    "VLRNOTA",
    "STATUSNOTA",
];
const SAVE_FIELDS: &[&str] = &[
    "CODEMP",
    "CODPARC",
    "CODTIPOPER",
    "CODTIPVENDA",
    "CODVEND",
    "OBSERVACAO",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderQuery {
    /// Operation type the orders were created from.
    pub model: Option<i64>,
    pub partner: Option<i64>,
    pub salesperson: Option<i64>,
    pub page: u32,
}

/// Order header to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub company: i64,
    pub partner: i64,
    pub operation_type: i64,
    pub negotiation_type: i64,
    #[serde(default)]
    pub salesperson: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewOrder {
    /// Codes must be positive.
    pub fn validate(&self) -> Result<(), String> {
        let codes = [
            ("company", self.company),
            ("partner", self.partner),
            ("operation_type", self.operation_type),
            ("negotiation_type", self.negotiation_type),
            ("salesperson", self.salesperson.unwrap_or(1)),
        ];
        match codes.iter().find(|(_, code)| *code <= 0) {
            Some((name, code)) => Err(format!("{name} must be a positive code, got {code}")),
            None => Ok(()),
        }
    }

    fn to_save_request(&self) -> SaveRequest {
        let mut values = Map::new();
        values.insert("CODEMP".to_string(), Value::from(self.company));
        values.insert("CODPARC".to_string(), Value::from(self.partner));
        values.insert("CODTIPOPER".to_string(), Value::from(self.operation_type));
        values.insert("CODTIPVENDA".to_string(), Value::from(self.negotiation_type));
        if let Some(salesperson) = self.salesperson {
            values.insert("CODVEND".to_string(), Value::from(salesperson));
        }
        if let Some(notes) = &self.notes {
            values.insert("OBSERVACAO".to_string(), Value::from(notes.as_str()));
        }
        SaveRequest::new(ENTITY, SAVE_FIELDS).record(SaveRecord { pk: None, values })
    }
}

/// Result of a successful order creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    /// Unique order number assigned by the ERP, when it reports one.
    pub order_number: Option<String>,
    pub response: Value,
}

impl OrderReceipt {
    fn from_response(response: Value) -> Self {
        let order_number = response
            .pointer("/responseBody/result/0/0")
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        Self {
            order_number,
            response,
        }
    }
}

fn criteria(query: &OrderQuery) -> Filter {
    Filter::new()
        .eq_opt("CODTIPOPER", query.model)
        .eq_opt("CODPARC", query.partner)
        .eq_opt("CODVEND", query.salesperson)
}

impl Fetchers {
    /// Order headers, newest first.
    pub async fn orders_by_model(&self, query: &OrderQuery) -> Result<Page<Record>, ErpError> {
        let key = self.cache.key("orders", query);
        let request = QueryRequest::new(ENTITY, HEADER_FIELDS)
            .criteria(criteria(query).expression())
            .order_by("DTNEG DESC, NUNOTA DESC")
            .page(query.page);
        let (page, page_size) = (query.page, self.page_size);

        self.cache
            .get_or_fetch(&key, self.cache.ttl(Volatility::Transactional), move || async move {
                let entities = self.client.load_records(&request).await?;
                Ok(Page::from_entities(entities, page, page_size))
            })
            .await
    }

    /// Create an order header. Nothing is cached and failures reach the caller.
    pub async fn create_order(&self, order: &NewOrder) -> Result<OrderReceipt, ErpError> {
        let response = self.client.save_records(&order.to_save_request()).await?;
        let receipt = OrderReceipt::from_response(response);
        tracing::info!(
            order_number = receipt.order_number.as_deref().unwrap_or("unknown"),
            partner = order.partner,
            "Order created"
        );
        Ok(receipt)
    }
}
