//! Near-static lookup tables.

use serde::{Deserialize, Serialize};

use super::{Fetchers, Volatility};
use crate::client::QueryRequest;
use crate::error::ErpError;
use crate::filter::Filter;
use crate::normalize::Record;

const OPERATION_TYPE_FIELDS: &[&str] = &["CODTIPOPER", "DESCROPER", "TIPMOV", "ATIVO"];
const NEGOTIATION_TYPE_FIELDS: &[&str] = &["CODTIPVENDA", "DESCRTIPVENDA", "ATIVO"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationTypeQuery {
    /// Movement code, e.g. `P` for sales orders.
    pub movement: Option<String>,
}

fn operation_type_criteria(query: &OperationTypeQuery) -> Filter {
    Filter::new()
        .eq("ATIVO", "S")
        .eq_opt("TIPMOV", query.movement.clone())
}

impl Fetchers {
    pub async fn operation_types(
        &self,
        query: &OperationTypeQuery,
    ) -> Result<Vec<Record>, ErpError> {
        let key = self.cache.key("operation_types", query);
        let request = QueryRequest::new("TipoOperacao", OPERATION_TYPE_FIELDS)
            .criteria(operation_type_criteria(query).expression())
            .order_by("CODTIPOPER");

        self.cache
            .get_or_fetch(&key, self.cache.ttl(Volatility::Reference), move || async move {
                Ok(self.client.load_records(&request).await?.records)
            })
            .await
    }

    pub async fn negotiation_types(&self) -> Result<Vec<Record>, ErpError> {
        let key = self.cache.key("negotiation_types", &());
        let request = QueryRequest::new("TipoNegociacao", NEGOTIATION_TYPE_FIELDS)
            .criteria(Filter::new().eq("ATIVO", "S").expression())
            .order_by("DESCRTIPVENDA");

        self.cache
            .get_or_fetch(&key, self.cache.ttl(Volatility::Reference), move || async move {
                Ok(self.client.load_records(&request).await?.records)
            })
            .await
    }
}
