use serde::{Deserialize, Serialize};

use super::{Fetchers, Page, Volatility};
use crate::client::QueryRequest;
use crate::error::ErpError;
use crate::filter::Filter;
use crate::normalize::Record;

const FIELDS: &[&str] = &[
    "NUFIN",
    "CODPARC",
    "NUMNOTA",
    "DTNEG",
    "DTVENC",
    "VLRDESDOB",
    "CODTIPTIT",
    "HISTORICO",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceivableQuery {
    pub partner: Option<i64>,
    pub page: u32,
}

/// Open receivables: income titles not yet settled.
fn criteria(query: &ReceivableQuery) -> Filter {
    Filter::new()
        .eq("RECDESP", 1)
        .is_null("DHBAIXA")
        .eq_opt("CODPARC", query.partner)
}

impl Fetchers {
    pub async fn receivables(&self, query: &ReceivableQuery) -> Result<Page<Record>, ErpError> {
        let key = self.cache.key("receivables", query);
        let request = QueryRequest::new("Financeiro", FIELDS)
            .criteria(criteria(query).expression())
            .order_by("DTVENC")
            .page(query.page);
        let (page, page_size) = (query.page, self.page_size);

        self.cache
            .get_or_fetch(&key, self.cache.ttl(Volatility::Transactional), move || async move {
                let entities = self.client.load_records(&request).await?;
                Ok(Page::from_entities(entities, page, page_size))
            })
            .await
    }
}
