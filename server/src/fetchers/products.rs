use serde::{Deserialize, Serialize};

use super::{Fetchers, Page, Volatility};
use crate::client::QueryRequest;
use crate::error::ErpError;
use crate::filter::Filter;
use crate::normalize::Record;

const PRODUCT_FIELDS: &[&str] = &[
    "CODPROD",
    "DESCRPROD",
    "REFERENCIA",
    "MARCA",
    "CODGRUPOPROD",
    "CODVOL",
    "ATIVO",
];

const STOCK_FIELDS: &[&str] = &[
    "CODPROD",
    "CODEMP",
    "CODLOCAL",
    "CONTROLE",
    "ESTOQUE",
    "RESERVADO",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductQuery {
    pub description: Option<String>,
    pub code: Option<i64>,
    pub group: Option<i64>,
    pub page: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockQuery {
    pub product: i64,
    pub company: Option<i64>,
}

fn product_criteria(query: &ProductQuery) -> Filter {
    Filter::new()
        .eq("ATIVO", "S")
        .contains_opt("DESCRPROD", query.description.as_deref())
        .eq_opt("CODPROD", query.code)
        .eq_opt("CODGRUPOPROD", query.group)
}

fn stock_criteria(query: &StockQuery) -> Filter {
    Filter::new()
        .eq("CODPROD", query.product)
        .eq_opt("CODEMP", query.company)
}

impl Fetchers {
    /// Product catalog page.
    ///
    /// The same listing is often requested by several widgets at once, so
    /// identical misses share one outbound query.
    pub async fn products(&self, query: &ProductQuery) -> Result<Page<Record>, ErpError> {
        let key = self.cache.key("products", query);
        let request = QueryRequest::new("Produto", PRODUCT_FIELDS)
            .criteria(product_criteria(query).expression())
            .order_by("DESCRPROD")
            .page(query.page);
        let (page, page_size) = (query.page, self.page_size);

        self.cache
            .get_or_fetch(&key, self.cache.ttl(Volatility::Reference), move || async move {
                let entities = self.client.load_records_deduplicated(&request).await?;
                Ok(Page::from_entities(entities, page, page_size))
            })
            .await
    }

    /// Stock positions of one product, per company and location.
    pub async fn stock(&self, query: &StockQuery) -> Result<Vec<Record>, ErpError> {
        let key = self.cache.key("stock", query);
        let request = QueryRequest::new("Estoque", STOCK_FIELDS)
            .criteria(stock_criteria(query).expression())
            .order_by("CODEMP, CODLOCAL");

        self.cache
            .get_or_fetch(&key, self.cache.ttl(Volatility::Stock), move || async move {
                Ok(self.client.load_records(&request).await?.records)
            })
            .await
    }
}
