use serde::{Deserialize, Serialize};

use super::{Fetchers, Page, Volatility};
use crate::client::QueryRequest;
use crate::error::ErpError;
use crate::filter::Filter;
use crate::normalize::Record;

const ENTITY: &str = "Parceiro";
const FIELDS: &[&str] = &[
    "CODPARC",
    "NOMEPARC",
    "RAZAOSOCIAL",
    "CGC_CPF",
    "TIPPESSOA",
    "CODVEND",
    "CODCID",
    "TELEFONE",
    "EMAIL",
    "CLIENTE",
    "ATIVO",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartnerQuery {
    pub name: Option<String>,
    /// CNPJ/CPF fragment.
    pub document: Option<String>,
    /// Restricts the listing to one salesperson's portfolio.
    pub salesperson: Option<i64>,
    pub page: u32,
}

fn criteria(query: &PartnerQuery) -> Filter {
    Filter::new()
        .eq("ATIVO", "S")
        .contains_opt("NOMEPARC", query.name.as_deref())
        .contains_opt("CGC_CPF", query.document.as_deref())
        .eq_opt("CODVEND", query.salesperson)
}

impl Fetchers {
    /// Active partners matching `query`.
    pub async fn partners(&self, query: &PartnerQuery) -> Result<Page<Record>, ErpError> {
        let key = self.cache.key("partners", query);
        let request = QueryRequest::new(ENTITY, FIELDS)
            .criteria(criteria(query).expression())
            .order_by("NOMEPARC")
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
