//! Decoding of the ERP's positional record encoding.
//!
//! A query response carries the column names once, in
//! `entities.metadata.fields.field`, and every row as an object whose
//! `f0`, `f1`, ... members hold `{"$": value}` for the matching column. A
//! slot that is missing or has no `$` member is a null and is left out of
//! the normalized record.

use serde_json::{Map, Value};

use crate::error::ErpError;

/// A row with its values addressed by column name.
pub type Record = Map<String, Value>;

/// Ordered column names of a query response.
///
/// One entry per position; a column the metadata leaves unnamed is `None`
/// so the columns after it keep their `fN` slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSchema(Vec<Option<String>>);

impl ColumnSchema {
    #[must_use]
    pub fn new(names: Vec<String>) -> Self {
        Self(names.into_iter().map(Some).collect())
    }

    /// Name of the column at `position`, if it has one.
    pub fn name(&self, position: usize) -> Option<&str> {
        self.0.get(position).and_then(Option::as_deref)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Read `metadata.fields.field`, which is an array or, for one column, a bare object.
    fn from_metadata(metadata: Option<&Value>) -> Self {
        let names = metadata
            .and_then(|m| m.get("fields"))
            .and_then(|f| f.get("field"))
            .map(one_or_many)
            .unwrap_or_default()
            .into_iter()
            .map(|field| field.get("name").and_then(Value::as_str).map(str::to_string))
            .collect();
        Self(names)
    }
}

impl<S: Into<String>> FromIterator<S> for ColumnSchema {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(|name| Some(name.into())).collect())
    }
}

/// Values of one row in column order; `None` marks an absent slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(Vec<Option<Value>>);

impl Row {
    #[must_use]
    pub const fn new(values: Vec<Option<Value>>) -> Self {
        Self(values)
    }

    /// Pull slots `f0..f{width}` out of a raw entity object.
    pub fn from_positional(entity: &Value, width: usize) -> Self {
        let values = (0..width)
            .map(|i| entity.get(format!("f{i}")).and_then(|slot| slot.get("$")).cloned())
            .collect();
        Self(values)
    }
}

/// Zip column names with row values, dropping absent slots and unnamed columns.
pub fn normalize(schema: &ColumnSchema, row: &Row) -> Record {
    schema
        .0
        .iter()
        .zip(row.0.iter())
        .filter_map(|(name, value)| Some((name.clone()?, value.clone()?)))
        .collect()
}

/// Normalized rows of one query response page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityPage {
    pub records: Vec<Record>,
    /// Total matching rows across all pages, when the ERP reports it.
    pub total: Option<u64>,
}

/// Decode a query response body into named records.
///
/// A body without `entities` or without `entities.entity` is an empty
/// result. A body flagged `status: "0"` is an ERP-side failure.
pub fn parse_entities(body: &Value) -> Result<EntityPage, ErpError> {
    check_status(body)?;

    let Some(entities) = body.get("responseBody").and_then(|b| b.get("entities")) else {
        return Ok(EntityPage::default());
    };

    let total = entities.get("total").and_then(parse_count);
    let schema = ColumnSchema::from_metadata(entities.get("metadata"));

    let records = entities
        .get("entity")
        .map(one_or_many)
        .unwrap_or_default()
        .into_iter()
        .map(|entity| normalize(&schema, &Row::from_positional(entity, schema.len())))
        .collect();

    Ok(EntityPage { records, total })
}

/// Service responses carry `status: "0"` and a `statusMessage` when the ERP rejected the call.
pub fn check_status(body: &Value) -> Result<(), ErpError> {
    if body.get("status").and_then(Value::as_str) == Some("0") {
        let message = body
            .get("statusMessage")
            .and_then(Value::as_str)
            .unwrap_or("unspecified ERP error");
        return Err(ErpError::InvalidResponse(message.to_string()));
    }
    Ok(())
}

fn one_or_many(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// The ERP reports counts as strings or numbers.
fn parse_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
