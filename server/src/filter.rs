//! Criteria expressions for ERP queries.

/// Value compared by [`Filter::eq`].
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Int(i64),
    Text(String),
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for FilterValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Conjunction of field conditions, rendered as `cond AND cond ...`.
///
/// Text comparisons are case-insensitive substring matches; codes and
/// numbers compare exactly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<String>,
}

impl Filter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, field: &str, value: impl Into<FilterValue>) -> Self {
        let clause = match value.into() {
            FilterValue::Int(v) => format!("{field} = {v}"),
            FilterValue::Text(v) => format!("{field} = '{}'", escape(&v)),
        };
        self.clauses.push(clause);
        self
    }

    /// Exact match when `value` is present; no-op otherwise.
    #[must_use]
    pub fn eq_opt<V: Into<FilterValue>>(self, field: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.eq(field, v),
            None => self,
        }
    }

    /// Case-insensitive substring match; blank text adds nothing.
    #[must_use]
    pub fn contains(mut self, field: &str, text: &str) -> Self {
        let text = text.trim();
        if !text.is_empty() {
            self.clauses.push(format!(
                "UPPER({field}) LIKE UPPER('%{}%')",
                escape(text)
            ));
        }
        self
    }

    #[must_use]
    pub fn contains_opt(self, field: &str, text: Option<&str>) -> Self {
        match text {
            Some(t) => self.contains(field, t),
            None => self,
        }
    }

    #[must_use]
    pub fn is_null(mut self, field: &str) -> Self {
        self.clauses.push(format!("{field} IS NULL"));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Rendered expression; empty when there are no conditions.
    pub fn expression(&self) -> String {
        self.clauses.join(" AND ")
    }
}

fn escape(text: &str) -> String {
    text.replace('\'', "''")
}
