//! Server-side filter, sort and page-size parameters for a collection read

use std::cmp::Ordering;

use entities::Fields;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    /// Parse the API's sort notation, where a leading `-` means descending
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('-') {
            Some(field) => Self::desc(field),
            None => Self::asc(raw),
        }
    }

    pub fn to_param(&self) -> String {
        if self.descending {
            format!("-{}", self.field)
        } else {
            self.field.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Fields,
    pub sort: Option<SortKey>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Fields) -> Self {
        self.filter = filter;
        self
    }

    pub fn sort(mut self, sort: SortKey) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Equality match on every filter field. An array field matches a
    /// scalar filter value when it contains it
    pub fn matches(&self, record: &Value) -> bool {
        self.filter.iter().all(|(field, expected)| {
            match (record.get(field), expected) {
                (Some(Value::Array(values)), scalar) if !scalar.is_array() => {
                    values.contains(scalar)
                }
                (Some(actual), expected) => actual == expected,
                (None, Value::Null) => true,
                (None, _) => false,
            }
        })
    }

    /// Order two records by the sort key. Without a key the order is stable
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let Some(sort) = &self.sort else {
            return Ordering::Equal;
        };
        let ordering = compare_values(a.get(&sort.field), b.get(&sort.field));
        if sort.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn filter(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn sort_notation() {
        assert_eq!(SortKey::parse("-created_date"), SortKey::desc("created_date"));
        assert_eq!(SortKey::parse("title").to_param(), "title");
        assert_eq!(SortKey::desc("updated_date").to_param(), "-updated_date");
    }

    #[test]
    fn matches_scalars_and_array_membership() {
        let query = Query::new().filter(filter(json!({
            "read": false,
            "collaborator_emails": "ada@example.com"
        })));

        assert!(query.matches(&json!({
            "read": false,
            "collaborator_emails": ["grace@example.com", "ada@example.com"]
        })));
        assert!(!query.matches(&json!({
            "read": true,
            "collaborator_emails": ["ada@example.com"]
        })));
        assert!(!query.matches(&json!({ "read": false })));
    }

    #[test]
    fn descending_compare_puts_newest_first() {
        let query = Query::new().sort(SortKey::desc("created_date"));
        let older = json!({ "created_date": "2025-01-01T00:00:00Z" });
        let newer = json!({ "created_date": "2025-02-01T00:00:00Z" });
        assert_eq!(query.compare(&newer, &older), Ordering::Less);
        assert_eq!(Query::new().compare(&newer, &older), Ordering::Equal);
    }
}
