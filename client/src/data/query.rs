//! Backend-neutral query description
//!
//! A `Query` is what the data service executes: equality and range filters,
//! a case-insensitive substring match across several columns, an ordering,
//! and related rows to embed through foreign keys. The PostgREST adapter renders it as URL parameters, the
//! in-memory adapter evaluates it directly.

use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::service::Resource;

/// One row predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(&'static str, Value),
    Gte(&'static str, f64),
    Lte(&'static str, f64),
    /// Case-insensitive substring match on any of the columns
    Search(Vec<&'static str>, String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: &'static str,
    pub ascending: bool,
}

/// A related row pulled in through a foreign-key column, rendered as
/// `alias:foreign_key(columns)` in the select list
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Embed {
    pub alias: &'static str,
    pub foreign_key: &'static str,
    pub resource: Resource,
    pub columns: &'static [&'static str],
}

impl Embed {
    fn select_item(&self) -> String {
        format!("{}:{}({})", self.alias, self.foreign_key, self.columns.join(","))
    }

    /// Projection of the referenced row, or null when the key dangles
    pub fn project(&self, related: Option<&Value>) -> Value {
        let Some(Value::Object(related)) = related else {
            return Value::Null;
        };
        let projected: Map<String, Value> = self
            .columns
            .iter()
            .filter_map(|column| related.get(*column).map(|v| (column.to_string(), v.clone())))
            .collect();
        Value::Object(projected)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub resource: Resource,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub embeds: Vec<Embed>,
}

impl Query {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            filters: Vec::new(),
            order: None,
            embeds: Vec::new(),
        }
    }

    pub fn embed(mut self, embeds: &[Embed]) -> Self {
        self.embeds.extend_from_slice(embeds);
        self
    }

    pub fn eq(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column, value.into()));
        self
    }

    pub fn gte(mut self, column: &'static str, bound: f64) -> Self {
        self.filters.push(Filter::Gte(column, bound));
        self
    }

    pub fn lte(mut self, column: &'static str, bound: f64) -> Self {
        self.filters.push(Filter::Lte(column, bound));
        self
    }

    pub fn search(mut self, columns: &[&'static str], text: impl Into<String>) -> Self {
        self.filters
            .push(Filter::Search(columns.to_vec(), text.into()));
        self
    }

    pub fn order(mut self, column: &'static str, ascending: bool) -> Self {
        self.order = Some(Order { column, ascending });
        self
    }

    /// Render as PostgREST query parameters
    pub fn to_postgrest_params(&self) -> Vec<(String, String)> {
        let select = std::iter::once("*".to_string())
            .chain(self.embeds.iter().map(Embed::select_item))
            .collect::<Vec<_>>()
            .join(",");
        let mut params = vec![("select".to_string(), select)];

        for filter in &self.filters {
            match filter {
                Filter::Eq(column, value) => {
                    params.push((column.to_string(), format!("eq.{}", value_text(value))));
                }
                Filter::Gte(column, bound) => {
                    params.push((column.to_string(), format!("gte.{bound}")));
                }
                Filter::Lte(column, bound) => {
                    params.push((column.to_string(), format!("lte.{bound}")));
                }
                Filter::Search(columns, text) => {
                    let pattern = quote_operand(&format!("*{}*", like_literal(text)));
                    let clauses: Vec<String> = columns
                        .iter()
                        .map(|column| format!("{column}.ilike.{pattern}"))
                        .collect();
                    params.push(("or".to_string(), format!("({})", clauses.join(","))));
                }
            }
        }

        if let Some(order) = &self.order {
            let direction = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{direction}", order.column)));
        }

        params
    }

    /// Whether `row` passes every filter
    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|filter| match filter {
            Filter::Eq(column, expected) => values_equal(row.get(*column), expected),
            Filter::Gte(column, bound) => number(row.get(*column)).is_some_and(|v| v >= *bound),
            Filter::Lte(column, bound) => number(row.get(*column)).is_some_and(|v| v <= *bound),
            Filter::Search(columns, text) => {
                let needle: Vec<char> = text.to_lowercase().chars().collect();
                columns.iter().any(|column| {
                    row.get(*column)
                        .and_then(Value::as_str)
                        .is_some_and(|hay| contains_pattern(&hay.to_lowercase(), &needle))
                })
            }
        })
    }

    /// Sort rows by the query's order; nulls sort last in both directions
    pub fn sort(&self, rows: &mut [Value]) {
        let Some(order) = &self.order else {
            return;
        };
        rows.sort_by(|a, b| {
            let (a, b) = (a.get(order.column), b.get(order.column));
            match (is_null(a), is_null(b)) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => {
                    let ord = compare_values(a, b);
                    if order.ascending { ord } else { ord.reverse() }
                }
            }
        });
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Escape LIKE metacharacters so search text matches literally. PostgREST
/// turns every `*` into `%` and offers no escape for it, so a literal `*`
/// becomes the single-character wildcard `_`.
fn like_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '%' | '_' => {
                out.push('\\');
                out.push(c);
            }
            '*' => out.push('_'),
            _ => out.push(c),
        }
    }
    out
}

/// Substring test mirroring `like_literal`: `*` in the needle matches any
/// one character, everything else matches itself
fn contains_pattern(hay: &str, needle: &[char]) -> bool {
    if needle.is_empty() {
        return true;
    }
    let hay: Vec<char> = hay.chars().collect();
    hay.windows(needle.len()).any(|window| {
        window
            .iter()
            .zip(needle)
            .all(|(h, n)| *n == '*' || h == n)
    })
}

/// Quote an operand for use inside `or=(...)`; PostgREST reserves `,.:()`
fn quote_operand(raw: &str) -> String {
    let escaped = raw.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

fn is_null(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn values_equal(actual: Option<&Value>, expected: &Value) -> bool {
    let Some(actual) = actual else {
        return false;
    };
    match (actual, expected) {
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            match (number(Some(actual)), number(Some(expected))) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        _ => actual == expected,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    if let (Some(x), Some(y)) = (number(a), number(b))
        && matches!(a, Some(Value::Number(_)))
    {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    match (a, b) {
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}
