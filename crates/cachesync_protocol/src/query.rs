//! Query predicates.
//!
//! A [`Query`] is a serializable filter in the document-store style
//! (`{"pages": {"$gt": 100}}`) plus sort, projection and pagination. The
//! remote service evaluates queries server side; the same query is evaluated
//! locally against cached documents by [`Query::process`].

use crate::document::{json_type_name, Document, ACL_FIELD, ID_FIELD, METADATA_FIELD};
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;

/// Comparison and membership operators understood by the local evaluator.
const FIELD_OPERATORS: &[&str] = &["$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin", "$exists"];

/// Sort direction for a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

impl SortDirection {
    /// Wire representation (`1` / `-1`).
    pub fn to_code(self) -> i8 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }

    /// Parses the wire representation.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(SortDirection::Ascending),
            -1 => Some(SortDirection::Descending),
            _ => None,
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    /// Dotted field path.
    pub field: String,
    /// Direction.
    pub direction: SortDirection,
}

/// A filter with sort, projection and pagination.
///
/// # Example
///
/// ```rust
/// use cachesync_protocol::Query;
///
/// let query = Query::new()
///     .equal_to("author", "Herbert")
///     .greater_than("pages", 300)
///     .ascending("title");
///
/// assert!(!query.is_paginated());
/// assert!(query.cache_key().is_some());
/// assert!(query.clone().limit(10).cache_key().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Query {
    /// Filter object.
    #[serde(default)]
    pub filter: Map<String, Value>,
    /// Sort keys, most significant first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortField>,
    /// Field projection; empty means all fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    /// Number of matching documents to skip.
    #[serde(default)]
    pub skip: u64,
    /// Maximum number of documents to return; `None` means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl Query {
    /// Creates a query matching every document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query from a raw filter object.
    #[must_use]
    pub fn from_filter(filter: Map<String, Value>) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    /// Matches a single document id.
    #[must_use]
    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new().equal_to(ID_FIELD, id.into())
    }

    /// Matches any of the given ids.
    #[must_use]
    pub fn by_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<Value> = ids.into_iter().map(|id| Value::String(id.into())).collect();
        Self::new().contains(ID_FIELD, ids)
    }

    /// Requires `field == value`.
    #[must_use]
    pub fn equal_to(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(field.into(), value.into());
        self
    }

    /// Requires `field != value`.
    #[must_use]
    pub fn not_equal_to(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_operator(field, "$ne", value.into())
    }

    /// Requires `field > value`.
    #[must_use]
    pub fn greater_than(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_operator(field, "$gt", value.into())
    }

    /// Requires `field >= value`.
    #[must_use]
    pub fn greater_than_or_equal_to(
        self,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.with_operator(field, "$gte", value.into())
    }

    /// Requires `field < value`.
    #[must_use]
    pub fn less_than(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_operator(field, "$lt", value.into())
    }

    /// Requires `field <= value`.
    #[must_use]
    pub fn less_than_or_equal_to(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_operator(field, "$lte", value.into())
    }

    /// Requires `field` to equal one of `values`.
    #[must_use]
    pub fn contains(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.with_operator(field, "$in", Value::Array(values))
    }

    /// Requires `field` to equal none of `values`.
    #[must_use]
    pub fn not_contained_in(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.with_operator(field, "$nin", Value::Array(values))
    }

    /// Requires `field` to be present (or absent).
    #[must_use]
    pub fn exists(self, field: impl Into<String>, present: bool) -> Self {
        self.with_operator(field, "$exists", Value::Bool(present))
    }

    /// Combines both filters with a logical AND.
    ///
    /// Sort, projection and pagination of `self` are kept.
    #[must_use]
    pub fn and(mut self, other: Query) -> Self {
        self.filter = combine("$and", self.filter, other.filter);
        self
    }

    /// Combines both filters with a logical OR.
    #[must_use]
    pub fn or(mut self, other: Query) -> Self {
        self.filter = combine("$or", self.filter, other.filter);
        self
    }

    /// Adds an ascending sort key.
    #[must_use]
    pub fn ascending(mut self, field: impl Into<String>) -> Self {
        self.sort.push(SortField {
            field: field.into(),
            direction: SortDirection::Ascending,
        });
        self
    }

    /// Adds a descending sort key.
    #[must_use]
    pub fn descending(mut self, field: impl Into<String>) -> Self {
        self.sort.push(SortField {
            field: field.into(),
            direction: SortDirection::Descending,
        });
        self
    }

    /// Restricts returned fields.
    #[must_use]
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the number of documents to skip.
    #[must_use]
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    /// Sets the maximum number of documents to return.
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns a copy of this query restricted to one page.
    #[must_use]
    pub fn page(&self, skip: u64, limit: u64) -> Self {
        Self {
            skip,
            limit: Some(limit),
            ..self.clone()
        }
    }

    /// Returns true if the query carries pagination.
    pub fn is_paginated(&self) -> bool {
        self.skip > 0 || self.limit.is_some()
    }

    /// Canonical serialization used as the query cache key.
    ///
    /// Only unpaginated queries have a key: the delta of a page is not
    /// well defined, so paginated reads are never delta-accelerated.
    pub fn cache_key(&self) -> Option<String> {
        if self.is_paginated() {
            return None;
        }
        let canonical = json!({
            "filter": self.filter,
            "sort": self.sort_value(),
            "fields": self.fields,
        });
        serde_json::to_string(&canonical).ok()
    }

    /// Key of the match-everything query.
    pub fn default_cache_key() -> String {
        // The empty query is never paginated.
        Query::new().cache_key().unwrap_or_default()
    }

    /// Checks that every operator in the filter is understood.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidQuery`] on unknown operators or
    /// operands of the wrong type.
    pub fn validate(&self) -> ProtocolResult<()> {
        validate_filter(&self.filter)
    }

    /// Returns true if `doc` satisfies the filter.
    pub fn matches(&self, doc: &Document) -> bool {
        matches_filter(&self.filter, doc)
    }

    /// Applies filter, sort, skip, limit and projection to `docs`.
    pub fn process(&self, docs: Vec<Document>) -> Vec<Document> {
        let mut matched: Vec<Document> = docs.into_iter().filter(|d| self.matches(d)).collect();

        if !self.sort.is_empty() {
            matched.sort_by(|a, b| self.compare_documents(a, b));
        }

        let skip = usize::try_from(self.skip).unwrap_or(usize::MAX);
        let limit = self
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);

        matched
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|doc| self.project(doc))
            .collect()
    }

    /// Encodes the query as request parameters.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if !self.filter.is_empty() {
            params.push(("query".into(), Value::Object(self.filter.clone()).to_string()));
        }
        if !self.sort.is_empty() {
            params.push(("sort".into(), self.sort_value().to_string()));
        }
        if !self.fields.is_empty() {
            params.push(("fields".into(), self.fields.join(",")));
        }
        if self.skip > 0 {
            params.push(("skip".into(), self.skip.to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".into(), limit.to_string()));
        }
        params
    }

    /// Decodes a query from request parameters, ignoring unrelated ones.
    ///
    /// # Errors
    ///
    /// Returns an error if a known parameter is malformed.
    pub fn from_params(params: &[(String, String)]) -> ProtocolResult<Self> {
        let mut query = Query::new();
        for (key, value) in params {
            match key.as_str() {
                "query" => match serde_json::from_str::<Value>(value)? {
                    Value::Object(filter) => query.filter = filter,
                    other => {
                        return Err(ProtocolError::invalid_query(format!(
                            "filter must be an object, found {}",
                            json_type_name(&other)
                        )))
                    }
                },
                "sort" => query.sort = parse_sort(value)?,
                "fields" => {
                    query.fields = value
                        .split(',')
                        .filter(|f| !f.is_empty())
                        .map(str::to_string)
                        .collect()
                }
                "skip" => query.skip = parse_number(key, value)?,
                "limit" => query.limit = Some(parse_number(key, value)?),
                _ => {}
            }
        }
        Ok(query)
    }

    fn with_operator(mut self, field: impl Into<String>, op: &str, value: Value) -> Self {
        let field = field.into();
        let entry = self
            .filter
            .entry(field)
            .or_insert_with(|| Value::Object(Map::new()));
        match entry {
            Value::Object(ops) if ops.is_empty() || is_operator_object(ops) => {
                ops.insert(op.to_string(), value);
            }
            other => {
                // A literal equality is replaced by the operator form.
                let mut ops = Map::new();
                ops.insert(op.to_string(), value);
                *other = Value::Object(ops);
            }
        }
        self
    }

    fn sort_value(&self) -> Value {
        Value::Array(
            self.sort
                .iter()
                .map(|s| json!([s.field, s.direction.to_code()]))
                .collect(),
        )
    }

    fn compare_documents(&self, a: &Document, b: &Document) -> Ordering {
        for key in &self.sort {
            let ordering = compare_for_sort(a.lookup(&key.field), b.lookup(&key.field));
            let ordering = match key.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    fn project(&self, doc: Document) -> Document {
        if self.fields.is_empty() {
            return doc;
        }
        let mut projected = Map::new();
        for (key, value) in doc.as_map() {
            let keep = key == ID_FIELD
                || key == METADATA_FIELD
                || key == ACL_FIELD
                || self.fields.iter().any(|f| f == key || f.starts_with(&format!("{key}.")));
            if keep {
                projected.insert(key.clone(), value.clone());
            }
        }
        Document::from(projected)
    }
}

fn combine(op: &str, left: Map<String, Value>, right: Map<String, Value>) -> Map<String, Value> {
    let mut clauses = Vec::new();
    for side in [left, right] {
        if side.is_empty() {
            continue;
        }
        clauses.push(Value::Object(side));
    }
    let mut combined = Map::new();
    combined.insert(op.to_string(), Value::Array(clauses));
    combined
}

fn is_operator_object(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

fn validate_filter(filter: &Map<String, Value>) -> ProtocolResult<()> {
    for (key, condition) in filter {
        match key.as_str() {
            "$and" | "$or" => {
                let clauses = condition.as_array().ok_or_else(|| {
                    ProtocolError::invalid_query(format!("{key} expects an array of filters"))
                })?;
                for clause in clauses {
                    let clause = clause.as_object().ok_or_else(|| {
                        ProtocolError::invalid_query(format!("{key} clauses must be objects"))
                    })?;
                    validate_filter(clause)?;
                }
            }
            op if op.starts_with('$') => {
                return Err(ProtocolError::invalid_query(format!(
                    "unknown top-level operator {op}"
                )))
            }
            field => {
                if let Value::Object(ops) = condition {
                    if ops.keys().any(|k| k.starts_with('$')) {
                        validate_operators(field, ops)?;
                    }
                }
            }
        }
    }
    Ok(())
}

fn validate_operators(field: &str, ops: &Map<String, Value>) -> ProtocolResult<()> {
    for (op, operand) in ops {
        if !FIELD_OPERATORS.contains(&op.as_str()) {
            return Err(ProtocolError::invalid_query(format!(
                "unknown operator {op} on field {field}"
            )));
        }
        match op.as_str() {
            "$in" | "$nin" if !operand.is_array() => {
                return Err(ProtocolError::invalid_query(format!(
                    "{op} on field {field} expects an array"
                )))
            }
            "$exists" if !operand.is_boolean() => {
                return Err(ProtocolError::invalid_query(format!(
                    "$exists on field {field} expects a bool"
                )))
            }
            _ => {}
        }
    }
    Ok(())
}

fn matches_filter(filter: &Map<String, Value>, doc: &Document) -> bool {
    filter.iter().all(|(key, condition)| match key.as_str() {
        "$and" => clauses(condition).iter().all(|c| matches_filter(c, doc)),
        "$or" => clauses(condition).iter().any(|c| matches_filter(c, doc)),
        field => matches_condition(doc.lookup(field), condition),
    })
}

fn clauses(condition: &Value) -> Vec<&Map<String, Value>> {
    condition
        .as_array()
        .map(|arr| arr.iter().filter_map(Value::as_object).collect())
        .unwrap_or_default()
}

fn matches_condition(actual: Option<&Value>, condition: &Value) -> bool {
    match condition {
        Value::Object(ops) if is_operator_object(ops) => ops
            .iter()
            .all(|(op, operand)| apply_operator(op, actual, operand)),
        expected => values_equal(actual, expected),
    }
}

fn apply_operator(op: &str, actual: Option<&Value>, operand: &Value) -> bool {
    match op {
        "$eq" => values_equal(actual, operand),
        "$ne" => !values_equal(actual, operand),
        "$gt" => compare_operand(actual, operand, |o| o == Ordering::Greater),
        "$gte" => compare_operand(actual, operand, |o| o != Ordering::Less),
        "$lt" => compare_operand(actual, operand, |o| o == Ordering::Less),
        "$lte" => compare_operand(actual, operand, |o| o != Ordering::Greater),
        "$in" => operand
            .as_array()
            .map(|values| values.iter().any(|v| values_equal(actual, v)))
            .unwrap_or(false),
        "$nin" => operand
            .as_array()
            .map(|values| !values.iter().any(|v| values_equal(actual, v)))
            .unwrap_or(true),
        "$exists" => actual.is_some() == operand.as_bool().unwrap_or(true),
        _ => false,
    }
}

/// Equality with array-membership semantics: an array field equals a scalar
/// if any element equals it.
fn values_equal(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => items.iter().any(|i| i == expected),
        Some(Value::Number(a)) => match expected {
            Value::Number(b) => a.as_f64() == b.as_f64(),
            _ => false,
        },
        Some(value) => value == expected,
    }
}

fn compare_operand(
    actual: Option<&Value>,
    operand: &Value,
    accept: impl Fn(Ordering) -> bool,
) -> bool {
    actual
        .and_then(|a| compare_values(a, operand))
        .map(accept)
        .unwrap_or(false)
}

/// Compares two values of the same JSON type.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

fn parse_sort(raw: &str) -> ProtocolResult<Vec<SortField>> {
    let value: Value = serde_json::from_str(raw)?;
    let items = value
        .as_array()
        .ok_or_else(|| ProtocolError::invalid_query("sort must be an array"))?;
    items
        .iter()
        .map(|item| {
            let pair = item.as_array().filter(|p| p.len() == 2);
            let field = pair.and_then(|p| p[0].as_str());
            let direction = pair
                .and_then(|p| p[1].as_i64())
                .and_then(SortDirection::from_code);
            match (field, direction) {
                (Some(field), Some(direction)) => Ok(SortField {
                    field: field.to_string(),
                    direction,
                }),
                _ => Err(ProtocolError::invalid_query(format!(
                    "malformed sort key {item}"
                ))),
            }
        })
        .collect()
}

fn parse_number(key: &str, value: &str) -> ProtocolResult<u64> {
    value
        .parse()
        .map_err(|_| ProtocolError::invalid_query(format!("{key} must be a non-negative integer")))
}
