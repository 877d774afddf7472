//! Grouping aggregations.

use crate::document::Document;
use crate::error::{ProtocolError, ProtocolResult};
use crate::query::Query;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Reducer applied to each group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "field", rename_all = "lowercase")]
pub enum AggregationKind {
    /// Number of documents in the group.
    Count,
    /// Sum of a numeric field.
    Sum(String),
    /// Minimum of a numeric field.
    Min(String),
    /// Maximum of a numeric field.
    Max(String),
    /// Average of a numeric field.
    Average(String),
}

/// A group-and-reduce specification.
///
/// Documents matching `query` are partitioned by the values of the `key`
/// fields; each partition yields one result object holding the key values
/// and a `result` field.
///
/// # Example
///
/// ```rust
/// use cachesync_protocol::{Aggregation, Document};
/// use serde_json::json;
///
/// let docs = vec![
///     Document::from_value(json!({"_id": "1", "genre": "scifi", "pages": 400})).unwrap(),
///     Document::from_value(json!({"_id": "2", "genre": "scifi", "pages": 200})).unwrap(),
/// ];
///
/// let groups = Aggregation::sum("pages").by("genre").apply(docs).unwrap();
/// assert_eq!(groups, vec![json!({"genre": "scifi", "result": 600.0})]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    /// Reducer.
    pub kind: AggregationKind,
    /// Grouping fields; empty means a single group.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key: Vec<String>,
    /// Restricts the aggregated documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Query>,
}

impl Aggregation {
    fn new(kind: AggregationKind) -> Self {
        Self {
            kind,
            key: Vec::new(),
            query: None,
        }
    }

    /// Counts documents per group.
    #[must_use]
    pub fn count() -> Self {
        Self::new(AggregationKind::Count)
    }

    /// Sums `field` per group.
    #[must_use]
    pub fn sum(field: impl Into<String>) -> Self {
        Self::new(AggregationKind::Sum(field.into()))
    }

    /// Minimum of `field` per group.
    #[must_use]
    pub fn min(field: impl Into<String>) -> Self {
        Self::new(AggregationKind::Min(field.into()))
    }

    /// Maximum of `field` per group.
    #[must_use]
    pub fn max(field: impl Into<String>) -> Self {
        Self::new(AggregationKind::Max(field.into()))
    }

    /// Average of `field` per group.
    #[must_use]
    pub fn average(field: impl Into<String>) -> Self {
        Self::new(AggregationKind::Average(field.into()))
    }

    /// Adds a grouping field.
    #[must_use]
    pub fn by(mut self, field: impl Into<String>) -> Self {
        self.key.push(field.into());
        self
    }

    /// Restricts the aggregation to documents matching `query`.
    #[must_use]
    pub fn with_query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }

    /// Checks the aggregation and its query.
    pub fn validate(&self) -> ProtocolResult<()> {
        if let Some(query) = &self.query {
            query.validate()?;
            if query.is_paginated() {
                return Err(ProtocolError::invalid_aggregation(
                    "aggregation queries cannot be paginated",
                ));
            }
        }
        if self.key.iter().any(String::is_empty) {
            return Err(ProtocolError::invalid_aggregation("empty grouping field"));
        }
        Ok(())
    }

    /// Evaluates the aggregation.
    ///
    /// Groups are returned in order of first appearance.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidAggregation`] if a reduced field holds
    /// a non-numeric value.
    pub fn apply(&self, docs: Vec<Document>) -> ProtocolResult<Vec<Value>> {
        self.validate()?;
        let docs = match &self.query {
            Some(query) => query.process(docs),
            None => docs,
        };

        let mut groups: Vec<(Vec<Value>, Reducer)> = Vec::new();
        for doc in &docs {
            let key: Vec<Value> = self
                .key
                .iter()
                .map(|f| doc.lookup(f).cloned().unwrap_or(Value::Null))
                .collect();
            let index = match groups.iter().position(|(k, _)| *k == key) {
                Some(index) => index,
                None => {
                    groups.push((key, Reducer::default()));
                    groups.len() - 1
                }
            };
            groups[index].1.feed(&self.kind, doc)?;
        }

        Ok(groups
            .into_iter()
            .map(|(key, reducer)| {
                let mut out = Map::new();
                for (field, value) in self.key.iter().zip(key) {
                    out.insert(field.clone(), value);
                }
                reducer.finish(&self.kind, &mut out);
                Value::Object(out)
            })
            .collect())
    }
}

#[derive(Debug, Default)]
struct Reducer {
    count: u64,
    total: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Reducer {
    fn feed(&mut self, kind: &AggregationKind, doc: &Document) -> ProtocolResult<()> {
        self.count += 1;
        let field = match kind {
            AggregationKind::Count => return Ok(()),
            AggregationKind::Sum(f)
            | AggregationKind::Min(f)
            | AggregationKind::Max(f)
            | AggregationKind::Average(f) => f,
        };
        let value = match doc.lookup(field) {
            None | Some(Value::Null) => return Ok(()),
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(other) => {
                return Err(ProtocolError::invalid_aggregation(format!(
                    "field {field} is not numeric: {other}"
                )))
            }
        };
        self.total += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        Ok(())
    }

    fn finish(self, kind: &AggregationKind, out: &mut Map<String, Value>) {
        let result = match kind {
            AggregationKind::Count => Value::Number(Number::from(self.count)),
            AggregationKind::Sum(_) => float(self.total),
            AggregationKind::Min(_) => self.min.map(float).unwrap_or(Value::Null),
            AggregationKind::Max(_) => self.max.map(float).unwrap_or(Value::Null),
            AggregationKind::Average(_) => {
                out.insert("count".into(), Value::Number(Number::from(self.count)));
                if self.count == 0 {
                    Value::Null
                } else {
                    float(self.total / self.count as f64)
                }
            }
        };
        out.insert("result".into(), result);
    }
}

fn float(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}
