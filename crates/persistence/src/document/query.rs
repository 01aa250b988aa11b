//! Typed filters, sort keys and patches for document queries
//!
//! Conditions are values, never strings: backends translate them into their
//! own query language with every operand bound as a parameter.

use std::cmp::Ordering;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored document
pub type Document = Value;

/// Comparison operator for [`Filter::Compare`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    /// SQL spelling of the operator
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Lte => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Gte => ordering != Ordering::Less,
        }
    }
}

/// Predicate over the top-level fields of a document
///
/// A missing field reads as `null`. Ordered comparisons only hold between
/// values of the same JSON type; comparing a number against a string or
/// `null` is false. Strings compare bytewise.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document
    True,

    /// Field compared against a value
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },

    /// Field is absent or `null`
    IsNull { field: String },

    /// Field is present and not `null`
    NotNull { field: String },

    /// Field equals one of the values
    In { field: String, values: Vec<Value> },

    /// Conjunction; empty matches everything
    All { filters: Vec<Filter> },

    /// Disjunction; empty matches nothing
    Any { filters: Vec<Filter> },

    /// Field is a nanosecond timestamp strictly before the store's clock
    BeforeNow { field: String },
}

impl Filter {
    fn compare(field: &str, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn lte(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lte, value)
    }

    pub fn gt(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn gte(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gte, value)
    }

    pub fn is_null(field: &str) -> Self {
        Self::IsNull {
            field: field.to_string(),
        }
    }

    pub fn not_null(field: &str) -> Self {
        Self::NotNull {
            field: field.to_string(),
        }
    }

    pub fn in_values<I, V>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::In {
            field: field.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn before_now(field: &str) -> Self {
        Self::BeforeNow {
            field: field.to_string(),
        }
    }

    pub fn all(filters: Vec<Filter>) -> Self {
        Self::All { filters }
    }

    pub fn any(filters: Vec<Filter>) -> Self {
        Self::Any { filters }
    }

    /// Combine with another filter, flattening nested conjunctions
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Self::True, other) => other,
            (this, Self::True) => this,
            (Self::All { mut filters }, Self::All { filters: more }) => {
                filters.extend(more);
                Self::All { filters }
            }
            (Self::All { mut filters }, other) => {
                filters.push(other);
                Self::All { filters }
            }
            (this, other) => Self::All {
                filters: vec![this, other],
            },
        }
    }

    /// Evaluate the filter against a document
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::True => true,
            Self::Compare { field, op, value } => compare_values(field_of(doc, field), value)
                .map(|ordering| op.accepts(ordering))
                .unwrap_or(false),
            Self::IsNull { field } => field_of(doc, field).is_null(),
            Self::NotNull { field } => !field_of(doc, field).is_null(),
            Self::In { field, values } => {
                let actual = field_of(doc, field);
                values
                    .iter()
                    .any(|v| compare_values(actual, v) == Some(Ordering::Equal))
            }
            Self::All { filters } => filters.iter().all(|f| f.matches(doc)),
            Self::Any { filters } => filters.iter().any(|f| f.matches(doc)),
            Self::BeforeNow { field } => {
                let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
                compare_values(field_of(doc, field), &Value::from(now)) == Some(Ordering::Less)
            }
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// One key of a multi-key sort
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: SortDirection::Descending,
        }
    }
}

/// A filtered, sorted, paginated query over one collection
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub filter: Filter,
    pub sort: Vec<SortKey>,
    pub skip: u64,
    pub take: Option<u64>,
}

impl Query {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            sort: vec![],
            skip: 0,
            take: None,
        }
    }

    /// Append a sort key; earlier keys take precedence
    pub fn order_by(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn take(mut self, take: u64) -> Self {
        self.take = Some(take);
        self
    }

    /// Ordering of two documents under this query's sort keys
    pub fn compare_documents(&self, a: &Document, b: &Document) -> Ordering {
        for key in &self.sort {
            let ordering = sort_order(field_of(a, &key.field), field_of(b, &key.field));
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
}

/// A set of top-level field assignments applied atomically
///
/// Fields not named in the patch are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    fields: Map<String, Value>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    /// Copy the named fields out of a document; absent fields become `null`
    pub fn pick(document: &Document, fields: &[&str]) -> Self {
        fields.iter().fold(Self::new(), |patch, field| {
            let value = document.get(*field).cloned().unwrap_or(Value::Null);
            patch.set(field, value)
        })
    }

    pub fn clear(self, field: &str) -> Self {
        self.set(field, Value::Null)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// The patch as a JSON object, suitable for a shallow merge
    pub fn to_document(&self) -> Document {
        Value::Object(self.fields.clone())
    }

    /// Apply the patch to a document in place
    pub fn apply(&self, doc: &mut Document) {
        if let Value::Object(target) = doc {
            for (field, value) in &self.fields {
                target.insert(field.clone(), value.clone());
            }
        }
    }
}

/// Definition of a secondary index provisioned on a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub collection: String,
    pub fields: Vec<String>,
}

impl IndexDefinition {
    pub fn new(name: &str, collection: &str, fields: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            collection: collection.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

fn field_of<'a>(doc: &'a Document, field: &str) -> &'a Value {
    doc.get(field).unwrap_or(&Value::Null)
}

/// Compare two JSON values of the same type; `None` when incomparable
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, _) | (_, Value::Null) => None,
        (x, y) if x == y => Some(Ordering::Equal),
        _ => None,
    }
}

// Total order for sorting, ranking mixed types the way jsonb does:
// null < string < number < bool < array < object.
fn sort_order(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::String(_) => 1,
            Value::Number(_) => 2,
            Value::Bool(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    compare_values(a, b).unwrap_or_else(|| rank(a).cmp(&rank(b)))
}
