//! Predicate trees and update assignments
//!
//! Queries carry a small boolean expression tree instead of SQL text.
//! Engines render the tree into their own query form; the in-memory
//! engine evaluates it directly with [`Predicate::matches`].
//!
//! Updates carry [`Changes`]: absolute values plus relative deltas
//! (`col = col + n`). Deltas are rendered as a single atomic storage
//! operation, never as a read-then-write round trip, so counters stay
//! correct under concurrent attempts.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::Value;

use crate::store::Record;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compare {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Compare {
    /// SQL operator token
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Right-hand side of a comparison: a literal or another column
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(String),
    Value(Value),
}

/// Boolean expression tree over a table's columns
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: String,
        op: Compare,
        rhs: Operand,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    fn compare(column: impl Into<String>, op: Compare, rhs: Operand) -> Self {
        Self::Compare {
            column: column.into(),
            op,
            rhs,
        }
    }

    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Compare::Eq, Operand::Value(value.into()))
    }

    /// `column <> value`
    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Compare::Ne, Operand::Value(value.into()))
    }

    /// `column < value`
    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Compare::Lt, Operand::Value(value.into()))
    }

    /// `column <= value`
    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Compare::Le, Operand::Value(value.into()))
    }

    /// `column > value`
    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Compare::Gt, Operand::Value(value.into()))
    }

    /// `column >= value`
    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, Compare::Ge, Operand::Value(value.into()))
    }

    /// `column < other_column`, for conditions like
    /// `running_jobs < concurrency`
    pub fn lt_col(column: impl Into<String>, other: impl Into<String>) -> Self {
        Self::compare(column, Compare::Lt, Operand::Column(other.into()))
    }

    /// Conjunction of predicates
    pub fn and(predicates: Vec<Predicate>) -> Self {
        Self::And(predicates)
    }

    /// Disjunction of predicates
    pub fn or(predicates: Vec<Predicate>) -> Self {
        Self::Or(predicates)
    }

    /// Negation
    pub fn not(predicate: Predicate) -> Self {
        Self::Not(Box::new(predicate))
    }

    /// Evaluate the predicate against an in-memory record.
    ///
    /// Missing columns evaluate as null.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Compare { column, op, rhs } => {
                let left = record.get(column.as_str()).unwrap_or(&Value::Null);
                let right = match rhs {
                    Operand::Column(other) => record.get(other.as_str()).unwrap_or(&Value::Null),
                    Operand::Value(v) => v,
                };
                match op {
                    Compare::Eq => values_equal(left, right),
                    Compare::Ne => !values_equal(left, right),
                    Compare::Lt => compare_values(left, right) == Some(Ordering::Less),
                    Compare::Le => matches!(
                        compare_values(left, right),
                        Some(Ordering::Less) | Some(Ordering::Equal)
                    ),
                    Compare::Gt => compare_values(left, right) == Some(Ordering::Greater),
                    Compare::Ge => matches!(
                        compare_values(left, right),
                        Some(Ordering::Greater) | Some(Ordering::Equal)
                    ),
                }
            }
            Self::And(predicates) => predicates.iter().all(|p| p.matches(record)),
            Self::Or(predicates) => predicates.iter().any(|p| p.matches(record)),
            Self::Not(predicate) => !predicate.matches(record),
        }
    }

    /// Columns referenced by the predicate, used for rendering checks
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Compare { column, rhs, .. } => {
                out.push(column.as_str());
                if let Operand::Column(other) = rhs {
                    out.push(other.as_str());
                }
            }
            Self::And(ps) | Self::Or(ps) => {
                for p in ps {
                    p.collect_columns(out);
                }
            }
            Self::Not(p) => p.collect_columns(out),
        }
    }
}

pub(crate) fn values_equal(left: &Value, right: &Value) -> bool {
    // numbers compare by value so 1 and 1.0 are equal
    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
        return a == b;
    }
    left == right
}

pub(crate) fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => left.as_f64()?.partial_cmp(&right.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// One pending column assignment
#[derive(Debug, Clone, PartialEq)]
pub enum Assign {
    /// Absolute value
    Value(Value),
    /// `col = col + n`, atomic at the engine
    Increment(i64),
    /// `col = col - n`, atomic at the engine
    Decrement(i64),
}

/// The assignment set of an update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    entries: BTreeMap<String, Assign>,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a plain record of absolute values
    pub fn from_record(record: Record) -> Self {
        let mut changes = Self::new();
        for (column, value) in record {
            changes.entries.insert(column, Assign::Value(value));
        }
        changes
    }

    /// Assign an absolute value
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries
            .insert(column.into(), Assign::Value(value.into()));
        self
    }

    /// Add a relative `+n` delta
    pub fn increment(mut self, column: impl Into<String>, n: i64) -> Self {
        self.entries.insert(column.into(), Assign::Increment(n));
        self
    }

    /// Add a relative `-n` delta
    pub fn decrement(mut self, column: impl Into<String>, n: i64) -> Self {
        self.entries.insert(column.into(), Assign::Decrement(n));
        self
    }

    /// Insert an assignment in place
    pub fn insert(&mut self, column: impl Into<String>, assign: Assign) {
        self.entries.insert(column.into(), assign);
    }

    pub fn get(&self, column: &str) -> Option<&Assign> {
        self.entries.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.entries.contains_key(column)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Assign)> {
        self.entries.iter()
    }

    /// Apply the assignments to an in-memory record.
    ///
    /// Deltas treat a missing or non-integer current value as 0.
    pub fn apply_to(&self, record: &mut Record) {
        for (column, assign) in &self.entries {
            match assign {
                Assign::Value(value) => {
                    record.insert(column.clone(), value.clone());
                }
                Assign::Increment(n) | Assign::Decrement(n) => {
                    let current = record
                        .get(column.as_str())
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    let delta = match assign {
                        Assign::Increment(_) => *n,
                        _ => -*n,
                    };
                    record.insert(column.clone(), Value::from(current + delta));
                }
            }
        }
    }
}

/// Sort direction for `all()` queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Read-query shape handed to the storage engine
#[derive(Debug, Clone, Default)]
pub struct SelectSpec {
    pub filter: Option<Predicate>,
    pub limit: Option<u64>,
    pub order_by: Option<(String, SortOrder)>,
}
