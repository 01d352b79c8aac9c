//! Records and the filters that select them.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::RecordId;
use crate::error::{BatchError, Result};

/// A stored object.
///
/// `changes` holds attribute values that were set but not yet committed;
/// committing merges them into `attributes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub entity: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub changes: Map<String, Value>,
}

impl Record {
    pub fn new(id: RecordId, entity: impl Into<String>) -> Self {
        Self {
            id,
            entity: entity.into(),
            attributes: Map::new(),
            changes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Stage a change that the next commit will persist.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.changes.insert(name.into(), value.into());
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// One attribute constraint of a filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub attribute: String,
    pub op: CompareOp,
    pub value: Value,
}

impl Condition {
    pub fn new(attribute: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            op,
            value: value.into(),
        }
    }

    /// Missing attributes never match. Ordering ops only compare numbers
    /// with numbers and strings with strings.
    pub fn matches(&self, record: &Record) -> bool {
        let Some(actual) = record.attribute(&self.attribute) else {
            return false;
        };
        match self.op {
            CompareOp::Eq => actual == &self.value,
            CompareOp::Ne => actual != &self.value,
            op => match compare(actual, &self.value) {
                Some(ord) => match op {
                    CompareOp::Lt => ord == Ordering::Less,
                    CompareOp::Le => ord != Ordering::Greater,
                    CompareOp::Gt => ord == Ordering::Greater,
                    CompareOp::Ge => ord != Ordering::Less,
                    CompareOp::Eq | CompareOp::Ne => unreachable!("handled above"),
                },
                None => false,
            },
        }
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

/// Query predicate over one entity.
///
/// The record store executes it; the core only validates and threads it
/// through to every page query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub entity: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Filter {
    pub fn entity(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            conditions: Vec::new(),
        }
    }

    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Parse a path-style selector such as `//Module.Entity`.
    ///
    /// The leading `//` is optional.
    pub fn parse_path(path: &str) -> Result<Self> {
        let entity = path.trim().trim_start_matches("//").trim();
        if entity.is_empty() {
            return Err(BatchError::InvalidArgument(format!(
                "filter path '{path}' names no entity"
            )));
        }
        Ok(Self::entity(entity))
    }

    /// Rejects filters without an entity.
    pub fn validate(&self) -> Result<()> {
        if self.entity.trim().is_empty() {
            return Err(BatchError::InvalidArgument(
                "filter must name an entity".to_string(),
            ));
        }
        Ok(())
    }

    pub fn matches(&self, record: &Record) -> bool {
        record.entity == self.entity && self.conditions.iter().all(|c| c.matches(record))
    }
}
