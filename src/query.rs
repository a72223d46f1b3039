//! The abstract query language and its validation against a field's declared layout.
//!
//! Validation happens before any backend statement is built, so malformed queries
//! surface as configuration errors regardless of the backend.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::descriptor::Attribute;
use crate::error::{Error, Result};
use crate::schema::Field;
use crate::value::{like, Value};
use crate::vector::Distance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparison {
    Equal,
    NotEqual,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    Like,
    In,
}

impl Comparison {
    /// Evaluates `actual <op> literals`. Only [`Comparison::In`] looks past the first literal.
    pub fn evaluate(&self, actual: &Value, literals: &[Value]) -> bool {
        let Some(first) = literals.first() else {
            return false;
        };
        match self {
            Comparison::Equal => actual == first,
            Comparison::NotEqual => actual != first,
            Comparison::Less => actual.compare(first) == Some(Ordering::Less),
            Comparison::Greater => actual.compare(first) == Some(Ordering::Greater),
            Comparison::LessOrEqual => matches!(actual.compare(first), Some(Ordering::Less | Ordering::Equal)),
            Comparison::GreaterOrEqual => {
                matches!(actual.compare(first), Some(Ordering::Greater | Ordering::Equal))
            }
            Comparison::Like => match (actual.as_str(), first.as_str()) {
                (Some(text), Some(pattern)) => like(text, pattern),
                _ => false,
            },
            Comparison::In => literals.contains(actual),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProximityQuery {
    /// Target vector attribute; `None` selects the layout's only vector attribute.
    pub attribute: Option<String>,
    pub value: Value,
    pub distance: Distance,
    pub k: usize,
    pub order: SortOrder,
    pub fetch_vector: bool,
}

impl ProximityQuery {
    pub fn new(value: Value, distance: Distance, k: usize) -> Self {
        Self {
            attribute: None,
            value,
            distance,
            k,
            order: SortOrder::Asc,
            fetch_vector: false,
        }
    }

    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn fetch_vector(mut self, fetch: bool) -> Self {
        self.fetch_vector = fetch;
        self
    }

    pub fn on(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimpleBooleanQuery {
    /// Target attribute; `None` selects the only attribute of a scalar layout.
    pub attribute: Option<String>,
    pub comparison: Comparison,
    /// One literal, or the candidate list for [`Comparison::In`].
    pub values: Vec<Value>,
    pub limit: Option<usize>,
}

impl SimpleBooleanQuery {
    pub fn new(attribute: Option<&str>, comparison: Comparison, value: Value) -> Self {
        Self {
            attribute: attribute.map(str::to_string),
            comparison,
            values: vec![value],
            limit: None,
        }
    }

    pub fn within(attribute: Option<&str>, values: Vec<Value>) -> Self {
        Self {
            attribute: attribute.map(str::to_string),
            comparison: Comparison::In,
            values,
            limit: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Conjunction of simple boolean clauses.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundBooleanQuery {
    pub clauses: Vec<SimpleBooleanQuery>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimpleFulltextQuery {
    pub attribute: Option<String>,
    pub value: String,
    pub limit: Option<usize>,
}

impl SimpleFulltextQuery {
    pub fn new(attribute: Option<&str>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.map(str::to_string),
            value: value.into(),
            limit: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Proximity(ProximityQuery),
    Boolean(SimpleBooleanQuery),
    Compound(CompoundBooleanQuery),
    Fulltext(SimpleFulltextQuery),
}

impl Query {
    pub fn name(&self) -> &'static str {
        match self {
            Query::Proximity(_) => "proximity",
            Query::Boolean(_) => "boolean",
            Query::Compound(_) => "compound boolean",
            Query::Fulltext(_) => "fulltext",
        }
    }
}

impl From<ProximityQuery> for Query {
    fn from(q: ProximityQuery) -> Self {
        Query::Proximity(q)
    }
}

impl From<SimpleBooleanQuery> for Query {
    fn from(q: SimpleBooleanQuery) -> Self {
        Query::Boolean(q)
    }
}

impl From<CompoundBooleanQuery> for Query {
    fn from(q: CompoundBooleanQuery) -> Self {
        Query::Compound(q)
    }
}

impl From<SimpleFulltextQuery> for Query {
    fn from(q: SimpleFulltextQuery) -> Self {
        Query::Fulltext(q)
    }
}

/// Lower-cased alphanumeric tokens of `text`, in order.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Resolves an optional attribute name against a declared layout.
pub fn resolve_attribute<'a>(field: &Field, layout: &'a [Attribute], name: Option<&str>) -> Result<&'a Attribute> {
    match name {
        Some(name) => layout.iter().find(|a| a.name == name).ok_or_else(|| Error::UnknownAttribute {
            field: field.qualified_name(),
            attribute: name.to_string(),
        }),
        None if layout.len() == 1 => Ok(&layout[0]),
        None => Err(Error::UnknownAttribute {
            field: field.qualified_name(),
            attribute: "<unnamed>".to_string(),
        }),
    }
}

pub fn validate_proximity<'a>(field: &Field, layout: &'a [Attribute], query: &ProximityQuery) -> Result<&'a Attribute> {
    let attribute = match query.attribute.as_deref() {
        Some(_) => resolve_attribute(field, layout, query.attribute.as_deref())?,
        None => {
            let mut vectors = layout.iter().filter(|a| a.ty.is_vector());
            match (vectors.next(), vectors.next()) {
                (Some(only), None) => only,
                _ => {
                    return Err(Error::Unsupported(format!(
                        "proximity query on {} needs an explicit vector attribute",
                        field.qualified_name()
                    )))
                }
            }
        }
    };
    if !attribute.ty.is_vector() {
        return Err(Error::Unsupported(format!(
            "proximity query on non-vector attribute {}.{}",
            field.qualified_name(),
            attribute.name
        )));
    }
    attribute.ty.check(&attribute.name, &query.value)?;
    if !query.distance.supports(&attribute.ty) {
        return Err(Error::Unsupported(format!(
            "{} distance on {}",
            query.distance.name(),
            attribute.ty
        )));
    }
    Ok(attribute)
}

pub fn validate_boolean<'a>(field: &Field, layout: &'a [Attribute], query: &SimpleBooleanQuery) -> Result<&'a Attribute> {
    let attribute = resolve_attribute(field, layout, query.attribute.as_deref())?;
    if attribute.ty.is_vector() {
        return Err(Error::Unsupported(format!(
            "boolean comparison on vector attribute {}.{}",
            field.qualified_name(),
            attribute.name
        )));
    }
    match (query.comparison, query.values.len()) {
        (Comparison::In, 0) => {
            return Err(Error::Unsupported("IN comparison needs at least one value".into()));
        }
        (Comparison::In, _) | (_, 1) => {}
        (_, n) => {
            return Err(Error::Unsupported(format!(
                "{:?} comparison takes one value, got {n}",
                query.comparison
            )))
        }
    }
    if query.comparison == Comparison::Like && !attribute.ty.is_textual() {
        return Err(Error::Unsupported(format!(
            "LIKE on non-textual attribute {}.{}",
            field.qualified_name(),
            attribute.name
        )));
    }
    for literal in &query.values {
        attribute.ty.check(&attribute.name, literal)?;
    }
    Ok(attribute)
}

pub fn validate_compound<'a>(
    field: &Field,
    layout: &'a [Attribute],
    query: &CompoundBooleanQuery,
) -> Result<Vec<&'a Attribute>> {
    if query.clauses.is_empty() {
        return Err(Error::Unsupported("compound query without clauses".into()));
    }
    query.clauses.iter().map(|c| validate_boolean(field, layout, c)).collect()
}

pub fn validate_fulltext<'a>(field: &Field, layout: &'a [Attribute], query: &SimpleFulltextQuery) -> Result<&'a Attribute> {
    let attribute = resolve_attribute(field, layout, query.attribute.as_deref())?;
    if !attribute.ty.is_textual() {
        return Err(Error::Unsupported(format!(
            "fulltext query on non-textual attribute {}.{}",
            field.qualified_name(),
            attribute.name
        )));
    }
    Ok(attribute)
}
