//! Data query language of the engine: row predicates, kNN and full-text
//! selection, and the result set sent back to clients.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::query::SortOrder;
use crate::value::like;
use crate::vector::Distance;
use crate::vectordb::engine::EngineError;
use crate::vectordb::entity::{EntityDef, IndexKind};
use crate::vectordb::types::{Cell, ColumnType};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// Row filter. A comparison against a null cell is false, so `Not` of such a
/// comparison is true.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare { column: String, op: CompareOp, value: Cell },
    In { column: String, values: Vec<Cell> },
    Like { column: String, pattern: String },
    IsNull(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn equals(column: impl Into<String>, value: Cell) -> Self {
        Predicate::Compare {
            column: column.into(),
            op: CompareOp::Eq,
            value,
        }
    }

    pub fn one_of(column: impl Into<String>, values: Vec<Cell>) -> Self {
        Predicate::In {
            column: column.into(),
            values,
        }
    }

    /// Resolves column names and checks literal kinds against `def`.
    pub fn bind(&self, def: &EntityDef) -> Result<BoundPredicate, EngineError> {
        let literal = |column: usize, cell: &Cell| {
            let ty = def.columns[column].ty;
            if ty.accepts(cell) {
                Ok(())
            } else {
                Err(EngineError::Invalid(format!(
                    "column '{}' of type {ty:?} compared with a {} literal",
                    def.columns[column].name,
                    cell.kind()
                )))
            }
        };
        Ok(match self {
            Predicate::Compare { column, op, value } => {
                let index = def.require_column(column)?;
                literal(index, value)?;
                if def.columns[index].ty.dimensions().is_some() && !matches!(op, CompareOp::Eq | CompareOp::Ne) {
                    return Err(EngineError::Invalid(format!("vector column '{column}' is unordered")));
                }
                BoundPredicate::Compare(index, *op, value.clone())
            }
            Predicate::In { column, values } => {
                let index = def.require_column(column)?;
                for value in values {
                    literal(index, value)?;
                }
                BoundPredicate::In(index, values.clone())
            }
            Predicate::Like { column, pattern } => {
                let index = def.require_column(column)?;
                if def.columns[index].ty != ColumnType::String {
                    return Err(EngineError::Invalid(format!("LIKE on non-string column '{column}'")));
                }
                BoundPredicate::Like(index, pattern.clone())
            }
            Predicate::IsNull(column) => BoundPredicate::IsNull(def.require_column(column)?),
            Predicate::And(all) => BoundPredicate::And(all.iter().map(|p| p.bind(def)).collect::<Result<_, _>>()?),
            Predicate::Or(any) => BoundPredicate::Or(any.iter().map(|p| p.bind(def)).collect::<Result<_, _>>()?),
            Predicate::Not(inner) => BoundPredicate::Not(Box::new(inner.bind(def)?)),
        })
    }
}

/// A [`Predicate`] with columns resolved to positions.
#[derive(Debug, Clone)]
pub enum BoundPredicate {
    Compare(usize, CompareOp, Cell),
    In(usize, Vec<Cell>),
    Like(usize, String),
    IsNull(usize),
    And(Vec<BoundPredicate>),
    Or(Vec<BoundPredicate>),
    Not(Box<BoundPredicate>),
}

impl BoundPredicate {
    pub fn matches(&self, row: &[Option<Cell>]) -> bool {
        match self {
            BoundPredicate::Compare(column, op, value) => match &row[*column] {
                Some(cell) if matches!(op, CompareOp::Eq) => cell == value,
                Some(cell) if matches!(op, CompareOp::Ne) => cell != value,
                Some(cell) => cell.compare(value).map_or(false, |o| op.holds(o)),
                None => false,
            },
            BoundPredicate::In(column, values) => row[*column].as_ref().map_or(false, |c| values.contains(c)),
            BoundPredicate::Like(column, pattern) => row[*column]
                .as_ref()
                .and_then(Cell::as_str)
                .map_or(false, |text| like(text, pattern)),
            BoundPredicate::IsNull(column) => row[*column].is_none(),
            BoundPredicate::And(all) => all.iter().all(|p| p.matches(row)),
            BoundPredicate::Or(any) => any.iter().any(|p| p.matches(row)),
            BoundPredicate::Not(inner) => !inner.matches(row),
        }
    }
}

/// Nearest-neighbour selection over one vector column.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Knn {
    pub column: String,
    pub query: Cell,
    pub distance: Distance,
    pub k: usize,
    #[serde(default)]
    pub order: SortOrder,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FulltextMatch {
    pub column: String,
    pub expression: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Dql {
    pub entity: String,
    /// Returned columns; `None` returns all of them in declaration order.
    #[serde(default)]
    pub projection: Option<Vec<String>>,
    #[serde(default)]
    pub filter: Option<Predicate>,
    #[serde(default)]
    pub knn: Option<Knn>,
    #[serde(default)]
    pub fulltext: Option<FulltextMatch>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Dql {
    pub fn scan(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            projection: None,
            filter: None,
            knn: None,
            fulltext: None,
            limit: None,
        }
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.projection = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(predicate);
        self
    }

    pub fn knn(mut self, knn: Knn) -> Self {
        self.knn = Some(knn);
        self
    }

    pub fn fulltext(mut self, column: impl Into<String>, expression: impl Into<String>) -> Self {
        self.fulltext = Some(FulltextMatch {
            column: column.into(),
            expression: expression.into(),
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Checks the selection clauses that do not depend on row data.
    pub fn check(&self, def: &EntityDef) -> Result<(), EngineError> {
        if self.knn.is_some() && self.fulltext.is_some() {
            return Err(EngineError::Invalid("kNN and full-text selection cannot be combined".into()));
        }
        if let Some(knn) = &self.knn {
            let column = &def.columns[def.require_column(&knn.column)?];
            if column.ty.dimensions().is_none() || !column.ty.accepts(&knn.query) {
                return Err(EngineError::Invalid(format!(
                    "kNN query of kind {} does not fit column '{}' of type {:?}",
                    knn.query.kind(),
                    column.name,
                    column.ty
                )));
            }
            if knn.query.distance(&knn.query, knn.distance).is_none() {
                return Err(EngineError::Invalid(format!(
                    "{} distance is undefined for {:?}",
                    knn.distance.name(),
                    column.ty
                )));
            }
        }
        if let Some(fulltext) = &self.fulltext {
            let indexed = def
                .indexes
                .iter()
                .any(|i| i.kind == IndexKind::Fulltext && i.column == fulltext.column);
            if !indexed {
                return Err(EngineError::Invalid(format!(
                    "column '{}' of '{}' has no full-text index",
                    fulltext.column, def.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub cells: Vec<Option<Cell>>,
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<ResultRow>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vectordb::entity::{ColumnDef, IndexDef};

    fn def() -> EntityDef {
        let mut def = EntityDef::new(
            "media.descriptor_labels",
            vec![
                ColumnDef::key("descriptorid", ColumnType::Uuid),
                ColumnDef::new("label", ColumnType::String, false),
                ColumnDef::new("confidence", ColumnType::Float, true),
                ColumnDef::new("embedding", ColumnType::FloatVector(2), true),
            ],
        );
        def.indexes.push(IndexDef {
            column: "label".into(),
            kind: IndexKind::Fulltext,
        });
        def
    }

    fn row(label: &str, confidence: Option<f32>) -> Vec<Option<Cell>> {
        vec![
            Some(Cell::Uuid(1)),
            Some(Cell::String(label.into())),
            confidence.map(Cell::Float),
            None,
        ]
    }

    #[test]
    fn test_predicates_follow_null_semantics() {
        let def = def();
        let high = Predicate::Compare {
            column: "confidence".into(),
            op: CompareOp::Ge,
            value: Cell::Float(0.5),
        }
        .bind(&def)
        .unwrap();
        assert!(high.matches(&row("cat", Some(0.9))));
        assert!(!high.matches(&row("cat", Some(0.1))));
        assert!(!high.matches(&row("cat", None)));
        assert!(BoundPredicate::Not(Box::new(high)).matches(&row("cat", None)));

        let cats = Predicate::Like {
            column: "label".into(),
            pattern: "ca%".into(),
        }
        .bind(&def)
        .unwrap();
        assert!(cats.matches(&row("cat", None)));
        assert!(!cats.matches(&row("dog", None)));

        let null = Predicate::IsNull("confidence".into()).bind(&def).unwrap();
        assert!(null.matches(&row("cat", None)));

        let within = Predicate::one_of("label", vec![Cell::String("dog".into()), Cell::String("cat".into())]);
        assert!(within.bind(&def).unwrap().matches(&row("cat", None)));
    }

    #[test]
    fn test_bind_rejects_bad_literals() {
        let def = def();
        assert!(Predicate::equals("confidence", Cell::Double(0.5)).bind(&def).is_err());
        assert!(Predicate::equals("colour", Cell::String("red".into())).bind(&def).is_err());
        let ordered_vector = Predicate::Compare {
            column: "embedding".into(),
            op: CompareOp::Lt,
            value: Cell::FloatVector(vec![0.0, 0.0]),
        };
        assert!(ordered_vector.bind(&def).is_err());
        let like_number = Predicate::Like {
            column: "confidence".into(),
            pattern: "%".into(),
        };
        assert!(like_number.bind(&def).is_err());
    }

    #[test]
    fn test_selection_checks() {
        let def = def();
        let knn = Knn {
            column: "embedding".into(),
            query: Cell::FloatVector(vec![1.0, 0.0]),
            distance: Distance::Euclidean,
            k: 3,
            order: SortOrder::Asc,
        };
        assert!(Dql::scan(&def.name).knn(knn.clone()).check(&def).is_ok());

        let short = Knn {
            query: Cell::FloatVector(vec![1.0]),
            ..knn.clone()
        };
        assert!(Dql::scan(&def.name).knn(short).check(&def).is_err());

        let jaccard = Knn {
            distance: Distance::Jaccard,
            ..knn.clone()
        };
        assert!(Dql::scan(&def.name).knn(jaccard).check(&def).is_err());

        assert!(Dql::scan(&def.name).fulltext("label", "cat").check(&def).is_ok());
        assert!(Dql::scan(&def.name).fulltext("descriptorid", "cat").check(&def).is_err());
        assert!(Dql::scan(&def.name).knn(knn).fulltext("label", "cat").check(&def).is_err());
    }
}
