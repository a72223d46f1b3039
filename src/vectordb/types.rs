//! The engine's native cell and column types.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};

use crate::vector::Distance;

/// One stored cell. Strings are unbounded, ids are raw 128-bit integers and
/// timestamps are microseconds since the Unix epoch (UTC).
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub enum Cell {
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Uuid(u128),
    DateTime(i64),
    BooleanVector(Vec<bool>),
    IntVector(Vec<i32>),
    LongVector(Vec<i64>),
    FloatVector(Vec<f32>),
    DoubleVector(Vec<f64>),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    Uuid,
    DateTime,
    BooleanVector(u32),
    IntVector(u32),
    LongVector(u32),
    FloatVector(u32),
    DoubleVector(u32),
}

impl ColumnType {
    pub fn dimensions(&self) -> Option<usize> {
        match self {
            ColumnType::BooleanVector(n)
            | ColumnType::IntVector(n)
            | ColumnType::LongVector(n)
            | ColumnType::FloatVector(n)
            | ColumnType::DoubleVector(n) => Some(*n as usize),
            _ => None,
        }
    }

    pub fn accepts(&self, cell: &Cell) -> bool {
        match (self, cell) {
            (ColumnType::Boolean, Cell::Boolean(_))
            | (ColumnType::Byte, Cell::Byte(_))
            | (ColumnType::Short, Cell::Short(_))
            | (ColumnType::Int, Cell::Int(_))
            | (ColumnType::Long, Cell::Long(_))
            | (ColumnType::Float, Cell::Float(_))
            | (ColumnType::Double, Cell::Double(_))
            | (ColumnType::String, Cell::String(_))
            | (ColumnType::Uuid, Cell::Uuid(_))
            | (ColumnType::DateTime, Cell::DateTime(_)) => true,
            (ColumnType::BooleanVector(n), Cell::BooleanVector(v)) => v.len() == *n as usize,
            (ColumnType::IntVector(n), Cell::IntVector(v)) => v.len() == *n as usize,
            (ColumnType::LongVector(n), Cell::LongVector(v)) => v.len() == *n as usize,
            (ColumnType::FloatVector(n), Cell::FloatVector(v)) => v.len() == *n as usize,
            (ColumnType::DoubleVector(n), Cell::DoubleVector(v)) => v.len() == *n as usize,
            _ => false,
        }
    }
}

impl Cell {
    pub fn kind(&self) -> &'static str {
        match self {
            Cell::Boolean(_) => "BOOLEAN",
            Cell::Byte(_) => "BYTE",
            Cell::Short(_) => "SHORT",
            Cell::Int(_) => "INT",
            Cell::Long(_) => "LONG",
            Cell::Float(_) => "FLOAT",
            Cell::Double(_) => "DOUBLE",
            Cell::String(_) => "STRING",
            Cell::Uuid(_) => "UUID",
            Cell::DateTime(_) => "DATETIME",
            Cell::BooleanVector(_) => "BOOLEAN_VECTOR",
            Cell::IntVector(_) => "INT_VECTOR",
            Cell::LongVector(_) => "LONG_VECTOR",
            Cell::FloatVector(_) => "FLOAT_VECTOR",
            Cell::DoubleVector(_) => "DOUBLE_VECTOR",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::String(s) => Some(s),
            _ => None,
        }
    }

    /// Orders cells of the same scalar kind; anything else is unordered.
    pub fn compare(&self, other: &Cell) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Cell::Boolean(a), Cell::Boolean(b)) => a.partial_cmp(b),
            (Cell::Byte(a), Cell::Byte(b)) => a.partial_cmp(b),
            (Cell::Short(a), Cell::Short(b)) => a.partial_cmp(b),
            (Cell::Int(a), Cell::Int(b)) => a.partial_cmp(b),
            (Cell::Long(a), Cell::Long(b)) => a.partial_cmp(b),
            (Cell::Float(a), Cell::Float(b)) => a.partial_cmp(b),
            (Cell::Double(a), Cell::Double(b)) => a.partial_cmp(b),
            (Cell::String(a), Cell::String(b)) => a.partial_cmp(b),
            (Cell::Uuid(a), Cell::Uuid(b)) => a.partial_cmp(b),
            (Cell::DateTime(a), Cell::DateTime(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    fn numeric(&self) -> Option<Vec<f64>> {
        match self {
            Cell::IntVector(v) => Some(v.iter().map(|x| *x as f64).collect()),
            Cell::LongVector(v) => Some(v.iter().map(|x| *x as f64).collect()),
            Cell::FloatVector(v) => Some(v.iter().map(|x| *x as f64).collect()),
            Cell::DoubleVector(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Distance between two vector cells of the same kind and length; `None`
    /// when the metric is undefined for them.
    pub fn distance(&self, other: &Cell, metric: Distance) -> Option<f64> {
        if std::mem::discriminant(self) != std::mem::discriminant(other) {
            return None;
        }
        match (self, other) {
            (Cell::BooleanVector(a), Cell::BooleanVector(b)) => {
                let defined = a.len() == b.len() && matches!(metric, Distance::Hamming | Distance::Jaccard);
                defined.then(|| metric.binary(a, b))
            }
            _ => {
                let (a, b) = (self.numeric()?, other.numeric()?);
                (a.len() == b.len() && metric != Distance::Jaccard).then(|| metric.numeric(&a, &b))
            }
        }
    }
}
