//! Translation between the crate's value system and engine cells, and from
//! descriptor queries to engine selections.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::descriptor::{Attribute, Descriptor, DescriptorBuilder};
use crate::error::{Error, Result};
use crate::query::{Comparison, SimpleBooleanQuery};
use crate::schema::IndexType;
use crate::value::{Type, Value};
use crate::vectordb::dql::{CompareOp, Predicate, ResultSet};
use crate::vectordb::entity::{ColumnDef, EntityDef, IndexKind, Row};
use crate::vectordb::types::{Cell, ColumnType};

pub const DESCRIPTOR_ID: &str = "descriptorid";
pub const RETRIEVABLE_ID: &str = "retrievableid";
pub const RETRIEVABLE_TYPE: &str = "type";
pub const SUBJECT_ID: &str = "subjectid";
pub const PREDICATE: &str = "predicate";
pub const OBJECT_ID: &str = "objectid";

const BACKEND: &str = "vectordb";

pub fn descriptor_entity(schema: &str, field: &str) -> String {
    format!("{schema}.descriptor_{}", field.to_lowercase())
}

pub fn retrievable_entity(schema: &str) -> String {
    format!("{schema}.retrievable")
}

pub fn relationship_entity(schema: &str) -> String {
    format!("{schema}.relationships")
}

pub fn column_type(ty: &Type) -> Result<ColumnType> {
    let dims = |n: usize| u32::try_from(n).map_err(|_| Error::UnmappedType(ty.to_string(), BACKEND));
    Ok(match *ty {
        Type::Boolean => ColumnType::Boolean,
        Type::Byte => ColumnType::Byte,
        Type::Short => ColumnType::Short,
        Type::Int => ColumnType::Int,
        Type::Long => ColumnType::Long,
        Type::Float => ColumnType::Float,
        Type::Double => ColumnType::Double,
        Type::String | Type::Text => ColumnType::String,
        Type::DateTime => ColumnType::DateTime,
        Type::Uuid => ColumnType::Uuid,
        Type::BooleanVector(n) => ColumnType::BooleanVector(dims(n)?),
        Type::IntVector(n) => ColumnType::IntVector(dims(n)?),
        Type::LongVector(n) => ColumnType::LongVector(dims(n)?),
        Type::FloatVector(n) => ColumnType::FloatVector(dims(n)?),
        Type::DoubleVector(n) => ColumnType::DoubleVector(dims(n)?),
    })
}

pub fn index_kind(index_type: IndexType) -> IndexKind {
    match index_type {
        IndexType::Scalar => IndexKind::Scalar,
        IndexType::Fulltext => IndexKind::Fulltext,
        IndexType::Nns => IndexKind::Nns,
    }
}

pub fn uuid_cell(id: Uuid) -> Cell {
    Cell::Uuid(id.as_u128())
}

pub fn to_cell(value: &Value) -> Cell {
    match value {
        Value::Boolean(v) => Cell::Boolean(*v),
        Value::Byte(v) => Cell::Byte(*v),
        Value::Short(v) => Cell::Short(*v),
        Value::Int(v) => Cell::Int(*v),
        Value::Long(v) => Cell::Long(*v),
        Value::Float(v) => Cell::Float(*v),
        Value::Double(v) => Cell::Double(*v),
        Value::String(v) | Value::Text(v) => Cell::String(v.clone()),
        Value::DateTime(v) => Cell::DateTime(v.timestamp_micros()),
        Value::Uuid(v) => uuid_cell(*v),
        Value::BooleanVector(v) => Cell::BooleanVector(v.clone()),
        Value::IntVector(v) => Cell::IntVector(v.clone()),
        Value::LongVector(v) => Cell::LongVector(v.clone()),
        Value::FloatVector(v) => Cell::FloatVector(v.clone()),
        Value::DoubleVector(v) => Cell::DoubleVector(v.clone()),
    }
}

/// Reads `cell` as an instance of the declared type `ty`.
pub fn from_cell(entity: &str, column: &str, ty: &Type, cell: Cell) -> Result<Value> {
    let mismatch = |cell: &Cell| Error::corrupt(entity, column, format!("{} cell where {ty} is declared", cell.kind()));
    let value = match (ty, cell) {
        (Type::Boolean, Cell::Boolean(v)) => Value::Boolean(v),
        (Type::Byte, Cell::Byte(v)) => Value::Byte(v),
        (Type::Short, Cell::Short(v)) => Value::Short(v),
        (Type::Int, Cell::Int(v)) => Value::Int(v),
        (Type::Long, Cell::Long(v)) => Value::Long(v),
        (Type::Float, Cell::Float(v)) => Value::Float(v),
        (Type::Double, Cell::Double(v)) => Value::Double(v),
        (Type::String, Cell::String(v)) => Value::String(v),
        (Type::Text, Cell::String(v)) => Value::Text(v),
        (Type::DateTime, Cell::DateTime(micros)) => match DateTime::<Utc>::from_timestamp_micros(micros) {
            Some(at) => Value::DateTime(at),
            None => return Err(Error::corrupt(entity, column, format!("timestamp {micros} out of range"))),
        },
        (Type::Uuid, Cell::Uuid(v)) => Value::Uuid(Uuid::from_u128(v)),
        (Type::BooleanVector(_), Cell::BooleanVector(v)) => Value::BooleanVector(v),
        (Type::IntVector(_), Cell::IntVector(v)) => Value::IntVector(v),
        (Type::LongVector(_), Cell::LongVector(v)) => Value::LongVector(v),
        (Type::FloatVector(_), Cell::FloatVector(v)) => Value::FloatVector(v),
        (Type::DoubleVector(_), Cell::DoubleVector(v)) => Value::DoubleVector(v),
        (_, cell) => return Err(mismatch(&cell)),
    };
    if ty.check(column, &value).is_err() {
        return Err(Error::corrupt(
            entity,
            column,
            format!("stored {} where {ty} is declared", value.value_type()),
        ));
    }
    Ok(value)
}

/// Descriptor entity: id key, owner, then one column per declared attribute.
pub fn descriptor_def(entity: &str, layout: &[Attribute]) -> Result<EntityDef> {
    let mut columns = vec![
        ColumnDef::key(DESCRIPTOR_ID, ColumnType::Uuid),
        ColumnDef::new(RETRIEVABLE_ID, ColumnType::Uuid, false),
    ];
    for attribute in layout {
        if attribute.name == DESCRIPTOR_ID || attribute.name == RETRIEVABLE_ID {
            return Err(Error::Layout(format!("attribute name '{}' is reserved", attribute.name)));
        }
        columns.push(ColumnDef::new(&attribute.name, column_type(&attribute.ty)?, attribute.nullable));
    }
    Ok(EntityDef::new(entity, columns))
}

pub fn retrievable_def(schema: &str) -> EntityDef {
    EntityDef::new(
        retrievable_entity(schema),
        vec![
            ColumnDef::key(RETRIEVABLE_ID, ColumnType::Uuid),
            ColumnDef::new(RETRIEVABLE_TYPE, ColumnType::String, true),
        ],
    )
}

pub fn relationship_def(schema: &str) -> EntityDef {
    EntityDef::new(
        relationship_entity(schema),
        vec![
            ColumnDef::key(SUBJECT_ID, ColumnType::Uuid),
            ColumnDef::key(PREDICATE, ColumnType::String),
            ColumnDef::key(OBJECT_ID, ColumnType::Uuid),
        ],
    )
}

/// The row of an owned descriptor in entity column order.
pub fn descriptor_row(descriptor: &Descriptor) -> Row {
    let mut row = vec![
        Some(uuid_cell(descriptor.id())),
        descriptor.retrievable_id().map(uuid_cell),
    ];
    row.extend(descriptor.values().into_iter().map(|(_, value)| value.map(to_cell)));
    row
}

/// Named access to the rows of one result set.
pub struct Rows<'a> {
    entity: &'a str,
    result: &'a ResultSet,
}

impl<'a> Rows<'a> {
    pub fn new(entity: &'a str, result: &'a ResultSet) -> Self {
        Self { entity, result }
    }

    pub fn position(&self, column: &str) -> Result<usize> {
        self.result.column(column).ok_or_else(|| Error::missing(self.entity, column))
    }

    pub fn uuid(&self, row: &[Option<Cell>], position: usize) -> Result<Uuid> {
        let column = &self.result.columns[position];
        match row.get(position).cloned().flatten() {
            Some(Cell::Uuid(id)) => Ok(Uuid::from_u128(id)),
            Some(other) => Err(Error::corrupt(self.entity, column, format!("{} cell where UUID is declared", other.kind()))),
            None => Err(Error::corrupt(self.entity, column, "null in a key column")),
        }
    }

    pub fn string(&self, row: &[Option<Cell>], position: usize) -> Result<Option<String>> {
        let column = &self.result.columns[position];
        match row.get(position).cloned().flatten() {
            Some(Cell::String(s)) => Ok(Some(s)),
            Some(other) => Err(Error::corrupt(self.entity, column, format!("{} cell where STRING is declared", other.kind()))),
            None => Ok(None),
        }
    }

    /// Rebuilds the descriptor held by `row`, walking the declared layout.
    pub fn descriptor(
        &self,
        row: &[Option<Cell>],
        prototype: &Descriptor,
        layout: &[Attribute],
        builder: DescriptorBuilder,
    ) -> Result<Descriptor> {
        let id = self.uuid(row, self.position(DESCRIPTOR_ID)?)?;
        let owner = self.uuid(row, self.position(RETRIEVABLE_ID)?)?;
        let mut values = Vec::with_capacity(layout.len());
        for attribute in layout {
            let position = self.position(&attribute.name)?;
            let value = match row.get(position).cloned().flatten() {
                Some(cell) => Some(from_cell(self.entity, &attribute.name, &attribute.ty, cell)?),
                None => None,
            };
            values.push(value);
        }
        builder(prototype, id, Some(owner), values)
    }
}

/// Engine predicate for one validated boolean clause.
pub fn boolean_predicate(attribute: &str, query: &SimpleBooleanQuery) -> Predicate {
    let column = attribute.to_string();
    let first = || query.values.first().map(to_cell).unwrap_or(Cell::Boolean(false));
    let compare = |op| Predicate::Compare {
        column: column.clone(),
        op,
        value: first(),
    };
    match query.comparison {
        Comparison::Equal => compare(CompareOp::Eq),
        Comparison::NotEqual => compare(CompareOp::Ne),
        Comparison::Less => compare(CompareOp::Lt),
        Comparison::Greater => compare(CompareOp::Gt),
        Comparison::LessOrEqual => compare(CompareOp::Le),
        Comparison::GreaterOrEqual => compare(CompareOp::Ge),
        Comparison::Like => Predicate::Like {
            column: column.clone(),
            pattern: query.values.first().and_then(Value::as_str).unwrap_or_default().to_string(),
        },
        Comparison::In => Predicate::In {
            column: column.clone(),
            values: query.values.iter().map(to_cell).collect(),
        },
    }
}
