//! Values to bind parameters and result rows back to descriptors.

use bit_vec::BitVec;
use chrono::{DateTime, Utc};
use nom::{
    character::complete::{char, multispace0},
    combinator::all_consuming,
    multi::separated_list0,
    number::complete::float,
    sequence::delimited,
    IResult,
};
use tokio_postgres::types::{FromSql, ToSql};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::descriptor::{Attribute, Descriptor, DescriptorBuilder};
use crate::error::{Error, Result};
use crate::pgvector::sql::{DESCRIPTOR_ID, RETRIEVABLE_ID};
use crate::value::{Type, Value};

/// An owned bind parameter.
pub type Param = Box<dyn ToSql + Sync + Send>;

/// Borrowed view of `params` in the shape the driver expects.
pub fn refs(params: &[Param]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect()
}

fn bits(values: &[bool]) -> BitVec {
    BitVec::from_fn(values.len(), |i| values[i])
}

pub fn vector_literal(values: &[f32]) -> String {
    let elements: Vec<String> = values.iter().map(f32::to_string).collect();
    format!("[{}]", elements.join(","))
}

fn vector_text(input: &str) -> IResult<&str, Vec<f32>> {
    delimited(
        char('['),
        separated_list0(char(','), delimited(multispace0, float, multispace0)),
        char(']'),
    )(input)
}

/// Parses the text form of a `vector` column, e.g. `[1,0.5,-2e-3]`.
pub fn parse_vector(text: &str) -> Option<Vec<f32>> {
    all_consuming(delimited(multispace0, vector_text, multispace0))(text)
        .ok()
        .map(|(_, values)| values)
}

pub fn param(value: &Value) -> Param {
    match value {
        Value::Boolean(v) => Box::new(*v),
        Value::Byte(v) => Box::new(i16::from(*v)),
        Value::Short(v) => Box::new(*v),
        Value::Int(v) => Box::new(*v),
        Value::Long(v) => Box::new(*v),
        Value::Float(v) => Box::new(*v),
        Value::Double(v) => Box::new(*v),
        Value::String(v) | Value::Text(v) => Box::new(v.clone()),
        Value::DateTime(v) => Box::new(*v),
        Value::Uuid(v) => Box::new(*v),
        Value::BooleanVector(v) if v.is_empty() => Box::new(Vec::<bool>::new()),
        Value::BooleanVector(v) => Box::new(bits(v)),
        Value::IntVector(v) => Box::new(v.clone()),
        Value::LongVector(v) => Box::new(v.clone()),
        Value::FloatVector(v) if v.is_empty() => Box::new(Vec::<f32>::new()),
        Value::FloatVector(v) => Box::new(vector_literal(v)),
        Value::DoubleVector(v) => Box::new(v.clone()),
    }
}

/// A typed SQL NULL for a column of type `ty`.
pub fn null(ty: &Type) -> Param {
    match ty {
        Type::Boolean => Box::new(None::<bool>),
        Type::Byte | Type::Short => Box::new(None::<i16>),
        Type::Int => Box::new(None::<i32>),
        Type::Long => Box::new(None::<i64>),
        Type::Float => Box::new(None::<f32>),
        Type::Double => Box::new(None::<f64>),
        Type::FloatVector(0) => Box::new(None::<Vec<f32>>),
        Type::BooleanVector(0) => Box::new(None::<Vec<bool>>),
        Type::String | Type::Text | Type::FloatVector(_) => Box::new(None::<String>),
        Type::DateTime => Box::new(None::<DateTime<Utc>>),
        Type::Uuid => Box::new(None::<Uuid>),
        Type::BooleanVector(_) => Box::new(None::<BitVec>),
        Type::IntVector(_) => Box::new(None::<Vec<i32>>),
        Type::LongVector(_) => Box::new(None::<Vec<i64>>),
        Type::DoubleVector(_) => Box::new(None::<Vec<f64>>),
    }
}

pub fn optional(ty: &Type, value: Option<&Value>) -> Param {
    match value {
        Some(value) => param(value),
        None => null(ty),
    }
}

/// The query vector of a proximity search: `float8[]` for numeric vectors, `bit` for booleans.
pub fn query_vector(value: &Value) -> Result<Param> {
    Ok(match value {
        Value::BooleanVector(v) => Box::new(bits(v)),
        Value::IntVector(v) => Box::new(v.iter().map(|&x| f64::from(x)).collect::<Vec<f64>>()),
        Value::LongVector(v) => Box::new(v.iter().map(|&x| x as f64).collect::<Vec<f64>>()),
        Value::FloatVector(v) => Box::new(v.iter().map(|&x| f64::from(x)).collect::<Vec<f64>>()),
        Value::DoubleVector(v) => Box::new(v.clone()),
        other => {
            return Err(Error::Unsupported(format!(
                "proximity search with a {} query",
                other.value_type()
            )))
        }
    })
}

/// Parameters of one descriptor row in table column order.
pub fn descriptor_params(descriptor: &Descriptor, layout: &[Attribute]) -> Vec<Param> {
    let mut params: Vec<Param> = vec![Box::new(descriptor.id()), Box::new(descriptor.retrievable_id())];
    params.extend(
        layout
            .iter()
            .map(|attribute| optional(&attribute.ty, descriptor.value(&attribute.name))),
    );
    params
}

/// Named access to the columns of result rows from one table.
pub struct Rows<'a> {
    entity: &'a str,
}

impl<'a> Rows<'a> {
    pub fn new(entity: &'a str) -> Self {
        Self { entity }
    }

    fn position(&self, row: &Row, column: &str) -> Result<usize> {
        row.columns()
            .iter()
            .position(|c| c.name() == column)
            .ok_or_else(|| Error::missing(self.entity, column))
    }

    fn get<'r, T: FromSql<'r>>(&self, row: &'r Row, column: &str) -> Result<T> {
        let position = self.position(row, column)?;
        row.try_get(position)
            .map_err(|e| Error::corrupt(self.entity, column, e.to_string()))
    }

    pub fn uuid(&self, row: &Row, column: &str) -> Result<Uuid> {
        self.get::<Option<Uuid>>(row, column)?
            .ok_or_else(|| Error::corrupt(self.entity, column, "null in a key column"))
    }

    pub fn string(&self, row: &Row, column: &str) -> Result<Option<String>> {
        self.get(row, column)
    }

    pub fn float(&self, row: &Row, column: &str) -> Result<f64> {
        self.get::<Option<f64>>(row, column)?
            .ok_or_else(|| Error::corrupt(self.entity, column, "null where a number is expected"))
    }

    /// Reads `attribute` as an instance of its declared type.
    pub fn value(&self, row: &Row, attribute: &Attribute) -> Result<Option<Value>> {
        let column = attribute.name.as_str();
        let corrupt = |reason: String| Error::corrupt(self.entity, column, reason);
        let value = match attribute.ty {
            Type::Boolean => self.get::<Option<bool>>(row, column)?.map(Value::Boolean),
            Type::Byte => match self.get::<Option<i16>>(row, column)? {
                Some(v) => Some(Value::Byte(
                    i8::try_from(v).map_err(|_| corrupt(format!("{v} does not fit a byte")))?,
                )),
                None => None,
            },
            Type::Short => self.get::<Option<i16>>(row, column)?.map(Value::Short),
            Type::Int => self.get::<Option<i32>>(row, column)?.map(Value::Int),
            Type::Long => self.get::<Option<i64>>(row, column)?.map(Value::Long),
            Type::Float => self.get::<Option<f32>>(row, column)?.map(Value::Float),
            Type::Double => self.get::<Option<f64>>(row, column)?.map(Value::Double),
            Type::String => self.get::<Option<String>>(row, column)?.map(Value::String),
            Type::Text => self.get::<Option<String>>(row, column)?.map(Value::Text),
            Type::DateTime => self.get::<Option<DateTime<Utc>>>(row, column)?.map(Value::DateTime),
            Type::Uuid => self.get::<Option<Uuid>>(row, column)?.map(Value::Uuid),
            Type::BooleanVector(0) => self.get::<Option<Vec<bool>>>(row, column)?.map(Value::BooleanVector),
            Type::FloatVector(0) => self.get::<Option<Vec<f32>>>(row, column)?.map(Value::FloatVector),
            Type::BooleanVector(_) => self
                .get::<Option<BitVec>>(row, column)?
                .map(|bits| Value::BooleanVector(bits.iter().collect())),
            Type::IntVector(_) => self.get::<Option<Vec<i32>>>(row, column)?.map(Value::IntVector),
            Type::LongVector(_) => self.get::<Option<Vec<i64>>>(row, column)?.map(Value::LongVector),
            Type::DoubleVector(_) => self.get::<Option<Vec<f64>>>(row, column)?.map(Value::DoubleVector),
            Type::FloatVector(_) => match self.get::<Option<String>>(row, column)? {
                Some(text) => Some(Value::FloatVector(
                    parse_vector(&text).ok_or_else(|| corrupt(format!("unreadable vector '{text}'")))?,
                )),
                None => None,
            },
        };
        if let Some(value) = &value {
            if attribute.ty.check(column, value).is_err() {
                return Err(corrupt(format!(
                    "stored {} where {} is declared",
                    value.value_type(),
                    attribute.ty
                )));
            }
        }
        Ok(value)
    }

    /// Rebuilds the descriptor held by `row`, walking the declared layout.
    pub fn descriptor(
        &self,
        row: &Row,
        prototype: &Descriptor,
        layout: &[Attribute],
        builder: DescriptorBuilder,
    ) -> Result<Descriptor> {
        let id = self.uuid(row, DESCRIPTOR_ID)?;
        let owner = self.uuid(row, RETRIEVABLE_ID)?;
        let values = layout
            .iter()
            .map(|attribute| self.value(row, attribute))
            .collect::<Result<Vec<_>>>()?;
        builder(prototype, id, Some(owner), values)
    }
}
