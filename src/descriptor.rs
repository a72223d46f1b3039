//! Descriptors: the typed values and records attached to retrievables.
//!
//! Scalar and vector descriptors are degenerate structs with a single attribute
//! (`value` and `vector` respectively). They stay separate shapes so backends can
//! map vectors onto native vector columns and indices.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::{DescriptorId, RetrievableId, Type, Value};

/// Attribute name of the single column of a [`ScalarDescriptor`].
pub const SCALAR_ATTRIBUTE: &str = "value";
/// Attribute name of the single column of a [`VectorDescriptor`].
pub const VECTOR_ATTRIBUTE: &str = "vector";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
    pub nullable: bool,
}

impl Attribute {
    pub fn new(name: impl Into<String>, ty: Type, nullable: bool) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable,
        }
    }
}

/// Key under which backends register providers and builders.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    Text,
    BooleanVector,
    IntVector,
    LongVector,
    FloatVector,
    DoubleVector,
    Struct(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    Vector,
    Struct,
}

impl DescriptorKind {
    pub const SCALARS: [DescriptorKind; 9] = [
        DescriptorKind::Boolean,
        DescriptorKind::Byte,
        DescriptorKind::Short,
        DescriptorKind::Int,
        DescriptorKind::Long,
        DescriptorKind::Float,
        DescriptorKind::Double,
        DescriptorKind::String,
        DescriptorKind::Text,
    ];

    pub const VECTORS: [DescriptorKind; 5] = [
        DescriptorKind::BooleanVector,
        DescriptorKind::IntVector,
        DescriptorKind::LongVector,
        DescriptorKind::FloatVector,
        DescriptorKind::DoubleVector,
    ];

    pub fn shape(&self) -> Shape {
        match self {
            DescriptorKind::Struct(_) => Shape::Struct,
            k if k.vector_type(0).is_some() => Shape::Vector,
            _ => Shape::Scalar,
        }
    }

    pub fn scalar_type(&self) -> Option<Type> {
        Some(match self {
            DescriptorKind::Boolean => Type::Boolean,
            DescriptorKind::Byte => Type::Byte,
            DescriptorKind::Short => Type::Short,
            DescriptorKind::Int => Type::Int,
            DescriptorKind::Long => Type::Long,
            DescriptorKind::Float => Type::Float,
            DescriptorKind::Double => Type::Double,
            DescriptorKind::String => Type::String,
            DescriptorKind::Text => Type::Text,
            _ => return None,
        })
    }

    pub fn vector_type(&self, length: usize) -> Option<Type> {
        Some(match self {
            DescriptorKind::BooleanVector => Type::BooleanVector(length),
            DescriptorKind::IntVector => Type::IntVector(length),
            DescriptorKind::LongVector => Type::LongVector(length),
            DescriptorKind::FloatVector => Type::FloatVector(length),
            DescriptorKind::DoubleVector => Type::DoubleVector(length),
            _ => return None,
        })
    }

    fn of_type(ty: &Type) -> Option<DescriptorKind> {
        let kind = match ty {
            Type::Boolean => DescriptorKind::Boolean,
            Type::Byte => DescriptorKind::Byte,
            Type::Short => DescriptorKind::Short,
            Type::Int => DescriptorKind::Int,
            Type::Long => DescriptorKind::Long,
            Type::Float => DescriptorKind::Float,
            Type::Double => DescriptorKind::Double,
            Type::String => DescriptorKind::String,
            Type::Text => DescriptorKind::Text,
            Type::BooleanVector(_) => DescriptorKind::BooleanVector,
            Type::IntVector(_) => DescriptorKind::IntVector,
            Type::LongVector(_) => DescriptorKind::LongVector,
            Type::FloatVector(_) => DescriptorKind::FloatVector,
            Type::DoubleVector(_) => DescriptorKind::DoubleVector,
            Type::DateTime | Type::Uuid => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorKind::Struct(name) => write!(f, "Struct({name})"),
            other => write!(f, "{other:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalarDescriptor {
    id: DescriptorId,
    retrievable_id: Option<RetrievableId>,
    value: Value,
}

impl ScalarDescriptor {
    pub fn new(id: DescriptorId, retrievable_id: Option<RetrievableId>, value: Value) -> Result<Self> {
        if DescriptorKind::of_type(&value.value_type()).map(|k| k.shape()) != Some(Shape::Scalar) {
            return Err(Error::Layout(format!(
                "{} cannot back a scalar descriptor",
                value.value_type()
            )));
        }
        value.value_type().check(SCALAR_ATTRIBUTE, &value)?;
        Ok(Self { id, retrievable_id, value })
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorDescriptor {
    id: DescriptorId,
    retrievable_id: Option<RetrievableId>,
    vector: Value,
}

impl VectorDescriptor {
    pub fn new(id: DescriptorId, retrievable_id: Option<RetrievableId>, vector: Value) -> Result<Self> {
        if !vector.value_type().is_vector() {
            return Err(Error::Layout(format!(
                "{} cannot back a vector descriptor",
                vector.value_type()
            )));
        }
        vector.value_type().check(VECTOR_ATTRIBUTE, &vector)?;
        Ok(Self { id, retrievable_id, vector })
    }

    pub fn vector(&self) -> &Value {
        &self.vector
    }

    pub fn len(&self) -> usize {
        self.vector.value_type().dimensions().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDescriptor {
    id: DescriptorId,
    retrievable_id: Option<RetrievableId>,
    name: String,
    layout: Arc<[Attribute]>,
    values: Vec<Option<Value>>,
}

impl StructDescriptor {
    /// Builds a struct descriptor from a name-keyed value map. The keys must match
    /// the layout's attribute names exactly; absent nullable attributes must be
    /// given explicitly as `None`.
    pub fn new(
        id: DescriptorId,
        retrievable_id: Option<RetrievableId>,
        name: impl Into<String>,
        layout: impl Into<Arc<[Attribute]>>,
        mut values: HashMap<String, Option<Value>>,
    ) -> Result<Self> {
        let layout = layout.into();
        let declared: HashSet<&str> = layout.iter().map(|a| a.name.as_str()).collect();
        if let Some(extra) = values.keys().find(|k| !declared.contains(k.as_str())) {
            return Err(Error::Layout(format!("value '{extra}' is not part of the layout")));
        }
        let mut ordered = Vec::with_capacity(layout.len());
        for attribute in layout.iter() {
            match values.remove(&attribute.name) {
                Some(value) => ordered.push(value),
                None => {
                    return Err(Error::Layout(format!(
                        "no value given for attribute '{}'",
                        attribute.name
                    )))
                }
            }
        }
        Self::from_ordered(id, retrievable_id, name, layout, ordered)
    }

    /// Builds a struct descriptor from values given in layout order.
    pub fn from_ordered(
        id: DescriptorId,
        retrievable_id: Option<RetrievableId>,
        name: impl Into<String>,
        layout: impl Into<Arc<[Attribute]>>,
        values: Vec<Option<Value>>,
    ) -> Result<Self> {
        let layout = layout.into();
        validate_layout(&layout)?;
        if values.len() != layout.len() {
            return Err(Error::Layout(format!(
                "{} values given for a layout of {} attributes",
                values.len(),
                layout.len()
            )));
        }
        for (attribute, value) in layout.iter().zip(&values) {
            match value {
                Some(v) => attribute.ty.check(&attribute.name, v)?,
                None if attribute.nullable => {}
                None => {
                    return Err(Error::Layout(format!(
                        "attribute '{}' is not nullable",
                        attribute.name
                    )))
                }
            }
        }
        Ok(Self {
            id,
            retrievable_id,
            name: name.into(),
            layout,
            values,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &Arc<[Attribute]> {
        &self.layout
    }
}

fn validate_layout(layout: &[Attribute]) -> Result<()> {
    if layout.is_empty() {
        return Err(Error::Layout("a struct layout needs at least one attribute".into()));
    }
    let mut seen = HashSet::new();
    for attribute in layout {
        if attribute.name.is_empty() || !seen.insert(attribute.name.to_ascii_lowercase()) {
            return Err(Error::Layout(format!(
                "attribute names must be non-empty and unique, got '{}'",
                attribute.name
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    Scalar(ScalarDescriptor),
    Vector(VectorDescriptor),
    Struct(StructDescriptor),
}

impl Descriptor {
    pub fn scalar(id: DescriptorId, retrievable_id: Option<RetrievableId>, value: Value) -> Result<Self> {
        ScalarDescriptor::new(id, retrievable_id, value).map(Descriptor::Scalar)
    }

    pub fn vector(id: DescriptorId, retrievable_id: Option<RetrievableId>, vector: Value) -> Result<Self> {
        VectorDescriptor::new(id, retrievable_id, vector).map(Descriptor::Vector)
    }

    pub fn id(&self) -> DescriptorId {
        match self {
            Descriptor::Scalar(d) => d.id,
            Descriptor::Vector(d) => d.id,
            Descriptor::Struct(d) => d.id,
        }
    }

    pub fn retrievable_id(&self) -> Option<RetrievableId> {
        match self {
            Descriptor::Scalar(d) => d.retrievable_id,
            Descriptor::Vector(d) => d.retrievable_id,
            Descriptor::Struct(d) => d.retrievable_id,
        }
    }

    /// Query-only descriptors have no owner and are never written.
    pub fn is_transient(&self) -> bool {
        self.retrievable_id().is_none()
    }

    pub fn kind(&self) -> DescriptorKind {
        match self {
            Descriptor::Struct(d) => DescriptorKind::Struct(d.name.clone()),
            Descriptor::Scalar(d) => DescriptorKind::of_type(&d.value.value_type()).unwrap_or(DescriptorKind::Text),
            Descriptor::Vector(d) => {
                DescriptorKind::of_type(&d.vector.value_type()).unwrap_or(DescriptorKind::FloatVector)
            }
        }
    }

    pub fn layout(&self) -> Vec<Attribute> {
        match self {
            Descriptor::Scalar(d) => vec![Attribute::new(SCALAR_ATTRIBUTE, d.value.value_type(), false)],
            Descriptor::Vector(d) => vec![Attribute::new(VECTOR_ATTRIBUTE, d.vector.value_type(), false)],
            Descriptor::Struct(d) => d.layout.to_vec(),
        }
    }

    /// Attribute values in layout order.
    pub fn values(&self) -> Vec<(&str, Option<&Value>)> {
        match self {
            Descriptor::Scalar(d) => vec![(SCALAR_ATTRIBUTE, Some(&d.value))],
            Descriptor::Vector(d) => vec![(VECTOR_ATTRIBUTE, Some(&d.vector))],
            Descriptor::Struct(d) => d
                .layout
                .iter()
                .zip(&d.values)
                .map(|(a, v)| (a.name.as_str(), v.as_ref()))
                .collect(),
        }
    }

    pub fn value(&self, attribute: &str) -> Option<&Value> {
        self.values()
            .into_iter()
            .find(|(name, _)| *name == attribute)
            .and_then(|(_, v)| v)
    }

    pub fn with_retrievable(self, retrievable_id: RetrievableId) -> Self {
        match self {
            Descriptor::Scalar(d) => Descriptor::Scalar(ScalarDescriptor {
                retrievable_id: Some(retrievable_id),
                ..d
            }),
            Descriptor::Vector(d) => Descriptor::Vector(VectorDescriptor {
                retrievable_id: Some(retrievable_id),
                ..d
            }),
            Descriptor::Struct(d) => Descriptor::Struct(StructDescriptor {
                retrievable_id: Some(retrievable_id),
                ..d
            }),
        }
    }

    /// Checks that this descriptor has the same kind and layout as `prototype`.
    pub fn conforms_to(&self, prototype: &Descriptor) -> Result<()> {
        if self.kind() != prototype.kind() {
            return Err(Error::Layout(format!(
                "descriptor {} is a {} but the field stores {}",
                self.id(),
                self.kind(),
                prototype.kind()
            )));
        }
        let (mine, expected) = (self.layout(), prototype.layout());
        if mine != expected {
            let found: Vec<String> = mine.iter().map(|a| format!("{}:{}", a.name, a.ty)).collect();
            let wanted: Vec<String> = expected.iter().map(|a| format!("{}:{}", a.name, a.ty)).collect();
            return Err(Error::Layout(format!(
                "descriptor {} has layout [{}], field declares [{}]",
                self.id(),
                found.join(", "),
                wanted.join(", ")
            )));
        }
        Ok(())
    }
}

/// Rebuilds a descriptor of the prototype's kind from values read in layout order.
pub type DescriptorBuilder =
    fn(&Descriptor, DescriptorId, Option<RetrievableId>, Vec<Option<Value>>) -> Result<Descriptor>;

fn single(prototype: &Descriptor, mut values: Vec<Option<Value>>) -> Result<Value> {
    let attribute = prototype.layout().remove(0);
    match (values.len(), values.pop()) {
        (1, Some(Some(value))) => {
            attribute.ty.check(&attribute.name, &value)?;
            Ok(value)
        }
        (1, Some(None)) => Err(Error::corrupt(
            &prototype.kind().to_string(),
            &attribute.name,
            "null in a non-nullable attribute",
        )),
        (n, _) => Err(Error::Layout(format!("expected one value, got {n}"))),
    }
}

pub fn build_scalar(
    prototype: &Descriptor,
    id: DescriptorId,
    retrievable_id: Option<RetrievableId>,
    values: Vec<Option<Value>>,
) -> Result<Descriptor> {
    Descriptor::scalar(id, retrievable_id, single(prototype, values)?)
}

pub fn build_vector(
    prototype: &Descriptor,
    id: DescriptorId,
    retrievable_id: Option<RetrievableId>,
    values: Vec<Option<Value>>,
) -> Result<Descriptor> {
    Descriptor::vector(id, retrievable_id, single(prototype, values)?)
}

pub fn build_struct(
    prototype: &Descriptor,
    id: DescriptorId,
    retrievable_id: Option<RetrievableId>,
    values: Vec<Option<Value>>,
) -> Result<Descriptor> {
    match prototype {
        Descriptor::Struct(p) => {
            for (attribute, value) in p.layout.iter().zip(&values) {
                if value.is_none() && !attribute.nullable {
                    return Err(Error::corrupt(&p.name, &attribute.name, "null in a non-nullable attribute"));
                }
            }
            StructDescriptor::from_ordered(id, retrievable_id, p.name.clone(), p.layout.clone(), values)
                .map(Descriptor::Struct)
        }
        other => Err(Error::Layout(format!("{} is not a struct prototype", other.kind()))),
    }
}

/// The builder matching a kind's shape.
pub fn builder_for(kind: &DescriptorKind) -> DescriptorBuilder {
    match kind.shape() {
        Shape::Scalar => build_scalar,
        Shape::Vector => build_vector,
        Shape::Struct => build_struct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn label_layout() -> Vec<Attribute> {
        vec![
            Attribute::new("label", Type::String, false),
            Attribute::new("confidence", Type::Float, true),
        ]
    }

    #[test]
    fn test_struct_keys_must_match_layout() {
        let mut values = HashMap::new();
        values.insert("label".to_string(), Some(Value::String("cat".into())));
        let missing = StructDescriptor::new(Uuid::new_v4(), None, "label", label_layout(), values.clone());
        assert!(matches!(missing, Err(Error::Layout(_))));

        values.insert("confidence".to_string(), None);
        values.insert("colour".to_string(), Some(Value::String("red".into())));
        let extra = StructDescriptor::new(Uuid::new_v4(), None, "label", label_layout(), values.clone());
        assert!(matches!(extra, Err(Error::Layout(_))));

        values.remove("colour");
        let ok = StructDescriptor::new(Uuid::new_v4(), None, "label", label_layout(), values).unwrap();
        let d = Descriptor::Struct(ok);
        assert_eq!(d.values().len(), 2);
        assert_eq!(d.value("label"), Some(&Value::String("cat".into())));
        assert_eq!(d.value("confidence"), None);
    }

    #[test]
    fn test_struct_value_kinds_are_checked() {
        let values = vec![Some(Value::Int(3)), None];
        let err = StructDescriptor::from_ordered(Uuid::new_v4(), None, "label", label_layout(), values);
        assert!(matches!(err, Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn test_non_nullable_attribute_rejects_null() {
        let values = vec![None, Some(Value::Float(0.5))];
        let err = StructDescriptor::from_ordered(Uuid::new_v4(), None, "label", label_layout(), values);
        assert!(matches!(err, Err(Error::Layout(_))));
    }

    #[test]
    fn test_duplicate_attribute_names_are_rejected() {
        let layout = vec![
            Attribute::new("a", Type::Int, false),
            Attribute::new("A", Type::Int, false),
        ];
        let err = StructDescriptor::from_ordered(Uuid::new_v4(), None, "dup", layout, vec![None, None]);
        assert!(matches!(err, Err(Error::Layout(_))));
    }

    #[test]
    fn test_shapes_and_kinds() {
        let s = Descriptor::scalar(Uuid::new_v4(), None, Value::Long(7)).unwrap();
        assert_eq!(s.kind(), DescriptorKind::Long);
        assert_eq!(s.kind().shape(), Shape::Scalar);
        assert!(s.is_transient());

        let v = Descriptor::vector(Uuid::new_v4(), Some(Uuid::new_v4()), Value::FloatVector(vec![0.0; 4])).unwrap();
        assert_eq!(v.kind(), DescriptorKind::FloatVector);
        assert_eq!(v.layout(), vec![Attribute::new(VECTOR_ATTRIBUTE, Type::FloatVector(4), false)]);

        assert!(Descriptor::scalar(Uuid::new_v4(), None, Value::FloatVector(vec![1.0])).is_err());
        assert!(Descriptor::scalar(Uuid::new_v4(), None, Value::Uuid(Uuid::nil())).is_err());
        assert!(Descriptor::vector(Uuid::new_v4(), None, Value::Int(1)).is_err());
    }

    #[test]
    fn test_builders_rebuild_from_prototype() {
        let proto = Descriptor::vector(Uuid::nil(), None, Value::FloatVector(vec![0.0; 3])).unwrap();
        let (id, rid) = (Uuid::new_v4(), Uuid::new_v4());
        let built = builder_for(&proto.kind())(
            &proto,
            id,
            Some(rid),
            vec![Some(Value::FloatVector(vec![1.0, 2.0, 3.0]))],
        )
        .unwrap();
        assert_eq!(built.id(), id);
        assert_eq!(built.retrievable_id(), Some(rid));
        assert!(built.conforms_to(&proto).is_ok());

        let null = build_vector(&proto, id, Some(rid), vec![None]);
        assert!(matches!(null, Err(Error::CorruptValue { .. })));
    }

    #[test]
    fn test_conforms_to_detects_dimension_drift() {
        let proto = Descriptor::vector(Uuid::nil(), None, Value::FloatVector(vec![0.0; 3])).unwrap();
        let other = Descriptor::vector(Uuid::new_v4(), None, Value::FloatVector(vec![0.0; 4])).unwrap();
        assert!(other.conforms_to(&proto).is_err());
    }
}
