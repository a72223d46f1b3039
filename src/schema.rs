//! Schemas, fields and the analysers that give each field its prototype.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use nom::{
    bytes::complete::{take_while, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{all_consuming, map_res, opt},
    multi::separated_list1,
    sequence::{delimited, preceded},
    IResult,
};
use uuid::Uuid;

use crate::descriptor::{Attribute, Descriptor, DescriptorKind, StructDescriptor};
use crate::error::{Error, Result};
use crate::parameters::Parameters;
use crate::value::Type;

/// Field parameter holding the element count of a vector field.
pub const LENGTH_PARAMETER: &str = "length";
/// Field parameter holding a struct layout declaration, see [`parse_layout`].
pub const ATTRIBUTES_PARAMETER: &str = "attributes";

/// Produces the prototype of the descriptors stored in a field.
pub trait Analyser: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn descriptor_kind(&self) -> DescriptorKind;

    /// A zero-data descriptor describing the physical layout of `field`.
    fn prototype(&self, field: &Field) -> Result<Descriptor>;
}

#[derive(Debug, Clone)]
pub struct ScalarAnalyser {
    kind: DescriptorKind,
}

impl ScalarAnalyser {
    pub fn new(kind: DescriptorKind) -> Result<Self> {
        match kind.scalar_type() {
            Some(_) => Ok(Self { kind }),
            None => Err(Error::Unsupported(format!("{kind} is not a scalar kind"))),
        }
    }
}

impl Analyser for ScalarAnalyser {
    fn name(&self) -> &str {
        "scalar"
    }

    fn descriptor_kind(&self) -> DescriptorKind {
        self.kind.clone()
    }

    fn prototype(&self, _field: &Field) -> Result<Descriptor> {
        let ty = self
            .kind
            .scalar_type()
            .ok_or_else(|| Error::Unsupported(format!("{} is not a scalar kind", self.kind)))?;
        Descriptor::scalar(Uuid::nil(), None, ty.default_value())
    }
}

/// Vector fields read their element count from the `length` field parameter.
#[derive(Debug, Clone)]
pub struct VectorAnalyser {
    kind: DescriptorKind,
}

impl VectorAnalyser {
    pub fn new(kind: DescriptorKind) -> Result<Self> {
        match kind.vector_type(0) {
            Some(_) => Ok(Self { kind }),
            None => Err(Error::Unsupported(format!("{kind} is not a vector kind"))),
        }
    }

    pub fn float() -> Self {
        Self {
            kind: DescriptorKind::FloatVector,
        }
    }
}

impl Analyser for VectorAnalyser {
    fn name(&self) -> &str {
        "vector"
    }

    fn descriptor_kind(&self) -> DescriptorKind {
        self.kind.clone()
    }

    fn prototype(&self, field: &Field) -> Result<Descriptor> {
        let length: usize = field
            .parameters()
            .parse(LENGTH_PARAMETER)?
            .ok_or_else(|| Error::MissingParameter(format!("{}.{}", field.name(), LENGTH_PARAMETER)))?;
        let ty = self
            .kind
            .vector_type(length)
            .ok_or_else(|| Error::Unsupported(format!("{} is not a vector kind", self.kind)))?;
        Descriptor::vector(Uuid::nil(), None, ty.default_value())
    }
}

/// Struct fields either carry a fixed layout or declare one through the
/// `attributes` field parameter.
#[derive(Debug, Clone)]
pub struct StructAnalyser {
    name: String,
    layout: Option<Vec<Attribute>>,
}

impl StructAnalyser {
    pub fn new(name: impl Into<String>, layout: Vec<Attribute>) -> Self {
        Self {
            name: name.into(),
            layout: Some(layout),
        }
    }

    /// A struct kind whose layout comes from the field's `attributes` parameter.
    pub fn declared(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layout: None,
        }
    }

    pub fn label() -> Self {
        Self::new(
            "label",
            vec![
                Attribute::new("label", Type::String, false),
                Attribute::new("confidence", Type::Float, false),
            ],
        )
    }

    pub fn file_source() -> Self {
        Self::new(
            "file_source",
            vec![
                Attribute::new("path", Type::Text, false),
                Attribute::new("size", Type::Long, false),
            ],
        )
    }

    pub fn temporal() -> Self {
        Self::new(
            "temporal",
            vec![
                Attribute::new("start_ns", Type::Long, false),
                Attribute::new("end_ns", Type::Long, false),
            ],
        )
    }

    pub fn media_dimensions() -> Self {
        Self::new(
            "media_dimensions",
            vec![
                Attribute::new("width", Type::Int, false),
                Attribute::new("height", Type::Int, false),
            ],
        )
    }
}

impl Analyser for StructAnalyser {
    fn name(&self) -> &str {
        &self.name
    }

    fn descriptor_kind(&self) -> DescriptorKind {
        DescriptorKind::Struct(self.name.clone())
    }

    fn prototype(&self, field: &Field) -> Result<Descriptor> {
        let layout = match &self.layout {
            Some(layout) => layout.clone(),
            None => parse_layout(field.parameters().require(ATTRIBUTES_PARAMETER)?)?,
        };
        let values = layout.iter().map(|a| Some(a.ty.default_value())).collect();
        StructDescriptor::from_ordered(Uuid::nil(), None, self.name.clone(), layout, values).map(Descriptor::Struct)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    /// Ordered index for boolean comparisons.
    Scalar,
    /// Token index for full-text queries.
    Fulltext,
    /// Nearest-neighbour index over a vector attribute.
    Nns,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexConfig {
    pub attributes: Vec<String>,
    pub index_type: IndexType,
    pub parameters: Parameters,
}

impl IndexConfig {
    pub fn new(index_type: IndexType, attribute: impl Into<String>) -> Self {
        Self {
            attributes: vec![attribute.into()],
            index_type,
            parameters: Parameters::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    schema: String,
    name: String,
    analyser: Arc<dyn Analyser>,
    parameters: Parameters,
    indexes: Vec<IndexConfig>,
}

impl Field {
    pub fn schema_name(&self) -> &str {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn analyser(&self) -> &Arc<dyn Analyser> {
        &self.analyser
    }

    pub fn kind(&self) -> DescriptorKind {
        self.analyser.descriptor_kind()
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn indexes(&self) -> &[IndexConfig] {
        &self.indexes
    }

    pub fn has_index(&self, index_type: IndexType, attribute: &str) -> bool {
        self.indexes
            .iter()
            .any(|i| i.index_type == index_type && i.attributes.iter().any(|a| a == attribute))
    }

    pub fn prototype(&self) -> Result<Descriptor> {
        self.analyser.prototype(self)
    }

    /// Layout declared by the prototype.
    pub fn layout(&self) -> Result<Vec<Attribute>> {
        Ok(self.prototype()?.layout())
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.schema == other.schema
            && self.name == other.name
            && self.kind() == other.kind()
            && self.parameters == other.parameters
            && self.indexes == other.indexes
    }
}

impl Eq for Field {}

#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    fields: Vec<Arc<Field>>,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Arc<Field>] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Arc<Field>> {
        self.fields.iter().find(|f| f.name == name)
    }
}

pub struct SchemaBuilder {
    name: String,
    fields: Vec<Field>,
}

impl SchemaBuilder {
    pub fn field(self, name: impl Into<String>, analyser: impl Analyser + 'static) -> Self {
        self.field_with(name, analyser, Parameters::new(), Vec::new())
    }

    pub fn field_with(
        mut self,
        name: impl Into<String>,
        analyser: impl Analyser + 'static,
        parameters: Parameters,
        indexes: Vec<IndexConfig>,
    ) -> Self {
        self.fields.push(Field {
            schema: self.name.clone(),
            name: name.into(),
            analyser: Arc::new(analyser),
            parameters,
            indexes,
        });
        self
    }

    /// Validates names and prototypes. Names end up in physical identifiers, so
    /// only ASCII letters, digits and underscores are accepted.
    pub fn build(self) -> Result<Schema> {
        check_identifier(&self.name)?;
        let mut seen = HashSet::new();
        for field in &self.fields {
            check_identifier(&field.name)?;
            if !seen.insert(field.name.to_ascii_lowercase()) {
                return Err(Error::InvalidParameter {
                    name: "field".into(),
                    value: field.name.clone(),
                });
            }
            let prototype = field.prototype()?;
            for attribute in prototype.layout() {
                check_identifier(&attribute.name)?;
            }
            for index in &field.indexes {
                if let Some(unknown) = index
                    .attributes
                    .iter()
                    .find(|a| prototype.layout().iter().all(|l| &l.name != *a))
                {
                    return Err(Error::UnknownAttribute {
                        field: field.qualified_name(),
                        attribute: unknown.clone(),
                    });
                }
            }
        }
        Ok(Schema {
            name: self.name,
            fields: self.fields.into_iter().map(Arc::new).collect(),
        })
    }
}

fn check_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidParameter {
            name: "identifier".into(),
            value: name.to_string(),
        })
    }
}

// --- LAYOUT DECLARATIONS ---
// attributes := attribute (',' attribute)*
// attribute  := name ':' TYPE ['(' length ')'] ['?']

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)
}

fn length(input: &str) -> IResult<&str, usize> {
    delimited(ws(char('(')), map_res(digit1, |s: &str| s.parse::<usize>()), ws(char(')')))(input)
}

fn attribute(input: &str) -> IResult<&str, (&str, &str, Option<usize>, bool)> {
    let (input, name) = ws(identifier)(input)?;
    let (input, _) = char(':')(input)?;
    let (input, type_name) = ws(take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'))(input)?;
    let (input, dims) = opt(length)(input)?;
    let (input, nullable) = opt(preceded(take_while(|c: char| c == ' '), char('?')))(input)?;
    Ok((input, (name, type_name, dims, nullable.is_some())))
}

/// Parses a struct layout declaration such as
/// `label:STRING, score:FLOAT?, embedding:FLOAT_VECTOR(4)`.
pub fn parse_layout(input: &str) -> Result<Vec<Attribute>> {
    let parsed = all_consuming(ws(separated_list1(char(','), attribute)))(input);
    let entries = match parsed {
        Ok((_, entries)) => entries,
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let context: String = e.input.chars().take(20).collect();
            return Err(Error::InvalidParameter {
                name: ATTRIBUTES_PARAMETER.into(),
                value: format!("{input} (near '{context}')"),
            });
        }
        Err(nom::Err::Incomplete(_)) => {
            return Err(Error::InvalidParameter {
                name: ATTRIBUTES_PARAMETER.into(),
                value: input.to_string(),
            })
        }
    };
    entries
        .into_iter()
        .map(|(name, type_name, dims, nullable)| {
            Type::from_name(type_name, dims)
                .map(|ty| Attribute::new(name, ty, nullable))
                .ok_or_else(|| Error::InvalidParameter {
                    name: ATTRIBUTES_PARAMETER.into(),
                    value: format!("{name}:{type_name}"),
                })
        })
        .collect()
}
