//! Line formats of the flat-file backend.
//!
//! A descriptor line is self-describing: every entry carries its attribute
//! (name, type, nullability) next to the value, so old lines stay readable after
//! a field's layout evolves.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::descriptor::{Attribute, Descriptor, DescriptorBuilder};
use crate::error::{Error, Result};
use crate::jsonl::file::JsonlFile;
use crate::retrievable::Retrievable;
use crate::value::{DescriptorId, RetrievableId, Type, Value};

pub const DESCRIPTOR_ID: &str = "descriptorid";
pub const RETRIEVABLE_ID: &str = "retrievableid";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    attribute: Attribute,
    value: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorRecord {
    attributes: Vec<Entry>,
}

impl DescriptorRecord {
    pub fn from_descriptor(descriptor: &Descriptor) -> Self {
        let mut attributes = vec![Entry {
            attribute: Attribute::new(DESCRIPTOR_ID, Type::Uuid, false),
            value: Some(Value::Uuid(descriptor.id())),
        }];
        if let Some(owner) = descriptor.retrievable_id() {
            attributes.push(Entry {
                attribute: Attribute::new(RETRIEVABLE_ID, Type::Uuid, false),
                value: Some(Value::Uuid(owner)),
            });
        }
        for (attribute, (_, value)) in descriptor.layout().into_iter().zip(descriptor.values()) {
            attributes.push(Entry {
                attribute,
                value: value.cloned(),
            });
        }
        Self { attributes }
    }

    pub fn parse(entity: &str, line_no: usize, line: &str) -> Result<Self> {
        parse(entity, line_no, line)
    }

    /// The record as one newline-terminated line.
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    fn uuid(&self, name: &str) -> Option<uuid::Uuid> {
        self.attributes.iter().find(|e| e.attribute.name == name).and_then(|e| match e.value {
            Some(Value::Uuid(id)) => Some(id),
            _ => None,
        })
    }

    pub fn descriptor_id(&self) -> Option<DescriptorId> {
        self.uuid(DESCRIPTOR_ID)
    }

    pub fn retrievable_id(&self) -> Option<RetrievableId> {
        self.uuid(RETRIEVABLE_ID)
    }

    /// Rebuilds the descriptor by walking the field's declared layout.
    pub fn into_descriptor(
        self,
        entity: &str,
        prototype: &Descriptor,
        layout: &[Attribute],
        builder: DescriptorBuilder,
    ) -> Result<Descriptor> {
        let id = self.descriptor_id().ok_or_else(|| Error::missing(entity, DESCRIPTOR_ID))?;
        let owner = self.retrievable_id().ok_or_else(|| Error::missing(entity, RETRIEVABLE_ID))?;
        let mut entries: HashMap<String, Option<Value>> = self
            .attributes
            .into_iter()
            .map(|e| (e.attribute.name, e.value))
            .collect();

        let mut values = Vec::with_capacity(layout.len());
        for attribute in layout {
            let value = match entries.remove(&attribute.name) {
                Some(Some(value)) => {
                    if attribute.ty.check(&attribute.name, &value).is_err() {
                        return Err(Error::corrupt(
                            entity,
                            &attribute.name,
                            format!("stored {} where {} is declared", value.value_type(), attribute.ty),
                        ));
                    }
                    Some(value)
                }
                Some(None) => None,
                None if attribute.nullable => None,
                None => return Err(Error::missing(entity, &attribute.name)),
            };
            values.push(value);
        }
        builder(prototype, id, Some(owner), values)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievableRecord {
    pub id: RetrievableId,
    #[serde(rename = "type")]
    pub retrievable_type: String,
}

impl RetrievableRecord {
    pub fn from_retrievable(retrievable: &Retrievable) -> Self {
        Self {
            id: retrievable.id,
            retrievable_type: retrievable.retrievable_type.clone(),
        }
    }

    pub fn into_retrievable(self) -> Retrievable {
        Retrievable::new(self.id, self.retrievable_type)
    }
}

/// Parses one line; malformed lines are integrity errors.
pub fn parse<T: DeserializeOwned>(entity: &str, line_no: usize, line: &str) -> Result<T> {
    serde_json::from_str(line).map_err(|e| Error::corrupt(entity, &format!("line {line_no}"), e.to_string()))
}

/// Lazily parses every complete line of `file`. An I/O error after the file was
/// opened is logged and ends the stream.
pub fn scan<T: DeserializeOwned + 'static>(
    file: &JsonlFile,
    entity: String,
) -> Result<Box<dyn Iterator<Item = Result<T>> + Send>> {
    let lines = file.lines()?;
    Ok(Box::new(lines.map_while(move |line| match line {
        Ok((line_no, line)) => Some(parse(&entity, line_no, &line)),
        Err(e) => {
            tracing::error!(entity = %entity, error = %e, "scan aborted");
            None
        }
    })))
}

/// Serializes `items` into one buffer of newline-terminated lines.
pub fn lines<T: Serialize>(items: impl IntoIterator<Item = T>) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    for item in items {
        serde_json::to_writer(&mut buffer, &item)?;
        buffer.push(b'\n');
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::build_struct;
    use crate::schema::StructAnalyser;
    use uuid::Uuid;

    fn label_field() -> (Descriptor, Vec<Attribute>) {
        let analyser = StructAnalyser::new(
            "scored",
            vec![
                Attribute::new("label", Type::String, false),
                Attribute::new("confidence", Type::Float, true),
            ],
        );
        let schema = crate::schema::Schema::builder("s")
            .field("labels", analyser)
            .build()
            .unwrap();
        let field = schema.fields()[0].clone();
        (field.analyser().prototype(&field).unwrap(), field.layout().unwrap())
    }

    fn label(owner: Uuid, text: &str, confidence: Option<f32>) -> Descriptor {
        let (prototype, _) = label_field();
        build_struct(
            &prototype,
            Uuid::new_v4(),
            Some(owner),
            vec![Some(Value::String(text.into())), confidence.map(Value::Float)],
        )
        .unwrap()
    }

    #[test]
    fn test_line_is_self_describing() {
        let owner = Uuid::new_v4();
        let descriptor = label(owner, "cat", Some(0.9));
        let line = DescriptorRecord::from_descriptor(&descriptor).to_line().unwrap();
        assert!(line.ends_with('\n'));

        let json: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        let entries = json["attributes"].as_array().unwrap();
        assert_eq!(entries[0]["attribute"]["name"], DESCRIPTOR_ID);
        assert_eq!(entries[1]["attribute"]["name"], RETRIEVABLE_ID);
        assert_eq!(entries[2]["attribute"]["type"], "STRING");
        assert!(entries[3]["value"].get("FLOAT").is_some());
    }

    #[test]
    fn test_decode_follows_declared_layout() {
        let (prototype, layout) = label_field();
        let descriptor = label(Uuid::new_v4(), "dog", None);
        let line = DescriptorRecord::from_descriptor(&descriptor).to_line().unwrap();

        let record = DescriptorRecord::parse("labels", 1, &line).unwrap();
        assert_eq!(record.descriptor_id(), Some(descriptor.id()));
        let decoded = record.into_descriptor("labels", &prototype, &layout, build_struct).unwrap();
        assert_eq!(decoded, descriptor);
    }

    #[test]
    fn test_missing_required_attribute_is_integrity_error() {
        let (prototype, layout) = label_field();
        let line = format!(
            concat!(
                r#"{{"attributes":["#,
                r#"{{"attribute":{{"name":"descriptorid","type":"UUID","nullable":false}},"value":{{"UUID":"{}"}}}},"#,
                r#"{{"attribute":{{"name":"retrievableid","type":"UUID","nullable":true}},"value":{{"UUID":"{}"}}}}"#,
                r#"]}}"#
            ),
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        let record = DescriptorRecord::parse("labels", 7, &line).unwrap();
        let err = record.into_descriptor("labels", &prototype, &layout, build_struct).unwrap_err();
        assert!(matches!(err, Error::MissingColumn { ref column, .. } if column == "label"));
    }

    #[test]
    fn test_wrong_stored_kind_is_corrupt() {
        let (prototype, layout) = label_field();
        let mut record = DescriptorRecord::from_descriptor(&label(Uuid::new_v4(), "cat", None));
        record.attributes[2].value = Some(Value::Int(3));
        record.attributes[2].attribute.ty = Type::Int;
        let err = record.into_descriptor("labels", &prototype, &layout, build_struct).unwrap_err();
        assert!(matches!(err, Error::CorruptValue { .. }));

        assert!(matches!(
            DescriptorRecord::parse("labels", 2, "{not json"),
            Err(Error::CorruptValue { .. })
        ));
    }
}
