//! Behaviour every backend must share. Each check takes a freshly opened
//! connection on an empty store for the schema returned by [`schema`].
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use mediastore::database::registry::default_kinds;
use mediastore::descriptor::{DescriptorKind, StructDescriptor};
use mediastore::query::{Comparison, CompoundBooleanQuery, ProximityQuery, SimpleBooleanQuery, SimpleFulltextQuery, SortOrder};
use mediastore::schema::{IndexConfig, IndexType, ScalarAnalyser, StructAnalyser, VectorAnalyser, LENGTH_PARAMETER};
use mediastore::{
    Attribute, Connection, Descriptor, Distance, Error, Parameters, Query, Relationship, Retrievable, Schema, Type, Value,
};
use rand::Rng;
use uuid::Uuid;

pub const CLIP: &str = "clip";
pub const CAPTION: &str = "caption";
pub const LABEL: &str = "label";
/// Struct kind holding the attribute types no scalar or vector kind carries.
pub const STAMP: &str = "stamp";

/// The default kinds plus [`STAMP`]; backends under test are opened with these.
pub fn kinds() -> Vec<DescriptorKind> {
    let mut kinds = default_kinds();
    kinds.push(DescriptorKind::Struct(STAMP.to_string()));
    kinds
}

pub fn schema(name: &str) -> Schema {
    Schema::builder(name)
        .field_with(
            CLIP,
            VectorAnalyser::float(),
            Parameters::new().with(LENGTH_PARAMETER, 3),
            vec![IndexConfig::new(IndexType::Nns, "vector")],
        )
        .field_with(
            CAPTION,
            ScalarAnalyser::new(DescriptorKind::String).unwrap(),
            Parameters::new(),
            vec![IndexConfig::new(IndexType::Fulltext, "value")],
        )
        .field_with(
            LABEL,
            StructAnalyser::label(),
            Parameters::new(),
            vec![IndexConfig::new(IndexType::Scalar, "label")],
        )
        .build()
        .unwrap()
}

pub fn clip(owner: Uuid, vector: [f32; 3]) -> Descriptor {
    Descriptor::vector(Uuid::new_v4(), Some(owner), Value::FloatVector(vector.to_vec())).unwrap()
}

pub fn caption(owner: Uuid, text: &str) -> Descriptor {
    Descriptor::scalar(Uuid::new_v4(), Some(owner), Value::String(text.into())).unwrap()
}

pub fn label(schema: &Schema, owner: Uuid, name: &str, confidence: f32) -> Descriptor {
    let layout = schema.field(LABEL).unwrap().layout().unwrap();
    let values = vec![Some(Value::String(name.into())), Some(Value::Float(confidence))];
    Descriptor::Struct(StructDescriptor::from_ordered(Uuid::new_v4(), Some(owner), "label", layout, values).unwrap())
}

/// Adds `n` segments and returns their ids.
pub fn segments(connection: &dyn Connection, n: usize) -> Vec<Uuid> {
    let items: Vec<Retrievable> = (0..n).map(|_| Retrievable::new(Uuid::new_v4(), "segment")).collect();
    assert!(connection.retrievable_writer().add_all(&items).unwrap());
    items.into_iter().map(|r| r.id).collect()
}

fn collect<T>(stream: mediastore::ResultStream<T>) -> Vec<T> {
    stream.collect::<Result<Vec<_>, _>>().unwrap()
}

pub fn initialize_is_idempotent(connection: &dyn Connection, schema: &Schema) {
    connection.initialize(schema).unwrap();
    connection.initialize(schema).unwrap();
    assert!(connection.retrievable_initializer().is_initialized().unwrap());
    for field in schema.fields() {
        assert!(connection.descriptor_initializer(field).unwrap().is_initialized().unwrap());
    }
}

pub fn proximity_orders_by_distance(connection: &dyn Connection, schema: &Schema) {
    connection.initialize(schema).unwrap();
    let owners = segments(connection, 3);
    let field = schema.field(CLIP).unwrap();
    let writer = connection.descriptor_writer(field).unwrap();
    let near = clip(owners[0], [1.0, 0.0, 0.0]);
    let middle = clip(owners[1], [1.0, 1.0, 0.0]);
    let far = clip(owners[2], [0.0, 1.0, 0.0]);
    assert!(writer.add_all(&[far.clone(), near.clone(), middle.clone()]).unwrap());

    let reader = connection.descriptor_reader(field).unwrap();
    let query = ProximityQuery::new(Value::FloatVector(vec![1.0, 0.0, 0.0]), Distance::Euclidean, 3);
    let found = collect(reader.query(&Query::from(query.clone())).unwrap());
    let ids: Vec<Uuid> = found.iter().map(Descriptor::id).collect();
    assert_eq!(ids, vec![near.id(), middle.id(), far.id()]);

    let joined = collect(reader.query_and_join(&Query::from(query.clone())).unwrap());
    let distances: Vec<f64> = joined.iter().map(|r| r.distance().unwrap()).collect();
    for (found, expected) in distances.iter().zip([0.0, 1.0, 2f64.sqrt()]) {
        assert!((found - expected).abs() < 1e-5, "distance {found} != {expected}");
    }

    let farthest = collect(reader.query(&Query::from(query.order(SortOrder::Desc))).unwrap());
    assert_eq!(farthest.first().map(Descriptor::id), Some(far.id()));

    let two = ProximityQuery::new(Value::FloatVector(vec![1.0, 0.0, 0.0]), Distance::Euclidean, 2);
    assert_eq!(collect(reader.query(&Query::from(two)).unwrap()).len(), 2);
}

/// Unit axes and the origin, queried from the x axis.
pub fn proximity_matches_worked_example(connection: &dyn Connection, schema: &Schema) {
    connection.initialize(schema).unwrap();
    let owners = segments(connection, 3);
    let field = schema.field(CLIP).unwrap();
    let stored = vec![
        clip(owners[0], [1.0, 0.0, 0.0]),
        clip(owners[1], [0.0, 1.0, 0.0]),
        clip(owners[2], [0.0, 0.0, 0.0]),
    ];
    assert!(connection.descriptor_writer(field).unwrap().add_all(&stored).unwrap());

    let reader = connection.descriptor_reader(field).unwrap();
    let query = ProximityQuery::new(Value::FloatVector(vec![1.0, 0.0, 0.0]), Distance::Euclidean, 3);
    let joined = collect(reader.query_and_join(&Query::from(query)).unwrap());
    let ids: Vec<Uuid> = joined.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![owners[0], owners[2], owners[1]]);
    for (found, expected) in joined.iter().zip([0.0, 1.0, 2f64.sqrt()]) {
        let distance = found.distance().unwrap();
        assert!((distance - expected).abs() < 1e-5, "distance {distance} != {expected}");
    }
}

pub fn proximity_rejects_mismatched_queries(connection: &dyn Connection, schema: &Schema) {
    connection.initialize(schema).unwrap();
    let reader = connection.descriptor_reader(schema.field(CLIP).unwrap()).unwrap();
    let wrong_length = ProximityQuery::new(Value::FloatVector(vec![1.0, 0.0]), Distance::Euclidean, 1);
    assert!(matches!(reader.query(&Query::from(wrong_length)), Err(Error::TypeMismatch { .. })));
    let jaccard = ProximityQuery::new(Value::FloatVector(vec![1.0, 0.0, 0.0]), Distance::Jaccard, 1);
    assert!(matches!(reader.query(&Query::from(jaccard)), Err(Error::Unsupported(_))));
}

pub fn join_resolves_owners(connection: &dyn Connection, schema: &Schema) {
    connection.initialize(schema).unwrap();
    let owners = segments(connection, 3);
    let field = schema.field(CLIP).unwrap();
    let writer = connection.descriptor_writer(field).unwrap();
    let mut rng = rand::thread_rng();
    let descriptors: Vec<Descriptor> = owners
        .iter()
        .map(|owner| clip(*owner, [rng.gen(), rng.gen(), rng.gen()]))
        .collect();
    assert!(writer.add_all(&descriptors).unwrap());

    let reader = connection.descriptor_reader(field).unwrap();
    let query = ProximityQuery::new(Value::FloatVector(vec![0.5, 0.5, 0.5]), Distance::Cosine, 10);
    let joined = collect(reader.query_and_join(&Query::from(query.clone())).unwrap());
    assert_eq!(joined.len(), 3);
    for retrievable in &joined {
        assert!(owners.contains(&retrievable.id));
        assert_eq!(retrievable.retrievable_type, "segment");
        assert!(retrievable.descriptors.is_empty());
        assert!(retrievable.distance().is_some());
    }

    let with_vectors = collect(reader.query_and_join(&Query::from(query.clone().fetch_vector(true))).unwrap());
    assert!(with_vectors.iter().all(|r| r.descriptors.len() == 1));

    assert!(connection.retrievable_writer().delete(owners[0]).unwrap());
    let remaining = collect(reader.query_and_join(&Query::from(query)).unwrap());
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|r| r.id != owners[0]));
}

pub fn ownerless_descriptors_are_rejected(connection: &dyn Connection, schema: &Schema) {
    connection.initialize(schema).unwrap();
    let field = schema.field(CLIP).unwrap();
    let writer = connection.descriptor_writer(field).unwrap();
    let transient = Descriptor::vector(Uuid::new_v4(), None, Value::FloatVector(vec![0.0; 3])).unwrap();
    assert!(matches!(writer.add(&transient), Err(Error::OwnerlessDescriptor(_))));
    assert!(matches!(writer.update(&transient), Err(Error::OwnerlessDescriptor(_))));
    assert_eq!(connection.descriptor_reader(field).unwrap().count().unwrap(), 0);
}

pub fn batches_are_all_or_nothing(connection: &dyn Connection, schema: &Schema) {
    connection.initialize(schema).unwrap();
    let owners = segments(connection, 2);
    let field = schema.field(CLIP).unwrap();
    let writer = connection.descriptor_writer(field).unwrap();
    let good = clip(owners[0], [0.0, 0.0, 1.0]);
    let bad = Descriptor::vector(Uuid::new_v4(), Some(owners[1]), Value::FloatVector(vec![1.0; 4])).unwrap();
    assert!(writer.add_all(&[good, bad]).is_err());
    let reader = connection.descriptor_reader(field).unwrap();
    assert_eq!(reader.count().unwrap(), 0);
    assert!(writer.add_all(&[]).unwrap());

    let kept = clip(owners[0], [0.0, 1.0, 0.0]);
    assert!(writer.add(&kept).unwrap());
    let fresh = clip(owners[1], [1.0, 0.0, 0.0]);
    let clash = Descriptor::vector(kept.id(), Some(owners[1]), Value::FloatVector(vec![0.5; 3])).unwrap();
    assert!(!writer.add_all(&[fresh.clone(), clash]).unwrap());
    assert_eq!(reader.count().unwrap(), 1);
    assert_eq!(reader.get(fresh.id()).unwrap(), None);
    assert_eq!(reader.get(kept.id()).unwrap(), Some(kept));
}

pub fn boolean_and_fulltext_queries(connection: &dyn Connection, schema: &Schema) {
    connection.initialize(schema).unwrap();
    let owners = segments(connection, 3);
    let captions = schema.field(CAPTION).unwrap();
    let texts = ["red sunset over the sea", "blue sky", "sunset boulevard"];
    let items: Vec<Descriptor> = owners.iter().zip(texts).map(|(o, t)| caption(*o, t)).collect();
    assert!(connection.descriptor_writer(captions).unwrap().add_all(&items).unwrap());
    let reader = connection.descriptor_reader(captions).unwrap();

    let equal = SimpleBooleanQuery::new(None, Comparison::Equal, Value::String("blue sky".into()));
    let found = collect(reader.query(&Query::from(equal)).unwrap());
    assert_eq!(found.iter().map(Descriptor::id).collect::<Vec<_>>(), vec![items[1].id()]);

    let like = SimpleBooleanQuery::new(None, Comparison::Like, Value::String("%sunset%".into()));
    assert_eq!(collect(reader.query(&Query::from(like)).unwrap()).len(), 2);

    let within = SimpleBooleanQuery::within(
        None,
        vec![Value::String("blue sky".into()), Value::String("sunset boulevard".into())],
    );
    assert_eq!(collect(reader.query(&Query::from(within.limit(1))).unwrap()).len(), 1);

    let text = SimpleFulltextQuery::new(None, "Sunset!");
    let joined = collect(reader.query_and_join(&Query::from(text)).unwrap());
    let mut matched: Vec<Uuid> = joined.iter().map(|r| r.id).collect();
    matched.sort();
    let mut expected = vec![owners[0], owners[2]];
    expected.sort();
    assert_eq!(matched, expected);
    assert!(joined.iter().all(|r| r.score().is_some()));

    let blank = SimpleFulltextQuery::new(None, " ... ");
    assert!(collect(reader.query(&Query::from(blank)).unwrap()).is_empty());

    let labels = schema.field(LABEL).unwrap();
    let tagged = vec![
        label(schema, owners[0], "cat", 0.9),
        label(schema, owners[1], "cat", 0.2),
        label(schema, owners[2], "dog", 0.95),
    ];
    assert!(connection.descriptor_writer(labels).unwrap().add_all(&tagged).unwrap());
    let compound = CompoundBooleanQuery {
        clauses: vec![
            SimpleBooleanQuery::new(Some("label"), Comparison::Equal, Value::String("cat".into())),
            SimpleBooleanQuery::new(Some("confidence"), Comparison::Greater, Value::Float(0.5)),
        ],
        limit: None,
    };
    let confident = collect(connection.descriptor_reader(labels).unwrap().query(&Query::from(compound)).unwrap());
    assert_eq!(confident.len(), 1);
    assert_eq!(confident[0], tagged[0]);
}

pub fn update_and_delete(connection: &dyn Connection, schema: &Schema) {
    connection.initialize(schema).unwrap();
    let owners = segments(connection, 1);
    let field = schema.field(CLIP).unwrap();
    let writer = connection.descriptor_writer(field).unwrap();
    let reader = connection.descriptor_reader(field).unwrap();
    let original = clip(owners[0], [0.0, 0.0, 0.0]);
    assert!(writer.add(&original).unwrap());
    assert!(reader.exists(original.id()).unwrap());

    let moved = Descriptor::vector(original.id(), Some(owners[0]), Value::FloatVector(vec![0.5, 0.25, 1.0])).unwrap();
    assert!(writer.update(&moved).unwrap());
    assert_eq!(reader.get(original.id()).unwrap(), Some(moved.clone()));
    assert_eq!(collect(reader.get_for_retrievable(owners[0]).unwrap()), vec![moved.clone()]);

    assert!(writer.delete(&moved).unwrap());
    assert!(!writer.delete(&moved).unwrap());
    assert!(!writer.delete_all(&[]).unwrap());
    assert_eq!(reader.get(original.id()).unwrap(), None);
    assert!(collect(reader.get_all().unwrap()).is_empty());
}

pub fn retrievable_graph(connection: &dyn Connection, schema: &Schema) {
    connection.initialize(schema).unwrap();
    let ids = segments(connection, 3);
    let writer = connection.retrievable_writer();
    let reader = connection.retrievable_reader();
    let (a, b, c) = (ids[0], ids[1], ids[2]);

    let edges = vec![
        Relationship::new(a, "partOf", b),
        Relationship::new(c, "partOf", b),
        Relationship::new(a, "next", c),
    ];
    assert!(writer.connect_all(&edges).unwrap());
    let part_of = collect(reader.get_connections(&[], &["partOf".to_string()], &[]).unwrap());
    assert_eq!(part_of.len(), 2);
    let from_a = collect(reader.get_connections(&[a], &[], &[]).unwrap());
    assert_eq!(from_a.len(), 2);
    assert_eq!(collect(reader.get_connections(&[], &[], &[]).unwrap()).len(), 3);

    assert!(writer.disconnect(&edges[2]).unwrap());
    assert!(!writer.disconnect(&edges[2]).unwrap());

    assert!(writer.update(&Retrievable::new(a, "shot")).unwrap());
    assert_eq!(reader.get(a).unwrap().map(|r| r.retrievable_type), Some("shot".to_string()));

    assert!(writer.delete(b).unwrap());
    assert!(!reader.exists(b).unwrap());
    assert!(collect(reader.get_connections(&[], &[], &[b]).unwrap()).is_empty());
    assert_eq!(reader.count().unwrap(), 2);

    let mut all: Vec<Uuid> = collect(reader.get_all().unwrap()).into_iter().map(|r| r.id).collect();
    all.sort();
    let mut expected = vec![a, c];
    expected.sort();
    assert_eq!(all, expected);
    assert_eq!(collect(reader.get_all_by_ids(&[a, b]).unwrap()).len(), 1);
}

pub fn nearest_match_then_delete(connection: &dyn Connection, schema: &Schema) {
    let wide = Schema::builder(schema.name())
        .field_with("embedding", VectorAnalyser::float(), Parameters::new().with(LENGTH_PARAMETER, 4), vec![])
        .build()
        .unwrap();
    connection.initialize(&wide).unwrap();
    let field = wide.field("embedding").unwrap();
    let owners = segments(connection, 5);
    let stored: Vec<Descriptor> = owners
        .iter()
        .enumerate()
        .map(|(i, owner)| {
            let mut vector = vec![0.0; 4];
            vector[i % 4] = 1.0 + i as f32;
            Descriptor::vector(Uuid::new_v4(), Some(*owner), Value::FloatVector(vector)).unwrap()
        })
        .collect();
    assert!(connection.descriptor_writer(field).unwrap().add_all(&stored).unwrap());
    let reader = connection.descriptor_reader(field).unwrap();
    assert_eq!(reader.count().unwrap(), 5);

    let target = match stored[2].value("vector") {
        Some(value) => value.clone(),
        None => panic!("vector attribute missing"),
    };
    let query = Query::from(ProximityQuery::new(target, Distance::Euclidean, 2));
    let joined = collect(reader.query_and_join(&query).unwrap());
    assert_eq!(joined.len(), 2);
    assert_eq!(joined[0].id, owners[2]);
    assert!(joined[0].distance().unwrap().abs() < 1e-6);

    assert!(connection.descriptor_writer(field).unwrap().delete(&stored[2]).unwrap());
    assert_eq!(reader.get(stored[2].id()).unwrap(), None);
    assert_eq!(reader.count().unwrap(), 4);
}

fn scalar_field(kind: &DescriptorKind) -> String {
    format!("scalar_{kind:?}").to_lowercase()
}

/// Writes one descriptor per value kind, at the edges of each range, and reads
/// every one back unchanged. Values no backend can hold must not construct.
pub fn round_trips_every_value_kind(connection: &dyn Connection, schema: &Schema) {
    let scalars = vec![
        (DescriptorKind::Boolean, Value::Boolean(true)),
        (DescriptorKind::Byte, Value::Byte(i8::MIN)),
        (DescriptorKind::Short, Value::Short(i16::MAX)),
        (DescriptorKind::Int, Value::Int(i32::MIN)),
        (DescriptorKind::Long, Value::Long(i64::MAX)),
        (DescriptorKind::Float, Value::Float(f32::MAX)),
        (DescriptorKind::Double, Value::Double(f64::MIN)),
        (DescriptorKind::String, Value::String("naïve 東京 🎞".into())),
        (DescriptorKind::Text, Value::Text("say \"cut\"\n\ttake two ✓".into())),
    ];
    let vectors = vec![
        ("bits_empty", DescriptorKind::BooleanVector, 0, Value::BooleanVector(vec![])),
        ("bits_single", DescriptorKind::BooleanVector, 1, Value::BooleanVector(vec![true])),
        ("floats_empty", DescriptorKind::FloatVector, 0, Value::FloatVector(vec![])),
        ("floats_single", DescriptorKind::FloatVector, 1, Value::FloatVector(vec![0.1])),
        ("ints", DescriptorKind::IntVector, 3, Value::IntVector(vec![i32::MIN, 0, i32::MAX])),
        ("longs", DescriptorKind::LongVector, 2, Value::LongVector(vec![i64::MIN, i64::MAX])),
        ("doubles", DescriptorKind::DoubleVector, 2, Value::DoubleVector(vec![f64::MAX, -1e-300])),
    ];
    let stamp_layout = vec![
        Attribute::new("recorded_at", Type::DateTime, false),
        Attribute::new("source", Type::Uuid, false),
        Attribute::new("note", Type::String, true),
    ];

    let mut builder = Schema::builder(schema.name());
    for (kind, _) in &scalars {
        builder = builder.field(scalar_field(kind), ScalarAnalyser::new(kind.clone()).unwrap());
    }
    for (name, kind, length, _) in &vectors {
        let length = Parameters::new().with(LENGTH_PARAMETER, length);
        builder = builder.field_with(*name, VectorAnalyser::new(kind.clone()).unwrap(), length, vec![]);
    }
    let everything = builder.field(STAMP, StructAnalyser::new(STAMP, stamp_layout.clone())).build().unwrap();
    connection.initialize(&everything).unwrap();
    let owner = segments(connection, 1)[0];

    let mut written = Vec::new();
    for (kind, value) in scalars {
        let descriptor = Descriptor::scalar(Uuid::new_v4(), Some(owner), value).unwrap();
        written.push((scalar_field(&kind), descriptor));
    }
    for (name, _, _, value) in vectors {
        written.push((name.to_string(), Descriptor::vector(Uuid::new_v4(), Some(owner), value).unwrap()));
    }
    let recorded_at = Utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap();
    let stamp = StructDescriptor::from_ordered(
        Uuid::new_v4(),
        Some(owner),
        STAMP,
        stamp_layout.clone(),
        vec![Some(Value::DateTime(recorded_at)), Some(Value::Uuid(Uuid::new_v4())), None],
    )
    .unwrap();
    written.push((STAMP.to_string(), Descriptor::Struct(stamp)));

    for (name, descriptor) in &written {
        let field = everything.field(name).unwrap();
        assert!(connection.descriptor_writer(field).unwrap().add(descriptor).unwrap(), "{name}");
        let read = connection.descriptor_reader(field).unwrap().get(descriptor.id()).unwrap();
        assert_eq!(read.as_ref(), Some(descriptor), "{name}");
    }

    let nanos = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
    let values = vec![Some(Value::DateTime(nanos)), Some(Value::Uuid(Uuid::new_v4())), None];
    let precise = StructDescriptor::from_ordered(Uuid::new_v4(), Some(owner), STAMP, stamp_layout, values);
    assert!(matches!(precise, Err(Error::TypeMismatch { .. })));
    let nan = Descriptor::vector(Uuid::new_v4(), Some(owner), Value::FloatVector(vec![f32::NAN]));
    assert!(matches!(nan, Err(Error::TypeMismatch { .. })));
    let infinite = Descriptor::scalar(Uuid::new_v4(), Some(owner), Value::Double(f64::INFINITY));
    assert!(matches!(infinite, Err(Error::TypeMismatch { .. })));
    for name in [STAMP, "floats_single", "scalar_double"] {
        let reader = connection.descriptor_reader(everything.field(name).unwrap()).unwrap();
        assert_eq!(reader.count().unwrap(), 1, "{name}");
    }
}

/// Initialize, write, read back, truncate, deinitialize.
pub fn lifecycle(connection: &dyn Connection, schema: &Schema) {
    connection.initialize(schema).unwrap();
    let owners = segments(connection, 2);
    let field = schema.field(CAPTION).unwrap();
    let writer = connection.descriptor_writer(field).unwrap();
    assert!(writer.add_all(&[caption(owners[0], "first"), caption(owners[1], "second")]).unwrap());
    let reader = connection.descriptor_reader(field).unwrap();
    assert_eq!(reader.count().unwrap(), 2);

    let by_owner: HashMap<Uuid, Descriptor> = collect(reader.get_all().unwrap())
        .into_iter()
        .map(|d| (d.retrievable_id().unwrap(), d))
        .collect();
    assert_eq!(by_owner[&owners[1]].value("value"), Some(&Value::String("second".into())));

    connection.truncate(schema).unwrap();
    assert_eq!(reader.count().unwrap(), 0);
    assert_eq!(connection.retrievable_reader().count().unwrap(), 0);
    assert!(connection.retrievable_initializer().is_initialized().unwrap());

    connection.deinitialize(schema).unwrap();
    assert!(!connection.retrievable_initializer().is_initialized().unwrap());
    assert!(!connection.descriptor_initializer(field).unwrap().is_initialized().unwrap());
}

pub fn foreign_schema_is_rejected(connection: &dyn Connection) {
    let other = schema("elsewhere");
    assert!(matches!(connection.initialize(&other), Err(Error::SchemaMismatch { .. })));
}

/// Runs every check against a fresh connection from `open`.
pub fn conformance(open: impl Fn() -> (Arc<dyn Connection>, Schema)) {
    let checks: [(&str, fn(&dyn Connection, &Schema)); 12] = [
        ("initialize_is_idempotent", initialize_is_idempotent),
        ("proximity_orders_by_distance", proximity_orders_by_distance),
        ("proximity_matches_worked_example", proximity_matches_worked_example),
        ("proximity_rejects_mismatched_queries", proximity_rejects_mismatched_queries),
        ("join_resolves_owners", join_resolves_owners),
        ("ownerless_descriptors_are_rejected", ownerless_descriptors_are_rejected),
        ("batches_are_all_or_nothing", batches_are_all_or_nothing),
        ("boolean_and_fulltext_queries", boolean_and_fulltext_queries),
        ("update_and_delete", update_and_delete),
        ("retrievable_graph", retrievable_graph),
        ("nearest_match_then_delete", nearest_match_then_delete),
        ("round_trips_every_value_kind", round_trips_every_value_kind),
    ];
    for (name, check) in checks {
        let (connection, schema) = open();
        eprintln!("conformance: {name} on {}", connection.description());
        check(connection.as_ref(), &schema);
    }
    let (connection, schema) = open();
    lifecycle(connection.as_ref(), &schema);
    foreign_schema_is_rejected(connection.as_ref());
}
