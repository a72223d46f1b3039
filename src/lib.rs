//! Descriptor persistence and query layer for multimedia retrieval.
//!
//! Extracted features (descriptors) are written into per-field structures of a
//! schema, attached to retrievables, and queried by similarity, by predicate or
//! by text. Three backends implement the same [`database::Connection`] contract:
//! PostgreSQL with `pgvector`, an embedded vector engine reachable in-process or
//! over TCP, and a flat JSON-lines store.

pub mod database;
pub mod descriptor;
pub mod error;
pub mod index;
pub mod jsonl;
pub mod manager;
pub mod parameters;
pub mod pgvector;
pub mod query;
pub mod retrievable;
pub mod schema;
pub mod value;
pub mod vector;
pub mod vectordb;

pub use database::{Connection, ConnectionProvider, ResultStream};
pub use descriptor::{Attribute, Descriptor, DescriptorKind};
pub use error::{Error, ErrorCategory, Result};
pub use parameters::Parameters;
pub use query::Query;
pub use retrievable::{Relationship, Retrievable};
pub use schema::{Field, Schema};
pub use value::{DescriptorId, RetrievableId, Type, Value};
pub use vector::Distance;
