//! Connection abstraction shared by all backends.
//!
//! A [`ConnectionProvider`] opens a [`Connection`] for one schema. The connection
//! hands out cached per-field readers, writers and initializers, built by the
//! [`DescriptorProvider`] registered for the field's descriptor kind.

pub mod cache;
pub mod base;
pub mod join;
pub mod registry;

use std::sync::Arc;

use crate::descriptor::{Descriptor, DescriptorKind};
use crate::error::{Error, Result};
use crate::parameters::Parameters;
use crate::query::Query;
use crate::retrievable::{Relationship, Retrievable};
use crate::schema::{Field, Schema};
use crate::value::{DescriptorId, RetrievableId};

pub use base::ConnectionCore;
pub use cache::FieldCache;
pub use registry::{DescriptorProvider, ProviderRegistry, Registration, RegistryBuilder};

/// A lazy, finite, non-restartable sequence of results.
pub type ResultStream<T> = Box<dyn Iterator<Item = Result<T>> + Send>;

pub(crate) fn stream<T: Send + 'static>(items: Vec<T>) -> ResultStream<T> {
    Box::new(items.into_iter().map(Ok))
}

pub(crate) fn empty<T: Send + 'static>() -> ResultStream<T> {
    Box::new(std::iter::empty())
}

/// Implemented by everything a connection caches per field.
pub trait FieldBound {
    fn field(&self) -> &Arc<Field>;
}

pub trait DescriptorInitializer: FieldBound + Send + Sync {
    /// Creates the physical structure. Existing structures are left alone.
    fn initialize(&self) -> Result<()>;

    fn deinitialize(&self) -> Result<()>;

    fn is_initialized(&self) -> Result<bool>;

    /// Removes all rows but keeps the structure.
    fn truncate(&self) -> Result<()>;
}

pub trait DescriptorWriter: FieldBound + Send + Sync {
    fn add(&self, item: &Descriptor) -> Result<bool>;

    /// Inserts all items with one statement; either all become visible or none do.
    fn add_all(&self, items: &[Descriptor]) -> Result<bool>;

    fn update(&self, item: &Descriptor) -> Result<bool>;

    /// Returns `false` when no descriptor with the item's id exists.
    fn delete(&self, item: &Descriptor) -> Result<bool>;

    fn delete_all(&self, items: &[Descriptor]) -> Result<bool>;
}

pub trait DescriptorReader: FieldBound + Send + Sync {
    fn get(&self, id: DescriptorId) -> Result<Option<Descriptor>>;

    fn exists(&self, id: DescriptorId) -> Result<bool> {
        Ok(self.get(id)?.is_some())
    }

    fn get_all_by_ids(&self, ids: &[DescriptorId]) -> Result<ResultStream<Descriptor>>;

    fn get_for_retrievable(&self, retrievable_id: RetrievableId) -> Result<ResultStream<Descriptor>> {
        self.get_all_for_retrievables(&[retrievable_id])
    }

    fn get_all_for_retrievables(&self, retrievable_ids: &[RetrievableId]) -> Result<ResultStream<Descriptor>>;

    fn get_all(&self) -> Result<ResultStream<Descriptor>>;

    fn count(&self) -> Result<u64>;

    fn query(&self, query: &Query) -> Result<ResultStream<Descriptor>>;

    /// Runs `query` and resolves each hit's owner; hits whose owner is gone are dropped.
    fn query_and_join(&self, query: &Query) -> Result<ResultStream<Retrievable>>;
}

pub trait RetrievableInitializer: Send + Sync {
    fn initialize(&self) -> Result<()>;

    fn deinitialize(&self) -> Result<()>;

    fn is_initialized(&self) -> Result<bool>;

    fn truncate(&self) -> Result<()>;
}

pub trait RetrievableWriter: Send + Sync {
    fn add(&self, item: &Retrievable) -> Result<bool>;

    fn add_all(&self, items: &[Retrievable]) -> Result<bool>;

    /// Updates the type tag.
    fn update(&self, item: &Retrievable) -> Result<bool>;

    /// Deletes the retrievable and every relationship it takes part in.
    fn delete(&self, id: RetrievableId) -> Result<bool>;

    fn delete_all(&self, ids: &[RetrievableId]) -> Result<bool>;

    fn connect(&self, relationship: &Relationship) -> Result<bool>;

    fn connect_all(&self, relationships: &[Relationship]) -> Result<bool>;

    fn disconnect(&self, relationship: &Relationship) -> Result<bool>;

    fn disconnect_all(&self, relationships: &[Relationship]) -> Result<bool>;
}

pub trait RetrievableReader: Send + Sync {
    fn get(&self, id: RetrievableId) -> Result<Option<Retrievable>>;

    fn exists(&self, id: RetrievableId) -> Result<bool> {
        Ok(self.get(id)?.is_some())
    }

    fn get_all_by_ids(&self, ids: &[RetrievableId]) -> Result<ResultStream<Retrievable>>;

    fn get_all(&self) -> Result<ResultStream<Retrievable>>;

    fn count(&self) -> Result<u64>;

    /// Relationships matching all non-empty filters.
    fn get_connections(
        &self,
        subjects: &[RetrievableId],
        predicates: &[String],
        objects: &[RetrievableId],
    ) -> Result<ResultStream<Relationship>>;
}

/// An open transaction. Dropping it without committing rolls it back.
pub trait Transaction {
    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}

/// Stand-in for backends without native transactions: statements apply immediately.
pub struct Unsupported {
    backend: &'static str,
}

impl Unsupported {
    pub fn begin(backend: &'static str) -> Box<dyn Transaction> {
        tracing::warn!(backend, "transactions are not supported, statements are applied immediately");
        Box::new(Unsupported { backend })
    }
}

impl Transaction for Unsupported {
    fn commit(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        tracing::warn!(backend = self.backend, "rollback requested but effects were already applied");
        Ok(())
    }
}

pub trait Connection: Send + Sync {
    fn database_name(&self) -> &'static str;

    fn schema_name(&self) -> &str;

    /// Backend and target, for logs.
    fn description(&self) -> String;

    fn descriptor_initializer(&self, field: &Arc<Field>) -> Result<Arc<dyn DescriptorInitializer>>;

    fn descriptor_reader(&self, field: &Arc<Field>) -> Result<Arc<dyn DescriptorReader>>;

    fn descriptor_writer(&self, field: &Arc<Field>) -> Result<Arc<dyn DescriptorWriter>>;

    fn retrievable_initializer(&self) -> Arc<dyn RetrievableInitializer>;

    fn retrievable_reader(&self) -> Arc<dyn RetrievableReader>;

    fn retrievable_writer(&self) -> Arc<dyn RetrievableWriter>;

    fn begin(&self) -> Result<Box<dyn Transaction + '_>>;
}

impl<'c> dyn Connection + 'c {
    fn check_schema(&self, schema: &Schema) -> Result<()> {
        if schema.name() != self.schema_name() {
            return Err(Error::SchemaMismatch {
                requested: schema.name().to_string(),
                connected: self.schema_name().to_string(),
            });
        }
        Ok(())
    }

    /// Creates the retrievable structures and one structure per field.
    pub fn initialize(&self, schema: &Schema) -> Result<()> {
        self.check_schema(schema)?;
        self.retrievable_initializer().initialize()?;
        for field in schema.fields() {
            self.descriptor_initializer(field)?.initialize()?;
        }
        Ok(())
    }

    pub fn deinitialize(&self, schema: &Schema) -> Result<()> {
        self.check_schema(schema)?;
        for field in schema.fields() {
            self.descriptor_initializer(field)?.deinitialize()?;
        }
        self.retrievable_initializer().deinitialize()
    }

    pub fn truncate(&self, schema: &Schema) -> Result<()> {
        self.check_schema(schema)?;
        for field in schema.fields() {
            self.descriptor_initializer(field)?.truncate()?;
        }
        self.retrievable_initializer().truncate()
    }

    /// Runs `action` inside a transaction, committing on `Ok` and rolling back on `Err`.
    pub fn with_transaction<T>(&self, action: impl FnOnce(&dyn Connection) -> Result<T>) -> Result<T> {
        let transaction = self.begin()?;
        match action(self) {
            Ok(value) => {
                transaction.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = transaction.rollback() {
                    tracing::error!(connection = %self.description(), error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

pub trait ConnectionProvider: Send + Sync {
    fn database_name(&self) -> &'static str;

    fn version(&self) -> &'static str;

    /// Whether a descriptor provider is registered for `kind`.
    fn supports(&self, kind: &DescriptorKind) -> bool;

    fn open(&self, schema_name: &str, parameters: &Parameters) -> Result<Arc<dyn Connection>>;
}

/// Preconditions shared by every writer: owned, and shaped like the field's prototype.
pub(crate) fn check_writable(prototype: &Descriptor, item: &Descriptor) -> Result<()> {
    if item.is_transient() {
        return Err(Error::OwnerlessDescriptor(item.id()));
    }
    item.conforms_to(prototype)
}

pub(crate) fn check_batch(prototype: &Descriptor, items: &[Descriptor]) -> Result<()> {
    items.iter().try_for_each(|item| check_writable(prototype, item))
}
