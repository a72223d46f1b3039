use std::sync::Arc;

use crate::database::{
    DescriptorInitializer, DescriptorReader, DescriptorWriter, FieldCache, ProviderRegistry,
};
use crate::error::Result;
use crate::schema::Field;

/// Registry lookup plus the three per-field caches every connection carries.
pub struct ConnectionCore<C: ?Sized> {
    context: Arc<C>,
    registry: Arc<ProviderRegistry<C>>,
    initializers: FieldCache<dyn DescriptorInitializer>,
    readers: FieldCache<dyn DescriptorReader>,
    writers: FieldCache<dyn DescriptorWriter>,
}

impl<C: ?Sized> ConnectionCore<C> {
    pub fn new(context: Arc<C>, registry: Arc<ProviderRegistry<C>>) -> Self {
        Self {
            context,
            registry,
            initializers: FieldCache::new(),
            readers: FieldCache::new(),
            writers: FieldCache::new(),
        }
    }

    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    pub fn initializer(&self, field: &Arc<Field>) -> Result<Arc<dyn DescriptorInitializer>> {
        self.initializers.get_or_try_insert(field, || {
            let registration = self.registry.lookup(&field.kind())?;
            registration.provider.new_initializer(&self.context, field)
        })
    }

    pub fn reader(&self, field: &Arc<Field>) -> Result<Arc<dyn DescriptorReader>> {
        self.readers.get_or_try_insert(field, || {
            let registration = self.registry.lookup(&field.kind())?;
            registration.provider.new_reader(&self.context, field, registration.builder)
        })
    }

    pub fn writer(&self, field: &Arc<Field>) -> Result<Arc<dyn DescriptorWriter>> {
        self.writers.get_or_try_insert(field, || {
            let registration = self.registry.lookup(&field.kind())?;
            registration.provider.new_writer(&self.context, field)
        })
    }
}
