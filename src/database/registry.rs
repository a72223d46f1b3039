use std::collections::HashMap;
use std::sync::Arc;

use crate::database::{DescriptorInitializer, DescriptorReader, DescriptorWriter};
use crate::descriptor::{builder_for, DescriptorBuilder, DescriptorKind};
use crate::error::{Error, Result};
use crate::schema::Field;

/// Factory triad for one descriptor kind on one backend. `C` is the backend's
/// shared connection state.
pub trait DescriptorProvider<C: ?Sized>: Send + Sync {
    fn new_initializer(&self, context: &Arc<C>, field: &Arc<Field>) -> Result<Arc<dyn DescriptorInitializer>>;

    fn new_reader(
        &self,
        context: &Arc<C>,
        field: &Arc<Field>,
        builder: DescriptorBuilder,
    ) -> Result<Arc<dyn DescriptorReader>>;

    fn new_writer(&self, context: &Arc<C>, field: &Arc<Field>) -> Result<Arc<dyn DescriptorWriter>>;
}

pub struct Registration<C: ?Sized> {
    pub provider: Arc<dyn DescriptorProvider<C>>,
    pub builder: DescriptorBuilder,
}

impl<C: ?Sized> Clone for Registration<C> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            builder: self.builder,
        }
    }
}

/// The descriptor kinds a backend supports. Fixed once built.
pub struct ProviderRegistry<C: ?Sized> {
    entries: HashMap<DescriptorKind, Registration<C>>,
}

impl<C: ?Sized> ProviderRegistry<C> {
    pub fn builder() -> RegistryBuilder<C> {
        RegistryBuilder {
            entries: HashMap::new(),
        }
    }

    pub fn lookup(&self, kind: &DescriptorKind) -> Result<&Registration<C>> {
        self.entries
            .get(kind)
            .ok_or_else(|| Error::UnknownDescriptorKind(kind.to_string()))
    }

    pub fn supports(&self, kind: &DescriptorKind) -> bool {
        self.entries.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &DescriptorKind> {
        self.entries.keys()
    }
}

pub struct RegistryBuilder<C: ?Sized> {
    entries: HashMap<DescriptorKind, Registration<C>>,
}

impl<C: ?Sized> RegistryBuilder<C> {
    /// Registers `provider` for `kind` with the builder matching the kind's shape.
    pub fn register(self, kind: DescriptorKind, provider: Arc<dyn DescriptorProvider<C>>) -> Self {
        let builder = builder_for(&kind);
        self.register_with_builder(kind, provider, builder)
    }

    pub fn register_with_builder(
        mut self,
        kind: DescriptorKind,
        provider: Arc<dyn DescriptorProvider<C>>,
        builder: DescriptorBuilder,
    ) -> Self {
        self.entries.insert(kind, Registration { provider, builder });
        self
    }

    pub fn register_all(
        mut self,
        kinds: impl IntoIterator<Item = DescriptorKind>,
        provider: Arc<dyn DescriptorProvider<C>>,
    ) -> Self {
        for kind in kinds {
            self = self.register(kind, provider.clone());
        }
        self
    }

    pub fn build(self) -> ProviderRegistry<C> {
        ProviderRegistry { entries: self.entries }
    }
}

/// Struct kinds with stock analysers, registered by default on every backend.
pub fn stock_struct_kinds() -> Vec<DescriptorKind> {
    ["label", "file_source", "temporal", "media_dimensions"]
        .into_iter()
        .map(|name| DescriptorKind::Struct(name.to_string()))
        .collect()
}

/// Every scalar and vector kind plus the stock struct kinds.
pub fn default_kinds() -> Vec<DescriptorKind> {
    DescriptorKind::SCALARS
        .into_iter()
        .chain(DescriptorKind::VECTORS)
        .chain(stock_struct_kinds())
        .collect()
}
