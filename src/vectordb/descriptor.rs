use std::sync::Arc;

use tracing::debug;

use crate::database::join::{join_hits, keeps_descriptor, Hit};
use crate::database::{
    check_batch, check_writable, empty, stream, DescriptorInitializer, DescriptorProvider, DescriptorReader,
    DescriptorWriter, FieldBound, ResultStream,
};
use crate::descriptor::{Attribute, Descriptor, DescriptorBuilder};
use crate::error::{Error, Recover, Result};
use crate::query::{tokenize, validate_boolean, validate_compound, validate_fulltext, validate_proximity, Query};
use crate::retrievable::{Retrievable, RetrievedAttribute};
use crate::schema::{Field, IndexType};
use crate::value::{DescriptorId, RetrievableId};
use crate::vectordb::client::EngineClient;
use crate::vectordb::dql::{Dql, Knn, Predicate, ResultSet};
use crate::vectordb::entity::IndexDef;
use crate::vectordb::mapping::{
    boolean_predicate, descriptor_def, descriptor_entity, descriptor_row, index_kind, to_cell, uuid_cell, Rows,
    DESCRIPTOR_ID, RETRIEVABLE_ID,
};
use crate::vectordb::VectorDbStore;

/// One entity per field; every descriptor kind maps onto engine columns.
pub struct VectorDbDescriptorProvider;

impl DescriptorProvider<VectorDbStore> for VectorDbDescriptorProvider {
    fn new_initializer(
        &self,
        store: &Arc<VectorDbStore>,
        field: &Arc<Field>,
    ) -> Result<Arc<dyn DescriptorInitializer>> {
        Ok(Arc::new(VectorDbDescriptorInitializer {
            binding: Binding::new(store, field)?,
        }))
    }

    fn new_reader(
        &self,
        store: &Arc<VectorDbStore>,
        field: &Arc<Field>,
        builder: DescriptorBuilder,
    ) -> Result<Arc<dyn DescriptorReader>> {
        Ok(Arc::new(VectorDbDescriptorReader {
            binding: Binding::new(store, field)?,
            builder,
            store: store.clone(),
        }))
    }

    fn new_writer(&self, store: &Arc<VectorDbStore>, field: &Arc<Field>) -> Result<Arc<dyn DescriptorWriter>> {
        Ok(Arc::new(VectorDbDescriptorWriter {
            binding: Binding::new(store, field)?,
        }))
    }
}

struct Binding {
    field: Arc<Field>,
    entity: String,
    prototype: Descriptor,
    layout: Arc<[Attribute]>,
    client: EngineClient,
}

impl Binding {
    fn new(store: &VectorDbStore, field: &Arc<Field>) -> Result<Self> {
        let prototype = field.prototype()?;
        Ok(Self {
            field: field.clone(),
            entity: descriptor_entity(store.schema(), field.name()),
            layout: prototype.layout().into(),
            prototype,
            client: store.client().clone(),
        })
    }

    fn id_filter(&self, ids: impl IntoIterator<Item = DescriptorId>) -> Predicate {
        Predicate::one_of(DESCRIPTOR_ID, ids.into_iter().map(uuid_cell).collect())
    }
}

pub struct VectorDbDescriptorInitializer {
    binding: Binding,
}

impl VectorDbDescriptorInitializer {
    fn create(&self) -> Result<()> {
        let binding = &self.binding;
        let def = descriptor_def(&binding.entity, &binding.layout)?;
        if binding.client.create_entity(def)? {
            debug!(entity = %binding.entity, "entity created");
        }
        for index in binding.field.indexes() {
            for attribute in &index.attributes {
                let index = IndexDef {
                    column: attribute.clone(),
                    kind: index_kind(index.index_type),
                };
                binding.client.create_index(&binding.entity, index)?;
            }
        }
        Ok(())
    }
}

impl FieldBound for VectorDbDescriptorInitializer {
    fn field(&self) -> &Arc<Field> {
        &self.binding.field
    }
}

impl DescriptorInitializer for VectorDbDescriptorInitializer {
    fn initialize(&self) -> Result<()> {
        self.create().or_recover(&self.binding.entity, "initialize", || ())
    }

    fn deinitialize(&self) -> Result<()> {
        let dropped = self.binding.client.drop_entity(&self.binding.entity).map(|_| ());
        dropped.or_recover(&self.binding.entity, "deinitialize", || ())
    }

    fn is_initialized(&self) -> Result<bool> {
        let exists = self.binding.client.has_entity(&self.binding.entity);
        exists.or_recover(&self.binding.entity, "is_initialized", || false)
    }

    fn truncate(&self) -> Result<()> {
        let truncated = self.binding.client.truncate(&self.binding.entity);
        truncated.or_recover(&self.binding.entity, "truncate", || ())
    }
}

pub struct VectorDbDescriptorWriter {
    binding: Binding,
}

impl VectorDbDescriptorWriter {
    fn insert(&self, items: &[Descriptor]) -> Result<bool> {
        let rows = items.iter().map(descriptor_row).collect();
        let inserted = self.binding.client.insert(&self.binding.entity, rows)?;
        Ok(inserted as usize == items.len())
    }

    fn remove(&self, ids: impl IntoIterator<Item = DescriptorId>) -> Result<bool> {
        let removed = self.binding.client.delete(&self.binding.entity, self.binding.id_filter(ids))?;
        debug!(entity = %self.binding.entity, removed, "descriptors deleted");
        Ok(removed > 0)
    }
}

impl FieldBound for VectorDbDescriptorWriter {
    fn field(&self) -> &Arc<Field> {
        &self.binding.field
    }
}

impl DescriptorWriter for VectorDbDescriptorWriter {
    fn add(&self, item: &Descriptor) -> Result<bool> {
        check_writable(&self.binding.prototype, item)?;
        self.insert(std::slice::from_ref(item))
            .or_recover(&self.binding.entity, "add", || false)
    }

    fn add_all(&self, items: &[Descriptor]) -> Result<bool> {
        if items.is_empty() {
            return Ok(true);
        }
        check_batch(&self.binding.prototype, items)?;
        self.insert(items).or_recover(&self.binding.entity, "add_all", || false)
    }

    fn update(&self, item: &Descriptor) -> Result<bool> {
        check_writable(&self.binding.prototype, item)?;
        let mut assignments = vec![(RETRIEVABLE_ID.to_string(), item.retrievable_id().map(uuid_cell))];
        assignments.extend(
            item.values()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value.map(to_cell))),
        );
        let filter = Predicate::equals(DESCRIPTOR_ID, uuid_cell(item.id()));
        let updated = self.binding.client.update(&self.binding.entity, filter, assignments);
        updated.map(|n| n > 0).or_recover(&self.binding.entity, "update", || false)
    }

    fn delete(&self, item: &Descriptor) -> Result<bool> {
        self.remove([item.id()]).or_recover(&self.binding.entity, "delete", || false)
    }

    fn delete_all(&self, items: &[Descriptor]) -> Result<bool> {
        if items.is_empty() {
            return Ok(false);
        }
        self.remove(items.iter().map(Descriptor::id))
            .or_recover(&self.binding.entity, "delete_all", || false)
    }
}

/// Pushes selections, kNN and full-text matching down to the engine.
pub struct VectorDbDescriptorReader {
    binding: Binding,
    builder: DescriptorBuilder,
    store: Arc<VectorDbStore>,
}

impl VectorDbDescriptorReader {
    fn decode(&self, result: &ResultSet) -> Result<Vec<Descriptor>> {
        let rows = Rows::new(&self.binding.entity, result);
        result
            .rows
            .iter()
            .map(|row| rows.descriptor(&row.cells, &self.binding.prototype, &self.binding.layout, self.builder))
            .collect()
    }

    fn select(&self, operation: &str, filter: Option<Predicate>) -> Result<ResultStream<Descriptor>> {
        let mut dql = Dql::scan(&self.binding.entity);
        if let Some(filter) = filter {
            dql = dql.filter(filter);
        }
        let result = self
            .binding
            .client
            .query(dql)
            .map(Some)
            .or_recover(&self.binding.entity, operation, || None)?;
        match result {
            Some(result) => Ok(stream(self.decode(&result)?)),
            None => Ok(empty()),
        }
    }

    /// Runs a selection and turns its rows into hits. Without `descriptors` only
    /// the owner column is read.
    fn hits(&self, dql: Dql, descriptors: bool) -> Result<Vec<Hit>> {
        let dql = if descriptors {
            dql
        } else {
            dql.select(&[DESCRIPTOR_ID, RETRIEVABLE_ID])
        };
        let result = self.binding.client.query(dql)?;
        let rows = Rows::new(&self.binding.entity, &result);
        let (id_at, owner_at) = (rows.position(DESCRIPTOR_ID)?, rows.position(RETRIEVABLE_ID)?);

        let mut hits = Vec::with_capacity(result.rows.len());
        for row in &result.rows {
            let descriptor_id = Some(rows.uuid(&row.cells, id_at)?);
            let attribute = match (row.distance, row.score) {
                (Some(distance), _) => Some(RetrievedAttribute::Distance { descriptor_id, distance }),
                (None, Some(score)) => Some(RetrievedAttribute::Score { descriptor_id, score }),
                (None, None) => None,
            };
            let descriptor = if descriptors {
                Some(rows.descriptor(&row.cells, &self.binding.prototype, &self.binding.layout, self.builder)?)
            } else {
                None
            };
            hits.push(Hit {
                retrievable_id: rows.uuid(&row.cells, owner_at)?,
                descriptor,
                attribute,
            });
        }
        Ok(hits)
    }

    /// Validates `query` and runs it on the engine. Configuration and integrity
    /// errors propagate; transport errors are left to the caller to recover.
    fn execute(&self, query: &Query, descriptors: bool) -> Result<Vec<Hit>> {
        let field = &self.binding.field;
        let layout = &self.binding.layout;
        let scan = || Dql::scan(&self.binding.entity);
        let limited = |dql: Dql, limit: Option<usize>| match limit {
            Some(limit) => dql.limit(limit),
            None => dql,
        };
        match query {
            Query::Proximity(q) => {
                let attribute = validate_proximity(field, layout, q)?.name.clone();
                let knn = Knn {
                    column: attribute,
                    query: to_cell(&q.value),
                    distance: q.distance,
                    k: q.k,
                    order: q.order,
                };
                self.hits(scan().knn(knn), descriptors)
            }
            Query::Boolean(q) => {
                let attribute = validate_boolean(field, layout, q)?;
                let dql = scan().filter(boolean_predicate(&attribute.name, q));
                self.hits(limited(dql, q.limit), descriptors)
            }
            Query::Compound(q) => {
                let attributes = validate_compound(field, layout, q)?;
                let clauses = q
                    .clauses
                    .iter()
                    .zip(attributes)
                    .map(|(clause, attribute)| boolean_predicate(&attribute.name, clause))
                    .collect();
                let dql = scan().filter(Predicate::And(clauses));
                self.hits(limited(dql, q.limit), descriptors)
            }
            Query::Fulltext(q) => {
                let attribute = validate_fulltext(field, layout, q)?.name.clone();
                if !field.has_index(IndexType::Fulltext, &attribute) {
                    return Err(Error::Unsupported(format!(
                        "full-text query on '{}.{attribute}' requires a full-text index",
                        field.name()
                    )));
                }
                let terms = tokenize(&q.value);
                if terms.is_empty() {
                    return Ok(Vec::new());
                }
                let dql = scan().fulltext(attribute, terms.join(" "));
                self.hits(limited(dql, q.limit), descriptors)
            }
        }
    }
}

impl FieldBound for VectorDbDescriptorReader {
    fn field(&self) -> &Arc<Field> {
        &self.binding.field
    }
}

impl DescriptorReader for VectorDbDescriptorReader {
    fn get(&self, id: DescriptorId) -> Result<Option<Descriptor>> {
        let filter = Predicate::equals(DESCRIPTOR_ID, uuid_cell(id));
        self.select("get", Some(filter))?.next().transpose()
    }

    fn get_all_by_ids(&self, ids: &[DescriptorId]) -> Result<ResultStream<Descriptor>> {
        if ids.is_empty() {
            return Ok(empty());
        }
        self.select("get_all_by_ids", Some(self.binding.id_filter(ids.iter().copied())))
    }

    fn get_all_for_retrievables(&self, retrievable_ids: &[RetrievableId]) -> Result<ResultStream<Descriptor>> {
        if retrievable_ids.is_empty() {
            return Ok(empty());
        }
        let filter = Predicate::one_of(RETRIEVABLE_ID, retrievable_ids.iter().copied().map(uuid_cell).collect());
        self.select("get_all_for_retrievables", Some(filter))
    }

    fn get_all(&self) -> Result<ResultStream<Descriptor>> {
        self.select("get_all", None)
    }

    fn count(&self) -> Result<u64> {
        let counted = self.binding.client.count(&self.binding.entity);
        counted.or_recover(&self.binding.entity, "count", || 0)
    }

    fn query(&self, query: &Query) -> Result<ResultStream<Descriptor>> {
        let hits = self
            .execute(query, true)
            .or_recover(&self.binding.entity, query.name(), Vec::new)?;
        Ok(stream(hits.into_iter().filter_map(|h| h.descriptor).collect()))
    }

    fn query_and_join(&self, query: &Query) -> Result<ResultStream<Retrievable>> {
        let joined = self
            .execute(query, keeps_descriptor(query))
            .and_then(|hits| join_hits(hits, |owners| self.store.retrievables().types_of(owners)));
        Ok(stream(joined.or_recover(&self.binding.entity, "query_and_join", Vec::new)?))
    }
}
