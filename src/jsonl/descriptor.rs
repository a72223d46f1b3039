use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::database::join::{join_hits, keeps_descriptor, Hit};
use crate::database::{
    check_batch, check_writable, empty, stream, DescriptorInitializer, DescriptorProvider, DescriptorReader,
    DescriptorWriter, FieldBound, ResultStream,
};
use crate::descriptor::{Attribute, Descriptor, DescriptorBuilder};
use crate::error::{Error, Recover, Result};
use crate::index::TopK;
use crate::jsonl::file::{JsonlFile, Rewrite};
use crate::jsonl::record::{self, DescriptorRecord};
use crate::jsonl::JsonlStore;
use crate::query::{tokenize, validate_boolean, validate_compound, validate_fulltext, validate_proximity, Query};
use crate::retrievable::{Retrievable, RetrievedAttribute};
use crate::schema::Field;
use crate::value::{DescriptorId, RetrievableId};

/// Serves every descriptor kind: lines are self-describing, so one
/// implementation covers scalars, vectors and structs alike.
pub struct JsonlDescriptorProvider;

impl DescriptorProvider<JsonlStore> for JsonlDescriptorProvider {
    fn new_initializer(&self, store: &Arc<JsonlStore>, field: &Arc<Field>) -> Result<Arc<dyn DescriptorInitializer>> {
        Ok(Arc::new(JsonlDescriptorInitializer {
            binding: Binding::new(store, field)?,
        }))
    }

    fn new_reader(
        &self,
        store: &Arc<JsonlStore>,
        field: &Arc<Field>,
        builder: DescriptorBuilder,
    ) -> Result<Arc<dyn DescriptorReader>> {
        Ok(Arc::new(JsonlDescriptorReader {
            binding: Binding::new(store, field)?,
            builder,
            store: store.clone(),
        }))
    }

    fn new_writer(&self, store: &Arc<JsonlStore>, field: &Arc<Field>) -> Result<Arc<dyn DescriptorWriter>> {
        Ok(Arc::new(JsonlDescriptorWriter {
            binding: Binding::new(store, field)?,
        }))
    }
}

struct Binding {
    field: Arc<Field>,
    entity: String,
    prototype: Descriptor,
    layout: Arc<[Attribute]>,
    file: Arc<JsonlFile>,
}

impl Binding {
    fn new(store: &JsonlStore, field: &Arc<Field>) -> Result<Self> {
        let prototype = field.prototype()?;
        Ok(Self {
            field: field.clone(),
            entity: field.name().to_string(),
            layout: prototype.layout().into(),
            prototype,
            file: store.field_file(field.name())?,
        })
    }
}

fn descriptor_id(entity: &str, line: &str) -> Option<DescriptorId> {
    DescriptorRecord::parse(entity, 0, line).ok()?.descriptor_id()
}

pub struct JsonlDescriptorInitializer {
    binding: Binding,
}

impl FieldBound for JsonlDescriptorInitializer {
    fn field(&self) -> &Arc<Field> {
        &self.binding.field
    }
}

impl DescriptorInitializer for JsonlDescriptorInitializer {
    fn initialize(&self) -> Result<()> {
        let created = self.binding.file.create().map_err(Error::from);
        created.or_recover(&self.binding.entity, "initialize", || ())
    }

    fn deinitialize(&self) -> Result<()> {
        let removed = self.binding.file.remove().map_err(Error::from);
        removed.or_recover(&self.binding.entity, "deinitialize", || ())
    }

    fn is_initialized(&self) -> Result<bool> {
        Ok(self.binding.file.exists())
    }

    fn truncate(&self) -> Result<()> {
        let truncated = self.binding.file.truncate().map_err(Error::from);
        truncated.or_recover(&self.binding.entity, "truncate", || ())
    }
}

pub struct JsonlDescriptorWriter {
    binding: Binding,
}

impl JsonlDescriptorWriter {
    /// Appends the batch in one write unless one of its ids is already stored.
    fn append(&self, items: &[Descriptor]) -> Result<bool> {
        let ids: HashSet<DescriptorId> = items.iter().map(Descriptor::id).collect();
        if ids.len() != items.len() {
            return Ok(false);
        }
        let buffer = record::lines(items.iter().map(DescriptorRecord::from_descriptor))?;
        let entity = &self.binding.entity;
        let appended = self
            .binding
            .file
            .append_unless(&buffer, |line| descriptor_id(entity, line).map_or(false, |id| ids.contains(&id)))?;
        Ok(appended)
    }

    fn remove(&self, ids: &HashSet<DescriptorId>) -> Result<bool> {
        let entity = &self.binding.entity;
        let removed = self.binding.file.rewrite(|line| match descriptor_id(entity, line) {
            Some(id) if ids.contains(&id) => Rewrite::Drop,
            _ => Rewrite::Keep,
        })?;
        debug!(entity = %entity, removed, "descriptors deleted");
        Ok(removed > 0)
    }
}

impl FieldBound for JsonlDescriptorWriter {
    fn field(&self) -> &Arc<Field> {
        &self.binding.field
    }
}

impl DescriptorWriter for JsonlDescriptorWriter {
    fn add(&self, item: &Descriptor) -> Result<bool> {
        check_writable(&self.binding.prototype, item)?;
        self.append(std::slice::from_ref(item))
            .or_recover(&self.binding.entity, "add", || false)
    }

    fn add_all(&self, items: &[Descriptor]) -> Result<bool> {
        if items.is_empty() {
            return Ok(true);
        }
        check_batch(&self.binding.prototype, items)?;
        self.append(items).or_recover(&self.binding.entity, "add_all", || false)
    }

    fn update(&self, item: &Descriptor) -> Result<bool> {
        check_writable(&self.binding.prototype, item)?;
        let entity = &self.binding.entity;
        let updated = DescriptorRecord::from_descriptor(item).to_line().and_then(|line| {
            let replacement = line.trim_end().to_string();
            let changed = self.binding.file.rewrite(|existing| match descriptor_id(entity, existing) {
                Some(id) if id == item.id() => Rewrite::Replace(replacement.clone()),
                _ => Rewrite::Keep,
            })?;
            Ok(changed > 0)
        });
        updated.or_recover(entity, "update", || false)
    }

    fn delete(&self, item: &Descriptor) -> Result<bool> {
        let ids = HashSet::from([item.id()]);
        self.remove(&ids).or_recover(&self.binding.entity, "delete", || false)
    }

    fn delete_all(&self, items: &[Descriptor]) -> Result<bool> {
        let ids: HashSet<DescriptorId> = items.iter().map(Descriptor::id).collect();
        self.remove(&ids).or_recover(&self.binding.entity, "delete_all", || false)
    }
}

/// Brute-force reader: every query is a full scan of the field's file.
pub struct JsonlDescriptorReader {
    binding: Binding,
    builder: DescriptorBuilder,
    store: Arc<JsonlStore>,
}

impl JsonlDescriptorReader {
    /// Lazily decodes every record `keep` accepts.
    fn select(
        &self,
        keep: impl Fn(&DescriptorRecord) -> bool + Send + 'static,
    ) -> Result<Box<dyn Iterator<Item = Result<Descriptor>> + Send>> {
        let records = record::scan::<DescriptorRecord>(&self.binding.file, self.binding.entity.clone())?;
        let entity = self.binding.entity.clone();
        let prototype = self.binding.prototype.clone();
        let layout = self.binding.layout.clone();
        let builder = self.builder;
        Ok(Box::new(records.filter_map(move |record| match record {
            Ok(record) if keep(&record) => Some(record.into_descriptor(&entity, &prototype, &layout, builder)),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })))
    }

    fn select_stream(
        &self,
        operation: &str,
        keep: impl Fn(&DescriptorRecord) -> bool + Send + 'static,
    ) -> Result<ResultStream<Descriptor>> {
        self.select(keep).or_recover(&self.binding.entity, operation, empty)
    }

    /// Descriptors matching `predicate` in file order, as hits.
    fn filter(&self, limit: Option<usize>, predicate: impl Fn(&Descriptor) -> bool) -> Result<Vec<Hit>> {
        let mut hits = Vec::new();
        if limit == Some(0) {
            return Ok(hits);
        }
        for descriptor in self.select(|_| true)? {
            let descriptor = descriptor?;
            if !predicate(&descriptor) {
                continue;
            }
            hits.extend(Hit::of(descriptor, None));
            if limit.map_or(false, |l| hits.len() >= l) {
                break;
            }
        }
        Ok(hits)
    }

    /// Validates and executes `query`. Configuration and integrity errors propagate;
    /// I/O errors are left to the caller to recover.
    fn execute(&self, query: &Query) -> Result<Vec<Hit>> {
        let field = &self.binding.field;
        let layout = &self.binding.layout;
        match query {
            Query::Proximity(q) => {
                let attribute = validate_proximity(field, layout, q)?.name.clone();
                let mut top = TopK::new(q.k, q.order);
                for descriptor in self.select(|_| true)? {
                    let descriptor = descriptor?;
                    let distance = match descriptor.value(&attribute) {
                        Some(value) => q.distance.between(&q.value, value)?,
                        None => continue,
                    };
                    top.push(distance, descriptor);
                }
                Ok(top
                    .into_sorted()
                    .into_iter()
                    .filter_map(|(distance, descriptor)| {
                        let attribute = RetrievedAttribute::Distance {
                            descriptor_id: Some(descriptor.id()),
                            distance,
                        };
                        Hit::of(descriptor, Some(attribute))
                    })
                    .collect())
            }
            Query::Boolean(q) => {
                let attribute = validate_boolean(field, layout, q)?.name.clone();
                self.filter(q.limit, |d| {
                    d.value(&attribute).map_or(false, |v| q.comparison.evaluate(v, &q.values))
                })
            }
            Query::Compound(q) => {
                let attributes: Vec<String> = validate_compound(field, layout, q)?
                    .into_iter()
                    .map(|a| a.name.clone())
                    .collect();
                self.filter(q.limit, |d| {
                    q.clauses.iter().zip(&attributes).all(|(clause, attribute)| {
                        d.value(attribute).map_or(false, |v| clause.comparison.evaluate(v, &clause.values))
                    })
                })
            }
            Query::Fulltext(q) => {
                let attribute = validate_fulltext(field, layout, q)?.name.clone();
                let terms = tokenize(&q.value);
                if terms.is_empty() {
                    return Ok(Vec::new());
                }
                let mut scored = Vec::new();
                for descriptor in self.select(|_| true)? {
                    let descriptor = descriptor?;
                    let tokens = match descriptor.value(&attribute).and_then(|v| v.as_str()) {
                        Some(text) => tokenize(text),
                        None => continue,
                    };
                    if terms.iter().all(|t| tokens.contains(t)) {
                        let matched = tokens.iter().filter(|t| terms.contains(t)).count();
                        scored.push((matched as f64 / tokens.len() as f64, descriptor));
                    }
                }
                scored.sort_by(|a, b| b.0.total_cmp(&a.0));
                Ok(scored
                    .into_iter()
                    .take(q.limit.unwrap_or(usize::MAX))
                    .filter_map(|(score, descriptor)| {
                        let attribute = RetrievedAttribute::Score {
                            descriptor_id: Some(descriptor.id()),
                            score,
                        };
                        Hit::of(descriptor, Some(attribute))
                    })
                    .collect())
            }
        }
    }
}

impl FieldBound for JsonlDescriptorReader {
    fn field(&self) -> &Arc<Field> {
        &self.binding.field
    }
}

impl DescriptorReader for JsonlDescriptorReader {
    fn get(&self, id: DescriptorId) -> Result<Option<Descriptor>> {
        let mut matches = self.select_stream("get", move |r| r.descriptor_id() == Some(id))?;
        matches.next().transpose()
    }

    fn get_all_by_ids(&self, ids: &[DescriptorId]) -> Result<ResultStream<Descriptor>> {
        let ids: HashSet<DescriptorId> = ids.iter().copied().collect();
        self.select_stream("get_all_by_ids", move |r| r.descriptor_id().map_or(false, |id| ids.contains(&id)))
    }

    fn get_all_for_retrievables(&self, retrievable_ids: &[RetrievableId]) -> Result<ResultStream<Descriptor>> {
        let owners: HashSet<RetrievableId> = retrievable_ids.iter().copied().collect();
        self.select_stream("get_all_for_retrievables", move |r| {
            r.retrievable_id().map_or(false, |id| owners.contains(&id))
        })
    }

    fn get_all(&self) -> Result<ResultStream<Descriptor>> {
        self.select_stream("get_all", |_| true)
    }

    fn count(&self) -> Result<u64> {
        let counted = self.binding.file.count().map_err(Error::from);
        counted.or_recover(&self.binding.entity, "count", || 0)
    }

    fn query(&self, query: &Query) -> Result<ResultStream<Descriptor>> {
        let hits = self.execute(query).or_recover(&self.binding.entity, query.name(), Vec::new)?;
        Ok(stream(hits.into_iter().filter_map(|h| h.descriptor).collect()))
    }

    fn query_and_join(&self, query: &Query) -> Result<ResultStream<Retrievable>> {
        let keep = keeps_descriptor(query);
        let joined = self.execute(query).and_then(|mut hits| {
            if !keep {
                hits.iter_mut().for_each(|h| h.descriptor = None);
            }
            join_hits(hits, |owners| self.store.retrievables().types_of(owners))
        });
        Ok(stream(joined.or_recover(&self.binding.entity, "query_and_join", Vec::new)?))
    }
}
