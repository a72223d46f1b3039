use std::sync::Arc;

use tokio_postgres::Row;
use tracing::debug;

use crate::database::join::{join_hits, keeps_descriptor, Hit};
use crate::database::{
    check_batch, check_writable, empty, stream, DescriptorInitializer, DescriptorProvider, DescriptorReader,
    DescriptorWriter, FieldBound, ResultStream,
};
use crate::descriptor::{Attribute, Descriptor, DescriptorBuilder};
use crate::error::{Error, Recover, Result};
use crate::pgvector::mapping::{descriptor_params, optional, param, query_vector, refs, Param, Rows};
use crate::pgvector::session::PgSession;
use crate::pgvector::sql::{self, Table, DESCRIPTOR_ID, DISTANCE_ALIAS, RETRIEVABLE_ID, SCORE_ALIAS};
use crate::pgvector::{paged, PgStore};
use crate::query::{tokenize, validate_boolean, validate_compound, validate_fulltext, validate_proximity};
use crate::query::{Comparison, Query, SimpleBooleanQuery};
use crate::retrievable::{Retrievable, RetrievedAttribute};
use crate::schema::{Field, IndexType};
use crate::value::{DescriptorId, RetrievableId};

/// One table per field, with native `vector` and `bit` columns for vector kinds.
pub struct PgDescriptorProvider;

impl DescriptorProvider<PgStore> for PgDescriptorProvider {
    fn new_initializer(&self, store: &Arc<PgStore>, field: &Arc<Field>) -> Result<Arc<dyn DescriptorInitializer>> {
        Ok(Arc::new(PgDescriptorInitializer {
            binding: Binding::new(store, field, None)?,
        }))
    }

    fn new_reader(
        &self,
        store: &Arc<PgStore>,
        field: &Arc<Field>,
        builder: DescriptorBuilder,
    ) -> Result<Arc<dyn DescriptorReader>> {
        Ok(Arc::new(PgDescriptorReader {
            binding: Arc::new(Binding::new(store, field, Some(builder))?),
            store: store.clone(),
        }))
    }

    fn new_writer(&self, store: &Arc<PgStore>, field: &Arc<Field>) -> Result<Arc<dyn DescriptorWriter>> {
        Ok(Arc::new(PgDescriptorWriter {
            binding: Binding::new(store, field, None)?,
        }))
    }
}

struct Binding {
    field: Arc<Field>,
    table: Table,
    entity: String,
    prototype: Descriptor,
    layout: Arc<[Attribute]>,
    builder: Option<DescriptorBuilder>,
    session: Arc<PgSession>,
}

impl Binding {
    fn new(store: &PgStore, field: &Arc<Field>, builder: Option<DescriptorBuilder>) -> Result<Self> {
        let prototype = field.prototype()?;
        let table = Table::descriptor(store.schema(), field.name());
        Ok(Self {
            field: field.clone(),
            entity: table.entity(),
            table,
            layout: prototype.layout().into(),
            prototype,
            builder,
            session: store.session().clone(),
        })
    }

    fn rows(&self) -> Rows<'_> {
        Rows::new(&self.entity)
    }

    fn decode_row(&self, row: &Row) -> Result<Descriptor> {
        let builder = self
            .builder
            .ok_or_else(|| Error::Layout(format!("no descriptor builder bound for {}", self.entity)))?;
        self.rows().descriptor(row, &self.prototype, &self.layout, builder)
    }

    fn decode(&self, rows: &[Row]) -> Result<Vec<Descriptor>> {
        rows.iter().map(|row| self.decode_row(row)).collect()
    }

    /// One keyset page of descriptors after `last`, keyed by descriptor id.
    fn page(&self, last: Option<DescriptorId>) -> Result<Vec<(DescriptorId, Descriptor)>> {
        let rows = match last {
            Some(last) => self
                .session
                .query(&sql::page_descriptors(&self.table, &self.layout, true), &[&last])?,
            None => self
                .session
                .query(&sql::page_descriptors(&self.table, &self.layout, false), &[])?,
        };
        Ok(self.decode(&rows)?.into_iter().map(|d| (d.id(), d)).collect())
    }
}

pub struct PgDescriptorInitializer {
    binding: Binding,
}

impl PgDescriptorInitializer {
    fn create(&self) -> Result<()> {
        let binding = &self.binding;
        let indexes = binding.field.indexes();
        let fulltext = sql::fulltext_columns(&binding.layout, indexes)?;
        let mut statements = vec![sql::create_descriptor(&binding.table, &binding.layout, &fulltext)?];
        statements.extend(sql::create_indexes(&binding.table, &binding.layout, indexes)?);
        binding.session.atomically(|| {
            for statement in &statements {
                binding.session.execute(statement, &[])?;
            }
            Ok(())
        })?;
        debug!(entity = %binding.entity, indexes = statements.len() - 1, "descriptor table ready");
        Ok(())
    }

    fn exists(&self) -> Result<bool> {
        let table = &self.binding.table;
        let rows = self
            .binding
            .session
            .query(sql::TABLE_EXISTS, &[&table.schema, &table.name])?;
        Ok(rows.first().map(|row| row.try_get::<_, bool>(0)).transpose()?.unwrap_or(false))
    }
}

impl FieldBound for PgDescriptorInitializer {
    fn field(&self) -> &Arc<Field> {
        &self.binding.field
    }
}

impl DescriptorInitializer for PgDescriptorInitializer {
    fn initialize(&self) -> Result<()> {
        self.create().or_recover(&self.binding.entity, "initialize", || ())
    }

    fn deinitialize(&self) -> Result<()> {
        let dropped = self.binding.session.execute(&sql::drop_table(&self.binding.table), &[]);
        dropped.map(|_| ()).or_recover(&self.binding.entity, "deinitialize", || ())
    }

    fn is_initialized(&self) -> Result<bool> {
        self.exists().or_recover(&self.binding.entity, "is_initialized", || false)
    }

    fn truncate(&self) -> Result<()> {
        let truncated = self.binding.session.execute(&sql::truncate(&self.binding.table), &[]);
        truncated.map(|_| ()).or_recover(&self.binding.entity, "truncate", || ())
    }
}

pub struct PgDescriptorWriter {
    binding: Binding,
}

impl PgDescriptorWriter {
    /// Inserts in as few statements as the parameter limit allows, all in one transaction.
    fn insert(&self, items: &[Descriptor]) -> Result<bool> {
        let binding = &self.binding;
        let inserted = binding.session.atomically(|| {
            let mut inserted = 0;
            for chunk in items.chunks(sql::rows_per_insert(&binding.layout)) {
                let statement = sql::insert_descriptors(&binding.table, &binding.layout, chunk.len());
                let params: Vec<Param> = chunk
                    .iter()
                    .flat_map(|item| descriptor_params(item, &binding.layout))
                    .collect();
                inserted += binding.session.execute(&statement, &refs(&params))?;
            }
            Ok(inserted)
        })?;
        Ok(inserted as usize == items.len())
    }

    fn remove(&self, ids: Vec<DescriptorId>) -> Result<bool> {
        let removed = self
            .binding
            .session
            .execute(&sql::delete_descriptors(&self.binding.table), &[&ids])?;
        debug!(entity = %self.binding.entity, removed, "descriptors deleted");
        Ok(removed > 0)
    }
}

impl FieldBound for PgDescriptorWriter {
    fn field(&self) -> &Arc<Field> {
        &self.binding.field
    }
}

impl DescriptorWriter for PgDescriptorWriter {
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
        let binding = &self.binding;
        let mut params: Vec<Param> = vec![Box::new(item.id()), Box::new(item.retrievable_id())];
        params.extend(
            binding
                .layout
                .iter()
                .map(|attribute| optional(&attribute.ty, item.value(&attribute.name))),
        );
        let updated = binding
            .session
            .execute(&sql::update_descriptor(&binding.table, &binding.layout), &refs(&params));
        updated.map(|n| n > 0).or_recover(&binding.entity, "update", || false)
    }

    fn delete(&self, item: &Descriptor) -> Result<bool> {
        self.remove(vec![item.id()])
            .or_recover(&self.binding.entity, "delete", || false)
    }

    fn delete_all(&self, items: &[Descriptor]) -> Result<bool> {
        if items.is_empty() {
            return Ok(false);
        }
        self.remove(items.iter().map(Descriptor::id).collect())
            .or_recover(&self.binding.entity, "delete_all", || false)
    }
}

#[derive(Clone, Copy)]
enum Ranking {
    Unranked,
    Distance,
    Score,
}

/// Translates queries into single statements; ranking and limits run in the database.
pub struct PgDescriptorReader {
    binding: Arc<Binding>,
    store: Arc<PgStore>,
}

impl PgDescriptorReader {
    fn select_in(&self, operation: &str, column: &str, ids: Vec<uuid::Uuid>) -> Result<ResultStream<Descriptor>> {
        let binding = &self.binding;
        let statement = sql::select_descriptors_in(&binding.table, &binding.layout, column);
        let rows = binding
            .session
            .query(&statement, &[&ids])
            .map(Some)
            .or_recover(&binding.entity, operation, || None)?;
        match rows {
            Some(rows) => Ok(stream(binding.decode(&rows)?)),
            None => Ok(empty()),
        }
    }

    fn hits(&self, statement: &str, params: &[Param], descriptors: bool, ranking: Ranking) -> Result<Vec<Hit>> {
        let binding = &self.binding;
        let rows = binding.session.query(statement, &refs(params))?;
        let reader = binding.rows();
        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let descriptor_id = Some(reader.uuid(row, DESCRIPTOR_ID)?);
            let attribute = match ranking {
                Ranking::Unranked => None,
                Ranking::Distance => Some(RetrievedAttribute::Distance {
                    descriptor_id,
                    distance: reader.float(row, DISTANCE_ALIAS)?,
                }),
                Ranking::Score => Some(RetrievedAttribute::Score {
                    descriptor_id,
                    score: reader.float(row, SCORE_ALIAS)?,
                }),
            };
            let descriptor = if descriptors {
                Some(binding.decode_row(row)?)
            } else {
                None
            };
            hits.push(Hit {
                retrievable_id: reader.uuid(row, RETRIEVABLE_ID)?,
                descriptor,
                attribute,
            });
        }
        Ok(hits)
    }

    /// Conditions for the clauses, numbering parameters from `$1` in clause order.
    fn conditions(clauses: &[(&SimpleBooleanQuery, &Attribute)]) -> (Vec<String>, Vec<Param>) {
        let mut conditions = Vec::with_capacity(clauses.len());
        let mut params: Vec<Param> = Vec::new();
        for (clause, attribute) in clauses {
            let values = if clause.comparison == Comparison::In {
                clause.values.len()
            } else {
                1
            };
            conditions.push(sql::condition(attribute, clause.comparison, values, params.len() + 1));
            params.extend(clause.values.iter().take(values).map(param));
        }
        (conditions, params)
    }

    fn language(&self, attribute: &str) -> String {
        self.binding
            .field
            .indexes()
            .iter()
            .find(|i| i.index_type == IndexType::Fulltext && i.attributes.iter().any(|a| a == attribute))
            .map(|i| i.parameters.get_or(sql::LANGUAGE_PARAMETER, sql::DEFAULT_LANGUAGE).to_lowercase())
            .unwrap_or_else(|| sql::DEFAULT_LANGUAGE.to_string())
    }

    /// Validates `query` and runs it. Configuration and integrity errors
    /// propagate; backend errors are left to the caller to recover.
    fn execute(&self, query: &Query, descriptors: bool) -> Result<Vec<Hit>> {
        let binding = &self.binding;
        let (field, layout, table) = (&binding.field, &binding.layout, &binding.table);
        match query {
            Query::Proximity(q) => {
                let attribute = validate_proximity(field, layout, q)?;
                let statement = sql::proximity(table, layout, attribute, q.distance, q.order, q.k, descriptors)?;
                self.hits(&statement, &[query_vector(&q.value)?], descriptors, Ranking::Distance)
            }
            Query::Boolean(q) => {
                let attribute = validate_boolean(field, layout, q)?;
                let (conditions, params) = Self::conditions(&[(q, attribute)]);
                let statement = sql::select_where(table, layout, &conditions, q.limit, descriptors);
                self.hits(&statement, &params, descriptors, Ranking::Unranked)
            }
            Query::Compound(q) => {
                let attributes = validate_compound(field, layout, q)?;
                let clauses: Vec<_> = q.clauses.iter().zip(attributes).collect();
                let (conditions, params) = Self::conditions(&clauses);
                let statement = sql::select_where(table, layout, &conditions, q.limit, descriptors);
                self.hits(&statement, &params, descriptors, Ranking::Unranked)
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
                let language = self.language(&attribute);
                let statement = sql::fulltext(table, layout, &attribute, &language, q.limit, descriptors)?;
                let text: Param = Box::new(terms.join(" "));
                self.hits(&statement, &[text], descriptors, Ranking::Score)
            }
        }
    }
}

impl FieldBound for PgDescriptorReader {
    fn field(&self) -> &Arc<Field> {
        &self.binding.field
    }
}

impl DescriptorReader for PgDescriptorReader {
    fn get(&self, id: DescriptorId) -> Result<Option<Descriptor>> {
        self.select_in("get", DESCRIPTOR_ID, vec![id])?.next().transpose()
    }

    fn get_all_by_ids(&self, ids: &[DescriptorId]) -> Result<ResultStream<Descriptor>> {
        if ids.is_empty() {
            return Ok(empty());
        }
        self.select_in("get_all_by_ids", DESCRIPTOR_ID, ids.to_vec())
    }

    fn get_all_for_retrievables(&self, retrievable_ids: &[RetrievableId]) -> Result<ResultStream<Descriptor>> {
        if retrievable_ids.is_empty() {
            return Ok(empty());
        }
        self.select_in("get_all_for_retrievables", RETRIEVABLE_ID, retrievable_ids.to_vec())
    }

    fn get_all(&self) -> Result<ResultStream<Descriptor>> {
        let first = self
            .binding
            .page(None)
            .map(Some)
            .or_recover(&self.binding.entity, "get_all", || None)?;
        let Some(first) = first else {
            return Ok(empty());
        };
        let binding = self.binding.clone();
        Ok(paged(first, move |last| binding.page(Some(last))))
    }

    fn count(&self) -> Result<u64> {
        let counted = self.binding.session.query(&sql::count(&self.binding.table), &[]);
        let counted = counted.and_then(|rows| match rows.first() {
            Some(row) => Ok(row.try_get::<_, i64>(0)?.max(0) as u64),
            None => Ok(0),
        });
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
