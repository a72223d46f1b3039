use std::collections::HashMap;
use std::sync::Arc;

use tokio_postgres::Row;

use crate::database::{empty, stream, RetrievableInitializer, RetrievableReader, RetrievableWriter, ResultStream};
use crate::error::{Recover, Result};
use crate::pgvector::mapping::{refs, Param, Rows};
use crate::pgvector::paged;
use crate::pgvector::session::PgSession;
use crate::pgvector::sql::{self, Table, OBJECT_ID, PREDICATE, RETRIEVABLE_ID, RETRIEVABLE_TYPE, SUBJECT_ID};
use crate::retrievable::{Relationship, Retrievable};
use crate::value::RetrievableId;

/// The `retrievable` and `relationships` tables of one schema. Relationships
/// and descriptors reference retrievables and are removed with them.
pub struct PgRetrievables {
    session: Arc<PgSession>,
    schema: String,
    retrievables: Table,
    relationships: Table,
    entity: String,
}

fn relationship_params(relationships: &[Relationship]) -> Vec<Param> {
    relationships
        .iter()
        .flat_map(|r| -> [Param; 3] { [Box::new(r.subject), Box::new(r.predicate.clone()), Box::new(r.object)] })
        .collect()
}

impl PgRetrievables {
    pub(crate) fn new(session: Arc<PgSession>, schema: &str) -> Self {
        let retrievables = Table::retrievable(schema);
        Self {
            session,
            schema: schema.to_string(),
            entity: retrievables.entity(),
            retrievables,
            relationships: Table::relationships(schema),
        }
    }

    fn decode(&self, rows: &[Row]) -> Result<Vec<Retrievable>> {
        let reader = Rows::new(&self.entity);
        rows.iter()
            .map(|row| {
                let id = reader.uuid(row, RETRIEVABLE_ID)?;
                let retrievable_type = reader.string(row, RETRIEVABLE_TYPE)?.unwrap_or_default();
                Ok(Retrievable::new(id, retrievable_type))
            })
            .collect()
    }

    fn select(&self, operation: &str, ids: Vec<RetrievableId>) -> Result<ResultStream<Retrievable>> {
        let rows = self
            .session
            .query(&sql::select_retrievables_in(&self.schema), &[&ids])
            .map(Some)
            .or_recover(&self.entity, operation, || None)?;
        match rows {
            Some(rows) => Ok(stream(self.decode(&rows)?)),
            None => Ok(empty()),
        }
    }

    fn page(&self, last: Option<RetrievableId>) -> Result<Vec<(RetrievableId, Retrievable)>> {
        let rows = match last {
            Some(last) => self.session.query(&sql::page_retrievables(&self.schema, true), &[&last])?,
            None => self.session.query(&sql::page_retrievables(&self.schema, false), &[])?,
        };
        Ok(self.decode(&rows)?.into_iter().map(|r| (r.id, r)).collect())
    }

    /// Type tags of the retrievables among `ids` that exist.
    pub(crate) fn types_of(&self, ids: &[RetrievableId]) -> Result<HashMap<RetrievableId, String>> {
        let rows = self
            .session
            .query(&sql::select_retrievables_in(&self.schema), &[&ids.to_vec()])?;
        Ok(self
            .decode(&rows)?
            .into_iter()
            .map(|r| (r.id, r.retrievable_type))
            .collect())
    }

    fn insert(&self, items: &[Retrievable]) -> Result<bool> {
        let inserted = self.session.atomically(|| {
            let mut inserted = 0;
            for chunk in items.chunks(sql::MAX_PARAMETERS / 2) {
                let params: Vec<Param> = chunk
                    .iter()
                    .flat_map(|r| -> [Param; 2] { [Box::new(r.id), Box::new(r.retrievable_type.clone())] })
                    .collect();
                let statement = sql::insert_retrievables(&self.schema, chunk.len());
                inserted += self.session.execute(&statement, &refs(&params))?;
            }
            Ok(inserted)
        })?;
        Ok(inserted as usize == items.len())
    }

    fn remove(&self, ids: Vec<RetrievableId>) -> Result<bool> {
        Ok(self.session.execute(&sql::delete_retrievables(&self.schema), &[&ids])? > 0)
    }

    fn link(&self, relationships: &[Relationship]) -> Result<bool> {
        let linked = self.session.atomically(|| {
            let mut linked = 0;
            for chunk in relationships.chunks(sql::MAX_PARAMETERS / 3) {
                let params = relationship_params(chunk);
                let statement = sql::insert_relationships(&self.schema, chunk.len());
                linked += self.session.execute(&statement, &refs(&params))?;
            }
            Ok(linked)
        })?;
        Ok(linked as usize == relationships.len())
    }

    fn unlink(&self, relationships: &[Relationship]) -> Result<bool> {
        let unlinked = self.session.atomically(|| {
            let mut unlinked = 0;
            for chunk in relationships.chunks(sql::MAX_PARAMETERS / 3) {
                let params = relationship_params(chunk);
                let statement = sql::delete_relationships(&self.schema, chunk.len());
                unlinked += self.session.execute(&statement, &refs(&params))?;
            }
            Ok(unlinked)
        })?;
        Ok(unlinked > 0)
    }

    fn exists(&self, table: &Table) -> Result<bool> {
        let rows = self.session.query(sql::TABLE_EXISTS, &[&table.schema, &table.name])?;
        Ok(rows.first().map(|row| row.try_get::<_, bool>(0)).transpose()?.unwrap_or(false))
    }

    fn create(&self) -> Result<()> {
        self.session.atomically(|| {
            self.session.execute(&sql::create_retrievable(&self.schema), &[])?;
            self.session.execute(&sql::create_relationships(&self.schema), &[])?;
            Ok(())
        })
    }
}

impl RetrievableInitializer for PgRetrievables {
    fn initialize(&self) -> Result<()> {
        self.create().or_recover(&self.entity, "initialize", || ())
    }

    fn deinitialize(&self) -> Result<()> {
        let dropped = self.session.atomically(|| {
            self.session.execute(&sql::drop_table(&self.relationships), &[])?;
            self.session.execute(&sql::drop_table(&self.retrievables), &[])?;
            Ok(())
        });
        dropped.or_recover(&self.entity, "deinitialize", || ())
    }

    fn is_initialized(&self) -> Result<bool> {
        let exists = self
            .exists(&self.retrievables)
            .and_then(|found| Ok(found && self.exists(&self.relationships)?));
        exists.or_recover(&self.entity, "is_initialized", || false)
    }

    /// Empties both tables. Descriptor rows go with their owners.
    fn truncate(&self) -> Result<()> {
        let truncated = self.session.execute(&sql::truncate(&self.retrievables), &[]);
        truncated.map(|_| ()).or_recover(&self.entity, "truncate", || ())
    }
}

impl RetrievableWriter for PgRetrievables {
    fn add(&self, item: &Retrievable) -> Result<bool> {
        self.insert(std::slice::from_ref(item))
            .or_recover(&self.entity, "add", || false)
    }

    fn add_all(&self, items: &[Retrievable]) -> Result<bool> {
        if items.is_empty() {
            return Ok(true);
        }
        self.insert(items).or_recover(&self.entity, "add_all", || false)
    }

    fn update(&self, item: &Retrievable) -> Result<bool> {
        let updated = self
            .session
            .execute(&sql::update_retrievable(&self.schema), &[&item.id, &item.retrievable_type]);
        updated.map(|n| n > 0).or_recover(&self.entity, "update", || false)
    }

    fn delete(&self, id: RetrievableId) -> Result<bool> {
        self.remove(vec![id]).or_recover(&self.entity, "delete", || false)
    }

    fn delete_all(&self, ids: &[RetrievableId]) -> Result<bool> {
        if ids.is_empty() {
            return Ok(false);
        }
        self.remove(ids.to_vec()).or_recover(&self.entity, "delete_all", || false)
    }

    fn connect(&self, relationship: &Relationship) -> Result<bool> {
        self.link(std::slice::from_ref(relationship))
            .or_recover(&self.relationships.entity(), "connect", || false)
    }

    fn connect_all(&self, relationships: &[Relationship]) -> Result<bool> {
        if relationships.is_empty() {
            return Ok(true);
        }
        self.link(relationships)
            .or_recover(&self.relationships.entity(), "connect_all", || false)
    }

    fn disconnect(&self, relationship: &Relationship) -> Result<bool> {
        self.unlink(std::slice::from_ref(relationship))
            .or_recover(&self.relationships.entity(), "disconnect", || false)
    }

    fn disconnect_all(&self, relationships: &[Relationship]) -> Result<bool> {
        if relationships.is_empty() {
            return Ok(false);
        }
        self.unlink(relationships)
            .or_recover(&self.relationships.entity(), "disconnect_all", || false)
    }
}

impl RetrievableReader for PgRetrievables {
    fn get(&self, id: RetrievableId) -> Result<Option<Retrievable>> {
        self.select("get", vec![id])?.next().transpose()
    }

    fn get_all_by_ids(&self, ids: &[RetrievableId]) -> Result<ResultStream<Retrievable>> {
        if ids.is_empty() {
            return Ok(empty());
        }
        self.select("get_all_by_ids", ids.to_vec())
    }

    fn get_all(&self) -> Result<ResultStream<Retrievable>> {
        let Some(first) = self.page(None).map(Some).or_recover(&self.entity, "get_all", || None)? else {
            return Ok(empty());
        };
        let this = PgRetrievables::new(self.session.clone(), &self.schema);
        Ok(paged(first, move |last| this.page(Some(last))))
    }

    fn count(&self) -> Result<u64> {
        let counted = self
            .session
            .query(&sql::count(&self.retrievables), &[])
            .and_then(|rows| match rows.first() {
                Some(row) => Ok(row.try_get::<_, i64>(0)?.max(0) as u64),
                None => Ok(0),
            });
        counted.or_recover(&self.entity, "count", || 0)
    }

    fn get_connections(
        &self,
        subjects: &[RetrievableId],
        predicates: &[String],
        objects: &[RetrievableId],
    ) -> Result<ResultStream<Relationship>> {
        let entity = self.relationships.entity();
        let fetched = self
            .session
            .query(
                &sql::select_relationships(&self.schema),
                &[&subjects.to_vec(), &predicates.to_vec(), &objects.to_vec()],
            )
            .map(Some)
            .or_recover(&entity, "get_connections", || None)?;
        let Some(rows) = fetched else {
            return Ok(empty());
        };

        let reader = Rows::new(&entity);
        let relationships = rows
            .iter()
            .map(|row| {
                Ok(Relationship::new(
                    reader.uuid(row, SUBJECT_ID)?,
                    reader.string(row, PREDICATE)?.unwrap_or_default(),
                    reader.uuid(row, OBJECT_ID)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(stream(relationships))
    }
}
