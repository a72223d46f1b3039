use std::collections::HashMap;

use crate::database::{empty, stream, RetrievableInitializer, RetrievableReader, RetrievableWriter, ResultStream};
use crate::error::{Recover, Result};
use crate::retrievable::{Relationship, Retrievable};
use crate::value::RetrievableId;
use crate::vectordb::client::EngineClient;
use crate::vectordb::dql::{Dql, Predicate, ResultSet};
use crate::vectordb::mapping::{
    relationship_def, relationship_entity, retrievable_def, retrievable_entity, uuid_cell, Rows, OBJECT_ID, PREDICATE,
    RETRIEVABLE_ID, RETRIEVABLE_TYPE, SUBJECT_ID,
};
use crate::vectordb::types::Cell;

/// The `<schema>.retrievable` and `<schema>.relationships` entities.
pub struct VectorDbRetrievables {
    client: EngineClient,
    schema: String,
    retrievables: String,
    relationships: String,
}

fn ids_filter(column: &str, ids: &[RetrievableId]) -> Predicate {
    Predicate::one_of(column, ids.iter().copied().map(uuid_cell).collect())
}

fn relationship_row(r: &Relationship) -> Vec<Option<Cell>> {
    vec![
        Some(uuid_cell(r.subject)),
        Some(Cell::String(r.predicate.clone())),
        Some(uuid_cell(r.object)),
    ]
}

fn relationship_filter(r: &Relationship) -> Predicate {
    Predicate::And(vec![
        Predicate::equals(SUBJECT_ID, uuid_cell(r.subject)),
        Predicate::equals(PREDICATE, Cell::String(r.predicate.clone())),
        Predicate::equals(OBJECT_ID, uuid_cell(r.object)),
    ])
}

impl VectorDbRetrievables {
    pub(crate) fn new(client: EngineClient, schema: &str) -> Self {
        Self {
            client,
            schema: schema.to_string(),
            retrievables: retrievable_entity(schema),
            relationships: relationship_entity(schema),
        }
    }

    fn decode(&self, result: &ResultSet) -> Result<Vec<Retrievable>> {
        let rows = Rows::new(&self.retrievables, result);
        let (id_at, type_at) = (rows.position(RETRIEVABLE_ID)?, rows.position(RETRIEVABLE_TYPE)?);
        result
            .rows
            .iter()
            .map(|row| {
                let id = rows.uuid(&row.cells, id_at)?;
                let retrievable_type = rows.string(&row.cells, type_at)?.unwrap_or_default();
                Ok(Retrievable::new(id, retrievable_type))
            })
            .collect()
    }

    fn select(&self, operation: &str, filter: Option<Predicate>) -> Result<ResultStream<Retrievable>> {
        let mut dql = Dql::scan(&self.retrievables);
        if let Some(filter) = filter {
            dql = dql.filter(filter);
        }
        let result = self
            .client
            .query(dql)
            .map(Some)
            .or_recover(&self.retrievables, operation, || None)?;
        match result {
            Some(result) => Ok(stream(self.decode(&result)?)),
            None => Ok(empty()),
        }
    }

    /// Type tags of the retrievables among `ids` that exist.
    pub(crate) fn types_of(&self, ids: &[RetrievableId]) -> Result<HashMap<RetrievableId, String>> {
        let dql = Dql::scan(&self.retrievables).filter(ids_filter(RETRIEVABLE_ID, ids));
        let result = self.client.query(dql)?;
        Ok(self
            .decode(&result)?
            .into_iter()
            .map(|r| (r.id, r.retrievable_type))
            .collect())
    }

    fn insert(&self, items: &[Retrievable]) -> Result<bool> {
        let rows = items
            .iter()
            .map(|r| vec![Some(uuid_cell(r.id)), Some(Cell::String(r.retrievable_type.clone()))])
            .collect();
        Ok(self.client.insert(&self.retrievables, rows)? as usize == items.len())
    }

    /// Removes the retrievables and every relationship touching them.
    fn remove(&self, ids: &[RetrievableId]) -> Result<bool> {
        let removed = self.client.delete(&self.retrievables, ids_filter(RETRIEVABLE_ID, ids))?;
        let touching = Predicate::Or(vec![ids_filter(SUBJECT_ID, ids), ids_filter(OBJECT_ID, ids)]);
        self.client.delete(&self.relationships, touching)?;
        Ok(removed > 0)
    }

    fn link(&self, relationships: &[Relationship]) -> Result<bool> {
        let rows = relationships.iter().map(relationship_row).collect();
        Ok(self.client.insert(&self.relationships, rows)? as usize == relationships.len())
    }

    fn unlink(&self, relationships: &[Relationship]) -> Result<bool> {
        if relationships.is_empty() {
            return Ok(false);
        }
        let filter = Predicate::Or(relationships.iter().map(relationship_filter).collect());
        Ok(self.client.delete(&self.relationships, filter)? > 0)
    }

    fn create(&self) -> Result<()> {
        self.client.create_entity(retrievable_def(&self.schema))?;
        self.client.create_entity(relationship_def(&self.schema))?;
        Ok(())
    }
}

impl RetrievableInitializer for VectorDbRetrievables {
    fn initialize(&self) -> Result<()> {
        self.create().or_recover(&self.retrievables, "initialize", || ())
    }

    fn deinitialize(&self) -> Result<()> {
        let dropped = self
            .client
            .drop_entity(&self.relationships)
            .and_then(|_| self.client.drop_entity(&self.retrievables))
            .map(|_| ());
        dropped.or_recover(&self.retrievables, "deinitialize", || ())
    }

    fn is_initialized(&self) -> Result<bool> {
        let exists = self
            .client
            .has_entity(&self.retrievables)
            .and_then(|found| Ok(found && self.client.has_entity(&self.relationships)?));
        exists.or_recover(&self.retrievables, "is_initialized", || false)
    }

    fn truncate(&self) -> Result<()> {
        let truncated = self
            .client
            .truncate(&self.relationships)
            .and_then(|_| self.client.truncate(&self.retrievables));
        truncated.or_recover(&self.retrievables, "truncate", || ())
    }
}

impl RetrievableWriter for VectorDbRetrievables {
    fn add(&self, item: &Retrievable) -> Result<bool> {
        self.insert(std::slice::from_ref(item))
            .or_recover(&self.retrievables, "add", || false)
    }

    fn add_all(&self, items: &[Retrievable]) -> Result<bool> {
        if items.is_empty() {
            return Ok(true);
        }
        self.insert(items).or_recover(&self.retrievables, "add_all", || false)
    }

    fn update(&self, item: &Retrievable) -> Result<bool> {
        let assignments = vec![(
            RETRIEVABLE_TYPE.to_string(),
            Some(Cell::String(item.retrievable_type.clone())),
        )];
        let updated = self
            .client
            .update(&self.retrievables, Predicate::equals(RETRIEVABLE_ID, uuid_cell(item.id)), assignments);
        updated.map(|n| n > 0).or_recover(&self.retrievables, "update", || false)
    }

    fn delete(&self, id: RetrievableId) -> Result<bool> {
        self.remove(&[id]).or_recover(&self.retrievables, "delete", || false)
    }

    fn delete_all(&self, ids: &[RetrievableId]) -> Result<bool> {
        if ids.is_empty() {
            return Ok(false);
        }
        self.remove(ids).or_recover(&self.retrievables, "delete_all", || false)
    }

    fn connect(&self, relationship: &Relationship) -> Result<bool> {
        self.link(std::slice::from_ref(relationship))
            .or_recover(&self.relationships, "connect", || false)
    }

    fn connect_all(&self, relationships: &[Relationship]) -> Result<bool> {
        if relationships.is_empty() {
            return Ok(true);
        }
        self.link(relationships).or_recover(&self.relationships, "connect_all", || false)
    }

    fn disconnect(&self, relationship: &Relationship) -> Result<bool> {
        self.unlink(std::slice::from_ref(relationship))
            .or_recover(&self.relationships, "disconnect", || false)
    }

    fn disconnect_all(&self, relationships: &[Relationship]) -> Result<bool> {
        self.unlink(relationships)
            .or_recover(&self.relationships, "disconnect_all", || false)
    }
}

impl RetrievableReader for VectorDbRetrievables {
    fn get(&self, id: RetrievableId) -> Result<Option<Retrievable>> {
        let filter = Predicate::equals(RETRIEVABLE_ID, uuid_cell(id));
        self.select("get", Some(filter))?.next().transpose()
    }

    fn get_all_by_ids(&self, ids: &[RetrievableId]) -> Result<ResultStream<Retrievable>> {
        if ids.is_empty() {
            return Ok(empty());
        }
        self.select("get_all_by_ids", Some(ids_filter(RETRIEVABLE_ID, ids)))
    }

    fn get_all(&self) -> Result<ResultStream<Retrievable>> {
        self.select("get_all", None)
    }

    fn count(&self) -> Result<u64> {
        self.client
            .count(&self.retrievables)
            .or_recover(&self.retrievables, "count", || 0)
    }

    fn get_connections(
        &self,
        subjects: &[RetrievableId],
        predicates: &[String],
        objects: &[RetrievableId],
    ) -> Result<ResultStream<Relationship>> {
        let mut clauses = Vec::new();
        if !subjects.is_empty() {
            clauses.push(ids_filter(SUBJECT_ID, subjects));
        }
        if !predicates.is_empty() {
            let values = predicates.iter().cloned().map(Cell::String).collect();
            clauses.push(Predicate::one_of(PREDICATE, values));
        }
        if !objects.is_empty() {
            clauses.push(ids_filter(OBJECT_ID, objects));
        }
        let dql = Dql::scan(&self.relationships).filter(Predicate::And(clauses));
        let fetched = self.client.query(dql).map(Some);
        let Some(result) = fetched.or_recover(&self.relationships, "get_connections", || None)? else {
            return Ok(empty());
        };

        let rows = Rows::new(&self.relationships, &result);
        let (s, p, o) = (rows.position(SUBJECT_ID)?, rows.position(PREDICATE)?, rows.position(OBJECT_ID)?);
        let relationships = result
            .rows
            .iter()
            .map(|row| {
                Ok(Relationship::new(
                    rows.uuid(&row.cells, s)?,
                    rows.string(&row.cells, p)?.unwrap_or_default(),
                    rows.uuid(&row.cells, o)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(stream(relationships))
    }
}
