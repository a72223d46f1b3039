use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::index::TopK;
use crate::vectordb::dql::{Dql, Predicate, ResultRow, ResultSet};
use crate::vectordb::entity::{Entity, EntityDef, IndexDef, Row};
use crate::vectordb::fulltext::parse_expression;
use crate::vectordb::protocol::{Reply, Request};
use crate::vectordb::types::Cell;

const CATALOG_FILE: &str = "catalog.json";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no such entity '{0}'")]
    NoSuchEntity(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("duplicate key in '{0}'")]
    DuplicateKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The embedded vector database: a catalog of entities under one directory,
/// each backed by its own segment log.
pub struct Engine {
    root: PathBuf,
    strict: bool,
    entities: RwLock<BTreeMap<String, Arc<Entity>>>,
    catalog: Mutex<()>,
}

impl Engine {
    pub fn open(root: impl AsRef<Path>, strict_durability: bool) -> Result<Self, EngineError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let defs: Vec<EntityDef> = match fs::read(root.join(CATALOG_FILE)) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut entities = BTreeMap::new();
        for def in defs {
            let path = segment_path(&root, &def.name);
            let name = def.name.clone();
            entities.insert(name, Arc::new(Entity::open(def, &path, strict_durability)?));
        }
        info!(root = %root.display(), entities = entities.len(), strict_durability, "engine opened");
        Ok(Self {
            root,
            strict: strict_durability,
            entities: RwLock::new(entities),
            catalog: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn persist_catalog(&self, entities: &BTreeMap<String, Arc<Entity>>) -> Result<(), EngineError> {
        let _guard = self.catalog.lock();
        let defs: Vec<EntityDef> = entities.values().map(|e| e.def()).collect();
        let tmp = self.root.join(format!("{CATALOG_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(&defs)?)?;
        fs::rename(&tmp, self.root.join(CATALOG_FILE))?;
        Ok(())
    }

    pub fn entity(&self, name: &str) -> Result<Arc<Entity>, EngineError> {
        self.entities
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::NoSuchEntity(name.to_string()))
    }

    /// Returns `false` when an entity of that name already exists.
    pub fn create_entity(&self, def: EntityDef) -> Result<bool, EngineError> {
        def.validate()?;
        let mut entities = self.entities.write();
        if entities.contains_key(&def.name) {
            return Ok(false);
        }
        let path = segment_path(&self.root, &def.name);
        if path.exists() {
            warn!(entity = %def.name, "discarding orphaned segment");
            fs::remove_file(&path)?;
        }
        let name = def.name.clone();
        entities.insert(name.clone(), Arc::new(Entity::open(def, &path, self.strict)?));
        self.persist_catalog(&entities)?;
        info!(entity = %name, "entity created");
        Ok(true)
    }

    pub fn drop_entity(&self, name: &str) -> Result<bool, EngineError> {
        let mut entities = self.entities.write();
        if entities.remove(name).is_none() {
            return Ok(false);
        }
        self.persist_catalog(&entities)?;
        match fs::remove_file(segment_path(&self.root, name)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(entity = %name, "entity dropped");
        Ok(true)
    }

    pub fn has_entity(&self, name: &str) -> bool {
        self.entities.read().contains_key(name)
    }

    pub fn list_entities(&self) -> Vec<String> {
        self.entities.read().keys().cloned().collect()
    }

    pub fn truncate(&self, name: &str) -> Result<(), EngineError> {
        self.entity(name)?.truncate()
    }

    pub fn create_index(&self, name: &str, index: IndexDef) -> Result<bool, EngineError> {
        let entities = self.entities.read();
        let entity = entities.get(name).ok_or_else(|| EngineError::NoSuchEntity(name.to_string()))?;
        let created = entity.add_index(index)?;
        if created {
            self.persist_catalog(&entities)?;
        }
        Ok(created)
    }

    /// Inserts the batch unless one of its keys is already taken, in which case
    /// nothing is written and the count is zero.
    pub fn insert(&self, name: &str, rows: Vec<Row>) -> Result<usize, EngineError> {
        match self.entity(name)?.insert(rows) {
            Err(EngineError::DuplicateKey(entity)) => {
                debug!(entity = %entity, "insert skipped on duplicate key");
                Ok(0)
            }
            other => other,
        }
    }

    pub fn update(
        &self,
        name: &str,
        filter: Option<&Predicate>,
        assignments: &[(String, Option<Cell>)],
    ) -> Result<usize, EngineError> {
        let entity = self.entity(name)?;
        let def = entity.def();
        let filter = filter.map(|p| p.bind(&def)).transpose()?;
        let assignments = assignments
            .iter()
            .map(|(column, cell)| Ok((def.require_column(column)?, cell.clone())))
            .collect::<Result<Vec<_>, EngineError>>()?;
        entity.update(|row| filter.as_ref().map_or(true, |f| f.matches(row)), &assignments)
    }

    pub fn delete(&self, name: &str, filter: Option<&Predicate>) -> Result<usize, EngineError> {
        let entity = self.entity(name)?;
        let filter = filter.map(|p| p.bind(&entity.def())).transpose()?;
        entity.delete(|row| filter.as_ref().map_or(true, |f| f.matches(row)))
    }

    pub fn count(&self, name: &str) -> Result<usize, EngineError> {
        Ok(self.entity(name)?.count())
    }

    pub fn query(&self, dql: &Dql) -> Result<ResultSet, EngineError> {
        let entity = self.entity(&dql.entity)?;
        let table = entity.read();
        let def = table.def();
        dql.check(def)?;

        let filter = dql.filter.as_ref().map(|p| p.bind(def)).transpose()?;
        let projection: Vec<usize> = match &dql.projection {
            Some(columns) => columns.iter().map(|c| def.require_column(c)).collect::<Result<_, _>>()?,
            None => (0..def.columns.len()).collect(),
        };
        let keep = |row: &Row| filter.as_ref().map_or(true, |f| f.matches(row));
        let project = |row: &Row| projection.iter().map(|i| row[*i].clone()).collect::<Vec<_>>();
        let limit = dql.limit.unwrap_or(usize::MAX);

        let rows: Vec<ResultRow> = if let Some(knn) = &dql.knn {
            let column = def.require_column(&knn.column)?;
            let mut top = TopK::new(knn.k, knn.order);
            for (seq, row) in table.rows() {
                if !keep(row) {
                    continue;
                }
                if let Some(distance) = row[column].as_ref().and_then(|c| c.distance(&knn.query, knn.distance)) {
                    top.push(distance, seq);
                }
            }
            top.into_sorted()
                .into_iter()
                .take(limit)
                .filter_map(|(distance, seq)| {
                    table.row(seq).map(|row| ResultRow {
                        cells: project(row),
                        distance: Some(distance),
                        score: None,
                    })
                })
                .collect()
        } else if let Some(fulltext) = &dql.fulltext {
            let column = def.require_column(&fulltext.column)?;
            let clauses = parse_expression(&fulltext.expression).map_err(EngineError::Invalid)?;
            let index = table.fulltext(column).ok_or_else(|| {
                EngineError::Invalid(format!("column '{}' has no full-text index", fulltext.column))
            })?;
            index
                .search(&clauses)
                .into_iter()
                .filter_map(|(seq, score)| table.row(seq).filter(|row| keep(row)).map(|row| (row, score)))
                .take(limit)
                .map(|(row, score)| ResultRow {
                    cells: project(row),
                    distance: None,
                    score: Some(score),
                })
                .collect()
        } else {
            table
                .rows()
                .filter(|(_, row)| keep(row))
                .take(limit)
                .map(|(_, row)| ResultRow {
                    cells: project(row),
                    distance: None,
                    score: None,
                })
                .collect()
        };

        Ok(ResultSet {
            columns: projection.iter().map(|i| def.columns[*i].name.clone()).collect(),
            rows,
        })
    }

    /// Compacts every entity with a non-empty segment. Returns how many were compacted.
    pub fn compact_all(&self) -> Result<usize, EngineError> {
        let entities: Vec<Arc<Entity>> = self.entities.read().values().cloned().collect();
        let mut compacted = 0;
        for entity in entities {
            if entity.segment_len() == 0 {
                continue;
            }
            entity.compact()?;
            compacted += 1;
        }
        Ok(compacted)
    }

    pub fn execute(&self, request: Request) -> Result<Reply, EngineError> {
        Ok(match request {
            Request::Ping => Reply::Done,
            Request::CreateEntity(def) => Reply::Flag(self.create_entity(def)?),
            Request::DropEntity(name) => Reply::Flag(self.drop_entity(&name)?),
            Request::HasEntity(name) => Reply::Flag(self.has_entity(&name)),
            Request::ListEntities => Reply::Names(self.list_entities()),
            Request::Truncate(name) => {
                self.truncate(&name)?;
                Reply::Done
            }
            Request::CreateIndex { entity, index } => Reply::Flag(self.create_index(&entity, index)?),
            Request::Insert { entity, rows } => Reply::Count(self.insert(&entity, rows)? as u64),
            Request::Update {
                entity,
                filter,
                assignments,
            } => Reply::Count(self.update(&entity, filter.as_ref(), &assignments)? as u64),
            Request::Delete { entity, filter } => Reply::Count(self.delete(&entity, filter.as_ref())? as u64),
            Request::Count(entity) => Reply::Count(self.count(&entity)? as u64),
            Request::Query(dql) => Reply::Rows(self.query(&dql)?),
            Request::Compact => Reply::Count(self.compact_all()? as u64),
        })
    }
}

fn segment_path(root: &Path, entity: &str) -> PathBuf {
    root.join(format!("{entity}.seg"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SortOrder;
    use crate::vector::Distance;
    use crate::vectordb::dql::Knn;
    use crate::vectordb::entity::{ColumnDef, IndexKind};
    use crate::vectordb::types::ColumnType;
    use tempfile::TempDir;

    fn clip() -> EntityDef {
        EntityDef::new(
            "media.descriptor_clip",
            vec![
                ColumnDef::key("descriptorid", ColumnType::Uuid),
                ColumnDef::new("retrievableid", ColumnType::Uuid, false),
                ColumnDef::new("vector", ColumnType::FloatVector(3), false),
            ],
        )
    }

    fn vector_row(id: u128, v: [f32; 3]) -> Row {
        vec![Some(Cell::Uuid(id)), Some(Cell::Uuid(id + 1000)), Some(Cell::FloatVector(v.to_vec()))]
    }

    #[test]
    fn test_catalog_survives_restart() {
        let dir = TempDir::new().unwrap();
        {
            let engine = Engine::open(dir.path(), false).unwrap();
            assert!(engine.create_entity(clip()).unwrap());
            assert!(!engine.create_entity(clip()).unwrap());
            engine.insert("media.descriptor_clip", vec![vector_row(1, [1.0, 0.0, 0.0])]).unwrap();
        }
        let engine = Engine::open(dir.path(), false).unwrap();
        assert_eq!(engine.list_entities(), vec!["media.descriptor_clip".to_string()]);
        assert_eq!(engine.count("media.descriptor_clip").unwrap(), 1);

        assert!(engine.drop_entity("media.descriptor_clip").unwrap());
        assert!(!engine.drop_entity("media.descriptor_clip").unwrap());
        assert!(matches!(engine.count("media.descriptor_clip"), Err(EngineError::NoSuchEntity(_))));
    }

    #[test]
    fn test_knn_returns_exact_distances_in_order() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), false).unwrap();
        engine.create_entity(clip()).unwrap();
        engine
            .insert(
                "media.descriptor_clip",
                vec![
                    vector_row(1, [1.0, 0.0, 0.0]),
                    vector_row(2, [0.0, 1.0, 0.0]),
                    vector_row(3, [0.0, 0.0, 0.0]),
                ],
            )
            .unwrap();

        let dql = Dql::scan("media.descriptor_clip").select(&["descriptorid"]).knn(Knn {
            column: "vector".into(),
            query: Cell::FloatVector(vec![1.0, 0.0, 0.0]),
            distance: Distance::Euclidean,
            k: 3,
            order: SortOrder::Asc,
        });
        let result = engine.query(&dql).unwrap();
        assert_eq!(result.columns, vec!["descriptorid".to_string()]);
        let ids: Vec<_> = result.rows.iter().map(|r| r.cells[0].clone()).collect();
        assert_eq!(ids, vec![Some(Cell::Uuid(1)), Some(Cell::Uuid(3)), Some(Cell::Uuid(2))]);
        let distances: Vec<f64> = result.rows.iter().filter_map(|r| r.distance).collect();
        assert_eq!(distances[0], 0.0);
        assert!((distances[1] - 1.0).abs() < 1e-9);
        assert!((distances[2] - 2f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_update_delete_and_filtered_scan() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), false).unwrap();
        engine.create_entity(clip()).unwrap();
        engine
            .insert("media.descriptor_clip", (1..=4).map(|i| vector_row(i, [i as f32, 0.0, 0.0])).collect())
            .unwrap();

        let first = Predicate::equals("descriptorid", Cell::Uuid(1));
        let moved = engine
            .update(
                "media.descriptor_clip",
                Some(&first),
                &[("vector".to_string(), Some(Cell::FloatVector(vec![9.0, 9.0, 9.0])))],
            )
            .unwrap();
        assert_eq!(moved, 1);

        let gone = Predicate::one_of("descriptorid", vec![Cell::Uuid(2), Cell::Uuid(3), Cell::Uuid(77)]);
        assert_eq!(engine.delete("media.descriptor_clip", Some(&gone)).unwrap(), 2);

        let result = engine.query(&Dql::scan("media.descriptor_clip").filter(first)).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.rows[0].cells[2], Some(Cell::FloatVector(vec![9.0, 9.0, 9.0])));
        assert_eq!(engine.query(&Dql::scan("media.descriptor_clip").limit(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_keys_insert_nothing() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), false).unwrap();
        engine.create_entity(clip()).unwrap();
        engine.insert("media.descriptor_clip", vec![vector_row(1, [1.0, 0.0, 0.0])]).unwrap();

        let clash = vec![vector_row(2, [0.0, 1.0, 0.0]), vector_row(1, [0.0, 0.0, 1.0])];
        assert_eq!(engine.insert("media.descriptor_clip", clash).unwrap(), 0);
        assert_eq!(engine.count("media.descriptor_clip").unwrap(), 1);
    }

    #[test]
    fn test_fulltext_requires_index() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), false).unwrap();
        let def = EntityDef::new(
            "media.descriptor_caption",
            vec![
                ColumnDef::key("descriptorid", ColumnType::Uuid),
                ColumnDef::new("value", ColumnType::String, false),
            ],
        );
        engine.create_entity(def).unwrap();
        let rows = ["a red sunset", "a blue sea", "red sea at sunset"]
            .iter()
            .enumerate()
            .map(|(i, text)| vec![Some(Cell::Uuid(i as u128)), Some(Cell::String(text.to_string()))])
            .collect();
        engine.insert("media.descriptor_caption", rows).unwrap();

        let dql = Dql::scan("media.descriptor_caption").fulltext("value", "red -sea");
        assert!(matches!(engine.query(&dql), Err(EngineError::Invalid(_))));

        let index = IndexDef {
            column: "value".into(),
            kind: IndexKind::Fulltext,
        };
        assert!(engine.create_index("media.descriptor_caption", index).unwrap());
        let result = engine.query(&dql).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.rows[0].cells[0], Some(Cell::Uuid(0)));
        assert!(result.rows[0].score.is_some());

        drop(engine);
        let reopened = Engine::open(dir.path(), false).unwrap();
        assert_eq!(reopened.query(&dql).unwrap().len(), 1);
    }

    #[test]
    fn test_execute_dispatches_requests() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), false).unwrap();
        assert_eq!(engine.execute(Request::Ping).unwrap(), Reply::Done);
        assert_eq!(engine.execute(Request::CreateEntity(clip())).unwrap(), Reply::Flag(true));
        assert_eq!(
            engine.execute(Request::HasEntity("media.descriptor_clip".into())).unwrap(),
            Reply::Flag(true)
        );
        let insert = Request::Insert {
            entity: "media.descriptor_clip".into(),
            rows: vec![vector_row(5, [0.0, 0.0, 1.0])],
        };
        assert_eq!(engine.execute(insert).unwrap(), Reply::Count(1));
        assert_eq!(engine.execute(Request::Compact).unwrap(), Reply::Count(1));
        assert!(matches!(
            engine.execute(Request::Count("media.missing".into())),
            Err(EngineError::NoSuchEntity(_))
        ));
    }
}
