use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::vectordb::engine::EngineError;
use crate::vectordb::filter::KeyFilter;
use crate::vectordb::fulltext::InvertedIndex;
use crate::vectordb::storage::{LogRecord, Segment, StoredRow};
use crate::vectordb::types::{Cell, ColumnType};

/// Rows per record when a segment is rewritten.
const COMPACTION_CHUNK: usize = 1024;

pub type Row = Vec<Option<Cell>>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable,
            primary_key: false,
        }
    }

    pub fn key(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            primary_key: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Scalar,
    Fulltext,
    Nns,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub column: String,
    pub kind: IndexKind,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EntityDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
            indexes: Vec::new(),
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize, EngineError> {
        self.column_index(name)
            .ok_or_else(|| EngineError::Invalid(format!("entity '{}' has no column '{name}'", self.name)))
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let valid_name = !self.name.is_empty()
            && self.name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
        if !valid_name {
            return Err(EngineError::Invalid(format!("illegal entity name '{}'", self.name)));
        }
        if self.columns.is_empty() {
            return Err(EngineError::Invalid(format!("entity '{}' declares no columns", self.name)));
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(EngineError::Invalid(format!(
                    "entity '{}' declares column '{}' twice",
                    self.name, column.name
                )));
            }
            if column.primary_key && column.nullable {
                return Err(EngineError::Invalid(format!("key column '{}' cannot be nullable", column.name)));
            }
        }
        for index in &self.indexes {
            self.check_index(index)?;
        }
        Ok(())
    }

    fn check_index(&self, index: &IndexDef) -> Result<(), EngineError> {
        let column = &self.columns[self.require_column(&index.column)?];
        let fits = match index.kind {
            IndexKind::Scalar => column.ty.dimensions().is_none(),
            IndexKind::Fulltext => column.ty == ColumnType::String,
            IndexKind::Nns => column.ty.dimensions().is_some(),
        };
        if !fits {
            return Err(EngineError::Invalid(format!(
                "{:?} index does not apply to column '{}' of type {:?}",
                index.kind, column.name, column.ty
            )));
        }
        Ok(())
    }

    /// Arity, types and nullability of one row.
    pub fn check_row(&self, row: &[Option<Cell>]) -> Result<(), EngineError> {
        if row.len() != self.columns.len() {
            return Err(EngineError::Invalid(format!(
                "entity '{}' expects {} cells, got {}",
                self.name,
                self.columns.len(),
                row.len()
            )));
        }
        for (column, cell) in self.columns.iter().zip(row) {
            self.check_cell(column, cell.as_ref())?;
        }
        Ok(())
    }

    pub fn check_cell(&self, column: &ColumnDef, cell: Option<&Cell>) -> Result<(), EngineError> {
        match cell {
            None if column.nullable => Ok(()),
            None => Err(EngineError::Invalid(format!("column '{}' is not nullable", column.name))),
            Some(cell) if column.ty.accepts(cell) => Ok(()),
            Some(cell) => Err(EngineError::Invalid(format!(
                "column '{}' of type {:?} cannot hold a {} cell",
                column.name,
                column.ty,
                cell.kind()
            ))),
        }
    }

    fn key_columns(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect()
    }
}

/// In-memory image of an entity, rebuilt from its segment on open.
#[derive(Debug)]
pub struct Table {
    def: EntityDef,
    key_columns: Vec<usize>,
    rows: BTreeMap<u64, Row>,
    keys: HashMap<Vec<u8>, u64>,
    bloom: KeyFilter,
    fulltext: HashMap<usize, InvertedIndex>,
    next_seq: u64,
}

impl Table {
    fn new(def: EntityDef) -> Self {
        let fulltext = def
            .indexes
            .iter()
            .filter(|i| i.kind == IndexKind::Fulltext)
            .filter_map(|i| def.column_index(&i.column))
            .map(|column| (column, InvertedIndex::new()))
            .collect();
        Self {
            key_columns: def.key_columns(),
            def,
            rows: BTreeMap::new(),
            keys: HashMap::new(),
            bloom: KeyFilter::with_headroom(0),
            fulltext,
            next_seq: 0,
        }
    }

    pub fn def(&self) -> &EntityDef {
        &self.def
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Live rows in insertion order.
    pub fn rows(&self) -> impl Iterator<Item = (u64, &Row)> {
        self.rows.iter().map(|(seq, row)| (*seq, row))
    }

    pub fn row(&self, seq: u64) -> Option<&Row> {
        self.rows.get(&seq)
    }

    pub fn fulltext(&self, column: usize) -> Option<&InvertedIndex> {
        self.fulltext.get(&column)
    }

    /// Sequence number of the row holding `key`, consulting the bloom filter first.
    pub fn lookup(&self, key: &[u8]) -> Option<u64> {
        if !self.bloom.contains(key) {
            return None;
        }
        self.keys.get(key).copied()
    }

    fn key_of(&self, row: &[Option<Cell>]) -> Result<Option<Vec<u8>>, EngineError> {
        if self.key_columns.is_empty() {
            return Ok(None);
        }
        let cells: Vec<&Option<Cell>> = self.key_columns.iter().map(|i| &row[*i]).collect();
        Ok(Some(serde_json::to_vec(&cells)?))
    }

    fn put(&mut self, seq: u64, row: Row) -> Result<(), EngineError> {
        self.take(seq);
        if let Some(key) = self.key_of(&row)? {
            self.bloom.insert(&key);
            self.keys.insert(key, seq);
        }
        for (column, index) in self.fulltext.iter_mut() {
            if let Some(text) = row[*column].as_ref().and_then(Cell::as_str) {
                index.insert(seq, text);
            }
        }
        self.rows.insert(seq, row);
        self.next_seq = self.next_seq.max(seq + 1);
        Ok(())
    }

    fn take(&mut self, seq: u64) -> Option<Row> {
        let row = self.rows.remove(&seq)?;
        if let Ok(Some(key)) = self.key_of(&row) {
            self.keys.remove(&key);
        }
        for (column, index) in self.fulltext.iter_mut() {
            if let Some(text) = row[*column].as_ref().and_then(Cell::as_str) {
                index.remove(seq, text);
            }
        }
        Some(row)
    }

    fn clear(&mut self) {
        self.rows.clear();
        self.keys.clear();
        self.bloom = KeyFilter::with_headroom(0);
        self.fulltext.values_mut().for_each(InvertedIndex::clear);
    }

    fn apply(&mut self, record: LogRecord) -> Result<(), EngineError> {
        match record {
            LogRecord::Upsert(rows) => {
                for row in rows {
                    self.put(row.seq, row.cells)?;
                }
            }
            LogRecord::Delete(seqs) => {
                for seq in seqs {
                    self.take(seq);
                }
            }
            LogRecord::Truncate => self.clear(),
        }
        Ok(())
    }

    fn rebuild_bloom(&mut self) {
        let mut bloom = KeyFilter::with_headroom(self.keys.len());
        for key in self.keys.keys() {
            bloom.insert(key);
        }
        self.bloom = bloom;
    }
}

/// One stored entity. Writers serialize on the segment lock and validate the
/// whole batch before anything reaches the log.
#[derive(Debug)]
pub struct Entity {
    segment: Mutex<Segment>,
    table: RwLock<Table>,
}

impl Entity {
    pub fn open(def: EntityDef, path: &Path, strict: bool) -> Result<Self, EngineError> {
        def.validate()?;
        let mut table = Table::new(def);
        let records = Segment::replay(path)?;
        let replayed = records.len();
        for record in records {
            table.apply(record)?;
        }
        table.rebuild_bloom();
        debug!(entity = %table.def.name, records = replayed, rows = table.len(), "replayed segment");
        Ok(Self {
            segment: Mutex::new(Segment::open(path, strict)?),
            table: RwLock::new(table),
        })
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.table.read()
    }

    pub fn def(&self) -> EntityDef {
        self.table.read().def.clone()
    }

    pub fn count(&self) -> usize {
        self.table.read().len()
    }

    pub fn segment_len(&self) -> u64 {
        self.segment.lock().len()
    }

    /// Inserts every row or none. A key already stored, or repeated within the
    /// batch, fails the whole batch.
    pub fn insert(&self, rows: Vec<Row>) -> Result<usize, EngineError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut segment = self.segment.lock();
        let mut table = self.table.write();

        let mut batch_keys = HashSet::new();
        for row in &rows {
            table.def.check_row(row)?;
            if let Some(key) = table.key_of(row)? {
                if table.lookup(&key).is_some() || !batch_keys.insert(key) {
                    return Err(EngineError::DuplicateKey(table.def.name.clone()));
                }
            }
        }

        let first = table.next_seq;
        let stored: Vec<StoredRow> = rows
            .into_iter()
            .enumerate()
            .map(|(i, cells)| StoredRow {
                seq: first + i as u64,
                cells,
            })
            .collect();
        let inserted = stored.len();
        segment.append(&LogRecord::Upsert(stored.clone()))?;
        table.apply(LogRecord::Upsert(stored))?;
        if table.bloom.is_saturated() {
            table.rebuild_bloom();
        }
        Ok(inserted)
    }

    /// Applies `assignments` to every row `matches` accepts. Key columns cannot
    /// be assigned.
    pub fn update(
        &self,
        matches: impl Fn(&[Option<Cell>]) -> bool,
        assignments: &[(usize, Option<Cell>)],
    ) -> Result<usize, EngineError> {
        let mut segment = self.segment.lock();
        let mut table = self.table.write();
        for (column, cell) in assignments {
            let def = table.def.columns.get(*column).ok_or_else(|| {
                EngineError::Invalid(format!("entity '{}' has no column #{column}", table.def.name))
            })?;
            if def.primary_key {
                return Err(EngineError::Invalid(format!("key column '{}' cannot be updated", def.name)));
            }
            table.def.check_cell(def, cell.as_ref())?;
        }

        let updated: Vec<StoredRow> = table
            .rows()
            .filter(|(_, row)| matches(row))
            .map(|(seq, row)| {
                let mut cells = row.clone();
                for (column, cell) in assignments {
                    cells[*column] = cell.clone();
                }
                StoredRow { seq, cells }
            })
            .collect();
        if updated.is_empty() {
            return Ok(0);
        }
        let count = updated.len();
        segment.append(&LogRecord::Upsert(updated.clone()))?;
        table.apply(LogRecord::Upsert(updated))?;
        Ok(count)
    }

    pub fn delete(&self, matches: impl Fn(&[Option<Cell>]) -> bool) -> Result<usize, EngineError> {
        let mut segment = self.segment.lock();
        let mut table = self.table.write();
        let doomed: Vec<u64> = table.rows().filter(|(_, row)| matches(row)).map(|(seq, _)| seq).collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        let count = doomed.len();
        segment.append(&LogRecord::Delete(doomed.clone()))?;
        table.apply(LogRecord::Delete(doomed))?;
        Ok(count)
    }

    pub fn truncate(&self) -> Result<(), EngineError> {
        let mut segment = self.segment.lock();
        let mut table = self.table.write();
        segment.append(&LogRecord::Truncate)?;
        table.apply(LogRecord::Truncate)
    }

    /// Adds an index to the definition. Returns `false` when it already exists.
    pub fn add_index(&self, index: IndexDef) -> Result<bool, EngineError> {
        let mut table = self.table.write();
        if table.def.indexes.contains(&index) {
            return Ok(false);
        }
        table.def.check_index(&index)?;
        if index.kind == IndexKind::Fulltext {
            let column = table.def.require_column(&index.column)?;
            let mut inverted = InvertedIndex::new();
            for (seq, row) in table.rows() {
                if let Some(text) = row[column].as_ref().and_then(Cell::as_str) {
                    inverted.insert(seq, text);
                }
            }
            table.fulltext.insert(column, inverted);
        }
        table.def.indexes.push(index);
        Ok(true)
    }

    /// Rewrites the segment with only the live rows. Returns the segment size
    /// before and after.
    pub fn compact(&self) -> Result<(u64, u64), EngineError> {
        let mut segment = self.segment.lock();
        let mut table = self.table.write();
        let before = segment.len();

        let live: Vec<StoredRow> = table
            .rows()
            .map(|(seq, row)| StoredRow {
                seq,
                cells: row.clone(),
            })
            .collect();
        let records: Vec<LogRecord> = live
            .chunks(COMPACTION_CHUNK)
            .map(|chunk| LogRecord::Upsert(chunk.to_vec()))
            .collect();
        segment.rewrite(&records)?;
        table.rebuild_bloom();

        let after = segment.len();
        info!(entity = %table.def.name, rows = live.len(), before, after, "compacted segment");
        Ok((before, after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn def() -> EntityDef {
        EntityDef::new(
            "media.descriptor_caption",
            vec![
                ColumnDef::key("descriptorid", ColumnType::Uuid),
                ColumnDef::new("retrievableid", ColumnType::Uuid, false),
                ColumnDef::new("value", ColumnType::String, true),
            ],
        )
    }

    fn row(id: u128, text: Option<&str>) -> Row {
        vec![Some(Cell::Uuid(id)), Some(Cell::Uuid(id + 100)), text.map(|t| Cell::String(t.into()))]
    }

    #[test]
    fn test_definition_validation() {
        assert!(def().validate().is_ok());
        let mut bad = def();
        bad.name = "media/../escape".into();
        assert!(bad.validate().is_err());

        let mut dup = def();
        dup.columns.push(ColumnDef::new("value", ColumnType::Int, true));
        assert!(dup.validate().is_err());

        let mut index = def();
        index.indexes.push(IndexDef {
            column: "retrievableid".into(),
            kind: IndexKind::Fulltext,
        });
        assert!(index.validate().is_err());
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let dir = TempDir::new().unwrap();
        let entity = Entity::open(def(), &dir.path().join("e.seg"), false).unwrap();
        assert_eq!(entity.insert(vec![row(1, Some("a")), row(2, None)]).unwrap(), 2);

        let clash = entity.insert(vec![row(3, Some("c")), row(1, Some("again"))]);
        assert!(matches!(clash, Err(EngineError::DuplicateKey(_))));
        let repeated = entity.insert(vec![row(4, None), row(4, None)]);
        assert!(matches!(repeated, Err(EngineError::DuplicateKey(_))));
        let wrong = entity.insert(vec![row(5, None), vec![Some(Cell::Uuid(6)), None, None]]);
        assert!(matches!(wrong, Err(EngineError::Invalid(_))));

        assert_eq!(entity.count(), 2);
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("e.seg");
        {
            let entity = Entity::open(def(), &path, true).unwrap();
            entity.insert(vec![row(1, Some("a")), row(2, Some("b")), row(3, Some("c"))]).unwrap();
            entity.delete(|r| r[0] == Some(Cell::Uuid(2))).unwrap();
            entity.update(|r| r[0] == Some(Cell::Uuid(3)), &[(2, Some(Cell::String("z".into())))]).unwrap();
        }
        let entity = Entity::open(def(), &path, true).unwrap();
        let table = entity.read();
        let values: Vec<_> = table.rows().map(|(_, r)| r[2].clone()).collect();
        assert_eq!(values, vec![Some(Cell::String("a".into())), Some(Cell::String("z".into()))]);
        let key = serde_json::to_vec(&vec![&Some(Cell::Uuid(2))]).unwrap();
        assert!(table.lookup(&key).is_none());
    }

    #[test]
    fn test_key_columns_are_immutable() {
        let dir = TempDir::new().unwrap();
        let entity = Entity::open(def(), &dir.path().join("e.seg"), false).unwrap();
        entity.insert(vec![row(1, None)]).unwrap();
        let moved = entity.update(|_| true, &[(0, Some(Cell::Uuid(9)))]);
        assert!(matches!(moved, Err(EngineError::Invalid(_))));
    }

    #[test]
    fn test_fulltext_index_tracks_rows() {
        let dir = TempDir::new().unwrap();
        let entity = Entity::open(def(), &dir.path().join("e.seg"), false).unwrap();
        entity.insert(vec![row(1, Some("red sky")), row(2, Some("blue sea"))]).unwrap();
        let index = IndexDef {
            column: "value".into(),
            kind: IndexKind::Fulltext,
        };
        assert!(entity.add_index(index.clone()).unwrap());
        assert!(!entity.add_index(index).unwrap());

        entity.insert(vec![row(3, Some("red sea"))]).unwrap();
        entity.delete(|r| r[0] == Some(Cell::Uuid(1))).unwrap();

        let table = entity.read();
        let clauses = crate::vectordb::fulltext::parse_expression("red").unwrap();
        let hits = table.fulltext(2).unwrap().search(&clauses);
        assert_eq!(hits.len(), 1);
        assert_eq!(table.row(hits[0].0).unwrap()[0], Some(Cell::Uuid(3)));
    }

    #[test]
    fn test_compaction_keeps_live_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("e.seg");
        let entity = Entity::open(def(), &path, false).unwrap();
        for i in 0..50 {
            entity.insert(vec![row(i, Some("x"))]).unwrap();
        }
        entity.delete(|r| matches!(r[0], Some(Cell::Uuid(id)) if id % 2 == 0)).unwrap();

        let (before, after) = entity.compact().unwrap();
        assert!(after < before);
        assert_eq!(entity.count(), 25);
        entity.insert(vec![row(100, None)]).unwrap();
        drop(entity);

        let reopened = Entity::open(def(), &path, false).unwrap();
        assert_eq!(reopened.count(), 26);
    }
}
