use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::database::{empty, RetrievableInitializer, RetrievableReader, RetrievableWriter, ResultStream};
use crate::error::{Error, Recover, Result};
use crate::jsonl::file::{JsonlFile, Rewrite};
use crate::jsonl::record::{self, RetrievableRecord};
use crate::retrievable::{Relationship, Retrievable};
use crate::value::RetrievableId;

const RETRIEVABLES: &str = "retrievables";
const RELATIONSHIPS: &str = "relationships";

/// `retrievables.jsonl` (one `{"id", "type"}` per line) and `relationships.jsonl`
/// (one `{"subject", "predicate", "object"}` per line).
pub struct JsonlRetrievables {
    retrievables: Arc<JsonlFile>,
    relationships: Arc<JsonlFile>,
}

fn retrievable_id(line: &str) -> Option<RetrievableId> {
    record::parse::<RetrievableRecord>(RETRIEVABLES, 0, line).ok().map(|r| r.id)
}

fn relationship(line: &str) -> Option<Relationship> {
    record::parse(RELATIONSHIPS, 0, line).ok()
}

impl JsonlRetrievables {
    pub(crate) fn new(retrievables: Arc<JsonlFile>, relationships: Arc<JsonlFile>) -> Self {
        Self {
            retrievables,
            relationships,
        }
    }

    fn scan(&self) -> Result<Box<dyn Iterator<Item = Result<RetrievableRecord>> + Send>> {
        record::scan(&self.retrievables, RETRIEVABLES.to_string())
    }

    fn select(
        &self,
        operation: &str,
        keep: impl Fn(&RetrievableRecord) -> bool + Send + 'static,
    ) -> Result<ResultStream<Retrievable>> {
        let selected = self.scan().map(|records| -> ResultStream<Retrievable> {
            Box::new(records.filter_map(move |record| match record {
                Ok(record) if keep(&record) => Some(Ok(record.into_retrievable())),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            }))
        });
        selected.or_recover(RETRIEVABLES, operation, empty)
    }

    /// Type tags of the retrievables among `ids` that exist.
    pub(crate) fn types_of(&self, ids: &[RetrievableId]) -> Result<HashMap<RetrievableId, String>> {
        let wanted: HashSet<RetrievableId> = ids.iter().copied().collect();
        let mut types = HashMap::new();
        for record in self.scan()? {
            let record = record?;
            if wanted.contains(&record.id) {
                types.entry(record.id).or_insert(record.retrievable_type);
            }
        }
        Ok(types)
    }

    fn append(&self, items: &[Retrievable]) -> Result<bool> {
        let ids: HashSet<RetrievableId> = items.iter().map(|r| r.id).collect();
        if ids.len() != items.len() {
            return Ok(false);
        }
        let buffer = record::lines(items.iter().map(RetrievableRecord::from_retrievable))?;
        let appended = self
            .retrievables
            .append_unless(&buffer, |line| retrievable_id(line).map_or(false, |id| ids.contains(&id)))?;
        Ok(appended)
    }

    fn remove(&self, ids: &HashSet<RetrievableId>) -> Result<bool> {
        let removed = self.retrievables.rewrite(|line| match retrievable_id(line) {
            Some(id) if ids.contains(&id) => Rewrite::Drop,
            _ => Rewrite::Keep,
        })?;
        self.relationships.rewrite(|line| match relationship(line) {
            Some(r) if ids.contains(&r.subject) || ids.contains(&r.object) => Rewrite::Drop,
            _ => Rewrite::Keep,
        })?;
        Ok(removed > 0)
    }

    fn link(&self, relationships: &[Relationship]) -> Result<bool> {
        let batch: HashSet<&Relationship> = relationships.iter().collect();
        if batch.len() != relationships.len() {
            return Ok(false);
        }
        let buffer = record::lines(relationships)?;
        let appended = self
            .relationships
            .append_unless(&buffer, |line| relationship(line).map_or(false, |r| batch.contains(&r)))?;
        Ok(appended)
    }

    fn unlink(&self, relationships: &[Relationship]) -> Result<bool> {
        let batch: HashSet<&Relationship> = relationships.iter().collect();
        let removed = self.relationships.rewrite(|line| match relationship(line) {
            Some(r) if batch.contains(&r) => Rewrite::Drop,
            _ => Rewrite::Keep,
        })?;
        Ok(removed > 0)
    }
}

impl RetrievableInitializer for JsonlRetrievables {
    fn initialize(&self) -> Result<()> {
        let created = self
            .retrievables
            .create()
            .and_then(|_| self.relationships.create())
            .map_err(Error::from);
        created.or_recover(RETRIEVABLES, "initialize", || ())
    }

    fn deinitialize(&self) -> Result<()> {
        let removed = self
            .relationships
            .remove()
            .and_then(|_| self.retrievables.remove())
            .map_err(Error::from);
        removed.or_recover(RETRIEVABLES, "deinitialize", || ())
    }

    fn is_initialized(&self) -> Result<bool> {
        Ok(self.retrievables.exists() && self.relationships.exists())
    }

    fn truncate(&self) -> Result<()> {
        let truncated = self
            .relationships
            .truncate()
            .and_then(|_| self.retrievables.truncate())
            .map_err(Error::from);
        truncated.or_recover(RETRIEVABLES, "truncate", || ())
    }
}

impl RetrievableWriter for JsonlRetrievables {
    fn add(&self, item: &Retrievable) -> Result<bool> {
        self.append(std::slice::from_ref(item)).or_recover(RETRIEVABLES, "add", || false)
    }

    fn add_all(&self, items: &[Retrievable]) -> Result<bool> {
        if items.is_empty() {
            return Ok(true);
        }
        self.append(items).or_recover(RETRIEVABLES, "add_all", || false)
    }

    fn update(&self, item: &Retrievable) -> Result<bool> {
        let updated = serde_json::to_string(&RetrievableRecord::from_retrievable(item))
            .map_err(Error::from)
            .and_then(|replacement| {
                let changed = self.retrievables.rewrite(|line| match retrievable_id(line) {
                    Some(id) if id == item.id => Rewrite::Replace(replacement.clone()),
                    _ => Rewrite::Keep,
                })?;
                Ok(changed > 0)
            });
        updated.or_recover(RETRIEVABLES, "update", || false)
    }

    fn delete(&self, id: RetrievableId) -> Result<bool> {
        self.remove(&HashSet::from([id])).or_recover(RETRIEVABLES, "delete", || false)
    }

    fn delete_all(&self, ids: &[RetrievableId]) -> Result<bool> {
        let ids: HashSet<RetrievableId> = ids.iter().copied().collect();
        self.remove(&ids).or_recover(RETRIEVABLES, "delete_all", || false)
    }

    fn connect(&self, relationship: &Relationship) -> Result<bool> {
        self.link(std::slice::from_ref(relationship))
            .or_recover(RELATIONSHIPS, "connect", || false)
    }

    fn connect_all(&self, relationships: &[Relationship]) -> Result<bool> {
        if relationships.is_empty() {
            return Ok(true);
        }
        self.link(relationships).or_recover(RELATIONSHIPS, "connect_all", || false)
    }

    fn disconnect(&self, relationship: &Relationship) -> Result<bool> {
        self.unlink(std::slice::from_ref(relationship))
            .or_recover(RELATIONSHIPS, "disconnect", || false)
    }

    fn disconnect_all(&self, relationships: &[Relationship]) -> Result<bool> {
        self.unlink(relationships).or_recover(RELATIONSHIPS, "disconnect_all", || false)
    }
}

impl RetrievableReader for JsonlRetrievables {
    fn get(&self, id: RetrievableId) -> Result<Option<Retrievable>> {
        self.select("get", move |r| r.id == id)?.next().transpose()
    }

    fn get_all_by_ids(&self, ids: &[RetrievableId]) -> Result<ResultStream<Retrievable>> {
        let ids: HashSet<RetrievableId> = ids.iter().copied().collect();
        self.select("get_all_by_ids", move |r| ids.contains(&r.id))
    }

    fn get_all(&self) -> Result<ResultStream<Retrievable>> {
        self.select("get_all", |_| true)
    }

    fn count(&self) -> Result<u64> {
        let counted = self.retrievables.count().map_err(Error::from);
        counted.or_recover(RETRIEVABLES, "count", || 0)
    }

    fn get_connections(
        &self,
        subjects: &[RetrievableId],
        predicates: &[String],
        objects: &[RetrievableId],
    ) -> Result<ResultStream<Relationship>> {
        let (subjects, predicates, objects) = (subjects.to_vec(), predicates.to_vec(), objects.to_vec());
        let scanned = record::scan::<Relationship>(&self.relationships, RELATIONSHIPS.to_string()).map(
            |relationships| -> ResultStream<Relationship> {
                Box::new(relationships.filter(move |r| match r {
                    Ok(r) => r.matches(&subjects, &predicates, &objects),
                    Err(_) => true,
                }))
            },
        );
        scanned.or_recover(RELATIONSHIPS, "get_connections", empty)
    }
}
