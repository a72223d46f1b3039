use std::collections::{HashMap, HashSet};

use crate::descriptor::Descriptor;
use crate::error::Result;
use crate::query::Query;
use crate::retrievable::{Retrievable, RetrievedAttribute};
use crate::value::RetrievableId;

/// One query hit before its owner has been resolved.
#[derive(Debug, Clone)]
pub struct Hit {
    pub retrievable_id: RetrievableId,
    pub descriptor: Option<Descriptor>,
    pub attribute: Option<RetrievedAttribute>,
}

impl Hit {
    /// A hit carrying its descriptor. Transient descriptors have no owner and yield `None`.
    pub fn of(descriptor: Descriptor, attribute: Option<RetrievedAttribute>) -> Option<Hit> {
        Some(Hit {
            retrievable_id: descriptor.retrievable_id()?,
            descriptor: Some(descriptor),
            attribute,
        })
    }

    pub fn distinct_owners(hits: &[Hit]) -> Vec<RetrievableId> {
        let mut seen = HashSet::new();
        hits.iter()
            .map(|h| h.retrievable_id)
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

/// Whether joined retrievables carry the matched descriptor. Proximity hits only
/// do when the query asked for the vector.
pub fn keeps_descriptor(query: &Query) -> bool {
    match query {
        Query::Proximity(q) => q.fetch_vector,
        _ => true,
    }
}

/// Resolves hits onto retrievables with a single batched owner fetch.
///
/// `fetch` returns the type tag of every owner that still exists. Hits whose
/// owner is missing are dropped. Hits sharing an owner collapse into one
/// retrievable, positioned at the owner's first hit.
pub fn join_hits(
    hits: Vec<Hit>,
    fetch: impl FnOnce(&[RetrievableId]) -> Result<HashMap<RetrievableId, String>>,
) -> Result<Vec<Retrievable>> {
    if hits.is_empty() {
        return Ok(Vec::new());
    }
    let owners = Hit::distinct_owners(&hits);
    let types = fetch(&owners)?;

    let mut position: HashMap<RetrievableId, usize> = HashMap::new();
    let mut joined: Vec<Retrievable> = Vec::new();
    for hit in hits {
        let Some(retrievable_type) = types.get(&hit.retrievable_id) else {
            continue;
        };
        let slot = *position.entry(hit.retrievable_id).or_insert_with(|| {
            joined.push(Retrievable::new(hit.retrievable_id, retrievable_type.clone()));
            joined.len() - 1
        });
        let target = &mut joined[slot];
        if let Some(descriptor) = hit.descriptor {
            target.descriptors.push(descriptor);
        }
        if let Some(attribute) = hit.attribute {
            target.attributes.push(attribute);
        }
    }
    Ok(joined)
}
