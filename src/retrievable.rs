use serde::{Deserialize, Serialize};

use crate::descriptor::Descriptor;
use crate::value::{DescriptorId, RetrievableId};

/// Attributes attached to a retrievable while it is being retrieved.
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievedAttribute {
    /// Distance of a proximity hit; lower is closer.
    Distance { descriptor_id: Option<DescriptorId>, distance: f64 },
    /// Relevance score of a full-text hit; higher is better.
    Score { descriptor_id: Option<DescriptorId>, score: f64 },
}

/// A node of the media object graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrievable {
    pub id: RetrievableId,
    pub retrievable_type: String,
    pub descriptors: Vec<Descriptor>,
    pub attributes: Vec<RetrievedAttribute>,
}

impl Retrievable {
    pub fn new(id: RetrievableId, retrievable_type: impl Into<String>) -> Self {
        Self {
            id,
            retrievable_type: retrievable_type.into(),
            descriptors: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Smallest distance attached to this retrievable, if any.
    pub fn distance(&self) -> Option<f64> {
        self.attributes
            .iter()
            .filter_map(|a| match a {
                RetrievedAttribute::Distance { distance, .. } => Some(*distance),
                _ => None,
            })
            .reduce(f64::min)
    }

    pub fn score(&self) -> Option<f64> {
        self.attributes
            .iter()
            .filter_map(|a| match a {
                RetrievedAttribute::Score { score, .. } => Some(*score),
                _ => None,
            })
            .reduce(f64::max)
    }
}

/// A directed, labelled edge between two retrievables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub subject: RetrievableId,
    pub predicate: String,
    pub object: RetrievableId,
}

impl Relationship {
    pub fn new(subject: RetrievableId, predicate: impl Into<String>, object: RetrievableId) -> Self {
        Self {
            subject,
            predicate: predicate.into(),
            object,
        }
    }

    /// Whether this edge passes a `get_connections` filter; empty filters match everything.
    pub fn matches(&self, subjects: &[RetrievableId], predicates: &[String], objects: &[RetrievableId]) -> bool {
        (subjects.is_empty() || subjects.contains(&self.subject))
            && (predicates.is_empty() || predicates.contains(&self.predicate))
            && (objects.is_empty() || objects.contains(&self.object))
    }
}
