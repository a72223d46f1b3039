//! Exact k-nearest-neighbour selection over brute-force scans.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;

use crate::query::SortOrder;

#[derive(Debug, Clone)]
struct Candidate<T> {
    dist: OrderedFloat<f64>,
    seq: usize,
    item: T,
}

impl<T> PartialEq for Candidate<T> {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist && self.seq == other.seq
    }
}

impl<T> Eq for Candidate<T> {}

// Max-heap on distance; later arrivals lose ties so scan order breaks them.
impl<T> Ord for Candidate<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist.cmp(&other.dist).then(self.seq.cmp(&other.seq))
    }
}

impl<T> PartialOrd for Candidate<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Keeps the `k` best items seen so far. "Best" is the smallest distance for
/// [`SortOrder::Asc`] and the largest for [`SortOrder::Desc`].
pub struct TopK<T> {
    k: usize,
    order: SortOrder,
    seq: usize,
    heap: BinaryHeap<Candidate<T>>,
}

impl<T> TopK<T> {
    pub fn new(k: usize, order: SortOrder) -> Self {
        Self {
            k,
            order,
            seq: 0,
            heap: BinaryHeap::with_capacity(k.min(4096) + 1),
        }
    }

    pub fn push(&mut self, distance: f64, item: T) {
        if self.k == 0 {
            return;
        }
        // NaN distances never make it into a result.
        if distance.is_nan() {
            return;
        }
        let key = match self.order {
            SortOrder::Asc => distance,
            SortOrder::Desc => -distance,
        };
        self.seq += 1;
        let candidate = Candidate {
            dist: OrderedFloat(key),
            seq: self.seq,
            item,
        };
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(worst) = self.heap.peek() {
            if candidate < *worst {
                self.heap.pop();
                self.heap.push(candidate);
            }
        }
    }

    /// Results in requested order paired with their true distances.
    pub fn into_sorted(self) -> Vec<(f64, T)> {
        let order = self.order;
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|c| {
                let d = match order {
                    SortOrder::Asc => c.dist.0,
                    SortOrder::Desc => -c.dist.0,
                };
                (d, c.item)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_k_smallest_in_order() {
        let mut top = TopK::new(3, SortOrder::Asc);
        for (d, name) in [(5.0, "e"), (1.0, "a"), (4.0, "d"), (2.0, "b"), (3.0, "c")] {
            top.push(d, name);
        }
        let got: Vec<_> = top.into_sorted().into_iter().map(|(_, n)| n).collect();
        assert_eq!(got, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_descending_keeps_largest() {
        let mut top = TopK::new(2, SortOrder::Desc);
        for (d, name) in [(5.0, "e"), (1.0, "a"), (4.0, "d")] {
            top.push(d, name);
        }
        let got = top.into_sorted();
        assert_eq!(got, vec![(5.0, "e"), (4.0, "d")]);
    }

    #[test]
    fn test_ties_follow_scan_order() {
        let mut top = TopK::new(2, SortOrder::Asc);
        for name in ["first", "second", "third"] {
            top.push(1.0, name);
        }
        let got: Vec<_> = top.into_sorted().into_iter().map(|(_, n)| n).collect();
        assert_eq!(got, vec!["first", "second"]);
    }

    #[test]
    fn test_k_larger_than_input_and_zero() {
        let mut top = TopK::new(10, SortOrder::Asc);
        top.push(0.5, 1);
        top.push(f64::NAN, 2);
        assert_eq!(top.into_sorted(), vec![(0.5, 1)]);

        let mut none = TopK::new(0, SortOrder::Asc);
        none.push(0.1, 1);
        assert!(none.into_sorted().is_empty());
    }
}
