use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::DistanceMetric;

/// A search hit: smaller distance is closer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: String,
    pub distance: f32,
}

/// Heap entry ordered by distance, ties broken by id, so the heap top is the worst hit.
struct Candidate<'a> {
    distance: f32,
    id: &'a str,
}

impl PartialEq for Candidate<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate<'_> {}

impl PartialOrd for Candidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(other.id))
    }
}

/// Exact top-k over `items`, keeping a bounded max-heap of size `k`.
/// Results are sorted ascending by distance.
pub fn exact_top_k<'a, I>(metric: DistanceMetric, query: &[f32], items: I, k: usize) -> Vec<Neighbor>
where
    I: IntoIterator<Item = (&'a str, &'a [f32])>,
{
    if k == 0 {
        return Vec::new();
    }

    let mut heap: BinaryHeap<Candidate<'a>> = BinaryHeap::with_capacity(k + 1);
    for (id, vector) in items {
        let candidate = Candidate {
            distance: metric.distance(query, vector),
            id,
        };
        if heap.len() < k {
            heap.push(candidate);
        } else if heap.peek().is_some_and(|worst| candidate < *worst) {
            heap.pop();
            heap.push(candidate);
        }
    }

    heap.into_sorted_vec()
        .into_iter()
        .map(|c| Neighbor {
            id: c.id.to_string(),
            distance: c.distance,
        })
        .collect()
}

/// Every item within `radius` of the query, sorted ascending by distance.
pub fn within_radius<'a, I>(metric: DistanceMetric, query: &[f32], items: I, radius: f32) -> Vec<Neighbor>
where
    I: IntoIterator<Item = (&'a str, &'a [f32])>,
{
    let mut hits: Vec<Candidate<'a>> = items
        .into_iter()
        .map(|(id, vector)| Candidate {
            distance: metric.distance(query, vector),
            id,
        })
        .filter(|c| c.distance <= radius)
        .collect();
    hits.sort();
    hits.into_iter()
        .map(|c| Neighbor {
            id: c.id.to_string(),
            distance: c.distance,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<(String, Vec<f32>)> {
        vec![
            ("a".to_string(), vec![1.0, 0.0]),
            ("b".to_string(), vec![0.0, 1.0]),
            ("c".to_string(), vec![0.8, 0.6]),
            ("d".to_string(), vec![-1.0, 0.0]),
        ]
    }

    #[test]
    fn top_k_is_sorted_and_bounded() {
        let data = items();
        let hits = exact_top_k(
            DistanceMetric::Cosine,
            &[1.0, 0.0],
            data.iter().map(|(id, v)| (id.as_str(), v.as_slice())),
            2,
        );
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[test]
    fn ties_break_by_id() {
        let data = vec![("z".to_string(), vec![1.0, 0.0]), ("y".to_string(), vec![1.0, 0.0])];
        let hits = exact_top_k(
            DistanceMetric::Euclidean,
            &[1.0, 0.0],
            data.iter().map(|(id, v)| (id.as_str(), v.as_slice())),
            1,
        );
        assert_eq!(hits[0].id, "y");
    }

    #[test]
    fn radius_search_filters_by_distance() {
        let data = items();
        let hits = within_radius(
            DistanceMetric::Cosine,
            &[1.0, 0.0],
            data.iter().map(|(id, v)| (id.as_str(), v.as_slice())),
            0.5,
        );
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }
}
