use hyperrec_core::vector::cosine_similarity;
use storage::SearchHit;

/// Maximal Marginal Relevance re-ranking.
///
/// The closest candidate always goes first. Each later pick maximizes
/// `lambda * (1 - distance) + (1 - lambda) * (1 - max_sim)` with `lambda = 1 - diversity_weight`,
/// where `max_sim` is the highest cosine similarity to anything already picked. Candidates
/// without a vector count as fully novel. Lists no longer than `limit` are returned unchanged.
pub fn diversify<'a, F>(
    candidates: Vec<SearchHit>,
    limit: usize,
    diversity_weight: f32,
    vector_of: F,
) -> Vec<SearchHit>
where
    F: Fn(&str) -> Option<&'a [f32]>,
{
    if candidates.len() <= limit {
        return candidates;
    }
    if limit == 0 {
        return Vec::new();
    }

    let lambda = 1.0 - diversity_weight;
    let mut remaining = candidates;
    let mut selected = vec![remaining.remove(0)];

    while selected.len() < limit && !remaining.is_empty() {
        let mut best = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (i, candidate) in remaining.iter().enumerate() {
            let relevance = 1.0 - candidate.distance;
            let max_similarity = vector_of(&candidate.id)
                .map(|v| {
                    selected
                        .iter()
                        .filter_map(|s| vector_of(&s.id))
                        .map(|s| cosine_similarity(v, s))
                        .fold(0.0f32, f32::max)
                })
                .unwrap_or(0.0);
            let score = lambda * relevance + (1.0 - lambda) * (1.0 - max_similarity);
            if score > best_score {
                best_score = score;
                best = i;
            }
        }

        selected.push(remaining.remove(best));
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};

    fn hit(id: &str, distance: f32) -> SearchHit {
        SearchHit {
            id: id.to_string(),
            distance,
            metadata: BTreeMap::new(),
        }
    }

    fn vectors() -> HashMap<&'static str, Vec<f32>> {
        HashMap::from([
            ("a", vec![1.0, 0.0]),
            ("a-twin", vec![0.999, 0.04]),
            ("b", vec![0.6, 0.8]),
        ])
    }

    #[test]
    fn short_lists_pass_through() {
        let v = vectors();
        let out = diversify(vec![hit("a", 0.1), hit("b", 0.2)], 3, 0.5, |id| {
            v.get(id).map(Vec::as_slice)
        });
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "a");
    }

    #[test]
    fn pure_relevance_keeps_distance_order() {
        let v = vectors();
        let candidates = vec![hit("a", 0.1), hit("a-twin", 0.11), hit("b", 0.3)];
        let out = diversify(candidates, 2, 0.0, |id| v.get(id).map(Vec::as_slice));
        let ids: Vec<_> = out.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, ["a", "a-twin"]);
    }

    #[test]
    fn diversity_skips_near_duplicates() {
        let v = vectors();
        let candidates = vec![hit("a", 0.1), hit("a-twin", 0.11), hit("b", 0.3)];
        let out = diversify(candidates, 2, 0.7, |id| v.get(id).map(Vec::as_slice));
        let ids: Vec<_> = out.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }
}
