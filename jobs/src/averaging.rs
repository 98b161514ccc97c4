use hyperrec_core::model::NodeId;
use hyperrec_core::vector::EPSILON;
use std::collections::BTreeMap;
use training::AnchorGradient;

use crate::queue::WorkerResult;

/// Collects worker updates for one round and merges them by weighted averaging.
#[derive(Debug, Default)]
pub struct FederatedAverager {
    rounds: BTreeMap<String, BTreeMap<NodeId, AnchorGradient>>,
}

impl FederatedAverager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any earlier update from the same worker.
    pub fn receive(&mut self, result: WorkerResult) {
        self.rounds.insert(result.worker_id, result.updates);
    }

    pub fn worker_count(&self) -> usize {
        self.rounds.len()
    }

    /// `sum(w * g) / sum(w)` per node across workers. Nodes whose total weight vanishes get the
    /// plain mean of the reported gradients.
    pub fn aggregate(&self) -> BTreeMap<NodeId, Vec<f32>> {
        struct Acc {
            weighted: Vec<f32>,
            plain: Vec<f32>,
            weight: f32,
            count: usize,
        }

        let mut acc: BTreeMap<&NodeId, Acc> = BTreeMap::new();
        for updates in self.rounds.values() {
            for (node_id, update) in updates {
                let dims = update.gradient.len();
                let entry = acc.entry(node_id).or_insert_with(|| Acc {
                    weighted: vec![0.0; dims],
                    plain: vec![0.0; dims],
                    weight: 0.0,
                    count: 0,
                });
                if entry.weighted.len() != dims {
                    continue;
                }
                for (i, g) in update.gradient.iter().enumerate() {
                    entry.weighted[i] += update.weight * g;
                    entry.plain[i] += g;
                }
                entry.weight += update.weight;
                entry.count += 1;
            }
        }

        acc.into_iter()
            .map(|(node_id, a)| {
                let merged = if a.weight > EPSILON {
                    a.weighted.iter().map(|g| g / a.weight).collect()
                } else {
                    a.plain.iter().map(|g| g / a.count.max(1) as f32).collect()
                };
                (node_id.clone(), merged)
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.rounds.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(worker: &str, updates: &[(&str, Vec<f32>, f32)]) -> WorkerResult {
        WorkerResult {
            job_id: "job".into(),
            epoch: 0,
            worker_id: worker.into(),
            updates: updates
                .iter()
                .map(|(id, gradient, weight)| {
                    (
                        id.to_string(),
                        AnchorGradient {
                            gradient: gradient.clone(),
                            weight: *weight,
                        },
                    )
                })
                .collect(),
            avg_loss: 0.0,
            processed: updates.len(),
        }
    }

    #[test]
    fn gradients_are_weight_averaged_across_workers() {
        let mut averager = FederatedAverager::new();
        averager.receive(result("w0", &[("a", vec![1.0, 0.0], 1.0), ("b", vec![2.0, 2.0], 1.0)]));
        averager.receive(result("w1", &[("a", vec![4.0, 3.0], 3.0)]));

        let merged = averager.aggregate();
        assert_eq!(merged.len(), 2);
        assert!((merged["a"][0] - 3.25).abs() < 1e-6);
        assert!((merged["a"][1] - 2.25).abs() < 1e-6);
        assert_eq!(merged["b"], vec![2.0, 2.0]);
    }

    #[test]
    fn zero_weights_fall_back_to_plain_mean() {
        let mut averager = FederatedAverager::new();
        averager.receive(result("w0", &[("a", vec![1.0], 0.0)]));
        averager.receive(result("w1", &[("a", vec![3.0], 0.0)]));
        assert_eq!(averager.aggregate()["a"], vec![2.0]);
    }

    #[test]
    fn clear_starts_a_new_round() {
        let mut averager = FederatedAverager::new();
        averager.receive(result("w0", &[("a", vec![1.0], 1.0)]));
        averager.receive(result("w0", &[("b", vec![1.0], 1.0)]));
        assert_eq!(averager.worker_count(), 1);
        assert!(!averager.aggregate().contains_key("a"));
        averager.clear();
        assert!(averager.aggregate().is_empty());
    }
}
