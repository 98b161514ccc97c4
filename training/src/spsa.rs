use hyperrec_core::config::TrainingSettings;
use hyperrec_core::embedding::EmbeddingMap;
use hyperrec_core::model::NodeId;
use hyperrec_core::vector::{self, cosine_distance, EPSILON};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use storage::{Hypergraph, VectorStore, VectorStoreError};
use tracing::{debug, info};

use crate::triplet::{Triplet, TripletGenerator};
use crate::TrainingError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpsaConfig {
    /// Step size scale.
    pub a: f32,
    /// Perturbation scale.
    pub c: f32,
    pub alpha: f32,
    pub gamma: f32,
    /// Stability constant `A` in the step size schedule.
    pub stability: f32,
    pub batch_size: usize,
    pub epochs: usize,
    pub margin: f32,
    pub num_workers: usize,
}

impl Default for SpsaConfig {
    fn default() -> Self {
        Self {
            a: 0.1,
            c: 0.1,
            alpha: 0.602,
            gamma: 0.101,
            stability: 100.0,
            batch_size: 32,
            epochs: 10,
            margin: 0.2,
            num_workers: 4,
        }
    }
}

impl From<&TrainingSettings> for SpsaConfig {
    fn from(settings: &TrainingSettings) -> Self {
        Self {
            a: settings.a,
            c: settings.c,
            alpha: settings.alpha,
            gamma: settings.gamma,
            stability: settings.stability,
            batch_size: settings.batch_size,
            epochs: settings.epochs,
            margin: settings.margin,
            num_workers: settings.num_workers,
        }
    }
}

impl SpsaConfig {
    pub fn validate(&self) -> Result<(), TrainingError> {
        let positive = [("a", self.a), ("c", self.c)];
        if let Some((name, _)) = positive.iter().find(|(_, v)| !(*v > 0.0 && v.is_finite())) {
            return Err(TrainingError::InvalidConfig(format!("{name} must be positive")));
        }
        if self.stability < 0.0 || self.margin < 0.0 {
            return Err(TrainingError::InvalidConfig(
                "stability and margin must not be negative".into(),
            ));
        }
        if self.batch_size == 0 || self.num_workers == 0 {
            return Err(TrainingError::InvalidConfig(
                "batch_size and num_workers must be positive".into(),
            ));
        }
        Ok(())
    }

    /// `a_k = a / (k + 1 + A)^alpha`
    pub fn step_size(&self, k: u64) -> f32 {
        self.a / (k as f32 + 1.0 + self.stability).powf(self.alpha)
    }

    /// `c_k = c / (k + 1)^gamma`
    pub fn perturbation(&self, k: u64) -> f32 {
        self.c / (k as f32 + 1.0).powf(self.gamma)
    }
}

/// `max(0, d(anchor, positive) - d(anchor, negative) + margin)` with cosine distance.
pub fn triplet_loss(anchor: &[f32], positive: &[f32], negative: &[f32], margin: f32) -> f32 {
    (cosine_distance(anchor, positive) - cosine_distance(anchor, negative) + margin).max(0.0)
}

/// Random vector of independent +1/-1 entries.
pub fn bernoulli_perturbation<R: Rng + ?Sized>(dim: usize, rng: &mut R) -> Vec<f32> {
    (0..dim)
        .map(|_| if rng.gen_bool(0.5) { 1.0 } else { -1.0 })
        .collect()
}

/// Weighted-mean gradient estimate for one anchor, plus the total weight behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorGradient {
    pub gradient: Vec<f32>,
    pub weight: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradientEstimate {
    pub anchors: BTreeMap<NodeId, AnchorGradient>,
    /// Sum over processed triplets of the mean of the two perturbed losses.
    pub loss_sum: f32,
    pub processed: usize,
}

impl GradientEstimate {
    pub fn average_loss(&self) -> f32 {
        if self.processed == 0 {
            0.0
        } else {
            self.loss_sum / self.processed as f32
        }
    }
}

/// SPSA gradient estimates for every triplet whose three vectors are known.
///
/// Each triplet perturbs its anchor by `+/- ck * delta` and takes the central difference
/// `(L+ - L-) / (2 ck delta_i)` per dimension. Estimates sharing an anchor are averaged,
/// weighted by triplet weight.
pub fn accumulate_gradients<R: Rng + ?Sized>(
    embeddings: &EmbeddingMap,
    triplets: &[Triplet],
    ck: f32,
    margin: f32,
    rng: &mut R,
) -> GradientEstimate {
    struct Acc {
        weighted: Vec<f32>,
        plain: Vec<f32>,
        weight: f32,
        count: usize,
    }

    let mut acc: BTreeMap<NodeId, Acc> = BTreeMap::new();
    let mut loss_sum = 0.0f32;
    let mut processed = 0usize;

    for t in triplets {
        let (Some(a), Some(p), Some(n)) = (
            embeddings.get(&t.anchor),
            embeddings.get(&t.positive),
            embeddings.get(&t.negative),
        ) else {
            continue;
        };
        if a.len() != p.len() || a.len() != n.len() {
            continue;
        }

        let delta = bernoulli_perturbation(a.len(), rng);
        let plus: Vec<f32> = a.iter().zip(&delta).map(|(v, d)| v + ck * d).collect();
        let minus: Vec<f32> = a.iter().zip(&delta).map(|(v, d)| v - ck * d).collect();
        let loss_plus = triplet_loss(&plus, p, n, margin);
        let loss_minus = triplet_loss(&minus, p, n, margin);
        let diff = loss_plus - loss_minus;

        let entry = acc.entry(t.anchor.clone()).or_insert_with(|| Acc {
            weighted: vec![0.0; a.len()],
            plain: vec![0.0; a.len()],
            weight: 0.0,
            count: 0,
        });
        for (i, d) in delta.iter().enumerate() {
            let g = diff / (2.0 * ck * d);
            entry.weighted[i] += t.weight * g;
            entry.plain[i] += g;
        }
        entry.weight += t.weight;
        entry.count += 1;

        loss_sum += (loss_plus + loss_minus) / 2.0;
        processed += 1;
    }

    let anchors = acc
        .into_iter()
        .map(|(id, a)| {
            let gradient = if a.weight > EPSILON {
                a.weighted.iter().map(|g| g / a.weight).collect()
            } else {
                a.plain.iter().map(|g| g / a.count as f32).collect()
            };
            (
                id,
                AnchorGradient {
                    gradient,
                    weight: a.weight,
                },
            )
        })
        .collect();

    GradientEstimate {
        anchors,
        loss_sum,
        processed,
    }
}

/// `v <- normalize(v - step * g)` for every node with a gradient. Returns the touched ids.
pub fn apply_gradient_step(
    embeddings: &mut EmbeddingMap,
    gradients: &BTreeMap<NodeId, Vec<f32>>,
    step: f32,
) -> Vec<NodeId> {
    let mut touched = Vec::with_capacity(gradients.len());
    for (id, gradient) in gradients {
        let Some(current) = embeddings.get_mut(id) else {
            continue;
        };
        if current.len() != gradient.len() {
            continue;
        }
        vector::add_scaled(current, gradient, -step);
        vector::normalize(current);
        touched.push(id.clone());
    }
    touched
}

/// Writes the current vectors of `ids` back into `store`, keeping each entry's metadata.
/// Ids the store does not hold are skipped. Returns the number of refreshed entries.
pub fn sync_store(
    store: &mut VectorStore,
    embeddings: &EmbeddingMap,
    ids: &[NodeId],
) -> Result<usize, VectorStoreError> {
    let mut refreshed = 0;
    for id in ids {
        let metadata = match store.get(id) {
            Some(entry) => entry.metadata.clone(),
            None => continue,
        };
        if let Some(v) = embeddings.get(id) {
            store.add(id.clone(), v, metadata)?;
            refreshed += 1;
        }
    }
    Ok(refreshed)
}

/// Number of triplets whose loss is still positive.
pub fn count_margin_violations(embeddings: &EmbeddingMap, triplets: &[Triplet], margin: f32) -> usize {
    triplets
        .iter()
        .filter(|t| {
            match (
                embeddings.get(&t.anchor),
                embeddings.get(&t.positive),
                embeddings.get(&t.negative),
            ) {
                (Some(a), Some(p), Some(n)) => triplet_loss(a, p, n, margin) > 0.0,
                _ => false,
            }
        })
        .count()
}

/// Mean triplet loss over the triplets whose three vectors are known; zero when none are.
pub fn mean_triplet_loss(embeddings: &EmbeddingMap, triplets: &[Triplet], margin: f32) -> f32 {
    let losses: Vec<f32> = triplets
        .iter()
        .filter_map(|t| {
            Some(triplet_loss(
                embeddings.get(&t.anchor)?,
                embeddings.get(&t.positive)?,
                embeddings.get(&t.negative)?,
                margin,
            ))
        })
        .collect();
    if losses.is_empty() {
        0.0
    } else {
        losses.iter().sum::<f32>() / losses.len() as f32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub epoch_losses: Vec<f32>,
    pub final_loss: f32,
    pub iterations: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerStats {
    pub iteration: u64,
    pub losses: Vec<f32>,
    pub current_step_size: f32,
    pub current_perturbation: f32,
}

/// In-process SPSA fine-tuning of node embeddings.
pub struct SpsaOptimizer {
    config: SpsaConfig,
    iteration: u64,
    losses: Vec<f32>,
    rng: StdRng,
}

impl SpsaOptimizer {
    pub fn new(config: SpsaConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_seed(config: SpsaConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: SpsaConfig, rng: StdRng) -> Self {
        Self {
            config,
            iteration: 0,
            losses: Vec::new(),
            rng,
        }
    }

    pub fn config(&self) -> &SpsaConfig {
        &self.config
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// One SPSA update over `triplets`. Updated anchors are written back to `store`
    /// (keeping their metadata). Returns the mean loss after the update.
    pub fn update_step(
        &mut self,
        embeddings: &mut EmbeddingMap,
        triplets: &[Triplet],
        store: &mut VectorStore,
    ) -> Result<f32, TrainingError> {
        self.iteration += 1;
        let ak = self.config.step_size(self.iteration);
        let ck = self.config.perturbation(self.iteration);

        let estimate =
            accumulate_gradients(embeddings, triplets, ck, self.config.margin, &mut self.rng);
        let gradients: BTreeMap<NodeId, Vec<f32>> = estimate
            .anchors
            .into_iter()
            .map(|(id, g)| (id, g.gradient))
            .collect();
        let touched = apply_gradient_step(embeddings, &gradients, ak);

        sync_store(store, embeddings, &touched)?;

        let loss = mean_triplet_loss(embeddings, triplets, self.config.margin);
        if !loss.is_finite() {
            return Err(TrainingError::NonFiniteLoss(self.iteration));
        }
        debug!(iteration = self.iteration, step = ak, perturbation = ck, loss, "SPSA step");
        self.losses.push(loss);
        Ok(loss)
    }

    /// Runs `epochs` passes of `ceil(nodes / batch_size)` mined batches each.
    pub fn train(
        &mut self,
        graph: &Hypergraph,
        embeddings: &mut EmbeddingMap,
        store: &mut VectorStore,
    ) -> Result<TrainingReport, TrainingError> {
        self.config.validate()?;
        let num_batches = graph.node_count().div_ceil(self.config.batch_size).max(1);
        let mut epoch_losses = Vec::with_capacity(self.config.epochs);

        for epoch in 0..self.config.epochs {
            let mut epoch_loss = 0.0f32;
            let mut batches_run = 0usize;

            for _ in 0..num_batches {
                let triplets = TripletGenerator::new(graph, store)
                    .generate(self.config.batch_size, &mut self.rng)?;
                if triplets.is_empty() {
                    continue;
                }
                epoch_loss += self.update_step(embeddings, &triplets, store)?;
                batches_run += 1;
            }

            let avg = if batches_run > 0 {
                epoch_loss / batches_run as f32
            } else {
                0.0
            };
            info!(
                epoch = epoch + 1,
                epochs = self.config.epochs,
                loss = avg,
                batches = batches_run,
                "SPSA epoch finished"
            );
            epoch_losses.push(avg);
        }

        Ok(TrainingReport {
            final_loss: epoch_losses.last().copied().unwrap_or(0.0),
            epoch_losses,
            iterations: self.iteration,
        })
    }

    pub fn stats(&self) -> OptimizerStats {
        OptimizerStats {
            iteration: self.iteration,
            losses: self.losses.clone(),
            current_step_size: self.config.step_size(self.iteration),
            current_perturbation: self.config.perturbation(self.iteration),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedules_decay_from_configured_scales() {
        let config = SpsaConfig::default();
        assert!((config.step_size(0) - 0.1 / 101f32.powf(0.602)).abs() < 1e-7);
        assert!((config.perturbation(0) - 0.1).abs() < 1e-7);
        assert!(config.step_size(10) < config.step_size(1));
        assert!(config.perturbation(10) < config.perturbation(1));
    }

    #[test]
    fn triplet_loss_is_hinged_at_zero() {
        let a = [1.0, 0.0];
        assert_eq!(triplet_loss(&a, &[1.0, 0.0], &[-1.0, 0.0], 0.2), 0.0);
        let loss = triplet_loss(&a, &[0.0, 1.0], &[1.0, 0.0], 0.2);
        assert!((loss - 1.2).abs() < 1e-5);
    }

    #[test]
    fn perturbation_entries_are_plus_or_minus_one() {
        let mut rng = StdRng::seed_from_u64(2);
        let delta = bernoulli_perturbation(64, &mut rng);
        assert!(delta.iter().all(|d| *d == 1.0 || *d == -1.0));
        assert!(delta.iter().any(|d| *d == 1.0) && delta.iter().any(|d| *d == -1.0));
    }

    #[test]
    fn shared_anchor_gradients_are_weight_averaged() {
        let mut emb = EmbeddingMap::new();
        emb.insert("a".into(), vec![0.6, 0.8]);
        emb.insert("p".into(), vec![1.0, 0.0]);
        emb.insert("n".into(), vec![0.0, 1.0]);
        let t = |w: f32| Triplet {
            anchor: "a".into(),
            positive: "p".into(),
            negative: "n".into(),
            edge_type: "same_genre".into(),
            weight: w,
        };
        let mut rng = StdRng::seed_from_u64(9);
        let estimate = accumulate_gradients(&emb, &[t(1.0), t(3.0), t(0.0)], 0.05, 0.2, &mut rng);
        assert_eq!(estimate.processed, 3);
        assert_eq!(estimate.anchors.len(), 1);
        assert!((estimate.anchors["a"].weight - 4.0).abs() < 1e-6);
        assert!(estimate.average_loss() > 0.0);
    }

    #[test]
    fn missing_vectors_are_skipped() {
        let emb = EmbeddingMap::new();
        let triplet = Triplet {
            anchor: "a".into(),
            positive: "p".into(),
            negative: "n".into(),
            edge_type: "x".into(),
            weight: 1.0,
        };
        let mut rng = StdRng::seed_from_u64(1);
        let estimate = accumulate_gradients(&emb, &[triplet], 0.1, 0.2, &mut rng);
        assert_eq!(estimate.processed, 0);
        assert!(estimate.anchors.is_empty());
    }

    #[test]
    fn gradient_step_renormalizes() {
        let mut emb = EmbeddingMap::new();
        emb.insert("a".into(), vec![1.0, 0.0]);
        let grads = BTreeMap::from([("a".to_string(), vec![0.0, -1.0]), ("ghost".to_string(), vec![1.0, 1.0])]);
        let touched = apply_gradient_step(&mut emb, &grads, 1.0);
        assert_eq!(touched, vec!["a".to_string()]);
        let v = &emb["a"];
        assert!((vector::l2_norm(v) - 1.0).abs() < 1e-6);
        assert!((v[0] - v[1]).abs() < 1e-6);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SpsaConfig {
            batch_size: 0,
            ..SpsaConfig::default()
        };
        assert!(config.validate().is_err());
        let config = SpsaConfig {
            c: 0.0,
            ..SpsaConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
