use hyperrec_core::vector;
use rand::Rng;

use super::DistanceMetric;

pub const KMEANS_MAX_ITERATIONS: usize = 50;
/// Largest centroid movement (Euclidean) still considered converged.
pub const KMEANS_TOLERANCE: f32 = 1e-3;

/// Inverted-file index: k-means centroids plus one posting list of ids per centroid.
///
/// The index is a point-in-time snapshot of the vectors it was built from.
#[derive(Debug, Clone)]
pub struct IvfIndex {
    metric: DistanceMetric,
    centroids: Vec<Vec<f32>>,
    lists: Vec<Vec<String>>,
}

impl IvfIndex {
    /// Clusters `items` into `num_clusters` lists. Callers guarantee
    /// `items.len() >= num_clusters > 0`.
    pub fn build<'a, R: Rng + ?Sized>(
        metric: DistanceMetric,
        items: &[(&'a str, &'a [f32])],
        num_clusters: usize,
        rng: &mut R,
    ) -> Self {
        let points: Vec<&[f32]> = items.iter().map(|(_, v)| *v).collect();
        let centroids = kmeans(metric, &points, num_clusters, rng);
        Self::from_centroids(metric, centroids, items)
    }

    /// Reassigns `items` to previously trained centroids without re-running k-means.
    pub fn from_centroids<'a>(
        metric: DistanceMetric,
        centroids: Vec<Vec<f32>>,
        items: &[(&'a str, &'a [f32])],
    ) -> Self {
        let mut lists = vec![Vec::new(); centroids.len()];
        for (id, v) in items {
            if let Some(c) = nearest_centroid(metric, v, &centroids) {
                lists[c].push(id.to_string());
            }
        }
        Self {
            metric,
            centroids,
            lists,
        }
    }

    pub fn centroids(&self) -> &[Vec<f32>] {
        &self.centroids
    }

    pub fn num_clusters(&self) -> usize {
        self.centroids.len()
    }

    pub fn list(&self, cluster: usize) -> &[String] {
        self.lists.get(cluster).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Indices of the `n_probe` centroids closest to `query`, closest first.
    pub fn probe(&self, query: &[f32], n_probe: usize) -> Vec<usize> {
        let mut ranked: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, self.metric.distance(query, c)))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        ranked.into_iter().take(n_probe).map(|(i, _)| i).collect()
    }
}

fn nearest_centroid(metric: DistanceMetric, v: &[f32], centroids: &[Vec<f32>]) -> Option<usize> {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, metric.distance(v, c)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

/// Seeds centroids with D^2 weighting so well separated groups start in distinct clusters.
fn kmeans_pp_init<R: Rng + ?Sized>(points: &[&[f32]], k: usize, rng: &mut R) -> Vec<Vec<f32>> {
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    let first = points[rng.gen_range(0..points.len())];
    centroids.push(first.to_vec());

    while centroids.len() < k {
        let distances: Vec<f32> = points
            .iter()
            .map(|p| {
                centroids
                    .iter()
                    .map(|c| vector::euclidean(p, c))
                    .fold(f32::INFINITY, f32::min)
                    .powi(2)
            })
            .collect();
        let total: f32 = distances.iter().sum();

        let pick = if total > 0.0 && total.is_finite() {
            let mut threshold = rng.gen::<f32>() * total;
            distances
                .iter()
                .position(|&d| {
                    threshold -= d;
                    threshold <= 0.0
                })
                .unwrap_or(points.len() - 1)
        } else {
            rng.gen_range(0..points.len())
        };
        centroids.push(points[pick].to_vec());
    }

    centroids
}

/// Lloyd's k-means with k-means++ seeding.
///
/// Empty clusters keep their previous centroid. Under cosine the centroids are kept at
/// unit length so that `1 - dot` stays a valid distance.
pub fn kmeans<R: Rng + ?Sized>(
    metric: DistanceMetric,
    points: &[&[f32]],
    k: usize,
    rng: &mut R,
) -> Vec<Vec<f32>> {
    if points.is_empty() || k == 0 {
        return Vec::new();
    }
    let dim = points[0].len();

    let mut centroids = kmeans_pp_init(points, k.min(points.len()), rng);

    for _ in 0..KMEANS_MAX_ITERATIONS {
        let mut sums = vec![vec![0.0f32; dim]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];

        for p in points {
            if let Some(c) = nearest_centroid(metric, p, &centroids) {
                vector::add_scaled(&mut sums[c], p, 1.0);
                counts[c] += 1;
            }
        }

        let mut converged = true;
        for (i, sum) in sums.iter_mut().enumerate() {
            if counts[i] == 0 {
                continue;
            }
            for x in sum.iter_mut() {
                *x /= counts[i] as f32;
            }
            if metric.normalizes() {
                vector::normalize(sum);
            }
            if vector::euclidean(&centroids[i], sum) > KMEANS_TOLERANCE {
                converged = false;
            }
            centroids[i].copy_from_slice(sum);
        }

        if converged {
            break;
        }
    }

    centroids
}
