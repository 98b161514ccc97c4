/// Guard added to denominators of distance computations.
pub const EPSILON: f32 = 1e-8;

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn l2_norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Scales `v` to unit length in place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

pub fn normalized(v: &[f32]) -> Vec<f32> {
    let mut out = v.to_vec();
    normalize(&mut out);
    out
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    dot(a, b) / (l2_norm(a) * l2_norm(b) + EPSILON)
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// `target += scale * source`
pub fn add_scaled(target: &mut [f32], source: &[f32], scale: f32) {
    for (t, s) in target.iter_mut().zip(source.iter()) {
        *t += scale * s;
    }
}

/// Weighted mean of the given vectors; `None` when nothing usable was supplied.
pub fn weighted_mean<'a, I>(vectors: I, dims: usize) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = (&'a [f32], f32)>,
{
    let mut acc = vec![0.0f32; dims];
    let mut total = 0.0f32;
    for (v, w) in vectors {
        if v.len() != dims {
            continue;
        }
        add_scaled(&mut acc, v, w);
        total += w;
    }
    if total <= EPSILON {
        return None;
    }
    for x in acc.iter_mut() {
        *x /= total;
    }
    Some(acc)
}
