//! Vector helpers for hybrid feature vectors.
//!
//! Every vector that is stored or compared passes through [`l2_normalize`]
//! first, so cosine similarity reduces to a dot product.

pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

pub fn normalized(mut v: Vec<f32>) -> Vec<f32> {
    l2_normalize(&mut v);
    v
}

/// Cosine similarity in `[-1, 1]`; zero when either vector has no magnitude
/// or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        (dot / denom).clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Weighted mean of equal-length vectors, L2-normalized.
///
/// Weights that are not positive are treated as 1 so a batch of
/// zero-quality observations still aggregates. Returns `None` for an empty
/// batch or mismatched lengths.
pub fn weighted_mean<'a, I>(vectors: I) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = (&'a [f32], f64)>,
{
    let mut acc: Option<Vec<f64>> = None;
    for (v, weight) in vectors {
        let w = if weight > 0.0 { weight } else { 1.0 };
        let sum = acc.get_or_insert_with(|| vec![0.0; v.len()]);
        if sum.len() != v.len() {
            return None;
        }
        for (s, x) in sum.iter_mut().zip(v.iter()) {
            *s += *x as f64 * w;
        }
    }
    acc.map(|sum| normalized(sum.into_iter().map(|x| x as f32).collect()))
}

pub fn is_finite(v: &[f32]) -> bool {
    v.iter().all(|x| x.is_finite())
}
