use rayon::prelude::*;

const CHUNK: usize = 4096;

/// Returns the euclidean norm of `grads`.
///
/// Partial sums are taken over fixed chunks and added in order, so the result
/// doesn't depend on how the work was scheduled.
pub fn grad_norm(grads: &[f32]) -> f32 {
    let partials: Vec<f64> = grads
        .par_chunks(CHUNK)
        .map(|chunk| chunk.iter().map(|&g| (g as f64) * (g as f64)).sum())
        .collect();

    partials.iter().sum::<f64>().sqrt() as f32
}

/// Rescales `grads` in place so their norm is at most `max_norm`.
///
/// # Returns
/// The norm of the gradients before clipping.
pub fn clip_grad_norm(grads: &mut [f32], max_norm: f32) -> f32 {
    let norm = grad_norm(grads);
    let coef = max_norm / (norm + 1e-6);

    if coef < 1. {
        grads.par_iter_mut().for_each(|g| *g *= coef);
    }

    norm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clips_only_above_max_norm() {
        let mut grads = [3.0, 4.0];
        assert_eq!(clip_grad_norm(&mut grads, 10.0), 5.0);
        assert_eq!(grads, [3.0, 4.0]);

        let norm = clip_grad_norm(&mut grads, 1.0);
        assert_eq!(norm, 5.0);
        assert!((grad_norm(&grads) - 1.0).abs() < 1e-5);
    }
}
