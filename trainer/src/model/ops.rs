//! Math kernels of the linear regression.
use super::layout::ParameterLayout;

/// A read-only view over a flat parameter buffer.
#[derive(Debug, Clone, Copy)]
pub struct LinearView<'a> {
    params: &'a [f32],
    layout: &'a ParameterLayout,
}

impl<'a> LinearView<'a> {
    pub fn new(params: &'a [f32], layout: &'a ParameterLayout) -> Self {
        debug_assert!(params.len() >= layout.b.end);
        Self { params, layout }
    }

    #[inline]
    pub fn w(&self) -> f32 {
        self.params[self.layout.w.start]
    }

    #[inline]
    pub fn b(&self) -> f32 {
        self.params[self.layout.b.start]
    }

    /// y = w*x + b
    #[inline]
    pub fn predict(&self, x: f32) -> f32 {
        self.w() * x + self.b()
    }
}

/// Computes the mean squared error of `preds` against `ys`.
pub fn mse(preds: &[f32], ys: &[f32]) -> f32 {
    debug_assert_eq!(preds.len(), ys.len());

    let n = preds.len().max(1) as f32;
    preds
        .iter()
        .zip(ys)
        .map(|(p, y)| (p - y) * (p - y))
        .sum::<f32>()
        / n
}

/// Adds `scale` times the MSE gradient of a linear regression into `grads`.
///
/// loss = (1/n) * sum_i (yhat_i - y_i)^2
///
/// - dL/dw = (2/n) * sum_i (err_i * x_i)
/// - dL/db = (2/n) * sum_i (err_i)
pub fn linreg_mse_grad_accumulate(
    layout: &ParameterLayout,
    preds: &[f32],
    xs: &[f32],
    ys: &[f32],
    scale: f32,
    grads: &mut [f32],
) {
    debug_assert_eq!(xs.len(), ys.len());
    debug_assert!(grads.len() >= layout.b.end);

    let two_over_n = 2.0 / xs.len().max(1) as f32;

    let mut dw = 0.0_f32;
    let mut db = 0.0_f32;

    for ((&p, &x), &y) in preds.iter().zip(xs).zip(ys) {
        let err = p - y;
        dw += err * x;
        db += err;
    }

    grads[layout.w.start] += scale * two_over_n * dw;
    grads[layout.b.start] += scale * two_over_n * db;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grad_matches_expected_simple_case() {
        // y = 2x + 1 from w = 0, b = 0
        let xs = [1.0_f32, 2.0, 3.0];
        let ys = [3.0_f32, 5.0, 7.0];
        let preds = [0.0_f32; 3];
        let layout = ParameterLayout::linear_1d();

        let mut grads = [1.0_f32, 1.0];
        linreg_mse_grad_accumulate(&layout, &preds, &xs, &ys, 0.5, &mut grads);

        // dL/dw = (2/3) * -34, dL/db = (2/3) * -15, both halved and added to 1
        assert!((grads[0] - (1.0 - 11.333333)).abs() < 1e-4);
        assert!((grads[1] - (1.0 - 5.0)).abs() < 1e-4);
        assert!((mse(&preds, &ys) - 83.0 / 3.0).abs() < 1e-4);
    }
}
