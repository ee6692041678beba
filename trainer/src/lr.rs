use log::{debug, warn};

use crate::optimization::Optimizer;

/// The learning rate as a function of the iteration.
///
/// A linear warm-up up to `init_lr`, a plateau at `init_lr` and a constant
/// `final_lr` tail.
#[derive(Debug, Clone)]
pub struct LrSchedule {
    init_lr: f64,
    final_lr: f64,
    warmup_iters: u64,
    plateau_iters: u64,
    last_iteration: Option<u64>,
    last_applied: Option<f32>,
}

impl LrSchedule {
    /// Creates a new `LrSchedule`.
    ///
    /// # Arguments
    /// * `init_lr` - The rate reached at the end of the warm-up.
    /// * `final_lr` - The rate used after the plateau.
    /// * `warmup_iters` - The length of the warm-up, zero disables it.
    /// * `plateau_iters` - The last iteration using `init_lr`.
    ///
    /// # Returns
    /// A new `LrSchedule` that hasn't written any rate yet.
    pub fn new(init_lr: f64, final_lr: f64, warmup_iters: u64, plateau_iters: u64) -> Self {
        Self {
            init_lr,
            final_lr,
            warmup_iters,
            plateau_iters,
            last_iteration: None,
            last_applied: None,
        }
    }

    /// Computes the learning rate for `iteration`, 1-based.
    pub fn lr_at(&self, iteration: u64) -> f32 {
        let lr = if iteration <= self.warmup_iters {
            let n = self.warmup_iters;
            let start = self.init_lr / n.max(1) as f64;

            let lr = if n <= 1 {
                start
            } else {
                let k = iteration.max(1) - 1;
                start + (self.init_lr - start) * k as f64 / (n - 1) as f64
            };

            round_digits(lr, 10)
        } else if iteration <= self.plateau_iters {
            self.init_lr
        } else {
            self.final_lr
        };

        lr as f32
    }

    /// Writes the rate for `iteration` into every parameter group of `optimizer`.
    ///
    /// Nothing is written if the rate didn't change since the last write, or
    /// if `iteration` doesn't come after the previously applied one.
    ///
    /// # Returns
    /// Whether the optimizer was written.
    pub fn apply<O>(&mut self, iteration: u64, optimizer: &mut O) -> bool
    where
        O: Optimizer + ?Sized,
    {
        if let Some(last) = self.last_iteration {
            if iteration <= last {
                warn!(iteration = iteration, last = last; "ignoring non increasing lr schedule iteration");
                return false;
            }
        }

        self.last_iteration = Some(iteration);
        let lr = self.lr_at(iteration);

        if self.last_applied == Some(lr) {
            return false;
        }

        for group in optimizer.param_groups_mut() {
            group.lr = lr;
        }

        debug!(iteration = iteration; "learning rate set to {lr}");
        self.last_applied = Some(lr);
        true
    }
}

fn round_digits(value: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::{Adam, GradientDescent, ParamGroup};

    #[test]
    fn warmup_endpoints() {
        let schedule = LrSchedule::new(1e-3, 5e-5, 100, 1000);

        assert!((schedule.lr_at(1) - 1e-5).abs() < 1e-12);
        assert!((schedule.lr_at(100) - 1e-3).abs() < 1e-9);
        assert!((schedule.lr_at(50) - (1e-5 + (1e-3 - 1e-5) * 49. / 99.) as f32).abs() < 1e-9);
    }

    #[test]
    fn plateau_then_tail() {
        let schedule = LrSchedule::new(1e-3, 5e-5, 10, 20);

        assert_eq!(schedule.lr_at(11), 1e-3);
        assert_eq!(schedule.lr_at(20), 1e-3);
        assert_eq!(schedule.lr_at(21), 5e-5);
        assert_eq!(schedule.lr_at(10_000), 5e-5);
    }

    #[test]
    fn single_step_warmup_yields_init_lr() {
        let schedule = LrSchedule::new(2e-3, 1e-4, 1, 5);
        assert_eq!(schedule.lr_at(1), 2e-3);
    }

    #[test]
    fn writes_only_when_the_rate_changes() {
        let mut schedule = LrSchedule::new(1e-3, 5e-5, 4, 8);
        let mut optimizer = GradientDescent::new(2, 0.0);

        let writes: Vec<_> = (1..=12)
            .map(|i| schedule.apply(i, &mut optimizer))
            .collect();

        // Warm-up changes every step, the plateau and tail write once each.
        let expected = [
            true, true, true, true, false, false, false, false, true, false, false, false,
        ];
        assert_eq!(writes, expected);
        assert_eq!(optimizer.param_groups()[0].lr, 5e-5);
    }

    #[test]
    fn repeated_iteration_is_ignored() {
        let mut schedule = LrSchedule::new(1e-3, 5e-5, 4, 8);
        let mut optimizer = GradientDescent::new(1, 0.0);

        assert!(schedule.apply(2, &mut optimizer));
        optimizer.param_groups_mut()[0].lr = 42.0;

        assert!(!schedule.apply(2, &mut optimizer));
        assert!(!schedule.apply(1, &mut optimizer));
        assert_eq!(optimizer.param_groups()[0].lr, 42.0);
    }

    #[test]
    fn every_group_is_written() {
        let groups = vec![ParamGroup::new(0..2, 1.0), ParamGroup::new(2..4, 2.0)];
        let mut optimizer = Adam::grouped(groups, 0.9, 0.999, 1e-8);
        let mut schedule = LrSchedule::new(1e-3, 5e-5, 0, 10);

        assert!(schedule.apply(1, &mut optimizer));
        assert!(optimizer.param_groups().iter().all(|group| group.lr == 1e-3));
    }
}
