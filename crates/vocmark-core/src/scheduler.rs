//! Step-decay learning rate schedule.
//!
//! Every `step_size` optimizer steps the learning rate is multiplied by
//! `gamma`. The schedule counts optimizer steps, not epochs.

/// Step-decay schedule: `lr = base_lr * gamma^(step / step_size)`.
#[derive(Debug, Clone)]
pub struct StepDecay {
    /// Base learning rate.
    base_lr: f64,
    /// Steps between decays.
    step_size: usize,
    /// Decay factor.
    gamma: f64,
    /// Optimizer steps taken so far.
    current_step: usize,
}

impl StepDecay {
    /// Create a new schedule. A zero `step_size` is treated as one.
    pub fn new(base_lr: f64, step_size: usize, gamma: f64) -> Self {
        Self {
            base_lr,
            step_size: step_size.max(1),
            gamma,
            current_step: 0,
        }
    }

    /// Learning rate after `step` optimizer steps.
    #[must_use]
    pub fn get_lr(&self, step: usize) -> f64 {
        let decays = (step / self.step_size) as i32;
        self.base_lr * self.gamma.powi(decays)
    }

    /// Learning rate at the current step.
    #[must_use]
    pub fn current_lr(&self) -> f64 {
        self.get_lr(self.current_step)
    }

    /// Advance by one optimizer step. Returns `true` when a decay happened.
    pub fn step(&mut self) -> bool {
        self.current_step += 1;
        self.current_step % self.step_size == 0
    }

    /// Set the current step (used when resuming).
    pub fn set_step(&mut self, step: usize) {
        self.current_step = step;
    }

    /// Optimizer steps taken so far.
    #[must_use]
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Steps between decays.
    #[must_use]
    pub fn step_size(&self) -> usize {
        self.step_size
    }

    /// Base learning rate.
    #[must_use]
    pub fn base_lr(&self) -> f64 {
        self.base_lr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_within_window() {
        let schedule = StepDecay::new(1e-3, 10, 0.5);
        assert!((schedule.get_lr(0) - 1e-3).abs() < 1e-12);
        assert!((schedule.get_lr(9) - 1e-3).abs() < 1e-12);
    }

    #[test]
    fn test_decays_every_step_size() {
        let schedule = StepDecay::new(1e-3, 10, 0.5);
        assert!((schedule.get_lr(10) - 5e-4).abs() < 1e-12);
        assert!((schedule.get_lr(25) - 2.5e-4).abs() < 1e-12);
        assert!((schedule.get_lr(30) - 1.25e-4).abs() < 1e-12);
    }

    #[test]
    fn test_step_reports_boundary() {
        let mut schedule = StepDecay::new(1.0, 3, 0.1);
        let boundaries: Vec<bool> = (0..6).map(|_| schedule.step()).collect();
        assert_eq!(boundaries, vec![false, false, true, false, false, true]);
        assert_eq!(schedule.current_step(), 6);
        assert!((schedule.current_lr() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_resume_from_step() {
        let mut schedule = StepDecay::new(2e-4, 4, 0.5);
        schedule.set_step(8);
        assert!((schedule.current_lr() - 5e-5).abs() < 1e-12);
    }
}
