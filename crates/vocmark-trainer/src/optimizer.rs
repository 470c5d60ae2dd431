//! AdamW wrapped with a step-decay learning rate schedule.

use std::collections::HashMap;
use std::rc::Rc;

use mlx_rs::{
    array,
    builder::Builder,
    error::Exception,
    module::{FlattenedModuleParam, ModuleParameters},
    optimizers::{AdamW, AdamWBuilder, Optimizer},
    Array,
};
use vocmark_core::{OptimizeConfig, StepDecay};

use crate::Result;

const FIRST_MOMENT: &str = ".m";
const SECOND_MOMENT: &str = ".v";

/// One AdamW instance plus its schedule.
///
/// The codec and the discriminator each own one. Gradients are produced
/// fresh by every `value_and_grad` call, so there is nothing to zero between
/// steps.
#[derive(Debug)]
pub struct ScheduledOptimizer {
    name: &'static str,
    optimizer: AdamW,
    schedule: StepDecay,
}

impl ScheduledOptimizer {
    /// Build from the optimize section of the train config.
    pub fn new(name: &'static str, optimize: &OptimizeConfig) -> Result<Self> {
        let optimizer = AdamWBuilder::new(optimize.lr)
            .betas(optimize.betas)
            .eps(optimize.eps)
            .weight_decay(optimize.weight_decay)
            .build()
            .map_err(|_| Exception::custom(format!("Failed to build {name} optimizer")))?;
        let schedule = StepDecay::new(
            f64::from(optimize.lr),
            optimize.step_size,
            f64::from(optimize.gamma),
        );
        Ok(Self {
            name,
            optimizer,
            schedule,
        })
    }

    /// Apply `grads` to `model`, then advance the schedule.
    ///
    /// Every `step_size` calls the learning rate is multiplied by `gamma`.
    pub fn step<M: ModuleParameters>(
        &mut self,
        model: &mut M,
        grads: &FlattenedModuleParam,
        global_step: usize,
        steps_per_epoch: usize,
    ) -> Result<()> {
        self.optimizer.update(model, grads)?;
        mlx_rs::transforms::eval_params(model.parameters())?;

        if self.schedule.step() {
            let lr = self.schedule.current_lr() as f32;
            self.optimizer.lr = array!(lr);
            tracing::debug!(
                optimizer = self.name,
                global_step,
                epoch_progress = global_step as f32 / steps_per_epoch.max(1) as f32,
                lr,
                "learning rate decayed"
            );
        }
        Ok(())
    }

    /// Current learning rate.
    #[must_use]
    pub fn learning_rate(&self) -> f32 {
        self.optimizer.lr.item()
    }

    /// Optimizer steps taken so far.
    #[must_use]
    pub fn scheduler_steps(&self) -> usize {
        self.schedule.current_step()
    }

    /// Number of parameters with moment estimates.
    #[must_use]
    pub fn tracked_parameters(&self) -> usize {
        self.optimizer.state.len()
    }

    /// Moment estimates keyed `<param>.m` / `<param>.v`, ready for safetensors.
    #[must_use]
    pub fn state_arrays(&self) -> HashMap<String, Array> {
        let mut arrays = HashMap::with_capacity(self.optimizer.state.len() * 2);
        for (key, (m, v)) in self.optimizer.state.iter() {
            arrays.insert(format!("{key}{FIRST_MOMENT}"), m.clone());
            arrays.insert(format!("{key}{SECOND_MOMENT}"), v.clone());
        }
        arrays
    }

    /// Restore moments, schedule position and the matching learning rate.
    pub fn restore(&mut self, arrays: HashMap<String, Array>, scheduler_steps: usize) -> Result<()> {
        let mut firsts: HashMap<String, Array> = HashMap::new();
        let mut seconds: HashMap<String, Array> = HashMap::new();
        for (key, value) in arrays {
            if let Some(param) = key.strip_suffix(FIRST_MOMENT) {
                firsts.insert(param.to_string(), value);
            } else if let Some(param) = key.strip_suffix(SECOND_MOMENT) {
                seconds.insert(param.to_string(), value);
            } else {
                return Err(Exception::custom(format!(
                    "unexpected key {key} in {} optimizer state",
                    self.name
                ))
                .into());
            }
        }

        self.optimizer.state.clear();
        for (param, m) in firsts {
            let v = seconds.remove(&param).ok_or_else(|| {
                Exception::custom(format!("missing second moment for {param}"))
            })?;
            self.optimizer.state.insert(Rc::from(param.as_str()), (m, v));
        }
        if let Some(param) = seconds.keys().next() {
            return Err(Exception::custom(format!("missing first moment for {param}")).into());
        }

        self.schedule.set_step(scheduler_steps);
        self.optimizer.lr = array!(self.schedule.current_lr() as f32);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlx_rs::macros::ModuleParameters;
    use mlx_rs::module::Param;

    #[derive(Debug, ModuleParameters)]
    struct Scalar {
        #[param]
        w: Param<Array>,
    }

    fn scalar(v: f32) -> Scalar {
        Scalar {
            w: Param::new(Array::from_slice(&[v], &[1])),
        }
    }

    fn grads(g: f32) -> FlattenedModuleParam {
        let mut map = FlattenedModuleParam::new();
        map.insert(Rc::from("w"), Array::from_slice(&[g], &[1]));
        map
    }

    fn config(step_size: usize, gamma: f32) -> OptimizeConfig {
        OptimizeConfig {
            lr: 0.1,
            step_size,
            gamma,
            weight_decay: 0.0,
            ..OptimizeConfig::default()
        }
    }

    #[test]
    fn test_step_moves_parameter_against_gradient() {
        let mut model = scalar(1.0);
        let mut opt = ScheduledOptimizer::new("test", &config(100, 0.5)).unwrap();
        opt.step(&mut model, &grads(1.0), 1, 10).unwrap();
        assert!(model.w.item::<f32>() < 1.0);
        assert_eq!(opt.tracked_parameters(), 1);
    }

    #[test]
    fn test_lr_decays_every_step_size() {
        let mut model = scalar(1.0);
        let mut opt = ScheduledOptimizer::new("test", &config(3, 0.5)).unwrap();
        let mut lrs = Vec::new();
        for step in 1..=7 {
            opt.step(&mut model, &grads(0.1), step, 10).unwrap();
            lrs.push(opt.learning_rate());
        }
        let expected = [0.1, 0.1, 0.05, 0.05, 0.05, 0.025, 0.025];
        for (got, want) in lrs.iter().zip(expected) {
            assert!((got - want).abs() < 1e-7, "{lrs:?}");
        }
        assert_eq!(opt.scheduler_steps(), 7);
    }

    #[test]
    fn test_state_round_trip() {
        let mut model = scalar(1.0);
        let mut opt = ScheduledOptimizer::new("test", &config(2, 0.5)).unwrap();
        for step in 1..=3 {
            opt.step(&mut model, &grads(0.5), step, 10).unwrap();
        }
        let saved = opt.state_arrays();
        assert!(saved.contains_key("w.m"));
        assert!(saved.contains_key("w.v"));

        let mut restored = ScheduledOptimizer::new("test", &config(2, 0.5)).unwrap();
        restored.restore(saved, opt.scheduler_steps()).unwrap();
        assert_eq!(restored.scheduler_steps(), 3);
        assert!((restored.learning_rate() - opt.learning_rate()).abs() < 1e-9);

        let mut a = scalar(model.w.item::<f32>());
        let mut b = scalar(model.w.item::<f32>());
        opt.step(&mut a, &grads(0.25), 4, 10).unwrap();
        restored.step(&mut b, &grads(0.25), 4, 10).unwrap();
        assert_eq!(a.w.item::<f32>(), b.w.item::<f32>());
    }

    #[test]
    fn test_restore_rejects_unpaired_moments() {
        let mut opt = ScheduledOptimizer::new("test", &config(2, 0.5)).unwrap();
        let mut arrays = HashMap::new();
        arrays.insert("w.m".to_string(), Array::from_f32(0.0));
        assert!(opt.restore(arrays, 0).is_err());
    }
}
