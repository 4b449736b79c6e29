//! Learning-rate schedules described by `trainer.optimizer_config`.

use crate::config::processed::{LearningRate, OptimizationConfig, Warmup};
use std::f64::consts::PI;

/// A learning-rate schedule plus optional warmup, evaluated per training step.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningRateSchedule {
  base: LearningRate,
  warmup: Option<Warmup>,
}

impl LearningRateSchedule {
  pub fn new(base: LearningRate, warmup: Option<Warmup>) -> Self {
    Self { base, warmup }
  }

  pub fn from_config(config: &OptimizationConfig) -> Self {
    Self::new(config.learning_rate.clone(), config.warmup.clone())
  }

  /// The learning rate in effect at `step`.
  pub fn learning_rate(&self, step: u64) -> f64 {
    match &self.warmup {
      Some(Warmup::Linear {
        warmup_steps,
        warmup_learning_rate,
      }) if step < *warmup_steps => {
        let target = self.decayed(*warmup_steps);
        let progress = step as f64 / *warmup_steps as f64;
        warmup_learning_rate + (target - warmup_learning_rate) * progress
      }
      Some(Warmup::Polynomial { warmup_steps, power }) if step < *warmup_steps => {
        let target = self.decayed(*warmup_steps);
        target * (step as f64 / *warmup_steps as f64).powf(*power)
      }
      _ => self.decayed(step),
    }
  }

  /// `(step, learning_rate)` pairs at every `every` steps up to and including `last_step`.
  pub fn sample(&self, every: u64, last_step: u64) -> Vec<(u64, f64)> {
    let every = every.max(1);
    let mut points: Vec<(u64, f64)> = (0..=last_step)
      .step_by(every as usize)
      .map(|step| (step, self.learning_rate(step)))
      .collect();
    if points.last().map(|(step, _)| *step) != Some(last_step) {
      points.push((last_step, self.learning_rate(last_step)));
    }
    points
  }

  fn decayed(&self, step: u64) -> f64 {
    match &self.base {
      LearningRate::Constant { learning_rate } => *learning_rate,
      LearningRate::Stepwise { boundaries, values } => boundaries
        .iter()
        .position(|boundary| step <= *boundary)
        .and_then(|i| values.get(i))
        .or_else(|| values.last())
        .copied()
        .unwrap_or(0.0),
      LearningRate::Exponential {
        initial_learning_rate,
        decay_steps,
        decay_rate,
        staircase,
      } => {
        let mut exponent = step as f64 / *decay_steps as f64;
        if *staircase {
          exponent = exponent.floor();
        }
        initial_learning_rate * decay_rate.powf(exponent)
      }
      LearningRate::Polynomial {
        initial_learning_rate,
        decay_steps,
        end_learning_rate,
        power,
        cycle,
      } => {
        let (step, decay_steps) = if *cycle {
          let periods = if step == 0 { 1 } else { step.div_ceil(*decay_steps) };
          (step, decay_steps * periods)
        } else {
          (step.min(*decay_steps), *decay_steps)
        };
        let remaining = 1.0 - step as f64 / decay_steps as f64;
        (initial_learning_rate - end_learning_rate) * remaining.powf(*power) + end_learning_rate
      }
      LearningRate::Cosine {
        initial_learning_rate,
        decay_steps,
        alpha,
      } => {
        let step = step.min(*decay_steps) as f64;
        let cosine = 0.5 * (1.0 + (PI * step / *decay_steps as f64).cos());
        initial_learning_rate * ((1.0 - alpha) * cosine + alpha)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn assert_close(actual: f64, expected: f64) {
    assert!(
      (actual - expected).abs() <= 1e-12_f64.max(expected.abs() * 1e-9),
      "expected {}, got {}",
      expected,
      actual
    );
  }

  fn stepwise() -> LearningRate {
    LearningRate::Stepwise {
      boundaries: vec![400_000, 450_000],
      values: vec![0.001, 0.0001, 0.00001],
    }
  }

  #[test]
  fn stepwise_boundaries_are_inclusive() {
    let schedule = LearningRateSchedule::new(stepwise(), None);
    assert_close(schedule.learning_rate(0), 0.001);
    assert_close(schedule.learning_rate(400_000), 0.001);
    assert_close(schedule.learning_rate(400_001), 0.0001);
    assert_close(schedule.learning_rate(450_000), 0.0001);
    assert_close(schedule.learning_rate(450_001), 0.00001);
  }

  #[test]
  fn polynomial_warmup_ramps_to_schedule() {
    let schedule = LearningRateSchedule::new(
      stepwise(),
      Some(Warmup::Polynomial {
        warmup_steps: 1000,
        power: 4.0,
      }),
    );
    assert_close(schedule.learning_rate(0), 0.0);
    assert_close(schedule.learning_rate(500), 0.001 * 0.0625);
    assert_close(schedule.learning_rate(1000), 0.001);
  }

  #[test]
  fn linear_warmup_interpolates() {
    let schedule = LearningRateSchedule::new(
      LearningRate::Constant { learning_rate: 0.1 },
      Some(Warmup::Linear {
        warmup_steps: 100,
        warmup_learning_rate: 0.0,
      }),
    );
    assert_close(schedule.learning_rate(25), 0.025);
    assert_close(schedule.learning_rate(100), 0.1);
  }

  #[test]
  fn exponential_staircase_steps() {
    let schedule = LearningRateSchedule::new(
      LearningRate::Exponential {
        initial_learning_rate: 1.0,
        decay_steps: 10,
        decay_rate: 0.5,
        staircase: true,
      },
      None,
    );
    assert_close(schedule.learning_rate(9), 1.0);
    assert_close(schedule.learning_rate(10), 0.5);
    assert_close(schedule.learning_rate(25), 0.25);
  }

  #[test]
  fn polynomial_decay_holds_end_rate() {
    let schedule = LearningRateSchedule::new(
      LearningRate::Polynomial {
        initial_learning_rate: 1.0,
        decay_steps: 100,
        end_learning_rate: 0.1,
        power: 1.0,
        cycle: false,
      },
      None,
    );
    assert_close(schedule.learning_rate(50), 0.55);
    assert_close(schedule.learning_rate(100), 0.1);
    assert_close(schedule.learning_rate(1000), 0.1);
  }

  #[test]
  fn cosine_decays_to_alpha() {
    let schedule = LearningRateSchedule::new(
      LearningRate::Cosine {
        initial_learning_rate: 2.0,
        decay_steps: 100,
        alpha: 0.1,
      },
      None,
    );
    assert_close(schedule.learning_rate(0), 2.0);
    assert_close(schedule.learning_rate(50), 2.0 * (0.9 * 0.5 + 0.1));
    assert_close(schedule.learning_rate(500), 0.2);
  }

  #[test]
  fn sample_includes_last_step() {
    let schedule = LearningRateSchedule::new(LearningRate::Constant { learning_rate: 0.5 }, None);
    let steps: Vec<u64> = schedule.sample(4, 10).into_iter().map(|(step, _)| step).collect();
    assert_eq!(steps, vec![0, 4, 8, 10]);
  }
}
