//! Resolves the `runtime` section into a concrete device and precision plan.

use crate::config::processed::{
  AllReduceAlg, DistributionStrategy, LossScale, ModelConfig, NmsType, Precision, RuntimeConfig,
};
use crate::error::{Error, Result};
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct DistributionPlan {
  pub strategy: DistributionStrategy,
  /// Devices used by this worker, e.g. `/gpu:0`, or `/cpu:0` without GPUs.
  pub devices: Vec<String>,
  pub num_workers: u32,
  /// Total replicas across all workers. `None` when decided by the TPU system.
  pub num_replicas: Option<u32>,
  /// Keras-style dtype policy name: `mixed_float16`, `mixed_bfloat16` or `float32`.
  pub precision_policy: &'static str,
  /// Only set for float16 training.
  pub loss_scale: Option<LossScale>,
  pub soft_device_placement: bool,
  pub all_reduce_alg: Option<AllReduceAlg>,
  pub tpu_address: Option<String>,
}

impl DistributionPlan {
  pub fn resolve(runtime: &RuntimeConfig, model: &ModelConfig) -> Result<Self> {
    let strategy = runtime.distribution_strategy;
    let local_devices: Vec<String> = if runtime.num_gpus == 0 {
      vec!["/cpu:0".to_string()]
    } else {
      (0..runtime.num_gpus).map(|i| format!("/gpu:{}", i)).collect()
    };
    let num_workers = (runtime.worker_hosts.len() as u32).max(1);

    if let Some(alg) = runtime.all_reduce_alg {
      if !matches!(
        strategy,
        DistributionStrategy::Mirrored | DistributionStrategy::MultiWorkerMirrored
      ) {
        return Err(Error::invalid(
          "runtime.all_reduce_alg",
          format!("'{}' only applies to mirrored strategies, not '{}'.", alg, strategy),
        ));
      }
    }

    if num_workers > 1 {
      if !matches!(
        strategy,
        DistributionStrategy::MultiWorkerMirrored | DistributionStrategy::ParameterServer
      ) {
        warn!(
          %strategy,
          num_workers, "worker_hosts is only used by multi-worker strategies"
        );
      } else if runtime.task_index < 0 || runtime.task_index >= i64::from(num_workers) {
        return Err(Error::invalid(
          "runtime.task_index",
          format!(
            "{} is outside the worker list of {} hosts.",
            runtime.task_index, num_workers
          ),
        ));
      }
    }

    let (devices, num_replicas) = match strategy {
      DistributionStrategy::Off => (vec![local_devices[0].clone()], Some(1)),
      DistributionStrategy::OneDevice => {
        if runtime.num_gpus > 1 {
          return Err(Error::invalid(
            "runtime.num_gpus",
            format!(
              "one_device strategy can use at most one GPU, got {}.",
              runtime.num_gpus
            ),
          ));
        }
        (vec![local_devices[0].clone()], Some(1))
      }
      DistributionStrategy::Mirrored => {
        let replicas = local_devices.len() as u32;
        (local_devices, Some(replicas))
      }
      DistributionStrategy::MultiWorkerMirrored | DistributionStrategy::ParameterServer => {
        let replicas = (local_devices.len() as u32).checked_mul(num_workers).ok_or_else(|| {
          Error::invalid(
            "runtime.worker_hosts",
            format!(
              "{} workers with {} devices each is out of range.",
              num_workers,
              local_devices.len()
            ),
          )
        })?;
        (local_devices, Some(replicas))
      }
      DistributionStrategy::Tpu => {
        if runtime.tpu.is_none() {
          warn!("No TPU address configured; the local TPU system will be used");
        }
        if runtime.num_gpus > 0 {
          warn!(num_gpus = runtime.num_gpus, "num_gpus is ignored by the tpu strategy");
        }
        (Vec::new(), None)
      }
    };

    let precision_policy = match runtime.mixed_precision_dtype {
      Some(Precision::Float16) => "mixed_float16",
      Some(Precision::Bfloat16) => "mixed_bfloat16",
      Some(Precision::Float32) | None => "float32",
    };
    let loss_scale = match runtime.mixed_precision_dtype {
      Some(Precision::Float16) => Some(runtime.loss_scale.unwrap_or(LossScale::Dynamic)),
      _ => {
        if runtime.loss_scale.is_some() {
          warn!(precision_policy, "loss_scale only applies to float16 training and is ignored");
        }
        None
      }
    };

    let plan = DistributionPlan {
      strategy,
      devices,
      num_workers,
      num_replicas,
      precision_policy,
      loss_scale,
      soft_device_placement: model.detection_generator.nms_type == NmsType::Greedy,
      all_reduce_alg: runtime.all_reduce_alg,
      tpu_address: runtime.tpu.clone(),
    };
    debug!(?plan, "Resolved distribution plan");
    Ok(plan)
  }

  /// Splits a global batch across replicas. `Ok(None)` when the replica count
  /// is only known at run time.
  pub fn per_replica_batch(&self, field: &str, global_batch_size: u32) -> Result<Option<u32>> {
    let Some(replicas) = self.num_replicas else {
      return Ok(None);
    };
    if global_batch_size % replicas != 0 {
      return Err(Error::invalid(
        field,
        format!(
          "Global batch size {} is not divisible by {} replicas.",
          global_batch_size, replicas
        ),
      ));
    }
    Ok(Some(global_batch_size / replicas))
  }
}

impl fmt::Display for DistributionPlan {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "strategy:              {}", self.strategy)?;
    writeln!(f, "devices:               {}", self.devices.join(", "))?;
    writeln!(f, "workers:               {}", self.num_workers)?;
    match self.num_replicas {
      Some(replicas) => writeln!(f, "replicas:              {}", replicas)?,
      None => writeln!(f, "replicas:              (decided by the TPU system)")?,
    }
    writeln!(f, "precision policy:      {}", self.precision_policy)?;
    match self.loss_scale {
      Some(LossScale::Dynamic) => writeln!(f, "loss scale:            dynamic")?,
      Some(LossScale::Fixed(value)) => writeln!(f, "loss scale:            {}", value)?,
      None => writeln!(f, "loss scale:            none")?,
    }
    writeln!(f, "soft device placement: {}", self.soft_device_placement)?;
    if let Some(alg) = self.all_reduce_alg {
      writeln!(f, "all-reduce:            {}", alg)?;
    }
    if let Some(tpu) = &self.tpu_address {
      writeln!(f, "tpu:                   {}", tpu)?;
    }
    Ok(())
  }
}
