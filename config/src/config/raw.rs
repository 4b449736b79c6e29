//! Structs mapping one-to-one onto the manifest's YAML tree.
//!
//! Every field is optional and absent fields are skipped on output, so a
//! manifest read into [`ExperimentRaw`] and written back keeps exactly the
//! keys it started with. Unknown keys are rejected.

use serde::{Deserialize, Serialize};

// --- Top Level ---
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub runtime: Option<RuntimeRaw>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub task: Option<TaskRaw>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub trainer: Option<TrainerRaw>,
}

// --- Runtime ---
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeRaw {
  /// Expected values: "off", "one_device", "mirrored", "multi_worker_mirrored",
  /// "parameter_server" or "tpu".
  #[serde(skip_serializing_if = "Option::is_none")]
  pub distribution_strategy: Option<String>,
  /// Expected values: "float16", "bfloat16" or "float32".
  #[serde(skip_serializing_if = "Option::is_none")]
  pub mixed_precision_dtype: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub loss_scale: Option<LossScaleRaw>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub num_gpus: Option<i64>,
  /// Comma separated `host:port` list for multi-worker training.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub worker_hosts: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub task_index: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub all_reduce_alg: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tpu: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub enable_xla: Option<bool>,
}

/// `loss_scale` is either the string `dynamic` or a fixed positive factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LossScaleRaw {
  Fixed(f64),
  Named(String),
}

// --- Task ---
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub model: Option<ModelRaw>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub train_data: Option<DataRaw>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub validation_data: Option<DataRaw>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub init_checkpoint: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub init_checkpoint_modules: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub annotation_file: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub gradient_clip_norm: Option<f64>,
}

// --- Model ---
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub num_classes: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub input_size: Option<Vec<i64>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub min_level: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_level: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub boxes_per_scale: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub boxes: Option<Vec<AnchorRaw>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub backbone: Option<BackboneRaw>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub decoder: Option<DecoderRaw>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub head: Option<HeadRaw>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub detection_generator: Option<DetectionGeneratorRaw>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub loss: Option<LossRaw>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub norm_activation: Option<NormActivationRaw>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub darknet_weights_file: Option<String>,
}

/// An anchor prior, written either as `'(10, 13)'` or as `[10, 13]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnchorRaw {
  Pair(Vec<f64>),
  Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackboneRaw {
  #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
  pub kind: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub darknet: Option<DarknetRaw>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DarknetRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub model_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecoderRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
  pub kind: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub activation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeadRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub smart_bias: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectionGeneratorRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub nms_type: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub nms_thresh: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub iou_thresh: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ignore_thresh: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub pre_nms_points: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_boxes: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LossRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub loss_type: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ignore_thresh: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub truth_thresh: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub iou_normalizer: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cls_normalizer: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub obj_normalizer: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub scale_x_y: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub label_smoothing: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub use_scaled_loss: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_delta: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NormActivationRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub activation: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub use_sync_bn: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub norm_momentum: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub norm_epsilon: Option<f64>,
}

// --- Data ---
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub input_path: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tfds_name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tfds_split: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub global_batch_size: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub is_training: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub drop_remainder: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub shuffle_buffer_size: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cache: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub dtype: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub parser: Option<ParserRaw>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParserRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub image_w: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub image_h: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub fixed_size: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub jitter_im: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub jitter_boxes: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub min_process_size: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_process_size: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_num_instances: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub random_flip: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub pct_rand: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub aug_rand_saturation: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub aug_rand_brightness: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub aug_rand_zoom: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub aug_rand_hue: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub use_tie_breaker: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub seed: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub mosaic: Option<MosaicRaw>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MosaicRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub mosaic_frequency: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub mixup_frequency: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub crop_area: Option<Vec<f64>>,
}

// --- Trainer ---
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainerRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub train_steps: Option<i64>,
  /// `-1` evaluates the whole validation split.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub validation_steps: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub validation_interval: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub steps_per_loop: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub summary_interval: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub checkpoint_interval: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_to_keep: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub optimizer_config: Option<OptimizationRaw>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizationRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub optimizer: Option<OptimizerRaw>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ema: Option<EmaRaw>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub learning_rate: Option<LearningRateRaw>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub warmup: Option<WarmupRaw>,
}

// --- Optimizer (oneof keyed by `type`) ---
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizerRaw {
  #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
  pub kind: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub sgd: Option<SgdRaw>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub adam: Option<AdamRaw>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub adamw: Option<AdamRaw>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SgdRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub momentum: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub nesterov: Option<bool>,
}

/// Shared by `adam` and `adamw`; `weight_decay_rate` is only meaningful for the latter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdamRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub beta_1: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub beta_2: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub epsilon: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub weight_decay_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmaRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub average_decay: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub trainable_weights_only: Option<bool>,
}

// --- Learning rate (oneof keyed by `type`) ---
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LearningRateRaw {
  #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
  pub kind: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub constant: Option<ConstantLrRaw>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub stepwise: Option<StepwiseLrRaw>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub exponential: Option<ExponentialLrRaw>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub polynomial: Option<PolynomialLrRaw>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cosine: Option<CosineLrRaw>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstantLrRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub learning_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepwiseLrRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub boundaries: Option<Vec<i64>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub values: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExponentialLrRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub initial_learning_rate: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub decay_steps: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub decay_rate: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub staircase: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolynomialLrRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub initial_learning_rate: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub decay_steps: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub end_learning_rate: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub power: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cycle: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CosineLrRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub initial_learning_rate: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub decay_steps: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub alpha: Option<f64>,
}

// --- Warmup (oneof keyed by `type`) ---
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WarmupRaw {
  #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
  pub kind: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub linear: Option<LinearWarmupRaw>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub polynomial: Option<PolynomialWarmupRaw>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinearWarmupRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub warmup_steps: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub warmup_learning_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolynomialWarmupRaw {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub warmup_steps: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub power: Option<f64>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn anchors_accept_strings_and_pairs() {
    let boxes: Vec<AnchorRaw> = serde_yaml::from_str("['(10, 13)', [16, 30]]").unwrap();
    assert_eq!(
      boxes,
      vec![
        AnchorRaw::Text("(10, 13)".to_string()),
        AnchorRaw::Pair(vec![16.0, 30.0]),
      ]
    );
  }

  #[test]
  fn unknown_keys_are_rejected() {
    let result: Result<RuntimeRaw, _> = serde_yaml::from_str("num_gpu: 2");
    let message = result.unwrap_err().to_string();
    assert!(message.contains("num_gpu"), "unexpected error: {}", message);
  }

  #[test]
  fn duplicate_keys_are_rejected() {
    let result: Result<RuntimeRaw, _> = serde_yaml::from_str("num_gpus: 2\nnum_gpus: 4\n");
    assert!(result.is_err());
  }

  #[test]
  fn absent_fields_are_not_written() {
    let raw = ExperimentRaw {
      runtime: Some(RuntimeRaw {
        num_gpus: Some(1),
        ..Default::default()
      }),
      ..Default::default()
    };
    let text = serde_yaml::to_string(&raw).unwrap();
    assert_eq!(text, "runtime:\n  num_gpus: 1\n");
  }

  #[test]
  fn type_key_maps_to_kind() {
    let lr: LearningRateRaw =
      serde_yaml::from_str("type: stepwise\nstepwise:\n  boundaries: [10]\n  values: [0.1, 0.01]\n")
        .unwrap();
    assert_eq!(lr.kind.as_deref(), Some("stepwise"));
    assert_eq!(lr.stepwise.unwrap().boundaries, Some(vec![10]));
  }
}
