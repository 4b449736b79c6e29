// src/config/processed.rs
use crate::config::anchor::{yolov3_coco_anchors, Anchor};
use crate::config::choice::choice_enum;
use crate::config::raw::{
  AdamRaw, BackboneRaw, DarknetRaw, DataRaw, DecoderRaw, DetectionGeneratorRaw, EmaRaw,
  ExperimentRaw, HeadRaw, LearningRateRaw, LossRaw, LossScaleRaw, ModelRaw, MosaicRaw,
  NormActivationRaw, OptimizationRaw, OptimizerRaw, ParserRaw, RuntimeRaw, SgdRaw, TaskRaw,
  TrainerRaw, WarmupRaw,
};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use yolo_ops::preprocess::rounded_input_size;

// --- Vocabularies ---

choice_enum! {
  /// How the external trainer spreads work across devices.
  pub enum DistributionStrategy {
    Off => "off",
    OneDevice => "one_device",
    Mirrored => "mirrored",
    MultiWorkerMirrored => "multi_worker_mirrored",
    ParameterServer => "parameter_server",
    Tpu => "tpu",
  }
}

choice_enum! {
  pub enum Precision {
    Float16 => "float16",
    Bfloat16 => "bfloat16",
    Float32 => "float32",
  }
}

choice_enum! {
  pub enum AllReduceAlg {
    Nccl => "nccl",
    HierarchicalCopy => "hierarchical_copy",
  }
}

choice_enum! {
  pub enum BackboneModel {
    Darknet53 => "darknet53",
    CspDarknet53 => "cspdarknet53",
    DarknetTiny => "darknettiny",
    CspDarknetTiny => "cspdarknettiny",
  }
}

choice_enum! {
  pub enum DecoderVersion {
    V3 => "v3",
    V4 => "v4",
  }
}

choice_enum! {
  pub enum DecoderType {
    Regular => "regular",
    Spp => "spp",
    Tiny => "tiny",
  }
}

choice_enum! {
  pub enum Activation {
    Leaky => "leaky",
    Mish => "mish",
    Relu => "relu",
    Linear => "linear",
    Swish => "swish",
  }
}

choice_enum! {
  /// Non-max suppression flavour used when decoding predictions.
  pub enum NmsType {
    Greedy => "greedy",
    Iou => "iou",
    Giou => "giou",
    Diou => "diou",
  }
}

choice_enum! {
  /// Box regression loss.
  pub enum LossType {
    Ciou => "ciou",
    Giou => "giou",
    Diou => "diou",
    Iou => "iou",
    Mse => "mse",
  }
}

// --- Processed Top Level Config ---
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentConfig {
  pub runtime: RuntimeConfig,
  pub task: TaskConfig,
  pub trainer: TrainerConfig,
}

// --- Runtime ---
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
  pub distribution_strategy: DistributionStrategy,
  pub mixed_precision_dtype: Option<Precision>,
  pub loss_scale: Option<LossScale>,
  pub num_gpus: u32,
  pub worker_hosts: Vec<String>,
  pub task_index: i64,
  pub all_reduce_alg: Option<AllReduceAlg>,
  pub tpu: Option<String>,
  pub enable_xla: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LossScale {
  Dynamic,
  Fixed(f64),
}

// --- Task ---
#[derive(Debug, Clone, PartialEq)]
pub struct TaskConfig {
  pub model: ModelConfig,
  pub train_data: DataConfig,
  pub validation_data: DataConfig,
  pub init_checkpoint: Option<String>,
  pub init_checkpoint_modules: Option<String>,
  pub annotation_file: Option<String>,
  /// `0.0` disables clipping.
  pub gradient_clip_norm: f64,
}

// --- Model ---
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
  pub num_classes: u32,
  /// `[height, width, channels]`.
  pub input_size: [u32; 3],
  pub min_level: u32,
  pub max_level: u32,
  pub boxes_per_scale: u32,
  pub boxes: Vec<Anchor>,
  pub backbone: BackboneModel,
  pub decoder: DecoderConfig,
  pub head: HeadConfig,
  pub detection_generator: DetectionGeneratorConfig,
  pub loss: LossConfig,
  pub norm_activation: NormActivationConfig,
  pub darknet_weights_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecoderConfig {
  pub version: DecoderVersion,
  pub kind: DecoderType,
  pub activation: Activation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeadConfig {
  pub smart_bias: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionGeneratorConfig {
  pub nms_type: NmsType,
  pub nms_thresh: f64,
  pub iou_thresh: f64,
  pub ignore_thresh: f64,
  pub pre_nms_points: u32,
  pub max_boxes: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LossConfig {
  pub loss_type: LossType,
  pub ignore_thresh: f64,
  pub truth_thresh: f64,
  pub iou_normalizer: f64,
  pub cls_normalizer: f64,
  pub obj_normalizer: f64,
  pub scale_x_y: f64,
  pub label_smoothing: f64,
  pub use_scaled_loss: bool,
  /// Gradient clip on box deltas; `None` leaves them unbounded.
  pub max_delta: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormActivationConfig {
  pub activation: Activation,
  pub use_sync_bn: bool,
  pub norm_momentum: f64,
  pub norm_epsilon: f64,
}

// --- Data ---
#[derive(Debug, Clone, PartialEq)]
pub struct DataConfig {
  pub input_path: Option<String>,
  pub tfds_name: Option<String>,
  pub tfds_split: Option<String>,
  pub global_batch_size: u32,
  pub is_training: bool,
  pub drop_remainder: bool,
  pub shuffle_buffer_size: u32,
  pub cache: bool,
  pub dtype: Precision,
  pub parser: ParserConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParserConfig {
  /// Already rounded down to a multiple of the network's down-scale factor.
  pub image_w: u32,
  pub image_h: u32,
  pub fixed_size: bool,
  pub jitter_im: f64,
  pub jitter_boxes: f64,
  pub min_process_size: u32,
  pub max_process_size: u32,
  pub max_num_instances: u32,
  pub random_flip: bool,
  pub pct_rand: f64,
  pub aug_rand_saturation: bool,
  pub aug_rand_brightness: bool,
  pub aug_rand_zoom: bool,
  pub aug_rand_hue: bool,
  pub use_tie_breaker: bool,
  pub seed: i64,
  pub mosaic: MosaicConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MosaicConfig {
  pub mosaic_frequency: f64,
  pub mixup_frequency: f64,
  pub crop_area: (f64, f64),
}

// --- Trainer ---
#[derive(Debug, Clone, PartialEq)]
pub struct TrainerConfig {
  pub train_steps: u64,
  /// `-1` evaluates the whole validation split.
  pub validation_steps: i64,
  pub validation_interval: u64,
  pub steps_per_loop: u64,
  pub summary_interval: u64,
  pub checkpoint_interval: u64,
  pub max_to_keep: u32,
  pub optimizer_config: OptimizationConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationConfig {
  pub optimizer: Optimizer,
  pub ema: Option<EmaConfig>,
  pub learning_rate: LearningRate,
  pub warmup: Option<Warmup>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Optimizer {
  Sgd {
    momentum: f64,
    nesterov: bool,
  },
  Adam {
    beta_1: f64,
    beta_2: f64,
    epsilon: f64,
  },
  AdamW {
    beta_1: f64,
    beta_2: f64,
    epsilon: f64,
    weight_decay_rate: f64,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmaConfig {
  pub average_decay: f64,
  pub trainable_weights_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LearningRate {
  Constant {
    learning_rate: f64,
  },
  /// `values[i]` applies up to and including `boundaries[i]`; the last value applies afterwards.
  Stepwise {
    boundaries: Vec<u64>,
    values: Vec<f64>,
  },
  Exponential {
    initial_learning_rate: f64,
    decay_steps: u64,
    decay_rate: f64,
    staircase: bool,
  },
  Polynomial {
    initial_learning_rate: f64,
    decay_steps: u64,
    end_learning_rate: f64,
    power: f64,
    cycle: bool,
  },
  Cosine {
    initial_learning_rate: f64,
    decay_steps: u64,
    alpha: f64,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Warmup {
  Linear {
    warmup_steps: u64,
    warmup_learning_rate: f64,
  },
  Polynomial {
    warmup_steps: u64,
    power: f64,
  },
}

// --- Derived values ---

impl ModelConfig {
  pub fn num_scales(&self) -> u32 {
    self.max_level - self.min_level + 1
  }

  /// Feature level -> indices into `boxes` predicted at that level.
  pub fn anchor_masks(&self) -> BTreeMap<u32, Vec<usize>> {
    yolo_ops::anchors::anchor_masks(self.min_level, self.max_level, self.boxes_per_scale as usize)
  }

  /// Stride between output cells at the coarsest level.
  pub fn net_down_scale(&self) -> u32 {
    1 << self.max_level
  }
}

impl ParserConfig {
  /// Input sizes the trainer may draw for multi-scale training, smallest first.
  pub fn random_scale_sizes(&self, net_down_scale: u32) -> Vec<u32> {
    if self.fixed_size {
      return vec![self.image_w];
    }
    (10..=20).map(|factor| factor * net_down_scale).collect()
  }
}

impl Warmup {
  pub fn warmup_steps(&self) -> u64 {
    match self {
      Warmup::Linear { warmup_steps, .. } | Warmup::Polynomial { warmup_steps, .. } => *warmup_steps,
    }
  }
}

// --- Defaults ---

const DEFAULT_IMAGE_SIZE: i64 = 416;
const DEFAULT_TRAIN_BATCH: i64 = 64;
const DEFAULT_EVAL_BATCH: i64 = 8;

// --- Conversion and Validation Logic ---

/// Processes the raw, deserialized manifest into a validated experiment.
pub fn process_raw_config(raw: ExperimentRaw) -> Result<ExperimentConfig> {
  let runtime = process_runtime(raw.runtime.unwrap_or_default())?;
  let task = process_task(raw.task.unwrap_or_default())?;
  let trainer = process_trainer(raw.trainer.unwrap_or_default())?;
  debug!(
    strategy = %runtime.distribution_strategy,
    num_gpus = runtime.num_gpus,
    train_steps = trainer.train_steps,
    "Processed experiment config"
  );
  Ok(ExperimentConfig {
    runtime,
    task,
    trainer,
  })
}

/// Upper bound on `runtime.num_gpus`; each GPU becomes a device entry in the plan.
pub const MAX_GPUS_PER_WORKER: u32 = 1024;

fn process_runtime(raw: RuntimeRaw) -> Result<RuntimeConfig> {
  let distribution_strategy = match raw.distribution_strategy.as_deref() {
    Some(s) => DistributionStrategy::parse("runtime.distribution_strategy", s)?,
    None => DistributionStrategy::Mirrored,
  };
  let mixed_precision_dtype = raw
    .mixed_precision_dtype
    .as_deref()
    .map(|s| Precision::parse("runtime.mixed_precision_dtype", s))
    .transpose()?;
  let loss_scale = match raw.loss_scale {
    None => None,
    Some(LossScaleRaw::Named(name)) if name.eq_ignore_ascii_case("dynamic") => Some(LossScale::Dynamic),
    Some(LossScaleRaw::Named(name)) => {
      return Err(Error::invalid(
        "runtime.loss_scale",
        format!("Expected 'dynamic' or a positive number, got '{}'.", name),
      ))
    }
    Some(LossScaleRaw::Fixed(value)) => {
      positive_f64("runtime.loss_scale", value)?;
      Some(LossScale::Fixed(value))
    }
  };
  let num_gpus = non_negative_u32("runtime.num_gpus", raw.num_gpus.unwrap_or(0))?;
  if num_gpus > MAX_GPUS_PER_WORKER {
    return Err(Error::invalid(
      "runtime.num_gpus",
      format!("{} GPUs on one worker exceeds the limit of {}.", num_gpus, MAX_GPUS_PER_WORKER),
    ));
  }
  let worker_hosts: Vec<String> = raw
    .worker_hosts
    .as_deref()
    .unwrap_or("")
    .split(',')
    .map(str::trim)
    .filter(|host| !host.is_empty())
    .map(str::to_string)
    .collect();
  let all_reduce_alg = raw
    .all_reduce_alg
    .as_deref()
    .filter(|s| !s.trim().is_empty())
    .map(|s| AllReduceAlg::parse("runtime.all_reduce_alg", s))
    .transpose()?;

  Ok(RuntimeConfig {
    distribution_strategy,
    mixed_precision_dtype,
    loss_scale,
    num_gpus,
    worker_hosts,
    task_index: raw.task_index.unwrap_or(-1),
    all_reduce_alg,
    tpu: raw.tpu.filter(|s| !s.trim().is_empty()),
    enable_xla: raw.enable_xla.unwrap_or(false),
  })
}

fn process_task(raw: TaskRaw) -> Result<TaskConfig> {
  let model = process_model(raw.model.unwrap_or_default())?;
  let net_down_scale = model.net_down_scale();
  let train_data = process_data(
    "task.train_data",
    raw.train_data.unwrap_or_default(),
    true,
    DEFAULT_TRAIN_BATCH,
    net_down_scale,
  )?;
  let validation_data = process_data(
    "task.validation_data",
    raw.validation_data.unwrap_or_default(),
    false,
    DEFAULT_EVAL_BATCH,
    net_down_scale,
  )?;
  let gradient_clip_norm = raw.gradient_clip_norm.unwrap_or(0.0);
  if !gradient_clip_norm.is_finite() || gradient_clip_norm < 0.0 {
    return Err(Error::invalid(
      "task.gradient_clip_norm",
      format!("Must be a non-negative number, got {}.", gradient_clip_norm),
    ));
  }

  Ok(TaskConfig {
    model,
    train_data,
    validation_data,
    init_checkpoint: raw.init_checkpoint,
    init_checkpoint_modules: raw.init_checkpoint_modules,
    annotation_file: raw.annotation_file,
    gradient_clip_norm,
  })
}

fn process_model(raw: ModelRaw) -> Result<ModelConfig> {
  let num_classes = positive_u32("task.model.num_classes", raw.num_classes.unwrap_or(80))?;

  let input_size = match raw.input_size {
    None => [416, 416, 3],
    Some(dims) => match dims.as_slice() {
      [h, w, c] => [
        positive_u32("task.model.input_size[0]", *h)?,
        positive_u32("task.model.input_size[1]", *w)?,
        positive_u32("task.model.input_size[2]", *c)?,
      ],
      _ => {
        return Err(Error::invalid(
          "task.model.input_size",
          format!("Expected [height, width, channels], got {} values.", dims.len()),
        ))
      }
    },
  };

  let min_level = positive_u32("task.model.min_level", raw.min_level.unwrap_or(3))?;
  let max_level = positive_u32("task.model.max_level", raw.max_level.unwrap_or(5))?;
  if min_level > max_level {
    return Err(Error::invalid(
      "task.model.max_level",
      format!("max_level ({}) must be >= min_level ({}).", max_level, min_level),
    ));
  }
  if max_level > 10 {
    return Err(Error::invalid(
      "task.model.max_level",
      format!("max_level ({}) is larger than any supported stride (2^10).", max_level),
    ));
  }
  let boxes_per_scale = positive_u32("task.model.boxes_per_scale", raw.boxes_per_scale.unwrap_or(3))?;

  let boxes = match raw.boxes {
    None => yolov3_coco_anchors(),
    Some(list) => list
      .iter()
      .enumerate()
      .map(|(i, anchor)| Anchor::from_raw(&format!("task.model.boxes[{}]", i), anchor))
      .collect::<Result<Vec<_>>>()?,
  };
  let num_scales = max_level - min_level + 1;
  let expected = boxes_per_scale.checked_mul(num_scales).ok_or_else(|| {
    Error::invalid(
      "task.model.boxes_per_scale",
      format!("{} anchors per scale over {} scales is out of range.", boxes_per_scale, num_scales),
    )
  })? as usize;
  if boxes.len() != expected {
    return Err(Error::invalid(
      "task.model.boxes",
      format!(
        "Expected boxes_per_scale * (max_level - min_level + 1) = {} * {} = {} anchors, got {}.",
        boxes_per_scale,
        num_scales,
        expected,
        boxes.len()
      ),
    ));
  }

  Ok(ModelConfig {
    num_classes,
    input_size,
    min_level,
    max_level,
    boxes_per_scale,
    boxes,
    backbone: process_backbone(raw.backbone.unwrap_or_default())?,
    decoder: process_decoder(raw.decoder.unwrap_or_default())?,
    head: HeadConfig {
      smart_bias: raw.head.unwrap_or_default().smart_bias.unwrap_or(false),
    },
    detection_generator: process_detection_generator(raw.detection_generator.unwrap_or_default())?,
    loss: process_loss(raw.loss.unwrap_or_default())?,
    norm_activation: process_norm_activation(raw.norm_activation.unwrap_or_default())?,
    darknet_weights_file: raw.darknet_weights_file.filter(|s| !s.trim().is_empty()),
  })
}

fn process_backbone(raw: BackboneRaw) -> Result<BackboneModel> {
  if let Some(kind) = raw.kind.as_deref() {
    if !kind.eq_ignore_ascii_case("darknet") {
      return Err(Error::invalid(
        "task.model.backbone.type",
        format!("Unknown backbone type '{}'. Expected 'darknet'.", kind),
      ));
    }
  }
  match raw.darknet.and_then(|d| d.model_id) {
    Some(id) => BackboneModel::parse("task.model.backbone.darknet.model_id", &id),
    None => Ok(BackboneModel::Darknet53),
  }
}

fn process_decoder(raw: DecoderRaw) -> Result<DecoderConfig> {
  Ok(DecoderConfig {
    version: match raw.version.as_deref() {
      Some(s) => DecoderVersion::parse("task.model.decoder.version", s)?,
      None => DecoderVersion::V3,
    },
    kind: match raw.kind.as_deref() {
      Some(s) => DecoderType::parse("task.model.decoder.type", s)?,
      None => DecoderType::Regular,
    },
    activation: match raw.activation.as_deref() {
      Some(s) => Activation::parse("task.model.decoder.activation", s)?,
      None => Activation::Leaky,
    },
  })
}

fn process_detection_generator(raw: DetectionGeneratorRaw) -> Result<DetectionGeneratorConfig> {
  let prefix = "task.model.detection_generator";
  Ok(DetectionGeneratorConfig {
    nms_type: match raw.nms_type.as_deref() {
      Some(s) => NmsType::parse(&format!("{}.nms_type", prefix), s)?,
      None => NmsType::Greedy,
    },
    nms_thresh: unit_interval(&format!("{}.nms_thresh", prefix), raw.nms_thresh.unwrap_or(0.45))?,
    iou_thresh: unit_interval(&format!("{}.iou_thresh", prefix), raw.iou_thresh.unwrap_or(0.213))?,
    ignore_thresh: unit_interval(
      &format!("{}.ignore_thresh", prefix),
      raw.ignore_thresh.unwrap_or(0.7),
    )?,
    pre_nms_points: positive_u32(
      &format!("{}.pre_nms_points", prefix),
      raw.pre_nms_points.unwrap_or(5000),
    )?,
    max_boxes: positive_u32(&format!("{}.max_boxes", prefix), raw.max_boxes.unwrap_or(200))?,
  })
}

fn process_loss(raw: LossRaw) -> Result<LossConfig> {
  let prefix = "task.model.loss";
  let label_smoothing = raw.label_smoothing.unwrap_or(0.0);
  if !(0.0..1.0).contains(&label_smoothing) {
    return Err(Error::invalid(
      format!("{}.label_smoothing", prefix),
      format!("Must be in [0, 1), got {}.", label_smoothing),
    ));
  }
  let scale_x_y = raw.scale_x_y.unwrap_or(1.0);
  if !scale_x_y.is_finite() || scale_x_y < 1.0 {
    return Err(Error::invalid(
      format!("{}.scale_x_y", prefix),
      format!("Must be >= 1.0, got {}.", scale_x_y),
    ));
  }
  let max_delta = raw
    .max_delta
    .map(|v| positive_f64(&format!("{}.max_delta", prefix), v))
    .transpose()?;

  Ok(LossConfig {
    loss_type: match raw.loss_type.as_deref() {
      Some(s) => LossType::parse(&format!("{}.loss_type", prefix), s)?,
      None => LossType::Ciou,
    },
    ignore_thresh: unit_interval(&format!("{}.ignore_thresh", prefix), raw.ignore_thresh.unwrap_or(0.7))?,
    truth_thresh: unit_interval(&format!("{}.truth_thresh", prefix), raw.truth_thresh.unwrap_or(1.0))?,
    iou_normalizer: positive_f64(&format!("{}.iou_normalizer", prefix), raw.iou_normalizer.unwrap_or(1.0))?,
    cls_normalizer: positive_f64(&format!("{}.cls_normalizer", prefix), raw.cls_normalizer.unwrap_or(1.0))?,
    obj_normalizer: positive_f64(&format!("{}.obj_normalizer", prefix), raw.obj_normalizer.unwrap_or(1.0))?,
    scale_x_y,
    label_smoothing,
    use_scaled_loss: raw.use_scaled_loss.unwrap_or(false),
    max_delta,
  })
}

fn process_norm_activation(raw: NormActivationRaw) -> Result<NormActivationConfig> {
  let prefix = "task.model.norm_activation";
  let norm_momentum = raw.norm_momentum.unwrap_or(0.99);
  if !(norm_momentum > 0.0 && norm_momentum < 1.0) {
    return Err(Error::invalid(
      format!("{}.norm_momentum", prefix),
      format!("Must be in (0, 1), got {}.", norm_momentum),
    ));
  }
  Ok(NormActivationConfig {
    activation: match raw.activation.as_deref() {
      Some(s) => Activation::parse(&format!("{}.activation", prefix), s)?,
      None => Activation::Leaky,
    },
    use_sync_bn: raw.use_sync_bn.unwrap_or(false),
    norm_momentum,
    norm_epsilon: positive_f64(&format!("{}.norm_epsilon", prefix), raw.norm_epsilon.unwrap_or(0.001))?,
  })
}

fn process_data(
  prefix: &str,
  raw: DataRaw,
  is_training_default: bool,
  default_batch: i64,
  net_down_scale: u32,
) -> Result<DataConfig> {
  let input_path = raw.input_path.filter(|s| !s.trim().is_empty());
  let tfds_name = raw.tfds_name.filter(|s| !s.trim().is_empty());
  if input_path.is_none() && tfds_name.is_none() {
    return Err(Error::invalid(
      format!("{}.input_path", prefix),
      "Either input_path or tfds_name must be set.",
    ));
  }

  let dtype = match raw.dtype.as_deref() {
    Some(s) => Precision::parse(&format!("{}.dtype", prefix), s)?,
    None => Precision::Float32,
  };

  Ok(DataConfig {
    input_path,
    tfds_name,
    tfds_split: raw.tfds_split.filter(|s| !s.trim().is_empty()),
    global_batch_size: positive_u32(
      &format!("{}.global_batch_size", prefix),
      raw.global_batch_size.unwrap_or(default_batch),
    )?,
    is_training: raw.is_training.unwrap_or(is_training_default),
    drop_remainder: raw.drop_remainder.unwrap_or(true),
    shuffle_buffer_size: non_negative_u32(
      &format!("{}.shuffle_buffer_size", prefix),
      raw.shuffle_buffer_size.unwrap_or(10000),
    )?,
    cache: raw.cache.unwrap_or(false),
    dtype,
    parser: process_parser(
      &format!("{}.parser", prefix),
      raw.parser.unwrap_or_default(),
      net_down_scale,
    )?,
  })
}

fn process_parser(prefix: &str, raw: ParserRaw, net_down_scale: u32) -> Result<ParserConfig> {
  let image_w = round_to_stride(
    &format!("{}.image_w", prefix),
    raw.image_w.unwrap_or(DEFAULT_IMAGE_SIZE),
    net_down_scale,
  )?;
  let image_h = match raw.image_h {
    Some(h) => round_to_stride(&format!("{}.image_h", prefix), h, net_down_scale)?,
    None => image_w,
  };

  let jitter_im = half_open_unit(&format!("{}.jitter_im", prefix), raw.jitter_im.unwrap_or(0.1))?;
  let jitter_boxes = half_open_unit(
    &format!("{}.jitter_boxes", prefix),
    raw.jitter_boxes.unwrap_or(0.005),
  )?;
  let pct_rand = unit_interval(&format!("{}.pct_rand", prefix), raw.pct_rand.unwrap_or(0.5))?;

  let min_process_size = positive_u32(
    &format!("{}.min_process_size", prefix),
    raw.min_process_size.unwrap_or(320),
  )?;
  let max_process_size = positive_u32(
    &format!("{}.max_process_size", prefix),
    raw.max_process_size.unwrap_or(608),
  )?;
  if min_process_size > max_process_size {
    return Err(Error::invalid(
      format!("{}.min_process_size", prefix),
      format!(
        "min_process_size ({}) must be <= max_process_size ({}).",
        min_process_size, max_process_size
      ),
    ));
  }

  Ok(ParserConfig {
    image_w,
    image_h,
    fixed_size: raw.fixed_size.unwrap_or(false),
    jitter_im,
    jitter_boxes,
    min_process_size,
    max_process_size,
    max_num_instances: positive_u32(
      &format!("{}.max_num_instances", prefix),
      raw.max_num_instances.unwrap_or(200),
    )?,
    random_flip: raw.random_flip.unwrap_or(true),
    pct_rand,
    aug_rand_saturation: raw.aug_rand_saturation.unwrap_or(true),
    aug_rand_brightness: raw.aug_rand_brightness.unwrap_or(true),
    aug_rand_zoom: raw.aug_rand_zoom.unwrap_or(true),
    aug_rand_hue: raw.aug_rand_hue.unwrap_or(true),
    use_tie_breaker: raw.use_tie_breaker.unwrap_or(true),
    seed: raw.seed.unwrap_or(10),
    mosaic: process_mosaic(&format!("{}.mosaic", prefix), raw.mosaic.unwrap_or_default())?,
  })
}

fn process_mosaic(prefix: &str, raw: MosaicRaw) -> Result<MosaicConfig> {
  let crop_area = match raw.crop_area.as_deref() {
    None => (0.5, 1.0),
    Some([lo, hi]) if *lo > 0.0 && lo <= hi && *hi <= 1.0 => (*lo, *hi),
    Some(other) => {
      return Err(Error::invalid(
        format!("{}.crop_area", prefix),
        format!("Expected [min, max] with 0 < min <= max <= 1, got {:?}.", other),
      ))
    }
  };
  Ok(MosaicConfig {
    mosaic_frequency: unit_interval(
      &format!("{}.mosaic_frequency", prefix),
      raw.mosaic_frequency.unwrap_or(0.0),
    )?,
    mixup_frequency: unit_interval(
      &format!("{}.mixup_frequency", prefix),
      raw.mixup_frequency.unwrap_or(0.0),
    )?,
    crop_area,
  })
}

fn process_trainer(raw: TrainerRaw) -> Result<TrainerConfig> {
  let train_steps = positive_u64("trainer.train_steps", raw.train_steps.unwrap_or(500_500))?;
  let validation_steps = raw.validation_steps.unwrap_or(-1);
  if validation_steps == 0 || validation_steps < -1 {
    return Err(Error::invalid(
      "trainer.validation_steps",
      format!("Must be -1 (full split) or positive, got {}.", validation_steps),
    ));
  }
  let steps_per_loop = positive_u64("trainer.steps_per_loop", raw.steps_per_loop.unwrap_or(1000))?;
  let validation_interval = positive_u64(
    "trainer.validation_interval",
    raw.validation_interval.unwrap_or(1000),
  )?;
  let summary_interval = positive_u64("trainer.summary_interval", raw.summary_interval.unwrap_or(1000))?;
  let checkpoint_interval = positive_u64(
    "trainer.checkpoint_interval",
    raw.checkpoint_interval.unwrap_or(1000),
  )?;
  for (name, interval) in [
    ("summary_interval", summary_interval),
    ("checkpoint_interval", checkpoint_interval),
  ] {
    if interval % steps_per_loop != 0 {
      return Err(Error::invalid(
        format!("trainer.{}", name),
        format!(
          "{} ({}) must be a multiple of steps_per_loop ({}).",
          name, interval, steps_per_loop
        ),
      ));
    }
  }

  let optimizer_config = process_optimization(raw.optimizer_config.unwrap_or_default())?;
  if let LearningRate::Stepwise { boundaries, .. } = &optimizer_config.learning_rate {
    if let Some(last) = boundaries.last().filter(|last| **last >= train_steps) {
      warn!(
        boundary = *last,
        train_steps, "Stepwise learning rate boundary is never reached before training ends"
      );
    }
  }
  if let Some(warmup) = &optimizer_config.warmup {
    if warmup.warmup_steps() >= train_steps {
      warn!(
        warmup_steps = warmup.warmup_steps(),
        train_steps, "Warmup covers the entire training run"
      );
    }
  }

  Ok(TrainerConfig {
    train_steps,
    validation_steps,
    validation_interval,
    steps_per_loop,
    summary_interval,
    checkpoint_interval,
    max_to_keep: non_negative_u32("trainer.max_to_keep", raw.max_to_keep.unwrap_or(5))?,
    optimizer_config,
  })
}

fn process_optimization(raw: OptimizationRaw) -> Result<OptimizationConfig> {
  Ok(OptimizationConfig {
    optimizer: process_optimizer(raw.optimizer.unwrap_or_default())?,
    ema: raw.ema.map(process_ema).transpose()?,
    learning_rate: process_learning_rate(raw.learning_rate.unwrap_or_default())?,
    warmup: raw.warmup.map(process_warmup).transpose()?.flatten(),
  })
}

/// Picks the active member of a `{type: name, name: {...}}` block. Without a `type`,
/// the single configured member wins; none configured yields `default_kind`.
fn select_oneof(
  field: &str,
  kind: Option<&str>,
  present: &[(&'static str, bool)],
  default_kind: Option<&'static str>,
) -> Result<Option<&'static str>> {
  let configured: Vec<&'static str> = present
    .iter()
    .filter(|(_, is_set)| *is_set)
    .map(|(name, _)| *name)
    .collect();
  let selected = match kind {
    Some(kind) => {
      let names: Vec<(&str, &'static str)> = present.iter().map(|(name, _)| (*name, *name)).collect();
      Some(crate::config::choice::parse_choice(&format!("{}.type", field), kind, &names)?)
    }
    None => match configured.as_slice() {
      [] => default_kind,
      [only] => Some(*only),
      _ => {
        return Err(Error::invalid(
          format!("{}.type", field),
          format!("Several members configured ({}); set 'type' to choose one.", configured.join(", ")),
        ))
      }
    },
  };
  if let Some(selected) = selected {
    for ignored in configured.iter().filter(|name| **name != selected) {
      warn!(field, selected, ignored = *ignored, "Ignoring configured member that is not selected by 'type'");
    }
  }
  Ok(selected)
}

fn process_optimizer(raw: OptimizerRaw) -> Result<Optimizer> {
  let field = "trainer.optimizer_config.optimizer";
  let selected = select_oneof(
    field,
    raw.kind.as_deref(),
    &[
      ("sgd", raw.sgd.is_some()),
      ("adam", raw.adam.is_some()),
      ("adamw", raw.adamw.is_some()),
    ],
    Some("sgd"),
  )?;
  match selected {
    Some("adam") => {
      let adam = raw.adam.unwrap_or_default();
      let (beta_1, beta_2, epsilon) = process_adam_moments(&format!("{}.adam", field), &adam)?;
      Ok(Optimizer::Adam {
        beta_1,
        beta_2,
        epsilon,
      })
    }
    Some("adamw") => {
      let adamw = raw.adamw.unwrap_or_default();
      let prefix = format!("{}.adamw", field);
      let (beta_1, beta_2, epsilon) = process_adam_moments(&prefix, &adamw)?;
      let weight_decay_rate = adamw.weight_decay_rate.unwrap_or(0.0);
      if !weight_decay_rate.is_finite() || weight_decay_rate < 0.0 {
        return Err(Error::invalid(
          format!("{}.weight_decay_rate", prefix),
          format!("Must be a non-negative number, got {}.", weight_decay_rate),
        ));
      }
      Ok(Optimizer::AdamW {
        beta_1,
        beta_2,
        epsilon,
        weight_decay_rate,
      })
    }
    _ => {
      let sgd: SgdRaw = raw.sgd.unwrap_or_default();
      let momentum = sgd.momentum.unwrap_or(0.9);
      if !(0.0..1.0).contains(&momentum) {
        return Err(Error::invalid(
          format!("{}.sgd.momentum", field),
          format!("Must be in [0, 1), got {}.", momentum),
        ));
      }
      Ok(Optimizer::Sgd {
        momentum,
        nesterov: sgd.nesterov.unwrap_or(false),
      })
    }
  }
}

fn process_adam_moments(prefix: &str, raw: &AdamRaw) -> Result<(f64, f64, f64)> {
  let beta_1 = raw.beta_1.unwrap_or(0.9);
  let beta_2 = raw.beta_2.unwrap_or(0.999);
  for (name, beta) in [("beta_1", beta_1), ("beta_2", beta_2)] {
    if !(0.0..1.0).contains(&beta) {
      return Err(Error::invalid(
        format!("{}.{}", prefix, name),
        format!("Must be in [0, 1), got {}.", beta),
      ));
    }
  }
  let epsilon = positive_f64(&format!("{}.epsilon", prefix), raw.epsilon.unwrap_or(1e-7))?;
  Ok((beta_1, beta_2, epsilon))
}

fn process_ema(raw: EmaRaw) -> Result<EmaConfig> {
  let average_decay = raw.average_decay.unwrap_or(0.99);
  if !(average_decay > 0.0 && average_decay < 1.0) {
    return Err(Error::invalid(
      "trainer.optimizer_config.ema.average_decay",
      format!("Must be in (0, 1), got {}.", average_decay),
    ));
  }
  Ok(EmaConfig {
    average_decay,
    trainable_weights_only: raw.trainable_weights_only.unwrap_or(true),
  })
}

fn process_learning_rate(raw: LearningRateRaw) -> Result<LearningRate> {
  let field = "trainer.optimizer_config.learning_rate";
  let selected = select_oneof(
    field,
    raw.kind.as_deref(),
    &[
      ("constant", raw.constant.is_some()),
      ("stepwise", raw.stepwise.is_some()),
      ("exponential", raw.exponential.is_some()),
      ("polynomial", raw.polynomial.is_some()),
      ("cosine", raw.cosine.is_some()),
    ],
    Some("constant"),
  )?;

  match selected {
    Some("stepwise") => {
      let prefix = format!("{}.stepwise", field);
      let stepwise = raw.stepwise.unwrap_or_default();
      let raw_boundaries = stepwise
        .boundaries
        .ok_or_else(|| Error::invalid(format!("{}.boundaries", prefix), "Required for a stepwise schedule."))?;
      let values = stepwise
        .values
        .ok_or_else(|| Error::invalid(format!("{}.values", prefix), "Required for a stepwise schedule."))?;
      if values.is_empty() {
        return Err(Error::invalid(format!("{}.values", prefix), "Must not be empty."));
      }
      for (i, value) in values.iter().enumerate() {
        non_negative_f64(&format!("{}.values[{}]", prefix, i), *value)?;
      }
      if raw_boundaries.len() + 1 != values.len() {
        return Err(Error::invalid(
          format!("{}.boundaries", prefix),
          format!(
            "Expected len(boundaries) == len(values) - 1, got {} boundaries for {} values.",
            raw_boundaries.len(),
            values.len()
          ),
        ));
      }
      let mut boundaries = Vec::with_capacity(raw_boundaries.len());
      for (i, boundary) in raw_boundaries.iter().enumerate() {
        let boundary = positive_u64(&format!("{}.boundaries[{}]", prefix, i), *boundary)?;
        if let Some(previous) = boundaries.last() {
          if boundary <= *previous {
            return Err(Error::invalid(
              format!("{}.boundaries[{}]", prefix, i),
              format!(
                "Boundaries must be strictly increasing, got {} after {}.",
                boundary, previous
              ),
            ));
          }
        }
        boundaries.push(boundary);
      }
      Ok(LearningRate::Stepwise { boundaries, values })
    }
    Some("exponential") => {
      let prefix = format!("{}.exponential", field);
      let exp = raw.exponential.unwrap_or_default();
      Ok(LearningRate::Exponential {
        initial_learning_rate: non_negative_f64(
          &format!("{}.initial_learning_rate", prefix),
          exp.initial_learning_rate.unwrap_or(0.001),
        )?,
        decay_steps: positive_u64(&format!("{}.decay_steps", prefix), exp.decay_steps.unwrap_or(10000))?,
        decay_rate: positive_f64(&format!("{}.decay_rate", prefix), exp.decay_rate.unwrap_or(0.96))?,
        staircase: exp.staircase.unwrap_or(false),
      })
    }
    Some("polynomial") => {
      let prefix = format!("{}.polynomial", field);
      let poly = raw.polynomial.unwrap_or_default();
      Ok(LearningRate::Polynomial {
        initial_learning_rate: non_negative_f64(
          &format!("{}.initial_learning_rate", prefix),
          poly.initial_learning_rate.unwrap_or(0.001),
        )?,
        decay_steps: positive_u64(&format!("{}.decay_steps", prefix), poly.decay_steps.unwrap_or(10000))?,
        end_learning_rate: non_negative_f64(
          &format!("{}.end_learning_rate", prefix),
          poly.end_learning_rate.unwrap_or(0.0001),
        )?,
        power: positive_f64(&format!("{}.power", prefix), poly.power.unwrap_or(1.0))?,
        cycle: poly.cycle.unwrap_or(false),
      })
    }
    Some("cosine") => {
      let prefix = format!("{}.cosine", field);
      let cosine = raw.cosine.unwrap_or_default();
      Ok(LearningRate::Cosine {
        initial_learning_rate: non_negative_f64(
          &format!("{}.initial_learning_rate", prefix),
          cosine.initial_learning_rate.unwrap_or(0.001),
        )?,
        decay_steps: positive_u64(&format!("{}.decay_steps", prefix), cosine.decay_steps.unwrap_or(10000))?,
        alpha: unit_interval(&format!("{}.alpha", prefix), cosine.alpha.unwrap_or(0.0))?,
      })
    }
    _ => Ok(LearningRate::Constant {
      learning_rate: non_negative_f64(
        &format!("{}.constant.learning_rate", field),
        raw.constant.and_then(|c| c.learning_rate).unwrap_or(0.001),
      )?,
    }),
  }
}

fn process_warmup(raw: WarmupRaw) -> Result<Option<Warmup>> {
  let field = "trainer.optimizer_config.warmup";
  let selected = select_oneof(
    field,
    raw.kind.as_deref(),
    &[
      ("linear", raw.linear.is_some()),
      ("polynomial", raw.polynomial.is_some()),
    ],
    None,
  )?;
  match selected {
    Some("linear") => {
      let linear = raw.linear.unwrap_or_default();
      Ok(Some(Warmup::Linear {
        warmup_steps: positive_u64(
          &format!("{}.linear.warmup_steps", field),
          linear.warmup_steps.unwrap_or(500),
        )?,
        warmup_learning_rate: non_negative_f64(
          &format!("{}.linear.warmup_learning_rate", field),
          linear.warmup_learning_rate.unwrap_or(0.0),
        )?,
      }))
    }
    Some("polynomial") => {
      let poly = raw.polynomial.unwrap_or_default();
      Ok(Some(Warmup::Polynomial {
        warmup_steps: positive_u64(
          &format!("{}.polynomial.warmup_steps", field),
          poly.warmup_steps.unwrap_or(500),
        )?,
        power: positive_f64(&format!("{}.polynomial.power", field), poly.power.unwrap_or(1.0))?,
      }))
    }
    _ => Ok(None),
  }
}

// --- Scalar checks ---

fn positive_u32(field: &str, value: i64) -> Result<u32> {
  if value <= 0 {
    return Err(Error::invalid(field, format!("Must be a positive integer, got {}.", value)));
  }
  u32::try_from(value).map_err(|_| Error::invalid(field, format!("{} is out of range.", value)))
}

fn non_negative_u32(field: &str, value: i64) -> Result<u32> {
  if value < 0 {
    return Err(Error::invalid(
      field,
      format!("Must be a non-negative integer, got {}.", value),
    ));
  }
  u32::try_from(value).map_err(|_| Error::invalid(field, format!("{} is out of range.", value)))
}

fn positive_u64(field: &str, value: i64) -> Result<u64> {
  if value <= 0 {
    return Err(Error::invalid(field, format!("Must be a positive integer, got {}.", value)));
  }
  Ok(value as u64)
}

fn positive_f64(field: &str, value: f64) -> Result<f64> {
  if !value.is_finite() || value <= 0.0 {
    return Err(Error::invalid(field, format!("Must be a positive number, got {}.", value)));
  }
  Ok(value)
}

fn non_negative_f64(field: &str, value: f64) -> Result<f64> {
  if !value.is_finite() || value < 0.0 {
    return Err(Error::invalid(
      field,
      format!("Must be a non-negative number, got {}.", value),
    ));
  }
  Ok(value)
}

fn unit_interval(field: &str, value: f64) -> Result<f64> {
  if !(0.0..=1.0).contains(&value) {
    return Err(Error::invalid(field, format!("Must be in [0, 1], got {}.", value)));
  }
  Ok(value)
}

fn half_open_unit(field: &str, value: f64) -> Result<f64> {
  if !(0.0..1.0).contains(&value) {
    return Err(Error::invalid(field, format!("Must be in [0, 1), got {}.", value)));
  }
  Ok(value)
}

/// Rounds an image dimension down to a multiple of `stride`, the way the input
/// parser sizes its outputs.
fn round_to_stride(field: &str, value: i64, stride: u32) -> Result<u32> {
  let value = positive_u32(field, value)?;
  let rounded = rounded_input_size(value, stride);
  if rounded == 0 {
    return Err(Error::invalid(
      field,
      format!("{} is smaller than the network stride {}.", value, stride),
    ));
  }
  if rounded != value {
    warn!(field, value, rounded, stride, "Image size rounded down to a multiple of the network stride");
  }
  Ok(rounded)
}

// --- Back to the manifest tree ---

impl ExperimentConfig {
  /// The fully resolved experiment as a manifest tree with every field present.
  pub fn to_raw(&self) -> ExperimentRaw {
    ExperimentRaw {
      runtime: Some(self.runtime.to_raw()),
      task: Some(self.task.to_raw()),
      trainer: Some(self.trainer.to_raw()),
    }
  }
}

impl RuntimeConfig {
  fn to_raw(&self) -> RuntimeRaw {
    RuntimeRaw {
      distribution_strategy: Some(self.distribution_strategy.as_str().to_string()),
      mixed_precision_dtype: self.mixed_precision_dtype.map(|p| p.as_str().to_string()),
      loss_scale: self.loss_scale.map(|scale| match scale {
        LossScale::Dynamic => LossScaleRaw::Named("dynamic".to_string()),
        LossScale::Fixed(value) => LossScaleRaw::Fixed(value),
      }),
      num_gpus: Some(i64::from(self.num_gpus)),
      worker_hosts: Some(self.worker_hosts.join(",")),
      task_index: Some(self.task_index),
      all_reduce_alg: self.all_reduce_alg.map(|alg| alg.as_str().to_string()),
      tpu: self.tpu.clone(),
      enable_xla: Some(self.enable_xla),
    }
  }
}

impl TaskConfig {
  fn to_raw(&self) -> TaskRaw {
    let model = &self.model;
    TaskRaw {
      model: Some(ModelRaw {
        num_classes: Some(i64::from(model.num_classes)),
        input_size: Some(model.input_size.iter().map(|d| i64::from(*d)).collect()),
        min_level: Some(i64::from(model.min_level)),
        max_level: Some(i64::from(model.max_level)),
        boxes_per_scale: Some(i64::from(model.boxes_per_scale)),
        boxes: Some(model.boxes.iter().map(|a| a.to_raw()).collect()),
        backbone: Some(BackboneRaw {
          kind: Some("darknet".to_string()),
          darknet: Some(DarknetRaw {
            model_id: Some(model.backbone.as_str().to_string()),
          }),
        }),
        decoder: Some(DecoderRaw {
          version: Some(model.decoder.version.as_str().to_string()),
          kind: Some(model.decoder.kind.as_str().to_string()),
          activation: Some(model.decoder.activation.as_str().to_string()),
        }),
        head: Some(HeadRaw {
          smart_bias: Some(model.head.smart_bias),
        }),
        detection_generator: Some(DetectionGeneratorRaw {
          nms_type: Some(model.detection_generator.nms_type.as_str().to_string()),
          nms_thresh: Some(model.detection_generator.nms_thresh),
          iou_thresh: Some(model.detection_generator.iou_thresh),
          ignore_thresh: Some(model.detection_generator.ignore_thresh),
          pre_nms_points: Some(i64::from(model.detection_generator.pre_nms_points)),
          max_boxes: Some(i64::from(model.detection_generator.max_boxes)),
        }),
        loss: Some(LossRaw {
          loss_type: Some(model.loss.loss_type.as_str().to_string()),
          ignore_thresh: Some(model.loss.ignore_thresh),
          truth_thresh: Some(model.loss.truth_thresh),
          iou_normalizer: Some(model.loss.iou_normalizer),
          cls_normalizer: Some(model.loss.cls_normalizer),
          obj_normalizer: Some(model.loss.obj_normalizer),
          scale_x_y: Some(model.loss.scale_x_y),
          label_smoothing: Some(model.loss.label_smoothing),
          use_scaled_loss: Some(model.loss.use_scaled_loss),
          max_delta: model.loss.max_delta,
        }),
        norm_activation: Some(NormActivationRaw {
          activation: Some(model.norm_activation.activation.as_str().to_string()),
          use_sync_bn: Some(model.norm_activation.use_sync_bn),
          norm_momentum: Some(model.norm_activation.norm_momentum),
          norm_epsilon: Some(model.norm_activation.norm_epsilon),
        }),
        darknet_weights_file: model.darknet_weights_file.clone(),
      }),
      train_data: Some(self.train_data.to_raw()),
      validation_data: Some(self.validation_data.to_raw()),
      init_checkpoint: self.init_checkpoint.clone(),
      init_checkpoint_modules: self.init_checkpoint_modules.clone(),
      annotation_file: self.annotation_file.clone(),
      gradient_clip_norm: Some(self.gradient_clip_norm),
    }
  }
}

impl DataConfig {
  fn to_raw(&self) -> DataRaw {
    let parser = &self.parser;
    DataRaw {
      input_path: self.input_path.clone(),
      tfds_name: self.tfds_name.clone(),
      tfds_split: self.tfds_split.clone(),
      global_batch_size: Some(i64::from(self.global_batch_size)),
      is_training: Some(self.is_training),
      drop_remainder: Some(self.drop_remainder),
      shuffle_buffer_size: Some(i64::from(self.shuffle_buffer_size)),
      cache: Some(self.cache),
      dtype: Some(self.dtype.as_str().to_string()),
      parser: Some(ParserRaw {
        image_w: Some(i64::from(parser.image_w)),
        image_h: Some(i64::from(parser.image_h)),
        fixed_size: Some(parser.fixed_size),
        jitter_im: Some(parser.jitter_im),
        jitter_boxes: Some(parser.jitter_boxes),
        min_process_size: Some(i64::from(parser.min_process_size)),
        max_process_size: Some(i64::from(parser.max_process_size)),
        max_num_instances: Some(i64::from(parser.max_num_instances)),
        random_flip: Some(parser.random_flip),
        pct_rand: Some(parser.pct_rand),
        aug_rand_saturation: Some(parser.aug_rand_saturation),
        aug_rand_brightness: Some(parser.aug_rand_brightness),
        aug_rand_zoom: Some(parser.aug_rand_zoom),
        aug_rand_hue: Some(parser.aug_rand_hue),
        use_tie_breaker: Some(parser.use_tie_breaker),
        seed: Some(parser.seed),
        mosaic: Some(MosaicRaw {
          mosaic_frequency: Some(parser.mosaic.mosaic_frequency),
          mixup_frequency: Some(parser.mosaic.mixup_frequency),
          crop_area: Some(vec![parser.mosaic.crop_area.0, parser.mosaic.crop_area.1]),
        }),
      }),
    }
  }
}

impl TrainerConfig {
  fn to_raw(&self) -> TrainerRaw {
    let opt = &self.optimizer_config;
    let mut optimizer = OptimizerRaw::default();
    match &opt.optimizer {
      Optimizer::Sgd { momentum, nesterov } => {
        optimizer.kind = Some("sgd".to_string());
        optimizer.sgd = Some(SgdRaw {
          momentum: Some(*momentum),
          nesterov: Some(*nesterov),
        });
      }
      Optimizer::Adam {
        beta_1,
        beta_2,
        epsilon,
      } => {
        optimizer.kind = Some("adam".to_string());
        optimizer.adam = Some(AdamRaw {
          beta_1: Some(*beta_1),
          beta_2: Some(*beta_2),
          epsilon: Some(*epsilon),
          weight_decay_rate: None,
        });
      }
      Optimizer::AdamW {
        beta_1,
        beta_2,
        epsilon,
        weight_decay_rate,
      } => {
        optimizer.kind = Some("adamw".to_string());
        optimizer.adamw = Some(AdamRaw {
          beta_1: Some(*beta_1),
          beta_2: Some(*beta_2),
          epsilon: Some(*epsilon),
          weight_decay_rate: Some(*weight_decay_rate),
        });
      }
    }

    TrainerRaw {
      train_steps: Some(self.train_steps as i64),
      validation_steps: Some(self.validation_steps),
      validation_interval: Some(self.validation_interval as i64),
      steps_per_loop: Some(self.steps_per_loop as i64),
      summary_interval: Some(self.summary_interval as i64),
      checkpoint_interval: Some(self.checkpoint_interval as i64),
      max_to_keep: Some(i64::from(self.max_to_keep)),
      optimizer_config: Some(OptimizationRaw {
        optimizer: Some(optimizer),
        ema: opt.ema.as_ref().map(|ema| EmaRaw {
          average_decay: Some(ema.average_decay),
          trainable_weights_only: Some(ema.trainable_weights_only),
        }),
        learning_rate: Some(learning_rate_to_raw(&opt.learning_rate)),
        warmup: opt.warmup.as_ref().map(warmup_to_raw),
      }),
    }
  }
}

fn learning_rate_to_raw(lr: &LearningRate) -> LearningRateRaw {
  use crate::config::raw::{ConstantLrRaw, CosineLrRaw, ExponentialLrRaw, PolynomialLrRaw, StepwiseLrRaw};

  let mut raw = LearningRateRaw::default();
  match lr {
    LearningRate::Constant { learning_rate } => {
      raw.kind = Some("constant".to_string());
      raw.constant = Some(ConstantLrRaw {
        learning_rate: Some(*learning_rate),
      });
    }
    LearningRate::Stepwise { boundaries, values } => {
      raw.kind = Some("stepwise".to_string());
      raw.stepwise = Some(StepwiseLrRaw {
        boundaries: Some(boundaries.iter().map(|b| *b as i64).collect()),
        values: Some(values.clone()),
      });
    }
    LearningRate::Exponential {
      initial_learning_rate,
      decay_steps,
      decay_rate,
      staircase,
    } => {
      raw.kind = Some("exponential".to_string());
      raw.exponential = Some(ExponentialLrRaw {
        initial_learning_rate: Some(*initial_learning_rate),
        decay_steps: Some(*decay_steps as i64),
        decay_rate: Some(*decay_rate),
        staircase: Some(*staircase),
      });
    }
    LearningRate::Polynomial {
      initial_learning_rate,
      decay_steps,
      end_learning_rate,
      power,
      cycle,
    } => {
      raw.kind = Some("polynomial".to_string());
      raw.polynomial = Some(PolynomialLrRaw {
        initial_learning_rate: Some(*initial_learning_rate),
        decay_steps: Some(*decay_steps as i64),
        end_learning_rate: Some(*end_learning_rate),
        power: Some(*power),
        cycle: Some(*cycle),
      });
    }
    LearningRate::Cosine {
      initial_learning_rate,
      decay_steps,
      alpha,
    } => {
      raw.kind = Some("cosine".to_string());
      raw.cosine = Some(CosineLrRaw {
        initial_learning_rate: Some(*initial_learning_rate),
        decay_steps: Some(*decay_steps as i64),
        alpha: Some(*alpha),
      });
    }
  }
  raw
}

fn warmup_to_raw(warmup: &Warmup) -> WarmupRaw {
  use crate::config::raw::{LinearWarmupRaw, PolynomialWarmupRaw};

  match warmup {
    Warmup::Linear {
      warmup_steps,
      warmup_learning_rate,
    } => WarmupRaw {
      kind: Some("linear".to_string()),
      linear: Some(LinearWarmupRaw {
        warmup_steps: Some(*warmup_steps as i64),
        warmup_learning_rate: Some(*warmup_learning_rate),
      }),
      polynomial: None,
    },
    Warmup::Polynomial { warmup_steps, power } => WarmupRaw {
      kind: Some("polynomial".to_string()),
      linear: None,
      polynomial: Some(PolynomialWarmupRaw {
        warmup_steps: Some(*warmup_steps as i64),
        power: Some(*power),
      }),
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::raw::{AnchorRaw, StepwiseLrRaw};
  use pretty_assertions::assert_eq;

  fn minimal_raw() -> ExperimentRaw {
    serde_yaml::from_str(
      "task:\n  train_data:\n    input_path: train*\n  validation_data:\n    input_path: val*\n",
    )
    .unwrap()
  }

  fn expect_invalid(result: Result<ExperimentConfig>, expected_field: &str) -> String {
    match result {
      Err(Error::InvalidConfigValue { field, message }) => {
        assert_eq!(field, expected_field);
        message
      }
      other => panic!("Expected InvalidConfigValue for {}, got {:?}", expected_field, other),
    }
  }

  fn with_stepwise(boundaries: Vec<i64>, values: Vec<f64>) -> ExperimentRaw {
    let mut raw = minimal_raw();
    raw.trainer = Some(TrainerRaw {
      optimizer_config: Some(OptimizationRaw {
        learning_rate: Some(LearningRateRaw {
          kind: Some("stepwise".to_string()),
          stepwise: Some(StepwiseLrRaw {
            boundaries: Some(boundaries),
            values: Some(values),
          }),
          ..Default::default()
        }),
        ..Default::default()
      }),
      ..Default::default()
    });
    raw
  }

  #[test]
  fn defaults_fill_a_minimal_manifest() {
    let config = process_raw_config(minimal_raw()).unwrap();
    assert_eq!(config.runtime.distribution_strategy, DistributionStrategy::Mirrored);
    assert_eq!(config.runtime.num_gpus, 0);
    assert_eq!(config.task.model.num_classes, 80);
    assert_eq!(config.task.model.boxes.len(), 9);
    assert_eq!(config.task.model.backbone, BackboneModel::Darknet53);
    assert!(config.task.train_data.is_training);
    assert!(!config.task.validation_data.is_training);
    assert_eq!(config.task.train_data.parser.image_w, 416);
    assert_eq!(config.task.train_data.parser.image_h, 416);
    assert_eq!(
      config.trainer.optimizer_config.learning_rate,
      LearningRate::Constant { learning_rate: 0.001 }
    );
    assert_eq!(config.trainer.optimizer_config.warmup, None);
  }

  #[test]
  fn negative_num_gpus_is_rejected() {
    let mut raw = minimal_raw();
    raw.runtime = Some(RuntimeRaw {
      num_gpus: Some(-1),
      ..Default::default()
    });
    let message = expect_invalid(process_raw_config(raw), "runtime.num_gpus");
    assert!(message.contains("non-negative"));
  }

  #[test]
  fn num_gpus_above_worker_limit_is_rejected() {
    let mut raw = minimal_raw();
    raw.runtime = Some(RuntimeRaw {
      num_gpus: Some(4_000_000_000),
      ..Default::default()
    });
    let message = expect_invalid(process_raw_config(raw), "runtime.num_gpus");
    assert!(message.contains("exceeds the limit"), "{}", message);
  }

  #[test]
  fn anchor_total_overflow_is_rejected() {
    let mut raw = minimal_raw();
    raw.task.as_mut().unwrap().model = Some(ModelRaw {
      boxes_per_scale: Some(2_000_000_000),
      ..Default::default()
    });
    let message = expect_invalid(process_raw_config(raw), "task.model.boxes_per_scale");
    assert!(message.contains("out of range"), "{}", message);
  }

  #[test]
  fn anchor_count_must_match_levels() {
    let mut raw = minimal_raw();
    let task = raw.task.as_mut().unwrap();
    task.model = Some(ModelRaw {
      boxes: Some(vec![AnchorRaw::Text("(10, 13)".into()); 8]),
      ..Default::default()
    });
    let message = expect_invalid(process_raw_config(raw), "task.model.boxes");
    assert!(message.contains("= 9 anchors, got 8"), "{}", message);
  }

  #[test]
  fn anchor_count_follows_custom_levels() {
    let mut raw = minimal_raw();
    raw.task.as_mut().unwrap().model = Some(ModelRaw {
      min_level: Some(4),
      max_level: Some(5),
      boxes: Some(vec![AnchorRaw::Pair(vec![12.0, 20.0]); 6]),
      ..Default::default()
    });
    let config = process_raw_config(raw).unwrap();
    assert_eq!(config.task.model.num_scales(), 2);
    assert_eq!(config.task.model.anchor_masks().len(), 2);
  }

  #[test]
  fn malformed_anchor_reports_its_index() {
    let mut raw = minimal_raw();
    let mut boxes = vec![AnchorRaw::Text("(10, 13)".into()); 9];
    boxes[4] = AnchorRaw::Text("(62 45)".into());
    raw.task.as_mut().unwrap().model = Some(ModelRaw {
      boxes: Some(boxes),
      ..Default::default()
    });
    expect_invalid(process_raw_config(raw), "task.model.boxes[4]");
  }

  #[test]
  fn stepwise_boundaries_must_increase() {
    let message = expect_invalid(
      process_raw_config(with_stepwise(vec![400, 400], vec![0.1, 0.01, 0.001])),
      "trainer.optimizer_config.learning_rate.stepwise.boundaries[1]",
    );
    assert!(message.contains("strictly increasing"));
  }

  #[test]
  fn stepwise_lengths_must_agree() {
    let message = expect_invalid(
      process_raw_config(with_stepwise(vec![400, 450], vec![0.1, 0.01])),
      "trainer.optimizer_config.learning_rate.stepwise.boundaries",
    );
    assert!(message.contains("2 boundaries for 2 values"), "{}", message);
  }

  #[test]
  fn stepwise_is_accepted_when_consistent() {
    let config = process_raw_config(with_stepwise(vec![400, 450], vec![0.1, 0.01, 0.001])).unwrap();
    assert_eq!(
      config.trainer.optimizer_config.learning_rate,
      LearningRate::Stepwise {
        boundaries: vec![400, 450],
        values: vec![0.1, 0.01, 0.001],
      }
    );
  }

  #[test]
  fn image_size_is_rounded_to_stride() {
    let mut raw = minimal_raw();
    raw.task.as_mut().unwrap().train_data.as_mut().unwrap().parser = Some(ParserRaw {
      image_w: Some(420),
      ..Default::default()
    });
    let config = process_raw_config(raw).unwrap();
    assert_eq!(config.task.train_data.parser.image_w, 416);
    assert_eq!(config.task.train_data.parser.image_h, 416);
  }

  #[test]
  fn image_smaller_than_stride_is_rejected() {
    let mut raw = minimal_raw();
    raw.task.as_mut().unwrap().train_data.as_mut().unwrap().parser = Some(ParserRaw {
      image_w: Some(16),
      ..Default::default()
    });
    expect_invalid(process_raw_config(raw), "task.train_data.parser.image_w");
  }

  #[test]
  fn missing_input_path_is_rejected() {
    let mut raw = minimal_raw();
    raw.task.as_mut().unwrap().validation_data = None;
    expect_invalid(process_raw_config(raw), "task.validation_data.input_path");
  }

  #[test]
  fn checkpoint_interval_must_align_with_loops() {
    let mut raw = minimal_raw();
    raw.trainer = Some(TrainerRaw {
      steps_per_loop: Some(300),
      summary_interval: Some(300),
      checkpoint_interval: Some(1000),
      ..Default::default()
    });
    expect_invalid(process_raw_config(raw), "trainer.checkpoint_interval");
  }

  #[test]
  fn oneof_without_type_uses_the_single_member() {
    let raw = LearningRateRaw {
      cosine: Some(Default::default()),
      ..Default::default()
    };
    match process_learning_rate(raw).unwrap() {
      LearningRate::Cosine { decay_steps, .. } => assert_eq!(decay_steps, 10000),
      other => panic!("Expected cosine schedule, got {:?}", other),
    }
  }

  #[test]
  fn oneof_with_unknown_type_is_rejected() {
    let raw = OptimizerRaw {
      kind: Some("lamb".to_string()),
      ..Default::default()
    };
    let err = process_optimizer(raw).unwrap_err();
    assert_eq!(err.field(), Some("trainer.optimizer_config.optimizer.type"));
  }

  #[test]
  fn processed_config_survives_to_raw() {
    let config = process_raw_config(with_stepwise(vec![10, 20], vec![0.1, 0.01, 0.001])).unwrap();
    let again = process_raw_config(config.to_raw()).unwrap();
    assert_eq!(config, again);
  }

  #[test]
  fn random_scale_sizes_cover_multi_scale_range() {
    let config = process_raw_config(minimal_raw()).unwrap();
    let parser = &config.task.train_data.parser;
    let sizes = parser.random_scale_sizes(config.task.model.net_down_scale());
    assert_eq!(sizes.first(), Some(&320));
    assert_eq!(sizes.last(), Some(&640));
  }
}
