mod common;

use common::{experiment_file, write_manifest, MINIMAL_MANIFEST};
use pretty_assertions::assert_eq;
use yolo_config::config::processed::{
  DistributionStrategy, LearningRate, LossScale, Optimizer, Precision, Warmup,
};
use yolo_config::{
  load_manifest, parse_configuration, process_raw_config, Anchor, ConfigSources, DistributionPlan,
  Error,
};

#[test]
fn test_shipped_yolov3_manifest_is_valid() {
  let raw = load_manifest(&experiment_file("yolov3.yaml")).unwrap();
  let config = process_raw_config(raw).unwrap();

  assert_eq!(config.runtime.distribution_strategy, DistributionStrategy::Mirrored);
  assert_eq!(config.runtime.mixed_precision_dtype, Some(Precision::Float16));
  assert_eq!(config.runtime.loss_scale, Some(LossScale::Dynamic));
  assert_eq!(config.runtime.num_gpus, 2);

  let model = &config.task.model;
  assert_eq!(model.num_classes, 80);
  assert_eq!(model.input_size, [416, 416, 3]);
  assert_eq!(model.boxes.len(), 9);
  assert_eq!(model.boxes[0], Anchor::new(10.0, 13.0));
  assert_eq!(model.boxes[8], Anchor::new(373.0, 326.0));
  assert_eq!(model.anchor_masks().get(&5), Some(&vec![6, 7, 8]));
  assert_eq!(model.darknet_weights_file.as_deref(), Some("cache://yolov3.weights"));

  assert_eq!(config.task.train_data.global_batch_size, 64);
  assert_eq!(config.task.train_data.parser.mosaic.mosaic_frequency, 0.75);
  assert_eq!(config.task.validation_data.global_batch_size, 8);
  assert!(!config.task.validation_data.is_training);

  let trainer = &config.trainer;
  assert_eq!(trainer.train_steps, 500_500);
  assert_eq!(trainer.validation_steps, 625);
  assert_eq!(
    trainer.optimizer_config.learning_rate,
    LearningRate::Stepwise {
      boundaries: vec![400_000, 450_000],
      values: vec![0.001, 0.0001, 0.00001],
    }
  );
  assert_eq!(
    trainer.optimizer_config.optimizer,
    Optimizer::Sgd {
      momentum: 0.949,
      nesterov: false,
    }
  );
  assert_eq!(
    trainer.optimizer_config.warmup,
    Some(Warmup::Polynomial {
      warmup_steps: 1000,
      power: 4.0,
    })
  );
  assert_eq!(
    trainer.optimizer_config.ema.as_ref().map(|ema| ema.average_decay),
    Some(0.9998)
  );
}

#[test]
fn test_registered_yolov3_experiment_resolves() {
  let config = parse_configuration(&ConfigSources::new("yolov3")).unwrap();
  let plan = DistributionPlan::resolve(&config.runtime, &config.task.model).unwrap();
  assert_eq!(plan.num_replicas, Some(2));
  assert_eq!(plan.precision_policy, "mixed_float16");
  assert_eq!(plan.per_replica_batch("b", config.task.train_data.global_batch_size).unwrap(), Some(32));
}

#[test]
fn test_single_gpu_file_merges_onto_yolov3() {
  let sources = ConfigSources::new("yolov3").with_config_file(experiment_file("yolov3-1gpu.yaml"));
  let config = parse_configuration(&sources).unwrap();
  assert_eq!(config.runtime.distribution_strategy, DistributionStrategy::OneDevice);
  assert_eq!(config.runtime.num_gpus, 1);
  assert_eq!(config.task.train_data.global_batch_size, 16);
  assert!(!config.task.model.norm_activation.use_sync_bn);
}

#[test]
fn test_custom_experiment_fills_defaults() {
  let file = write_manifest(MINIMAL_MANIFEST);
  let config = parse_configuration(&ConfigSources::default().with_config_file(file.path())).unwrap();
  assert_eq!(config.task.model.boxes.len(), 9);
  assert_eq!(config.runtime.distribution_strategy, DistributionStrategy::Mirrored);
  assert_eq!(
    config.trainer.optimizer_config.learning_rate,
    LearningRate::Constant { learning_rate: 0.001 }
  );
}

#[test]
fn test_params_override_applies_last() {
  let sources = ConfigSources::new("yolov3")
    .with_config_file(experiment_file("yolov3-1gpu.yaml"))
    .with_params_override("task.model.num_classes=91,trainer.train_steps=1000,trainer.optimizer_config.learning_rate.stepwise.boundaries=[500, 800]");
  let config = parse_configuration(&sources).unwrap();
  assert_eq!(config.task.model.num_classes, 91);
  assert_eq!(config.trainer.train_steps, 1000);
  match &config.trainer.optimizer_config.learning_rate {
    LearningRate::Stepwise { boundaries, .. } => assert_eq!(boundaries, &vec![500, 800]),
    other => panic!("Expected stepwise schedule, got {:?}", other),
  }
}

#[test]
fn test_anchor_count_mismatch_is_reported() {
  let sources = ConfigSources::new("yolov3").with_params_override("task.model.boxes_per_scale=2");
  let err = parse_configuration(&sources).unwrap_err();
  assert_eq!(err.field(), Some("task.model.boxes"));
}

#[test]
fn test_negative_num_gpus_is_rejected() {
  let sources = ConfigSources::new("yolov3").with_params_override("runtime.num_gpus=-2");
  let err = parse_configuration(&sources).unwrap_err();
  assert_eq!(err.field(), Some("runtime.num_gpus"));
}

#[test]
fn test_num_gpus_beyond_worker_limit_is_rejected() {
  let sources = ConfigSources::new("yolov3").with_params_override("runtime.num_gpus=4000000000");
  let err = parse_configuration(&sources).unwrap_err();
  assert_eq!(err.field(), Some("runtime.num_gpus"));
}

#[test]
fn test_oversized_boxes_per_scale_is_rejected() {
  let sources = ConfigSources::new("yolov3").with_params_override("task.model.boxes_per_scale=2000000000");
  let err = parse_configuration(&sources).unwrap_err();
  assert_eq!(err.field(), Some("task.model.boxes_per_scale"));
}

#[test]
fn test_non_increasing_boundaries_are_rejected() {
  let sources = ConfigSources::new("yolov3").with_params_override(
    "trainer.optimizer_config.learning_rate.stepwise.boundaries=[450000, 400000]",
  );
  let err = parse_configuration(&sources).unwrap_err();
  assert_eq!(
    err.field(),
    Some("trainer.optimizer_config.learning_rate.stepwise.boundaries[1]")
  );
}

#[test]
fn test_batch_must_split_across_replicas() {
  let sources = ConfigSources::new("yolov3").with_params_override("runtime.num_gpus=3");
  let err = parse_configuration(&sources).unwrap_err();
  assert_eq!(err.field(), Some("task.train_data.global_batch_size"));
}

#[test]
fn test_duplicate_keys_fail_to_load() {
  let file = write_manifest("runtime:\n  num_gpus: 1\n  num_gpus: 2\n");
  match load_manifest(file.path()) {
    Err(Error::ConfigParse(message)) => assert!(message.contains("duplicate"), "{}", message),
    other => panic!("Expected ConfigParse error, got {:?}", other),
  }
}

#[test]
fn test_unknown_key_fails_to_load() {
  let file = write_manifest("task:\n  model:\n    num_class: 80\n");
  let err = parse_configuration(&ConfigSources::default().with_config_file(file.path())).unwrap_err();
  assert!(matches!(err, Error::ConfigParse(_)), "{:?}", err);
}

#[test]
fn test_unknown_experiment_is_reported() {
  let err = parse_configuration(&ConfigSources::new("yolov9")).unwrap_err();
  match err {
    Error::UnknownExperiment { available, .. } => assert!(available.contains(&"yolov3".to_string())),
    other => panic!("Expected UnknownExperiment, got {:?}", other),
  }
}

#[test]
fn test_missing_config_file_is_reported() {
  let sources = ConfigSources::new("yolov3").with_config_file("no/such/manifest.yaml");
  assert!(matches!(parse_configuration(&sources), Err(Error::ConfigNotFound(_))));
}
