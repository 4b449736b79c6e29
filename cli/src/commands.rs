//! Subcommand bodies. Each returns the text to print so it can be tested directly.

use anyhow::{bail, Context};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::info;
use yolo_config::{
  experiment_names, parse_configuration, serialize_config, to_yaml_string, ConfigSources,
  DistributionPlan, ExperimentConfig, LearningRateSchedule,
};
use yolo_ops::kmeans::{format_anchors, AnchorKMeans};

/// Number of points `lr` prints when neither steps nor an interval is given.
const DEFAULT_LR_POINTS: u64 = 20;

fn load(sources: &ConfigSources) -> anyhow::Result<ExperimentConfig> {
  parse_configuration(sources).with_context(|| format!("failed to resolve experiment '{}'", sources.experiment))
}

pub fn check(sources: &ConfigSources) -> anyhow::Result<String> {
  let config = load(sources)?;
  let model = &config.task.model;
  Ok(format!(
    "OK {}: {} classes, {}x{} input, {} anchors over levels {}..={}, {} train steps\n",
    sources.experiment,
    model.num_classes,
    model.input_size[0],
    model.input_size[1],
    model.boxes.len(),
    model.min_level,
    model.max_level,
    config.trainer.train_steps,
  ))
}

pub fn show(sources: &ConfigSources, json: bool) -> anyhow::Result<String> {
  let raw = load(sources)?.to_raw();
  if json {
    let mut text = serde_json::to_string_pretty(&raw)?;
    text.push('\n');
    Ok(text)
  } else {
    Ok(to_yaml_string(&raw)?)
  }
}

pub fn serialize(sources: &ConfigSources, model_dir: &Path) -> anyhow::Result<String> {
  let config = load(sources)?;
  let path = serialize_config(&config, model_dir)?;
  info!(path = %path.display(), "Wrote resolved manifest");
  Ok(format!("{}\n", path.display()))
}

pub fn learning_rates(sources: &ConfigSources, steps: &[u64], every: Option<u64>) -> anyhow::Result<String> {
  let config = load(sources)?;
  let schedule = LearningRateSchedule::from_config(&config.trainer.optimizer_config);
  let last_step = config.trainer.train_steps;

  let points: Vec<(u64, f64)> = if steps.is_empty() {
    let every = every.unwrap_or_else(|| (last_step / DEFAULT_LR_POINTS).max(1));
    if every == 0 {
      bail!("--every must be at least 1");
    }
    schedule.sample(every, last_step)
  } else {
    steps.iter().map(|step| (*step, schedule.learning_rate(*step))).collect()
  };

  let mut out = String::from("step\tlearning_rate\n");
  for (step, lr) in points {
    writeln!(out, "{}\t{:.6e}", step, lr)?;
  }
  Ok(out)
}

pub fn plan(sources: &ConfigSources) -> anyhow::Result<String> {
  let config = load(sources)?;
  let plan = DistributionPlan::resolve(&config.runtime, &config.task.model)?;
  let mut out = plan.to_string();
  for (label, field, data) in [
    ("train", "task.train_data.global_batch_size", &config.task.train_data),
    ("validation", "task.validation_data.global_batch_size", &config.task.validation_data),
  ] {
    match plan.per_replica_batch(field, data.global_batch_size)? {
      Some(per_replica) => writeln!(
        out,
        "{} batch:{}{} global, {} per replica",
        label,
        " ".repeat(16 - label.len()),
        data.global_batch_size,
        per_replica
      )?,
      None => writeln!(
        out,
        "{} batch:{}{} global",
        label,
        " ".repeat(16 - label.len()),
        data.global_batch_size
      )?,
    }
  }
  Ok(out)
}

pub fn experiments() -> String {
  experiment_names().iter().map(|name| format!("{}\n", name)).collect()
}

pub fn anchors(boxes: &Path, k: usize, scale: f32, seed: Option<u64>, max_iter: usize) -> anyhow::Result<String> {
  let text = fs::read_to_string(boxes).with_context(|| format!("failed to read {}", boxes.display()))?;
  let shapes: Vec<[f32; 2]> = serde_json::from_str(&text)
    .with_context(|| format!("{} is not a JSON array of [width, height] pairs", boxes.display()))?;

  let mut kmeans = AnchorKMeans::new(k).max_iter(max_iter);
  if let Some(seed) = seed {
    kmeans = kmeans.seed(seed);
  }
  let result = kmeans.fit(&shapes)?;

  let formatted = format_anchors(&result.centroids, scale);
  let mut out = String::new();
  writeln!(
    out,
    "# k={} boxes={} iterations={} mean_iou={:.4}",
    k,
    shapes.len(),
    result.iterations,
    result.mean_iou
  )?;
  let quoted: Vec<String> = formatted.iter().map(|anchor| format!("'{}'", anchor)).collect();
  writeln!(out, "boxes: [{}]", quoted.join(", "))?;
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use std::io::Write;

  fn yolov3() -> ConfigSources {
    ConfigSources::new("yolov3")
  }

  #[test]
  fn check_summarizes_yolov3() {
    let out = check(&yolov3()).unwrap();
    assert_eq!(
      out,
      "OK yolov3: 80 classes, 416x416 input, 9 anchors over levels 3..=5, 500500 train steps\n"
    );
  }

  #[test]
  fn check_reports_invalid_override() {
    let sources = yolov3().with_params_override("runtime.num_gpus=-1");
    let err = check(&sources).unwrap_err();
    assert!(format!("{:#}", err).contains("runtime.num_gpus"), "{:#}", err);
  }

  #[test]
  fn show_json_parses_back() {
    let out = show(&yolov3(), true).unwrap();
    let value: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(value["task"]["model"]["num_classes"], serde_json::json!(80));
  }

  #[test]
  fn serialize_writes_params() {
    let dir = tempfile::tempdir().unwrap();
    let out = serialize(&yolov3(), dir.path()).unwrap();
    assert_eq!(out.trim(), dir.path().join("params.yaml").display().to_string());
    assert!(dir.path().join("params.yaml").is_file());
  }

  #[test]
  fn lr_at_explicit_steps() {
    let out = learning_rates(&yolov3(), &[0, 1000, 400_001, 450_001], None).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines[0], "step\tlearning_rate");
    assert_eq!(lines[1], "0\t0.000000e0");
    assert_eq!(lines[2], "1000\t1.000000e-3");
    assert_eq!(lines[3], "400001\t1.000000e-4");
    assert_eq!(lines[4], "450001\t1.000000e-5");
  }

  #[test]
  fn lr_sampling_ends_on_last_step() {
    let sources = yolov3().with_params_override("trainer.train_steps=10");
    let out = learning_rates(&sources, &[], Some(4)).unwrap();
    let steps: Vec<&str> = out.lines().skip(1).map(|line| line.split('\t').next().unwrap()).collect();
    assert_eq!(steps, vec!["0", "4", "8", "10"]);
  }

  #[test]
  fn plan_lists_replicas_and_batches() {
    let out = plan(&yolov3()).unwrap();
    assert!(out.contains("replicas:              2"), "{}", out);
    assert!(out.contains("train batch:"), "{}", out);
    assert!(out.contains("64 global, 32 per replica"), "{}", out);
    assert!(out.contains("8 global, 4 per replica"), "{}", out);
  }

  #[test]
  fn plan_labels_batches_by_dataset() {
    let sources = yolov3().with_params_override("task.validation_data.is_training=true");
    let out = plan(&sources).unwrap();
    assert_eq!(out.matches("train batch:").count(), 1, "{}", out);
    assert!(out.contains("validation batch:      8 global, 4 per replica"), "{}", out);
  }

  #[test]
  fn experiments_lists_builtins() {
    let out = experiments();
    assert!(out.lines().any(|line| line == "yolov3"));
    assert!(out.lines().any(|line| line == "yolo_custom"));
  }

  #[test]
  fn anchors_from_json_boxes() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "[[0.1, 0.1], [0.5, 0.5], [0.2, 0.3]]").unwrap();
    let out = anchors(file.path(), 3, 100.0, Some(1), 300).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert!(lines[0].starts_with("# k=3 boxes=3"), "{}", lines[0]);
    assert_eq!(lines[1], "boxes: ['(10, 10)', '(20, 30)', '(50, 50)']");
  }

  #[test]
  fn anchors_reject_malformed_input() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{{\"w\": 1}}").unwrap();
    assert!(anchors(file.path(), 3, 416.0, None, 300).is_err());
  }
}
