// Contains the primary public loading functions for yolo_config.

use crate::{
  config::{
    overrides::{apply_params_override, merge_trees},
    processed::{process_raw_config, ExperimentConfig},
    raw::ExperimentRaw,
    restrictions::check_restrictions,
  },
  distribute::DistributionPlan,
  error::{Error, Result},
  registry,
};

use serde_yaml::Value;
use std::{
  env, fs,
  path::{Path, PathBuf},
};
use tracing::{debug, info};

const DEFAULT_CONFIG_BASE_NAME: &str = "yolo";
const DEFAULT_CONFIG_EXTENSION: &str = "yaml";
const PARAMS_FILE_NAME: &str = "params.yaml";

/// Where an experiment's configuration comes from, applied in field order.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSources {
  /// Registered experiment providing the base tree.
  pub experiment: String,
  /// Manifests merged onto the base, later files winning.
  pub config_files: Vec<PathBuf>,
  /// `a.b=c,...` assignments or a YAML mapping, applied last.
  pub params_override: Option<String>,
}

impl Default for ConfigSources {
  fn default() -> Self {
    Self {
      experiment: "yolo_custom".to_string(),
      config_files: Vec::new(),
      params_override: None,
    }
  }
}

impl ConfigSources {
  pub fn new(experiment: impl Into<String>) -> Self {
    Self {
      experiment: experiment.into(),
      ..Default::default()
    }
  }

  pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
    self.config_files.push(path.into());
    self
  }

  pub fn with_params_override(mut self, params_override: impl Into<String>) -> Self {
    self.params_override = Some(params_override.into());
    self
  }
}

/// Finds the configuration file based on common patterns and an optional environment suffix.
pub fn find_config_file(environment_suffix: Option<&str>) -> Result<PathBuf> {
  let base_name = DEFAULT_CONFIG_BASE_NAME;
  let extension = DEFAULT_CONFIG_EXTENSION;

  let env_from_var = environment_suffix
    .map(|s| s.to_string())
    .or_else(|| env::var("YOLO_ENV").ok())
    .or_else(|| env::var("APP_ENV").ok());

  let mut files_to_check: Vec<String> = Vec::new();

  if let Some(env_str) = &env_from_var {
    if !env_str.is_empty() {
      files_to_check.push(format!("{}.{}.{}", base_name, env_str, extension));
    }
  }
  files_to_check.push(format!("{}.{}", base_name, extension));

  let search_dirs = [PathBuf::from(".")];

  for dir in &search_dirs {
    for file_name in &files_to_check {
      let path = dir.join(file_name);
      if path.is_file() {
        return Ok(path);
      }
    }
  }

  Err(Error::ConfigNotFound(format!(
    "Searched for: {:?} in {:?}. Provide a config file or check YOLO_ENV/APP_ENV.",
    files_to_check, search_dirs
  )))
}

/// Reads a manifest file into an untyped YAML tree.
pub fn read_tree(path: &Path) -> Result<Value> {
  if !path.is_file() {
    return Err(Error::ConfigNotFound(path.display().to_string()));
  }
  let text = fs::read_to_string(path)?;
  serde_yaml::from_str(&text).map_err(|e| Error::ConfigParse(format!("{}: {}", path.display(), e)))
}

/// Reads a manifest file into its raw structs without applying defaults.
pub fn load_manifest(path: &Path) -> Result<ExperimentRaw> {
  let tree = read_tree(path)?;
  raw_from_tree(tree).map_err(|e| match e {
    Error::ConfigParse(message) => Error::ConfigParse(format!("{}: {}", path.display(), message)),
    other => other,
  })
}

/// Parses a manifest from text without applying defaults.
pub fn parse_manifest_str(text: &str) -> Result<ExperimentRaw> {
  serde_yaml::from_str(text).map_err(|e| Error::ConfigParse(e.to_string()))
}

fn raw_from_tree(tree: Value) -> Result<ExperimentRaw> {
  if tree.is_null() {
    return Ok(ExperimentRaw::default());
  }
  serde_yaml::from_value(tree).map_err(|e| Error::ConfigParse(e.to_string()))
}

/// Builds the fully resolved, validated experiment from its sources.
pub fn parse_configuration(sources: &ConfigSources) -> Result<ExperimentConfig> {
  let template = registry::get_experiment(&sources.experiment)?;
  debug!(experiment = %sources.experiment, "Loaded experiment template");

  let mut tree = template.base;
  for path in &sources.config_files {
    debug!(path = %path.display(), "Merging config file");
    merge_trees(&mut tree, read_tree(path)?);
  }
  if let Some(params_override) = &sources.params_override {
    apply_params_override(&mut tree, params_override)?;
  }

  let config = process_raw_config(raw_from_tree(tree)?)?;

  let resolved_tree =
    serde_yaml::to_value(config.to_raw()).map_err(|e| Error::ConfigSerialize(e.to_string()))?;
  check_restrictions(&resolved_tree, &template.restrictions)?;

  let plan = DistributionPlan::resolve(&config.runtime, &config.task.model)?;
  plan.per_replica_batch(
    "task.train_data.global_batch_size",
    config.task.train_data.global_batch_size,
  )?;
  plan.per_replica_batch(
    "task.validation_data.global_batch_size",
    config.task.validation_data.global_batch_size,
  )?;

  info!(
    experiment = %sources.experiment,
    files = sources.config_files.len(),
    "Experiment configuration resolved"
  );
  Ok(config)
}

/// Renders a manifest tree as YAML, omitting absent fields.
pub fn to_yaml_string(raw: &ExperimentRaw) -> Result<String> {
  serde_yaml::to_string(raw).map_err(|e| Error::ConfigSerialize(e.to_string()))
}

/// Writes the resolved experiment to `<model_dir>/params.yaml`, creating the directory.
pub fn serialize_config(config: &ExperimentConfig, model_dir: &Path) -> Result<PathBuf> {
  fs::create_dir_all(model_dir)?;
  let path = model_dir.join(PARAMS_FILE_NAME);
  fs::write(&path, to_yaml_string(&config.to_raw())?)?;
  info!(path = %path.display(), "Saved experiment parameters");
  Ok(path)
}
