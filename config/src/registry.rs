//! The process-wide experiment registry.
//!
//! An experiment is a named factory producing a base manifest tree plus the
//! restrictions every config derived from it must satisfy. Two experiments are
//! built in: `yolo_custom` (pure defaults) and `yolov3` (the shipped COCO recipe).

use crate::error::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_yaml::{Mapping, Value};
use std::sync::Arc;
use tracing::debug;

const YOLOV3_MANIFEST: &str = include_str!("../experiments/yolov3.yaml");

/// Restrictions attached to the built-in experiments.
pub const YOLO_RESTRICTIONS: &[&str] = &[
  "task.train_data.is_training != None",
  "task.validation_data.is_training != None",
  "task.model.min_level <= task.model.max_level",
];

/// What an experiment factory produces.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentTemplate {
  /// Manifest tree that config files and overrides are merged onto.
  pub base: Value,
  pub restrictions: Vec<String>,
}

impl ExperimentTemplate {
  pub fn new(base: Value) -> Self {
    Self {
      base,
      restrictions: YOLO_RESTRICTIONS.iter().map(|r| r.to_string()).collect(),
    }
  }
}

pub type ExperimentFactory = Arc<dyn Fn() -> Result<ExperimentTemplate> + Send + Sync>;

/// Named experiment factories. Thread-safe; lookups clone the factory out so it
/// runs without holding a shard lock.
#[derive(Default)]
pub struct ExperimentRegistry {
  factories: DashMap<String, ExperimentFactory>,
}

impl ExperimentRegistry {
  /// Creates an empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry holding `yolo_custom` and `yolov3`.
  pub fn with_builtins() -> Self {
    let registry = Self::new();
    registry.factories.insert(
      "yolo_custom".to_string(),
      Arc::new(|| -> Result<ExperimentTemplate> {
        Ok(ExperimentTemplate::new(Value::Mapping(Mapping::new())))
      }),
    );
    registry.factories.insert(
      "yolov3".to_string(),
      Arc::new(|| -> Result<ExperimentTemplate> {
        let base: Value =
          serde_yaml::from_str(YOLOV3_MANIFEST).map_err(|e| Error::ConfigParse(e.to_string()))?;
        Ok(ExperimentTemplate::new(base))
      }),
    );
    registry
  }

  pub fn register(
    &self,
    name: &str,
    factory: impl Fn() -> Result<ExperimentTemplate> + Send + Sync + 'static,
  ) -> Result<()> {
    match self.factories.entry(name.to_string()) {
      Entry::Occupied(_) => Err(Error::DuplicateExperiment(name.to_string())),
      Entry::Vacant(slot) => {
        slot.insert(Arc::new(factory));
        debug!(experiment = name, "Registered experiment");
        Ok(())
      }
    }
  }

  pub fn get(&self, name: &str) -> Result<ExperimentTemplate> {
    let factory = self
      .factories
      .get(name)
      .map(|entry| Arc::clone(entry.value()))
      .ok_or_else(|| Error::UnknownExperiment {
        name: name.to_string(),
        available: self.names(),
      })?;
    factory()
  }

  /// Registered names, sorted.
  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.factories.iter().map(|entry| entry.key().clone()).collect();
    names.sort();
    names
  }
}

static GLOBAL_REGISTRY: Lazy<ExperimentRegistry> = Lazy::new(ExperimentRegistry::with_builtins);

/// The process-wide registry, created with the built-in experiments on first access.
pub fn global() -> &'static ExperimentRegistry {
  &GLOBAL_REGISTRY
}

pub fn register_experiment(
  name: &str,
  factory: impl Fn() -> Result<ExperimentTemplate> + Send + Sync + 'static,
) -> Result<()> {
  global().register(name, factory)
}

pub fn get_experiment(name: &str) -> Result<ExperimentTemplate> {
  global().get(name)
}

pub fn experiment_names() -> Vec<String> {
  global().names()
}
