//! `yolo_config` - typed, strictly validated YOLO/Darknet training manifests.
//!
//! A manifest is a YAML tree with three sections: `runtime` (devices and
//! precision), `task` (model, data and loss) and `trainer` (loop, optimizer and
//! schedule). Loading goes through two layers: [`config::raw`] mirrors the YAML
//! exactly and rejects unknown or duplicate keys, [`config::processed`] fills
//! defaults and validates every field, reporting errors by dotted path.
//!
//! ```no_run
//! use yolo_config::{parse_configuration, ConfigSources};
//!
//! let sources = ConfigSources::new("yolov3").with_params_override("runtime.num_gpus=1,runtime.distribution_strategy=one_device");
//! let config = parse_configuration(&sources)?;
//! assert_eq!(config.task.model.boxes.len(), 9);
//! # Ok::<(), yolo_config::Error>(())
//! ```

pub mod config;
pub mod distribute;
pub mod error;
pub mod loader;
pub mod registry;
pub mod schedule;

pub use config::anchor::Anchor;
pub use config::processed::{process_raw_config, ExperimentConfig};
pub use config::raw::ExperimentRaw;
pub use distribute::DistributionPlan;
pub use error::{Error, Result};
pub use loader::{
  find_config_file, load_manifest, parse_configuration, parse_manifest_str, read_tree,
  serialize_config, to_yaml_string, ConfigSources,
};
pub use registry::{experiment_names, get_experiment, register_experiment, ExperimentTemplate};
pub use schedule::LearningRateSchedule;
