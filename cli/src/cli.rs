use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use yolo_config::{find_config_file, ConfigSources};

#[derive(Parser, Debug)]
#[command(
  name = "yolo",
  version,
  about = "Check, resolve and inspect YOLO training manifests"
)]
pub struct Cli {
  /// Log filter, e.g. `info` or `yolo_config=debug`. Falls back to RUST_LOG.
  #[arg(long, global = true)]
  pub log_level: Option<String>,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Validate an experiment and report a one-line summary.
  Check(SourceArgs),
  /// Print the fully resolved manifest.
  Show {
    #[command(flatten)]
    sources: SourceArgs,
    /// Print JSON instead of YAML.
    #[arg(long)]
    json: bool,
  },
  /// Write the resolved manifest to `<model-dir>/params.yaml`.
  Serialize {
    #[command(flatten)]
    sources: SourceArgs,
    #[arg(long)]
    model_dir: PathBuf,
  },
  /// Print the learning rate at selected steps, warmup included.
  Lr {
    #[command(flatten)]
    sources: SourceArgs,
    /// Comma separated steps.
    #[arg(long, value_delimiter = ',', conflicts_with = "every")]
    steps: Vec<u64>,
    /// Sample every N steps up to `trainer.train_steps`.
    #[arg(long)]
    every: Option<u64>,
  },
  /// Show how the runtime section maps onto devices and replicas.
  Plan(SourceArgs),
  /// List the registered experiments.
  Experiments,
  /// Cluster box shapes into anchor priors.
  Anchors {
    /// JSON array of normalized `[width, height]` pairs.
    #[arg(long)]
    boxes: PathBuf,
    #[arg(long, default_value_t = 9)]
    k: usize,
    /// Input size the anchors are expressed in.
    #[arg(long, default_value_t = 416.0)]
    scale: f32,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value_t = yolo_ops::kmeans::DEFAULT_MAX_ITER)]
    max_iter: usize,
  },
}

/// Where the experiment comes from.
#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
  /// Registered experiment to start from.
  #[arg(long, short = 'e')]
  pub experiment: Option<String>,
  /// Manifest merged onto the experiment; repeatable, later files win.
  #[arg(long = "config-file", short = 'c')]
  pub config_files: Vec<PathBuf>,
  /// `a.b=c,...` assignments or a YAML mapping applied last.
  #[arg(long)]
  pub params_override: Option<String>,
}

impl SourceArgs {
  /// With neither an experiment nor a file given, a `yolo.yaml` (or
  /// `yolo.<env>.yaml`) in the working directory is picked up.
  pub fn to_sources(&self) -> ConfigSources {
    let mut sources = match &self.experiment {
      Some(experiment) => ConfigSources::new(experiment.clone()),
      None => ConfigSources::default(),
    };
    sources.config_files = self.config_files.clone();
    if sources.config_files.is_empty() && self.experiment.is_none() {
      if let Ok(path) = find_config_file(None) {
        debug!(path = %path.display(), "Using discovered config file");
        sources.config_files.push(path);
      }
    }
    sources.params_override = self.params_override.clone();
    sources
  }
}
