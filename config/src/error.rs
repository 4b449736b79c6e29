use thiserror::Error;

/// The main error type for the `yolo_config` library.
#[derive(Debug, Error)]
pub enum Error {
  #[error("Configuration file not found: {0}")]
  ConfigNotFound(String),

  #[error("Failed to read configuration file: {0}")]
  ConfigRead(#[from] std::io::Error),

  #[error("Failed to parse configuration: {0}")]
  ConfigParse(String),

  #[error("Failed to serialize configuration: {0}")]
  ConfigSerialize(String),

  #[error("Unknown experiment '{name}'. Registered experiments: {available:?}")]
  UnknownExperiment { name: String, available: Vec<String> },

  #[error("Experiment '{0}' is already registered")]
  DuplicateExperiment(String),

  #[error("Invalid params override '{spec}': {reason}")]
  InvalidOverride { spec: String, reason: String },

  #[error("Invalid configuration value for '{field}': {message}")]
  InvalidConfigValue { field: String, message: String },

  #[error("Restriction '{restriction}' violated: {detail}")]
  RestrictionViolated { restriction: String, detail: String },
}

impl Error {
  pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
    Error::InvalidConfigValue {
      field: field.into(),
      message: message.into(),
    }
  }

  /// The dotted path of the offending field, for value errors.
  pub fn field(&self) -> Option<&str> {
    match self {
      Error::InvalidConfigValue { field, .. } => Some(field),
      _ => None,
    }
  }
}

/// A specialized `Result` type for `yolo_config` operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
