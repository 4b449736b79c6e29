use thiserror::Error;

/// Errors raised by the geometry and clustering helpers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
  #[error("Cannot fit {k} anchors to {boxes} boxes")]
  NotEnoughBoxes { boxes: usize, k: usize },

  #[error("Invalid argument '{name}': {message}")]
  InvalidArgument { name: &'static str, message: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
