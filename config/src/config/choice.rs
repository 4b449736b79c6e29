// src/config/choice.rs
// Closed string vocabularies used by the manifest (strategies, dtypes, activations, ...).

use crate::error::{Error, Result};

// Generates a fieldless enum whose variants are spelled as lowercase strings in the
// manifest, plus lookup, spelling and Display.
macro_rules! choice_enum {
  (
    $(#[$meta:meta])*
    pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }
  ) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum $name {
      $($variant),+
    }

    impl $name {
      /// Every accepted spelling, in declaration order.
      pub const CHOICES: &'static [(&'static str, $name)] = &[$(($text, $name::$variant)),+];

      /// The manifest spelling of this value.
      pub fn as_str(&self) -> &'static str {
        match self {
          $($name::$variant => $text),+
        }
      }

      pub(crate) fn parse(field: &str, value: &str) -> crate::error::Result<Self> {
        crate::config::choice::parse_choice(field, value, Self::CHOICES)
      }
    }

    impl std::fmt::Display for $name {
      fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
      }
    }
  };
}

pub(crate) use choice_enum;

/// Case-insensitive lookup of `value` among `choices`.
pub(crate) fn parse_choice<T: Copy>(field: &str, value: &str, choices: &[(&str, T)]) -> Result<T> {
  let wanted = value.trim().to_lowercase();
  choices
    .iter()
    .find(|(name, _)| *name == wanted)
    .map(|(_, choice)| *choice)
    .ok_or_else(|| {
      let expected: Vec<&str> = choices.iter().map(|(name, _)| *name).collect();
      Error::invalid(
        field,
        format!(
          "Unknown value '{}'. Expected one of: {}.",
          value,
          expected.join(", ")
        ),
      )
    })
}
