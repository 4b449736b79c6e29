// src/config/anchor.rs
// Anchor box priors as written in `task.model.boxes`.

use crate::config::raw::AnchorRaw;
use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

static ANCHOR_PATTERN: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"^\s*[\(\[]?\s*([-+]?[0-9]*\.?[0-9]+(?:[eE][-+]?[0-9]+)?)\s*,\s*([-+]?[0-9]*\.?[0-9]+(?:[eE][-+]?[0-9]+)?)\s*[\)\]]?\s*$")
    .expect("anchor pattern is a valid regex")
});

/// A width/height prior in input-image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
  pub width: f64,
  pub height: f64,
}

impl Anchor {
  pub fn new(width: f64, height: f64) -> Self {
    Self { width, height }
  }

  pub(crate) fn from_raw(field: &str, raw: &AnchorRaw) -> Result<Self> {
    let anchor = match raw {
      AnchorRaw::Text(text) => text
        .parse::<Anchor>()
        .map_err(|message| Error::invalid(field, message))?,
      AnchorRaw::Pair(values) => match values.as_slice() {
        [w, h] => Anchor::new(*w, *h),
        _ => {
          return Err(Error::invalid(
            field,
            format!("Expected a (width, height) pair, got {} numbers.", values.len()),
          ))
        }
      },
    };
    if !(anchor.width.is_finite() && anchor.height.is_finite())
      || anchor.width <= 0.0
      || anchor.height <= 0.0
    {
      return Err(Error::invalid(
        field,
        format!("Anchor dimensions must be positive, got {}.", anchor),
      ));
    }
    Ok(anchor)
  }

  pub(crate) fn to_raw(self) -> AnchorRaw {
    AnchorRaw::Text(self.to_string())
  }
}

impl FromStr for Anchor {
  type Err = String;

  fn from_str(text: &str) -> std::result::Result<Self, Self::Err> {
    let captures = ANCHOR_PATTERN
      .captures(text)
      .ok_or_else(|| format!("'{}' is not a (width, height) pair.", text))?;
    let parse = |i: usize| {
      captures[i]
        .parse::<f64>()
        .map_err(|e| format!("'{}' in '{}': {}", &captures[i], text, e))
    };
    Ok(Anchor::new(parse(1)?, parse(2)?))
  }
}

impl fmt::Display for Anchor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "({}, {})", self.width, self.height)
  }
}

/// The nine COCO priors YOLOv3 ships with, smallest first.
pub fn yolov3_coco_anchors() -> Vec<Anchor> {
  [
    (10.0, 13.0),
    (16.0, 30.0),
    (33.0, 23.0),
    (30.0, 61.0),
    (62.0, 45.0),
    (59.0, 119.0),
    (116.0, 90.0),
    (156.0, 198.0),
    (373.0, 326.0),
  ]
  .into_iter()
  .map(|(w, h)| Anchor::new(w, h))
  .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_common_spellings() {
    assert_eq!("(10, 13)".parse::<Anchor>().unwrap(), Anchor::new(10.0, 13.0));
    assert_eq!("[16,30]".parse::<Anchor>().unwrap(), Anchor::new(16.0, 30.0));
    assert_eq!(" 12.5 , 7e1 ".parse::<Anchor>().unwrap(), Anchor::new(12.5, 70.0));
  }

  #[test]
  fn rejects_non_pairs() {
    assert!("(10, 13, 4)".parse::<Anchor>().is_err());
    assert!("(ten, 13)".parse::<Anchor>().is_err());
    assert!("".parse::<Anchor>().is_err());
  }

  #[test]
  fn display_drops_integral_fraction() {
    assert_eq!(Anchor::new(10.0, 13.0).to_string(), "(10, 13)");
    assert_eq!(Anchor::new(10.5, 13.0).to_string(), "(10.5, 13)");
  }

  #[test]
  fn from_raw_rejects_non_positive() {
    let err = Anchor::from_raw("task.model.boxes[2]", &AnchorRaw::Text("(0, 4)".into())).unwrap_err();
    assert_eq!(err.field(), Some("task.model.boxes[2]"));
    let err = Anchor::from_raw("b", &AnchorRaw::Pair(vec![1.0])).unwrap_err();
    assert!(err.to_string().contains("got 1 numbers"));
  }
}
