// src/config/overrides.rs
// Tree-level edits applied to the manifest before it is parsed into typed structs.

use crate::error::{Error, Result};
use serde_yaml::{Mapping, Value};
use tracing::{debug, trace};

/// Recursively merges `overlay` into `base`. Mappings merge key by key; any other
/// value in `overlay` replaces the one in `base` wholesale.
pub fn merge_trees(base: &mut Value, overlay: Value) {
  match (base, overlay) {
    (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
      for (key, value) in overlay_map {
        match base_map.get_mut(&key) {
          Some(existing) => merge_trees(existing, value),
          None => {
            base_map.insert(key, value);
          }
        }
      }
    }
    (base, Value::Null) if base.is_mapping() => {
      trace!("Null overlay leaves mapping untouched");
    }
    (base, overlay) => *base = overlay,
  }
}

/// Applies a params override to `tree`.
///
/// Two forms are accepted:
/// * a comma separated list of dotted assignments, e.g.
///   `task.model.num_classes=91,trainer.train_steps=1000`. Values are parsed as
///   YAML scalars or flow collections, so `[1, 2]` and `'(10, 13)'` both work.
/// * a YAML (or JSON) mapping, merged into the tree like a config file.
pub fn apply_params_override(tree: &mut Value, params_override: &str) -> Result<()> {
  let trimmed = params_override.trim();
  if trimmed.is_empty() {
    return Ok(());
  }

  if !looks_like_assignments(trimmed) {
    let overlay: Value = serde_yaml::from_str(trimmed).map_err(|e| Error::InvalidOverride {
      spec: trimmed.to_string(),
      reason: e.to_string(),
    })?;
    if !overlay.is_mapping() {
      return Err(Error::InvalidOverride {
        spec: trimmed.to_string(),
        reason: "Expected `key=value` pairs or a YAML mapping.".to_string(),
      });
    }
    debug!("Merging params override mapping");
    merge_trees(tree, overlay);
    return Ok(());
  }

  for assignment in split_top_level(trimmed) {
    let assignment = assignment.trim();
    if assignment.is_empty() {
      continue;
    }
    let (path, value_text) = assignment.split_once('=').ok_or_else(|| Error::InvalidOverride {
      spec: assignment.to_string(),
      reason: "Expected `key=value`.".to_string(),
    })?;
    let value: Value = serde_yaml::from_str(value_text.trim()).map_err(|e| Error::InvalidOverride {
      spec: assignment.to_string(),
      reason: e.to_string(),
    })?;
    debug!(path = path.trim(), "Applying params override");
    set_path(tree, path.trim(), value).map_err(|reason| Error::InvalidOverride {
      spec: assignment.to_string(),
      reason,
    })?;
  }
  Ok(())
}

/// Looks up a dotted path in `tree`.
pub fn get_path<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
  path
    .split('.')
    .try_fold(tree, |node, key| node.as_mapping()?.get(key))
}

/// Sets a dotted path in `tree`, creating intermediate mappings as needed.
pub fn set_path(tree: &mut Value, path: &str, value: Value) -> std::result::Result<(), String> {
  let keys: Vec<&str> = path.split('.').collect();
  if keys.iter().any(|key| key.is_empty()) {
    return Err(format!("'{}' is not a valid dotted path.", path));
  }

  let mut node = tree;
  for (depth, key) in keys.iter().enumerate() {
    if node.is_null() {
      *node = Value::Mapping(Mapping::new());
    }
    let map = node.as_mapping_mut().ok_or_else(|| {
      format!(
        "'{}' is not a mapping and cannot hold '{}'.",
        keys[..depth].join("."),
        key
      )
    })?;
    let key_value = Value::String((*key).to_string());
    if depth + 1 == keys.len() {
      map.insert(key_value, value);
      return Ok(());
    }
    node = map.entry(key_value).or_insert(Value::Null);
  }
  Ok(())
}

fn looks_like_assignments(text: &str) -> bool {
  match text.find('=') {
    // `key=value` has no ':' in the key part; a mapping like `a: {b: 1}` has no '=' at all.
    Some(eq) => !text[..eq].contains(':') && !text.starts_with('{'),
    None => false,
  }
}

/// Splits on commas that are not nested inside brackets, braces or quotes.
fn split_top_level(text: &str) -> Vec<&str> {
  let mut parts = Vec::new();
  let mut depth = 0i32;
  let mut quote: Option<char> = None;
  let mut start = 0;

  for (i, c) in text.char_indices() {
    match (quote, c) {
      (Some(q), c) if c == q => quote = None,
      (Some(_), _) => {}
      (None, '\'' | '"') => quote = Some(c),
      (None, '[' | '{' | '(') => depth += 1,
      (None, ']' | '}' | ')') => depth -= 1,
      (None, ',') if depth == 0 => {
        parts.push(&text[start..i]);
        start = i + 1;
      }
      _ => {}
    }
  }
  parts.push(&text[start..]);
  parts
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn tree(text: &str) -> Value {
    serde_yaml::from_str(text).unwrap()
  }

  #[test]
  fn merge_replaces_leaves_and_keeps_siblings() {
    let mut base = tree("a:\n  b: 1\n  c: [1, 2]\nd: x\n");
    merge_trees(&mut base, tree("a:\n  c: [3]\n  e: true\n"));
    assert_eq!(base, tree("a:\n  b: 1\n  c: [3]\n  e: true\nd: x\n"));
  }

  #[test]
  fn dotted_assignments_create_intermediate_maps() {
    let mut base = tree("task:\n  model:\n    num_classes: 80\n");
    apply_params_override(
      &mut base,
      "task.model.num_classes=91, trainer.optimizer_config.learning_rate.stepwise.boundaries=[10, 20]",
    )
    .unwrap();
    assert_eq!(get_path(&base, "task.model.num_classes"), Some(&tree("91")));
    assert_eq!(
      get_path(&base, "trainer.optimizer_config.learning_rate.stepwise.boundaries"),
      Some(&tree("[10, 20]"))
    );
  }

  #[test]
  fn quoted_values_keep_their_commas() {
    let mut base = Value::Null;
    apply_params_override(&mut base, "task.model.boxes=['(10, 13)', '(16, 30)'],runtime.num_gpus=1").unwrap();
    assert_eq!(get_path(&base, "task.model.boxes"), Some(&tree("['(10, 13)', '(16, 30)']")));
    assert_eq!(get_path(&base, "runtime.num_gpus"), Some(&tree("1")));
  }

  #[test]
  fn yaml_mapping_override_is_merged() {
    let mut base = tree("runtime:\n  num_gpus: 2\n  mixed_precision_dtype: float16\n");
    apply_params_override(&mut base, "runtime: {num_gpus: 1}").unwrap();
    assert_eq!(base, tree("runtime:\n  num_gpus: 1\n  mixed_precision_dtype: float16\n"));
  }

  #[test]
  fn descending_into_a_scalar_is_an_error() {
    let mut base = tree("runtime:\n  num_gpus: 2\n");
    match apply_params_override(&mut base, "runtime.num_gpus.count=1") {
      Err(Error::InvalidOverride { reason, .. }) => {
        assert!(reason.contains("'runtime.num_gpus' is not a mapping"), "{}", reason)
      }
      other => panic!("Expected InvalidOverride, got {:?}", other),
    }
  }

  #[test]
  fn scalar_override_is_rejected() {
    let mut base = Value::Null;
    assert!(apply_params_override(&mut base, "just-a-word").is_err());
  }

  #[test]
  fn empty_override_is_a_no_op() {
    let mut base = tree("a: 1\n");
    apply_params_override(&mut base, "  ").unwrap();
    assert_eq!(base, tree("a: 1\n"));
  }
}
