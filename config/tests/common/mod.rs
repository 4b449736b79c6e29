#![allow(dead_code)]

use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

pub fn experiment_file(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("experiments").join(name)
}

// Minimal manifest the `yolo_custom` experiment accepts.
pub const MINIMAL_MANIFEST: &str = "\
task:
  train_data:
    input_path: 'train/*'
  validation_data:
    input_path: 'val/*'
";

pub fn write_manifest(text: &str) -> NamedTempFile {
  let mut file = tempfile::Builder::new()
    .suffix(".yaml")
    .tempfile()
    .expect("Failed to create temp manifest");
  file
    .write_all(text.as_bytes())
    .expect("Failed to write temp manifest");
  file
}
