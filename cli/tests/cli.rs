use std::process::{Command, Output};

fn yolo(args: &[&str]) -> Output {
  Command::new(env!("CARGO_BIN_EXE_yolo"))
    .args(args)
    .env_remove("RUST_LOG")
    .env_remove("YOLO_ENV")
    .env_remove("APP_ENV")
    .output()
    .expect("failed to run yolo")
}

#[test]
fn test_check_yolov3() {
  let output = yolo(&["check", "-e", "yolov3"]);
  assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
  assert!(String::from_utf8_lossy(&output.stdout).starts_with("OK yolov3: 80 classes"));
}

#[test]
fn test_invalid_override_fails_with_field_path() {
  let output = yolo(&["check", "-e", "yolov3", "--params-override", "task.model.boxes_per_scale=2"]);
  assert!(!output.status.success());
  assert!(String::from_utf8_lossy(&output.stderr).contains("task.model.boxes"));
}

#[test]
fn test_serialize_then_check_the_written_file() {
  let dir = tempfile::tempdir().unwrap();
  let model_dir = dir.path().to_str().unwrap();
  let output = yolo(&["serialize", "-e", "yolov3", "--model-dir", model_dir]);
  assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

  let params = dir.path().join("params.yaml");
  let output = yolo(&["check", "-c", params.to_str().unwrap()]);
  assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
}

#[test]
fn test_steps_and_every_conflict() {
  let output = yolo(&["lr", "-e", "yolov3", "--steps", "1,2", "--every", "5"]);
  assert!(!output.status.success());
}
