//! Geometry helpers behind a YOLO training manifest.
//!
//! - [`box_ops`]: box format conversion and the IoU family (IoU, GIoU, DIoU, CIoU).
//! - [`anchors`]: anchor masks per output level, shape-based anchor matching
//!   and grid target assignment.
//! - [`preprocess`]: instance padding, letterboxing and box translation.
//! - [`kmeans`]: anchor prior selection by k-means over box shapes.

pub mod anchors;
pub mod box_ops;
pub mod error;
pub mod kmeans;
pub mod preprocess;

pub use error::{Error, Result};
