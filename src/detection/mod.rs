// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测系统 (Detection System)
///
/// - Detector: 统一检测接口 (外部协作者, 对流水线是黑盒)
/// - ReplayDetector: 回放预先记录的检测结果
/// - YOLOv8Detector: ONNX Runtime 推理 (需要 `onnx` 功能)
pub mod detector;
pub mod types;
#[cfg(feature = "onnx")]
pub mod yolov8;

pub use detector::{Detector, ReplayDetector};
pub use types::{BBox, Detection, Frame};
#[cfg(feature = "onnx")]
pub use yolov8::{YOLOv8Config, YOLOv8Detector};
