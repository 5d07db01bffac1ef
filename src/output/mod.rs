// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 输出系统 (Output System)
///
/// - EncoderSink: ffmpeg 编码推流子进程
/// - DetectionLog: 检测记录 CSV
pub mod detection_log;
pub mod encoder;

pub use detection_log::DetectionLog;
pub use encoder::{EncoderConfig, EncoderSink, FrameSink, OutputContainer};
