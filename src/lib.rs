// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 运行参数与标签翻译表
pub mod detection; // 检测接口与检测器
pub mod error; // 流水线错误
pub mod input; // 视频输入 (ffmpeg 拉流解码)
pub mod output; // 编码推流与检测记录
pub mod pipeline; // 流水线状态机与时间码
pub mod renderer; // 检测框与标签绘制

pub use crate::config::{Args, LabelMap};
pub use crate::detection::{BBox, Detection, Detector, Frame, ReplayDetector};
pub use crate::error::{PipelineError, Stage};
pub use crate::pipeline::{PipelineDriver, PipelineState, RunSummary, StopReason};

/// 本地时间字符串, 用于生成文件名 (如 20240501093000)
pub fn gen_time_string(delimiter: &str) -> String {
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S",
        delimiter, delimiter, delimiter, delimiter, delimiter
    );
    chrono::Local::now().format(&fmt).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gen_time_string() {
        let s = gen_time_string("");
        assert_eq!(s.len(), 14);
        assert!(s.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(gen_time_string("-").matches('-').count(), 5);
    }
}
