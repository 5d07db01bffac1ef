// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 流水线错误类型
//!
//! 每个变体都带有出错的阶段和资源信息, 不需要源码就能定位问题。

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// 出错阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Input,
    Detector,
    Annotator,
    Encoder,
    Log,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Config => "config",
            Stage::Input => "input",
            Stage::Detector => "detector",
            Stage::Annotator => "annotator",
            Stage::Encoder => "encoder",
            Stage::Log => "log",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// 输入流无法打开
    #[error("无法打开输入流 {uri}: {reason}")]
    SourceUnavailable { uri: String, reason: String },

    /// 输入流中途改变了分辨率
    #[error(
        "输入帧 #{frame_index} 分辨率 {actual_width}x{actual_height} 与开流时 {width}x{height} 不一致"
    )]
    GeometryChanged {
        frame_index: u64,
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// 编码进程不存在或无法启动
    #[error("无法启动编码进程 {program}: {source}")]
    EncoderSpawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// 编码进程管道断开 (进程已退出)
    #[error("写入编码进程失败 (帧 #{frame_index}): {source}")]
    EncoderWrite {
        frame_index: u64,
        #[source]
        source: io::Error,
    },

    /// 结束输入后等待编码进程退出失败
    #[error("关闭编码进程失败: {source}")]
    EncoderClose {
        #[source]
        source: io::Error,
    },

    /// 检测器返回错误
    #[error("检测失败 (帧 #{frame_index}): {source}")]
    Detection {
        frame_index: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("无法创建检测记录文件 {}: {source}", .path.display())]
    LogOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("写入检测记录失败: {0}")]
    LogWrite(#[source] io::Error),

    #[error("字体加载失败 {}: {reason}", .path.display())]
    Font { path: PathBuf, reason: String },

    #[error("配置错误: {0}")]
    Config(String),
}

impl PipelineError {
    /// 出错阶段, 用于日志上下文
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::SourceUnavailable { .. } | PipelineError::GeometryChanged { .. } => {
                Stage::Input
            }
            PipelineError::EncoderSpawn { .. }
            | PipelineError::EncoderWrite { .. }
            | PipelineError::EncoderClose { .. } => Stage::Encoder,
            PipelineError::Detection { .. } => Stage::Detector,
            PipelineError::LogOpen { .. } | PipelineError::LogWrite(_) => Stage::Log,
            PipelineError::Font { .. } => Stage::Annotator,
            PipelineError::Config(_) => Stage::Config,
        }
    }
}
