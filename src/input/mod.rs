// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 视频输入系统 (Video Input System)
///
/// - FrameSource: 帧源接口, 开流后分辨率与帧率固定
/// - FfmpegSource: ffmpeg 子进程解码, 输出原始 RGB24 帧
/// - PrefetchSource: 可选的预读线程 (有界队列)
pub mod ffmpeg;
pub mod prefetch;

pub use ffmpeg::{parse_frame_rate, probe_stream, FfmpegSource, StreamInfo};
pub use prefetch::{PrefetchSource, JOIN_TIMEOUT};

use std::sync::Arc;

use crate::detection::Frame;

/// 从其他线程中断阻塞中的读取 (结束解码进程), 可重复调用
pub type AbortHandle = Arc<dyn Fn() + Send + Sync>;

/// 解码与编码两端约定的像素格式
pub const PIXEL_FORMAT: &str = "rgb24";
pub const BYTES_PER_PIXEL: usize = 3;

/// 帧源
///
/// `frame_rate` 与 `frame_size` 在第一次 `next_frame` 之前查询一次,
/// 整个运行期间不变。`next_frame` 阻塞直到有帧或流结束, 读失败也视为结束。
pub trait FrameSource {
    fn frame_rate(&self) -> f64;

    fn frame_size(&self) -> (u32, u32);

    fn next_frame(&mut self) -> Option<Frame>;

    /// 释放底层资源, 可重复调用
    fn release(&mut self);

    /// 阻塞在 `next_frame` 中时, 用于从其他线程打断读取
    fn abort_handle(&self) -> Option<AbortHandle> {
        None
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn frame_rate(&self) -> f64 {
        (**self).frame_rate()
    }

    fn frame_size(&self) -> (u32, u32) {
        (**self).frame_size()
    }

    fn next_frame(&mut self) -> Option<Frame> {
        (**self).next_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn abort_handle(&self) -> Option<AbortHandle> {
        (**self).abort_handle()
    }
}

/// 一帧原始数据的字节数
pub fn frame_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * BYTES_PER_PIXEL
}
