// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 帧计数时间码 `HH:MM:SS:FF`
//!
//! 只由 (帧计数, 帧率) 推导, 与墙上时钟无关: 同一输入流、同样的丢帧情况,
//! 记录中的时间码完全一致。

use std::fmt;

/// 探测不到有效帧率时使用的默认值
pub const DEFAULT_FPS: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timecode {
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
    pub frames: u64,
}

impl Timecode {
    /// counter = 从 0 开始的帧计数
    ///
    /// 等价于 `hours = floor(c / (fps*3600))`, `minutes = floor((c mod fps*3600) / (fps*60))`,
    /// `seconds = floor((c mod fps*60) / fps)`, `frames = floor(c mod fps)`;
    /// 四个字段都从同一个整秒数推出, 非整数帧率下也不会在边界处前后矛盾。
    pub fn from_frame_count(counter: u64, fps: f64) -> Self {
        let fps = sanitize_fps(fps);
        let c = counter as f64;
        let whole_seconds = (c / fps).floor();
        // 浮点误差可能得到极小的负数, 转换时饱和为 0
        let frames = (c - whole_seconds * fps).floor() as u64;
        let whole_seconds = whole_seconds as u64;
        Self {
            hours: whole_seconds / 3600,
            minutes: whole_seconds % 3600 / 60,
            seconds: whole_seconds % 60,
            frames,
        }
    }
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}:{:02}",
            self.hours, self.minutes, self.seconds, self.frames
        )
    }
}

/// 非正数或非有限帧率退回 25fps
pub fn sanitize_fps(fps: f64) -> f64 {
    if fps.is_finite() && fps > 0.0 {
        fps
    } else {
        DEFAULT_FPS
    }
}

/// 时间码时钟: 计数器只属于这一个对象
#[derive(Debug, Clone)]
pub struct TimecodeClock {
    fps: f64,
    counter: u64,
}

impl TimecodeClock {
    pub fn new(fps: f64) -> Self {
        Self {
            fps: sanitize_fps(fps),
            counter: 0,
        }
    }

    /// 返回当前帧的时间码, 然后计数加一 (首帧为 00:00:00:00)
    pub fn advance(&mut self) -> Timecode {
        let tc = Timecode::from_frame_count(self.counter, self.fps);
        self.counter += 1;
        tc
    }

    pub fn frame_count(&self) -> u64 {
        self.counter
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }
}
