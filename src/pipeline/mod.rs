// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 实时检测推流流水线 (Restream Pipeline)
///
/// 单线程逐帧处理: 取帧 → 检测 → 标注 → 记录 → 编码推流
/// - PipelineDriver: 状态机, 负责所有资源的获取与释放
/// - TimecodeClock: 帧计数时间码
/// - StopSignal: 停止信号 (stdin 输入 q)
pub mod driver;
pub mod timecode;

pub use driver::{init, PipelineDriver};
pub use timecode::{Timecode, TimecodeClock};

use std::io::BufRead;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use tracing::{info, warn};

// ========== 状态与结果 ==========

/// 流水线状态: INIT → RUNNING → DRAINING → STOPPED, 出错进入 ERROR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Running,
    Draining,
    Stopped,
    Error,
}

/// 停止原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// 输入流结束
    EndOfStream,
    /// 收到停止信号
    StopRequested,
}

/// 运行汇总
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub frames_written: u64,
    pub detections_logged: u64,
    pub stop_reason: StopReason,
    pub elapsed: Duration,
}

// ========== 停止信号 ==========

/// 发送端, 可以克隆到任意线程
#[derive(Clone)]
pub struct StopHandle {
    tx: Sender<()>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.tx.try_send(());
    }
}

/// 接收端, 由流水线在每轮开始时检查; 一旦收到就保持停止状态
pub struct StopSignal {
    rx: Option<Receiver<()>>,
    raised: bool,
}

impl StopSignal {
    /// 永远不会触发的信号
    pub fn never() -> Self {
        Self {
            rx: None,
            raised: false,
        }
    }

    pub fn is_raised(&mut self) -> bool {
        if self.raised {
            return true;
        }
        if let Some(rx) = &self.rx {
            match rx.try_recv() {
                Ok(()) => self.raised = true,
                // 所有发送端都已丢弃, 之后不可能再收到
                Err(TryRecvError::Disconnected) => self.rx = None,
                Err(TryRecvError::Empty) => {}
            }
        }
        self.raised
    }
}

pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = bounded(1);
    (
        StopHandle { tx },
        StopSignal {
            rx: Some(rx),
            raised: false,
        },
    )
}

/// 后台读取 stdin, 输入 `q` 回车后发出停止信号
pub fn spawn_stdin_watcher(handle: StopHandle) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) if line.trim().eq_ignore_ascii_case("q") => {
                    info!("⏹️ 收到退出指令");
                    handle.stop();
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "⚠️ 读取标准输入失败");
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_signal_is_sticky() {
        let (handle, mut signal) = stop_channel();
        assert!(!signal.is_raised());
        handle.stop();
        handle.stop();
        assert!(signal.is_raised());
        assert!(signal.is_raised());
    }

    #[test]
    fn test_dropped_handle_does_not_stop() {
        let (handle, mut signal) = stop_channel();
        drop(handle);
        assert!(!signal.is_raised());
        assert!(!StopSignal::never().is_raised());
    }
}
