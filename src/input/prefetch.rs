// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 预读帧源: 解码放到独立线程, 通过有界队列交给流水线
//!
//! 队列满时解码线程阻塞, 背压仍然一路传到输入端。
//! 释放时先通过内部帧源的 abort 句柄打断阻塞读取, 再限时等待线程退出。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver};
use tracing::{debug, info, warn};

use super::{AbortHandle, FrameSource};
use crate::detection::Frame;

/// 释放时等待预读线程退出的上限, 超时后线程被分离
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

pub struct PrefetchSource {
    fps: f64,
    size: (u32, u32),
    rx: Option<Receiver<Frame>>,
    stop: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
    worker: Option<JoinHandle<()>>,
}

impl PrefetchSource {
    /// depth = 队列容量 (至少 1)
    pub fn spawn<S>(mut inner: S, depth: usize) -> Self
    where
        S: FrameSource + Send + 'static,
    {
        let fps = inner.frame_rate();
        let size = inner.frame_size();
        let abort = inner.abort_handle();
        let (tx, rx) = bounded::<Frame>(depth.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let worker = thread::spawn(move || {
            info!(depth, "✅ 预读线程启动");
            let mut count = 0u64;
            while !stop_flag.load(Ordering::Relaxed) {
                let Some(frame) = inner.next_frame() else {
                    break;
                };
                if tx.send(frame).is_err() {
                    break;
                }
                count += 1;
            }
            inner.release();
            debug!(frames = count, "预读线程退出");
        });

        Self {
            fps,
            size,
            rx: Some(rx),
            stop,
            abort,
            worker: Some(worker),
        }
    }
}

impl FrameSource for PrefetchSource {
    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn frame_size(&self) -> (u32, u32) {
        self.size
    }

    fn next_frame(&mut self) -> Option<Frame> {
        self.rx.as_ref()?.recv().ok()
    }

    fn release(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // 丢掉接收端, 阻塞在 send 上的解码线程随之退出
        self.rx = None;
        let Some(worker) = self.worker.take() else {
            return;
        };
        // 阻塞在读取上的解码线程只能靠结束解码进程唤醒
        if let Some(abort) = &self.abort {
            abort();
        }
        let deadline = Instant::now() + JOIN_TIMEOUT;
        while !worker.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if worker.is_finished() {
            let _ = worker.join();
        } else {
            warn!(timeout_ms = JOIN_TIMEOUT.as_millis() as u64, "⚠️ 预读线程未能及时退出, 已分离");
        }
    }

    fn abort_handle(&self) -> Option<AbortHandle> {
        self.abort.clone()
    }
}

impl Drop for PrefetchSource {
    fn drop(&mut self) {
        self.release();
    }
}
