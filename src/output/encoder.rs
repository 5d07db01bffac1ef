// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 编码推流: 把标注后的原始帧写进 ffmpeg 的 stdin
//!
//! 写入是阻塞的, 没有内部队列, 编码跟不上时整条流水线随之变慢。

use std::io::{self, ErrorKind, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::input::PIXEL_FORMAT;
use crate::pipeline::timecode::sanitize_fps;

/// 帧输出端
pub trait FrameSink {
    /// 按显示顺序写入一帧, 阻塞直到写完
    fn write_frame(&mut self, frame_index: u64, data: &[u8]) -> Result<(), PipelineError>;

    /// 结束输入并等待退出, 只调用一次
    fn close(self) -> Result<(), PipelineError>
    where
        Self: Sized;
}

/// 输出封装格式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputContainer {
    Flv,
    /// RTSP 推流, 走 TCP
    Rtsp,
    MpegTs,
    /// 由 ffmpeg 按文件扩展名推断
    Auto,
    Named(String),
}

impl OutputContainer {
    /// 按输出地址推断
    pub fn from_uri(uri: &str) -> Self {
        let lower = uri.to_ascii_lowercase();
        if lower.starts_with("rtmp://") || lower.starts_with("rtmps://") {
            OutputContainer::Flv
        } else if lower.starts_with("rtsp://") {
            OutputContainer::Rtsp
        } else if lower.starts_with("srt://") || lower.starts_with("udp://") {
            OutputContainer::MpegTs
        } else {
            OutputContainer::Auto
        }
    }

    /// 显式指定的格式名
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "flv" => OutputContainer::Flv,
            "rtsp" => OutputContainer::Rtsp,
            "mpegts" => OutputContainer::MpegTs,
            "auto" | "" => OutputContainer::Auto,
            other => OutputContainer::Named(other.to_string()),
        }
    }

    fn format_name(&self) -> Option<&str> {
        match self {
            OutputContainer::Flv => Some("flv"),
            OutputContainer::Rtsp => Some("rtsp"),
            OutputContainer::MpegTs => Some("mpegts"),
            OutputContainer::Auto => None,
            OutputContainer::Named(name) => Some(name),
        }
    }
}

/// 编码进程参数
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub program: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub output_uri: String,
    pub container: OutputContainer,
    pub codec: String,
    pub preset: String,
    pub tune: String,
    pub close_timeout: Duration,
}

impl EncoderConfig {
    pub fn new(program: impl Into<String>, width: u32, height: u32, fps: f64, output_uri: impl Into<String>) -> Self {
        let output_uri = output_uri.into();
        Self {
            program: program.into(),
            width,
            height,
            fps: sanitize_fps(fps),
            container: OutputContainer::from_uri(&output_uri),
            output_uri,
            codec: "libx264".to_string(),
            preset: "ultrafast".to_string(),
            tune: "zerolatency".to_string(),
            close_timeout: Duration::from_secs(10),
        }
    }

    /// ffmpeg 参数: stdin 原始帧 → H.264 → 推流
    pub fn command_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-y",
            "-hide_banner",
            "-loglevel",
            "error",
            "-an",
            "-f",
            "rawvideo",
            "-vcodec",
            "rawvideo",
            "-pix_fmt",
            PIXEL_FORMAT,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push("-s".into());
        args.push(format!("{}x{}", self.width, self.height));
        args.push("-r".into());
        args.push(format_fps(sanitize_fps(self.fps)));
        args.extend(["-i", "-", "-c:v"].map(String::from));
        args.push(self.codec.clone());
        args.extend(["-pix_fmt", "yuv420p", "-preset"].map(String::from));
        args.push(self.preset.clone());
        args.push("-tune".into());
        args.push(self.tune.clone());
        if self.container == OutputContainer::Rtsp {
            args.extend(["-rtsp_transport", "tcp"].map(String::from));
        }
        if let Some(format) = self.container.format_name() {
            args.push("-f".into());
            args.push(format.to_string());
        }
        args.push(self.output_uri.clone());
        args
    }
}

fn format_fps(fps: f64) -> String {
    if fps.fract() == 0.0 {
        format!("{}", fps as u64)
    } else {
        format!("{fps:.3}")
    }
}

/// ffmpeg 编码推流进程
pub struct EncoderSink {
    program: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    close_timeout: Duration,
    frames: u64,
}

impl EncoderSink {
    pub fn start(config: &EncoderConfig) -> Result<Self, PipelineError> {
        let mut cmd = Command::new(&config.program);
        cmd.args(config.command_args());
        debug!(?cmd, "encoder");
        let mut sink = Self::spawn(cmd, config.close_timeout)?;
        sink.program = config.program.clone();
        info!(
            output = %config.output_uri,
            width = config.width,
            height = config.height,
            fps = config.fps,
            "✅ 编码推流进程已启动"
        );
        Ok(sink)
    }

    /// 任意从 stdin 读取原始帧的命令
    pub fn spawn(mut cmd: Command, close_timeout: Duration) -> Result<Self, PipelineError> {
        let program = cmd.get_program().to_string_lossy().into_owned();
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| PipelineError::EncoderSpawn {
                program: program.clone(),
                source,
            })?;
        let stdin = child.stdin.take();
        Ok(Self {
            program,
            child: Some(child),
            stdin,
            close_timeout,
            frames: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    fn wait_with_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        Self::poll_exit(child, timeout, Child::try_wait)
    }

    /// 轮询失败时进程状态未知, 先结束并回收再返回错误
    fn poll_exit<F>(child: &mut Child, timeout: Duration, mut poll: F) -> io::Result<Option<ExitStatus>>
    where
        F: FnMut(&mut Child) -> io::Result<Option<ExitStatus>>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            match poll(child) {
                Ok(Some(status)) => return Ok(Some(status)),
                Ok(None) => {}
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(e);
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    fn shutdown(&mut self) -> Result<(), PipelineError> {
        // 关闭 stdin = 输入结束, 编码进程刷新后退出
        self.stdin = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        match Self::wait_with_timeout(&mut child, self.close_timeout)
            .map_err(|source| PipelineError::EncoderClose { source })?
        {
            Some(status) if status.success() => {
                info!(program = %self.program, frames = self.frames, "编码进程已退出");
            }
            Some(status) => {
                warn!(program = %self.program, %status, "⚠️ 编码进程异常退出");
            }
            None => {
                warn!(
                    program = %self.program,
                    timeout_secs = self.close_timeout.as_secs_f64(),
                    "⚠️ 编码进程未按时退出, 强制结束"
                );
                let _ = child.kill();
                child
                    .wait()
                    .map_err(|source| PipelineError::EncoderClose { source })?;
            }
        }
        Ok(())
    }
}

impl FrameSink for EncoderSink {
    fn write_frame(&mut self, frame_index: u64, data: &[u8]) -> Result<(), PipelineError> {
        let stdin = self.stdin.as_mut().ok_or_else(|| PipelineError::EncoderWrite {
            frame_index,
            source: io::Error::new(ErrorKind::BrokenPipe, "编码进程输入已关闭"),
        })?;
        stdin
            .write_all(data)
            .map_err(|source| PipelineError::EncoderWrite { frame_index, source })?;
        self.frames += 1;
        Ok(())
    }

    fn close(mut self) -> Result<(), PipelineError> {
        self.shutdown()
    }
}

impl Drop for EncoderSink {
    fn drop(&mut self) {
        // 未正常关闭 (出错路径), 不等待直接结束进程
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
