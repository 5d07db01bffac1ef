// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! ffmpeg 子进程拉流解码
//!
//! 先用 ffprobe 读出分辨率和帧率, 再启动 ffmpeg 把视频解码成原始 RGB24
//! 写到 stdout, 按固定帧长读取。

use std::io::{ErrorKind, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{frame_len, AbortHandle, FrameSource, PIXEL_FORMAT};
use crate::detection::Frame;
use crate::error::PipelineError;
use crate::pipeline::timecode::DEFAULT_FPS;

/// 探测到的视频流参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

/// 解析 ffprobe 的帧率字符串 ("30000/1001", "25", "0/0")
///
/// 无法解析或不为正数时返回 None
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let fps = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

fn parse_probe(uri: &str, json: &[u8]) -> Result<StreamInfo, PipelineError> {
    let unavailable = |reason: String| PipelineError::SourceUnavailable {
        uri: uri.to_string(),
        reason,
    };
    let probe: ProbeOutput =
        serde_json::from_slice(json).map_err(|e| unavailable(format!("ffprobe 输出无法解析: {e}")))?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| unavailable("没有视频流".to_string()))?;
    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(unavailable("视频流分辨率未知".to_string())),
    };
    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or_else(|| {
            warn!(uri, "⚠️ 无法获取帧率, 使用默认 {DEFAULT_FPS}fps");
            DEFAULT_FPS
        });
    Ok(StreamInfo { width, height, fps })
}

fn is_rtsp(uri: &str) -> bool {
    uri.to_ascii_lowercase().starts_with("rtsp://")
}

/// 用 ffprobe 读取第一个视频流的分辨率与帧率
pub fn probe_stream(ffprobe: &str, uri: &str) -> Result<StreamInfo, PipelineError> {
    let mut cmd = Command::new(ffprobe);
    cmd.args(["-v", "error"]);
    if is_rtsp(uri) {
        cmd.args(["-rtsp_transport", "tcp"]);
    }
    cmd.args([
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=width,height,avg_frame_rate,r_frame_rate",
        "-of",
        "json",
        uri,
    ]);
    debug!(?cmd, "ffprobe");

    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|e| PipelineError::SourceUnavailable {
            uri: uri.to_string(),
            reason: format!("无法运行 {ffprobe}: {e}"),
        })?;
    if !output.status.success() {
        return Err(PipelineError::SourceUnavailable {
            uri: uri.to_string(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    parse_probe(uri, &output.stdout)
}

/// ffmpeg 解码帧源
pub struct FfmpegSource {
    uri: String,
    info: StreamInfo,
    child: Arc<Mutex<Option<Child>>>,
    stdout: Option<ChildStdout>,
    next_index: u64,
}

impl FfmpegSource {
    /// 探测并启动解码进程
    pub fn open(ffmpeg: &str, ffprobe: &str, uri: &str) -> Result<Self, PipelineError> {
        let info = probe_stream(ffprobe, uri)?;
        Self::spawn(ffmpeg, uri, info)
    }

    /// 已知流参数时直接启动解码进程
    pub fn spawn(ffmpeg: &str, uri: &str, info: StreamInfo) -> Result<Self, PipelineError> {
        let mut cmd = Command::new(ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error"]);
        if is_rtsp(uri) {
            cmd.args(["-rtsp_transport", "tcp"]);
        }
        cmd.args(["-i", uri, "-an", "-f", "rawvideo", "-pix_fmt", PIXEL_FORMAT])
            .args(["-s", &format!("{}x{}", info.width, info.height)])
            .arg("-");
        Self::from_command(cmd, uri, info)
    }

    /// 任意输出原始帧到 stdout 的命令
    pub fn from_command(mut cmd: Command, uri: &str, info: StreamInfo) -> Result<Self, PipelineError> {
        debug!(?cmd, "decoder");
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| PipelineError::SourceUnavailable {
                uri: uri.to_string(),
                reason: format!("无法启动解码进程: {e}"),
            })?;
        let stdout = child.stdout.take();
        info!(
            uri,
            width = info.width,
            height = info.height,
            fps = info.fps,
            "✅ 输入流已打开"
        );
        Ok(Self {
            uri: uri.to_string(),
            info,
            child: Arc::new(Mutex::new(Some(child))),
            stdout,
            next_index: 0,
        })
    }

    pub fn info(&self) -> StreamInfo {
        self.info
    }
}

/// 结束并回收解码进程; stdout 上阻塞的读取随之返回 EOF
fn kill_child(child: &Mutex<Option<Child>>) -> bool {
    let Ok(mut guard) = child.lock() else {
        return false;
    };
    let Some(mut child) = guard.take() else {
        return false;
    };
    let _ = child.kill();
    let _ = child.wait();
    true
}

impl FrameSource for FfmpegSource {
    fn frame_rate(&self) -> f64 {
        self.info.fps
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.info.width, self.info.height)
    }

    fn next_frame(&mut self) -> Option<Frame> {
        let stdout = self.stdout.as_mut()?;
        let mut buf = vec![0u8; frame_len(self.info.width, self.info.height)];
        if let Err(e) = stdout.read_exact(&mut buf) {
            if e.kind() == ErrorKind::UnexpectedEof {
                info!(uri = %self.uri, frames = self.next_index, "输入流结束");
            } else {
                warn!(uri = %self.uri, error = %e, "⚠️ 读取输入帧失败, 按流结束处理");
            }
            self.stdout = None;
            return None;
        }
        let frame = Frame::from_raw(self.next_index, self.info.width, self.info.height, buf)?;
        self.next_index += 1;
        Some(frame)
    }

    fn release(&mut self) {
        self.stdout = None;
        // 解码进程可能阻塞在网络读上, 直接结束
        if kill_child(&self.child) {
            debug!(uri = %self.uri, "解码进程已退出");
        }
    }

    fn abort_handle(&self) -> Option<AbortHandle> {
        let child = self.child.clone();
        Some(Arc::new(move || {
            kill_child(&child);
        }))
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("25/1"), Some(25.0));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("-5"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn test_parse_probe() {
        let json = br#"{"streams":[{"width":1280,"height":720,"avg_frame_rate":"0/0","r_frame_rate":"30/1"}]}"#;
        let info = parse_probe("rtmp://x", json).unwrap();
        assert_eq!(info, StreamInfo { width: 1280, height: 720, fps: 30.0 });

        let json = br#"{"streams":[{"width":640,"height":480}]}"#;
        assert_eq!(parse_probe("x", json).unwrap().fps, DEFAULT_FPS);

        let err = parse_probe("x", br#"{"streams":[]}"#).unwrap_err();
        assert!(matches!(err, PipelineError::SourceUnavailable { .. }));
        assert!(parse_probe("x", b"not json").is_err());
    }

    #[test]
    fn test_probe_missing_program() {
        let err = probe_stream("/nonexistent/ffprobe", "rtmp://x").unwrap_err();
        assert!(matches!(err, PipelineError::SourceUnavailable { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_reads_fixed_size_frames_until_eof() {
        // 2x2 RGB24 = 12 字节一帧, 26 字节 = 2 帧 + 残帧
        let mut cmd = Command::new("head");
        cmd.args(["-c", "26", "/dev/zero"]);
        let info = StreamInfo { width: 2, height: 2, fps: 25.0 };
        let mut source = FfmpegSource::from_command(cmd, "zero", info).unwrap();
        assert_eq!(source.frame_size(), (2, 2));

        let first = source.next_frame().unwrap();
        assert_eq!(first.index, 0);
        assert_eq!(first.as_bytes().len(), 12);
        assert_eq!(source.next_frame().unwrap().index, 1);
        assert!(source.next_frame().is_none());
        assert!(source.next_frame().is_none());
        source.release();
        source.release();
    }

    #[cfg(unix)]
    #[test]
    fn test_abort_handle_unblocks_reader() {
        // sleep 不输出任何数据, 读取一直阻塞
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let info = StreamInfo { width: 2, height: 2, fps: 25.0 };
        let mut source = FfmpegSource::from_command(cmd, "stalled", info).unwrap();
        let abort = source.abort_handle().unwrap();

        let reader = std::thread::spawn(move || source.next_frame().is_none());
        std::thread::sleep(std::time::Duration::from_millis(100));
        let started = std::time::Instant::now();
        abort();
        abort();
        assert!(reader.join().unwrap());
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }
}
