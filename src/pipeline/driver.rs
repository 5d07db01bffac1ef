// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 流水线驱动 (状态机)
//!
//! 每轮只处理一帧: 编码写入完成之前不会读取下一帧, 输出顺序与输入一致。
//! 所有退出路径 (流结束、停止信号、任何一帧出错) 都会释放输入、关闭编码进程和检测记录。

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::timecode::{Timecode, TimecodeClock};
use super::{PipelineState, RunSummary, StopReason, StopSignal};
use crate::config::{resolve_program, Args, LabelMap};
use crate::detection::{Detection, Detector};
use crate::error::PipelineError;
use crate::input::{FfmpegSource, FrameSource, PrefetchSource};
use crate::output::{DetectionLog, EncoderConfig, EncoderSink, FrameSink, OutputContainer};
use crate::renderer::{load_font, stroke_width, Annotator, ColorTable};

/// 每秒一次的吞吐统计
struct ThroughputStats {
    count: u64,
    detect: Duration,
    write: Duration,
    last: Instant,
}

impl ThroughputStats {
    fn new() -> Self {
        Self {
            count: 0,
            detect: Duration::ZERO,
            write: Duration::ZERO,
            last: Instant::now(),
        }
    }

    fn record(&mut self, detect: Duration, write: Duration, total_frames: u64) {
        self.count += 1;
        self.detect += detect;
        self.write += write;

        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            let n = self.count as f64;
            info!(
                fps = format_args!("{:.1}", n / elapsed),
                detect_ms = format_args!("{:.1}", self.detect.as_secs_f64() * 1000.0 / n),
                write_ms = format_args!("{:.1}", self.write.as_secs_f64() * 1000.0 / n),
                total = total_frames,
                "📊 推流统计"
            );
            self.count = 0;
            self.detect = Duration::ZERO;
            self.write = Duration::ZERO;
            self.last = Instant::now();
        }
    }
}

pub struct PipelineDriver<S, D, K> {
    source: S,
    detector: D,
    sink: Option<K>,
    log: Option<DetectionLog>,
    annotator: Annotator,
    colors: ColorTable,
    clock: TimecodeClock,
    stop: StopSignal,
    size: (u32, u32),
    stroke: u32,
    state: PipelineState,
    frames_written: u64,
    detections_logged: u64,
}

impl<S, D, K> PipelineDriver<S, D, K>
where
    S: FrameSource,
    D: Detector,
    K: FrameSink,
{
    /// 组装已经打开的各阶段; 分辨率与帧率在这里向帧源查询一次
    pub fn new(
        source: S,
        detector: D,
        sink: K,
        log: Option<DetectionLog>,
        annotator: Annotator,
        colors: ColorTable,
    ) -> Self {
        let size = source.frame_size();
        let clock = TimecodeClock::new(source.frame_rate());
        Self {
            source,
            detector,
            sink: Some(sink),
            log,
            annotator,
            colors,
            clock,
            stop: StopSignal::never(),
            size,
            stroke: stroke_width(size.1),
            state: PipelineState::Init,
            frames_written: 0,
            detections_logged: 0,
        }
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn colors(&self) -> &ColorTable {
        &self.colors
    }

    /// 运行到流结束、收到停止信号或出错为止
    pub fn run(&mut self) -> Result<RunSummary, PipelineError> {
        if self.state != PipelineState::Init {
            return Err(PipelineError::Config(format!(
                "流水线已结束 ({:?}), 不能再次运行",
                self.state
            )));
        }
        let started = Instant::now();
        self.state = PipelineState::Running;
        info!(
            width = self.size.0,
            height = self.size.1,
            fps = self.clock.fps(),
            stroke = self.stroke,
            "🚀 流水线开始运行"
        );

        match self.process() {
            Ok(stop_reason) => {
                self.state = PipelineState::Draining;
                self.drain()?;
                self.state = PipelineState::Stopped;
                let summary = RunSummary {
                    frames_written: self.frames_written,
                    detections_logged: self.detections_logged,
                    stop_reason,
                    elapsed: started.elapsed(),
                };
                info!(
                    frames = summary.frames_written,
                    detections = summary.detections_logged,
                    reason = ?summary.stop_reason,
                    elapsed_secs = summary.elapsed.as_secs_f64(),
                    "✅ 流水线已停止"
                );
                Ok(summary)
            }
            Err(e) => {
                self.abort(&e);
                Err(e)
            }
        }
    }

    fn process(&mut self) -> Result<StopReason, PipelineError> {
        let mut stats = ThroughputStats::new();
        loop {
            if self.stop.is_raised() {
                info!(frames = self.frames_written, "⏹️ 停止信号, 结束处理");
                return Ok(StopReason::StopRequested);
            }

            let Some(mut frame) = self.source.next_frame() else {
                return Ok(StopReason::EndOfStream);
            };
            let (width, height) = self.size;
            if frame.width() != width || frame.height() != height {
                return Err(PipelineError::GeometryChanged {
                    frame_index: frame.index,
                    width,
                    height,
                    actual_width: frame.width(),
                    actual_height: frame.height(),
                });
            }

            let detect_start = Instant::now();
            let detections = self
                .detector
                .detect(&frame)
                .and_then(|detections| {
                    detections.iter().try_for_each(Detection::validate)?;
                    Ok(detections)
                })
                .map_err(|source| PipelineError::Detection {
                    frame_index: frame.index,
                    source,
                })?;
            let detect_time = detect_start.elapsed();
            debug!(frame = frame.index, count = detections.len(), "检测完成");

            let timecode = self.clock.advance();
            self.annotator
                .draw(&mut frame, &detections, &mut self.colors, self.stroke);
            self.append_log(&timecode, &detections);

            let write_start = Instant::now();
            let sink = self.sink.as_mut().ok_or_else(|| PipelineError::EncoderWrite {
                frame_index: frame.index,
                source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "编码进程已关闭"),
            })?;
            sink.write_frame(frame.index, frame.as_bytes())?;
            self.frames_written += 1;
            stats.record(detect_time, write_start.elapsed(), self.frames_written);
        }
    }

    /// 写记录失败只告警, 并在本次运行中停用记录
    fn append_log(&mut self, timecode: &Timecode, detections: &[Detection]) {
        let Some(log) = self.log.as_mut() else {
            return;
        };
        match log.append(timecode, detections) {
            Ok(()) => self.detections_logged += detections.len() as u64,
            Err(e) => {
                warn!(error = %e, "⚠️ 检测记录写入失败, 停止记录");
                self.close_log();
            }
        }
    }

    fn close_log(&mut self) {
        if let Some(log) = self.log.take() {
            if let Err(e) = log.close() {
                warn!(error = %e, "⚠️ 关闭检测记录失败");
            }
        }
    }

    fn drain(&mut self) -> Result<(), PipelineError> {
        self.source.release();
        let closed = match self.sink.take() {
            Some(sink) => sink.close(),
            None => Ok(()),
        };
        self.close_log();
        if let Err(e) = closed {
            self.state = PipelineState::Error;
            error!(stage = %e.stage(), error = %e, "❌ 流水线收尾失败");
            return Err(e);
        }
        Ok(())
    }

    fn abort(&mut self, e: &PipelineError) {
        self.state = PipelineState::Error;
        error!(
            stage = %e.stage(),
            error = %e,
            frames = self.frames_written,
            "❌ 流水线出错"
        );
        self.source.release();
        if let Some(sink) = self.sink.take() {
            if let Err(close_err) = sink.close() {
                warn!(error = %close_err, "⚠️ 关闭编码进程失败");
            }
        }
        self.close_log();
    }
}

/// 按命令行参数构建生产流水线: ffmpeg 拉流 → 检测器 → ffmpeg 推流
///
/// 任一步失败时, 之前已获取的资源都会释放, 不会处理任何帧。
pub fn init<D: Detector>(
    args: &Args,
    detector: D,
) -> Result<PipelineDriver<Box<dyn FrameSource + Send>, D, EncoderSink>, PipelineError> {
    let labels = match &args.labels_config {
        Some(path) => LabelMap::load(path, &args.model_name)?,
        None => LabelMap::default(),
    };
    let font = match load_font(&args.font) {
        Ok(font) => Some(font),
        Err(e) => {
            warn!(error = %e, "⚠️ 字体不可用, 只绘制检测框");
            None
        }
    };
    let colors = match args.color_seed {
        Some(seed) => ColorTable::with_seed(seed),
        None => ColorTable::new(),
    };

    let ffmpeg = resolve_program(&args.ffmpeg_path, "ffmpeg");
    let ffprobe = resolve_program(&args.ffprobe_path, "ffprobe");

    let source = FfmpegSource::open(&ffmpeg, &ffprobe, &args.input_stream)?;
    let mut source: Box<dyn FrameSource + Send> = if args.prefetch > 0 {
        Box::new(PrefetchSource::spawn(source, args.prefetch))
    } else {
        Box::new(source)
    };

    let (width, height) = source.frame_size();
    let mut config = EncoderConfig::new(
        ffmpeg,
        width,
        height,
        source.frame_rate(),
        args.output_stream.clone(),
    );
    if let Some(format) = &args.output_format {
        config.container = OutputContainer::from_name(format);
    }
    config.codec = args.encoder_codec.clone();
    config.preset = args.encoder_preset.clone();
    config.tune = args.encoder_tune.clone();
    config.close_timeout = Duration::from_secs(args.encoder_close_timeout);

    let sink = match EncoderSink::start(&config) {
        Ok(sink) => sink,
        Err(e) => {
            source.release();
            return Err(e);
        }
    };

    let log = match args.csv_output() {
        Some(path) => match DetectionLog::open(&path) {
            Ok(log) => Some(log),
            Err(e) => {
                source.release();
                let _ = sink.close();
                return Err(e);
            }
        },
        None => None,
    };

    Ok(PipelineDriver::new(
        source,
        detector,
        sink,
        log,
        Annotator::new(font, labels),
        colors,
    ))
}
