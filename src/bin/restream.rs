// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 实时检测推流 - 拉流 → 检测 → 标注 → 推流
//!
//! 运行: cargo run --release -- --input-stream rtmp://... --output-stream rtmp://... --detections dets.jsonl
//! 带 ONNX 模型: cargo run --release --features onnx -- -m yolov8n.onnx --write-csv

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use yolo_restream::detection::{Detector, ReplayDetector};
use yolo_restream::pipeline::{self, spawn_stdin_watcher, stop_channel};
use yolo_restream::Args;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn build_detector(args: &Args) -> Result<Box<dyn Detector>> {
    #[cfg(feature = "onnx")]
    {
        if let Some(model) = &args.model {
            use yolo_restream::detection::{YOLOv8Config, YOLOv8Detector};
            let config = YOLOv8Config {
                conf: args.conf,
                iou: args.iou,
                width: args.width,
                height: args.height,
            };
            return Ok(Box::new(YOLOv8Detector::load(model, config)?));
        }
    }
    #[cfg(not(feature = "onnx"))]
    {
        if args.model.is_some() {
            anyhow::bail!("未启用 onnx 功能, 无法加载模型; 请使用 --features onnx 编译或改用 --detections");
        }
    }

    match &args.detections {
        Some(path) => Ok(Box::new(ReplayDetector::open(path)?)),
        None => anyhow::bail!("需要检测来源: --model <ONNX 模型> 或 --detections <回放文件>"),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!(
        input = %args.input_stream,
        output = %args.output_stream,
        "🎬 实时检测推流启动"
    );

    let detector = build_detector(&args).context("检测器初始化失败")?;
    let (handle, signal) = stop_channel();
    let mut driver = pipeline::init(&args, detector)
        .context("流水线初始化失败")?
        .with_stop_signal(signal);

    spawn_stdin_watcher(handle);
    info!("💡 输入 q 回车结束推流");

    let summary = driver.run().context("流水线运行失败")?;
    info!(
        frames = summary.frames_written,
        detections = summary.detections_logged,
        reason = ?summary.stop_reason,
        elapsed_secs = format_args!("{:.1}", summary.elapsed.as_secs_f64()),
        "🏁 推流结束"
    );
    Ok(())
}
