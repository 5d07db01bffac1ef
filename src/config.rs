// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 运行参数与标签翻译表

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{debug, warn};

use crate::error::PipelineError;

/// YOLO 实时检测推流
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "YOLO 实时检测推流 (拉流 → 检测 → 标注 → 推流)", long_about = None)]
pub struct Args {
    /// 输入流地址
    #[arg(long, default_value = "rtmp://localhost:1935/obs/stream")]
    pub input_stream: String,

    /// 输出流地址
    #[arg(long, default_value = "rtmp://localhost:1935/output/stream")]
    pub output_stream: String,

    /// ffmpeg 可执行文件 (不存在时退回 PATH 中的 ffmpeg)
    #[arg(long, default_value = "ffmpeg")]
    pub ffmpeg_path: String,

    /// ffprobe 可执行文件
    #[arg(long, default_value = "ffprobe")]
    pub ffprobe_path: String,

    /// 输出封装格式 (flv/rtsp/mpegts/...), 默认按输出地址推断
    #[arg(long)]
    pub output_format: Option<String>,

    /// 编码器
    #[arg(long, default_value = "libx264")]
    pub encoder_codec: String,

    /// 编码预设
    #[arg(long, default_value = "ultrafast")]
    pub encoder_preset: String,

    /// 编码调优
    #[arg(long, default_value = "zerolatency")]
    pub encoder_tune: String,

    /// 关闭输入后等待编码进程退出的秒数, 超时强制结束
    #[arg(long, default_value_t = 10)]
    pub encoder_close_timeout: u64,

    /// ONNX 检测模型 (需要 onnx 功能)
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    /// 检测结果回放文件 (JSON Lines, 每行一帧)
    #[arg(long)]
    pub detections: Option<PathBuf>,

    /// 置信度阈值
    #[arg(long, default_value_t = 0.25)]
    pub conf: f32,

    /// NMS IOU 阈值
    #[arg(long, default_value_t = 0.45)]
    pub iou: f32,

    /// 推理输入宽度 (模型为动态尺寸时生效)
    #[arg(long, default_value_t = 640)]
    pub width: u32,

    /// 推理输入高度
    #[arg(long, default_value_t = 640)]
    pub height: u32,

    /// 是否写检测记录 CSV
    #[arg(long)]
    pub write_csv: bool,

    /// CSV 路径, 缺省时按当前时间生成
    #[arg(long)]
    pub csv_path: Option<PathBuf>,

    /// 标签翻译表 (YAML)
    #[arg(long)]
    pub labels_config: Option<PathBuf>,

    /// 翻译表中的模型名
    #[arg(long, default_value = "default")]
    pub model_name: String,

    /// 标签字体
    #[arg(long, default_value = "assets/font/msyh.ttc")]
    pub font: PathBuf,

    /// 类别颜色随机种子
    #[arg(long)]
    pub color_seed: Option<u64>,

    /// 预读帧数 (0 = 不预读, 解码与检测串行)
    #[arg(long, default_value_t = 0)]
    pub prefetch: usize,
}

impl Args {
    /// 检测记录路径: 未启用时为 None
    pub fn csv_output(&self) -> Option<PathBuf> {
        if !self.write_csv && self.csv_path.is_none() {
            return None;
        }
        Some(self.csv_path.clone().unwrap_or_else(|| {
            PathBuf::from(format!("detections_{}.csv", crate::gen_time_string("")))
        }))
    }
}

/// 可执行文件路径: 显式路径不存在时退回 PATH 中的默认程序
pub fn resolve_program(configured: &str, fallback: &str) -> String {
    let path = Path::new(configured);
    let is_bare_name = path.components().count() == 1;
    if is_bare_name || path.is_file() {
        return configured.to_string();
    }
    warn!(
        configured,
        fallback, "⚠️ 指定的可执行文件不存在, 改用 PATH 中的程序"
    );
    fallback.to_string()
}

/// 标签翻译表 (原始类别名 → 显示名)
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
    names: HashMap<String, String>,
}

impl LabelMap {
    /// 读取 YAML: 顶层按模型名分组, 找不到模型名时返回空表
    ///
    /// ```yaml
    /// construction-v1:
    ///   person: 人员
    ///   helmet: 安全帽
    /// ```
    pub fn load<P: AsRef<Path>>(path: P, model_name: &str) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("无法读取标签翻译表 {}: {e}", path.display()))
        })?;
        Self::from_yaml(&text, model_name).map_err(|e| {
            PipelineError::Config(format!("标签翻译表 {} 格式错误: {e}", path.display()))
        })
    }

    pub fn from_yaml(text: &str, model_name: &str) -> Result<Self, serde_yaml::Error> {
        let mut all: HashMap<String, HashMap<String, String>> = serde_yaml::from_str(text)?;
        match all.remove(model_name) {
            Some(names) => {
                debug!(model_name, count = names.len(), "标签翻译表已加载");
                Ok(Self { names })
            }
            None => {
                warn!(model_name, "⚠️ 标签翻译表中没有该模型, 使用原始类别名");
                Ok(Self::default())
            }
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            names: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// 显示名, 没有翻译时使用原始名
    pub fn translate<'a>(&'a self, raw: &'a str) -> &'a str {
        self.names.get(raw).map(String::as_str).unwrap_or(raw)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = "
construction-v1:
  person: 人员
  helmet: 安全帽
other:
  car: 汽车
";

    #[test]
    fn test_label_map_from_yaml() {
        let map = LabelMap::from_yaml(YAML, "construction-v1").unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.translate("helmet"), "安全帽");
        assert_eq!(map.translate("car"), "car");
    }

    #[test]
    fn test_label_map_missing_model_is_empty() {
        let map = LabelMap::from_yaml(YAML, "nope").unwrap();
        assert!(map.is_empty());
        assert_eq!(map.translate("person"), "person");
    }

    #[test]
    fn test_label_map_load_errors() {
        let err = LabelMap::load("/nonexistent/labels.yml", "x").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        assert!(LabelMap::from_yaml("- just\n- a list\n", "x").is_err());
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["yolo-restream"]);
        assert_eq!(args.input_stream, "rtmp://localhost:1935/obs/stream");
        assert_eq!(args.prefetch, 0);
        assert!(args.csv_output().is_none());

        let args = Args::parse_from(["yolo-restream", "--write-csv"]);
        let path = args.csv_output().unwrap();
        assert!(path.to_string_lossy().starts_with("detections_"));

        let args = Args::parse_from(["yolo-restream", "--csv-path", "out.csv"]);
        assert_eq!(args.csv_output().unwrap(), PathBuf::from("out.csv"));
    }

    #[test]
    fn test_resolve_program() {
        assert_eq!(resolve_program("ffmpeg", "ffmpeg"), "ffmpeg");
        assert_eq!(
            resolve_program("/definitely/missing/ffmpeg.exe", "ffmpeg"),
            "ffmpeg"
        );
    }
}
