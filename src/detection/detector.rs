// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测器接口 (Detector)
//! 职责: 输入一帧 → 输出有序的检测结果列表

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::types::{Detection, Frame};

/// 统一的检测器接口
///
/// 任何检测引擎 (ONNX、远程服务、回放文件) 只需实现这一个方法。
/// 返回顺序即记录文件中的行顺序, 流水线不会重新排序。
pub trait Detector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        (**self).detect(frame)
    }
}

/// 回放检测器: 按帧读取 JSON Lines 文件
///
/// 每行是一帧的检测结果数组, 例如
/// `[{"box":[10,10,50,50],"class_id":0,"label":"person","confidence":0.91}]`。
/// 空行视为该帧无检测; 文件读完后所有后续帧都没有检测结果。
pub struct ReplayDetector {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: u64,
    exhausted: bool,
}

impl ReplayDetector {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .with_context(|| format!("无法打开检测回放文件 {}", path.display()))?;
        info!(path = %path.display(), "📼 使用回放检测结果");
        Ok(Self {
            path,
            lines: BufReader::new(file).lines(),
            line_no: 0,
            exhausted: false,
        })
    }
}

impl Detector for ReplayDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        if self.exhausted {
            return Ok(Vec::new());
        }
        let Some(line) = self.lines.next() else {
            debug!(frame = frame.index, "回放文件已读完, 后续帧无检测结果");
            self.exhausted = true;
            return Ok(Vec::new());
        };
        self.line_no += 1;
        let line = line.with_context(|| format!("读取 {} 失败", self.path.display()))?;
        if line.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&line).with_context(|| {
            format!("{} 第 {} 行格式错误", self.path.display(), self.line_no)
        })
    }
}
