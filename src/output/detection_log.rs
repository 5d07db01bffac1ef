// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测记录 CSV
//!
//! 表头 `Timestamp,Class,Coordinates,Confidence`, 每个检测一行,
//! 每帧写完立即 flush, 中途退出时已写入的记录完整可读。

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::detection::Detection;
use crate::error::PipelineError;
use crate::pipeline::timecode::Timecode;

pub const CSV_HEADER: [&str; 4] = ["Timestamp", "Class", "Coordinates", "Confidence"];

fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// 一行记录: 时间码, 原始类别名, "[x1,y1,x2,y2]", 置信度百分比
pub fn format_row(timecode: &Timecode, det: &Detection) -> String {
    let [x1, y1, x2, y2] = det.bbox.to_pixels();
    let coords = format!("[{x1},{y1},{x2},{y2}]");
    [
        timecode.to_string(),
        escape_csv(&det.label),
        escape_csv(&coords),
        format!("{:.2}%", det.confidence * 100.0),
    ]
    .join(",")
}

pub struct DetectionLog {
    writer: Box<dyn Write + Send>,
    rows: u64,
}

impl DetectionLog {
    /// 创建 (覆盖) 文件并写表头
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| PipelineError::LogOpen {
            path: path.to_path_buf(),
            source,
        })?;
        let log = Self::from_writer(BufWriter::new(file)).map_err(|e| match e {
            PipelineError::LogWrite(source) => PipelineError::LogOpen {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        info!(path = %path.display(), "📝 检测记录文件已创建");
        Ok(log)
    }

    pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Result<Self, PipelineError> {
        let mut log = Self {
            writer: Box::new(writer),
            rows: 0,
        };
        writeln!(log.writer, "{}", CSV_HEADER.join(",")).map_err(PipelineError::LogWrite)?;
        log.writer.flush().map_err(PipelineError::LogWrite)?;
        Ok(log)
    }

    /// 追加一帧的所有检测 (可以为空), 然后 flush
    pub fn append(&mut self, timecode: &Timecode, detections: &[Detection]) -> Result<(), PipelineError> {
        for det in detections {
            writeln!(self.writer, "{}", format_row(timecode, det)).map_err(PipelineError::LogWrite)?;
            self.rows += 1;
        }
        self.writer.flush().map_err(PipelineError::LogWrite)
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn close(mut self) -> Result<(), PipelineError> {
        self.writer.flush().map_err(PipelineError::LogWrite)
    }
}
