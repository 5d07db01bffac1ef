// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 实时检测推流数据结构定义
/// Data structures for the restream pipeline
use image::RgbImage;
use serde::{Deserialize, Serialize};

// ========== 数据结构 ==========

/// 检测框 (像素坐标, 左上角 x1,y1 / 右下角 x2,y2)
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        let l = self.x1.max(other.x1);
        let r = self.x2.min(other.x2);
        let t = self.y1.max(other.y1);
        let b = self.y2.min(other.y2);
        let inter = (r - l).max(0.0) * (b - t).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// 整数像素坐标 (截断, 与记录文件格式一致)
    pub fn to_pixels(&self) -> [i64; 4] {
        [
            self.x1 as i64,
            self.y1 as i64,
            self.x2 as i64,
            self.y2 as i64,
        ]
    }
}

impl From<[f32; 4]> for BBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// 单个检测结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: BBox,
    #[serde(default)]
    pub class_id: u32,
    pub label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BBox, class_id: u32, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            class_id,
            label: label.into(),
            confidence,
        }
    }

    /// 检查检测结果是否合法: 坐标有限, 置信度在 [0, 1]
    pub fn validate(&self) -> anyhow::Result<()> {
        let BBox { x1, y1, x2, y2 } = self.bbox;
        anyhow::ensure!(
            [x1, y1, x2, y2].iter().all(|v| v.is_finite()),
            "检测框坐标非法 ({}): [{x1}, {y1}, {x2}, {y2}]",
            self.label
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.confidence),
            "置信度超出 [0, 1] ({}): {}",
            self.label,
            self.confidence
        );
        Ok(())
    }
}

/// 已解码帧: 固定分辨率的 RGB24 像素 + 帧序号
#[derive(Clone, Debug)]
pub struct Frame {
    pub index: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self { index, image }
    }

    /// 从原始 RGB24 字节构建, 长度不符时返回 None
    pub fn from_raw(index: u64, width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        RgbImage::from_raw(width, height, data).map(|image| Self { index, image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// 原始字节, 直接写入编码进程
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }
}
