// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 ONNX 检测器
// 包含: 模型加载、letterbox 预处理、推理、后处理 (置信度过滤 + NMS)

use std::path::Path;

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use ndarray::{s, Array, Axis, IxDyn};
use ort::{GraphOptimizationLevel, Session, ValueType};
use regex::Regex;
use tracing::{info, warn};

use super::detector::Detector;
use super::types::{BBox, Detection, Frame};

/// letterbox 填充值
const PAD_VALUE: f32 = 144.0 / 255.0;
const CXYWH_OFFSET: usize = 4;

/// YOLOv8 检测参数
#[derive(Debug, Clone)]
pub struct YOLOv8Config {
    pub conf: f32,
    pub iou: f32,
    /// 模型输入为动态尺寸时使用
    pub width: u32,
    pub height: u32,
}

impl Default for YOLOv8Config {
    fn default() -> Self {
        Self {
            conf: 0.25,
            iou: 0.45,
            width: 640,
            height: 640,
        }
    }
}

pub struct YOLOv8Detector {
    session: Session,
    input_name: String,
    width: u32,
    height: u32,
    conf: f32,
    iou: f32,
    names: Vec<String>,
}

impl YOLOv8Detector {
    /// 从 ONNX 文件创建检测器
    pub fn load<P: AsRef<Path>>(model: P, config: YOLOv8Config) -> Result<Self> {
        let model = model.as_ref();
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model)
            .with_context(|| format!("无法加载模型 {}", model.display()))?;

        let input = session.inputs.first().context("模型没有输入节点")?;
        let input_name = input.name.clone();

        // NCHW, 动态维度为 -1
        let (height, width) = match &input.input_type {
            ValueType::Tensor { dimensions, .. } if dimensions.len() == 4 => (
                positive_or(dimensions[2], config.height),
                positive_or(dimensions[3], config.width),
            ),
            _ => (config.height, config.width),
        };

        let names = session
            .metadata()
            .ok()
            .and_then(|m| m.custom("names").ok().flatten())
            .map(|raw| parse_names(&raw))
            .unwrap_or_default();
        if names.is_empty() {
            warn!("模型元数据中没有类别名称, 使用类别编号作为标签");
        }

        info!(
            model = %model.display(),
            width,
            height,
            classes = names.len(),
            "✅ 检测模型加载成功"
        );

        Ok(Self {
            session,
            input_name,
            width,
            height,
            conf: config.conf,
            iou: config.iou,
            names,
        })
    }

    fn scale_wh(&self, w0: f32, h0: f32) -> (f32, f32, f32) {
        let r = (self.width as f32 / w0).min(self.height as f32 / h0);
        (r, (w0 * r).round(), (h0 * r).round())
    }

    /// 预处理: 等比缩放到输入尺寸 (左上对齐), 输出 NCHW 张量
    fn preprocess(&self, frame: &Frame) -> Array<f32, IxDyn> {
        let (w0, h0) = (frame.width() as f32, frame.height() as f32);
        let (_, w_new, h_new) = self.scale_wh(w0, h0);
        let resized = imageops::resize(
            &frame.image,
            (w_new as u32).max(1),
            (h_new as u32).max(1),
            FilterType::Triangle,
        );

        let mut xs = Array::from_elem(
            (1, 3, self.height as usize, self.width as usize),
            PAD_VALUE,
        )
        .into_dyn();
        for (x, y, rgb) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            let [r, g, b] = rgb.0;
            xs[[0, 0, y, x]] = r as f32 / 255.0;
            xs[[0, 1, y, x]] = g as f32 / 255.0;
            xs[[0, 2, y, x]] = b as f32 / 255.0;
        }
        xs
    }

    /// 后处理: [1, 4+nc, anchors] → 检测结果 (原图坐标)
    fn postprocess(&self, preds: &Array<f32, IxDyn>, frame: &Frame) -> Result<Vec<Detection>> {
        let (w0, h0) = (frame.width() as f32, frame.height() as f32);
        let (ratio, _, _) = self.scale_wh(w0, h0);

        let batch = preds.index_axis(Axis(0), 0);
        let mut candidates: Vec<Detection> = Vec::new();
        for pred in batch.axis_iter(Axis(1)) {
            let bbox = pred.slice(s![0..CXYWH_OFFSET]);
            let clss = pred.slice(s![CXYWH_OFFSET..]);
            let Some((id, &confidence)) = clss
                .iter()
                .enumerate()
                .reduce(|max, x| if x.1 > max.1 { x } else { max })
            else {
                continue;
            };
            if confidence < self.conf {
                continue;
            }

            let cx = bbox[0] / ratio;
            let cy = bbox[1] / ratio;
            let w = bbox[2] / ratio;
            let h = bbox[3] / ratio;
            let x1 = (cx - w / 2.).clamp(0.0, w0);
            let y1 = (cy - h / 2.).clamp(0.0, h0);
            let x2 = (cx + w / 2.).clamp(0.0, w0);
            let y2 = (cy + h / 2.).clamp(0.0, h0);

            candidates.push(Detection::new(
                BBox::new(x1, y1, x2, y2),
                id as u32,
                self.class_name(id),
                confidence,
            ));
        }

        non_max_suppression(&mut candidates, self.iou);
        Ok(candidates)
    }

    fn class_name(&self, id: usize) -> String {
        self.names
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }
}

impl Detector for YOLOv8Detector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let xs = self.preprocess(frame);
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => xs.view()]?)?;
        let preds = outputs[0].try_extract_tensor::<f32>()?.into_owned();
        self.postprocess(&preds, frame)
    }
}

fn positive_or(dim: i64, fallback: u32) -> u32 {
    if dim > 0 {
        dim as u32
    } else {
        fallback
    }
}

/// 解析元数据中的类别表, 形如 `{0: 'person', 1: 'bicycle'}`
fn parse_names(raw: &str) -> Vec<String> {
    let Ok(re) = Regex::new(r"(\d+):\s*'([^']*)'") else {
        return Vec::new();
    };
    let mut pairs: Vec<(usize, String)> = re
        .captures_iter(raw)
        .filter_map(|c| Some((c[1].parse().ok()?, c[2].to_string())))
        .collect();
    pairs.sort_by_key(|(id, _)| *id);
    pairs.into_iter().map(|(_, name)| name).collect()
}

/// 按置信度排序后做 NMS (同类别之间), 原地截断
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let (prev, cur) = (&xs[prev_index], &xs[index]);
            if prev.class_id == cur.class_id && prev.bbox.iou(&cur.bbox) > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}
