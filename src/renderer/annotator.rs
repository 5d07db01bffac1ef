// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::fs;
use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::Rgb;
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::debug;

use super::color_table::ColorTable;
use crate::config::LabelMap;
use crate::detection::{Detection, Frame};
use crate::error::PipelineError;

const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// 线宽随分辨率变化: max(1, round(h / 250))
pub fn stroke_width(frame_height: u32) -> u32 {
    ((frame_height as f32 / 250.0).round() as u32).max(1)
}

/// 字号跟随线宽
pub fn font_scale(stroke: u32) -> PxScale {
    PxScale::from((stroke as f32 * 22.0 / 3.0).max(12.0))
}

/// 标签文字: "显示名 91.00%"
pub fn label_text(labels: &LabelMap, det: &Detection) -> String {
    format!(
        "{} {:.2}%",
        labels.translate(&det.label),
        det.confidence * 100.0
    )
}

/// 加载标签字体 (ttf/otf/ttc, 取第 0 个字体)
pub fn load_font<P: AsRef<Path>>(path: P) -> Result<FontVec, PipelineError> {
    let path = path.as_ref();
    let font_error = |reason: String| PipelineError::Font {
        path: path.to_path_buf(),
        reason,
    };
    let data = fs::read(path).map_err(|e| font_error(e.to_string()))?;
    FontVec::try_from_vec_and_index(data, 0).map_err(|e| font_error(e.to_string()))
}

/// 在帧上绘制检测框与标签
pub struct Annotator {
    font: Option<FontVec>,
    labels: LabelMap,
}

impl Annotator {
    pub fn new(font: Option<FontVec>, labels: LabelMap) -> Self {
        Self { font, labels }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 逐个绘制: 边框 (向内加粗) + 框左上角上方的底色块 + 白色文字
    ///
    /// 标签不做边界调整, 超出画面的部分直接裁掉。没有字体时只画边框。
    pub fn draw(
        &self,
        frame: &mut Frame,
        detections: &[Detection],
        colors: &mut ColorTable,
        stroke: u32,
    ) {
        let scale = font_scale(stroke);
        let (width, height) = (frame.width(), frame.height());
        for det in detections {
            let color = colors.color_for(&det.label);
            let Some([x1, y1, x2, y2]) = clip_box(det.bbox.to_pixels(), width, height, stroke)
            else {
                continue;
            };
            draw_box(frame, [x1, y1, x2, y2], color, stroke);

            let Some(font) = &self.font else {
                continue;
            };
            let text = label_text(&self.labels, det);
            let (tw, th) = text_size(scale, font, &text);
            let (th_i, tw) = (th as i32, tw.max(1));
            draw_filled_rect_mut(
                &mut frame.image,
                Rect::at(x1, y1 - th_i - 3).of_size(tw, th + 3),
                color,
            );
            draw_text_mut(
                &mut frame.image,
                TEXT_COLOR,
                x1,
                y1 - th_i - 2,
                scale,
                font,
                &text,
            );
            debug!(frame = frame.index, label = %text, "标注");
        }
    }
}

/// 把框限制在画面外扩 margin 的范围内, 与画面不相交或为空时返回 None
///
/// 画面外的边仍落在画面外, 裁剪效果不变, 坐标转成 i32 不会溢出。
fn clip_box([x1, y1, x2, y2]: [i64; 4], width: u32, height: u32, margin: u32) -> Option<[i32; 4]> {
    let (w, h, m) = (width as i64, height as i64, margin as i64);
    if x2 < x1 || y2 < y1 || x2 < 0 || y2 < 0 || x1 >= w || y1 >= h {
        return None;
    }
    let cx = |v: i64| v.clamp(-m, w - 1 + m) as i32;
    let cy = |v: i64| v.clamp(-m, h - 1 + m) as i32;
    Some([cx(x1), cy(y1), cx(x2), cy(y2)])
}

fn draw_box(frame: &mut Frame, [x1, y1, x2, y2]: [i32; 4], color: Rgb<u8>, stroke: u32) {
    let w = x2 - x1 + 1;
    let h = y2 - y1 + 1;
    for i in 0..stroke as i32 {
        let (rw, rh) = (w - 2 * i, h - 2 * i);
        if rw <= 0 || rh <= 0 {
            break;
        }
        draw_hollow_rect_mut(
            &mut frame.image,
            Rect::at(x1 + i, y1 + i).of_size(rw as u32, rh as u32),
            color,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BBox;
    use image::RgbImage;

    fn person() -> Detection {
        Detection::new(BBox::new(10.0, 10.0, 50.0, 50.0), 0, "person", 0.91)
    }

    #[test]
    fn test_stroke_width() {
        assert_eq!(stroke_width(100), 1);
        assert_eq!(stroke_width(500), 2);
        assert_eq!(stroke_width(1080), 4);
        assert_eq!(stroke_width(0), 1);
    }

    #[test]
    fn test_label_text() {
        let labels = LabelMap::default();
        assert_eq!(label_text(&labels, &person()), "person 91.00%");
        let labels = LabelMap::from_pairs([("person", "人员")]);
        assert_eq!(label_text(&labels, &person()), "人员 91.00%");
    }

    #[test]
    fn test_draw_box_stroke() {
        let mut frame = Frame::new(0, RgbImage::new(100, 500));
        let mut colors = ColorTable::with_seed(1);
        let annotator = Annotator::new(None, LabelMap::default());
        let dets = vec![person()];
        annotator.draw(&mut frame, &dets, &mut colors, stroke_width(500));

        let color = colors.get("person").unwrap();
        assert_eq!(*frame.image.get_pixel(10, 30), color);
        assert_eq!(*frame.image.get_pixel(11, 30), color);
        assert_eq!(*frame.image.get_pixel(50, 30), color);
        assert_ne!(*frame.image.get_pixel(12, 30), color);
        // 检测列表不变
        assert_eq!(dets, vec![person()]);
    }

    #[test]
    fn test_draw_clips_out_of_frame_boxes() {
        let mut frame = Frame::new(0, RgbImage::new(20, 20));
        let mut colors = ColorTable::with_seed(3);
        let annotator = Annotator::new(None, LabelMap::default());
        let dets = vec![
            Detection::new(BBox::new(-5.0, -5.0, 40.0, 40.0), 0, "car", 0.5),
            Detection::new(BBox::new(5.0, 5.0, 5.0, 5.0), 0, "dot", 0.5),
        ];
        annotator.draw(&mut frame, &dets, &mut colors, 4);
        assert_eq!(colors.len(), 2);
    }

    #[test]
    fn test_draw_survives_huge_and_offscreen_boxes() {
        let mut frame = Frame::new(0, RgbImage::new(20, 20));
        let mut colors = ColorTable::with_seed(5);
        let annotator = Annotator::new(None, LabelMap::default());
        let dets = vec![
            Detection::new(BBox::new(1.0, 1.0, 4294967296.0, 10.0), 0, "wide", 0.9),
            Detection::new(BBox::new(-1e12, -1e12, 1e12, 1e12), 0, "huge", 0.9),
            Detection::new(BBox::new(100.0, 100.0, 200.0, 200.0), 0, "away", 0.9),
            Detection::new(BBox::new(9.0, 9.0, 3.0, 3.0), 0, "flipped", 0.9),
        ];
        annotator.draw(&mut frame, &dets, &mut colors, 1);

        let wide = colors.get("wide").unwrap();
        assert_eq!(*frame.image.get_pixel(1, 5), wide);
        assert_eq!(*frame.image.get_pixel(19, 1), wide);
        // 右边界在画面外, 不应画在最后一列
        assert_ne!(*frame.image.get_pixel(19, 5), wide);
        assert!(frame
            .image
            .pixels()
            .all(|p| *p != colors.get("away").unwrap() && *p != colors.get("flipped").unwrap()));
    }

    #[test]
    fn test_clip_box() {
        assert_eq!(clip_box([1, 1, i64::MAX, 10], 20, 20, 2), Some([1, 1, 21, 10]));
        assert_eq!(clip_box([-50, -50, 5, 5], 20, 20, 2), Some([-2, -2, 5, 5]));
        assert_eq!(clip_box([20, 0, 30, 5], 20, 20, 2), None);
        assert_eq!(clip_box([5, 5, 4, 9], 20, 20, 2), None);
    }

    #[test]
    fn test_label_background_and_text() {
        let font_path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/DejaVuSansMono.ttf");
        let font = load_font(font_path).unwrap();
        let stroke = stroke_width(500);
        let scale = font_scale(stroke);
        let (tw, th) = text_size(scale, &font, "person 91.00%");

        let mut frame = Frame::new(0, RgbImage::new(300, 500));
        let mut colors = ColorTable::with_seed(11);
        let annotator = Annotator::new(Some(font), LabelMap::default());
        assert!(annotator.has_font());
        let det = Detection::new(BBox::new(10.0, 60.0, 150.0, 120.0), 0, "person", 0.91);
        annotator.draw(&mut frame, &[det], &mut colors, stroke);

        let color = colors.get("person").unwrap();
        let band_top = 60 - th - 3;
        let mut background = 0;
        let mut text = 0;
        for y in band_top..60 {
            for x in 10..10 + tw {
                let p = *frame.image.get_pixel(x, y);
                if p == color {
                    background += 1;
                } else if p.0.iter().all(|&c| c >= 200) {
                    text += 1;
                }
            }
        }
        let area = (tw * (th + 3)) as usize;
        assert!(background * 3 > area, "background {background}/{area}");
        assert!(text > 0);
        // 底色块外不受影响
        assert_eq!(*frame.image.get_pixel(10 + tw + 2, band_top + 1), Rgb([0, 0, 0]));
        assert_eq!(*frame.image.get_pixel(10, band_top - 2), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_load_font_missing() {
        let err = load_font("/nonexistent/font.ttf").unwrap_err();
        assert!(matches!(err, PipelineError::Font { .. }));
    }
}
