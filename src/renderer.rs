// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 标注渲染: 检测框、标签与类别颜色
mod annotator;
mod color_table;

pub use annotator::{font_scale, label_text, load_font, stroke_width, Annotator};
pub use color_table::ColorTable;
