// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::collections::HashMap;

use image::Rgb;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// 类别颜色表
///
/// 某个类别第一次出现时随机分配一个 RGB 颜色, 之后整个运行期间保持不变。
/// 由流水线持有, 生命周期就是一次运行。
pub struct ColorTable {
    colors: HashMap<String, Rgb<u8>>,
    rng: StdRng,
}

impl ColorTable {
    pub fn new() -> Self {
        Self {
            colors: HashMap::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// 固定种子, 同样的类别出现顺序得到同样的颜色
    pub fn with_seed(seed: u64) -> Self {
        Self {
            colors: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// 查找颜色, 首次出现时分配 (先到先得)
    pub fn color_for(&mut self, label: &str) -> Rgb<u8> {
        if let Some(color) = self.colors.get(label) {
            return *color;
        }
        let color = Rgb([self.rng.gen(), self.rng.gen(), self.rng.gen()]);
        self.colors.insert(label.to_string(), color);
        color
    }

    pub fn get(&self, label: &str) -> Option<Rgb<u8>> {
        self.colors.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

impl Default for ColorTable {
    fn default() -> Self {
        Self::new()
    }
}
