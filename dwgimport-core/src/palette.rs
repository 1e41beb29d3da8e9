//! AutoCAD 索引色（ACI）调色板与线宽编码表。

use serde::{Deserialize, Serialize};

/// 线宽编码：随层。
pub const LINEWEIGHT_BY_LAYER: i32 = 29;
/// 线宽编码：随块。
pub const LINEWEIGHT_BY_BLOCK: i32 = 30;
/// 线宽编码：默认。
pub const LINEWEIGHT_DEFAULT: i32 = 31;

/// 编码 0..=23 对应的线宽（毫米）。
pub const LINEWEIGHT_MM: [f64; 24] = [
    0.00, 0.05, 0.09, 0.13, 0.15, 0.18, 0.20, 0.25, 0.30, 0.35, 0.40, 0.50, 0.53, 0.60, 0.70,
    0.80, 0.90, 1.00, 1.06, 1.20, 1.40, 1.58, 2.00, 2.11,
];

/// DXF 组码 370 以 1/100 毫米记录线宽，按上界归入最接近的编码。
const LINEWEIGHT_UPPER_BOUNDS: [i32; 23] = [
    3, 7, 11, 14, 16, 19, 22, 27, 32, 37, 45, 52, 57, 65, 75, 85, 95, 103, 112, 130, 149, 180,
    205,
];

/// 带透明通道的颜色，各分量都在 0..=255。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const OPAQUE_BLACK: Rgba = Rgba::new(0, 0, 0, 255);

    #[inline]
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// 由打包的 0xRRGGBB 构造。
    #[inline]
    pub fn from_packed(rgb: u32, alpha: u8) -> Self {
        Self::new(
            ((rgb >> 16) & 0xFF) as u8,
            ((rgb >> 8) & 0xFF) as u8,
            (rgb & 0xFF) as u8,
            alpha,
        )
    }

    /// 存储层使用的文本形式 `r,g,b,a`。
    pub fn to_field_string(self) -> String {
        format!("{},{},{},{}", self.r, self.g, self.b, self.a)
    }
}

const SHADE_LEVELS: [u32; 5] = [255, 204, 153, 127, 76];

/// 返回标准 ACI 调色板中指定索引的 RGB。
pub fn aci_rgb(index: u8) -> (u8, u8, u8) {
    match index {
        0 => (0, 0, 0),
        1 => (255, 0, 0),
        2 => (255, 255, 0),
        3 => (0, 255, 0),
        4 => (0, 255, 255),
        5 => (0, 0, 255),
        6 => (255, 0, 255),
        7 => (255, 255, 255),
        8 => (128, 128, 128),
        9 => (192, 192, 192),
        10..=249 => chromatic(index),
        250 => (51, 51, 51),
        251 => (91, 91, 91),
        252 => (132, 132, 132),
        253 => (173, 173, 173),
        254 => (214, 214, 214),
        255 => (255, 255, 255),
    }
}

/// 10..=249：24 个色相，每个色相 5 级明度，每级分饱和与浅色两种。
fn chromatic(index: u8) -> (u8, u8, u8) {
    let offset = u32::from(index) - 10;
    let hue = offset / 10;
    let shade = ((offset % 10) / 2) as usize;
    let pale = offset % 2 == 1;

    let level = SHADE_LEVELS[shade];
    let floor = if pale { level / 2 } else { 0 };
    let step = hue % 4;
    // 各通道在 [floor, level] 区间内的位置，以 1/4 为单位。
    let quarters: [u32; 3] = match hue / 4 {
        0 => [4, step, 0],
        1 => [4 - step, 4, 0],
        2 => [0, 4, step],
        3 => [0, 4 - step, 4],
        4 => [step, 0, 4],
        _ => [4, 0, 4 - step],
    };
    let channel = |q: u32| (floor + q * (level - floor) / 4) as u8;
    (channel(quarters[0]), channel(quarters[1]), channel(quarters[2]))
}

/// 把线宽编码换算为毫米；随层、随块与默认编码返回 None。
pub fn lineweight_mm(code: i32) -> Option<f64> {
    usize::try_from(code)
        .ok()
        .and_then(|index| LINEWEIGHT_MM.get(index).copied())
}

/// 把 DXF 组码 370 的原始值（1/100 毫米，或 -1/-2/-3）转换为线宽编码。
pub fn lineweight_code_from_dxf(raw: i32) -> i32 {
    match raw {
        -1 => LINEWEIGHT_BY_LAYER,
        -2 => LINEWEIGHT_BY_BLOCK,
        -3 => LINEWEIGHT_DEFAULT,
        value if value < 0 => LINEWEIGHT_DEFAULT,
        value => LINEWEIGHT_UPPER_BOUNDS
            .iter()
            .position(|bound| value < *bound)
            .unwrap_or(LINEWEIGHT_UPPER_BOUNDS.len()) as i32,
    }
}

/// 把 DXF 组码 440 的原始值转换为透明度字节（0 为不透明）。
pub fn transparency_from_dxf(raw: i32) -> i32 {
    if raw & 0x0200_0000 != 0 {
        255 - (raw & 0xFF)
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aci_palette_matches_reference_entries() {
        assert_eq!(aci_rgb(1), (255, 0, 0));
        assert_eq!(aci_rgb(10), (255, 0, 0));
        assert_eq!(aci_rgb(11), (255, 127, 127));
        assert_eq!(aci_rgb(12), (204, 0, 0));
        assert_eq!(aci_rgb(19), (76, 38, 38));
        assert_eq!(aci_rgb(20), (255, 63, 0));
        assert_eq!(aci_rgb(30), (255, 127, 0));
        assert_eq!(aci_rgb(40), (255, 191, 0));
        assert_eq!(aci_rgb(50), (255, 255, 0));
        assert_eq!(aci_rgb(60), (191, 255, 0));
        assert_eq!(aci_rgb(130), (0, 255, 255));
        assert_eq!(aci_rgb(170), (0, 0, 255));
        assert_eq!(aci_rgb(210), (255, 0, 255));
        assert_eq!(aci_rgb(250), (51, 51, 51));
    }

    #[test]
    fn lineweight_table_covers_codes() {
        assert_eq!(lineweight_mm(5), Some(0.18));
        assert_eq!(lineweight_mm(23), Some(2.11));
        assert_eq!(lineweight_mm(LINEWEIGHT_BY_LAYER), None);
        assert_eq!(lineweight_mm(-1), None);
    }

    #[test]
    fn dxf_lineweight_maps_to_nearest_code() {
        assert_eq!(lineweight_code_from_dxf(-1), LINEWEIGHT_BY_LAYER);
        assert_eq!(lineweight_code_from_dxf(-2), LINEWEIGHT_BY_BLOCK);
        assert_eq!(lineweight_code_from_dxf(-3), LINEWEIGHT_DEFAULT);
        assert_eq!(lineweight_code_from_dxf(0), 0);
        assert_eq!(lineweight_code_from_dxf(18), 5);
        assert_eq!(lineweight_code_from_dxf(25), 7);
        assert_eq!(lineweight_code_from_dxf(211), 23);
        for (code, mm) in LINEWEIGHT_MM.iter().enumerate() {
            let hundredths = (mm * 100.0).round() as i32;
            assert_eq!(lineweight_code_from_dxf(hundredths), code as i32);
        }
    }

    #[test]
    fn transparency_requires_flag() {
        assert_eq!(transparency_from_dxf(0x0200_0000 | 0x33), 255 - 0x33);
        assert_eq!(transparency_from_dxf(0x33), 0);
    }
}
