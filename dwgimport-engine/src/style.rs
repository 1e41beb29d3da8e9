//! 颜色、线宽与线型的随层/随块解析。

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use dwgimport_core::drawing::{COLOR24_UNSET, COLOR_BY_BLOCK, COLOR_BY_LAYER, Layer};
use dwgimport_core::palette::{
    LINEWEIGHT_BY_BLOCK, LINEWEIGHT_BY_LAYER, LINEWEIGHT_DEFAULT, Rgba, aci_rgb, lineweight_mm,
};

/// 一次导入内“每类只提示一次”的诊断集合。
#[derive(Debug, Default)]
pub struct Diagnostics {
    seen: HashSet<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 首次遇到该类问题时输出警告并返回 true。
    pub fn warn_once(&mut self, class: &str, message: &str) -> bool {
        if self.seen.contains(class) {
            return false;
        }
        self.seen.insert(class.to_string());
        warn!(class, "{message}");
        true
    }

    pub fn contains(&self, class: &str) -> bool {
        self.seen.contains(class)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// 已提示过的问题类别，按名称排序。
    pub fn classes(&self) -> Vec<String> {
        let mut classes: Vec<String> = self.seen.iter().cloned().collect();
        classes.sort_unstable();
        classes
    }
}

#[derive(Debug, Clone, PartialEq)]
struct LayerStyle {
    color: Rgba,
    width: f64,
    linetype: String,
}

/// 按图层名缓存已解析的颜色、线宽与线型，生命周期与导入会话一致。
#[derive(Debug, Default)]
pub struct StyleCache {
    layers: HashMap<String, LayerStyle>,
}

impl StyleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析并缓存图层样式，返回图层颜色与线宽。
    pub fn register_layer(&mut self, layer: &Layer, diagnostics: &mut Diagnostics) -> (Rgba, f64) {
        let color = self.resolve_color(
            layer.color,
            layer.color24,
            layer.transparency,
            &layer.name,
            diagnostics,
        );
        let width = match layer.lineweight {
            // 图层上的“默认”线宽不是间接引用，按 0 处理
            LINEWEIGHT_DEFAULT => 0.0,
            code => self.resolve_width(code, &layer.name, diagnostics),
        };
        debug!(layer = %layer.name, color = %color.to_field_string(), width, "缓存图层样式");
        self.layers.insert(
            layer.name.clone(),
            LayerStyle {
                color,
                width,
                linetype: layer.linetype.clone(),
            },
        );
        (color, width)
    }

    pub fn resolve_color(
        &self,
        color: i32,
        color24: i32,
        transparency: i32,
        layer: &str,
        diagnostics: &mut Diagnostics,
    ) -> Rgba {
        let alpha = 255 - (transparency & 0xFF) as u8;
        if color24 != COLOR24_UNSET {
            return Rgba::from_packed(color24 as u32 & 0x00FF_FFFF, alpha);
        }
        match color {
            COLOR_BY_BLOCK => {
                diagnostics.warn_once("color-by-block", "随块颜色在实体上无法解析，使用占位颜色");
                Rgba::OPAQUE_BLACK
            }
            COLOR_BY_LAYER => self
                .layers
                .get(layer)
                .map(|style| style.color)
                .unwrap_or(Rgba::OPAQUE_BLACK),
            index => match u8::try_from(index.unsigned_abs()) {
                Ok(aci) if aci != 0 => {
                    let (r, g, b) = aci_rgb(aci);
                    Rgba::new(r, g, b, alpha)
                }
                _ => {
                    diagnostics.warn_once("color-out-of-range", "颜色索引超出调色板范围，使用黑色");
                    Rgba::new(0, 0, 0, alpha)
                }
            },
        }
    }

    /// 线宽编码换算为毫米。
    pub fn resolve_width(&self, lineweight: i32, layer: &str, diagnostics: &mut Diagnostics) -> f64 {
        match lineweight {
            LINEWEIGHT_BY_LAYER => self.layers.get(layer).map(|style| style.width).unwrap_or(0.0),
            LINEWEIGHT_BY_BLOCK => {
                diagnostics.warn_once("lineweight-by-block", "随块线宽在实体上无法解析，按 0 处理");
                0.0
            }
            LINEWEIGHT_DEFAULT => {
                diagnostics.warn_once("lineweight-default", "默认线宽未解析，按 0 处理");
                0.0
            }
            code => lineweight_mm(code).unwrap_or_else(|| {
                diagnostics.warn_once("lineweight-unknown", "未知线宽编码，按 0 处理");
                0.0
            }),
        }
    }

    /// 线型名为 BYLAYER 时取图层线型。
    pub fn resolve_linetype(&self, linetype: &str, layer: &str) -> String {
        if linetype.eq_ignore_ascii_case("BYLAYER") {
            if let Some(style) = self.layers.get(layer) {
                return style.linetype.clone();
            }
        }
        linetype.to_string()
    }
}
