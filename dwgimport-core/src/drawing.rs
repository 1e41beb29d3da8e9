//! 图纸交换数据模型：解析器在回调期间构造的实体、图层及各类表数据。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::{Point3, Vector3};

/// 颜色索引 0：随块。
pub const COLOR_BY_BLOCK: i32 = 0;
/// 颜色索引 256：随层。
pub const COLOR_BY_LAYER: i32 = 256;
/// 真彩色哨兵值：使用索引色。
pub const COLOR24_UNSET: i32 = -1;

/// 实体与块的稳定标识（DXF 组码 5，十六进制）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(pub u64);

impl Handle {
    #[inline]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }

    /// 解析十六进制句柄字符串。
    pub fn parse_hex(raw: &str) -> Option<Self> {
        u64::from_str_radix(raw.trim(), 16).ok().map(Self)
    }

    /// 以 i64 形式写入存储层；超出范围的句柄按位转换。
    #[inline]
    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Space {
    #[default]
    Model,
    Paper,
}

impl Space {
    #[inline]
    pub fn code(self) -> i64 {
        match self {
            Space::Model => 0,
            Space::Paper => 1,
        }
    }
}

/// 所有实体共有的属性。颜色与线宽保留原始编码，由样式解析器统一换算。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCommon {
    pub handle: Handle,
    pub space: Space,
    pub layer: String,
    pub linetype: String,
    /// 索引色：256 随层，0 随块，负值表示图层关闭但仍选择对应颜色。
    pub color: i32,
    /// 打包的 0xRRGGBB；-1 表示使用索引色。
    pub color24: i32,
    pub transparency: i32,
    /// 线宽编码：0..=23 为具体宽度，29 随层，30 随块，31 默认。
    pub lineweight: i32,
    pub linetype_scale: f64,
    pub visible: bool,
}

impl EntityCommon {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            ..Self::default()
        }
    }
}

impl Default for EntityCommon {
    fn default() -> Self {
        Self {
            handle: Handle(0),
            space: Space::Model,
            layer: "0".to_string(),
            linetype: "BYLAYER".to_string(),
            color: COLOR_BY_LAYER,
            color24: COLOR24_UNSET,
            transparency: 0,
            lineweight: 29,
            linetype_scale: 1.0,
            visible: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub common: EntityCommon,
    pub kind: EntityKind,
}

impl Entity {
    pub fn new(common: EntityCommon, kind: EntityKind) -> Self {
        Self { common, kind }
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

/// 多段线顶点：位置、到下一顶点的 bulge，以及起止宽度。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolylineVertex {
    pub position: Point3,
    pub bulge: f64,
    pub start_width: f64,
    pub end_width: f64,
}

impl PolylineVertex {
    pub fn new(position: Point3) -> Self {
        Self {
            position,
            bulge: 0.0,
            start_width: 0.0,
            end_width: 0.0,
        }
    }

    pub fn with_bulge(mut self, bulge: f64) -> Self {
        self.bulge = bulge;
        self
    }

    pub fn with_widths(mut self, start_width: f64, end_width: f64) -> Self {
        self.start_width = start_width;
        self.end_width = end_width;
        self
    }

    #[inline]
    pub fn is_tapered(&self) -> bool {
        (self.start_width - self.end_width).abs() > 1e-9
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointEntity {
    pub position: Point3,
    pub thickness: f64,
    pub extrusion: Vector3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineEntity {
    pub start: Point3,
    pub end: Point3,
    pub thickness: f64,
    pub extrusion: Vector3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircleEntity {
    pub center: Point3,
    pub radius: f64,
    pub thickness: f64,
    pub extrusion: Vector3,
}

/// 圆弧：角度为弧度，从 +X 轴逆时针度量。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcEntity {
    pub center: Point3,
    pub radius: f64,
    pub start_angle: f64,
    pub end_angle: f64,
    pub thickness: f64,
    pub extrusion: Vector3,
}

/// 椭圆：主轴端点相对圆心给出，参数以弧度表示。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EllipseEntity {
    pub center: Point3,
    pub major_axis: Vector3,
    pub ratio: f64,
    pub start_param: f64,
    pub end_param: f64,
    pub extrusion: Vector3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolylineEntity {
    pub vertices: Vec<PolylineVertex>,
    pub flags: i32,
    /// 未给出顶点宽度时使用的常量宽度。
    pub constant_width: f64,
    pub elevation: f64,
    pub thickness: f64,
    pub extrusion: Vector3,
}

impl PolylineEntity {
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.flags & 0x01 != 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplineEntity {
    pub degree: i32,
    pub flags: i32,
    pub knots: Vec<f64>,
    pub weights: Vec<f64>,
    pub control_points: Vec<Point3>,
    pub fit_points: Vec<Point3>,
    pub tolerance_knot: f64,
    pub tolerance_control: f64,
    pub tolerance_fit: f64,
}

impl SplineEntity {
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.flags & 0x01 != 0
    }

    #[inline]
    pub fn is_periodic(&self) -> bool {
        self.flags & 0x02 != 0
    }

    #[inline]
    pub fn is_rational(&self) -> bool {
        self.flags & 0x04 != 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertEntity {
    pub block_name: String,
    pub insertion: Point3,
    pub x_scale: f64,
    pub y_scale: f64,
    pub z_scale: f64,
    /// 旋转角（弧度，逆时针）。
    pub rotation: f64,
    pub column_count: i32,
    pub row_count: i32,
    pub column_spacing: f64,
    pub row_spacing: f64,
    pub extrusion: Vector3,
}

impl InsertEntity {
    pub fn new(block_name: impl Into<String>, insertion: Point3) -> Self {
        Self {
            block_name: block_name.into(),
            insertion,
            x_scale: 1.0,
            y_scale: 1.0,
            z_scale: 1.0,
            rotation: 0.0,
            column_count: 1,
            row_count: 1,
            column_spacing: 0.0,
            row_spacing: 0.0,
            extrusion: Vector3::unit_z(),
        }
    }
}

/// SOLID 与 TRACE：四个角点按 DXF 顺序（1、2、3、4）给出。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolidEntity {
    pub corners: [Point3; 4],
    pub thickness: f64,
    pub extrusion: Vector3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextEntity {
    pub insertion: Point3,
    pub alignment_point: Option<Point3>,
    pub height: f64,
    pub text: String,
    /// 旋转角（弧度）。
    pub rotation: f64,
    pub width_scale: f64,
    pub oblique: f64,
    pub style: String,
    pub generation: i32,
    pub horizontal_alignment: i32,
    pub vertical_alignment: i32,
    pub thickness: f64,
    pub extrusion: Vector3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MTextEntity {
    pub insertion: Point3,
    pub height: f64,
    pub reference_width: f64,
    /// 附着点 1..=9（左上至右下）。
    pub attachment: i32,
    pub drawing_direction: i32,
    pub text: String,
    pub style: String,
    pub rotation: f64,
    pub line_spacing_factor: f64,
    pub extrusion: Vector3,
}

/// 填充边界中的单个对象。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LoopObject {
    Line {
        start: Point3,
        end: Point3,
    },
    Arc {
        center: Point3,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
        counter_clockwise: bool,
    },
    Ellipse {
        center: Point3,
        major_axis: Vector3,
        ratio: f64,
        start_param: f64,
        end_param: f64,
        counter_clockwise: bool,
    },
    Spline(SplineEntity),
    LwPolyline {
        vertices: Vec<PolylineVertex>,
        closed: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HatchLoop {
    pub flags: i32,
    pub objects: Vec<LoopObject>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HatchEntity {
    pub pattern_name: String,
    pub solid: bool,
    pub associative: bool,
    pub style: i32,
    pub pattern_type: i32,
    pub pattern_angle: f64,
    pub pattern_scale: f64,
    pub elevation: f64,
    pub extrusion: Vector3,
    /// 文件中声明的边界环数量，必须与 `loops.len()` 一致。
    pub declared_loop_count: usize,
    pub loops: Vec<HatchLoop>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DimensionKind {
    Linear,
    Aligned,
    Angular,
    Diameter,
    Radius,
    Angular3Point,
    Ordinate,
}

impl DimensionKind {
    pub fn from_flags(flags: i32) -> Self {
        match flags & 0x0F {
            1 => DimensionKind::Aligned,
            2 => DimensionKind::Angular,
            3 => DimensionKind::Diameter,
            4 => DimensionKind::Radius,
            5 => DimensionKind::Angular3Point,
            6 => DimensionKind::Ordinate,
            _ => DimensionKind::Linear,
        }
    }
}

/// 图纸实体的封闭和类型。未支持的类型只携带公共属性。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityKind {
    Point(PointEntity),
    Line(LineEntity),
    Ray,
    XLine,
    Circle(CircleEntity),
    Arc(ArcEntity),
    Ellipse(EllipseEntity),
    LwPolyline(PolylineEntity),
    Polyline(PolylineEntity),
    Spline(SplineEntity),
    Insert(InsertEntity),
    Trace(SolidEntity),
    Solid(SolidEntity),
    Face3D,
    Text(TextEntity),
    MText(MTextEntity),
    Hatch(HatchEntity),
    Viewport,
    Image,
    Leader,
    Dimension(DimensionKind),
}

impl EntityKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            EntityKind::Point(_) => "POINT",
            EntityKind::Line(_) => "LINE",
            EntityKind::Ray => "RAY",
            EntityKind::XLine => "XLINE",
            EntityKind::Circle(_) => "CIRCLE",
            EntityKind::Arc(_) => "ARC",
            EntityKind::Ellipse(_) => "ELLIPSE",
            EntityKind::LwPolyline(_) => "LWPOLYLINE",
            EntityKind::Polyline(_) => "POLYLINE",
            EntityKind::Spline(_) => "SPLINE",
            EntityKind::Insert(_) => "INSERT",
            EntityKind::Trace(_) => "TRACE",
            EntityKind::Solid(_) => "SOLID",
            EntityKind::Face3D => "3DFACE",
            EntityKind::Text(_) => "TEXT",
            EntityKind::MText(_) => "MTEXT",
            EntityKind::Hatch(_) => "HATCH",
            EntityKind::Viewport => "VIEWPORT",
            EntityKind::Image => "IMAGE",
            EntityKind::Leader => "LEADER",
            EntityKind::Dimension(DimensionKind::Linear) => "DIMENSION_LINEAR",
            EntityKind::Dimension(DimensionKind::Aligned) => "DIMENSION_ALIGNED",
            EntityKind::Dimension(DimensionKind::Angular) => "DIMENSION_ANGULAR",
            EntityKind::Dimension(DimensionKind::Diameter) => "DIMENSION_DIAMETER",
            EntityKind::Dimension(DimensionKind::Radius) => "DIMENSION_RADIUS",
            EntityKind::Dimension(DimensionKind::Angular3Point) => "DIMENSION_ANGULAR3P",
            EntityKind::Dimension(DimensionKind::Ordinate) => "DIMENSION_ORDINATE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub linetype: String,
    pub color: i32,
    pub color24: i32,
    pub transparency: i32,
    pub lineweight: i32,
    /// bit 0：冻结。
    pub flags: i32,
}

impl Layer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            linetype: "CONTINUOUS".to_string(),
            color: 7,
            color24: COLOR24_UNSET,
            transparency: 0,
            lineweight: 31,
            flags: 0,
        }
    }
}

/// 头部变量的取值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HeaderValue {
    Text(String),
    Integer(i64),
    Real(f64),
    Coord(Point3),
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Text(text) => f.write_str(text),
            HeaderValue::Integer(value) => write!(f, "{value}"),
            HeaderValue::Real(value) => write!(f, "{value}"),
            HeaderValue::Coord(point) => write!(f, "{},{},{}", point.x(), point.y(), point.z()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Header {
    pub variables: BTreeMap<String, HeaderValue>,
    pub comments: Vec<String>,
}

impl Header {
    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.variables.get(name)? {
            HeaderValue::Integer(value) => Some(*value),
            HeaderValue::Real(value) => Some(*value as i64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineType {
    pub name: String,
    pub description: String,
    pub pattern_length: f64,
    pub pattern: Vec<f64>,
}

/// 标注样式中常用的变量子集。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimStyle {
    pub name: String,
    pub scale: f64,
    pub arrow_size: f64,
    pub text_height: f64,
    pub extension_offset: f64,
    pub extension_extend: f64,
    pub text_gap: f64,
    pub decimal_places: i32,
    pub post_fix: String,
    pub text_style: String,
}

impl DimStyle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scale: 1.0,
            arrow_size: 0.18,
            text_height: 0.18,
            extension_offset: 0.0625,
            extension_extend: 0.18,
            text_gap: 0.09,
            decimal_places: 4,
            post_fix: String::new(),
            text_style: "STANDARD".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextStyle {
    pub name: String,
    pub height: f64,
    pub width: f64,
    pub oblique: f64,
    pub generation: i32,
    pub last_height: f64,
    pub font: String,
    pub big_font: String,
    pub flags: i32,
}

impl TextStyle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            height: 0.0,
            width: 1.0,
            oblique: 0.0,
            generation: 0,
            last_height: 2.5,
            font: String::new(),
            big_font: String::new(),
            flags: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub handle: Handle,
    pub name: String,
    pub base: Point3,
    pub flags: i32,
}

/// 解析器按文档顺序调用的回调集合。块不会嵌套：`begin_block` 与 `end_block` 成对出现。
pub trait DrawingReceiver {
    fn add_header(&mut self, header: &Header);
    fn add_linetype(&mut self, linetype: &LineType);
    fn add_layer(&mut self, layer: &Layer);
    fn add_dim_style(&mut self, style: &DimStyle);
    fn add_text_style(&mut self, style: &TextStyle);
    fn begin_block(&mut self, block: &Block);
    fn end_block(&mut self);
    fn add_entity(&mut self, entity: &Entity);
}

/// 图纸数据来源，把文件内容逐条推送给接收者。
pub trait DrawingSource {
    type Error: std::error::Error + Send + Sync + 'static;

    fn read(&mut self, receiver: &mut dyn DrawingReceiver) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_parses_hex_and_displays_uppercase() {
        let handle = Handle::parse_hex(" 1a2F ").expect("应能解析十六进制句柄");
        assert_eq!(handle.get(), 0x1A2F);
        assert_eq!(handle.to_string(), "1A2F");
        assert!(Handle::parse_hex("xyz").is_none());
    }

    #[test]
    fn dimension_kind_uses_low_nibble() {
        assert_eq!(DimensionKind::from_flags(32 | 3), DimensionKind::Diameter);
        assert_eq!(DimensionKind::from_flags(128), DimensionKind::Linear);
        assert_eq!(
            EntityKind::Dimension(DimensionKind::Radius).type_name(),
            "DIMENSION_RADIUS"
        );
    }

    #[test]
    fn header_integer_accepts_real_values() {
        let mut header = Header::default();
        header
            .variables
            .insert("$SPLINESEGS".to_string(), HeaderValue::Integer(12));
        header
            .variables
            .insert("$LTSCALE".to_string(), HeaderValue::Real(2.0));
        assert_eq!(header.integer("$SPLINESEGS"), Some(12));
        assert_eq!(header.integer("$LTSCALE"), Some(2));
        assert_eq!(header.integer("$MISSING"), None);
    }
}
