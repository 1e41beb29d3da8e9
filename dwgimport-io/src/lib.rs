//! DXF（ASCII）读取器：按文档顺序把表、块与实体推送给 `DrawingReceiver`。

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use dwgimport_core::drawing::{
    ArcEntity, Block, CircleEntity, DimStyle, DimensionKind, DrawingReceiver, DrawingSource,
    EllipseEntity, Entity, EntityCommon, EntityKind, Handle, HatchEntity, HatchLoop, Header,
    HeaderValue, InsertEntity, Layer, LineEntity, LineType, LoopObject, MTextEntity, PointEntity,
    PolylineEntity, PolylineVertex, SolidEntity, Space, SplineEntity, TextEntity, TextStyle,
};
use dwgimport_core::geometry::{Point3, Vector3};
use dwgimport_core::palette::{lineweight_code_from_dxf, transparency_from_dxf};

/// 缺少组码 5 的记录从该值开始分配句柄，避免与文件中的句柄冲突。
const SYNTHETIC_HANDLE_BASE: u64 = 1 << 48;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid document structure: {0}")]
    InvalidDocument(String),
}

/// 从内存中的 DXF 文本读取图纸。
#[derive(Debug, Clone)]
pub struct DxfSource {
    data: String,
}

impl DxfSource {
    pub fn from_path(path: &Path) -> Result<Self, IoError> {
        let bytes = fs::read(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        // 旧版 DXF 常用本地代码页，无法按 UTF-8 解码的字节按替换字符处理。
        let data = String::from_utf8_lossy(&bytes).into_owned();
        Ok(Self { data })
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self { data: text.into() }
    }
}

impl DrawingSource for DxfSource {
    type Error = IoError;

    fn read(&mut self, receiver: &mut dyn DrawingReceiver) -> Result<(), IoError> {
        let parser = DxfParser::new(&self.data, receiver);
        parser.parse().map_err(|err| match err {
            DxfError::Unsupported { feature } => IoError::UnsupportedFeature(feature),
            DxfError::Invalid { message } => IoError::InvalidDocument(message),
        })
    }
}

#[derive(Debug)]
enum DxfError {
    Unsupported { feature: String },
    Invalid { message: String },
}

impl DxfError {
    fn unsupported(feature: impl Into<String>) -> Self {
        Self::Unsupported {
            feature: feature.into(),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

struct DxfParser<'a, 'r> {
    reader: DxfReader<'a>,
    receiver: &'r mut dyn DrawingReceiver,
    header_sent: bool,
    next_synthetic: u64,
}

impl<'a, 'r> DxfParser<'a, 'r> {
    fn new(source: &'a str, receiver: &'r mut dyn DrawingReceiver) -> Self {
        Self {
            reader: DxfReader::new(source),
            receiver,
            header_sent: false,
            next_synthetic: SYNTHETIC_HANDLE_BASE,
        }
    }

    fn parse(mut self) -> Result<(), DxfError> {
        while let Some((code, value)) = self.reader.next_pair()? {
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "意外的组码 {code}（期望 0 表示 SECTION/EOF）"
                )));
            }
            match value.as_str() {
                "SECTION" => {
                    let (name_code, name) = self
                        .reader
                        .next_pair()?
                        .ok_or_else(|| DxfError::invalid("SECTION 缺少名称（组码 2）"))?;
                    if name_code != 2 {
                        return Err(DxfError::invalid(format!(
                            "SECTION 名称使用了组码 {name_code}（期望 2）"
                        )));
                    }
                    match name.trim() {
                        "HEADER" => self.parse_header()?,
                        "TABLES" => {
                            self.ensure_header();
                            self.parse_tables()?;
                        }
                        "BLOCKS" => {
                            self.ensure_header();
                            self.parse_blocks()?;
                        }
                        "ENTITIES" => {
                            self.ensure_header();
                            self.parse_entities()?;
                        }
                        _ => self.skip_section()?,
                    }
                }
                "EOF" => break,
                unexpected => {
                    return Err(DxfError::invalid(format!(
                        "意外的标记 {unexpected}，期望 SECTION 或 EOF"
                    )));
                }
            }
        }
        self.ensure_header();
        Ok(())
    }

    /// 没有 HEADER 段的文件也要先送出一次（只含注释的）头部。
    fn ensure_header(&mut self) {
        if !self.header_sent {
            let header = Header {
                variables: BTreeMap::new(),
                comments: std::mem::take(&mut self.reader.comments),
            };
            self.receiver.add_header(&header);
            self.header_sent = true;
        }
    }

    fn skip_section(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) if value == "ENDSEC" => break,
                Some(_) => continue,
                None => {
                    return Err(DxfError::invalid("SECTION 未找到 ENDSEC 终止标记"));
                }
            }
        }
        Ok(())
    }

    fn parse_header(&mut self) -> Result<(), DxfError> {
        let mut variables: BTreeMap<String, HeaderValue> = BTreeMap::new();
        let mut current: Option<String> = None;
        let mut coord = CoordSlot::default();

        loop {
            let (code, value) = self
                .reader
                .next_pair()?
                .ok_or_else(|| DxfError::invalid("HEADER 段提前结束"))?;
            match code {
                0 if value == "ENDSEC" => {
                    flush_header_coord(current.take(), &mut coord, &mut variables);
                    break;
                }
                0 => {
                    return Err(DxfError::invalid(format!(
                        "HEADER 段遇到意外的标记 {value}"
                    )));
                }
                9 => {
                    flush_header_coord(current.take(), &mut coord, &mut variables);
                    current = Some(value.trim().to_string());
                }
                10..=18 | 20..=28 | 30..=38 => {
                    let context = format!("HEADER 变量 {} 坐标", current.as_deref().unwrap_or("?"));
                    coord.assign_any(code, &value, &context)?;
                }
                _ => {
                    let Some(name) = current.clone() else {
                        continue;
                    };
                    let parsed = match header_value_kind(code) {
                        HeaderValueKind::Real => HeaderValue::Real(parse_f64(&value, &name)?),
                        HeaderValueKind::Integer => {
                            HeaderValue::Integer(i64::from(parse_i32(&value, &name)?))
                        }
                        HeaderValueKind::Text => HeaderValue::Text(value.trim().to_string()),
                    };
                    variables.insert(name, parsed);
                }
            }
        }

        let header = Header {
            variables,
            comments: std::mem::take(&mut self.reader.comments),
        };
        debug!(variables = header.variables.len(), "读取 HEADER 段");
        self.receiver.add_header(&header);
        self.header_sent = true;
        Ok(())
    }

    fn parse_tables(&mut self) -> Result<(), DxfError> {
        loop {
            let (code, value) = self
                .reader
                .next_pair()?
                .ok_or_else(|| DxfError::invalid("TABLES 段提前结束"))?;
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "TABLES 段遇到组码 {code}（期望 0 表示 TABLE 起始）"
                )));
            }
            match value.as_str() {
                "ENDSEC" => break,
                "TABLE" => self.parse_table()?,
                _ => self.skip_entity_body()?,
            }
        }
        Ok(())
    }

    fn parse_table(&mut self) -> Result<(), DxfError> {
        // TABLE 自身的属性（名称、句柄、最大条目数）
        self.skip_entity_body()?;
        loop {
            let (code, value) = self
                .reader
                .next_pair()?
                .ok_or_else(|| DxfError::invalid("TABLE 未找到 ENDTAB 终止标记"))?;
            if code != 0 {
                return Err(DxfError::invalid(format!("TABLE 中出现意外组码 {code}")));
            }
            match value.as_str() {
                "ENDTAB" => {
                    self.skip_entity_body()?;
                    break;
                }
                "LTYPE" => {
                    let linetype = self.parse_linetype()?;
                    self.receiver.add_linetype(&linetype);
                }
                "LAYER" => {
                    let layer = self.parse_layer()?;
                    self.receiver.add_layer(&layer);
                }
                "STYLE" => {
                    let style = self.parse_text_style()?;
                    self.receiver.add_text_style(&style);
                }
                "DIMSTYLE" => {
                    let style = self.parse_dim_style()?;
                    self.receiver.add_dim_style(&style);
                }
                _ => self.skip_entity_body()?,
            }
        }
        Ok(())
    }

    fn parse_linetype(&mut self) -> Result<LineType, DxfError> {
        let mut name = None;
        let mut description = String::new();
        let mut pattern_length = 0.0;
        let mut pattern = Vec::new();
        while let Some((code, value)) = self.next_body_pair("LTYPE")? {
            match code {
                2 => name = Some(value.trim().to_string()),
                3 => description = value.trim().to_string(),
                40 => pattern_length = parse_f64(&value, "LTYPE 图案长度")?,
                49 => pattern.push(parse_f64(&value, "LTYPE 线段长度")?),
                _ => {}
            }
        }
        Ok(LineType {
            name: name.ok_or_else(|| DxfError::invalid("LTYPE 缺少名称（组码 2）"))?,
            description,
            pattern_length,
            pattern,
        })
    }

    fn parse_layer(&mut self) -> Result<Layer, DxfError> {
        let mut layer = Layer::new(String::new());
        let mut named = false;
        while let Some((code, value)) = self.next_body_pair("LAYER")? {
            match code {
                2 => {
                    layer.name = value.trim().to_string();
                    named = true;
                }
                6 => layer.linetype = value.trim().to_string(),
                62 => layer.color = parse_i32(&value, "LAYER 颜色")?,
                420 => layer.color24 = parse_i32(&value, "LAYER 真彩色")?,
                440 => layer.transparency = transparency_from_dxf(parse_i32(&value, "LAYER 透明度")?),
                370 => layer.lineweight = lineweight_code_from_dxf(parse_i32(&value, "LAYER 线宽")?),
                70 => layer.flags = parse_i32(&value, "LAYER 标志")?,
                _ => {}
            }
        }
        if !named {
            return Err(DxfError::invalid("LAYER 缺少名称（组码 2）"));
        }
        Ok(layer)
    }

    fn parse_text_style(&mut self) -> Result<TextStyle, DxfError> {
        let mut style = TextStyle::new(String::new());
        while let Some((code, value)) = self.next_body_pair("STYLE")? {
            match code {
                2 => style.name = value.trim().to_string(),
                70 => style.flags = parse_i32(&value, "STYLE 标志")?,
                40 => style.height = parse_f64(&value, "STYLE 固定高度")?,
                41 => style.width = parse_f64(&value, "STYLE 宽度因子")?,
                50 => style.oblique = parse_f64(&value, "STYLE 倾斜角")?,
                71 => style.generation = parse_i32(&value, "STYLE 生成标志")?,
                42 => style.last_height = parse_f64(&value, "STYLE 上次高度")?,
                3 => style.font = value.trim().to_string(),
                4 => style.big_font = value.trim().to_string(),
                _ => {}
            }
        }
        Ok(style)
    }

    fn parse_dim_style(&mut self) -> Result<DimStyle, DxfError> {
        let mut style = DimStyle::new(String::new());
        while let Some((code, value)) = self.next_body_pair("DIMSTYLE")? {
            match code {
                2 => style.name = value.trim().to_string(),
                3 => style.post_fix = value.to_string(),
                40 => style.scale = parse_f64(&value, "DIMSCALE")?,
                41 => style.arrow_size = parse_f64(&value, "DIMASZ")?,
                42 => style.extension_offset = parse_f64(&value, "DIMEXO")?,
                44 => style.extension_extend = parse_f64(&value, "DIMEXE")?,
                140 => style.text_height = parse_f64(&value, "DIMTXT")?,
                147 => style.text_gap = parse_f64(&value, "DIMGAP")?,
                271 => style.decimal_places = parse_i32(&value, "DIMDEC")?,
                _ => {}
            }
        }
        Ok(style)
    }

    fn parse_blocks(&mut self) -> Result<(), DxfError> {
        loop {
            let (code, value) = match self.reader.next_pair()? {
                Some(pair) => pair,
                None => return Err(DxfError::invalid("BLOCKS 段提前结束")),
            };
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "BLOCKS 段遇到组码 {code}（期望 0 表示实体起始）"
                )));
            }

            match value.as_str() {
                "ENDSEC" => break,
                "BLOCK" => self.parse_block_definition()?,
                _ => {
                    // 未预期的条目，直接跳过
                    self.skip_entity_body()?;
                }
            }
        }
        Ok(())
    }

    fn parse_block_definition(&mut self) -> Result<(), DxfError> {
        let mut name: Option<String> = None;
        let mut handle: Option<Handle> = None;
        let mut flags = 0;
        let mut base = CoordSlot::default();
        while let Some((code, value)) = self.next_body_pair("BLOCK")? {
            match code {
                2 => name = Some(value.trim().to_string()),
                3 if name.is_none() => name = Some(value.trim().to_string()),
                5 => handle = Handle::parse_hex(&value),
                70 => flags = parse_i32(&value, "BLOCK 标志")?,
                10 | 20 | 30 => {
                    base.assign(code, 10, &value, "BLOCK 基点")?;
                }
                _ => {}
            }
        }
        let name = name.ok_or_else(|| DxfError::invalid("BLOCK 缺少名称（组码 2）"))?;
        let handle = match handle {
            Some(handle) => handle,
            None => self.synthetic_handle(),
        };
        let block = Block {
            handle,
            name,
            base: base.or_origin(),
            flags,
        };
        debug!(block = %block.name, handle = %block.handle, "读取块定义");
        self.receiver.begin_block(&block);

        loop {
            let (code, value) = self
                .reader
                .next_pair()?
                .ok_or_else(|| DxfError::invalid("BLOCK 定义未找到 ENDBLK 终止标记"))?;
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "BLOCK {} 中遇到组码 {code}（期望 0 表示实体起始）",
                    block.name
                )));
            }
            if value == "ENDBLK" {
                self.skip_entity_body()?;
                break;
            }
            self.dispatch_entity(&value)?;
        }
        self.receiver.end_block();
        Ok(())
    }

    fn parse_entities(&mut self) -> Result<(), DxfError> {
        loop {
            let (code, value) = match self.reader.next_pair()? {
                Some(pair) => pair,
                None => return Err(DxfError::invalid("ENTITIES 段提前结束")),
            };
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "ENTITIES 段遇到组码 {code}（期望 0 表示实体起始）"
                )));
            }
            if value == "ENDSEC" {
                break;
            }
            self.dispatch_entity(&value)?;
        }
        Ok(())
    }

    fn dispatch_entity(&mut self, kind: &str) -> Result<(), DxfError> {
        match self.parse_entity(kind) {
            Ok(Some(entity)) => {
                self.receiver.add_entity(&entity);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(DxfError::Unsupported { feature }) => {
                debug!(kind, feature = %feature, "跳过暂不支持的实体");
                self.skip_entity_body()
            }
            Err(err) => Err(err),
        }
    }

    fn parse_entity(&mut self, kind: &str) -> Result<Option<Entity>, DxfError> {
        let entity = match kind {
            "POINT" => self.parse_point()?,
            "LINE" => self.parse_line()?,
            "RAY" => self.parse_marker(EntityKind::Ray)?,
            "XLINE" => self.parse_marker(EntityKind::XLine)?,
            "CIRCLE" => self.parse_circle()?,
            "ARC" => self.parse_arc()?,
            "ELLIPSE" => self.parse_ellipse()?,
            "LWPOLYLINE" => self.parse_lwpolyline()?,
            "POLYLINE" => self.parse_polyline()?,
            "SPLINE" => self.parse_spline()?,
            "INSERT" => self.parse_insert()?,
            "SOLID" => self.parse_solid(false)?,
            "TRACE" => self.parse_solid(true)?,
            "3DFACE" => self.parse_marker(EntityKind::Face3D)?,
            "TEXT" => self.parse_text()?,
            "MTEXT" => self.parse_mtext()?,
            "HATCH" => self.parse_hatch()?,
            "VIEWPORT" => self.parse_marker(EntityKind::Viewport)?,
            "IMAGE" => self.parse_marker(EntityKind::Image)?,
            "LEADER" => self.parse_marker(EntityKind::Leader)?,
            "DIMENSION" => self.parse_dimension()?,
            // 属性与序列结束标记随 INSERT/POLYLINE 出现，不单独成实体
            "ATTRIB" | "ATTDEF" | "SEQEND" | "VERTEX" => {
                self.skip_entity_body()?;
                return Ok(None);
            }
            other => {
                return Err(DxfError::unsupported(format!("暂不支持的实体类型 {other}")));
            }
        };
        Ok(Some(entity))
    }

    /// 读取实体体内的下一个组码对；遇到下一个 0 组码时回退并返回 None。
    fn next_body_pair(&mut self, kind: &str) -> Result<Option<(i32, String)>, DxfError> {
        match self.reader.next_pair()? {
            Some((0, value)) => {
                self.reader.put_back((0, value));
                Ok(None)
            }
            Some(pair) => Ok(Some(pair)),
            None => Err(DxfError::invalid(format!("{kind} 未正确结束"))),
        }
    }

    fn synthetic_handle(&mut self) -> Handle {
        let handle = Handle(self.next_synthetic);
        self.next_synthetic += 1;
        handle
    }

    fn finish_common(&mut self, common: CommonBuilder) -> EntityCommon {
        let handle = match common.handle {
            Some(handle) => handle,
            None => self.synthetic_handle(),
        };
        EntityCommon {
            handle,
            ..common.common
        }
    }

    /// 只保留公共属性的实体（射线、构造线、三维面等）。
    fn parse_marker(&mut self, kind: EntityKind) -> Result<Entity, DxfError> {
        let mut common = CommonBuilder::default();
        let name = kind.type_name();
        while let Some((code, value)) = self.next_body_pair(name)? {
            common.apply(code, &value, name)?;
        }
        Ok(Entity::new(self.finish_common(common), kind))
    }

    fn parse_point(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonBuilder::default();
        let mut position = CoordSlot::default();
        let mut extrusion = CoordSlot::default();
        let mut thickness = 0.0;
        while let Some((code, value)) = self.next_body_pair("POINT")? {
            match code {
                10 | 20 | 30 => position.assign(code, 10, &value, "POINT 位置")?,
                210 | 220 | 230 => extrusion.assign(code, 210, &value, "POINT 拉伸方向")?,
                39 => thickness = parse_f64(&value, "POINT 厚度")?,
                _ => common.apply(code, &value, "POINT")?,
            }
        }
        let point = PointEntity {
            position: position.require("POINT 位置")?,
            thickness,
            extrusion: extrusion.direction(),
        };
        Ok(Entity::new(self.finish_common(common), EntityKind::Point(point)))
    }

    fn parse_line(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonBuilder::default();
        let mut start = CoordSlot::default();
        let mut end = CoordSlot::default();
        let mut extrusion = CoordSlot::default();
        let mut thickness = 0.0;
        while let Some((code, value)) = self.next_body_pair("LINE")? {
            match code {
                10 | 20 | 30 => start.assign(code, 10, &value, "LINE 起点")?,
                11 | 21 | 31 => end.assign(code, 11, &value, "LINE 终点")?,
                210 | 220 | 230 => extrusion.assign(code, 210, &value, "LINE 拉伸方向")?,
                39 => thickness = parse_f64(&value, "LINE 厚度")?,
                _ => common.apply(code, &value, "LINE")?,
            }
        }
        let line = LineEntity {
            start: start.require("LINE 起点")?,
            end: end.require("LINE 终点")?,
            thickness,
            extrusion: extrusion.direction(),
        };
        Ok(Entity::new(self.finish_common(common), EntityKind::Line(line)))
    }

    fn parse_circle(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonBuilder::default();
        let mut center = CoordSlot::default();
        let mut extrusion = CoordSlot::default();
        let mut radius = None;
        let mut thickness = 0.0;
        while let Some((code, value)) = self.next_body_pair("CIRCLE")? {
            match code {
                10 | 20 | 30 => center.assign(code, 10, &value, "CIRCLE 圆心")?,
                210 | 220 | 230 => extrusion.assign(code, 210, &value, "CIRCLE 拉伸方向")?,
                40 => assign_coord(&mut radius, &value, "CIRCLE 半径")?,
                39 => thickness = parse_f64(&value, "CIRCLE 厚度")?,
                _ => common.apply(code, &value, "CIRCLE")?,
            }
        }
        let circle = CircleEntity {
            center: center.require("CIRCLE 圆心")?,
            radius: radius.ok_or_else(|| DxfError::invalid("CIRCLE 缺少半径（组码 40）"))?,
            thickness,
            extrusion: extrusion.direction(),
        };
        Ok(Entity::new(self.finish_common(common), EntityKind::Circle(circle)))
    }

    fn parse_arc(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonBuilder::default();
        let mut center = CoordSlot::default();
        let mut extrusion = CoordSlot::default();
        let mut radius = None;
        let mut start_angle = None;
        let mut end_angle = None;
        let mut thickness = 0.0;
        while let Some((code, value)) = self.next_body_pair("ARC")? {
            match code {
                10 | 20 | 30 => center.assign(code, 10, &value, "ARC 圆心")?,
                210 | 220 | 230 => extrusion.assign(code, 210, &value, "ARC 拉伸方向")?,
                40 => assign_coord(&mut radius, &value, "ARC 半径")?,
                50 => assign_coord(&mut start_angle, &value, "ARC 起始角")?,
                51 => assign_coord(&mut end_angle, &value, "ARC 终止角")?,
                39 => thickness = parse_f64(&value, "ARC 厚度")?,
                _ => common.apply(code, &value, "ARC")?,
            }
        }
        let arc = ArcEntity {
            center: center.require("ARC 圆心")?,
            radius: radius.ok_or_else(|| DxfError::invalid("ARC 缺少半径（组码 40）"))?,
            start_angle: start_angle
                .ok_or_else(|| DxfError::invalid("ARC 缺少起始角（组码 50）"))?
                .to_radians(),
            end_angle: end_angle
                .ok_or_else(|| DxfError::invalid("ARC 缺少终止角（组码 51）"))?
                .to_radians(),
            thickness,
            extrusion: extrusion.direction(),
        };
        Ok(Entity::new(self.finish_common(common), EntityKind::Arc(arc)))
    }

    fn parse_ellipse(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonBuilder::default();
        let mut center = CoordSlot::default();
        let mut major = CoordSlot::default();
        let mut extrusion = CoordSlot::default();
        let mut ratio = None;
        let mut start_param = 0.0;
        let mut end_param = std::f64::consts::TAU;
        while let Some((code, value)) = self.next_body_pair("ELLIPSE")? {
            match code {
                10 | 20 | 30 => center.assign(code, 10, &value, "ELLIPSE 中心")?,
                11 | 21 | 31 => major.assign(code, 11, &value, "ELLIPSE 主轴")?,
                210 | 220 | 230 => extrusion.assign(code, 210, &value, "ELLIPSE 拉伸方向")?,
                40 => assign_coord(&mut ratio, &value, "ELLIPSE 短长轴比")?,
                41 => start_param = parse_f64(&value, "ELLIPSE 起始参数")?,
                42 => end_param = parse_f64(&value, "ELLIPSE 终止参数")?,
                _ => common.apply(code, &value, "ELLIPSE")?,
            }
        }
        let ellipse = EllipseEntity {
            center: center.require("ELLIPSE 中心")?,
            major_axis: Vector3::from(major.require("ELLIPSE 主轴")?.as_vec3()),
            ratio: ratio.ok_or_else(|| DxfError::invalid("ELLIPSE 缺少短长轴比（组码 40）"))?,
            start_param,
            end_param,
            extrusion: extrusion.direction(),
        };
        Ok(Entity::new(self.finish_common(common), EntityKind::Ellipse(ellipse)))
    }

    fn parse_lwpolyline(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonBuilder::default();
        let mut flags = 0;
        let mut constant_width = 0.0;
        let mut elevation = 0.0;
        let mut thickness = 0.0;
        let mut extrusion = CoordSlot::default();
        let mut vertices: Vec<VertexDraft> = Vec::new();
        let mut pending_x: Option<f64> = None;
        let mut pending_y: Option<f64> = None;
        while let Some((code, value)) = self.next_body_pair("LWPOLYLINE")? {
            match code {
                70 => flags = parse_i32(&value, "LWPOLYLINE 标志")?,
                43 => constant_width = parse_f64(&value, "LWPOLYLINE 常量宽度")?,
                38 => elevation = parse_f64(&value, "LWPOLYLINE 标高")?,
                39 => thickness = parse_f64(&value, "LWPOLYLINE 厚度")?,
                90 => {}
                10 => {
                    let x = parse_f64(&value, "LWPOLYLINE 顶点 X")?;
                    if let Some(y) = pending_y.take() {
                        vertices.push(VertexDraft::new(x, y));
                    } else if pending_x.replace(x).is_some() {
                        return Err(DxfError::invalid(
                            "LWPOLYLINE 顶点缺少对应的 Y（组码 20）",
                        ));
                    }
                }
                20 => {
                    let y = parse_f64(&value, "LWPOLYLINE 顶点 Y")?;
                    if let Some(x) = pending_x.take() {
                        vertices.push(VertexDraft::new(x, y));
                    } else if pending_y.replace(y).is_some() {
                        return Err(DxfError::invalid(
                            "LWPOLYLINE 顶点缺少对应的 X（组码 10）",
                        ));
                    }
                }
                40 | 41 | 42 => {
                    let raw = parse_f64(&value, "LWPOLYLINE 顶点属性")?;
                    let vertex = vertices.last_mut().ok_or_else(|| {
                        DxfError::invalid(format!(
                            "LWPOLYLINE 在定义首个顶点前遇到组码 {code}"
                        ))
                    })?;
                    match code {
                        40 => vertex.start_width = Some(raw),
                        41 => vertex.end_width = Some(raw),
                        _ => vertex.bulge = raw,
                    }
                }
                210 | 220 | 230 => extrusion.assign(code, 210, &value, "LWPOLYLINE 拉伸方向")?,
                _ => common.apply(code, &value, "LWPOLYLINE")?,
            }
        }

        if pending_x.is_some() || pending_y.is_some() {
            return Err(DxfError::invalid(
                "LWPOLYLINE 顶点坐标成对出现（组码 10/20），检测到不完整的顶点",
            ));
        }

        let polyline = PolylineEntity {
            vertices: vertices
                .into_iter()
                .map(|draft| draft.finish(elevation, constant_width))
                .collect(),
            flags,
            constant_width,
            elevation,
            thickness,
            extrusion: extrusion.direction(),
        };
        Ok(Entity::new(
            self.finish_common(common),
            EntityKind::LwPolyline(polyline),
        ))
    }

    fn parse_polyline(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonBuilder::default();
        let mut flags = 0;
        let mut default_start = 0.0;
        let mut default_end = 0.0;
        let mut origin = CoordSlot::default();
        let mut extrusion = CoordSlot::default();
        let mut thickness = 0.0;
        while let Some((code, value)) = self.next_body_pair("POLYLINE")? {
            match code {
                70 => flags = parse_i32(&value, "POLYLINE 标志（组码 70）")?,
                40 => default_start = parse_f64(&value, "POLYLINE 默认起始宽度")?,
                41 => default_end = parse_f64(&value, "POLYLINE 默认终止宽度")?,
                10 | 20 | 30 => origin.assign(code, 10, &value, "POLYLINE 标高点")?,
                210 | 220 | 230 => extrusion.assign(code, 210, &value, "POLYLINE 拉伸方向")?,
                39 => thickness = parse_f64(&value, "POLYLINE 厚度")?,
                66 | 71 | 72 | 73 | 74 | 75 => {
                    // 读但暂不使用
                }
                _ => common.apply(code, &value, "POLYLINE")?,
            }
        }
        let elevation = origin.or_origin().z();

        let mut vertices = Vec::new();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.as_str() {
                    "VERTEX" => {
                        if let Some(vertex) =
                            self.parse_vertex(elevation, default_start, default_end)?
                        {
                            vertices.push(vertex);
                        }
                    }
                    "SEQEND" => {
                        self.skip_entity_body()?;
                        break;
                    }
                    _ => {
                        self.reader.put_back((0, value));
                        break;
                    }
                },
                Some((code, _)) => {
                    return Err(DxfError::invalid(format!(
                        "POLYLINE 顶点序列出现意外组码 {code}"
                    )));
                }
                None => return Err(DxfError::invalid("POLYLINE 缺少 SEQEND")),
            }
        }

        let polyline = PolylineEntity {
            vertices,
            flags,
            constant_width: default_start,
            elevation,
            thickness,
            extrusion: extrusion.direction(),
        };
        Ok(Entity::new(
            self.finish_common(common),
            EntityKind::Polyline(polyline),
        ))
    }

    /// 读取 VERTEX；样条框架控制点（标志 16）不属于折线本身，返回 None。
    fn parse_vertex(
        &mut self,
        elevation: f64,
        default_start: f64,
        default_end: f64,
    ) -> Result<Option<PolylineVertex>, DxfError> {
        let mut position = CoordSlot::default();
        let mut start_width = None;
        let mut end_width = None;
        let mut bulge = 0.0;
        let mut flags = 0;
        while let Some((code, value)) = self.next_body_pair("VERTEX")? {
            match code {
                10 | 20 | 30 => position.assign(code, 10, &value, "VERTEX 位置")?,
                40 => start_width = Some(parse_f64(&value, "VERTEX 起始宽度")?),
                41 => end_width = Some(parse_f64(&value, "VERTEX 终止宽度")?),
                42 => bulge = parse_f64(&value, "VERTEX bulge")?,
                70 => flags = parse_i32(&value, "VERTEX 标志")?,
                _ => {}
            }
        }
        if flags & 0x10 != 0 {
            return Ok(None);
        }
        let mut point = position.require("VERTEX 位置")?;
        if position.z.is_none() {
            point = Point3::new(point.x(), point.y(), elevation);
        }
        Ok(Some(
            PolylineVertex::new(point)
                .with_bulge(bulge)
                .with_widths(
                    start_width.unwrap_or(default_start),
                    end_width.unwrap_or(default_end),
                ),
        ))
    }

    fn parse_spline(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonBuilder::default();
        let mut spline = empty_spline();
        let mut control = PointList::default();
        let mut fit = PointList::default();
        while let Some((code, value)) = self.next_body_pair("SPLINE")? {
            match code {
                70 => spline.flags = parse_i32(&value, "SPLINE 标志")?,
                71 => spline.degree = parse_i32(&value, "SPLINE 次数")?,
                72 | 73 | 74 => {}
                42 => spline.tolerance_knot = parse_f64(&value, "SPLINE 节点公差")?,
                43 => spline.tolerance_control = parse_f64(&value, "SPLINE 控制点公差")?,
                44 => spline.tolerance_fit = parse_f64(&value, "SPLINE 拟合公差")?,
                40 => spline.knots.push(parse_f64(&value, "SPLINE 节点")?),
                41 => spline.weights.push(parse_f64(&value, "SPLINE 权重")?),
                10 | 20 | 30 => control.accept(code - 10, &value, "SPLINE 控制点")?,
                11 | 21 | 31 => fit.accept(code - 11, &value, "SPLINE 拟合点")?,
                12 | 22 | 32 | 13 | 23 | 33 | 210 | 220 | 230 => {}
                _ => common.apply(code, &value, "SPLINE")?,
            }
        }
        spline.control_points = control.finish("SPLINE 控制点")?;
        spline.fit_points = fit.finish("SPLINE 拟合点")?;
        Ok(Entity::new(self.finish_common(common), EntityKind::Spline(spline)))
    }

    fn parse_insert(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonBuilder::default();
        let mut name = None;
        let mut insertion = CoordSlot::default();
        let mut extrusion = CoordSlot::default();
        let mut insert = InsertEntity::new(String::new(), Point3::new(0.0, 0.0, 0.0));
        let mut y_scale = None;
        let mut z_scale = None;
        while let Some((code, value)) = self.next_body_pair("INSERT")? {
            match code {
                2 => {
                    if name.is_some() {
                        return Err(DxfError::invalid("INSERT 遇到重复的块名（组码 2）"));
                    }
                    name = Some(value.trim().to_string());
                }
                10 | 20 | 30 => insertion.assign(code, 10, &value, "INSERT 插入点")?,
                210 | 220 | 230 => extrusion.assign(code, 210, &value, "INSERT 拉伸方向")?,
                41 => insert.x_scale = parse_f64(&value, "INSERT 缩放 X")?,
                42 => y_scale = Some(parse_f64(&value, "INSERT 缩放 Y")?),
                43 => z_scale = Some(parse_f64(&value, "INSERT 缩放 Z")?),
                50 => insert.rotation = parse_f64(&value, "INSERT 旋转角")?.to_radians(),
                70 => insert.column_count = parse_i32(&value, "INSERT 列数")?,
                71 => insert.row_count = parse_i32(&value, "INSERT 行数")?,
                44 => insert.column_spacing = parse_f64(&value, "INSERT 列距")?,
                45 => insert.row_spacing = parse_f64(&value, "INSERT 行距")?,
                66 => {
                    // 属性随后以 ATTRIB … SEQEND 出现，由实体循环跳过
                }
                _ => common.apply(code, &value, "INSERT")?,
            }
        }
        insert.block_name = name.ok_or_else(|| DxfError::invalid("INSERT 缺少块名（组码 2）"))?;
        insert.insertion = insertion.require("INSERT 插入点")?;
        insert.y_scale = y_scale.unwrap_or(insert.x_scale);
        insert.z_scale = z_scale.unwrap_or(insert.x_scale);
        insert.column_count = insert.column_count.max(1);
        insert.row_count = insert.row_count.max(1);
        insert.extrusion = extrusion.direction();
        Ok(Entity::new(self.finish_common(common), EntityKind::Insert(insert)))
    }

    fn parse_solid(&mut self, trace: bool) -> Result<Entity, DxfError> {
        let kind = if trace { "TRACE" } else { "SOLID" };
        let mut common = CommonBuilder::default();
        let mut corners: [CoordSlot; 4] = Default::default();
        let mut extrusion = CoordSlot::default();
        let mut thickness = 0.0;
        while let Some((code, value)) = self.next_body_pair(kind)? {
            match code {
                10..=13 | 20..=23 | 30..=33 => {
                    let index = (code % 10) as usize;
                    corners[index].assign(code, 10 + index as i32, &value, kind)?;
                }
                210 | 220 | 230 => extrusion.assign(code, 210, &value, kind)?,
                39 => thickness = parse_f64(&value, kind)?,
                _ => common.apply(code, &value, kind)?,
            }
        }
        let first = corners[0].require(kind)?;
        let second = corners[1].require(kind)?;
        let third = corners[2].require(kind)?;
        // 三角形 SOLID 省略第四点，此时与第三点重合
        let fourth = if corners[3].is_set() {
            corners[3].or_origin()
        } else {
            third
        };
        let solid = SolidEntity {
            corners: [first, second, third, fourth],
            thickness,
            extrusion: extrusion.direction(),
        };
        let kind = if trace {
            EntityKind::Trace(solid)
        } else {
            EntityKind::Solid(solid)
        };
        Ok(Entity::new(self.finish_common(common), kind))
    }

    fn parse_text(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonBuilder::default();
        let mut insertion = CoordSlot::default();
        let mut alignment = CoordSlot::default();
        let mut extrusion = CoordSlot::default();
        let mut text = TextEntity {
            insertion: Point3::new(0.0, 0.0, 0.0),
            alignment_point: None,
            height: 0.0,
            text: String::new(),
            rotation: 0.0,
            width_scale: 1.0,
            oblique: 0.0,
            style: "STANDARD".to_string(),
            generation: 0,
            horizontal_alignment: 0,
            vertical_alignment: 0,
            thickness: 0.0,
            extrusion: Vector3::unit_z(),
        };
        while let Some((code, value)) = self.next_body_pair("TEXT")? {
            match code {
                10 | 20 | 30 => insertion.assign(code, 10, &value, "TEXT 插入点")?,
                11 | 21 | 31 => alignment.assign(code, 11, &value, "TEXT 对齐点")?,
                210 | 220 | 230 => extrusion.assign(code, 210, &value, "TEXT 拉伸方向")?,
                40 => text.height = parse_f64(&value, "TEXT 高度")?,
                1 => text.text = decode_inline_text(&value),
                50 => text.rotation = parse_f64(&value, "TEXT 旋转角")?.to_radians(),
                41 => text.width_scale = parse_f64(&value, "TEXT 宽度因子")?,
                51 => text.oblique = parse_f64(&value, "TEXT 倾斜角")?.to_radians(),
                7 => text.style = value.trim().to_string(),
                71 => text.generation = parse_i32(&value, "TEXT 生成标志")?,
                72 => text.horizontal_alignment = parse_i32(&value, "TEXT 水平对齐")?,
                73 => text.vertical_alignment = parse_i32(&value, "TEXT 垂直对齐")?,
                39 => text.thickness = parse_f64(&value, "TEXT 厚度")?,
                _ => common.apply(code, &value, "TEXT")?,
            }
        }
        text.insertion = insertion.require("TEXT 插入点")?;
        text.alignment_point = alignment.is_set().then(|| alignment.or_origin());
        text.extrusion = extrusion.direction();
        Ok(Entity::new(self.finish_common(common), EntityKind::Text(text)))
    }

    fn parse_mtext(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonBuilder::default();
        let mut insertion = CoordSlot::default();
        let mut direction = CoordSlot::default();
        let mut extrusion = CoordSlot::default();
        let mut rotation_deg: Option<f64> = None;
        let mut fragments: Vec<String> = Vec::new();
        let mut mtext = MTextEntity {
            insertion: Point3::new(0.0, 0.0, 0.0),
            height: 0.0,
            reference_width: 0.0,
            attachment: 1,
            drawing_direction: 1,
            text: String::new(),
            style: "STANDARD".to_string(),
            rotation: 0.0,
            line_spacing_factor: 1.0,
            extrusion: Vector3::unit_z(),
        };
        while let Some((code, value)) = self.next_body_pair("MTEXT")? {
            match code {
                10 | 20 | 30 => insertion.assign(code, 10, &value, "MTEXT 插入点")?,
                11 | 21 | 31 => direction.assign(code, 11, &value, "MTEXT 方向向量")?,
                210 | 220 | 230 => extrusion.assign(code, 210, &value, "MTEXT 拉伸方向")?,
                40 => mtext.height = parse_f64(&value, "MTEXT 高度")?,
                41 => mtext.reference_width = parse_f64(&value, "MTEXT 参考宽度")?,
                71 => mtext.attachment = parse_i32(&value, "MTEXT 附着点 (组码 71)")?,
                72 => mtext.drawing_direction = parse_i32(&value, "MTEXT 书写方向 (组码 72)")?,
                44 => mtext.line_spacing_factor = parse_f64(&value, "MTEXT 行距因子")?,
                50 => rotation_deg = Some(parse_f64(&value, "MTEXT 旋转角")?),
                7 => mtext.style = value.trim().to_string(),
                1 | 3 => fragments.push(value),
                _ => common.apply(code, &value, "MTEXT")?,
            }
        }
        mtext.insertion = insertion.require("MTEXT 插入点")?;
        // 方向向量优先于旋转角
        mtext.rotation = if direction.is_set() {
            let axis = direction.or_origin();
            axis.y().atan2(axis.x())
        } else {
            rotation_deg.unwrap_or(0.0).to_radians()
        };
        mtext.text = decode_mtext_content(&fragments.concat());
        mtext.extrusion = extrusion.direction();
        Ok(Entity::new(self.finish_common(common), EntityKind::MText(mtext)))
    }

    fn parse_dimension(&mut self) -> Result<Entity, DxfError> {
        let mut common = CommonBuilder::default();
        let mut flags = 0;
        while let Some((code, value)) = self.next_body_pair("DIMENSION")? {
            match code {
                70 => flags = parse_i32(&value, "DIMENSION 类型标志")?,
                _ => common.apply(code, &value, "DIMENSION")?,
            }
        }
        Ok(Entity::new(
            self.finish_common(common),
            EntityKind::Dimension(DimensionKind::from_flags(flags)),
        ))
    }

    /// HATCH 的组码在边界前后含义不同（例如 10/20 既是标高点也是种子点），
    /// 因此先收集整条记录，再按顺序解析。
    fn parse_hatch(&mut self) -> Result<Entity, DxfError> {
        let mut pairs = Vec::new();
        while let Some(pair) = self.next_body_pair("HATCH")? {
            pairs.push(pair);
        }
        let mut cursor = PairCursor::new(&pairs);
        let mut common = CommonBuilder::default();
        let mut extrusion = CoordSlot::default();
        let mut hatch = HatchEntity {
            pattern_name: String::new(),
            solid: false,
            associative: false,
            style: 0,
            pattern_type: 1,
            pattern_angle: 0.0,
            pattern_scale: 1.0,
            elevation: 0.0,
            extrusion: Vector3::unit_z(),
            declared_loop_count: 0,
            loops: Vec::new(),
        };

        while let Some((code, value)) = cursor.advance() {
            match code {
                91 => {
                    hatch.declared_loop_count =
                        usize::try_from(parse_i32(value, "HATCH 边界环数量")?)
                            .map_err(|_| DxfError::invalid("HATCH 边界环数量为负"))?;
                    break;
                }
                10 | 20 => {}
                30 => hatch.elevation = parse_f64(value, "HATCH 标高")?,
                210 | 220 | 230 => extrusion.assign(code, 210, value, "HATCH 拉伸方向")?,
                2 => hatch.pattern_name = value.trim().to_string(),
                70 => hatch.solid = parse_i32(value, "HATCH 实体填充标志")? != 0,
                71 => hatch.associative = parse_i32(value, "HATCH 关联标志")? != 0,
                _ => common.apply(code, value, "HATCH")?,
            }
        }

        while cursor.peek_code() == Some(92) {
            hatch.loops.push(parse_hatch_loop(&mut cursor)?);
        }
        if hatch.loops.len() != hatch.declared_loop_count {
            return Err(DxfError::invalid(format!(
                "HATCH 声明 {} 个边界环，实际读取 {} 个",
                hatch.declared_loop_count,
                hatch.loops.len()
            )));
        }

        while let Some((code, value)) = cursor.advance() {
            match code {
                75 => hatch.style = parse_i32(value, "HATCH 样式")?,
                76 => hatch.pattern_type = parse_i32(value, "HATCH 图案类型")?,
                52 => hatch.pattern_angle = parse_f64(value, "HATCH 图案角度")?.to_radians(),
                41 => hatch.pattern_scale = parse_f64(value, "HATCH 图案比例")?,
                _ => {}
            }
        }
        hatch.extrusion = extrusion.direction();
        Ok(Entity::new(self.finish_common(common), EntityKind::Hatch(hatch)))
    }

    fn skip_entity_body(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        Ok(())
    }
}

fn parse_hatch_loop(cursor: &mut PairCursor<'_>) -> Result<HatchLoop, DxfError> {
    let flags = parse_i32(cursor.expect(92, "HATCH 边界类型")?, "HATCH 边界类型")?;
    let mut objects = Vec::new();
    if flags & 0x02 != 0 {
        let has_bulge = cursor
            .take_if(72)
            .map(|raw| parse_i32(raw, "HATCH 多段线 bulge 标志"))
            .transpose()?
            .unwrap_or(0)
            != 0;
        let closed = cursor
            .take_if(73)
            .map(|raw| parse_i32(raw, "HATCH 多段线闭合标志"))
            .transpose()?
            .unwrap_or(1)
            != 0;
        let count = parse_count(cursor.expect(93, "HATCH 多段线顶点数")?, "HATCH 多段线顶点数")?;
        let mut vertices = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let x = parse_f64(cursor.expect(10, "HATCH 顶点 X")?, "HATCH 顶点 X")?;
            let y = parse_f64(cursor.expect(20, "HATCH 顶点 Y")?, "HATCH 顶点 Y")?;
            let mut vertex = PolylineVertex::new(Point3::new(x, y, 0.0));
            if has_bulge {
                if let Some(raw) = cursor.take_if(42) {
                    vertex.bulge = parse_f64(raw, "HATCH 顶点 bulge")?;
                }
            }
            vertices.push(vertex);
        }
        objects.push(LoopObject::LwPolyline { vertices, closed });
    } else {
        let count = parse_count(cursor.expect(93, "HATCH 边数")?, "HATCH 边数")?;
        for _ in 0..count {
            objects.push(parse_hatch_edge(cursor)?);
        }
    }

    if let Some(raw) = cursor.take_if(97) {
        let sources = parse_count(raw, "HATCH 源对象数量")?;
        for _ in 0..sources {
            cursor.take_if(330);
        }
    }
    Ok(HatchLoop { flags, objects })
}

fn parse_hatch_edge(cursor: &mut PairCursor<'_>) -> Result<LoopObject, DxfError> {
    let edge_type = parse_i32(cursor.expect(72, "HATCH 边类型")?, "HATCH 边类型")?;
    let mut point = |x_code: i32, context: &str| -> Result<Point3, DxfError> {
        let x = parse_f64(cursor.expect(x_code, context)?, context)?;
        let y = parse_f64(cursor.expect(x_code + 10, context)?, context)?;
        Ok(Point3::new(x, y, 0.0))
    };
    match edge_type {
        1 => {
            let start = point(10, "HATCH 直线边起点")?;
            let end = point(11, "HATCH 直线边终点")?;
            Ok(LoopObject::Line { start, end })
        }
        2 => {
            let center = point(10, "HATCH 圆弧边圆心")?;
            let radius = parse_f64(cursor.expect(40, "HATCH 圆弧边半径")?, "HATCH 圆弧边半径")?;
            let start = parse_f64(cursor.expect(50, "HATCH 圆弧边起始角")?, "HATCH 圆弧边起始角")?;
            let end = parse_f64(cursor.expect(51, "HATCH 圆弧边终止角")?, "HATCH 圆弧边终止角")?;
            let ccw = cursor
                .take_if(73)
                .map(|raw| parse_i32(raw, "HATCH 圆弧边方向"))
                .transpose()?
                .unwrap_or(1);
            Ok(LoopObject::Arc {
                center,
                radius,
                start_angle: start.to_radians(),
                end_angle: end.to_radians(),
                counter_clockwise: ccw != 0,
            })
        }
        3 => {
            let center = point(10, "HATCH 椭圆边中心")?;
            let major = point(11, "HATCH 椭圆边主轴")?;
            let ratio = parse_f64(cursor.expect(40, "HATCH 椭圆边轴比")?, "HATCH 椭圆边轴比")?;
            let start = parse_f64(cursor.expect(50, "HATCH 椭圆边起始角")?, "HATCH 椭圆边起始角")?;
            let end = parse_f64(cursor.expect(51, "HATCH 椭圆边终止角")?, "HATCH 椭圆边终止角")?;
            let ccw = cursor
                .take_if(73)
                .map(|raw| parse_i32(raw, "HATCH 椭圆边方向"))
                .transpose()?
                .unwrap_or(1);
            Ok(LoopObject::Ellipse {
                center,
                major_axis: Vector3::from(major.as_vec3()),
                ratio,
                start_param: start.to_radians(),
                end_param: end.to_radians(),
                counter_clockwise: ccw != 0,
            })
        }
        4 => {
            let mut spline = empty_spline();
            spline.degree = parse_i32(cursor.expect(94, "HATCH 样条边次数")?, "HATCH 样条边次数")?;
            let rational = cursor
                .take_if(73)
                .map(|raw| parse_i32(raw, "HATCH 样条边有理标志"))
                .transpose()?
                .unwrap_or(0)
                != 0;
            let periodic = cursor
                .take_if(74)
                .map(|raw| parse_i32(raw, "HATCH 样条边周期标志"))
                .transpose()?
                .unwrap_or(0)
                != 0;
            spline.flags = (if rational { 0x04 } else { 0 }) | (if periodic { 0x02 } else { 0 });
            let knot_count =
                parse_count(cursor.expect(95, "HATCH 样条边节点数")?, "HATCH 样条边节点数")?;
            let control_count =
                parse_count(cursor.expect(96, "HATCH 样条边控制点数")?, "HATCH 样条边控制点数")?;
            for _ in 0..knot_count {
                spline
                    .knots
                    .push(parse_f64(cursor.expect(40, "HATCH 样条边节点")?, "HATCH 样条边节点")?);
            }
            for _ in 0..control_count {
                let x = parse_f64(cursor.expect(10, "HATCH 样条边控制点")?, "HATCH 样条边控制点")?;
                let y = parse_f64(cursor.expect(20, "HATCH 样条边控制点")?, "HATCH 样条边控制点")?;
                spline.control_points.push(Point3::new(x, y, 0.0));
                if let Some(raw) = cursor.take_if(42) {
                    spline.weights.push(parse_f64(raw, "HATCH 样条边权重")?);
                }
            }
            if let Some(raw) = cursor.take_if(97) {
                let fit_count = parse_count(raw, "HATCH 样条边拟合点数")?;
                for _ in 0..fit_count {
                    let x = parse_f64(cursor.expect(11, "HATCH 样条边拟合点")?, "HATCH 样条边拟合点")?;
                    let y = parse_f64(cursor.expect(21, "HATCH 样条边拟合点")?, "HATCH 样条边拟合点")?;
                    spline.fit_points.push(Point3::new(x, y, 0.0));
                }
            }
            for code in [12, 22, 13, 23] {
                cursor.take_if(code);
            }
            Ok(LoopObject::Spline(spline))
        }
        other => Err(DxfError::invalid(format!("HATCH 未知的边类型 {other}"))),
    }
}

/// 坐标型头部变量在下一个组码 9 或 ENDSEC 时才完整。
fn flush_header_coord(
    name: Option<String>,
    coord: &mut CoordSlot,
    variables: &mut BTreeMap<String, HeaderValue>,
) {
    if let Some(name) = name {
        if coord.is_set() {
            variables.insert(name, HeaderValue::Coord(coord.or_origin()));
        }
    }
    *coord = CoordSlot::default();
}

fn empty_spline() -> SplineEntity {
    SplineEntity {
        degree: 3,
        flags: 0,
        knots: Vec::new(),
        weights: Vec::new(),
        control_points: Vec::new(),
        fit_points: Vec::new(),
        tolerance_knot: 0.0,
        tolerance_control: 0.0,
        tolerance_fit: 0.0,
    }
}

/// 实体公共组码的累积器。
#[derive(Default)]
struct CommonBuilder {
    handle: Option<Handle>,
    common: EntityCommon,
}

impl CommonBuilder {
    fn apply(&mut self, code: i32, value: &str, kind: &str) -> Result<(), DxfError> {
        let common = &mut self.common;
        match code {
            5 => {
                self.handle = Some(Handle::parse_hex(value).ok_or_else(|| {
                    DxfError::invalid(format!("{kind} 句柄 \"{value}\" 不是十六进制"))
                })?);
            }
            67 => {
                common.space = if parse_i32(value, kind)? == 1 {
                    Space::Paper
                } else {
                    Space::Model
                };
            }
            8 => common.layer = value.trim().to_string(),
            6 => common.linetype = value.trim().to_string(),
            62 => common.color = parse_i32(value, &format!("{kind} 颜色"))?,
            420 => common.color24 = parse_i32(value, &format!("{kind} 真彩色"))?,
            440 => {
                common.transparency =
                    transparency_from_dxf(parse_i32(value, &format!("{kind} 透明度"))?)
            }
            370 => {
                common.lineweight =
                    lineweight_code_from_dxf(parse_i32(value, &format!("{kind} 线宽"))?)
            }
            48 => common.linetype_scale = parse_f64(value, &format!("{kind} 线型比例"))?,
            60 => common.visible = parse_i32(value, &format!("{kind} 可见性"))? == 0,
            _ => {}
        }
        Ok(())
    }
}

#[derive(Default)]
struct VertexDraft {
    x: f64,
    y: f64,
    bulge: f64,
    start_width: Option<f64>,
    end_width: Option<f64>,
}

impl VertexDraft {
    fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            ..Self::default()
        }
    }

    fn finish(self, elevation: f64, constant_width: f64) -> PolylineVertex {
        PolylineVertex::new(Point3::new(self.x, self.y, elevation))
            .with_bulge(self.bulge)
            .with_widths(
                self.start_width.unwrap_or(constant_width),
                self.end_width.unwrap_or(constant_width),
            )
    }
}

/// 一个坐标点的 X/Y/Z 组码槽位。
#[derive(Debug, Default, Clone, Copy)]
struct CoordSlot {
    x: Option<f64>,
    y: Option<f64>,
    z: Option<f64>,
}

impl CoordSlot {
    /// `base` 为该点 X 的组码（10、11、210 …），Y/Z 依次加 10/20。
    fn assign(&mut self, code: i32, base: i32, raw: &str, context: &str) -> Result<(), DxfError> {
        let slot = match code - base {
            0 => &mut self.x,
            10 => &mut self.y,
            20 => &mut self.z,
            _ => return Err(DxfError::invalid(format!("{context} 组码 {code} 不属于该点"))),
        };
        assign_coord(slot, raw, context)
    }

    /// 按组码十位判断轴，用于 HEADER 中的坐标变量。
    fn assign_any(&mut self, code: i32, raw: &str, context: &str) -> Result<(), DxfError> {
        let slot = match code / 10 {
            1 => &mut self.x,
            2 => &mut self.y,
            _ => &mut self.z,
        };
        *slot = Some(parse_f64(raw, context)?);
        Ok(())
    }

    fn is_set(&self) -> bool {
        self.x.is_some() || self.y.is_some() || self.z.is_some()
    }

    fn require(&self, context: &str) -> Result<Point3, DxfError> {
        let x = self
            .x
            .ok_or_else(|| DxfError::invalid(format!("{context} 缺少 X 坐标")))?;
        let y = self
            .y
            .ok_or_else(|| DxfError::invalid(format!("{context} 缺少 Y 坐标")))?;
        Ok(Point3::new(x, y, self.z.unwrap_or(0.0)))
    }

    fn or_origin(&self) -> Point3 {
        Point3::new(
            self.x.unwrap_or(0.0),
            self.y.unwrap_or(0.0),
            self.z.unwrap_or(0.0),
        )
    }

    /// 拉伸方向，未给出时为 (0, 0, 1)。
    fn direction(&self) -> Vector3 {
        if self.is_set() {
            Vector3::new(
                self.x.unwrap_or(0.0),
                self.y.unwrap_or(0.0),
                self.z.unwrap_or(1.0),
            )
        } else {
            Vector3::unit_z()
        }
    }
}

/// 按 X、Y、Z 顺序重复出现的点列（SPLINE 控制点与拟合点）。
#[derive(Default)]
struct PointList {
    points: Vec<Point3>,
    pending: Option<(f64, Option<f64>)>,
}

impl PointList {
    /// `axis` 为 0/10/20，分别对应 X/Y/Z。
    fn accept(&mut self, axis: i32, raw: &str, context: &str) -> Result<(), DxfError> {
        let value = parse_f64(raw, context)?;
        match (axis, self.pending.take()) {
            (0, pending) => {
                if let Some((x, y)) = pending {
                    self.push(x, y, 0.0, context)?;
                }
                self.pending = Some((value, None));
            }
            (10, Some((x, None))) => self.pending = Some((x, Some(value))),
            (20, Some((x, Some(y)))) => self.points.push(Point3::new(x, y, value)),
            _ => {
                return Err(DxfError::invalid(format!("{context} 坐标组码顺序错误")));
            }
        }
        Ok(())
    }

    fn push(&mut self, x: f64, y: Option<f64>, z: f64, context: &str) -> Result<(), DxfError> {
        let y = y.ok_or_else(|| DxfError::invalid(format!("{context} 缺少 Y 坐标")))?;
        self.points.push(Point3::new(x, y, z));
        Ok(())
    }

    fn finish(mut self, context: &str) -> Result<Vec<Point3>, DxfError> {
        if let Some((x, y)) = self.pending.take() {
            self.push(x, y, 0.0, context)?;
        }
        Ok(self.points)
    }
}

/// 对已收集组码对的顺序游标。
struct PairCursor<'p> {
    pairs: &'p [(i32, String)],
    position: usize,
}

impl<'p> PairCursor<'p> {
    fn new(pairs: &'p [(i32, String)]) -> Self {
        Self { pairs, position: 0 }
    }

    fn peek_code(&self) -> Option<i32> {
        self.pairs.get(self.position).map(|(code, _)| *code)
    }

    fn advance(&mut self) -> Option<(i32, &'p str)> {
        let (code, value) = self.pairs.get(self.position)?;
        self.position += 1;
        Some((*code, value.as_str()))
    }

    fn take_if(&mut self, code: i32) -> Option<&'p str> {
        if self.peek_code() == Some(code) {
            self.advance().map(|(_, value)| value)
        } else {
            None
        }
    }

    fn expect(&mut self, code: i32, context: &str) -> Result<&'p str, DxfError> {
        match self.advance() {
            Some((found, value)) if found == code => Ok(value),
            Some((found, _)) => Err(DxfError::invalid(format!(
                "{context}：期望组码 {code}，实际为 {found}"
            ))),
            None => Err(DxfError::invalid(format!(
                "{context}：缺少组码 {code}"
            ))),
        }
    }
}

enum HeaderValueKind {
    Text,
    Integer,
    Real,
}

fn header_value_kind(code: i32) -> HeaderValueKind {
    match code {
        40..=59 | 140..=149 | 1010..=1059 => HeaderValueKind::Real,
        60..=99 | 170..=179 | 270..=289 | 370..=389 | 1060..=1071 => HeaderValueKind::Integer,
        _ => HeaderValueKind::Text,
    }
}

struct DxfReader<'a> {
    lines: std::str::Lines<'a>,
    buffer: Option<(i32, String)>,
    line_number: usize,
    /// 组码 999 的注释，交给头部回调。
    comments: Vec<String>,
}

impl<'a> DxfReader<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            lines: source.lines(),
            buffer: None,
            line_number: 0,
            comments: Vec::new(),
        }
    }

    fn next_pair(&mut self) -> Result<Option<(i32, String)>, DxfError> {
        if let Some(pair) = self.buffer.take() {
            return Ok(Some(pair));
        }

        loop {
            let code_line = match self.lines.next() {
                Some(line) => {
                    self.line_number += 1;
                    line
                }
                None => return Ok(None),
            };
            if code_line.trim().is_empty() && self.line_number > 1 {
                // 文件末尾的空行
                if self.lines.clone().all(|line| line.trim().is_empty()) {
                    return Ok(None);
                }
            }

            let value_line = match self.lines.next() {
                Some(line) => {
                    self.line_number += 1;
                    line
                }
                None => {
                    return Err(DxfError::invalid(format!(
                        "文件在第 {} 行结束，缺少与组码对应的值行",
                        self.line_number
                    )));
                }
            };

            let code = code_line.trim().parse::<i32>().map_err(|_| {
                DxfError::invalid(format!(
                    "第 {} 行的组码 \"{}\" 无法解析为整数",
                    self.line_number - 1,
                    code_line.trim()
                ))
            })?;
            let value = value_line.trim_end_matches('\r').to_string();
            if code == 999 {
                self.comments.push(value);
                continue;
            }
            return Ok(Some((code, value)));
        }
    }

    fn put_back(&mut self, pair: (i32, String)) {
        debug_assert!(self.buffer.is_none(), "内部错误：尝试多次回退 DXF pair");
        self.buffer = Some(pair);
    }
}

fn assign_coord(slot: &mut Option<f64>, raw: &str, context: &str) -> Result<(), DxfError> {
    if slot.is_some() {
        return Err(DxfError::invalid(format!("{context} 出现重复值")));
    }
    *slot = Some(parse_f64(raw, context)?);
    Ok(())
}

fn parse_f64(raw: &str, context: &str) -> Result<f64, DxfError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))
}

fn parse_i32(raw: &str, context: &str) -> Result<i32, DxfError> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))
}

fn parse_count(raw: &str, context: &str) -> Result<usize, DxfError> {
    let value = parse_i32(raw, context)?;
    usize::try_from(value)
        .map_err(|_| DxfError::invalid(format!("{context} 不能为负（值：{value}）")))
}

fn decode_mtext_content(raw: &str) -> String {
    let mut result = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('P') | Some('p') => result.push('\n'),
                Some('~') => result.push(' '),
                Some('\\') => result.push('\\'),
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => result.push('\\'),
            }
        } else {
            result.push(ch);
        }
    }
    result
}

/// TEXT 中的 `%%d`、`%%c`、`%%p` 控制码。
fn decode_inline_text(raw: &str) -> String {
    raw.replace("%%d", "°")
        .replace("%%D", "°")
        .replace("%%c", "⌀")
        .replace("%%C", "⌀")
        .replace("%%p", "±")
        .replace("%%P", "±")
}
