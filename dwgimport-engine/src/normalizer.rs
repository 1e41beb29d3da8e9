//! 实体规范化：把解析器回调的图纸数据写成统一属性的几何记录。

use glam::{DAffine3, DVec3};
use tracing::{debug, info, warn};

use dwgimport_core::compound::{CompoundOutput, build_compound};
use dwgimport_core::drawing::{
    ArcEntity, Block, CircleEntity, DimStyle, DrawingReceiver, EllipseEntity, Entity, EntityKind,
    Handle, HatchEntity, HatchLoop, Header, InsertEntity, Layer, LineEntity, LineType, LoopObject,
    MTextEntity, PointEntity, PolylineEntity, PolylineVertex, SolidEntity, SplineEntity, TextEntity,
    TextStyle,
};
use dwgimport_core::geometry::{
    CircularArc, CompoundCurve, CurvePolygon, CurveSegment, Geometry, LineString, Point3, Vector3,
};
use dwgimport_core::tessellate::{
    DEFAULT_SPLINE_SEGMENTS, arc_from_center, evaluate_nurbs, sample_ellipse, stroke_quadratic,
};
use dwgimport_core::wkb;

use crate::schema::{
    BLOCKS, DIMSTYLES, HATCHES, HEADERS, INSERTS, LAYERS, LINES, LINETYPES, POINTS, POLYLINES,
    TEXTS, TEXTSTYLES, TOP_LEVEL,
};
use crate::session::{ImportOptions, ImportStats};
use crate::store::{Feature, FeatureStore};
use crate::style::{Diagnostics, StyleCache};

/// 多段线标志：三维多边形网格。
const POLYLINE_MESH: i32 = 16;
/// 多段线标志：多面网格。
const POLYLINE_POLYFACE: i32 = 64;

/// 一次导入的实体接收端。持有会话内的样式缓存与诊断集合，按文档顺序写入存储。
pub struct ImportSession<'s> {
    store: &'s mut dyn FeatureStore,
    options: ImportOptions,
    styles: StyleCache,
    diagnostics: Diagnostics,
    current_block: Option<Handle>,
    spline_segments: usize,
    comments: Vec<String>,
    stats: ImportStats,
}

/// 规范化结束后交还给会话控制器的状态。
#[derive(Debug)]
pub struct NormalizedDrawing {
    pub stats: ImportStats,
    pub diagnostics: Diagnostics,
    pub comments: Vec<String>,
}

impl<'s> ImportSession<'s> {
    pub fn new(store: &'s mut dyn FeatureStore, options: ImportOptions) -> Self {
        let spline_segments = options.spline_segments.unwrap_or(DEFAULT_SPLINE_SEGMENTS);
        Self {
            store,
            options,
            styles: StyleCache::new(),
            diagnostics: Diagnostics::new(),
            current_block: None,
            spline_segments,
            comments: Vec::new(),
            stats: ImportStats::default(),
        }
    }

    pub fn stats(&self) -> &ImportStats {
        &self.stats
    }

    pub fn spline_segments(&self) -> usize {
        self.spline_segments
    }

    pub fn finish(self) -> NormalizedDrawing {
        if let Some(handle) = self.current_block {
            warn!(block = %handle, "文档结束时块定义仍未关闭");
        }
        NormalizedDrawing {
            stats: self.stats,
            diagnostics: self.diagnostics,
            comments: self.comments,
        }
    }

    fn write(&mut self, table: &str, handle: Handle, feature: Feature) {
        match self.store.create_feature(table, feature) {
            Ok(id) => {
                self.stats.written += 1;
                debug!(table, handle = %handle, id, "写入记录");
            }
            Err(err) => {
                self.stats.skipped += 1;
                warn!(table, handle = %handle, error = %err, "写入记录失败，已跳过");
            }
        }
    }

    fn write_row(&mut self, table: &str, feature: Feature) {
        match self.store.create_feature(table, feature) {
            Ok(_) => self.stats.written += 1,
            Err(err) => {
                self.stats.skipped += 1;
                warn!(table, error = %err, "写入表记录失败，已跳过");
            }
        }
    }

    fn unsupported(&mut self, class: &str, message: &str) {
        self.stats.unsupported += 1;
        self.diagnostics.warn_once(class, message);
    }

    /// 所有实体记录共有的属性，先于类型相关字段写入。
    fn common_feature(&mut self, entity: &Entity) -> Feature {
        let common = &entity.common;
        let color = self.styles.resolve_color(
            common.color,
            common.color24,
            common.transparency,
            &common.layer,
            &mut self.diagnostics,
        );
        let width = self
            .styles
            .resolve_width(common.lineweight, &common.layer, &mut self.diagnostics);
        let linetype = self.styles.resolve_linetype(&common.linetype, &common.layer);
        Feature::new()
            .with("handle", common.handle.as_i64())
            .with("block", self.current_block.map_or(TOP_LEVEL, Handle::as_i64))
            .with("etype", entity.type_name())
            .with("space", common.space.code())
            .with("layer", common.layer.as_str())
            .with("olinetype", common.linetype.as_str())
            .with("linetype", linetype)
            .with("color", color.to_field_string())
            .with("ocolor", common.color)
            .with("color24", common.color24)
            .with("transparency", common.transparency)
            .with("lweight", common.lineweight)
            .with("linewidth", width)
            .with("ltscale", common.linetype_scale)
            .with("visible", common.visible)
    }

    fn add_point(&mut self, entity: &Entity, point: &PointEntity) {
        let feature = with_extrusion(self.common_feature(entity), point.thickness, point.extrusion)
            .with_geometry(wkb::encode(&Geometry::Point(point.position)));
        self.write(POINTS, entity.common.handle, feature);
    }

    fn add_line(&mut self, entity: &Entity, line: &LineEntity) {
        let geometry = Geometry::LineString(LineString::new(vec![line.start, line.end]));
        let feature = with_extrusion(self.common_feature(entity), line.thickness, line.extrusion)
            .with_geometry(wkb::encode(&geometry));
        self.write(LINES, entity.common.handle, feature);
    }

    fn add_circle(&mut self, entity: &Entity, circle: &CircleEntity) {
        let arcs = arc_from_center(circle.center, circle.radius, 0.0, 0.0);
        self.write_arcs(entity, arcs, circle.thickness, circle.extrusion);
    }

    fn add_arc(&mut self, entity: &Entity, arc: &ArcEntity) {
        let arcs = arc_from_center(arc.center, arc.radius, arc.start_angle, arc.end_angle);
        self.write_arcs(entity, arcs, arc.thickness, arc.extrusion);
    }

    fn write_arcs(
        &mut self,
        entity: &Entity,
        arcs: Vec<CircularArc>,
        thickness: f64,
        extrusion: Vector3,
    ) {
        if arcs.is_empty() {
            self.diagnostics
                .warn_once("degenerate-arc", "半径无效的圆或圆弧已跳过");
            self.stats.skipped += 1;
            return;
        }
        let curve = CompoundCurve::from_segments(arcs.into_iter().map(CurveSegment::Arc).collect());
        let feature = with_extrusion(self.common_feature(entity), thickness, extrusion)
            .with("width", 0.0)
            .with_geometry(wkb::encode(&Geometry::CompoundCurve(curve)));
        self.write(POLYLINES, entity.common.handle, feature);
    }

    fn add_ellipse(&mut self, entity: &Entity, ellipse: &EllipseEntity) {
        let (vertices, full) = sample_ellipse(ellipse, self.options.ellipse_segments);
        let output = build_compound(&vertices, full);
        self.write_compound(entity, output, 0.0, ellipse.extrusion);
    }

    fn add_polyline(&mut self, entity: &Entity, polyline: &PolylineEntity) {
        if polyline.flags & (POLYLINE_MESH | POLYLINE_POLYFACE) != 0 {
            self.unsupported("POLYLINE-mesh", "网格或多面网格多段线暂不支持，已忽略");
            return;
        }
        let output = build_compound(&polyline.vertices, polyline.is_closed());
        self.write_compound(entity, output, polyline.thickness, polyline.extrusion);
    }

    fn add_spline(&mut self, entity: &Entity, spline: &SplineEntity) {
        let Some(points) = self.spline_points(spline) else {
            self.diagnostics
                .warn_once("degenerate-spline", "样条控制点或次数无效，已跳过");
            self.stats.skipped += 1;
            return;
        };
        let mut curve =
            CompoundCurve::from_segments(vec![CurveSegment::Line(LineString::new(points))]);
        if spline.is_closed() {
            curve.close_with_line();
        }
        let feature = with_extrusion(self.common_feature(entity), 0.0, Vector3::unit_z())
            .with("width", 0.0)
            .with_geometry(wkb::encode(&Geometry::CompoundCurve(curve)));
        self.write(POLYLINES, entity.common.handle, feature);
    }

    /// 非有理二次样条走中点描点，其余按有理 B 样条求值；控制点不足时退回拟合点。
    fn spline_points(&self, spline: &SplineEntity) -> Option<Vec<Point3>> {
        let points = if spline.degree == 2 && !spline.is_rational() {
            Some(stroke_quadratic(
                &spline.control_points,
                spline.is_closed(),
                self.spline_segments,
            ))
        } else {
            evaluate_nurbs(spline, self.spline_segments)
        };
        points
            .filter(|points| points.len() >= 2)
            .or_else(|| (spline.fit_points.len() >= 2).then(|| spline.fit_points.clone()))
    }

    /// 等宽段写入 polylines，变宽段写入 hatches。
    fn write_compound(
        &mut self,
        entity: &Entity,
        output: CompoundOutput,
        thickness: f64,
        extrusion: Vector3,
    ) {
        if output.is_empty() {
            self.diagnostics
                .warn_once("empty-polyline", "多段线没有可用的顶点，已跳过");
            self.stats.skipped += 1;
            return;
        }
        for piece in output.curves {
            let feature = with_extrusion(self.common_feature(entity), thickness, extrusion)
                .with("width", piece.width)
                .with_geometry(wkb::encode(&Geometry::CompoundCurve(piece.curve)));
            self.write(POLYLINES, entity.common.handle, feature);
        }
        for polygon in output.tapers {
            let elevation = polygon.exterior.start().map_or(0.0, Point3::z);
            let feature = solid_fill(self.common_feature(entity), elevation)
                .with_geometry(wkb::encode(&Geometry::CurvePolygon(polygon)));
            self.write(HATCHES, entity.common.handle, feature);
        }
    }

    fn add_solid(&mut self, entity: &Entity, solid: &SolidEntity) {
        let [first, second, third, fourth] = solid.corners;
        // DXF 角点顺序为 Z 字形，第 3、4 点需交换才能构成环
        let mut ring = vec![first, second, fourth, third];
        ring.dedup_by(|a, b| a.is_close(*b, 1e-9));
        if ring.len() < 3 {
            self.diagnostics
                .warn_once("degenerate-solid", "退化的 SOLID 实体已跳过");
            self.stats.skipped += 1;
            return;
        }
        let polygon = CurvePolygon::from_ring(ring);
        let feature = solid_fill(self.common_feature(entity), first.z())
            .with_geometry(wkb::encode(&Geometry::CurvePolygon(polygon)));
        self.write(HATCHES, entity.common.handle, feature);
    }

    fn add_text(&mut self, entity: &Entity, text: &TextEntity) {
        let aligned = text.horizontal_alignment != 0 || text.vertical_alignment != 0;
        let position = match text.alignment_point {
            Some(point) if aligned => point,
            _ => text.insertion,
        };
        let feature = with_extrusion(self.common_feature(entity), text.thickness, text.extrusion)
            .with("height", text.height)
            .with("text", text.text.as_str())
            .with("angle", text.rotation.to_degrees())
            .with("widthscale", text.width_scale)
            .with("oblique", text.oblique.to_degrees())
            .with("style", text.style.as_str())
            .with("halign", text.horizontal_alignment)
            .with("valign", text.vertical_alignment)
            .with_geometry(wkb::encode(&Geometry::Point(position)));
        self.write(TEXTS, entity.common.handle, feature);
    }

    fn add_mtext(&mut self, entity: &Entity, mtext: &MTextEntity) {
        // 附着点 1..=9 按行优先排列：列为水平对齐，行自上而下对应 3、2、1
        let attachment = mtext.attachment.clamp(1, 9) - 1;
        let feature = with_extrusion(self.common_feature(entity), 0.0, mtext.extrusion)
            .with("height", mtext.height)
            .with("text", mtext.text.as_str())
            .with("angle", mtext.rotation.to_degrees())
            .with("widthscale", 1.0)
            .with("oblique", 0.0)
            .with("style", mtext.style.as_str())
            .with("halign", attachment % 3)
            .with("valign", 3 - attachment / 3)
            .with_geometry(wkb::encode(&Geometry::Point(mtext.insertion)));
        self.write(TEXTS, entity.common.handle, feature);
    }

    fn add_insert(&mut self, entity: &Entity, insert: &InsertEntity) {
        let feature = self
            .common_feature(entity)
            .with("name", insert.block_name.as_str())
            .with("xscale", insert.x_scale)
            .with("yscale", insert.y_scale)
            .with("zscale", insert.z_scale)
            .with("angle", insert.rotation.to_degrees())
            .with("colcount", insert.column_count)
            .with("rowcount", insert.row_count)
            .with("colspacing", insert.column_spacing)
            .with("rowspacing", insert.row_spacing)
            .with("expanded", false)
            .with_geometry(wkb::encode(&Geometry::Point(insert.insertion)));
        self.write(INSERTS, entity.common.handle, feature);
    }

    fn add_hatch(&mut self, entity: &Entity, hatch: &HatchEntity) {
        assert_eq!(
            hatch.loops.len(),
            hatch.declared_loop_count,
            "HATCH {} 的边界环数量与声明不一致",
            entity.common.handle
        );
        let mut rings: Vec<CompoundCurve> = hatch
            .loops
            .iter()
            .map(|boundary| self.hatch_ring(boundary))
            .collect();
        // 第 0 环为外环，不能由孔洞顶替
        if rings.first().is_none_or(CompoundCurve::is_empty) {
            self.diagnostics
                .warn_once("empty-hatch", "HATCH 外环没有可用的边界，已跳过");
            self.stats.skipped += 1;
            return;
        }
        let mut polygon = CurvePolygon::new(rings.remove(0));
        rings.retain(|ring| !ring.is_empty());
        polygon.interiors = rings;
        if hatch.elevation != 0.0 {
            polygon = polygon.transform(&DAffine3::from_translation(DVec3::new(
                0.0,
                0.0,
                hatch.elevation,
            )));
        }
        let feature = self
            .common_feature(entity)
            .with("pattern", hatch.pattern_name.as_str())
            .with("solid", hatch.solid)
            .with("associative", hatch.associative)
            .with("style", hatch.style)
            .with("pangle", hatch.pattern_angle.to_degrees())
            .with("pscale", hatch.pattern_scale)
            .with("elevation", hatch.elevation)
            .with_geometry(wkb::encode(&Geometry::CurvePolygon(polygon)));
        self.write(HATCHES, entity.common.handle, feature);
    }

    /// 把一个边界环的各对象依次接成闭合复合曲线。
    fn hatch_ring(&self, boundary: &HatchLoop) -> CompoundCurve {
        let mut ring = CompoundCurve::new();
        for object in &boundary.objects {
            match object {
                LoopObject::Line { start, end } => push_line(&mut ring, vec![*start, *end]),
                LoopObject::Arc {
                    center,
                    radius,
                    start_angle,
                    end_angle,
                    counter_clockwise,
                } => {
                    if *counter_clockwise {
                        let arcs = arc_from_center(*center, *radius, *start_angle, *end_angle);
                        ring.segments.extend(arcs.into_iter().map(CurveSegment::Arc));
                    } else {
                        // 顺时针边的角度按镜像记录
                        let arcs = arc_from_center(*center, *radius, -*end_angle, -*start_angle);
                        ring.segments.extend(
                            arcs.iter()
                                .rev()
                                .map(|arc| CurveSegment::Arc(arc.reversed())),
                        );
                    }
                }
                LoopObject::Ellipse {
                    center,
                    major_axis,
                    ratio,
                    start_param,
                    end_param,
                    counter_clockwise,
                } => {
                    let (start_param, end_param) = if *counter_clockwise {
                        (*start_param, *end_param)
                    } else {
                        (-*end_param, -*start_param)
                    };
                    let ellipse = EllipseEntity {
                        center: *center,
                        major_axis: *major_axis,
                        ratio: *ratio,
                        start_param,
                        end_param,
                        extrusion: Vector3::unit_z(),
                    };
                    let (vertices, full) = sample_ellipse(&ellipse, self.options.ellipse_segments);
                    let mut points: Vec<Point3> =
                        vertices.iter().map(|vertex| vertex.position).collect();
                    if full {
                        if let Some(first) = points.first().copied() {
                            points.push(first);
                        }
                    }
                    if !*counter_clockwise {
                        points.reverse();
                    }
                    push_line(&mut ring, points);
                }
                LoopObject::Spline(spline) => {
                    if let Some(points) = self.spline_points(spline) {
                        push_line(&mut ring, points);
                    }
                }
                LoopObject::LwPolyline { vertices, closed } => {
                    // 边界只取几何，宽度一律忽略
                    let outline: Vec<PolylineVertex> = vertices
                        .iter()
                        .map(|vertex| PolylineVertex {
                            start_width: 0.0,
                            end_width: 0.0,
                            ..*vertex
                        })
                        .collect();
                    for piece in build_compound(&outline, *closed).curves {
                        ring.append(piece.curve);
                    }
                }
            }
        }
        ring.close_with_line();
        ring
    }
}

impl DrawingReceiver for ImportSession<'_> {
    fn add_header(&mut self, header: &Header) {
        if self.options.spline_segments.is_none() {
            if let Some(segments) = header.integer("$SPLINESEGS").filter(|value| *value > 0) {
                self.spline_segments = segments as usize;
            }
        }
        for (key, value) in &header.variables {
            let feature = Feature::new()
                .with("k", key.as_str())
                .with("v", value.to_string());
            self.write_row(HEADERS, feature);
        }
        self.comments.extend(header.comments.iter().cloned());
        info!(
            variables = header.variables.len(),
            spline_segments = self.spline_segments,
            "已写入图纸头部"
        );
    }

    fn add_linetype(&mut self, linetype: &LineType) {
        let pattern = linetype
            .pattern
            .iter()
            .map(|dash| dash.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let feature = Feature::new()
            .with("name", linetype.name.as_str())
            .with("desc", linetype.description.as_str())
            .with("len", linetype.pattern_length)
            .with("pattern", pattern);
        self.write_row(LINETYPES, feature);
    }

    fn add_layer(&mut self, layer: &Layer) {
        let (color, width) = self.styles.register_layer(layer, &mut self.diagnostics);
        let feature = Feature::new()
            .with("name", layer.name.as_str())
            .with("linetype", layer.linetype.as_str())
            .with("color", color.to_field_string())
            .with("ocolor", layer.color)
            .with("color24", layer.color24)
            .with("transparency", layer.transparency)
            .with("lweight", layer.lineweight)
            .with("linewidth", width)
            .with("flags", layer.flags);
        self.write_row(LAYERS, feature);
    }

    fn add_dim_style(&mut self, style: &DimStyle) {
        let feature = Feature::new()
            .with("name", style.name.as_str())
            .with("dimscale", style.scale)
            .with("dimasz", style.arrow_size)
            .with("dimtxt", style.text_height)
            .with("dimexo", style.extension_offset)
            .with("dimexe", style.extension_extend)
            .with("dimgap", style.text_gap)
            .with("dimdec", style.decimal_places)
            .with("dimpost", style.post_fix.as_str())
            .with("dimtxsty", style.text_style.as_str());
        self.write_row(DIMSTYLES, feature);
    }

    fn add_text_style(&mut self, style: &TextStyle) {
        let feature = Feature::new()
            .with("name", style.name.as_str())
            .with("height", style.height)
            .with("width", style.width)
            .with("oblique", style.oblique)
            .with("genflag", style.generation)
            .with("lastheight", style.last_height)
            .with("font", style.font.as_str())
            .with("bigfont", style.big_font.as_str())
            .with("flags", style.flags);
        self.write_row(TEXTSTYLES, feature);
    }

    fn begin_block(&mut self, block: &Block) {
        assert!(
            self.current_block.is_none(),
            "块 {} 在上一个块结束前开始",
            block.name
        );
        debug!(block = %block.name, handle = %block.handle, "开始块定义");
        let feature = Feature::new()
            .with("handle", block.handle.as_i64())
            .with("name", block.name.as_str())
            .with("flags", block.flags)
            .with_geometry(wkb::encode(&Geometry::Point(block.base)));
        self.write(BLOCKS, block.handle, feature);
        self.current_block = Some(block.handle);
    }

    fn end_block(&mut self) {
        assert!(self.current_block.is_some(), "没有打开的块定义");
        self.current_block = None;
    }

    fn add_entity(&mut self, entity: &Entity) {
        match &entity.kind {
            EntityKind::Point(point) => self.add_point(entity, point),
            EntityKind::Line(line) => self.add_line(entity, line),
            EntityKind::Circle(circle) => self.add_circle(entity, circle),
            EntityKind::Arc(arc) => self.add_arc(entity, arc),
            EntityKind::Ellipse(ellipse) => self.add_ellipse(entity, ellipse),
            EntityKind::LwPolyline(polyline) | EntityKind::Polyline(polyline) => {
                self.add_polyline(entity, polyline)
            }
            EntityKind::Spline(spline) => self.add_spline(entity, spline),
            EntityKind::Insert(insert) => self.add_insert(entity, insert),
            EntityKind::Solid(solid) => self.add_solid(entity, solid),
            EntityKind::Text(text) => self.add_text(entity, text),
            EntityKind::MText(mtext) => self.add_mtext(entity, mtext),
            EntityKind::Hatch(hatch) => self.add_hatch(entity, hatch),
            EntityKind::Ray
            | EntityKind::XLine
            | EntityKind::Trace(_)
            | EntityKind::Face3D
            | EntityKind::Viewport
            | EntityKind::Image
            | EntityKind::Leader
            | EntityKind::Dimension(_) => {
                let name = entity.type_name();
                self.unsupported(name, &format!("{name} 实体尚未实现，已忽略"));
            }
        }
    }
}

fn with_extrusion(feature: Feature, thickness: f64, extrusion: Vector3) -> Feature {
    let [x, y, z] = extrusion.to_array();
    feature
        .with("thickness", thickness)
        .with("extx", x)
        .with("exty", y)
        .with("extz", z)
}

fn solid_fill(feature: Feature, elevation: f64) -> Feature {
    feature
        .with("pattern", "SOLID")
        .with("solid", true)
        .with("associative", false)
        .with("style", 0)
        .with("pangle", 0.0)
        .with("pscale", 1.0)
        .with("elevation", elevation)
}

/// 追加直线点列，与末尾的直线子段首尾相接时直接延长。
fn push_line(ring: &mut CompoundCurve, points: Vec<Point3>) {
    if points.len() < 2 {
        return;
    }
    if let Some(CurveSegment::Line(last)) = ring.segments.last_mut() {
        if let (Some(end), Some(start)) = (last.end(), points.first().copied()) {
            if end.is_close(start, 1e-9) {
                last.points.extend(points.into_iter().skip(1));
                return;
            }
        }
    }
    ring.push(CurveSegment::Line(LineString::new(points)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use dwgimport_core::drawing::{EntityCommon, HeaderValue};

    use crate::schema::table_definitions;
    use crate::store::MemoryStore;

    fn fresh_store() -> MemoryStore {
        let mut store = MemoryStore::new();
        for definition in table_definitions() {
            store
                .create_table(definition, true)
                .expect("创建表应成功");
        }
        store
    }

    fn entity(handle: u64, kind: EntityKind) -> Entity {
        Entity::new(EntityCommon::new(Handle::new(handle)), kind)
    }

    fn geometry(store: &MemoryStore, table: &str) -> Vec<Geometry> {
        store
            .features(table)
            .expect("表应存在")
            .into_iter()
            .map(|row| {
                wkb::decode(row.feature.geometry.as_deref().expect("应带几何"))
                    .expect("几何应可解码")
            })
            .collect()
    }

    fn solid_hatch(loops: Vec<HatchLoop>) -> HatchEntity {
        HatchEntity {
            pattern_name: "SOLID".to_string(),
            solid: true,
            associative: false,
            style: 0,
            pattern_type: 1,
            pattern_angle: 0.0,
            pattern_scale: 1.0,
            elevation: 0.0,
            extrusion: Vector3::unit_z(),
            declared_loop_count: loops.len(),
            loops,
        }
    }

    fn square(size: f64) -> Vec<PolylineVertex> {
        vec![
            PolylineVertex::new(Point3::new(0.0, 0.0, 0.0)),
            PolylineVertex::new(Point3::new(size, 0.0, 0.0)),
            PolylineVertex::new(Point3::new(size, size, 0.0)),
            PolylineVertex::new(Point3::new(0.0, size, 0.0)),
        ]
    }

    #[test]
    fn block_members_carry_owner_handle() {
        let mut store = fresh_store();
        let mut session = ImportSession::new(&mut store, ImportOptions::default());
        session.begin_block(&Block {
            handle: Handle::new(0x20),
            name: "DOOR".to_string(),
            base: Point3::new(1.0, 1.0, 0.0),
            flags: 0,
        });
        session.add_entity(&entity(
            0x21,
            EntityKind::Point(PointEntity {
                position: Point3::new(0.0, 0.0, 0.0),
                thickness: 0.0,
                extrusion: Vector3::unit_z(),
            }),
        ));
        session.end_block();
        session.add_entity(&entity(
            0x22,
            EntityKind::Point(PointEntity {
                position: Point3::new(5.0, 5.0, 0.0),
                thickness: 0.0,
                extrusion: Vector3::unit_z(),
            }),
        ));
        let summary = session.finish();
        assert_eq!(summary.stats.written, 3);

        let points = store.features(POINTS).expect("points 表应存在");
        let owners: Vec<_> = points.iter().map(|row| row.feature.integer("block")).collect();
        assert_eq!(owners, vec![Some(0x20), Some(TOP_LEVEL)]);
        assert_eq!(store.row_count(BLOCKS), 1);
    }

    #[test]
    #[should_panic]
    fn nested_block_start_is_a_contract_violation() {
        let mut store = fresh_store();
        let mut session = ImportSession::new(&mut store, ImportOptions::default());
        let block = Block {
            handle: Handle::new(1),
            name: "A".to_string(),
            base: Point3::new(0.0, 0.0, 0.0),
            flags: 0,
        };
        session.begin_block(&block);
        session.begin_block(&block);
    }

    #[test]
    fn circle_becomes_two_semicircles() {
        let mut store = fresh_store();
        let mut session = ImportSession::new(&mut store, ImportOptions::default());
        session.add_entity(&entity(
            1,
            EntityKind::Circle(CircleEntity {
                center: Point3::new(0.0, 0.0, 0.0),
                radius: 2.0,
                thickness: 0.0,
                extrusion: Vector3::unit_z(),
            }),
        ));
        session.finish();
        let curves = geometry(&store, POLYLINES);
        let Geometry::CompoundCurve(curve) = &curves[0] else {
            panic!("应为复合曲线");
        };
        assert_eq!(curve.arc_count(), 2);
        assert!(curve.is_closed());
    }

    #[test]
    fn solid_corners_form_a_ring() {
        let mut store = fresh_store();
        let mut session = ImportSession::new(&mut store, ImportOptions::default());
        session.add_entity(&entity(
            2,
            EntityKind::Solid(SolidEntity {
                corners: [
                    Point3::new(0.0, 0.0, 0.0),
                    Point3::new(1.0, 0.0, 0.0),
                    Point3::new(0.0, 1.0, 0.0),
                    Point3::new(1.0, 1.0, 0.0),
                ],
                thickness: 0.0,
                extrusion: Vector3::unit_z(),
            }),
        ));
        session.finish();
        let polygons = geometry(&store, HATCHES);
        let Geometry::CurvePolygon(polygon) = &polygons[0] else {
            panic!("应为曲线多边形");
        };
        let CurveSegment::Line(ring) = &polygon.exterior.segments[0] else {
            panic!("外环应为直线串");
        };
        assert_eq!(ring.points.len(), 5);
        assert!(ring.points[2].is_close(Point3::new(1.0, 1.0, 0.0), 1e-12));
    }

    #[test]
    fn unsupported_kinds_are_counted_and_logged_once() {
        let mut store = fresh_store();
        let mut session = ImportSession::new(&mut store, ImportOptions::default());
        for handle in 0..3 {
            session.add_entity(&entity(handle, EntityKind::Ray));
        }
        session.add_entity(&entity(9, EntityKind::Leader));
        let summary = session.finish();
        assert_eq!(summary.stats.unsupported, 4);
        assert_eq!(summary.stats.written, 0);
        assert!(summary.diagnostics.contains("RAY"));
        assert_eq!(summary.diagnostics.len(), 2);
    }

    #[test]
    fn header_sets_spline_segments_unless_overridden() {
        let mut header = Header::default();
        header
            .variables
            .insert("$SPLINESEGS".to_string(), HeaderValue::Integer(12));
        header.comments.push("note".to_string());

        let mut store = fresh_store();
        let mut session = ImportSession::new(&mut store, ImportOptions::default());
        session.add_header(&header);
        assert_eq!(session.spline_segments(), 12);
        let summary = session.finish();
        assert_eq!(summary.comments, vec!["note".to_string()]);
        assert_eq!(store.row_count(HEADERS), 1);

        let mut store = fresh_store();
        let options = ImportOptions {
            spline_segments: Some(4),
            ..ImportOptions::default()
        };
        let mut session = ImportSession::new(&mut store, options);
        session.add_header(&header);
        assert_eq!(session.spline_segments(), 4);
    }

    #[test]
    fn mtext_attachment_maps_to_alignment_codes() {
        let mut store = fresh_store();
        let mut session = ImportSession::new(&mut store, ImportOptions::default());
        session.add_entity(&entity(
            3,
            EntityKind::MText(MTextEntity {
                insertion: Point3::new(0.0, 0.0, 0.0),
                height: 2.5,
                reference_width: 0.0,
                attachment: 6,
                drawing_direction: 1,
                text: "A".to_string(),
                style: "STANDARD".to_string(),
                rotation: std::f64::consts::FRAC_PI_2,
                line_spacing_factor: 1.0,
                extrusion: Vector3::unit_z(),
            }),
        ));
        session.finish();
        let rows = store.features(TEXTS).expect("texts 表应存在");
        let row = &rows[0].feature;
        assert_eq!(row.integer("halign"), Some(2));
        assert_eq!(row.integer("valign"), Some(2));
        assert!((row.real("angle").expect("应有角度") - 90.0).abs() < 1e-9);
    }

    #[test]
    fn hatch_with_polyline_loop_and_hole() {
        let hatch = solid_hatch(vec![
            HatchLoop {
                flags: 2,
                objects: vec![LoopObject::LwPolyline {
                    vertices: square(10.0),
                    closed: true,
                }],
            },
            HatchLoop {
                flags: 0,
                objects: vec![
                    LoopObject::Line {
                        start: Point3::new(2.0, 2.0, 0.0),
                        end: Point3::new(4.0, 2.0, 0.0),
                    },
                    LoopObject::Arc {
                        center: Point3::new(3.0, 2.0, 0.0),
                        radius: 1.0,
                        start_angle: 0.0,
                        end_angle: std::f64::consts::PI,
                        counter_clockwise: true,
                    },
                ],
            },
        ]);
        let mut store = fresh_store();
        let mut session = ImportSession::new(&mut store, ImportOptions::default());
        session.add_entity(&entity(4, EntityKind::Hatch(hatch)));
        session.finish();
        let polygons = geometry(&store, HATCHES);
        let Geometry::CurvePolygon(polygon) = &polygons[0] else {
            panic!("应为曲线多边形");
        };
        assert!(polygon.exterior.is_closed());
        assert_eq!(polygon.interiors.len(), 1);
        assert_eq!(polygon.interiors[0].arc_count(), 1);
        assert!(polygon.interiors[0].is_closed());
        assert!(polygon.interiors[0].is_continuous());
    }

    #[test]
    fn empty_exterior_loop_skips_the_hatch() {
        let empty_spline = SplineEntity {
            degree: 3,
            flags: 0,
            knots: Vec::new(),
            weights: Vec::new(),
            control_points: Vec::new(),
            fit_points: Vec::new(),
            tolerance_knot: 0.0,
            tolerance_control: 0.0,
            tolerance_fit: 0.0,
        };
        let hatch = solid_hatch(vec![
            HatchLoop {
                flags: 1,
                objects: vec![LoopObject::Spline(empty_spline)],
            },
            HatchLoop {
                flags: 0,
                objects: vec![LoopObject::LwPolyline {
                    vertices: square(2.0),
                    closed: true,
                }],
            },
        ]);
        let mut store = fresh_store();
        let mut session = ImportSession::new(&mut store, ImportOptions::default());
        session.add_entity(&entity(5, EntityKind::Hatch(hatch)));
        let summary = session.finish();
        assert_eq!(summary.stats.skipped, 1);
        assert!(summary.diagnostics.contains("empty-hatch"));
        assert_eq!(store.row_count(HATCHES), 0);
    }

    #[test]
    fn tapered_boundary_vertex_keeps_its_arc() {
        let mut vertices = square(10.0);
        vertices[1].bulge = 1.0;
        vertices[1].start_width = 1.0;
        vertices[1].end_width = 2.0;
        let hatch = solid_hatch(vec![HatchLoop {
            flags: 2,
            objects: vec![LoopObject::LwPolyline {
                vertices,
                closed: true,
            }],
        }]);
        let mut store = fresh_store();
        let mut session = ImportSession::new(&mut store, ImportOptions::default());
        session.add_entity(&entity(6, EntityKind::Hatch(hatch)));
        session.finish();
        let polygons = geometry(&store, HATCHES);
        assert_eq!(polygons.len(), 1);
        let Geometry::CurvePolygon(polygon) = &polygons[0] else {
            panic!("应为曲线多边形");
        };
        assert_eq!(polygon.exterior.arc_count(), 1);
        assert!(polygon.exterior.is_closed());
        assert!(polygon.exterior.is_continuous());
    }
}
