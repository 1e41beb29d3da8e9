//! 把带 bulge 与宽度的顶点序列拆分为等宽复合曲线与变宽填充多边形。

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::drawing::PolylineVertex;
use crate::geometry::{
    CircularArc, CompoundCurve, CurvePolygon, CurveSegment, LineString, POINT_TOLERANCE, Point3,
};
use crate::tessellate::arc_from_bulge;

/// 宽度比较容差。
pub const WIDTH_TOLERANCE: f64 = 1e-9;

/// 一段等宽的复合曲线，对应一条 polylines 记录。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidthCurve {
    pub width: f64,
    pub curve: CompoundCurve,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompoundOutput {
    pub curves: Vec<WidthCurve>,
    /// 起止宽度不同的线段，各自成为一个填充多边形。
    pub tapers: Vec<CurvePolygon>,
}

impl CompoundOutput {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.curves.is_empty() && self.tapers.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    Tapered { start_width: f64, end_width: f64 },
    Constant { width: f64 },
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    start: Point3,
    end: Point3,
    arc: Option<CircularArc>,
    shape: Shape,
}

impl Segment {
    fn new(from: &PolylineVertex, to: &PolylineVertex) -> Self {
        let shape = if (from.start_width - from.end_width).abs() > WIDTH_TOLERANCE {
            Shape::Tapered {
                start_width: from.start_width,
                end_width: from.end_width,
            }
        } else {
            Shape::Constant {
                width: from.start_width,
            }
        };
        Self {
            start: from.position,
            end: to.position,
            arc: arc_from_bulge(from.position, to.position, from.bulge),
            shape,
        }
    }

    #[inline]
    fn is_curved(&self) -> bool {
        self.arc.is_some()
    }
}

/// 相邻两段之间的分界强度：2 结束记录，1 结束子曲线，0 同一段直线串。
fn boundary_rank(prev: &Segment, current: &Segment) -> u8 {
    match (prev.shape, current.shape) {
        (Shape::Tapered { .. }, _) | (_, Shape::Tapered { .. }) => 2,
        (Shape::Constant { width: a }, Shape::Constant { width: b })
            if (a - b).abs() > WIDTH_TOLERANCE =>
        {
            2
        }
        _ if prev.is_curved() || current.is_curved() => 1,
        _ => 0,
    }
}

#[derive(Default)]
struct RecordBuilder {
    width: Option<f64>,
    curve: CompoundCurve,
    run: Vec<Point3>,
}

impl RecordBuilder {
    fn flush_run(&mut self) {
        if self.run.len() >= 2 {
            let points = std::mem::take(&mut self.run);
            self.curve.push(CurveSegment::Line(LineString::new(points)));
        } else {
            self.run.clear();
        }
    }

    fn push_line(&mut self, start: Point3, end: Point3) {
        if self.run.is_empty() {
            self.run.push(start);
        }
        self.run.push(end);
    }

    fn push_arc(&mut self, arc: CircularArc) {
        self.flush_run();
        self.curve.push(CurveSegment::Arc(arc));
    }

    fn finish(&mut self, output: &mut CompoundOutput) {
        self.flush_run();
        let curve = std::mem::take(&mut self.curve);
        if let Some(width) = self.width.take() {
            if !curve.is_empty() {
                output.curves.push(WidthCurve { width, curve });
            }
        }
    }
}

/// 按宽度与曲直拆分顶点序列。
///
/// 等宽且曲直相同的相邻线段累积为一个子曲线（每个 bulge 段单独成弧），宽度
/// 变化时结束当前记录，变宽线段单独输出为填充多边形。闭合输入从分界处起步，
/// 因此结果与顶点数组的起始位置无关。
pub fn build_compound(vertices: &[PolylineVertex], closed: bool) -> CompoundOutput {
    let mut output = CompoundOutput::default();
    let n = vertices.len();
    if n < 2 {
        return output;
    }

    let pair_count = if closed { n } else { n - 1 };
    let segments: Vec<Segment> = (0..pair_count)
        .map(|i| Segment::new(&vertices[i], &vertices[(i + 1) % n]))
        .filter(|segment| !segment.start.is_close(segment.end, POINT_TOLERANCE))
        .collect();
    if segments.is_empty() {
        return output;
    }

    let count = segments.len();
    let first = if closed {
        let mut best = (0u8, 0usize);
        for index in 0..count {
            let rank = boundary_rank(&segments[(index + count - 1) % count], &segments[index]);
            if rank > best.0 {
                best = (rank, index);
            }
        }
        best.1
    } else {
        0
    };

    let mut builder = RecordBuilder::default();
    for offset in 0..count {
        let segment = &segments[(first + offset) % count];
        match segment.shape {
            Shape::Tapered {
                start_width,
                end_width,
            } => {
                // 变宽段总是记录边界，两侧等宽也不会合并
                builder.finish(&mut output);
                output
                    .tapers
                    .push(taper_polygon(segment, start_width, end_width));
            }
            Shape::Constant { width } => {
                if let Some(current) = builder.width {
                    if (current - width).abs() > WIDTH_TOLERANCE {
                        builder.finish(&mut output);
                    }
                }
                builder.width = Some(width);
                match segment.arc {
                    Some(arc) => builder.push_arc(arc),
                    None => builder.push_line(segment.start, segment.end),
                }
            }
        }
    }
    builder.finish(&mut output);
    output
}

/// 变宽线段的轮廓：直线段为四边形，圆弧段沿弧线两侧按线性插值宽度偏移。
fn taper_polygon(segment: &Segment, start_width: f64, end_width: f64) -> CurvePolygon {
    let (start, end) = (segment.start, segment.end);
    let Some(arc) = segment.arc else {
        let dx = end.x() - start.x();
        let dy = end.y() - start.y();
        let length = (dx * dx + dy * dy).sqrt();
        let (nx, ny) = (-dy / length, dx / length);
        let offset = |point: Point3, distance: f64| {
            Point3::new(point.x() + nx * distance, point.y() + ny * distance, point.z())
        };
        return CurvePolygon::from_ring(vec![
            offset(start, start_width * 0.5),
            offset(end, end_width * 0.5),
            offset(end, -end_width * 0.5),
            offset(start, -start_width * 0.5),
        ]);
    };

    let (Some(center), Some(sweep)) = (arc.center(), arc.included_angle()) else {
        return CurvePolygon::from_ring(vec![start, end]);
    };
    let radius = center.distance_2d(start);
    let start_angle = (start.y() - center.y()).atan2(start.x() - center.x());
    let steps = ((sweep.abs() / (PI / 16.0)).ceil() as usize).max(4);
    let mut outer = Vec::with_capacity(steps + 1);
    let mut inner = Vec::with_capacity(steps + 1);
    for step in 0..=steps {
        let t = step as f64 / steps as f64;
        let angle = start_angle + sweep * t;
        let half = (start_width + (end_width - start_width) * t) * 0.5;
        let z = start.z() + (end.z() - start.z()) * t;
        let (sin, cos) = angle.sin_cos();
        outer.push(Point3::new(
            center.x() + (radius + half) * cos,
            center.y() + (radius + half) * sin,
            z,
        ));
        inner.push(Point3::new(
            center.x() + (radius - half).max(0.0) * cos,
            center.y() + (radius - half).max(0.0) * sin,
            z,
        ));
    }
    inner.reverse();
    outer.extend(inner);
    CurvePolygon::from_ring(outer)
}
