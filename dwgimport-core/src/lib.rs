pub mod compound;
pub mod drawing;
pub mod palette;
pub mod tessellate;
pub mod wkb;

pub mod geometry {
    use glam::{DAffine3, DVec3};
    use serde::{Deserialize, Serialize};
    use std::f64::consts::TAU;

    /// 判定两点重合使用的容差。
    pub const POINT_TOLERANCE: f64 = 1e-9;

    /// 三维点，内部以 `glam::DVec3` 表示。导入结果统一带 Z 值。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point3(pub DVec3);

    impl Point3 {
        #[inline]
        pub fn new(x: f64, y: f64, z: f64) -> Self {
            Self(DVec3::new(x, y, z))
        }

        #[inline]
        pub fn from_vec(vec: DVec3) -> Self {
            Self(vec)
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn z(self) -> f64 {
            self.0.z
        }

        #[inline]
        pub fn translate(self, offset: Vector3) -> Self {
            Self(self.0 + offset.0)
        }

        #[inline]
        pub fn vector_to(self, other: Point3) -> Vector3 {
            Vector3(other.0 - self.0)
        }

        #[inline]
        pub fn midpoint(self, other: Point3) -> Point3 {
            Self((self.0 + other.0) * 0.5)
        }

        #[inline]
        pub fn as_vec3(self) -> DVec3 {
            self.0
        }

        /// 忽略 Z 的平面距离。
        #[inline]
        pub fn distance_2d(self, other: Point3) -> f64 {
            let dx = other.x() - self.x();
            let dy = other.y() - self.y();
            (dx * dx + dy * dy).sqrt()
        }

        #[inline]
        pub fn is_close(self, other: Point3, tolerance: f64) -> bool {
            (self.0 - other.0).abs().max_element() <= tolerance
        }

        #[inline]
        pub fn transform(self, affine: &DAffine3) -> Point3 {
            Self(affine.transform_point3(self.0))
        }
    }

    impl From<DVec3> for Point3 {
        fn from(value: DVec3) -> Self {
            Self::from_vec(value)
        }
    }

    /// 三维向量，用于拉伸方向、椭圆主轴等。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector3(pub DVec3);

    impl Vector3 {
        #[inline]
        pub fn new(x: f64, y: f64, z: f64) -> Self {
            Self(DVec3::new(x, y, z))
        }

        /// DXF 默认的拉伸方向 (0, 0, 1)。
        #[inline]
        pub fn unit_z() -> Self {
            Self(DVec3::Z)
        }

        #[inline]
        pub fn as_vec3(self) -> DVec3 {
            self.0
        }

        #[inline]
        pub fn length_squared(self) -> f64 {
            self.0.length_squared()
        }

        #[inline]
        pub fn normalize(self) -> Option<Self> {
            let len = self.0.length();
            if len <= f64::EPSILON {
                None
            } else {
                Some(Self(self.0 / len))
            }
        }

        #[inline]
        pub fn to_array(self) -> [f64; 3] {
            self.0.to_array()
        }
    }

    impl From<DVec3> for Vector3 {
        fn from(value: DVec3) -> Self {
            Self(value)
        }
    }

    /// 由两个及以上顶点组成的折线。
    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    pub struct LineString {
        pub points: Vec<Point3>,
    }

    impl LineString {
        #[inline]
        pub fn new(points: Vec<Point3>) -> Self {
            Self { points }
        }

        #[inline]
        pub fn start(&self) -> Option<Point3> {
            self.points.first().copied()
        }

        #[inline]
        pub fn end(&self) -> Option<Point3> {
            self.points.last().copied()
        }

        pub fn is_closed(&self) -> bool {
            match (self.start(), self.end()) {
                (Some(start), Some(end)) => {
                    self.points.len() > 2 && start.is_close(end, POINT_TOLERANCE)
                }
                _ => false,
            }
        }
    }

    /// 三点圆弧：起点、弧上中点、终点，唯一确定圆心、半径与扫掠方向。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct CircularArc {
        pub start: Point3,
        pub mid: Point3,
        pub end: Point3,
    }

    impl CircularArc {
        #[inline]
        pub fn new(start: Point3, mid: Point3, end: Point3) -> Self {
            Self { start, mid, end }
        }

        /// 平面圆心（Z 取起止点平均值）。三点共线时返回 None。
        pub fn center(&self) -> Option<Point3> {
            // 以起点为原点计算外心，减少大坐标下的抵消误差。
            let (ox, oy) = (self.start.x(), self.start.y());
            let (bx, by) = (self.mid.x() - ox, self.mid.y() - oy);
            let (cx, cy) = (self.end.x() - ox, self.end.y() - oy);
            let d = 2.0 * (bx * cy - cx * by);
            if d.abs() <= f64::EPSILON * (bx.abs() + by.abs() + cx.abs() + cy.abs()).powi(2) {
                return None;
            }
            let b2 = bx * bx + by * by;
            let c2 = cx * cx + cy * cy;
            let ux = (b2 * cy - c2 * by) / d;
            let uy = (c2 * bx - b2 * cx) / d;
            Some(Point3::new(
                ox + ux,
                oy + uy,
                (self.start.z() + self.end.z()) * 0.5,
            ))
        }

        pub fn radius(&self) -> Option<f64> {
            self.center().map(|center| center.distance_2d(self.start))
        }

        /// 三点是否按逆时针排列（即圆弧逆时针扫掠）。
        pub fn is_counter_clockwise(&self) -> bool {
            let ab = self.start.vector_to(self.mid).as_vec3();
            let bc = self.mid.vector_to(self.end).as_vec3();
            ab.x * bc.y - ab.y * bc.x > 0.0
        }

        /// 带符号的圆心角（弧度），逆时针为正，取值范围 (-2π, 2π)。
        pub fn included_angle(&self) -> Option<f64> {
            let center = self.center()?;
            let start = (self.start.y() - center.y()).atan2(self.start.x() - center.x());
            let end = (self.end.y() - center.y()).atan2(self.end.x() - center.x());
            let ccw_sweep = (end - start).rem_euclid(TAU);
            if self.is_counter_clockwise() {
                Some(ccw_sweep)
            } else {
                Some(-((start - end).rem_euclid(TAU)))
            }
        }

        pub fn reversed(&self) -> Self {
            Self::new(self.end, self.mid, self.start)
        }

        pub fn transform(&self, affine: &DAffine3) -> Self {
            Self::new(
                self.start.transform(affine),
                self.mid.transform(affine),
                self.end.transform(affine),
            )
        }
    }

    /// 复合曲线的子段：直线串或圆弧。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum CurveSegment {
        Line(LineString),
        Arc(CircularArc),
    }

    impl CurveSegment {
        pub fn start(&self) -> Option<Point3> {
            match self {
                CurveSegment::Line(line) => line.start(),
                CurveSegment::Arc(arc) => Some(arc.start),
            }
        }

        pub fn end(&self) -> Option<Point3> {
            match self {
                CurveSegment::Line(line) => line.end(),
                CurveSegment::Arc(arc) => Some(arc.end),
            }
        }

        #[inline]
        pub fn is_arc(&self) -> bool {
            matches!(self, CurveSegment::Arc(_))
        }

        pub fn transform(&self, affine: &DAffine3) -> Self {
            match self {
                CurveSegment::Line(line) => CurveSegment::Line(LineString::new(
                    line.points.iter().map(|p| p.transform(affine)).collect(),
                )),
                CurveSegment::Arc(arc) => CurveSegment::Arc(arc.transform(affine)),
            }
        }
    }

    /// 按值持有子段的复合曲线，相邻子段首尾相接。
    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    pub struct CompoundCurve {
        pub segments: Vec<CurveSegment>,
    }

    impl CompoundCurve {
        #[inline]
        pub fn new() -> Self {
            Self::default()
        }

        #[inline]
        pub fn from_segments(segments: Vec<CurveSegment>) -> Self {
            Self { segments }
        }

        #[inline]
        pub fn push(&mut self, segment: CurveSegment) {
            self.segments.push(segment);
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.segments.is_empty()
        }

        #[inline]
        pub fn len(&self) -> usize {
            self.segments.len()
        }

        pub fn arc_count(&self) -> usize {
            self.segments.iter().filter(|s| s.is_arc()).count()
        }

        pub fn start(&self) -> Option<Point3> {
            self.segments.first().and_then(CurveSegment::start)
        }

        pub fn end(&self) -> Option<Point3> {
            self.segments.last().and_then(CurveSegment::end)
        }

        pub fn is_closed(&self) -> bool {
            match (self.start(), self.end()) {
                (Some(start), Some(end)) => start.is_close(end, POINT_TOLERANCE),
                _ => false,
            }
        }

        /// 检查相邻子段是否首尾相接。
        pub fn is_continuous(&self) -> bool {
            self.segments.windows(2).all(|pair| match (pair[0].end(), pair[1].start()) {
                (Some(end), Some(start)) => end.is_close(start, 1e-6),
                _ => false,
            })
        }

        /// 若首尾不重合，补一段直线使其闭合。
        pub fn close_with_line(&mut self) {
            if let (Some(start), Some(end)) = (self.start(), self.end()) {
                if !start.is_close(end, 1e-6) {
                    self.push(CurveSegment::Line(LineString::new(vec![end, start])));
                }
            }
        }

        /// 将另一条曲线的子段接在末尾。
        pub fn append(&mut self, other: CompoundCurve) {
            self.segments.extend(other.segments);
        }

        pub fn transform(&self, affine: &DAffine3) -> Self {
            Self::from_segments(self.segments.iter().map(|s| s.transform(affine)).collect())
        }
    }

    /// 曲线多边形：外环加若干内环（洞）。
    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    pub struct CurvePolygon {
        pub exterior: CompoundCurve,
        pub interiors: Vec<CompoundCurve>,
    }

    impl CurvePolygon {
        #[inline]
        pub fn new(exterior: CompoundCurve) -> Self {
            Self {
                exterior,
                interiors: Vec::new(),
            }
        }

        /// 由闭合顶点环构造仅含外环的多边形，自动补齐闭合点。
        pub fn from_ring(mut points: Vec<Point3>) -> Self {
            if let (Some(first), Some(last)) = (points.first().copied(), points.last().copied()) {
                if !first.is_close(last, POINT_TOLERANCE) {
                    points.push(first);
                }
            }
            Self::new(CompoundCurve::from_segments(vec![CurveSegment::Line(
                LineString::new(points),
            )]))
        }

        pub fn transform(&self, affine: &DAffine3) -> Self {
            Self {
                exterior: self.exterior.transform(affine),
                interiors: self.interiors.iter().map(|r| r.transform(affine)).collect(),
            }
        }
    }

    /// 写入存储层的几何体。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum Geometry {
        Point(Point3),
        LineString(LineString),
        CompoundCurve(CompoundCurve),
        CurvePolygon(CurvePolygon),
    }

    impl Geometry {
        pub fn transform(&self, affine: &DAffine3) -> Self {
            match self {
                Geometry::Point(point) => Geometry::Point(point.transform(affine)),
                Geometry::LineString(line) => Geometry::LineString(LineString::new(
                    line.points.iter().map(|p| p.transform(affine)).collect(),
                )),
                Geometry::CompoundCurve(curve) => Geometry::CompoundCurve(curve.transform(affine)),
                Geometry::CurvePolygon(polygon) => {
                    Geometry::CurvePolygon(polygon.transform(affine))
                }
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn semicircle_center_and_sweep() {
            let arc = CircularArc::new(
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(5.0, -5.0, 0.0),
                Point3::new(10.0, 0.0, 0.0),
            );
            let center = arc.center().expect("center");
            assert!((center.x() - 5.0).abs() < 1e-12);
            assert!(center.y().abs() < 1e-12);
            assert!(arc.is_counter_clockwise());
            let sweep = arc.included_angle().expect("sweep");
            assert!((sweep - std::f64::consts::PI).abs() < 1e-12);
            let reversed = arc.reversed().included_angle().expect("sweep");
            assert!((reversed + std::f64::consts::PI).abs() < 1e-12);
        }

        #[test]
        fn collinear_arc_has_no_center() {
            let arc = CircularArc::new(
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(2.0, 0.0, 0.0),
            );
            assert!(arc.center().is_none());
            assert!(arc.included_angle().is_none());
        }

        #[test]
        fn close_with_line_adds_closing_segment_once() {
            let mut curve = CompoundCurve::from_segments(vec![CurveSegment::Line(
                LineString::new(vec![
                    Point3::new(0.0, 0.0, 0.0),
                    Point3::new(1.0, 0.0, 0.0),
                    Point3::new(1.0, 1.0, 0.0),
                ]),
            )]);
            assert!(!curve.is_closed());
            curve.close_with_line();
            assert!(curve.is_closed());
            assert_eq!(curve.len(), 2);
            curve.close_with_line();
            assert_eq!(curve.len(), 2);
            assert!(curve.is_continuous());
        }
    }
}
