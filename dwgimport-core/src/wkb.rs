//! 带 Z 的 ISO WKB 编解码（小端序）。

use thiserror::Error;

use crate::geometry::{
    CircularArc, CompoundCurve, CurvePolygon, CurveSegment, Geometry, LineString, Point3,
};

pub const WKB_POINT_Z: u32 = 1001;
pub const WKB_LINESTRING_Z: u32 = 1002;
pub const WKB_POLYGON_Z: u32 = 1003;
pub const WKB_CIRCULARSTRING_Z: u32 = 1008;
pub const WKB_COMPOUNDCURVE_Z: u32 = 1009;
pub const WKB_CURVEPOLYGON_Z: u32 = 1010;

const LITTLE_ENDIAN: u8 = 1;

#[derive(Debug, Error, PartialEq)]
pub enum WkbError {
    #[error("WKB 数据在偏移 {offset} 处意外结束")]
    UnexpectedEnd { offset: usize },
    #[error("不支持的字节序标记 {0}")]
    UnsupportedByteOrder(u8),
    #[error("不支持的 WKB 几何类型 {0}")]
    UnsupportedType(u32),
    #[error("圆弧串点数 {0} 无效（应为 2k+1 且不少于 3）")]
    InvalidCircularString(usize),
    #[error("WKB 末尾存在 {0} 字节多余数据")]
    TrailingBytes(usize),
}

/// 把几何体编码为小端序 ISO WKB。
pub fn encode(geometry: &Geometry) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    match geometry {
        Geometry::Point(point) => {
            write_header(&mut buf, WKB_POINT_Z);
            write_point(&mut buf, *point);
        }
        Geometry::LineString(line) => write_line_string(&mut buf, &line.points),
        Geometry::CompoundCurve(curve) => write_compound(&mut buf, curve),
        Geometry::CurvePolygon(polygon) => {
            write_header(&mut buf, WKB_CURVEPOLYGON_Z);
            write_count(&mut buf, 1 + polygon.interiors.len());
            write_compound(&mut buf, &polygon.exterior);
            for ring in &polygon.interiors {
                write_compound(&mut buf, ring);
            }
        }
    }
    buf
}

fn write_header(buf: &mut Vec<u8>, kind: u32) {
    buf.push(LITTLE_ENDIAN);
    buf.extend_from_slice(&kind.to_le_bytes());
}

fn write_count(buf: &mut Vec<u8>, count: usize) {
    buf.extend_from_slice(&(count as u32).to_le_bytes());
}

fn write_point(buf: &mut Vec<u8>, point: Point3) {
    buf.extend_from_slice(&point.x().to_le_bytes());
    buf.extend_from_slice(&point.y().to_le_bytes());
    buf.extend_from_slice(&point.z().to_le_bytes());
}

fn write_line_string(buf: &mut Vec<u8>, points: &[Point3]) {
    write_header(buf, WKB_LINESTRING_Z);
    write_count(buf, points.len());
    for point in points {
        write_point(buf, *point);
    }
}

fn write_compound(buf: &mut Vec<u8>, curve: &CompoundCurve) {
    write_header(buf, WKB_COMPOUNDCURVE_Z);
    write_count(buf, curve.segments.len());
    for segment in &curve.segments {
        match segment {
            CurveSegment::Line(line) => write_line_string(buf, &line.points),
            CurveSegment::Arc(arc) => {
                write_header(buf, WKB_CIRCULARSTRING_Z);
                write_count(buf, 3);
                write_point(buf, arc.start);
                write_point(buf, arc.mid);
                write_point(buf, arc.end);
            }
        }
    }
}

/// 解码小端序 ISO WKB。多边形环统一表示为复合曲线。
pub fn decode(bytes: &[u8]) -> Result<Geometry, WkbError> {
    let mut reader = WkbReader { bytes, offset: 0 };
    let geometry = reader.read_geometry()?;
    let remaining = bytes.len() - reader.offset;
    if remaining != 0 {
        return Err(WkbError::TrailingBytes(remaining));
    }
    Ok(geometry)
}

struct WkbReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> WkbReader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], WkbError> {
        let end = self.offset + N;
        let slice = self
            .bytes
            .get(self.offset..end)
            .ok_or(WkbError::UnexpectedEnd {
                offset: self.offset,
            })?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.offset = end;
        Ok(out)
    }

    fn read_u32(&mut self) -> Result<u32, WkbError> {
        Ok(u32::from_le_bytes(self.take::<4>()?))
    }

    fn read_f64(&mut self) -> Result<f64, WkbError> {
        Ok(f64::from_le_bytes(self.take::<8>()?))
    }

    fn read_header(&mut self) -> Result<u32, WkbError> {
        let [order] = self.take::<1>()?;
        if order != LITTLE_ENDIAN {
            return Err(WkbError::UnsupportedByteOrder(order));
        }
        self.read_u32()
    }

    fn read_point(&mut self) -> Result<Point3, WkbError> {
        let x = self.read_f64()?;
        let y = self.read_f64()?;
        let z = self.read_f64()?;
        Ok(Point3::new(x, y, z))
    }

    fn read_points(&mut self) -> Result<Vec<Point3>, WkbError> {
        let count = self.read_u32()? as usize;
        // 每个点 24 字节，先校验长度，避免按损坏的计数预分配。
        if self.bytes.len().saturating_sub(self.offset) < count.saturating_mul(24) {
            return Err(WkbError::UnexpectedEnd {
                offset: self.offset,
            });
        }
        (0..count).map(|_| self.read_point()).collect()
    }

    fn read_geometry(&mut self) -> Result<Geometry, WkbError> {
        match self.read_header()? {
            WKB_POINT_Z => Ok(Geometry::Point(self.read_point()?)),
            WKB_LINESTRING_Z => Ok(Geometry::LineString(LineString::new(self.read_points()?))),
            WKB_CIRCULARSTRING_Z => Ok(Geometry::CompoundCurve(CompoundCurve::from_segments(
                self.read_circular_body()?,
            ))),
            WKB_COMPOUNDCURVE_Z => Ok(Geometry::CompoundCurve(self.read_compound_body()?)),
            WKB_POLYGON_Z => {
                let ring_count = self.read_u32()? as usize;
                let mut rings = Vec::with_capacity(ring_count.min(64));
                for _ in 0..ring_count {
                    let points = self.read_points()?;
                    rings.push(CompoundCurve::from_segments(vec![CurveSegment::Line(
                        LineString::new(points),
                    )]));
                }
                Ok(Geometry::CurvePolygon(polygon_from_rings(rings)))
            }
            WKB_CURVEPOLYGON_Z => {
                let ring_count = self.read_u32()? as usize;
                let mut rings = Vec::with_capacity(ring_count.min(64));
                for _ in 0..ring_count {
                    rings.push(self.read_ring()?);
                }
                Ok(Geometry::CurvePolygon(polygon_from_rings(rings)))
            }
            other => Err(WkbError::UnsupportedType(other)),
        }
    }

    fn read_ring(&mut self) -> Result<CompoundCurve, WkbError> {
        match self.read_header()? {
            WKB_LINESTRING_Z => Ok(CompoundCurve::from_segments(vec![CurveSegment::Line(
                LineString::new(self.read_points()?),
            )])),
            WKB_CIRCULARSTRING_Z => Ok(CompoundCurve::from_segments(self.read_circular_body()?)),
            WKB_COMPOUNDCURVE_Z => self.read_compound_body(),
            other => Err(WkbError::UnsupportedType(other)),
        }
    }

    fn read_compound_body(&mut self) -> Result<CompoundCurve, WkbError> {
        let count = self.read_u32()? as usize;
        let mut curve = CompoundCurve::new();
        for _ in 0..count {
            match self.read_header()? {
                WKB_LINESTRING_Z => {
                    curve.push(CurveSegment::Line(LineString::new(self.read_points()?)))
                }
                WKB_CIRCULARSTRING_Z => curve.segments.extend(self.read_circular_body()?),
                other => return Err(WkbError::UnsupportedType(other)),
            }
        }
        Ok(curve)
    }

    /// 圆弧串 2k+1 个点，拆为 k 段三点圆弧。
    fn read_circular_body(&mut self) -> Result<Vec<CurveSegment>, WkbError> {
        let points = self.read_points()?;
        if points.len() < 3 || points.len() % 2 == 0 {
            return Err(WkbError::InvalidCircularString(points.len()));
        }
        Ok(points
            .windows(3)
            .step_by(2)
            .map(|w| CurveSegment::Arc(CircularArc::new(w[0], w[1], w[2])))
            .collect())
    }
}

fn polygon_from_rings(mut rings: Vec<CompoundCurve>) -> CurvePolygon {
    if rings.is_empty() {
        return CurvePolygon::default();
    }
    let exterior = rings.remove(0);
    CurvePolygon {
        exterior,
        interiors: rings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_layout_is_little_endian_iso_z() {
        let bytes = encode(&Geometry::Point(Point3::new(1.0, 2.0, 3.0)));
        assert_eq!(bytes.len(), 1 + 4 + 24);
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..5], &1001u32.to_le_bytes());
        assert_eq!(&bytes[5..13], &1.0f64.to_le_bytes());
        assert_eq!(&bytes[21..29], &3.0f64.to_le_bytes());
    }

    #[test]
    fn compound_curve_with_arc_decodes_to_same_geometry() {
        let curve = CompoundCurve::from_segments(vec![
            CurveSegment::Line(LineString::new(vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(10.0, 0.0, 0.0),
            ])),
            CurveSegment::Arc(CircularArc::new(
                Point3::new(10.0, 0.0, 0.0),
                Point3::new(15.0, 5.0, 0.0),
                Point3::new(10.0, 10.0, 0.0),
            )),
        ]);
        let polygon = CurvePolygon {
            exterior: curve.clone(),
            interiors: vec![curve.clone()],
        };
        for geometry in [
            Geometry::CompoundCurve(curve),
            Geometry::CurvePolygon(polygon),
        ] {
            let decoded = decode(&encode(&geometry)).expect("解码 WKB");
            assert_eq!(decoded, geometry);
        }
    }

    #[test]
    fn multi_arc_circular_string_is_split() {
        let mut bytes = Vec::new();
        write_header(&mut bytes, WKB_CIRCULARSTRING_Z);
        write_count(&mut bytes, 5);
        for (x, y) in [(0.0, 0.0), (1.0, 1.0), (2.0, 0.0), (3.0, -1.0), (4.0, 0.0)] {
            write_point(&mut bytes, Point3::new(x, y, 0.0));
        }
        let Geometry::CompoundCurve(curve) = decode(&bytes).expect("解码") else {
            panic!("期望复合曲线");
        };
        assert_eq!(curve.arc_count(), 2);
        assert!(curve.is_continuous());
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert_eq!(decode(&[]), Err(WkbError::UnexpectedEnd { offset: 0 }));
        assert_eq!(
            decode(&[0, 0, 0, 0, 1]),
            Err(WkbError::UnsupportedByteOrder(0))
        );
        let mut bytes = encode(&Geometry::Point(Point3::new(0.0, 0.0, 0.0)));
        bytes[1..5].copy_from_slice(&7u32.to_le_bytes());
        assert_eq!(decode(&bytes), Err(WkbError::UnsupportedType(7)));
        let mut bytes = encode(&Geometry::Point(Point3::new(0.0, 0.0, 0.0)));
        bytes.push(0);
        assert_eq!(decode(&bytes), Err(WkbError::TrailingBytes(1)));
    }
}
