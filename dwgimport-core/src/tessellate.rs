//! 隐式曲线编码的显式化：bulge 圆弧、二次 B 样条描点、有理 B 样条求值与椭圆采样。

use std::f64::consts::{PI, TAU};

use glam::DVec3;

use crate::drawing::{EllipseEntity, PolylineVertex, SplineEntity};
use crate::geometry::{CircularArc, Point3};

/// 样条分段数的默认值（对应头部变量 `$SPLINESEGS`）。
pub const DEFAULT_SPLINE_SEGMENTS: usize = 8;

/// 参数距离末端节点小于该值时直接取末端节点，避免步长累积越界。
const KNOT_SNAP: f64 = 5e-6;

/// 由相邻两个顶点与 bulge 构造三点圆弧。
///
/// 半角 `2·atan(b)`，半径 `c / (2·sin(半角))`，弦高 `r·(1 − cos(半角))`；
/// 正 bulge 时弧中点位于弦方向的右侧，即逆时针扫掠。弦长为零、bulge 为零
/// 或正弦值下溢时返回 None，调用方按直线处理。
pub fn arc_from_bulge(p0: Point3, p1: Point3, bulge: f64) -> Option<CircularArc> {
    if bulge == 0.0 || !bulge.is_finite() {
        return None;
    }
    let dx = p1.x() - p0.x();
    let dy = p1.y() - p0.y();
    let chord = (dx * dx + dy * dy).sqrt();
    if chord <= f64::EPSILON {
        return None;
    }
    let half = 2.0 * bulge.atan();
    let sin_half = half.sin();
    if sin_half.abs() <= 1e-12 {
        return None;
    }
    let radius = chord / (2.0 * sin_half);
    let sagitta = radius * (1.0 - half.cos());
    let chord_mid = p0.midpoint(p1);
    let mid = Point3::new(
        chord_mid.x() + sagitta * dy / chord,
        chord_mid.y() - sagitta * dx / chord,
        chord_mid.z(),
    );
    Some(CircularArc::new(p0, mid, p1))
}

/// 由圆弧的圆心角反推 bulge（`tan(θ/4)`）。
pub fn bulge_of(arc: &CircularArc) -> Option<f64> {
    arc.included_angle().map(|angle| (angle / 4.0).tan())
}

/// 由圆心、半径与起止角（弧度，逆时针）构造规范化的圆弧。
///
/// 起止角相同视为整圆，拆成两段半圆；半径非正时返回空。
pub fn arc_from_center(
    center: Point3,
    radius: f64,
    start_angle: f64,
    end_angle: f64,
) -> Vec<CircularArc> {
    if !(radius > 0.0) || !radius.is_finite() {
        return Vec::new();
    }
    let start = start_angle.rem_euclid(TAU);
    let mut sweep = (end_angle - start_angle).rem_euclid(TAU);
    if sweep <= 1e-12 || (TAU - sweep) <= 1e-12 {
        sweep = TAU;
    }
    let at = |angle: f64| {
        Point3::new(
            center.x() + radius * angle.cos(),
            center.y() + radius * angle.sin(),
            center.z(),
        )
    };
    if sweep >= TAU {
        let opposite = start + PI;
        vec![
            CircularArc::new(at(start), at(start + PI * 0.5), at(opposite)),
            CircularArc::new(at(opposite), at(opposite + PI * 0.5), at(start)),
        ]
    } else {
        vec![CircularArc::new(
            at(start),
            at(start + sweep * 0.5),
            at(start + sweep),
        )]
    }
}

/// 二次 B 样条描点：相邻控制段中点作为各跨段的起止点，共享控制点作为 Bézier 控制点。
///
/// 每个跨段按 `P(t) = (1−t)²P0 + 2t(1−t)C + t²P1` 取 `steps` 步。闭合曲线按
/// 顶点数取模回绕，开放曲线在两端夹取首末控制点。
pub fn stroke_quadratic(points: &[Point3], closed: bool, steps: usize) -> Vec<Point3> {
    let steps = steps.max(1);
    let n = points.len();
    match n {
        0 => return Vec::new(),
        1 => return vec![points[0]],
        2 => return vec![points[0], points[1]],
        _ => {}
    }

    let mut spans: Vec<(Point3, Point3, Point3)> = Vec::new();
    if closed {
        for i in 0..n {
            let prev = points[(i + n - 1) % n];
            let current = points[i];
            let next = points[(i + 1) % n];
            spans.push((prev.midpoint(current), current, current.midpoint(next)));
        }
    } else {
        for i in 1..n - 1 {
            let start = if i == 1 {
                points[0]
            } else {
                points[i - 1].midpoint(points[i])
            };
            let end = if i == n - 2 {
                points[n - 1]
            } else {
                points[i].midpoint(points[i + 1])
            };
            spans.push((start, points[i], end));
        }
    }

    let mut result = Vec::with_capacity(spans.len() * steps + 1);
    for (index, (start, control, end)) in spans.iter().enumerate() {
        let first = if index == 0 { 0 } else { 1 };
        for step in first..=steps {
            let t = step as f64 / steps as f64;
            let u = 1.0 - t;
            let value =
                start.0 * (u * u) + control.0 * (2.0 * t * u) + end.0 * (t * t);
            result.push(Point3::from_vec(value));
        }
    }
    result
}

/// 有理 B 样条求值（次数 1..=3）。
///
/// 节点数等于 `控制点数 + 阶数` 时使用显式节点，否则按周期标志生成周期或
/// 开放均匀节点。共采样 `segments × 控制点数` 个参数值。次数越界或控制点
/// 不足时返回 None。
pub fn evaluate_nurbs(spline: &SplineEntity, segments: usize) -> Option<Vec<Point3>> {
    let npts = spline.control_points.len();
    if !(1..=3).contains(&spline.degree) {
        return None;
    }
    let order = spline.degree as usize + 1;
    if npts < order {
        return None;
    }
    let nplusc = npts + order;

    let knots = if spline.knots.len() == nplusc {
        spline.knots.clone()
    } else if spline.is_periodic() {
        periodic_knots(nplusc)
    } else {
        open_knots(npts, order)
    };

    let weights: Vec<f64> = if spline.weights.len() == npts {
        spline.weights.clone()
    } else {
        vec![1.0; npts]
    };

    let samples = (segments.max(1) * npts).max(2);
    let domain_start = knots[order - 1];
    let domain_end = knots[npts];
    if !(domain_end > domain_start) {
        return None;
    }
    let step = (domain_end - domain_start) / (samples - 1) as f64;

    let mut result = Vec::with_capacity(samples);
    let mut t = domain_start;
    for _ in 0..samples {
        if domain_end - t < KNOT_SNAP {
            t = domain_end;
        }
        let basis = rational_basis(order, t, npts, &knots, &weights);
        let point = spline
            .control_points
            .iter()
            .zip(basis.iter())
            .fold(DVec3::ZERO, |acc, (control, weight)| acc + control.0 * *weight);
        result.push(Point3::from_vec(point));
        t += step;
    }
    Some(result)
}

/// 开放均匀节点：首尾各重复 `order` 次。
fn open_knots(npts: usize, order: usize) -> Vec<f64> {
    let nplusc = npts + order;
    let mut knots = vec![0.0; nplusc];
    for j in 1..nplusc {
        knots[j] = if j >= order && j <= npts {
            knots[j - 1] + 1.0
        } else {
            knots[j - 1]
        };
    }
    knots
}

fn periodic_knots(nplusc: usize) -> Vec<f64> {
    (0..nplusc).map(|i| i as f64).collect()
}

/// Cox–de Boor 迭代：从一阶指示函数逐阶提升，再按权重归一化。
fn rational_basis(order: usize, t: f64, npts: usize, knots: &[f64], weights: &[f64]) -> Vec<f64> {
    let nplusc = npts + order;
    let mut temp = vec![0.0; nplusc - 1];
    for i in 0..nplusc - 1 {
        temp[i] = if t >= knots[i] && t < knots[i + 1] {
            1.0
        } else {
            0.0
        };
    }

    for k in 2..=order {
        for i in 0..nplusc - k {
            let d = if temp[i] != 0.0 {
                let denom = knots[i + k - 1] - knots[i];
                if denom != 0.0 {
                    (t - knots[i]) * temp[i] / denom
                } else {
                    0.0
                }
            } else {
                0.0
            };
            let e = if temp[i + 1] != 0.0 {
                let denom = knots[i + k] - knots[i + 1];
                if denom != 0.0 {
                    (knots[i + k] - t) * temp[i + 1] / denom
                } else {
                    0.0
                }
            } else {
                0.0
            };
            temp[i] = d + e;
        }
    }

    if t == knots[nplusc - 1] {
        temp[npts - 1] = 1.0;
    }

    let sum: f64 = (0..npts).map(|i| temp[i] * weights[i]).sum();
    (0..npts)
        .map(|i| {
            if sum != 0.0 {
                temp[i] * weights[i] / sum
            } else {
                0.0
            }
        })
        .collect()
}

/// 把椭圆（或椭圆弧）采样为直线顶点序列，返回顶点与是否闭合。
///
/// 整椭圆输出闭合序列且不重复首点；`segments` 为整周对应的段数。
pub fn sample_ellipse(ellipse: &EllipseEntity, segments: usize) -> (Vec<PolylineVertex>, bool) {
    let segments = segments.max(4);
    let major = ellipse.major_axis.as_vec3();
    if major.length_squared() <= f64::EPSILON {
        return (Vec::new(), false);
    }
    let normal = ellipse
        .extrusion
        .normalize()
        .map(|n| n.as_vec3())
        .unwrap_or(DVec3::Z);
    let minor = normal.cross(major) * ellipse.ratio;

    let start = ellipse.start_param;
    let mut span = (ellipse.end_param - start).rem_euclid(TAU);
    let full = span <= 1e-9 || (TAU - span) <= 1e-9;
    if full {
        span = TAU;
    }
    let count = ((segments as f64 * span / TAU).ceil() as usize).max(2);

    let center = ellipse.center.as_vec3();
    let at = |param: f64| {
        PolylineVertex::new(Point3::from_vec(
            center + major * param.cos() + minor * param.sin(),
        ))
    };
    let vertices: Vec<PolylineVertex> = if full {
        (0..count)
            .map(|i| at(start + span * i as f64 / count as f64))
            .collect()
    } else {
        (0..=count)
            .map(|i| at(start + span * i as f64 / count as f64))
            .collect()
    };
    (vertices, full)
}
