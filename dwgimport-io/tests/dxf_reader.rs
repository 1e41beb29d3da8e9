use std::f64::consts::{FRAC_PI_2, PI};
use std::path::PathBuf;

use dwgimport_core::drawing::{
    Block, DimStyle, DimensionKind, DrawingReceiver, DrawingSource, Entity, EntityKind, Header,
    HeaderValue, Layer, LineType, LoopObject, Space, TextStyle,
};
use dwgimport_core::geometry::Point3;
use dwgimport_core::palette::lineweight_mm;
use dwgimport_io::{DxfSource, IoError};

/// 按回调顺序记录所有事件的接收者。
#[derive(Default)]
struct Recorder {
    headers: Vec<Header>,
    linetypes: Vec<LineType>,
    layers: Vec<Layer>,
    text_styles: Vec<TextStyle>,
    dim_styles: Vec<DimStyle>,
    blocks: Vec<(Block, Vec<Entity>)>,
    open_block: Option<(Block, Vec<Entity>)>,
    entities: Vec<Entity>,
    events: Vec<String>,
}

impl DrawingReceiver for Recorder {
    fn add_header(&mut self, header: &Header) {
        self.events.push("header".to_string());
        self.headers.push(header.clone());
    }

    fn add_linetype(&mut self, linetype: &LineType) {
        self.events.push(format!("ltype:{}", linetype.name));
        self.linetypes.push(linetype.clone());
    }

    fn add_layer(&mut self, layer: &Layer) {
        self.events.push(format!("layer:{}", layer.name));
        self.layers.push(layer.clone());
    }

    fn add_dim_style(&mut self, style: &DimStyle) {
        self.dim_styles.push(style.clone());
    }

    fn add_text_style(&mut self, style: &TextStyle) {
        self.events.push(format!("style:{}", style.name));
        self.text_styles.push(style.clone());
    }

    fn begin_block(&mut self, block: &Block) {
        assert!(self.open_block.is_none(), "块定义不应嵌套");
        self.events.push(format!("begin:{}", block.name));
        self.open_block = Some((block.clone(), Vec::new()));
    }

    fn end_block(&mut self) {
        let block = self.open_block.take().expect("end_block 前必须有 begin_block");
        self.events.push(format!("end:{}", block.0.name));
        self.blocks.push(block);
    }

    fn add_entity(&mut self, entity: &Entity) {
        self.events.push(format!("entity:{}", entity.type_name()));
        match self.open_block.as_mut() {
            Some((_, entities)) => entities.push(entity.clone()),
            None => self.entities.push(entity.clone()),
        }
    }
}

fn fixture(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/data");
    path.push(name);
    path
}

fn read_fixture(name: &str) -> Recorder {
    let mut source = DxfSource::from_path(&fixture(name)).expect("读取 DXF 文件失败");
    let mut recorder = Recorder::default();
    source.read(&mut recorder).expect("解析 DXF 失败");
    recorder
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "期望 {expected}，实际 {actual}"
    );
}

#[test]
fn events_arrive_in_document_order() {
    let recorder = read_fixture("basic.dxf");
    let expected_prefix = [
        "header",
        "ltype:DASHED",
        "layer:0",
        "layer:WALLS",
        "style:NOTES",
        "begin:DOOR",
        "entity:LINE",
        "end:DOOR",
        "entity:LINE",
        "entity:LWPOLYLINE",
    ];
    assert_eq!(&recorder.events[..expected_prefix.len()], &expected_prefix);
    let tail: Vec<&str> = recorder.events[expected_prefix.len()..]
        .iter()
        .map(String::as_str)
        .collect();
    assert_eq!(
        tail,
        [
            "entity:ARC",
            "entity:TEXT",
            "entity:MTEXT",
            "entity:INSERT",
            "entity:POLYLINE",
            "entity:DIMENSION_RADIUS",
            "entity:CIRCLE",
        ]
    );
}

#[test]
fn header_collects_variables_and_comments() {
    let recorder = read_fixture("basic.dxf");
    assert_eq!(recorder.headers.len(), 1);
    let header = &recorder.headers[0];
    assert_eq!(header.comments, vec!["exported by sample writer".to_string()]);
    assert_eq!(
        header.variables.get("$ACADVER"),
        Some(&HeaderValue::Text("AC1015".to_string()))
    );
    assert_eq!(header.integer("$INSUNITS"), Some(4));
    assert_eq!(
        header.variables.get("$EXTMIN"),
        Some(&HeaderValue::Coord(Point3::new(0.0, -5.0, 0.0)))
    );
    assert_eq!(header.variables.get("$LTSCALE"), Some(&HeaderValue::Real(2.0)));
}

#[test]
fn tables_are_decoded() {
    let recorder = read_fixture("basic.dxf");

    let dashed = &recorder.linetypes[0];
    assert_eq!(dashed.description, "Dashed __ __");
    assert_close(dashed.pattern_length, 0.75);
    assert_eq!(dashed.pattern, vec![0.5, -0.25]);

    let walls = recorder
        .layers
        .iter()
        .find(|layer| layer.name == "WALLS")
        .expect("缺少 WALLS 图层");
    assert_eq!(walls.color, -1);
    assert_eq!(walls.color24, 0xFF0000);
    assert_eq!(walls.linetype, "DASHED");
    assert_eq!(lineweight_mm(walls.lineweight), Some(0.5));

    let notes = &recorder.text_styles[0];
    assert_close(notes.width, 0.8);
    assert_eq!(notes.font, "romans.shx");
    assert!(recorder.dim_styles.is_empty());
}

#[test]
fn block_definition_keeps_base_point_and_entities() {
    let recorder = read_fixture("basic.dxf");
    assert_eq!(recorder.blocks.len(), 1);
    let (block, entities) = &recorder.blocks[0];
    assert_eq!(block.name, "DOOR");
    assert_eq!(block.handle.get(), 0x20);
    assert_eq!(block.base, Point3::new(1.0, 1.0, 0.0));
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].common.color, 0);
}

#[test]
fn lwpolyline_vertices_carry_bulge_widths_and_elevation() {
    let recorder = read_fixture("basic.dxf");
    let polyline = recorder
        .entities
        .iter()
        .find_map(|entity| match &entity.kind {
            EntityKind::LwPolyline(polyline) => Some(polyline),
            _ => None,
        })
        .expect("未找到 LWPOLYLINE");
    assert!(polyline.is_closed());
    assert_eq!(polyline.vertices.len(), 3);
    assert_close(polyline.vertices[0].bulge, 1.0);
    assert_close(polyline.vertices[0].position.z(), 2.0);
    assert_close(polyline.vertices[0].start_width, 0.5);
    assert_close(polyline.vertices[1].end_width, 0.5);
    assert_close(polyline.vertices[2].start_width, 1.0);
    assert_close(polyline.vertices[2].end_width, 2.0);
}

#[test]
fn polyline_skips_spline_frame_vertices() {
    let recorder = read_fixture("basic.dxf");
    let polyline = recorder
        .entities
        .iter()
        .find_map(|entity| match &entity.kind {
            EntityKind::Polyline(polyline) => Some(polyline),
            _ => None,
        })
        .expect("未找到 POLYLINE");
    assert_eq!(polyline.vertices.len(), 3);
    assert_close(polyline.vertices[1].bulge, -0.5);
    assert!(
        polyline
            .vertices
            .iter()
            .all(|vertex| (vertex.position.z() - 1.5).abs() < 1e-9)
    );
    assert_eq!(polyline.vertices[2].position, Point3::new(4.0, 4.0, 1.5));
}

#[test]
fn angles_are_converted_to_radians() {
    let recorder = read_fixture("basic.dxf");
    for entity in &recorder.entities {
        match &entity.kind {
            EntityKind::Arc(arc) => {
                assert_close(arc.start_angle, FRAC_PI_2);
                assert_close(arc.end_angle, PI);
            }
            EntityKind::Insert(insert) => {
                assert_eq!(insert.block_name, "DOOR");
                assert_close(insert.rotation, FRAC_PI_2);
                assert_close(insert.y_scale, 2.0);
                assert_eq!(insert.column_count, 1);
            }
            EntityKind::Text(text) => {
                assert_close(text.rotation, 30f64.to_radians());
                assert_eq!(text.text, "45°");
                assert_eq!(text.style, "NOTES");
                assert_eq!(text.alignment_point, Some(Point3::new(3.0, 2.0, 0.0)));
            }
            EntityKind::MText(mtext) => {
                assert_eq!(mtext.text, "Line1\nLine2");
                assert_close(mtext.rotation, FRAC_PI_2);
            }
            _ => {}
        }
    }
}

#[test]
fn missing_handles_are_synthesized_and_common_codes_apply() {
    let recorder = read_fixture("basic.dxf");
    let circle = recorder
        .entities
        .iter()
        .find(|entity| matches!(entity.kind, EntityKind::Circle(_)))
        .expect("未找到 CIRCLE");
    assert!(circle.common.handle.get() >= 1 << 48);
    assert_eq!(circle.common.space, Space::Paper);
    assert_eq!(circle.common.transparency, 128);

    let line = &recorder.entities[0];
    assert_eq!(line.common.handle.get(), 0x30);
    assert_eq!(line.common.layer, "WALLS");

    let dimension = recorder
        .entities
        .iter()
        .find(|entity| matches!(entity.kind, EntityKind::Dimension(_)))
        .expect("未找到 DIMENSION");
    assert_eq!(dimension.kind, EntityKind::Dimension(DimensionKind::Radius));
}

#[test]
fn hatch_boundaries_are_parsed() {
    let recorder = read_fixture("hatch.dxf");
    let hatches: Vec<_> = recorder
        .entities
        .iter()
        .filter_map(|entity| match &entity.kind {
            EntityKind::Hatch(hatch) => Some(hatch),
            _ => None,
        })
        .collect();
    assert_eq!(hatches.len(), 2);

    let solid = hatches[0];
    assert!(solid.solid);
    assert_eq!(solid.declared_loop_count, 2);
    assert_eq!(solid.loops.len(), 2);
    match &solid.loops[0].objects[..] {
        [LoopObject::LwPolyline { vertices, closed }] => {
            assert!(*closed);
            assert_eq!(vertices.len(), 4);
            assert_close(vertices[1].bulge, 1.0);
        }
        other => panic!("期望单个多段线边界，实际 {other:?}"),
    }
    match &solid.loops[1].objects[..] {
        [LoopObject::Line { .. }, LoopObject::Arc { radius, end_angle, counter_clockwise, .. }] => {
            assert_close(*radius, 1.0);
            assert_close(*end_angle, PI);
            assert!(!*counter_clockwise);
        }
        other => panic!("期望直线与圆弧边，实际 {other:?}"),
    }

    let pattern = hatches[1];
    assert!(!pattern.solid);
    assert_eq!(pattern.pattern_name, "ANSI31");
    assert_close(pattern.pattern_angle, 45f64.to_radians());
    assert_close(pattern.pattern_scale, 2.0);
    match &pattern.loops[0].objects[..] {
        [LoopObject::Ellipse { ratio, .. }, LoopObject::Spline(spline)] => {
            assert_close(*ratio, 0.5);
            assert_eq!(spline.degree, 3);
            assert_eq!(spline.knots.len(), 8);
            assert_eq!(spline.control_points.len(), 4);
        }
        other => panic!("期望椭圆与样条边，实际 {other:?}"),
    }
}

#[test]
fn hatch_loop_count_mismatch_is_rejected() {
    let mut source =
        DxfSource::from_path(&fixture("hatch_loop_mismatch.dxf")).expect("读取 DXF 文件失败");
    let mut recorder = Recorder::default();
    let err = source.read(&mut recorder).expect_err("边界环数量不符应报错");
    assert!(matches!(err, IoError::InvalidDocument(_)), "{err:?}");
}

#[test]
fn document_without_header_still_announces_header_first() {
    let text = "  0\nSECTION\n  2\nENTITIES\n  0\nPOINT\n  8\n0\n 10\n1.0\n 20\n2.0\n  0\nENDSEC\n  0\nEOF\n";
    let mut source = DxfSource::from_text(text);
    let mut recorder = Recorder::default();
    source.read(&mut recorder).expect("解析最小 DXF 失败");
    assert_eq!(recorder.events, vec!["header", "entity:POINT"]);
    assert!(recorder.headers[0].variables.is_empty());
}

#[test]
fn malformed_documents_report_errors() {
    let cases = [
        "  0\nSECTION\n  2\nENTITIES\n  0\nLINE\n 10\nabc\n",
        "  0\nSECTION\n  2\nENTITIES\n  0\nLINE\n 10\n0\n 20\n0\n",
        "  0\nBOGUS\n",
        " xx\nSECTION\n",
    ];
    for text in cases {
        let mut source = DxfSource::from_text(text);
        let mut recorder = Recorder::default();
        let result = source.read(&mut recorder);
        assert!(
            matches!(result, Err(IoError::InvalidDocument(_))),
            "输入 {text:?} 应报错，实际 {result:?}"
        );
    }
}

#[test]
fn missing_file_reports_read_error() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let err = DxfSource::from_path(&dir.path().join("absent.dxf")).expect_err("文件不存在");
    assert!(matches!(err, IoError::ReadError { .. }));
}

#[test]
fn entities_serialize_with_type_tags() {
    let recorder = read_fixture("basic.dxf");
    let value = serde_json::to_value(&recorder.entities[0]).expect("序列化实体失败");
    assert_eq!(value["common"]["layer"], "WALLS");
    assert_eq!(value["kind"]["Line"]["thickness"], 0.0);
}
