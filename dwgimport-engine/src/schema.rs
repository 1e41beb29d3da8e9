//! 输出表结构。

use crate::store::FieldType::{self, Integer, Real, Text};
use crate::store::{GeometryKind, TableDefinition};

pub const DRAWING: &str = "drawing";
pub const HEADERS: &str = "headers";
pub const LINETYPES: &str = "linetypes";
pub const LAYERS: &str = "layers";
pub const DIMSTYLES: &str = "dimstyles";
pub const TEXTSTYLES: &str = "textstyles";
pub const BLOCKS: &str = "blocks";
pub const POINTS: &str = "points";
pub const LINES: &str = "lines";
pub const POLYLINES: &str = "polylines";
pub const TEXTS: &str = "texts";
pub const HATCHES: &str = "hatches";
pub const INSERTS: &str = "inserts";

/// 带公共实体属性、参与块展开的几何表。
pub const ENTITY_TABLES: [&str; 6] = [POINTS, LINES, POLYLINES, TEXTS, HATCHES, INSERTS];

/// 顶层实体的所属块取值。
pub const TOP_LEVEL: i64 = -1;

const ENTITY_COLUMNS: [(&str, FieldType); 15] = [
    ("handle", Integer),
    ("block", Integer),
    ("etype", Text),
    ("space", Integer),
    ("layer", Text),
    ("olinetype", Text),
    ("linetype", Text),
    ("color", Text),
    ("ocolor", Integer),
    ("color24", Integer),
    ("transparency", Integer),
    ("lweight", Integer),
    ("linewidth", Real),
    ("ltscale", Real),
    ("visible", Integer),
];

const EXTRUSION_COLUMNS: [(&str, FieldType); 4] = [
    ("thickness", Real),
    ("extx", Real),
    ("exty", Real),
    ("extz", Real),
];

fn entity_table(name: &str, description: &str, geometry: GeometryKind) -> TableDefinition {
    TableDefinition::new(name, description, geometry).columns(&ENTITY_COLUMNS)
}

/// 导入时按顺序（覆盖）创建的全部表。
pub fn table_definitions() -> Vec<TableDefinition> {
    vec![
        TableDefinition::new(DRAWING, "Imported drawings", GeometryKind::None).columns(&[
            ("path", Text),
            ("comments", Text),
            ("importtime", Integer),
            ("lastmodified", Integer),
        ]),
        TableDefinition::new(HEADERS, "Headers", GeometryKind::None)
            .columns(&[("k", Text), ("v", Text)]),
        TableDefinition::new(LINETYPES, "Line types", GeometryKind::None).columns(&[
            ("name", Text),
            ("desc", Text),
            ("len", Real),
            ("pattern", Text),
        ]),
        TableDefinition::new(LAYERS, "Layer list", GeometryKind::None).columns(&[
            ("name", Text),
            ("linetype", Text),
            ("color", Text),
            ("ocolor", Integer),
            ("color24", Integer),
            ("transparency", Integer),
            ("lweight", Integer),
            ("linewidth", Real),
            ("flags", Integer),
        ]),
        TableDefinition::new(DIMSTYLES, "Dimension styles", GeometryKind::None).columns(&[
            ("name", Text),
            ("dimscale", Real),
            ("dimasz", Real),
            ("dimtxt", Real),
            ("dimexo", Real),
            ("dimexe", Real),
            ("dimgap", Real),
            ("dimdec", Integer),
            ("dimpost", Text),
            ("dimtxsty", Text),
        ]),
        TableDefinition::new(TEXTSTYLES, "Text styles", GeometryKind::None).columns(&[
            ("name", Text),
            ("height", Real),
            ("width", Real),
            ("oblique", Real),
            ("genflag", Integer),
            ("lastheight", Real),
            ("font", Text),
            ("bigfont", Text),
            ("flags", Integer),
        ]),
        TableDefinition::new(BLOCKS, "Blocks", GeometryKind::PointZ).columns(&[
            ("handle", Integer),
            ("name", Text),
            ("flags", Integer),
        ]),
        entity_table(POINTS, "Points", GeometryKind::PointZ).columns(&EXTRUSION_COLUMNS),
        entity_table(LINES, "Lines", GeometryKind::LineStringZ).columns(&EXTRUSION_COLUMNS),
        entity_table(POLYLINES, "Polylines", GeometryKind::CompoundCurveZ)
            .column("width", Real)
            .columns(&EXTRUSION_COLUMNS),
        entity_table(TEXTS, "Texts", GeometryKind::PointZ)
            .columns(&[
                ("height", Real),
                ("text", Text),
                ("angle", Real),
                ("widthscale", Real),
                ("oblique", Real),
                ("style", Text),
                ("halign", Integer),
                ("valign", Integer),
            ])
            .columns(&EXTRUSION_COLUMNS),
        entity_table(HATCHES, "Hatches", GeometryKind::CurvePolygonZ).columns(&[
            ("pattern", Text),
            ("solid", Integer),
            ("associative", Integer),
            ("style", Integer),
            ("pangle", Real),
            ("pscale", Real),
            ("elevation", Real),
        ]),
        entity_table(INSERTS, "Inserts", GeometryKind::PointZ).columns(&[
            ("name", Text),
            ("xscale", Real),
            ("yscale", Real),
            ("zscale", Real),
            ("angle", Real),
            ("colcount", Integer),
            ("rowcount", Integer),
            ("colspacing", Real),
            ("rowspacing", Real),
            ("expanded", Integer),
        ]),
    ]
}
