//! 表格式几何存储接口与内存实现。

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use dwgimport_core::wkb;

use crate::errors::StoreError;

/// 存储层分配的代理主键。
pub type FeatureId = u64;

/// `update_feature` 中表示按代理主键匹配的保留字段名。
pub const FID: &str = "fid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Integer,
    Real,
    Text,
}

impl FieldType {
    fn describe(self) -> &'static str {
        match self {
            FieldType::Integer => "an integer",
            FieldType::Real => "a real number",
            FieldType::Text => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// 整数列也可按浮点读取。
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Real(value) => Some(*value),
            FieldValue::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => Some(value),
            _ => None,
        }
    }

    fn fits(&self, kind: FieldType) -> bool {
        matches!(
            (self, kind),
            (FieldValue::Null, _)
                | (FieldValue::Integer(_), FieldType::Integer)
                | (FieldValue::Integer(_), FieldType::Real)
                | (FieldValue::Real(_), FieldType::Real)
                | (FieldValue::Text(_), FieldType::Text)
        )
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Integer(i64::from(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Integer(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Real(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

/// 表的几何类型；`None` 表示纯属性表。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryKind {
    None,
    PointZ,
    LineStringZ,
    CompoundCurveZ,
    CurvePolygonZ,
}

impl GeometryKind {
    fn wkb_type(self) -> Option<u32> {
        match self {
            GeometryKind::None => None,
            GeometryKind::PointZ => Some(wkb::WKB_POINT_Z),
            GeometryKind::LineStringZ => Some(wkb::WKB_LINESTRING_Z),
            GeometryKind::CompoundCurveZ => Some(wkb::WKB_COMPOUNDCURVE_Z),
            GeometryKind::CurvePolygonZ => Some(wkb::WKB_CURVEPOLYGON_Z),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: FieldType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub description: String,
    pub geometry: GeometryKind,
    pub columns: Vec<Column>,
}

impl TableDefinition {
    pub fn new(name: &str, description: &str, geometry: GeometryKind) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            geometry,
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, name: &str, kind: FieldType) -> Self {
        self.columns.push(Column {
            name: name.to_string(),
            kind,
        });
        self
    }

    pub fn columns(mut self, columns: &[(&str, FieldType)]) -> Self {
        for (name, kind) in columns {
            self = self.column(name, *kind);
        }
        self
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.columns
            .iter()
            .find(|column| column.name == name)
            .map(|column| column.kind)
    }
}

/// 待写入的一条记录：字段映射加可选的 WKB 几何。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Feature {
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(default, with = "hex_bytes")]
    pub geometry: Option<Vec<u8>>,
}

impl Feature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> &mut Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn with_geometry(mut self, geometry: Vec<u8>) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(FieldValue::as_i64)
    }

    pub fn real(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(FieldValue::as_f64)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFeature {
    pub id: FeatureId,
    pub feature: Feature,
}

/// 输出存储的协作接口。单线程使用，同一时刻至多一个事务。
pub trait FeatureStore {
    fn create_table(&mut self, definition: TableDefinition, overwrite: bool)
    -> Result<(), StoreError>;

    fn table(&self, name: &str) -> Option<&TableDefinition>;

    fn begin_transaction(&mut self) -> Result<(), StoreError>;

    fn commit_transaction(&mut self) -> Result<(), StoreError>;

    fn rollback_transaction(&mut self) -> Result<(), StoreError>;

    fn create_feature(&mut self, table: &str, feature: Feature) -> Result<FeatureId, StoreError>;

    /// 更新 `key` 字段等于 `value` 的所有记录，返回受影响的行数。`key` 为 [`FID`] 时按主键匹配。
    fn update_feature(
        &mut self,
        table: &str,
        key: &str,
        value: &FieldValue,
        fields: BTreeMap<String, FieldValue>,
    ) -> Result<usize, StoreError>;

    /// 按主键升序返回表中全部记录。
    fn features(&self, table: &str) -> Result<Vec<StoredFeature>, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MemoryTable {
    definition: TableDefinition,
    rows: Vec<StoredFeature>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
struct StoreState {
    tables: BTreeMap<String, MemoryTable>,
    next_id: FeatureId,
}

/// 进程内存储，可整体序列化为 JSON 快照。
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: StoreState,
    saved: Option<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从快照文件加载；文件不存在时返回空存储。
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path).map_err(|source| StoreError::SnapshotIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, StoreError> {
        let state: StoreState = serde_json::from_str(content)?;
        Ok(Self { state, saved: None })
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(&self.state)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let content = self.to_json()?;
        fs::write(path, content).map_err(|source| StoreError::SnapshotIo {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), tables = self.state.tables.len(), "已写入存储快照");
        Ok(())
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.state.tables.keys().map(String::as_str)
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.state
            .tables
            .get(table)
            .map(|table| table.rows.len())
            .unwrap_or(0)
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable, StoreError> {
        self.state
            .tables
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }
}

fn validate_fields<'f>(
    definition: &TableDefinition,
    fields: impl IntoIterator<Item = (&'f String, &'f FieldValue)>,
) -> Result<(), StoreError> {
    for (name, value) in fields {
        let kind = definition
            .field_type(name)
            .ok_or_else(|| StoreError::UnknownField {
                table: definition.name.clone(),
                field: name.clone(),
            })?;
        if !value.fits(kind) {
            return Err(StoreError::TypeMismatch {
                table: definition.name.clone(),
                field: name.clone(),
                expected: kind.describe(),
            });
        }
    }
    Ok(())
}

fn validate_geometry(definition: &TableDefinition, geometry: Option<&[u8]>) -> Result<(), StoreError> {
    match (definition.geometry.wkb_type(), geometry) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err(StoreError::GeometryMismatch {
            table: definition.name.clone(),
            expected: "no".to_string(),
            found: "a".to_string(),
        }),
        (Some(_), None) => Err(StoreError::MissingGeometry(definition.name.clone())),
        (Some(expected), Some(bytes)) => {
            let found = bytes
                .get(1..5)
                .and_then(|raw| raw.try_into().ok())
                .map(u32::from_le_bytes);
            if found == Some(expected) {
                Ok(())
            } else {
                Err(StoreError::GeometryMismatch {
                    table: definition.name.clone(),
                    expected: format!("{:?}", definition.geometry),
                    found: found.map_or_else(|| "truncated".to_string(), |kind| kind.to_string()),
                })
            }
        }
    }
}

impl FeatureStore for MemoryStore {
    fn create_table(
        &mut self,
        definition: TableDefinition,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        if self.state.tables.contains_key(&definition.name) && !overwrite {
            return Err(StoreError::TableExists(definition.name));
        }
        debug!(table = %definition.name, geometry = ?definition.geometry, "创建表");
        self.state.tables.insert(
            definition.name.clone(),
            MemoryTable {
                definition,
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    fn table(&self, name: &str) -> Option<&TableDefinition> {
        self.state.tables.get(name).map(|table| &table.definition)
    }

    fn begin_transaction(&mut self) -> Result<(), StoreError> {
        if self.saved.is_some() {
            return Err(StoreError::TransactionOpen);
        }
        self.saved = Some(self.state.clone());
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<(), StoreError> {
        self.saved.take().map(|_| ()).ok_or(StoreError::NoTransaction)
    }

    fn rollback_transaction(&mut self) -> Result<(), StoreError> {
        let saved = self.saved.take().ok_or(StoreError::NoTransaction)?;
        self.state = saved;
        Ok(())
    }

    fn create_feature(&mut self, table: &str, feature: Feature) -> Result<FeatureId, StoreError> {
        let id = self.state.next_id + 1;
        let target = self.table_mut(table)?;
        validate_fields(&target.definition, &feature.fields)?;
        validate_geometry(&target.definition, feature.geometry.as_deref())?;
        target.rows.push(StoredFeature { id, feature });
        self.state.next_id = id;
        Ok(id)
    }

    fn update_feature(
        &mut self,
        table: &str,
        key: &str,
        value: &FieldValue,
        fields: BTreeMap<String, FieldValue>,
    ) -> Result<usize, StoreError> {
        let target = self.table_mut(table)?;
        validate_fields(&target.definition, &fields)?;
        if key != FID && target.definition.field_type(key).is_none() {
            return Err(StoreError::UnknownField {
                table: table.to_string(),
                field: key.to_string(),
            });
        }
        let mut updated = 0;
        for row in &mut target.rows {
            let matches = if key == FID {
                value.as_i64() == Some(row.id as i64)
            } else {
                row.feature.fields.get(key) == Some(value)
            };
            if matches {
                for (name, new_value) in &fields {
                    row.feature.fields.insert(name.clone(), new_value.clone());
                }
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn features(&self, table: &str) -> Result<Vec<StoredFeature>, StoreError> {
        self.state
            .tables
            .get(table)
            .map(|table| table.rows.clone())
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
    }
}

/// 快照中的 WKB 以十六进制字符串保存。
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => {
                let encoded: String = bytes.iter().map(|byte| format!("{byte:02x}")).collect();
                serializer.serialize_some(&encoded)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let Some(encoded) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        if encoded.len() % 2 != 0 {
            return Err(D::Error::custom("十六进制几何长度必须为偶数"));
        }
        (0..encoded.len())
            .step_by(2)
            .map(|index| {
                encoded
                    .get(index..index + 2)
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                    .ok_or_else(|| D::Error::custom("无效的十六进制几何"))
            })
            .collect::<Result<Vec<u8>, D::Error>>()
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dwgimport_core::geometry::{Geometry, LineString, Point3};

    fn lines_table() -> TableDefinition {
        TableDefinition::new("lines", "lines", GeometryKind::LineStringZ)
            .column("handle", FieldType::Integer)
            .column("layer", FieldType::Text)
            .column("width", FieldType::Real)
    }

    fn segment() -> Vec<u8> {
        wkb::encode(&Geometry::LineString(LineString::new(vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
        ])))
    }

    #[test]
    fn create_feature_validates_fields_and_geometry() {
        let mut store = MemoryStore::new();
        store.create_table(lines_table(), false).expect("创建表");

        let id = store
            .create_feature(
                "lines",
                Feature::new()
                    .with("handle", 1i64)
                    .with("layer", "0")
                    .with("width", 1i64)
                    .with_geometry(segment()),
            )
            .expect("写入合法记录");
        assert_eq!(id, 1);

        let unknown = store.create_feature(
            "lines",
            Feature::new().with("colour", "red").with_geometry(segment()),
        );
        assert!(matches!(unknown, Err(StoreError::UnknownField { .. })));

        let mismatched = store.create_feature(
            "lines",
            Feature::new().with("layer", 3i64).with_geometry(segment()),
        );
        assert!(matches!(mismatched, Err(StoreError::TypeMismatch { .. })));

        let point = wkb::encode(&Geometry::Point(Point3::new(0.0, 0.0, 0.0)));
        let wrong_geometry = store.create_feature("lines", Feature::new().with_geometry(point));
        assert!(matches!(wrong_geometry, Err(StoreError::GeometryMismatch { .. })));

        let missing = store.create_feature("lines", Feature::new());
        assert!(matches!(missing, Err(StoreError::MissingGeometry(_))));
        assert_eq!(store.row_count("lines"), 1);
    }

    #[test]
    fn create_table_respects_overwrite_flag() {
        let mut store = MemoryStore::new();
        store.create_table(lines_table(), false).expect("创建表");
        store
            .create_feature("lines", Feature::new().with_geometry(segment()))
            .expect("写入记录");
        assert!(matches!(
            store.create_table(lines_table(), false),
            Err(StoreError::TableExists(_))
        ));
        store.create_table(lines_table(), true).expect("覆盖表");
        assert_eq!(store.row_count("lines"), 0);
    }

    #[test]
    fn rollback_restores_previous_state() {
        let mut store = MemoryStore::new();
        store.begin_transaction().expect("开启事务");
        assert!(matches!(
            store.begin_transaction(),
            Err(StoreError::TransactionOpen)
        ));
        store.create_table(lines_table(), false).expect("创建表");
        store.rollback_transaction().expect("回滚");
        assert!(store.table("lines").is_none());
        assert!(matches!(
            store.commit_transaction(),
            Err(StoreError::NoTransaction)
        ));
    }

    #[test]
    fn update_feature_matches_by_key_or_fid() {
        let mut store = MemoryStore::new();
        store.create_table(lines_table(), false).expect("创建表");
        let first = store
            .create_feature(
                "lines",
                Feature::new().with("layer", "A").with_geometry(segment()),
            )
            .expect("写入");
        store
            .create_feature(
                "lines",
                Feature::new().with("layer", "A").with_geometry(segment()),
            )
            .expect("写入");

        let mut fields = BTreeMap::new();
        fields.insert("width".to_string(), FieldValue::Real(2.0));
        let updated = store
            .update_feature("lines", "layer", &FieldValue::from("A"), fields.clone())
            .expect("按字段更新");
        assert_eq!(updated, 2);

        fields.insert("width".to_string(), FieldValue::Real(5.0));
        let updated = store
            .update_feature("lines", FID, &FieldValue::Integer(first as i64), fields)
            .expect("按主键更新");
        assert_eq!(updated, 1);

        let rows = store.features("lines").expect("读取");
        assert_eq!(rows[0].feature.real("width"), Some(5.0));
        assert_eq!(rows[1].feature.real("width"), Some(2.0));
    }

    #[test]
    fn snapshot_round_trips_through_file() {
        let dir = tempfile::tempdir().expect("创建临时目录");
        let path = dir.path().join("store.json");
        let mut store = MemoryStore::new();
        store.create_table(lines_table(), false).expect("创建表");
        store
            .create_feature(
                "lines",
                Feature::new().with("handle", 42i64).with_geometry(segment()),
            )
            .expect("写入");
        store.save(&path).expect("保存快照");

        let content = std::fs::read_to_string(&path).expect("读取快照");
        assert!(content.contains("\"geometry\": \"01ea030000"));

        let reopened = MemoryStore::open(&path).expect("加载快照");
        assert_eq!(reopened.features("lines").expect("读取"), store.features("lines").expect("读取"));
        let empty = MemoryStore::open(&dir.path().join("missing.json")).expect("空存储");
        assert_eq!(empty.table_names().count(), 0);
    }
}
