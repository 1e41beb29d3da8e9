//! 块参照展开：在基础导入完成后，把块定义中的记录按插入变换复制到顶层。

use std::collections::{BTreeMap, HashMap};

use glam::{DAffine3, DVec3};
use tracing::{debug, info, warn};

use dwgimport_core::drawing::COLOR_BY_BLOCK;
use dwgimport_core::geometry::{Geometry, Point3};
use dwgimport_core::palette::LINEWEIGHT_BY_BLOCK;
use dwgimport_core::wkb;

use crate::errors::StoreError;
use crate::schema::{BLOCKS, ENTITY_TABLES, HATCHES, INSERTS, POLYLINES, TEXTS, TOP_LEVEL};
use crate::store::{FID, Feature, FeatureStore, FieldValue, StoredFeature};
use crate::style::Diagnostics;

/// 嵌套块参照的最大展开层数。
pub const MAX_DEPTH: usize = 16;

/// `expanded` 列取值：待展开。
pub const PENDING: i64 = 0;
/// `expanded` 列取值：已展开。
pub const EXPANDED: i64 = 1;
/// `expanded` 列取值：目标块不存在。
pub const UNRESOLVED: i64 = -1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpansionStats {
    pub passes: usize,
    pub inserts: usize,
    pub copies: usize,
    pub unresolved: usize,
    pub skipped: usize,
}

/// 按所属块句柄分组的块成员，组内按表顺序排列。
type BlockMembers = HashMap<i64, Vec<(&'static str, StoredFeature)>>;

#[derive(Debug, Clone, Copy)]
struct BlockRef {
    handle: i64,
    base: DVec3,
}

/// 一个待展开插入记录的变换参数与随块属性。
struct Placement {
    transforms: Vec<DAffine3>,
    angle: f64,
    scale: DVec3,
    /// 高度、线宽等长度属性的缩放系数。
    factor: f64,
    color: FieldValue,
    linewidth: FieldValue,
}

impl Placement {
    fn from_insert(insert: &Feature, block: BlockRef) -> Option<Self> {
        let Ok(Geometry::Point(insertion)) = wkb::decode(insert.geometry.as_deref()?) else {
            return None;
        };
        let real = |name: &str, default: f64| insert.real(name).unwrap_or(default);
        let angle = real("angle", 0.0);
        let scale = DVec3::new(real("xscale", 1.0), real("yscale", 1.0), real("zscale", 1.0));
        let columns = insert.integer("colcount").unwrap_or(1).max(1);
        let rows = insert.integer("rowcount").unwrap_or(1).max(1);
        let spacing = (real("colspacing", 0.0), real("rowspacing", 0.0));

        let rotation = DAffine3::from_rotation_z(angle.to_radians());
        let local = DAffine3::from_scale(scale)
            * rotation
            * DAffine3::from_translation(-block.base);
        let mut transforms = Vec::with_capacity((columns * rows) as usize);
        for row in 0..rows {
            for column in 0..columns {
                let cell = rotation.transform_vector3(DVec3::new(
                    column as f64 * spacing.0,
                    row as f64 * spacing.1,
                    0.0,
                ));
                transforms.push(DAffine3::from_translation(insertion.as_vec3() + cell) * local);
            }
        }
        Some(Self {
            transforms,
            angle,
            scale,
            factor: (scale.x * scale.y).abs().sqrt(),
            color: insert.get("color").cloned().unwrap_or(FieldValue::Null),
            linewidth: insert.get("linewidth").cloned().unwrap_or(FieldValue::Real(0.0)),
        })
    }

    /// 生成某条块成员记录在一个网格单元中的顶层副本。
    fn place(
        &self,
        table: &str,
        member: &Feature,
        transform: &DAffine3,
    ) -> Result<Feature, String> {
        let mut copy = member.clone();
        if let Some(bytes) = member.geometry.as_deref() {
            let geometry = wkb::decode(bytes).map_err(|err| err.to_string())?;
            copy.geometry = Some(wkb::encode(&geometry.transform(transform)));
        }
        copy.set("block", TOP_LEVEL);
        let scaled = |copy: &mut Feature, column: &str| {
            if let Some(value) = member.real(column) {
                copy.set(column, value * self.factor);
            }
        };
        match table {
            TEXTS => {
                copy.set("angle", member.real("angle").unwrap_or(0.0) + self.angle);
                scaled(&mut copy, "height");
            }
            POLYLINES => scaled(&mut copy, "width"),
            HATCHES => {
                copy.set("pangle", member.real("pangle").unwrap_or(0.0) + self.angle);
                scaled(&mut copy, "pscale");
            }
            INSERTS => {
                copy.set("angle", member.real("angle").unwrap_or(0.0) + self.angle);
                let factors = [
                    ("xscale", self.scale.x),
                    ("yscale", self.scale.y),
                    ("zscale", self.scale.z),
                ];
                for (column, factor) in factors {
                    copy.set(column, member.real(column).unwrap_or(1.0) * factor);
                }
                copy.set("expanded", PENDING);
            }
            _ => {}
        }
        if member.integer("ocolor") == Some(COLOR_BY_BLOCK as i64) {
            copy.set("color", self.color.clone());
        }
        if member.integer("lweight") == Some(LINEWEIGHT_BY_BLOCK as i64) {
            copy.set("linewidth", self.linewidth.clone());
        }
        Ok(copy)
    }
}

fn block_map(store: &dyn FeatureStore) -> Result<HashMap<String, BlockRef>, StoreError> {
    let mut blocks = HashMap::new();
    for row in store.features(BLOCKS)? {
        let (Some(name), Some(handle)) = (row.feature.text("name"), row.feature.integer("handle"))
        else {
            continue;
        };
        let base = match row.feature.geometry.as_deref().map(wkb::decode) {
            Some(Ok(Geometry::Point(point))) => point,
            _ => Point3::new(0.0, 0.0, 0.0),
        };
        blocks.insert(
            name.to_string(),
            BlockRef {
                handle,
                base: base.as_vec3(),
            },
        );
    }
    Ok(blocks)
}

fn block_members(store: &dyn FeatureStore) -> Result<BlockMembers, StoreError> {
    let mut members = BlockMembers::new();
    for table in ENTITY_TABLES {
        for row in store.features(table)? {
            match row.feature.integer("block") {
                Some(handle) if handle != TOP_LEVEL => {
                    members.entry(handle).or_default().push((table, row));
                }
                _ => {}
            }
        }
    }
    Ok(members)
}

fn pending_inserts(store: &dyn FeatureStore) -> Result<Vec<StoredFeature>, StoreError> {
    let mut pending: Vec<StoredFeature> = store
        .features(INSERTS)?
        .into_iter()
        .filter(|row| {
            row.feature.integer("block") == Some(TOP_LEVEL)
                && row.feature.integer("expanded").unwrap_or(PENDING) == PENDING
        })
        .collect();
    pending.sort_by_key(|row| row.id);
    Ok(pending)
}

fn mark(store: &mut dyn FeatureStore, id: u64, state: i64) -> Result<(), StoreError> {
    let fields = BTreeMap::from([("expanded".to_string(), FieldValue::Integer(state))]);
    store.update_feature(INSERTS, FID, &FieldValue::Integer(id as i64), fields)?;
    Ok(())
}

/// 展开所有尚未展开的顶层块参照，嵌套参照逐轮展开直至 [`MAX_DEPTH`]。
///
/// 已展开的参照被标记，重复调用不会产生新记录。展开只新增顶层记录，
/// 块成员在开始时一次性按块分组。
pub fn expand_inserts(
    store: &mut dyn FeatureStore,
    diagnostics: &mut Diagnostics,
) -> Result<ExpansionStats, StoreError> {
    let blocks = block_map(store)?;
    let members = block_members(store)?;
    let mut stats = ExpansionStats::default();

    for _ in 0..MAX_DEPTH {
        let pending = pending_inserts(store)?;
        if pending.is_empty() {
            break;
        }
        stats.passes += 1;
        for insert in pending {
            let name = insert.feature.text("name").unwrap_or_default().to_string();
            let placement = blocks
                .get(&name)
                .and_then(|block| Some((*block, Placement::from_insert(&insert.feature, *block)?)));
            let Some((block, placement)) = placement else {
                diagnostics.warn_once(
                    &format!("unknown-block:{name}"),
                    &format!("块参照引用了不存在的块 {name}，已跳过"),
                );
                stats.unresolved += 1;
                mark(store, insert.id, UNRESOLVED)?;
                continue;
            };

            let group = members.get(&block.handle).map(Vec::as_slice).unwrap_or_default();
            for (table, member) in group {
                let table: &str = table;
                for transform in &placement.transforms {
                    let copy = match placement.place(table, &member.feature, transform) {
                        Ok(copy) => copy,
                        Err(err) => {
                            warn!(table, id = member.id, error = %err, "块成员几何无法解码，已跳过");
                            stats.skipped += 1;
                            continue;
                        }
                    };
                    match store.create_feature(table, copy) {
                        Ok(_) => stats.copies += 1,
                        Err(err) => {
                            warn!(table, id = member.id, error = %err, "写入展开记录失败，已跳过");
                            stats.skipped += 1;
                        }
                    }
                }
            }
            mark(store, insert.id, EXPANDED)?;
            stats.inserts += 1;
            debug!(
                block = %name,
                id = insert.id,
                cells = placement.transforms.len(),
                "已展开块参照"
            );
        }
    }

    if !pending_inserts(store)?.is_empty() {
        diagnostics.warn_once(
            "insert-depth",
            &format!("块参照嵌套超过 {MAX_DEPTH} 层，剩余参照未展开"),
        );
    }
    info!(
        inserts = stats.inserts,
        copies = stats.copies,
        passes = stats.passes,
        "块参照展开完成"
    );
    Ok(stats)
}
