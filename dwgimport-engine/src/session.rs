//! 导入会话：输出表的生命周期、新鲜度判断与各阶段的编排。

use std::path::Path;

use tracing::{info, warn};

use dwgimport_core::drawing::DrawingSource;

use crate::errors::{ImportError, StoreError};
use crate::expander::{ExpansionStats, expand_inserts};
use crate::normalizer::ImportSession;
use crate::schema::{DRAWING, table_definitions};
use crate::store::{Feature, FeatureStore};

/// 单次导入的参数。
#[derive(Debug, Clone, PartialEq)]
pub struct ImportOptions {
    /// 覆盖头部变量 `$SPLINESEGS` 的样条分段数。
    pub spline_segments: Option<usize>,
    /// 整椭圆采样段数。
    pub ellipse_segments: usize,
    pub expand_inserts: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            spline_segments: None,
            ellipse_segments: 64,
            expand_inserts: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportStats {
    /// 成功写入的记录数（不含块展开产生的副本）。
    pub written: usize,
    /// 写入失败或几何退化而跳过的记录数。
    pub skipped: usize,
    /// 因类型不受支持而丢弃的实体数。
    pub unsupported: usize,
    pub expansion: ExpansionStats,
    /// 本次导入提示过的问题类别。
    pub diagnostics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// 存储中已有同一来源且不旧于源文件的导入结果。
    UpToDate,
    Imported(ImportStats),
}

/// 存储中记录的来源是否已是最新。
pub fn is_up_to_date(
    store: &dyn FeatureStore,
    path: &Path,
    last_modified: i64,
) -> Result<bool, StoreError> {
    if store.table(DRAWING).is_none() {
        return Ok(false);
    }
    let path = path.to_string_lossy();
    Ok(store.features(DRAWING)?.iter().any(|row| {
        row.feature.text("path") == Some(path.as_ref())
            && row
                .feature
                .integer("lastmodified")
                .is_some_and(|stored| stored >= last_modified)
    }))
}

/// 重建全部输出表。任一表创建失败时回滚。
pub fn create_schema(store: &mut dyn FeatureStore) -> Result<(), StoreError> {
    store.begin_transaction()?;
    for definition in table_definitions() {
        let name = definition.name.clone();
        if let Err(err) = store.create_table(definition, true) {
            warn!(table = %name, error = %err, "创建输出表失败，回滚");
            store.rollback_transaction()?;
            return Err(err);
        }
    }
    store.commit_transaction()
}

/// 把一个图纸来源导入存储。
///
/// `path` 为来源的规范路径，`last_modified` 为其修改时间（Unix 秒），二者用于
/// 判断是否需要重新导入。失败时已写入的部分不会被清理。
pub fn import_drawing<S: DrawingSource>(
    store: &mut dyn FeatureStore,
    source: &mut S,
    path: &Path,
    last_modified: i64,
    options: &ImportOptions,
) -> Result<ImportOutcome, ImportError> {
    if is_up_to_date(store, path, last_modified)? {
        info!(path = %path.display(), "来源未变化，跳过导入");
        return Ok(ImportOutcome::UpToDate);
    }

    create_schema(store).map_err(ImportError::Schema)?;
    info!(path = %path.display(), "输出表已创建");

    let mut session = ImportSession::new(store, options.clone());
    source
        .read(&mut session)
        .map_err(|err| ImportError::Source(Box::new(err)))?;
    let normalized = session.finish();
    let mut stats = normalized.stats;
    let mut diagnostics = normalized.diagnostics;

    let drawing = Feature::new()
        .with("path", path.to_string_lossy().into_owned())
        .with("comments", normalized.comments.join("\n"))
        .with("importtime", unix_now())
        .with("lastmodified", last_modified);
    store.create_feature(DRAWING, drawing)?;

    if options.expand_inserts {
        stats.expansion = expand_inserts(store, &mut diagnostics)?;
    }
    stats.diagnostics = diagnostics.classes();
    info!(
        written = stats.written,
        skipped = stats.skipped,
        unsupported = stats.unsupported,
        expanded = stats.expansion.inserts,
        diagnostics = stats.diagnostics.len(),
        "导入完成"
    );
    Ok(ImportOutcome::Imported(stats))
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    use dwgimport_core::drawing::DrawingReceiver;

    use crate::store::MemoryStore;

    #[derive(Debug)]
    struct Broken;

    impl fmt::Display for Broken {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("broken source")
        }
    }

    impl std::error::Error for Broken {}

    struct EmptySource;

    impl DrawingSource for EmptySource {
        type Error = Broken;

        fn read(&mut self, _receiver: &mut dyn DrawingReceiver) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    struct FailingSource;

    impl DrawingSource for FailingSource {
        type Error = Broken;

        fn read(&mut self, _receiver: &mut dyn DrawingReceiver) -> Result<(), Self::Error> {
            Err(Broken)
        }
    }

    #[test]
    fn second_import_of_unchanged_source_is_skipped() {
        let mut store = MemoryStore::new();
        let path = Path::new("/data/plan.dxf");
        let options = ImportOptions::default();

        let first = import_drawing(&mut store, &mut EmptySource, path, 100, &options)
            .expect("首次导入应成功");
        assert!(matches!(first, ImportOutcome::Imported(_)));
        assert_eq!(store.row_count(DRAWING), 1);

        let second = import_drawing(&mut store, &mut EmptySource, path, 100, &options)
            .expect("再次导入应成功");
        assert_eq!(second, ImportOutcome::UpToDate);

        let newer = import_drawing(&mut store, &mut EmptySource, path, 200, &options)
            .expect("源文件更新后应重新导入");
        assert!(matches!(newer, ImportOutcome::Imported(_)));
        assert_eq!(store.row_count(DRAWING), 1);
    }

    #[test]
    fn source_errors_are_fatal() {
        let mut store = MemoryStore::new();
        let result = import_drawing(
            &mut store,
            &mut FailingSource,
            Path::new("bad.dxf"),
            0,
            &ImportOptions::default(),
        );
        match result {
            Err(ImportError::Source(err)) => assert_eq!(err.to_string(), "broken source"),
            other => panic!("应返回来源错误: {other:?}"),
        }
    }

    #[test]
    fn schema_is_created_inside_a_committed_transaction() {
        let mut store = MemoryStore::new();
        create_schema(&mut store).expect("创建表应成功");
        assert_eq!(store.table_names().count(), 13);
        assert!(matches!(
            store.commit_transaction(),
            Err(StoreError::NoTransaction)
        ));
    }
}
