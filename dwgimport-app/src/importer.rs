use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::info;

use dwgimport_engine::errors::ImportError;
use dwgimport_engine::session::{ImportOptions, ImportOutcome, import_drawing};
use dwgimport_engine::store::{FeatureStore, MemoryStore};
use dwgimport_io::DxfSource;

/// 一次文件导入的输入。
pub struct ImportRequest<'a> {
    /// 规范化后的来源路径。
    pub path: &'a Path,
    /// 来源的修改时间（Unix 秒）。
    pub last_modified: i64,
    pub options: &'a ImportOptions,
}

pub trait FormatHandler {
    fn name(&self) -> &'static str;
    fn extensions(&self) -> &'static [&'static str];
    fn import(
        &self,
        request: &ImportRequest<'_>,
        store: &mut dyn FeatureStore,
    ) -> Result<ImportOutcome, ImportError>;
}

/// 按扩展名分派到具体格式的导入器。
pub struct FormatRegistry {
    handlers: HashMap<&'static str, Box<dyn FormatHandler>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        registry.register(DxfFormat);
        registry.register(DwgFormat);
        registry
    }

    pub fn register<H: FormatHandler + 'static>(&mut self, handler: H) {
        self.handlers.insert(handler.name(), Box::new(handler));
    }

    pub fn handler_for(&self, path: &Path) -> Result<&dyn FormatHandler, ImportError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        self.handlers
            .values()
            .find(|handler| handler.extensions().contains(&extension.as_str()))
            .map(|handler| handler.as_ref())
            .ok_or_else(|| ImportError::UnrecognizedFormat(path.to_path_buf()))
    }

    pub fn available_formats(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

struct DxfFormat;

impl FormatHandler for DxfFormat {
    fn name(&self) -> &'static str {
        "DXF"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["dxf"]
    }

    fn import(
        &self,
        request: &ImportRequest<'_>,
        store: &mut dyn FeatureStore,
    ) -> Result<ImportOutcome, ImportError> {
        let mut source =
            DxfSource::from_path(request.path).map_err(|err| ImportError::Source(Box::new(err)))?;
        import_drawing(
            store,
            &mut source,
            request.path,
            request.last_modified,
            request.options,
        )
    }
}

struct DwgFormat;

impl FormatHandler for DwgFormat {
    fn name(&self) -> &'static str {
        "DWG"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["dwg"]
    }

    fn import(
        &self,
        request: &ImportRequest<'_>,
        _store: &mut dyn FeatureStore,
    ) -> Result<ImportOutcome, ImportError> {
        Err(ImportError::UnsupportedFormat {
            path: request.path.to_path_buf(),
            format: self.name().to_string(),
        })
    }
}

#[derive(Debug)]
pub struct ImportReport {
    pub outcome: ImportOutcome,
    pub snapshot: PathBuf,
}

/// 导入单个文件并把结果写入快照。`force` 为真时忽略已有快照。
pub fn import_file(
    input: &Path,
    snapshot: &Path,
    options: &ImportOptions,
    force: bool,
) -> anyhow::Result<ImportReport> {
    let unreadable = |source: std::io::Error| ImportError::Unreadable {
        path: input.to_path_buf(),
        source,
    };
    let path = fs::canonicalize(input).map_err(unreadable)?;
    let modified = fs::metadata(&path)
        .and_then(|meta| meta.modified())
        .map_err(unreadable)?;
    let last_modified = modified
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default();

    let registry = FormatRegistry::new();
    let handler = registry.handler_for(&path)?;

    let mut store = if force {
        MemoryStore::new()
    } else {
        MemoryStore::open(snapshot)?
    };
    let request = ImportRequest {
        path: &path,
        last_modified,
        options,
    };
    info!(path = %path.display(), format = handler.name(), "开始导入");
    let outcome = handler.import(&request, &mut store)?;
    if let ImportOutcome::Imported(_) = outcome {
        store.save(snapshot)?;
        info!(snapshot = %snapshot.display(), "快照已保存");
    }
    Ok(ImportReport {
        outcome,
        snapshot: snapshot.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_dispatch_case_insensitively() {
        let registry = FormatRegistry::new();
        let handler = registry
            .handler_for(Path::new("plans/Floor.DXF"))
            .expect("应识别 DXF");
        assert_eq!(handler.name(), "DXF");
        assert_eq!(registry.available_formats(), vec!["DWG", "DXF"]);
        assert!(matches!(
            registry.handler_for(Path::new("notes.txt")),
            Err(ImportError::UnrecognizedFormat(_))
        ));
        assert!(matches!(
            registry.handler_for(Path::new("no_extension")),
            Err(ImportError::UnrecognizedFormat(_))
        ));
    }

    #[test]
    fn dwg_files_are_reported_as_unsupported() {
        let dir = tempfile::tempdir().expect("创建临时目录失败");
        let input = dir.path().join("plan.dwg");
        fs::write(&input, b"AC1027").expect("写入样例失败");
        let err = import_file(
            &input,
            &dir.path().join("out.json"),
            &ImportOptions::default(),
            false,
        )
        .expect_err("DWG 不受支持");
        assert!(matches!(
            err.downcast_ref::<ImportError>(),
            Some(ImportError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn missing_input_is_unreadable() {
        let dir = tempfile::tempdir().expect("创建临时目录失败");
        let err = import_file(
            &dir.path().join("absent.dxf"),
            &dir.path().join("out.json"),
            &ImportOptions::default(),
            false,
        )
        .expect_err("文件不存在");
        assert!(matches!(
            err.downcast_ref::<ImportError>(),
            Some(ImportError::Unreadable { .. })
        ));
    }
}
