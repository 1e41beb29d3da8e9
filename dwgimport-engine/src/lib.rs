pub mod expander;
pub mod normalizer;
pub mod schema;
pub mod session;
pub mod store;
pub mod style;

pub mod errors {
    use std::path::PathBuf;

    use thiserror::Error;

    /// 存储层错误。单条记录的写入失败由调用方记录后跳过。
    #[derive(Debug, Error)]
    pub enum StoreError {
        #[error("table `{0}` does not exist")]
        UnknownTable(String),
        #[error("table `{0}` already exists")]
        TableExists(String),
        #[error("table `{table}` has no field `{field}`")]
        UnknownField { table: String, field: String },
        #[error("field `{table}.{field}` expects {expected}")]
        TypeMismatch {
            table: String,
            field: String,
            expected: &'static str,
        },
        #[error("table `{table}` expects {expected} geometry, got {found}")]
        GeometryMismatch {
            table: String,
            expected: String,
            found: String,
        },
        #[error("table `{0}` requires a geometry")]
        MissingGeometry(String),
        #[error("a transaction is already open")]
        TransactionOpen,
        #[error("no transaction is open")]
        NoTransaction,
        #[error("snapshot {path:?}: {source}")]
        SnapshotIo {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("snapshot encoding: {0}")]
        SnapshotFormat(#[from] serde_json::Error),
    }

    /// 导入过程的致命错误。
    #[derive(Debug, Error)]
    pub enum ImportError {
        #[error("failed to create output schema: {0}")]
        Schema(#[source] StoreError),
        #[error("failed to read output store: {0}")]
        Store(#[from] StoreError),
        #[error("source {path:?} is unreadable: {source}")]
        Unreadable {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("{0:?} is not a drawing exchange file")]
        UnrecognizedFormat(PathBuf),
        #[error("{path:?}: {format} files are not supported")]
        UnsupportedFormat { path: PathBuf, format: String },
        #[error("failed to parse source: {0}")]
        Source(#[source] Box<dyn std::error::Error + Send + Sync>),
    }
}
