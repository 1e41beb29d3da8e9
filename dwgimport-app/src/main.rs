use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use dwgimport_config::{AppConfig, ConfigError};
use dwgimport_engine::errors::ImportError;
use dwgimport_engine::session::{ImportOptions, ImportOutcome};

mod importer;

/// 把 DXF 图纸导入为规范化的几何表快照。
#[derive(Debug, Parser)]
#[command(name = "dwgimport", version)]
struct Cli {
    /// 待导入的图纸文件
    input: PathBuf,
    /// 输出快照路径，缺省为配置中的路径或与输入同名的 .json
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// 配置文件路径
    #[arg(long)]
    config: Option<PathBuf>,
    /// 不展开块参照
    #[arg(long)]
    no_expand: bool,
    /// 样条分段数
    #[arg(long)]
    spline_segments: Option<usize>,
    /// 忽略已有快照，强制重新导入
    #[arg(long)]
    force: bool,
}

fn main() {
    let cli = Cli::parse();
    let config = load_configuration(cli.config.clone());
    init_logging(&config);
    info!(input = %cli.input.display(), "启动图纸导入");

    if let Err(err) = run(&cli, &config) {
        error!(error = %err, "导入失败");
        eprintln!("导入失败：{err:#}");
        if let Some(ImportError::UnrecognizedFormat(_)) = err.downcast_ref::<ImportError>() {
            let formats = importer::FormatRegistry::new().available_formats();
            eprintln!("支持的格式：{}", formats.join(", "));
        }
        std::process::exit(1);
    }
}

fn run(cli: &Cli, config: &AppConfig) -> anyhow::Result<()> {
    let snapshot = cli
        .output
        .clone()
        .or_else(|| config.output.snapshot.clone())
        .unwrap_or_else(|| cli.input.with_extension("json"));
    let options = ImportOptions {
        spline_segments: cli.spline_segments.or(config.import.spline_segments),
        ellipse_segments: config.import.ellipse_segments,
        expand_inserts: config.import.expand_inserts && !cli.no_expand,
    };

    let report = importer::import_file(&cli.input, &snapshot, &options, cli.force)?;
    match report.outcome {
        ImportOutcome::UpToDate => {
            println!("{} 未变化，沿用 {}", cli.input.display(), report.snapshot.display());
        }
        ImportOutcome::Imported(stats) => {
            println!(
                "已导入 {} 条记录（跳过 {}，不支持 {}，展开块参照 {}）至 {}",
                stats.written,
                stats.skipped,
                stats.unsupported,
                stats.expansion.inserts,
                report.snapshot.display()
            );
        }
    }
    Ok(())
}

fn load_configuration(override_path: Option<PathBuf>) -> AppConfig {
    match override_path {
        Some(path) => AppConfig::from_file(&path).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "加载指定配置失败，使用默认配置");
            AppConfig::default()
        }),
        None => match AppConfig::discover() {
            Ok(cfg) => cfg,
            Err(err) => {
                match &err {
                    ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
                        warn!(path = %path.display(), error = %err, "加载默认配置失败，使用内建默认值");
                    }
                    ConfigError::Context { .. } => {
                        warn!(error = %err, "加载默认配置失败，使用内建默认值");
                    }
                }
                AppConfig::default()
            }
        },
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}
