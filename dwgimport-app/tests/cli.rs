use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../dwgimport-io/tests/data/basic.dxf")
}

fn command(config_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("dwgimport-app").expect("binary should build");
    cmd.current_dir(config_dir).env_remove("DWGIMPORT_CONFIG");
    cmd
}

#[test]
fn imports_drawing_and_skips_unchanged_rerun() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("plan.dxf");
    fs::copy(fixture(), &input).expect("copy fixture");
    let output = dir.path().join("plan.snapshot.json");

    command(dir.path())
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("已导入"));

    let snapshot: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&output).expect("read snapshot"))
            .expect("snapshot should be json");
    assert!(snapshot.to_string().contains("\"lines\""));

    command(dir.path())
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("未变化"));

    command(dir.path())
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .arg("--force")
        .arg("--no-expand")
        .assert()
        .success()
        .stdout(predicate::str::contains("展开块参照 0"));
}

#[test]
fn default_snapshot_sits_next_to_input() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("site.dxf");
    fs::copy(fixture(), &input).expect("copy fixture");

    command(dir.path()).arg(&input).assert().success();
    assert!(dir.path().join("site.json").exists());
}

#[test]
fn config_file_supplies_snapshot_path() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("plan.dxf");
    fs::copy(fixture(), &input).expect("copy fixture");
    fs::create_dir(dir.path().join("config")).expect("create config dir");
    fs::write(
        dir.path().join("config").join("default.toml"),
        "[output]\nsnapshot = \"from-config.json\"\n",
    )
    .expect("write config");

    command(dir.path()).arg(&input).assert().success();
    assert!(dir.path().join("from-config.json").exists());
}

#[test]
fn unknown_extension_fails() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("notes.txt");
    fs::write(&input, "hello").expect("write input");

    command(dir.path())
        .arg(&input)
        .assert()
        .failure()
        .stderr(
            predicate::str::contains("is not a drawing exchange file")
                .and(predicate::str::contains("支持的格式：DWG, DXF")),
        );
}

#[test]
fn dwg_input_is_rejected() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("plan.dwg");
    fs::write(&input, b"AC1032").expect("write input");

    command(dir.path())
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("DWG files are not supported"));
}
