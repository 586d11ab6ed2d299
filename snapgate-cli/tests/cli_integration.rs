//! CLI integration tests for snapgate-cli.
//!
//! These tests run the actual binary against a temporary store directory and
//! check outputs, exit codes, and stored artifacts.

use assert_cmd::Command;
use image::{Rgb, RgbImage};
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Get a Command for the snapgate binary bound to `store`.
fn snapgate(store: &Path) -> Command {
    let mut cmd = Command::cargo_bin("snapgate").unwrap();
    cmd.env("SNAPGATE_STORE", store)
        .env_remove("SNAPGATE_RUN")
        .env_remove("SNAPGATE_APPROVALS_KEY")
        .env_remove("SNAPGATE_UPDATE")
        .env_remove("SNAPGATE_FORCE_UPDATE")
        .env_remove("SNAPGATE_NORMALIZE")
        .env_remove("SNAPGATE_PREFIX")
        .env_remove("SNAPGATE_THRESHOLD")
        .env_remove("RUST_LOG");
    cmd
}

fn write_page(dir: &Path, name: &str, banner: bool) -> PathBuf {
    let img = RgbImage::from_fn(96, 96, |x, y| {
        if banner && y < 24 {
            let v = if (x / 6) % 2 == 0 { 15 } else { 250 };
            Rgb([v, v, v])
        } else {
            let v = (x * 200 / 96) as u8;
            Rgb([v, v, (y * 2) as u8])
        }
    });
    let path = dir.join(name);
    img.save(&path).unwrap();
    path
}

struct Fixture {
    dir: TempDir,
    store: PathBuf,
    baseline: PathBuf,
    changed: PathBuf,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = dir.path().join("store");
    let baseline = write_page(dir.path(), "home.png", false);
    let changed = write_page(dir.path(), "home-changed.png", true);
    Fixture {
        dir,
        store,
        baseline,
        changed,
    }
}

fn compare(f: &Fixture, file: &Path) -> Command {
    let mut cmd = snapgate(&f.store);
    cmd.args(["compare", "--run", "run-1", "--baseline", "home"])
        .arg(file);
    cmd
}

// ============================================================================
// Help and Version Tests
// ============================================================================

#[test]
fn test_help_lists_commands_and_exit_codes() {
    let f = fixture();
    snapgate(&f.store)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Perceptual-hash visual regression checks"))
        .stdout(predicate::str::contains("compare"))
        .stdout(predicate::str::contains("approve"))
        .stdout(predicate::str::contains("copy-baseline"))
        .stdout(predicate::str::contains("Exit codes:"))
        .stdout(predicate::str::contains("65"));
}

#[test]
fn test_version_displays_version() {
    let f = fixture();
    snapgate(&f.store)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("snapgate"));
}

// ============================================================================
// Hash Tests
// ============================================================================

#[test]
fn test_hash_is_stable() {
    let f = fixture();
    let first = snapgate(&f.store)
        .args(["--quiet", "hash"])
        .arg(&f.baseline)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let second = snapgate(&f.store)
        .args(["--quiet", "hash"])
        .arg(&f.baseline)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(first, second);
    assert!(!String::from_utf8(first).unwrap().trim().is_empty());
}

#[test]
fn test_hash_reports_bit_length() {
    let f = fixture();
    snapgate(&f.store)
        .args(["hash", "--bits", "256"])
        .arg(&f.baseline)
        .assert()
        .success()
        .stdout(predicate::str::contains("240 of budget 256"));
}

#[test]
fn test_hash_missing_file_is_no_input() {
    let f = fixture();
    snapgate(&f.store)
        .args(["hash", "/nonexistent/shot.png"])
        .assert()
        .code(66)
        .stderr(predicate::str::contains("Failed to read image"));
}

// ============================================================================
// Compare Tests
// ============================================================================

#[test]
fn test_compare_publishes_then_equal() {
    let f = fixture();
    compare(&f, &f.baseline)
        .assert()
        .success()
        .stdout(predicate::str::contains("PUBLISHED"));
    assert!(f.store.join("home.blob").exists());
    assert!(f.store.join("home.meta.json").exists());

    compare(&f, &f.baseline)
        .assert()
        .success()
        .stdout(predicate::str::contains("EQUAL"));
}

#[test]
fn test_compare_changed_needs_approval() {
    let f = fixture();
    compare(&f, &f.baseline).assert().success();

    compare(&f, &f.changed)
        .assert()
        .code(65)
        .stdout(predicate::str::contains("CHANGED"))
        .stdout(predicate::str::contains("the page changed"))
        .stdout(predicate::str::contains("please approve: file://"));

    snapgate(&f.store)
        .args(["--quiet", "changes", "run-1"])
        .assert()
        .success()
        .stdout(predicate::str::diff("home\n"));
}

#[test]
fn test_compare_against_image_file() {
    let f = fixture();
    snapgate(&f.store)
        .args(["compare", "--run", "run-2", "--against-image"])
        .arg(&f.baseline)
        .arg(&f.baseline)
        .assert()
        .success()
        .stdout(predicate::str::contains("EQUAL"));
}

#[test]
fn test_compare_mask_hides_banner() {
    let f = fixture();
    compare(&f, &f.baseline)
        .args(["--mask", "0,0,96,24"])
        .assert()
        .success();
    compare(&f, &f.changed)
        .args(["--mask", "0,0,96,24"])
        .assert()
        .success()
        .stdout(predicate::str::contains("EQUAL"));
}

#[test]
fn test_compare_mask_accepts_fill_colour() {
    let f = fixture();
    compare(&f, &f.baseline)
        .args(["--mask", "0,0,96,24,#ffffff"])
        .assert()
        .success();
    compare(&f, &f.changed)
        .args(["--mask", "0,0,96,24,#ffffff"])
        .assert()
        .success()
        .stdout(predicate::str::contains("EQUAL"));
}

#[test]
fn test_compare_rejects_bad_mask_colour() {
    let f = fixture();
    compare(&f, &f.baseline)
        .args(["--mask", "0,0,96,24,#fff"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("#rrggbb"));
}

#[test]
fn test_compare_requires_run() {
    let f = fixture();
    snapgate(&f.store)
        .args(["compare", "--baseline", "home"])
        .arg(&f.baseline)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--run"));
}

#[test]
fn test_compare_rejects_bad_mask() {
    let f = fixture();
    compare(&f, &f.baseline)
        .args(["--mask", "1,2,3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("x,y,width,height"));
}

#[test]
fn test_approvals_without_key_is_usage_error() {
    let f = fixture();
    compare(&f, &f.baseline).assert().success();
    compare(&f, &f.changed)
        .args(["--approvals", ""])
        .assert()
        .code(64);
}

// ============================================================================
// Review Workflow Tests
// ============================================================================

#[test]
fn test_approve_change_then_compare_passes() {
    let f = fixture();
    compare(&f, &f.baseline).assert().success();
    compare(&f, &f.changed).assert().code(65);

    snapgate(&f.store)
        .args([
            "approve",
            "--approvals",
            "approvals/web",
            "--run",
            "run-1",
            "--change",
            "home",
            "--approver",
            "qa",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("APPROVED"));

    compare(&f, &f.changed)
        .args(["--approvals", "approvals/web"])
        .assert()
        .success()
        .stdout(predicate::str::contains("approved by qa"));

    snapgate(&f.store)
        .args(["changes", "run-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no pending changes"));
}

#[test]
fn test_approve_with_promote_replaces_baseline() {
    let f = fixture();
    compare(&f, &f.baseline).assert().success();
    compare(&f, &f.changed).assert().code(65);

    snapgate(&f.store)
        .args([
            "approve",
            "--approvals",
            "approvals/web",
            "--run",
            "run-1",
            "--change",
            "home",
            "--promote",
        ])
        .assert()
        .success();

    compare(&f, &f.changed)
        .assert()
        .success()
        .stdout(predicate::str::contains("EQUAL"));
}

#[test]
fn test_approve_then_decline_hash() {
    let f = fixture();
    compare(&f, &f.baseline).assert().success();
    let output = compare(&f, &f.changed)
        .arg("--quiet")
        .assert()
        .code(65)
        .get_output()
        .stdout
        .clone();
    let hash = String::from_utf8(output).unwrap().trim().to_string();

    snapgate(&f.store)
        .args(["approve", "--approvals", "approvals", "--hash", &hash])
        .assert()
        .success();
    compare(&f, &f.changed)
        .args(["--approvals", "approvals"])
        .assert()
        .success();

    snapgate(&f.store)
        .args(["decline", "--approvals", "approvals", &hash])
        .assert()
        .success()
        .stdout(predicate::str::contains("DECLINED"));
    compare(&f, &f.changed)
        .args(["--approvals", "approvals"])
        .assert()
        .code(65);
}

#[test]
fn test_changes_json_lists_records() {
    let f = fixture();
    compare(&f, &f.baseline).assert().success();
    compare(&f, &f.changed)
        .args(["--meta", "browser=firefox"])
        .assert()
        .code(65);

    let output = snapgate(&f.store)
        .args(["changes", "run-1", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json[0]["key"], "home");
    assert_eq!(json[0]["data"]["browser"], "firefox");
    assert!(json[0]["otherness"].as_str().is_some());
}

#[test]
fn test_clear_missing_run_is_no_input() {
    let f = fixture();
    snapgate(&f.store)
        .args(["clear", "never-ran"])
        .assert()
        .code(66);
}

#[test]
fn test_clear_removes_changes() {
    let f = fixture();
    compare(&f, &f.baseline).assert().success();
    compare(&f, &f.changed).assert().code(65);

    snapgate(&f.store)
        .args(["clear", "run-1", "--change", "other"])
        .assert()
        .success()
        .stdout(predicate::str::contains("UNCHANGED"));
    snapgate(&f.store)
        .args(["clear", "run-1"])
        .assert()
        .success();
    snapgate(&f.store)
        .args(["--quiet", "changes", "run-1"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_copy_baseline_stamps_author() {
    let f = fixture();
    compare(&f, &f.baseline).assert().success();

    snapgate(&f.store)
        .args(["copy-baseline", "home", "home-v2", "--author", "release-bot"])
        .assert()
        .success()
        .stdout(predicate::str::contains("COPIED"));

    let meta = std::fs::read_to_string(f.store.join("home-v2.meta.json")).unwrap();
    assert!(meta.contains("release-bot"));
    assert!(f.dir.path().join("store/home-v2.blob").exists());
}

#[test]
fn test_copy_missing_baseline_is_no_input() {
    let f = fixture();
    snapgate(&f.store)
        .args(["copy-baseline", "nothing", "dest"])
        .assert()
        .code(66);
}
