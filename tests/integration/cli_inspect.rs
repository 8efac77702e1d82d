#![allow(missing_docs)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use stratum::{NodeKey, ResourceConfig, Revisioning, Session};
use tempfile::TempDir;

fn seed(dir: &Path) {
    let config = ResourceConfig::file(dir).with_revisioning(Revisioning::Differential, 3);
    let session = Session::create(config).expect("create resource");
    let mut tx = session.begin_write().expect("begin write");
    tx.set(NodeKey(0), "alpha").expect("set");
    tx.set(NodeKey(1), "beta").expect("set");
    tx.put_meta(b"owner", b"ops").expect("meta");
    tx.commit().expect("commit");
    tx.set(NodeKey(0), "gamma").expect("set");
    tx.commit().expect("commit");
    drop(tx);
    session.close().expect("close");
}

fn setup() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    seed(dir.path());
    dir
}

#[test]
fn info_reports_json() {
    let dir = setup();
    let output = cargo_bin_cmd!("stratum-inspect")
        .arg("--resource")
        .arg(dir.path())
        .args(["--format", "json", "info"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["revision_count"], 3);
    assert_eq!(json["latest_revision"], 2);
    assert_eq!(json["revisioning"], "differential");
    assert_eq!(json["store"], "file");
    assert_eq!(json["meta_entries"], 1);
    assert_eq!(json["node_pages"], 1);
}

#[test]
fn dump_lists_records_of_an_old_revision() {
    let dir = setup();
    let output = cargo_bin_cmd!("stratum-inspect")
        .arg("--resource")
        .arg(dir.path())
        .args(["--format", "json", "dump", "--revision", "1", "--page-key", "0"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["present"], true);
    let slots = json["slots"].as_array().expect("slots");
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0]["preview"], hex::encode("alpha"));

    let text = cargo_bin_cmd!("stratum-inspect")
        .arg("--resource")
        .arg(dir.path())
        .args(["dump", "--page-key", "0"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(text).expect("utf8");
    assert!(text.contains("2 record(s)"), "{text}");
    assert!(text.contains(&hex::encode("gamma")), "{text}");
}

#[test]
fn verify_passes_on_a_healthy_resource() {
    let dir = setup();
    cargo_bin_cmd!("stratum-inspect")
        .arg("--resource")
        .arg(dir.path())
        .args(["verify"])
        .assert()
        .success();
}

#[test]
fn missing_resource_fails() {
    let dir = TempDir::new().expect("tempdir");
    cargo_bin_cmd!("stratum-inspect")
        .arg("--resource")
        .arg(dir.path().join("nothing"))
        .arg("info")
        .assert()
        .failure()
        .code(1);
}
