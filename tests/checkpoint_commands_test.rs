use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn tree_ai(home: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tree-ai");
    cmd.current_dir(home)
        .env("TREEAI_HOME", home)
        .env("TREEAI_CONFIG_PATH", home.join("absent.toml"))
        .env("TREEAI_PROVIDER", "local")
        .env("TREEAI_DELAY_SECS", "0");
    cmd
}

fn seed(target: &Path) {
    fs::create_dir_all(target.join("docs")).expect("mkdir");
    fs::write(target.join("one.md"), "# one\n").expect("write");
    fs::write(target.join("two.md"), "# two\n").expect("write");
    fs::write(target.join("docs/guide.md"), "guide\n").expect("write");
}

#[test]
fn status_without_checkpoint_reports_none() {
    let tmp = tempdir().expect("tempdir");
    seed(tmp.path());

    tree_ai(tmp.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("status: ok"))
        .stdout(predicate::str::contains("run=none"))
        .stdout(predicate::str::contains("results.stored=0"));
}

#[test]
fn corrupt_checkpoint_is_reported_and_replaced() {
    let tmp = tempdir().expect("tempdir");
    let target = tmp.path().join("project");
    seed(&target);
    fs::create_dir_all(target.join(".tree-ai")).expect("mkdir checkpoint");
    fs::write(target.join(".tree-ai/checkpoint.json"), "{\"schema_version\": 1, ").expect("corrupt");

    tree_ai(tmp.path())
        .arg("status")
        .arg(&target)
        .assert()
        .success()
        .stdout(predicate::str::contains("run=unusable (corrupt"));

    tree_ai(tmp.path())
        .arg("analyze")
        .arg(&target)
        .assert()
        .success()
        .stdout(predicate::str::contains("analyzed=3"))
        .stderr(predicate::str::contains("TREEAI_WARN code=W002_LEDGER_CORRUPT"));
}

#[test]
fn checkpoint_copied_from_another_directory_is_ignored() {
    let tmp = tempdir().expect("tempdir");
    let first = tmp.path().join("first");
    let second = tmp.path().join("second");
    seed(&first);
    seed(&second);

    tree_ai(tmp.path())
        .args(["analyze", "--limit", "1"])
        .arg(&first)
        .assert()
        .success();
    fs::create_dir_all(second.join(".tree-ai")).expect("mkdir");
    fs::copy(
        first.join(".tree-ai/checkpoint.json"),
        second.join(".tree-ai/checkpoint.json"),
    )
    .expect("copy checkpoint");

    tree_ai(tmp.path())
        .arg("analyze")
        .arg(&second)
        .assert()
        .success()
        .stdout(predicate::str::contains("resumed=0"))
        .stdout(predicate::str::contains("analyzed=3"))
        .stderr(predicate::str::contains("W004_DIRECTORY_MISMATCH"));
}

#[test]
fn status_file_shows_stored_result() {
    let tmp = tempdir().expect("tempdir");
    seed(tmp.path());

    tree_ai(tmp.path())
        .args(["analyze", "--limit", "1", "."])
        .assert()
        .success();

    tree_ai(tmp.path())
        .args(["status", ".", "--file", "docs/guide.md"])
        .assert()
        .success()
        .stdout(predicate::str::contains("file.result=stored"))
        .stdout(predicate::str::contains("file.explanation=guide.md has 1 lines"));

    tree_ai(tmp.path())
        .args(["status", ".", "--file", "two.md"])
        .assert()
        .success()
        .stdout(predicate::str::contains("file.result=none"));
}

#[test]
fn clean_removes_checkpoint_folder() {
    let tmp = tempdir().expect("tempdir");
    seed(tmp.path());

    tree_ai(tmp.path())
        .args(["analyze", "--limit", "1", "."])
        .assert()
        .success();
    assert!(tmp.path().join(".tree-ai").is_dir());

    tree_ai(tmp.path())
        .args(["clean", "."])
        .assert()
        .success()
        .stdout(predicate::str::contains("removed=true"))
        .stdout(predicate::str::contains("run.discarded=true"));
    assert!(!tmp.path().join(".tree-ai").exists());

    tree_ai(tmp.path())
        .arg("clean")
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to clean"));
}

#[test]
fn tree_prints_filtered_listing() {
    let tmp = tempdir().expect("tempdir");
    seed(tmp.path());
    fs::write(tmp.path().join(".gitignore"), "two.md\n").expect("gitignore");

    tree_ai(tmp.path())
        .arg("tree")
        .assert()
        .success()
        .stdout(predicate::str::contains("files=2"))
        .stdout(predicate::str::contains("|   |-- one.md"))
        .stdout(predicate::str::contains("|   |-- docs/"))
        .stdout(predicate::str::contains("|   |   |-- guide.md"))
        .stdout(predicate::str::contains("two.md").not());
}

#[test]
fn unknown_treeai_variable_is_warned() {
    let tmp = tempdir().expect("tempdir");
    seed(tmp.path());

    tree_ai(tmp.path())
        .env("TREEAI_MODLE", "typo")
        .arg("tree")
        .assert()
        .success()
        .stderr(predicate::str::contains("W010_UNKNOWN_ENV"))
        .stderr(predicate::str::contains("TREEAI_MODLE"));
}
