//! Binary-level tests for the cache maintenance subcommands.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn rafter() -> Command {
    Command::cargo_bin("rafter").unwrap()
}

#[test]
fn test_cache_view_empty_database() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("rafter.db");

    rafter()
        .args(["cache", "--db"])
        .arg(&db)
        .arg("view")
        .assert()
        .success()
        .stdout(predicate::str::contains("No recorded calls"));
}

#[test]
fn test_cache_view_lists_recorded_functions() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("rafter.db");
    {
        let db = rafter::core::db::Database::new(&db_path);
        db.save_function("ocaml.bytecode.compile", "0123456789abcdef");
        db.save().unwrap();
    }

    rafter()
        .args(["cache", "--db"])
        .arg(&db_path)
        .arg("view")
        .assert()
        .success()
        .stdout(predicate::str::contains("ocaml.bytecode.compile"));
}

#[test]
fn test_cache_clear_removes_database_and_siblings() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("rafter.db");
    std::fs::write(&db_path, "{}").unwrap();
    std::fs::write(tmp.path().join("rafter.db.old"), "{}").unwrap();

    rafter()
        .args(["cache", "--db"])
        .arg(&db_path)
        .arg("clear")
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared"));

    assert!(!db_path.exists());
    assert!(!tmp.path().join("rafter.db.old").exists());
}

#[test]
fn test_cache_clear_without_database_reports_nothing_to_do() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("rafter.db");

    rafter()
        .args(["cache", "--db"])
        .arg(&db)
        .arg("clear")
        .assert()
        .success()
        .stdout(predicate::str::contains("No build database"));
}
