// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of covenant.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::path::Path;
use std::process::Command;

fn bin() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("covenant"));
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let workspace_root = manifest_dir
        .parent()
        .expect("covenant-cli crate must have a parent workspace directory");
    cmd.current_dir(workspace_root);

    cmd
}

#[test]
fn compile_lock_position_ok() {
    let mut cmd = bin();
    cmd.args(["compile", "contracts/LockPosition"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("LockPosition"))
        .stdout(predicate::str::contains("cd9f697b7bae7cac6900c3c251547ac1"));
}

#[test]
fn compile_with_import_json_ok() {
    let mut cmd = bin();
    cmd.args(["compile", "contracts/LoanCollateral", "--json"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"ok\":true"))
        .stdout(predicate::str::contains("\"RepayCollateral\""))
        .stdout(predicate::str::contains("\"LoanCollateral\""));
}

#[test]
fn compile_reports_errors_with_position() {
    let mut src = tempfile::NamedTempFile::new().unwrap();
    src.write_all(b"contract T() locks v of w { clause c() { verify 3 + 4\nunlock v of w } }")
        .unwrap();

    let mut cmd = bin();
    cmd.args(["compile", src.path().to_str().unwrap()]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("line 1, col"))
        .stderr(predicate::str::contains("Boolean"));
}

#[test]
fn missing_file_fails() {
    let mut cmd = bin();
    cmd.args(["compile", "contracts/Nope"]);
    cmd.assert().failure();
}
