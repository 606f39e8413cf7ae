use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;

fn bin() -> Command {
  Command::new(assert_cmd::cargo::cargo_bin!("cmm"))
}

#[test]
fn no_arguments_is_invalid_usage() {
  bin()
    .assert()
    .failure()
    .stderr(predicate::str::contains("Invalid usage."));
}

#[test]
fn extra_arguments_are_invalid_usage() {
  bin()
    .args(["a.cmm", "b.cmm"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Invalid usage."));
}

#[test]
fn missing_file_reports_open_error() {
  let dir = tempfile::tempdir().unwrap();
  bin()
    .current_dir(dir.path())
    .arg("nope.cmm")
    .assert()
    .failure()
    .stderr(predicate::str::contains("Error opening file: nope.cmm."));
}

#[test]
fn compiles_to_the_fixed_output_path() {
  let dir = tempfile::tempdir().unwrap();
  fs::write(dir.path().join("prog.cmm"), "exit(42);\n").unwrap();

  bin().current_dir(dir.path()).arg("prog.cmm").assert().success();

  let asm = fs::read_to_string(dir.path().join("_test/test.asm")).unwrap();
  assert!(asm.contains("global _start"));
  assert!(asm.contains("mov rax, 42"));
  assert!(asm.contains("mov rax, 60"));
}

#[test]
fn diagnostics_carry_line_and_column() {
  let dir = tempfile::tempdir().unwrap();
  fs::write(dir.path().join("bad.cmm"), "let x = 1;\nexit(?);\n").unwrap();

  bin()
    .current_dir(dir.path())
    .arg("bad.cmm")
    .assert()
    .failure()
    .stderr(predicate::str::contains(
      "Syntax error: unidentified token, at line: 2, column: 5.",
    ));
}

#[test]
fn failed_compile_writes_no_output() {
  let dir = tempfile::tempdir().unwrap();
  fs::write(dir.path().join("bad.cmm"), "let x = ;\n").unwrap();

  bin().current_dir(dir.path()).arg("bad.cmm").assert().failure();
  assert!(!dir.path().join("_test/test.asm").exists());
}
