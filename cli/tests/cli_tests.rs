use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn auditctl() -> Command {
    let mut cmd = Command::cargo_bin("auditctl").unwrap();
    cmd.env_clear().env("RUST_LOG", "off");
    cmd
}

fn contract(lines: usize) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    let body = vec!["uint256 value;"; lines].join("\n");
    file.write_all(body.as_bytes()).unwrap();
    file
}

#[test]
fn test_help_lists_commands() {
    auditctl()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("analyze"))
        .stdout(predicate::str::contains("ledger"));
}

#[test]
fn test_tier_of_small_contract() {
    let file = contract(50);
    auditctl()
        .arg("tier")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("light"))
        .stdout(predicate::str::contains("inline"))
        .stdout(predicate::str::contains("mistralai/mistral-7b-instruct:free"));
}

#[test]
fn test_tier_of_long_contract() {
    let file = contract(900);
    auditctl()
        .arg("tier")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("long"))
        .stdout(predicate::str::contains("deferred"));
}

#[test]
fn test_hash_of_empty_file() {
    let file = NamedTempFile::new().unwrap();
    auditctl()
        .arg("hash")
        .arg(file.path())
        .assert()
        .success()
        .stdout("0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470\n");
}

#[test]
fn test_missing_file_fails() {
    auditctl()
        .args(["tier", "/definitely/not/here.sol"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot read"));
}

#[test]
fn test_ledger_requires_configuration() {
    auditctl()
        .args(["ledger", "hashes", "--owner", "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no ledger configured"));
}

#[test]
fn test_invalid_config_file_fails() {
    let mut config = NamedTempFile::new().unwrap();
    config.write_all(b"{ not json").unwrap();
    let file = contract(5);
    auditctl()
        .arg("--config")
        .arg(config.path())
        .arg("tier")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid config format"));
}
