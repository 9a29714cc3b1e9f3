mod common;

use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("wallet-ledger"));
    cmd.arg("tests/fixtures/commands.csv");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("user,balance"))
        // deposit 100, recharge -50, application fee -25.5
        .stdout(predicate::str::contains("1,24.5"))
        // top-up 15 approved, withdrawal 40 refused
        .stdout(predicate::str::contains("2,15"))
        .stdout(predicate::str::contains("900,0"))
        .stderr(predicate::str::contains("Error processing command"));

    Ok(())
}

#[test]
fn test_cli_reports_unreadable_rows_and_continues() {
    let mut csv = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv, "op, user, ref, amount").unwrap();
    writeln!(csv, "open, 1").unwrap();
    writeln!(csv, "teleport, 1, x, 5").unwrap();
    writeln!(csv, "callback, , ORD-1999-000001, 5").unwrap();

    let mut cmd = Command::new(cargo_bin!("wallet-ledger"));
    cmd.arg(csv.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("1,0"))
        .stderr(predicate::str::contains("Error reading command"))
        .stderr(predicate::str::contains("Error processing command"));
}

#[test]
fn test_cli_generated_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("generated.csv");
    common::generate_commands_csv(&path, 25).unwrap();

    let output = Command::new(cargo_bin!("wallet-ledger"))
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().count(), 26);
    assert!(stdout.lines().skip(1).all(|line| line.ends_with(",10")));
}

#[test]
fn test_cli_json_logs_and_config_file() {
    let mut config = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(config, "[fees]\ntax_percent = \"2\"").unwrap();

    let mut csv = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv, "op, user, ref, amount, status").unwrap();
    writeln!(csv, "open, 1").unwrap();
    writeln!(csv, "deposit, 1, d1, 100").unwrap();
    // The provider reports the taxed total; only the base is credited.
    writeln!(csv, "callback, , d1, 102, success").unwrap();

    let mut cmd = Command::new(cargo_bin!("wallet-ledger"));
    cmd.arg(csv.path())
        .arg("--config")
        .arg(config.path())
        .arg("--log-format")
        .arg("json");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("1,100"))
        .stderr(predicate::str::contains("\"level\":\"INFO\""));
}
