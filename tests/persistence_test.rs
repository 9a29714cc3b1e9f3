#![cfg(feature = "storage-rocksdb")]

use assert_cmd::cargo_bin;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // First run: open a wallet and settle a deposit.
    let mut csv1 = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv1, "op, user, ref, amount, status").unwrap();
    writeln!(csv1, "open, 1").unwrap();
    writeln!(csv1, "deposit, 1, d1, 100.0").unwrap();
    writeln!(csv1, "callback, , d1, , success").unwrap();

    let mut cmd1 = Command::new(cargo_bin!("wallet-ledger"));
    cmd1.arg(csv1.path()).arg("--db-path").arg(&db_path);

    let output1 = cmd1.output().expect("Failed to execute command");
    assert!(output1.status.success());
    let stdout1 = String::from_utf8_lossy(&output1.stdout);
    assert!(stdout1.contains("1,100"));

    // Second run against the same database: a charge on the recovered balance.
    let mut csv2 = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv2, "op, user, ref, amount").unwrap();
    writeln!(csv2, "open, 1").unwrap();
    writeln!(csv2, "charge, 1, fee-1, 40").unwrap();

    let mut cmd2 = Command::new(cargo_bin!("wallet-ledger"));
    cmd2.arg(csv2.path()).arg("--db-path").arg(&db_path);

    let output2 = cmd2.output().expect("Failed to execute command");
    assert!(output2.status.success());
    let stdout2 = String::from_utf8_lossy(&output2.stdout);

    // Recovered 100, minus 40.
    assert!(stdout2.contains("1,60"));
}
