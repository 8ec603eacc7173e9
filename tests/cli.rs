//! E2E tests for the consolidate, report and schema commands

use std::process::{Command, Output};

fn taxrec(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_taxrec"))
        .args(args)
        .output()
        .expect("Failed to execute command")
}

/// Consolidation reconciles the fixture into the expected buckets
#[test]
fn consolidate_stages() {
    let output = taxrec(&["consolidate", "tests/data/bundles.json"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Command failed: {:?}", output);

    assert!(stdout.contains("Deduplicated"));
    assert!(stdout.contains("Orphans"));
    // withdrawal and deposit matched into one bundle
    assert!(stdout.contains("cb-withdrawal-7btc-deposit-3f2a"));
    assert!(stdout.contains("TransferToSelf"));
    // spam airdrop set aside
    assert!(!stdout.contains("0xspam"));
}

/// JSON output exposes every bucket
#[test]
fn consolidate_json() {
    let output = taxrec(&["consolidate", "tests/data/bundles.json", "--json"]);
    assert!(output.status.success(), "Command failed: {:?}", output);

    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is not JSON");
    assert_eq!(json["excluded"].as_array().map(Vec::len), Some(1));
    assert_eq!(json["complete"].as_array().map(Vec::len), Some(3));
    assert_eq!(json["deduplicated"].as_array().map(Vec::len), Some(1));
    assert_eq!(json["matched"].as_array().map(Vec::len), Some(1));
    assert_eq!(json["orphans"].as_array().map(Vec::len), Some(1));
    assert_eq!(json["orphans"][0]["id"], "0xunknown");
}

/// Extra exclusions on the command line are applied on top of the file's list
#[test]
fn consolidate_exclude_flag() {
    let output = taxrec(&[
        "consolidate",
        "tests/data/bundles.json",
        "--exclude",
        "eth",
        "--json",
    ]);
    assert!(output.status.success(), "Command failed: {:?}", output);

    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is not JSON");
    assert_eq!(json["excluded"].as_array().map(Vec::len), Some(2));
    assert_eq!(json["orphans"].as_array().map(Vec::len), Some(0));
}

/// Report shows events, the total benefit and what needs review
#[test]
fn report_table() {
    let output = taxrec(&[
        "report",
        "tests/data/bundles.json",
        "--prices",
        "tests/data/prices.csv",
    ]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Command failed: {:?}", output);

    assert!(stdout.contains("Purchase"));
    assert!(stdout.contains("Sale"));
    assert!(stdout.contains("Income"));
    assert!(stdout.contains("Transfer to self"));
    // 20,000 - 0.5 x 10,000 + 2 x 20
    assert!(stdout.contains("Total benefit: 15040.00"));
    assert!(stdout.contains("HOLDINGS"));
    assert!(stdout.contains("NEEDS REVIEW (1)"));
    assert!(stdout.contains("0xunknown"));
}

/// CSV output has one row per taxable event
#[test]
fn report_csv() {
    let output = taxrec(&[
        "report",
        "tests/data/bundles.json",
        "--prices",
        "tests/data/prices.csv",
        "--csv",
    ]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Command failed: {:?}", output);

    let mut lines = stdout.lines();
    assert_eq!(
        lines.next(),
        Some("date,bundle_id,event_type,details,fee,benefit")
    );
    assert_eq!(lines.count(), 4);
    assert!(stdout.contains("cb-sell-2,Sale"));
    assert!(stdout.contains("15000.00"));
}

/// JSON report carries holdings
#[test]
fn report_json() {
    let output = taxrec(&[
        "report",
        "tests/data/bundles.json",
        "--prices",
        "tests/data/prices.csv",
        "--json",
    ]);
    assert!(output.status.success(), "Command failed: {:?}", output);

    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is not JSON");
    assert_eq!(json["events"].as_array().map(Vec::len), Some(4));
    let holdings = json["holdings"].as_array().expect("holdings");
    assert_eq!(holdings.len(), 2);
    assert_eq!(holdings[0]["ticker"], "BTC");
    assert_eq!(holdings[1]["ticker"], "DOT");
}

/// A missing price file is reported, not ignored
#[test]
fn report_missing_prices_fails() {
    let output = taxrec(&[
        "report",
        "tests/data/bundles.json",
        "--prices",
        "tests/data/does-not-exist.csv",
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Cannot open prices"));
}

/// Schema command prints the bundle JSON schema and price columns
#[test]
fn schema_formats() {
    let output = taxrec(&["schema"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "Command failed: {:?}", output);
    assert!(stdout.contains("BundleInput"));
    assert!(stdout.contains("excluded_currencies"));

    let output = taxrec(&["schema", "csv-header"]);
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "currency,date,price");

    let output = taxrec(&["schema", "csv-fields"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Price CSV Format"));
    assert!(stdout.contains("Currency ticker"));
}
