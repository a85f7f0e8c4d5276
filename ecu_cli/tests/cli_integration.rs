use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Minimal valid config; every other section takes its defaults
fn write_valid_config(dir: &tempfile::TempDir, extra: &str) -> PathBuf {
    let toml = format!(
        r#"
[wheel]
teeth = 36
angle_per_tooth_deg = 10.0
tdc_deg = 360.0

[sensors]
map_channel = 0
map_kpa_per_count = 0.05

[logging]
level = "warn"
{extra}"#
    );
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn ecu(cfg: &PathBuf) -> Command {
    let mut cmd = Command::cargo_bin("ecu_cli").unwrap();
    cmd.arg("--config").arg(cfg);
    cmd
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["simulate", "--duration-ms", "100"], 0, "simulation complete", "stdout")]
#[case(&["lookup", "--table", "spark", "--rpm", "3000", "--map", "60"], 0, "= 20.00 deg", "stdout")]
#[case(&["lookup", "--table", "ve"], 2, "required", "stderr")]
#[case(&["self-check"], 0, "self-check: ok", "stdout")]
#[case(&["simulate", "--rpm", "0"], 3, "--rpm", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "");

    let mut cmd = ecu(&cfg);
    for a in args {
        cmd.arg(a);
    }
    let assert = cmd.assert().code(exit_code);

    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[rstest]
fn simulate_json_reports_engine_activity() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "");

    let out = ecu(&cfg)
        .args(["--json", "simulate", "--rpm", "3000", "--map", "60"])
        .args(["--duration-ms", "200", "--stats"])
        .output()
        .unwrap();
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["steps"], 2_000);
    assert_eq!(v["sync_losses"], 0);
    assert!(v["spark"]["sparks"].as_u64().unwrap() >= 8);
    assert_eq!(v["spark"]["late_sparks"], 0);
    assert!(v["fuel"]["pulses"].as_u64().unwrap() >= 8);
    let advance = v["last_plan"]["advance_deg"].as_f64().unwrap();
    assert!((advance - 20.0).abs() < 0.01);
    assert!(v["stats"]["injector_pulse"]["count"].as_u64().unwrap() >= 8);
}

#[rstest]
fn invalid_config_is_reported_as_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(
        &path,
        "[wheel]\nteeth = 30\nangle_per_tooth_deg = 10.0\ntdc_deg = 360.0\n\n\
         [sensors]\nmap_channel = 0\nmap_kpa_per_count = 0.05\n",
    )
    .unwrap();

    let out = ecu(&path).args(["--json", "self-check"]).output().unwrap();
    assert_eq!(out.status.code(), Some(3));
    let v: serde_json::Value = serde_json::from_slice(&out.stderr).unwrap();
    assert_eq!(v["reason"], "Config");
    assert!(v["message"].as_str().unwrap().contains("wheel.tdc_deg"));
}

#[rstest]
fn missing_config_file_is_explained() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    ecu(&missing)
        .arg("self-check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Could not read the config file"));
}

#[rstest]
fn lookup_reads_relative_table_csv() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "\n[tables]\nve_csv = \"ve.csv\"\n");

    let mut f = fs::File::create(dir.path().join("ve.csv")).unwrap();
    writeln!(f, "rpm,map,value").unwrap();
    for (rpm, map, ve) in [
        (1000, 30, 0.30),
        (2000, 30, 0.50),
        (1000, 90, 0.60),
        (2000, 90, 0.80),
    ] {
        writeln!(f, "{rpm},{map},{ve}").unwrap();
    }
    drop(f);

    let out = ecu(&cfg)
        .args(["--json", "lookup", "--table", "ve", "--rpm", "1500", "--map", "60"])
        .output()
        .unwrap();
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["table"], "ve");
    // mean of the four corners
    assert!((v["value"].as_f64().unwrap() - 0.55).abs() < 1e-4);
}

#[rstest]
fn cli_reports_bad_table_header() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir, "\n[tables]\nspark_csv = \"spark.csv\"\n");

    let mut f = fs::File::create(dir.path().join("spark.csv")).unwrap();
    writeln!(f, "rpm,load,value").unwrap();
    writeln!(f, "1000,30,10").unwrap();
    drop(f);

    ecu(&cfg)
        .arg("self-check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid headers in table CSV"));
}

#[rstest]
fn log_file_receives_json_lines() {
    let dir = tempdir().unwrap();
    let log = dir.path().join("ecu.log");
    let cfg = dir.path().join("cfg.toml");
    let toml = format!(
        "[wheel]\nteeth = 36\nangle_per_tooth_deg = 10.0\ntdc_deg = 360.0\n\n\
         [sensors]\nmap_channel = 0\nmap_kpa_per_count = 0.05\n\n\
         [logging]\nfile = {:?}\nlevel = \"info\"\n",
        log.to_string_lossy()
    );
    fs::write(&cfg, toml).unwrap();

    ecu(&cfg)
        .args(["--log-level", "info", "simulate", "--duration-ms", "50"])
        .assert()
        .success();

    let text = fs::read_to_string(&log).unwrap();
    let first = text.lines().next().unwrap();
    let v: serde_json::Value = serde_json::from_str(first).unwrap();
    assert!(v["level"].is_string());
}
