use std::fs::File;
use std::io::Write;

use ecu_config::{load_table_csv, parse_table_csv};
use rstest::rstest;
use tempfile::tempdir;

#[rstest]
fn csv_3d_table_from_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ve.csv");

    let mut f = File::create(&path).unwrap();
    writeln!(f, "rpm,map,clt,value").unwrap();
    for clt in [0.0f32, 80.0] {
        for map in [30.0f32, 90.0] {
            for rpm in [1000.0f32, 3000.0, 6000.0] {
                let v = rpm / 10_000.0 + map / 100.0 + clt / 1000.0;
                writeln!(f, "{rpm},{map},{clt},{v}").unwrap();
            }
        }
    }
    drop(f);

    let t = load_table_csv(&path).expect("load 3d table");
    assert_eq!(t.axes.len(), 3);
    assert_eq!(t.axes[0], vec![1000.0, 3000.0, 6000.0]);
    assert_eq!(t.axes[2], vec![0.0, 80.0]);
    assert_eq!(t.data.len(), 12);
    // index = rpm + 3 * (map + 2 * clt)
    let idx = 2 + 3 * (1 + 2 * 1);
    assert!((t.data[idx] - (0.6 + 0.9 + 0.08)).abs() < 1e-6);
}

#[rstest]
fn csv_with_wrong_header_errors() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad_headers.csv");

    let mut f = File::create(&path).unwrap();
    writeln!(f, "rpm,kpa,value").unwrap();
    writeln!(f, "1000,30,0.5").unwrap();
    drop(f);

    let err = load_table_csv(&path).expect_err("should error on bad headers");
    assert!(format!("{err}").contains("headers 'rpm,map,value'"));
}

#[rstest]
#[case("rpm,map,value\nabc,30,1\n", "invalid CSV row 2")]
#[case("rpm,map,value\n1000,30,1\n2000,30,1\n1000,60,1\n", "grid incomplete")]
#[case("rpm,map,value\n1000,30,1\n1000,30,2\n2000,30,1\n2000,60,1\n", "duplicate grid point")]
#[case("rpm,map,value\n1000,30,1\n1000,60,2\n", "at least two distinct")]
#[case("rpm,map,value\n1000,30,inf\n2000,30,1\n1000,60,1\n2000,60,1\n", "non-finite")]
fn malformed_tables_are_rejected(#[case] csv: &str, #[case] expected: &str) {
    let err = parse_table_csv(csv.as_bytes()).expect_err("should be rejected");
    assert!(
        format!("{err}").contains(expected),
        "expected '{expected}' in '{err}'"
    );
}

#[test]
fn missing_file_errors() {
    let dir = tempdir().unwrap();
    let err = load_table_csv(&dir.path().join("nope.csv")).expect_err("missing file");
    assert!(format!("{err}").contains("open table CSV"));
}
