use criterion::{Criterion, black_box, criterion_group, criterion_main};
use ecu_core::calibration::default_ve_table;
use ecu_core::table::{Table3, lookup_2d, lookup_3d};

// Query points sweeping the whole operating range, including out-of-range edges.
fn operating_points(n: usize) -> Vec<(f32, f32, f32)> {
    (0..n)
        .map(|i| {
            let t = i as f32 / n as f32;
            (300.0 + 7_500.0 * t, 15.0 + 95.0 * (1.0 - t), -30.0 + 140.0 * t)
        })
        .collect()
}

fn coolant_table() -> Table3 {
    let rpm: Vec<f32> = (0..16).map(|i| 500.0 + 450.0 * i as f32).collect();
    let map: Vec<f32> = (0..12).map(|i| 20.0 + 8.0 * i as f32).collect();
    let clt = vec![-20.0, 0.0, 20.0, 40.0, 60.0, 80.0, 100.0];
    let n = rpm.len() * map.len() * clt.len();
    let data = (0..n).map(|i| 0.3 + (i % 97) as f32 / 150.0).collect();
    Table3::new([rpm, map, clt], data).unwrap()
}

pub fn bench_lookup(c: &mut Criterion) {
    let mut g = c.benchmark_group("table_lookup");
    //   BENCH_SAMPLE_SIZE=10 cargo bench -p ecu_core --bench lookup
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE")
        && let Ok(n) = ss.parse::<usize>()
    {
        g.sample_size(n.max(10));
    }

    let points = operating_points(1_024);
    let ve = default_ve_table().unwrap();
    let ve3 = coolant_table();

    g.bench_function("lookup_2d_ve", |b| {
        b.iter(|| {
            let mut acc = 0.0f32;
            for &(rpm, map, _) in &points {
                acc += lookup_2d(black_box(&ve), black_box(rpm), black_box(map));
            }
            black_box(acc)
        });
    });
    g.bench_function("lookup_3d_ve_coolant", |b| {
        b.iter(|| {
            let mut acc = 0.0f32;
            for &(rpm, map, clt) in &points {
                acc += lookup_3d(black_box(&ve3), black_box(rpm), black_box(map), black_box(clt));
            }
            black_box(acc)
        });
    });
    g.finish();
}

criterion_group!(lookup, bench_lookup);
criterion_main!(lookup);
