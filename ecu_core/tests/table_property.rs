use ecu_core::table::{Table2, Table3, find_index, lookup_2d, lookup_3d};
use proptest::prelude::*;

prop_compose! {
    // Strictly increasing axis with 2..8 points.
    fn axis_strategy()(
        start in -100.0f32..100.0,
        steps in prop::collection::vec(0.5f32..50.0, 1..7),
    ) -> Vec<f32> {
        let mut v = vec![start];
        for s in steps {
            let next = v[v.len() - 1] + s;
            v.push(next);
        }
        v
    }
}

prop_compose! {
    fn table2_strategy()(xs in axis_strategy(), ys in axis_strategy())(
        data in prop::collection::vec(-100.0f32..100.0, xs.len() * ys.len()),
        xs in Just(xs),
        ys in Just(ys),
    ) -> Table2 {
        Table2::new([xs, ys], data).unwrap()
    }
}

prop_compose! {
    fn table3_strategy()(xs in axis_strategy(), ys in axis_strategy(), zs in axis_strategy())(
        data in prop::collection::vec(-100.0f32..100.0, xs.len() * ys.len() * zs.len()),
        xs in Just(xs),
        ys in Just(ys),
        zs in Just(zs),
    ) -> Table3 {
        Table3::new([xs, ys, zs], data).unwrap()
    }
}

/// Point at fraction `t` along each axis of `table`.
fn point3(table: &Table3, t: [f32; 3]) -> [f32; 3] {
    core::array::from_fn(|d| {
        let a = table.axis(d);
        a[0] + t[d] * (a[a.len() - 1] - a[0])
    })
}

proptest! {
    #[test]
    fn index_brackets_query(axis in axis_strategy(), t in 0.0f32..1.0) {
        let lo = axis[0];
        let hi = axis[axis.len() - 1];
        let q = lo + t * (hi - lo);
        let i = find_index(&axis, q);
        prop_assert!(i <= axis.len() - 2);
        prop_assert!(axis[i] <= q);
        prop_assert!(q < axis[i + 1] || i == axis.len() - 2);
    }

    #[test]
    fn index_clamps_outside(axis in axis_strategy(), off in 0.1f32..1000.0) {
        prop_assert_eq!(find_index(&axis, axis[0] - off), 0);
        prop_assert_eq!(find_index(&axis, axis[axis.len() - 1] + off), axis.len() - 2);
    }

    // Inside the grid a bilinear blend never leaves the range of the data.
    #[test]
    fn lookup_stays_within_data(table in table2_strategy(), tx in 0.0f32..1.0, ty in 0.0f32..1.0) {
        let xs = table.axis(0);
        let ys = table.axis(1);
        let x = xs[0] + tx * (xs[xs.len() - 1] - xs[0]);
        let y = ys[0] + ty * (ys[ys.len() - 1] - ys[0]);
        let v = lookup_2d(&table, x, y);
        let min = table.data().iter().copied().fold(f32::INFINITY, f32::min);
        let max = table.data().iter().copied().fold(f32::NEG_INFINITY, f32::max);
        prop_assert!(v >= min - 0.05 && v <= max + 0.05, "{v} outside [{min}, {max}]");
    }

    #[test]
    fn lookup_hits_grid_points(table in table2_strategy(), i in 0usize..8, j in 0usize..8) {
        let [nx, ny] = table.shape();
        let (i, j) = (i % nx, j % ny);
        let v = lookup_2d(&table, table.axis(0)[i], table.axis(1)[j]);
        let raw = table.get([i, j]).unwrap();
        prop_assert!((v - raw).abs() < 1e-3, "{v} vs {raw}");
    }

    // Approaching an interior grid line from either side gives the same value.
    #[test]
    fn lookup_is_continuous_across_cells(table in table2_strategy(), i in 1usize..7, ty in 0.0f32..1.0) {
        let xs = table.axis(0);
        prop_assume!(xs.len() > 2);
        let i = 1 + (i - 1) % (xs.len() - 2);
        let ys = table.axis(1);
        let y = ys[0] + ty * (ys[ys.len() - 1] - ys[0]);
        let eps = 1e-4;
        let below = lookup_2d(&table, xs[i] - eps, y);
        let above = lookup_2d(&table, xs[i] + eps, y);
        prop_assert!((below - above).abs() < 0.1, "{below} vs {above}");
    }

    #[test]
    fn trilinear_hits_grid_points(table in table3_strategy(), idx in prop::array::uniform3(0usize..8)) {
        let shape = table.shape();
        let idx: [usize; 3] = core::array::from_fn(|d| idx[d] % shape[d]);
        let [x, y, z]: [f32; 3] = core::array::from_fn(|d| table.axis(d)[idx[d]]);
        let v = lookup_3d(&table, x, y, z);
        let raw = table.get(idx).unwrap();
        prop_assert!((v - raw).abs() < 1e-3, "{v} vs {raw}");
    }

    // Crossing an interior grid plane on any axis gives the same value.
    #[test]
    fn trilinear_is_continuous_across_cells(
        table in table3_strategy(),
        d in 0usize..3,
        i in 1usize..7,
        t in prop::array::uniform3(0.0f32..1.0),
    ) {
        let axis = table.axis(d);
        prop_assume!(axis.len() > 2);
        let i = 1 + (i - 1) % (axis.len() - 2);
        let eps = 1e-4;
        let mut below = point3(&table, t);
        below[d] = axis[i] - eps;
        let mut above = below;
        above[d] = axis[i] + eps;
        let lo = lookup_3d(&table, below[0], below[1], below[2]);
        let hi = lookup_3d(&table, above[0], above[1], above[2]);
        prop_assert!((lo - hi).abs() < 0.1, "{lo} vs {hi}");
    }
}

#[test]
fn ve_example_blends_four_corners() {
    let rpm = vec![1000.0, 2000.0, 3000.0];
    let map = vec![30.0, 60.0, 90.0];
    let mut data = Vec::new();
    for m in &map {
        for _ in &rpm {
            data.push(m / 90.0);
        }
    }
    let ve = Table2::new([rpm, map], data).unwrap();
    // halfway in both axes: 0.25 * (30 + 30 + 60 + 60) / 90
    let v = lookup_2d(&ve, 1500.0, 45.0);
    assert!((v - 0.5).abs() < 1e-6);
}

#[test]
fn trilinear_matches_grid_and_blends() {
    let xs = vec![0.0, 10.0];
    let ys = vec![0.0, 10.0];
    let zs = vec![0.0, 10.0, 20.0];
    // value = x + 2y + 3z
    let mut data = Vec::new();
    for z in &zs {
        for y in &ys {
            for x in &xs {
                data.push(x + 2.0 * y + 3.0 * z);
            }
        }
    }
    let t = Table3::new([xs, ys, zs], data).unwrap();
    assert_eq!(lookup_3d(&t, 10.0, 0.0, 20.0), 70.0);
    assert!((lookup_3d(&t, 5.0, 5.0, 15.0) - 60.0).abs() < 1e-4);
    // beyond the last coolant point the edge slope continues
    assert!((lookup_3d(&t, 0.0, 0.0, 30.0) - 90.0).abs() < 1e-4);
}
