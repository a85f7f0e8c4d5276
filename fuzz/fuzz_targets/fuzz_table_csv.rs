#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(t) = ecu_config::parse_table_csv(data) {
        let cells: usize = t.axes.iter().map(Vec::len).product();
        assert_eq!(t.data.len(), cells);
        for axis in &t.axes {
            assert!(axis.windows(2).all(|w| w[0] < w[1]));
        }
    }
});
