use ecu_core::position::{EdgeEvent, PositionTracker};
use ecu_core::WheelCfg;
use ecu_hardware::CrankWheel;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // Constant speed from any starting tooth: sync within two revolutions,
    // then the tooth count follows the wheel exactly.
    #[test]
    fn constant_speed_syncs_and_tracks(rpm in 300.0f32..8000.0, start in 0u16..35) {
        let wheel = WheelCfg::default();
        let tracker = PositionTracker::new(wheel);
        let mut crank = CrankWheel::new(wheel.teeth, rpm, start, 1_000);

        let mut synced_at = None;
        for n in 0..(2 * 35 + 1) {
            let tooth = crank.next_tooth();
            let ev = tracker.on_tooth_edge(crank.advance());
            prop_assert_ne!(ev, EdgeEvent::SyncLost);
            if ev == EdgeEvent::SyncAcquired {
                prop_assert_eq!(tooth, 0);
                synced_at = Some(n);
            }
            if synced_at.is_some() {
                let s = tracker.snapshot();
                prop_assert_eq!(s.tooth_count, tooth);
                prop_assert!((s.current_angle_deg - f32::from(tooth) * 10.0).abs() < 1e-3);
            }
        }
        prop_assert!(synced_at.is_some());
        prop_assert!(tracker.is_synced());
        let rpm_err = (tracker.rpm() - rpm).abs() / rpm;
        prop_assert!(rpm_err < 0.01, "rpm {} vs {}", tracker.rpm(), rpm);
    }

    // An even tooth train with one double-width period: the count resets
    // exactly on the long period and grows by one everywhere else.
    #[test]
    fn count_resets_only_at_gap(period in 150u64..5_000, before in 3usize..34) {
        let tracker = PositionTracker::new(WheelCfg::default());
        let mut t = 10_000u64;
        tracker.on_tooth_edge(t);
        for _ in 0..before {
            t += period;
            tracker.on_tooth_edge(t);
            prop_assert!(!tracker.is_synced());
        }
        t += 2 * period;
        prop_assert_eq!(tracker.on_tooth_edge(t), EdgeEvent::SyncAcquired);
        prop_assert_eq!(tracker.snapshot().tooth_count, 0);
        for k in 1..35u16 {
            t += period;
            prop_assert_eq!(tracker.on_tooth_edge(t), EdgeEvent::Tooth);
            prop_assert_eq!(tracker.snapshot().tooth_count, k);
        }
        t += 2 * period;
        prop_assert_eq!(tracker.on_tooth_edge(t), EdgeEvent::Gap);
        prop_assert_eq!(tracker.snapshot().tooth_count, 0);
    }
}

#[test]
fn speed_change_keeps_sync() {
    let wheel = WheelCfg::default();
    let tracker = PositionTracker::new(wheel);
    let mut crank = CrankWheel::new(wheel.teeth, 2000.0, 0, 0);
    for _ in 0..72 {
        tracker.on_tooth_edge(crank.advance());
    }
    assert!(tracker.is_synced());
    // +10% per revolution is well inside the gap tolerance at this speed
    for rev in 1..=5 {
        crank.set_rpm(2000.0 * (1.0 + 0.1 * rev as f32));
        for _ in 0..35 {
            let ev = tracker.on_tooth_edge(crank.advance());
            assert_ne!(ev, EdgeEvent::SyncLost);
        }
    }
    assert!(tracker.is_synced());
}

#[test]
fn short_teeth_are_never_taken_for_the_gap() {
    let wheel = WheelCfg::default();
    // from the wheel's rated limit up to where a tooth is shorter than the tolerance
    for rpm in [wheel.max_rpm(), 12_000.0, 18_000.0] {
        let tracker = PositionTracker::new(wheel);
        let mut crank = CrankWheel::new(wheel.teeth, rpm, 0, 1_000);
        let mut max_count = 0;
        for _ in 0..(3 * 35) {
            let tooth = crank.next_tooth();
            let ev = tracker.on_tooth_edge(crank.advance());
            assert_ne!(ev, EdgeEvent::SyncLost, "at {rpm} rpm");
            if matches!(ev, EdgeEvent::Gap | EdgeEvent::SyncAcquired) {
                assert_eq!(tooth, 0, "gap seen at tooth {tooth}, {rpm} rpm");
            }
            max_count = max_count.max(tracker.snapshot().tooth_count);
        }
        assert!(tracker.is_synced(), "{rpm} rpm");
        assert_eq!(max_count, 34, "{rpm} rpm");
    }
}
