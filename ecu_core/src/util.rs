//! Common angle/time helpers for ecu_core.

/// Number of microseconds in one second.
pub const MICROS_PER_SEC: u64 = 1_000_000;
/// Microseconds per minute, for RPM conversions.
pub const MICROS_PER_MIN: f32 = 60_000_000.0;

/// Compute the period in microseconds for a given sampling rate in Hz.
/// - Clamps `hz` to at least 1 to avoid division by zero.
/// - Ensures result is at least 1 microsecond.
#[inline]
pub fn period_us(hz: u32) -> u64 {
    (MICROS_PER_SEC / u64::from(hz.max(1))).max(1)
}

/// Normalize `deg` into `[0, cycle)`.
#[inline]
pub fn wrap_angle(deg: f32, cycle: f32) -> f32 {
    let w = deg.rem_euclid(cycle);
    // rem_euclid can round up to `cycle` for tiny negative inputs
    if w >= cycle { 0.0 } else { w }
}

/// Forward angular distance from `from` to `to`, in `[0, cycle)`.
#[inline]
pub fn angle_ahead(from: f32, to: f32, cycle: f32) -> f32 {
    wrap_angle(to - from, cycle)
}

/// Signed angular difference `to - from` folded into `(-cycle/2, cycle/2]`.
#[inline]
pub fn angle_delta(from: f32, to: f32, cycle: f32) -> f32 {
    let d = angle_ahead(from, to, cycle);
    if d > cycle / 2.0 { d - cycle } else { d }
}

/// Degrees swept in `us` microseconds at `deg_per_us`.
#[inline]
pub fn angle_equivalent(us: f32, deg_per_us: f32) -> f32 {
    us * deg_per_us
}

/// Whole microseconds needed to sweep `deg` at `deg_per_us`, rounded to nearest.
/// Returns `None` when the engine is not turning.
#[inline]
pub fn us_for_angle(deg: f32, deg_per_us: f32) -> Option<u64> {
    if !(deg_per_us.is_finite() && deg_per_us > 0.0) || !deg.is_finite() {
        return None;
    }
    let us = (deg.max(0.0) / deg_per_us).round();
    Some(if us >= u64::MAX as f32 { u64::MAX } else { us as u64 })
}

/// Engine speed for an angular velocity, with `cycle_deg` degrees per revolution.
#[inline]
pub fn rpm_from_deg_per_us(deg_per_us: f32, cycle_deg: f32) -> f32 {
    if cycle_deg <= 0.0 {
        return 0.0;
    }
    deg_per_us * MICROS_PER_MIN / cycle_deg
}

/// Angular velocity for an engine speed, inverse of `rpm_from_deg_per_us`.
#[inline]
pub fn deg_per_us_from_rpm(rpm: f32, cycle_deg: f32) -> f32 {
    rpm * cycle_deg / MICROS_PER_MIN
}

/// Position of the crank relative to an angular event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approach {
    /// At or past `target` but within the allowed window after it.
    Inside,
    /// Within the arm window ahead of `target`; `us` until it is reached.
    Ahead { us: u64 },
    /// Neither: too far ahead to arm, or past the window.
    Outside,
}

/// Classify `angle` against an event at `target` that may still start up to
/// `window_deg` late, arming at most `arm_window_deg` early.
pub fn approach(
    target: f32,
    angle: f32,
    window_deg: f32,
    arm_window_deg: f32,
    deg_per_us: f32,
    cycle: f32,
) -> Approach {
    let late = angle_ahead(target, angle, cycle);
    if late < window_deg {
        return Approach::Inside;
    }
    let early = cycle - late;
    if early > arm_window_deg {
        return Approach::Outside;
    }
    match us_for_angle(early, deg_per_us) {
        // less than a microsecond away
        Some(0) => Approach::Inside,
        Some(us) => Approach::Ahead { us },
        None => Approach::Outside,
    }
}
