//! Configuration types for the engine controller.
//!
//! These are the runtime configuration structs used by the tracker, the
//! controllers and the scheduler. They are separate from the TOML-deserialized
//! config in `ecu_config`.

/// Trigger wheel geometry.
#[derive(Debug, Clone, Copy)]
pub struct WheelCfg {
    /// Tooth positions including the missing one (36 for a 36-1 wheel).
    pub teeth: u16,
    pub angle_per_tooth_deg: f32,
    /// Angle of one full cycle; every angle wraps at this value.
    pub tdc_deg: f32,
    /// Max |period - 2*avg| in microseconds for an edge to close the gap. The
    /// period must also exceed 1.5 average periods.
    pub tooth_tolerance_us: f32,
    /// Sync is dropped after `stall_factor * avg` microseconds without an edge.
    pub stall_factor: f32,
}

impl Default for WheelCfg {
    fn default() -> Self {
        Self {
            teeth: 36,
            angle_per_tooth_deg: 10.0,
            tdc_deg: 360.0,
            tooth_tolerance_us: 100.0,
            stall_factor: 4.0,
        }
    }
}

impl WheelCfg {
    /// Teeth that actually produce an edge.
    #[inline]
    pub fn physical_teeth(&self) -> u16 {
        self.teeth.saturating_sub(1)
    }

    /// Highest speed at which the gap stays distinguishable: a normal tooth
    /// period must exceed twice `tooth_tolerance_us`.
    pub fn max_rpm(&self) -> f32 {
        let denom = self.tdc_deg * 2.0 * self.tooth_tolerance_us;
        if denom > 0.0 {
            self.angle_per_tooth_deg * 60_000_000.0 / denom
        } else {
            0.0
        }
    }
}

/// Fuel pulse computation and injector window.
#[derive(Debug, Clone, Copy)]
pub struct FuelCfg {
    /// Injector closes this many degrees before the spark.
    pub grace_deg: f32,
    /// The injector may open up to this many degrees after its start angle.
    pub open_window_deg: f32,
    /// Pulse width at VE = 1.0 and MAP = `map_reference_kpa`.
    pub req_fuel_us: f32,
    pub dead_time_us: f32,
    pub map_reference_kpa: f32,
    pub ve_max: f32,
}

impl Default for FuelCfg {
    fn default() -> Self {
        Self {
            grace_deg: 10.0,
            open_window_deg: 15.0,
            req_fuel_us: 6_000.0,
            dead_time_us: 600.0,
            map_reference_kpa: 100.0,
            ve_max: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SparkCfg {
    pub dwell_us: f32,
    /// Discharge error above this is counted as a late spark.
    pub spark_tolerance_us: f32,
    pub advance_min_deg: f32,
    pub advance_max_deg: f32,
    /// Fuel close angle may trail the spark angle by at most this much.
    pub close_margin_deg: f32,
}

impl Default for SparkCfg {
    fn default() -> Self {
        Self {
            dwell_us: 3_000.0,
            spark_tolerance_us: 10.0,
            advance_min_deg: -10.0,
            advance_max_deg: 50.0,
            close_margin_deg: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerCfg {
    /// Compare timers are armed once the target angle is this close ahead.
    pub arm_window_deg: f32,
    pub loop_period_us: u64,
    /// Grace past a timer deadline before the controller declares it missed.
    pub max_timer_overrun_us: u64,
}

impl Default for SchedulerCfg {
    fn default() -> Self {
        Self {
            arm_window_deg: 15.0,
            loop_period_us: 100,
            max_timer_overrun_us: 500,
        }
    }
}

/// Linear raw-count conversion for one ADC channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelCfg {
    pub channel: u8,
    pub per_count: f32,
    pub offset: f32,
}

impl ChannelCfg {
    #[inline]
    pub fn convert(&self, raw: u16) -> f32 {
        f32::from(raw) * self.per_count + self.offset
    }

    /// Nearest raw count for a physical value, saturating to the 12-bit range.
    pub fn to_raw(&self, value: f32) -> u16 {
        if self.per_count == 0.0 {
            return 0;
        }
        let raw = ((value - self.offset) / self.per_count).round();
        raw.clamp(0.0, 4095.0) as u16
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SensorCfg {
    /// Manifold pressure in kPa.
    pub map: ChannelCfg,
    /// Coolant temperature in degrees C; feeds the third VE axis.
    pub coolant: Option<ChannelCfg>,
}

impl Default for SensorCfg {
    fn default() -> Self {
        Self {
            map: ChannelCfg {
                channel: 0,
                per_count: 0.0625,
                offset: 0.0,
            },
            coolant: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_conversion_round_trips() {
        let ch = ChannelCfg {
            channel: 0,
            per_count: 0.05,
            offset: 10.0,
        };
        assert_eq!(ch.convert(1000), 60.0);
        assert_eq!(ch.to_raw(60.0), 1000);
        assert_eq!(ch.to_raw(-100.0), 0);
        assert_eq!(ch.to_raw(1e6), 4095);
    }
}
