//! Hardware seams shared by the ECU core, the hardware adapters and the CLI.
//!
//! Every trait returns `Box<dyn Error + Send + Sync>` at the boundary; the core
//! maps those into its typed error enum.

pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

/// Drive level of an actuator output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Off,
    On,
}

/// Level-set output (fuel injector driver, ignition coil driver).
pub trait Actuator {
    fn set(&mut self, level: Level) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// One-shot countdown/compare timer. Arming again before expiry supersedes the
/// previous deadline; there is no cancel.
pub trait CompareTimer {
    fn arm_at(&mut self, deadline_us: u64) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Multi-channel analog sampler (external ADC).
pub trait AnalogInput {
    fn read_channel(
        &mut self,
        channel: u8,
    ) -> Result<u16, Box<dyn std::error::Error + Send + Sync>>;
}

impl<T: Actuator + ?Sized> Actuator for Box<T> {
    fn set(&mut self, level: Level) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).set(level)
    }
}

impl<T: CompareTimer + ?Sized> CompareTimer for Box<T> {
    fn arm_at(&mut self, deadline_us: u64) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).arm_at(deadline_us)
    }
}

impl<T: AnalogInput + ?Sized> AnalogInput for Box<T> {
    fn read_channel(
        &mut self,
        channel: u8,
    ) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
        (**self).read_channel(channel)
    }
}
