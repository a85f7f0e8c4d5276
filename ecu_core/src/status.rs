//! Outcome of one scheduler step.

use crate::error::EcuError;

#[derive(Debug, Clone, PartialEq)]
pub enum CycleStatus {
    /// No crank sync; both actuators held off.
    Unsynced,
    /// Fresh fuel and spark plans were published this step.
    Planned,
    /// Plans in flight; timers armed as their angles came into range.
    Waiting,
    /// A controller watchdog tripped; both actuators have been forced off.
    Faulted(EcuError),
}
