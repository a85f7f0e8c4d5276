//! Maps `Box<dyn Error>` from trait boundaries to typed `EcuError`.
//!
//! The traits in `ecu_traits` use `Box<dyn Error + Send + Sync>`; this module
//! converts those to our typed error enum, with an optional feature-gated path
//! for `ecu_hardware::HwError` downcasting.

use crate::error::EcuError;

/// Map a trait-boundary error to a typed `EcuError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> EcuError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<ecu_hardware::error::HwError>() {
            return match hw {
                ecu_hardware::error::HwError::Timeout => EcuError::Hardware(hw.to_string()),
                other => EcuError::HardwareFault(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("fault") {
        EcuError::HardwareFault(s)
    } else {
        EcuError::Hardware(s)
    }
}

/// Convenience for `map_err` on boxed trait errors.
pub(crate) fn map_boxed(e: Box<dyn std::error::Error + Send + Sync>) -> EcuError {
    map_hw_error(e.as_ref())
}
