#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Engine control core (hardware-agnostic).
//!
//! All hardware interactions go through the `ecu_traits` seams: `AnalogInput`
//! for MAP and coolant, `Actuator` plus `CompareTimer` for the injector and
//! the coil, and `Clock` for time.
//!
//! ## Architecture
//!
//! - **Position**: tooth-wheel tracking with missing-tooth resync (`position`)
//! - **Tables**: N-dimensional multilinear lookup (`table`, `calibration`)
//! - **Planning**: spark and fuel angles from one engine sample (`plan`)
//! - **Actuation**: injector and coil state machines driven by timer
//!   interrupts (`injection`, `spark`, `isr`)
//! - **Loop**: non-blocking `Scheduler::step` and the `runner` around it
//!
//! State shared between the loop and the interrupt handlers lives behind
//! `critical_section` mutexes (`shared`); no handler blocks or allocates.
//!
//! ## Angles
//!
//! Every angle is in degrees and wraps at `WheelCfg::tdc_deg`. Angle 0 is the
//! first tooth after the missing one.

pub mod builder;
pub mod calibration;
pub mod config;
pub mod conversions;
pub mod error;
pub mod hw_error;
pub mod injection;
pub mod isr;
pub mod plan;
pub mod position;
pub mod runner;
pub mod sampler;
pub mod scheduler;
pub mod shared;
#[cfg(feature = "sim")]
pub mod sim;
pub mod spark;
pub mod status;
pub mod table;
pub mod util;

use ecu_traits::{Actuator, CompareTimer};

/// Owned injector or coil output line.
pub type BoxedActuator = Box<dyn Actuator + Send>;
/// Owned compare timer.
pub type BoxedTimer = Box<dyn CompareTimer + Send>;

pub use builder::{EcuBuilder, Missing, Set};
pub use calibration::{Tables, VeTable};
pub use config::{ChannelCfg, FuelCfg, SchedulerCfg, SensorCfg, SparkCfg, WheelCfg};
pub use error::{BuildError, EcuError, Result, TableError, TimingFault};
pub use injection::{InjectionController, InjectorState};
pub use isr::InterruptHandlers;
pub use plan::{EngineSample, FuelPlan, SparkPlan};
pub use position::{EdgeEvent, Position, PositionTracker};
pub use runner::{RunOptions, RunSummary, SamplingMode, run};
pub use scheduler::Scheduler;
pub use spark::{CoilState, SparkController};
pub use status::CycleStatus;
pub use table::{Table, Table2, Table3, lookup_2d, lookup_3d};
