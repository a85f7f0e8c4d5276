use thiserror::Error;

/// Timer deadline violations. Each one forces the affected actuator off and
/// latches until the controller is explicitly cleared.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TimingFault {
    #[error("injector close deadline missed")]
    FuelCloseMissed,
    #[error("injector open requested while already open")]
    FuelOpenWhileOpen,
    #[error("spark discharge deadline missed")]
    SparkDischargeMissed,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EcuError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("timing fault: {0}")]
    Timing(TimingFault),
    #[error("crank position sync lost")]
    SyncLost,
    #[error("table error: {0}")]
    Table(String),
    #[error("invalid state: {0}")]
    State(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing MAP sensor")]
    MissingSensor,
    #[error("missing injector")]
    MissingInjector,
    #[error("missing ignition coil")]
    MissingCoil,
    #[error("missing calibration tables")]
    MissingTables,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("axis {axis} needs at least 2 points, got {len}")]
    AxisTooShort { axis: usize, len: usize },
    #[error("axis {axis} must be finite and strictly increasing")]
    AxisNotIncreasing { axis: usize },
    #[error("grid has {got} values, axes require {expected}")]
    ShapeMismatch { expected: usize, got: usize },
    #[error("grid contains a non-finite value at {index}")]
    NonFinite { index: usize },
    #[error("expected a {expected}D table, got {got}D")]
    Dimension { expected: usize, got: usize },
}

impl From<TableError> for EcuError {
    fn from(e: TableError) -> Self {
        EcuError::Table(e.to_string())
    }
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
