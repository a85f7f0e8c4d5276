pub mod crank;
pub mod error;
#[cfg(feature = "hardware")]
pub mod hardware;
pub mod mcp3304;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ecu_traits::{Actuator, AnalogInput, Clock, CompareTimer, Level};

use crate::error::HwError;

pub use crank::CrankWheel;

/// Simulated analog front end. Each channel holds a raw count that tests and
/// the simulator can change while the sensor is owned by the scheduler.
#[derive(Debug, Clone)]
pub struct SimulatedMapSensor {
    raw: Arc<Mutex<[u16; mcp3304::CHANNELS as usize]>>,
    fail: Arc<AtomicBool>,
}

impl Default for SimulatedMapSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedMapSensor {
    pub fn new() -> Self {
        Self {
            raw: Arc::new(Mutex::new([0; mcp3304::CHANNELS as usize])),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set the raw count returned for `channel`. Out-of-range channels are ignored.
    pub fn set_raw(&self, channel: u8, raw: u16) {
        if let Ok(mut g) = self.raw.lock()
            && let Some(slot) = g.get_mut(usize::from(channel))
        {
            *slot = raw & mcp3304::MAX_COUNT;
        }
    }

    /// Make every following read fail with a timeout.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }
}

impl AnalogInput for SimulatedMapSensor {
    fn read_channel(
        &mut self,
        channel: u8,
    ) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(Box::new(HwError::Timeout));
        }
        let g = self
            .raw
            .lock()
            .map_err(|_| HwError::Spi("simulated adc poisoned".into()))?;
        let v = g
            .get(usize::from(channel))
            .copied()
            .ok_or(HwError::InvalidChannel(channel))?;
        tracing::trace!(channel, raw = v, "adc sample (simulated)");
        Ok(v)
    }
}

/// Simulated actuator output. Records every level change with the time it
/// happened so tests can check pulse widths and ordering.
#[derive(Clone)]
pub struct SimulatedActuator {
    name: &'static str,
    clock: Arc<dyn Clock + Send + Sync>,
    state: Arc<Mutex<ActuatorLog>>,
}

#[derive(Debug, Default, Clone)]
struct ActuatorLog {
    level: Option<Level>,
    edges: Vec<(u64, Level)>,
}

impl core::fmt::Debug for SimulatedActuator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimulatedActuator")
            .field("name", &self.name)
            .field("level", &self.level())
            .finish()
    }
}

impl SimulatedActuator {
    pub fn new(name: &'static str, clock: impl Clock + Send + Sync + 'static) -> Self {
        Self {
            name,
            clock: Arc::new(clock),
            state: Arc::new(Mutex::new(ActuatorLog::default())),
        }
    }

    /// Current drive level; `Off` until the first `set`.
    pub fn level(&self) -> Level {
        self.state
            .lock()
            .ok()
            .and_then(|g| g.level)
            .unwrap_or(Level::Off)
    }

    /// Every level change as `(timestamp_us, level)`, oldest first.
    pub fn edges(&self) -> Vec<(u64, Level)> {
        self.state.lock().map(|g| g.edges.clone()).unwrap_or_default()
    }

    /// Completed ON→OFF pulses as `(on_us, off_us)`.
    pub fn pulses(&self) -> Vec<(u64, u64)> {
        let mut out = Vec::new();
        let mut on_at = None;
        for (t, lvl) in self.edges() {
            match (lvl, on_at) {
                (Level::On, None) => on_at = Some(t),
                (Level::Off, Some(start)) => {
                    out.push((start, t));
                    on_at = None;
                }
                _ => {}
            }
        }
        out
    }
}

impl Actuator for SimulatedActuator {
    fn set(&mut self, level: Level) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let now = self.clock.now_us();
        let mut g = self
            .state
            .lock()
            .map_err(|_| HwError::Gpio(format!("{} log poisoned", self.name)))?;
        if g.level != Some(level) {
            g.edges.push((now, level));
            g.level = Some(level);
            tracing::trace!(actuator = self.name, t_us = now, ?level, "actuator edge (simulated)");
        }
        Ok(())
    }
}

/// Simulated compare timer. The simulator polls `take_due` to turn an armed
/// deadline into an interrupt; a stuck timer accepts deadlines but never fires.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTimer {
    deadline: Arc<Mutex<Option<u64>>>,
    stuck: Arc<AtomicBool>,
}

impl SimulatedTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn armed(&self) -> Option<u64> {
        self.deadline.lock().ok().and_then(|g| *g)
    }

    /// Simulate a dead peripheral: armed deadlines are recorded but never fire.
    pub fn set_stuck(&self, stuck: bool) {
        self.stuck.store(stuck, Ordering::Relaxed);
    }

    /// Deadline the timer will fire at, or `None` when idle or stuck.
    pub fn next_fire(&self) -> Option<u64> {
        if self.stuck.load(Ordering::Relaxed) {
            return None;
        }
        self.armed()
    }

    /// Consume the deadline if it is due at `now_us`.
    pub fn take_due(&self, now_us: u64) -> Option<u64> {
        if self.stuck.load(Ordering::Relaxed) {
            return None;
        }
        let mut g = self.deadline.lock().ok()?;
        match *g {
            Some(d) if d <= now_us => g.take(),
            _ => None,
        }
    }
}

impl CompareTimer for SimulatedTimer {
    fn arm_at(&mut self, deadline_us: u64) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut g = self
            .deadline
            .lock()
            .map_err(|_| HwError::Gpio("simulated timer poisoned".into()))?;
        *g = Some(deadline_us);
        Ok(())
    }
}
