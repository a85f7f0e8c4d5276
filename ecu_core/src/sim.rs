//! Discrete-event engine rig.
//!
//! `SimClock` drives simulated time. Every `sleep` walks forward through the
//! crank edges and compare-timer deadlines that fall inside the slept interval
//! and delivers each one to the interrupt handlers at its exact timestamp, so a
//! scheduler running on a `SimClock` sees the same interleaving it would on a
//! board. Used by the CLI `simulate` command and the integration tests.
//!
//! The rig expects the scheduler to read its sensor directly; a background
//! sampler sleeping on the same clock would advance the world from another
//! thread.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ecu_hardware::{CrankWheel, SimulatedActuator, SimulatedMapSensor, SimulatedTimer};
use ecu_traits::{Clock, ManualClock};

use crate::builder::{EcuBuilder, Set};
use crate::config::ChannelCfg;
use crate::isr::InterruptHandlers;
use crate::scheduler::Scheduler;

/// Upper bound on events delivered by a single `sleep`.
const MAX_EVENTS_PER_SLEEP: usize = 100_000;

struct World {
    crank: Option<CrankWheel>,
    handlers: InterruptHandlers,
    fuel_timer: SimulatedTimer,
    spark_timer: SimulatedTimer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Edge,
    Fuel,
    Spark,
}

impl World {
    /// Earliest pending event at or before `until_us`. Overdue deadlines fire
    /// at `now_us`; ties go edge, fuel, spark.
    fn next_event(&self, now_us: u64, until_us: u64) -> Option<(u64, Event)> {
        let candidates = [
            (self.crank.as_ref().map(CrankWheel::peek_next_edge_us), Event::Edge),
            (self.fuel_timer.next_fire(), Event::Fuel),
            (self.spark_timer.next_fire(), Event::Spark),
        ];
        candidates
            .into_iter()
            .filter_map(|(t, ev)| t.map(|t| (t.max(now_us), ev)))
            .filter(|(t, _)| *t <= until_us)
            .min_by_key(|(t, ev)| (*t, *ev as u8))
    }

    fn deliver(&mut self, ev: Event, at_us: u64) {
        match ev {
            Event::Edge => {
                if let Some(crank) = self.crank.as_mut() {
                    let t = crank.advance();
                    self.handlers.on_tooth_edge(t);
                }
            }
            Event::Fuel => {
                if self.fuel_timer.take_due(at_us).is_some()
                    && let Err(e) = self.handlers.on_fuel_timer()
                {
                    tracing::debug!(at_us, error = %e, "simulated fuel interrupt failed");
                }
            }
            Event::Spark => {
                if self.spark_timer.take_due(at_us).is_some()
                    && let Err(e) = self.handlers.on_spark_timer()
                {
                    tracing::debug!(at_us, error = %e, "simulated spark interrupt failed");
                }
            }
        }
    }
}

/// Simulated time base shared by the scheduler and the rig.
#[derive(Clone)]
pub struct SimClock {
    time: ManualClock,
    world: Arc<Mutex<Option<World>>>,
}

impl core::fmt::Debug for SimClock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimClock")
            .field("now_us", &self.time.now_us())
            .finish_non_exhaustive()
    }
}

impl SimClock {
    fn new(time: ManualClock) -> Self {
        Self {
            time,
            world: Arc::new(Mutex::new(None)),
        }
    }

    /// Move time forward to `until_us`, delivering every event on the way.
    pub fn advance_to(&self, until_us: u64) {
        let Ok(mut guard) = self.world.lock() else {
            self.time.set_us(until_us);
            return;
        };
        let Some(world) = guard.as_mut() else {
            self.time.set_us(until_us);
            return;
        };
        for _ in 0..MAX_EVENTS_PER_SLEEP {
            let now = self.time.now_us();
            let Some((at, ev)) = world.next_event(now, until_us) else {
                break;
            };
            self.time.set_us(at);
            world.deliver(ev, at);
        }
        self.time.set_us(until_us);
    }
}

impl Clock for SimClock {
    fn now_us(&self) -> u64 {
        self.time.now_us()
    }

    fn sleep(&self, d: Duration) {
        let us = d.as_micros().min(u128::from(u64::MAX)) as u64;
        self.advance_to(self.time.now_us().saturating_add(us));
    }
}

/// Simulated devices plus the clock that connects them to a scheduler.
pub struct SimRig {
    pub clock: SimClock,
    pub sensor: SimulatedMapSensor,
    pub injector: SimulatedActuator,
    pub coil: SimulatedActuator,
    pub fuel_timer: SimulatedTimer,
    pub spark_timer: SimulatedTimer,
}

impl Default for SimRig {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRig {
    pub fn new() -> Self {
        let time = ManualClock::new();
        Self {
            clock: SimClock::new(time.clone()),
            sensor: SimulatedMapSensor::new(),
            injector: SimulatedActuator::new("injector", time.clone()),
            coil: SimulatedActuator::new("coil", time),
            fuel_timer: SimulatedTimer::new(),
            spark_timer: SimulatedTimer::new(),
        }
    }

    /// Scheduler builder with every device and the clock already wired.
    pub fn builder(&self) -> EcuBuilder<Set, Set, Set> {
        Scheduler::builder()
            .with_sensor(self.sensor.clone())
            .with_injector(self.injector.clone(), self.fuel_timer.clone())
            .with_coil(self.coil.clone(), self.spark_timer.clone())
            .with_clock(self.clock.clone())
    }

    /// Connect a built scheduler and start the crank.
    pub fn attach(&self, scheduler: &Scheduler, crank: CrankWheel) {
        let world = World {
            crank: Some(crank),
            handlers: scheduler.interrupt_handlers(),
            fuel_timer: self.fuel_timer.clone(),
            spark_timer: self.spark_timer.clone(),
        };
        if let Ok(mut g) = self.clock.world.lock() {
            *g = Some(world);
        }
    }

    /// Drop the interrupt handlers, breaking the clock/scheduler reference cycle.
    pub fn detach(&self) {
        if let Ok(mut g) = self.clock.world.lock() {
            *g = None;
        }
    }

    pub fn set_rpm(&self, rpm: f32) {
        self.with_world(|w| {
            if let Some(c) = w.crank.as_mut() {
                c.set_rpm(rpm);
            }
        });
    }

    /// Stop producing tooth edges.
    pub fn stop_crank(&self) {
        self.with_world(|w| w.crank = None);
    }

    /// Put a physical value on an ADC channel.
    pub fn set_channel(&self, ch: &ChannelCfg, value: f32) {
        self.sensor.set_raw(ch.channel, ch.to_raw(value));
    }

    pub fn now_us(&self) -> u64 {
        self.clock.now_us()
    }

    fn with_world(&self, f: impl FnOnce(&mut World)) {
        if let Ok(mut g) = self.clock.world.lock()
            && let Some(w) = g.as_mut()
        {
            f(w);
        }
    }
}

impl Drop for SimRig {
    fn drop(&mut self) {
        self.detach();
    }
}
