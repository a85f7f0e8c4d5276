//! Background MAP sampling.
//!
//! Spawns a thread that owns the ADC, pushes the latest raw readings via a
//! bounded channel, and tracks the last-ok timestamp for watchdog logic.
//!
//! Each `MapSampler` spawns exactly one thread that is shut down and joined
//! when the `MapSampler` is dropped.
use crossbeam_channel as xch;
use ecu_traits::{AnalogInput, Clock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Raw ADC counts taken together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    pub map: u16,
    pub coolant: Option<u16>,
}

/// ADC channels the sampler reads each period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleChannels {
    pub map: u8,
    pub coolant: Option<u8>,
}

pub struct MapSampler {
    rx: xch::Receiver<RawSample>,
    last_ok: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl MapSampler {
    pub fn spawn<S: AnalogInput + Send + 'static>(
        mut adc: S,
        channels: SampleChannels,
        hz: u32,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let (tx, rx) = xch::bounded(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let last_ok = Arc::new(AtomicU64::new(0));
        let last_ok_clone = last_ok.clone();
        let period = Duration::from_micros(crate::util::period_us(hz));

        let join_handle = std::thread::spawn(move || {
            let mut read = || -> Result<RawSample, Box<dyn std::error::Error + Send + Sync>> {
                let map = adc.read_channel(channels.map)?;
                let coolant = match channels.coolant {
                    Some(ch) => Some(adc.read_channel(ch)?),
                    None => None,
                };
                Ok(RawSample { map, coolant })
            };
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("MAP sampler received shutdown signal");
                    break;
                }

                match read() {
                    Ok(v) => {
                        // Channel holds one value; a full channel means the
                        // consumer has not caught up and the old value is dropped.
                        match tx.try_send(v) {
                            Ok(()) | Err(xch::TrySendError::Full(_)) => {}
                            Err(xch::TrySendError::Disconnected(_)) => {
                                tracing::debug!("MAP sampler consumer disconnected, exiting thread");
                                break;
                            }
                        }
                        last_ok_clone.store(clock.now_us(), Ordering::Relaxed);
                    }
                    Err(e) => {
                        // the runner's stall watchdog decides when this is fatal
                        tracing::trace!(error = %e, "MAP sample failed");
                    }
                }

                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }
                clock.sleep(period);
            }
            tracing::trace!("MAP sampler thread exiting cleanly");
        });

        Self {
            rx,
            last_ok,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    pub fn latest(&self) -> Option<RawSample> {
        self.rx.try_iter().last()
    }

    /// Microseconds since the last successful read.
    pub fn stalled_for(&self, now_us: u64) -> u64 {
        now_us.saturating_sub(self.last_ok.load(Ordering::Relaxed))
    }
}

impl Drop for MapSampler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => {
                    tracing::trace!("MAP sampler thread joined successfully");
                }
                Err(e) => {
                    tracing::warn!(?e, "MAP sampler thread panicked during shutdown");
                }
            }
        }
    }
}
