use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{EcuError, Report, Result as CoreResult};
use crate::injection::InjectionStats;
use crate::sampler::{MapSampler, SampleChannels};
use crate::scheduler::Scheduler;
use crate::spark::SparkStats;
use crate::status::CycleStatus;

/// How MAP sampling should be orchestrated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    /// Read inside the scheduler step whenever a plan is due
    Direct,
    /// Background thread sampling at the given Hz
    Paced(u32),
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: SamplingMode,
    /// Stop after this many scheduler steps.
    pub max_steps: Option<u64>,
    /// Set by a signal handler to request a clean stop.
    pub shutdown: Option<Arc<AtomicBool>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: SamplingMode::Direct,
            max_steps: None,
            shutdown: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunSummary {
    pub steps: u64,
    pub plans: u64,
    pub unsynced_steps: u64,
    pub sync_losses: u32,
    pub rpm: f32,
    pub injection: InjectionStats,
    pub spark: SparkStats,
}

impl RunSummary {
    pub fn from_scheduler(s: &Scheduler) -> Self {
        let stats = s.stats();
        Self {
            steps: stats.steps,
            plans: stats.plans,
            unsynced_steps: stats.unsynced_steps,
            sync_losses: s.tracker().snapshot().sync_losses,
            rpm: s.tracker().rpm(),
            injection: s.injection().stats(),
            spark: s.spark().stats(),
        }
    }
}

/// Stall threshold for the background sampler: ten sample periods, never
/// below 20 ms.
#[inline]
fn sampler_stall_threshold_us(period_us: u64) -> u64 {
    period_us.saturating_mul(10).max(20_000)
}

#[inline]
fn stalled_now(elapsed_us: u64, stalled_us: u64, threshold_us: u64) -> bool {
    elapsed_us >= threshold_us && stalled_us > threshold_us
}

/// Drive the scheduler until shutdown, the step budget, or a fatal fault.
///
/// Both actuators are forced off on every exit path.
pub fn run(scheduler: &mut Scheduler, opts: RunOptions) -> CoreResult<RunSummary> {
    let clock = scheduler.clock();
    let period = Duration::from_micros(scheduler.scheduler_cfg().loop_period_us);

    let (sampler, stall_threshold_us) = match opts.mode {
        SamplingMode::Direct => (None, u64::MAX),
        SamplingMode::Paced(hz) => {
            let adc = scheduler.detach_sensor().ok_or_else(|| {
                Report::new(EcuError::State("sensor already detached".into()))
            })?;
            let sensors = scheduler.sensors();
            let channels = SampleChannels {
                map: sensors.map.channel,
                coolant: sensors.coolant.map(|c| c.channel),
            };
            let s = MapSampler::spawn(adc, channels, hz, Arc::clone(&clock));
            let threshold = sampler_stall_threshold_us(crate::util::period_us(hz));
            (Some(s), threshold)
        }
    };

    let mode = match opts.mode {
        SamplingMode::Direct => "direct",
        SamplingMode::Paced(_) => "sampler",
    };
    tracing::info!(mode, loop_period_us = period.as_micros() as u64, "engine loop start");

    let start_us = clock.now_us();
    let mut steps = 0u64;
    let result = loop {
        if let Some(flag) = &opts.shutdown
            && flag.load(Ordering::Relaxed)
        {
            tracing::info!("shutdown requested");
            break Ok(());
        }
        if opts.max_steps.is_some_and(|max| steps >= max) {
            break Ok(());
        }

        if let Some(s) = &sampler {
            if let Some(raw) = s.latest() {
                scheduler.feed_raw(raw);
            }
            let now = clock.now_us();
            if stalled_now(now - start_us.min(now), s.stalled_for(now), stall_threshold_us) {
                break Err(Report::new(EcuError::HardwareFault(
                    "MAP sampler stalled".into(),
                )));
            }
        }

        match scheduler.step() {
            Ok(CycleStatus::Faulted(e)) => {
                tracing::error!(error = %e, "engine loop aborted");
                break Err(Report::new(e));
            }
            Ok(_) => {}
            Err(e) => break Err(e),
        }
        steps += 1;
        clock.sleep(period);
    };

    let off = scheduler.suppress();
    drop(sampler);
    result?;
    off?;

    let summary = RunSummary::from_scheduler(scheduler);
    tracing::info!(
        steps = summary.steps,
        plans = summary.plans,
        pulses = summary.injection.pulses,
        sparks = summary.spark.sparks,
        "engine loop stopped"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::{sampler_stall_threshold_us, stalled_now};

    #[test]
    fn stall_threshold_has_floor() {
        assert_eq!(sampler_stall_threshold_us(1_000), 20_000);
        assert_eq!(sampler_stall_threshold_us(10_000), 100_000);
    }

    #[test]
    fn stall_needs_warmup() {
        assert!(!stalled_now(10, 50_000, 20_000));
        assert!(stalled_now(30_000, 25_000, 20_000));
        assert!(!stalled_now(30_000, 5_000, 20_000));
    }
}
