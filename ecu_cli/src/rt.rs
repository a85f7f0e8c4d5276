//! Real-time process setup (Linux SCHED_FIFO, affinity and mlockall; macOS mlockall).

use crate::cli::{RtArgs, RtLock};

/// Apply the requested real-time settings once per process. Every step is
/// best effort: failures are logged and the run continues without them.
pub fn setup_rt_once(args: RtArgs) {
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();

    if !args.rt {
        return;
    }
    let lock = args.rt_lock.unwrap_or_else(RtLock::os_default);
    RT_ONCE.get_or_init(|| {
        match imp::lock_memory(lock) {
            Ok(()) => tracing::info!(?lock, "RT: memory lock applied"),
            Err(err) => tracing::warn!(?lock, "mlockall failed: {err}"),
        }
        imp::apply_scheduling(args.rt_prio, args.rt_cpu);
    });
}

#[cfg(unix)]
fn mlockall_flags(flags: libc::c_int) -> std::io::Result<()> {
    let rc = unsafe { libc::mlockall(flags) };
    if rc != 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(target_os = "linux")]
mod imp {
    use super::{RtLock, mlockall_flags};
    use libc::{CPU_ISSET, CPU_SET, CPU_ZERO, MCL_CURRENT, MCL_FUTURE, SCHED_FIFO};

    /// CAP_SYS_NICE bit in the capability masks of /proc/self/status.
    const CAP_SYS_NICE: u64 = 1 << 23;
    const MAX_CPUSET_BITS: usize = std::mem::size_of::<libc::cpu_set_t>() * 8;

    fn is_retryable(err: &std::io::Error) -> bool {
        matches!(err.raw_os_error(), Some(code) if code == libc::EPERM || code == libc::ENOMEM)
    }

    fn memlock_limit_hint() -> Option<String> {
        let mut rlim = std::mem::MaybeUninit::<libc::rlimit>::uninit();
        let rc = unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, rlim.as_mut_ptr()) };
        if rc != 0 {
            return None;
        }
        let cur = unsafe { rlim.assume_init() }.rlim_cur;
        Some(if cur == libc::RLIM_INFINITY {
            "memlock limit: unlimited".to_string()
        } else {
            format!("memlock limit: {} KiB", cur / 1024)
        })
    }

    pub(super) fn lock_memory(lock: RtLock) -> eyre::Result<()> {
        let err = match lock {
            RtLock::None => return Ok(()),
            RtLock::Current => match mlockall_flags(MCL_CURRENT) {
                Ok(()) => return Ok(()),
                Err(e) => e,
            },
            RtLock::All => match mlockall_flags(MCL_CURRENT | MCL_FUTURE) {
                Ok(()) => return Ok(()),
                // Locking future pages can exceed the limit where current alone fits.
                Err(e) if is_retryable(&e) && mlockall_flags(MCL_CURRENT).is_ok() => {
                    tracing::warn!("mlockall(current|future) failed ({e}); locked current pages only");
                    return Ok(());
                }
                Err(e) => e,
            },
        };
        let mut msg = format!("{err}");
        if is_retryable(&err) {
            if let Some(hint) = memlock_limit_hint() {
                msg.push_str(&format!("; {hint}"));
            }
            msg.push_str("; needs CAP_IPC_LOCK (or root) and a sufficient 'ulimit -l'");
        }
        Err(eyre::eyre!(msg))
    }

    fn has_sys_nice() -> bool {
        let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
            return false;
        };
        status
            .lines()
            .filter(|l| l.starts_with("CapEff:"))
            .filter_map(|l| l.split_whitespace().nth(1))
            .filter_map(|hex| u64::from_str_radix(hex, 16).ok())
            .any(|caps| caps & CAP_SYS_NICE != 0)
    }

    fn set_fifo_priority(prio: Option<i32>) -> eyre::Result<i32> {
        let euid = unsafe { libc::geteuid() };
        if euid != 0 && !has_sys_nice() {
            eyre::bail!(
                "SCHED_FIFO needs CAP_SYS_NICE or root (euid {euid}); \
                 try 'sudo setcap cap_sys_nice=ep /path/to/ecu'"
            );
        }
        let (min, max) = unsafe {
            (
                libc::sched_get_priority_min(SCHED_FIFO),
                libc::sched_get_priority_max(SCHED_FIFO),
            )
        };
        let (min, max) = if min < 0 || max < 0 { (1, 99) } else { (min, max) };
        let value = prio.unwrap_or(max).clamp(min, max);
        let param = libc::sched_param {
            sched_priority: value,
        };
        let rc = unsafe { libc::sched_setscheduler(0, SCHED_FIFO, &param) };
        if rc != 0 {
            return Err(eyre::eyre!(std::io::Error::last_os_error()));
        }
        Ok(value)
    }

    fn pin_cpu(cpu: usize) -> eyre::Result<()> {
        let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if online < 1 {
            eyre::bail!("_SC_NPROCESSORS_ONLN < 1");
        }
        if cpu as libc::c_long >= online {
            eyre::bail!("requested CPU {cpu} >= online {online}");
        }
        if cpu >= MAX_CPUSET_BITS {
            eyre::bail!("requested CPU {cpu} exceeds cpu_set_t capacity {MAX_CPUSET_BITS}");
        }
        let size = std::mem::size_of::<libc::cpu_set_t>();
        let mut allowed: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::sched_getaffinity(0, size, &mut allowed) };
        if rc == 0 && !unsafe { CPU_ISSET(cpu, &allowed) } {
            eyre::bail!("CPU {cpu} not permitted by current affinity mask");
        }
        let mut desired: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        unsafe {
            CPU_ZERO(&mut desired);
            CPU_SET(cpu, &mut desired);
        }
        let rc = unsafe { libc::sched_setaffinity(0, size, &desired) };
        if rc != 0 {
            return Err(eyre::eyre!(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    pub(super) fn apply_scheduling(prio: Option<i32>, cpu: Option<usize>) {
        match set_fifo_priority(prio) {
            Ok(p) => tracing::info!(prio = p, "RT: SCHED_FIFO applied"),
            Err(err) => tracing::warn!("sched_setscheduler(SCHED_FIFO) failed: {err}"),
        }
        let cpu = cpu.unwrap_or(0);
        match pin_cpu(cpu) {
            Ok(()) => tracing::info!(cpu, "RT: pinned to CPU"),
            Err(err) => tracing::warn!("affinity not applied: {err}"),
        }
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
mod imp {
    use super::{RtLock, mlockall_flags};
    use libc::{MCL_CURRENT, MCL_FUTURE};

    pub(super) fn lock_memory(lock: RtLock) -> eyre::Result<()> {
        let flags = match lock {
            RtLock::None => return Ok(()),
            RtLock::Current => MCL_CURRENT,
            RtLock::All => MCL_CURRENT | MCL_FUTURE,
        };
        mlockall_flags(flags).map_err(|e| eyre::eyre!(e))
    }

    pub(super) fn apply_scheduling(_prio: Option<i32>, _cpu: Option<usize>) {
        tracing::warn!("SCHED_FIFO and CPU affinity are only supported on Linux; only mlockall applied");
    }
}

#[cfg(not(unix))]
mod imp {
    use super::RtLock;

    pub(super) fn lock_memory(lock: RtLock) -> eyre::Result<()> {
        match lock {
            RtLock::None => Ok(()),
            _ => eyre::bail!("memory locking is not supported on this platform"),
        }
    }

    pub(super) fn apply_scheduling(_prio: Option<i32>, _cpu: Option<usize>) {
        tracing::warn!("real-time scheduling is not supported on this platform");
    }
}
