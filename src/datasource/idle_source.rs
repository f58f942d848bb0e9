use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    datasource::file_path::PROC_STAT,
    model::idle::{IdleSample, IdleTimeSource},
    utils::file_operate::read_file,
};

static CPU_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^cpu(\d+)\s+(\d+)\s+(\d+)\s+(\d+)\s+(\d+)").unwrap()
});

/// 当前单调时钟（微秒），保证不为 0
pub fn monotonic_us() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts 是有效的可写 timespec
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    let us = (ts.tv_sec as u64)
        .saturating_mul(1_000_000)
        .saturating_add(ts.tv_nsec as u64 / 1_000);
    us.max(1)
}

fn clock_ticks_per_sec() -> u64 {
    // SAFETY: sysconf 没有内存安全前提
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 { ticks as u64 } else { 100 }
}

/// 从 /proc/stat 内容中取出指定核心的 idle 列（单位 jiffies）
pub fn parse_idle_ticks(content: &str, core: usize) -> Option<u64> {
    CPU_LINE.captures_iter(content).find_map(|caps| {
        let id: usize = caps.get(1)?.as_str().parse().ok()?;
        if id != core {
            return None;
        }
        caps.get(5)?.as_str().parse().ok()
    })
}

/// 基于 /proc/stat 的空闲时间来源
pub struct ProcStatIdleSource {
    path: PathBuf,
    us_per_tick: u64,
}

impl ProcStatIdleSource {
    pub fn new() -> Self {
        Self::with_path(PROC_STAT)
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            us_per_tick: 1_000_000 / clock_ticks_per_sec().max(1),
        }
    }
}

impl Default for ProcStatIdleSource {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleTimeSource for ProcStatIdleSource {
    fn sample(&self, core: usize) -> Result<IdleSample> {
        let content = read_file(&self.path)?;
        let ticks = parse_idle_ticks(&content, core)
            .ok_or_else(|| anyhow!("cpu{core} not found in {}", self.path.display()))
            .with_context(|| "Failed to sample idle time")?;
        Ok(IdleSample {
            idle_us: ticks.saturating_mul(self.us_per_tick),
            timestamp_us: monotonic_us(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "\
cpu  4705 356 584 3699 23 23 0 0 0 0
cpu0 1393 280 290 1000 14 3 0 0 0 0
cpu1 1335 11 123 2699 9 20 0 0 0 0
intr 114930548 113199788 3 0 5 263 0 4 [... lots more numbers ...]
ctxt 1990473
";

    #[test]
    fn picks_idle_column_for_core() {
        assert_eq!(parse_idle_ticks(STAT, 0), Some(1000));
        assert_eq!(parse_idle_ticks(STAT, 1), Some(2699));
    }

    #[test]
    fn aggregate_line_and_missing_core_are_ignored() {
        assert_eq!(parse_idle_ticks(STAT, 2), None);
        assert_eq!(parse_idle_ticks("cpu  1 2 3 4 5\n", 0), None);
    }

    #[test]
    fn monotonic_clock_advances() {
        let a = monotonic_us();
        let b = monotonic_us();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn unreadable_stat_file_is_an_error() {
        let source = ProcStatIdleSource::with_path("/nonexistent/cpugovernor/stat");
        assert!(source.sample(0).is_err());
    }
}
