use log::{debug, info};

use crate::model::{
    core_state::CoreState,
    driver::{CpuPolicy, Relation},
    governor::Governor,
    idle::IdleSample,
    lock,
    tunables::{DebugFlags, Tunables},
};

/// 短于该时长（微秒）的采样窗口不可信
pub const MIN_SAMPLE_WINDOW_US: u64 = 1_000;

/// 重新计时时是否开启新的采样窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    Renew,
    Keep,
}

/// 窗口内负载百分比，空闲超过经过时间时为 0
pub fn window_load(delta_time: u64, delta_idle: u64) -> u32 {
    if delta_time == 0 || delta_idle > delta_time {
        return 0;
    }
    (100 * (delta_time - delta_idle) / delta_time) as u32
}

/// 取短期负载与自上次调频以来负载中的较大者
pub fn cpu_load(pcpu: &CoreState, now: IdleSample, time_in_idle: u64, idle_exit_time: u64) -> u32 {
    let short_term = window_load(
        now.timestamp_us.saturating_sub(idle_exit_time),
        now.idle_us.saturating_sub(time_in_idle),
    );
    let since_change = window_load(
        now.timestamp_us.saturating_sub(pcpu.freq_change_time),
        now.idle_us.saturating_sub(pcpu.freq_change_time_in_idle),
    );
    short_term.max(since_change)
}

/// 根据负载决定新频率；频率表无法解析时返回 `None`
pub fn decide_new_freq(
    policy: &CpuPolicy,
    cpu_load: u32,
    early_suspended: bool,
    stuck_on_sampling: bool,
    tunables: &Tunables,
) -> Option<u32> {
    if early_suspended {
        return Some(policy.min);
    }

    if cpu_load >= tunables.inc_cpu_load() {
        // 非 0 时只作为开关：每次只升一格
        if tunables.ramp_up_step() != 0 && policy.cur < policy.max {
            let idx = policy.resolve(policy.cur, Relation::AtMost)?;
            return Some(policy.freq_at(policy.step(idx, 1)?));
        }
        return Some(policy.max);
    }

    // 升频被停留时间挡住后，下一次采样保持不动
    if stuck_on_sampling {
        return Some(policy.cur);
    }

    if tunables.ramp_down_step() != 0 {
        let idx = policy.resolve(policy.cur, Relation::AtMost)?;
        let lower = policy.step(idx, -1)?;
        return Some(if policy.cur > policy.min {
            policy.freq_at(lower)
        } else {
            policy.min
        });
    }

    let proportional = u64::from(policy.max) * u64::from(cpu_load) / 100;
    let idx = policy.resolve(proportional as u32, Relation::AtLeast)?;
    Some(policy.freq_at(idx))
}

impl Governor {
    /// 定时器服务在清除挂起状态后调用
    pub fn on_timer(&self, core: usize) {
        let Some(slot) = self.cores.get(core) else {
            return;
        };
        let mut pcpu = lock(slot);
        if !pcpu.enabled {
            debug!("timer {core}: governor disabled, ignoring late timer");
            return;
        }

        let time_in_idle = pcpu.time_in_idle;
        let idle_exit_time = pcpu.idle_exit_time;
        let now = match self.idle_source.sample(core) {
            Ok(sample) => sample,
            Err(e) => {
                debug!("timer {core}: idle sample failed: {e}");
                self.rearm(core, &mut pcpu, Window::Renew);
                return;
            }
        };
        pcpu.timer_run_time = now.timestamp_us;

        // 与空闲取消定时器发生竞争
        if idle_exit_time == 0 {
            debug!("timer {core}: no valid idle exit sample");
            return;
        }

        let delta_time = now.timestamp_us.saturating_sub(idle_exit_time);
        if delta_time < MIN_SAMPLE_WINDOW_US {
            debug!("timer {core}: time delta {delta_time} too short exit={idle_exit_time} now={}",
                   now.timestamp_us);
            self.rearm(core, &mut pcpu, Window::Renew);
            return;
        }

        let load = cpu_load(&pcpu, now, time_in_idle, idle_exit_time);

        let policy = match self.driver.policy(core) {
            Ok(policy) => policy,
            Err(e) => {
                debug!("timer {core}: policy read failed: {e}");
                self.rearm(core, &mut pcpu, Window::Renew);
                return;
            }
        };
        pcpu.policy = policy;

        let early_suspended = self.power.is_early_suspended();
        if early_suspended {
            pcpu.target_freq = pcpu.policy.cur;
        }

        let Some(new_freq) = decide_new_freq(
            &pcpu.policy,
            load,
            early_suspended,
            pcpu.stuck_on_sampling,
            &self.tunables,
        ) else {
            debug!("timer {core}: no legal frequency for load={load}");
            self.rearm(core, &mut pcpu, Window::Renew);
            return;
        };

        if new_freq == pcpu.target_freq {
            if let Some(captured) = pcpu.cpu_load_captured {
                debug!("timer {core}: load={load} (deferred at {captured}), holding {new_freq}");
            } else {
                debug!("timer {core}: load={load}, already at {new_freq}");
            }
            pcpu.clear_transient();
            self.rearm_if_not_max(core, &mut pcpu);
            return;
        }

        let dwell = now.timestamp_us.saturating_sub(pcpu.freq_change_time);
        if new_freq < pcpu.target_freq {
            if dwell < self.tunables.down_sample_time() {
                debug!("timer {core}: load={load} cur={} tgt={new_freq} not yet", pcpu.target_freq);
                self.stats.record_deferral();
                self.rearm(core, &mut pcpu, Window::Renew);
                return;
            }
        } else if dwell < self.tunables.up_sample_time() {
            debug!("timer {core}: load={load} cur={} tgt={new_freq} not yet", pcpu.target_freq);
            pcpu.stuck_on_sampling = true;
            pcpu.cpu_load_captured = Some(load);
            self.stats.record_deferral();
            self.rearm(core, &mut pcpu, Window::Keep);
            return;
        }

        self.log_commit(core, load, new_freq, &pcpu);
        pcpu.clear_transient();

        let decreasing = new_freq < pcpu.target_freq;
        pcpu.target_freq = new_freq;
        if decreasing {
            self.up_pending.remove(core);
            self.down_pending.insert(core);
        } else {
            self.down_pending.remove(core);
            self.up_pending.insert(core);
        }

        self.rearm_if_not_max(core, &mut pcpu);
    }

    /// 手动触发一次定时器（宿主自行驱动定时器时使用）
    pub fn fire_timer(&self, core: usize) {
        self.timers.del_timer(core);
        self.on_timer(core);
    }

    /// 取消定时器而不运行采样，返回取消前是否挂起
    pub fn cancel_timer(&self, core: usize) -> bool {
        self.timers.del_timer(core)
    }

    fn rearm_if_not_max(&self, core: usize, pcpu: &mut CoreState) {
        // 已在最高频，等下一次空闲退出再评估
        if pcpu.target_freq == pcpu.policy.max {
            return;
        }
        self.rearm(core, pcpu, Window::Renew);
    }

    fn rearm(&self, core: usize, pcpu: &mut CoreState, window: Window) {
        if self.timers.pending(core) {
            return;
        }

        if pcpu.target_freq == pcpu.policy.min {
            if pcpu.idling {
                debug!("timer {core}: cpu idle, don't re-arm");
                return;
            }
            pcpu.timer_idle_cancel = true;
        }

        if window == Window::Renew {
            self.snapshot(core, pcpu);
        }
        self.arm(core);
        debug!("timer {core}: set timer exit={}", pcpu.idle_exit_time);
    }

    fn log_commit(&self, core: usize, load: u32, new_freq: u32, pcpu: &CoreState) {
        let suspending = self.power.is_suspending();
        let early_suspended = self.power.is_early_suspended();
        let cur = pcpu.policy.cur;

        if suspending && self.tunables.debug_enabled(DebugFlags::SUSPEND) {
            info!("suspending: cpu{core} cpu_load={load}% new_freq={new_freq} cur={cur}");
        }
        if early_suspended && !suspending && self.tunables.debug_enabled(DebugFlags::EARLY_SUSPEND) {
            info!("early_suspended: cpu{core} cpu_load={load}% new_freq={new_freq} cur={cur}");
            info!("lock @{}MHz!", new_freq / 1000);
        }
        if !early_suspended && !suspending && self.tunables.debug_enabled(DebugFlags::LOAD) {
            info!("cpu{core} cpu_load={load}% new_freq={new_freq} target_freq={} cur={cur}",
                  pcpu.target_freq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(cur: u32) -> CpuPolicy {
        CpuPolicy::new(
            200_000,
            1_600_000,
            cur,
            (1..=8).map(|i| i * 200_000).collect(),
        )
    }

    #[test]
    fn window_load_is_bounded() {
        assert_eq!(window_load(0, 0), 0);
        assert_eq!(window_load(10_000, 20_000), 0);
        assert_eq!(window_load(10_000, 0), 100);
        assert_eq!(window_load(10_000, 2_500), 75);
    }

    #[test]
    fn load_takes_larger_window() {
        let pcpu = CoreState {
            freq_change_time: 0,
            freq_change_time_in_idle: 0,
            ..CoreState::default()
        };
        // 短期窗口 90%，自调频以来 (100000-50000)/100000 = 50%
        let now = IdleSample { idle_us: 50_000, timestamp_us: 100_000 };
        assert_eq!(cpu_load(&pcpu, now, 49_000, 90_000), 90);
        // 短期窗口全空闲时取长期负载
        assert_eq!(cpu_load(&pcpu, now, 40_000, 90_000), 50);
    }

    #[test]
    fn escalation_steps_or_jumps() {
        let t = Tunables::new();
        let p = policy(1_000_000);
        assert_eq!(decide_new_freq(&p, 75, false, false, &t), Some(1_200_000));
        t.set_ramp_up_step(0);
        assert_eq!(decide_new_freq(&p, 75, false, false, &t), Some(1_600_000));
        // 任何非 0 步长都只升一格
        t.set_ramp_up_step(3);
        assert_eq!(decide_new_freq(&p, 75, false, false, &t), Some(1_200_000));
    }

    #[test]
    fn deescalation_steps_or_scales() {
        let t = Tunables::new();
        assert_eq!(decide_new_freq(&policy(1_400_000), 20, false, false, &t), Some(1_200_000));
        assert_eq!(decide_new_freq(&policy(200_000), 20, false, false, &t), Some(200_000));
        t.set_ramp_down_step(4);
        assert_eq!(decide_new_freq(&policy(1_400_000), 20, false, false, &t), Some(1_200_000));
        t.set_ramp_down_step(0);
        assert_eq!(decide_new_freq(&policy(1_400_000), 20, false, false, &t), Some(400_000));
        assert_eq!(decide_new_freq(&policy(1_400_000), 0, false, false, &t), Some(200_000));
    }

    #[test]
    fn stuck_holds_and_early_suspend_forces_min() {
        let t = Tunables::new();
        let p = policy(800_000);
        assert_eq!(decide_new_freq(&p, 10, false, true, &t), Some(800_000));
        assert_eq!(decide_new_freq(&p, 10, true, true, &t), Some(200_000));
        assert_eq!(decide_new_freq(&p, 100, true, false, &t), Some(200_000));
    }
}
