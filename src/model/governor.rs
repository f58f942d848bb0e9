use std::{
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};

use crate::model::{
    core_state::CoreState,
    dispatcher::{DispatchStats, StatsCounters},
    driver::{CpuPolicy, FrequencyDriver, Relation},
    idle::{IdleHook, IdleHookHost, IdleSample, IdleTimeSource},
    lock,
    pending::PendingSet,
    power_state::{PowerEvent, PowerState},
    timer::TimerService,
    tunables::{DebugFlags, Tunables},
};

/// 两个 100Hz 调度节拍
pub const DEFAULT_REARM_INTERVAL: Duration = Duration::from_millis(20);

/// 调频框架下发给调速器的生命周期事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernorEvent {
    Start,
    Stop,
    Limits,
}

/// 构造调速器所需的外部协作者
pub struct GovernorParts {
    pub driver: Arc<dyn FrequencyDriver>,
    pub idle_source: Arc<dyn IdleTimeSource>,
    pub host: Arc<dyn IdleHookHost>,
    pub tunables: Arc<Tunables>,
    pub power: Arc<PowerState>,
}

/// 调速器上下文：每核心状态、两条派发队列、定时器与全局参数
pub struct Governor {
    pub(crate) cores: Vec<Mutex<CoreState>>,
    pub(crate) driver: Arc<dyn FrequencyDriver>,
    pub(crate) idle_source: Arc<dyn IdleTimeSource>,
    host: Arc<dyn IdleHookHost>,
    pub(crate) tunables: Arc<Tunables>,
    pub(crate) power: Arc<PowerState>,
    pub(crate) timers: TimerService,
    pub(crate) up_pending: PendingSet,
    pub(crate) down_pending: PendingSet,
    active_count: AtomicUsize,
    pub(crate) stats: StatsCounters,
    pub(crate) rearm_interval: Duration,
}

impl Governor {
    pub fn new(cores: usize, parts: GovernorParts, rearm_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            cores: (0..cores).map(|_| Mutex::new(CoreState::default())).collect(),
            driver: parts.driver,
            idle_source: parts.idle_source,
            host: parts.host,
            tunables: parts.tunables,
            power: parts.power,
            timers: TimerService::new(cores),
            up_pending: PendingSet::new("up"),
            down_pending: PendingSet::new("down"),
            active_count: AtomicUsize::new(0),
            stats: StatsCounters::default(),
            rearm_interval,
        })
    }

    pub fn num_cores(&self) -> usize {
        self.cores.len()
    }

    pub fn tunables(&self) -> &Arc<Tunables> {
        &self.tunables
    }

    pub fn power(&self) -> &Arc<PowerState> {
        &self.power
    }

    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }

    pub fn core_state(&self, core: usize) -> Option<CoreState> {
        self.cores.get(core).map(|slot| lock(slot).clone())
    }

    pub fn timer_pending(&self, core: usize) -> bool {
        self.timers.pending(core)
    }

    pub fn armed_timers(&self) -> usize {
        self.timers.armed_count()
    }

    pub fn escalation_pending(&self, core: usize) -> bool {
        self.up_pending.contains(core)
    }

    pub fn deescalation_pending(&self, core: usize) -> bool {
        self.down_pending.contains(core)
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats.snapshot()
    }

    pub fn handle_event(self: &Arc<Self>, core: usize, event: GovernorEvent) -> Result<()> {
        match event {
            GovernorEvent::Start => self.start_core(core),
            GovernorEvent::Stop => self.stop_core(core),
            GovernorEvent::Limits => self.limits_changed(core),
        }
    }

    /// 接管核心；第一个被接管的核心负责挂载空闲回调
    pub fn start_core(self: &Arc<Self>, core: usize) -> Result<()> {
        if self.tunables.debug_enabled(DebugFlags::START_STOP) {
            info!("GOV_START cpu{core}");
        }
        let slot = self
            .cores
            .get(core)
            .ok_or_else(|| anyhow!("cpu{core} is not online"))?;
        {
            let mut pcpu = lock(slot);
            if pcpu.enabled || pcpu.starting {
                debug!("cpu{core} already governed");
                return Ok(());
            }
            // 占住核心，防止并发启动重复接管
            pcpu.starting = true;
        }

        let (policy, sample) = match self.prepare_core(core) {
            Ok(prepared) => prepared,
            Err(e) => {
                lock(slot).starting = false;
                return Err(e);
            }
        };

        {
            let mut pcpu = lock(slot);
            *pcpu = CoreState {
                target_freq: policy.cur,
                policy,
                enabled: true,
                ..CoreState::default()
            };
            pcpu.anchor_change(sample);
            pcpu.open_window(sample);
            self.timers.mod_timer(core, self.rearm_interval);
        }

        if self.active_count.fetch_add(1, Ordering::SeqCst) == 0 {
            let weak: Weak<Governor> = Arc::downgrade(self);
            let hook: Weak<dyn IdleHook> = weak;
            self.host.install(hook);
            info!("Idle hook installed");
        }
        Ok(())
    }

    /// 读取策略与空闲基线后接管选频权；接管是最后一步，之前失败无需归还
    fn prepare_core(&self, core: usize) -> Result<(CpuPolicy, IdleSample)> {
        let policy = self
            .driver
            .policy(core)
            .with_context(|| format!("Failed to read policy of cpu{core}"))?;
        if !policy.contains(policy.cur) {
            warn!("cpu{core} current freq {}KHz is not in the frequency table", policy.cur);
        }
        let sample = self
            .idle_source
            .sample(core)
            .with_context(|| format!("Failed to sample idle time of cpu{core}"))?;
        self.driver
            .acquire(core)
            .with_context(|| format!("Failed to acquire frequency control of cpu{core}"))?;
        Ok((policy, sample))
    }

    /// 释放核心；最后一个核心释放时卸载空闲回调
    pub fn stop_core(&self, core: usize) -> Result<()> {
        if self.tunables.debug_enabled(DebugFlags::START_STOP) {
            info!("GOV_STOP cpu{core}");
        }
        let slot = self
            .cores
            .get(core)
            .ok_or_else(|| anyhow!("cpu{core} is not online"))?;

        {
            let mut pcpu = lock(slot);
            if !pcpu.enabled {
                return Ok(());
            }
            pcpu.enabled = false;
            pcpu.idling = false;
            pcpu.timer_idle_cancel = false;
            pcpu.clear_transient();
        }
        self.timers.del_timer(core);
        self.up_pending.remove(core);
        self.down_pending.remove(core);

        let released = self.driver.release(core);
        if self.active_count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.host.remove();
            info!("Idle hook removed");
        }
        released.with_context(|| format!("Failed to release frequency control of cpu{core}"))
    }

    pub fn stop_all(&self) {
        for core in 0..self.cores.len() {
            if let Err(e) = self.stop_core(core) {
                warn!("{e:#}");
            }
        }
    }

    /// 策略上下限变化后立即把越界的当前频率拉回窗口内
    pub fn limits_changed(&self, core: usize) -> Result<()> {
        let slot = self
            .cores
            .get(core)
            .ok_or_else(|| anyhow!("cpu{core} is not online"))?;
        if !lock(slot).enabled {
            debug!("cpu{core}: not governed, ignoring limits change");
            return Ok(());
        }
        let policy = self
            .driver
            .policy(core)
            .with_context(|| format!("Failed to read policy of cpu{core}"))?;

        let correction = if policy.max < policy.cur {
            Some((policy.max, Relation::AtMost))
        } else if policy.min > policy.cur {
            Some((policy.min, Relation::AtLeast))
        } else {
            None
        };

        let applied = match correction {
            Some((freq, relation)) => {
                debug!("cpu{core}: cur {}KHz outside [{}, {}], forcing {freq}KHz",
                       policy.cur, policy.min, policy.max);
                Some(self.driver.set_target(core, freq, relation)
                    .with_context(|| format!("Failed to enforce limits on cpu{core}"))?)
            }
            None => None,
        };

        let mut pcpu = lock(slot);
        if !pcpu.enabled {
            return Ok(());
        }
        if let Some(freq) = applied {
            pcpu.target_freq = freq;
            match self.idle_source.sample(core) {
                Ok(sample) => pcpu.anchor_change(sample),
                Err(e) => debug!("cpu{core}: idle sample failed: {e}"),
            }
        } else if pcpu.target_freq > policy.max || pcpu.target_freq < policy.min {
            let relation = if pcpu.target_freq > policy.max { Relation::AtMost } else { Relation::AtLeast };
            if let Some(idx) = policy.resolve(pcpu.target_freq, relation) {
                pcpu.target_freq = policy.freq_at(idx);
            }
        }
        pcpu.policy = policy;
        Ok(())
    }

    pub fn power_event(&self, event: PowerEvent) {
        self.power.handle(event, &self.tunables);
    }

    /// 以当前空闲采样开启新窗口；采样失败时保留旧窗口
    pub(crate) fn snapshot(&self, core: usize, pcpu: &mut CoreState) {
        match self.idle_source.sample(core) {
            Ok(sample) => pcpu.open_window(sample),
            Err(e) => debug!("cpu{core}: idle sample failed: {e}"),
        }
    }

    pub(crate) fn arm(&self, core: usize) {
        self.timers.mod_timer(core, self.rearm_interval);
    }
}

impl IdleHook for Governor {
    fn idle_enter(&self, core: usize) {
        let Some(slot) = self.cores.get(core) else {
            return;
        };
        let mut pcpu = lock(slot);
        if !pcpu.enabled {
            return;
        }

        pcpu.idling = true;
        let pending = self.timers.pending(core);

        if pcpu.target_freq != pcpu.policy.min {
            // 高于最低频进入空闲时仍需定时复查，避免拖住共享时钟的兄弟核心
            if !pending {
                self.snapshot(core, &mut pcpu);
                pcpu.timer_idle_cancel = false;
                self.arm(core);
                debug!("idle: enter cpu{core} at {}, set timer exit={}",
                       pcpu.target_freq, pcpu.idle_exit_time);
            }
        } else if pending && pcpu.timer_idle_cancel {
            debug!("idle: cancel timer of cpu{core}");
            self.timers.del_timer(core);
            pcpu.idle_exit_time = 0;
            pcpu.timer_idle_cancel = false;
        }
    }

    fn idle_exit(&self, core: usize) {
        let Some(slot) = self.cores.get(core) else {
            return;
        };
        let mut pcpu = lock(slot);
        if !pcpu.enabled {
            return;
        }

        pcpu.idling = false;
        if self.timers.pending(core) {
            return;
        }
        if pcpu.sample_consumed() {
            self.snapshot(core, &mut pcpu);
            pcpu.timer_idle_cancel = false;
            self.arm(core);
            debug!("idle: exit cpu{core}, set timer exit={}", pcpu.idle_exit_time);
        } else {
            // 采样器尚未消费上一窗口，由它自行重新计时
            debug!("idle: cpu{core} timer not run yet: exit={} tmrrun={}",
                   pcpu.idle_exit_time, pcpu.timer_run_time);
        }
    }
}
