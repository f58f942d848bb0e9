use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use log::{debug, info, warn};

use crate::model::{driver::Relation, governor::Governor, lock, pending::Batch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// 派发统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub escalations: u64,
    pub deescalations: u64,
    pub driver_failures: u64,
    pub deferrals: u64,
    /// 升频请求从入队到执行的最大延迟（微秒）
    pub max_up_latency_us: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    escalations: AtomicU64,
    deescalations: AtomicU64,
    driver_failures: AtomicU64,
    deferrals: AtomicU64,
    max_up_latency_us: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_deferral(&self) {
        self.deferrals.fetch_add(1, Ordering::Relaxed);
    }

    fn record_apply(&self, direction: Direction) {
        let counter = match direction {
            Direction::Up => &self.escalations,
            Direction::Down => &self.deescalations,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.driver_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_up_latency(&self, latency_us: u64) {
        self.max_up_latency_us.fetch_max(latency_us, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            escalations: self.escalations.load(Ordering::Relaxed),
            deescalations: self.deescalations.load(Ordering::Relaxed),
            driver_failures: self.driver_failures.load(Ordering::Relaxed),
            deferrals: self.deferrals.load(Ordering::Relaxed),
            max_up_latency_us: self.max_up_latency_us.load(Ordering::Relaxed),
        }
    }
}

impl Governor {
    /// 取出全部待升频核心并立即执行，返回处理的核心数
    pub fn run_escalation_pass(&self) -> usize {
        let batch = self.up_pending.drain();
        self.apply_batch(batch, Direction::Up)
    }

    /// 取出全部待降频核心并执行，返回处理的核心数
    pub fn run_deescalation_pass(&self) -> usize {
        let batch = self.down_pending.drain();
        self.apply_batch(batch, Direction::Down)
    }

    pub(crate) fn apply_batch(&self, batch: Batch, direction: Direction) -> usize {
        for &core in &batch.cores {
            self.apply_target(core, direction);
        }
        // 从最早入队到整批调频完成
        if direction == Direction::Up
            && let Some(queued_at) = batch.queued_at
        {
            self.stats
                .record_up_latency(queued_at.elapsed().as_micros() as u64);
        }
        batch.cores.len()
    }

    fn apply_target(&self, core: usize, direction: Direction) {
        let Some(slot) = self.cores.get(core) else {
            return;
        };
        let target = {
            let pcpu = lock(slot);
            if !pcpu.enabled {
                return;
            }
            pcpu.target_freq
        };

        // 驱动调用期间不持有核心锁
        let result = self.driver.set_target(core, target, Relation::AtLeast);

        let mut pcpu = lock(slot);
        match result {
            Ok(actual) => {
                self.stats.record_apply(direction);
                debug!("{direction} {core}: set tgt={target} (actual={actual})");
            }
            Err(e) => {
                self.stats.record_failure();
                warn!("{direction} {core}: failed to set {target}KHz: {e:#}");
                // 让下一次采样重新决策
                if pcpu.target_freq == target
                    && let Ok(policy) = self.driver.policy(core)
                {
                    pcpu.target_freq = policy.cur;
                }
            }
        }

        match self.idle_source.sample(core) {
            Ok(sample) => pcpu.anchor_change(sample),
            Err(e) => debug!("{direction} {core}: idle sample failed: {e}"),
        }
    }
}

/// 升频线程：以实时优先级运行，集合为空时阻塞
pub(crate) fn escalation_worker(governor: Arc<Governor>) {
    raise_priority();
    info!("Escalation worker started");
    while let Some(batch) = governor.up_pending.wait_drain() {
        governor.apply_batch(batch, Direction::Up);
    }
    info!("Escalation worker stopped ({} set closed)", governor.up_pending.name());
}

/// 降频线程：普通优先级，一次处理自上次运行以来积累的全部请求
pub(crate) fn deescalation_worker(governor: Arc<Governor>) {
    info!("De-escalation worker started");
    while let Some(batch) = governor.down_pending.wait_drain() {
        governor.apply_batch(batch, Direction::Down);
    }
    info!("De-escalation worker stopped ({} set closed)", governor.down_pending.name());
}

fn raise_priority() {
    // sched_param 在部分 libc 上带有额外字段
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    param.sched_priority = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };

    let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if rc != 0 {
        warn!(
            "Failed to set SCHED_FIFO for escalation worker: {} (running at normal priority)",
            std::io::Error::last_os_error()
        );
    } else {
        debug!("Escalation worker running at SCHED_FIFO {}", param.sched_priority);
    }
}
