#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Result, anyhow};
use cpugovernor::model::{
    driver::{CpuPolicy, FrequencyDriver, Relation},
    governor::{Governor, GovernorParts},
    idle::{IdleHook, IdleHookHost, IdleSample, IdleTimeSource},
    power_state::PowerState,
    tunables::Tunables,
};

pub const MIN: u32 = 200_000;
pub const MAX: u32 = 1_600_000;
pub const BOOT_TIME_US: u64 = 1_000_000;

/// 200MHz..1600MHz，步长 200MHz
pub fn table() -> Vec<u32> {
    (1..=8).map(|i| i * 200_000).collect()
}

pub struct FakeDriver {
    policies: Mutex<Vec<CpuPolicy>>,
    pub calls: Mutex<Vec<(usize, u32, Relation)>>,
    pub acquired: Mutex<Vec<usize>>,
    pub released: Mutex<Vec<usize>>,
    pub fail_set: AtomicBool,
    /// 每次调频的模拟耗时（毫秒）
    pub set_delay_ms: AtomicU64,
}

impl FakeDriver {
    pub fn new(cores: usize, cur: u32) -> Self {
        Self {
            policies: Mutex::new(vec![CpuPolicy::new(MIN, MAX, cur, table()); cores]),
            calls: Mutex::new(Vec::new()),
            acquired: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            fail_set: AtomicBool::new(false),
            set_delay_ms: AtomicU64::new(0),
        }
    }

    pub fn cur(&self, core: usize) -> u32 {
        self.policies.lock().unwrap()[core].cur
    }

    pub fn set_cur(&self, core: usize, cur: u32) {
        self.policies.lock().unwrap()[core].cur = cur;
    }

    pub fn set_limits(&self, core: usize, min: u32, max: u32) {
        let mut policies = self.policies.lock().unwrap();
        policies[core].min = min;
        policies[core].max = max;
    }

    pub fn calls(&self) -> Vec<(usize, u32, Relation)> {
        self.calls.lock().unwrap().clone()
    }
}

impl FrequencyDriver for FakeDriver {
    fn policy(&self, core: usize) -> Result<CpuPolicy> {
        self.policies
            .lock()
            .unwrap()
            .get(core)
            .cloned()
            .ok_or_else(|| anyhow!("no cpu{core}"))
    }

    fn set_target(&self, core: usize, freq: u32, relation: Relation) -> Result<u32> {
        self.calls.lock().unwrap().push((core, freq, relation));
        let delay = self.set_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        if self.fail_set.load(Ordering::SeqCst) {
            return Err(anyhow!("set_target rejected"));
        }
        let mut policies = self.policies.lock().unwrap();
        let policy = &mut policies[core];
        let idx = policy.resolve(freq, relation).ok_or_else(|| anyhow!("empty table"))?;
        policy.cur = policy.freq_at(idx);
        Ok(policy.cur)
    }

    fn acquire(&self, core: usize) -> Result<()> {
        self.acquired.lock().unwrap().push(core);
        Ok(())
    }

    fn release(&self, core: usize) -> Result<()> {
        self.released.lock().unwrap().push(core);
        Ok(())
    }
}

/// 时间戳即测试时钟，只有显式推进才会前进
pub struct FakeIdleSource {
    samples: Mutex<Vec<IdleSample>>,
    pub fail: AtomicBool,
}

impl FakeIdleSource {
    pub fn new(cores: usize) -> Self {
        let boot = IdleSample {
            idle_us: 0,
            timestamp_us: BOOT_TIME_US,
        };
        Self {
            samples: Mutex::new(vec![boot; cores]),
            fail: AtomicBool::new(false),
        }
    }

    /// 推进 `elapsed_us`，其中 `idle_us` 为空闲时间
    pub fn advance(&self, core: usize, elapsed_us: u64, idle_us: u64) {
        let mut samples = self.samples.lock().unwrap();
        samples[core].timestamp_us += elapsed_us;
        samples[core].idle_us += idle_us;
    }

    pub fn now(&self, core: usize) -> IdleSample {
        self.samples.lock().unwrap()[core]
    }
}

impl IdleTimeSource for FakeIdleSource {
    fn sample(&self, core: usize) -> Result<IdleSample> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("idle counters unavailable"));
        }
        self.samples
            .lock()
            .unwrap()
            .get(core)
            .copied()
            .ok_or_else(|| anyhow!("no cpu{core}"))
    }
}

#[derive(Default)]
pub struct RecordingHost {
    hook: Mutex<Option<Weak<dyn IdleHook>>>,
    pub installs: AtomicUsize,
    pub removals: AtomicUsize,
}

impl RecordingHost {
    pub fn hook(&self) -> Option<Arc<dyn IdleHook>> {
        self.hook.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }
}

impl IdleHookHost for RecordingHost {
    fn install(&self, hook: Weak<dyn IdleHook>) {
        self.installs.fetch_add(1, Ordering::SeqCst);
        *self.hook.lock().unwrap() = Some(hook);
    }

    fn remove(&self) {
        self.removals.fetch_add(1, Ordering::SeqCst);
        *self.hook.lock().unwrap() = None;
    }
}

pub struct Harness {
    pub governor: Arc<Governor>,
    pub driver: Arc<FakeDriver>,
    pub idle: Arc<FakeIdleSource>,
    pub host: Arc<RecordingHost>,
    pub tunables: Arc<Tunables>,
}

impl Harness {
    pub fn new(cores: usize, cur: u32) -> Self {
        let driver = Arc::new(FakeDriver::new(cores, cur));
        let idle = Arc::new(FakeIdleSource::new(cores));
        let host = Arc::new(RecordingHost::default());
        let tunables = Arc::new(Tunables::new());
        let governor = Governor::new(
            cores,
            GovernorParts {
                driver: driver.clone(),
                idle_source: idle.clone(),
                host: host.clone(),
                tunables: tunables.clone(),
                power: Arc::new(PowerState::new()),
            },
            Duration::from_millis(20),
        );
        Self {
            governor,
            driver,
            idle,
            host,
            tunables,
        }
    }

    /// 推进时钟后立即触发一次采样
    pub fn tick(&self, core: usize, elapsed_us: u64, idle_us: u64) {
        self.idle.advance(core, elapsed_us, idle_us);
        self.governor.fire_timer(core);
    }

    pub fn target(&self, core: usize) -> u32 {
        self.governor.core_state(core).map(|s| s.target_freq).unwrap_or(0)
    }
}
