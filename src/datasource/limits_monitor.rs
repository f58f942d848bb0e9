use std::{collections::HashMap, sync::Arc, sync::Mutex, thread, time::Duration};

use anyhow::Result;
use log::{debug, info, warn};

use crate::{
    model::{
        driver::FrequencyDriver,
        governor::{Governor, GovernorEvent},
        lock,
    },
    utils::constants::threads::LIMITS_MONITOR,
};

/// 轮询各核心的 min/max，变化时向调速器发送 Limits 事件
pub struct LimitsWatcher {
    governor: Arc<Governor>,
    driver: Arc<dyn FrequencyDriver>,
    cores: Vec<usize>,
    interval: Duration,
    last: Mutex<HashMap<usize, (u32, u32)>>,
}

impl LimitsWatcher {
    pub fn new(
        governor: Arc<Governor>,
        driver: Arc<dyn FrequencyDriver>,
        cores: Vec<usize>,
        interval: Duration,
    ) -> Self {
        Self {
            governor,
            driver,
            cores,
            interval,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// 轮询一次，返回上下限发生变化的核心；首次轮询只记录基线
    pub fn poll_once(&self) -> Vec<usize> {
        let mut last = lock(&self.last);
        let mut changed = Vec::new();
        for &core in &self.cores {
            let limits = match self.driver.policy(core) {
                Ok(policy) => (policy.min, policy.max),
                Err(e) => {
                    debug!("cpu{core}: limits poll failed: {e}");
                    continue;
                }
            };
            match last.insert(core, limits) {
                Some(previous) if previous != limits => {
                    info!("cpu{core}: limits {previous:?} -> {limits:?}");
                    if let Err(e) = self.governor.handle_event(core, GovernorEvent::Limits) {
                        warn!("{e:#}");
                    }
                    changed.push(core);
                }
                _ => {}
            }
        }
        changed
    }

    pub fn run(&self) -> Result<()> {
        info!("{LIMITS_MONITOR} Start");
        loop {
            self.poll_once();
            thread::sleep(self.interval);
        }
    }
}
