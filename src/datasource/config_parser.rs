use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Deserialize;

use crate::{
    model::{
        governor::DEFAULT_REARM_INTERVAL,
        tunables::{DebugFlags, Tunables},
    },
    utils::{constants::host::IDLE_POLL_MS, file_operate::read_file},
};

/// tunables.toml 的内容
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub tunables: TunablesConfig,
    pub governor: RuntimeConfig,
}

/// 未填写的字段保持当前值
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TunablesConfig {
    pub up_sample_time: Option<u64>,
    pub down_sample_time: Option<u64>,
    pub inc_cpu_load: Option<u32>,
    pub dec_cpu_load: Option<u32>,
    pub ramp_up_step: Option<u32>,
    pub ramp_down_step: Option<u32>,
    pub debug_mode: Option<u32>,
    pub suspending_min_freq: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub rearm_interval_ms: u64,
    pub idle_poll_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            rearm_interval_ms: DEFAULT_REARM_INTERVAL.as_millis() as u64,
            idle_poll_ms: IDLE_POLL_MS,
        }
    }
}

impl RuntimeConfig {
    pub fn rearm_interval(&self) -> Duration {
        Duration::from_millis(self.rearm_interval_ms.max(1))
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }
}

impl GovernorConfig {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse governor config")
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<GovernorConfig> {
    let path = path.as_ref();
    let content = read_file(path)?;
    GovernorConfig::parse(&content).with_context(|| format!("Invalid config: {}", path.display()))
}

impl TunablesConfig {
    /// 写入 tunables；负载阈值超出范围时返回错误，其余字段仍会生效
    pub fn apply(&self, tunables: &Tunables) -> Result<()> {
        if let Some(us) = self.up_sample_time {
            tunables.set_up_sample_time(us);
        }
        if let Some(us) = self.down_sample_time {
            tunables.set_down_sample_time(us);
        }
        if let Some(step) = self.ramp_up_step {
            tunables.set_ramp_up_step(step);
        }
        if let Some(step) = self.ramp_down_step {
            tunables.set_ramp_down_step(step);
        }
        if let Some(bits) = self.debug_mode {
            let flags = DebugFlags::from_bits_truncate(bits);
            if flags.bits() != bits {
                warn!("Unknown debug_mode bits ignored: {:#x}", bits & !DebugFlags::all().bits());
            }
            tunables.set_debug_mode(flags);
        }
        if let Some(freq) = self.suspending_min_freq {
            tunables.set_suspending_min_freq(freq);
        }

        let mut result = Ok(());
        if let Some(load) = self.inc_cpu_load
            && let Err(e) = tunables.set_inc_cpu_load(load)
        {
            result = Err(e);
        }
        if let Some(load) = self.dec_cpu_load
            && let Err(e) = tunables.set_dec_cpu_load(load)
        {
            result = Err(e);
        }
        result
    }
}

/// 读取配置文件并应用到 tunables，返回运行参数
pub fn reload_tunables<P: AsRef<Path>>(path: P, tunables: &Tunables) -> Result<RuntimeConfig> {
    let config = load_config(path)?;
    config.tunables.apply(tunables)?;
    info!("Tunables reloaded");
    tunables.log_summary();
    Ok(config.governor)
}
