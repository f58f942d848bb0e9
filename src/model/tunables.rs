use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use anyhow::{Context, Result, anyhow};
use bitflags::bitflags;
use log::{debug, info};

pub const DEFAULT_UP_SAMPLE_TIME: u64 = 24_000;
pub const DEFAULT_DOWN_SAMPLE_TIME: u64 = 49_000;
pub const DEFAULT_INC_CPU_LOAD: u32 = 60;
pub const DEFAULT_DEC_CPU_LOAD: u32 = 30;
pub const DEFAULT_RAMP_UP_STEP: u32 = 1;
pub const DEFAULT_RAMP_DOWN_STEP: u32 = 1;
pub const DEFAULT_SUSPENDING_MIN_FREQ: u32 = 320_000;

bitflags! {
    /// 调试输出开关
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DebugFlags: u32 {
        const EARLY_SUSPEND = 1;
        const START_STOP = 2;
        const LOAD = 4;
        const SUSPEND = 8;
    }
}

pub const DEFAULT_DEBUG_MODE: DebugFlags = DebugFlags::START_STOP.union(DebugFlags::LOAD);

/// 可在运行时调整的参数，全部为原子量，读者容忍采样窗口中途被修改
#[derive(Debug)]
pub struct Tunables {
    /// 升频前在当前频率的最短停留时间（微秒）
    up_sample_time: AtomicU64,
    /// 降频前在当前频率的最短停留时间（微秒）
    down_sample_time: AtomicU64,
    /// 负载达到该百分比时升频
    inc_cpu_load: AtomicU32,
    /// 降频阈值，仅保存与展示
    dec_cpu_load: AtomicU32,
    /// 非 0 时逐格升频，0 表示直接升到最高
    ramp_up_step: AtomicU32,
    /// 非 0 时逐格降频，0 表示按负载比例计算
    ramp_down_step: AtomicU32,
    debug_mode: AtomicU32,
    suspending_min_freq: AtomicU32,
}

/// 参数名称，与 store/show 使用的键一致
pub const TUNABLE_NAMES: [&str; 8] = [
    "up_sample_time",
    "down_sample_time",
    "inc_cpu_load",
    "dec_cpu_load",
    "ramp_up_step",
    "ramp_down_step",
    "debug_mode",
    "suspending_min_freq",
];

impl Tunables {
    pub fn new() -> Self {
        Self {
            up_sample_time: AtomicU64::new(DEFAULT_UP_SAMPLE_TIME),
            down_sample_time: AtomicU64::new(DEFAULT_DOWN_SAMPLE_TIME),
            inc_cpu_load: AtomicU32::new(DEFAULT_INC_CPU_LOAD),
            dec_cpu_load: AtomicU32::new(DEFAULT_DEC_CPU_LOAD),
            ramp_up_step: AtomicU32::new(DEFAULT_RAMP_UP_STEP),
            ramp_down_step: AtomicU32::new(DEFAULT_RAMP_DOWN_STEP),
            debug_mode: AtomicU32::new(DEFAULT_DEBUG_MODE.bits()),
            suspending_min_freq: AtomicU32::new(DEFAULT_SUSPENDING_MIN_FREQ),
        }
    }

    pub fn up_sample_time(&self) -> u64 {
        self.up_sample_time.load(Ordering::Relaxed)
    }

    pub fn down_sample_time(&self) -> u64 {
        self.down_sample_time.load(Ordering::Relaxed)
    }

    pub fn inc_cpu_load(&self) -> u32 {
        self.inc_cpu_load.load(Ordering::Relaxed)
    }

    pub fn dec_cpu_load(&self) -> u32 {
        self.dec_cpu_load.load(Ordering::Relaxed)
    }

    pub fn ramp_up_step(&self) -> u32 {
        self.ramp_up_step.load(Ordering::Relaxed)
    }

    pub fn ramp_down_step(&self) -> u32 {
        self.ramp_down_step.load(Ordering::Relaxed)
    }

    pub fn suspending_min_freq(&self) -> u32 {
        self.suspending_min_freq.load(Ordering::Relaxed)
    }

    pub fn debug_mode(&self) -> DebugFlags {
        DebugFlags::from_bits_truncate(self.debug_mode.load(Ordering::Relaxed))
    }

    pub fn debug_enabled(&self, flag: DebugFlags) -> bool {
        self.debug_mode().contains(flag)
    }

    pub fn set_up_sample_time(&self, us: u64) {
        self.up_sample_time.store(us, Ordering::Relaxed);
        debug!("Set up sample time to: {us}us");
    }

    pub fn set_down_sample_time(&self, us: u64) {
        self.down_sample_time.store(us, Ordering::Relaxed);
        debug!("Set down sample time to: {us}us");
    }

    pub fn set_inc_cpu_load(&self, load: u32) -> Result<()> {
        self.inc_cpu_load.store(check_percent(load)?, Ordering::Relaxed);
        debug!("Set inc cpu load to: {load}%");
        Ok(())
    }

    pub fn set_dec_cpu_load(&self, load: u32) -> Result<()> {
        self.dec_cpu_load.store(check_percent(load)?, Ordering::Relaxed);
        debug!("Set dec cpu load to: {load}%");
        Ok(())
    }

    pub fn set_ramp_up_step(&self, step: u32) {
        self.ramp_up_step.store(step, Ordering::Relaxed);
        debug!("Set ramp up step to: {step}");
    }

    pub fn set_ramp_down_step(&self, step: u32) {
        self.ramp_down_step.store(step, Ordering::Relaxed);
        debug!("Set ramp down step to: {step}");
    }

    pub fn set_debug_mode(&self, flags: DebugFlags) {
        self.debug_mode.store(flags.bits(), Ordering::Relaxed);
        debug!("Set debug mode to: {flags:?}");
    }

    pub fn set_suspending_min_freq(&self, freq: u32) {
        self.suspending_min_freq.store(freq, Ordering::Relaxed);
        debug!("Set suspending min freq to: {freq}KHz");
    }

    /// 按名称读取参数，输出格式与写入格式一致
    pub fn show(&self, name: &str) -> Result<String> {
        let value = match name {
            "up_sample_time" => self.up_sample_time().to_string(),
            "down_sample_time" => self.down_sample_time().to_string(),
            "inc_cpu_load" => self.inc_cpu_load().to_string(),
            "dec_cpu_load" => self.dec_cpu_load().to_string(),
            "ramp_up_step" => self.ramp_up_step().to_string(),
            "ramp_down_step" => self.ramp_down_step().to_string(),
            "debug_mode" => self.debug_mode().bits().to_string(),
            "suspending_min_freq" => self.suspending_min_freq().to_string(),
            _ => return Err(anyhow!("Unknown tunable: {name}")),
        };
        Ok(value)
    }

    /// 按名称写入参数，接受十进制或 0x 前缀的十六进制
    pub fn store(&self, name: &str, value: &str) -> Result<()> {
        let parsed = parse_number(value)
            .with_context(|| format!("Invalid value for {name}: {value:?}"))?;
        let narrow = || {
            u32::try_from(parsed).with_context(|| format!("Value out of range for {name}: {parsed}"))
        };

        match name {
            "up_sample_time" => self.set_up_sample_time(parsed),
            "down_sample_time" => self.set_down_sample_time(parsed),
            "inc_cpu_load" => self.set_inc_cpu_load(narrow()?)?,
            "dec_cpu_load" => self.set_dec_cpu_load(narrow()?)?,
            "ramp_up_step" => self.set_ramp_up_step(narrow()?),
            "ramp_down_step" => self.set_ramp_down_step(narrow()?),
            "debug_mode" => self.set_debug_mode(DebugFlags::from_bits_truncate(narrow()?)),
            "suspending_min_freq" => self.set_suspending_min_freq(narrow()?),
            _ => return Err(anyhow!("Unknown tunable: {name}")),
        }
        Ok(())
    }

    pub fn log_summary(&self) {
        for name in TUNABLE_NAMES {
            if let Ok(value) = self.show(name) {
                info!("  {name} = {value}");
            }
        }
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self::new()
    }
}

fn check_percent(load: u32) -> Result<u32> {
    if load > 100 {
        return Err(anyhow!("Load threshold must be within 0..=100, got {load}"));
    }
    Ok(load)
}

fn parse_number(value: &str) -> Result<u64> {
    let value = value.trim();
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16)?,
        None => value.parse::<u64>()?,
    };
    Ok(parsed)
}
