use std::sync::Weak;

use anyhow::Result;

/// 一次空闲时间采样
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdleSample {
    /// 累计空闲时间（微秒）
    pub idle_us: u64,
    /// 采样时刻（单调时钟，微秒，永不为 0）
    pub timestamp_us: u64,
}

/// 空闲时间来源
pub trait IdleTimeSource: Send + Sync {
    fn sample(&self, core: usize) -> Result<IdleSample>;
}

/// 宿主空闲循环在核心进入/退出空闲时调用
pub trait IdleHook: Send + Sync {
    fn idle_enter(&self, core: usize);
    fn idle_exit(&self, core: usize);
}

/// 提供空闲回调挂载点的宿主
pub trait IdleHookHost: Send + Sync {
    fn install(&self, hook: Weak<dyn IdleHook>);
    fn remove(&self);
}
