/// CPU Governor 常量定义
pub const NOTES: &str = "Per-core Load-Based CPU Frequency Governor";
pub const AUTHOR: &str = "Author: Seyud @GitHub, Tools-cx-app @GitHub";
pub const VERSION: &str = "Version: v1.0.0";

/// 后台线程名称
pub mod threads {
    pub const UP_WORKER: &str = "kgov_up";
    pub const DOWN_WORKER: &str = "kgov_down";
    pub const TIMER_SERVICE: &str = "kgov_timer";
    pub const CONFIG_MONITOR: &str = "ConfigWatcher";
    pub const POWER_MONITOR: &str = "PowerStateWatcher";
    pub const LOG_MONITOR: &str = "LogLevelMonitor";
    pub const IDLE_POLLER: &str = "IdlePoller";
    pub const LIMITS_MONITOR: &str = "LimitsWatcher";
}

/// 宿主侧默认值
pub mod host {
    pub const IDLE_POLL_MS: u64 = 10;
    /// 轮询周期内空闲占比达到该百分比视为进入空闲
    pub const IDLE_ENTER_PCT: u64 = 90;
    /// sysfs 频率上下限不产生 inotify 事件，只能轮询
    pub const LIMITS_POLL_MS: u64 = 1_000;
}
