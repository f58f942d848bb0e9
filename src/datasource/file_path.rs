// 配置与控制节点
pub const CONFIG_FILE: &str = "/data/adb/cpu_governor/config/tunables.toml";
pub const POWER_STATE_PATH: &str = "/data/adb/cpu_governor/power_state";
pub const LOG_LEVEL_PATH: &str = "/data/adb/cpu_governor/log/log_level";

// 内核接口
pub const PROC_STAT: &str = "/proc/stat";
pub const CPU_ROOT: &str = "/sys/devices/system/cpu";

// cpufreq 节点（相对于 cpuN/cpufreq）
pub const SCALING_AVAILABLE_FREQS: &str = "scaling_available_frequencies";
pub const SCALING_CUR_FREQ: &str = "scaling_cur_freq";
pub const SCALING_MIN_FREQ: &str = "scaling_min_freq";
pub const SCALING_MAX_FREQ: &str = "scaling_max_freq";
pub const SCALING_SETSPEED: &str = "scaling_setspeed";
pub const SCALING_GOVERNOR: &str = "scaling_governor";

pub const USERSPACE_GOVERNOR: &str = "userspace";
