use crate::model::{driver::CpuPolicy, idle::IdleSample};

/// 单核心的调频状态
#[derive(Debug, Clone, Default)]
pub struct CoreState {
    /// 当前采样窗口起点的累计空闲时间
    pub time_in_idle: u64,
    /// 当前采样窗口起点时刻，0 表示采样已被空闲取消作废
    pub idle_exit_time: u64,
    /// 采样器上次运行时刻
    pub timer_run_time: u64,
    pub idling: bool,
    /// 核心在最低频空闲时可取消定时器
    pub timer_idle_cancel: bool,
    /// 上次真正完成调频的时刻
    pub freq_change_time: u64,
    pub freq_change_time_in_idle: u64,
    /// 期望频率，派发未完成时可能领先于驱动的当前频率
    pub target_freq: u32,
    pub policy: CpuPolicy,
    pub enabled: bool,
    /// 启动流程进行中，期间其他启动请求直接返回
    pub starting: bool,
    /// 升频因停留时间不足被推迟，下一次采样保持当前频率
    pub stuck_on_sampling: bool,
    /// 被推迟的那次升频时测得的负载
    pub cpu_load_captured: Option<u32>,
}

impl CoreState {
    /// 开启新的采样窗口
    pub fn open_window(&mut self, sample: IdleSample) {
        self.time_in_idle = sample.idle_us;
        self.idle_exit_time = sample.timestamp_us;
    }

    /// 记录一次已生效的频率切换
    pub fn anchor_change(&mut self, sample: IdleSample) {
        self.freq_change_time_in_idle = sample.idle_us;
        self.freq_change_time = sample.timestamp_us;
    }

    pub fn clear_transient(&mut self) {
        self.stuck_on_sampling = false;
        self.cpu_load_captured = None;
    }

    /// 采样器已消费上一窗口，空闲退出可以开启新窗口
    pub fn sample_consumed(&self) -> bool {
        self.timer_run_time >= self.idle_exit_time
    }
}
