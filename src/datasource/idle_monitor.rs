use std::{
    sync::{Arc, Mutex, Weak},
    thread,
    time::Duration,
};

use anyhow::Result;
use log::{debug, info};

use crate::{
    model::{
        idle::{IdleHook, IdleHookHost, IdleSample, IdleTimeSource},
        lock,
    },
    utils::constants::{host::IDLE_ENTER_PCT, threads::IDLE_POLLER},
};

#[derive(Debug, Clone, Copy, Default)]
struct PollState {
    last: Option<IdleSample>,
    idle: bool,
}

/// 轮询空闲时间，把空闲进入/退出转换通知给已挂载的回调
pub struct IdlePoller {
    source: Arc<dyn IdleTimeSource>,
    cores: Vec<usize>,
    interval: Duration,
    hook: Mutex<Option<Weak<dyn IdleHook>>>,
    states: Mutex<Vec<PollState>>,
}

impl IdlePoller {
    pub fn new(source: Arc<dyn IdleTimeSource>, cores: Vec<usize>, interval: Duration) -> Self {
        let states = vec![PollState::default(); cores.len()];
        Self {
            source,
            cores,
            interval,
            hook: Mutex::new(None),
            states: Mutex::new(states),
        }
    }

    fn current_hook(&self) -> Option<Arc<dyn IdleHook>> {
        lock(&self.hook).as_ref().and_then(Weak::upgrade)
    }

    /// 轮询一次，返回本轮发生的转换数
    pub fn poll_once(&self) -> usize {
        let Some(hook) = self.current_hook() else {
            return 0;
        };

        let mut transitions = 0;
        let mut states = lock(&self.states);
        for (state, &core) in states.iter_mut().zip(&self.cores) {
            let sample = match self.source.sample(core) {
                Ok(sample) => sample,
                Err(e) => {
                    debug!("cpu{core}: idle poll failed: {e}");
                    continue;
                }
            };
            let Some(last) = state.last.replace(sample) else {
                continue;
            };

            let delta_time = sample.timestamp_us.saturating_sub(last.timestamp_us);
            if delta_time == 0 {
                continue;
            }
            let delta_idle = sample.idle_us.saturating_sub(last.idle_us);
            let idle = delta_idle.saturating_mul(100) >= delta_time.saturating_mul(IDLE_ENTER_PCT);

            if idle != state.idle {
                state.idle = idle;
                transitions += 1;
                if idle {
                    hook.idle_enter(core);
                } else {
                    hook.idle_exit(core);
                }
            }
        }
        transitions
    }

    pub fn run(&self) -> Result<()> {
        info!("{IDLE_POLLER} Start");
        loop {
            self.poll_once();
            thread::sleep(self.interval);
        }
    }
}

impl IdleHookHost for IdlePoller {
    fn install(&self, hook: Weak<dyn IdleHook>) {
        *lock(&self.hook) = Some(hook);
    }

    fn remove(&self) {
        *lock(&self.hook) = None;
        for state in lock(&self.states).iter_mut() {
            *state = PollState::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct ScriptedSource {
        samples: Mutex<Vec<IdleSample>>,
    }

    impl ScriptedSource {
        fn push(&self, idle_us: u64, timestamp_us: u64) {
            lock(&self.samples).push(IdleSample { idle_us, timestamp_us });
        }
    }

    impl IdleTimeSource for ScriptedSource {
        fn sample(&self, _core: usize) -> Result<IdleSample> {
            let mut samples = lock(&self.samples);
            if samples.is_empty() {
                return Err(anyhow::anyhow!("no sample"));
            }
            Ok(samples.remove(0))
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(&'static str, usize)>>,
    }

    impl IdleHook for Recorder {
        fn idle_enter(&self, core: usize) {
            lock(&self.events).push(("enter", core));
        }
        fn idle_exit(&self, core: usize) {
            lock(&self.events).push(("exit", core));
        }
    }

    #[test]
    fn reports_transitions_only() {
        let source = Arc::new(ScriptedSource::default());
        let poller = IdlePoller::new(source.clone(), vec![3], Duration::from_millis(10));
        let recorder = Arc::new(Recorder::default());
        let hook: Arc<dyn IdleHook> = recorder.clone();
        poller.install(Arc::downgrade(&hook));

        source.push(0, 1_000);
        source.push(9_500, 11_000);
        source.push(19_000, 21_000);
        source.push(20_000, 31_000);

        assert_eq!(poller.poll_once(), 0);
        assert_eq!(poller.poll_once(), 1);
        assert_eq!(poller.poll_once(), 0);
        assert_eq!(poller.poll_once(), 1);
        assert_eq!(*lock(&recorder.events), vec![("enter", 3), ("exit", 3)]);
    }

    #[test]
    fn does_nothing_without_hook() {
        let source = Arc::new(ScriptedSource::default());
        let poller = IdlePoller::new(source.clone(), vec![0], Duration::from_millis(10));
        source.push(0, 1_000);

        assert_eq!(poller.poll_once(), 0);
        assert_eq!(lock(&source.samples).len(), 1);
    }

    #[test]
    fn dropped_hook_is_not_called() {
        let source = Arc::new(ScriptedSource::default());
        let poller = IdlePoller::new(source, vec![0], Duration::from_millis(10));
        let hook: Arc<dyn IdleHook> = Arc::new(Recorder::default());
        poller.install(Arc::downgrade(&hook));
        drop(hook);

        assert_eq!(poller.poll_once(), 0);
    }
}
