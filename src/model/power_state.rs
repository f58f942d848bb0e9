use std::{
    str::FromStr,
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::{Result, anyhow};
use log::info;

use crate::model::tunables::{DebugFlags, Tunables};

/// 电源状态通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    SuspendPrepare,
    PostSuspend,
    RestorePrepare,
    PostRestore,
    HibernationPrepare,
    PostHibernation,
    /// 灭屏
    EarlySuspend,
    /// 亮屏
    LateResume,
}

impl FromStr for PowerEvent {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let event = match s.trim().to_lowercase().replace('-', "_").as_str() {
            "suspend_prepare" | "suspend" => Self::SuspendPrepare,
            "post_suspend" | "resume" => Self::PostSuspend,
            "restore_prepare" => Self::RestorePrepare,
            "post_restore" => Self::PostRestore,
            "hibernation_prepare" => Self::HibernationPrepare,
            "post_hibernation" => Self::PostHibernation,
            "early_suspend" | "screen_off" => Self::EarlySuspend,
            "late_resume" | "screen_on" => Self::LateResume,
            other => return Err(anyhow!("Unknown power event: {other}")),
        };
        Ok(event)
    }
}

/// 电源状态门控，标志只由通知处理函数写入，采样器只读
#[derive(Debug, Default)]
pub struct PowerState {
    suspending: AtomicBool,
    early_suspended: AtomicBool,
}

impl PowerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_suspending(&self) -> bool {
        self.suspending.load(Ordering::Relaxed)
    }

    pub fn is_early_suspended(&self) -> bool {
        self.early_suspended.load(Ordering::Relaxed)
    }

    pub fn handle(&self, event: PowerEvent, tunables: &Tunables) {
        let suspend_log = tunables.debug_enabled(DebugFlags::SUSPEND);
        let early_log = tunables.debug_enabled(DebugFlags::EARLY_SUSPEND);

        match event {
            PowerEvent::SuspendPrepare => self.suspending.store(true, Ordering::Relaxed),
            PowerEvent::PostSuspend => self.suspending.store(false, Ordering::Relaxed),
            PowerEvent::EarlySuspend => self.early_suspended.store(true, Ordering::Relaxed),
            PowerEvent::LateResume => self.early_suspended.store(false, Ordering::Relaxed),
            PowerEvent::RestorePrepare
            | PowerEvent::PostRestore
            | PowerEvent::HibernationPrepare
            | PowerEvent::PostHibernation => {}
        }

        let logged = match event {
            PowerEvent::EarlySuspend | PowerEvent::LateResume => early_log,
            _ => suspend_log,
        };
        if logged {
            info!(
                "Power event {:?} (suspending={}, early_suspended={})",
                event,
                self.is_suspending(),
                self.is_early_suspended()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_toggle_their_own_flag() {
        let tunables = Tunables::new();
        let power = PowerState::new();

        power.handle(PowerEvent::EarlySuspend, &tunables);
        assert!(power.is_early_suspended());
        assert!(!power.is_suspending());

        power.handle(PowerEvent::SuspendPrepare, &tunables);
        power.handle(PowerEvent::HibernationPrepare, &tunables);
        assert!(power.is_suspending());

        power.handle(PowerEvent::PostSuspend, &tunables);
        power.handle(PowerEvent::LateResume, &tunables);
        assert!(!power.is_suspending());
        assert!(!power.is_early_suspended());
    }

    #[test]
    fn parses_event_words() {
        assert_eq!("screen_off".parse::<PowerEvent>().unwrap(), PowerEvent::EarlySuspend);
        assert_eq!("late-resume\n".parse::<PowerEvent>().unwrap(), PowerEvent::LateResume);
        assert_eq!("SUSPEND_PREPARE".parse::<PowerEvent>().unwrap(), PowerEvent::SuspendPrepare);
        assert!("reboot".parse::<PowerEvent>().is_err());
    }
}
