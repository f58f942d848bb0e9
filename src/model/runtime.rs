use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::{
    model::{
        dispatcher::{deescalation_worker, escalation_worker},
        governor::Governor,
    },
    utils::constants::threads,
};

/// 调速器的后台线程：定时器服务、升频线程、降频线程
pub struct GovernorRuntime {
    governor: Arc<Governor>,
    handles: Vec<JoinHandle<()>>,
}

impl GovernorRuntime {
    /// 启动全部后台线程；任一线程创建失败时停止已启动的线程并返回错误
    pub fn start(governor: Arc<Governor>) -> Result<Self> {
        let mut runtime = Self {
            governor,
            handles: Vec::with_capacity(3),
        };

        runtime.spawn(threads::UP_WORKER, escalation_worker)?;
        runtime.spawn(threads::DOWN_WORKER, deescalation_worker)?;
        runtime.spawn(threads::TIMER_SERVICE, timer_service)?;

        info!("Governor runtime started ({} cores)", runtime.governor.num_cores());
        Ok(runtime)
    }

    pub fn governor(&self) -> &Arc<Governor> {
        &self.governor
    }

    fn spawn(&mut self, name: &str, body: fn(Arc<Governor>)) -> Result<()> {
        let governor = self.governor.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(governor))
            .with_context(|| format!("Failed to create {name} thread"))?;
        self.handles.push(handle);
        Ok(())
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.governor.up_pending.stop();
        self.governor.down_pending.stop();
        self.governor.timers.stop();

        for handle in self.handles.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                warn!("{name} thread panicked");
            } else {
                debug!("{name} thread joined");
            }
        }
        info!("Governor runtime stopped");
    }
}

impl Drop for GovernorRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}

fn timer_service(governor: Arc<Governor>) {
    while let Some(expired) = governor.timers.wait_expired() {
        for core in expired {
            governor.on_timer(core);
        }
    }
}
