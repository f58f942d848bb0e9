use std::{
    sync::{Condvar, Mutex, PoisonError},
    time::{Duration, Instant},
};

use crate::model::lock;

struct Table {
    expires: Vec<Option<Instant>>,
    stopped: bool,
}

/// 每核心一个可取消的单次定时器，由同一个服务线程触发
pub struct TimerService {
    table: Mutex<Table>,
    wake: Condvar,
}

impl TimerService {
    pub fn new(cores: usize) -> Self {
        Self {
            table: Mutex::new(Table {
                expires: vec![None; cores],
                stopped: false,
            }),
            wake: Condvar::new(),
        }
    }

    /// 设置（或重设）核心定时器在 `delay` 后触发
    pub fn mod_timer(&self, core: usize, delay: Duration) {
        let mut table = lock(&self.table);
        if let Some(slot) = table.expires.get_mut(core) {
            *slot = Some(Instant::now() + delay);
        }
        drop(table);
        self.wake.notify_one();
    }

    /// 取消定时器，返回取消前是否处于挂起状态
    pub fn del_timer(&self, core: usize) -> bool {
        lock(&self.table)
            .expires
            .get_mut(core)
            .and_then(Option::take)
            .is_some()
    }

    pub fn pending(&self, core: usize) -> bool {
        lock(&self.table)
            .expires
            .get(core)
            .is_some_and(Option::is_some)
    }

    pub fn armed_count(&self) -> usize {
        lock(&self.table).expires.iter().flatten().count()
    }

    /// 阻塞直到有定时器到期，清除并返回到期的核心；服务停止后返回 `None`
    pub fn wait_expired(&self) -> Option<Vec<usize>> {
        let mut table = lock(&self.table);
        loop {
            if table.stopped {
                return None;
            }

            let now = Instant::now();
            let mut due = Vec::new();
            let mut earliest: Option<Instant> = None;
            for (core, slot) in table.expires.iter_mut().enumerate() {
                match *slot {
                    Some(at) if at <= now => {
                        *slot = None;
                        due.push(core);
                    }
                    Some(at) => earliest = Some(earliest.map_or(at, |e| e.min(at))),
                    None => {}
                }
            }
            if !due.is_empty() {
                return Some(due);
            }

            table = match earliest {
                Some(at) => {
                    self.wake
                        .wait_timeout(table, at - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self.wake.wait(table).unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    pub fn stop(&self) {
        lock(&self.table).stopped = true;
        self.wake.notify_all();
    }
}
