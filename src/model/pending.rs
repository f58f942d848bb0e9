use std::{
    collections::BTreeSet,
    sync::{Condvar, Mutex, PoisonError},
    time::Instant,
};

use crate::model::lock;

/// 一次取出的待调频核心
#[derive(Debug, Default)]
pub struct Batch {
    pub cores: Vec<usize>,
    /// 本批中最早入队的时刻
    pub queued_at: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    cores: BTreeSet<usize>,
    queued_at: Option<Instant>,
    stopped: bool,
}

/// 待调频核心集合，锁内只做插入和清空
pub struct PendingSet {
    name: &'static str,
    inner: Mutex<Inner>,
    wake: Condvar,
}

impl PendingSet {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(Inner::default()),
            wake: Condvar::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 加入核心并唤醒派发线程，返回核心此前是否不在集合中
    pub fn insert(&self, core: usize) -> bool {
        let added = {
            let mut inner = lock(&self.inner);
            inner.queued_at.get_or_insert_with(Instant::now);
            inner.cores.insert(core)
        };
        self.wake.notify_one();
        added
    }

    pub fn remove(&self, core: usize) -> bool {
        let mut inner = lock(&self.inner);
        let removed = inner.cores.remove(&core);
        if inner.cores.is_empty() {
            inner.queued_at = None;
        }
        removed
    }

    pub fn contains(&self, core: usize) -> bool {
        lock(&self.inner).cores.contains(&core)
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).cores.is_empty()
    }

    /// 原子地取出全部核心
    pub fn drain(&self) -> Batch {
        Self::take(&mut lock(&self.inner))
    }

    /// 阻塞直到集合非空后取出全部核心；停止后返回 `None`
    pub fn wait_drain(&self) -> Option<Batch> {
        let mut inner = lock(&self.inner);
        loop {
            if inner.stopped {
                return None;
            }
            if !inner.cores.is_empty() {
                return Some(Self::take(&mut inner));
            }
            inner = self
                .wake
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn stop(&self) {
        lock(&self.inner).stopped = true;
        self.wake.notify_all();
    }

    fn take(inner: &mut Inner) -> Batch {
        Batch {
            cores: std::mem::take(&mut inner.cores).into_iter().collect(),
            queued_at: inner.queued_at.take(),
        }
    }
}
