pub mod core_state;
pub mod dispatcher;
pub mod driver;
pub mod governor;
pub mod idle;
pub mod pending;
pub mod power_state;
pub mod runtime;
pub mod sampler;
pub mod timer;
pub mod tunables;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// 加锁，持锁线程崩溃后继续使用内部数据
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
