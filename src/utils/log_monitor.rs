use anyhow::Result;
use inotify::WatchMask;
use log::{debug, info};

use crate::{
    datasource::file_path::LOG_LEVEL_PATH,
    utils::{
        constants::threads::LOG_MONITOR, file_operate::check_read_simple,
        inotify::InotifyWatcher, logger::update_log_level,
    },
};

pub fn monitor_log_level() -> Result<()> {
    info!("{LOG_MONITOR} Start");

    if !check_read_simple(LOG_LEVEL_PATH) {
        info!("Log level file does not exist: {LOG_LEVEL_PATH}");
        return Ok(());
    }
    info!("Using log level path: {LOG_LEVEL_PATH}");

    let mut inotify = InotifyWatcher::new()?;
    inotify.add(LOG_LEVEL_PATH, WatchMask::CLOSE_WRITE | WatchMask::MODIFY)?;

    loop {
        inotify.wait_and_handle()?;

        if !check_read_simple(LOG_LEVEL_PATH) {
            debug!("Log level file no longer exists");
            continue;
        }
        update_log_level();
    }
}
