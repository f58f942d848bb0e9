use std::sync::Arc;

use anyhow::{Result, anyhow};
use inotify::WatchMask;
use log::{debug, error, info, warn};

use crate::{
    datasource::{config_parser::reload_tunables, file_path::*},
    model::{governor::Governor, power_state::PowerEvent, tunables::Tunables},
    utils::{
        constants::threads::{CONFIG_MONITOR, POWER_MONITOR},
        file_operate::{check_read_simple, read_file},
        inotify::InotifyWatcher,
    },
};

/// 监听 tunables.toml，修改后重新应用
pub fn monitor_config(tunables: Arc<Tunables>) -> Result<()> {
    info!("{CONFIG_MONITOR} Start");

    if !check_read_simple(CONFIG_FILE) {
        return Err(anyhow!("Config file not found: {CONFIG_FILE}"));
    }
    info!("Using Config: {CONFIG_FILE}");

    let mut inotify = InotifyWatcher::new()?;
    inotify.add(CONFIG_FILE, WatchMask::CLOSE_WRITE | WatchMask::MODIFY)?;

    loop {
        inotify.wait_and_handle()?;
        if !check_read_simple(CONFIG_FILE) {
            debug!("Config file no longer exists");
            continue;
        }
        // 配置写错时保留旧值继续运行
        if let Err(e) = reload_tunables(CONFIG_FILE, &tunables) {
            error!("Failed to reload config: {e:#}");
        }
    }
}

/// 取节点内容中最后一个非空行作为事件
pub fn parse_power_event(content: &str) -> Result<PowerEvent> {
    let word = content
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| anyhow!("Empty power state"))?;
    word.parse()
}

/// 监听电源状态节点，每次写入转发一个电源事件
pub fn monitor_power_state(governor: Arc<Governor>) -> Result<()> {
    info!("{POWER_MONITOR} Start");

    if !check_read_simple(POWER_STATE_PATH) {
        info!("Power state file does not exist: {POWER_STATE_PATH}");
        return Ok(());
    }

    let mut inotify = InotifyWatcher::new()?;
    inotify.add(POWER_STATE_PATH, WatchMask::CLOSE_WRITE)?;

    loop {
        inotify.wait_and_handle()?;
        let content = match read_file(POWER_STATE_PATH) {
            Ok(content) => content,
            Err(e) => {
                debug!("{e:#}");
                continue;
            }
        };
        match parse_power_event(&content) {
            Ok(event) => governor.power_event(event),
            Err(e) => warn!("{e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_non_empty_line_wins() {
        assert_eq!(
            parse_power_event("screen_off\nscreen_on\n\n").unwrap(),
            PowerEvent::LateResume
        );
        assert_eq!(parse_power_event("suspend").unwrap(), PowerEvent::SuspendPrepare);
    }

    #[test]
    fn empty_or_unknown_content_is_rejected() {
        assert!(parse_power_event(" \n").is_err());
        assert!(parse_power_event("doze").is_err());
    }
}
