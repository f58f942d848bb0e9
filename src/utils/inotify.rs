use std::{collections::HashMap, path::Path, path::PathBuf, thread, time::Duration};

use anyhow::{Context, Result};
use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};
use log::debug;

/// 文件被替换（编辑器先删后写）后等待新文件出现的时间
const WAIT_REPLACE: Duration = Duration::from_millis(500);

/// 监听配置节点的 inotify 封装，被删除或移动的文件会自动重新监听
pub struct InotifyWatcher {
    inotify: Inotify,
    watches: HashMap<WatchDescriptor, (PathBuf, WatchMask)>,
}

impl InotifyWatcher {
    pub fn new() -> Result<Self> {
        let inotify = Inotify::init().with_context(|| "Failed to initialize inotify")?;
        Ok(Self {
            inotify,
            watches: HashMap::new(),
        })
    }

    pub fn add<P: AsRef<Path>>(&mut self, path: P, mask: WatchMask) -> Result<()> {
        let path = path.as_ref();
        let mask = mask | WatchMask::DELETE_SELF | WatchMask::MOVE_SELF;
        let wd = self
            .inotify
            .watches()
            .add(path, mask)
            .with_context(|| format!("Failed to add watch for: {}", path.display()))?;
        self.watches.insert(wd, (path.to_path_buf(), mask));
        Ok(())
    }

    /// 阻塞等待事件，返回发生变化的文件
    pub fn wait_and_handle(&mut self) -> Result<Vec<PathBuf>> {
        let mut buffer = [0; 4096];
        let mut changed = Vec::new();
        let mut lost = Vec::new();

        let events = self
            .inotify
            .read_events_blocking(&mut buffer)
            .with_context(|| "Failed to read inotify events")?;
        for event in events {
            let Some((path, _)) = self.watches.get(&event.wd) else {
                continue;
            };
            if event.mask.intersects(EventMask::IGNORED | EventMask::DELETE_SELF | EventMask::MOVE_SELF) {
                lost.push(event.wd.clone());
            }
            if !changed.contains(path) {
                changed.push(path.clone());
            }
        }

        for wd in lost {
            self.rewatch(wd)?;
        }
        Ok(changed)
    }

    fn rewatch(&mut self, wd: WatchDescriptor) -> Result<()> {
        let Some((path, mask)) = self.watches.remove(&wd) else {
            return Ok(());
        };
        if !path.exists() {
            thread::sleep(WAIT_REPLACE);
        }
        debug!("Re-adding watch for {}", path.display());
        self.add(&path, mask)
    }
}
