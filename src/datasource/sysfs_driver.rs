use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Mutex,
};

use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};

use crate::{
    datasource::file_path::*,
    model::{
        driver::{CpuPolicy, FrequencyDriver, Relation},
        lock,
    },
    utils::file_operate::{read_file, read_value, write_file},
};

/// 解析 "0-3,5,7-8" 形式的核心列表
pub fn parse_cpu_list(content: &str) -> Result<Vec<usize>> {
    let mut cpus = Vec::new();
    for part in content.trim().split(',').filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: usize = lo.trim().parse().with_context(|| format!("Bad cpu range: {part}"))?;
                let hi: usize = hi.trim().parse().with_context(|| format!("Bad cpu range: {part}"))?;
                if lo > hi {
                    return Err(anyhow!("Bad cpu range: {part}"));
                }
                cpus.extend(lo..=hi);
            }
            None => cpus.push(part.trim().parse().with_context(|| format!("Bad cpu id: {part}"))?),
        }
    }
    cpus.sort_unstable();
    cpus.dedup();
    Ok(cpus)
}

pub fn parse_freq_table(content: &str) -> Vec<u32> {
    content
        .split_whitespace()
        .filter_map(|f| f.parse().ok())
        .collect()
}

/// 通过 cpufreq sysfs 节点调频（需要 userspace 调速器）
pub struct SysfsCpufreqDriver {
    root: PathBuf,
    saved_governors: Mutex<HashMap<usize, String>>,
}

impl SysfsCpufreqDriver {
    pub fn new() -> Self {
        Self::with_root(CPU_ROOT)
    }

    pub fn with_root<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            saved_governors: Mutex::new(HashMap::new()),
        }
    }

    fn node(&self, core: usize, name: &str) -> PathBuf {
        self.root.join(format!("cpu{core}")).join("cpufreq").join(name)
    }

    pub fn online_cpus(&self) -> Result<Vec<usize>> {
        let content = read_file(self.root.join("online"))?;
        parse_cpu_list(&content)
    }

    fn read_freq(&self, core: usize, name: &str) -> Result<u32> {
        read_value(self.node(core, name))
    }
}

impl Default for SysfsCpufreqDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FrequencyDriver for SysfsCpufreqDriver {
    fn policy(&self, core: usize) -> Result<CpuPolicy> {
        let table = parse_freq_table(&read_file(self.node(core, SCALING_AVAILABLE_FREQS))?);
        if table.is_empty() {
            return Err(anyhow!("cpu{core} reports an empty frequency table"));
        }
        Ok(CpuPolicy::new(
            self.read_freq(core, SCALING_MIN_FREQ)?,
            self.read_freq(core, SCALING_MAX_FREQ)?,
            self.read_freq(core, SCALING_CUR_FREQ)?,
            table,
        ))
    }

    fn set_target(&self, core: usize, freq: u32, relation: Relation) -> Result<u32> {
        let policy = self.policy(core)?;
        let idx = policy
            .resolve(freq, relation)
            .ok_or_else(|| anyhow!("cpu{core} has no frequency inside [{}, {}]", policy.min, policy.max))?;
        let applied = policy.freq_at(idx);
        if applied != policy.cur {
            write_file(self.node(core, SCALING_SETSPEED), &applied.to_string())?;
            debug!("cpu{core}: {} -> {applied}KHz", policy.cur);
        }
        Ok(applied)
    }

    fn acquire(&self, core: usize) -> Result<()> {
        let node = self.node(core, SCALING_GOVERNOR);
        let previous = read_file(&node)?.trim().to_string();
        if previous != USERSPACE_GOVERNOR {
            write_file(&node, USERSPACE_GOVERNOR)?;
            info!("cpu{core}: governor {previous} -> {USERSPACE_GOVERNOR}");
        }
        lock(&self.saved_governors).insert(core, previous);
        Ok(())
    }

    fn release(&self, core: usize) -> Result<()> {
        let Some(previous) = lock(&self.saved_governors).remove(&core) else {
            return Ok(());
        };
        if previous == USERSPACE_GOVERNOR {
            return Ok(());
        }
        let node = self.node(core, SCALING_GOVERNOR);
        if !node.exists() {
            warn!("cpu{core}: governor node vanished, cannot restore {previous}");
            return Ok(());
        }
        write_file(&node, &previous)?;
        info!("cpu{core}: governor restored to {previous}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

    fn fake_sysfs() -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "cpugovernor-sysfs-{}-{}",
            std::process::id(),
            NEXT_DIR.fetch_add(1, Ordering::SeqCst)
        ));
        let dir = root.join("cpu0").join("cpufreq");
        fs::create_dir_all(&dir).unwrap();
        fs::write(root.join("online"), "0\n").unwrap();
        fs::write(dir.join(SCALING_AVAILABLE_FREQS), "400000 200000 800000 600000 \n").unwrap();
        fs::write(dir.join(SCALING_MIN_FREQ), "200000\n").unwrap();
        fs::write(dir.join(SCALING_MAX_FREQ), "600000\n").unwrap();
        fs::write(dir.join(SCALING_CUR_FREQ), "400000\n").unwrap();
        fs::write(dir.join(SCALING_SETSPEED), "<unsupported>\n").unwrap();
        fs::write(dir.join(SCALING_GOVERNOR), "schedutil\n").unwrap();
        root
    }

    #[test]
    fn parses_cpu_lists() {
        assert_eq!(parse_cpu_list("0-3,6\n").unwrap(), vec![0, 1, 2, 3, 6]);
        assert_eq!(parse_cpu_list("2").unwrap(), vec![2]);
        assert!(parse_cpu_list("3-1").is_err());
        assert!(parse_cpu_list("x").is_err());
    }

    #[test]
    fn reads_policy_from_nodes() {
        let root = fake_sysfs();
        let driver = SysfsCpufreqDriver::with_root(&root);

        let policy = driver.policy(0).unwrap();
        assert_eq!(policy.table, vec![200_000, 400_000, 600_000, 800_000]);
        assert_eq!((policy.min, policy.max, policy.cur), (200_000, 600_000, 400_000));
        assert_eq!(driver.online_cpus().unwrap(), vec![0]);

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn set_target_clamps_to_policy_window() {
        let root = fake_sysfs();
        let driver = SysfsCpufreqDriver::with_root(&root);

        assert_eq!(driver.set_target(0, 700_000, Relation::AtLeast).unwrap(), 600_000);
        let written = fs::read_to_string(root.join("cpu0/cpufreq").join(SCALING_SETSPEED)).unwrap();
        assert_eq!(written, "600000");

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn acquire_and_release_restore_previous_governor() {
        let root = fake_sysfs();
        let driver = SysfsCpufreqDriver::with_root(&root);
        let node = root.join("cpu0/cpufreq").join(SCALING_GOVERNOR);

        driver.acquire(0).unwrap();
        assert_eq!(fs::read_to_string(&node).unwrap(), USERSPACE_GOVERNOR);
        driver.release(0).unwrap();
        assert_eq!(fs::read_to_string(&node).unwrap(), "schedutil");

        // 未接管的核心释放时什么都不做
        driver.release(0).unwrap();
        fs::remove_dir_all(root).unwrap();
    }
}
