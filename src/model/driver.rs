use anyhow::Result;
use log::debug;

/// 频率取整关系
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// 取大于等于目标的最低频率
    AtLeast,
    /// 取小于等于目标的最高频率
    AtMost,
}

/// 单个核心的调频策略快照（频率单位 kHz）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuPolicy {
    pub min: u32,
    pub max: u32,
    pub cur: u32,
    /// 升序排列的合法频率表
    pub table: Vec<u32>,
}

impl CpuPolicy {
    pub fn new(min: u32, max: u32, cur: u32, mut table: Vec<u32>) -> Self {
        table.sort_unstable();
        table.dedup();
        Self { min, max, cur, table }
    }

    /// 当前策略窗口 [min, max] 内的频率表索引
    fn legal_indices(&self) -> impl DoubleEndedIterator<Item = usize> + '_ {
        self.table
            .iter()
            .enumerate()
            .filter(move |&(_, &f)| f >= self.min && f <= self.max)
            .map(|(i, _)| i)
    }

    /// 将目标频率按取整关系映射到频率表索引。
    ///
    /// 只考虑落在策略窗口内的条目；目标超出窗口时取离窗口最近的合法条目。
    /// 没有任何合法条目时返回 `None`。
    pub fn resolve(&self, target: u32, relation: Relation) -> Option<usize> {
        let lowest = self.legal_indices().next()?;
        let highest = self.legal_indices().next_back()?;

        let found = match relation {
            Relation::AtLeast => self.legal_indices().find(|&i| self.table[i] >= target),
            Relation::AtMost => self.legal_indices().rev().find(|&i| self.table[i] <= target),
        };

        let idx = found.unwrap_or(match relation {
            Relation::AtLeast => highest,
            Relation::AtMost => lowest,
        });
        debug!("resolve {target} ({relation:?}) -> {}", self.table[idx]);
        Some(idx)
    }

    /// 从 `from` 开始在合法条目中移动 `steps` 格，正数升频，负数降频，两端饱和
    pub fn step(&self, from: usize, steps: i64) -> Option<usize> {
        let legal: Vec<usize> = self.legal_indices().collect();
        let pos = legal.iter().position(|&i| i == from)?;
        let target = (pos as i64 + steps).clamp(0, legal.len() as i64 - 1);
        legal.get(target as usize).copied()
    }

    pub fn freq_at(&self, idx: usize) -> u32 {
        self.table.get(idx).copied().unwrap_or(self.min)
    }

    pub fn contains(&self, freq: u32) -> bool {
        self.table.binary_search(&freq).is_ok()
    }
}

/// 频率驱动 - 负责真正的频率切换以及上报频率表
pub trait FrequencyDriver: Send + Sync {
    /// 读取核心当前的 min/max/cur 以及频率表
    fn policy(&self, core: usize) -> Result<CpuPolicy>;

    /// 切换核心频率，返回实际生效的频率
    fn set_target(&self, core: usize, freq: u32, relation: Relation) -> Result<u32>;

    /// 接管核心的选频权
    fn acquire(&self, _core: usize) -> Result<()> {
        Ok(())
    }

    /// 归还核心的选频权
    fn release(&self, _core: usize) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CpuPolicy {
        CpuPolicy::new(
            200_000,
            1_600_000,
            1_000_000,
            vec![1_600_000, 200_000, 400_000, 600_000, 800_000, 1_000_000, 1_200_000, 1_400_000],
        )
    }

    #[test]
    fn table_is_sorted_ascending() {
        let p = policy();
        assert_eq!(p.table.first(), Some(&200_000));
        assert_eq!(p.table.last(), Some(&1_600_000));
    }

    #[test]
    fn resolve_rounds_by_relation() {
        let p = policy();
        assert_eq!(p.freq_at(p.resolve(320_000, Relation::AtLeast).unwrap()), 400_000);
        assert_eq!(p.freq_at(p.resolve(320_000, Relation::AtMost).unwrap()), 200_000);
        assert_eq!(p.freq_at(p.resolve(1_000_000, Relation::AtMost).unwrap()), 1_000_000);
    }

    #[test]
    fn resolve_respects_policy_window() {
        let mut p = policy();
        p.min = 400_000;
        p.max = 1_200_000;
        assert_eq!(p.freq_at(p.resolve(100_000, Relation::AtMost).unwrap()), 400_000);
        assert_eq!(p.freq_at(p.resolve(2_000_000, Relation::AtLeast).unwrap()), 1_200_000);
    }

    #[test]
    fn resolve_fails_without_legal_entries() {
        let p = CpuPolicy::new(100, 150, 120, vec![200, 300]);
        assert_eq!(p.resolve(120, Relation::AtLeast), None);
    }

    #[test]
    fn step_saturates_at_window_edges() {
        let p = policy();
        let top = p.resolve(1_600_000, Relation::AtMost).unwrap();
        assert_eq!(p.freq_at(p.step(top, 3).unwrap()), 1_600_000);
        let bottom = p.resolve(200_000, Relation::AtLeast).unwrap();
        assert_eq!(p.freq_at(p.step(bottom, -1).unwrap()), 200_000);
        assert_eq!(p.freq_at(p.step(bottom, 2).unwrap()), 600_000);
    }
}
