//! 内存使用统计

use std::fmt;

/// 单个请求的内存统计
///
/// - `usage` = 小对象分配 + big 欠账 - 已释放
/// - `capacity` = malloc 容量 + mmap 容量
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryUsageStats {
    /// big 分配记账：分配时减少，扩容时按差值减少
    pub mm_udebt: i64,
    /// 小对象分配器发出的字节
    pub mm_allocated: i64,
    /// 已归还的字节
    pub mm_freed: i64,
    /// 通过分配器取得的容量（big 节点与非池化 slab）
    pub malloc_cap: i64,
    /// 通过映射取得的容量（池化 slab 与首 slab）
    pub mmap_cap: i64,
    /// 本请求累计映射的字节
    pub mmap_volume: i64,
    /// 使用量峰值
    pub peak_usage: i64,
    /// 容量峰值
    pub peak_cap: i64,
    /// 累计分配字节
    pub total_alloc: i64,
}

impl MemoryUsageStats {
    /// 当前使用量
    #[inline]
    pub fn usage(&self) -> i64 {
        self.mm_allocated - self.mm_udebt - self.mm_freed
    }

    /// 当前容量
    #[inline]
    pub fn capacity(&self) -> i64 {
        self.malloc_cap + self.mmap_cap
    }

    /// 刷新峰值
    #[inline]
    pub fn update_peaks(&mut self) {
        self.peak_usage = self.peak_usage.max(self.usage());
        self.peak_cap = self.peak_cap.max(self.capacity());
    }
}

impl fmt::Display for MemoryUsageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Current Usage: {} bytes\tCurrent Capacity: {} bytes", self.usage(), self.capacity())?;
        writeln!(f, "Peak Usage: {} bytes\tPeak Capacity: {} bytes", self.peak_usage, self.peak_cap)?;
        write!(
            f,
            "Total Alloc: {} bytes\tMalloc: {} bytes\tMmap: {} bytes ({} mapped)",
            self.total_alloc, self.malloc_cap, self.mmap_cap, self.mmap_volume
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_accounting() {
        let mut stats = MemoryUsageStats::default();
        stats.mm_allocated += 64;
        stats.mm_udebt -= 4096;
        stats.malloc_cap += 4096;
        stats.update_peaks();
        assert_eq!(stats.usage(), 4160);
        stats.mm_freed += 4096;
        stats.malloc_cap -= 4096;
        stats.update_peaks();
        assert_eq!(stats.usage(), 64);
        assert_eq!(stats.peak_usage, 4160);
        assert_eq!(stats.peak_cap, 4096);
        assert!(stats.to_string().contains("Peak Usage: 4160"));
    }
}
