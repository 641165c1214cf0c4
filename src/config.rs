//! 配置常量模块
//!
//! 堆与数组的调优常量都在这里定义；运行期可调的部分放在 `HeapConfig`，
//! 支持 `QVM_` 前缀的环境变量覆盖

use crate::i18n::Locale;

/// 语言名称
pub const LANG_NAME: &str = "Q";

/// 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// 内存管理常量
// ============================================================================

/// slab 大小：2MB
pub const SLAB_SIZE: usize = 2 << 20;

/// slab 对齐（与大小相同，便于由指针直接算出 slab 基址）
pub const SLAB_ALIGN: usize = SLAB_SIZE;

/// 小对象尺寸量子的对数
pub const LG_SIZE_QUANTUM: usize = 4;

/// 小对象尺寸量子：16 字节
pub const SIZE_QUANTUM: usize = 1 << LG_SIZE_QUANTUM;

/// 小对象上限，超过则走 big 分配
pub const MAX_SMALL_SIZE: usize = 2048;

/// 尺寸类数量
pub const NUM_SIZE_CLASSES: usize = MAX_SMALL_SIZE / SIZE_QUANTUM;

/// 释放内存的填充字节
pub const SMALL_FREE_FILL: u8 = 0x6a;

/// 单个请求可从 slab 池借用的默认上限
pub const REQUEST_HUGE_MAX_BYTES: usize = 64 << 20;

/// 每个工作线程默认预留的池化 slab 数
pub const SLABS_PER_WORKER: usize = 4;

// ============================================================================
// 数组常量
// ============================================================================

/// 装载因子倒数：表满 1 - 1/LOAD_SCALE 时扩容或压缩
pub const LOAD_SCALE: usize = 4;

/// 最小 hash 表大小的对数
pub const MIN_LG_TABLE_SIZE: u32 = 2;

/// 最小 hash 表大小
pub const MIN_TABLE_SIZE: usize = 1 << MIN_LG_TABLE_SIZE;

// ============================================================================
// 运行期配置
// ============================================================================

/// 堆配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    /// 重置时用 `SMALL_FREE_FILL` 填充保留下来的内存
    pub trash_fill: bool,
    /// 每个请求最多占用的池化 slab 字节数
    pub max_pooled_bytes: usize,
    /// 请求内存上限（0 表示不限制）
    pub memory_limit: usize,
    /// 是否记录数组来源标签
    pub array_provenance: bool,
    /// 每个工作线程预留的 slab 数
    pub slabs_per_worker: usize,
    /// 诊断信息语言
    pub locale: Locale,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            trash_fill: cfg!(debug_assertions),
            max_pooled_bytes: REQUEST_HUGE_MAX_BYTES,
            memory_limit: 0,
            array_provenance: false,
            slabs_per_worker: SLABS_PER_WORKER,
            locale: Locale::En,
        }
    }
}

impl HeapConfig {
    /// 环境变量前缀
    pub const ENV_PREFIX: &'static str = "QVM_";

    /// 从环境变量读取配置，未设置的项使用默认值
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_var("TRASH_FILL").and_then(|s| parse_bool(&s)) {
            config.trash_fill = v;
        }
        if let Some(v) = env_var("MAX_POOLED_BYTES").and_then(|s| parse_size(&s)) {
            config.max_pooled_bytes = v;
        }
        if let Some(v) = env_var("MEMORY_LIMIT").and_then(|s| parse_size(&s)) {
            config.memory_limit = v;
        }
        if let Some(v) = env_var("ARRAY_PROVENANCE").and_then(|s| parse_bool(&s)) {
            config.array_provenance = v;
        }
        if let Some(v) = env_var("SLABS_PER_WORKER").and_then(|s| parse_size(&s)) {
            config.slabs_per_worker = v;
        }
        if let Some(v) = env_var("LOCALE").and_then(|s| parse_locale(&s)) {
            config.locale = v;
        }
        config
    }

    pub fn with_trash_fill(mut self, enabled: bool) -> Self {
        self.trash_fill = enabled;
        self
    }

    pub fn with_max_pooled_bytes(mut self, bytes: usize) -> Self {
        self.max_pooled_bytes = bytes;
        self
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    pub fn with_array_provenance(mut self, enabled: bool) -> Self {
        self.array_provenance = enabled;
        self
    }

    pub fn with_slabs_per_worker(mut self, slabs: usize) -> Self {
        self.slabs_per_worker = slabs;
        self
    }

    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    /// 共享 slab 池的预留数量
    pub fn pool_slabs(&self) -> usize {
        num_cpus::get().max(1) * self.slabs_per_worker
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{}{}", HeapConfig::ENV_PREFIX, name)).ok()
}

/// 解析布尔开关
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            log::warn!("ignoring invalid boolean setting '{}'", other);
            None
        }
    }
}

/// 解析字节数，支持 k/m/g 后缀
pub fn parse_size(s: &str) -> Option<usize> {
    let s = s.trim().to_ascii_lowercase();
    let (digits, shift) = match s.as_bytes().last() {
        Some(b'k') => (&s[..s.len() - 1], 10),
        Some(b'm') => (&s[..s.len() - 1], 20),
        Some(b'g') => (&s[..s.len() - 1], 30),
        _ => (s.as_str(), 0),
    };
    match digits.parse::<usize>() {
        Ok(n) => n.checked_mul(1usize << shift),
        Err(_) => {
            log::warn!("ignoring invalid size setting '{}'", s);
            None
        }
    }
}

/// 解析语言设置
pub fn parse_locale(s: &str) -> Option<Locale> {
    let s = s.trim().to_ascii_lowercase();
    if s.starts_with("zh") {
        Some(Locale::Zh)
    } else if s.starts_with("en") {
        Some(Locale::En)
    } else {
        None
    }
}
