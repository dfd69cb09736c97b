use std::fmt;

/// 合并调度器错误类型 (Coalescer Error Type)
#[derive(Debug, Clone, PartialEq)]
pub enum CoalesceError {
    /// 每组槽位容量无效（必须大于 0）
    /// Invalid per-group slot capacity (must be greater than 0)
    InvalidCapacity {
        capacity: u64,
        reason: &'static str,
    },

    /// 相似度比率边界无效（必须满足 0 < lower < upper）
    /// Invalid similarity ratio bounds (must satisfy 0 < lower < upper)
    InvalidRatioBounds {
        lower: f64,
        upper: f64,
        reason: &'static str,
    },

    /// 配置验证失败 (Configuration validation failed)
    InvalidConfiguration {
        field: String,
        reason: String,
    },
}

impl fmt::Display for CoalesceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoalesceError::InvalidCapacity { capacity, reason } => {
                write!(f, "Invalid group capacity {}: {}", capacity, reason)
            }
            CoalesceError::InvalidRatioBounds { lower, upper, reason } => {
                write!(f, "Invalid ratio bounds ({}, {}): {}", lower, upper, reason)
            }
            CoalesceError::InvalidConfiguration { field, reason } => {
                write!(f, "Configuration validation failed ({}): {}", field, reason)
            }
        }
    }
}

impl std::error::Error for CoalesceError {}
