//! 合并调度器配置模块 (Coalescer Configuration Module)
//!
//! 提供分层的配置结构和 Builder 模式，用于配置分组策略、空闲批处理和诊断行为。
//! (Provides hierarchical configuration structure and Builder pattern for configuring
//! grouping policy, idle batching, and diagnostics behavior)

use crate::error::CoalesceError;
use std::time::Duration;

/// 分组策略配置 (Grouping Policy Configuration)
///
/// 控制延迟请求和周期请求何时共享同一个底层平台定时器。
/// (Controls when delay requests and interval requests share one underlying platform timer)
///
/// 所有参数都来自原型实现中的魔法常量，这里暴露为命名配置以便调优和测试。
/// (All parameters originate from magic constants in the prototype implementation,
/// exposed here as named configuration for tuning and testing)
///
/// # 示例 (Examples)
/// ```no_run
/// use kestrel_coalesce::GroupingConfig;
///
/// // 使用默认配置 (Use default configuration)
/// let config = GroupingConfig::default();
///
/// // 使用 Builder 自定义配置 (Use Builder to customize configuration)
/// let config = GroupingConfig::builder()
///     .group_capacity(2048)
///     .delay_ratio_bounds(0.5, 3.0)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct GroupingConfig {
    /// 每组最大槽位数，同时也是句柄编码的基数
    /// (Maximum slots per group, also the radix of the handle encoding)
    ///
    /// 准入扫描会跳过已满的组，因此槽位索引永远不会溢出到下一个组的编码区间。
    /// (The admission scan skips full groups, so slot indices never overflow
    /// into the next group's encoded range)
    pub group_capacity: u64,

    /// 相似度比率中的毫秒偏移量，避免零延迟请求附近的除法不稳定
    /// (Millisecond offset in the similarity ratio, avoids division instability
    /// near zero-delay requests)
    pub ratio_offset_ms: u64,

    /// 延迟分组比率下界 (Lower bound of the delay grouping ratio)
    pub delay_ratio_lower: f64,
    /// 延迟分组比率上界 (Upper bound of the delay grouping ratio)
    pub delay_ratio_upper: f64,

    /// 周期分组比率下界 (Lower bound of the interval grouping ratio)
    pub interval_ratio_lower: f64,
    /// 周期分组比率上界 (Upper bound of the interval grouping ratio)
    pub interval_ratio_upper: f64,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            group_capacity: 1024,
            ratio_offset_ms: 10,
            delay_ratio_lower: 0.7,
            delay_ratio_upper: 2.5,
            interval_ratio_lower: 0.8,
            interval_ratio_upper: 1.4,
        }
    }
}

impl GroupingConfig {
    /// 创建配置构建器 (Create configuration builder)
    pub fn builder() -> GroupingConfigBuilder {
        GroupingConfigBuilder::default()
    }
}

/// 分组策略配置构建器 (Grouping Policy Configuration Builder)
#[derive(Debug, Clone)]
pub struct GroupingConfigBuilder {
    group_capacity: u64,
    ratio_offset_ms: u64,
    delay_ratio_lower: f64,
    delay_ratio_upper: f64,
    interval_ratio_lower: f64,
    interval_ratio_upper: f64,
}

impl Default for GroupingConfigBuilder {
    fn default() -> Self {
        let config = GroupingConfig::default();
        Self {
            group_capacity: config.group_capacity,
            ratio_offset_ms: config.ratio_offset_ms,
            delay_ratio_lower: config.delay_ratio_lower,
            delay_ratio_upper: config.delay_ratio_upper,
            interval_ratio_lower: config.interval_ratio_lower,
            interval_ratio_upper: config.interval_ratio_upper,
        }
    }
}

impl GroupingConfigBuilder {
    /// 设置每组最大槽位数 (Set maximum slots per group)
    pub fn group_capacity(mut self, capacity: u64) -> Self {
        self.group_capacity = capacity;
        self
    }

    /// 设置比率偏移量（毫秒）(Set ratio offset in milliseconds)
    pub fn ratio_offset_ms(mut self, offset: u64) -> Self {
        self.ratio_offset_ms = offset;
        self
    }

    /// 设置延迟分组比率边界 (Set delay grouping ratio bounds)
    pub fn delay_ratio_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.delay_ratio_lower = lower;
        self.delay_ratio_upper = upper;
        self
    }

    /// 设置周期分组比率边界 (Set interval grouping ratio bounds)
    pub fn interval_ratio_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.interval_ratio_lower = lower;
        self.interval_ratio_upper = upper;
        self
    }

    /// 构建配置并进行验证
    ///      (Build and validate configuration)
    ///
    /// # 返回 (Returns)
    /// - `Ok(GroupingConfig)`: 配置有效
    ///      (Configuration is valid)
    /// - `Err(CoalesceError)`: 配置验证失败
    ///      (Configuration validation failed)
    ///
    /// # 验证规则 (Validation Rules)
    /// - 每组槽位容量必须大于 0
    ///      (Group slot capacity must be greater than 0)
    /// - 比率偏移量必须大于 0
    ///      (Ratio offset must be greater than 0)
    /// - 比率边界必须满足 0 < lower < upper
    ///      (Ratio bounds must satisfy 0 < lower < upper)
    pub fn build(self) -> Result<GroupingConfig, CoalesceError> {
        if self.group_capacity == 0 {
            return Err(CoalesceError::InvalidCapacity {
                capacity: self.group_capacity,
                reason: "group capacity must be greater than 0",
            });
        }

        if self.ratio_offset_ms == 0 {
            return Err(CoalesceError::InvalidConfiguration {
                field: "ratio_offset_ms".to_string(),
                reason: "ratio offset must be greater than 0 to keep the similarity ratio stable near zero delays".to_string(),
            });
        }

        if !(self.delay_ratio_lower > 0.0 && self.delay_ratio_lower < self.delay_ratio_upper) {
            return Err(CoalesceError::InvalidRatioBounds {
                lower: self.delay_ratio_lower,
                upper: self.delay_ratio_upper,
                reason: "delay ratio bounds must satisfy 0 < lower < upper",
            });
        }

        if !(self.interval_ratio_lower > 0.0 && self.interval_ratio_lower < self.interval_ratio_upper) {
            return Err(CoalesceError::InvalidRatioBounds {
                lower: self.interval_ratio_lower,
                upper: self.interval_ratio_upper,
                reason: "interval ratio bounds must satisfy 0 < lower < upper",
            });
        }

        Ok(GroupingConfig {
            group_capacity: self.group_capacity,
            ratio_offset_ms: self.ratio_offset_ms,
            delay_ratio_lower: self.delay_ratio_lower,
            delay_ratio_upper: self.delay_ratio_upper,
            interval_ratio_lower: self.interval_ratio_lower,
            interval_ratio_upper: self.interval_ratio_upper,
        })
    }
}

/// 空闲批处理配置 (Idle Batching Configuration)
///
/// # 策略说明 (Policy Notes)
///
/// 当批次中所有回调都被取消时，是否取消底层平台空闲注册是一个开放的权衡：
/// 取消的开销可能超过让注册在空批次上无害触发的开销。默认不取消。
/// (Whether to cancel the underlying platform idle registration when every
/// callback in the batch has been cancelled is an open trade-off: cancelling
/// may cost more than letting the registration fire harmlessly on an empty
/// batch. The default is to not cancel)
#[derive(Debug, Clone)]
pub struct IdleConfig {
    /// 批次清空时取消底层空闲注册
    /// (Cancel the underlying idle registration when the batch empties)
    pub cancel_platform_when_empty: bool,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            cancel_platform_when_empty: false,
        }
    }
}

/// 诊断配置 (Diagnostics Configuration)
///
/// 周期性地以 JSON 形式输出所有打开的延迟组快照和计数器。纯观测用途，
/// 不属于功能契约，默认关闭。
/// (Periodically emits a JSON snapshot of all open delay groups and the
/// counters. Pure observability, not part of the functional contract,
/// disabled by default)
#[derive(Debug, Clone)]
pub struct DiagnosticsConfig {
    /// 是否启用周期性诊断输出 (Whether to enable the periodic diagnostics emitter)
    pub enabled: bool,
    /// 诊断输出间隔 (Diagnostics emit interval)
    pub interval: Duration,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(4),
        }
    }
}

/// 顶层合并调度器配置 (Top-level Coalescer Configuration)
///
/// 组合所有子配置，提供完整的调度器配置。
/// (Combines all sub-configurations to provide complete scheduler configuration)
///
/// # 示例 (Examples)
/// ```no_run
/// use kestrel_coalesce::CoalesceConfig;
/// use std::time::Duration;
///
/// // 使用默认配置 (Use default configuration)
/// let config = CoalesceConfig::default();
///
/// // 使用 Builder 自定义配置 (Use Builder to customize configuration)
/// let config = CoalesceConfig::builder()
///     .group_capacity(2048)
///     .diagnostics_interval(Duration::from_secs(10))
///     .enable_diagnostics(true)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct CoalesceConfig {
    /// 分组策略配置 (Grouping policy configuration)
    pub grouping: GroupingConfig,
    /// 空闲批处理配置 (Idle batching configuration)
    pub idle: IdleConfig,
    /// 诊断配置 (Diagnostics configuration)
    pub diagnostics: DiagnosticsConfig,
}

impl CoalesceConfig {
    /// 创建配置构建器 (Create configuration builder)
    pub fn builder() -> CoalesceConfigBuilder {
        CoalesceConfigBuilder::default()
    }
}

/// 顶层合并调度器配置构建器 (Top-level Coalescer Configuration Builder)
#[derive(Debug, Default)]
pub struct CoalesceConfigBuilder {
    grouping_builder: GroupingConfigBuilder,
    idle_config: IdleConfig,
    diagnostics_config: DiagnosticsConfig,
}

impl CoalesceConfigBuilder {
    /// 设置每组最大槽位数 (Set maximum slots per group)
    pub fn group_capacity(mut self, capacity: u64) -> Self {
        self.grouping_builder = self.grouping_builder.group_capacity(capacity);
        self
    }

    /// 设置比率偏移量（毫秒）(Set ratio offset in milliseconds)
    pub fn ratio_offset_ms(mut self, offset: u64) -> Self {
        self.grouping_builder = self.grouping_builder.ratio_offset_ms(offset);
        self
    }

    /// 设置延迟分组比率边界 (Set delay grouping ratio bounds)
    pub fn delay_ratio_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.grouping_builder = self.grouping_builder.delay_ratio_bounds(lower, upper);
        self
    }

    /// 设置周期分组比率边界 (Set interval grouping ratio bounds)
    pub fn interval_ratio_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.grouping_builder = self.grouping_builder.interval_ratio_bounds(lower, upper);
        self
    }

    /// 设置批次清空时是否取消底层空闲注册
    /// (Set whether to cancel the underlying idle registration when the batch empties)
    pub fn cancel_idle_when_empty(mut self, cancel: bool) -> Self {
        self.idle_config.cancel_platform_when_empty = cancel;
        self
    }

    /// 启用或禁用周期性诊断输出 (Enable or disable the periodic diagnostics emitter)
    pub fn enable_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics_config.enabled = enabled;
        self
    }

    /// 设置诊断输出间隔 (Set diagnostics emit interval)
    pub fn diagnostics_interval(mut self, interval: Duration) -> Self {
        self.diagnostics_config.interval = interval;
        self
    }

    /// 构建配置并进行验证
    ///      (Build and validate configuration)
    ///
    /// # 返回 (Returns)
    /// - `Ok(CoalesceConfig)`: 配置有效
    ///      (Configuration is valid)
    /// - `Err(CoalesceError)`: 配置验证失败
    ///      (Configuration validation failed)
    pub fn build(self) -> Result<CoalesceConfig, CoalesceError> {
        if self.diagnostics_config.enabled && self.diagnostics_config.interval.is_zero() {
            return Err(CoalesceError::InvalidConfiguration {
                field: "diagnostics_interval".to_string(),
                reason: "diagnostics interval must be greater than 0 when enabled".to_string(),
            });
        }

        Ok(CoalesceConfig {
            grouping: self.grouping_builder.build()?,
            idle: self.idle_config,
            diagnostics: self.diagnostics_config,
        })
    }
}
