//! 诊断模块 (Diagnostics Module)
//!
//! 原型实现每 4 秒将所有打开的定时器组打印到控制台；这里的对应物是一组原子
//! 计数器加上可序列化的快照，由一个可选的后台任务周期性地以 JSON 形式通过
//! `tracing` 输出。
//! (The prototype dumps all open timer groups to the console every 4 seconds;
//! the counterpart here is a set of atomic counters plus serializable
//! snapshots, emitted periodically as JSON through `tracing` by an optional
//! background task)

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// 合并效果计数器 (Coalescing Effectiveness Counters)
///
/// 全部使用宽松原子操作；计数器只用于观测，不参与任何调度决策。
/// (All relaxed atomics; the counters are observational only and never feed
/// back into scheduling decisions)
#[derive(Debug, Default)]
pub struct DiagCounters {
    /// `schedule` 调用总数 (Total `schedule` calls)
    schedule_calls: AtomicU64,
    /// 透传到平台定时器的注册总数（每个新组一次）
    /// (Total registrations passed through to platform timers, one per new group)
    platform_registrations: AtomicU64,
    /// 加入既有组的请求总数 (Total requests that joined an existing group)
    coalesced: AtomicU64,
    /// 生效的取消总数 (Total effective cancellations)
    cancels: AtomicU64,
    /// 准入扫描中检查过的组总数 (Total groups examined by admission scans)
    groups_scanned: AtomicU64,
    /// 触发期间回调 panic 的总数 (Total callback panics during firings)
    callback_failures: AtomicU64,
}

impl DiagCounters {
    #[inline]
    pub(crate) fn record_schedule_call(&self) {
        self.schedule_calls.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_platform_registration(&self) {
        self.platform_registrations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_cancel(&self) {
        self.cancels.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_groups_scanned(&self, scanned: u64) {
        self.groups_scanned.fetch_add(scanned, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_callback_failure(&self) {
        self.callback_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// 读取当前计数器值 (Read the current counter values)
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            schedule_calls: self.schedule_calls.load(Ordering::Relaxed),
            platform_registrations: self.platform_registrations.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            cancels: self.cancels.load(Ordering::Relaxed),
            groups_scanned: self.groups_scanned.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
        }
    }
}

/// 计数器快照 (Counter Snapshot)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub schedule_calls: u64,
    pub platform_registrations: u64,
    pub coalesced: u64,
    pub cancels: u64,
    pub groups_scanned: u64,
    pub callback_failures: u64,
}

impl CounterSnapshot {
    /// 透传率：平台注册数 / schedule 调用数，越低说明合并效果越好
    /// (Pass-through rate: platform registrations / schedule calls; lower means
    /// better coalescing)
    pub fn pass_through_rate(&self) -> f64 {
        if self.schedule_calls == 0 {
            return 0.0;
        }
        self.platform_registrations as f64 / self.schedule_calls as f64
    }
}

/// 单个打开的延迟组的快照 (Snapshot of a single open delay group)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DelayGroupSnapshot {
    /// 组标识符（即底层平台定时器 id）
    /// (Group identifier, which is the underlying platform timer id)
    pub group: u64,
    /// 距目标触发时刻的毫秒数，已过期为负
    /// (Milliseconds until the target fire time, negative when overdue)
    pub fires_in_ms: i64,
    /// 槽位总数，含已取消的空槽 (Total slots, cancelled null slots included)
    pub slots: usize,
    /// 存活槽位数 (Live slots)
    pub live: usize,
}

/// 整个调度器的可序列化快照 (Serializable snapshot of the whole scheduler)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoalesceSnapshot {
    pub counters: CounterSnapshot,
    pub delay_groups: Vec<DelayGroupSnapshot>,
}

impl CoalesceSnapshot {
    /// 通过 `tracing` 以 JSON 形式输出快照
    /// (Emit the snapshot as JSON through `tracing`)
    pub(crate) fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(json) => tracing::debug!(target: "kestrel_coalesce::diag", snapshot = %json),
            Err(error) => tracing::warn!(target: "kestrel_coalesce::diag", %error, "failed to serialize diagnostics snapshot"),
        }
    }
}
