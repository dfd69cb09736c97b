//! 句柄编码模块 (Handle Encoding Module)
//!
//! 一个整数句柄同时标识共享组和调用者在组内的槽位：
//! `handle = group_id * capacity + slot`。
//! (One integer handle identifies both the shared group and the caller's slot
//! within it: `handle = group_id * capacity + slot`)
//!
//! 编码的正确性依赖于任何组的槽位序列都不超过 `capacity`；准入策略在
//! `group.rs` / `interval.rs` 中强制保证这一点。
//! (Correctness of the encoding relies on no group's slot sequence ever
//! exceeding `capacity`; the admission policy in `group.rs` / `interval.rs`
//! enforces this)

/// Opaque handle for a coalesced delayed or interval callback
///
/// 合并的延迟或周期回调的不透明句柄
///
/// Stable from creation until the callback fires or is cancelled; never
/// collides with a handle produced for a different live slot.
///
/// 从创建到触发或取消为止保持稳定；永远不会与其他存活槽位的句柄冲突。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleHandle(pub(crate) u64);

impl ScheduleHandle {
    /// Get the numeric value of the handle
    ///
    /// 获取句柄的数值
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Reconstruct a handle from its numeric value
    ///
    /// 从数值重建句柄
    #[inline]
    pub fn from_u64(raw: u64) -> Self {
        ScheduleHandle(raw)
    }
}

/// Opaque handle for an idle callback
///
/// 空闲回调的不透明句柄
///
/// Idle handles are a bare monotonic counter (no group/slot packing) because
/// the idle store only ever has one open batch.
///
/// 空闲句柄是单纯的单调计数器（没有组/槽位打包），因为空闲存储同一时刻
/// 只有一个打开的批次。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdleHandle(pub(crate) u64);

impl IdleHandle {
    /// Get the numeric value of the handle
    ///
    /// 获取句柄的数值
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Reconstruct a handle from its numeric value
    ///
    /// 从数值重建句柄
    #[inline]
    pub fn from_u64(raw: u64) -> Self {
        IdleHandle(raw)
    }
}

/// Pure integer codec between a caller-visible handle and (group, slot)
///
/// 调用者可见句柄与（组，槽位）之间的纯整数编解码器
#[derive(Debug, Clone, Copy)]
pub(crate) struct HandleCodec {
    capacity: u64,
}

impl HandleCodec {
    /// Capacity must be validated (> 0) by the config builder before this is constructed.
    #[inline]
    pub(crate) fn new(capacity: u64) -> Self {
        debug_assert!(capacity > 0);
        Self { capacity }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> u64 {
        self.capacity
    }

    /// 编码（组标识，槽位索引）为句柄 (Encode (group identifier, slot index) into a handle)
    #[inline]
    pub(crate) fn encode(&self, group_id: u64, slot: usize) -> ScheduleHandle {
        debug_assert!((slot as u64) < self.capacity);
        ScheduleHandle(group_id * self.capacity + slot as u64)
    }

    /// 解码句柄为（组标识，槽位索引）(Decode a handle into (group identifier, slot index))
    #[inline]
    pub(crate) fn decode(&self, handle: ScheduleHandle) -> (u64, usize) {
        (handle.0 / self.capacity, (handle.0 % self.capacity) as usize)
    }
}
