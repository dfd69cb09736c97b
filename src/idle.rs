//! 空闲批处理存储模块 (Idle-Batch Store Module)
//!
//! 空闲回调没有目标时刻，因此准入是无条件的：所有请求都进入唯一打开的批次，
//! 整个批次共享一个底层平台空闲注册。句柄是跨批次单调递增的计数器，
//! 永不复用。
//! (Idle callbacks have no target time, so admission is unconditional: every
//! request lands in the single open batch, and the whole batch shares one
//! underlying platform idle registration. Handles are a counter that increases
//! monotonically across batches and is never reused)

use crate::callback::{run_isolated, CallbackWrapper};
use crate::clock::{IdleFire, PlatformClock, PlatformIdleId};
use crate::config::IdleConfig;
use crate::diag::DiagCounters;
use crate::handle::IdleHandle;
use parking_lot::Mutex;
use std::sync::Arc;

/// 唯一打开的空闲批次 (The single open idle batch)
///
/// 不变式：`live` 等于非空槽位数；`start_offset` 累计所有已触发批次的长度，
/// 保证句柄全局唯一。
/// (Invariants: `live` equals the count of non-null slots; `start_offset`
/// accumulates the lengths of all previously flushed batches, keeping handles
/// globally unique)
struct IdleBatch {
    pending: Vec<Option<CallbackWrapper>>,
    live: usize,
    start_offset: u64,
    platform_id: Option<PlatformIdleId>,
}

/// 空闲批处理存储 (Idle-Batch Store)
#[derive(Clone)]
pub(crate) struct IdleBatchStore {
    clock: Arc<dyn PlatformClock>,
    counters: Arc<DiagCounters>,
    config: IdleConfig,
    batch: Arc<Mutex<IdleBatch>>,
}

impl IdleBatchStore {
    pub(crate) fn new(
        clock: Arc<dyn PlatformClock>,
        config: IdleConfig,
        counters: Arc<DiagCounters>,
    ) -> Self {
        Self {
            clock,
            counters,
            config,
            batch: Arc::new(Mutex::new(IdleBatch {
                pending: Vec::new(),
                live: 0,
                start_offset: 0,
                platform_id: None,
            })),
        }
    }

    /// 注册一个空闲回调，返回跨批次严格递增的句柄
    /// (Register an idle callback, returning a handle that is strictly
    /// increasing across batches)
    ///
    /// 如果当前没有未触发的平台空闲注册则注册一个；同一批次的后续请求只是
    /// 追加槽位。
    /// (Registers a platform idle callback if none is outstanding; further
    /// requests in the same batch only append slots)
    pub(crate) fn request_idle(&self, callback: CallbackWrapper) -> IdleHandle {
        let mut batch = self.batch.lock();

        let handle = IdleHandle(batch.start_offset + batch.pending.len() as u64);
        batch.pending.push(Some(callback));
        batch.live += 1;

        if batch.platform_id.is_none() {
            let fire = self.batch_fire();
            // 注册在持锁状态下进行：触发闭包需要先拿到批次锁，因此不可能在
            // platform_id 写入之前执行
            // (Registration happens under the lock: the fire closure must take
            // the batch lock first, so it cannot run before platform_id is set)
            let platform_id = self.clock.request_idle(fire);
            batch.platform_id = Some(platform_id);
            tracing::trace!(handle = handle.as_u64(), "opened new idle batch");
        }

        handle
    }

    /// 取消一个空闲回调 (Cancel an idle callback)
    ///
    /// 批次已触发或句柄过期时静默无操作并返回 false。存活计数归零时的行为由
    /// `IdleConfig::cancel_platform_when_empty` 决定：取消底层注册，或让它在
    /// 空批次上无害地触发（默认）。
    /// (Silently no-ops, returning false, when the batch already fired or the
    /// handle is stale. Behavior at zero live count is decided by
    /// `IdleConfig::cancel_platform_when_empty`: cancel the underlying
    /// registration, or let it fire harmlessly on the empty batch — the
    /// default)
    pub(crate) fn cancel_idle(&self, handle: IdleHandle) -> bool {
        let cancelled_registration = {
            let mut batch = self.batch.lock();

            let Some(index) = handle.0.checked_sub(batch.start_offset) else {
                return false;
            };
            let index = index as usize;
            match batch.pending.get_mut(index) {
                Some(entry) if entry.is_some() => *entry = None,
                _ => return false,
            }
            batch.live -= 1;
            self.counters.record_cancel();

            if batch.live == 0 && self.config.cancel_platform_when_empty {
                batch.platform_id.take()
            } else {
                None
            }
        };

        if let Some(platform_id) = cancelled_registration {
            self.clock.cancel_idle(platform_id);
            tracing::trace!("cancelled platform idle registration for emptied batch");
        }
        true
    }

    /// 当前批次中的存活回调数量 (Live callbacks in the current batch)
    pub(crate) fn live_count(&self) -> usize {
        self.batch.lock().live
    }

    /// 构造批次的平台触发闭包 (Build the batch's platform fire closure)
    ///
    /// 捕获-交换-执行：持锁时取出整个批次、推进偏移量并换入空批次，然后在
    /// 锁外按顺序执行捕获的回调。执行中的回调再调用 `request_idle` 会落入
    /// 新批次，而不是正在执行的这个（重入安全）。
    /// (Capture-then-swap-then-run: under the lock the whole batch is taken,
    /// the offset advanced, and a fresh empty batch swapped in; only then are
    /// the captured callbacks run in order, outside the lock. A running
    /// callback calling `request_idle` lands in the new batch, not the one
    /// currently executing — reentrancy safe)
    fn batch_fire(&self) -> IdleFire {
        let shared = Arc::clone(&self.batch);
        let counters = Arc::clone(&self.counters);
        Box::new(move || {
            Box::pin(async move {
                let captured = {
                    let mut batch = shared.lock();
                    batch.platform_id = None;
                    let captured = std::mem::take(&mut batch.pending);
                    batch.start_offset += captured.len() as u64;
                    batch.live = 0;
                    captured
                };
                tracing::trace!(captured = captured.len(), "idle batch firing");
                for callback in captured.into_iter().flatten() {
                    if !run_isolated(&callback).await {
                        counters.record_callback_failure();
                    }
                }
            })
        })
    }
}
