//! 周期组存储模块 (Interval Group Store Module)
//!
//! 与延迟组相同的模式，但相似度判定使用周期时长的比例
//! `existing_period / new_period`，且平台周期定时器每个周期都会重新触发所有
//! 存活槽位——组不会在一次触发后自毁。
//! (Same pattern as delay groups, but the similarity test is the proportional
//! period ratio `existing_period / new_period`, and the platform interval
//! re-fires every live slot each period — the group does not destroy itself
//! after one firing)
//!
//! 注意：加入组的请求采用组的周期而不是自己请求的周期，相位也与组对齐；
//! 这是合并换来的精度损失的一部分。
//! (Note: a joining request adopts the group's period rather than its own, and
//! its phase aligns with the group's. This is part of the precision given up
//! for coalescing)

use crate::callback::{run_isolated, CallbackWrapper};
use crate::clock::{IntervalFire, PlatformClock, PlatformTimerId};
use crate::config::GroupingConfig;
use crate::diag::DiagCounters;
use crate::group::SlotVec;
use crate::handle::{HandleCodec, ScheduleHandle};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 最小周期。零周期的平台周期定时器永不推进时间，只会空转。
/// (Minimum period. A zero-period platform interval never advances time and
/// only spins)
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// 一个共享底层周期定时器的回调组
/// (A group of callbacks sharing one underlying interval timer)
struct IntervalGroup {
    period: Duration,
    slots: SlotVec,
    live: usize,
    platform_id: PlatformTimerId,
}

/// 周期组存储 (Interval Group Store)
#[derive(Clone)]
pub(crate) struct IntervalGroupStore {
    clock: Arc<dyn PlatformClock>,
    config: GroupingConfig,
    codec: HandleCodec,
    counters: Arc<DiagCounters>,
    groups: Arc<Mutex<FxHashMap<u64, IntervalGroup>>>,
}

impl IntervalGroupStore {
    pub(crate) fn new(
        clock: Arc<dyn PlatformClock>,
        config: GroupingConfig,
        counters: Arc<DiagCounters>,
    ) -> Self {
        let codec = HandleCodec::new(config.group_capacity);
        Self {
            clock,
            config,
            codec,
            counters,
            groups: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }

    /// 调度一个周期回调 (Schedule a repeating callback)
    ///
    /// 周期与某个既有组足够成比例（且该组未满）时共享其平台周期定时器，
    /// 否则创建新组。周期钳制到 [`MIN_PERIOD`]，与平台 setInterval 对零周期
    /// 的钳制一致。
    /// (Shares an existing group's platform interval when the period is
    /// proportional enough to it and the group is not full, otherwise creates
    /// a new group. The period is clamped to [`MIN_PERIOD`], matching platform
    /// setInterval clamping of zero periods)
    pub(crate) fn schedule(&self, callback: CallbackWrapper, period: Duration) -> ScheduleHandle {
        self.counters.record_schedule_call();

        let period = period.max(MIN_PERIOD);
        let period_ms = period.as_millis() as f64;
        let mut groups = self.groups.lock();

        let mut scanned = 0u64;
        let mut joined = None;
        for (&group_id, group) in groups.iter() {
            scanned += 1;
            if group.slots.len() as u64 >= self.codec.capacity() {
                continue;
            }
            let ratio = group.period.as_millis() as f64 / period_ms;
            if ratio > self.config.interval_ratio_lower && ratio < self.config.interval_ratio_upper
            {
                joined = Some(group_id);
                break;
            }
        }
        self.counters.record_groups_scanned(scanned);

        if let Some(group_id) = joined {
            if let Some(group) = groups.get_mut(&group_id) {
                let slot = group.slots.len();
                group.slots.push(Some(callback));
                group.live += 1;
                self.counters.record_coalesced();
                tracing::trace!(group = group_id, slot, "joined existing interval group");
                return self.codec.encode(group_id, slot);
            }
        }

        let id_cell = Arc::new(AtomicU64::new(0));
        let fire = self.group_fire(Arc::clone(&id_cell));
        let platform_id = self.clock.start_interval(period, fire);
        id_cell.store(platform_id.as_u64(), Ordering::Release);

        let mut slots = SlotVec::new();
        slots.push(Some(callback));
        groups.insert(
            platform_id.as_u64(),
            IntervalGroup {
                period,
                slots,
                live: 1,
                platform_id,
            },
        );
        self.counters.record_platform_registration();
        tracing::trace!(
            group = platform_id.as_u64(),
            period_ms = period.as_millis() as u64,
            "created interval group"
        );

        self.codec.encode(platform_id.as_u64(), 0)
    }

    /// 取消一个槽位；存活计数归零时取消底层平台周期定时器并移除组
    /// (Cancel one slot; at zero live count the underlying platform interval is
    /// cancelled and the group removed)
    pub(crate) fn cancel(&self, handle: ScheduleHandle) -> bool {
        let (group_id, slot) = self.codec.decode(handle);

        let emptied = {
            let mut groups = self.groups.lock();
            let Some(group) = groups.get_mut(&group_id) else {
                return false;
            };
            match group.slots.get_mut(slot) {
                Some(entry) if entry.is_some() => *entry = None,
                _ => return false,
            }
            group.live -= 1;
            self.counters.record_cancel();

            if group.live == 0 {
                let platform_id = group.platform_id;
                groups.remove(&group_id);
                Some(platform_id)
            } else {
                None
            }
        };

        if let Some(platform_id) = emptied {
            self.clock.cancel_interval(platform_id);
            tracing::trace!(group = group_id, "interval group emptied by cancellation");
        }
        true
    }

    /// 当前打开的周期组数量 (Number of currently open interval groups)
    pub(crate) fn open_groups(&self) -> usize {
        self.groups.lock().len()
    }

    /// 构造组的平台触发闭包 (Build the group's platform fire closure)
    ///
    /// 每次触发在持锁时克隆存活回调的快照，然后在锁外按槽位顺序执行——
    /// 触发不销毁组。一次触发执行了多个回调时发出诊断事件。
    /// (Each fire clones a snapshot of the live callbacks under the lock, then
    /// runs them in slot order outside it — firing does not destroy the group.
    /// A diagnostic event is emitted when more than one callback ran in a
    /// single fire)
    fn group_fire(&self, id_cell: Arc<AtomicU64>) -> IntervalFire {
        let groups = Arc::clone(&self.groups);
        let counters = Arc::clone(&self.counters);
        Box::new(move || {
            let groups = Arc::clone(&groups);
            let counters = Arc::clone(&counters);
            let id_cell = Arc::clone(&id_cell);
            Box::pin(async move {
                // 与延迟组相同：先取锁再读 id，保证读到注册后的值
                // (Same as delay groups: take the lock before reading the id so
                // the post-registration value is seen)
                let (group_id, callbacks) = {
                    let groups = groups.lock();
                    let group_id = id_cell.load(Ordering::Acquire);
                    let callbacks: SmallVec<[CallbackWrapper; 4]> = match groups.get(&group_id) {
                        Some(group) => group.slots.iter().flatten().cloned().collect(),
                        None => return,
                    };
                    (group_id, callbacks)
                };

                let batched = callbacks.len();
                for callback in callbacks {
                    if !run_isolated(&callback).await {
                        counters.record_callback_failure();
                    }
                }
                if batched > 1 {
                    tracing::debug!(
                        target: "kestrel_coalesce::diag",
                        group = group_id,
                        batched,
                        "batched interval callbacks into one fire"
                    );
                }
            })
        })
    }
}
