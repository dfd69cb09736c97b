//! 延迟组存储模块 (Delay Group Store Module)
//!
//! 延迟合并器的核心：目标触发时刻相近的延迟请求共享一个底层平台定时器。
//! 相似度判定使用对称的、尺度不变的比率
//! `(offset + delay) / |offset + (group_target - now)|`，落在配置的边界内即
//! 加入既有组；偏移量避免了零延迟请求附近的除法不稳定。这是在触发精度和
//! 合并率之间的启发式权衡，不提供更强的保证。
//! (The heart of the delay coalescer: delay requests with similar target fire
//! times share one underlying platform timer. The similarity test uses the
//! symmetric, scale-invariant ratio
//! `(offset + delay) / |offset + (group_target - now)|`; a value inside the
//! configured bounds joins an existing group. The offset avoids division
//! instability near zero-delay requests. This is a heuristic trade-off between
//! firing-time fidelity and coalescing rate; no stronger guarantee is made)

use crate::callback::{run_isolated, CallbackWrapper};
use crate::clock::{PlatformClock, PlatformTimerId, TimerFire};
use crate::config::GroupingConfig;
use crate::diag::{DelayGroupSnapshot, DiagCounters};
use crate::handle::{HandleCodec, ScheduleHandle};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 槽位序列。大多数组只容纳 0-4 个回调，内联存储避免堆分配。
/// (Slot sequence. Most groups hold 0-4 callbacks; inline storage avoids heap
/// allocation)
pub(crate) type SlotVec = SmallVec<[Option<CallbackWrapper>; 4]>;

/// 一个共享底层定时器的回调组
/// (A group of callbacks sharing one underlying timer)
///
/// 不变式：`live` 等于非空槽位数；`platform_id` 从创建到组销毁为止有效。
/// (Invariants: `live` equals the count of non-null slots; `platform_id` is
/// valid from creation until the group is destroyed)
struct DelayGroup {
    /// 组的目标触发时刻 (The group's target fire time)
    target: Instant,
    /// 槽位按插入顺序排列；取消只置空，从不移除，保持索引稳定
    /// (Slots in insertion order; cancellation nulls, never removes, keeping
    /// indices stable)
    slots: SlotVec,
    live: usize,
    platform_id: PlatformTimerId,
}

/// 延迟组存储 (Delay Group Store)
///
/// 从底层定时器 id 到组记录的映射，加上分组准入策略和组生命周期管理。
/// (Mapping from underlying timer id to group record, plus the grouping
/// admission policy and group lifecycle)
#[derive(Clone)]
pub(crate) struct DelayGroupStore {
    clock: Arc<dyn PlatformClock>,
    config: GroupingConfig,
    codec: HandleCodec,
    counters: Arc<DiagCounters>,
    groups: Arc<Mutex<FxHashMap<u64, DelayGroup>>>,
}

impl DelayGroupStore {
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

    /// 调度一个延迟回调，返回可用于取消的句柄
    /// (Schedule a delayed callback, returning a handle usable for cancellation)
    ///
    /// 扫描所有待触发的组；找到足够接近且未满的组则追加为新槽位（不注册新的
    /// 平台定时器），否则创建新组并注册一个平台定时器，其 id 即组标识符。
    /// (Scans all pending groups; a close-enough, non-full group gets the
    /// callback appended as a new slot with no new platform timer, otherwise a
    /// new group is created and one platform timer registered, its id serving
    /// as the group identifier)
    pub(crate) fn schedule(&self, callback: CallbackWrapper, delay: Duration) -> ScheduleHandle {
        self.counters.record_schedule_call();

        let now = self.clock.now();
        let delay_ms = delay.as_millis() as f64;
        let offset_ms = self.config.ratio_offset_ms as f64;

        let mut groups = self.groups.lock();

        let mut scanned = 0u64;
        let mut joined = None;
        for (&group_id, group) in groups.iter() {
            scanned += 1;
            // 已满的组停止接纳，槽位索引因此永远不会溢出编码区间
            // (A full group stops admitting, so slot indices never overflow the
            // encoded range)
            if group.slots.len() as u64 >= self.codec.capacity() {
                continue;
            }
            let group_left_ms = signed_millis_between(group.target, now);
            let ratio = (offset_ms + delay_ms) / (offset_ms + group_left_ms).abs();
            if ratio > self.config.delay_ratio_lower && ratio < self.config.delay_ratio_upper {
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
                tracing::trace!(group = group_id, slot, "joined existing delay group");
                return self.codec.encode(group_id, slot);
            }
        }

        // 新组：触发闭包通过 id 单元格找到自己的组；在持有存储锁的情况下注册
        // 定时器，使零延迟触发也必须等到组插入完成
        // (New group: the fire closure finds its own group through the id cell;
        // the timer is registered while the store lock is held, so even a
        // zero-delay fire must wait for the group insert to complete)
        let id_cell = Arc::new(AtomicU64::new(0));
        let fire = self.group_fire(Arc::clone(&id_cell));
        let platform_id = self.clock.start_timer(delay, fire);
        id_cell.store(platform_id.as_u64(), Ordering::Release);

        let mut slots = SlotVec::new();
        slots.push(Some(callback));
        groups.insert(
            platform_id.as_u64(),
            DelayGroup {
                target: now + delay,
                slots,
                live: 1,
                platform_id,
            },
        );
        self.counters.record_platform_registration();
        tracing::trace!(group = platform_id.as_u64(), delay_ms, "created delay group");

        self.codec.encode(platform_id.as_u64(), 0)
    }

    /// 取消一个槽位 (Cancel one slot)
    ///
    /// 对过期句柄（组已消失、槽位越界、槽位已空）静默无操作并返回 false；
    /// 组的存活计数归零时取消底层平台定时器并提前销毁组。
    /// (Silently no-ops, returning false, on stale handles — group gone, slot
    /// out of range, slot already null. When the group's live count reaches
    /// zero the underlying platform timer is cancelled and the group destroyed
    /// early)
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
            self.clock.cancel_timer(platform_id);
            tracing::trace!(group = group_id, "delay group emptied by cancellation");
        }
        true
    }

    /// 当前打开的组数量 (Number of currently open groups)
    pub(crate) fn open_groups(&self) -> usize {
        self.groups.lock().len()
    }

    /// 所有打开的组的可序列化快照，按组 id 排序
    /// (Serializable snapshot of all open groups, ordered by group id)
    pub(crate) fn snapshot(&self) -> Vec<DelayGroupSnapshot> {
        let now = self.clock.now();
        let groups = self.groups.lock();
        let mut snapshots: Vec<DelayGroupSnapshot> = groups
            .iter()
            .map(|(&group_id, group)| DelayGroupSnapshot {
                group: group_id,
                fires_in_ms: signed_millis_between(group.target, now) as i64,
                slots: group.slots.len(),
                live: group.live,
            })
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.group);
        snapshots
    }

    /// 构造组的平台触发闭包 (Build the group's platform fire closure)
    ///
    /// 先从存储移除整个组，再按槽位升序执行所有非空回调：触发期间重入的
    /// schedule 调用只会观察到一致的存储（该组已不存在）。可观测的推论：
    /// 回调在同一次触发中取消兄弟句柄是无操作（返回 false），该兄弟回调
    /// 仍会执行——槽位在移除时已捕获，不再被置空。
    /// (Removes the whole group from the store first, then runs every non-null
    /// callback in ascending slot order: reentrant schedule calls during the
    /// firing observe a consistent store with this group already gone. An
    /// observable corollary: a callback cancelling a sibling handle within the
    /// same firing is a no-op, returning false, and that sibling still runs,
    /// because the slots were captured at removal and can no longer be nulled)
    fn group_fire(&self, id_cell: Arc<AtomicU64>) -> TimerFire {
        let groups = Arc::clone(&self.groups);
        let counters = Arc::clone(&self.counters);
        Box::new(move || {
            Box::pin(async move {
                // id 在 schedule 持有存储锁期间写入；必须先取锁再读 id，
                // 取锁才能保证读到注册后的值
                // (The id is stored while schedule holds the store lock; the
                // lock must be taken before the id is read, since only the
                // lock acquisition guarantees the post-registration value is
                // seen)
                let (group_id, group) = {
                    let mut groups = groups.lock();
                    let group_id = id_cell.load(Ordering::Acquire);
                    (group_id, groups.remove(&group_id))
                };
                let Some(group) = group else {
                    return;
                };
                tracing::trace!(group = group_id, live = group.live, "delay group firing");
                for callback in group.slots.into_iter().flatten() {
                    if !run_isolated(&callback).await {
                        counters.record_callback_failure();
                    }
                }
            })
        })
    }
}

/// 有符号的毫秒距离，`target` 已过期时为负
/// (Signed millisecond distance, negative when `target` has passed)
fn signed_millis_between(target: Instant, now: Instant) -> f64 {
    match target.checked_duration_since(now) {
        Some(until) => until.as_millis() as f64,
        None => -(now.duration_since(target).as_millis() as f64),
    }
}
