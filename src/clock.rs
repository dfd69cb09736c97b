//! 平台时钟模块 (Platform Clock Module)
//!
//! 原型实现直接替换宿主环境的原生定时器原语；这里将底层平台定时器抽象为
//! 一个显式的能力特性 `PlatformClock`：生产代码接入真实的 tokio 定时器
//! （`TokioClock`），测试接入确定性的手动时钟（`ManualClock`）。
//! (The prototype monkey-patches the host's native timer primitives; here the
//! underlying platform timer is an explicit capability trait `PlatformClock`:
//! production wires in real tokio timers (`TokioClock`), tests wire in a
//! deterministic manual clock (`ManualClock`))
//!
//! 实现必须保证：定时器不会早于请求的延迟触发，一次性定时器恰好触发一次，
//! 周期定时器每个周期触发一次；id 在时钟实例内唯一且单调分配；对已触发或
//! 未知 id 的取消是无操作。
//! (Implementations must guarantee: timers never fire earlier than the
//! requested delay, one-shot timers fire exactly once, intervals fire once per
//! period; ids are unique per clock instance and monotonically allocated;
//! cancelling a fired or unknown id is a no-op)

use futures::future::BoxFuture;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// One-shot fire callback handed to the platform clock
///
/// 交给平台时钟的一次性触发回调
pub type TimerFire = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send + 'static>;

/// Idle fire callback, same shape as a one-shot fire
///
/// 空闲触发回调，与一次性触发形状相同
pub type IdleFire = TimerFire;

/// Repeating fire callback for intervals
///
/// 周期定时器的重复触发回调
pub type IntervalFire = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static>;

/// Identifier of an underlying platform timer registration
///
/// 底层平台定时器注册的标识符
///
/// The delay and interval stores reuse this id as the group identifier, so it
/// also forms the upper half of every encoded schedule handle.
///
/// 延迟和周期存储复用该 id 作为组标识符，因此它也构成每个调度句柄编码的高位部分。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlatformTimerId(pub(crate) u64);

impl PlatformTimerId {
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Identifier of an underlying platform idle registration
///
/// 底层平台空闲注册的标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlatformIdleId(pub(crate) u64);

impl PlatformIdleId {
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// 平台时钟能力 (Platform Clock Capability)
///
/// 合并调度器唯一的时间来源和挂起/恢复边界。
/// (The coalescer's only source of time and its only suspension/resumption boundary)
pub trait PlatformClock: Send + Sync + 'static {
    /// 当前时刻 (Current instant)
    fn now(&self) -> Instant;

    /// 注册一次性定时器，`fire` 在不早于 `delay` 之后被调用一次
    /// (Register a one-shot timer; `fire` is invoked once, no earlier than `delay`)
    fn start_timer(&self, delay: Duration, fire: TimerFire) -> PlatformTimerId;

    /// 取消一次性定时器，对已触发或未知 id 无操作
    /// (Cancel a one-shot timer; no-op for fired or unknown ids)
    fn cancel_timer(&self, id: PlatformTimerId);

    /// 注册周期定时器，`fire` 每个周期被调用一次
    /// (Register a repeating timer; `fire` is invoked once per period)
    fn start_interval(&self, period: Duration, fire: IntervalFire) -> PlatformTimerId;

    /// 取消周期定时器 (Cancel a repeating timer)
    fn cancel_interval(&self, id: PlatformTimerId);

    /// 注册空闲回调 (Register an idle callback)
    fn request_idle(&self, fire: IdleFire) -> PlatformIdleId;

    /// 取消空闲回调，对已触发或未知 id 无操作
    /// (Cancel an idle callback; no-op for fired or unknown ids)
    fn cancel_idle(&self, id: PlatformIdleId);
}

/// 基于 tokio 的生产时钟 (Production clock backed by tokio)
///
/// 每个注册对应一个独立的 tokio 任务：一次性定时器 sleep 后触发并自清理；
/// 周期定时器循环 sleep/触发直到被取消；空闲回调在让出执行权后尽力触发。
/// (One spawned tokio task per registration: one-shot timers sleep, fire, and
/// clean themselves up; intervals loop sleep/fire until cancelled; idle
/// callbacks fire best-effort after yielding)
pub struct TokioClock {
    inner: Arc<TokioClockInner>,
}

struct TokioClockInner {
    next_id: AtomicU64,
    timers: Mutex<FxHashMap<u64, JoinHandle<()>>>,
    idles: Mutex<FxHashMap<u64, JoinHandle<()>>>,
}

impl TokioClock {
    /// 创建新的 tokio 时钟（必须在 tokio 运行时内使用）
    /// (Create a new tokio clock, must be used inside a tokio runtime)
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokioClockInner {
                next_id: AtomicU64::new(1),
                timers: Mutex::new(FxHashMap::default()),
                idles: Mutex::new(FxHashMap::default()),
            }),
        }
    }

    /// 当前未触发的定时器注册数量（含周期定时器）
    /// (Number of outstanding timer registrations, intervals included)
    pub fn active_timers(&self) -> usize {
        self.inner.timers.lock().len()
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformClock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn start_timer(&self, delay: Duration, fire: TimerFire) -> PlatformTimerId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);

        // 先持有映射锁再 spawn，确保任务的自清理在插入之后执行
        // (Hold the map lock across the spawn so the task's self-removal runs after the insert)
        let mut timers = self.inner.timers.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire().await;
            inner.timers.lock().remove(&id);
        });
        timers.insert(id, handle);

        PlatformTimerId(id)
    }

    fn cancel_timer(&self, id: PlatformTimerId) {
        if let Some(handle) = self.inner.timers.lock().remove(&id.0) {
            handle.abort();
        }
    }

    fn start_interval(&self, period: Duration, fire: IntervalFire) -> PlatformTimerId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut timers = self.inner.timers.lock();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                fire().await;
            }
        });
        timers.insert(id, handle);

        PlatformTimerId(id)
    }

    fn cancel_interval(&self, id: PlatformTimerId) {
        self.cancel_timer(id);
    }

    fn request_idle(&self, fire: IdleFire) -> PlatformIdleId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);

        let mut idles = self.inner.idles.lock();
        let handle = tokio::spawn(async move {
            // 尽力而为的空闲语义：让出执行权，待执行器处理完当前就绪任务后触发
            // (Best-effort idle semantics: yield, fire after the executor has
            // drained its currently ready tasks)
            tokio::task::yield_now().await;
            fire().await;
            inner.idles.lock().remove(&id);
        });
        idles.insert(id, handle);

        PlatformIdleId(id)
    }

    fn cancel_idle(&self, id: PlatformIdleId) {
        if let Some(handle) = self.inner.idles.lock().remove(&id.0) {
            handle.abort();
        }
    }
}

struct ManualOneShot {
    id: u64,
    deadline: Instant,
    fire: TimerFire,
}

struct ManualInterval {
    id: u64,
    next_at: Instant,
    period: Duration,
    fire: Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>,
}

struct ManualState {
    now: Instant,
    next_id: u64,
    oneshots: Vec<ManualOneShot>,
    intervals: Vec<ManualInterval>,
    idles: Vec<(u64, IdleFire)>,
    timer_registrations: u64,
    idle_registrations: u64,
}

/// 确定性手动时钟 (Deterministic Manual Clock)
///
/// 虚拟时间从构造时刻开始，只有 `advance()` 会推进它并按截止时间顺序触发到期
/// 的定时器；`run_idle()` 排空当前的空闲队列。注册计数器让测试可以断言
/// "只注册了一个平台定时器"。
/// (Virtual time starts at construction and only `advance()` moves it,
/// firing due timers in deadline order; `run_idle()` drains the current idle
/// queue. Registration counters let tests assert "only one platform timer was
/// registered")
///
/// # Examples (示例)
///
/// ```no_run
/// use kestrel_coalesce::clock::ManualClock;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let clock = Arc::new(ManualClock::new());
/// clock.advance(Duration::from_millis(100)).await;
/// assert_eq!(clock.active_timers(), 0);
/// # }
/// ```
pub struct ManualClock {
    inner: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualState {
                now: Instant::now(),
                next_id: 1,
                oneshots: Vec::new(),
                intervals: Vec::new(),
                idles: Vec::new(),
                timer_registrations: 0,
                idle_registrations: 0,
            })),
        }
    }

    /// 推进虚拟时间，按截止时间顺序触发所有到期的一次性和周期定时器
    /// (Advance virtual time, firing all due one-shot and interval timers in
    /// deadline order)
    ///
    /// 触发回调在锁外执行，因此回调可以重入地调用回时钟或存储。
    /// (Fire callbacks run outside the lock, so they may reentrantly call back
    /// into the clock or the stores)
    pub async fn advance(&self, step: Duration) {
        let target = self.inner.lock().now + step;

        loop {
            let due = {
                let mut state = self.inner.lock();

                let mut best: Option<(Instant, usize, bool)> = None;
                for (index, timer) in state.oneshots.iter().enumerate() {
                    if timer.deadline <= target
                        && best.map_or(true, |(when, _, _)| timer.deadline < when)
                    {
                        best = Some((timer.deadline, index, false));
                    }
                }
                for (index, interval) in state.intervals.iter().enumerate() {
                    if interval.next_at <= target
                        && best.map_or(true, |(when, _, _)| interval.next_at < when)
                    {
                        best = Some((interval.next_at, index, true));
                    }
                }

                match best {
                    Some((when, index, true)) => {
                        state.now = when;
                        let period = state.intervals[index].period;
                        state.intervals[index].next_at = when + period;
                        DueFire::Interval(Arc::clone(&state.intervals[index].fire))
                    }
                    Some((when, index, false)) => {
                        state.now = when;
                        let timer = state.oneshots.remove(index);
                        DueFire::OneShot(timer.fire)
                    }
                    None => DueFire::None,
                }
            };

            match due {
                DueFire::OneShot(fire) => fire().await,
                DueFire::Interval(fire) => fire().await,
                DueFire::None => break,
            }
        }

        self.inner.lock().now = target;
    }

    /// 排空并执行当前排队的空闲回调
    /// (Drain and run the currently queued idle callbacks)
    ///
    /// 回调执行期间新注册的空闲回调会排队到下一次 `run_idle()`。
    /// (Idle callbacks registered while running are queued for the next `run_idle()`)
    pub async fn run_idle(&self) {
        let drained: Vec<IdleFire> = {
            let mut state = self.inner.lock();
            state.idles.drain(..).map(|(_, fire)| fire).collect()
        };
        for fire in drained {
            fire().await;
        }
    }

    /// 未触发的一次性定时器数量 (Number of pending one-shot timers)
    pub fn active_timers(&self) -> usize {
        self.inner.lock().oneshots.len()
    }

    /// 活跃的周期定时器数量 (Number of active interval timers)
    pub fn active_intervals(&self) -> usize {
        self.inner.lock().intervals.len()
    }

    /// 排队中的空闲回调数量 (Number of queued idle callbacks)
    pub fn active_idles(&self) -> usize {
        self.inner.lock().idles.len()
    }

    /// 历史定时器注册总数，含周期定时器（单调递增）
    /// (Total timer registrations ever made, intervals included, monotonic)
    pub fn timer_registrations(&self) -> u64 {
        self.inner.lock().timer_registrations
    }

    /// 历史空闲注册总数（单调递增）
    /// (Total idle registrations ever made, monotonic)
    pub fn idle_registrations(&self) -> u64 {
        self.inner.lock().idle_registrations
    }
}

enum DueFire {
    OneShot(TimerFire),
    Interval(Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>),
    None,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformClock for ManualClock {
    fn now(&self) -> Instant {
        self.inner.lock().now
    }

    fn start_timer(&self, delay: Duration, fire: TimerFire) -> PlatformTimerId {
        let mut state = self.inner.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.timer_registrations += 1;
        let deadline = state.now + delay;
        state.oneshots.push(ManualOneShot { id, deadline, fire });
        PlatformTimerId(id)
    }

    fn cancel_timer(&self, id: PlatformTimerId) {
        self.inner.lock().oneshots.retain(|timer| timer.id != id.0);
    }

    fn start_interval(&self, period: Duration, fire: IntervalFire) -> PlatformTimerId {
        let mut state = self.inner.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.timer_registrations += 1;
        let next_at = state.now + period;
        state.intervals.push(ManualInterval {
            id,
            next_at,
            period,
            fire: Arc::from(fire),
        });
        PlatformTimerId(id)
    }

    fn cancel_interval(&self, id: PlatformTimerId) {
        self.inner.lock().intervals.retain(|interval| interval.id != id.0);
    }

    fn request_idle(&self, fire: IdleFire) -> PlatformIdleId {
        let mut state = self.inner.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.idle_registrations += 1;
        state.idles.push((id, fire));
        PlatformIdleId(id)
    }

    fn cancel_idle(&self, id: PlatformIdleId) {
        self.inner.lock().idles.retain(|(idle_id, _)| *idle_id != id.0);
    }
}
