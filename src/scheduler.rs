use crate::callback::CallbackWrapper;
use crate::clock::{PlatformClock, TokioClock};
use crate::config::CoalesceConfig;
use crate::diag::{CoalesceSnapshot, CounterSnapshot, DiagCounters};
use crate::group::DelayGroupStore;
use crate::handle::{IdleHandle, ScheduleHandle};
use crate::idle::IdleBatchStore;
use crate::interval::IntervalGroupStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// 定时器合并调度器 (Timer Coalescing Scheduler)
///
/// 延迟回调和空闲回调原语的直接替代品：把目标触发时刻相近的请求合并到共享
/// 的底层平台定时器上，在保留每个调用者"独立、可取消的延迟回调"假象的同时
/// 减少平台定时器注册数量。
/// (A drop-in replacement for delayed-callback and idle-callback primitives:
/// merges requests with similar target fire times onto shared underlying
/// platform timers, reducing platform timer registrations while preserving
/// each caller's illusion of an independent, cancellable delayed callback)
///
/// 三个存储（延迟组、空闲批次、周期组）是显式注入的状态对象，生命周期绑定到
/// 本实例——没有进程级全局量，测试可以注入确定性时钟独立运行。
/// (The three stores — delay groups, idle batch, interval groups — are
/// explicit injectable state owned by this instance. No process-wide globals;
/// tests inject a deterministic clock and run in isolation)
///
/// # 示例 (Examples)
/// ```no_run
/// use kestrel_coalesce::{TimerCoalescer, CallbackWrapper};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let scheduler = TimerCoalescer::with_defaults();
///
///     // 两个接近的延迟共享同一个底层定时器
///     // (Two close delays share one underlying timer)
///     let a = scheduler.schedule(
///         CallbackWrapper::new(|| async { println!("A fired"); }),
///         Duration::from_millis(100),
///     );
///     let _b = scheduler.schedule(
///         CallbackWrapper::new(|| async { println!("B fired"); }),
///         Duration::from_millis(110),
///     );
///
///     // 取消只影响对应的槽位
///     // (Cancellation only affects the corresponding slot)
///     scheduler.cancel_schedule(a);
///
///     tokio::time::sleep(Duration::from_millis(200)).await;
/// }
/// ```
pub struct TimerCoalescer {
    delay: DelayGroupStore,
    idle: IdleBatchStore,
    interval: IntervalGroupStore,
    counters: Arc<DiagCounters>,
    diag_handle: Option<JoinHandle<()>>,
}

impl TimerCoalescer {
    /// 创建新的合并调度器 (Create a new coalescing scheduler)
    ///
    /// # 参数 (Parameters)
    /// - `config`: 已验证的调度器配置
    ///      (Validated scheduler configuration)
    /// - `clock`: 平台时钟能力，生产使用 `TokioClock`，测试使用 `ManualClock`
    ///      (Platform clock capability: `TokioClock` in production,
    ///      `ManualClock` in tests)
    pub fn new(config: CoalesceConfig, clock: Arc<dyn PlatformClock>) -> Self {
        let counters = Arc::new(DiagCounters::default());
        let delay = DelayGroupStore::new(
            Arc::clone(&clock),
            config.grouping.clone(),
            Arc::clone(&counters),
        );
        let idle = IdleBatchStore::new(
            Arc::clone(&clock),
            config.idle.clone(),
            Arc::clone(&counters),
        );
        let interval = IntervalGroupStore::new(
            Arc::clone(&clock),
            config.grouping.clone(),
            Arc::clone(&counters),
        );

        // 可选的周期性诊断输出（纯观测，默认关闭）
        // (Optional periodic diagnostics emitter; observational only, disabled
        // by default)
        let diag_handle = if config.diagnostics.enabled {
            let delay = delay.clone();
            let counters = Arc::clone(&counters);
            let emit_interval = config.diagnostics.interval;
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(emit_interval);
                // interval 的第一个 tick 立即完成，跳过它
                // (An interval's first tick completes immediately; skip it)
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    CoalesceSnapshot {
                        counters: counters.snapshot(),
                        delay_groups: delay.snapshot(),
                    }
                    .emit();
                }
            }))
        } else {
            None
        };

        Self {
            delay,
            idle,
            interval,
            counters,
            diag_handle,
        }
    }

    /// 使用默认配置和真实 tokio 时钟创建调度器
    /// (Create a scheduler with default configuration and the real tokio clock)
    ///
    /// # Examples (示例)
    /// ```no_run
    /// use kestrel_coalesce::TimerCoalescer;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let scheduler = TimerCoalescer::with_defaults();
    /// }
    /// ```
    pub fn with_defaults() -> Self {
        Self::new(CoalesceConfig::default(), Arc::new(TokioClock::new()))
    }

    /// 调度一个延迟回调 (Schedule a delayed callback)
    ///
    /// # 返回 (Returns)
    /// 可解码为（组，槽位）的整数句柄；调度本身永不失败。
    /// (An integer handle decodable to (group, slot); scheduling itself never
    /// fails)
    ///
    /// # 限制 (Limitations)
    /// 不支持向回调传递额外参数；合并以触发精度换取更少的定时器，不保证
    /// 精确的毫秒级延迟语义。
    /// (Passing extra arguments to the callback is not supported; coalescing
    /// trades firing-time precision for fewer timers and makes no exact
    /// millisecond-delay guarantee)
    #[inline]
    pub fn schedule(&self, callback: CallbackWrapper, delay: Duration) -> ScheduleHandle {
        self.delay.schedule(callback, delay)
    }

    /// 取消一个延迟回调 (Cancel a delayed callback)
    ///
    /// # 返回 (Returns)
    /// 槽位存在且成功取消返回 true；过期句柄（已触发、已取消）静默忽略并
    /// 返回 false，从不报错。
    /// (true when the slot existed and was cancelled; stale handles — already
    /// fired or already cancelled — are silently ignored, returning false,
    /// never an error)
    #[inline]
    pub fn cancel_schedule(&self, handle: ScheduleHandle) -> bool {
        self.delay.cancel(handle)
    }

    /// 注册一个空闲回调 (Register an idle callback)
    ///
    /// 句柄跨批次严格递增，永不复用。
    /// (Handles are strictly increasing across batches and never reused)
    #[inline]
    pub fn request_idle(&self, callback: CallbackWrapper) -> IdleHandle {
        self.idle.request_idle(callback)
    }

    /// 取消一个空闲回调；对已触发批次的句柄无操作
    /// (Cancel an idle callback; no-op for handles from an already-fired batch)
    #[inline]
    pub fn cancel_idle(&self, handle: IdleHandle) -> bool {
        self.idle.cancel_idle(handle)
    }

    /// 调度一个周期回调 (Schedule a repeating callback)
    ///
    /// 周期成比例的请求共享一个平台周期定时器，每个周期触发所有存活槽位。
    /// 零周期钳制到 1ms 最小周期。
    /// (Requests with proportional periods share one platform interval that
    /// fires every live slot each period. Zero periods are clamped to the 1ms
    /// minimum)
    #[inline]
    pub fn schedule_interval(&self, callback: CallbackWrapper, period: Duration) -> ScheduleHandle {
        self.interval.schedule(callback, period)
    }

    /// 取消一个周期回调 (Cancel a repeating callback)
    #[inline]
    pub fn cancel_interval(&self, handle: ScheduleHandle) -> bool {
        self.interval.cancel(handle)
    }

    /// 当前计数器值 (Current counter values)
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// 整个调度器的可序列化快照 (Serializable snapshot of the whole scheduler)
    pub fn snapshot(&self) -> CoalesceSnapshot {
        CoalesceSnapshot {
            counters: self.counters.snapshot(),
            delay_groups: self.delay.snapshot(),
        }
    }

    /// 当前打开的延迟组数量 (Number of currently open delay groups)
    pub fn open_delay_groups(&self) -> usize {
        self.delay.open_groups()
    }

    /// 当前打开的周期组数量 (Number of currently open interval groups)
    pub fn open_interval_groups(&self) -> usize {
        self.interval.open_groups()
    }

    /// 当前空闲批次中的存活回调数量 (Live callbacks in the current idle batch)
    pub fn pending_idle_callbacks(&self) -> usize {
        self.idle.live_count()
    }
}

impl Drop for TimerCoalescer {
    fn drop(&mut self) {
        if let Some(handle) = self.diag_handle.take() {
            handle.abort();
        }
    }
}
