//! # 定时器合并调度器 (Timer-Coalescing Scheduler)
//!
//! 延迟回调和空闲回调原语的直接替代品：把目标触发时刻相近的请求合并到共享
//! 的底层平台定时器上。宿主环境创建大量相互独立的短生命周期定时器时，每个
//! 定时器背后的内核/事件循环定时器对象都有可观测的开销；把几乎同时到期的
//! 请求折叠到共享定时器上可以摊销这一成本，同时保留每个调用者"独立、可取消
//! 的延迟回调"的假象。
//! (A drop-in replacement for delayed-callback and idle-callback primitives
//! that merges requests with similar target fire times onto shared underlying
//! platform timers. A host that creates very many independent short-lived
//! timers pays measurable per-timer overhead for each kernel/event-loop timer
//! object behind them; collapsing near-simultaneous requests onto shared
//! timers amortizes that cost while preserving each caller's illusion of an
//! independent, cancellable delayed callback)
//!
//! ## 设计 (Design)
//!
//! 三个合并器共享同一个模式：**分组策略**决定新请求加入既有待触发组还是
//! 新建组；**组**持有有序的回调槽位列表和一个底层平台定时器；**句柄编码**
//! 在调用者可见的整数与（组，槽位）之间转换。
//! (Three coalescers share one pattern: a **grouping policy** decides whether
//! a new request joins an existing pending group or starts a new one; a
//! **group** holds an ordered list of callback slots and a single underlying
//! platform timer; a **handle codec** maps between a caller-visible integer
//! and (group, slot))
//!
//! - **延迟组 (Delay groups)**: 相似度判定为对称、尺度不变的时间接近度比率
//!   `(10ms + delay) / |10ms + group_left|`，落在 0.7–2.5 内即共享定时器
//!   (similarity is the symmetric, scale-invariant proximity ratio
//!   `(10ms + delay) / |10ms + group_left|`, sharing a timer inside 0.7–2.5)
//! - **空闲批次 (Idle batches)**: 空闲回调没有截止时刻，准入无条件；批次
//!   触发采用捕获-交换-执行顺序保证重入安全
//!   (idle callbacks have no deadline, admission is unconditional; firing uses
//!   capture-then-swap-then-run for reentrancy safety)
//! - **周期组 (Interval groups)**: 按周期时长比例 0.8–1.4 分组，每个周期
//!   重新触发所有存活槽位
//!   (grouped by the proportional period ratio 0.8–1.4, re-firing every live
//!   slot each period)
//!
//! 所有魔法常量都是命名配置，带文档化的默认值，可调优、可在测试中覆盖。
//! (All magic constants are named configuration with documented defaults,
//! tunable and overridable in tests)
//!
//! ## 快速开始 (Quick Start)
//!
//! ```no_run
//! use kestrel_coalesce::{TimerCoalescer, CallbackWrapper};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let scheduler = TimerCoalescer::with_defaults();
//!
//!     // 两个接近的延迟只注册一个底层定时器
//!     // (Two close delays register only one underlying timer)
//!     let _a = scheduler.schedule(
//!         CallbackWrapper::new(|| async { println!("A fired"); }),
//!         Duration::from_millis(100),
//!     );
//!     let b = scheduler.schedule(
//!         CallbackWrapper::new(|| async { println!("B fired"); }),
//!         Duration::from_millis(110),
//!     );
//!
//!     // 取消只置空对应槽位，组内其他回调照常触发
//!     // (Cancellation only nulls the slot; the group's other callbacks still fire)
//!     scheduler.cancel_schedule(b);
//!
//!     tokio::time::sleep(Duration::from_millis(200)).await;
//! }
//! ```
//!
//! ## 并发模型 (Concurrency Model)
//!
//! 存储内部由 `parking_lot::Mutex` 保护，锁从不跨 `.await` 持有；触发路径
//! 在锁内捕获、在锁外执行回调，因此回调可以重入地调用回调度器。取消是同步
//! 的，在 `cancel_*` 返回前完成。
//! (Store interiors are guarded by `parking_lot::Mutex`, never held across an
//! `.await`; fire paths capture under the lock and run callbacks outside it,
//! so callbacks may reentrantly call back into the scheduler. Cancellation is
//! synchronous and completes before `cancel_*` returns)

pub mod callback;
pub mod clock;
mod config;
mod diag;
mod error;
mod group;
mod handle;
mod idle;
mod interval;
mod scheduler;

// 重新导出公共 API (Re-export public API)
pub use callback::{CallbackWrapper, SchedulerCallback};
pub use clock::{ManualClock, PlatformClock, PlatformIdleId, PlatformTimerId, TokioClock};
pub use config::{
    CoalesceConfig, CoalesceConfigBuilder, DiagnosticsConfig, GroupingConfig,
    GroupingConfigBuilder, IdleConfig,
};
pub use diag::{CoalesceSnapshot, CounterSnapshot, DelayGroupSnapshot, DiagCounters};
pub use error::CoalesceError;
pub use handle::{IdleHandle, ScheduleHandle};
pub use scheduler::TimerCoalescer;
