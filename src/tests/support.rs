// Shared test helpers: deterministic scheduler construction and counting callbacks
//
// 共享测试辅助：确定性调度器构造和计数回调

use crate::clock::{
    IdleFire, IntervalFire, ManualClock, PlatformClock, PlatformIdleId, PlatformTimerId, TimerFire,
};
use crate::{CallbackWrapper, CoalesceConfig, TimerCoalescer};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 使用手动时钟和默认配置构造调度器
/// (Build a scheduler on a manual clock with default configuration)
pub(crate) fn manual_scheduler() -> (TimerCoalescer, Arc<ManualClock>) {
    manual_scheduler_with(CoalesceConfig::default())
}

/// 使用手动时钟和给定配置构造调度器
/// (Build a scheduler on a manual clock with the given configuration)
pub(crate) fn manual_scheduler_with(config: CoalesceConfig) -> (TimerCoalescer, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let scheduler = TimerCoalescer::new(config, clock.clone());
    (scheduler, clock)
}

/// 每次调用递增计数器的回调 (Callback that increments a counter per invocation)
pub(crate) fn counting_callback(counter: &Arc<AtomicU32>) -> CallbackWrapper {
    let counter = Arc::clone(counter);
    CallbackWrapper::new(move || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    })
}

/// 注册瞬间就在独立线程上执行触发闭包的时钟
/// (Clock that runs the fire closure on a separate thread the instant it is
/// registered)
///
/// 触发与尚未从 `schedule` 返回、仍持有存储锁的调用者并发执行，暴露注册
/// 与触发之间最窄的竞争窗口。周期定时器只触发一次。
/// (The fire runs concurrently with a caller that has not yet returned from
/// `schedule` and still holds the store lock, exposing the narrowest race
/// window between registration and firing. Intervals fire only once)
pub(crate) struct ImmediateClock {
    next_id: AtomicU64,
}

impl ImmediateClock {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl PlatformClock for ImmediateClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn start_timer(&self, _delay: Duration, fire: TimerFire) -> PlatformTimerId {
        let id = self.allocate_id();
        std::thread::spawn(move || futures::executor::block_on(fire()));
        PlatformTimerId(id)
    }

    fn cancel_timer(&self, _id: PlatformTimerId) {}

    fn start_interval(&self, _period: Duration, fire: IntervalFire) -> PlatformTimerId {
        let id = self.allocate_id();
        std::thread::spawn(move || futures::executor::block_on(fire()));
        PlatformTimerId(id)
    }

    fn cancel_interval(&self, _id: PlatformTimerId) {}

    fn request_idle(&self, fire: IdleFire) -> PlatformIdleId {
        let id = self.allocate_id();
        std::thread::spawn(move || futures::executor::block_on(fire()));
        PlatformIdleId(id)
    }

    fn cancel_idle(&self, _id: PlatformIdleId) {}
}

/// 自旋等待计数器到达期望值，避免测试对线程调度的依赖
/// (Spin-wait for a counter to reach the expected value, keeping the test
/// independent of thread scheduling)
pub(crate) async fn wait_for_count(counter: &Arc<AtomicU32>, expected: u32) {
    for _ in 0..400 {
        if counter.load(Ordering::SeqCst) >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// 把标签按执行顺序记录到共享向量的回调
/// (Callback that records a label into a shared vector in execution order)
pub(crate) fn ordering_callback(order: &Arc<parking_lot::Mutex<Vec<u32>>>, label: u32) -> CallbackWrapper {
    let order = Arc::clone(order);
    CallbackWrapper::new(move || {
        let order = Arc::clone(&order);
        async move {
            order.lock().push(label);
        }
    })
}
