use crate::tests::support::{
    counting_callback, manual_scheduler, wait_for_count, ImmediateClock,
};
use crate::{CallbackWrapper, CoalesceConfig, TimerCoalescer};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_proportional_periods_share_one_interval() {
    let (scheduler, clock) = manual_scheduler();
    let a_counter = Arc::new(AtomicU32::new(0));
    let b_counter = Arc::new(AtomicU32::new(0));

    // ratio = 100 / 110 ≈ 0.91，在 0.8–1.4 内；加入者采用组的 100ms 周期
    // (ratio ≈ 0.91, inside 0.8–1.4; the joiner adopts the group's 100ms period)
    scheduler.schedule_interval(counting_callback(&a_counter), Duration::from_millis(100));
    scheduler.schedule_interval(counting_callback(&b_counter), Duration::from_millis(110));

    assert_eq!(clock.timer_registrations(), 1);
    assert_eq!(scheduler.open_interval_groups(), 1);

    // 共享的周期定时器在 100、200、300 触发
    // (The shared interval fires at 100, 200, 300)
    clock.advance(Duration::from_millis(350)).await;
    assert_eq!(a_counter.load(Ordering::SeqCst), 3);
    assert_eq!(b_counter.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_disproportional_periods_get_separate_intervals() {
    let (scheduler, clock) = manual_scheduler();
    let fast_counter = Arc::new(AtomicU32::new(0));
    let slow_counter = Arc::new(AtomicU32::new(0));

    // ratio = 100 / 400 = 0.25，低于下界 (ratio 0.25, below the lower bound)
    scheduler.schedule_interval(counting_callback(&fast_counter), Duration::from_millis(100));
    scheduler.schedule_interval(counting_callback(&slow_counter), Duration::from_millis(400));

    assert_eq!(clock.timer_registrations(), 2);
    assert_eq!(scheduler.open_interval_groups(), 2);

    clock.advance(Duration::from_millis(400)).await;
    assert_eq!(fast_counter.load(Ordering::SeqCst), 4);
    assert_eq!(slow_counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_one_keeps_the_other_firing() {
    let (scheduler, clock) = manual_scheduler();
    let a_counter = Arc::new(AtomicU32::new(0));
    let b_counter = Arc::new(AtomicU32::new(0));

    let a = scheduler.schedule_interval(counting_callback(&a_counter), Duration::from_millis(100));
    scheduler.schedule_interval(counting_callback(&b_counter), Duration::from_millis(100));

    clock.advance(Duration::from_millis(100)).await;
    assert_eq!(a_counter.load(Ordering::SeqCst), 1);

    assert!(scheduler.cancel_interval(a));

    clock.advance(Duration::from_millis(200)).await;
    assert_eq!(a_counter.load(Ordering::SeqCst), 1);
    assert_eq!(b_counter.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_emptied_group_cancels_platform_interval() {
    let (scheduler, clock) = manual_scheduler();
    let counter = Arc::new(AtomicU32::new(0));

    let a = scheduler.schedule_interval(counting_callback(&counter), Duration::from_millis(100));
    let b = scheduler.schedule_interval(counting_callback(&counter), Duration::from_millis(100));

    assert!(scheduler.cancel_interval(a));
    assert!(scheduler.cancel_interval(b));
    // 第二次取消同一句柄无操作 (Cancelling the same handle twice is a no-op)
    assert!(!scheduler.cancel_interval(b));

    assert_eq!(scheduler.open_interval_groups(), 0);
    assert_eq!(clock.active_intervals(), 0);

    clock.advance(Duration::from_millis(500)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_zero_period_is_clamped_to_minimum() {
    let (scheduler, clock) = manual_scheduler();
    let counter = Arc::new(AtomicU32::new(0));

    scheduler.schedule_interval(counting_callback(&counter), Duration::ZERO);

    // 零周期钳制到 1ms：时间照常推进、advance 正常终止，每毫秒触发一次
    // (A zero period is clamped to 1ms: time keeps moving, advance terminates
    // normally, one fire per millisecond)
    clock.advance(Duration::from_millis(10)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn test_fire_racing_registration_still_finds_its_group() {
    let clock = Arc::new(ImmediateClock::new());
    let scheduler = TimerCoalescer::new(CoalesceConfig::default(), clock);
    let counter = Arc::new(AtomicU32::new(0));

    // 触发线程在 schedule_interval 仍持有存储锁时就已启动；组 id 必须在锁内
    // 读取，否则触发会在空查找后返回、回调丢失
    // (The fire thread starts while schedule_interval still holds the store
    // lock; the group id must be read under that lock or the fire returns
    // after an empty lookup and the callback is lost)
    scheduler.schedule_interval(counting_callback(&counter), Duration::from_millis(100));

    wait_for_count(&counter, 1).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_panicking_callback_does_not_stop_the_interval() {
    let (scheduler, clock) = manual_scheduler();
    let counter = Arc::new(AtomicU32::new(0));

    scheduler.schedule_interval(
        CallbackWrapper::new(|| async { panic!("interval blew up") }),
        Duration::from_millis(100),
    );
    scheduler.schedule_interval(counting_callback(&counter), Duration::from_millis(100));

    // 每个周期都隔离恐慌并继续执行存活槽位
    // (Each period isolates the panic and keeps running the live slots)
    clock.advance(Duration::from_millis(250)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(scheduler.counters().callback_failures, 2);
}
