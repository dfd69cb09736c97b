use crate::tests::support::{counting_callback, manual_scheduler, manual_scheduler_with};
use crate::CoalesceConfig;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_close_delays_share_one_platform_timer() {
    let (scheduler, clock) = manual_scheduler();
    let counter = Arc::new(AtomicU32::new(0));

    // ratio = (10 + 110) / (10 + 100) ≈ 1.09，在 0.7–2.5 内
    // (ratio ≈ 1.09, inside 0.7–2.5)
    scheduler.schedule(counting_callback(&counter), Duration::from_millis(100));
    scheduler.schedule(counting_callback(&counter), Duration::from_millis(110));

    assert_eq!(clock.timer_registrations(), 1);
    assert_eq!(scheduler.open_delay_groups(), 1);

    clock.advance(Duration::from_millis(150)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(scheduler.open_delay_groups(), 0);
}

#[tokio::test]
async fn test_far_delay_gets_its_own_timer() {
    let (scheduler, clock) = manual_scheduler();
    let counter = Arc::new(AtomicU32::new(0));

    // ratio = (10 + 5000) / (10 + 100) ≈ 45.5，远超上界
    // (ratio ≈ 45.5, far beyond the upper bound)
    scheduler.schedule(counting_callback(&counter), Duration::from_millis(100));
    scheduler.schedule(counting_callback(&counter), Duration::from_millis(5000));

    assert_eq!(clock.timer_registrations(), 2);
    assert_eq!(scheduler.open_delay_groups(), 2);
}

#[tokio::test]
async fn test_reference_scenario() {
    // schedule(A, 100)、schedule(B, 110)、schedule(C, 5000)：A 和 B 共享一个
    // 定时器在 ~t=100 触发，C 单独一个定时器
    // (A and B share one timer firing at ~t=100; C gets a separate timer)
    let (scheduler, clock) = manual_scheduler();
    let ab_counter = Arc::new(AtomicU32::new(0));
    let c_counter = Arc::new(AtomicU32::new(0));

    scheduler.schedule(counting_callback(&ab_counter), Duration::from_millis(100));
    scheduler.schedule(counting_callback(&ab_counter), Duration::from_millis(110));
    scheduler.schedule(counting_callback(&c_counter), Duration::from_millis(5000));

    assert_eq!(clock.timer_registrations(), 2);

    clock.advance(Duration::from_millis(150)).await;
    assert_eq!(ab_counter.load(Ordering::SeqCst), 2);
    assert_eq!(c_counter.load(Ordering::SeqCst), 0);

    clock.advance(Duration::from_millis(5000)).await;
    assert_eq!(c_counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_short_delay_does_not_join_long_group() {
    let (scheduler, clock) = manual_scheduler();
    let counter = Arc::new(AtomicU32::new(0));

    // ratio = (10 + 10) / (10 + 1000) ≈ 0.02，低于下界
    // (ratio ≈ 0.02, below the lower bound)
    scheduler.schedule(counting_callback(&counter), Duration::from_millis(1000));
    scheduler.schedule(counting_callback(&counter), Duration::from_millis(10));

    assert_eq!(clock.timer_registrations(), 2);

    // 短延迟先触发，长延迟的组不受影响
    // (The short delay fires first; the long group is unaffected)
    clock.advance(Duration::from_millis(20)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.open_delay_groups(), 1);
}

#[tokio::test]
async fn test_zero_delay_requests_coalesce() {
    let (scheduler, clock) = manual_scheduler();
    let counter = Arc::new(AtomicU32::new(0));

    // 偏移量让零延迟的比率恰好为 1 (The offset makes the zero-delay ratio exactly 1)
    scheduler.schedule(counting_callback(&counter), Duration::ZERO);
    scheduler.schedule(counting_callback(&counter), Duration::ZERO);

    assert_eq!(clock.timer_registrations(), 1);

    clock.advance(Duration::ZERO).await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_counters_track_coalescing() {
    let (scheduler, _clock) = manual_scheduler();
    let counter = Arc::new(AtomicU32::new(0));

    scheduler.schedule(counting_callback(&counter), Duration::from_millis(100));
    scheduler.schedule(counting_callback(&counter), Duration::from_millis(110));
    scheduler.schedule(counting_callback(&counter), Duration::from_millis(5000));

    let counters = scheduler.counters();
    assert_eq!(counters.schedule_calls, 3);
    assert_eq!(counters.platform_registrations, 2);
    assert_eq!(counters.coalesced, 1);
}

#[tokio::test]
async fn test_full_group_stops_admitting() {
    let config = CoalesceConfig::builder()
        .group_capacity(4)
        .build()
        .unwrap();
    let (scheduler, clock) = manual_scheduler_with(config);
    let counter = Arc::new(AtomicU32::new(0));

    let handles: Vec<_> = (0..6)
        .map(|_| scheduler.schedule(counting_callback(&counter), Duration::from_millis(100)))
        .collect();

    // 前 4 个填满第一组，后 2 个进入新组：槽位索引不会溢出编码区间
    // (The first 4 fill group one, the next 2 start a new group: slot indices
    // never overflow the encoded range)
    assert_eq!(clock.timer_registrations(), 2);
    assert_eq!(scheduler.open_delay_groups(), 2);

    let first_group = handles[0].as_u64() / 4;
    let second_group = handles[4].as_u64() / 4;
    assert_ne!(first_group, second_group);
    assert_eq!(handles[3].as_u64() / 4, first_group);
    assert_eq!(handles[5].as_u64() / 4, second_group);

    clock.advance(Duration::from_millis(150)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_handles_within_group_are_consecutive() {
    let (scheduler, _clock) = manual_scheduler();
    let counter = Arc::new(AtomicU32::new(0));

    let first = scheduler.schedule(counting_callback(&counter), Duration::from_millis(100));
    let second = scheduler.schedule(counting_callback(&counter), Duration::from_millis(110));

    // 同组内槽位索引递增 (Slot indices increase within a group)
    assert_eq!(second.as_u64(), first.as_u64() + 1);
}
