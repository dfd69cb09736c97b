use crate::clock::ManualClock;
use crate::tests::support::{counting_callback, manual_scheduler};
use crate::{CoalesceConfig, TimerCoalescer};
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_snapshot_serializes_to_json() {
    let (scheduler, _clock) = manual_scheduler();
    let counter = Arc::new(AtomicU32::new(0));

    scheduler.schedule(counting_callback(&counter), Duration::from_millis(100));
    scheduler.schedule(counting_callback(&counter), Duration::from_millis(110));

    let json = serde_json::to_string(&scheduler.snapshot()).unwrap();
    assert!(json.contains("\"schedule_calls\":2"));
    assert!(json.contains("\"coalesced\":1"));
    assert!(json.contains("\"fires_in_ms\":100"));
    assert!(json.contains("\"delay_groups\""));
}

#[tokio::test]
async fn test_diagnostics_emitter_runs_and_stops_on_drop() {
    let config = CoalesceConfig::builder()
        .enable_diagnostics(true)
        .diagnostics_interval(Duration::from_millis(10))
        .build()
        .unwrap();
    let clock = Arc::new(ManualClock::new());
    let scheduler = TimerCoalescer::new(config, clock);
    let counter = Arc::new(AtomicU32::new(0));

    scheduler.schedule(counting_callback(&counter), Duration::from_millis(100));

    // 后台任务按真实时间间隔输出快照；这里只验证它运行且在 Drop 时被中止
    // (The background task emits on real-time ticks; this only verifies it runs
    // and is aborted on Drop)
    tokio::time::sleep(Duration::from_millis(40)).await;
    drop(scheduler);
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn test_diagnostics_disabled_spawns_no_task() {
    let (scheduler, _clock) = manual_scheduler();
    // 默认关闭诊断，Drop 无事可做 (Diagnostics are off by default; Drop has
    // nothing to abort)
    drop(scheduler);
}
