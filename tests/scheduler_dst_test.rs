//! Daily scheduler across a daylight-saving change
//!
//! Drives the real [`Scheduler`] loop with an anchored clock under paused
//! tokio time, so four simulated days pass instantly.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Europe::London;
use fee_oracle::pipeline::{CycleRejected, CycleReport};
use fee_oracle::scheduler::{AnchoredClock, Clock, CycleRunner, DailySchedule, Scheduler};
use fee_oracle::types::Trigger;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Records the clock reading at every cycle
struct FiringLog {
    clock: AnchoredClock,
    fired: Mutex<Vec<(Trigger, DateTime<Utc>)>>,
}

#[async_trait]
impl CycleRunner for FiringLog {
    async fn run_cycle(
        &self,
        trigger: Trigger,
        _cancel: &CancellationToken,
    ) -> Result<CycleReport, CycleRejected> {
        self.fired.lock().push((trigger, self.clock.now()));
        let mut report = CycleReport::new(format!("cycle-{}", self.fired.lock().len()), trigger);
        report.success = true;
        Ok(report)
    }
}

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_one_cycle_per_local_day_across_spring_forward() {
    // Friday before the 2024-03-31 change, London on GMT
    let clock = AnchoredClock::new(utc(2024, 3, 29, 12, 0));
    let log = Arc::new(FiringLog {
        clock,
        fired: Mutex::new(Vec::new()),
    });
    let schedule = DailySchedule::new(London, 16, 1).unwrap();
    let scheduler = Arc::new(Scheduler::with_clock(log.clone(), schedule, Arc::new(clock)));

    let handle = scheduler.clone().start();
    // until just before the fifth trigger
    tokio::time::sleep(Duration::from_secs(4 * 24 * 3600)).await;
    scheduler.stop();
    handle.await.unwrap();

    let fired: Vec<DateTime<Utc>> = log.fired.lock().iter().map(|(_, at)| *at).collect();
    assert_eq!(
        fired,
        vec![
            utc(2024, 3, 29, 16, 1),
            utc(2024, 3, 30, 16, 1),
            // BST from here on: 16:01 local is 15:01 UTC
            utc(2024, 3, 31, 15, 1),
            utc(2024, 4, 1, 15, 1),
        ]
    );
    for at in &fired {
        let local = at.with_timezone(&London);
        assert_eq!(local.format("%H:%M").to_string(), "16:01");
    }
    assert!(log.fired.lock().iter().all(|(trigger, _)| *trigger == Trigger::Scheduled));
}

#[tokio::test(start_paused = true)]
async fn test_one_cycle_per_local_day_across_fall_back() {
    let clock = AnchoredClock::new(utc(2024, 10, 26, 0, 0));
    let log = Arc::new(FiringLog {
        clock,
        fired: Mutex::new(Vec::new()),
    });
    let schedule = DailySchedule::new(London, 16, 1).unwrap();
    let scheduler = Arc::new(Scheduler::with_clock(log.clone(), schedule, Arc::new(clock)));

    let handle = scheduler.clone().start();
    tokio::time::sleep(Duration::from_secs(3 * 24 * 3600)).await;
    scheduler.stop();
    handle.await.unwrap();

    let fired: Vec<DateTime<Utc>> = log.fired.lock().iter().map(|(_, at)| *at).collect();
    assert_eq!(
        fired,
        vec![
            utc(2024, 10, 26, 15, 1),
            utc(2024, 10, 27, 16, 1),
            utc(2024, 10, 28, 16, 1),
        ]
    );
}

#[test]
fn test_next_trigger_in_other_zone() {
    let schedule = DailySchedule::new(chrono_tz::America::New_York, 9, 30).unwrap();
    // 2024-03-10 02:00 New York springs forward; 09:30 local is EDT (UTC-4)
    assert_eq!(schedule.next_after(utc(2024, 3, 10, 0, 0)), utc(2024, 3, 10, 13, 30));
    assert_eq!(schedule.next_after(utc(2024, 3, 9, 0, 0)), utc(2024, 3, 9, 14, 30));
}
