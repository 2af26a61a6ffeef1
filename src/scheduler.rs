//! Daily trigger loop
//!
//! [`DailySchedule`] turns a local wall-clock time in an IANA time zone into
//! concrete UTC instants. [`Scheduler`] sleeps until the next instant, runs
//! one cycle, and repeats until stopped. Time is read through [`Clock`] so the
//! loop can be driven by tokio's paused clock in tests.

use crate::pipeline::{CycleRejected, CycleReport};
use crate::types::Trigger;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Source of wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock pinned to `anchor` at creation and advanced by tokio's timer
///
/// Under a paused tokio runtime this makes simulated days pass instantly
/// while `now()` stays consistent with every `sleep`.
#[derive(Debug, Clone, Copy)]
pub struct AnchoredClock {
    anchor: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl AnchoredClock {
    pub fn new(anchor: DateTime<Utc>) -> Self {
        Self {
            anchor,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for AnchoredClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = ChronoDuration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| ChronoDuration::zero());
        self.anchor + elapsed
    }
}

/// Something that can run one update cycle
#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run_cycle(
        &self,
        trigger: Trigger,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, CycleRejected>;
}

/// A fixed local time of day in a given time zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    tz: Tz,
    hour: u32,
    minute: u32,
}

impl DailySchedule {
    pub fn new(tz: Tz, hour: u32, minute: u32) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(anyhow!("invalid trigger time {:02}:{:02}", hour, minute));
        }
        Ok(Self { tz, hour, minute })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// First instant strictly after `now` whose local time is the trigger time
    ///
    /// When the local time occurs twice (clocks going back) the earlier
    /// instant is used. When it does not occur (clocks going forward) the
    /// first valid instant after the gap is used.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut date = now.with_timezone(&self.tz).date_naive();
        // Today's trigger may already be past; at most one day skip is needed,
        // a couple more cover pathological zone transitions
        for _ in 0..4 {
            if let Some(candidate) = self.resolve(date) {
                if candidate > now {
                    return candidate;
                }
            }
            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }
        warn!(now = %now, "Could not resolve next trigger, falling back to 24h");
        now + ChronoDuration::days(1)
    }

    /// Trigger instant on local `date`, if the local calendar has one
    fn resolve(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let naive = date.and_hms_opt(self.hour, self.minute, 0)?;
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(t) => Some(t.with_timezone(&Utc)),
            LocalResult::Ambiguous(a, b) => Some(a.min(b).with_timezone(&Utc)),
            LocalResult::None => {
                // Walk forward to the end of the gap
                let mut probe = naive;
                for _ in 0..(24 * 60) {
                    probe += ChronoDuration::minutes(1);
                    match self.tz.from_local_datetime(&probe) {
                        LocalResult::Single(t) => return Some(t.with_timezone(&Utc)),
                        LocalResult::Ambiguous(a, b) => return Some(a.min(b).with_timezone(&Utc)),
                        LocalResult::None => continue,
                    }
                }
                None
            }
        }
    }
}

/// Owns the daily loop and its shutdown token
pub struct Scheduler {
    runner: Arc<dyn CycleRunner>,
    schedule: DailySchedule,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn CycleRunner>, schedule: DailySchedule) -> Self {
        Self::with_clock(runner, schedule, Arc::new(SystemClock))
    }

    pub fn with_clock(runner: Arc<dyn CycleRunner>, schedule: DailySchedule, clock: Arc<dyn Clock>) -> Self {
        Self {
            runner,
            schedule,
            clock,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the loop and any in-flight cycle
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn next_trigger(&self) -> DateTime<Utc> {
        self.schedule.next_after(self.clock.now())
    }

    /// Spawn [`run_forever`](Self::run_forever) on the current runtime
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_forever().await })
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Run one manual cycle now
    pub async fn run_once(&self) -> Result<CycleReport, CycleRejected> {
        self.runner.run_cycle(Trigger::Manual, &self.cancel).await
    }

    /// Run a manual cycle; `shutdown` completing cancels it
    ///
    /// The cycle is still driven to its end after cancellation, so it is
    /// settled as abandoned and recorded before this returns.
    pub async fn run_once_until<S>(&self, shutdown: S) -> Result<CycleReport, CycleRejected>
    where
        S: Future<Output = ()>,
    {
        let cycle = self.run_once();
        tokio::pin!(cycle);
        tokio::pin!(shutdown);

        tokio::select! {
            outcome = &mut cycle => return outcome,
            _ = &mut shutdown => {
                info!("Shutdown requested, cancelling the running cycle");
                self.stop();
            }
        }
        cycle.await
    }

    /// Sleep to each trigger instant and run a cycle, until stopped
    pub async fn run_forever(&self) {
        let mut last_fired: Option<DateTime<Utc>> = None;

        loop {
            let now = self.clock.now();
            // Never schedule at or before the previous trigger, and never
            // replay triggers missed while a cycle overran
            let reference = last_fired.map_or(now, |fired| fired.max(now));
            let next = self.schedule.next_after(reference);

            info!(
                next_utc = %next,
                next_local = %next.with_timezone(&self.schedule.timezone()),
                "Next update cycle scheduled"
            );

            if !self.sleep_until(next).await {
                info!("Scheduler stopped");
                return;
            }
            last_fired = Some(next);

            match self.runner.run_cycle(Trigger::Scheduled, &self.cancel).await {
                Ok(report) if report.success => {
                    debug!(cycle_id = %report.cycle_id, "Scheduled cycle succeeded");
                }
                Ok(report) => {
                    warn!(
                        cycle_id = %report.cycle_id,
                        error = ?report.error.as_ref().map(|e| e.to_string()),
                        "Scheduled cycle failed, continuing with next trigger"
                    );
                }
                Err(rejected) => warn!(error = %rejected, "Scheduled cycle not started"),
            }

            if self.cancel.is_cancelled() {
                info!("Scheduler stopped");
                return;
            }
        }
    }

    /// Returns `false` if cancelled before `target`
    async fn sleep_until(&self, target: DateTime<Utc>) -> bool {
        loop {
            let now = self.clock.now();
            if now >= target {
                return true;
            }
            let wait = (target - now).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use chrono_tz::Europe::London;
    use parking_lot::Mutex;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_next_after_same_day_and_next_day() {
        let schedule = DailySchedule::new(London, 16, 1).unwrap();
        // winter, London == UTC
        assert_eq!(schedule.next_after(utc(2024, 1, 10, 9, 0)), utc(2024, 1, 10, 16, 1));
        assert_eq!(schedule.next_after(utc(2024, 1, 10, 16, 1)), utc(2024, 1, 11, 16, 1));
        assert_eq!(schedule.next_after(utc(2024, 1, 10, 17, 0)), utc(2024, 1, 11, 16, 1));
    }

    #[test]
    fn test_next_after_in_summer_time() {
        let schedule = DailySchedule::new(London, 16, 1).unwrap();
        // BST is UTC+1
        assert_eq!(schedule.next_after(utc(2024, 7, 1, 12, 0)), utc(2024, 7, 1, 15, 1));
    }

    #[test]
    fn test_nonexistent_local_time_uses_end_of_gap() {
        // 2024-03-31 01:00 -> 02:00 in London
        let schedule = DailySchedule::new(London, 1, 30).unwrap();
        let next = schedule.next_after(utc(2024, 3, 30, 12, 0));
        assert_eq!(next, utc(2024, 3, 31, 1, 0));
        assert_eq!(next.with_timezone(&London).hour(), 2);
    }

    #[test]
    fn test_ambiguous_local_time_uses_first_occurrence() {
        // 2024-10-27 02:00 -> 01:00 in London, 01:30 happens twice
        let schedule = DailySchedule::new(London, 1, 30).unwrap();
        let next = schedule.next_after(utc(2024, 10, 26, 12, 0));
        assert_eq!(next, utc(2024, 10, 27, 0, 30));
        // the second occurrence does not fire again the same day
        assert_eq!(schedule.next_after(next), utc(2024, 10, 28, 1, 30));
    }

    #[test]
    fn test_invalid_time_rejected() {
        assert!(DailySchedule::new(London, 24, 0).is_err());
        assert!(DailySchedule::new(London, 12, 60).is_err());
    }

    struct CountingRunner {
        clock: AnchoredClock,
        fired: Mutex<Vec<DateTime<Utc>>>,
        cycle_time: Duration,
    }

    #[async_trait]
    impl CycleRunner for CountingRunner {
        async fn run_cycle(
            &self,
            trigger: Trigger,
            _cancel: &CancellationToken,
        ) -> Result<CycleReport, CycleRejected> {
            self.fired.lock().push(self.clock.now());
            tokio::time::sleep(self.cycle_time).await;
            let mut report = CycleReport::new("test", trigger);
            report.success = true;
            Ok(report)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_cycle_does_not_build_backlog() {
        let clock = AnchoredClock::new(utc(2024, 1, 10, 16, 0));
        let runner = Arc::new(CountingRunner {
            clock,
            fired: Mutex::new(Vec::new()),
            // longer than a day
            cycle_time: Duration::from_secs(30 * 3600),
        });
        let schedule = DailySchedule::new(London, 16, 1).unwrap();
        let scheduler = Arc::new(Scheduler::with_clock(runner.clone(), schedule, Arc::new(clock)));
        let handle = scheduler.clone().start();

        tokio::time::sleep(Duration::from_secs(3 * 24 * 3600)).await;
        scheduler.stop();
        handle.await.unwrap();

        let fired = runner.fired.lock().clone();
        // 10th 16:01, cycle ends 11th 22:01, so the 11th is skipped
        assert_eq!(fired[0], utc(2024, 1, 10, 16, 1));
        assert_eq!(fired[1], utc(2024, 1, 12, 16, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_sleep() {
        let clock = AnchoredClock::new(utc(2024, 1, 10, 0, 0));
        let runner = Arc::new(CountingRunner {
            clock,
            fired: Mutex::new(Vec::new()),
            cycle_time: Duration::ZERO,
        });
        let schedule = DailySchedule::new(London, 16, 1).unwrap();
        let scheduler = Arc::new(Scheduler::with_clock(runner.clone(), schedule, Arc::new(clock)));
        let handle = scheduler.clone().start();

        tokio::time::sleep(Duration::from_secs(3600)).await;
        scheduler.stop();
        handle.await.unwrap();
        assert!(runner.fired.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_once_is_manual() {
        let clock = AnchoredClock::new(utc(2024, 1, 10, 0, 0));
        let runner = Arc::new(CountingRunner {
            clock,
            fired: Mutex::new(Vec::new()),
            cycle_time: Duration::ZERO,
        });
        let scheduler = Scheduler::with_clock(
            runner.clone(),
            DailySchedule::new(London, 16, 1).unwrap(),
            Arc::new(clock),
        );

        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.trigger, Trigger::Manual);
        assert_eq!(runner.fired.lock().len(), 1);
    }
}
