//! Local-time trigger that runs the pipeline on a fixed schedule until its run
//! limit is reached.

use super::pipeline::EtlPipeline;
use crate::error::{AppError, Result};
use chrono::{Duration, Local, NaiveDateTime, NaiveTime, Timelike};
use std::fmt;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Trigger {
    /// At each listed time of day (minute precision), sorted and deduplicated.
    Daily(Vec<NaiveTime>),
    /// At the top of every hour.
    Hourly,
    /// At every whole minute divisible by `n`, `n` in [1, 59].
    Minutely(u32),
}

/// When the scheduler fires. Only the constructors below build one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule(Trigger);

impl Schedule {
    pub fn daily(times: Vec<NaiveTime>) -> Result<Self> {
        let mut times: Vec<NaiveTime> = times.into_iter().map(floor_time).collect();
        times.sort();
        times.dedup();
        if times.is_empty() {
            return Err(AppError::Validation(
                "a daily schedule needs at least one collect time".to_string(),
            ));
        }
        Ok(Schedule(Trigger::Daily(times)))
    }

    pub fn hourly() -> Self {
        Schedule(Trigger::Hourly)
    }

    pub fn minutely(every: u32) -> Result<Self> {
        if !(1..=59).contains(&every) {
            return Err(AppError::Validation(format!(
                "minute frequency must lie in [1, 59], got {}",
                every
            )));
        }
        Ok(Schedule(Trigger::Minutely(every)))
    }

    /// The first firing instant strictly after `now`.
    pub fn next_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        let minute = floor_minute(now);
        match &self.0 {
            Trigger::Hourly => {
                minute - Duration::minutes(i64::from(now.minute())) + Duration::hours(1)
            },
            Trigger::Minutely(every) => {
                let every = (*every).max(1);
                let mut next = minute + Duration::minutes(1);
                while next.minute() % every != 0 {
                    next += Duration::minutes(1);
                }
                next
            },
            Trigger::Daily(times) => {
                let today = now.date();
                let tomorrow = today + Duration::days(1);
                times
                    .iter()
                    .map(|t| today.and_time(*t))
                    .find(|candidate| *candidate > now)
                    .or_else(|| times.first().map(|t| tomorrow.and_time(*t)))
                    .unwrap_or_else(|| tomorrow.and_time(NaiveTime::MIN))
            },
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Trigger::Daily(times) => {
                let times: Vec<String> =
                    times.iter().map(|t| t.format("%H:%M").to_string()).collect();
                write!(f, "daily at {}", times.join(", "))
            },
            Trigger::Hourly => write!(f, "hourly"),
            Trigger::Minutely(every) => write!(f, "every {} minute(s)", every),
        }
    }
}

fn floor_minute(t: NaiveDateTime) -> NaiveDateTime {
    t - Duration::seconds(i64::from(t.second())) - Duration::nanoseconds(i64::from(t.nanosecond()))
}

fn floor_time(t: NaiveTime) -> NaiveTime {
    t - Duration::seconds(i64::from(t.second())) - Duration::nanoseconds(i64::from(t.nanosecond()))
}

/// Sleeps until each firing instant and runs the pipeline, until the
/// pipeline reports its run limit reached. A failed run is logged and the
/// schedule continues. Returns the number of runs started.
pub async fn run_scheduled(pipeline: &mut EtlPipeline, schedule: &Schedule) -> u64 {
    info!(%schedule, "Starting ETL scheduler");
    let started_with = pipeline.runs();

    while !pipeline.limit_reached() {
        let now = Local::now().naive_local();
        let next = schedule.next_after(now);
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next = %next, "Waiting {}s for next run", wait.as_secs());
        tokio::time::sleep(wait).await;

        info!("---Job {}---", pipeline.runs() + 1);
        if let Err(e) = pipeline.run().await {
            error!(job = pipeline.runs(), error = %e, "ETL run failed");
        }
    }

    info!(
        runs = pipeline.runs(),
        "Execution job count has reached its limit, scheduler stopped"
    );
    pipeline.runs() - started_with
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockProvider;
    use crate::db::memory::MemoryStore;
    use chrono::NaiveDate;
    use rstest::rstest;
    use std::sync::Arc;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 3)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[rstest]
    #[case(at(10, 15, 30), at(11, 0, 0))]
    #[case(at(10, 0, 0), at(11, 0, 0))]
    #[case(at(23, 59, 59), at(0, 0, 0) + Duration::days(1))]
    fn test_hourly(#[case] now: NaiveDateTime, #[case] expected: NaiveDateTime) {
        assert_eq!(Schedule::hourly().next_after(now), expected);
    }

    #[rstest]
    #[case(1, at(10, 15, 30), at(10, 16, 0))]
    #[case(10, at(10, 15, 30), at(10, 20, 0))]
    #[case(10, at(10, 20, 0), at(10, 30, 0))]
    #[case(15, at(10, 50, 0), at(11, 0, 0))]
    #[case(7, at(10, 57, 0), at(11, 0, 0))]
    fn test_minutely(
        #[case] every: u32,
        #[case] now: NaiveDateTime,
        #[case] expected: NaiveDateTime,
    ) {
        let schedule = Schedule::minutely(every).unwrap();
        assert_eq!(schedule.next_after(now), expected);
    }

    #[test]
    fn test_daily_picks_next_listed_time() {
        let schedule = Schedule::daily(vec![time(18, 0), time(6, 30), time(6, 30)]).unwrap();
        assert_eq!(schedule, Schedule(Trigger::Daily(vec![time(6, 30), time(18, 0)])));

        assert_eq!(schedule.next_after(at(5, 0, 0)), at(6, 30, 0));
        assert_eq!(schedule.next_after(at(6, 30, 0)), at(18, 0, 0));
        assert_eq!(
            schedule.next_after(at(19, 0, 0)),
            at(6, 30, 0) + Duration::days(1)
        );
    }

    #[rstest]
    #[case(0)]
    #[case(60)]
    fn test_minutely_rejects_out_of_range(#[case] every: u32) {
        assert!(matches!(Schedule::minutely(every), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_daily_requires_times() {
        assert!(Schedule::daily(Vec::new()).is_err());
    }

    #[test]
    fn test_degenerate_triggers_do_not_panic() {
        let now = at(10, 15, 30);
        assert_eq!(
            Schedule(Trigger::Daily(Vec::new())).next_after(now),
            at(0, 0, 0) + Duration::days(1)
        );
        assert_eq!(Schedule(Trigger::Minutely(0)).next_after(now), at(10, 16, 0));
    }

    #[test]
    fn test_display() {
        let schedule = Schedule::daily(vec![time(7, 0), time(19, 5)]).unwrap();
        assert_eq!(schedule.to_string(), "daily at 07:00, 19:05");
        assert_eq!(Schedule::minutely(5).unwrap().to_string(), "every 5 minute(s)");
        assert_eq!(Schedule::hourly().to_string(), "hourly");
    }

    #[tokio::test]
    async fn test_scheduler_stops_when_limit_already_reached() {
        let store = MemoryStore::new();
        let provider = Arc::new(MockProvider::new());
        let mut pipeline = EtlPipeline::new(
            Box::new(store.city_dao()),
            Box::new(store.weather_status_dao()),
            provider.clone(),
            provider,
            "VN",
        )
        .with_run_limit(Some(0));

        let runs = run_scheduled(&mut pipeline, &Schedule::hourly()).await;
        assert_eq!(runs, 0);
        assert_eq!(pipeline.runs(), 0);
    }
}
