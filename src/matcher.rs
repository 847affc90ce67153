//! Per-tick job matching and dispatch.
//!
//! Schedules are matched against *civil* time: the tick instant is
//! converted into calendar fields separately for every distinct user
//! time zone, so a job set to 10:00 fires at its owner's 10:00. The
//! schedule query itself runs in the job database, where each of the
//! five field sets matches on the civil value or the `-1` wildcard.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, TimeZone, Timelike};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::db::Database;
use crate::ingest::ResultQueue;
use crate::request::HttpRequest;
use crate::worker::{BatchLabel, WorkerPool};

/// Calendar fields of an instant in one time zone.
///
/// Field types are plain `i32` because the schedule columns store the
/// `-1` wildcard sentinel alongside real values. Weekday uses the
/// Sunday=0 .. Saturday=6 mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CivilTime {
    pub year: i32,
    /// 1-based month (January = 1).
    pub month: i32,
    pub mday: i32,
    pub hour: i32,
    pub minute: i32,
    /// Sunday = 0, Monday = 1, ... Saturday = 6.
    pub wday: i32,
}

impl CivilTime {
    /// Decompose a Unix timestamp (seconds) in the given zone.
    ///
    /// Returns `None` for instants the zone cannot represent.
    #[must_use]
    pub fn of(timestamp: i64, tz: Tz) -> Option<Self> {
        let local = tz.timestamp_opt(timestamp, 0).single()?;
        Some(Self {
            year: local.year(),
            month: local.month() as i32,
            mday: local.day() as i32,
            hour: local.hour() as i32,
            minute: local.minute() as i32,
            wday: local.weekday().num_days_from_sunday() as i32,
        })
    }
}

/// Builds and runs one worker batch per tick.
pub struct Dispatcher {
    db: Database,
    client: reqwest::Client,
    queue: ResultQueue,
}

impl Dispatcher {
    #[must_use]
    pub fn new(db: Database, client: reqwest::Client, queue: ResultQueue) -> Self {
        Self { db, client, queue }
    }

    /// Enumerate due jobs for one tick and execute them.
    ///
    /// `for_time` is the (jitter-corrected) matching instant,
    /// `planned_time` the tick's minute boundary, both in seconds.
    ///
    /// An unresolvable time zone only skips that zone's users; a job
    /// database error aborts the whole tick with no partial dispatch.
    pub async fn process_tick(&self, for_time: i64, planned_time: i64) -> Result<()> {
        debug!(for_time, planned_time, "processing tick");

        let planned_utc = DateTime::from_timestamp(planned_time, 0)
            .context("planned time out of range")?;
        let label = BatchLabel {
            year: planned_utc.year(),
            month: planned_utc.month(),
            mday: planned_utc.day(),
            hour: planned_utc.hour(),
            minute: planned_utc.minute(),
        };
        let mut pool = WorkerPool::new(label, self.client.clone(), self.queue.clone());

        let zones = self
            .db
            .distinct_timezones()
            .await
            .context("listing user time zones")?;

        for zone in zones {
            let tz: Tz = match zone.parse() {
                Ok(tz) => tz,
                Err(_) => {
                    warn!(timezone = %zone, "unknown time zone, skipping");
                    continue;
                }
            };
            let Some(civil) = CivilTime::of(for_time, tz) else {
                warn!(timezone = %zone, for_time, "instant not representable, skipping");
                continue;
            };

            let jobs = self
                .db
                .due_jobs(&civil, &zone)
                .await
                .with_context(|| format!("querying due jobs for {zone}"))?;
            debug!(timezone = %zone, jobs = jobs.len(), "matched jobs");

            for job in jobs {
                let headers = if job.header_count > 0 {
                    self.db
                        .job_headers(job.jobid)
                        .await
                        .with_context(|| format!("loading headers for job {}", job.jobid))?
                } else {
                    Vec::new()
                };

                pool.add_job(HttpRequest::from_due_job(job, headers, planned_time));
            }
        }

        if pool.is_empty() {
            debug!("no jobs due");
        } else {
            pool.run().await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(tz: Tz, y: i32, mo: u32, d: u32, h: u32, mi: u32) -> i64 {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap().timestamp()
    }

    #[test]
    fn test_utc_decomposition() {
        let ts = at(chrono_tz::Etc::UTC, 2020, 1, 6, 10, 5);
        let civil = CivilTime::of(ts, chrono_tz::Etc::UTC).unwrap();
        assert_eq!(
            civil,
            CivilTime {
                year: 2020,
                month: 1,
                mday: 6,
                hour: 10,
                minute: 5,
                wday: 1, // Monday
            }
        );
    }

    #[test]
    fn test_weekday_mapping_sunday_is_zero() {
        // 2020-01-05 was a Sunday, 2020-01-11 a Saturday.
        let sunday = CivilTime::of(at(chrono_tz::Etc::UTC, 2020, 1, 5, 12, 0), chrono_tz::Etc::UTC)
            .unwrap();
        assert_eq!(sunday.wday, 0);

        let saturday =
            CivilTime::of(at(chrono_tz::Etc::UTC, 2020, 1, 11, 12, 0), chrono_tz::Etc::UTC)
                .unwrap();
        assert_eq!(saturday.wday, 6);
    }

    #[test]
    fn test_zone_divergence() {
        // 10:00 UTC is 05:00 in New York (winter, UTC-5): only the UTC
        // user's 10:00 schedule can match this instant.
        let ts = at(chrono_tz::Etc::UTC, 2020, 1, 6, 10, 0);
        let utc = CivilTime::of(ts, chrono_tz::Etc::UTC).unwrap();
        let ny = CivilTime::of(ts, chrono_tz::America::New_York).unwrap();
        assert_eq!(utc.hour, 10);
        assert_eq!(ny.hour, 5);

        // 15:00 UTC is New York's 10:00.
        let later = at(chrono_tz::Etc::UTC, 2020, 1, 6, 15, 0);
        let ny_later = CivilTime::of(later, chrono_tz::America::New_York).unwrap();
        assert_eq!(ny_later.hour, 10);
        assert_eq!(ny_later.minute, 0);
        assert_eq!(ny_later.mday, 6);
    }

    #[test]
    fn test_dst_transition_has_local_fields() {
        // 2020-03-08 07:00 UTC is 03:00 EDT, just after the spring-forward gap.
        let ts = at(chrono_tz::Etc::UTC, 2020, 3, 8, 7, 0);
        let ny = CivilTime::of(ts, chrono_tz::America::New_York).unwrap();
        assert_eq!(ny.hour, 3);
        assert_eq!(ny.mday, 8);
    }

    #[test]
    fn test_unknown_zone_fails_to_parse() {
        assert!("Not/AReal_Zone".parse::<Tz>().is_err());
        assert!("Etc/UTC".parse::<Tz>().is_ok());
    }
}
