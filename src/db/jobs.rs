//! Job queries: schedule matching, execution metadata updates, and
//! notification rows.

use sqlx::Result;

use crate::matcher::CivilTime;
use crate::result::NotificationType;

use super::Database;

/// One matched job row, joined with its schedule and body.
///
/// `header_count` is the aggregate count of `job_header` rows; the
/// header values themselves are fetched separately, and only when this
/// is non-zero.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DueJob {
    pub url: String,
    pub jobid: i32,
    pub auth_enable: bool,
    pub auth_user: String,
    pub auth_pass: String,
    pub notify_failure: bool,
    pub notify_success: bool,
    pub notify_disable: bool,
    pub fail_counter: i32,
    pub save_responses: bool,
    pub userid: i32,
    pub request_method: i32,
    pub header_count: i64,
    pub body: Option<String>,
}

impl Database {
    /// Distinct time zones across all users.
    pub async fn distinct_timezones(&self) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT DISTINCT `timezone` FROM `user`")
            .fetch_all(&self.pool)
            .await
    }

    /// Enabled jobs due at the given civil time for users in `timezone`.
    ///
    /// A schedule field matches when its set contains the civil value or
    /// the `-1` wildcard. Rows are ordered so that historically fast,
    /// reliable jobs dispatch first.
    pub async fn due_jobs(&self, civil: &CivilTime, timezone: &str) -> Result<Vec<DueJob>> {
        sqlx::query_as::<_, DueJob>(
            r"
            SELECT TRIM(`job`.`url`) AS `url`, `job`.`jobid`,
                   `job`.`auth_enable`, `job`.`auth_user`, `job`.`auth_pass`,
                   `job`.`notify_failure`, `job`.`notify_success`, `job`.`notify_disable`,
                   `job`.`fail_counter`, `job`.`save_responses`, `job`.`userid`,
                   `job`.`request_method`,
                   COUNT(`job_header`.`jobheaderid`) AS `header_count`,
                   `job_body`.`body` AS `body`
            FROM `job`
            INNER JOIN `job_hours`   ON `job_hours`.`jobid`   = `job`.`jobid`
            INNER JOIN `job_mdays`   ON `job_mdays`.`jobid`   = `job`.`jobid`
            INNER JOIN `job_wdays`   ON `job_wdays`.`jobid`   = `job`.`jobid`
            INNER JOIN `job_minutes` ON `job_minutes`.`jobid` = `job`.`jobid`
            INNER JOIN `job_months`  ON `job_months`.`jobid`  = `job`.`jobid`
            INNER JOIN `user`        ON `job`.`userid`        = `user`.`userid`
            LEFT JOIN `job_header`   ON `job_header`.`jobid`  = `job`.`jobid`
            LEFT JOIN `job_body`     ON `job_body`.`jobid`    = `job`.`jobid`
            WHERE (`job_hours`.`hour` = -1     OR `job_hours`.`hour` = ?)
              AND (`job_minutes`.`minute` = -1 OR `job_minutes`.`minute` = ?)
              AND (`job_mdays`.`mday` = -1     OR `job_mdays`.`mday` = ?)
              AND (`job_wdays`.`wday` = -1     OR `job_wdays`.`wday` = ?)
              AND (`job_months`.`month` = -1   OR `job_months`.`month` = ?)
              AND `user`.`timezone` = ?
              AND `job`.`enabled` = 1
            GROUP BY `job`.`jobid`
            ORDER BY `job`.`fail_counter` ASC, `job`.`last_duration` ASC
            ",
        )
        .bind(civil.hour)
        .bind(civil.minute)
        .bind(civil.mday)
        .bind(civil.wday)
        .bind(civil.month)
        .bind(timezone)
        .fetch_all(&self.pool)
        .await
    }

    /// Key/value request headers attached to a job.
    pub async fn job_headers(&self, job_id: i32) -> Result<Vec<(String, String)>> {
        sqlx::query_as("SELECT `key`, `value` FROM `job_header` WHERE `jobid` = ?")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await
    }

    /// Record the outcome of one execution on the job row.
    ///
    /// `reset_fail_counter` clears the consecutive-failure counter
    /// (successful runs and timeouts); otherwise it is incremented.
    pub async fn update_job_execution(
        &self,
        job_id: i32,
        status_code: i32,
        last_fetch: i64,
        last_duration: i64,
        reset_fail_counter: bool,
    ) -> Result<()> {
        let query = if reset_fail_counter {
            "UPDATE `job` SET `last_status` = ?, `last_fetch` = ?, `last_duration` = ?, \
             `fail_counter` = 0 WHERE `jobid` = ?"
        } else {
            "UPDATE `job` SET `last_status` = ?, `last_fetch` = ?, `last_duration` = ?, \
             `fail_counter` = `fail_counter` + 1 WHERE `jobid` = ?"
        };

        sqlx::query(query)
            .bind(status_code)
            .bind(last_fetch)
            .bind(last_duration)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Re-read the job's current consecutive-failure counter.
    pub async fn fail_counter(&self, job_id: i32) -> Result<i32> {
        sqlx::query_scalar("SELECT `fail_counter` FROM `job` WHERE `jobid` = ?")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await
    }

    /// Disable a job and clear its failure counter.
    pub async fn disable_job(&self, job_id: i32) -> Result<()> {
        sqlx::query("UPDATE `job` SET `enabled` = 0, `fail_counter` = 0 WHERE `jobid` = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Emit one notification row for a stored result.
    pub async fn insert_notification(
        &self,
        job_id: i32,
        joblog_id: i64,
        date: i64,
        kind: NotificationType,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO `notification`(`jobid`, `joblogid`, `date`, `type`) VALUES (?, ?, ?, ?)",
        )
        .bind(job_id)
        .bind(joblog_id)
        .bind(date)
        .bind(kind.code())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
