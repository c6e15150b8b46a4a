use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::access::AccessError;
use crate::error::AppError;
use crate::models::{Job, NewJob};
use crate::schema::jobs;

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_FAILED: &str = "failed";

pub const JOB_CATEGORIZE_DOCUMENT: &str = "categorize-document";

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

impl From<JobQueueError> for AccessError {
    fn from(err: JobQueueError) -> Self {
        match err {
            JobQueueError::Database(err) => AccessError::Database(err),
        }
    }
}

impl From<JobQueueError> for AppError {
    fn from(err: JobQueueError) -> Self {
        AccessError::from(err).into()
    }
}

pub fn enqueue_job(
    conn: &mut PgConnection,
    job_type: &str,
    payload: Value,
    run_after: Option<NaiveDateTime>,
) -> JobQueueResult<Job> {
    let new_job = NewJob {
        id: Uuid::new_v4(),
        job_type: job_type.to_string(),
        payload,
        status: STATUS_QUEUED.to_string(),
        run_after: run_after.unwrap_or_else(|| Utc::now().naive_utc()),
    };

    let job = diesel::insert_into(jobs::table)
        .values(&new_job)
        .get_result(conn)?;
    Ok(job)
}

pub fn reserve_job(conn: &mut PgConnection, job_types: &[&str]) -> JobQueueResult<Option<Job>> {
    let now = Utc::now().naive_utc();

    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        let job_opt = jobs::table
            .filter(jobs::status.eq(STATUS_QUEUED))
            .filter(jobs::run_after.le(now))
            .filter(jobs::job_type.eq_any(job_types))
            .order(jobs::run_after.asc())
            .for_update()
            .skip_locked()
            .first::<Job>(conn)
            .optional()?;

        match job_opt {
            Some(job) => diesel::update(jobs::table.find(job.id))
                .set((
                    jobs::status.eq(STATUS_PROCESSING),
                    jobs::attempts.eq(job.attempts + 1),
                    jobs::updated_at.eq(now),
                ))
                .get_result::<Job>(conn)
                .map(Some),
            None => Ok(None),
        }
    })
    .map_err(JobQueueError::from)
}

/// Where a reserved job goes once its handler has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Succeeded,
    RetryAfter { delay: Duration, error: String },
    Failed { error: String },
}

impl Settlement {
    fn status(&self) -> &'static str {
        match self {
            Settlement::Succeeded => STATUS_SUCCEEDED,
            Settlement::RetryAfter { .. } => STATUS_QUEUED,
            Settlement::Failed { .. } => STATUS_FAILED,
        }
    }

    fn last_error(&self) -> Option<String> {
        match self {
            Settlement::Succeeded => None,
            Settlement::RetryAfter { error, .. } | Settlement::Failed { error } => {
                Some(error.clone())
            }
        }
    }
}

/// Delays chrono cannot represent fall back to thirty seconds.
pub fn next_run_at(now: NaiveDateTime, delay: Duration) -> NaiveDateTime {
    now + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(30))
}

pub fn settle_job(
    conn: &mut PgConnection,
    job_id: Uuid,
    settlement: &Settlement,
) -> JobQueueResult<()> {
    let now = Utc::now().naive_utc();
    let target = jobs::table.find(job_id);
    let changes = (
        jobs::status.eq(settlement.status()),
        jobs::last_error.eq(settlement.last_error()),
        jobs::updated_at.eq(now),
    );

    match settlement {
        Settlement::RetryAfter { delay, .. } => diesel::update(target)
            .set((changes, jobs::run_after.eq(next_run_at(now, *delay))))
            .execute(conn)?,
        _ => diesel::update(target).set(changes).execute(conn)?,
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_is_scheduled_after_the_delay() {
        let now = Utc::now().naive_utc();
        assert_eq!(
            next_run_at(now, Duration::from_secs(90)),
            now + ChronoDuration::seconds(90)
        );
        assert_eq!(
            next_run_at(now, Duration::MAX),
            now + ChronoDuration::seconds(30)
        );
    }

    #[test]
    fn settlements_map_to_queue_states() {
        let retry = Settlement::RetryAfter {
            delay: Duration::from_secs(5),
            error: "storage unavailable".into(),
        };
        assert_eq!(retry.status(), STATUS_QUEUED);
        assert_eq!(retry.last_error().as_deref(), Some("storage unavailable"));
        assert_eq!(Settlement::Succeeded.status(), STATUS_SUCCEEDED);
        assert_eq!(Settlement::Succeeded.last_error(), None);
        let failed = Settlement::Failed { error: "bad payload".into() };
        assert_eq!(failed.status(), STATUS_FAILED);
    }
}
