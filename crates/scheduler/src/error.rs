use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("invalid fire time '{0}', expected HH:MM")]
    InvalidFireTime(String),

    #[error("invalid timezone '{0}'")]
    InvalidTimezone(String),

    #[error("plan {0} cannot be scheduled: {1}")]
    InvalidPlan(i64, String),
}
