//! Picoclaw cron — persistent one-shot/interval/cron-expression jobs with
//! at-most-once firing.

pub mod service;
pub mod types;

pub use service::{CronService, OnJobFn};
pub use types::{
    compute_next_run_from, CronJob, CronJobState, CronPayload, CronSchedule, CronStore, JobStatus,
    ScheduleKind,
};
