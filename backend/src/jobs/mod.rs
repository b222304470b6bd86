// Background Jobs
//
// The worker's periodic work. Jobs are scheduled with tokio-cron-scheduler and
// can also be run on demand through `JobScheduler::tick`.

pub mod scheduled_workflows;
pub mod scheduler;

pub use scheduled_workflows::{ScheduledRunResult, ScheduledWorkflowsJob};
pub use scheduler::{JobError, JobExecutionLog, JobResult, JobScheduler, JobStatus};
