pub mod command_service;
pub mod job_scheduler;
pub mod job_service;

pub use command_service::{CommandService, SubmittedJob};
pub use job_scheduler::JobScheduler;
pub use job_service::{JobDetail, JobService, StageDetail};
