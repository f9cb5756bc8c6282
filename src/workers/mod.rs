pub mod payment_scheduler;

pub use payment_scheduler::{PaymentScheduler, PollJob, SchedulerConfig, SchedulerStatus};
