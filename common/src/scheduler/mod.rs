// Scheduler module: per-type polling loops, cron producers and the stale-claim reaper

pub mod engine;
pub mod producer;
pub mod reaper;

pub use engine::{run_tick, JobTypeSchedule, Scheduler, SchedulerEngine};
pub use producer::{JobProducer, ProducerEngine, ProjectSource};
pub use reaper::{Reaper, ReaperSettings};
