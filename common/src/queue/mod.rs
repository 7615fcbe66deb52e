// Queue module: claiming work from the job store

pub mod poller;

pub use poller::{PollOutcome, QueuePoller};
