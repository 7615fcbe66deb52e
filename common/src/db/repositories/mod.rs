// Repository layer for database operations

pub mod job;
pub mod project;

pub use job::JobRepository;
pub use project::ProjectRepository;
