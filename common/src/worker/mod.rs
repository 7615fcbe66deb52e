// Worker module: turns claimed jobs into handler calls and terminal states

pub mod dispatcher;

pub use dispatcher::{DispatchOutcome, TaskDispatcher};
