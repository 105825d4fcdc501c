//! Domain model: task identifiers, the task abstraction, and execution results.

pub mod ids;
pub mod task;
pub mod task_type;

pub use ids::{TaskId, TaskIdParseError};
pub use task::{AdditionalInformation, Task, TaskError, TaskResult, TaskWithId};
pub use task_type::TaskType;
