//! Tasks: data model and the service layer callers mutate tasks through.

pub mod model;
pub mod service;

pub use model::{NewTask, RemoteTask, Task};
pub use service::TaskService;
