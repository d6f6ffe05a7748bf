/// Task module - background workers for CPU-bound jobs

pub mod task_pool;

pub use task_pool::{FinishedTask, TaskId, TaskPool, TaskState};
