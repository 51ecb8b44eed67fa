//! Parsing of streamed Ansible console output: line classification, the
//! play/task/result accumulator and recap tallies.

pub mod classify;
pub mod recap;
pub mod state;

pub use classify::{classify, classify_text, LineEvent, ResultStatus};
pub use recap::RecapEntry;
pub use state::{Counters, ExecutionState, Play, PlayId, Task, TaskId, TaskResult, TaskStatus};
