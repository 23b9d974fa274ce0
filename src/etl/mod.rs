//! ETL orchestration and its scheduling trigger.

mod pipeline;
mod scheduler;

pub use pipeline::*;
pub use scheduler::*;
