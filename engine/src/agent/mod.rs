//! Agent loop
//!
//! The scheduler that drives the think-act cycle, the prompt it sends each
//! iteration and the rolling conversation window carried between iterations.

pub mod prompt;
pub mod scheduler;
pub mod working_memory;

pub use scheduler::{is_cancelled, AgentServices, Scheduler, SchedulerSettings, Tick};
pub use working_memory::WorkingMemory;
