//! Application Services
//!
//! The feed manager task, the handle callers use to drive it and the timer
//! scheduler it owns.

mod handle;
mod manager;
mod scheduler;

pub use handle::{FeedHandle, ManagerError};
pub use manager::FeedManager;
pub use scheduler::{Scheduler, TimerKind};
