//! Watch registry and control loop
//!
//! One [`ControlLoop`] runs per watch spec variant and exclusively owns the
//! registry map. [`WatchRegistry`] handles reach it by message passing.

mod r#loop;
mod registry;


pub use r#loop::{ControlLoop, TickResults, DEFAULT_CHECK_INTERVAL};
pub use registry::WatchRegistry;
