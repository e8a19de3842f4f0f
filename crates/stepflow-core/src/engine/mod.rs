//! Engine internals: context, registry, scheduler, timer.

pub mod context;
pub mod registry;
pub mod scheduler;
pub mod timer;
