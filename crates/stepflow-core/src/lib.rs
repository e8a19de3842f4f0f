//! Stepflow engine core.
//!
//! Pure engine logic: the journal repository port, the workflow context
//! (steps, sleeps, event waits), the scheduler that drives instances
//! through their state machine, the workflow registry, and the timer
//! service that re-drives suspended instances. No infrastructure
//! dependencies -- persistence is behind [`repository::JournalRepository`].

pub mod engine;
pub mod repository;

pub use engine::context::{EventOutcome, RunError, WorkflowContext};
pub use engine::registry::{Engine, WorkflowRegistry};
pub use engine::scheduler::{EngineError, Scheduler};
pub use engine::timer::TimerService;
pub use repository::journal::JournalRepository;
pub use repository::memory::MemoryJournalRepository;
