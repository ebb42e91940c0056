//! Testing utilities and harness for Arbor

pub mod scheduler;
pub mod testing;

// Re-export testing utilities
pub use arbor_core::MicrotaskQueue;
pub use scheduler::TestScheduler;
pub use testing::*;

pub mod prelude {
    pub use crate::scheduler::TestScheduler;
    pub use crate::testing::*;
    pub use arbor_core::{deps, Child, Component, Deps, HostOp, Lanes, Props, RenderCx, RenderError, SetState};
}
