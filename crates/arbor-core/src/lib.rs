#![doc = r"Core of the Arbor reconciler: an incremental, interruptible tree-diffing runtime."]
//!
//! Components describe a tree of [`Element`]s. A [`Root`] keeps two versions
//! of the node tree (the committed one and the one being rendered), walks
//! only the parts with pending work in priority [`Lanes`], yields to its
//! [`TaskScheduler`] between units of work and applies the resulting
//! mutations to a [`HostConfig`] in one commit.

extern crate self as arbor_core;

mod begin_work;
mod child_fibers;
pub mod collections;
mod commit_work;
mod complete_work;
pub mod config;
pub mod context;
pub mod element;
pub mod error;
pub mod fiber;
pub mod flags;
pub mod hooks;
pub mod host;
pub mod lanes;
pub mod platform;
mod ring;
pub mod root;
mod update_queue;
mod work_loop;

pub use config::RootOptions;
pub use context::{Context, ContextId};
pub use element::{
    fragment, host, text, AttrValue, Child, Component, Element, ElementType, Handler, HostRef, Key, Props,
};
pub use error::{HookError, HookKind, RenderError};
pub use fiber::{FiberId, FiberSnapshot, WorkTag};
pub use flags::Flags;
pub use hooks::{DepValue, Deps, EffectCleanup, RenderCx, SetState, StartTransition};
pub use host::{HostOp, MemoryHost, MicrotaskQueue};
pub use lanes::{lanes_to_priority, priority_to_lane, Lane, Lanes};
pub use platform::{
    AttrChange, Clock, HostConfig, InstanceId, Microtask, PriorityLevel, SchedulerTask, TaskId, TaskScheduler,
    TaskStatus, UpdatePayload,
};
pub use root::{create_root, create_root_with_options, Root, RootHandle};
pub use update_queue::Action;

#[cfg(test)]
pub(crate) mod test_support;
