//! Platform abstraction traits for the Arbor runtime.
//!
//! The reconciler never touches a concrete output tree or event loop. It
//! drives a [`HostConfig`] for instance mutations and a [`TaskScheduler`] for
//! cooperative, prioritised work. Both are supplied by the embedder.

use std::fmt;

use crate::element::{AttrValue, Props};

/// Opaque handle to a host instance (element, text node or container).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub usize);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub type Microtask = Box<dyn FnOnce() + 'static>;

/// A single attribute change computed during the complete phase.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrChange {
    Set(std::rc::Rc<str>, AttrValue),
    Remove(std::rc::Rc<str>),
}

/// Attribute changes the host has to apply to an existing instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdatePayload {
    pub changes: Vec<AttrChange>,
}

impl UpdatePayload {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Mutation surface of the output tree.
///
/// All calls happen on the thread driving the root, either while a node
/// completes (instance creation) or during the commit phase (everything
/// else). Implementations are free to log or batch them.
pub trait HostConfig: 'static {
    /// Create an element instance of type `ty`, initialised from `props`.
    fn create_instance(&mut self, ty: &str, props: &Props) -> InstanceId;

    /// Create a text instance.
    fn create_text_instance(&mut self, content: &str) -> InstanceId;

    /// Append `child` as the last child of `parent`, moving it if it is
    /// already attached somewhere.
    fn append_child(&mut self, parent: InstanceId, child: InstanceId);

    /// Insert `child` into `parent` right before `before`.
    fn insert_before(&mut self, parent: InstanceId, child: InstanceId, before: InstanceId);

    fn remove_child(&mut self, parent: InstanceId, child: InstanceId);

    fn commit_text_update(&mut self, instance: InstanceId, content: &str);

    /// Apply the attribute diff produced while the instance's node completed.
    fn commit_update(&mut self, instance: InstanceId, payload: &UpdatePayload);

    /// Run `task` after the current synchronous call stack unwinds but before
    /// any scheduler callback.
    fn schedule_microtask(&mut self, task: Microtask);
}

/// Scheduler priorities, most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PriorityLevel {
    Immediate,
    UserBlocking,
    Normal,
    Low,
    Idle,
}

/// Token returned by [`TaskScheduler::schedule_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

/// Result of running a scheduled task once.
pub enum TaskStatus {
    Done,
    /// The task yielded and wants to be resumed with the returned
    /// continuation under the same [`TaskId`] and priority.
    Continue(SchedulerTask),
}

/// A unit of scheduled work. The flag passed to [`SchedulerTask::run`]
/// reports whether the task's deadline has already expired.
pub struct SchedulerTask(Box<dyn FnOnce(bool) -> TaskStatus + 'static>);

impl SchedulerTask {
    pub fn new(task: impl FnOnce(bool) -> TaskStatus + 'static) -> Self {
        Self(Box::new(task))
    }

    pub fn run(self, did_timeout: bool) -> TaskStatus {
        (self.0)(did_timeout)
    }
}

impl fmt::Debug for SchedulerTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SchedulerTask")
    }
}

/// Cooperative, priority-ordered task queue.
///
/// Implementations run tasks on the thread that owns the root. A task that
/// returns [`TaskStatus::Continue`] keeps its token and priority; cancelling
/// a task while it runs discards its continuation.
pub trait TaskScheduler {
    fn schedule_callback(&self, priority: PriorityLevel, task: SchedulerTask) -> TaskId;

    fn cancel_callback(&self, id: TaskId);

    /// Whether the currently running task should hand control back.
    fn should_yield(&self) -> bool;

    /// Run `f` with the ambient priority set to `priority`.
    fn run_with_priority(&self, priority: PriorityLevel, f: &mut dyn FnMut());

    /// Priority of the task (or `run_with_priority` scope) currently running.
    fn current_priority_level(&self) -> PriorityLevel;
}

/// Provides timing information for schedulers.
pub trait Clock {
    /// Instant type produced by this clock implementation.
    type Instant: Copy;

    /// Returns the current instant.
    fn now(&self) -> Self::Instant;

    /// Returns the number of milliseconds elapsed since `since`.
    fn elapsed_millis(&self, since: Self::Instant) -> u64;
}
