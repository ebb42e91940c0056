//! Roots: the entry point that owns a fiber tree, a host and the glue to a
//! task scheduler.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::config::RootOptions;
use crate::element::Child;
use crate::error::RenderError;
use crate::fiber::{FiberId, FiberSnapshot};
use crate::flags::EffectTag;
use crate::hooks::{PendingUpdate, UpdateSink};
use crate::lanes::{lanes_to_priority, priority_to_lane, Lane, Lanes};
use crate::platform::{HostConfig, InstanceId, Microtask, PriorityLevel, SchedulerTask, TaskScheduler, TaskStatus};
use crate::update_queue::{Action, Update, UpdateQueue};
use crate::work_loop::{RenderExit, RootCore, WalkPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutionContext {
    Idle,
    Render,
    Commit,
}

struct RootState<H> {
    core: RootCore,
    host: H,
}

struct RootShared<H: HostConfig> {
    state: RefCell<RootState<H>>,
    scheduler: Rc<dyn TaskScheduler>,
    options: RootOptions,
    /// The host root node. Either version works for scheduling because
    /// lanes are marked on both.
    host_root: FiberId,
    root_queue: Rc<UpdateQueue<Child>>,
    execution: Cell<ExecutionContext>,
    /// Updates issued while the tree was being rendered or committed.
    deferred: RefCell<Vec<PendingUpdate>>,
    sync_queue: RefCell<Vec<Microtask>>,
    flushing_sync: Cell<bool>,
    microtask_pending: Cell<bool>,
    transition_depth: Cell<u32>,
    last_error: RefCell<Option<RenderError>>,
    this: Weak<RootShared<H>>,
    sink: Weak<dyn UpdateSink>,
}

impl<H: HostConfig> RootShared<H> {
    fn label(&self) -> &str {
        &self.options.label
    }

    fn schedule_on_fiber(&self, state: &mut RootState<H>, fiber: FiberId, lane: Lane) {
        if !state.core.mark_update_lane(fiber, lane) {
            log::warn!("[{}] update on unmounted node {:?} ignored", self.label(), fiber);
            return;
        }
        state.core.failed_lanes.remove(lane);
        state.core.pending_lanes |= lane;
        if state.core.walk.phase == WalkPhase::Interrupted && state.core.walk.lanes.intersects(lane) {
            // The paused walk may already have passed this node.
            log::debug!("[{}] restarting interrupted render at {:?}", self.label(), lane);
            state.core.discard_walk();
        }
        self.ensure_root_is_scheduled(state);
    }

    fn apply_deferred(&self, state: &mut RootState<H>) {
        loop {
            let batch = std::mem::take(&mut *self.deferred.borrow_mut());
            if batch.is_empty() {
                return;
            }
            for update in batch {
                let (fiber, lane) = update.enqueue();
                self.schedule_on_fiber(state, fiber, lane);
            }
        }
    }

    /// Make sure exactly one callback is queued for the most urgent pending
    /// lane.
    fn ensure_root_is_scheduled(&self, state: &mut RootState<H>) {
        let core = &mut state.core;
        let lane = core.pending_lanes.highest_priority();
        if lane.is_empty() {
            if let Some(task) = core.callback_node.take() {
                self.scheduler.cancel_callback(task);
            }
            core.callback_priority = Lanes::empty();
            return;
        }
        if lane == core.callback_priority {
            return;
        }
        if let Some(task) = core.callback_node.take() {
            log::debug!("[{}] replacing callback {:?} for {:?}", self.label(), task, lane);
            self.scheduler.cancel_callback(task);
        }

        if lane.is_sync() {
            log::debug!("[{}] scheduling sync render", self.label());
            let this = self.this.clone();
            self.sync_queue.borrow_mut().push(Box::new(move || {
                if let Some(root) = this.upgrade() {
                    root.perform_sync_work_on_root();
                }
            }));
            if !self.microtask_pending.replace(true) {
                let this = self.this.clone();
                state.host.schedule_microtask(Box::new(move || {
                    if let Some(root) = this.upgrade() {
                        root.microtask_pending.set(false);
                        root.flush_sync_callbacks();
                    }
                }));
            }
        } else {
            let priority = lanes_to_priority(lane);
            log::debug!("[{}] scheduling {:?} render at {:?}", self.label(), lane, priority);
            let this = self.this.clone();
            let task = self.scheduler.schedule_callback(
                priority,
                SchedulerTask::new(move |did_timeout| perform_concurrent_work(this, did_timeout)),
            );
            core.callback_node = Some(task);
        }
        core.callback_priority = lane;
    }

    fn flush_sync_callbacks(&self) {
        if self.flushing_sync.replace(true) {
            return;
        }
        loop {
            let batch = std::mem::take(&mut *self.sync_queue.borrow_mut());
            if batch.is_empty() {
                break;
            }
            for callback in batch {
                callback();
            }
        }
        self.flushing_sync.set(false);
    }

    fn render(&self, state: &mut RootState<H>, lanes: Lanes, time_slice: bool) -> RenderExit {
        self.apply_deferred(state);
        let previous = self.execution.replace(ExecutionContext::Render);
        let scheduler = self.scheduler.clone();
        let should_yield = move || scheduler.should_yield();
        let yield_check: Option<&dyn Fn() -> bool> = if time_slice { Some(&should_yield) } else { None };
        let RootState { core, host } = state;
        let exit = core.render_root(host, &self.sink, &self.options, lanes, yield_check);
        self.execution.set(previous);
        exit
    }

    fn commit(&self, state: &mut RootState<H>, finished: FiberId) {
        let previous = self.execution.replace(ExecutionContext::Commit);
        state.core.callback_node = None;
        state.core.callback_priority = Lanes::empty();
        let RootState { core, host } = state;
        let has_passive = core.commit_root(host, finished, &self.options.label);
        self.execution.set(previous);

        if has_passive && !core.passive_scheduled {
            core.passive_scheduled = true;
            let this = self.this.clone();
            self.scheduler.schedule_callback(
                PriorityLevel::Normal,
                SchedulerTask::new(move |_| {
                    if let Some(root) = this.upgrade() {
                        root.flush_passive_effects();
                    }
                    TaskStatus::Done
                }),
            );
        }
        self.apply_deferred(state);
        self.ensure_root_is_scheduled(state);
    }

    fn fail(&self, state: &mut RootState<H>, lanes: Lanes, error: RenderError) {
        log::error!("[{}] render at {:?} aborted: {error}", self.label(), lanes);
        state.core.mark_lanes_failed(lanes);
        state.core.callback_node = None;
        state.core.callback_priority = Lanes::empty();
        *self.last_error.borrow_mut() = Some(error);
    }

    fn perform_sync_work_on_root(&self) {
        self.flush_passive_effects();
        let Ok(mut state) = self.state.try_borrow_mut() else {
            log::error!("[{}] sync render requested while the root is busy", self.label());
            return;
        };
        let state = &mut *state;
        state.core.callback_priority = Lanes::empty();
        let lanes = state.core.pending_lanes.highest_priority();
        if !lanes.is_sync() {
            self.ensure_root_is_scheduled(state);
            return;
        }
        match self.render(state, lanes, false) {
            RenderExit::Completed(finished) => self.commit(state, finished),
            RenderExit::Failed(error) => self.fail(state, lanes, error),
            RenderExit::Yielded => self.fail(state, lanes, RenderError::UnfinishedSyncWalk),
        }
        self.apply_deferred(state);
        self.ensure_root_is_scheduled(state);
    }

    fn perform_concurrent_work_on_root(&self, did_timeout: bool) -> TaskStatus {
        let original = match self.state.try_borrow() {
            Ok(state) => state.core.callback_node,
            Err(_) => return TaskStatus::Done,
        };
        let flushed = self.flush_passive_effects();
        let Ok(mut state) = self.state.try_borrow_mut() else {
            return TaskStatus::Done;
        };
        let state = &mut *state;
        if flushed && state.core.callback_node != original {
            // A passive effect scheduled something more urgent.
            return TaskStatus::Done;
        }
        let lanes = state.core.pending_lanes.highest_priority();
        if lanes.is_empty() {
            state.core.callback_node = None;
            state.core.callback_priority = Lanes::empty();
            return TaskStatus::Done;
        }

        let time_slice = !lanes.is_sync() && !did_timeout;
        if did_timeout {
            log::debug!("[{}] {:?} expired; rendering synchronously", self.label(), lanes);
        }
        match self.render(state, lanes, time_slice) {
            RenderExit::Yielded => {
                self.apply_deferred(state);
                self.ensure_root_is_scheduled(state);
                if original.is_some() && state.core.callback_node == original {
                    let this = self.this.clone();
                    return TaskStatus::Continue(SchedulerTask::new(move |did_timeout| {
                        perform_concurrent_work(this, did_timeout)
                    }));
                }
                TaskStatus::Done
            }
            RenderExit::Completed(finished) => {
                self.commit(state, finished);
                TaskStatus::Done
            }
            RenderExit::Failed(error) => {
                self.fail(state, lanes, error);
                self.apply_deferred(state);
                self.ensure_root_is_scheduled(state);
                TaskStatus::Done
            }
        }
    }

    /// Run pending passive effects: every cleanup of unmounted components,
    /// then cleanups of effects that fire again, then their bodies.
    fn flush_passive_effects(&self) -> bool {
        let pending = {
            let Ok(mut state) = self.state.try_borrow_mut() else {
                return false;
            };
            state.core.passive_scheduled = false;
            std::mem::take(&mut state.core.passive)
        };
        if pending.is_empty() {
            return false;
        }
        let firing = EffectTag::PASSIVE | EffectTag::HAS_EFFECT;
        for effect in &pending.unmount {
            effect.run_destroy();
        }
        for effects in &pending.update {
            for effect in effects.iter().filter(|effect| effect.tag().contains(firing)) {
                effect.run_destroy();
            }
        }
        for effects in &pending.update {
            for effect in effects.iter().filter(|effect| effect.tag().contains(firing)) {
                effect.run_create();
            }
        }
        self.flush_sync_callbacks();
        true
    }
}

fn perform_concurrent_work<H: HostConfig>(root: Weak<RootShared<H>>, did_timeout: bool) -> TaskStatus {
    match root.upgrade() {
        Some(root) => root.perform_concurrent_work_on_root(did_timeout),
        None => TaskStatus::Done,
    }
}

impl<H: HostConfig> UpdateSink for RootShared<H> {
    fn request_update_lane(&self) -> Lane {
        if self.transition_depth.get() > 0 {
            return Lanes::TRANSITION;
        }
        priority_to_lane(self.scheduler.current_priority_level())
    }

    fn is_fiber_idle(&self, fiber: FiberId) -> bool {
        if self.execution.get() != ExecutionContext::Idle {
            return false;
        }
        match self.state.try_borrow() {
            Ok(state) => state.core.is_idle_fiber(fiber),
            Err(_) => false,
        }
    }

    fn schedule_update(&self, update: PendingUpdate) {
        if self.execution.get() != ExecutionContext::Idle {
            self.deferred.borrow_mut().push(update);
            return;
        }
        match self.state.try_borrow_mut() {
            Ok(mut state) => {
                let state = &mut *state;
                let (fiber, lane) = update.enqueue();
                self.schedule_on_fiber(state, fiber, lane);
                self.apply_deferred(state);
            }
            Err(_) => self.deferred.borrow_mut().push(update),
        }
    }

    fn with_transition(&self, scope: &mut dyn FnMut()) {
        self.transition_depth.set(self.transition_depth.get() + 1);
        scope();
        self.transition_depth.set(self.transition_depth.get() - 1);
    }
}

/// Weak, type-erased handle to a root. Lets code outside the root (and
/// components) open transition scopes.
#[derive(Clone)]
pub struct RootHandle {
    sink: Weak<dyn UpdateSink>,
}

impl RootHandle {
    pub(crate) fn new(sink: Weak<dyn UpdateSink>) -> Self {
        Self { sink }
    }

    /// Run `scope` so that every update it makes uses the transition lane.
    pub fn start_transition(&self, scope: impl FnOnce()) {
        match self.sink.upgrade() {
            Some(sink) => {
                let mut scope = Some(scope);
                sink.with_transition(&mut || {
                    if let Some(scope) = scope.take() {
                        scope();
                    }
                });
            }
            None => scope(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.sink.strong_count() > 0
    }
}

/// A reconciler root rendering into `container` on host `H`.
pub struct Root<H: HostConfig> {
    shared: Rc<RootShared<H>>,
}

pub fn create_root<H: HostConfig>(host: H, container: InstanceId, scheduler: Rc<dyn TaskScheduler>) -> Root<H> {
    create_root_with_options(host, container, scheduler, RootOptions::default())
}

pub fn create_root_with_options<H: HostConfig>(
    host: H,
    container: InstanceId,
    scheduler: Rc<dyn TaskScheduler>,
    options: RootOptions,
) -> Root<H> {
    let root_queue = Rc::new(UpdateQueue::new(None));
    let core = RootCore::new(container, root_queue.clone());
    let host_root = core.current;
    log::debug!("[{}] created root in container {container}", options.label);
    let shared = Rc::new_cyclic(|this: &Weak<RootShared<H>>| {
        let sink: Weak<dyn UpdateSink> = this.clone();
        RootShared {
            state: RefCell::new(RootState { core, host }),
            scheduler,
            options,
            host_root,
            root_queue,
            execution: Cell::new(ExecutionContext::Idle),
            deferred: RefCell::new(Vec::new()),
            sync_queue: RefCell::new(Vec::new()),
            flushing_sync: Cell::new(false),
            microtask_pending: Cell::new(false),
            transition_depth: Cell::new(0),
            last_error: RefCell::new(None),
            this: this.clone(),
            sink,
        }
    });
    Root { shared }
}

impl<H: HostConfig> Root<H> {
    /// Schedule a synchronous render of `child` into the container. The
    /// render happens in the next microtask or on [`Root::flush_sync`].
    pub fn render(&self, child: impl Into<Child>) {
        let element = child.into();
        let queue = self.shared.root_queue.clone();
        let lane = Lanes::SYNC;
        self.shared
            .schedule_update(PendingUpdate::new(self.shared.host_root, lane, move || {
                queue.enqueue(Update {
                    lane,
                    action: Action::Replace(element),
                    eager_state: None,
                })
            }));
    }

    /// Render nothing, unmounting every component and running their cleanups
    /// on the next passive flush.
    pub fn unmount(&self) {
        self.render(Child::Empty);
    }

    /// Run queued synchronous work now instead of waiting for the microtask.
    pub fn flush_sync(&self) -> Result<(), RenderError> {
        self.shared.flush_sync_callbacks();
        self.take_error().map_or(Ok(()), Err)
    }

    /// Run pending passive effects now. Returns whether any were pending.
    pub fn flush_passive_effects(&self) -> bool {
        self.shared.flush_passive_effects()
    }

    /// The error that aborted the most recent failed render, if any.
    pub fn take_error(&self) -> Option<RenderError> {
        self.shared.last_error.borrow_mut().take()
    }

    pub fn start_transition(&self, scope: impl FnOnce()) {
        self.handle().start_transition(scope);
    }

    pub fn handle(&self) -> RootHandle {
        RootHandle::new(self.shared.sink.clone())
    }

    pub fn container(&self) -> Result<InstanceId, RenderError> {
        self.read(|state| state.core.container)
    }

    pub fn pending_lanes(&self) -> Result<Lanes, RenderError> {
        self.read(|state| state.core.pending_lanes)
    }

    pub fn has_pending_work(&self) -> bool {
        self.read(|state| !state.core.pending_lanes.is_empty() || !state.core.passive.is_empty())
            .unwrap_or(true)
    }

    /// Number of live nodes in the arena, both versions included.
    pub fn node_count(&self) -> Result<usize, RenderError> {
        self.read(|state| state.core.arena.len())
    }

    /// Copy of the committed tree.
    pub fn snapshot(&self) -> Result<FiberSnapshot, RenderError> {
        self.read(|state| FiberSnapshot::capture(&state.core.arena, state.core.current))
    }

    pub fn with_host<R>(&self, f: impl FnOnce(&H) -> R) -> Result<R, RenderError> {
        self.read(|state| f(&state.host))
    }

    pub fn with_host_mut<R>(&self, f: impl FnOnce(&mut H) -> R) -> Result<R, RenderError> {
        let mut state = self.shared.state.try_borrow_mut().map_err(|_| RenderError::RootBusy)?;
        let result = f(&mut state.host);
        self.shared.apply_deferred(&mut state);
        Ok(result)
    }

    fn read<R>(&self, f: impl FnOnce(&RootState<H>) -> R) -> Result<R, RenderError> {
        let state = self.shared.state.try_borrow().map_err(|_| RenderError::RootBusy)?;
        Ok(f(&state))
    }
}

#[cfg(test)]
#[path = "tests/root_tests.rs"]
mod tests;
