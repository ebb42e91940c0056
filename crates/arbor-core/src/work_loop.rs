//! The render walk and the commit driver for one root.
//!
//! A walk is an explicit state machine stored on the root: it starts from a
//! fresh in-progress copy of the root node, advances one unit at a time and
//! can stop between units. A later call with the same lanes resumes from
//! the saved position; a call with other lanes throws the partial tree away.

use std::rc::{Rc, Weak};

use crate::begin_work::begin_work;
use crate::commit_work::{
    commit_layout_effects, commit_mutation_effects, CommitCx, PendingPassiveEffects, MUTATION_PASS,
};
use crate::complete_work::complete_work;
use crate::config::RootOptions;
use crate::context::ContextStack;
use crate::element::Child;
use crate::error::RenderError;
use crate::fiber::{
    create_work_in_progress, Fiber, FiberArena, FiberId, FiberProps, FiberQueue, FiberState, RootFiberState,
    WorkTag,
};
use crate::flags::Flags;
use crate::hooks::UpdateSink;
use crate::lanes::Lanes;
use crate::platform::{HostConfig, InstanceId, TaskId};
use crate::update_queue::UpdateQueue;

/// Everything the begin and complete phases need while walking.
pub(crate) struct WorkCx<'a> {
    pub(crate) arena: &'a mut FiberArena,
    pub(crate) contexts: &'a mut ContextStack,
    pub(crate) host: &'a mut dyn HostConfig,
    pub(crate) sink: &'a Weak<dyn UpdateSink>,
    pub(crate) render_lanes: Lanes,
    pub(crate) strict: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WalkPhase {
    Idle,
    Rendering,
    Interrupted,
    Completed,
}

pub(crate) struct Walk {
    pub(crate) phase: WalkPhase,
    /// In-progress copy of the root node.
    pub(crate) root: Option<FiberId>,
    /// Next unit to begin; the resumption point after a yield.
    pub(crate) next: Option<FiberId>,
    pub(crate) lanes: Lanes,
}

impl Walk {
    fn idle() -> Self {
        Self {
            phase: WalkPhase::Idle,
            root: None,
            next: None,
            lanes: Lanes::empty(),
        }
    }
}

pub(crate) enum RenderExit {
    Completed(FiberId),
    Yielded,
    Failed(RenderError),
}

/// Scheduling-independent state of a root.
pub(crate) struct RootCore {
    pub(crate) arena: FiberArena,
    pub(crate) container: InstanceId,
    pub(crate) current: FiberId,
    pub(crate) pending_lanes: Lanes,
    /// Lanes whose last render failed. They stay out of `pending_lanes` until
    /// a new update arrives in them.
    pub(crate) failed_lanes: Lanes,
    pub(crate) callback_node: Option<TaskId>,
    pub(crate) callback_priority: Lanes,
    pub(crate) walk: Walk,
    pub(crate) contexts: ContextStack,
    pub(crate) passive: PendingPassiveEffects,
    pub(crate) passive_scheduled: bool,
}

impl RootCore {
    pub(crate) fn new(container: InstanceId, queue: Rc<UpdateQueue<Child>>) -> Self {
        let mut arena = FiberArena::new();
        let mut fiber = Fiber::new(WorkTag::Root, FiberProps::Root, None);
        fiber.state_node = Some(container);
        fiber.memoized_props = FiberProps::Root;
        fiber.memoized_state = FiberState::Root(RootFiberState::default());
        fiber.update_queue = FiberQueue::Root(queue);
        let current = arena.insert(fiber);
        Self {
            arena,
            container,
            current,
            pending_lanes: Lanes::empty(),
            failed_lanes: Lanes::empty(),
            callback_node: None,
            callback_priority: Lanes::empty(),
            walk: Walk::idle(),
            contexts: ContextStack::default(),
            passive: PendingPassiveEffects::default(),
            passive_scheduled: false,
        }
    }

    /// Record `lane` on `fiber`, its alternate and the child lanes of every
    /// ancestor. Returns false when the node is no longer attached to a root.
    pub(crate) fn mark_update_lane(&mut self, fiber: FiberId, lane: Lanes) -> bool {
        if !self.arena.contains(fiber) {
            return false;
        }
        self.arena[fiber].lanes |= lane;
        if let Some(alternate) = self.arena.live_alternate(fiber) {
            self.arena[alternate].lanes |= lane;
        }
        let mut node = fiber;
        while let Some(parent) = self.arena[node].parent.filter(|p| self.arena.contains(*p)) {
            self.arena[parent].child_lanes |= lane;
            if let Some(alternate) = self.arena.live_alternate(parent) {
                self.arena[alternate].child_lanes |= lane;
            }
            node = parent;
        }
        self.arena[node].tag == WorkTag::Root
    }

    /// Drop `lanes` from scheduling after a failed render. Their updates
    /// stay queued on the nodes.
    pub(crate) fn mark_lanes_failed(&mut self, lanes: Lanes) {
        self.failed_lanes |= lanes;
        self.pending_lanes.remove(lanes);
    }

    pub(crate) fn is_idle_fiber(&self, fiber: FiberId) -> bool {
        let Some(node) = self.arena.get(fiber) else {
            return false;
        };
        let alternate_idle = self
            .arena
            .live_alternate(fiber)
            .map_or(true, |alternate| self.arena[alternate].lanes.is_empty());
        node.lanes.is_empty() && alternate_idle
    }

    fn prepare_fresh_stack(&mut self, lanes: Lanes, label: &str) {
        if self.walk.root.is_some() {
            let freed = self.arena.discard_created();
            log::debug!("[{label}] discarding unfinished render at {:?} ({freed} nodes freed)", self.walk.lanes);
        }
        self.contexts.clear();
        let root = create_work_in_progress(&mut self.arena, self.current, FiberProps::Root);
        self.walk = Walk {
            phase: WalkPhase::Rendering,
            root: Some(root),
            next: Some(root),
            lanes,
        };
    }

    /// Abandon the walk in progress, freeing what it allocated.
    pub(crate) fn discard_walk(&mut self) {
        if self.walk.root.is_some() {
            self.arena.discard_created();
        }
        self.contexts.clear();
        self.walk = Walk::idle();
    }

    /// Run the walk for `lanes`, resuming a matching interrupted walk.
    /// With `should_yield` the walk may stop between units.
    pub(crate) fn render_root(
        &mut self,
        host: &mut dyn HostConfig,
        sink: &Weak<dyn UpdateSink>,
        options: &RootOptions,
        lanes: Lanes,
        should_yield: Option<&dyn Fn() -> bool>,
    ) -> RenderExit {
        let resumable = self.walk.phase == WalkPhase::Interrupted && self.walk.lanes == lanes && self.walk.next.is_some();
        if resumable {
            log::debug!("[{}] resuming render at {:?}", options.label, lanes);
        } else {
            self.prepare_fresh_stack(lanes, &options.label);
        }
        self.walk.phase = WalkPhase::Rendering;

        let mut cx = WorkCx {
            arena: &mut self.arena,
            contexts: &mut self.contexts,
            host,
            sink,
            render_lanes: lanes,
            strict: options.strict,
        };
        if let Err(error) = work_loop(&mut cx, &mut self.walk.next, should_yield) {
            self.discard_walk();
            return RenderExit::Failed(error);
        }

        match (self.walk.next, self.walk.root) {
            (Some(_), _) if should_yield.is_some() => {
                log::debug!("[{}] render at {:?} yielded", options.label, lanes);
                self.walk.phase = WalkPhase::Interrupted;
                RenderExit::Yielded
            }
            (Some(_), _) => {
                self.discard_walk();
                RenderExit::Failed(RenderError::UnfinishedSyncWalk)
            }
            (None, Some(root)) => {
                self.walk.phase = WalkPhase::Completed;
                RenderExit::Completed(root)
            }
            (None, None) => RenderExit::Failed(RenderError::RootUnavailable),
        }
    }

    /// Apply a completed walk. Returns true when passive effects are waiting.
    pub(crate) fn commit_root(&mut self, host: &mut dyn HostConfig, finished: FiberId, label: &str) -> bool {
        let lanes = self.walk.lanes;
        self.walk = Walk::idle();

        let root = &self.arena[finished];
        self.pending_lanes = (root.lanes | root.child_lanes).difference(self.failed_lanes);
        let effects = root.flags | root.subtree_flags;

        let mut cx = CommitCx {
            arena: &mut self.arena,
            host,
            passive: &mut self.passive,
            deleted: Vec::new(),
        };
        if effects.intersects(MUTATION_PASS | Flags::REF) {
            commit_mutation_effects(&mut cx, finished);
        }
        self.current = finished;
        if effects.intersects(Flags::LAYOUT_MASK) {
            commit_layout_effects(&mut cx, finished);
        }

        let deleted = std::mem::take(&mut cx.deleted);
        self.arena.keep_created();
        let mut freed = 0;
        for subtree in &deleted {
            freed += self.arena.free_subtree(*subtree);
        }
        log::debug!(
            "[{label}] committed {:?}; remaining {:?}; {} subtrees deleted ({freed} nodes freed)",
            lanes,
            self.pending_lanes,
            deleted.len()
        );
        !self.passive.is_empty()
    }
}

fn work_loop(
    cx: &mut WorkCx<'_>,
    next: &mut Option<FiberId>,
    should_yield: Option<&dyn Fn() -> bool>,
) -> Result<(), RenderError> {
    while let Some(unit) = *next {
        *next = perform_unit_of_work(cx, unit)?;
        if next.is_some() && should_yield.is_some_and(|should_yield| should_yield()) {
            break;
        }
    }
    Ok(())
}

fn perform_unit_of_work(cx: &mut WorkCx<'_>, unit: FiberId) -> Result<Option<FiberId>, RenderError> {
    let next = begin_work(cx, unit)?;
    let fiber = &mut cx.arena[unit];
    fiber.memoized_props = fiber.pending_props.clone();
    match next {
        Some(child) => Ok(Some(child)),
        None => Ok(complete_unit_of_work(cx, unit)),
    }
}

/// Complete `unit` and as many ancestors as have no siblings left; returns
/// the next sibling to begin.
fn complete_unit_of_work(cx: &mut WorkCx<'_>, unit: FiberId) -> Option<FiberId> {
    let mut node = unit;
    loop {
        complete_work(cx, node);
        if let Some(sibling) = cx.arena[node].sibling {
            return Some(sibling);
        }
        node = cx.arena[node].parent?;
    }
}

#[cfg(test)]
#[path = "tests/work_loop_tests.rs"]
mod tests;
