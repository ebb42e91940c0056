//! Begin phase: render or bail out of one node and reconcile its children.

use std::rc::Rc;

use crate::child_fibers::{clone_child_fibers, ChildReconciler};
use crate::context::propagate_context_change;
use crate::element::{Child, ElementType, Props};
use crate::error::RenderError;
use crate::fiber::{Dependencies, FiberId, FiberQueue, FiberState, RootFiberState, WorkTag};
use crate::flags::Flags;
use crate::hooks::{HookOutcome, HookSession, RenderCx};
use crate::lanes::Lanes;
use crate::update_queue::process_update_queue;
use crate::work_loop::WorkCx;

/// Returns the next node to begin, or `None` when the node has no children
/// left to visit and should complete.
pub(crate) fn begin_work(cx: &mut WorkCx<'_>, wip: FiberId) -> Result<Option<FiberId>, RenderError> {
    let mut did_receive_update = false;
    if let Some(current) = cx.arena.live_alternate(wip) {
        let old = &cx.arena[current];
        let new = &cx.arena[wip];
        if !old.memoized_props.same(&new.pending_props) {
            did_receive_update = true;
        } else if !old.lanes.intersects(cx.render_lanes) {
            log::trace!("bailout: {}", new.label());
            return attempt_early_bailout(cx, wip);
        }
    }

    cx.arena[wip].lanes = Lanes::empty();
    match cx.arena[wip].tag {
        WorkTag::Root => update_host_root(cx, wip),
        WorkTag::HostElement => {
            let props = element_props(cx, wip);
            reconcile_children(cx, wip, props.children())
        }
        WorkTag::HostText => Ok(None),
        WorkTag::FunctionComponent => update_function_component(cx, wip, did_receive_update),
        WorkTag::Fragment => {
            let props = element_props(cx, wip);
            reconcile_children(cx, wip, props.children())
        }
        WorkTag::ContextProvider => update_context_provider(cx, wip),
    }
}

fn element_props(cx: &WorkCx<'_>, wip: FiberId) -> Rc<Props> {
    cx.arena[wip].props().cloned().unwrap_or_default()
}

fn attempt_early_bailout(cx: &mut WorkCx<'_>, wip: FiberId) -> Result<Option<FiberId>, RenderError> {
    if cx.arena[wip].tag == WorkTag::ContextProvider {
        // Balanced by the pop in the complete phase.
        push_provider(cx, wip)?;
    }
    Ok(bailout_on_already_finished_work(cx, wip))
}

pub(crate) fn bailout_on_already_finished_work(cx: &mut WorkCx<'_>, wip: FiberId) -> Option<FiberId> {
    if !cx.arena[wip].child_lanes.intersects(cx.render_lanes) {
        log::trace!("skipping subtree of {}", cx.arena[wip].label());
        return None;
    }
    clone_child_fibers(cx.arena, wip);
    cx.arena[wip].child
}

fn reconcile_children(
    cx: &mut WorkCx<'_>,
    wip: FiberId,
    children: &Child,
) -> Result<Option<FiberId>, RenderError> {
    let current = cx.arena.live_alternate(wip);
    let current_first = current.and_then(|current| cx.arena[current].child);
    let first = ChildReconciler::new(cx.arena, current.is_some(), cx.strict).reconcile(
        wip,
        current_first,
        children,
    )?;
    cx.arena[wip].child = first;
    Ok(first)
}

fn update_host_root(cx: &mut WorkCx<'_>, wip: FiberId) -> Result<Option<FiberId>, RenderError> {
    let FiberQueue::Root(queue) = cx.arena[wip].update_queue.clone() else {
        return Err(RenderError::RootUnavailable);
    };
    let state = match &cx.arena[wip].memoized_state {
        FiberState::Root(state) => state.clone(),
        _ => RootFiberState::default(),
    };
    let previous = state.element;
    let mut base_queue = state.base_queue;
    let pending = queue.take_pending();
    if !pending.is_empty() {
        base_queue.append(pending);
        if let Some(current) = cx.arena.live_alternate(wip) {
            if let FiberState::Root(committed) = &mut cx.arena[current].memoized_state {
                committed.base_queue = base_queue.clone();
            }
        }
    }

    let processed = process_update_queue(state.base_state, &base_queue, cx.render_lanes);
    let element = processed.memoized_state;
    let unchanged = element.same(&previous);
    let fiber = &mut cx.arena[wip];
    fiber.lanes |= processed.skipped_lanes;
    fiber.memoized_state = FiberState::Root(RootFiberState {
        element: element.clone(),
        base_state: processed.base_state,
        base_queue: processed.base_queue,
    });

    if unchanged && cx.arena.live_alternate(wip).is_some() {
        return Ok(bailout_on_already_finished_work(cx, wip));
    }
    reconcile_children(cx, wip, &element)
}

fn update_function_component(
    cx: &mut WorkCx<'_>,
    wip: FiberId,
    mut did_receive_update: bool,
) -> Result<Option<FiberId>, RenderError> {
    let Some(ElementType::Component(component)) = cx.arena[wip].element_type.clone() else {
        return Err(RenderError::UnsupportedChild(
            "function component node without a component".to_owned(),
        ));
    };
    let props = element_props(cx, wip);
    let current = cx.arena.live_alternate(wip);
    let current_hooks = current.map(|current| match &cx.arena[current].memoized_state {
        FiberState::Hooks(hooks) => hooks.clone(),
        _ => Vec::new(),
    });
    if cx.arena[wip].dependencies.lanes.intersects(cx.render_lanes) {
        did_receive_update = true;
    }

    log::trace!("render {}", component.name());
    let mut session = HookSession::new(wip, component.name_rc(), current_hooks, cx.render_lanes);
    let rendered = {
        let mut render_cx = RenderCx::new(&mut session, &*cx.contexts, cx.sink);
        component.render(&mut render_cx, &props)
    };
    let stashed = session.take_stashed();
    if let Some(current) = current {
        if let FiberState::Hooks(committed) = &mut cx.arena[current].memoized_state {
            for (index, queue) in stashed {
                if let Some(record) = committed.get_mut(index) {
                    record.stash_base_queue(queue);
                }
            }
        }
    }
    let children = rendered?;
    let HookOutcome {
        hooks,
        effects,
        flags,
        skipped_lanes,
        did_receive_update: state_changed,
        contexts,
    } = session.finish()?;

    let fiber = &mut cx.arena[wip];
    fiber.memoized_state = FiberState::Hooks(hooks);
    fiber.update_queue = FiberQueue::Effects(effects);
    fiber.flags |= flags;
    fiber.lanes |= skipped_lanes;
    fiber.dependencies = Dependencies {
        contexts,
        lanes: Lanes::empty(),
    };

    if let Some(current) = current {
        if !did_receive_update && !state_changed {
            log::trace!("{} rendered without changes", component.name());
            bailout_hooks(cx, wip, current);
            return Ok(bailout_on_already_finished_work(cx, wip));
        }
    }
    reconcile_children(cx, wip, &children)
}

fn bailout_hooks(cx: &mut WorkCx<'_>, wip: FiberId, current: FiberId) {
    let committed_effects = cx.arena[current].update_queue.clone();
    let fiber = &mut cx.arena[wip];
    fiber.update_queue = committed_effects;
    fiber.flags.remove(Flags::PASSIVE_EFFECT);
    cx.arena[current].lanes.remove(cx.render_lanes);
}

fn push_provider(cx: &mut WorkCx<'_>, wip: FiberId) -> Result<(), RenderError> {
    let Some(ElementType::Provider(id)) = cx.arena[wip].element_type.clone() else {
        return Err(RenderError::UnsupportedChild(
            "provider node without a context".to_owned(),
        ));
    };
    let value = element_props(cx, wip)
        .raw_data()
        .cloned()
        .ok_or_else(|| RenderError::UnsupportedChild("context provider without a value".to_owned()))?;
    cx.contexts.push(id, value);
    Ok(())
}

fn update_context_provider(cx: &mut WorkCx<'_>, wip: FiberId) -> Result<Option<FiberId>, RenderError> {
    let props = element_props(cx, wip);
    if let (Some(current), Some(ElementType::Provider(id))) =
        (cx.arena.live_alternate(wip), cx.arena[wip].element_type.clone())
    {
        let previous = cx.arena[current]
            .memoized_props
            .props()
            .and_then(|props| props.raw_data().cloned());
        let changed = match (previous, props.raw_data()) {
            (Some(previous), Some(next)) => !Rc::ptr_eq(&previous, next),
            _ => true,
        };
        if changed {
            log::debug!("context {:?} changed; propagating", id);
            propagate_context_change(cx.arena, wip, id, cx.render_lanes);
        }
    }
    push_provider(cx, wip)?;
    reconcile_children(cx, wip, props.children())
}
