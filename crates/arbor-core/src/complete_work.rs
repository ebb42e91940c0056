//! Complete phase: create or diff host instances and bubble flags and lanes
//! up to the parent.

use std::rc::Rc;

use crate::element::{ElementType, HostRef, Props};
use crate::fiber::{FiberArena, FiberId, FiberQueue, WorkTag};
use crate::flags::Flags;
use crate::lanes::Lanes;
use crate::platform::{AttrChange, InstanceId, UpdatePayload};
use crate::work_loop::WorkCx;

pub(crate) fn complete_work(cx: &mut WorkCx<'_>, wip: FiberId) {
    let current = cx.arena.live_alternate(wip);
    match cx.arena[wip].tag {
        WorkTag::Root | WorkTag::FunctionComponent | WorkTag::Fragment => {}
        WorkTag::ContextProvider => {
            if let Some(ElementType::Provider(id)) = cx.arena[wip].element_type {
                cx.contexts.pop(id);
            }
        }
        WorkTag::HostElement => complete_host_element(cx, wip, current),
        WorkTag::HostText => complete_host_text(cx, wip, current),
    }
    bubble_properties(cx.arena, wip);
}

fn complete_host_element(cx: &mut WorkCx<'_>, wip: FiberId, current: Option<FiberId>) {
    let fiber = &cx.arena[wip];
    let Some(ElementType::Host(tag)) = fiber.element_type.clone() else {
        log::error!("host node {:?} without a host type", wip);
        return;
    };
    let props = fiber.props().cloned().unwrap_or_default();

    match (current, fiber.state_node) {
        (Some(current), Some(_)) => {
            let previous = cx.arena[current].memoized_props.props().cloned();
            let ref_changed = !same_ref(
                cx.arena[current].host_ref.as_ref(),
                cx.arena[wip].host_ref.as_ref(),
            );
            let fiber = &mut cx.arena[wip];
            fiber.update_queue = FiberQueue::None;
            if let Some(previous) = previous.filter(|previous| !Rc::ptr_eq(previous, &props)) {
                let payload = diff_props(&previous, &props);
                if !payload.is_empty() {
                    fiber.update_queue = FiberQueue::HostUpdate(payload);
                    fiber.flags |= Flags::UPDATE;
                }
            }
            if ref_changed {
                fiber.flags |= Flags::REF;
            }
        }
        _ => {
            let instance = cx.host.create_instance(&tag, &props);
            append_all_children(cx, instance, wip);
            let fiber = &mut cx.arena[wip];
            fiber.state_node = Some(instance);
            if fiber.host_ref.is_some() {
                fiber.flags |= Flags::REF;
            }
        }
    }
}

fn complete_host_text(cx: &mut WorkCx<'_>, wip: FiberId, current: Option<FiberId>) {
    let content = cx.arena[wip]
        .pending_props
        .text()
        .cloned()
        .unwrap_or_else(|| Rc::from(""));
    match (current, cx.arena[wip].state_node) {
        (Some(current), Some(_)) => {
            let changed = cx.arena[current]
                .memoized_props
                .text()
                .map_or(true, |previous| previous.as_ref() != content.as_ref());
            if changed {
                cx.arena[wip].flags |= Flags::UPDATE;
            }
        }
        _ => {
            let instance = cx.host.create_text_instance(&content);
            cx.arena[wip].state_node = Some(instance);
        }
    }
}

fn same_ref(a: Option<&HostRef>, b: Option<&HostRef>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.same(b),
        _ => false,
    }
}

/// Attribute changes needed to go from `previous` to `next`. Equal values
/// produce no change.
pub(crate) fn diff_props(previous: &Props, next: &Props) -> UpdatePayload {
    let mut changes = Vec::new();
    for (name, _) in previous.attrs() {
        if next.attr(name).is_none() {
            changes.push(AttrChange::Remove(name.clone()));
        }
    }
    for (name, value) in next.attrs() {
        if previous.attr(name) != Some(value) {
            changes.push(AttrChange::Set(name.clone(), value.clone()));
        }
    }
    UpdatePayload { changes }
}

/// Append the top-level host instances below `wip` into `parent`, looking
/// through components, fragments and providers.
fn append_all_children(cx: &mut WorkCx<'_>, parent: InstanceId, wip: FiberId) {
    let mut node = cx.arena[wip].child;
    while let Some(current) = node {
        let fiber = &cx.arena[current];
        if fiber.tag.is_host() {
            if let Some(instance) = fiber.state_node {
                cx.host.append_child(parent, instance);
            }
        } else if let Some(child) = fiber.child {
            cx.arena[child].parent = Some(current);
            node = Some(child);
            continue;
        }

        let mut climb = current;
        node = loop {
            if let Some(sibling) = cx.arena[climb].sibling {
                cx.arena[sibling].parent = cx.arena[climb].parent;
                break Some(sibling);
            }
            match cx.arena[climb].parent {
                Some(up) if up != wip => climb = up,
                _ => break None,
            }
        };
    }
}

/// Fold the children's flags and lanes into `wip`.
pub(crate) fn bubble_properties(arena: &mut FiberArena, wip: FiberId) {
    let mut subtree_flags = Flags::empty();
    let mut child_lanes = Lanes::empty();
    let mut child = arena[wip].child;
    while let Some(current) = child {
        let fiber = &mut arena[current];
        subtree_flags |= fiber.subtree_flags | fiber.flags;
        child_lanes |= fiber.lanes | fiber.child_lanes;
        fiber.parent = Some(wip);
        child = fiber.sibling;
    }
    let fiber = &mut arena[wip];
    fiber.subtree_flags = subtree_flags;
    fiber.child_lanes = child_lanes;
}
