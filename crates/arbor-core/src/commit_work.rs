//! Commit phase passes over a finished tree.
//!
//! The mutation pass applies placements, updates and deletions to the host
//! and collects passive effects. The layout pass attaches refs once the
//! finished tree is current. Each pass only descends into subtrees whose
//! `subtree_flags` intersect its mask and clears its own bits on the way
//! back up.

use std::rc::Rc;

use crate::fiber::{FiberArena, FiberId, FiberQueue, WorkTag};
use crate::flags::{EffectTag, Flags};
use crate::hooks::Effect;
use crate::platform::{HostConfig, InstanceId};
use crate::ring::Ring;

/// Effects waiting for the next passive flush.
#[derive(Default)]
pub(crate) struct PendingPassiveEffects {
    /// Effects of unmounted components; only their cleanups run.
    pub(crate) unmount: Vec<Rc<Effect>>,
    /// Effect lists of committed components that flagged passive work.
    pub(crate) update: Vec<Ring<Rc<Effect>>>,
}

impl PendingPassiveEffects {
    pub(crate) fn is_empty(&self) -> bool {
        self.unmount.is_empty() && self.update.is_empty()
    }
}

pub(crate) struct CommitCx<'a> {
    pub(crate) arena: &'a mut FiberArena,
    pub(crate) host: &'a mut dyn HostConfig,
    pub(crate) passive: &'a mut PendingPassiveEffects,
    /// Roots of deleted subtrees, freed once the commit is over.
    pub(crate) deleted: Vec<FiberId>,
}

/// Flags the mutation pass consumes. Ref changes are visited too, to detach
/// the old ref, but stay set for the layout pass.
pub(crate) const MUTATION_PASS: Flags = Flags::MUTATION_MASK.union(Flags::PASSIVE_EFFECT);

pub(crate) fn commit_mutation_effects(cx: &mut CommitCx<'_>, finished: FiberId) {
    traverse(
        cx,
        finished,
        MUTATION_PASS.union(Flags::REF),
        MUTATION_PASS,
        commit_mutation_effects_on_fiber,
    );
}

pub(crate) fn commit_layout_effects(cx: &mut CommitCx<'_>, finished: FiberId) {
    traverse(
        cx,
        finished,
        Flags::LAYOUT_MASK,
        Flags::LAYOUT_MASK,
        commit_layout_effects_on_fiber,
    );
}

/// Post-order walk restricted to subtrees carrying `visit`; clears `clear`
/// from every node it passes.
fn traverse(
    cx: &mut CommitCx<'_>,
    finished: FiberId,
    visit: Flags,
    clear: Flags,
    mut on_fiber: impl FnMut(&mut CommitCx<'_>, FiberId),
) {
    let mut next = Some(finished);
    while let Some(fiber) = next {
        if cx.arena[fiber].subtree_flags.intersects(visit) {
            if let Some(child) = cx.arena[fiber].child {
                cx.arena[child].parent = Some(fiber);
                next = Some(child);
                continue;
            }
        }

        let mut node = fiber;
        next = loop {
            on_fiber(cx, node);
            let fiber = &mut cx.arena[node];
            fiber.flags.remove(clear);
            fiber.subtree_flags.remove(clear);
            if node == finished {
                break None;
            }
            if let Some(sibling) = cx.arena[node].sibling {
                cx.arena[sibling].parent = cx.arena[node].parent;
                break Some(sibling);
            }
            match cx.arena[node].parent {
                Some(parent) => node = parent,
                None => break None,
            }
        };
    }
}

fn commit_mutation_effects_on_fiber(cx: &mut CommitCx<'_>, fiber: FiberId) {
    let flags = cx.arena[fiber].flags;
    if flags.contains(Flags::PLACEMENT) {
        commit_placement(cx, fiber);
    }
    if flags.contains(Flags::UPDATE) {
        commit_update(cx, fiber);
    }
    if flags.contains(Flags::CHILD_DELETION) {
        let deletions = std::mem::take(&mut cx.arena[fiber].deletions);
        for deleted in deletions {
            commit_deletion(cx, deleted);
        }
    }
    if flags.contains(Flags::REF) {
        if let Some(previous) = cx.arena.live_alternate(fiber) {
            if let Some(host_ref) = cx.arena[previous].host_ref.clone() {
                host_ref.set(None);
            }
        }
    }
    if flags.contains(Flags::PASSIVE_EFFECT) {
        if let FiberQueue::Effects(effects) = &cx.arena[fiber].update_queue {
            cx.passive.update.push(effects.clone());
        }
    }
}

fn commit_layout_effects_on_fiber(cx: &mut CommitCx<'_>, fiber: FiberId) {
    let node = &cx.arena[fiber];
    if node.flags.contains(Flags::REF) && node.tag == WorkTag::HostElement {
        if let (Some(host_ref), Some(instance)) = (node.host_ref.clone(), node.state_node) {
            host_ref.set(Some(instance));
        }
    }
}

fn commit_update(cx: &mut CommitCx<'_>, fiber: FiberId) {
    let Some(instance) = cx.arena[fiber].state_node else {
        return;
    };
    match cx.arena[fiber].tag {
        WorkTag::HostElement => {
            if let FiberQueue::HostUpdate(payload) = std::mem::take(&mut cx.arena[fiber].update_queue) {
                cx.host.commit_update(instance, &payload);
            }
        }
        WorkTag::HostText => {
            if let Some(content) = cx.arena[fiber].memoized_props.text().cloned() {
                cx.host.commit_text_update(instance, &content);
            }
        }
        _ => {}
    }
}

fn get_host_parent(arena: &FiberArena, fiber: FiberId) -> Option<InstanceId> {
    let mut parent = arena.get(fiber)?.parent;
    while let Some(node) = parent {
        let node = arena.get(node)?;
        match node.tag {
            WorkTag::HostElement | WorkTag::Root => return node.state_node,
            _ => parent = node.parent,
        }
    }
    None
}

/// First host instance after `fiber` among its siblings (looking through
/// non-host wrappers) that is not itself waiting to be placed.
fn get_host_sibling(arena: &mut FiberArena, fiber: FiberId) -> Option<InstanceId> {
    let mut node = fiber;
    'siblings: loop {
        while arena[node].sibling.is_none() {
            let parent = arena[node].parent?;
            if matches!(arena[parent].tag, WorkTag::HostElement | WorkTag::Root) {
                return None;
            }
            node = parent;
        }
        let sibling = arena[node].sibling?;
        arena[sibling].parent = arena[node].parent;
        node = sibling;

        while !arena[node].tag.is_host() {
            if arena[node].flags.contains(Flags::PLACEMENT) {
                continue 'siblings;
            }
            match arena[node].child {
                Some(child) => {
                    arena[child].parent = Some(node);
                    node = child;
                }
                None => continue 'siblings,
            }
        }

        if !arena[node].flags.contains(Flags::PLACEMENT) {
            return arena[node].state_node;
        }
    }
}

fn commit_placement(cx: &mut CommitCx<'_>, fiber: FiberId) {
    let Some(parent) = get_host_parent(cx.arena, fiber) else {
        log::warn!("no host parent for placed node {}", cx.arena[fiber].label());
        return;
    };
    let before = get_host_sibling(cx.arena, fiber);
    insert_or_append_placement_node(cx, fiber, parent, before);
}

fn insert_or_append_placement_node(
    cx: &mut CommitCx<'_>,
    fiber: FiberId,
    parent: InstanceId,
    before: Option<InstanceId>,
) {
    let node = &cx.arena[fiber];
    if node.tag.is_host() {
        if let Some(instance) = node.state_node {
            match before {
                Some(before) => cx.host.insert_before(parent, instance, before),
                None => cx.host.append_child(parent, instance),
            }
        }
        return;
    }
    let mut child = node.child;
    while let Some(current) = child {
        insert_or_append_placement_node(cx, current, parent, before);
        child = cx.arena[current].sibling;
    }
}

fn commit_deletion(cx: &mut CommitCx<'_>, deleted: FiberId) {
    let mut host_children = Vec::new();
    unmount_subtree(cx, deleted, false, &mut host_children);
    if !host_children.is_empty() {
        match get_host_parent(cx.arena, deleted) {
            Some(parent) => {
                for instance in host_children {
                    cx.host.remove_child(parent, instance);
                }
            }
            None => log::warn!("no host parent for deleted node {}", cx.arena[deleted].label()),
        }
    }
    cx.arena[deleted].parent = None;
    cx.deleted.push(deleted);
}

/// One walk over a deleted subtree: detach refs, queue effect cleanups and
/// collect the outermost host instances.
fn unmount_subtree(
    cx: &mut CommitCx<'_>,
    fiber: FiberId,
    inside_host: bool,
    host_children: &mut Vec<InstanceId>,
) {
    let node = &cx.arena[fiber];
    match node.tag {
        WorkTag::HostElement => {
            if let Some(host_ref) = node.host_ref.clone() {
                host_ref.set(None);
            }
        }
        WorkTag::FunctionComponent => {
            if let FiberQueue::Effects(effects) = &node.update_queue {
                cx.passive.unmount.extend(
                    effects
                        .iter()
                        .filter(|effect| effect.tag().contains(EffectTag::PASSIVE))
                        .cloned(),
                );
            }
        }
        _ => {}
    }

    let node = &cx.arena[fiber];
    let is_host = node.tag.is_host();
    if is_host && !inside_host {
        if let Some(instance) = node.state_node {
            host_children.push(instance);
        }
    }
    let mut child = node.child;
    while let Some(current) = child {
        unmount_subtree(cx, current, inside_host || is_host, host_children);
        child = cx.arena[current].sibling;
    }
}
