//! Diffing a node's previous children against its newly rendered children.
//!
//! Nodes are reused when key and type match, moved nodes are flagged for
//! placement using the "last placed index" rule, and leftovers are queued
//! for deletion on the parent.

use std::rc::Rc;

use crate::collections::map::IndexMap;
use crate::element::{Child, Element, ElementType, Key, Props};
use crate::error::RenderError;
use crate::fiber::{create_work_in_progress, Fiber, FiberArena, FiberId, FiberProps, WorkTag};
use crate::flags::Flags;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ChildKey {
    Explicit(Key),
    Index(usize),
}

pub(crate) struct ChildReconciler<'a> {
    arena: &'a mut FiberArena,
    /// False while mounting a fresh subtree: nothing is flagged because the
    /// whole subtree is inserted at once.
    track_effects: bool,
    strict: bool,
}

impl<'a> ChildReconciler<'a> {
    pub(crate) fn new(arena: &'a mut FiberArena, track_effects: bool, strict: bool) -> Self {
        Self {
            arena,
            track_effects,
            strict,
        }
    }

    pub(crate) fn reconcile(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        new_child: &Child,
    ) -> Result<Option<FiberId>, RenderError> {
        let new_child = match new_child {
            Child::Element(element)
                if *element.ty() == ElementType::Fragment && element.key().is_none() =>
            {
                element.props().children()
            }
            other => other,
        };

        match new_child {
            Child::List(items) => self.reconcile_children_array(parent, current_first, items),
            Child::Element(element) => {
                if !self.accept(element)? {
                    self.delete_remaining_children(parent, current_first);
                    return Ok(None);
                }
                let fiber = self.reconcile_single_element(parent, current_first, element);
                Ok(Some(self.place_single_child(fiber)))
            }
            Child::Text(content) => {
                let fiber = self.reconcile_single_text(parent, current_first, content);
                Ok(Some(self.place_single_child(fiber)))
            }
            Child::Empty => {
                self.delete_remaining_children(parent, current_first);
                Ok(None)
            }
        }
    }

    /// Malformed descriptors are skipped with a warning, or rejected in
    /// strict mode.
    fn accept(&self, element: &Element) -> Result<bool, RenderError> {
        let problem = match element.ty() {
            ElementType::Host(tag) if tag.is_empty() => Some("host element with an empty type"),
            ElementType::Provider(_) if element.props().raw_data().is_none() => {
                Some("context provider without a value")
            }
            _ => None,
        };
        match problem {
            None => Ok(true),
            Some(problem) if self.strict => Err(RenderError::UnsupportedChild(problem.to_owned())),
            Some(problem) => {
                log::warn!("skipping unsupported child: {problem}");
                Ok(false)
            }
        }
    }

    fn delete_child(&mut self, parent: FiberId, child: FiberId) {
        if !self.track_effects {
            return;
        }
        let parent = &mut self.arena[parent];
        parent.deletions.push(child);
        parent.flags |= Flags::CHILD_DELETION;
    }

    fn delete_remaining_children(&mut self, parent: FiberId, first: Option<FiberId>) {
        if !self.track_effects {
            return;
        }
        let mut child = first;
        while let Some(current) = child {
            self.delete_child(parent, current);
            child = self.arena[current].sibling;
        }
    }

    fn use_fiber(&mut self, current: FiberId, props: FiberProps) -> FiberId {
        let fiber = create_work_in_progress(self.arena, current, props);
        let wip = &mut self.arena[fiber];
        wip.index = 0;
        wip.sibling = None;
        fiber
    }

    fn create_from_element(&mut self, parent: FiberId, element: &Element) -> FiberId {
        let fiber = self.arena.create(Fiber::from_element(element));
        self.arena[fiber].parent = Some(parent);
        fiber
    }

    fn reconcile_single_element(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        element: &Element,
    ) -> FiberId {
        let mut current = current_first;
        while let Some(existing) = current {
            if self.arena[existing].key.as_ref() == element.key() {
                if self.arena[existing].element_type.as_ref() == Some(element.ty()) {
                    let fiber = self.use_fiber(existing, FiberProps::Element(element.props().clone()));
                    let next = self.arena[existing].sibling;
                    let wip = &mut self.arena[fiber];
                    wip.parent = Some(parent);
                    wip.host_ref = element.host_ref().cloned();
                    self.delete_remaining_children(parent, next);
                    return fiber;
                }
                // Same key, different type: nothing below can match either.
                self.delete_remaining_children(parent, Some(existing));
                break;
            }
            self.delete_child(parent, existing);
            current = self.arena[existing].sibling;
        }
        self.create_from_element(parent, element)
    }

    fn reconcile_single_text(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        content: &Rc<str>,
    ) -> FiberId {
        let mut current = current_first;
        while let Some(existing) = current {
            if self.arena[existing].tag == WorkTag::HostText {
                let fiber = self.use_fiber(existing, FiberProps::Text(content.clone()));
                let next = self.arena[existing].sibling;
                self.arena[fiber].parent = Some(parent);
                self.delete_remaining_children(parent, next);
                return fiber;
            }
            self.delete_child(parent, existing);
            current = self.arena[existing].sibling;
        }
        let fiber = self.arena.create(Fiber::text(content.clone()));
        self.arena[fiber].parent = Some(parent);
        fiber
    }

    fn place_single_child(&mut self, fiber: FiberId) -> FiberId {
        if self.track_effects && self.arena[fiber].alternate.is_none() {
            self.arena[fiber].flags |= Flags::PLACEMENT;
        }
        fiber
    }

    fn reconcile_children_array(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        items: &[Child],
    ) -> Result<Option<FiberId>, RenderError> {
        let mut existing: IndexMap<ChildKey, FiberId> = IndexMap::default();
        let mut current = current_first;
        while let Some(fiber) = current {
            let node = &self.arena[fiber];
            let key = match &node.key {
                Some(key) => ChildKey::Explicit(key.clone()),
                None => ChildKey::Index(node.index),
            };
            let sibling = node.sibling;
            if let Some(displaced) = existing.insert(key.clone(), fiber) {
                log::warn!("duplicate child key {:?}; removing the earlier node", key);
                self.delete_child(parent, displaced);
            }
            current = sibling;
        }

        let mut last_placed_index = 0;
        let mut first: Option<FiberId> = None;
        let mut last: Option<FiberId> = None;

        for (index, item) in items.iter().enumerate() {
            let Some(fiber) = self.update_from_map(parent, &mut existing, index, item)? else {
                continue;
            };
            let node = &mut self.arena[fiber];
            node.index = index;
            node.parent = Some(parent);
            match last {
                Some(previous) => self.arena[previous].sibling = Some(fiber),
                None => first = Some(fiber),
            }
            last = Some(fiber);

            if !self.track_effects {
                continue;
            }
            match self.arena[fiber].alternate {
                Some(current) => {
                    let old_index = self.arena[current].index;
                    if old_index < last_placed_index {
                        // Moved right relative to a node that stayed put.
                        self.arena[fiber].flags |= Flags::PLACEMENT;
                    } else {
                        last_placed_index = old_index;
                    }
                }
                None => self.arena[fiber].flags |= Flags::PLACEMENT,
            }
        }

        for (_, leftover) in existing {
            self.delete_child(parent, leftover);
        }
        Ok(first)
    }

    fn update_from_map(
        &mut self,
        parent: FiberId,
        existing: &mut IndexMap<ChildKey, FiberId>,
        index: usize,
        item: &Child,
    ) -> Result<Option<FiberId>, RenderError> {
        let key = match item {
            Child::Element(element) => element
                .key()
                .map(|key| ChildKey::Explicit(key.clone()))
                .unwrap_or(ChildKey::Index(index)),
            _ => ChildKey::Index(index),
        };
        let before = existing.get(&key).copied();

        match item {
            Child::Text(content) => {
                if let Some(before) = before.filter(|f| self.arena[*f].tag == WorkTag::HostText) {
                    existing.shift_remove(&key);
                    return Ok(Some(self.use_fiber(before, FiberProps::Text(content.clone()))));
                }
                let fiber = self.arena.create(Fiber::text(content.clone()));
                Ok(Some(fiber))
            }
            Child::Element(element) => {
                if !self.accept(element)? {
                    return Ok(None);
                }
                if *element.ty() == ElementType::Fragment {
                    let fiber = self.update_fragment(
                        parent,
                        existing,
                        &key,
                        before,
                        element.props().clone(),
                        element.key().cloned(),
                    );
                    return Ok(Some(fiber));
                }
                if let Some(before) =
                    before.filter(|f| self.arena[*f].element_type.as_ref() == Some(element.ty()))
                {
                    existing.shift_remove(&key);
                    let fiber = self.use_fiber(before, FiberProps::Element(element.props().clone()));
                    self.arena[fiber].host_ref = element.host_ref().cloned();
                    return Ok(Some(fiber));
                }
                Ok(Some(self.create_from_element(parent, element)))
            }
            Child::List(items) => {
                let props = Rc::new(Props::new().with_children(Child::List(items.clone())));
                Ok(Some(self.update_fragment(parent, existing, &key, before, props, None)))
            }
            Child::Empty => Ok(None),
        }
    }

    fn update_fragment(
        &mut self,
        parent: FiberId,
        existing: &mut IndexMap<ChildKey, FiberId>,
        key: &ChildKey,
        before: Option<FiberId>,
        props: Rc<Props>,
        fragment_key: Option<Key>,
    ) -> FiberId {
        if let Some(before) = before.filter(|f| self.arena[*f].tag == WorkTag::Fragment) {
            existing.shift_remove(key);
            return self.use_fiber(before, FiberProps::Element(props));
        }
        let fiber = self.arena.create(Fiber::fragment(props, fragment_key));
        self.arena[fiber].parent = Some(parent);
        fiber
    }
}

/// Give `wip` fresh in-progress copies of its committed children without
/// diffing them.
pub(crate) fn clone_child_fibers(arena: &mut FiberArena, wip: FiberId) {
    let Some(mut current_child) = arena[wip].child else {
        return;
    };
    let props = arena[current_child].pending_props.clone();
    let mut new_child = create_work_in_progress(arena, current_child, props);
    arena[wip].child = Some(new_child);
    arena[new_child].parent = Some(wip);

    while let Some(next) = arena[current_child].sibling {
        current_child = next;
        let props = arena[current_child].pending_props.clone();
        let next_new = create_work_in_progress(arena, current_child, props);
        arena[new_child].sibling = Some(next_new);
        arena[next_new].parent = Some(wip);
        new_child = next_new;
    }
    arena[new_child].sibling = None;
}

#[cfg(test)]
#[path = "tests/child_fibers_tests.rs"]
mod tests;
