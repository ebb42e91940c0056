//! Context values provided by ancestors and read by descendants.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::collections::map::HashMap;
use crate::element::{Child, Element, ElementType, Props};
use crate::fiber::{FiberArena, FiberId, WorkTag};
use crate::lanes::Lanes;

static NEXT_CONTEXT_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub(crate) usize);

/// A typed context. Values are provided with [`Context::provider`] and read
/// with `RenderCx::use_context`.
pub struct Context<T> {
    id: ContextId,
    default: Rc<T>,
    _marker: PhantomData<T>,
}

impl<T> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            default: self.default.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("id", &self.id).finish()
    }
}

impl<T: 'static> Context<T> {
    pub fn new(default: T) -> Self {
        Self {
            id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
            default: Rc::new(default),
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn default_value(&self) -> Rc<T> {
        self.default.clone()
    }

    /// Element providing `value` to everything rendered under `children`.
    pub fn provider(&self, value: T, children: impl Into<Child>) -> Element {
        self.provider_rc(Rc::new(value), children)
    }

    /// Like [`Context::provider`] but with a shared value. Re-providing the
    /// same `Rc` does not count as a change.
    pub fn provider_rc(&self, value: Rc<T>, children: impl Into<Child>) -> Element {
        let props = Props::new()
            .with_children(children)
            .with_raw_data(value as Rc<dyn Any>);
        Element::new(ElementType::Provider(self.id), props)
    }
}

/// Stack of provided values for the walk in progress. Pushed when a provider
/// begins, popped when it completes.
#[derive(Default)]
pub(crate) struct ContextStack {
    values: HashMap<ContextId, Rc<dyn Any>>,
    saved: Vec<(ContextId, Option<Rc<dyn Any>>)>,
}

impl ContextStack {
    pub(crate) fn push(&mut self, id: ContextId, value: Rc<dyn Any>) {
        let previous = self.values.insert(id, value);
        self.saved.push((id, previous));
    }

    pub(crate) fn pop(&mut self, id: ContextId) {
        match self.saved.pop() {
            Some((saved_id, previous)) if saved_id != id => {
                log::error!("context {:?} popped while {:?} is on top; stack left as is", id, saved_id);
                self.saved.push((saved_id, previous));
            }
            Some((saved_id, previous)) => {
                match previous {
                    Some(value) => {
                        self.values.insert(saved_id, value);
                    }
                    None => {
                        self.values.remove(&saved_id);
                    }
                }
            }
            None => log::warn!("context {:?} popped from an empty stack", id),
        }
    }

    pub(crate) fn read(&self, id: ContextId) -> Option<Rc<dyn Any>> {
        self.values.get(&id).cloned()
    }

    pub(crate) fn clear(&mut self) {
        self.values.clear();
        self.saved.clear();
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.saved.len()
    }
}

/// Marks every consumer of `context` below `provider` with `render_lanes`,
/// so a bailout higher up cannot skip a subtree whose context changed.
pub(crate) fn propagate_context_change(
    arena: &mut FiberArena,
    provider: FiberId,
    context: ContextId,
    render_lanes: Lanes,
) {
    let mut stack: Vec<FiberId> = arena[provider].child.into_iter().collect();
    while let Some(fiber) = stack.pop() {
        if let Some(sibling) = arena[fiber].sibling {
            stack.push(sibling);
        }
        let nested_provider = matches!(&arena[fiber].element_type, Some(ElementType::Provider(id)) if *id == context);
        if arena[fiber].dependencies.contexts.contains(&context) {
            log::trace!("context {:?} changed for {:?}", context, fiber);
            mark_consumer(arena, fiber, provider, render_lanes);
        }
        if nested_provider || arena[fiber].tag == WorkTag::HostText {
            continue;
        }
        if let Some(child) = arena[fiber].child {
            stack.push(child);
        }
    }
}

fn mark_consumer(arena: &mut FiberArena, fiber: FiberId, provider: FiberId, lanes: Lanes) {
    arena[fiber].lanes |= lanes;
    arena[fiber].dependencies.lanes |= lanes;
    if let Some(alternate) = arena.live_alternate(fiber) {
        arena[alternate].lanes |= lanes;
        arena[alternate].dependencies.lanes |= lanes;
    }
    let mut parent = arena[fiber].parent;
    while let Some(node) = parent {
        if node == provider || arena.live_alternate(node) == Some(provider) {
            break;
        }
        arena[node].child_lanes |= lanes;
        if let Some(alternate) = arena.live_alternate(node) {
            arena[alternate].child_lanes |= lanes;
        }
        parent = arena[node].parent;
    }
}
