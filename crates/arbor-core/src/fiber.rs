//! Work nodes ("fibers") and the arena that owns them.
//!
//! Every mounted node exists twice at most: the committed version and the
//! version being built, linked through `alternate`. Links between nodes are
//! arena keys, so a stale key from an unmounted node simply fails to
//! resolve.

use std::ops::{Index, IndexMut};
use std::rc::Rc;

use slotmap::{new_key_type, SlotMap};

use crate::context::ContextId;
use crate::element::{Child, Element, ElementType, HostRef, Key, Props};
use crate::flags::Flags;
use crate::hooks::{Effect, HookRecord};
use crate::lanes::Lanes;
use crate::platform::{InstanceId, UpdatePayload};
use crate::ring::Ring;
use crate::update_queue::{Update, UpdateQueue};

new_key_type! {
    pub struct FiberId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkTag {
    Root,
    HostElement,
    HostText,
    FunctionComponent,
    Fragment,
    ContextProvider,
}

impl WorkTag {
    pub fn is_host(self) -> bool {
        matches!(self, WorkTag::HostElement | WorkTag::HostText)
    }
}

#[derive(Clone, Default)]
pub(crate) enum FiberProps {
    #[default]
    None,
    Root,
    Element(Rc<Props>),
    Text(Rc<str>),
}

impl FiberProps {
    /// Identity comparison used by the bailout check.
    pub(crate) fn same(&self, other: &FiberProps) -> bool {
        match (self, other) {
            (FiberProps::Root, FiberProps::Root) => true,
            (FiberProps::Element(a), FiberProps::Element(b)) => Rc::ptr_eq(a, b),
            (FiberProps::Text(a), FiberProps::Text(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn props(&self) -> Option<&Rc<Props>> {
        match self {
            FiberProps::Element(props) => Some(props),
            _ => None,
        }
    }

    pub(crate) fn text(&self) -> Option<&Rc<str>> {
        match self {
            FiberProps::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// State of the root node: the last rendered description plus the
/// unprocessed part of its update queue.
#[derive(Clone, Default)]
pub(crate) struct RootFiberState {
    pub(crate) element: Child,
    pub(crate) base_state: Child,
    pub(crate) base_queue: Ring<Update<Child>>,
}

#[derive(Clone, Default)]
pub(crate) enum FiberState {
    #[default]
    None,
    Root(RootFiberState),
    Hooks(Vec<HookRecord>),
}

#[derive(Clone, Default)]
pub(crate) enum FiberQueue {
    #[default]
    None,
    Root(Rc<UpdateQueue<Child>>),
    Effects(Ring<Rc<Effect>>),
    HostUpdate(UpdatePayload),
}

/// Contexts a component read during its last render.
#[derive(Clone, Default)]
pub(crate) struct Dependencies {
    pub(crate) contexts: Vec<ContextId>,
    /// Lanes in which one of those contexts changed.
    pub(crate) lanes: Lanes,
}

pub(crate) struct Fiber {
    pub(crate) tag: WorkTag,
    pub(crate) key: Option<Key>,
    pub(crate) element_type: Option<ElementType>,
    pub(crate) state_node: Option<InstanceId>,

    pub(crate) parent: Option<FiberId>,
    pub(crate) child: Option<FiberId>,
    pub(crate) sibling: Option<FiberId>,
    pub(crate) index: usize,
    pub(crate) host_ref: Option<HostRef>,

    pub(crate) pending_props: FiberProps,
    pub(crate) memoized_props: FiberProps,
    pub(crate) memoized_state: FiberState,
    pub(crate) update_queue: FiberQueue,
    pub(crate) dependencies: Dependencies,

    pub(crate) alternate: Option<FiberId>,
    pub(crate) flags: Flags,
    pub(crate) subtree_flags: Flags,
    pub(crate) deletions: Vec<FiberId>,

    pub(crate) lanes: Lanes,
    pub(crate) child_lanes: Lanes,
}

impl Fiber {
    pub(crate) fn new(tag: WorkTag, pending_props: FiberProps, key: Option<Key>) -> Self {
        Self {
            tag,
            key,
            element_type: None,
            state_node: None,
            parent: None,
            child: None,
            sibling: None,
            index: 0,
            host_ref: None,
            pending_props,
            memoized_props: FiberProps::None,
            memoized_state: FiberState::None,
            update_queue: FiberQueue::None,
            dependencies: Dependencies::default(),
            alternate: None,
            flags: Flags::empty(),
            subtree_flags: Flags::empty(),
            deletions: Vec::new(),
            lanes: Lanes::empty(),
            child_lanes: Lanes::empty(),
        }
    }

    pub(crate) fn from_element(element: &Element) -> Self {
        let tag = match element.ty() {
            ElementType::Host(_) => WorkTag::HostElement,
            ElementType::Component(_) => WorkTag::FunctionComponent,
            ElementType::Fragment => WorkTag::Fragment,
            ElementType::Provider(_) => WorkTag::ContextProvider,
        };
        let mut fiber = Fiber::new(
            tag,
            FiberProps::Element(element.props().clone()),
            element.key().cloned(),
        );
        fiber.element_type = Some(element.ty().clone());
        fiber.host_ref = element.host_ref().cloned();
        fiber
    }

    pub(crate) fn text(content: Rc<str>) -> Self {
        Fiber::new(WorkTag::HostText, FiberProps::Text(content), None)
    }

    pub(crate) fn fragment(props: Rc<Props>, key: Option<Key>) -> Self {
        let mut fiber = Fiber::new(WorkTag::Fragment, FiberProps::Element(props), key);
        fiber.element_type = Some(ElementType::Fragment);
        fiber
    }

    pub(crate) fn props(&self) -> Option<&Rc<Props>> {
        self.pending_props.props()
    }

    /// Display name used in logs and tree dumps.
    pub(crate) fn label(&self) -> String {
        match (&self.tag, &self.element_type) {
            (WorkTag::Root, _) => "Root".to_owned(),
            (WorkTag::HostText, _) => format!(
                "#text {:?}",
                self.pending_props.text().map(|t| t.as_ref()).unwrap_or("")
            ),
            (_, Some(ty)) => ty.to_string(),
            (tag, None) => format!("{tag:?}"),
        }
    }
}

/// Owner of every fiber of one root.
#[derive(Default)]
pub(crate) struct FiberArena {
    fibers: SlotMap<FiberId, Fiber>,
    /// Fibers allocated by the render in progress that have no committed
    /// counterpart. Freed if that render is thrown away.
    created: Vec<FiberId>,
}

impl FiberArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, fiber: Fiber) -> FiberId {
        self.fibers.insert(fiber)
    }

    /// Allocate a fiber on behalf of the render in progress.
    pub(crate) fn create(&mut self, fiber: Fiber) -> FiberId {
        let id = self.fibers.insert(fiber);
        self.created.push(id);
        id
    }

    pub(crate) fn get(&self, id: FiberId) -> Option<&Fiber> {
        self.fibers.get(id)
    }

    pub(crate) fn contains(&self, id: FiberId) -> bool {
        self.fibers.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.fibers.len()
    }

    pub(crate) fn live_alternate(&self, id: FiberId) -> Option<FiberId> {
        self.fibers
            .get(id)
            .and_then(|fiber| fiber.alternate)
            .filter(|alternate| self.fibers.contains_key(*alternate))
    }

    /// The render that allocated `created` was committed; its fibers are
    /// now owned by the tree.
    pub(crate) fn keep_created(&mut self) {
        self.created.clear();
    }

    /// Free every fiber allocated by a render that will never commit.
    pub(crate) fn discard_created(&mut self) -> usize {
        let created = std::mem::take(&mut self.created);
        let mut freed = 0;
        for id in created {
            if self.fibers.remove(id).is_some() {
                freed += 1;
            }
        }
        freed
    }

    /// Free a deleted subtree together with the alternates of its nodes.
    pub(crate) fn free_subtree(&mut self, root: FiberId) -> usize {
        let mut doomed = Vec::new();
        let mut seen = crate::collections::map::HashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(fiber) = self.fibers.get(id) else {
                continue;
            };
            if !seen.insert(id) {
                continue;
            }
            doomed.push(id);
            if let Some(alternate) = fiber.alternate {
                stack.push(alternate);
            }
            let mut child = fiber.child;
            while let Some(current) = child {
                stack.push(current);
                child = self.fibers.get(current).and_then(|f| f.sibling);
            }
        }
        for id in &doomed {
            self.fibers.remove(*id);
        }
        doomed.len()
    }
}

impl Index<FiberId> for FiberArena {
    type Output = Fiber;

    fn index(&self, id: FiberId) -> &Fiber {
        &self.fibers[id]
    }
}

impl IndexMut<FiberId> for FiberArena {
    fn index_mut(&mut self, id: FiberId) -> &mut Fiber {
        &mut self.fibers[id]
    }
}

/// Get (or allocate) the in-progress counterpart of `current` and reset it
/// for a new pass with `pending_props`.
pub(crate) fn create_work_in_progress(
    arena: &mut FiberArena,
    current: FiberId,
    pending_props: FiberProps,
) -> FiberId {
    let wip = match arena.live_alternate(current) {
        Some(wip) => {
            let fiber = &mut arena[wip];
            fiber.pending_props = pending_props;
            fiber.flags = Flags::empty();
            fiber.subtree_flags = Flags::empty();
            fiber.deletions.clear();
            wip
        }
        None => {
            let source = &arena[current];
            let mut fiber = Fiber::new(source.tag, pending_props, source.key.clone());
            fiber.state_node = source.state_node;
            fiber.alternate = Some(current);
            let wip = arena.insert(fiber);
            arena[current].alternate = Some(wip);
            wip
        }
    };

    let source = &arena[current];
    let element_type = source.element_type.clone();
    let update_queue = source.update_queue.clone();
    let memoized_state = source.memoized_state.clone();
    let dependencies = source.dependencies.clone();
    let host_ref = source.host_ref.clone();
    let (child, memoized_props, lanes, child_lanes, index, parent, state_node) = (
        source.child,
        source.memoized_props.clone(),
        source.lanes,
        source.child_lanes,
        source.index,
        source.parent,
        source.state_node,
    );

    let fiber = &mut arena[wip];
    fiber.element_type = element_type;
    fiber.update_queue = update_queue;
    fiber.memoized_state = memoized_state;
    fiber.dependencies = dependencies;
    fiber.host_ref = host_ref;
    fiber.child = child;
    fiber.sibling = None;
    fiber.memoized_props = memoized_props;
    fiber.lanes = lanes;
    fiber.child_lanes = child_lanes;
    fiber.index = index;
    fiber.state_node = state_node;
    if fiber.parent.is_none() {
        fiber.parent = parent;
    }
    wip
}

/// Read-only copy of a committed fiber subtree, for inspection and tests.
#[derive(Debug, Clone)]
pub struct FiberSnapshot {
    pub id: FiberId,
    pub alternate: Option<FiberId>,
    pub tag: WorkTag,
    pub label: String,
    pub key: Option<Key>,
    pub instance: Option<InstanceId>,
    pub flags: Flags,
    pub subtree_flags: Flags,
    pub lanes: Lanes,
    pub child_lanes: Lanes,
    pub children: Vec<FiberSnapshot>,
}

impl FiberSnapshot {
    pub(crate) fn capture(arena: &FiberArena, id: FiberId) -> Self {
        let fiber = &arena[id];
        let mut children = Vec::new();
        let mut child = fiber.child;
        while let Some(current) = child {
            children.push(FiberSnapshot::capture(arena, current));
            child = arena[current].sibling;
        }
        Self {
            id,
            alternate: arena.live_alternate(id),
            tag: fiber.tag,
            label: fiber.label(),
            key: fiber.key.clone(),
            instance: fiber.state_node,
            flags: fiber.flags,
            subtree_flags: fiber.subtree_flags,
            lanes: fiber.lanes,
            child_lanes: fiber.child_lanes,
            children,
        }
    }

    /// Depth-first search for the first node whose label matches.
    pub fn find(&self, label: &str) -> Option<&FiberSnapshot> {
        if self.label == label {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(label))
    }

    /// Fiber ids of the direct children, in order.
    pub fn child_ids(&self) -> Vec<FiberId> {
        self.children.iter().map(|child| child.id).collect()
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_into(&mut out, 0);
        out
    }

    fn dump_into(&self, out: &mut String, depth: usize) {
        use std::fmt::Write;
        let indent = "  ".repeat(depth);
        let _ = write!(out, "{indent}{}", self.label);
        if let Some(key) = &self.key {
            let _ = write!(out, " key={key}");
        }
        out.push('\n');
        for child in &self.children {
            child.dump_into(out, depth + 1);
        }
    }
}
