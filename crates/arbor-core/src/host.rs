//! In-memory host used by tests, benches and headless embedders.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::Write;
use std::rc::Rc;

use crate::collections::map::IndexMap;
use crate::element::{AttrValue, Handler, Props};
use crate::platform::{AttrChange, HostConfig, InstanceId, Microtask, UpdatePayload};

/// Shared FIFO of microtasks. Clones share the queue, so an embedder can keep
/// one handle and give another to [`MemoryHost`].
#[derive(Clone, Default)]
pub struct MicrotaskQueue(Rc<RefCell<VecDeque<Microtask>>>);

impl MicrotaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: Microtask) {
        self.0.borrow_mut().push_back(task);
    }

    /// Run queued microtasks, including ones queued while running, until the
    /// queue is empty. Returns how many ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.0.borrow_mut().pop_front();
            let Some(task) = next else {
                return ran;
            };
            task();
            ran += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

/// Mutation recorded by [`MemoryHost`].
#[derive(Debug, Clone, PartialEq)]
pub enum HostOp {
    Create { id: InstanceId, ty: String },
    CreateText { id: InstanceId, text: String },
    Append { parent: InstanceId, child: InstanceId },
    Insert { parent: InstanceId, child: InstanceId, before: InstanceId },
    Remove { parent: InstanceId, child: InstanceId },
    SetText { id: InstanceId, text: String },
    Update { id: InstanceId, payload: UpdatePayload },
}

#[derive(Debug, Clone)]
enum NodeKind {
    Container,
    Element { ty: String, attrs: IndexMap<Rc<str>, AttrValue> },
    Text(String),
}

#[derive(Debug, Clone)]
struct MemoryNode {
    kind: NodeKind,
    parent: Option<InstanceId>,
    children: Vec<InstanceId>,
}

/// A [`HostConfig`] that keeps the output tree in memory and logs every
/// mutation it receives.
#[derive(Default)]
pub struct MemoryHost {
    nodes: Vec<Option<MemoryNode>>,
    ops: Vec<HostOp>,
    microtasks: MicrotaskQueue,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host that pushes microtasks onto `microtasks` instead of a private
    /// queue.
    pub fn with_microtasks(microtasks: MicrotaskQueue) -> Self {
        Self {
            microtasks,
            ..Self::default()
        }
    }

    pub fn microtasks(&self) -> MicrotaskQueue {
        self.microtasks.clone()
    }

    /// Allocate a container instance to render a root into.
    pub fn create_container(&mut self) -> InstanceId {
        self.alloc(NodeKind::Container)
    }

    pub fn ops(&self) -> &[HostOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<HostOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Number of live instances, the containers included.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.node(id).is_some()
    }

    pub fn children(&self, id: InstanceId) -> &[InstanceId] {
        self.node(id).map_or(&[], |node| node.children.as_slice())
    }

    pub fn parent(&self, id: InstanceId) -> Option<InstanceId> {
        self.node(id).and_then(|node| node.parent)
    }

    pub fn text(&self, id: InstanceId) -> Option<&str> {
        match &self.node(id)?.kind {
            NodeKind::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn element_type(&self, id: InstanceId) -> Option<&str> {
        match &self.node(id)?.kind {
            NodeKind::Element { ty, .. } => Some(ty),
            _ => None,
        }
    }

    pub fn attr(&self, id: InstanceId, name: &str) -> Option<&AttrValue> {
        match &self.node(id)?.kind {
            NodeKind::Element { attrs, .. } => attrs.get(name),
            _ => None,
        }
    }

    /// The handler stored under `name` on `id`, cloned so it can be called
    /// after the host is released.
    pub fn handler(&self, id: InstanceId, name: &str) -> Option<Handler> {
        match self.attr(id, name) {
            Some(AttrValue::Handler(handler)) => Some(handler.clone()),
            _ => None,
        }
    }

    /// Depth-first search below `root` for the first element of type `ty`.
    pub fn find_element(&self, root: InstanceId, ty: &str) -> Option<InstanceId> {
        self.children(root).iter().find_map(|&child| {
            if self.element_type(child) == Some(ty) {
                Some(child)
            } else {
                self.find_element(child, ty)
            }
        })
    }

    /// Concatenated text content below `id`.
    pub fn text_content(&self, id: InstanceId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: InstanceId, out: &mut String) {
        if let Some(text) = self.text(id) {
            out.push_str(text);
        }
        for &child in self.children(id) {
            self.collect_text(child, out);
        }
    }

    /// Markup-like rendering of the children of `root`, attributes in
    /// insertion order. Handlers are left out.
    pub fn render_to_string(&self, root: InstanceId) -> String {
        let mut out = String::new();
        for &child in self.children(root) {
            self.render_node(child, &mut out);
        }
        out
    }

    fn render_node(&self, id: InstanceId, out: &mut String) {
        let Some(node) = self.node(id) else {
            return;
        };
        match &node.kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Container => {
                for &child in &node.children {
                    self.render_node(child, out);
                }
            }
            NodeKind::Element { ty, attrs } => {
                let _ = write!(out, "<{ty}");
                for (name, value) in attrs {
                    match value {
                        AttrValue::Handler(_) => {}
                        AttrValue::Str(s) => {
                            let _ = write!(out, " {name}=\"{s}\"");
                        }
                        other => {
                            let _ = write!(out, " {name}={other}");
                        }
                    }
                }
                out.push('>');
                for &child in &node.children {
                    self.render_node(child, out);
                }
                let _ = write!(out, "</{ty}>");
            }
        }
    }

    pub fn dump_tree(&self, root: InstanceId) -> String {
        let mut output = String::new();
        self.dump_node(&mut output, root, 0);
        output
    }

    fn dump_node(&self, output: &mut String, id: InstanceId, depth: usize) {
        let indent = "  ".repeat(depth);
        match self.node(id) {
            Some(node) => {
                let _ = match &node.kind {
                    NodeKind::Container => writeln!(output, "{indent}[{id}] container"),
                    NodeKind::Element { ty, .. } => writeln!(output, "{indent}[{id}] <{ty}>"),
                    NodeKind::Text(text) => writeln!(output, "{indent}[{id}] {text:?}"),
                };
                for &child in &node.children {
                    self.dump_node(output, child, depth + 1);
                }
            }
            None => {
                let _ = writeln!(output, "{indent}[{id}] (missing)");
            }
        }
    }

    fn alloc(&mut self, kind: NodeKind) -> InstanceId {
        let id = InstanceId(self.nodes.len());
        self.nodes.push(Some(MemoryNode {
            kind,
            parent: None,
            children: Vec::new(),
        }));
        id
    }

    fn node(&self, id: InstanceId) -> Option<&MemoryNode> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: InstanceId) -> Option<&mut MemoryNode> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    fn detach(&mut self, child: InstanceId) {
        let Some(parent) = self.node(child).and_then(|node| node.parent) else {
            return;
        };
        if let Some(parent) = self.node_mut(parent) {
            parent.children.retain(|&c| c != child);
        }
        if let Some(child) = self.node_mut(child) {
            child.parent = None;
        }
    }

    fn free(&mut self, id: InstanceId) {
        let children = match self.nodes.get_mut(id.0).and_then(Option::take) {
            Some(node) => node.children,
            None => return,
        };
        for child in children {
            self.free(child);
        }
    }

    fn attach(&mut self, parent: InstanceId, child: InstanceId, before: Option<InstanceId>) -> bool {
        if !self.contains(parent) || !self.contains(child) {
            log::warn!("memory host: attach {child} to {parent} with a missing instance");
            return false;
        }
        self.detach(child);
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
        let Some(node) = self.node_mut(parent) else {
            return false;
        };
        let position = before.and_then(|before| node.children.iter().position(|&c| c == before));
        match position {
            Some(index) => node.children.insert(index, child),
            None => {
                if let Some(before) = before {
                    log::warn!("memory host: {before} is not a child of {parent}; appending {child}");
                }
                node.children.push(child);
            }
        }
        true
    }
}

impl HostConfig for MemoryHost {
    fn create_instance(&mut self, ty: &str, props: &Props) -> InstanceId {
        let attrs = props.attrs().map(|(name, value)| (name.clone(), value.clone())).collect();
        let id = self.alloc(NodeKind::Element {
            ty: ty.to_owned(),
            attrs,
        });
        self.ops.push(HostOp::Create { id, ty: ty.to_owned() });
        id
    }

    fn create_text_instance(&mut self, content: &str) -> InstanceId {
        let id = self.alloc(NodeKind::Text(content.to_owned()));
        self.ops.push(HostOp::CreateText {
            id,
            text: content.to_owned(),
        });
        id
    }

    fn append_child(&mut self, parent: InstanceId, child: InstanceId) {
        if self.attach(parent, child, None) {
            self.ops.push(HostOp::Append { parent, child });
        }
    }

    fn insert_before(&mut self, parent: InstanceId, child: InstanceId, before: InstanceId) {
        if self.attach(parent, child, Some(before)) {
            self.ops.push(HostOp::Insert { parent, child, before });
        }
    }

    fn remove_child(&mut self, parent: InstanceId, child: InstanceId) {
        if self.parent(child) != Some(parent) {
            log::warn!("memory host: {child} is not a child of {parent}");
        }
        self.detach(child);
        self.free(child);
        self.ops.push(HostOp::Remove { parent, child });
    }

    fn commit_text_update(&mut self, instance: InstanceId, content: &str) {
        match self.node_mut(instance) {
            Some(MemoryNode {
                kind: NodeKind::Text(text),
                ..
            }) => {
                text.clear();
                text.push_str(content);
            }
            _ => log::warn!("memory host: {instance} is not a text instance"),
        }
        self.ops.push(HostOp::SetText {
            id: instance,
            text: content.to_owned(),
        });
    }

    fn commit_update(&mut self, instance: InstanceId, payload: &UpdatePayload) {
        match self.node_mut(instance) {
            Some(MemoryNode {
                kind: NodeKind::Element { attrs, .. },
                ..
            }) => {
                for change in &payload.changes {
                    match change {
                        AttrChange::Set(name, value) => {
                            attrs.insert(name.clone(), value.clone());
                        }
                        AttrChange::Remove(name) => {
                            attrs.shift_remove(name);
                        }
                    }
                }
            }
            _ => log::warn!("memory host: {instance} is not an element instance"),
        }
        self.ops.push(HostOp::Update {
            id: instance,
            payload: payload.clone(),
        });
    }

    fn schedule_microtask(&mut self, task: Microtask) {
        self.microtasks.push(task);
    }
}
