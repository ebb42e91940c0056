use std::cell::Cell;

use super::*;
use crate::element::{host, text, Component, Element, Props};
use crate::hooks::PendingUpdate;
use crate::host::{HostOp, MemoryHost};
use crate::update_queue::{Action, Update};

struct Detached;

impl UpdateSink for Detached {
    fn request_update_lane(&self) -> Lanes {
        Lanes::SYNC
    }

    fn is_fiber_idle(&self, _fiber: FiberId) -> bool {
        false
    }

    fn schedule_update(&self, _update: PendingUpdate) {}

    fn with_transition(&self, scope: &mut dyn FnMut()) {
        scope();
    }
}

struct Fixture {
    core: RootCore,
    host: MemoryHost,
    queue: Rc<UpdateQueue<Child>>,
    sink: Weak<dyn UpdateSink>,
    options: RootOptions,
}

impl Fixture {
    fn new() -> Self {
        let mut host = MemoryHost::new();
        let container = host.create_container();
        let queue = Rc::new(UpdateQueue::new(None));
        let sink: Weak<dyn UpdateSink> = Weak::<Detached>::new();
        Self {
            core: RootCore::new(container, queue.clone()),
            host,
            queue,
            sink,
            options: RootOptions::new().strict(true).label("test"),
        }
    }

    fn schedule(&mut self, child: Child, lane: Lanes) {
        self.queue.enqueue(Update {
            lane,
            action: Action::Replace(child),
            eager_state: None,
        });
        assert!(self.core.mark_update_lane(self.core.current, lane));
        self.core.pending_lanes |= lane;
    }

    fn render(&mut self, lanes: Lanes, yield_every_unit: bool) -> RenderExit {
        let always = || true;
        let should_yield: Option<&dyn Fn() -> bool> = if yield_every_unit { Some(&always) } else { None };
        self.core
            .render_root(&mut self.host, &self.sink, &self.options, lanes, should_yield)
    }

    fn finish(&mut self, lanes: Lanes) -> FiberId {
        match self.render(lanes, false) {
            RenderExit::Completed(root) => root,
            RenderExit::Yielded => panic!("sync walk yielded"),
            RenderExit::Failed(error) => panic!("walk failed: {error}"),
        }
    }

    fn commit(&mut self, finished: FiberId) {
        self.core.commit_root(&mut self.host, finished, "test");
    }
}

fn list(len: usize) -> Child {
    let rows = (0..len)
        .map(|i| Child::Element(host("li", Props::new().with_children(text(i.to_string()))).with_key(i.to_string())))
        .collect();
    Child::Element(host("ul", Props::new().with_children(Child::List(rows))))
}

fn counted_rows(renders: &Rc<Cell<usize>>, len: usize) -> Child {
    let renders = renders.clone();
    let row = Component::new("Row", move |_, _| {
        renders.set(renders.get() + 1);
        Ok(text("row"))
    });
    Child::List(
        (0..len)
            .map(|i| Child::Element(row.element(Props::new()).with_key(i.to_string())))
            .collect(),
    )
}

#[test]
fn completed_walk_bubbles_placement_to_root() {
    let mut fixture = Fixture::new();
    fixture.schedule(list(3), Lanes::SYNC);
    let root = fixture.finish(Lanes::SYNC);

    let arena = &fixture.core.arena;
    assert!(arena[root].subtree_flags.contains(Flags::PLACEMENT));
    let ul = arena[root].child.expect("ul");
    assert!(arena[ul].flags.contains(Flags::PLACEMENT));
    let first_row = arena[ul].child.expect("li");
    assert!(arena[first_row].flags.is_empty());

    let container = fixture.core.container;
    assert!(!fixture
        .host
        .ops()
        .iter()
        .any(|op| matches!(op, HostOp::Append { parent, .. } if *parent == container)));
}

#[test]
fn commit_attaches_tree_and_settles_root() {
    let mut fixture = Fixture::new();
    fixture.schedule(list(3), Lanes::SYNC);
    let root = fixture.finish(Lanes::SYNC);
    fixture.commit(root);

    assert_eq!(fixture.core.current, root);
    assert!(fixture.core.pending_lanes.is_empty());
    assert_eq!(fixture.core.walk.phase, WalkPhase::Idle);
    assert_eq!(
        fixture.host.render_to_string(fixture.core.container),
        "<ul><li>0</li><li>1</li><li>2</li></ul>"
    );
    assert!(fixture.core.arena[root].subtree_flags.is_empty());
}

#[test]
fn yielding_walk_resumes_where_it_stopped() {
    let renders = Rc::new(Cell::new(0));
    let mut fixture = Fixture::new();
    fixture.schedule(counted_rows(&renders, 3), Lanes::DEFAULT);

    let mut yields = 0;
    let root = loop {
        match fixture.render(Lanes::DEFAULT, true) {
            RenderExit::Yielded => {
                assert_eq!(fixture.core.walk.phase, WalkPhase::Interrupted);
                yields += 1;
            }
            RenderExit::Completed(root) => break root,
            RenderExit::Failed(error) => panic!("walk failed: {error}"),
        }
    };

    assert!(yields >= 3);
    assert_eq!(renders.get(), 3);
    fixture.commit(root);
    assert_eq!(fixture.host.text_content(fixture.core.container), "rowrowrow");
}

#[test]
fn other_lanes_discard_the_unfinished_walk() {
    let renders = Rc::new(Cell::new(0));
    let rows = counted_rows(&renders, 3);
    let mut fixture = Fixture::new();
    fixture.schedule(rows.clone(), Lanes::DEFAULT);

    assert!(matches!(fixture.render(Lanes::DEFAULT, true), RenderExit::Yielded));
    // Both root versions plus the three rows reconciled before yielding.
    assert_eq!(fixture.core.arena.len(), 5);
    assert_eq!(renders.get(), 0);

    fixture.schedule(rows, Lanes::SYNC);
    let root = fixture.finish(Lanes::SYNC);
    // Rows from the abandoned walk were freed; only the new rows and their
    // text nodes remain next to the root versions.
    assert_eq!(fixture.core.arena.len(), 2 + 6);
    assert_eq!(renders.get(), 3);

    fixture.commit(root);
    // The default update was skipped and stays pending.
    assert_eq!(fixture.core.pending_lanes, Lanes::DEFAULT);
}

#[test]
fn failed_walk_frees_what_it_allocated() {
    let mut fixture = Fixture::new();
    let boom = Component::new("Boom", |_, _| Err(RenderError::component("Boom", "nope")));
    fixture.schedule(
        Child::List(vec![list(2), Child::Element(boom.element(Props::new()))]),
        Lanes::SYNC,
    );

    match fixture.render(Lanes::SYNC, false) {
        RenderExit::Failed(RenderError::Component { component, message }) => {
            assert_eq!(component, "Boom");
            assert_eq!(message, "nope");
        }
        _ => panic!("expected a component error"),
    }
    assert_eq!(fixture.core.walk.phase, WalkPhase::Idle);
    assert_eq!(fixture.core.arena.len(), 2);
}

#[test]
fn marking_a_detached_fiber_reports_failure() {
    let mut fixture = Fixture::new();
    let orphan = fixture
        .core
        .arena
        .insert(Fiber::new(WorkTag::HostText, FiberProps::Text("x".into()), None));
    assert!(!fixture.core.mark_update_lane(orphan, Lanes::SYNC));
    assert!(fixture.core.mark_update_lane(fixture.core.current, Lanes::SYNC));
}

/// Checks that every node's `subtree_flags` is exactly the union of its
/// children's own and subtree flags. Returns the node's combined flags.
fn assert_exact_subtree_flags(arena: &FiberArena, fiber: FiberId) -> Flags {
    let mut expected = Flags::empty();
    let mut child = arena[fiber].child;
    while let Some(node) = child {
        expected |= assert_exact_subtree_flags(arena, node);
        child = arena[node].sibling;
    }
    assert_eq!(arena[fiber].subtree_flags, expected, "subtree flags of {}", arena[fiber].label());
    arena[fiber].flags | expected
}

fn section(items: &[&str]) -> Element {
    let rows = items
        .iter()
        .map(|item| Child::Element(host("li", Props::new().with_children(text(*item))).with_key(*item)))
        .collect();
    host("section", Props::new().with_children(Child::List(rows))).with_key("stable")
}

fn page(stable: &Element, counter: &str) -> Child {
    let counter = host("p", Props::new().with_children(text(counter))).with_key("counter");
    Child::Element(host(
        "main",
        Props::new().with_children(Child::List(vec![
            Child::Element(stable.clone()),
            Child::Element(counter),
        ])),
    ))
}

#[test]
fn subtree_flags_are_exact_after_a_partial_update() {
    let mut fixture = Fixture::new();
    fixture.schedule(page(&section(&["a"]), "0"), Lanes::SYNC);
    let root = fixture.finish(Lanes::SYNC);
    assert_exact_subtree_flags(&fixture.core.arena, root);
    fixture.commit(root);

    // Placing "b" inside the section leaves a placement on a nested node.
    let stable = section(&["a", "b"]);
    fixture.schedule(page(&stable, "0"), Lanes::SYNC);
    let root = fixture.finish(Lanes::SYNC);
    assert!(fixture.core.arena[root].subtree_flags.contains(Flags::PLACEMENT));
    assert_exact_subtree_flags(&fixture.core.arena, root);
    fixture.commit(root);

    // Same section element: that subtree bails out and must contribute no
    // flags left over from the previous commit.
    fixture.schedule(page(&stable, "1"), Lanes::SYNC);
    let root = fixture.finish(Lanes::SYNC);
    let arena = &fixture.core.arena;
    assert_exact_subtree_flags(arena, root);
    let main = arena[root].child.expect("main");
    let kept = arena[main].child.expect("section");
    assert!(arena[kept].flags.is_empty());
    assert!(arena[kept].subtree_flags.is_empty());
    assert_eq!(arena[root].subtree_flags, Flags::UPDATE);

    fixture.commit(root);
    assert_eq!(
        fixture.host.render_to_string(fixture.core.container),
        "<main><section><li>a</li><li>b</li></section><p>1</p></main>"
    );
}
