use super::*;
use crate::element::{fragment, host, text};

fn item(key: &str) -> Child {
    Child::Element(host("li", Props::new()).with_key(key))
}

fn keyed(keys: &[&str]) -> Child {
    Child::List(keys.iter().map(|key| item(key)).collect())
}

fn mount(children: &Child) -> (FiberArena, FiberId) {
    let mut arena = FiberArena::new();
    let parent = arena.insert(Fiber::new(WorkTag::HostElement, FiberProps::None, None));
    let first = ChildReconciler::new(&mut arena, false, true)
        .reconcile(parent, None, children)
        .unwrap();
    arena[parent].child = first;
    arena.keep_created();
    (arena, parent)
}

fn update(arena: &mut FiberArena, current: FiberId, children: &Child) -> FiberId {
    let wip = create_work_in_progress(arena, current, FiberProps::None);
    let current_first = arena[current].child;
    let first = ChildReconciler::new(arena, true, true)
        .reconcile(wip, current_first, children)
        .unwrap();
    arena[wip].child = first;
    wip
}

fn children(arena: &FiberArena, parent: FiberId) -> Vec<FiberId> {
    let mut out = Vec::new();
    let mut child = arena[parent].child;
    while let Some(fiber) = child {
        out.push(fiber);
        child = arena[fiber].sibling;
    }
    out
}

fn placed_keys(arena: &FiberArena, parent: FiberId) -> Vec<String> {
    children(arena, parent)
        .into_iter()
        .filter(|fiber| arena[*fiber].flags.contains(Flags::PLACEMENT))
        .filter_map(|fiber| arena[fiber].key.as_ref().map(|key| key.to_string()))
        .collect()
}

#[test]
fn mount_flags_nothing() {
    let (arena, parent) = mount(&keyed(&["a", "b", "c"]));
    let kids = children(&arena, parent);
    assert_eq!(kids.len(), 3);
    for (index, fiber) in kids.iter().enumerate() {
        assert_eq!(arena[*fiber].index, index);
        assert!(arena[*fiber].flags.is_empty());
        assert_eq!(arena[*fiber].parent, Some(parent));
    }
}

#[test]
fn swapping_two_items_places_only_the_one_moved_right() {
    let (mut arena, parent) = mount(&keyed(&["a", "b", "c"]));
    let wip = update(&mut arena, parent, &keyed(&["a", "c", "b"]));
    assert_eq!(placed_keys(&arena, wip), vec!["b"]);
    assert!(arena[wip].deletions.is_empty());
}

#[test]
fn moving_last_to_front_places_every_shifted_item() {
    let (mut arena, parent) = mount(&keyed(&["a", "b", "c", "d"]));
    let wip = update(&mut arena, parent, &keyed(&["d", "a", "b", "c"]));
    assert_eq!(placed_keys(&arena, wip), vec!["a", "b", "c"]);
}

#[test]
fn keyed_items_keep_their_nodes() {
    let (mut arena, parent) = mount(&keyed(&["a", "b", "c"]));
    let before = children(&arena, parent);
    let wip = update(&mut arena, parent, &keyed(&["c", "b", "a"]));
    let after = children(&arena, wip);
    let reused: Vec<Option<FiberId>> = after.iter().map(|f| arena[*f].alternate).collect();
    assert_eq!(
        reused,
        vec![Some(before[2]), Some(before[1]), Some(before[0])]
    );
}

#[test]
fn removed_items_are_queued_for_deletion_in_order() {
    let (mut arena, parent) = mount(&keyed(&["a", "b", "c", "d"]));
    let before = children(&arena, parent);
    let wip = update(&mut arena, parent, &keyed(&["a", "d"]));
    assert_eq!(arena[wip].deletions, vec![before[1], before[2]]);
    assert!(arena[wip].flags.contains(Flags::CHILD_DELETION));
    assert!(placed_keys(&arena, wip).is_empty());
}

#[test]
fn single_child_with_new_type_replaces_the_node() {
    let (mut arena, parent) = mount(&Child::Element(host("span", Props::new())));
    let old = arena[parent].child.unwrap();
    let wip = update(&mut arena, parent, &Child::Element(host("b", Props::new())));
    let new = arena[wip].child.unwrap();
    assert_ne!(new, old);
    assert!(arena[new].flags.contains(Flags::PLACEMENT));
    assert_eq!(arena[wip].deletions, vec![old]);
}

#[test]
fn text_reuses_an_existing_text_node() {
    let (mut arena, parent) = mount(&text("a"));
    let old = arena[parent].child.unwrap();
    let wip = update(&mut arena, parent, &text("b"));
    let new = arena[wip].child.unwrap();
    assert_eq!(arena[new].alternate, Some(old));
    assert!(arena[new].flags.is_empty());
}

#[test]
fn unkeyed_top_level_fragment_is_unwrapped() {
    let (arena, parent) = mount(&Child::Element(fragment(vec![item("a"), item("b")])));
    let kids = children(&arena, parent);
    assert_eq!(kids.len(), 2);
    assert!(kids.iter().all(|f| arena[*f].tag == WorkTag::HostElement));
}

#[test]
fn nested_lists_become_fragments() {
    let tree = Child::List(vec![item("a"), keyed(&["b", "c"])]);
    let (arena, parent) = mount(&tree);
    let kids = children(&arena, parent);
    assert_eq!(arena[kids[1]].tag, WorkTag::Fragment);
}

#[test]
fn malformed_element_is_skipped_unless_strict() {
    let bad = Child::Element(host("", Props::new()));
    let mut arena = FiberArena::new();
    let parent = arena.insert(Fiber::new(WorkTag::HostElement, FiberProps::None, None));
    let lenient = ChildReconciler::new(&mut arena, false, false).reconcile(parent, None, &bad);
    assert!(matches!(lenient, Ok(None)));

    let strict = ChildReconciler::new(&mut arena, false, true).reconcile(parent, None, &bad);
    assert!(matches!(strict, Err(RenderError::UnsupportedChild(_))));
}

#[test]
fn clone_child_fibers_links_fresh_copies() {
    let (mut arena, parent) = mount(&keyed(&["a", "b"]));
    let before = children(&arena, parent);
    let wip = create_work_in_progress(&mut arena, parent, FiberProps::None);
    clone_child_fibers(&mut arena, wip);
    let after = children(&arena, wip);
    assert_eq!(after.len(), 2);
    assert_eq!(arena[after[0]].alternate, Some(before[0]));
    assert_eq!(arena[after[1]].alternate, Some(before[1]));
    assert!(after.iter().all(|f| arena[*f].parent == Some(wip)));
}

#[test]
fn duplicate_key_removes_the_shadowed_node() {
    let (mut arena, parent) = mount(&keyed(&["a", "a", "b"]));
    let before = children(&arena, parent);
    let wip = update(&mut arena, parent, &keyed(&["a", "b"]));
    let reused: Vec<Option<FiberId>> = children(&arena, wip)
        .iter()
        .map(|fiber| arena[*fiber].alternate)
        .collect();
    assert_eq!(reused, vec![Some(before[1]), Some(before[2])]);
    assert_eq!(arena[wip].deletions, vec![before[0]]);
    assert!(arena[wip].flags.contains(Flags::CHILD_DELETION));
}
