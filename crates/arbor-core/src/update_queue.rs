//! Prioritised state updates.
//!
//! Pending updates are collected in a shared ring until the owning node
//! renders. Processing applies the updates whose lane is part of the render
//! and keeps the rest, plus everything after the first skipped one, as the
//! new base queue so that the final state respects enqueue order.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::lanes::{Lane, Lanes};
use crate::ring::Ring;

/// What an update does to the previous state.
pub enum Action<S> {
    Replace(S),
    Compute(Rc<dyn Fn(&S) -> S>),
}

impl<S: Clone> Clone for Action<S> {
    fn clone(&self) -> Self {
        match self {
            Action::Replace(value) => Action::Replace(value.clone()),
            Action::Compute(f) => Action::Compute(f.clone()),
        }
    }
}

impl<S: Clone> Action<S> {
    pub fn apply(&self, previous: &S) -> S {
        match self {
            Action::Replace(value) => value.clone(),
            Action::Compute(f) => f(previous),
        }
    }
}

impl<S> fmt::Debug for Action<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Replace(_) => f.write_str("Action::Replace"),
            Action::Compute(_) => f.write_str("Action::Compute"),
        }
    }
}

pub(crate) struct Update<S> {
    pub(crate) lane: Lane,
    pub(crate) action: Action<S>,
    /// State computed at dispatch time when the node had no pending work.
    pub(crate) eager_state: Option<S>,
}

impl<S: Clone> Clone for Update<S> {
    fn clone(&self) -> Self {
        Self {
            lane: self.lane,
            action: self.action.clone(),
            eager_state: self.eager_state.clone(),
        }
    }
}

/// Queue shared by both versions of a node and by every dispatch handle
/// created for it.
pub(crate) struct UpdateQueue<S> {
    pending: RefCell<Ring<Update<S>>>,
    last_rendered_state: RefCell<Option<S>>,
}

impl<S: Clone> UpdateQueue<S> {
    pub(crate) fn new(last_rendered_state: Option<S>) -> Self {
        Self {
            pending: RefCell::new(Ring::new()),
            last_rendered_state: RefCell::new(last_rendered_state),
        }
    }

    pub(crate) fn enqueue(&self, update: Update<S>) {
        self.pending.borrow_mut().push(update);
    }

    pub(crate) fn take_pending(&self) -> Ring<Update<S>> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }

    pub(crate) fn last_rendered_state(&self) -> Option<S> {
        self.last_rendered_state.borrow().clone()
    }

    pub(crate) fn set_last_rendered_state(&self, state: S) {
        *self.last_rendered_state.borrow_mut() = Some(state);
    }
}

pub(crate) struct Processed<S> {
    pub(crate) memoized_state: S,
    pub(crate) base_state: S,
    pub(crate) base_queue: Ring<Update<S>>,
    pub(crate) skipped_lanes: Lanes,
}

/// Fold `queue` over `base_state`, applying only updates whose lane is in
/// `render_lanes`.
pub(crate) fn process_update_queue<S: Clone>(
    base_state: S,
    queue: &Ring<Update<S>>,
    render_lanes: Lanes,
) -> Processed<S> {
    let mut new_state = base_state;
    let mut new_base_state = None;
    let mut new_base_queue = Ring::new();
    let mut skipped_lanes = Lanes::empty();

    for update in queue.iter() {
        if !render_lanes.includes(update.lane) {
            if new_base_queue.is_empty() {
                new_base_state = Some(new_state.clone());
            }
            new_base_queue.push(update.clone());
            skipped_lanes |= update.lane;
            continue;
        }
        if !new_base_queue.is_empty() {
            // Already applied, but it has to run again after the skipped
            // update, so it can never be skipped itself.
            new_base_queue.push(Update {
                lane: Lanes::empty(),
                action: update.action.clone(),
                eager_state: update.eager_state.clone(),
            });
        }
        new_state = match &update.eager_state {
            Some(eager) => eager.clone(),
            None => update.action.apply(&new_state),
        };
    }

    let base_state = new_base_state.unwrap_or_else(|| new_state.clone());
    Processed {
        memoized_state: new_state,
        base_state,
        base_queue: new_base_queue,
        skipped_lanes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(lane: Lane, action: Action<String>) -> Update<String> {
        Update {
            lane,
            action,
            eager_state: None,
        }
    }

    fn append(suffix: &'static str) -> Action<String> {
        Action::Compute(Rc::new(move |prev: &String| format!("{prev}{suffix}")))
    }

    fn queue(updates: Vec<Update<String>>) -> Ring<Update<String>> {
        let mut ring = Ring::new();
        for update in updates {
            ring.push(update);
        }
        ring
    }

    #[test]
    fn applies_all_updates_in_included_lanes() {
        let ring = queue(vec![
            update(Lanes::DEFAULT, append("b")),
            update(Lanes::DEFAULT, Action::Replace("x".to_owned())),
            update(Lanes::DEFAULT, append("c")),
        ]);
        let result = process_update_queue("a".to_owned(), &ring, Lanes::DEFAULT);
        assert_eq!(result.memoized_state, "xc");
        assert_eq!(result.base_state, "xc");
        assert!(result.base_queue.is_empty());
        assert!(result.skipped_lanes.is_empty());
    }

    #[test]
    fn skipped_update_keeps_everything_after_it() {
        // A (default) B (sync) C (default) rendered at sync only.
        let ring = queue(vec![
            update(Lanes::DEFAULT, append("A")),
            update(Lanes::SYNC, append("B")),
            update(Lanes::DEFAULT, append("C")),
        ]);
        let first = process_update_queue(String::new(), &ring, Lanes::SYNC);
        assert_eq!(first.memoized_state, "B");
        assert_eq!(first.base_state, "");
        assert_eq!(first.base_queue.len(), 3);
        assert_eq!(first.skipped_lanes, Lanes::DEFAULT);
        let lanes: Vec<Lanes> = first.base_queue.iter().map(|u| u.lane).collect();
        assert_eq!(lanes, vec![Lanes::DEFAULT, Lanes::empty(), Lanes::DEFAULT]);

        let second = process_update_queue(first.base_state, &first.base_queue, Lanes::DEFAULT);
        assert_eq!(second.memoized_state, "ABC");
        assert!(second.base_queue.is_empty());
    }

    #[test]
    fn eager_state_is_used_instead_of_recomputing() {
        let ring = queue(vec![Update {
            lane: Lanes::DEFAULT,
            action: append("z"),
            eager_state: Some("eager".to_owned()),
        }]);
        let result = process_update_queue("base".to_owned(), &ring, Lanes::DEFAULT);
        assert_eq!(result.memoized_state, "eager");
    }
}
