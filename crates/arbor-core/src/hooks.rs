//! Hooks: per-node state, effects, refs and transitions.
//!
//! A component receives a [`RenderCx`] for the duration of one render. The
//! context owns the hook cursor, so hook calls outside a render cannot be
//! expressed. Records are matched to the previous render purely by call
//! order.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::context::{Context, ContextId, ContextStack};
use crate::error::{HookError, HookKind};
use crate::fiber::FiberId;
use crate::flags::{EffectTag, Flags};
use crate::lanes::{Lane, Lanes};
use crate::ring::Ring;
use crate::root::RootHandle;
use crate::update_queue::{process_update_queue, Action, Update, UpdateQueue};

pub type EffectCleanup = Box<dyn FnOnce()>;
type EffectCreate = Box<dyn FnOnce() -> Option<EffectCleanup>>;

/// A value that can be listed as an effect dependency.
pub trait DepValue: Any {
    fn dep_eq(&self, other: &dyn DepValue) -> bool;
    fn as_any(&self) -> &dyn Any;
}

impl<T: PartialEq + 'static> DepValue for T {
    fn dep_eq(&self, other: &dyn DepValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Dependency list of an effect. An empty list runs the effect once.
#[derive(Clone, Default)]
pub struct Deps(Vec<Rc<dyn DepValue>>);

impl Deps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: PartialEq + 'static>(mut self, value: T) -> Self {
        self.0.push(Rc::new(value));
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Element-wise equality; lists of different length never match.
    pub(crate) fn same(&self, other: &Deps) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(other.0.iter())
                .all(|(a, b)| a.dep_eq(b.as_ref()))
    }
}

impl fmt::Debug for Deps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Deps(len={})", self.0.len())
    }
}

/// Builds [`Deps`] from a list of values: `deps![count, name.clone()]`.
#[macro_export]
macro_rules! deps {
    ($($value:expr),* $(,)?) => {
        $crate::Deps::new()$(.with($value))*
    };
}

/// Cleanup slot shared by every render's record of the same effect.
#[derive(Default)]
pub(crate) struct EffectInstance {
    destroy: RefCell<Option<EffectCleanup>>,
}

pub(crate) struct Effect {
    tag: EffectTag,
    create: RefCell<Option<EffectCreate>>,
    instance: Rc<EffectInstance>,
    deps: Option<Deps>,
}

impl Effect {
    pub(crate) fn tag(&self) -> EffectTag {
        self.tag
    }

    pub(crate) fn run_destroy(&self) {
        let destroy = self.instance.destroy.borrow_mut().take();
        if let Some(destroy) = destroy {
            destroy();
        }
    }

    pub(crate) fn run_create(&self) {
        let create = self.create.borrow_mut().take();
        if let Some(create) = create {
            let destroy = create();
            *self.instance.destroy.borrow_mut() = destroy;
        }
    }
}

#[derive(Clone)]
pub(crate) struct HookRecord {
    kind: HookKind,
    memoized_state: Rc<dyn Any>,
    base_state: Option<Rc<dyn Any>>,
    base_queue: Option<Rc<dyn Any>>,
    queue: Option<Rc<dyn Any>>,
}

impl HookRecord {
    fn new(kind: HookKind, memoized_state: Rc<dyn Any>) -> Self {
        Self {
            kind,
            memoized_state,
            base_state: None,
            base_queue: None,
            queue: None,
        }
    }

    /// Replace the base queue after a render merged pending updates into it.
    pub(crate) fn stash_base_queue(&mut self, queue: Rc<dyn Any>) {
        self.base_queue = Some(queue);
    }
}

/// An update waiting to be enqueued, plus where it has to be scheduled.
pub(crate) struct PendingUpdate {
    pub(crate) fiber: FiberId,
    pub(crate) lane: Lane,
    enqueue: Box<dyn FnOnce()>,
}

impl PendingUpdate {
    pub(crate) fn new(fiber: FiberId, lane: Lane, enqueue: impl FnOnce() + 'static) -> Self {
        Self {
            fiber,
            lane,
            enqueue: Box::new(enqueue),
        }
    }

    pub(crate) fn enqueue(self) -> (FiberId, Lane) {
        (self.enqueue)();
        (self.fiber, self.lane)
    }
}

/// The root side of a dispatch: lane selection and scheduling.
pub(crate) trait UpdateSink {
    fn request_update_lane(&self) -> Lane;

    /// True when neither version of `fiber` has pending work and no walk is
    /// running, which makes eager state computation safe.
    fn is_fiber_idle(&self, fiber: FiberId) -> bool;

    fn schedule_update(&self, update: PendingUpdate);

    fn with_transition(&self, scope: &mut dyn FnMut());
}

/// Setter returned by [`RenderCx::use_state`]. Stable across renders and
/// safe to call at any time, including after the component unmounted.
pub struct SetState<S> {
    sink: Weak<dyn UpdateSink>,
    fiber: FiberId,
    queue: Rc<UpdateQueue<S>>,
}

impl<S> Clone for SetState<S> {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
            fiber: self.fiber,
            queue: self.queue.clone(),
        }
    }
}

impl<S> PartialEq for SetState<S> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.queue, &other.queue)
    }
}

impl<S> fmt::Debug for SetState<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetState").field("fiber", &self.fiber).finish()
    }
}

impl<S: Clone + PartialEq + 'static> SetState<S> {
    pub fn set(&self, value: S) {
        self.dispatch(Action::Replace(value));
    }

    pub fn update(&self, f: impl Fn(&S) -> S + 'static) {
        self.dispatch(Action::Compute(Rc::new(f)));
    }

    pub fn dispatch(&self, action: Action<S>) {
        let Some(sink) = self.sink.upgrade() else {
            log::debug!("update for {:?} dropped: root is gone", self.fiber);
            return;
        };
        let lane = sink.request_update_lane();
        let mut update = Update {
            lane,
            action,
            eager_state: None,
        };
        if sink.is_fiber_idle(self.fiber) {
            if let Some(last) = self.queue.last_rendered_state() {
                let eager = update.action.apply(&last);
                let unchanged = eager == last;
                update.eager_state = Some(eager);
                if unchanged {
                    log::debug!("eager state unchanged for {:?}; no render scheduled", self.fiber);
                    // Kept so later updates still fold in enqueue order.
                    update.lane = Lanes::empty();
                    self.queue.enqueue(update);
                    return;
                }
            }
        }
        let queue = self.queue.clone();
        sink.schedule_update(PendingUpdate::new(self.fiber, lane, move || {
            queue.enqueue(update)
        }));
    }
}

/// Starter returned by [`RenderCx::use_transition`].
#[derive(Clone)]
pub struct StartTransition {
    set_pending: SetState<bool>,
    sink: Weak<dyn UpdateSink>,
}

impl StartTransition {
    /// Mark the transition pending at the ambient lane, then run `scope` with
    /// every update it makes (and the pending reset) in the transition lane.
    pub fn start(&self, scope: impl FnOnce()) {
        self.set_pending.set(true);
        let Some(sink) = self.sink.upgrade() else {
            return;
        };
        let set_pending = self.set_pending.clone();
        let mut scope = Some(scope);
        sink.with_transition(&mut || {
            if let Some(scope) = scope.take() {
                scope();
            }
            set_pending.set(false);
        });
    }
}

/// Everything a finished component render hands back to the begin phase.
pub(crate) struct HookOutcome {
    pub(crate) hooks: Vec<HookRecord>,
    pub(crate) effects: Ring<Rc<Effect>>,
    pub(crate) flags: Flags,
    pub(crate) skipped_lanes: Lanes,
    pub(crate) did_receive_update: bool,
    pub(crate) contexts: Vec<ContextId>,
}

/// Render-local hook state for one component invocation.
pub(crate) struct HookSession {
    fiber: FiberId,
    component: Rc<str>,
    current: Option<Vec<HookRecord>>,
    hooks: Vec<HookRecord>,
    stashed: Vec<(usize, Rc<dyn Any>)>,
    effects: Ring<Rc<Effect>>,
    flags: Flags,
    render_lanes: Lanes,
    skipped_lanes: Lanes,
    did_receive_update: bool,
    contexts: Vec<ContextId>,
}

impl HookSession {
    /// `current` is `None` on mount, otherwise the committed hook list.
    pub(crate) fn new(
        fiber: FiberId,
        component: Rc<str>,
        current: Option<Vec<HookRecord>>,
        render_lanes: Lanes,
    ) -> Self {
        Self {
            fiber,
            component,
            current,
            hooks: Vec::new(),
            stashed: Vec::new(),
            effects: Ring::new(),
            flags: Flags::empty(),
            render_lanes,
            skipped_lanes: Lanes::empty(),
            did_receive_update: false,
            contexts: Vec::new(),
        }
    }

    /// Base queues that absorbed pending updates during this render, by hook
    /// index. They belong on the committed records whether or not the render
    /// succeeds.
    pub(crate) fn take_stashed(&mut self) -> Vec<(usize, Rc<dyn Any>)> {
        std::mem::take(&mut self.stashed)
    }

    pub(crate) fn finish(self) -> Result<HookOutcome, HookError> {
        if let Some(current) = &self.current {
            if self.hooks.len() < current.len() {
                return Err(HookError::FewerHooks {
                    component: self.component.to_string(),
                    expected: current.len(),
                    found: self.hooks.len(),
                });
            }
        }
        Ok(HookOutcome {
            hooks: self.hooks,
            effects: self.effects,
            flags: self.flags,
            skipped_lanes: self.skipped_lanes,
            did_receive_update: self.did_receive_update,
            contexts: self.contexts,
        })
    }
}

/// Handed to a component for the duration of one render.
pub struct RenderCx<'a> {
    session: &'a mut HookSession,
    contexts: &'a ContextStack,
    sink: &'a Weak<dyn UpdateSink>,
}

impl<'a> RenderCx<'a> {
    pub(crate) fn new(
        session: &'a mut HookSession,
        contexts: &'a ContextStack,
        sink: &'a Weak<dyn UpdateSink>,
    ) -> Self {
        Self {
            session,
            contexts,
            sink,
        }
    }

    pub fn component_name(&self) -> &str {
        &self.session.component
    }

    pub fn is_mounting(&self) -> bool {
        self.session.current.is_none()
    }

    /// Handle to the root this component renders into.
    pub fn root(&self) -> RootHandle {
        RootHandle::new(self.sink.clone())
    }

    fn type_mismatch(&self, index: usize) -> HookError {
        HookError::TypeMismatch {
            component: self.session.component.to_string(),
            index,
        }
    }

    /// The committed record at the next hook position, `None` on mount.
    fn next_current(&self, kind: HookKind) -> Result<Option<HookRecord>, HookError> {
        let index = self.session.hooks.len();
        let Some(current) = &self.session.current else {
            return Ok(None);
        };
        let record = current.get(index).ok_or_else(|| HookError::MoreHooks {
            component: self.session.component.to_string(),
        })?;
        if record.kind != kind {
            return Err(HookError::KindMismatch {
                component: self.session.component.to_string(),
                index,
                previous: record.kind,
                requested: kind,
            });
        }
        Ok(Some(record.clone()))
    }

    fn set_state<S>(&self, queue: Rc<UpdateQueue<S>>) -> SetState<S> {
        SetState {
            sink: self.sink.clone(),
            fiber: self.session.fiber,
            queue,
        }
    }

    /// Local state. `init` only runs on mount.
    pub fn use_state<S>(&mut self, init: impl FnOnce() -> S) -> Result<(S, SetState<S>), HookError>
    where
        S: Clone + PartialEq + 'static,
    {
        let index = self.session.hooks.len();
        let Some(current) = self.next_current(HookKind::State)? else {
            let state = init();
            let queue = Rc::new(UpdateQueue::new(Some(state.clone())));
            self.session.hooks.push(HookRecord {
                kind: HookKind::State,
                memoized_state: Rc::new(state.clone()),
                base_state: Some(Rc::new(state.clone()) as Rc<dyn Any>),
                base_queue: None,
                queue: Some(queue.clone() as Rc<dyn Any>),
            });
            return Ok((state, self.set_state(queue)));
        };

        let queue = current
            .queue
            .clone()
            .and_then(|queue| queue.downcast::<UpdateQueue<S>>().ok())
            .ok_or_else(|| self.type_mismatch(index))?;
        let previous = current
            .memoized_state
            .downcast_ref::<S>()
            .cloned()
            .ok_or_else(|| self.type_mismatch(index))?;
        let base_state = current
            .base_state
            .as_ref()
            .and_then(|state| state.downcast_ref::<S>())
            .cloned()
            .ok_or_else(|| self.type_mismatch(index))?;
        let mut base_queue = match &current.base_queue {
            Some(queue) => queue
                .downcast_ref::<Ring<Update<S>>>()
                .cloned()
                .ok_or_else(|| self.type_mismatch(index))?,
            None => Ring::new(),
        };

        let pending = queue.take_pending();
        if !pending.is_empty() {
            base_queue.append(pending);
            // The shared ring is now empty; the committed record has to keep
            // the merged queue or a failed or discarded render loses it.
            self.session
                .stashed
                .push((index, Rc::new(base_queue.clone()) as Rc<dyn Any>));
        }

        let (state, base_state, base_queue) = if base_queue.is_empty() {
            (previous.clone(), base_state, base_queue)
        } else {
            let processed = process_update_queue(base_state, &base_queue, self.session.render_lanes);
            self.session.skipped_lanes |= processed.skipped_lanes;
            (
                processed.memoized_state,
                processed.base_state,
                processed.base_queue,
            )
        };

        if state != previous {
            self.session.did_receive_update = true;
        }
        queue.set_last_rendered_state(state.clone());
        self.session.hooks.push(HookRecord {
            kind: HookKind::State,
            memoized_state: Rc::new(state.clone()),
            base_state: Some(Rc::new(base_state) as Rc<dyn Any>),
            base_queue: (!base_queue.is_empty()).then(|| Rc::new(base_queue) as Rc<dyn Any>),
            queue: Some(queue.clone() as Rc<dyn Any>),
        });
        Ok((state, self.set_state(queue)))
    }

    /// Passive effect, run after commit. `deps == None` runs it after every
    /// commit, an empty list only after mount.
    pub fn use_effect(
        &mut self,
        create: impl FnOnce() -> Option<EffectCleanup> + 'static,
        deps: Option<Deps>,
    ) -> Result<(), HookError> {
        let index = self.session.hooks.len();
        let current = self.next_current(HookKind::Effect)?;
        let previous = match &current {
            Some(record) => Some(
                record
                    .memoized_state
                    .clone()
                    .downcast::<Effect>()
                    .map_err(|_| self.type_mismatch(index))?,
            ),
            None => None,
        };

        let unchanged = match (&deps, previous.as_ref().and_then(|prev| prev.deps.as_ref())) {
            (Some(next), Some(prev)) => next.same(prev),
            _ => false,
        };
        let tag = if unchanged {
            EffectTag::PASSIVE
        } else {
            self.session.flags |= Flags::PASSIVE_EFFECT;
            EffectTag::PASSIVE | EffectTag::HAS_EFFECT
        };
        let instance = previous
            .map(|prev| prev.instance.clone())
            .unwrap_or_default();
        let effect = Rc::new(Effect {
            tag,
            create: RefCell::new(Some(Box::new(create))),
            instance,
            deps,
        });
        self.session.effects.push(effect.clone());
        self.session
            .hooks
            .push(HookRecord::new(HookKind::Effect, effect));
        Ok(())
    }

    /// A mutable cell that survives re-renders. Writing to it never schedules
    /// a render.
    pub fn use_ref<T: 'static>(&mut self, init: impl FnOnce() -> T) -> Result<Rc<RefCell<T>>, HookError> {
        let index = self.session.hooks.len();
        let cell = match self.next_current(HookKind::Ref)? {
            Some(record) => record
                .memoized_state
                .downcast::<RefCell<T>>()
                .map_err(|_| self.type_mismatch(index))?,
            None => Rc::new(RefCell::new(init())),
        };
        self.session
            .hooks
            .push(HookRecord::new(HookKind::Ref, cell.clone()));
        Ok(cell)
    }

    /// Pending flag plus a starter for transition-lane updates.
    pub fn use_transition(&mut self) -> Result<(bool, StartTransition), HookError> {
        let (is_pending, set_pending) = self.use_state(|| false)?;
        let index = self.session.hooks.len();
        let start = match self.next_current(HookKind::Transition)? {
            Some(record) => record
                .memoized_state
                .downcast::<StartTransition>()
                .map_err(|_| self.type_mismatch(index))?,
            None => Rc::new(StartTransition {
                set_pending,
                sink: self.sink.clone(),
            }),
        };
        let starter = (*start).clone();
        self.session
            .hooks
            .push(HookRecord::new(HookKind::Transition, start));
        Ok((is_pending, starter))
    }

    /// Nearest provided value of `context`, or its default.
    pub fn use_context<T: 'static>(&mut self, context: &Context<T>) -> Rc<T> {
        let id = context.id();
        if !self.session.contexts.contains(&id) {
            self.session.contexts.push(id);
        }
        self.contexts
            .read(id)
            .and_then(|value| value.downcast::<T>().ok())
            .unwrap_or_else(|| context.default_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deps_compare_element_wise() {
        assert!(deps![1, "a"].same(&deps![1, "a"]));
        assert!(!deps![1, "a"].same(&deps![1, "b"]));
        assert!(!deps![1].same(&deps![1, 2]));
        assert!(!deps![1u8].same(&deps![1u16]));
        assert!(Deps::new().same(&deps![]));
    }

    #[test]
    fn effect_destroy_slot_is_shared() {
        let ran = Rc::new(RefCell::new(Vec::new()));
        let log = ran.clone();
        let instance = Rc::new(EffectInstance::default());
        let first = Effect {
            tag: EffectTag::PASSIVE | EffectTag::HAS_EFFECT,
            create: RefCell::new(Some(Box::new(move || {
                log.borrow_mut().push("create");
                let log = log.clone();
                Some(Box::new(move || log.borrow_mut().push("destroy")) as EffectCleanup)
            }))),
            instance: instance.clone(),
            deps: None,
        };
        first.run_create();
        let second = Effect {
            tag: EffectTag::PASSIVE,
            create: RefCell::new(None),
            instance,
            deps: None,
        };
        second.run_destroy();
        second.run_destroy();
        assert_eq!(*ran.borrow(), vec!["create", "destroy"]);
    }
}
