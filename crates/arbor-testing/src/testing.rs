use std::rc::Rc;

use arbor_core::{
    create_root_with_options, Child, FiberSnapshot, HostOp, InstanceId, Lanes, MemoryHost, MicrotaskQueue,
    RenderError, Root, RootOptions,
};

use crate::scheduler::TestScheduler;

/// Upper bound on scheduler and microtask turns in one [`ReconcilerTestRule::pump_until_idle`].
const MAX_PUMP_TURNS: usize = 10_000;

/// Headless harness for exercising a root in tests.
///
/// `ReconcilerTestRule` owns a root rendering into a [`MemoryHost`]
/// container, driven by a [`TestScheduler`] and an explicit microtask queue,
/// so a test decides exactly when synchronous and concurrent work runs.
pub struct ReconcilerTestRule {
    root: Root<MemoryHost>,
    scheduler: Rc<TestScheduler>,
    microtasks: MicrotaskQueue,
    container: InstanceId,
}

impl ReconcilerTestRule {
    /// Create a rule with strict child checking.
    pub fn new() -> Self {
        Self::with_options(RootOptions::new().strict(true).label("test"))
    }

    pub fn with_options(options: RootOptions) -> Self {
        let microtasks = MicrotaskQueue::new();
        let mut host = MemoryHost::with_microtasks(microtasks.clone());
        let container = host.create_container();
        let scheduler = Rc::new(TestScheduler::new());
        let root = create_root_with_options(host, container, scheduler.clone(), options);
        Self {
            root,
            scheduler,
            microtasks,
            container,
        }
    }

    /// Render `content` and flush the resulting synchronous work.
    pub fn set_content(&mut self, content: impl Into<Child>) -> Result<(), RenderError> {
        self.root.render(content);
        self.flush_microtasks()
    }

    /// Schedule a render of `content` without flushing anything.
    pub fn render(&self, content: impl Into<Child>) {
        self.root.render(content);
    }

    /// Run queued microtasks (synchronous renders) and report a render error
    /// if one happened.
    pub fn flush_microtasks(&self) -> Result<(), RenderError> {
        self.microtasks.run_all();
        self.take_error()
    }

    /// Run the most urgent scheduler task once.
    pub fn run_next_task(&self) -> Result<bool, RenderError> {
        let ran = self.scheduler.run_next();
        self.take_error().map(|_| ran)
    }

    /// Alternate microtasks and scheduler tasks until neither has work left.
    pub fn pump_until_idle(&self) -> Result<(), RenderError> {
        for _ in 0..MAX_PUMP_TURNS {
            let mut progressed = self.microtasks.run_all() > 0;
            if !progressed {
                progressed = self.scheduler.run_next();
            }
            self.take_error()?;
            if !progressed {
                return Ok(());
            }
        }
        log::warn!("test rule: still busy after {MAX_PUMP_TURNS} turns");
        Ok(())
    }

    /// Run `f`, then drain everything it scheduled.
    pub fn act<R>(&self, f: impl FnOnce(&Self) -> R) -> Result<R, RenderError> {
        let result = f(self);
        self.pump_until_idle()?;
        Ok(result)
    }

    /// Call the handler stored under `name` on `instance`. Returns false when
    /// there is none.
    pub fn fire(&self, instance: InstanceId, name: &str) -> bool {
        let handler = self
            .root
            .with_host(|host| host.handler(instance, name))
            .ok()
            .flatten();
        match handler {
            Some(handler) => {
                handler.call();
                true
            }
            None => false,
        }
    }

    pub fn root(&self) -> &Root<MemoryHost> {
        &self.root
    }

    pub fn scheduler(&self) -> &TestScheduler {
        &self.scheduler
    }

    pub fn microtasks(&self) -> &MicrotaskQueue {
        &self.microtasks
    }

    pub fn container(&self) -> InstanceId {
        self.container
    }

    pub fn pending_lanes(&self) -> Lanes {
        self.root.pending_lanes().unwrap_or_default()
    }

    /// Markup of the container's children.
    pub fn markup(&self) -> String {
        self.with_host(|host| host.render_to_string(self.container))
    }

    pub fn text_content(&self) -> String {
        self.with_host(|host| host.text_content(self.container))
    }

    /// First element of type `ty` below the container.
    pub fn find(&self, ty: &str) -> Option<InstanceId> {
        self.with_host(|host| host.find_element(self.container, ty))
    }

    pub fn children(&self, instance: InstanceId) -> Vec<InstanceId> {
        self.with_host(|host| host.children(instance).to_vec())
    }

    pub fn ops(&self) -> Vec<HostOp> {
        self.with_host(|host| host.ops().to_vec())
    }

    pub fn take_ops(&self) -> Vec<HostOp> {
        self.root.with_host_mut(MemoryHost::take_ops).unwrap_or_default()
    }

    pub fn snapshot(&self) -> Option<FiberSnapshot> {
        self.root.snapshot().ok()
    }

    /// Text dump of the committed node tree.
    pub fn dump(&self) -> String {
        self.snapshot().map(|snapshot| snapshot.dump()).unwrap_or_default()
    }

    fn with_host<R: Default>(&self, f: impl FnOnce(&MemoryHost) -> R) -> R {
        self.root.with_host(f).unwrap_or_default()
    }

    fn take_error(&self) -> Result<(), RenderError> {
        self.root.take_error().map_or(Ok(()), Err)
    }
}

impl Default for ReconcilerTestRule {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience helper for tests that only need temporary access to a
/// `ReconcilerTestRule`.
pub fn run_test_root<R>(f: impl FnOnce(&mut ReconcilerTestRule) -> R) -> R {
    let mut rule = ReconcilerTestRule::new();
    f(&mut rule)
}
