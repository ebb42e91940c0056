//! Standard runtime services backed by Rust's `std` library.
//!
//! This crate provides concrete implementations of the platform
//! abstraction traits defined in `arbor-core`: a [`StdScheduler`] that runs
//! prioritised tasks in time slices measured with a [`Clock`], and the
//! [`StdClock`] it uses by default.

use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use arbor_core::collections::map::HashMap;
use arbor_core::{Clock, PriorityLevel, SchedulerTask, TaskId, TaskScheduler, TaskStatus};

/// Tunables for [`StdScheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdSchedulerConfig {
    /// How long a task may run before [`TaskScheduler::should_yield`] asks it
    /// to hand control back.
    pub frame_budget: Duration,
    pub immediate_timeout: Duration,
    pub user_blocking_timeout: Duration,
    pub normal_timeout: Duration,
    pub low_timeout: Duration,
    /// `None` means idle work never expires.
    pub idle_timeout: Option<Duration>,
}

impl Default for StdSchedulerConfig {
    fn default() -> Self {
        Self {
            frame_budget: Duration::from_millis(5),
            immediate_timeout: Duration::ZERO,
            user_blocking_timeout: Duration::from_millis(250),
            normal_timeout: Duration::from_secs(5),
            low_timeout: Duration::from_secs(10),
            idle_timeout: None,
        }
    }
}

impl StdSchedulerConfig {
    fn timeout_millis(&self, priority: PriorityLevel) -> Option<u64> {
        let timeout = match priority {
            PriorityLevel::Immediate => Some(self.immediate_timeout),
            PriorityLevel::UserBlocking => Some(self.user_blocking_timeout),
            PriorityLevel::Normal => Some(self.normal_timeout),
            PriorityLevel::Low => Some(self.low_timeout),
            PriorityLevel::Idle => self.idle_timeout,
        };
        timeout.map(|timeout| timeout.as_millis() as u64)
    }
}

struct Pending {
    priority: PriorityLevel,
    expiration: u64,
    seq: u64,
    task: SchedulerTask,
}

/// Cooperative scheduler for a single thread.
///
/// Tasks are ordered by expiration time (scheduling time plus the timeout of
/// their priority), then by scheduling order. The embedder drives it with
/// [`StdScheduler::run_next`] or [`StdScheduler::run_until_idle`] from its
/// event loop.
pub struct StdScheduler<C: Clock = StdClock> {
    clock: C,
    origin: C::Instant,
    config: StdSchedulerConfig,
    heap: RefCell<BinaryHeap<Reverse<(u64, u64, TaskId)>>>,
    tasks: RefCell<HashMap<TaskId, Pending>>,
    next_id: Cell<u64>,
    next_seq: Cell<u64>,
    slice_start: Cell<u64>,
    running: Cell<Option<TaskId>>,
    running_cancelled: Cell<bool>,
    priority: Cell<Option<PriorityLevel>>,
    work_requested: Cell<bool>,
    waker: RefCell<Option<Rc<dyn Fn()>>>,
}

impl StdScheduler<StdClock> {
    pub fn new() -> Self {
        Self::with_clock(StdClock, StdSchedulerConfig::default())
    }
}

impl Default for StdScheduler<StdClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> StdScheduler<C> {
    pub fn with_clock(clock: C, config: StdSchedulerConfig) -> Self {
        let origin = clock.now();
        Self {
            clock,
            origin,
            config,
            heap: RefCell::new(BinaryHeap::new()),
            tasks: RefCell::new(HashMap::default()),
            next_id: Cell::new(1),
            next_seq: Cell::new(0),
            slice_start: Cell::new(0),
            running: Cell::new(None),
            running_cancelled: Cell::new(false),
            priority: Cell::new(None),
            work_requested: Cell::new(false),
            waker: RefCell::new(None),
        }
    }

    pub fn config(&self) -> &StdSchedulerConfig {
        &self.config
    }

    /// Returns whether work has been scheduled since the last call.
    pub fn take_work_request(&self) -> bool {
        self.work_requested.replace(false)
    }

    /// Registers a waker that will be invoked whenever a task is scheduled.
    pub fn set_waker(&self, waker: impl Fn() + 'static) {
        *self.waker.borrow_mut() = Some(Rc::new(waker));
    }

    /// Clears any registered waker.
    pub fn clear_waker(&self) {
        *self.waker.borrow_mut() = None;
    }

    pub fn has_pending_tasks(&self) -> bool {
        !self.tasks.borrow().is_empty()
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.borrow().len()
    }

    fn now(&self) -> u64 {
        self.clock.elapsed_millis(self.origin)
    }

    fn wake(&self) {
        let waker = self.waker.borrow().clone();
        if let Some(waker) = waker {
            waker();
        }
    }

    fn pop_next(&self) -> Option<(TaskId, Pending)> {
        let mut heap = self.heap.borrow_mut();
        let mut tasks = self.tasks.borrow_mut();
        while let Some(Reverse((_, _, id))) = heap.pop() {
            // Cancelled tasks leave stale heap entries behind.
            if let Some(pending) = tasks.remove(&id) {
                return Some((id, pending));
            }
        }
        None
    }

    fn push(&self, id: TaskId, pending: Pending) {
        self.heap
            .borrow_mut()
            .push(Reverse((pending.expiration, pending.seq, id)));
        self.tasks.borrow_mut().insert(id, pending);
    }

    /// Run the most urgent task for one slice. Returns false when nothing
    /// was queued.
    pub fn run_next(&self) -> bool {
        let Some((id, pending)) = self.pop_next() else {
            return false;
        };
        let Pending {
            priority,
            expiration,
            seq,
            task,
        } = pending;

        let now = self.now();
        let did_timeout = expiration <= now;
        self.slice_start.set(now);
        self.running.set(Some(id));
        self.running_cancelled.set(false);
        let previous = self.priority.replace(Some(priority));
        log::trace!("std scheduler: running {:?} at {:?} (timed out: {did_timeout})", id, priority);
        let status = task.run(did_timeout);
        self.priority.set(previous);
        self.running.set(None);

        if let TaskStatus::Continue(task) = status {
            if !self.running_cancelled.get() {
                self.push(
                    id,
                    Pending {
                        priority,
                        expiration,
                        seq,
                        task,
                    },
                );
            }
        }
        true
    }

    /// Run tasks until none are left. Returns the number of slices run.
    pub fn run_until_idle(&self) -> usize {
        let mut slices = 0;
        while self.run_next() {
            slices += 1;
        }
        slices
    }
}

impl<C: Clock> fmt::Debug for StdScheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdScheduler")
            .field("pending", &self.pending_tasks())
            .field("work_requested", &self.work_requested.get())
            .field("config", &self.config)
            .finish()
    }
}

impl<C: Clock> TaskScheduler for StdScheduler<C> {
    fn schedule_callback(&self, priority: PriorityLevel, task: SchedulerTask) -> TaskId {
        let id = TaskId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        let expiration = match self.config.timeout_millis(priority) {
            Some(timeout) => self.now().saturating_add(timeout),
            None => u64::MAX,
        };
        self.push(
            id,
            Pending {
                priority,
                expiration,
                seq,
                task,
            },
        );
        self.work_requested.set(true);
        self.wake();
        id
    }

    fn cancel_callback(&self, id: TaskId) {
        if self.running.get() == Some(id) {
            self.running_cancelled.set(true);
        }
        self.tasks.borrow_mut().remove(&id);
    }

    fn should_yield(&self) -> bool {
        let budget = self.config.frame_budget.as_millis() as u64;
        self.now().saturating_sub(self.slice_start.get()) >= budget
    }

    fn run_with_priority(&self, priority: PriorityLevel, f: &mut dyn FnMut()) {
        let previous = self.priority.replace(Some(priority));
        f();
        self.priority.set(previous);
    }

    fn current_priority_level(&self) -> PriorityLevel {
        self.priority.get().unwrap_or(PriorityLevel::Normal)
    }
}

/// Clock implementation backed by [`std::time`].
#[derive(Debug, Default, Clone)]
pub struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    fn elapsed_millis(&self, since: Self::Instant) -> u64 {
        since.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use arbor_core::{create_root, Child, Component, MemoryHost, Props, SetState};

    use super::*;

    /// Manually advanced clock counting milliseconds.
    #[derive(Clone, Default)]
    struct FakeClock(Rc<Cell<u64>>);

    impl FakeClock {
        fn advance(&self, millis: u64) {
            self.0.set(self.0.get() + millis);
        }
    }

    impl Clock for FakeClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            self.0.get()
        }

        fn elapsed_millis(&self, since: u64) -> u64 {
            self.0.get().saturating_sub(since)
        }
    }

    fn scheduler() -> (Rc<StdScheduler<FakeClock>>, FakeClock) {
        let clock = FakeClock::default();
        let scheduler = StdScheduler::with_clock(clock.clone(), StdSchedulerConfig::default());
        (Rc::new(scheduler), clock)
    }

    fn record(log: &Rc<RefCell<Vec<String>>>, name: &str) -> SchedulerTask {
        let log = log.clone();
        let name = name.to_owned();
        SchedulerTask::new(move |did_timeout| {
            log.borrow_mut().push(format!("{name}:{did_timeout}"));
            TaskStatus::Done
        })
    }

    #[test]
    fn earlier_expiration_runs_first() {
        let (scheduler, _) = scheduler();
        let log = Rc::new(RefCell::new(Vec::new()));
        scheduler.schedule_callback(PriorityLevel::Low, record(&log, "low"));
        scheduler.schedule_callback(PriorityLevel::Normal, record(&log, "normal"));
        scheduler.schedule_callback(PriorityLevel::UserBlocking, record(&log, "blocking"));

        assert_eq!(scheduler.run_until_idle(), 3);
        assert_eq!(*log.borrow(), vec!["blocking:false", "normal:false", "low:false"]);
    }

    #[test]
    fn starved_task_reports_timeout() {
        let (scheduler, clock) = scheduler();
        let log = Rc::new(RefCell::new(Vec::new()));
        scheduler.schedule_callback(PriorityLevel::Normal, record(&log, "normal"));
        scheduler.schedule_callback(PriorityLevel::Immediate, record(&log, "immediate"));
        clock.advance(5_001);

        scheduler.run_until_idle();
        assert_eq!(*log.borrow(), vec!["immediate:true", "normal:true"]);
    }

    #[test]
    fn idle_work_never_expires() {
        let (scheduler, clock) = scheduler();
        let log = Rc::new(RefCell::new(Vec::new()));
        scheduler.schedule_callback(PriorityLevel::Idle, record(&log, "idle"));
        clock.advance(1_000_000);
        scheduler.run_until_idle();
        assert_eq!(*log.borrow(), vec!["idle:false"]);
    }

    #[test]
    fn should_yield_once_frame_budget_is_spent() {
        let (scheduler, clock) = scheduler();
        let observed = Rc::new(RefCell::new(Vec::new()));
        let handle = scheduler.clone();
        let seen = observed.clone();
        scheduler.schedule_callback(
            PriorityLevel::Normal,
            SchedulerTask::new(move |_| {
                seen.borrow_mut().push(handle.should_yield());
                clock.advance(5);
                seen.borrow_mut().push(handle.should_yield());
                TaskStatus::Done
            }),
        );
        scheduler.run_until_idle();
        assert_eq!(*observed.borrow(), vec![false, true]);
    }

    #[test]
    fn cancelled_task_does_not_run() {
        let (scheduler, _) = scheduler();
        let log = Rc::new(RefCell::new(Vec::new()));
        let id = scheduler.schedule_callback(PriorityLevel::Normal, record(&log, "cancelled"));
        scheduler.schedule_callback(PriorityLevel::Normal, record(&log, "kept"));
        scheduler.cancel_callback(id);

        assert_eq!(scheduler.pending_tasks(), 1);
        scheduler.run_until_idle();
        assert_eq!(*log.borrow(), vec!["kept:false"]);
    }

    #[test]
    fn scheduling_wakes_the_embedder() {
        let (scheduler, _) = scheduler();
        let wakes = Rc::new(Cell::new(0));
        let counter = wakes.clone();
        scheduler.set_waker(move || counter.set(counter.get() + 1));
        scheduler.schedule_callback(PriorityLevel::Normal, SchedulerTask::new(|_| TaskStatus::Done));

        assert_eq!(wakes.get(), 1);
        assert!(scheduler.take_work_request());
        assert!(!scheduler.take_work_request());
    }

    #[test]
    fn std_scheduler_drives_a_root_to_completion() {
        let scheduler = Rc::new(StdScheduler::new());
        let mut host = MemoryHost::new();
        let microtasks = host.microtasks();
        let container = host.create_container();
        let root = create_root(host, container, scheduler.clone());

        let setter: Rc<RefCell<Option<SetState<i32>>>> = Rc::default();
        let captured = setter.clone();
        let counter = Component::new("Counter", move |cx, _| {
            let (count, set_count) = cx.use_state(|| 0)?;
            *captured.borrow_mut() = Some(set_count);
            Ok(Child::Text(format!("count={count}").into()))
        });
        root.render(Child::Element(counter.element(Props::new())));
        microtasks.run_all();
        let text = root.with_host(|host| host.text_content(container)).expect("host");
        assert_eq!(text, "count=0");

        setter.borrow().as_ref().expect("setter").update(|count| count + 2);
        assert!(scheduler.take_work_request());
        scheduler.run_until_idle();
        microtasks.run_all();

        let text = root.with_host(|host| host.text_content(container)).expect("host");
        assert_eq!(text, "count=2");
        assert!(!root.has_pending_work());
    }
}
