//! Deterministic [`TaskScheduler`] for tests.

use std::cell::{Cell, RefCell};
use std::fmt;

use arbor_core::{PriorityLevel, SchedulerTask, TaskId, TaskScheduler, TaskStatus};

struct QueuedTask {
    id: TaskId,
    priority: PriorityLevel,
    seq: u64,
    task: SchedulerTask,
}

/// Scheduler that only runs work when the test asks for it.
///
/// Tasks run most urgent priority first, FIFO within a priority. A running
/// task sees [`TaskScheduler::should_yield`] turn true after `slice_budget`
/// checks, which lets a test stop a render walk after a chosen number of
/// units. With `timed_out` set, tasks are told their deadline expired.
pub struct TestScheduler {
    queue: RefCell<Vec<QueuedTask>>,
    next_id: Cell<u64>,
    next_seq: Cell<u64>,
    slice_budget: Cell<Option<usize>>,
    polls: Cell<usize>,
    timed_out: Cell<bool>,
    running: Cell<Option<TaskId>>,
    running_cancelled: Cell<bool>,
    priority: Cell<Option<PriorityLevel>>,
    executed: Cell<usize>,
}

impl TestScheduler {
    pub fn new() -> Self {
        Self {
            queue: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
            next_seq: Cell::new(0),
            slice_budget: Cell::new(None),
            polls: Cell::new(0),
            timed_out: Cell::new(false),
            running: Cell::new(None),
            running_cancelled: Cell::new(false),
            priority: Cell::new(None),
            executed: Cell::new(0),
        }
    }

    /// Yield after `budget` checks per task run; `None` never yields.
    pub fn set_slice_budget(&self, budget: Option<usize>) {
        self.slice_budget.set(budget);
    }

    /// Report every task as past its deadline.
    pub fn set_timed_out(&self, timed_out: bool) {
        self.timed_out.set(timed_out);
    }

    pub fn pending_tasks(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn has_pending_tasks(&self) -> bool {
        !self.queue.borrow().is_empty()
    }

    /// Priorities of queued tasks in the order they would run.
    pub fn queued_priorities(&self) -> Vec<PriorityLevel> {
        let mut queued: Vec<_> = self
            .queue
            .borrow()
            .iter()
            .map(|task| (task.priority, task.seq))
            .collect();
        queued.sort();
        queued.into_iter().map(|(priority, _)| priority).collect()
    }

    /// Number of task runs so far, continuations included.
    pub fn executed(&self) -> usize {
        self.executed.get()
    }

    /// Run the most urgent task once. Returns false when the queue is empty.
    pub fn run_next(&self) -> bool {
        let next = {
            let mut queue = self.queue.borrow_mut();
            let best = queue
                .iter()
                .enumerate()
                .min_by_key(|(_, task)| (task.priority, task.seq))
                .map(|(index, _)| index);
            best.map(|index| queue.remove(index))
        };
        let Some(QueuedTask { id, priority, seq, task }) = next else {
            return false;
        };

        self.polls.set(0);
        self.running.set(Some(id));
        self.running_cancelled.set(false);
        self.executed.set(self.executed.get() + 1);
        let previous = self.priority.replace(Some(priority));
        log::trace!("test scheduler: running task {:?} at {:?}", id, priority);
        let status = task.run(self.timed_out.get());
        self.priority.set(previous);
        self.running.set(None);

        if let TaskStatus::Continue(task) = status {
            if self.running_cancelled.get() {
                log::trace!("test scheduler: continuation of {:?} dropped", id);
            } else {
                self.queue.borrow_mut().push(QueuedTask { id, priority, seq, task });
            }
        }
        true
    }

    /// Run tasks until the queue is empty. Returns how many runs happened.
    pub fn run_all(&self) -> usize {
        let mut runs = 0;
        while self.run_next() {
            runs += 1;
        }
        runs
    }
}

impl Default for TestScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TestScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestScheduler")
            .field("pending", &self.pending_tasks())
            .field("slice_budget", &self.slice_budget.get())
            .field("timed_out", &self.timed_out.get())
            .finish()
    }
}

impl TaskScheduler for TestScheduler {
    fn schedule_callback(&self, priority: PriorityLevel, task: SchedulerTask) -> TaskId {
        let id = TaskId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        self.queue.borrow_mut().push(QueuedTask { id, priority, seq, task });
        id
    }

    fn cancel_callback(&self, id: TaskId) {
        if self.running.get() == Some(id) {
            self.running_cancelled.set(true);
        }
        self.queue.borrow_mut().retain(|task| task.id != id);
    }

    fn should_yield(&self) -> bool {
        let polls = self.polls.get() + 1;
        self.polls.set(polls);
        self.slice_budget.get().is_some_and(|budget| polls >= budget)
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

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;

    fn record(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> SchedulerTask {
        let log = log.clone();
        SchedulerTask::new(move |_| {
            log.borrow_mut().push(name);
            TaskStatus::Done
        })
    }

    #[test]
    fn runs_by_priority_then_fifo() {
        let scheduler = TestScheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        scheduler.schedule_callback(PriorityLevel::Low, record(&log, "low"));
        scheduler.schedule_callback(PriorityLevel::Normal, record(&log, "normal-1"));
        scheduler.schedule_callback(PriorityLevel::Immediate, record(&log, "immediate"));
        scheduler.schedule_callback(PriorityLevel::Normal, record(&log, "normal-2"));

        assert_eq!(scheduler.run_all(), 4);
        assert_eq!(*log.borrow(), vec!["immediate", "normal-1", "normal-2", "low"]);
    }

    #[test]
    fn continuation_keeps_id_and_cancel_drops_it() {
        let scheduler = Rc::new(TestScheduler::new());
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        let id = scheduler.schedule_callback(
            PriorityLevel::Normal,
            SchedulerTask::new(move |_| {
                counter.set(counter.get() + 1);
                let counter = counter.clone();
                TaskStatus::Continue(SchedulerTask::new(move |_| {
                    counter.set(counter.get() + 1);
                    TaskStatus::Done
                }))
            }),
        );
        assert!(scheduler.run_next());
        assert_eq!(scheduler.pending_tasks(), 1);
        scheduler.cancel_callback(id);
        assert!(!scheduler.run_next());
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn cancelling_the_running_task_drops_its_continuation() {
        let scheduler = Rc::new(TestScheduler::new());
        let handle = scheduler.clone();
        let own_id = Rc::new(Cell::new(None));
        let seen = own_id.clone();
        let id = scheduler.schedule_callback(
            PriorityLevel::Normal,
            SchedulerTask::new(move |_| {
                if let Some(id) = seen.get() {
                    handle.cancel_callback(id);
                }
                TaskStatus::Continue(SchedulerTask::new(|_| TaskStatus::Done))
            }),
        );
        own_id.set(Some(id));
        assert!(scheduler.run_next());
        assert!(!scheduler.has_pending_tasks());
    }

    #[test]
    fn slice_budget_counts_checks_per_run() {
        let scheduler = TestScheduler::new();
        scheduler.set_slice_budget(Some(2));
        assert!(!scheduler.should_yield());
        assert!(scheduler.should_yield());
        scheduler.set_slice_budget(None);
        assert!(!scheduler.should_yield());
    }

    #[test]
    fn priority_scope_is_restored() {
        let scheduler = TestScheduler::new();
        let mut seen = None;
        scheduler.run_with_priority(PriorityLevel::UserBlocking, &mut || {
            seen = Some(scheduler.current_priority_level());
        });
        assert_eq!(seen, Some(PriorityLevel::UserBlocking));
        assert_eq!(scheduler.current_priority_level(), PriorityLevel::Normal);
    }
}
