use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use crate::platform::{PriorityLevel, SchedulerTask, TaskId, TaskScheduler, TaskStatus};

/// Minimal scheduler for unit tests: tasks run only when the test asks, and
/// a running task yields after `budget` checks.
#[derive(Default)]
pub(crate) struct TestScheduler {
    next_id: Cell<u64>,
    queue: RefCell<VecDeque<(TaskId, PriorityLevel, SchedulerTask)>>,
    budget: Cell<Option<usize>>,
    polls: Cell<usize>,
    running: Cell<Option<TaskId>>,
    running_cancelled: Cell<bool>,
    priority: Cell<Option<PriorityLevel>>,
}

impl TestScheduler {
    pub(crate) fn set_budget(&self, budget: Option<usize>) {
        self.budget.set(budget);
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub(crate) fn run_next(&self) -> bool {
        let next = {
            let mut queue = self.queue.borrow_mut();
            let best = queue
                .iter()
                .enumerate()
                .min_by_key(|(index, (_, priority, _))| (*priority, *index))
                .map(|(index, _)| index);
            best.and_then(|index| queue.remove(index))
        };
        let Some((id, priority, task)) = next else {
            return false;
        };
        self.polls.set(0);
        self.running.set(Some(id));
        self.running_cancelled.set(false);
        let previous = self.priority.replace(Some(priority));
        let status = task.run(false);
        self.priority.set(previous);
        self.running.set(None);
        if let TaskStatus::Continue(task) = status {
            if !self.running_cancelled.get() {
                self.queue.borrow_mut().push_front((id, priority, task));
            }
        }
        true
    }

    pub(crate) fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl TaskScheduler for TestScheduler {
    fn schedule_callback(&self, priority: PriorityLevel, task: SchedulerTask) -> TaskId {
        let id = TaskId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.queue.borrow_mut().push_back((id, priority, task));
        id
    }

    fn cancel_callback(&self, id: TaskId) {
        if self.running.get() == Some(id) {
            self.running_cancelled.set(true);
        }
        self.queue.borrow_mut().retain(|(queued, _, _)| *queued != id);
    }

    fn should_yield(&self) -> bool {
        let polls = self.polls.get() + 1;
        self.polls.set(polls);
        self.budget.get().is_some_and(|budget| polls >= budget)
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
