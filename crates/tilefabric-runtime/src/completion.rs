//! Completion tokens of started DMA transfers

use parking_lot::{Condvar, Mutex};
use tilefabric_core::TaskId;

use crate::error::{Result, RuntimeError};
use crate::fabric::RunControl;

/// Completion flags for every task of the sequence, indexed by task id
pub(crate) struct CompletionBoard {
    done: Mutex<Vec<bool>>,
    changed: Condvar,
}

impl CompletionBoard {
    pub fn new(tasks: usize) -> Self {
        Self {
            done: Mutex::new(vec![false; tasks]),
            changed: Condvar::new(),
        }
    }

    pub fn complete(&self, task: TaskId) {
        let mut done = self.done.lock();
        if let Some(flag) = done.get_mut(task.index()) {
            *flag = true;
        }
        drop(done);
        self.changed.notify_all();
    }

    pub fn is_complete(&self, task: TaskId) -> bool {
        self.done.lock().get(task.index()).copied().unwrap_or(false)
    }

    /// Block until every task in `tasks` has completed.
    pub fn wait_all(&self, tasks: &[TaskId], waiter: &str, control: &RunControl) -> Result<()> {
        let mut watchdog = control.watchdog();
        let mut done = self.done.lock();
        loop {
            if control.is_aborted() {
                return Err(RuntimeError::Aborted);
            }
            let pending: Vec<TaskId> = tasks
                .iter()
                .copied()
                .filter(|task| !done.get(task.index()).copied().unwrap_or(false))
                .collect();
            if pending.is_empty() {
                return Ok(());
            }
            if watchdog.expired() {
                let pending: Vec<String> = pending.iter().map(ToString::to_string).collect();
                return Err(control.deadlock(format!("{waiter} waiting on task(s) {}", pending.join(", "))));
            }
            self.changed.wait_until(&mut done, watchdog.deadline());
        }
    }

    pub fn wake_all(&self) {
        let _done = self.done.lock();
        self.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use tilefabric_core::ErrorKind;

    fn task_ids(n: usize) -> Vec<TaskId> {
        use tilefabric_core::{DType, DeviceFamily, Graph, SizeDescriptor, TensorType};

        let mut graph = Graph::new(DeviceFamily::Npu1);
        let shim = graph.tile(0, 0).unwrap();
        let core = graph.tile(0, 2).unwrap();
        let ch = graph
            .object_fifo("in", shim, core, 2, TensorType::vector(DType::I32, 1).unwrap())
            .unwrap();
        let host = graph.host_arg(TensorType::vector(DType::I32, 4).unwrap());
        (0..n)
            .map(|_| {
                graph
                    .dma_task(ch, host, SizeDescriptor::new(vec![4]).unwrap(), None, true)
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn waiters_resume_once_every_task_completes() {
        let tasks = task_ids(2);
        let board = CompletionBoard::new(2);
        let control = RunControl::new(Duration::from_secs(5), false);
        thread::scope(|scope| {
            let waiter = scope.spawn(|| board.wait_all(&tasks, "sequence", &control));
            board.complete(tasks[1]);
            thread::sleep(Duration::from_millis(5));
            board.complete(tasks[0]);
            waiter.join().unwrap().unwrap();
        });
        assert!(board.is_complete(tasks[0]));
    }

    #[test]
    fn progress_elsewhere_keeps_a_long_wait_alive() {
        let tasks = task_ids(1);
        let board = CompletionBoard::new(1);
        let control = RunControl::new(Duration::from_millis(50), false);
        thread::scope(|scope| {
            let waiter = scope.spawn(|| board.wait_all(&tasks, "sequence", &control));
            for _ in 0..10 {
                thread::sleep(Duration::from_millis(10));
                control.note_progress();
            }
            board.complete(tasks[0]);
            waiter.join().unwrap().unwrap();
        });
    }

    #[test]
    fn missing_completion_is_a_deadlock() {
        let tasks = task_ids(1);
        let board = CompletionBoard::new(1);
        let control = RunControl::new(Duration::from_millis(10), false);
        let err = board.wait_all(&tasks, "sequence", &control).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Deadlock);
        assert!(err.to_string().contains("#0"));
    }
}
